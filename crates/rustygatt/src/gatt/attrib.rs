//! ATT bearer multiplexer
//!
//! [`Attrib`] sits on top of a [`Bearer`] (normally an L2CAP socket) and
//! serializes requests: ATT allows one outstanding request per bearer, so
//! further requests wait in a FIFO queue. Each logical operation owns a
//! [`RequestId`] that may span several PDUs (long reads, discovery loops);
//! cancelling the id withdraws every PDU still queued under it and detaches
//! the handler of the one in flight.

use crate::att::*;
use crate::transport::{EventHandler, RequestId};
use log::{debug, trace, warn};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something that can carry ATT PDUs to the peer
pub trait Bearer: Send + Sync {
    /// Send one complete PDU
    fn send(&self, pdu: &[u8]) -> io::Result<()>;

    /// Close the bearer
    fn shutdown(&self);
}

/// Receives the response PDU, or the ATT status the request failed with
pub type ResponseHandler = Box<dyn FnOnce(Result<Vec<u8>, u8>) + Send>;

struct Queued {
    id: RequestId,
    opcode: u8,
    pdu: Vec<u8>,
    handler: ResponseHandler,
}

struct InFlight {
    id: RequestId,
    opcode: u8,
    // None once the request was cancelled; the response is still consumed
    handler: Option<ResponseHandler>,
}

#[derive(Default)]
struct AttribState {
    next_id: u32,
    live: HashSet<RequestId>,
    in_flight: Option<InFlight>,
    queue: VecDeque<Queued>,
    events: Option<EventHandler>,
    closed: bool,
}

/// Request/response correlation for one ATT bearer
pub struct Attrib {
    bearer: Arc<dyn Bearer>,
    state: Mutex<AttribState>,
    mtu: AtomicU16,
}

impl Attrib {
    pub fn new(bearer: Arc<dyn Bearer>, mtu: u16) -> Arc<Self> {
        Arc::new(Self {
            bearer,
            state: Mutex::new(AttribState::default()),
            mtu: AtomicU16::new(mtu.max(ATT_DEFAULT_LE_MTU)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AttribState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current ATT MTU
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::SeqCst)
    }

    /// Update the ATT MTU used by procedures from now on
    pub fn set_mtu(&self, mtu: u16) {
        let mtu = mtu.clamp(ATT_DEFAULT_LE_MTU, ATT_MAX_MTU);
        debug!("ATT MTU set to {}", mtu);
        self.mtu.store(mtu, Ordering::SeqCst);
    }

    /// Install the handler for notifications and indications
    pub fn register_events(&self, handler: EventHandler) {
        self.lock().events = Some(handler);
    }

    /// Allocate a new operation id
    pub fn begin(&self) -> AttResult<RequestId> {
        let mut state = self.lock();
        if state.closed {
            return Err(AttError::Closed);
        }
        state.next_id = state.next_id.wrapping_add(1).max(1);
        let id = RequestId(state.next_id);
        state.live.insert(id);
        Ok(id)
    }

    /// True while `id` has not completed or been cancelled
    pub fn is_live(&self, id: RequestId) -> bool {
        self.lock().live.contains(&id)
    }

    /// Queue a request PDU under `id`.
    ///
    /// Fails if the bearer is closed or `id` is no longer live; in that case
    /// `handler` is dropped without being called.
    pub fn send(&self, id: RequestId, pdu: Vec<u8>, handler: ResponseHandler) -> AttResult<()> {
        self.enqueue(id, pdu, handler).map_err(|(e, _)| e)
    }

    /// Queue a follow-up PDU of an operation already under way.
    ///
    /// Unlike [`send`](Self::send) the handler always learns the outcome: a
    /// refused send completes it with the matching status (aborted once the
    /// bearer is closed). Only a cancelled `id` drops it unrun.
    pub fn send_next(&self, id: RequestId, pdu: Vec<u8>, handler: ResponseHandler) {
        match self.enqueue(id, pdu, handler) {
            Ok(()) => {}
            Err((AttError::InvalidState, _)) => debug!("ATT request {} was cancelled", id),
            Err((e, handler)) => {
                debug!("ATT request {} stopped: {}", id, e);
                handler(Err(e.status()));
            }
        }
    }

    fn enqueue(
        &self,
        id: RequestId,
        pdu: Vec<u8>,
        handler: ResponseHandler,
    ) -> Result<(), (AttError, ResponseHandler)> {
        let opcode = match pdu.first() {
            Some(&op) if opcode_kind(op) == OpcodeKind::Request => op,
            _ => {
                return Err((
                    AttError::InvalidParameter("not a request PDU".into()),
                    handler,
                ))
            }
        };

        {
            let mut state = self.lock();
            if state.closed {
                return Err((AttError::Closed, handler));
            }
            if !state.live.contains(&id) {
                return Err((AttError::InvalidState, handler));
            }
            state.queue.push_back(Queued {
                id,
                opcode,
                pdu,
                handler,
            });
        }

        self.pump();
        Ok(())
    }

    /// Send a PDU that expects no response (command or confirmation)
    pub fn send_command(&self, pdu: &[u8]) -> AttResult<()> {
        if self.lock().closed {
            return Err(AttError::Closed);
        }
        trace!("ATT tx {}", hex::encode(pdu));
        self.bearer.send(pdu)?;
        Ok(())
    }

    /// Withdraw `id`. Returns false if it was unknown or already complete.
    pub fn cancel(&self, id: RequestId) -> bool {
        let detached;
        let mut withdrawn = Vec::new();
        {
            let mut state = self.lock();
            if !state.live.remove(&id) {
                return false;
            }

            let mut kept = VecDeque::with_capacity(state.queue.len());
            while let Some(entry) = state.queue.pop_front() {
                if entry.id == id {
                    withdrawn.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            state.queue = kept;

            detached = match state.in_flight.as_mut() {
                Some(flight) if flight.id == id => flight.handler.take(),
                _ => None,
            };
        }

        debug!("Cancelled ATT request {}", id);
        drop(withdrawn);
        drop(detached);
        true
    }

    /// Feed one PDU received from the peer
    pub fn handle_pdu(&self, pdu: &[u8]) {
        let opcode = match pdu.first() {
            Some(&op) => op,
            None => {
                warn!("Dropping empty ATT PDU");
                return;
            }
        };
        trace!("ATT rx {}", hex::encode(pdu));

        match opcode_kind(opcode) {
            OpcodeKind::Response => self.handle_response(pdu),
            OpcodeKind::Notification | OpcodeKind::Indication => {
                let events = self.lock().events.clone();
                match events {
                    Some(handler) => handler(pdu),
                    None => debug!("No event handler for opcode 0x{:02x}", opcode),
                }
            }
            OpcodeKind::Request => {
                // This side only acts as a client
                let reply =
                    ErrorResponse::new(opcode, 0x0000, AttErrorCode::RequestNotSupported);
                if let Err(e) = self.send_command(&reply.serialize()) {
                    warn!("Failed to reject peer request 0x{:02x}: {}", opcode, e);
                }
            }
            OpcodeKind::Command | OpcodeKind::Confirmation => {
                debug!("Ignoring peer PDU 0x{:02x}", opcode);
            }
            OpcodeKind::Unknown => {
                warn!("Unknown ATT opcode 0x{:02x}", opcode);
            }
        }
    }

    fn handle_response(&self, pdu: &[u8]) {
        let flight = {
            let mut state = self.lock();
            match state.in_flight.as_ref() {
                Some(flight) if is_response_to(flight.opcode, pdu) => state.in_flight.take(),
                _ => None,
            }
        };

        let flight = match flight {
            Some(flight) => flight,
            None => {
                warn!("Unexpected ATT response 0x{:02x}", pdu[0]);
                return;
            }
        };

        if let Some(handler) = flight.handler {
            let result = if pdu[0] == ATT_ERROR_RSP {
                match ErrorResponse::parse(pdu) {
                    Ok(rsp) => Err(rsp.error_code.into()),
                    Err(_) => Err(ATT_ERROR_INVALID_PDU),
                }
            } else {
                Ok(pdu.to_vec())
            };
            handler(result);
        }

        self.finish_if_idle(flight.id);
        self.pump();
    }

    /// An operation is complete once its last handler ran without sending
    /// another PDU under the same id
    fn finish_if_idle(&self, id: RequestId) {
        let mut state = self.lock();
        let busy = state.in_flight.as_ref().is_some_and(|f| f.id == id)
            || state.queue.iter().any(|q| q.id == id);
        if !busy {
            state.live.remove(&id);
        }
    }

    /// Put the next queued request on the wire if nothing is in flight
    fn pump(&self) {
        loop {
            let (id, pdu) = {
                let mut state = self.lock();
                if state.closed || state.in_flight.is_some() {
                    return;
                }
                match state.queue.pop_front() {
                    Some(entry) => {
                        state.in_flight = Some(InFlight {
                            id: entry.id,
                            opcode: entry.opcode,
                            handler: Some(entry.handler),
                        });
                        (entry.id, entry.pdu)
                    }
                    None => return,
                }
            };

            // Sent without the lock held; the response may arrive at any point
            trace!("ATT tx {} ({})", hex::encode(&pdu), id);
            match self.bearer.send(&pdu) {
                Ok(()) => return,
                Err(e) => {
                    warn!("ATT send failed for {}: {}", id, e);
                    let failed = {
                        let mut state = self.lock();
                        match state.in_flight.as_ref() {
                            Some(flight) if flight.id == id => state.in_flight.take(),
                            _ => None,
                        }
                    };
                    if let Some(handler) = failed.and_then(|f| f.handler) {
                        handler(Err(ATT_ECODE_IO));
                    }
                    self.finish_if_idle(id);
                }
            }
        }
    }

    /// Close the bearer and abort everything outstanding
    pub fn shutdown(&self) {
        let (flight, queued) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.live.clear();
            state.events = None;
            (
                state.in_flight.take(),
                state.queue.drain(..).collect::<Vec<_>>(),
            )
        };

        debug!("Shutting down ATT bearer");
        if let Some(handler) = flight.and_then(|f| f.handler) {
            handler(Err(ATT_ECODE_ABORTED));
        }
        for entry in queued {
            (entry.handler)(Err(ATT_ECODE_ABORTED));
        }
        self.bearer.shutdown();
    }
}
