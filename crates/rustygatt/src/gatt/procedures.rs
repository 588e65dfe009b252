//! GATT client sub-procedures built from ATT request chains
//!
//! Each procedure allocates one [`RequestId`] on the [`Attrib`] and keeps
//! sending PDUs under it until the procedure ends, then reports through a
//! single [`ReplyCallback`]. Cancelling the id stops the chain at the next
//! step without invoking the callback; a bearer closing mid-chain completes
//! it with the aborted status.

use super::attrib::{Attrib, ResponseHandler};
use super::types::{Characteristic, PrimaryService};
use crate::att::*;
use crate::transport::{Reply, ReplyCallback, RequestId};
use crate::uuid::Uuid;
use log::debug;
use std::sync::Arc;

fn start(
    attrib: &Arc<Attrib>,
    pdu: Vec<u8>,
    handler: impl FnOnce(RequestId) -> ResponseHandler,
) -> AttResult<RequestId> {
    let id = attrib.begin()?;
    let handler = handler(id);
    if let Err(e) = attrib.send(id, pdu, handler) {
        attrib.cancel(id);
        return Err(e);
    }
    Ok(id)
}

/// Exchange MTU; replies with the server's receive MTU
pub fn exchange_mtu(attrib: &Arc<Attrib>, mtu: u16, callback: ReplyCallback) -> AttResult<RequestId> {
    let pdu = ExchangeMtuRequest { client_mtu: mtu }.serialize();

    start(attrib, pdu, |_| {
        Box::new(move |result| match result {
            Ok(rsp) => match ExchangeMtuResponse::parse(&rsp) {
                Ok(rsp) => callback(Ok(Reply::Mtu(rsp.server_mtu))),
                Err(_) => callback(Err(ATT_ERROR_INVALID_PDU)),
            },
            Err(status) => callback(Err(status)),
        })
    })
}

struct LongRead {
    attrib: Arc<Attrib>,
    id: RequestId,
    handle: u16,
    value: Vec<u8>,
    callback: ReplyCallback,
}

impl LongRead {
    fn finish(self) {
        let pdu = ReadResponse { value: self.value }.serialize();
        (self.callback)(Ok(Reply::Pdu(pdu)));
    }

    /// Continue with a Read Blob if the last part filled the PDU
    fn advance(mut self, part: &[u8]) {
        self.value.extend_from_slice(part);

        let full = part.len() + 1 >= self.attrib.mtu() as usize;
        if !full || self.value.len() > u16::MAX as usize {
            self.finish();
            return;
        }

        let pdu = ReadBlobRequest {
            handle: self.handle,
            offset: self.value.len() as u16,
        }
        .serialize();

        let attrib = Arc::clone(&self.attrib);
        let id = self.id;
        attrib.send_next(
            id,
            pdu,
            Box::new(move |result| match result {
                Ok(rsp) => match ReadBlobResponse::parse(&rsp) {
                    Ok(blob) => self.advance(&blob.value),
                    Err(_) => (self.callback)(Err(ATT_ERROR_INVALID_PDU)),
                },
                // The value simply ended on a PDU boundary
                Err(ATT_ERROR_ATTRIBUTE_NOT_LONG) | Err(ATT_ERROR_INVALID_OFFSET) => {
                    self.finish()
                }
                Err(status) => (self.callback)(Err(status)),
            }),
        );
    }
}

/// Read a value by handle, following up with Read Blob requests for long
/// values. Replies with a Read Response PDU carrying the whole value.
pub fn read_char(attrib: &Arc<Attrib>, handle: u16, callback: ReplyCallback) -> AttResult<RequestId> {
    let pdu = ReadRequest { handle }.serialize();
    let owner = Arc::clone(attrib);

    start(attrib, pdu, move |id| {
        Box::new(move |result| match result {
            Ok(rsp) => match ReadResponse::parse(&rsp) {
                Ok(rsp) => LongRead {
                    attrib: owner,
                    id,
                    handle,
                    value: Vec::new(),
                    callback,
                }
                .advance(&rsp.value),
                Err(_) => callback(Err(ATT_ERROR_INVALID_PDU)),
            },
            Err(status) => callback(Err(status)),
        })
    })
}

/// Read By Type over a handle range; replies with the raw response PDU
pub fn read_char_by_uuid(
    attrib: &Arc<Attrib>,
    start_handle: u16,
    end_handle: u16,
    uuid: Uuid,
    callback: ReplyCallback,
) -> AttResult<RequestId> {
    let pdu = ReadByTypeRequest {
        start_handle,
        end_handle,
        attribute_type: uuid,
    }
    .serialize();

    start(attrib, pdu, |_| {
        Box::new(move |result| callback(result.map(Reply::Pdu)))
    })
}

/// Write a value with response. Values that do not fit one Write Request
/// go out as a Prepare Write sequence followed by Execute Write.
pub fn write_char(
    attrib: &Arc<Attrib>,
    handle: u16,
    value: Vec<u8>,
    callback: ReplyCallback,
) -> AttResult<RequestId> {
    let mtu = attrib.mtu() as usize;

    if value.len() + ATT_MTU_HEADER_SIZE <= mtu {
        let pdu = WriteRequest { handle, value }.serialize();
        return start(attrib, pdu, |_| {
            Box::new(move |result| callback(result.map(Reply::Pdu)))
        });
    }

    debug!("Long write of {} bytes to 0x{:04x}", value.len(), handle);
    let id = attrib.begin()?;
    let (pdu, handler) = LongWrite {
        attrib: Arc::clone(attrib),
        id,
        handle,
        value,
        offset: 0,
        callback,
    }
    .next_part();
    if let Err(e) = attrib.send(id, pdu, handler) {
        attrib.cancel(id);
        return Err(e);
    }
    Ok(id)
}

struct LongWrite {
    attrib: Arc<Attrib>,
    id: RequestId,
    handle: u16,
    value: Vec<u8>,
    offset: usize,
    callback: ReplyCallback,
}

impl LongWrite {
    /// The next prepared part, or the execute once everything is queued
    fn next_part(mut self) -> (Vec<u8>, ResponseHandler) {
        if self.offset >= self.value.len() {
            let pdu = ExecuteWriteRequest {
                flags: ATT_EXEC_WRITE_COMMIT,
            }
            .serialize();
            let callback = self.callback;
            return (pdu, Box::new(move |result| callback(result.map(Reply::Pdu))));
        }

        // Opcode, handle and offset
        let room = (self.attrib.mtu() as usize).saturating_sub(5).max(1);
        let end = (self.offset + room).min(self.value.len());
        let pdu = PrepareWriteRequest {
            handle: self.handle,
            offset: self.offset as u16,
            value: self.value[self.offset..end].to_vec(),
        }
        .serialize();
        self.offset = end;

        (pdu, Box::new(move |result| self.on_prepared(result)))
    }

    fn on_prepared(self, result: Result<Vec<u8>, u8>) {
        let attrib = Arc::clone(&self.attrib);
        let id = self.id;

        match result {
            Ok(_) => {
                let (pdu, handler) = self.next_part();
                attrib.send_next(id, pdu, handler);
            }
            Err(status) => {
                // Discard whatever the server queued so far, then report
                let cancel = ExecuteWriteRequest {
                    flags: ATT_EXEC_WRITE_CANCEL,
                }
                .serialize();
                let callback = self.callback;
                attrib.send_next(id, cancel, Box::new(move |_| callback(Err(status))));
            }
        }
    }
}

/// Write Command; the value is truncated to what fits one PDU
pub fn write_cmd(attrib: &Arc<Attrib>, handle: u16, value: &[u8]) -> AttResult<()> {
    let room = (attrib.mtu() as usize).saturating_sub(ATT_MTU_HEADER_SIZE);
    let value = &value[..value.len().min(room)];

    attrib.send_command(
        &WriteCommand {
            handle,
            value: value.to_vec(),
        }
        .serialize(),
    )
}

struct PrimaryDiscovery {
    attrib: Arc<Attrib>,
    id: RequestId,
    next: u16,
    services: Vec<PrimaryService>,
    callback: ReplyCallback,
}

impl PrimaryDiscovery {
    fn request(start_handle: u16) -> Vec<u8> {
        ReadByGroupTypeRequest {
            start_handle,
            end_handle: ATT_HANDLE_MAX,
            group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
        }
        .serialize()
    }

    fn handler(self) -> ResponseHandler {
        Box::new(move |result| self.on_response(result))
    }

    fn on_response(mut self, result: Result<Vec<u8>, u8>) {
        let rsp = match result {
            Ok(rsp) => rsp,
            // Past the last service
            Err(ATT_ERROR_ATTRIBUTE_NOT_FOUND) => {
                return (self.callback)(Ok(Reply::Services(self.services)))
            }
            Err(status) => return (self.callback)(Err(status)),
        };

        let rsp = match ReadByGroupTypeResponse::parse(&rsp) {
            Ok(rsp) => rsp,
            Err(_) => return (self.callback)(Err(ATT_ERROR_INVALID_PDU)),
        };

        let mut last_end = 0u16;
        for entry in rsp.data {
            let uuid = match Uuid::try_from_slice_le(&entry.value) {
                Some(uuid) => uuid,
                None => return (self.callback)(Err(ATT_ERROR_INVALID_PDU)),
            };
            last_end = entry.end_group_handle;
            self.services.push(PrimaryService {
                uuid,
                start: entry.handle,
                end: entry.end_group_handle,
            });
        }

        // Stop at the end of the handle space or if the server stops advancing
        if last_end == ATT_HANDLE_MAX || last_end < self.next {
            return (self.callback)(Ok(Reply::Services(self.services)));
        }

        self.next = last_end + 1;
        let attrib = Arc::clone(&self.attrib);
        let id = self.id;
        attrib.send_next(id, Self::request(self.next), self.handler());
    }
}

/// Discover all primary services, in handle order
pub fn discover_primary(attrib: &Arc<Attrib>, callback: ReplyCallback) -> AttResult<RequestId> {
    let owner = Arc::clone(attrib);

    start(attrib, PrimaryDiscovery::request(ATT_HANDLE_MIN), move |id| {
        PrimaryDiscovery {
            attrib: owner,
            id,
            next: ATT_HANDLE_MIN,
            services: Vec::new(),
            callback,
        }
        .handler()
    })
}

struct CharacteristicDiscovery {
    attrib: Arc<Attrib>,
    id: RequestId,
    next: u16,
    end: u16,
    filter: Option<Uuid>,
    found: Vec<Characteristic>,
    callback: ReplyCallback,
}

impl CharacteristicDiscovery {
    fn request(start_handle: u16, end_handle: u16) -> Vec<u8> {
        ReadByTypeRequest {
            start_handle,
            end_handle,
            attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
        }
        .serialize()
    }

    fn handler(self) -> ResponseHandler {
        Box::new(move |result| self.on_response(result))
    }

    fn on_response(mut self, result: Result<Vec<u8>, u8>) {
        let rsp = match result {
            Ok(rsp) => rsp,
            Err(ATT_ERROR_ATTRIBUTE_NOT_FOUND) => {
                return (self.callback)(Ok(Reply::Characteristics(self.found)))
            }
            Err(status) => return (self.callback)(Err(status)),
        };

        let rsp = match ReadByTypeResponse::parse(&rsp) {
            Ok(rsp) => rsp,
            Err(_) => return (self.callback)(Err(ATT_ERROR_INVALID_PDU)),
        };

        let mut last = None;
        for entry in rsp.data {
            let declaration = match Characteristic::from_declaration(entry.handle, &entry.value) {
                Some(declaration) => declaration,
                None => return (self.callback)(Err(ATT_ERROR_INVALID_PDU)),
            };
            last = Some(entry.handle);
            if self.filter.map_or(true, |uuid| uuid == declaration.uuid) {
                self.found.push(declaration);
            }
        }

        match last {
            Some(handle) if handle >= self.next && handle < self.end => {
                self.next = handle + 1;
                let attrib = Arc::clone(&self.attrib);
                let id = self.id;
                let pdu = Self::request(self.next, self.end);
                attrib.send_next(id, pdu, self.handler());
            }
            _ => (self.callback)(Ok(Reply::Characteristics(self.found))),
        }
    }
}

/// Discover characteristic declarations in `start..=end`, keeping only those
/// of type `filter` when given
pub fn discover_characteristics(
    attrib: &Arc<Attrib>,
    start_handle: u16,
    end_handle: u16,
    filter: Option<Uuid>,
    callback: ReplyCallback,
) -> AttResult<RequestId> {
    if start_handle == 0 || start_handle > end_handle {
        return Err(AttError::InvalidParameter(format!(
            "invalid handle range 0x{:04x}-0x{:04x}",
            start_handle, end_handle
        )));
    }

    let owner = Arc::clone(attrib);
    start(
        attrib,
        CharacteristicDiscovery::request(start_handle, end_handle),
        move |id| {
            CharacteristicDiscovery {
                attrib: owner,
                id,
                next: start_handle,
                end: end_handle,
                filter,
                found: Vec::new(),
                callback,
            }
            .handler()
        },
    )
}
