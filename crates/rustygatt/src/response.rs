//! Completion tokens correlating one request with its result
//!
//! A [`GattResponse`] is the caller's side: it blocks in [`GattResponse::wait`]
//! and collects the values. The transport only ever sees a [`Responder`], a
//! weak handle that goes inert once the token is cancelled or dropped, so a
//! late completion can never touch freed state.

use crate::att::AttErrorCode;
use crate::error::{Error, Result};
use crate::transport::RequestId;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

struct SlotState<T> {
    values: Vec<T>,
    status: Option<u8>,
    dead: bool,
    request: Option<RequestId>,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    done: Condvar,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller-owned token for one outstanding request
pub struct GattResponse<T> {
    slot: Arc<Slot<T>>,
}

impl<T> GattResponse<T> {
    /// A fresh, unnotified token
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot {
                state: Mutex::new(SlotState {
                    values: Vec::new(),
                    status: None,
                    dead: false,
                    request: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Wait for completion.
    ///
    /// Returns `Ok(false)` if `timeout` elapses first (the token stays usable),
    /// `Ok(true)` on success and [`Error::Protocol`] when the request completed
    /// with a non-zero ATT status.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.lock();

        loop {
            match state.status {
                Some(0) => return Ok(true),
                Some(code) => return Err(Error::Protocol(AttErrorCode::from(code))),
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .slot
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Status the request completed with, if it has
    pub fn status(&self) -> Option<u8> {
        self.slot.lock().status
    }

    /// True once the request has completed, successfully or not
    pub fn is_done(&self) -> bool {
        self.status().is_some()
    }

    /// Values received so far, in arrival order
    pub fn received(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.slot.lock().values.clone()
    }

    /// Move the received values out of the token
    pub fn take_received(&self) -> Vec<T> {
        std::mem::take(&mut self.slot.lock().values)
    }

    /// Id of the request this token is bound to, once submitted
    pub fn request_id(&self) -> Option<RequestId> {
        self.slot.lock().request
    }

    pub(crate) fn responder(&self) -> Responder<T> {
        Responder {
            slot: Arc::downgrade(&self.slot),
        }
    }

    pub(crate) fn set_request_id(&self, id: RequestId) {
        self.slot.lock().request = Some(id);
    }

    /// Detach the token from its request. Returns the request id if the
    /// request had not completed yet, so the caller can cancel it.
    pub(crate) fn mark_dead(&self) -> Option<RequestId> {
        let mut state = self.slot.lock();
        if state.dead {
            return None;
        }
        state.dead = true;
        match state.status {
            Some(_) => None,
            None => state.request,
        }
    }
}

impl<T> Default for GattResponse<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The transport-facing half of a [`GattResponse`]
pub struct Responder<T> {
    slot: Weak<Slot<T>>,
}

impl<T> Clone for Responder<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Responder<T> {
    /// Append a value. Ignored once the token is notified, cancelled or gone.
    pub fn on_response(&self, value: T) {
        if let Some(slot) = self.slot.upgrade() {
            let mut state = slot.lock();
            if !state.dead && state.status.is_none() {
                state.values.push(value);
            }
        }
    }

    /// Complete the request. Only the first call has any effect.
    pub fn notify(&self, status: u8) {
        if let Some(slot) = self.slot.upgrade() {
            let mut state = slot.lock();
            if state.dead || state.status.is_some() {
                return;
            }
            state.status = Some(status);
            slot.done.notify_all();
        }
    }

    /// False once the caller has cancelled or dropped the token
    pub fn is_live(&self) -> bool {
        match self.slot.upgrade() {
            Some(slot) => !slot.lock().dead,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_times_out_then_succeeds() {
        let response = GattResponse::<Vec<u8>>::new();
        assert!(!response.wait(Duration::from_millis(20)).unwrap());

        let responder = response.responder();
        responder.on_response(vec![1, 2]);
        responder.on_response(vec![3]);
        responder.notify(0);

        assert!(response.wait(Duration::from_millis(20)).unwrap());
        assert_eq!(response.received(), vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_notify_from_other_thread() {
        let response = GattResponse::<u16>::new();
        let responder = response.responder();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            responder.on_response(247);
            responder.notify(0);
        });

        assert!(response.wait(Duration::from_secs(5)).unwrap());
        assert_eq!(response.take_received(), vec![247]);
        assert!(response.received().is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn test_error_status_is_protocol_error() {
        let response = GattResponse::<Vec<u8>>::new();
        response.responder().notify(0x0A);

        let err = response.wait(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.att_status(), Some(0x0A));
        assert_eq!(
            err.to_string(),
            "Characteristic value/descriptor operation failed: No attribute found within the given range"
        );
    }

    #[test]
    fn test_notified_at_most_once() {
        let response = GattResponse::<u8>::new();
        let responder = response.responder();
        responder.notify(0);
        responder.notify(0x01);
        responder.on_response(9);

        assert_eq!(response.status(), Some(0));
        assert!(response.received().is_empty());
    }

    #[test]
    fn test_dead_token_ignores_late_completion() {
        let response = GattResponse::<u8>::new();
        response.set_request_id(RequestId(7));
        let responder = response.responder();

        assert_eq!(response.mark_dead(), Some(RequestId(7)));
        assert_eq!(response.mark_dead(), None);
        assert!(!responder.is_live());

        responder.on_response(1);
        responder.notify(0);
        assert_eq!(response.status(), None);
        assert!(response.received().is_empty());
    }

    #[test]
    fn test_dropped_token_is_inert() {
        let response = GattResponse::<u8>::new();
        let responder = response.responder();
        drop(response);

        assert!(!responder.is_live());
        responder.on_response(1);
        responder.notify(0);
    }
}
