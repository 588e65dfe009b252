//! Hooks for unsolicited values pushed by the peer

use log::info;

/// Receives notifications and indications on the reactor thread.
///
/// Implementations must not call blocking requester operations; they would
/// wait on the very thread that completes them. Use the `_async` forms.
pub trait GattEventHandler: Send + Sync {
    /// A Handle Value Notification arrived
    fn on_notification(&self, handle: u16, value: &[u8]) {
        info!(
            "Notification on handle 0x{:04x}: {}",
            handle,
            hex::encode(value)
        );
    }

    /// A Handle Value Indication arrived. The confirmation is sent after
    /// this returns.
    fn on_indication(&self, handle: u16, value: &[u8]) {
        info!(
            "Indication on handle 0x{:04x}: {}",
            handle,
            hex::encode(value)
        );
    }
}

/// Default hooks: log every value
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventHandler;

impl GattEventHandler for LoggingEventHandler {}
