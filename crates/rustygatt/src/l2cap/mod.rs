//! L2CAP (Logical Link Control and Adaptation Protocol) channels
//!
//! The kernel implements L2CAP itself; this module opens LE channels through
//! its socket interface and drives them from the reactor.

pub mod channel;
pub mod socket;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export the public API
pub use self::channel::L2capChannel;
pub use self::socket::L2capSocket;
pub use self::types::*;
