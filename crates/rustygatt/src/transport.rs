//! Seams between the requester and whatever carries ATT traffic
//!
//! The requester only speaks in [`Operation`] descriptors and completion
//! callbacks. An [`Adapter`] opens a [`Channel`] to a peer, and a channel
//! attached to an event handler yields the [`Transport`] that encodes
//! operations, correlates responses and forwards unsolicited PDUs.

use crate::att::AttError;
use crate::error::HciError;
use crate::gap::PeerAddress;
use crate::gatt::{Characteristic, PrimaryService};
use crate::l2cap::{L2capError, SecurityLevel};
use crate::requester::ConnectionParameters;
use crate::uuid::Uuid;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Identifier the transport assigns to a submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A GATT operation to be carried out by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Exchange MTU with the candidate client receive MTU
    ExchangeMtu { mtu: u16 },
    /// Read a characteristic value or descriptor, long values included
    ReadByHandle { handle: u16 },
    /// Read every attribute of a type within a handle range
    ReadByUuid { start: u16, end: u16, uuid: Uuid },
    /// Write a value and wait for the write response
    WriteByHandle { handle: u16, value: Vec<u8> },
    /// Discover all primary services
    DiscoverPrimary,
    /// Discover characteristics in a range, optionally filtered by type
    DiscoverCharacteristics {
        start: u16,
        end: u16,
        uuid: Option<Uuid>,
    },
}

impl Operation {
    /// Short name used in logs and timeout messages
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ExchangeMtu { .. } => "Exchange MTU",
            Operation::ReadByHandle { .. } => "Read by handle",
            Operation::ReadByUuid { .. } => "Read by UUID",
            Operation::WriteByHandle { .. } => "Write by handle",
            Operation::DiscoverPrimary => "Discover primary",
            Operation::DiscoverCharacteristics { .. } => "Discover characteristics",
        }
    }
}

/// Successful outcome of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Server receive MTU from an MTU exchange
    Mtu(u16),
    /// The raw response PDU, opcode included
    Pdu(Vec<u8>),
    /// Primary services in discovery order
    Services(Vec<PrimaryService>),
    /// Characteristics in discovery order
    Characteristics(Vec<Characteristic>),
}

/// Completion callback: a reply, or a non-zero ATT status
pub type ReplyCallback = Box<dyn FnOnce(Result<Reply, u8>) + Send>;

/// Handler for unsolicited PDUs (notifications and indications)
pub type EventHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Called on the reactor once an asynchronous connect completes
pub type ConnectCallback = Box<dyn FnOnce(Result<Arc<dyn Channel>, TransportError>) + Send>;

/// Called on the reactor when the peer hangs up
pub type HangupCallback = Box<dyn FnOnce() + Send>;

/// Errors raised by transports, channels and adapters
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("L2CAP error: {0}")]
    L2cap(#[from] L2capError),

    #[error("ATT error: {0}")]
    Att(#[from] AttError),

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),

    #[error("Transport is closed")]
    Closed,

    #[error("{0}")]
    Failed(String),
}

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Everything an adapter needs to open a channel to a peer
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Peer address, with the address type for this attempt
    pub peer: PeerAddress,
    /// Requested link security
    pub security_level: SecurityLevel,
    /// Dynamic PSM, or 0 for the fixed ATT channel
    pub psm: u16,
    /// Incoming MTU hint, or 0 to keep the kernel default
    pub mtu: u16,
}

/// An ATT client transport bound to one open channel
pub trait Transport: Send + Sync {
    /// Queue an operation; `callback` runs exactly once on the reactor thread
    fn submit(&self, op: Operation, callback: ReplyCallback) -> TransportResult<RequestId>;

    /// Send a write command; nothing is ever reported back
    fn write_command(&self, handle: u16, value: &[u8]) -> TransportResult<()>;

    /// Send a raw PDU, such as a handle value confirmation
    fn send_pdu(&self, pdu: &[u8]) -> TransportResult<()>;

    /// Withdraw an operation; its callback will not run afterwards.
    /// Returns false if the id is unknown or already complete.
    fn cancel(&self, id: RequestId) -> bool;

    /// Effective ATT MTU used for encoding
    fn mtu(&self) -> u16;

    /// Update the effective ATT MTU
    fn set_mtu(&self, mtu: u16);

    /// Abort every outstanding operation and stop forwarding events
    fn shutdown(&self);
}

/// An open connection-oriented channel to a peer
pub trait Channel: Send + Sync {
    /// Incoming MTU negotiated by the kernel
    fn imtu(&self) -> u16;

    /// Channel identifier, [`ATT_CID`](crate::att::ATT_CID) for the fixed channel
    fn cid(&self) -> u16;

    /// HCI connection handle of the underlying link
    fn hci_handle(&self) -> io::Result<u16>;

    /// Start an ATT transport on this channel
    fn attach(&self, mtu: u16, events: EventHandler) -> TransportResult<Arc<dyn Transport>>;

    /// Close the channel
    fn shutdown(&self);
}

/// A local controller able to open channels
pub trait Adapter: Send + Sync {
    /// Start connecting. The returned channel may not be usable until
    /// `on_connect` reports success.
    fn connect(
        &self,
        request: &ConnectRequest,
        on_connect: ConnectCallback,
        on_hangup: HangupCallback,
    ) -> TransportResult<Arc<dyn Channel>>;

    /// Issue an LE Connection Update for an established link
    fn update_connection(
        &self,
        hci_handle: u16,
        params: &ConnectionParameters,
    ) -> Result<(), HciError>;
}
