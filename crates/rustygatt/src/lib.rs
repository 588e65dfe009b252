//! RustyGatt - A blocking ATT/GATT client for Bluetooth LE peripherals
//!
//! This library talks to a single LE peripheral through the Linux kernel's
//! L2CAP sockets. All socket I/O and completion callbacks run on one
//! background [`Reactor`] thread, while [`GattRequester`] offers blocking
//! calls (and `_async` variants completing a [`GattResponse`]) for MTU
//! exchange, reads, writes and service/characteristic discovery.
//! Notifications and indications are delivered to a [`GattEventHandler`].

pub mod adapter;
pub mod att;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod l2cap;
pub mod reactor;
pub mod requester;
pub mod response;
pub mod transport;
pub mod uuid;

// Re-export common types for convenience
pub use adapter::HciAdapter;
pub use att::{AttError, AttErrorCode};
pub use error::{Error, HciError, Result};
pub use gap::{AddressType, BdAddr, PeerAddress};
pub use gatt::{Characteristic, CharacteristicProperties, PrimaryService};
pub use l2cap::{L2capError, SecurityLevel};
pub use reactor::Reactor;
pub use requester::{
    ConnectOptions, ConnectionParameters, ConnectionState, GattEventHandler, GattRequester,
    LoggingEventHandler, RequesterConfig,
};
pub use response::GattResponse;
pub use transport::{Adapter, Channel, Operation, Reply, RequestId, Transport};
pub use uuid::Uuid;
