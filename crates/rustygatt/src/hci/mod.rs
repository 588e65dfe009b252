//! Bluetooth HCI (Host Controller Interface) access
//!
//! Only what a GATT client needs from the controller: looking up an adapter
//! and issuing LE Connection Update on an established link.

pub mod constants;
pub mod packet;
pub mod socket;


pub use packet::{CommandStatus, HciCommand, HciEvent};
pub use socket::{parse_device_name, DeviceInfo, HciSocket};
