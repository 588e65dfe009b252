//! GATT (Generic Attribute Profile) client procedures
//!
//! This module provides the discovery records, the ATT bearer multiplexer and
//! the sub-procedures that implement GATT operations over it.

pub mod attrib;
pub mod procedures;
pub mod transport;
pub mod types;


pub use attrib::{Attrib, Bearer, ResponseHandler};
pub use transport::AttribTransport;
pub use types::{Characteristic, CharacteristicProperties, PrimaryService};
