//! Common types for GATT operations
//!
//! This module defines the records produced by service and characteristic
//! discovery.

use crate::uuid::Uuid;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Characteristic properties from Bluetooth Core Vol 3 Part G
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl CharacteristicProperties {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    pub fn can_notify(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.contains(Self::INDICATE)
    }
}

/// A primary service found by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryService {
    /// Service UUID
    pub uuid: Uuid,
    /// First handle of the service group
    pub start: u16,
    /// Last handle of the service group
    pub end: u16,
}

impl fmt::Display for PrimaryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [0x{:04x}-0x{:04x}]", self.uuid, self.start, self.end)
    }
}

/// A characteristic declaration found by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Declaration handle
    pub handle: u16,
    /// Characteristic properties
    pub properties: CharacteristicProperties,
    /// Value handle
    pub value_handle: u16,
}

impl Characteristic {
    /// Decode the value of a characteristic declaration attribute:
    /// properties (1), value handle (2), UUID (2 or 16)
    pub fn from_declaration(handle: u16, value: &[u8]) -> Option<Self> {
        if value.len() != 5 && value.len() != 19 {
            return None;
        }

        let properties = CharacteristicProperties::from_bits_truncate(value[0]);
        let value_handle = u16::from_le_bytes([value[1], value[2]]);
        let uuid = Uuid::try_from_slice_le(&value[3..])?;

        Some(Self {
            uuid,
            handle,
            properties,
            value_handle,
        })
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} handle=0x{:04x} value=0x{:04x} properties=0x{:02x}",
            self.uuid,
            self.handle,
            self.value_handle,
            self.properties.bits()
        )
    }
}
