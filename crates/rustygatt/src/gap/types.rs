use crate::gap::constants::*;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// LE address type of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

impl AddressType {
    /// The `bdaddr_type` value BlueZ L2CAP sockets use for this address type
    pub fn bdaddr_type(self) -> u8 {
        match self {
            AddressType::Public => BDADDR_LE_PUBLIC,
            AddressType::Random => BDADDR_LE_RANDOM,
        }
    }
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
        }
    }
}

impl FromStr for AddressType {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(AddressType::Public),
            "random" => Ok(AddressType::Random),
            _ => Err(AddressParseError::UnknownAddressType(s.to_string())),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::Public => f.write_str("public"),
            AddressType::Random => f.write_str("random"),
        }
    }
}

/// Errors produced while parsing addresses
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("Unknown address type: {0}")]
    UnknownAddressType(String),
}

/// A Bluetooth device address, stored little-endian as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl FromStr for BdAddr {
    type Err = AddressParseError;

    /// Parses the usual `AA:BB:CC:DD:EE:FF` text, most significant byte first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError::InvalidAddress(s.to_string());

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(invalid());
            }
            bytes[5 - i] = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self { bytes })
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

/// Identity of the remote device a requester talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub address: BdAddr,
    pub address_type: AddressType,
}

impl PeerAddress {
    pub fn new(address: BdAddr, address_type: AddressType) -> Self {
        Self {
            address,
            address_type,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.address_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bdaddr_round_trip_text() {
        let addr: BdAddr = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(addr.bytes, [0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);
        assert_eq!(addr.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_bdaddr_rejects_malformed() {
        assert!("00:11:22:33:44".parse::<BdAddr>().is_err());
        assert!("00:11:22:33:44:GG".parse::<BdAddr>().is_err());
        assert!("0011:22:33:44:55:66".parse::<BdAddr>().is_err());
    }

    #[test]
    fn test_address_type_parsing() {
        assert_eq!("public".parse::<AddressType>(), Ok(AddressType::Public));
        assert_eq!("Random".parse::<AddressType>(), Ok(AddressType::Random));
        assert!("static".parse::<AddressType>().is_err());
        assert_eq!(AddressType::Random.bdaddr_type(), BDADDR_LE_RANDOM);
    }
}
