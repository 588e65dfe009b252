use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Represents a 128-bit Bluetooth UUID.
///
/// This struct handles conversions between 16-bit, 32-bit, and 128-bit Bluetooth UUID formats.
/// Internally, the UUID is always stored as a 128-bit value in little-endian byte order.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// The base UUID used for constructing 128-bit UUIDs from 16-bit and 32-bit values.
/// Defined as "00000000-0000-1000-8000-00805F9B34FB" (little-endian representation).
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16/32-bit value is inserted.
const BASE_OFFSET: usize = 12;

impl Uuid {
    /// Creates a new 128-bit UUID directly from 16 bytes (little-endian).
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a new 128-bit UUID directly from 16 bytes (big-endian).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Creates a 128-bit UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid16 as u8;
        bytes[BASE_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Creates a 128-bit UUID from a 32-bit SIG-assigned value.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid32 as u8;
        bytes[BASE_OFFSET + 1] = (uuid32 >> 8) as u8;
        bytes[BASE_OFFSET + 2] = (uuid32 >> 16) as u8;
        bytes[BASE_OFFSET + 3] = (uuid32 >> 24) as u8;
        Uuid { bytes }
    }

    /// Tries to create a UUID from a byte slice as found in ATT PDUs.
    ///
    /// Accepts slices of length 2 (16-bit), 4 (32-bit), or 16 (128-bit),
    /// little-endian. Returns `None` for any other length.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::from_u32(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    /// Returns the underlying 16 bytes in little-endian order.
    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Returns the underlying 16 bytes in big-endian order.
    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    fn is_sig_assigned(&self) -> bool {
        self.bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
    }

    /// Tries to represent the UUID as a 16-bit value.
    pub fn as_u16(&self) -> Option<u16> {
        if self.is_sig_assigned()
            && self.bytes[BASE_OFFSET + 2] == 0
            && self.bytes[BASE_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// Tries to represent the UUID as a 32-bit value.
    pub fn as_u32(&self) -> Option<u32> {
        if self.is_sig_assigned() {
            Some(u32::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
                self.bytes[BASE_OFFSET + 2],
                self.bytes[BASE_OFFSET + 3],
            ]))
        } else {
            None
        }
    }

    /// Encodes the UUID the way ATT carries it: two bytes for SIG-assigned
    /// 16-bit values, sixteen bytes otherwise.
    ///
    /// ATT has no 32-bit form on the wire, so 32-bit values go out as 128-bit.
    pub fn to_att_bytes(&self) -> Vec<u8> {
        match self.as_u16() {
            Some(short) => short.to_le_bytes().to_vec(),
            None => self.bytes.to_vec(),
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<u32> for Uuid {
    fn from(uuid32: u32) -> Self {
        Uuid::from_u32(uuid32)
    }
}

impl From<[u8; 16]> for Uuid {
    /// Assumes bytes are in little-endian order.
    fn from(bytes: [u8; 16]) -> Self {
        Uuid::from_bytes_le(bytes)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Standard hyphenated format (big-endian)
        let b = self.as_bytes_be();
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(u16_val) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", u16_val)
        } else if let Some(u32_val) = self.as_u32() {
            write!(f, "Uuid(0x{:08X})", u32_val)
        } else {
            write!(f, "Uuid({})", self)
        }
    }
}

/// Reasons a textual UUID is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UuidParseError {
    #[error("UUID text has invalid length {0}")]
    InvalidLength(usize),

    #[error("UUID text has misplaced hyphens")]
    InvalidFormat,

    #[error("UUID text contains non-hex characters")]
    InvalidCharacter,
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Parses `180a`, `0x180a`, `0000180a`, a 32-digit hex string, or the
    /// hyphenated 128-bit form `0000180a-0000-1000-8000-00805f9b34fb`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        let cleaned = if s.len() == 36 {
            for (i, c) in s.char_indices() {
                let hyphen_slot = matches!(i, 8 | 13 | 18 | 23);
                if hyphen_slot != (c == '-') {
                    return Err(UuidParseError::InvalidFormat);
                }
            }
            s.replace('-', "")
        } else {
            s.to_string()
        };

        if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UuidParseError::InvalidCharacter);
        }

        match cleaned.len() {
            4 => {
                let val = u16::from_str_radix(&cleaned, 16)
                    .map_err(|_| UuidParseError::InvalidCharacter)?;
                Ok(Uuid::from_u16(val))
            }
            8 => {
                let val = u32::from_str_radix(&cleaned, 16)
                    .map_err(|_| UuidParseError::InvalidCharacter)?;
                Ok(Uuid::from_u32(val))
            }
            32 => {
                let mut bytes_be = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes_be)
                    .map_err(|_| UuidParseError::InvalidCharacter)?;
                Ok(Uuid::from_bytes_be(bytes_be))
            }
            len => Err(UuidParseError::InvalidLength(len)),
        }
    }
}
