//! Type definitions for L2CAP operations
//!
//! This module contains core data structures used in L2CAP operations.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error types specific to L2CAP operations
#[derive(Debug, Error)]
pub enum L2capError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection terminated")]
    ConnectionTerminated,

    #[error("Connection not established")]
    NotConnected,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for L2CAP operations
pub type L2capResult<T> = std::result::Result<T, L2capError>;

/// Link security requested for a channel
///
/// The discriminants are the kernel's `BT_SECURITY_*` levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub enum SecurityLevel {
    /// No encryption or authentication
    #[default]
    Low = 1,
    /// Encryption without MITM protection
    Medium = 2,
    /// Encryption with MITM protection
    High = 3,
}

impl SecurityLevel {
    /// Value for the `BT_SECURITY` socket option
    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

impl FromStr for SecurityLevel {
    type Err = L2capError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(SecurityLevel::Low),
            "medium" => Ok(SecurityLevel::Medium),
            "high" => Ok(SecurityLevel::High),
            _ => Err(L2capError::InvalidParameter(format!(
                "unknown security level '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Options the kernel reports for a connected channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Incoming MTU
    pub imtu: u16,
    /// Outgoing MTU
    pub omtu: u16,
    /// Local channel identifier
    pub cid: u16,
}
