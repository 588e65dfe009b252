//! Attribute Protocol (ATT) implementation
//!
//! This module provides the client-side ATT codec: opcodes, error codes and
//! the PDUs a GATT client sends and receives.

pub mod constants;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export the public API
pub use self::constants::*;
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::types::*;
