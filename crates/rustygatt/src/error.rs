//! Error types for the rustygatt library
//!
//! This module defines the top-level error returned by the requester API and
//! the HCI socket error used by the adapter layer.

use crate::att::AttErrorCode;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors that can occur when working with HCI sockets
#[derive(Error, Debug)]
pub enum HciError {
    #[error("Failed to open HCI socket: {0}")]
    SocketError(#[from] std::io::Error),

    #[error("Failed to bind to HCI device: {0}")]
    BindError(std::io::Error),

    #[error("Failed to send HCI command: {0}")]
    SendError(std::io::Error),

    #[error("Failed to receive HCI event: {0}")]
    ReceiveError(std::io::Error),

    #[error("Invalid device name: {0}")]
    InvalidDevice(String),

    #[error("Invalid HCI packet format")]
    InvalidPacketFormat,

    #[error("HCI command timed out")]
    Timeout,

    #[error("HCI command failed with status 0x{0:02x}")]
    CommandFailed(u8),
}

/// Errors surfaced by [`GattRequester`](crate::GattRequester) operations
#[derive(Error, Debug)]
pub enum Error {
    /// The operation is not allowed in the current connection state
    #[error("{0}")]
    State(String),

    /// Opening the adapter or the channel failed
    #[error("{0}")]
    Connection(String),

    /// Caller input was rejected before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A wait ran out of budget; the pending request has been cancelled
    #[error("{0} timed out")]
    Timeout(String),

    /// The peer answered with a non-zero ATT status
    #[error("Characteristic value/descriptor operation failed: {0}")]
    Protocol(AttErrorCode),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// The ATT status carried by a protocol error, if any
    pub fn att_status(&self) -> Option<u8> {
        match self {
            Error::Protocol(code) => Some((*code).into()),
            _ => None,
        }
    }
}

/// Result type for requester operations
pub type Result<T> = std::result::Result<T, Error>;
