//! Error handling for the ATT protocol
use super::constants::*;
use std::fmt;
use thiserror::Error;

/// ATT error codes from Bluetooth Core Vol 3 Part F, plus the host-side
/// statuses the bearer reports through the same path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    /// Invalid handle
    InvalidHandle,
    /// Read not permitted
    ReadNotPermitted,
    /// Write not permitted
    WriteNotPermitted,
    /// Invalid PDU
    InvalidPdu,
    /// Insufficient authentication
    InsufficientAuthentication,
    /// Request not supported
    RequestNotSupported,
    /// Invalid offset
    InvalidOffset,
    /// Insufficient authorization
    InsufficientAuthorization,
    /// Prepare queue full
    PrepareQueueFull,
    /// Attribute not found
    AttributeNotFound,
    /// Attribute not long
    AttributeNotLong,
    /// Insufficient encryption key size
    InsufficientEncryptionKeySize,
    /// Invalid attribute value length
    InvalidAttributeValueLength,
    /// Unlikely error
    Unlikely,
    /// Insufficient encryption
    InsufficientEncryption,
    /// Unsupported group type
    UnsupportedGroupType,
    /// Insufficient resources
    InsufficientResources,
    /// Local I/O failure on the bearer
    Io,
    /// Local transaction timeout
    Timeout,
    /// Request aborted locally (link torn down)
    Aborted,
    /// Application error
    ApplicationError(u8),
    /// Common profile error
    CommonProfileError(u8),
    /// Unknown error code
    Unknown(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                AttErrorCode::InsufficientEncryptionKeySize
            }
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            ATT_ECODE_IO => AttErrorCode::Io,
            ATT_ECODE_TIMEOUT => AttErrorCode::Timeout,
            ATT_ECODE_ABORTED => AttErrorCode::Aborted,
            ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => {
                AttErrorCode::ApplicationError(code)
            }
            ATT_ERROR_COMMON_PROFILE_ERROR_START..=u8::MAX => {
                AttErrorCode::CommonProfileError(code)
            }
            _ => AttErrorCode::Unknown(code),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> u8 {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            AttErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InsufficientEncryptionKeySize => {
                ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE
            }
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::Io => ATT_ECODE_IO,
            AttErrorCode::Timeout => ATT_ECODE_TIMEOUT,
            AttErrorCode::Aborted => ATT_ECODE_ABORTED,
            AttErrorCode::ApplicationError(code) => code,
            AttErrorCode::CommonProfileError(code) => code,
            AttErrorCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AttErrorCode::InvalidHandle => "Invalid handle",
            AttErrorCode::ReadNotPermitted => "Attribute can't be read",
            AttErrorCode::WriteNotPermitted => "Attribute can't be written",
            AttErrorCode::InvalidPdu => "Attribute PDU was invalid",
            AttErrorCode::InsufficientAuthentication => {
                "Attribute requires authentication before read/write"
            }
            AttErrorCode::RequestNotSupported => "Server doesn't support the request received",
            AttErrorCode::InvalidOffset => "Offset past the end of the attribute",
            AttErrorCode::InsufficientAuthorization => {
                "Attribute requires authorization before read/write"
            }
            AttErrorCode::PrepareQueueFull => "Too many prepare writes have been queued",
            AttErrorCode::AttributeNotFound => "No attribute found within the given range",
            AttErrorCode::AttributeNotLong => "Attribute can't be read/written using Read Blob Req",
            AttErrorCode::InsufficientEncryptionKeySize => "Encryption Key Size is insufficient",
            AttErrorCode::InvalidAttributeValueLength => "Attribute value length is invalid",
            AttErrorCode::Unlikely => "Request attribute has encountered an unlikely error",
            AttErrorCode::InsufficientEncryption => "Encryption required before read/write",
            AttErrorCode::UnsupportedGroupType => {
                "Attribute type is not a supported grouping attribute"
            }
            AttErrorCode::InsufficientResources => "Insufficient Resources to complete the request",
            AttErrorCode::Io => "Internal application error: I/O",
            AttErrorCode::Timeout => "A timeout occured",
            AttErrorCode::Aborted => "The operation was aborted",
            AttErrorCode::ApplicationError(_)
            | AttErrorCode::CommonProfileError(_)
            | AttErrorCode::Unknown(_) => "Unexpected error code",
        };
        f.write_str(text)
    }
}

/// ATT Error type
#[derive(Debug, Error)]
pub enum AttError {
    #[error("ATT error: {0} on handle 0x{1:04x}")]
    Protocol(AttErrorCode, u16),

    #[error("Invalid PDU")]
    InvalidPdu,

    #[error("Unexpected response opcode 0x{0:02x}")]
    UnexpectedResponse(u8),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid state for operation")]
    InvalidState,

    #[error("Bearer closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttError {
    /// The status code this error is reported as on the completion path
    pub fn status(&self) -> u8 {
        match self {
            AttError::Protocol(code, _) => (*code).into(),
            AttError::InvalidPdu | AttError::UnexpectedResponse(_) => ATT_ERROR_INVALID_PDU,
            AttError::InvalidParameter(_) => ATT_ERROR_INVALID_PDU,
            AttError::InvalidState | AttError::Closed => ATT_ECODE_ABORTED,
            AttError::Io(_) => ATT_ECODE_IO,
        }
    }
}

/// ATT Result type
pub type AttResult<T> = Result<T, AttError>;
