//! PDU definitions for the client side of the ATT protocol
use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// ATT packet formats
pub trait AttPacket: Sized {
    /// Opcode for this packet
    fn opcode() -> u8;

    /// Parse packet from bytes
    fn parse(data: &[u8]) -> AttResult<Self>;

    /// Serialize packet to bytes
    fn serialize(&self) -> Vec<u8>;
}

fn read_handle(cursor: &mut Cursor<&[u8]>) -> AttResult<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| AttError::InvalidPdu)
}

/// Reads a 2 or 16 byte attribute type trailing a handle range
fn read_type_uuid(data: &[u8]) -> AttResult<Uuid> {
    match data.len() {
        2 | 16 => Uuid::try_from_slice_le(data).ok_or(AttError::InvalidPdu),
        _ => Err(AttError::InvalidPdu),
    }
}

/// Error response packet
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// Request opcode in error
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    /// Error code
    pub error_code: AttErrorCode,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(request_opcode: u8, handle: u16, error_code: AttErrorCode) -> Self {
        Self {
            request_opcode,
            handle,
            error_code,
        }
    }
}

impl AttPacket for ErrorResponse {
    fn opcode() -> u8 {
        ATT_ERROR_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let request_opcode = data[1];

        let mut cursor = Cursor::new(&data[2..]);
        let handle = read_handle(&mut cursor)?;

        let error_code = data[4].into();

        Ok(Self {
            request_opcode,
            handle,
            error_code,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);

        packet.push(Self::opcode());
        packet.push(self.request_opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.error_code.into());

        packet
    }
}

/// Exchange MTU Request packet
#[derive(Debug, Clone)]
pub struct ExchangeMtuRequest {
    /// Client Rx MTU size
    pub client_mtu: u16,
}

impl AttPacket for ExchangeMtuRequest {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let client_mtu = read_handle(&mut cursor)?;

        Ok(Self { client_mtu })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.client_mtu.to_le_bytes());

        packet
    }
}

/// Exchange MTU Response packet
#[derive(Debug, Clone)]
pub struct ExchangeMtuResponse {
    /// Server Rx MTU size
    pub server_mtu: u16,
}

impl AttPacket for ExchangeMtuResponse {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let server_mtu = read_handle(&mut cursor)?;

        Ok(Self { server_mtu })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.server_mtu.to_le_bytes());

        packet
    }
}

/// Read By Type Request packet
#[derive(Debug, Clone)]
pub struct ReadByTypeRequest {
    /// First requested handle
    pub start_handle: u16,
    /// Last requested handle
    pub end_handle: u16,
    /// Attribute type UUID
    pub attribute_type: Uuid,
}

impl AttPacket for ReadByTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 7 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = read_handle(&mut cursor)?;
        let end_handle = read_handle(&mut cursor)?;
        let attribute_type = read_type_uuid(&data[5..])?;

        Ok(Self {
            start_handle,
            end_handle,
            attribute_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(21);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.attribute_type.to_att_bytes());

        packet
    }
}

/// Handle and value in Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    /// Attribute handle
    pub handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// Read By Type Response packet
#[derive(Debug, Clone)]
pub struct ReadByTypeResponse {
    /// Length of each item
    pub length: u8,
    /// List of handle-value pairs
    pub data: Vec<HandleValue>,
}

impl AttPacket for ReadByTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let length = data[1];
        if length < 2 {
            return Err(AttError::InvalidPdu);
        }

        let body = &data[2..];
        if body.is_empty() || body.len() % length as usize != 0 {
            return Err(AttError::InvalidPdu);
        }

        let mut data_list = Vec::with_capacity(body.len() / length as usize);
        for chunk in body.chunks_exact(length as usize) {
            let mut cursor = Cursor::new(chunk);
            let handle = read_handle(&mut cursor)?;

            data_list.push(HandleValue {
                handle,
                value: chunk[2..].to_vec(),
            });
        }

        Ok(Self {
            length,
            data: data_list,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();

        packet.push(Self::opcode());
        packet.push(self.length);

        for item in &self.data {
            packet.extend_from_slice(&item.handle.to_le_bytes());
            packet.extend_from_slice(&item.value);
        }

        packet
    }
}

/// Read Request packet
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Handle to read
    pub handle: u16,
}

impl AttPacket for ReadRequest {
    fn opcode() -> u8 {
        ATT_READ_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self { handle })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());

        packet
    }
}

/// Read Response packet
#[derive(Debug, Clone)]
pub struct ReadResponse {
    /// Attribute value
    pub value: Vec<u8>,
}

impl AttPacket for ReadResponse {
    fn opcode() -> u8 {
        ATT_READ_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            value: data[1..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Read Blob Request packet
#[derive(Debug, Clone)]
pub struct ReadBlobRequest {
    /// Handle to read
    pub handle: u16,
    /// Offset of the first octet to read
    pub offset: u16,
}

impl AttPacket for ReadBlobRequest {
    fn opcode() -> u8 {
        ATT_READ_BLOB_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;
        let offset = read_handle(&mut cursor)?;

        Ok(Self { handle, offset })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());

        packet
    }
}

/// Read Blob Response packet
#[derive(Debug, Clone)]
pub struct ReadBlobResponse {
    /// Part of the attribute value
    pub value: Vec<u8>,
}

impl AttPacket for ReadBlobResponse {
    fn opcode() -> u8 {
        ATT_READ_BLOB_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            value: data[1..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Read By Group Type Request packet
#[derive(Debug, Clone)]
pub struct ReadByGroupTypeRequest {
    /// First requested handle
    pub start_handle: u16,
    /// Last requested handle
    pub end_handle: u16,
    /// Group type UUID
    pub group_type: Uuid,
}

impl AttPacket for ReadByGroupTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 7 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = read_handle(&mut cursor)?;
        let end_handle = read_handle(&mut cursor)?;
        let group_type = read_type_uuid(&data[5..])?;

        Ok(Self {
            start_handle,
            end_handle,
            group_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(21);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.group_type.to_att_bytes());

        packet
    }
}

/// Attribute data in Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeData {
    /// Attribute handle
    pub handle: u16,
    /// Group end handle
    pub end_group_handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// Read By Group Type Response packet
#[derive(Debug, Clone)]
pub struct ReadByGroupTypeResponse {
    /// Length of each item
    pub length: u8,
    /// List of attribute data
    pub data: Vec<AttributeData>,
}

impl AttPacket for ReadByGroupTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let length = data[1];
        if length < 4 {
            return Err(AttError::InvalidPdu);
        }

        let body = &data[2..];
        if body.is_empty() || body.len() % length as usize != 0 {
            return Err(AttError::InvalidPdu);
        }

        let mut data_list = Vec::with_capacity(body.len() / length as usize);
        for chunk in body.chunks_exact(length as usize) {
            let mut cursor = Cursor::new(chunk);
            let handle = read_handle(&mut cursor)?;
            let end_group_handle = read_handle(&mut cursor)?;

            data_list.push(AttributeData {
                handle,
                end_group_handle,
                value: chunk[4..].to_vec(),
            });
        }

        Ok(Self {
            length,
            data: data_list,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();

        packet.push(Self::opcode());
        packet.push(self.length);

        for item in &self.data {
            packet.extend_from_slice(&item.handle.to_le_bytes());
            packet.extend_from_slice(&item.end_group_handle.to_le_bytes());
            packet.extend_from_slice(&item.value);
        }

        packet
    }
}

/// Write Request packet
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// Handle to write
    pub handle: u16,
    /// Value to write
    pub value: Vec<u8>,
}

impl AttPacket for WriteRequest {
    fn opcode() -> u8 {
        ATT_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Write Response packet
#[derive(Debug, Clone)]
pub struct WriteResponse;

impl AttPacket for WriteResponse {
    fn opcode() -> u8 {
        ATT_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Write Command packet
#[derive(Debug, Clone)]
pub struct WriteCommand {
    /// Handle to write
    pub handle: u16,
    /// Value to write
    pub value: Vec<u8>,
}

impl AttPacket for WriteCommand {
    fn opcode() -> u8 {
        ATT_WRITE_CMD
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Prepare Write Request packet
#[derive(Debug, Clone)]
pub struct PrepareWriteRequest {
    /// Handle to write
    pub handle: u16,
    /// Offset of the first octet of this part
    pub offset: u16,
    /// Part of the value
    pub value: Vec<u8>,
}

impl AttPacket for PrepareWriteRequest {
    fn opcode() -> u8 {
        ATT_PREPARE_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;
        let offset = read_handle(&mut cursor)?;

        Ok(Self {
            handle,
            offset,
            value: data[5..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Prepare Write Response packet, echoing the queued part
#[derive(Debug, Clone)]
pub struct PrepareWriteResponse {
    /// Handle written
    pub handle: u16,
    /// Offset of the queued part
    pub offset: u16,
    /// Queued part
    pub value: Vec<u8>,
}

impl AttPacket for PrepareWriteResponse {
    fn opcode() -> u8 {
        ATT_PREPARE_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;
        let offset = read_handle(&mut cursor)?;

        Ok(Self {
            handle,
            offset,
            value: data[5..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Execute Write Request packet
#[derive(Debug, Clone)]
pub struct ExecuteWriteRequest {
    /// Commit or cancel the queued writes
    pub flags: u8,
}

impl AttPacket for ExecuteWriteRequest {
    fn opcode() -> u8 {
        ATT_EXECUTE_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self { flags: data[1] })
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode(), self.flags]
    }
}

/// Execute Write Response packet
#[derive(Debug, Clone)]
pub struct ExecuteWriteResponse;

impl AttPacket for ExecuteWriteResponse {
    fn opcode() -> u8 {
        ATT_EXECUTE_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Handle Value Notification packet
#[derive(Debug, Clone)]
pub struct HandleValueNotification {
    /// Handle of the attribute
    pub handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueNotification {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_NTF
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Handle Value Indication packet
#[derive(Debug, Clone)]
pub struct HandleValueIndication {
    /// Handle of the attribute
    pub handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueIndication {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_IND
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Handle Value Confirmation packet
#[derive(Debug, Clone)]
pub struct HandleValueConfirmation;

impl AttPacket for HandleValueConfirmation {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_CONF
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Broad classification of an opcode from the client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeKind {
    /// Request that expects a response
    Request,
    /// Response to an outstanding request (including Error Response)
    Response,
    /// Command without response
    Command,
    /// Server-initiated notification
    Notification,
    /// Server-initiated indication, must be confirmed
    Indication,
    /// Confirmation of an indication
    Confirmation,
    /// Anything else
    Unknown,
}

/// Classify an ATT opcode
pub fn opcode_kind(opcode: u8) -> OpcodeKind {
    match opcode {
        ATT_ERROR_RSP
        | ATT_EXCHANGE_MTU_RSP
        | ATT_FIND_INFO_RSP
        | ATT_FIND_BY_TYPE_VALUE_RSP
        | ATT_READ_BY_TYPE_RSP
        | ATT_READ_RSP
        | ATT_READ_BLOB_RSP
        | ATT_READ_MULTIPLE_RSP
        | ATT_READ_BY_GROUP_TYPE_RSP
        | ATT_WRITE_RSP
        | ATT_PREPARE_WRITE_RSP
        | ATT_EXECUTE_WRITE_RSP => OpcodeKind::Response,
        ATT_EXCHANGE_MTU_REQ
        | ATT_FIND_INFO_REQ
        | ATT_FIND_BY_TYPE_VALUE_REQ
        | ATT_READ_BY_TYPE_REQ
        | ATT_READ_REQ
        | ATT_READ_BLOB_REQ
        | ATT_READ_MULTIPLE_REQ
        | ATT_READ_BY_GROUP_TYPE_REQ
        | ATT_WRITE_REQ
        | ATT_PREPARE_WRITE_REQ
        | ATT_EXECUTE_WRITE_REQ => OpcodeKind::Request,
        ATT_HANDLE_VALUE_NTF => OpcodeKind::Notification,
        ATT_HANDLE_VALUE_IND => OpcodeKind::Indication,
        ATT_HANDLE_VALUE_CONF => OpcodeKind::Confirmation,
        op if op & ATT_OP_COMMAND_FLAG != 0 => OpcodeKind::Command,
        _ => OpcodeKind::Unknown,
    }
}

/// The response opcode that completes a given request opcode
pub fn response_opcode_for(request: u8) -> Option<u8> {
    match opcode_kind(request) {
        // Every request opcode is even and its response is the next odd value
        OpcodeKind::Request => Some(request + 1),
        _ => None,
    }
}

/// Check whether `pdu` answers a request sent with `request_opcode`
pub fn is_response_to(request_opcode: u8, pdu: &[u8]) -> bool {
    match pdu.first() {
        Some(&ATT_ERROR_RSP) => pdu.get(1) == Some(&request_opcode),
        Some(&op) => response_opcode_for(request_opcode) == Some(op),
        None => false,
    }
}
