//! Unit tests for the ATT codec

use super::*;
use crate::uuid::Uuid;

#[test]
fn test_error_code_strings() {
    assert_eq!(AttErrorCode::from(0x01).to_string(), "Invalid handle");
    assert_eq!(
        AttErrorCode::from(0x0A).to_string(),
        "No attribute found within the given range"
    );
    assert_eq!(
        AttErrorCode::from(ATT_ECODE_ABORTED).to_string(),
        "The operation was aborted"
    );
    assert_eq!(AttErrorCode::from(0x42).to_string(), "Unexpected error code");
}

#[test]
fn test_error_code_conversions() {
    for code in [0x01u8, 0x05, 0x11, 0x80, 0x81, 0x82, 0x90, 0xE3, 0x42] {
        let parsed = AttErrorCode::from(code);
        assert_eq!(u8::from(parsed), code);
    }
    assert_eq!(AttErrorCode::from(0x90), AttErrorCode::ApplicationError(0x90));
    assert_eq!(AttErrorCode::from(0xFE), AttErrorCode::CommonProfileError(0xFE));
}

#[test]
fn test_error_response_parse() {
    let pdu = [ATT_ERROR_RSP, ATT_READ_REQ, 0x2A, 0x00, 0x02];
    let rsp = ErrorResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.request_opcode, ATT_READ_REQ);
    assert_eq!(rsp.handle, 0x002A);
    assert_eq!(rsp.error_code, AttErrorCode::ReadNotPermitted);
    assert_eq!(rsp.serialize(), pdu.to_vec());

    assert!(ErrorResponse::parse(&pdu[..4]).is_err());
}

#[test]
fn test_read_by_type_request_encoding() {
    let short = ReadByTypeRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
    };
    assert_eq!(
        short.serialize(),
        vec![ATT_READ_BY_TYPE_REQ, 0x01, 0x00, 0xFF, 0xFF, 0x03, 0x28]
    );

    let long = ReadByTypeRequest {
        attribute_type: "6e400001-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap(),
        ..short
    };
    let bytes = long.serialize();
    assert_eq!(bytes.len(), 21);
    let parsed = ReadByTypeRequest::parse(&bytes).unwrap();
    assert_eq!(parsed.attribute_type, long.attribute_type);
}

#[test]
fn test_read_by_type_response_list() {
    let pdu = [
        ATT_READ_BY_TYPE_RSP,
        0x04,
        0x03,
        0x00,
        0xAA,
        0xBB,
        0x05,
        0x00,
        0xCC,
        0xDD,
    ];
    let rsp = ReadByTypeResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.data.len(), 2);
    assert_eq!(rsp.data[0].handle, 0x0003);
    assert_eq!(rsp.data[1].value, vec![0xCC, 0xDD]);

    // Trailing partial entry
    assert!(ReadByTypeResponse::parse(&pdu[..9]).is_err());
}

#[test]
fn test_read_by_group_type_response() {
    let pdu = [
        ATT_READ_BY_GROUP_TYPE_RSP,
        0x06,
        0x01,
        0x00,
        0x05,
        0x00,
        0x00,
        0x18,
    ];
    let rsp = ReadByGroupTypeResponse::parse(&pdu).unwrap();
    assert_eq!(
        rsp.data,
        vec![AttributeData {
            handle: 1,
            end_group_handle: 5,
            value: vec![0x00, 0x18],
        }]
    );
}

#[test]
fn test_notification_and_indication() {
    let ntf = HandleValueNotification::parse(&[ATT_HANDLE_VALUE_NTF, 0x10, 0x00, 1, 2]).unwrap();
    assert_eq!(ntf.handle, 0x0010);
    assert_eq!(ntf.value, vec![1, 2]);

    let ind = HandleValueIndication {
        handle: 0x0020,
        value: vec![],
    };
    assert_eq!(ind.serialize(), vec![ATT_HANDLE_VALUE_IND, 0x20, 0x00]);
    assert_eq!(HandleValueConfirmation.serialize(), vec![ATT_HANDLE_VALUE_CONF]);
}

#[test]
fn test_opcode_classification() {
    assert_eq!(opcode_kind(ATT_READ_REQ), OpcodeKind::Request);
    assert_eq!(opcode_kind(ATT_ERROR_RSP), OpcodeKind::Response);
    assert_eq!(opcode_kind(ATT_WRITE_CMD), OpcodeKind::Command);
    assert_eq!(opcode_kind(ATT_HANDLE_VALUE_IND), OpcodeKind::Indication);
    assert_eq!(opcode_kind(0x1F), OpcodeKind::Unknown);

    assert_eq!(response_opcode_for(ATT_READ_BLOB_REQ), Some(ATT_READ_BLOB_RSP));
    assert_eq!(response_opcode_for(ATT_WRITE_CMD), None);

    assert!(is_response_to(ATT_WRITE_REQ, &[ATT_WRITE_RSP]));
    assert!(is_response_to(
        ATT_WRITE_REQ,
        &[ATT_ERROR_RSP, ATT_WRITE_REQ, 0x01, 0x00, 0x03]
    ));
    assert!(!is_response_to(ATT_WRITE_REQ, &[ATT_READ_RSP]));
}
