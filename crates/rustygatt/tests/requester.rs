//! End-to-end requester tests against an in-memory peripheral

mod common;

use common::*;
use rustygatt::att::*;
use rustygatt::{
    CharacteristicProperties, ConnectionState, Error, GattResponse, RequesterConfig, Uuid,
};
use std::time::Duration;

#[test]
fn test_connect_tunes_link_once() {
    let s = connected();
    assert_eq!(s.requester.state(), ConnectionState::Connected);
    assert_eq!(s.requester.mtu(), ATT_DEFAULT_LE_MTU);

    s.requester.read_by_handle(NAME_HANDLE).unwrap();
    assert_eq!(*s.loopback.updates.lock().unwrap(), vec![0x0040]);
}

#[test]
fn test_discover_primary_services() {
    let s = connected();
    let services = s.requester.discover_primary().unwrap();

    assert_eq!(services.len(), 2);
    assert_eq!(services[0].uuid, Uuid::from_u16(0x1800));
    assert_eq!((services[0].start, services[0].end), (0x0001, 0x0003));
    assert_eq!(services[1].uuid, custom_uuid());
    assert_eq!((services[1].start, services[1].end), (0x0004, 0x0009));
}

#[test]
fn test_discover_characteristics() {
    let s = connected();
    let all = s.requester.discover_characteristics(0x0001, 0xFFFF, None).unwrap();

    let handles: Vec<(u16, u16)> = all.iter().map(|c| (c.handle, c.value_handle)).collect();
    assert_eq!(handles, vec![(0x0002, 0x0003), (0x0005, 0x0006), (0x0008, 0x0009)]);
    assert_eq!(all[1].uuid, custom_uuid());
    assert!(all[1].properties.can_notify());
    assert!(all[2].properties.contains(CharacteristicProperties::INDICATE));
    assert!(all[2].properties.can_write_without_response());

    let names = s
        .requester
        .discover_characteristics(0x0001, 0xFFFF, Some("2a00"))
        .unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].value_handle, NAME_HANDLE);

    // Restricted to the custom service
    let custom = s.requester.discover_characteristics(0x0004, 0x0009, Some("")).unwrap();
    assert_eq!(custom.len(), 2);
}

#[test]
fn test_long_read_follows_blobs() {
    let s = connected();
    let value = s.requester.read_by_handle(NAME_HANDLE).unwrap();
    assert_eq!(value, vec![DEVICE_NAME.to_vec()]);

    let requests = s.loopback.peer.lock().unwrap().requests.clone();
    assert_eq!(requests, vec![ATT_READ_REQ, ATT_READ_BLOB_REQ]);
}

#[test]
fn test_exchange_mtu_then_read_in_one_pdu() {
    let s = connected();
    assert_eq!(s.requester.exchange_mtu(247).unwrap(), SERVER_MTU);
    assert_eq!(s.requester.mtu(), SERVER_MTU);

    s.loopback.peer.lock().unwrap().requests.clear();
    assert_eq!(
        s.requester.read_by_handle(NAME_HANDLE).unwrap(),
        vec![DEVICE_NAME.to_vec()]
    );
    assert_eq!(s.loopback.peer.lock().unwrap().requests, vec![ATT_READ_REQ]);
}

#[test]
fn test_read_by_uuid() {
    let s = connected();
    let values = s.requester.read_by_uuid("00002a05-0000-1000-8000-00805f9b34fb").unwrap();
    assert_eq!(values, vec![vec![0; 4]]);

    // Values longer than a Read By Type entry come back truncated
    let names = s.requester.read_by_uuid("2a00").unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0], DEVICE_NAME[..19].to_vec());
}

#[test]
fn test_read_by_uuid_not_found() {
    let s = connected();
    let err = s.requester.read_by_uuid("2a19").unwrap_err();
    assert!(matches!(err, Error::Protocol(AttErrorCode::AttributeNotFound)));
}

#[test]
fn test_write_and_read_back() {
    let s = connected();
    let rsp = s.requester.write_by_handle(CUSTOM_VALUE_HANDLE, &[1, 2, 3]).unwrap();
    assert_eq!(rsp, vec![vec![ATT_WRITE_RSP]]);

    assert_eq!(
        s.requester.read_by_handle(CUSTOM_VALUE_HANDLE).unwrap(),
        vec![vec![1, 2, 3]]
    );
}

#[test]
fn test_long_write_uses_prepared_writes() {
    let s = connected();
    let value: Vec<u8> = (0..40).collect();
    let rsp = s.requester.write_by_handle(CUSTOM_VALUE_HANDLE, &value).unwrap();
    assert_eq!(rsp, vec![vec![ATT_EXECUTE_WRITE_RSP]]);

    let peer = s.loopback.peer.lock().unwrap();
    assert_eq!(peer.value(CUSTOM_VALUE_HANDLE), Some(value.clone()));
    assert_eq!(
        peer.requests,
        vec![
            ATT_PREPARE_WRITE_REQ,
            ATT_PREPARE_WRITE_REQ,
            ATT_PREPARE_WRITE_REQ,
            ATT_EXECUTE_WRITE_REQ
        ]
    );
}

#[test]
fn test_failed_long_write_cancels_queue() {
    let s = connected();
    // Declarations are read-only
    let err = s.requester.write_by_handle(0x0002, &[0xAA; 30]).unwrap_err();
    assert!(matches!(err, Error::Protocol(AttErrorCode::WriteNotPermitted)));
    assert_eq!(
        err.to_string(),
        "Characteristic value/descriptor operation failed: Attribute can't be written"
    );

    let requests = s.loopback.peer.lock().unwrap().requests.clone();
    assert_eq!(requests, vec![ATT_PREPARE_WRITE_REQ, ATT_EXECUTE_WRITE_REQ]);
}

#[test]
fn test_write_command() {
    let s = connected();
    s.requester
        .write_cmd_by_handle(SERVICE_CHANGED_HANDLE, &[9, 9])
        .unwrap();

    let peer = s.loopback.peer.clone();
    wait_until(|| !peer.lock().unwrap().commands.is_empty());
    assert_eq!(
        peer.lock().unwrap().commands,
        vec![(SERVICE_CHANGED_HANDLE, vec![9, 9])]
    );
}

#[test]
fn test_invalid_handle_error() {
    let s = connected();
    let err = s.requester.read_by_handle(0x0050).unwrap_err();
    assert_eq!(err.att_status(), Some(ATT_ERROR_INVALID_HANDLE));
}

#[test]
fn test_notifications_and_indications() {
    let s = connected();

    s.loopback.notify(CUSTOM_VALUE_HANDLE, &[0x42]);
    s.loopback.indicate(SERVICE_CHANGED_HANDLE, &[0x01, 0x00, 0xFF, 0xFF]);

    let recorder = s.recorder.clone();
    wait_until(|| !recorder.indications.lock().unwrap().is_empty());
    assert_eq!(
        *recorder.notifications.lock().unwrap(),
        vec![(CUSTOM_VALUE_HANDLE, vec![0x42])]
    );
    assert_eq!(
        *recorder.indications.lock().unwrap(),
        vec![(SERVICE_CHANGED_HANDLE, vec![0x01, 0x00, 0xFF, 0xFF])]
    );

    let peer = s.loopback.peer.clone();
    wait_until(|| peer.lock().unwrap().confirmations == 1);
}

#[test]
fn test_async_read_completes_token() {
    let s = connected();
    let response = GattResponse::new();
    let id = s
        .requester
        .read_by_handle_async(CUSTOM_VALUE_HANDLE, &response)
        .unwrap();

    assert!(response.wait(Duration::from_secs(5)).unwrap());
    assert_eq!(response.request_id(), Some(id));
    assert_eq!(response.status(), Some(0));
    assert_eq!(response.received(), vec![vec![0x01]]);
}

#[test]
fn test_silent_peer_times_out() {
    let s = setup(RequesterConfig {
        request_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    s.requester
        .connect(rustygatt::ConnectOptions {
            wait: true,
            ..Default::default()
        })
        .unwrap();
    s.loopback.peer.lock().unwrap().silent = true;

    let err = s.requester.read_by_handle(NAME_HANDLE).unwrap_err();
    assert_eq!(err.to_string(), "Read by handle timed out");

    // Discovery gets five request budgets
    let started = std::time::Instant::now();
    let err = s.requester.discover_primary().unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[test]
fn test_disconnect_aborts_pending() {
    let s = connected();
    s.loopback.peer.lock().unwrap().silent = true;

    let discovery = GattResponse::new();
    s.requester.discover_primary_async(&discovery).unwrap();
    // Queued behind the discovery; its first Prepare Write never goes out
    let queued_write = GattResponse::new();
    s.requester
        .write_by_handle_async(NAME_HANDLE, &[0x5A; 40], &queued_write)
        .unwrap();
    s.requester.disconnect().unwrap();

    assert!(discovery.is_done());
    assert_eq!(discovery.status(), Some(ATT_ECODE_ABORTED));
    assert!(queued_write.is_done());
    assert_eq!(queued_write.status(), Some(ATT_ECODE_ABORTED));
    assert!(matches!(s.requester.discover_primary(), Err(Error::State(_))));
}

#[test]
fn test_disconnect_aborts_long_write_in_flight() {
    let s = connected();
    s.loopback.peer.lock().unwrap().silent = true;

    let response = GattResponse::new();
    let value: Vec<u8> = (0..40).collect();
    s.requester
        .write_by_handle_async(CUSTOM_VALUE_HANDLE, &value, &response)
        .unwrap();
    let peer = s.loopback.peer.clone();
    wait_until(|| peer.lock().unwrap().requests == vec![ATT_PREPARE_WRITE_REQ]);

    s.requester.disconnect().unwrap();
    assert!(response.is_done());
    assert_eq!(response.status(), Some(ATT_ECODE_ABORTED));
    assert!(matches!(
        response.wait(Duration::from_millis(10)),
        Err(Error::Protocol(AttErrorCode::Aborted))
    ));
}

#[test]
fn test_hangup_between_prepared_writes_aborts() {
    let s = connected();
    s.loopback.peer.lock().unwrap().hang_up_after = Some(ATT_PREPARE_WRITE_REQ);

    let started = std::time::Instant::now();
    let value: Vec<u8> = (0..40).collect();
    let err = s
        .requester
        .write_by_handle(CUSTOM_VALUE_HANDLE, &value)
        .unwrap_err();

    assert!(matches!(err, Error::Protocol(AttErrorCode::Aborted)));
    assert!(started.elapsed() < s.requester.config().request_timeout);
    assert_eq!(s.requester.state(), ConnectionState::Disconnected);
    // Nothing was committed on the peer
    assert_eq!(
        s.loopback.peer.lock().unwrap().value(CUSTOM_VALUE_HANDLE),
        Some(vec![0x01])
    );
}

#[test]
fn test_hangup_during_discovery_aborts() {
    let s = connected();
    s.loopback.peer.lock().unwrap().hang_up_after = Some(ATT_READ_BY_GROUP_TYPE_REQ);

    let response = GattResponse::new();
    s.requester.discover_primary_async(&response).unwrap();

    assert!(matches!(
        response.wait(Duration::from_secs(5)),
        Err(Error::Protocol(AttErrorCode::Aborted))
    ));
    assert!(response.received().is_empty());
    // The second page was already on the wire when the link went away
    assert_eq!(
        s.loopback.peer.lock().unwrap().requests,
        vec![ATT_READ_BY_GROUP_TYPE_REQ, ATT_READ_BY_GROUP_TYPE_REQ]
    );
}

#[test]
fn test_peer_hangup() {
    let s = connected();
    s.loopback.hang_up();

    let requester = s.requester.clone();
    wait_until(|| requester.state() == ConnectionState::Disconnected);
    assert_eq!(
        s.requester.read_by_handle(NAME_HANDLE).unwrap_err().to_string(),
        "Not connected"
    );
}
