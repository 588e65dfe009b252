//! Tests for the L2CAP socket layer

use super::socket::L2capSocket;
use super::types::*;
use crate::gatt::Bearer;
use std::os::unix::io::RawFd;

fn socket_pair() -> (L2capSocket, L2capSocket) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    assert_eq!(rc, 0);
    (
        L2capSocket::from_raw_fd(fds[0]),
        L2capSocket::from_raw_fd(fds[1]),
    )
}

#[test]
fn test_security_level_parsing() {
    assert_eq!("low".parse::<SecurityLevel>().unwrap(), SecurityLevel::Low);
    assert_eq!("Medium".parse::<SecurityLevel>().unwrap(), SecurityLevel::Medium);
    assert_eq!("HIGH".parse::<SecurityLevel>().unwrap(), SecurityLevel::High);
    assert!(matches!(
        "fips".parse::<SecurityLevel>(),
        Err(L2capError::InvalidParameter(_))
    ));

    assert_eq!(SecurityLevel::default(), SecurityLevel::Low);
    assert_eq!(SecurityLevel::Medium.to_string(), "medium");
}

#[test]
fn test_security_level_kernel_values() {
    assert_eq!(SecurityLevel::Low.as_raw(), 1);
    assert_eq!(SecurityLevel::Medium.as_raw(), 2);
    assert_eq!(SecurityLevel::High.as_raw(), 3);
    assert!(SecurityLevel::High > SecurityLevel::Low);
}

#[test]
fn test_packets_keep_boundaries() {
    let (a, b) = socket_pair();

    Bearer::send(&a, &[0x0A, 0x03, 0x00]).unwrap();
    Bearer::send(&a, &[0x1B, 0x0E, 0x00, 0x01]).unwrap();

    let mut buf = [0u8; 64];
    assert_eq!(b.recv(&mut buf).unwrap(), Some(3));
    assert_eq!(&buf[..3], &[0x0A, 0x03, 0x00]);
    assert_eq!(b.recv(&mut buf).unwrap(), Some(4));

    // Nothing left on a non-blocking socket
    let err = b.recv(&mut buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}

#[test]
fn test_recv_reports_peer_close() {
    let (a, b) = socket_pair();
    drop(a);

    let mut buf = [0u8; 16];
    assert_eq!(b.recv(&mut buf).unwrap(), None);
    assert!(b.take_error().is_ok());
}

#[test]
fn test_shutdown_stops_sends() {
    let (a, _b) = socket_pair();
    Bearer::shutdown(&a);
    assert!(Bearer::send(&a, &[0x52, 0x01, 0x00]).is_err());
}
