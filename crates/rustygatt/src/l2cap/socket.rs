//! Kernel L2CAP sockets for LE links
//!
//! A thin wrapper over `AF_BLUETOOTH`/`BTPROTO_L2CAP` sequential packet
//! sockets. The socket is non-blocking: [`L2capSocket::connect`] only starts
//! the connection, and the caller polls for writability to learn the outcome.

use super::types::*;
use crate::att::ATT_CID;
use crate::gap::{BdAddr, PeerAddress};
use crate::gatt::Bearer;
use log::{debug, trace};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

const AF_BLUETOOTH: i32 = 31;
const BTPROTO_L2CAP: i32 = 0;

const SOL_BLUETOOTH: i32 = 274;
const BT_SECURITY: i32 = 4;

const SOL_L2CAP: i32 = 6;
const L2CAP_OPTIONS: i32 = 0x01;
const L2CAP_CONNINFO: i32 = 0x02;

// Local side of an LE link is always bound as a public address
const BDADDR_LE_PUBLIC: u8 = 0x01;

#[repr(C)]
#[derive(Default)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

#[repr(C)]
struct BtSecurity {
    level: u8,
    key_size: u8,
}

#[repr(C)]
#[derive(Default)]
struct L2capOptions {
    omtu: u16,
    imtu: u16,
    flush_to: u16,
    mode: u8,
    fcs: u8,
    max_tx: u8,
    txwin_size: u16,
}

#[repr(C)]
#[derive(Default)]
struct L2capConnInfo {
    hci_handle: u16,
    dev_class: [u8; 3],
}

fn check(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// A non-blocking L2CAP socket
#[derive(Debug)]
pub struct L2capSocket {
    fd: RawFd,
}

impl L2capSocket {
    /// Create a socket bound to `local` and start connecting to `peer`.
    ///
    /// `psm` 0 selects the fixed ATT channel. `imtu` 0 keeps the kernel
    /// default incoming MTU.
    pub fn connect(
        local: BdAddr,
        peer: &PeerAddress,
        psm: u16,
        security: SecurityLevel,
        imtu: u16,
    ) -> L2capResult<Self> {
        let fd = check(unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_SEQPACKET | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                BTPROTO_L2CAP,
            )
        })?;
        let socket = L2capSocket { fd };

        let cid = if psm == 0 { ATT_CID } else { 0 };

        let local_addr = SockaddrL2 {
            l2_family: AF_BLUETOOTH as libc::sa_family_t,
            l2_bdaddr: local.bytes,
            l2_cid: cid.to_le(),
            l2_bdaddr_type: BDADDR_LE_PUBLIC,
            ..Default::default()
        };
        socket.bind(&local_addr)?;
        socket.set_security(security)?;
        if imtu != 0 {
            socket.set_imtu(imtu)?;
        }

        let remote = SockaddrL2 {
            l2_family: AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: psm.to_le(),
            l2_bdaddr: peer.address.bytes,
            l2_cid: cid.to_le(),
            l2_bdaddr_type: peer.address_type.bdaddr_type(),
        };

        debug!("L2CAP connect to {} psm {} cid {}", peer, psm, cid);
        let rc = unsafe {
            libc::connect(
                socket.fd,
                &remote as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINPROGRESS) | Some(libc::EAGAIN) => {}
                _ => return Err(L2capError::IoError(err)),
            }
        }

        Ok(socket)
    }

    /// Adopt an already connected descriptor
    #[cfg(test)]
    pub(crate) fn from_raw_fd(fd: RawFd) -> Self {
        L2capSocket { fd }
    }

    fn bind(&self, addr: &SockaddrL2) -> io::Result<()> {
        check(unsafe {
            libc::bind(
                self.fd,
                addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    fn set_security(&self, level: SecurityLevel) -> io::Result<()> {
        let security = BtSecurity {
            level: level.as_raw(),
            key_size: 0,
        };
        self.setsockopt(SOL_BLUETOOTH, BT_SECURITY, &security)
    }

    fn set_imtu(&self, imtu: u16) -> io::Result<()> {
        let mut options: L2capOptions = self.getsockopt(SOL_L2CAP, L2CAP_OPTIONS)?;
        options.imtu = imtu;
        self.setsockopt(SOL_L2CAP, L2CAP_OPTIONS, &options)
    }

    fn setsockopt<T>(&self, level: i32, name: i32, value: &T) -> io::Result<()> {
        check(unsafe {
            libc::setsockopt(
                self.fd,
                level,
                name,
                value as *const T as *const libc::c_void,
                std::mem::size_of::<T>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    fn getsockopt<T: Default>(&self, level: i32, name: i32) -> io::Result<T> {
        let mut value = T::default();
        let mut len = std::mem::size_of::<T>() as libc::socklen_t;
        check(unsafe {
            libc::getsockopt(
                self.fd,
                level,
                name,
                &mut value as *mut T as *mut libc::c_void,
                &mut len,
            )
        })?;
        Ok(value)
    }

    /// Outcome of the pending connect, read from `SO_ERROR`
    pub fn take_error(&self) -> io::Result<()> {
        let err: libc::c_int = self.getsockopt(libc::SOL_SOCKET, libc::SO_ERROR)?;
        match err {
            0 => Ok(()),
            errno => Err(io::Error::from_raw_os_error(errno)),
        }
    }

    /// MTUs and channel id of the connected channel
    pub fn info(&self) -> io::Result<ChannelInfo> {
        let options: L2capOptions = self.getsockopt(SOL_L2CAP, L2CAP_OPTIONS)?;

        let mut addr = SockaddrL2::default();
        let mut len = std::mem::size_of::<SockaddrL2>() as libc::socklen_t;
        check(unsafe {
            libc::getsockname(
                self.fd,
                &mut addr as *mut SockaddrL2 as *mut libc::sockaddr,
                &mut len,
            )
        })?;

        Ok(ChannelInfo {
            imtu: options.imtu,
            omtu: options.omtu,
            cid: u16::from_le(addr.l2_cid),
        })
    }

    /// HCI handle of the ACL link carrying this channel
    pub fn hci_handle(&self) -> io::Result<u16> {
        let info: L2capConnInfo = self.getsockopt(SOL_L2CAP, L2CAP_CONNINFO)?;
        Ok(info.hci_handle)
    }

    /// Receive one packet. `Ok(None)` means the peer closed the channel.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let n = unsafe {
            libc::recv(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        match n {
            n if n < 0 => Err(io::Error::last_os_error()),
            0 => Ok(None),
            n => Ok(Some(n as usize)),
        }
    }

    /// Send one packet
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        let n = unsafe {
            libc::send(
                self.fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        trace!("L2CAP tx {} bytes", n);
        Ok(())
    }

    /// Shut both directions down; the descriptor stays open until drop
    pub fn shutdown(&self) {
        unsafe {
            libc::shutdown(self.fd, libc::SHUT_RDWR);
        }
    }
}

impl Bearer for L2capSocket {
    fn send(&self, pdu: &[u8]) -> io::Result<()> {
        L2capSocket::send(self, pdu)
    }

    fn shutdown(&self) {
        L2capSocket::shutdown(self)
    }
}

impl AsRawFd for L2capSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for L2capSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
