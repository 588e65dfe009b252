//! HCI Socket implementation for Bluetooth communication
//!
//! This module provides a wrapper around the raw HCI socket interface,
//! allowing for communication with Bluetooth controllers.

use crate::error::HciError;
use crate::gap::BdAddr;
use crate::hci::constants::*;
use crate::hci::packet::{HciCommand, HciEvent};
use log::{debug, trace};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_RAW: i32 = 0;

/// Represents an HCI socket
#[derive(Debug)]
pub struct HciSocket {
    fd: RawFd,
    dev_id: u16,
}

// Define the sockaddr_hci structure
#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

#[repr(C)]
struct HciDevStats {
    counters: [u32; 10],
}

#[repr(C)]
struct HciDevInfo {
    dev_id: u16,
    name: [libc::c_char; 8],
    bdaddr: [u8; 6],
    flags: u32,
    dev_type: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: HciDevStats,
}

/// What the kernel reports about a local controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub dev_id: u16,
    pub name: String,
    pub address: BdAddr,
}

/// Parse an adapter name of the form `hciN`
pub fn parse_device_name(name: &str) -> Result<u16, HciError> {
    name.strip_prefix("hci")
        .and_then(|n| n.parse::<u16>().ok())
        .filter(|id| *id < HCI_MAX_DEV)
        .ok_or_else(|| HciError::InvalidDevice(name.to_string()))
}

impl HciSocket {
    /// Gets the raw file descriptor for the socket
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Device id this socket is bound to
    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    /// Opens a new HCI socket
    ///
    /// # Arguments
    ///
    /// * `dev_id` - The device ID to open (0 for the first device)
    ///
    /// # Returns
    ///
    /// A new `HciSocket` instance or an error if the socket could not be opened
    pub fn open(dev_id: u16) -> Result<Self, HciError> {
        // Open a raw HCI socket
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };

        if fd < 0 {
            return Err(HciError::SocketError(io::Error::last_os_error()));
        }

        // Bind to the specified device
        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW as u16,
        };

        let result = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };

        if result < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(match err.raw_os_error() {
                Some(libc::ENODEV) => HciError::InvalidDevice(format!("hci{}", dev_id)),
                _ => HciError::BindError(err),
            });
        }

        let socket = HciSocket { fd, dev_id };
        socket.set_filter()?;
        Ok(socket)
    }

    /// Only let command status and command complete events through
    fn set_filter(&self) -> Result<(), HciError> {
        let mut filter = HciFilter {
            type_mask: 1 << HCI_EVENT_PKT,
            event_mask: [0; 2],
            opcode: 0,
        };
        for event in [EVT_CMD_STATUS, EVT_CMD_COMPLETE] {
            filter.event_mask[(event >> 5) as usize] |= 1 << (event & 31);
        }

        let result = unsafe {
            libc::setsockopt(
                self.fd,
                SOL_HCI,
                HCI_FILTER,
                &filter as *const _ as *const libc::c_void,
                std::mem::size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(HciError::SocketError(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Query the kernel for a controller's name and address
    pub fn device_info(dev_id: u16) -> Result<DeviceInfo, HciError> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(HciError::SocketError(io::Error::last_os_error()));
        }

        let mut info: HciDevInfo = unsafe { std::mem::zeroed() };
        info.dev_id = dev_id;
        let result = unsafe { libc::ioctl(fd, HCIGETDEVINFO as _, &mut info as *mut HciDevInfo) };
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };

        if result < 0 {
            return Err(match err.raw_os_error() {
                Some(libc::ENODEV) => HciError::InvalidDevice(format!("hci{}", dev_id)),
                _ => HciError::SocketError(err),
            });
        }

        let name: Vec<u8> = info
            .name
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();

        Ok(DeviceInfo {
            dev_id: info.dev_id,
            name: String::from_utf8_lossy(&name).into_owned(),
            address: BdAddr::new(info.bdaddr),
        })
    }

    /// Read an HCI event from the socket
    pub fn read_event(&self) -> Result<HciEvent, HciError> {
        let mut buffer = [0u8; HCI_MAX_EVENT_SIZE];

        // Read packet type and header
        let bytes_read = unsafe {
            libc::read(
                self.fd,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };

        if bytes_read < 0 {
            return Err(HciError::ReceiveError(io::Error::last_os_error()));
        }

        if bytes_read < 3 || buffer[0] != HCI_EVENT_PKT {
            return Err(HciError::InvalidPacketFormat);
        }

        // Parse event
        match HciEvent::parse(&buffer[1..bytes_read as usize]) {
            Some(event) => Ok(event),
            None => Err(HciError::InvalidPacketFormat),
        }
    }

    /// Read an HCI event from the socket with a timeout
    pub fn read_event_timeout(&self, timeout: Option<Duration>) -> Result<HciEvent, HciError> {
        if let Some(timeout) = timeout {
            // Set up the fd_set for select()
            let mut read_fds: libc::fd_set = unsafe { std::mem::zeroed() };
            unsafe {
                libc::FD_ZERO(&mut read_fds);
                libc::FD_SET(self.fd, &mut read_fds);
            }

            // Set up the timeout
            let mut timeout_val = libc::timeval {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_usec: timeout.subsec_micros() as libc::suseconds_t,
            };

            // Wait for data to be available
            let result = unsafe {
                libc::select(
                    self.fd + 1,
                    &mut read_fds,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    &mut timeout_val,
                )
            };

            if result < 0 {
                return Err(HciError::ReceiveError(io::Error::last_os_error()));
            }

            if result == 0 {
                return Err(HciError::Timeout);
            }
        }

        // Read the event
        self.read_event()
    }

    /// Sends an HCI command to the controller
    pub fn send_command(&self, command: &HciCommand) -> Result<(), HciError> {
        let packet = command.to_packet();
        trace!("HCI tx {}", hex::encode(&packet));
        match unsafe {
            libc::write(
                self.fd,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
            )
        } {
            -1 => Err(HciError::SendError(io::Error::last_os_error())),
            _ => Ok(()),
        }
    }

    /// Send `command` and wait up to `timeout` for the controller to accept
    /// it, through either a Command Status or a Command Complete event.
    pub fn send_request(&self, command: &HciCommand, timeout: Duration) -> Result<(), HciError> {
        let opcode = command.opcode();
        self.send_command(command)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HciError::Timeout);
            }

            let event = match self.read_event_timeout(Some(remaining)) {
                Ok(event) => event,
                // Packets we cannot parse are not ours
                Err(HciError::InvalidPacketFormat) => continue,
                Err(e) => return Err(e),
            };

            match event.status_for(opcode) {
                Some(0) => {
                    debug!("HCI command 0x{:04x} accepted", opcode);
                    return Ok(());
                }
                Some(status) => return Err(HciError::CommandFailed(status)),
                None => trace!("Skipping HCI event 0x{:02x}", event.event_code),
            }
        }
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for HciSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
