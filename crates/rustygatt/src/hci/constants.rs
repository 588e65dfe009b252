//! HCI protocol constants
//!
//! This module contains constants used in the Bluetooth HCI protocol.

// HCI packet types
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_EVENT_PKT: u8 = 0x04;

// Maximum size of an HCI event, packet type byte included
pub const HCI_MAX_EVENT_SIZE: usize = 260;

// OGF (Opcode Group Field) value for LE commands
pub const OGF_LE: u8 = 0x08;

// LE Command OCF values (OGF: 0x08)
pub const OCF_LE_CONN_UPDATE: u16 = 0x0013;

// HCI Events
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;

// Socket level options
pub const SOL_HCI: i32 = 0;
pub const HCI_FILTER: i32 = 2;

// Device ioctls
pub const HCIGETDEVINFO: libc::c_ulong = 0x8004_48D3;
pub const HCI_MAX_DEV: u16 = 16;
