//! HCI packet structures and parsing
//!
//! This module contains structures and methods for handling HCI packets.

use crate::hci::constants::*;
use crate::requester::ConnectionParameters;

/// HCI commands issued by this crate
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HciCommand {
    /// LE Connection Update
    LeConnectionUpdate {
        handle: u16,
        min_interval: u16,
        max_interval: u16,
        latency: u16,
        supervision_timeout: u16,
        min_ce_length: u16,
        max_ce_length: u16,
    },

    /// Any other command, parameters already encoded
    Raw {
        ogf: u8,
        ocf: u16,
        parameters: Vec<u8>,
    },
}

impl HciCommand {
    /// Build a raw command
    pub fn new(ogf: u8, ocf: u16, parameters: Vec<u8>) -> Self {
        Self::Raw {
            ogf,
            ocf,
            parameters,
        }
    }

    /// LE Connection Update for `handle` with the given link parameters
    pub fn le_connection_update(handle: u16, params: &ConnectionParameters) -> Self {
        Self::LeConnectionUpdate {
            handle,
            min_interval: params.min_interval,
            max_interval: params.max_interval,
            latency: params.latency,
            supervision_timeout: params.supervision_timeout,
            min_ce_length: params.min_ce_length,
            max_ce_length: params.max_ce_length,
        }
    }

    /// Get the OGF and OCF for this command
    pub fn opcode_parts(&self) -> (u8, u16) {
        match self {
            Self::LeConnectionUpdate { .. } => (OGF_LE, OCF_LE_CONN_UPDATE),
            Self::Raw { ogf, ocf, .. } => (*ogf, *ocf),
        }
    }

    /// The packed 16-bit opcode
    pub fn opcode(&self) -> u16 {
        let (ogf, ocf) = self.opcode_parts();
        ((ogf as u16) << 10) | (ocf & 0x3ff)
    }

    /// Convert the command to its raw parameter bytes
    fn parameters(&self) -> Vec<u8> {
        match self {
            Self::LeConnectionUpdate {
                handle,
                min_interval,
                max_interval,
                latency,
                supervision_timeout,
                min_ce_length,
                max_ce_length,
            } => {
                let mut params = Vec::with_capacity(14);
                for field in [
                    handle,
                    min_interval,
                    max_interval,
                    latency,
                    supervision_timeout,
                    min_ce_length,
                    max_ce_length,
                ] {
                    params.extend_from_slice(&field.to_le_bytes());
                }
                params
            }
            Self::Raw { parameters, .. } => parameters.clone(),
        }
    }

    /// Convert the command to a raw HCI packet
    pub fn to_packet(&self) -> Vec<u8> {
        let params = self.parameters();

        let mut packet = vec![HCI_COMMAND_PKT];
        packet.extend_from_slice(&self.opcode().to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(&params);
        packet
    }
}

/// HCI Event packet
#[derive(Debug, Clone)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameter_total_length: u8,
    pub parameters: Vec<u8>,
}

/// Parameters of a Command Status event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    pub status: u8,
    pub num_packets: u8,
    pub opcode: u16,
}

impl HciEvent {
    /// Parse an HCI event from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }

        let event_code = data[0];
        let parameter_total_length = data[1];

        if data.len() < (parameter_total_length as usize + 2) {
            return None;
        }

        let parameters = data[2..(parameter_total_length as usize + 2)].to_vec();

        Some(HciEvent {
            event_code,
            parameter_total_length,
            parameters,
        })
    }

    /// Decode a Command Status event
    pub fn command_status(&self) -> Option<CommandStatus> {
        if self.event_code != EVT_CMD_STATUS || self.parameters.len() < 4 {
            return None;
        }
        Some(CommandStatus {
            status: self.parameters[0],
            num_packets: self.parameters[1],
            opcode: u16::from_le_bytes([self.parameters[2], self.parameters[3]]),
        })
    }

    /// Opcode and return parameters of a Command Complete event
    pub fn command_complete(&self) -> Option<(u16, &[u8])> {
        if self.event_code != EVT_CMD_COMPLETE || self.parameters.len() < 3 {
            return None;
        }
        let opcode = u16::from_le_bytes([self.parameters[1], self.parameters[2]]);
        Some((opcode, &self.parameters[3..]))
    }

    /// The status this event reports for `opcode`, if it answers that command
    pub fn status_for(&self, opcode: u16) -> Option<u8> {
        if let Some(status) = self.command_status() {
            return (status.opcode == opcode).then_some(status.status);
        }
        match self.command_complete() {
            // Return parameters lead with the status byte
            Some((op, rest)) if op == opcode => Some(rest.first().copied().unwrap_or(0)),
            _ => None,
        }
    }
}
