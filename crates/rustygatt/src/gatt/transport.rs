//! [`Transport`] implementation backed by an [`Attrib`] bearer

use super::attrib::Attrib;
use super::procedures;
use crate::att::AttError;
use crate::transport::{Operation, ReplyCallback, RequestId, Transport, TransportResult};
use log::debug;
use std::sync::Arc;

/// Runs GATT operations as ATT procedures on one bearer
pub struct AttribTransport {
    attrib: Arc<Attrib>,
}

impl AttribTransport {
    pub fn new(attrib: Arc<Attrib>) -> Self {
        Self { attrib }
    }

    pub fn attrib(&self) -> &Arc<Attrib> {
        &self.attrib
    }
}

impl Transport for AttribTransport {
    fn submit(&self, op: Operation, callback: ReplyCallback) -> TransportResult<RequestId> {
        debug!("Submitting {}", op.name());

        let attrib = &self.attrib;
        let id = match op {
            Operation::ExchangeMtu { mtu } => procedures::exchange_mtu(attrib, mtu, callback),
            Operation::ReadByHandle { handle } => procedures::read_char(attrib, handle, callback),
            Operation::ReadByUuid { start, end, uuid } => {
                procedures::read_char_by_uuid(attrib, start, end, uuid, callback)
            }
            Operation::WriteByHandle { handle, value } => {
                procedures::write_char(attrib, handle, value, callback)
            }
            Operation::DiscoverPrimary => procedures::discover_primary(attrib, callback),
            Operation::DiscoverCharacteristics { start, end, uuid } => {
                procedures::discover_characteristics(attrib, start, end, uuid, callback)
            }
        }?;

        Ok(id)
    }

    fn write_command(&self, handle: u16, value: &[u8]) -> TransportResult<()> {
        procedures::write_cmd(&self.attrib, handle, value)?;
        Ok(())
    }

    fn send_pdu(&self, pdu: &[u8]) -> TransportResult<()> {
        if pdu.is_empty() {
            return Err(AttError::InvalidPdu.into());
        }
        self.attrib.send_command(pdu)?;
        Ok(())
    }

    fn cancel(&self, id: RequestId) -> bool {
        self.attrib.cancel(id)
    }

    fn mtu(&self) -> u16 {
        self.attrib.mtu()
    }

    fn set_mtu(&self, mtu: u16) {
        self.attrib.set_mtu(mtu);
    }

    fn shutdown(&self) {
        self.attrib.shutdown();
    }
}
