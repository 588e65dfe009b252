//! Local Bluetooth controller
//!
//! [`HciAdapter`] resolves an adapter name to a controller, opens L2CAP
//! channels from it and issues link-level HCI commands.

use crate::error::HciError;
use crate::gap::BdAddr;
use crate::hci::{parse_device_name, HciCommand, HciSocket};
use crate::l2cap::{L2capChannel, L2capSocket};
use crate::reactor::Reactor;
use crate::requester::ConnectionParameters;
use crate::transport::{
    Adapter, Channel, ConnectCallback, ConnectRequest, HangupCallback, TransportResult,
};
use log::{debug, info};
use std::sync::{Arc, Mutex, PoisonError};

/// A local controller, `hciN`
pub struct HciAdapter {
    dev_id: u16,
    name: String,
    address: BdAddr,
    // Raw socket for command/status exchanges; one request at a time
    hci: Mutex<HciSocket>,
    reactor: Reactor,
}

impl HciAdapter {
    /// Open the controller called `device`
    pub fn open(device: &str, reactor: Reactor) -> Result<Self, HciError> {
        let dev_id = parse_device_name(device)?;
        let info = HciSocket::device_info(dev_id)?;
        let hci = HciSocket::open(dev_id)?;

        info!("Opened {} ({})", info.name, info.address);
        Ok(Self {
            dev_id,
            name: info.name,
            address: info.address,
            hci: Mutex::new(hci),
            reactor,
        })
    }

    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Public address of the controller
    pub fn address(&self) -> BdAddr {
        self.address
    }
}

impl Adapter for HciAdapter {
    fn connect(
        &self,
        request: &ConnectRequest,
        on_connect: ConnectCallback,
        on_hangup: HangupCallback,
    ) -> TransportResult<Arc<dyn Channel>> {
        let socket = L2capSocket::connect(
            self.address,
            &request.peer,
            request.psm,
            request.security_level,
            request.mtu,
        )?;
        debug!(
            "{}: connecting to {} with {} security",
            self.name, request.peer, request.security_level
        );

        let channel = L2capChannel::start(socket, self.reactor.clone(), on_connect, on_hangup);
        Ok(channel)
    }

    fn update_connection(
        &self,
        hci_handle: u16,
        params: &ConnectionParameters,
    ) -> Result<(), HciError> {
        let command = HciCommand::le_connection_update(hci_handle, params);
        let hci = self.hci.lock().unwrap_or_else(PoisonError::into_inner);
        hci.send_request(&command, params.command_timeout)
    }
}
