//! Blocking GATT client for one peer
//!
//! [`GattRequester`] owns the link to a peripheral and turns each GATT
//! operation into a submission on the [`Transport`] plus a wait on a
//! [`GattResponse`]. Every operation also has an `_async` form that takes a
//! caller-owned token and returns as soon as the request is queued.

mod config;
mod hooks;
mod state;


pub use config::{ConnectOptions, ConnectionParameters, RequesterConfig};
pub use hooks::{GattEventHandler, LoggingEventHandler};
pub use state::{ConnectionState, LinkEvent};

use crate::adapter::HciAdapter;
use crate::att::*;
use crate::error::{Error, HciError, Result};
use crate::gap::{BdAddr, PeerAddress};
use crate::gatt::{Characteristic, PrimaryService};
use crate::reactor::Reactor;
use crate::response::{GattResponse, Responder};
use crate::transport::{
    Adapter, Channel, ConnectRequest, EventHandler, Operation, Reply, ReplyCallback, RequestId,
    Transport, TransportError,
};
use crate::uuid::Uuid;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Everything that changes over the life of a link
#[derive(Default)]
struct Link {
    state: ConnectionState,
    channel: Option<Arc<dyn Channel>>,
    transport: Option<Arc<dyn Transport>>,
    // Link parameters already pushed for this connection
    tuned: bool,
    // Bumped whenever a connection attempt starts or ends, so callbacks
    // from an earlier attempt can tell they are stale
    generation: u64,
    last_error: Option<String>,
}

/// GATT client bound to one peer device
pub struct GattRequester {
    me: Weak<GattRequester>,
    peer: PeerAddress,
    config: RequesterConfig,
    adapter: Arc<dyn Adapter>,
    hooks: Arc<dyn GattEventHandler>,
    link: Mutex<Link>,
    link_changed: Condvar,
    mtu: AtomicU16,
}

impl GattRequester {
    /// Create a requester for `address` (`AA:BB:CC:DD:EE:FF`) on the adapter
    /// named in `config`, logging notifications and indications.
    pub fn new(address: &str, config: RequesterConfig) -> Result<Arc<Self>> {
        Self::with_hooks(address, config, Arc::new(LoggingEventHandler))
    }

    /// Like [`new`](Self::new) with caller-supplied hooks
    pub fn with_hooks(
        address: &str,
        config: RequesterConfig,
        hooks: Arc<dyn GattEventHandler>,
    ) -> Result<Arc<Self>> {
        let address: BdAddr = address
            .parse()
            .map_err(|e| Error::InvalidArgument(format!("{}", e)))?;
        let peer = PeerAddress::new(address, config.address_type);

        let reactor = Reactor::global()
            .map_err(|e| Error::Connection(format!("Could not start reactor: {}", e)))?;
        let adapter = HciAdapter::open(&config.device, reactor).map_err(|e| match e {
            HciError::InvalidDevice(_) => Error::Connection("Invalid device!".into()),
            other => Error::Connection(format!("Could not open HCI device: {}", other)),
        })?;
        info!("Using adapter {} ({})", config.device, adapter.address());

        Ok(Self::with_adapter(peer, config, Arc::new(adapter), hooks))
    }

    /// Create a requester on an already opened adapter
    pub fn with_adapter(
        peer: PeerAddress,
        config: RequesterConfig,
        adapter: Arc<dyn Adapter>,
        hooks: Arc<dyn GattEventHandler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            peer,
            config,
            adapter,
            hooks,
            link: Mutex::new(Link::default()),
            link_changed: Condvar::new(),
            mtu: AtomicU16::new(ATT_DEFAULT_LE_MTU),
        })
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The peer this requester talks to
    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn config(&self) -> &RequesterConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_link().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Effective ATT MTU of the current connection
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::SeqCst)
    }

    /// Start connecting to the peer.
    ///
    /// With `options.wait` set this blocks until the channel is usable,
    /// otherwise the first operation waits for it.
    pub fn connect(&self, options: ConnectOptions) -> Result<()> {
        let generation = {
            let mut link = self.lock_link();
            link.state = link.state.apply(LinkEvent::Connect)?;
            link.generation += 1;
            link.tuned = false;
            link.last_error = None;
            link.generation
        };

        let address_type = options.channel_type.unwrap_or(self.peer.address_type);
        let request = ConnectRequest {
            peer: PeerAddress::new(self.peer.address, address_type),
            security_level: options.security_level,
            psm: options.psm,
            mtu: options.mtu,
        };
        info!("Connecting to {}", request.peer);

        let me = self.me.clone();
        let on_connect = Box::new(move |result: std::result::Result<Arc<dyn Channel>, TransportError>| {
            match me.upgrade() {
                Some(this) => this.on_connect(generation, result),
                None => {
                    if let Ok(channel) = result {
                        channel.shutdown();
                    }
                }
            }
        });
        let me = self.me.clone();
        let on_hangup = Box::new(move || {
            if let Some(this) = me.upgrade() {
                this.on_hangup(generation);
            }
        });

        match self.adapter.connect(&request, on_connect, on_hangup) {
            Ok(channel) => {
                let mut link = self.lock_link();
                if link.generation != generation {
                    // Disconnected while the adapter was still setting up
                    drop(link);
                    channel.shutdown();
                } else if link.channel.is_none() {
                    link.channel = Some(channel);
                }
            }
            Err(e) => {
                error!("Connection to {} failed: {}", request.peer, e);
                let mut link = self.lock_link();
                if link.generation == generation {
                    link.state = link.state.apply(LinkEvent::Disconnect)?;
                    link.generation += 1;
                    self.link_changed.notify_all();
                }
                return Err(Error::Connection(e.to_string()));
            }
        }

        if options.wait {
            self.check_channel()?;
        }
        Ok(())
    }

    fn on_connect(
        &self,
        generation: u64,
        result: std::result::Result<Arc<dyn Channel>, TransportError>,
    ) {
        let mut link = self.lock_link();
        if link.generation != generation || link.state != ConnectionState::Connecting {
            drop(link);
            debug!("Ignoring completion of a stale connection attempt");
            if let Ok(channel) = result {
                channel.shutdown();
            }
            return;
        }

        let outcome = result.and_then(|channel| {
            let mtu = if channel.cid() == ATT_CID {
                ATT_DEFAULT_LE_MTU
            } else {
                match channel.imtu() {
                    0 => ATT_DEFAULT_LE_MTU,
                    imtu => imtu,
                }
            };

            let me = self.me.clone();
            let events: EventHandler = Arc::new(move |pdu: &[u8]| {
                if let Some(this) = me.upgrade() {
                    if let Err(e) = this.dispatch_event(pdu) {
                        warn!("Dropped unsolicited PDU: {}", e);
                    }
                }
            });

            let transport = channel.attach(mtu, events)?;
            Ok((channel, transport, mtu))
        });

        match outcome {
            Ok((channel, transport, mtu)) => {
                link.channel = Some(channel);
                link.transport = Some(transport);
                self.mtu.store(mtu, Ordering::SeqCst);
                link.state = link
                    .state
                    .apply(LinkEvent::Established)
                    .unwrap_or(ConnectionState::Connected);
                info!("Connected to {} (MTU {})", self.peer, mtu);
            }
            Err(e) => {
                error!("Connection to {} failed: {}", self.peer, e);
                link.state = link
                    .state
                    .apply(LinkEvent::Failed)
                    .unwrap_or(ConnectionState::Error);
                link.last_error = Some(e.to_string());
            }
        }
        self.link_changed.notify_all();
    }

    fn on_hangup(&self, generation: u64) {
        if self.lock_link().generation != generation {
            return;
        }
        info!("Peer {} hung up", self.peer);
        if let Err(e) = self.disconnect() {
            warn!("Disconnect after hang-up failed: {}", e);
        }
    }

    /// Tear the link down. Does nothing when already disconnected.
    pub fn disconnect(&self) -> Result<()> {
        let (transport, channel) = {
            let mut link = self.lock_link();
            if link.state == ConnectionState::Disconnected {
                return Ok(());
            }
            link.state = link.state.apply(LinkEvent::Disconnect)?;
            link.generation += 1;
            link.tuned = false;
            link.last_error = None;
            self.link_changed.notify_all();
            (link.transport.take(), link.channel.take())
        };

        info!("Disconnecting from {}", self.peer);
        self.mtu.store(ATT_DEFAULT_LE_MTU, Ordering::SeqCst);
        if let Some(transport) = transport {
            transport.shutdown();
        }
        if let Some(channel) = channel {
            channel.shutdown();
        }
        Ok(())
    }

    /// Wait for a usable transport, tuning the link on first use
    fn check_channel(&self) -> Result<Arc<dyn Transport>> {
        let deadline = Instant::now() + self.config.channel_timeout;
        let mut link = self.lock_link();

        let transport = loop {
            match link.state {
                ConnectionState::Connected => {
                    if let Some(transport) = link.transport.clone() {
                        break transport;
                    }
                }
                ConnectionState::Connecting => {}
                ConnectionState::Disconnected => {
                    return Err(Error::State("Not connected".into()));
                }
                ConnectionState::Error => {
                    let message = link
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "Connection failed".into());
                    return Err(Error::Connection(message));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("Channel".into()));
            }
            link = self
                .link_changed
                .wait_timeout(link, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        if link.tuned {
            return Ok(transport);
        }

        let generation = link.generation;
        let channel = link.channel.clone();
        drop(link);

        if let Some(channel) = channel {
            self.tune(channel.as_ref())?;
        }

        let mut link = self.lock_link();
        if link.generation == generation {
            link.tuned = true;
        }
        Ok(transport)
    }

    fn tune(&self, channel: &dyn Channel) -> Result<()> {
        let failed = |e: &dyn std::fmt::Display| {
            Error::Connection(format!("Could not update HCI connection: {}", e))
        };

        let handle = channel.hci_handle().map_err(|e| failed(&e))?;
        let params = &self.config.connection_parameters;
        debug!(
            "Tuning connection 0x{:04x}: interval {}-{}, latency {}, timeout {}",
            handle, params.min_interval, params.max_interval, params.latency, params.supervision_timeout
        );
        self.adapter
            .update_connection(handle, params)
            .map_err(|e| failed(&e))
    }

    fn submit<T>(
        &self,
        transport: &Arc<dyn Transport>,
        op: Operation,
        response: &GattResponse<T>,
        callback: ReplyCallback,
    ) -> Result<RequestId> {
        let id = transport.submit(op, callback)?;
        response.set_request_id(id);
        Ok(id)
    }

    /// Wait for `response`; on timeout cancel the request exactly once
    fn wait_for<T>(
        &self,
        transport: &Arc<dyn Transport>,
        response: &GattResponse<T>,
        timeout: Duration,
        what: &str,
    ) -> Result<Vec<T>> {
        if response.wait(timeout)? {
            return Ok(response.take_received());
        }

        warn!("{} timed out after {:?}", what, timeout);
        if let Some(id) = response.mark_dead() {
            transport.cancel(id);
        }
        Err(Error::Timeout(what.to_string()))
    }

    /// Withdraw an asynchronous request. Late completions are discarded.
    /// Returns true if a pending request was cancelled.
    pub fn cancel<T>(&self, response: &GattResponse<T>) -> bool {
        let id = match response.mark_dead() {
            Some(id) => id,
            None => return false,
        };
        match self.lock_link().transport.clone() {
            Some(transport) => transport.cancel(id),
            None => false,
        }
    }

    fn start_exchange_mtu(
        &self,
        transport: &Arc<dyn Transport>,
        mtu: u16,
        response: &GattResponse<u16>,
    ) -> Result<RequestId> {
        let responder = response.responder();
        let me = self.me.clone();
        let weak_transport = Arc::downgrade(transport);

        let callback: ReplyCallback = Box::new(move |result| match result {
            Ok(Reply::Mtu(server_mtu)) => {
                let effective = mtu.min(server_mtu).max(ATT_DEFAULT_LE_MTU);
                if let Some(transport) = weak_transport.upgrade() {
                    transport.set_mtu(effective);
                }
                if let Some(this) = me.upgrade() {
                    this.mtu.store(effective, Ordering::SeqCst);
                }
                debug!("MTU exchanged: client {}, server {}", mtu, server_mtu);
                responder.on_response(effective);
                responder.notify(0);
            }
            other => finish_unexpected(&responder, other),
        });

        self.submit(transport, Operation::ExchangeMtu { mtu }, response, callback)
    }

    /// Negotiate the ATT MTU; returns the effective value
    pub fn exchange_mtu(&self, mtu: u16) -> Result<u16> {
        let transport = self.check_channel()?;
        let response = GattResponse::new();
        self.start_exchange_mtu(&transport, mtu, &response)?;

        let values = self.wait_for(&transport, &response, self.config.request_timeout, "Exchange MTU")?;
        values
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol(AttErrorCode::Unlikely))
    }

    pub fn exchange_mtu_async(&self, mtu: u16, response: &GattResponse<u16>) -> Result<RequestId> {
        let transport = self.check_channel()?;
        self.start_exchange_mtu(&transport, mtu, response)
    }

    fn start_read_by_handle(
        &self,
        transport: &Arc<dyn Transport>,
        handle: u16,
        response: &GattResponse<Vec<u8>>,
    ) -> Result<RequestId> {
        let responder = response.responder();
        let callback: ReplyCallback = Box::new(move |result| match result {
            Ok(Reply::Pdu(pdu)) if !pdu.is_empty() => {
                // Strip the opcode
                responder.on_response(pdu[1..].to_vec());
                responder.notify(0);
            }
            other => finish_unexpected(&responder, other),
        });

        self.submit(transport, Operation::ReadByHandle { handle }, response, callback)
    }

    /// Read the value at `handle`
    pub fn read_by_handle(&self, handle: u16) -> Result<Vec<Vec<u8>>> {
        let transport = self.check_channel()?;
        let response = GattResponse::new();
        self.start_read_by_handle(&transport, handle, &response)?;
        self.wait_for(&transport, &response, self.config.request_timeout, "Read by handle")
    }

    pub fn read_by_handle_async(
        &self,
        handle: u16,
        response: &GattResponse<Vec<u8>>,
    ) -> Result<RequestId> {
        let transport = self.check_channel()?;
        self.start_read_by_handle(&transport, handle, response)
    }

    fn start_read_by_uuid(
        &self,
        transport: &Arc<dyn Transport>,
        uuid: Uuid,
        response: &GattResponse<Vec<u8>>,
    ) -> Result<RequestId> {
        let responder = response.responder();
        let callback: ReplyCallback = Box::new(move |result| match result {
            Ok(Reply::Pdu(pdu)) => match ReadByTypeResponse::parse(&pdu) {
                Ok(list) => {
                    for entry in list.data {
                        responder.on_response(entry.value);
                    }
                    responder.notify(0);
                }
                Err(e) => {
                    warn!("Undecodable Read By Type response: {}", e);
                    responder.notify(ATT_ECODE_ABORTED);
                }
            },
            other => finish_unexpected(&responder, other),
        });

        let op = Operation::ReadByUuid {
            start: ATT_HANDLE_MIN,
            end: ATT_HANDLE_MAX,
            uuid,
        };
        self.submit(transport, op, response, callback)
    }

    /// Read every attribute of type `uuid`, in handle order
    pub fn read_by_uuid(&self, uuid: &str) -> Result<Vec<Vec<u8>>> {
        let uuid = parse_uuid(uuid)?;
        let transport = self.check_channel()?;
        let response = GattResponse::new();
        self.start_read_by_uuid(&transport, uuid, &response)?;
        self.wait_for(&transport, &response, self.config.request_timeout, "Read by UUID")
    }

    pub fn read_by_uuid_async(
        &self,
        uuid: &str,
        response: &GattResponse<Vec<u8>>,
    ) -> Result<RequestId> {
        let uuid = parse_uuid(uuid)?;
        let transport = self.check_channel()?;
        self.start_read_by_uuid(&transport, uuid, response)
    }

    fn start_write_by_handle(
        &self,
        transport: &Arc<dyn Transport>,
        handle: u16,
        value: &[u8],
        response: &GattResponse<Vec<u8>>,
    ) -> Result<RequestId> {
        let responder = response.responder();
        let callback: ReplyCallback = Box::new(move |result| match result {
            Ok(Reply::Pdu(pdu)) => {
                responder.on_response(pdu);
                responder.notify(0);
            }
            other => finish_unexpected(&responder, other),
        });

        let op = Operation::WriteByHandle {
            handle,
            value: value.to_vec(),
        };
        self.submit(transport, op, response, callback)
    }

    /// Write `value` at `handle` and wait for the peer to acknowledge.
    /// Returns the raw response PDU.
    pub fn write_by_handle(&self, handle: u16, value: &[u8]) -> Result<Vec<Vec<u8>>> {
        let transport = self.check_channel()?;
        let response = GattResponse::new();
        self.start_write_by_handle(&transport, handle, value, &response)?;
        self.wait_for(&transport, &response, self.config.request_timeout, "Write by handle")
    }

    pub fn write_by_handle_async(
        &self,
        handle: u16,
        value: &[u8],
        response: &GattResponse<Vec<u8>>,
    ) -> Result<RequestId> {
        let transport = self.check_channel()?;
        self.start_write_by_handle(&transport, handle, value, response)
    }

    /// Write without response. Send failures are only logged.
    pub fn write_cmd_by_handle(&self, handle: u16, value: &[u8]) -> Result<()> {
        let transport = self.check_channel()?;
        if let Err(e) = transport.write_command(handle, value) {
            warn!("Write command to 0x{:04x} failed: {}", handle, e);
        }
        Ok(())
    }

    fn start_discover_primary(
        &self,
        transport: &Arc<dyn Transport>,
        response: &GattResponse<PrimaryService>,
    ) -> Result<RequestId> {
        let responder = response.responder();
        let callback: ReplyCallback = Box::new(move |result| match result {
            Ok(Reply::Services(services)) => {
                for service in services {
                    responder.on_response(service);
                }
                responder.notify(0);
            }
            other => finish_unexpected(&responder, other),
        });

        self.submit(transport, Operation::DiscoverPrimary, response, callback)
    }

    /// Discover all primary services
    pub fn discover_primary(&self) -> Result<Vec<PrimaryService>> {
        let transport = self.check_channel()?;
        let response = GattResponse::new();
        self.start_discover_primary(&transport, &response)?;
        self.wait_for(
            &transport,
            &response,
            self.config.discovery_timeout(),
            "Discover primary",
        )
    }

    pub fn discover_primary_async(&self, response: &GattResponse<PrimaryService>) -> Result<RequestId> {
        let transport = self.check_channel()?;
        self.start_discover_primary(&transport, response)
    }

    fn start_discover_characteristics(
        &self,
        transport: &Arc<dyn Transport>,
        start: u16,
        end: u16,
        uuid: Option<Uuid>,
        response: &GattResponse<Characteristic>,
    ) -> Result<RequestId> {
        let responder = response.responder();
        let callback: ReplyCallback = Box::new(move |result| match result {
            Ok(Reply::Characteristics(found)) => {
                for characteristic in found {
                    responder.on_response(characteristic);
                }
                responder.notify(0);
            }
            other => finish_unexpected(&responder, other),
        });

        let op = Operation::DiscoverCharacteristics { start, end, uuid };
        self.submit(transport, op, response, callback)
    }

    /// Discover characteristics between `start` and `end` inclusive. `uuid`
    /// restricts the result to one type; `None` or an empty string returns
    /// all. A zero or inverted range is rejected before anything is sent.
    pub fn discover_characteristics(
        &self,
        start: u16,
        end: u16,
        uuid: Option<&str>,
    ) -> Result<Vec<Characteristic>> {
        check_range(start, end)?;
        let uuid = parse_filter(uuid)?;
        let transport = self.check_channel()?;
        let response = GattResponse::new();
        self.start_discover_characteristics(&transport, start, end, uuid, &response)?;
        self.wait_for(
            &transport,
            &response,
            self.config.discovery_timeout(),
            "Discover characteristics",
        )
    }

    pub fn discover_characteristics_async(
        &self,
        start: u16,
        end: u16,
        uuid: Option<&str>,
        response: &GattResponse<Characteristic>,
    ) -> Result<RequestId> {
        check_range(start, end)?;
        let uuid = parse_filter(uuid)?;
        let transport = self.check_channel()?;
        self.start_discover_characteristics(&transport, start, end, uuid, response)
    }

    /// Route one unsolicited PDU to the hooks, confirming indications
    pub fn dispatch_event(&self, pdu: &[u8]) -> Result<()> {
        if pdu.len() < ATT_MTU_HEADER_SIZE {
            return Err(Error::Protocol(AttErrorCode::InvalidPdu));
        }
        let handle = u16::from_le_bytes([pdu[1], pdu[2]]);
        let value = &pdu[ATT_MTU_HEADER_SIZE..];

        match pdu[0] {
            ATT_HANDLE_VALUE_NTF => {
                self.hooks.on_notification(handle, value);
                Ok(())
            }
            ATT_HANDLE_VALUE_IND => {
                self.hooks.on_indication(handle, value);

                let transport = self.lock_link().transport.clone();
                match transport {
                    Some(transport) => {
                        transport.send_pdu(&HandleValueConfirmation.serialize())?;
                        Ok(())
                    }
                    None => Err(Error::State("Not connected".into())),
                }
            }
            opcode => {
                debug!("Unexpected unsolicited opcode 0x{:02x}", opcode);
                Err(Error::Protocol(AttErrorCode::InvalidPdu))
            }
        }
    }
}

impl Drop for GattRequester {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("Disconnect on drop failed: {}", e);
        }
    }
}

/// Complete a token whose reply did not carry what the operation expects
fn finish_unexpected<T>(responder: &Responder<T>, result: std::result::Result<Reply, u8>) {
    match result {
        Err(status) => responder.notify(status),
        Ok(reply) => {
            warn!("Unexpected reply {:?}", reply);
            responder.notify(ATT_ERROR_UNLIKELY);
        }
    }
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    text.parse()
        .map_err(|e| Error::InvalidArgument(format!("Invalid UUID '{}': {}", text, e)))
}

fn check_range(start: u16, end: u16) -> Result<()> {
    if start == 0 || start > end {
        return Err(Error::InvalidArgument(format!(
            "Invalid handle range 0x{:04x}-0x{:04x}",
            start, end
        )));
    }
    Ok(())
}

fn parse_filter(text: Option<&str>) -> Result<Option<Uuid>> {
    match text {
        None | Some("") => Ok(None),
        Some(text) => parse_uuid(text).map(Some),
    }
}
