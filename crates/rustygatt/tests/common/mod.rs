//! In-memory GATT peripheral wired to a requester through the real ATT stack
//!
//! The [`Loopback`] adapter hands out channels whose transport is a genuine
//! `Attrib` + `AttribTransport`; only the bearer is replaced by a
//! [`MemoryPeer`] that answers on the reactor thread like a kernel socket
//! would.

#![allow(dead_code)]

use rustygatt::att::*;
use rustygatt::gatt::{Attrib, AttribTransport, Bearer};
use rustygatt::transport::{
    Adapter, Channel, ConnectCallback, ConnectRequest, EventHandler, HangupCallback, Transport,
    TransportResult,
};
use rustygatt::{
    AddressType, ConnectOptions, ConnectionParameters, GattEventHandler, GattRequester, HciError,
    PeerAddress, Reactor, RequesterConfig, Uuid,
};
use std::io;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

pub const DEVICE_NAME: &[u8] = b"rustygatt loopback peripheral";
pub const SERVER_MTU: u16 = 64;

pub const NAME_HANDLE: u16 = 0x0003;
pub const CUSTOM_VALUE_HANDLE: u16 = 0x0006;
pub const SERVICE_CHANGED_HANDLE: u16 = 0x0009;

pub fn custom_uuid() -> Uuid {
    "12345678-1234-5678-1234-56789abcdef0".parse().unwrap()
}

struct Attribute {
    handle: u16,
    kind: Uuid,
    value: Vec<u8>,
    group_end: Option<u16>,
}

impl Attribute {
    fn is_declaration(&self) -> bool {
        self.kind == PRIMARY_SERVICE_UUID || self.kind == CHARACTERISTIC_UUID
    }
}

fn declaration(props: u8, value_handle: u16, uuid: Uuid) -> Vec<u8> {
    let mut value = vec![props];
    value.extend_from_slice(&value_handle.to_le_bytes());
    value.extend_from_slice(&uuid.to_att_bytes());
    value
}

/// A small attribute server
pub struct MemoryPeer {
    attributes: Vec<Attribute>,
    mtu: u16,
    prepared: Vec<(u16, u16, Vec<u8>)>,
    /// Write requests, long writes included once executed
    pub writes: Vec<(u16, Vec<u8>)>,
    pub commands: Vec<(u16, Vec<u8>)>,
    pub requests: Vec<u8>,
    pub confirmations: usize,
    /// Swallow every request without answering
    pub silent: bool,
    /// Drop the link right after answering the first request with this opcode
    pub hang_up_after: Option<u8>,
}

impl MemoryPeer {
    pub fn new() -> Self {
        let custom = custom_uuid();
        let attributes = vec![
            Attribute {
                handle: 0x0001,
                kind: Uuid::from_u16(PRIMARY_SERVICE_UUID),
                value: Uuid::from_u16(0x1800).to_att_bytes(),
                group_end: Some(0x0003),
            },
            Attribute {
                handle: 0x0002,
                kind: Uuid::from_u16(CHARACTERISTIC_UUID),
                value: declaration(0x0A, NAME_HANDLE, Uuid::from_u16(0x2A00)),
                group_end: None,
            },
            Attribute {
                handle: NAME_HANDLE,
                kind: Uuid::from_u16(0x2A00),
                value: DEVICE_NAME.to_vec(),
                group_end: None,
            },
            Attribute {
                handle: 0x0004,
                kind: Uuid::from_u16(PRIMARY_SERVICE_UUID),
                value: custom.to_att_bytes(),
                group_end: Some(0x0009),
            },
            Attribute {
                handle: 0x0005,
                kind: Uuid::from_u16(CHARACTERISTIC_UUID),
                value: declaration(0x1A, CUSTOM_VALUE_HANDLE, custom),
                group_end: None,
            },
            Attribute {
                handle: CUSTOM_VALUE_HANDLE,
                kind: custom,
                value: vec![0x01],
                group_end: None,
            },
            Attribute {
                handle: 0x0007,
                kind: Uuid::from_u16(0x2902),
                value: vec![0x00, 0x00],
                group_end: None,
            },
            Attribute {
                handle: 0x0008,
                kind: Uuid::from_u16(CHARACTERISTIC_UUID),
                value: declaration(0x24, SERVICE_CHANGED_HANDLE, Uuid::from_u16(0x2A05)),
                group_end: None,
            },
            Attribute {
                handle: SERVICE_CHANGED_HANDLE,
                kind: Uuid::from_u16(0x2A05),
                value: vec![0; 4],
                group_end: None,
            },
        ];

        Self {
            attributes,
            mtu: ATT_DEFAULT_LE_MTU,
            prepared: Vec::new(),
            writes: Vec::new(),
            commands: Vec::new(),
            requests: Vec::new(),
            confirmations: 0,
            silent: false,
            hang_up_after: None,
        }
    }

    pub fn value(&self, handle: u16) -> Option<Vec<u8>> {
        self.find(handle).map(|a| a.value.clone())
    }

    fn find(&self, handle: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.handle == handle)
    }

    fn find_mut(&mut self, handle: u16) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.handle == handle)
    }

    /// Process one PDU from the client; returns the response, if any
    pub fn answer(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        let opcode = pdu[0];
        match opcode {
            ATT_WRITE_CMD => {
                if let Ok(cmd) = WriteCommand::parse(pdu) {
                    self.commands.push((cmd.handle, cmd.value));
                }
                return None;
            }
            ATT_HANDLE_VALUE_CONF => {
                self.confirmations += 1;
                return None;
            }
            _ => {}
        }

        self.requests.push(opcode);
        if self.silent {
            return None;
        }

        let result = match opcode {
            ATT_EXCHANGE_MTU_REQ => self.exchange_mtu(pdu),
            ATT_READ_REQ => self.read(pdu),
            ATT_READ_BLOB_REQ => self.read_blob(pdu),
            ATT_READ_BY_TYPE_REQ => self.read_by_type(pdu),
            ATT_READ_BY_GROUP_TYPE_REQ => self.read_by_group_type(pdu),
            ATT_WRITE_REQ => self.write(pdu),
            ATT_PREPARE_WRITE_REQ => self.prepare_write(pdu),
            ATT_EXECUTE_WRITE_REQ => self.execute_write(pdu),
            _ => Err((0x0000, AttErrorCode::RequestNotSupported)),
        };

        Some(match result {
            Ok(rsp) => rsp,
            Err((handle, code)) => ErrorResponse::new(opcode, handle, code).serialize(),
        })
    }

    fn exchange_mtu(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = ExchangeMtuRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        self.mtu = req.client_mtu.min(SERVER_MTU).max(ATT_DEFAULT_LE_MTU);
        Ok(ExchangeMtuResponse {
            server_mtu: SERVER_MTU,
        }
        .serialize())
    }

    fn read(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = ReadRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        let room = self.mtu as usize - 1;
        let attr = self
            .find(req.handle)
            .ok_or((req.handle, AttErrorCode::InvalidHandle))?;
        let value = attr.value[..attr.value.len().min(room)].to_vec();
        Ok(ReadResponse { value }.serialize())
    }

    fn read_blob(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = ReadBlobRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        let room = self.mtu as usize - 1;
        let attr = self
            .find(req.handle)
            .ok_or((req.handle, AttErrorCode::InvalidHandle))?;
        let offset = req.offset as usize;
        if offset > attr.value.len() {
            return Err((req.handle, AttErrorCode::InvalidOffset));
        }
        let rest = &attr.value[offset..];
        let value = rest[..rest.len().min(room)].to_vec();
        Ok(ReadBlobResponse { value }.serialize())
    }

    fn read_by_type(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = ReadByTypeRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        let max_value = self.mtu as usize - 4;

        let mut data: Vec<HandleValue> = Vec::new();
        let mut used = 2;
        for attr in self.attributes.iter().filter(|a| {
            a.handle >= req.start_handle && a.handle <= req.end_handle && a.kind == req.attribute_type
        }) {
            let value = attr.value[..attr.value.len().min(max_value)].to_vec();
            if let Some(first) = data.first() {
                if first.value.len() != value.len() || used + 2 + value.len() > self.mtu as usize {
                    break;
                }
            }
            used += 2 + value.len();
            data.push(HandleValue {
                handle: attr.handle,
                value,
            });
        }

        match data.first() {
            Some(first) => Ok(ReadByTypeResponse {
                length: (first.value.len() + 2) as u8,
                data,
            }
            .serialize()),
            None => Err((req.start_handle, AttErrorCode::AttributeNotFound)),
        }
    }

    fn read_by_group_type(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = ReadByGroupTypeRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        if req.group_type != PRIMARY_SERVICE_UUID {
            return Err((req.start_handle, AttErrorCode::UnsupportedGroupType));
        }

        let mut data: Vec<AttributeData> = Vec::new();
        let mut used = 2;
        for attr in self.attributes.iter().filter(|a| {
            a.handle >= req.start_handle && a.handle <= req.end_handle && a.group_end.is_some()
        }) {
            if let Some(first) = data.first() {
                if first.value.len() != attr.value.len()
                    || used + 4 + attr.value.len() > self.mtu as usize
                {
                    break;
                }
            }
            used += 4 + attr.value.len();
            data.push(AttributeData {
                handle: attr.handle,
                end_group_handle: attr.group_end.unwrap_or(attr.handle),
                value: attr.value.clone(),
            });
        }

        match data.first() {
            Some(first) => Ok(ReadByGroupTypeResponse {
                length: (first.value.len() + 4) as u8,
                data,
            }
            .serialize()),
            None => Err((req.start_handle, AttErrorCode::AttributeNotFound)),
        }
    }

    fn write(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = WriteRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        let attr = self
            .find_mut(req.handle)
            .ok_or((req.handle, AttErrorCode::InvalidHandle))?;
        if attr.is_declaration() {
            return Err((req.handle, AttErrorCode::WriteNotPermitted));
        }
        attr.value = req.value.clone();
        self.writes.push((req.handle, req.value));
        Ok(WriteResponse.serialize())
    }

    fn prepare_write(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = PrepareWriteRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        let attr = self
            .find(req.handle)
            .ok_or((req.handle, AttErrorCode::InvalidHandle))?;
        if attr.is_declaration() {
            return Err((req.handle, AttErrorCode::WriteNotPermitted));
        }
        self.prepared.push((req.handle, req.offset, req.value.clone()));
        Ok(PrepareWriteResponse {
            handle: req.handle,
            offset: req.offset,
            value: req.value,
        }
        .serialize())
    }

    fn execute_write(&mut self, pdu: &[u8]) -> Result<Vec<u8>, (u16, AttErrorCode)> {
        let req = ExecuteWriteRequest::parse(pdu).map_err(|_| (0, AttErrorCode::InvalidPdu))?;
        let prepared = std::mem::take(&mut self.prepared);
        if req.flags == ATT_EXEC_WRITE_COMMIT {
            let mut written: Vec<(u16, Vec<u8>)> = Vec::new();
            for (handle, offset, part) in prepared {
                let attr = self
                    .find_mut(handle)
                    .ok_or((handle, AttErrorCode::InvalidHandle))?;
                let offset = offset as usize;
                if offset == 0 {
                    attr.value.clear();
                }
                if offset > attr.value.len() {
                    return Err((handle, AttErrorCode::InvalidOffset));
                }
                attr.value.truncate(offset);
                attr.value.extend_from_slice(&part);
                match written.iter_mut().find(|(h, _)| *h == handle) {
                    Some(entry) => entry.1 = attr.value.clone(),
                    None => written.push((handle, attr.value.clone())),
                }
            }
            self.writes.extend(written);
        }
        Ok(ExecuteWriteResponse.serialize())
    }
}

/// Bearer that hands PDUs to the peer and posts its answers back
struct PeerBearer {
    peer: Arc<Mutex<MemoryPeer>>,
    reactor: Reactor,
    attrib: OnceLock<Weak<Attrib>>,
    hangup: Arc<Mutex<Option<HangupCallback>>>,
}

impl PeerBearer {
    fn deliver(&self, pdu: Vec<u8>) {
        if let Some(attrib) = self.attrib.get().cloned() {
            self.reactor.post(move || {
                if let Some(attrib) = attrib.upgrade() {
                    attrib.handle_pdu(&pdu);
                }
            });
        }
    }
}

impl Bearer for PeerBearer {
    fn send(&self, pdu: &[u8]) -> io::Result<()> {
        let (answer, hang_up) = {
            let mut peer = self.peer.lock().unwrap();
            let answer = peer.answer(pdu);
            let hang_up = answer.is_some() && peer.hang_up_after == Some(pdu[0]);
            if hang_up {
                peer.hang_up_after = None;
            }
            (answer, hang_up)
        };
        if let Some(rsp) = answer {
            self.deliver(rsp);
        }
        // Queued behind the answer, so the client handles the response first
        if hang_up {
            if let Some(hangup) = self.hangup.lock().unwrap().take() {
                self.reactor.post(hangup);
            }
        }
        Ok(())
    }

    fn shutdown(&self) {}
}

struct LoopbackChannel {
    peer: Arc<Mutex<MemoryPeer>>,
    reactor: Reactor,
    bearer: Mutex<Option<Arc<PeerBearer>>>,
    hangup: Arc<Mutex<Option<HangupCallback>>>,
}

impl Channel for LoopbackChannel {
    fn imtu(&self) -> u16 {
        ATT_DEFAULT_LE_MTU
    }

    fn cid(&self) -> u16 {
        ATT_CID
    }

    fn hci_handle(&self) -> io::Result<u16> {
        Ok(0x0040)
    }

    fn attach(&self, mtu: u16, events: EventHandler) -> TransportResult<Arc<dyn Transport>> {
        let bearer = Arc::new(PeerBearer {
            peer: self.peer.clone(),
            reactor: self.reactor.clone(),
            attrib: OnceLock::new(),
            hangup: self.hangup.clone(),
        });
        let attrib = Attrib::new(bearer.clone(), mtu);
        attrib.register_events(events);
        let _ = bearer.attrib.set(Arc::downgrade(&attrib));
        *self.bearer.lock().unwrap() = Some(bearer);
        Ok(Arc::new(AttribTransport::new(attrib)))
    }

    fn shutdown(&self) {
        self.bearer.lock().unwrap().take();
    }
}

/// Adapter producing loopback channels to one [`MemoryPeer`]
pub struct Loopback {
    pub peer: Arc<Mutex<MemoryPeer>>,
    reactor: Reactor,
    channel: Mutex<Option<Arc<LoopbackChannel>>>,
    hangup: Arc<Mutex<Option<HangupCallback>>>,
    pub updates: Mutex<Vec<u16>>,
}

impl Loopback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peer: Arc::new(Mutex::new(MemoryPeer::new())),
            reactor: Reactor::global().unwrap(),
            channel: Mutex::new(None),
            hangup: Arc::new(Mutex::new(None)),
            updates: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, pdu: Vec<u8>) {
        let bearer = self
            .channel
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|c| c.bearer.lock().unwrap().clone());
        bearer.expect("no attached channel").deliver(pdu);
    }

    /// Peer sends a Handle Value Notification
    pub fn notify(&self, handle: u16, value: &[u8]) {
        self.push(
            HandleValueNotification {
                handle,
                value: value.to_vec(),
            }
            .serialize(),
        );
    }

    /// Peer sends a Handle Value Indication
    pub fn indicate(&self, handle: u16, value: &[u8]) {
        self.push(
            HandleValueIndication {
                handle,
                value: value.to_vec(),
            }
            .serialize(),
        );
    }

    /// Peer drops the link
    pub fn hang_up(&self) {
        if let Some(hangup) = self.hangup.lock().unwrap().take() {
            self.reactor.post(hangup);
        }
    }
}

impl Adapter for Loopback {
    fn connect(
        &self,
        _request: &ConnectRequest,
        on_connect: ConnectCallback,
        on_hangup: HangupCallback,
    ) -> TransportResult<Arc<dyn Channel>> {
        let channel = Arc::new(LoopbackChannel {
            peer: self.peer.clone(),
            reactor: self.reactor.clone(),
            bearer: Mutex::new(None),
            hangup: self.hangup.clone(),
        });
        *self.channel.lock().unwrap() = Some(channel.clone());
        *self.hangup.lock().unwrap() = Some(on_hangup);

        let ready: Arc<dyn Channel> = channel.clone();
        self.reactor.post(move || on_connect(Ok(ready)));
        Ok(channel)
    }

    fn update_connection(
        &self,
        hci_handle: u16,
        _params: &ConnectionParameters,
    ) -> Result<(), HciError> {
        self.updates.lock().unwrap().push(hci_handle);
        Ok(())
    }
}

#[derive(Default)]
pub struct Recorder {
    pub notifications: Mutex<Vec<(u16, Vec<u8>)>>,
    pub indications: Mutex<Vec<(u16, Vec<u8>)>>,
}

impl GattEventHandler for Recorder {
    fn on_notification(&self, handle: u16, value: &[u8]) {
        self.notifications.lock().unwrap().push((handle, value.to_vec()));
    }

    fn on_indication(&self, handle: u16, value: &[u8]) {
        self.indications.lock().unwrap().push((handle, value.to_vec()));
    }
}

pub struct Setup {
    pub requester: Arc<GattRequester>,
    pub loopback: Arc<Loopback>,
    pub recorder: Arc<Recorder>,
}

pub fn setup(config: RequesterConfig) -> Setup {
    let _ = env_logger::builder().is_test(true).try_init();

    let loopback = Loopback::new();
    let recorder = Arc::new(Recorder::default());
    let peer = PeerAddress::new("C0:FF:EE:00:00:01".parse().unwrap(), AddressType::Random);
    let requester = GattRequester::with_adapter(peer, config, loopback.clone(), recorder.clone());

    Setup {
        requester,
        loopback,
        recorder,
    }
}

/// A requester connected to a fresh peer
pub fn connected() -> Setup {
    let setup = setup(RequesterConfig::default());
    setup
        .requester
        .connect(ConnectOptions {
            wait: true,
            ..Default::default()
        })
        .unwrap();
    setup
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
