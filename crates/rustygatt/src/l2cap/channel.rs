//! L2CAP channel driven by the reactor
//!
//! An [`L2capChannel`] owns a connecting [`L2capSocket`] and registers it
//! with the [`Reactor`]. The first writability event settles the connect;
//! after that every readable packet is fed to the ATT bearer attached to the
//! channel, and a hang-up is reported exactly once.

use super::socket::L2capSocket;
use super::types::ChannelInfo;
use crate::att::{ATT_CID, ATT_DEFAULT_LE_MTU, ATT_MAX_MTU};
use crate::gatt::{Attrib, AttribTransport};
use crate::reactor::{Interest, Reactor, Readiness, SourceId};
use crate::transport::{
    Channel, ConnectCallback, EventHandler, HangupCallback, Transport, TransportError,
    TransportResult,
};
use log::{debug, info, warn};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Default)]
struct ChannelState {
    source: Option<SourceId>,
    info: Option<ChannelInfo>,
    attrib: Option<Arc<Attrib>>,
    on_connect: Option<ConnectCallback>,
    on_hangup: Option<HangupCallback>,
    closed: bool,
}

/// One connection-oriented channel to a peer
pub struct L2capChannel {
    me: Weak<L2capChannel>,
    socket: Arc<L2capSocket>,
    reactor: Reactor,
    state: Mutex<ChannelState>,
}

impl L2capChannel {
    /// Wrap a socket whose connect is in progress and start watching it.
    /// `on_connect` and `on_hangup` run on the reactor thread.
    pub fn start(
        socket: L2capSocket,
        reactor: Reactor,
        on_connect: ConnectCallback,
        on_hangup: HangupCallback,
    ) -> Arc<Self> {
        let channel = Arc::new_cyclic(|me| L2capChannel {
            me: me.clone(),
            socket: Arc::new(socket),
            reactor,
            state: Mutex::new(ChannelState {
                on_connect: Some(on_connect),
                on_hangup: Some(on_hangup),
                ..Default::default()
            }),
        });

        let weak = Arc::downgrade(&channel);
        let fd = channel.socket.as_raw_fd();
        let source = channel
            .reactor
            .register(fd, Interest::Writable, move |readiness| match weak.upgrade() {
                Some(channel) => channel.on_ready(readiness),
                None => None,
            });
        channel.lock().source = Some(source);

        channel
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_ready(&self, readiness: Readiness) -> Option<Interest> {
        let on_connect = self.lock().on_connect.take();
        match on_connect {
            Some(on_connect) => self.settle_connect(readiness, on_connect),
            None => self.on_traffic(readiness),
        }
    }

    fn settle_connect(&self, readiness: Readiness, on_connect: ConnectCallback) -> Option<Interest> {
        let outcome = self
            .socket
            .take_error()
            .and_then(|_| {
                if readiness.contains(Readiness::WRITABLE) {
                    self.socket.info()
                } else {
                    Err(io::Error::from(io::ErrorKind::ConnectionAborted))
                }
            });

        match outcome {
            Ok(info) => {
                debug!(
                    "L2CAP channel up: cid {} imtu {} omtu {}",
                    info.cid, info.imtu, info.omtu
                );
                self.lock().info = Some(info);
                match self.me.upgrade() {
                    Some(me) => {
                        let channel: Arc<dyn Channel> = me;
                        on_connect(Ok(channel));
                        Some(Interest::Readable)
                    }
                    None => None,
                }
            }
            Err(e) => {
                warn!("L2CAP connect failed: {}", e);
                {
                    let mut state = self.lock();
                    state.source = None;
                    state.on_hangup = None;
                }
                on_connect(Err(TransportError::Io(e)));
                None
            }
        }
    }

    fn on_traffic(&self, readiness: Readiness) -> Option<Interest> {
        if readiness.contains(Readiness::READABLE) {
            let attrib = self.lock().attrib.clone();
            let mut buf = vec![0u8; ATT_MAX_MTU as usize + 1];
            loop {
                match self.socket.recv(&mut buf) {
                    Ok(Some(n)) => match &attrib {
                        Some(attrib) => attrib.handle_pdu(&buf[..n]),
                        None => debug!("Dropping {} bytes received before attach", n),
                    },
                    Ok(None) => return self.hang_up(),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("L2CAP receive failed: {}", e);
                        return self.hang_up();
                    }
                }
            }
        }

        if readiness.intersects(Readiness::HANGUP | Readiness::ERROR) {
            return self.hang_up();
        }
        Some(Interest::Readable)
    }

    fn hang_up(&self) -> Option<Interest> {
        let on_hangup = {
            let mut state = self.lock();
            state.source = None;
            if state.closed {
                None
            } else {
                state.on_hangup.take()
            }
        };
        if let Some(on_hangup) = on_hangup {
            info!("L2CAP channel hung up");
            on_hangup();
        }
        None
    }

    fn info(&self) -> Option<ChannelInfo> {
        self.lock().info
    }
}

impl Channel for L2capChannel {
    fn imtu(&self) -> u16 {
        self.info().map(|i| i.imtu).unwrap_or(ATT_DEFAULT_LE_MTU)
    }

    fn cid(&self) -> u16 {
        self.info().map(|i| i.cid).unwrap_or(ATT_CID)
    }

    fn hci_handle(&self) -> io::Result<u16> {
        self.socket.hci_handle()
    }

    fn attach(&self, mtu: u16, events: EventHandler) -> TransportResult<Arc<dyn Transport>> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.attrib.is_some() {
            return Err(TransportError::Failed("Channel already attached".into()));
        }

        let attrib = Attrib::new(self.socket.clone(), mtu);
        attrib.register_events(events);
        state.attrib = Some(attrib.clone());
        Ok(Arc::new(AttribTransport::new(attrib)))
    }

    fn shutdown(&self) {
        let (source, attrib) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.on_connect = None;
            state.on_hangup = None;
            (state.source.take(), state.attrib.take())
        };

        debug!("Closing L2CAP channel");
        if let Some(source) = source {
            self.reactor.deregister(source);
        }
        match attrib {
            Some(attrib) => attrib.shutdown(),
            None => self.socket.shutdown(),
        }
    }
}

impl Drop for L2capChannel {
    fn drop(&mut self) {
        let source = self.state.get_mut().unwrap_or_else(PoisonError::into_inner).source.take();
        if let Some(source) = source {
            self.reactor.deregister(source);
        }
    }
}
