//! Connection state machine

use crate::error::{Error, Result};
use std::fmt;

/// Lifecycle of a requester's link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt failed; `disconnect` clears it
    Error,
}

/// Inputs to [`ConnectionState::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A caller asked to connect
    Connect,
    /// The transport reported the channel ready
    Established,
    /// The transport reported the attempt failed
    Failed,
    /// A caller or the peer tore the link down
    Disconnect,
}

impl ConnectionState {
    /// The single transition table for a link
    pub fn apply(self, event: LinkEvent) -> Result<ConnectionState> {
        match (self, event) {
            (ConnectionState::Disconnected, LinkEvent::Connect) => Ok(ConnectionState::Connecting),
            (ConnectionState::Connecting, LinkEvent::Established) => {
                Ok(ConnectionState::Connected)
            }
            (ConnectionState::Connecting, LinkEvent::Failed) => Ok(ConnectionState::Error),
            (_, LinkEvent::Disconnect) => Ok(ConnectionState::Disconnected),
            (_, LinkEvent::Connect) => {
                Err(Error::State("Already connecting or connected".into()))
            }
            (state, event) => Err(Error::State(format!(
                "Invalid transition {:?} while {}",
                event, state
            ))),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(text)
    }
}
