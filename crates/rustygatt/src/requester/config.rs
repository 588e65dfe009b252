//! Requester configuration

use crate::gap::AddressType;
use crate::l2cap::SecurityLevel;
use std::time::Duration;

/// LE Connection Update parameters applied once a link is up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// Minimum connection interval, in units of 1.25 ms
    pub min_interval: u16,
    /// Maximum connection interval, in units of 1.25 ms
    pub max_interval: u16,
    /// Peripheral latency, in connection events
    pub latency: u16,
    /// Supervision timeout, in units of 10 ms
    pub supervision_timeout: u16,
    /// Minimum connection event length, in units of 0.625 ms
    pub min_ce_length: u16,
    /// Maximum connection event length, in units of 0.625 ms
    pub max_ce_length: u16,
    /// How long to wait for the controller to accept the command
    pub command_timeout: Duration,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            min_interval: 24,
            max_interval: 40,
            latency: 0,
            supervision_timeout: 700,
            min_ce_length: 1,
            max_ce_length: 1,
            command_timeout: Duration::from_millis(25_000),
        }
    }
}

/// Settings for a [`GattRequester`](super::GattRequester)
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Local adapter name, `hciN`
    pub device: String,
    /// Address type of the peer
    pub address_type: AddressType,
    /// Security level requested on connect
    pub security_level: SecurityLevel,
    /// Dynamic PSM, 0 for the fixed ATT channel
    pub psm: u16,
    /// Incoming MTU hint for the channel, 0 for the kernel default
    pub mtu: u16,
    /// Budget for a single request
    pub request_timeout: Duration,
    /// Budget for the channel to become ready
    pub channel_timeout: Duration,
    /// Discovery waits this many request budgets
    pub discovery_timeout_factor: u32,
    /// Link tuning applied on first use of a connection
    pub connection_parameters: ConnectionParameters,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            device: "hci0".to_string(),
            address_type: AddressType::Public,
            security_level: SecurityLevel::Low,
            psm: 0,
            mtu: 0,
            request_timeout: Duration::from_secs(15),
            channel_timeout: Duration::from_secs(15),
            discovery_timeout_factor: 5,
            connection_parameters: ConnectionParameters::default(),
        }
    }
}

impl RequesterConfig {
    /// Timeout used by service and characteristic discovery
    pub fn discovery_timeout(&self) -> Duration {
        self.request_timeout * self.discovery_timeout_factor
    }
}

/// Per-call options for [`GattRequester::connect`](super::GattRequester::connect)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Block until the channel is ready (or failed)
    pub wait: bool,
    /// Address type for this attempt, overriding the configured one
    pub channel_type: Option<AddressType>,
    pub security_level: SecurityLevel,
    pub psm: u16,
    pub mtu: u16,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            wait: false,
            channel_type: None,
            security_level: SecurityLevel::Low,
            psm: 0,
            mtu: 0,
        }
    }
}

impl From<&RequesterConfig> for ConnectOptions {
    fn from(config: &RequesterConfig) -> Self {
        Self {
            wait: false,
            channel_type: Some(config.address_type),
            security_level: config.security_level,
            psm: config.psm,
            mtu: config.mtu,
        }
    }
}
