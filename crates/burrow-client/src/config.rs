//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One forwarded service: where the origin listens locally and which public
/// port the relay server should open for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Origin service address.
    pub addr: String,
    /// Origin service port.
    pub port: u16,
    /// Public port the server binds on this tunnel's behalf. Also part of
    /// the peer identity, so it must be unique per server.
    pub bind_port: u16,
}

fn default_server_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    7011
}

fn default_bufsize() -> usize {
    65536
}

fn default_heartbeat_interval() -> u64 {
    10
}

/// Relay client configuration for a single `(server, service)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay server tunnel address.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Relay server tunnel port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// TCP read chunk size for origin pumps.
    #[serde(default = "default_bufsize")]
    pub bufsize: usize,
    /// Seconds between heartbeats.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    pub service: ServiceConfig,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>, server_port: u16, service: ServiceConfig) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_port,
            bufsize: default_bufsize(),
            heartbeat_interval: default_heartbeat_interval(),
            service,
        }
    }

    pub fn heartbeat_interval_duration(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }
}
