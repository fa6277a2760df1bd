//! Server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat and liveness tuning, shared vocabulary with the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between liveness ticks (and client heartbeats).
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Missed intervals before a peer is evicted.
    #[serde(default = "default_liveness")]
    pub liveness: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            liveness: default_liveness(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

fn default_interval() -> u64 {
    10
}

fn default_liveness() -> u32 {
    5
}

fn default_bufsize() -> usize {
    65536
}

fn default_max_sessions() -> usize {
    1024
}

/// Relay server configuration. The tunnel port is the one required field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Tunnel listener port.
    pub port: u16,
    /// TCP read chunk size for public client pumps.
    #[serde(default = "default_bufsize")]
    pub bufsize: usize,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Cap on concurrent sessions per peer; accepts beyond it are refused.
    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_peer: usize,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bufsize: default_bufsize(),
            heartbeat: HeartbeatConfig::default(),
            max_sessions_per_peer: default_max_sessions(),
        }
    }
}
