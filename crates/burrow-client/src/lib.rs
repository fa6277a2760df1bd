//! Relay client
//!
//! The origin side of the tunnel. Dials the relay server once per configured
//! service, heartbeats while connected, and for every public client the
//! server relays, opens one TCP connection to the local origin service and
//! pumps bytes both ways. Origin sessions survive tunnel reconnects.

pub mod client;
pub mod config;
pub mod error;

pub use client::RelayClient;
pub use config::{ClientConfig, ServiceConfig};
pub use error::ClientError;
