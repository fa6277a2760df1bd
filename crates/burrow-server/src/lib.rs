//! Relay server
//!
//! The public side of the tunnel. Accepts authenticated peers on the tunnel
//! port, opens one public TCP listener per registered peer on the port the
//! peer's identity declares, and relays bytes between public clients and the
//! peer in both directions. Peer lifetime is tied to heartbeats: a peer that
//! goes quiet loses its listener and sessions.

pub mod config;
pub mod error;
pub mod listener;
pub mod registry;
pub mod server;

pub use config::{HeartbeatConfig, ServerConfig};
pub use error::ServerError;
pub use registry::{PeerRecord, PeerRegistry};
pub use server::RelayServer;
