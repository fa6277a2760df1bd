//! Relay control-plane state
//!
//! The session tables that tie TCP socket pairs to tunnel routing keys, and
//! the per-peer liveness counter driven by heartbeats. Shared by the server
//! (keyed per peer by public client address) and the client (keyed by the
//! remote client address a relay frame carries).

pub mod liveness;
pub mod session;

pub use liveness::Liveness;
pub use session::{Session, SessionTable};
