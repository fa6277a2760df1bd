//! Authenticated tunnel transport
//!
//! A reliable, message-oriented channel over TCP. The acceptor side admits
//! many peers, each identified by a self-declared identity delivered in its
//! first encrypted record; every inbound message is tagged with that
//! identity, and outbound messages are addressed by it. All records after
//! the X25519 handshake are ChaCha20-Poly1305 sealed, and the acceptor
//! consults the key store's authorizer before a peer's hello is answered.
//!
//! Messages are opaque multipart part-lists; the command codec lives in
//! `burrow-proto` and is the relay layers' business.

pub mod acceptor;
pub mod dialer;
pub mod error;
mod record;

pub use acceptor::{AcceptorHandle, PeerId, TunnelAcceptor};
pub use dialer::{TunnelConnection, TunnelDialer, TunnelSender};
pub use error::TransportError;

use std::time::Duration;

/// How long an accepted connection may take to finish its handshake.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue depth for inbound and per-peer outbound message channels.
pub(crate) const CHANNEL_DEPTH: usize = 256;

/// Longest peer identity the acceptor will accept.
pub(crate) const MAX_IDENTITY_LEN: usize = 256;
