//! Tunnel Protocol Definitions
//!
//! This crate defines the command codec and multipart wire framing carried
//! on the authenticated tunnel between the relay server and its peers.

pub mod frame;
pub mod wire;

pub use frame::{CodecError, Command, TunnelFrame};
pub use wire::{decode_parts, encode_parts};

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum encoded size of one tunnel message (16MB)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;
