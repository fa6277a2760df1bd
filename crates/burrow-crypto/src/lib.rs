//! Crypto primitives for the burrow tunnel
//!
//! Long-term X25519 identity keypairs, the handshake key schedule, and the
//! ChaCha20-Poly1305 record cipher that protects every tunnel message after
//! the handshake.

pub mod cipher;
pub mod error;
pub mod handshake;
pub mod identity;

pub use cipher::{RecordCipher, NONCE_SIZE};
pub use error::CryptoError;
pub use handshake::{ClientHandshake, ServerHandshake, TransportKeys};
pub use identity::{fingerprint_of, keys_equal, IdentityKeyPair, PublicKeyBytes, KEY_SIZE};
