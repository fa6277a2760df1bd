//! Transport errors

use thiserror::Error;

/// Tunnel transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("oversized record: {0} bytes")]
    OversizedRecord(usize),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] burrow_crypto::CryptoError),

    #[error(transparent)]
    Codec(#[from] burrow_proto::CodecError),
}
