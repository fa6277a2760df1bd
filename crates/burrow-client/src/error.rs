//! Client errors

use thiserror::Error;

/// Relay client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] burrow_transport::TransportError),

    #[error(transparent)]
    KeyStore(#[from] burrow_keys::KeyStoreError),
}
