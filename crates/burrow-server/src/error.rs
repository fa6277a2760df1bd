//! Server errors

use thiserror::Error;

/// Relay server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] burrow_transport::TransportError),

    #[error(transparent)]
    KeyStore(#[from] burrow_keys::KeyStoreError),
}
