//! Dialer role: the client end of the tunnel.
//!
//! Sets its own peer identity before connecting, performs the handshake
//! against the pinned server key, and ships the identity as the first
//! encrypted record. The returned connection is backed by a reader task and
//! a writer task, so sends are serialized and receives are cancellation-safe
//! in a `select!`.

use std::sync::Arc;

use burrow_crypto::{IdentityKeyPair, PublicKeyBytes};
use burrow_proto::{decode_parts, encode_parts};
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::record::{client_handshake, read_record, write_record};
use crate::CHANNEL_DEPTH;

/// Dials the relay server's tunnel port.
pub struct TunnelDialer {
    server_addr: String,
    server_port: u16,
    identity: Bytes,
    keypair: Arc<IdentityKeyPair>,
    server_key: PublicKeyBytes,
}

impl TunnelDialer {
    pub fn new(
        server_addr: impl Into<String>,
        server_port: u16,
        identity: Bytes,
        keypair: IdentityKeyPair,
        server_key: PublicKeyBytes,
    ) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_port,
            identity,
            keypair: Arc::new(keypair),
            server_key,
        }
    }

    pub fn identity(&self) -> &Bytes {
        &self.identity
    }

    /// Establish one authenticated tunnel connection.
    ///
    /// Reconnection policy belongs to the caller: the relay client retries
    /// with backoff and keeps its origin sessions across attempts.
    pub async fn connect(&self) -> Result<TunnelConnection, TransportError> {
        let mut stream =
            TcpStream::connect((self.server_addr.as_str(), self.server_port)).await?;
        stream.set_nodelay(true)?;

        let keys = client_handshake(&mut stream, &self.keypair, &self.server_key).await?;

        // Identity first, before any application message, so the acceptor
        // can route everything that follows.
        write_record(&mut stream, &keys.send, &self.identity).await?;

        let (mut read_half, mut write_half) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<Bytes>>(CHANNEL_DEPTH);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<Bytes>>(CHANNEL_DEPTH);

        let send_cipher = keys.send;
        let writer_task = tokio::spawn(async move {
            while let Some(parts) = outbound_rx.recv().await {
                let plaintext = match encode_parts(&parts) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        warn!(error = %e, "Dropping unencodable outbound message");
                        continue;
                    }
                };
                if let Err(e) = write_record(&mut write_half, &send_cipher, &plaintext).await {
                    debug!(error = %e, "Tunnel write failed");
                    break;
                }
            }
        });

        let recv_cipher = keys.recv;
        let reader_task = tokio::spawn(async move {
            loop {
                let plaintext = match read_record(&mut read_half, &recv_cipher).await {
                    Ok(plaintext) => plaintext,
                    Err(TransportError::ConnectionClosed) => break,
                    Err(e) => {
                        debug!(error = %e, "Tunnel read failed");
                        break;
                    }
                };
                let parts = match decode_parts(Bytes::from(plaintext)) {
                    Ok(parts) => parts,
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable inbound message");
                        continue;
                    }
                };
                if inbound_tx.send(parts).await.is_err() {
                    break;
                }
            }
        });

        Ok(TunnelConnection {
            inbound: inbound_rx,
            outbound: outbound_tx,
            reader_task,
            writer_task,
        })
    }
}

/// One live tunnel connection.
pub struct TunnelConnection {
    inbound: mpsc::Receiver<Vec<Bytes>>,
    outbound: mpsc::Sender<Vec<Bytes>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl TunnelConnection {
    /// Next inbound message; `None` when the connection is gone.
    /// Cancellation-safe.
    pub async fn recv(&mut self) -> Option<Vec<Bytes>> {
        self.inbound.recv().await
    }

    /// Queue an outbound message.
    pub async fn send(&self, parts: Vec<Bytes>) -> Result<(), TransportError> {
        self.outbound
            .send(parts)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Cloneable sender for pumps that outlive this borrow.
    pub fn sender(&self) -> TunnelSender {
        TunnelSender {
            outbound: self.outbound.clone(),
        }
    }
}

impl Drop for TunnelConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// Cloneable sending half of a tunnel connection.
#[derive(Clone)]
pub struct TunnelSender {
    outbound: mpsc::Sender<Vec<Bytes>>,
}

impl TunnelSender {
    pub async fn send(&self, parts: Vec<Bytes>) -> Result<(), TransportError> {
        self.outbound
            .send(parts)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}
