//! Acceptor role: the server end of the tunnel.
//!
//! Binds the tunnel port once and admits many peers. Each connection gets a
//! handshake (gated by the key store's authorizer), then a reader task that
//! tags every inbound message with the peer's identity and a writer task
//! that drains the peer's outbound queue. A peer that reconnects under the
//! same identity takes over the routing entry; the stale connection dies on
//! its own socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burrow_crypto::{fingerprint_of, IdentityKeyPair};
use burrow_keys::KeyStore;
use burrow_proto::{decode_parts, encode_parts};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::record::{read_record, server_handshake, write_record};
use crate::{CHANNEL_DEPTH, HANDSHAKE_TIMEOUT, MAX_IDENTITY_LEN};

/// Opaque peer identity, as declared by the dialer.
pub type PeerId = Bytes;

static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

struct PeerEntry {
    conn_id: u64,
    outbound: mpsc::Sender<Vec<Bytes>>,
}

/// The accepting end of the tunnel transport.
pub struct TunnelAcceptor {
    inbound: mpsc::Receiver<(PeerId, Vec<Bytes>)>,
    peers: Arc<DashMap<PeerId, PeerEntry>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TunnelAcceptor {
    /// Bind the tunnel port and start admitting peers.
    pub async fn bind(
        addr: SocketAddr,
        identity: IdentityKeyPair,
        keystore: Arc<dyn KeyStore>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Listening on tunnel port");

        let peers: Arc<DashMap<PeerId, PeerEntry>> = Arc::new(DashMap::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_DEPTH);

        let accept_peers = Arc::clone(&peers);
        let identity = Arc::new(identity);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(remote = %remote, "Tunnel connection accepted");
                        let peers = Arc::clone(&accept_peers);
                        let inbound = inbound_tx.clone();
                        let identity = Arc::clone(&identity);
                        let keystore = Arc::clone(&keystore);
                        tokio::spawn(async move {
                            if let Err(e) =
                                serve_peer(stream, remote, identity, keystore, peers, inbound)
                                    .await
                            {
                                debug!(remote = %remote, error = %e, "Tunnel connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept tunnel connection");
                    }
                }
            }
        });

        Ok(Self {
            inbound: inbound_rx,
            peers,
            local_addr,
            accept_task,
        })
    }

    /// Next inbound message, tagged with the sending peer's identity.
    /// `None` once the acceptor is gone.
    pub async fn recv(&mut self) -> Option<(PeerId, Vec<Bytes>)> {
        self.inbound.recv().await
    }

    /// A cloneable handle for addressing outbound messages by peer.
    pub fn handle(&self) -> AcceptorHandle {
        AcceptorHandle {
            peers: Arc::clone(&self.peers),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TunnelAcceptor {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Routes outbound messages to connected peers.
#[derive(Clone)]
pub struct AcceptorHandle {
    peers: Arc<DashMap<PeerId, PeerEntry>>,
}

impl AcceptorHandle {
    /// Send a message to a peer. Messages for unknown or disconnected peers
    /// are silently dropped, matching the router contract: the tunnel may
    /// legitimately carry traffic for a peer that just went away.
    pub async fn send(&self, peer: &PeerId, parts: Vec<Bytes>) {
        let outbound = match self.peers.get(peer) {
            Some(entry) => entry.outbound.clone(),
            None => {
                debug!(peer = %String::from_utf8_lossy(peer), "Dropping message for unknown peer");
                return;
            }
        };
        if outbound.send(parts).await.is_err() {
            debug!(peer = %String::from_utf8_lossy(peer), "Dropping message for disconnected peer");
        }
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }
}

async fn serve_peer(
    mut stream: TcpStream,
    remote: SocketAddr,
    identity: Arc<IdentityKeyPair>,
    keystore: Arc<dyn KeyStore>,
    peers: Arc<DashMap<PeerId, PeerEntry>>,
    inbound: mpsc::Sender<(PeerId, Vec<Bytes>)>,
) -> Result<(), TransportError> {
    let handshake = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        server_handshake(&mut stream, &identity, |key| {
            let allowed = keystore.authorize_peer(key);
            if !allowed {
                warn!(
                    remote = %remote,
                    fingerprint = %fingerprint_of(key),
                    "Rejected unauthorized peer key"
                );
            }
            allowed
        }),
    )
    .await;

    let (keys, _client_static) = match handshake {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(TransportError::HandshakeFailed(
                "handshake timed out".into(),
            ))
        }
    };

    // The first record carries the peer's self-declared identity.
    let peer_id: PeerId = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_record(&mut stream, &keys.recv),
    )
    .await
    {
        Ok(Ok(raw)) if !raw.is_empty() && raw.len() <= MAX_IDENTITY_LEN => Bytes::from(raw),
        Ok(Ok(_)) => {
            return Err(TransportError::HandshakeFailed(
                "invalid peer identity".into(),
            ))
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(TransportError::HandshakeFailed(
                "handshake timed out".into(),
            ))
        }
    };

    let conn_id = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<Bytes>>(CHANNEL_DEPTH);

    let replaced = peers
        .insert(
            peer_id.clone(),
            PeerEntry {
                conn_id,
                outbound: outbound_tx,
            },
        )
        .is_some();
    info!(
        peer = %String::from_utf8_lossy(&peer_id),
        remote = %remote,
        reconnect = replaced,
        "Tunnel peer connected"
    );

    let (mut read_half, mut write_half) = stream.into_split();

    let send_cipher = keys.send;
    let writer = tokio::spawn(async move {
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

    let result = loop {
        let plaintext = match read_record(&mut read_half, &keys.recv).await {
            Ok(plaintext) => plaintext,
            Err(e) => break Err(e),
        };
        let parts = match decode_parts(Bytes::from(plaintext)) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(
                    peer = %String::from_utf8_lossy(&peer_id),
                    error = %e,
                    "Dropping undecodable inbound message"
                );
                continue;
            }
        };
        if inbound.send((peer_id.clone(), parts)).await.is_err() {
            break Ok(());
        }
    };

    writer.abort();
    // Only clear the routing entry if it still belongs to this connection;
    // a reconnected peer has already replaced it.
    peers.remove_if(&peer_id, |_, entry| entry.conn_id == conn_id);
    info!(peer = %String::from_utf8_lossy(&peer_id), remote = %remote, "Tunnel peer disconnected");

    match result {
        Err(TransportError::ConnectionClosed) => Ok(()),
        other => other,
    }
}
