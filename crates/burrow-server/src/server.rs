//! Relay server: tunnel dispatch, peer registration, liveness.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use burrow_control::{Liveness, SessionTable};
use burrow_keys::KeyStore;
use burrow_proto::TunnelFrame;
use burrow_transport::{AcceptorHandle, PeerId, TunnelAcceptor};
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::listener::run_public_listener;
use crate::registry::{PeerRecord, PeerRegistry};

/// The relay server. Owns the tunnel acceptor and the peer registry.
pub struct RelayServer {
    config: ServerConfig,
    acceptor: TunnelAcceptor,
    registry: PeerRegistry,
}

impl RelayServer {
    /// Load the server keypair and bind the tunnel port.
    pub async fn bind(
        config: ServerConfig,
        keystore: Arc<dyn KeyStore>,
    ) -> Result<Self, ServerError> {
        let identity = keystore.load_self()?;
        let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let acceptor = TunnelAcceptor::bind(addr, identity, keystore).await?;

        Ok(Self {
            config,
            acceptor,
            registry: PeerRegistry::new(),
        })
    }

    /// Actual tunnel address, useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Dispatch tunnel frames until the transport goes away.
    ///
    /// Every decodable frame refreshes its peer's liveness; the first frame
    /// from an unknown peer triggers registration. Malformed frames are
    /// logged and dropped without costing the peer anything.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let tunnel = self.acceptor.handle();

        while let Some((peer, parts)) = self.acceptor.recv().await {
            let frame = match TunnelFrame::decode(&parts) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        peer = %String::from_utf8_lossy(&peer),
                        error = %e,
                        "Malformed frame from peer"
                    );
                    continue;
                }
            };

            if !self.registry.touch(&peer) && self.registry.begin_registration(&peer) {
                tokio::spawn(register_peer(
                    peer.clone(),
                    self.registry.clone(),
                    tunnel.clone(),
                    self.config.clone(),
                ));
            }

            match frame {
                TunnelFrame::Relay {
                    client_addr,
                    payload,
                } => {
                    let outbound = self.registry.session_outbound(&peer, &client_addr);
                    match outbound {
                        Some(tx) => {
                            if tx.send(payload).await.is_err() {
                                // Session closed while the payload was in
                                // flight; the tunnel may race teardown.
                                debug!(
                                    client = %String::from_utf8_lossy(&client_addr),
                                    "Dropping relay for closed session"
                                );
                            }
                        }
                        None => {
                            debug!(
                                peer = %String::from_utf8_lossy(&peer),
                                client = %String::from_utf8_lossy(&client_addr),
                                "Dropping relay for unknown session"
                            );
                        }
                    }
                }
                TunnelFrame::Heartbeat => {}
                // Reserved commands: parsed and ignored.
                TunnelFrame::Logon | TunnelFrame::Logout => {}
                TunnelFrame::Exception { message } => {
                    warn!(
                        peer = %String::from_utf8_lossy(&peer),
                        "Unexpected exception frame from peer: {message}"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Bind the peer's public listener and install its record.
///
/// On bind failure the peer gets an `EXCEPTION` carrying the OS error and
/// no record is created, so its next frame retries the bind.
async fn register_peer(
    peer: PeerId,
    registry: PeerRegistry,
    tunnel: AcceptorHandle,
    config: ServerConfig,
) {
    let result = bind_for_peer(&peer).await;
    match result {
        Err(reason) => {
            error!(
                peer = %String::from_utf8_lossy(&peer),
                error = %reason,
                "Cannot open public listener for peer"
            );
            tunnel
                .send(&peer, TunnelFrame::exception(reason).encode())
                .await;
        }
        Ok((listener, bind_port)) => {
            let endpoint = String::from_utf8_lossy(&peer).into_owned();
            info!(peer = %endpoint, port = bind_port, "Tunnel endpoint connected, listening");

            let liveness = Liveness::new(config.heartbeat.liveness);
            let sessions: SessionTable<Bytes> = SessionTable::new();

            let listener_task = tokio::spawn(run_public_listener(
                listener,
                peer.clone(),
                sessions.clone(),
                tunnel.clone(),
                config.bufsize,
                config.max_sessions_per_peer,
            ));
            let watcher_task = tokio::spawn(liveness_watcher(
                peer.clone(),
                registry.clone(),
                config.heartbeat.interval_duration(),
            ));

            registry.insert(
                peer.clone(),
                PeerRecord::new(bind_port, liveness, sessions, listener_task, watcher_task),
            );
        }
    }
    registry.end_registration(&peer);
}

/// Parse `"<host>:<port>"` out of the peer identity and bind the public
/// port. The identity is otherwise opaque; only the trailing port matters
/// here.
async fn bind_for_peer(peer: &PeerId) -> Result<(tokio::net::TcpListener, u16), String> {
    let identity = std::str::from_utf8(peer).map_err(|_| "peer identity is not UTF-8".to_string())?;
    let port: u16 = identity
        .rsplit_once(':')
        .ok_or_else(|| format!("peer identity {identity:?} has no bind port"))?
        .1
        .parse()
        .map_err(|_| format!("peer identity {identity:?} has a malformed bind port"))?;

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| e.to_string())?;
    let bound = listener.local_addr().map_err(|e| e.to_string())?.port();
    Ok((listener, bound))
}

/// Decrement the peer's liveness once per interval; at zero, tear the peer
/// down: listener closed, sessions drained, record removed.
async fn liveness_watcher(peer: PeerId, registry: PeerRegistry, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let remaining = match registry.tick(&peer) {
            Some(remaining) => remaining,
            None => break,
        };
        if remaining <= 0 {
            error!(
                peer = %String::from_utf8_lossy(&peer),
                "Connection from peer timed out, closing service"
            );
            registry.remove(&peer);
            break;
        }
    }
}
