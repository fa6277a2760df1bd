//! Relay client: tunnel maintenance, origin dialing, pumps.

use std::sync::Arc;
use std::time::Duration;

use burrow_control::{Session, SessionTable};
use burrow_keys::KeyStore;
use burrow_proto::TunnelFrame;
use burrow_transport::{TunnelConnection, TunnelDialer};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Queue depth between the frame dispatcher and one origin writer.
const SESSION_QUEUE_DEPTH: usize = 64;

/// Queue depth of the shared origin-to-tunnel frame queue. Frames parked
/// here ride out a reconnect; frames already handed to a dead connection
/// are lost (at-most-once across reconnect).
const OUTBOUND_QUEUE_DEPTH: usize = 256;

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Capped exponential backoff for tunnel reconnects.
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: RECONNECT_MIN,
        }
    }

    fn reset(&mut self) {
        self.current = RECONNECT_MIN;
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(RECONNECT_MAX);
        delay
    }
}

/// One tunnel to one relay server, forwarding one origin service.
pub struct RelayClient {
    config: ClientConfig,
    keystore: Arc<dyn KeyStore>,
    sessions: SessionTable<Bytes>,
}

impl RelayClient {
    pub fn new(config: ClientConfig, keystore: Arc<dyn KeyStore>) -> Self {
        Self {
            config,
            keystore,
            sessions: SessionTable::new(),
        }
    }

    /// Peer identity on the tunnel: `"<hostname>:<bind_port>"`. The server
    /// treats it as opaque apart from the trailing bind port.
    pub fn identity(&self) -> Bytes {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Bytes::from(format!("{host}:{}", self.config.service.bind_port))
    }

    /// Keep the tunnel up forever. Origin sessions and queued outbound
    /// frames are kept across reconnects; only key material problems are
    /// fatal.
    pub async fn run(&self) -> Result<(), ClientError> {
        let keypair = self.keystore.load_self()?;
        let server_key = self.keystore.peer_public_key("server")?;
        let identity = self.identity();

        let dialer = TunnelDialer::new(
            self.config.server_addr.clone(),
            self.config.server_port,
            identity.clone(),
            keypair,
            server_key,
        );

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<TunnelFrame>(OUTBOUND_QUEUE_DEPTH);
        let mut backoff = Backoff::new();

        loop {
            match dialer.connect().await {
                Ok(conn) => {
                    info!(
                        server = %self.config.server_addr,
                        port = self.config.server_port,
                        identity = %String::from_utf8_lossy(&identity),
                        "Tunnel established"
                    );
                    backoff.reset();
                    let reason = self.serve(conn, &outbound_tx, &mut outbound_rx).await;
                    warn!(error = %reason, "Tunnel connection lost, reconnecting");
                }
                Err(e) => {
                    warn!(
                        server = %self.config.server_addr,
                        port = self.config.server_port,
                        error = %e,
                        "Tunnel connect failed"
                    );
                }
            }
            tokio::time::sleep(backoff.next()).await;
        }
    }

    /// Drive one live tunnel connection: heartbeats out, frames in, queued
    /// origin frames out. Returns the reason the connection ended.
    async fn serve(
        &self,
        mut conn: TunnelConnection,
        outbound_tx: &mpsc::Sender<TunnelFrame>,
        outbound_rx: &mut mpsc::Receiver<TunnelFrame>,
    ) -> burrow_transport::TransportError {
        use burrow_transport::TransportError;

        // First tick fires immediately, so registration on the server side
        // starts with this connection's first heartbeat.
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval_duration());

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = conn.send(TunnelFrame::Heartbeat.encode()).await {
                        return e;
                    }
                }
                frame = outbound_rx.recv() => {
                    // A sender half lives in `run`, so the queue never closes.
                    let Some(frame) = frame else {
                        return TransportError::ConnectionClosed;
                    };
                    if let Err(e) = conn.send(frame.encode()).await {
                        return e;
                    }
                }
                message = conn.recv() => {
                    let Some(parts) = message else {
                        return TransportError::ConnectionClosed;
                    };
                    match TunnelFrame::decode(&parts) {
                        Ok(frame) => self.handle_frame(frame, outbound_tx).await,
                        Err(e) => {
                            warn!(error = %e, "Malformed frame from server");
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, frame: TunnelFrame, outbound_tx: &mpsc::Sender<TunnelFrame>) {
        match frame {
            TunnelFrame::Relay {
                client_addr,
                payload,
            } => self.handle_relay(client_addr, payload, outbound_tx).await,
            TunnelFrame::Exception { message } => {
                error!("Exception from relay server: {message}");
            }
            // Nothing for the server to say with these; parsed and ignored.
            TunnelFrame::Heartbeat | TunnelFrame::Logon | TunnelFrame::Logout => {}
        }
    }

    /// Relay payload for one public client: dial the origin lazily, then
    /// queue the payload in receive order. A failed dial drops this frame;
    /// the next relay for the same client retries.
    async fn handle_relay(
        &self,
        client_addr: Bytes,
        payload: Bytes,
        outbound_tx: &mpsc::Sender<TunnelFrame>,
    ) {
        if !self.sessions.contains(&client_addr) {
            let stream = match TcpStream::connect((
                self.config.service.addr.as_str(),
                self.config.service.port,
            ))
            .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Can't connect to server: {e}");
                    return;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "set_nodelay failed");
            }
            info!(
                origin = %format!("{}:{}", self.config.service.addr, self.config.service.port),
                client = %String::from_utf8_lossy(&client_addr),
                "Connected to service"
            );

            let (read_half, write_half) = stream.into_split();
            let (session_tx, session_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);

            tokio::spawn(session_writer(
                write_half,
                session_rx,
                self.sessions.clone(),
                client_addr.clone(),
            ));
            let pump = tokio::spawn(origin_read_pump(
                read_half,
                client_addr.clone(),
                self.sessions.clone(),
                outbound_tx.clone(),
                self.config.bufsize,
            ));
            self.sessions
                .insert(client_addr.clone(), Session::new(session_tx, pump));
        }

        // The session can vanish between lookup and write; drop silently.
        if let Some(tx) = self.sessions.outbound(&client_addr) {
            if tx.send(payload).await.is_err() {
                debug!(
                    client = %String::from_utf8_lossy(&client_addr),
                    "Dropping relay for closed session"
                );
            }
        }
    }

    /// Live origin session count, used by shutdown logging and tests.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Drain relayed payloads onto the origin socket. A write failure tears the
/// session down, which also cancels the read pump.
async fn session_writer(
    mut write_half: OwnedWriteHalf,
    mut session_rx: mpsc::Receiver<Bytes>,
    sessions: SessionTable<Bytes>,
    client_addr: Bytes,
) {
    while let Some(payload) = session_rx.recv().await {
        if let Err(e) = write_half.write_all(&payload).await {
            debug!(
                client = %String::from_utf8_lossy(&client_addr),
                error = %e,
                "Origin write failed"
            );
            sessions.remove(&client_addr);
            return;
        }
    }
}

/// Read from the origin service and queue each chunk as a relay frame for
/// the tunnel. EOF or a read error removes the session.
async fn origin_read_pump(
    mut read_half: OwnedReadHalf,
    client_addr: Bytes,
    sessions: SessionTable<Bytes>,
    outbound_tx: mpsc::Sender<TunnelFrame>,
    bufsize: usize,
) {
    let mut buf = vec![0u8; bufsize];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                info!(
                    client = %String::from_utf8_lossy(&client_addr),
                    "EOF received from service"
                );
                break;
            }
            Ok(n) => {
                let frame = TunnelFrame::Relay {
                    client_addr: client_addr.clone(),
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                if outbound_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(
                    client = %String::from_utf8_lossy(&client_addr),
                    error = %e,
                    "Origin read failed"
                );
                break;
            }
        }
    }
    sessions.remove(&client_addr);
}
