//! Public listener: the TCP fan-in for one peer.
//!
//! Accepts public clients on the port the peer declared, installs a session
//! per client, and pumps bytes into `RELAY` frames addressed to the peer.
//! Frames coming back for a client are drained by a per-session writer task
//! so payloads land on the socket in receive order.

use burrow_control::{Session, SessionTable};
use burrow_proto::TunnelFrame;
use burrow_transport::{AcceptorHandle, PeerId};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Queue depth between the frame dispatcher and one public client's writer.
const SESSION_QUEUE_DEPTH: usize = 64;

/// Accept loop for one peer's public listener. Runs until aborted by the
/// peer record's teardown; the listener stays bound even with zero live
/// sessions, only liveness expiry closes it.
pub async fn run_public_listener(
    listener: TcpListener,
    peer: PeerId,
    sessions: SessionTable<Bytes>,
    tunnel: AcceptorHandle,
    bufsize: usize,
    max_sessions: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if sessions.len() >= max_sessions {
                    warn!(
                        peer = %String::from_utf8_lossy(&peer),
                        client = %addr,
                        max_sessions,
                        "Session cap reached, refusing public client"
                    );
                    continue;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(client = %addr, error = %e, "set_nodelay failed");
                }

                let client_addr = Bytes::from(addr.to_string());
                info!(
                    peer = %String::from_utf8_lossy(&peer),
                    client = %addr,
                    "Public client connected"
                );

                let (read_half, write_half) = stream.into_split();
                let (outbound_tx, outbound_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);

                tokio::spawn(session_writer(
                    write_half,
                    outbound_rx,
                    sessions.clone(),
                    client_addr.clone(),
                ));
                let pump = tokio::spawn(public_read_pump(
                    read_half,
                    peer.clone(),
                    client_addr.clone(),
                    sessions.clone(),
                    tunnel.clone(),
                    bufsize,
                ));
                sessions.insert(client_addr, Session::new(outbound_tx, pump));
            }
            Err(e) => {
                error!(
                    peer = %String::from_utf8_lossy(&peer),
                    error = %e,
                    "Public listener accept failed"
                );
            }
        }
    }
}

/// Drain relayed payloads onto the public client's socket. A write failure
/// tears the session down, which also cancels the read pump.
async fn session_writer(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    sessions: SessionTable<Bytes>,
    client_addr: Bytes,
) {
    while let Some(payload) = outbound_rx.recv().await {
        if let Err(e) = write_half.write_all(&payload).await {
            debug!(
                client = %String::from_utf8_lossy(&client_addr),
                error = %e,
                "Session write failed"
            );
            sessions.remove(&client_addr);
            return;
        }
    }
}

/// Read from the public client and relay each chunk to the owning peer.
/// EOF or a read error removes the session and closes the socket pair.
async fn public_read_pump(
    mut read_half: OwnedReadHalf,
    peer: PeerId,
    client_addr: Bytes,
    sessions: SessionTable<Bytes>,
    tunnel: AcceptorHandle,
    bufsize: usize,
) {
    let mut buf = vec![0u8; bufsize];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                info!(
                    client = %String::from_utf8_lossy(&client_addr),
                    "Client closed session"
                );
                break;
            }
            Ok(n) => {
                let frame = TunnelFrame::Relay {
                    client_addr: client_addr.clone(),
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                tunnel.send(&peer, frame.encode()).await;
            }
            Err(e) => {
                debug!(
                    client = %String::from_utf8_lossy(&client_addr),
                    error = %e,
                    "Session read failed"
                );
                break;
            }
        }
    }
    sessions.remove(&client_addr);
}
