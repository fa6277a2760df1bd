//! Peer registry.
//!
//! One record per registered peer: the public listener bound on its behalf,
//! its liveness counter, and its session table. Removing a record tears the
//! whole peer down: the listener task is aborted (freeing the public port),
//! every session is drained, and the liveness watcher stops.

use std::sync::Arc;

use burrow_control::{Liveness, SessionTable};
use burrow_transport::PeerId;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::task::JoinHandle;

/// Everything the server holds for one live peer.
#[derive(Debug)]
pub struct PeerRecord {
    /// Public port declared by the peer's identity.
    pub bind_port: u16,
    pub liveness: Liveness,
    /// Sessions keyed by public client address.
    pub sessions: SessionTable<Bytes>,
    listener: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl PeerRecord {
    pub fn new(
        bind_port: u16,
        liveness: Liveness,
        sessions: SessionTable<Bytes>,
        listener: JoinHandle<()>,
        watcher: JoinHandle<()>,
    ) -> Self {
        Self {
            bind_port,
            liveness,
            sessions,
            listener,
            watcher,
        }
    }
}

impl Drop for PeerRecord {
    fn drop(&mut self) {
        self.listener.abort();
        self.watcher.abort();
        self.sessions.drain();
    }
}

/// Registry of live peers plus the set of identities whose public listener
/// is still being bound. A pending peer has no record yet, so a bind
/// failure leaves no state behind and the peer's next frame retries.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, PeerRecord>>,
    pending: Arc<DashMap<PeerId, ()>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the peer's liveness if it is registered. Returns whether a
    /// record existed.
    pub fn touch(&self, peer: &PeerId) -> bool {
        match self.peers.get(peer) {
            Some(record) => {
                record.liveness.reset();
                true
            }
            None => false,
        }
    }

    /// Claim the right to register this peer. False if a registration is
    /// already in flight.
    pub fn begin_registration(&self, peer: &PeerId) -> bool {
        self.pending.insert(peer.clone(), ()).is_none()
    }

    /// Registration finished (either way); the peer's next frame may try
    /// again if no record was installed.
    pub fn end_registration(&self, peer: &PeerId) {
        self.pending.remove(peer);
    }

    pub fn insert(&self, peer: PeerId, record: PeerRecord) {
        self.peers.insert(peer, record);
    }

    /// Tear down one peer. Idempotent.
    pub fn remove(&self, peer: &PeerId) -> bool {
        self.peers.remove(peer).is_some()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    /// Outbound queue for one of the peer's sessions, if still live.
    pub fn session_outbound(
        &self,
        peer: &PeerId,
        client_addr: &Bytes,
    ) -> Option<tokio::sync::mpsc::Sender<Bytes>> {
        self.peers
            .get(peer)
            .and_then(|record| record.sessions.outbound(client_addr))
    }

    /// Tick one peer's liveness. `None` if the peer is not registered.
    pub fn tick(&self, peer: &PeerId) -> Option<i64> {
        self.peers.get(peer).map(|record| record.liveness.tick())
    }

    pub fn session_count(&self, peer: &PeerId) -> usize {
        self.peers
            .get(peer)
            .map(|record| record.sessions.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn idle_task() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
    }

    fn record(bind_port: u16) -> PeerRecord {
        PeerRecord::new(
            bind_port,
            Liveness::new(5),
            SessionTable::new(),
            idle_task(),
            idle_task(),
        )
    }

    #[tokio::test]
    async fn touch_resets_only_registered_peers() {
        let registry = PeerRegistry::new();
        let peer = PeerId::from_static(b"host:9090");
        assert!(!registry.touch(&peer));

        registry.insert(peer.clone(), record(9090));
        registry.tick(&peer);
        registry.tick(&peer);
        assert!(registry.touch(&peer));

        let remaining = registry.tick(&peer).unwrap();
        assert_eq!(remaining, 4);
    }

    #[tokio::test]
    async fn registration_claim_is_exclusive() {
        let registry = PeerRegistry::new();
        let peer = PeerId::from_static(b"host:1");
        assert!(registry.begin_registration(&peer));
        assert!(!registry.begin_registration(&peer));
        registry.end_registration(&peer);
        assert!(registry.begin_registration(&peer));
    }

    #[tokio::test]
    async fn remove_aborts_peer_tasks() {
        let registry = PeerRegistry::new();
        let peer = PeerId::from_static(b"host:2");

        let listener = idle_task();
        let probe = listener.abort_handle();
        registry.insert(
            peer.clone(),
            PeerRecord::new(2, Liveness::new(5), SessionTable::new(), listener, idle_task()),
        );

        assert!(registry.remove(&peer));
        assert!(!registry.remove(&peer));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(probe.is_finished());
    }
}
