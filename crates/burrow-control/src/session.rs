//! Session table.
//!
//! One entry per live TCP socket pair. The entry owns the socket indirectly:
//! the outbound sender feeds the connection's writer task, and the pump
//! handle is the read loop. Dropping the entry aborts the pump and drops the
//! sender, which ends the writer task and closes the socket, so no entry can
//! outlive its sockets.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A live relay session: the writer queue and read pump for one socket pair.
#[derive(Debug)]
pub struct Session {
    outbound: mpsc::Sender<Bytes>,
    pump: JoinHandle<()>,
    pub opened_at: Instant,
}

impl Session {
    pub fn new(outbound: mpsc::Sender<Bytes>, pump: JoinHandle<()>) -> Self {
        Self {
            outbound,
            pump,
            opened_at: Instant::now(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pump.abort();
        // `outbound` drops with the entry, ending the writer task once
        // in-flight payloads have drained.
    }
}

/// Map from routing key to live session.
///
/// Creation is serialized through each side's dispatcher or accept task, so
/// at most one session is ever being created per key; removal can come from
/// any pump and is idempotent.
#[derive(Debug)]
pub struct SessionTable<K: Eq + Hash> {
    sessions: Arc<DashMap<K, Session>>,
}

impl<K: Eq + Hash> Clone for SessionTable<K> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<K: Eq + Hash> Default for SessionTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> SessionTable<K> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Install a session. A stale entry under the same key (a client that
    /// reconnected from the same source tuple) is closed and replaced.
    pub fn insert(&self, key: K, session: Session) {
        self.sessions.insert(key, session);
    }

    /// Writer queue for a session, if it is still live. Read-only lookup
    /// used by the inbound frame dispatcher.
    pub fn outbound(&self, key: &K) -> Option<mpsc::Sender<Bytes>> {
        self.sessions.get(key).map(|s| s.outbound.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.sessions.contains_key(key)
    }

    /// Tear down one session. Idempotent; returns whether an entry existed.
    pub fn remove(&self, key: &K) -> bool {
        self.sessions.remove(key).is_some()
    }

    /// Tear down every session. Returns how many were closed.
    pub fn drain(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dummy_session() -> (Session, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(4);
        let pump = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        (Session::new(tx, pump), rx)
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let table: SessionTable<String> = SessionTable::new();
        let (session, mut rx) = dummy_session();
        table.insert("1.2.3.4:5".to_string(), session);

        let outbound = table.outbound(&"1.2.3.4:5".to_string()).unwrap();
        outbound.send(Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_closes_outbound() {
        let table: SessionTable<String> = SessionTable::new();
        let (session, mut rx) = dummy_session();
        let key = "k".to_string();
        table.insert(key.clone(), session);

        assert!(table.remove(&key));
        assert!(!table.remove(&key));
        assert!(table.outbound(&key).is_none());

        // Writer side observes the closed queue.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn remove_aborts_the_pump() {
        let table: SessionTable<u32> = SessionTable::new();
        let (tx, _rx) = mpsc::channel(1);
        let pump = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let probe = pump.abort_handle();
        table.insert(7, Session::new(tx, pump));

        table.remove(&7);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(probe.is_finished());
    }

    #[tokio::test]
    async fn drain_closes_everything() {
        let table: SessionTable<u32> = SessionTable::new();
        for key in 0..5 {
            let (session, _rx) = dummy_session();
            table.insert(key, session);
        }
        assert_eq!(table.drain(), 5);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn replacing_a_key_closes_the_stale_session() {
        let table: SessionTable<u32> = SessionTable::new();
        let (old, mut old_rx) = dummy_session();
        let (new, mut new_rx) = dummy_session();

        table.insert(1, old);
        table.insert(1, new);

        assert_eq!(table.len(), 1);
        assert_eq!(old_rx.recv().await, None);

        let outbound = table.outbound(&1).unwrap();
        outbound.send(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(new_rx.recv().await.unwrap(), Bytes::from_static(b"x"));
    }
}
