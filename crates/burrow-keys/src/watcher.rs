//! Watched set of authorized peer public keys.
//!
//! The server's certificates directory can change while the relay runs:
//! dropping a new `<name>.pub` file in authorizes that peer on its next
//! handshake, removing one revokes it. A background task polls the
//! directory's modification time and atomically swaps the in-memory set
//! when it changes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use burrow_crypto::PublicKeyBytes;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::read_public_key_file;

/// Default poll cadence for the certificates directory.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The set of peer public keys allowed through the tunnel handshake.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    keys: Arc<RwLock<HashSet<PublicKeyBytes>>>,
}

impl AuthorizedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership test used by the transport acceptor during handshake.
    pub fn contains(&self, key: &PublicKeyBytes) -> bool {
        self.keys.read().unwrap().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a key directly (in-memory stores, tests).
    pub fn insert(&self, key: PublicKeyBytes) {
        self.keys.write().unwrap().insert(key);
    }

    /// Re-read every `*.pub` file under `dir` and swap the set atomically.
    ///
    /// Unreadable or malformed entries are skipped with a warning; a key
    /// directory with problems must never take the relay down.
    pub fn reload(&self, dir: &Path) -> std::io::Result<usize> {
        let mut fresh = HashSet::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pub") {
                continue;
            }
            match read_public_key_file(&path) {
                Ok(key) => {
                    fresh.insert(key);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable public key file");
                }
            }
        }

        let count = fresh.len();
        *self.keys.write().unwrap() = fresh;
        Ok(count)
    }

    /// Spawn the directory watcher.
    ///
    /// Polls `dir`'s modification time every `poll_interval`; the first
    /// successful poll performs the initial load, later changes trigger a
    /// reload. Runs until aborted.
    pub fn watch(&self, dir: PathBuf, poll_interval: Duration) -> JoinHandle<()> {
        let keys = self.clone();
        tokio::spawn(async move {
            let mut last: Option<SystemTime> = None;
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                let mtime = match std::fs::metadata(&dir).and_then(|m| m.modified()) {
                    Ok(mtime) => mtime,
                    Err(e) => {
                        error!(dir = %dir.display(), error = %e, "Monitor certificates failed");
                        continue;
                    }
                };
                if last.is_some_and(|seen| mtime <= seen) {
                    continue;
                }
                if last.is_none() {
                    info!(dir = %dir.display(), "Load client certificates");
                } else {
                    info!(dir = %dir.display(), "Certificate keys dir updated, reload");
                }
                match keys.reload(&dir) {
                    Ok(count) => {
                        debug!(count, "Authorized client keys loaded");
                        last = Some(mtime);
                    }
                    Err(e) => {
                        error!(dir = %dir.display(), error = %e, "Reload certificates failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_crypto::IdentityKeyPair;

    fn write_pub(dir: &Path, name: &str, key: &PublicKeyBytes) {
        std::fs::write(dir.join(format!("{name}.pub")), hex::encode(key)).unwrap();
    }

    #[test]
    fn reload_picks_up_pub_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let kp = IdentityKeyPair::generate();
        write_pub(dir.path(), "alice", &kp.public_bytes());
        std::fs::write(dir.path().join("notes.txt"), "not a key").unwrap();

        let keys = AuthorizedKeys::new();
        assert_eq!(keys.reload(dir.path()).unwrap(), 1);
        assert!(keys.contains(&kp.public_bytes()));
    }

    #[test]
    fn reload_swaps_the_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        let old = IdentityKeyPair::generate();
        write_pub(dir.path(), "old", &old.public_bytes());

        let keys = AuthorizedKeys::new();
        keys.reload(dir.path()).unwrap();
        assert!(keys.contains(&old.public_bytes()));

        std::fs::remove_file(dir.path().join("old.pub")).unwrap();
        let new = IdentityKeyPair::generate();
        write_pub(dir.path(), "new", &new.public_bytes());

        keys.reload(dir.path()).unwrap();
        assert!(!keys.contains(&old.public_bytes()));
        assert!(keys.contains(&new.public_bytes()));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.pub"), "zz not hex").unwrap();
        let good = IdentityKeyPair::generate();
        write_pub(dir.path(), "good", &good.public_bytes());

        let keys = AuthorizedKeys::new();
        assert_eq!(keys.reload(dir.path()).unwrap(), 1);
        assert!(keys.contains(&good.public_bytes()));
    }

    #[tokio::test]
    async fn watcher_loads_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let first = IdentityKeyPair::generate();
        write_pub(dir.path(), "first", &first.public_bytes());

        let keys = AuthorizedKeys::new();
        let handle = keys.watch(dir.path().to_path_buf(), Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(keys.contains(&first.public_bytes()));

        // Directory mtime granularity can be a full second on some
        // filesystems, so leave room before and after the change.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = IdentityKeyPair::generate();
        write_pub(dir.path(), "second", &second.public_bytes());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(keys.contains(&second.public_bytes()));
        handle.abort();
    }
}
