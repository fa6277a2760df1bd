//! Key stores.
//!
//! A certificates directory holds one raw 32-byte secret key per role
//! (`server.key`, `client.key`), hex-encoded public keys (`<name>.pub`) and,
//! on the server, a `clients/` directory whose `.pub` files form the
//! authorized peer set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_crypto::{keys_equal, CryptoError, IdentityKeyPair, PublicKeyBytes, KEY_SIZE};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::watcher::{AuthorizedKeys, DEFAULT_POLL_INTERVAL};

/// Key store errors
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("malformed public key file {path}: {reason}")]
    MalformedKeyFile { path: PathBuf, reason: String },

    #[error("no public key on record for peer {0:?}")]
    UnknownPeer(String),
}

/// Which endpoint a store provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

/// Contract between the tunnel core and key provisioning.
pub trait KeyStore: Send + Sync {
    /// Load this endpoint's long-term keypair. Called once at startup.
    fn load_self(&self) -> Result<IdentityKeyPair, KeyStoreError>;

    /// Is this peer public key allowed to complete the tunnel handshake?
    /// Consulted by the server's acceptor on every handshake.
    fn authorize_peer(&self, public_key: &PublicKeyBytes) -> bool;

    /// Look up a named peer's public key (client side, to pin the server).
    fn peer_public_key(&self, peer_name: &str) -> Result<PublicKeyBytes, KeyStoreError>;
}

/// Parse a `<name>.pub` file: 64 hex characters, whitespace tolerated.
pub fn read_public_key_file(path: &Path) -> Result<PublicKeyBytes, KeyStoreError> {
    let text = std::fs::read_to_string(path)?;
    let decoded = hex::decode(text.trim()).map_err(|e| KeyStoreError::MalformedKeyFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if decoded.len() != KEY_SIZE {
        return Err(KeyStoreError::MalformedKeyFile {
            path: path.to_path_buf(),
            reason: format!("expected {KEY_SIZE} key bytes, got {}", decoded.len()),
        });
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&decoded);
    Ok(key)
}

/// Key store backed by a certificates directory.
pub struct DirKeyStore {
    root: PathBuf,
    role: Role,
    authorized: AuthorizedKeys,
}

impl DirKeyStore {
    pub fn new(root: impl Into<PathBuf>, role: Role) -> Self {
        Self {
            root: root.into(),
            role,
            authorized: AuthorizedKeys::new(),
        }
    }

    /// Directory of authorized client `.pub` files (server side).
    pub fn clients_dir(&self) -> PathBuf {
        self.root.join("clients")
    }

    fn secret_key_path(&self) -> PathBuf {
        self.root.join(format!("{}.key", self.role.as_str()))
    }

    fn public_key_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.pub"))
    }

    /// Start watching the clients directory so key changes take effect
    /// without a restart. Server side only; poll cadence defaults to 1 s.
    pub fn watch_clients(&self, poll_interval: Option<Duration>) -> JoinHandle<()> {
        self.authorized.watch(
            self.clients_dir(),
            poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
        )
    }
}

impl KeyStore for DirKeyStore {
    fn load_self(&self) -> Result<IdentityKeyPair, KeyStoreError> {
        Ok(IdentityKeyPair::load_from_file(&self.secret_key_path())?)
    }

    fn authorize_peer(&self, public_key: &PublicKeyBytes) -> bool {
        self.authorized.contains(public_key)
    }

    fn peer_public_key(&self, peer_name: &str) -> Result<PublicKeyBytes, KeyStoreError> {
        let path = self.public_key_path(peer_name);
        if !path.exists() {
            return Err(KeyStoreError::UnknownPeer(peer_name.to_string()));
        }
        read_public_key_file(&path)
    }
}

/// In-memory key store: environment-injected key material and tests.
pub struct StaticKeyStore {
    secret: [u8; KEY_SIZE],
    peers: HashMap<String, PublicKeyBytes>,
    authorized: Vec<PublicKeyBytes>,
}

impl StaticKeyStore {
    pub fn new(keypair: &IdentityKeyPair) -> Self {
        Self {
            secret: keypair.secret_bytes(),
            peers: HashMap::new(),
            authorized: Vec::new(),
        }
    }

    pub fn with_peer(mut self, name: impl Into<String>, key: PublicKeyBytes) -> Self {
        self.peers.insert(name.into(), key);
        self
    }

    pub fn with_authorized(mut self, key: PublicKeyBytes) -> Self {
        self.authorized.push(key);
        self
    }
}

impl KeyStore for StaticKeyStore {
    fn load_self(&self) -> Result<IdentityKeyPair, KeyStoreError> {
        Ok(IdentityKeyPair::from_secret_bytes(&self.secret)?)
    }

    fn authorize_peer(&self, public_key: &PublicKeyBytes) -> bool {
        self.authorized.iter().any(|k| keys_equal(k, public_key))
    }

    fn peer_public_key(&self, peer_name: &str) -> Result<PublicKeyBytes, KeyStoreError> {
        self.peers
            .get(peer_name)
            .copied()
            .ok_or_else(|| KeyStoreError::UnknownPeer(peer_name.to_string()))
    }
}

/// Generate and write a keypair for `role` under `dir`.
///
/// Writes `<role>.key` (raw secret, owner-only) and `<role>.pub` (hex).
/// For the server role also creates the `clients/` directory that will hold
/// authorized client keys.
pub fn provision(dir: &Path, role: Role) -> Result<IdentityKeyPair, KeyStoreError> {
    std::fs::create_dir_all(dir)?;

    let keypair = IdentityKeyPair::generate();
    keypair.save_to_file(&dir.join(format!("{}.key", role.as_str())))?;
    std::fs::write(
        dir.join(format!("{}.pub", role.as_str())),
        format!("{}\n", hex::encode(keypair.public_bytes())),
    )?;

    if role == Role::Server {
        std::fs::create_dir_all(dir.join("clients"))?;
    }

    info!(
        dir = %dir.display(),
        role = role.as_str(),
        fingerprint = %keypair.fingerprint(),
        "Provisioned keypair"
    );
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_writes_keypair_files() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = provision(dir.path(), Role::Server).unwrap();

        assert!(dir.path().join("server.key").exists());
        assert!(dir.path().join("server.pub").exists());
        assert!(dir.path().join("clients").is_dir());

        let public = read_public_key_file(&dir.path().join("server.pub")).unwrap();
        assert_eq!(public, keypair.public_bytes());
    }

    #[test]
    fn provision_client_has_no_clients_dir() {
        let dir = tempfile::tempdir().unwrap();
        provision(dir.path(), Role::Client).unwrap();
        assert!(dir.path().join("client.key").exists());
        assert!(!dir.path().join("clients").exists());
    }

    #[test]
    fn dir_store_loads_own_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let provisioned = provision(dir.path(), Role::Client).unwrap();

        let store = DirKeyStore::new(dir.path(), Role::Client);
        let loaded = store.load_self().unwrap();
        assert_eq!(loaded.public_bytes(), provisioned.public_bytes());
    }

    #[test]
    fn dir_store_resolves_named_peer_keys() {
        let dir = tempfile::tempdir().unwrap();
        provision(dir.path(), Role::Server).unwrap();

        let store = DirKeyStore::new(dir.path(), Role::Client);
        assert!(store.peer_public_key("server").is_ok());
        assert!(matches!(
            store.peer_public_key("nobody"),
            Err(KeyStoreError::UnknownPeer(_))
        ));
    }

    #[test]
    fn dir_store_authorizes_from_clients_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirKeyStore::new(dir.path(), Role::Server);
        std::fs::create_dir_all(store.clients_dir()).unwrap();

        let client = IdentityKeyPair::generate();
        std::fs::write(
            store.clients_dir().join("client.pub"),
            hex::encode(client.public_bytes()),
        )
        .unwrap();

        assert!(!store.authorize_peer(&client.public_bytes()));
        store.authorized.reload(&store.clients_dir()).unwrap();
        assert!(store.authorize_peer(&client.public_bytes()));
    }

    #[test]
    fn static_store_roundtrips() {
        let kp = IdentityKeyPair::generate();
        let peer = IdentityKeyPair::generate();
        let store = StaticKeyStore::new(&kp)
            .with_peer("server", peer.public_bytes())
            .with_authorized(peer.public_bytes());

        assert_eq!(store.load_self().unwrap().public_bytes(), kp.public_bytes());
        assert_eq!(store.peer_public_key("server").unwrap(), peer.public_bytes());
        assert!(store.authorize_peer(&peer.public_bytes()));
        assert!(!store.authorize_peer(&kp.public_bytes()));
    }

    #[test]
    fn read_public_key_file_rejects_bad_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.pub");
        std::fs::write(&path, hex::encode([0u8; 16])).unwrap();
        assert!(matches!(
            read_public_key_file(&path),
            Err(KeyStoreError::MalformedKeyFile { .. })
        ));
    }
}
