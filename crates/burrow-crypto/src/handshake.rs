//! Handshake key schedule.
//!
//! Both endpoints hold long-term X25519 identity keys; the client pins the
//! server's public key ahead of time and the server admits client keys via
//! its authorizer. Each side contributes a fresh ephemeral key, and three
//! ECDH results feed HKDF-SHA256:
//!
//! ```text
//! ikm = dh(e_client, e_server) || dh(s_client, e_server) || dh(e_client, s_server)
//! ```
//!
//! Direction-separated info strings derive one traffic key per direction.
//! Mutual authentication is implicit: opening any record in a direction
//! requires the remote side's long-term secret to have entered the schedule.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::cipher::RecordCipher;
use crate::error::CryptoError;
use crate::identity::{IdentityKeyPair, PublicKeyBytes};

const HKDF_SALT: &[u8] = b"burrow-transport-hkdf-salt-v1";
const INFO_CLIENT_TO_SERVER: &[u8] = b"burrow-transport-c2s-v1";
const INFO_SERVER_TO_CLIENT: &[u8] = b"burrow-transport-s2c-v1";

/// The per-connection traffic ciphers, one per direction.
pub struct TransportKeys {
    pub send: RecordCipher,
    pub recv: RecordCipher,
}

fn derive_keys(ikm: &mut [u8; 96], client_side: bool) -> Result<TransportKeys, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), ikm.as_slice());

    let mut c2s = [0u8; 32];
    let mut s2c = [0u8; 32];
    hk.expand(INFO_CLIENT_TO_SERVER, &mut c2s)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    hk.expand(INFO_SERVER_TO_CLIENT, &mut s2c)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    ikm.zeroize();

    let keys = if client_side {
        TransportKeys {
            send: RecordCipher::new(&c2s),
            recv: RecordCipher::new(&s2c),
        }
    } else {
        TransportKeys {
            send: RecordCipher::new(&s2c),
            recv: RecordCipher::new(&c2s),
        }
    };
    c2s.zeroize();
    s2c.zeroize();
    Ok(keys)
}

fn dh(secret: &StaticSecret, public: &PublicKeyBytes) -> Result<[u8; 32], CryptoError> {
    let shared = secret.diffie_hellman(&PublicKey::from(*public));
    if !shared.was_contributory() {
        return Err(CryptoError::KeyDerivationFailed(
            "non-contributory shared secret".into(),
        ));
    }
    Ok(*shared.as_bytes())
}

/// Dialer-side handshake state.
pub struct ClientHandshake {
    ephemeral: StaticSecret,
    ephemeral_public: PublicKey,
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHandshake {
    pub fn new() -> Self {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        Self {
            ephemeral,
            ephemeral_public,
        }
    }

    pub fn ephemeral_public(&self) -> PublicKeyBytes {
        *self.ephemeral_public.as_bytes()
    }

    /// Finish the handshake with the pinned server key and the server's
    /// ephemeral key from its reply.
    pub fn complete(
        self,
        identity: &IdentityKeyPair,
        server_static: &PublicKeyBytes,
        server_ephemeral: &PublicKeyBytes,
    ) -> Result<TransportKeys, CryptoError> {
        let mut ikm = [0u8; 96];
        ikm[..32].copy_from_slice(&dh(&self.ephemeral, server_ephemeral)?);
        ikm[32..64].copy_from_slice(&dh(identity.secret(), server_ephemeral)?);
        ikm[64..].copy_from_slice(&dh(&self.ephemeral, server_static)?);
        derive_keys(&mut ikm, true)
    }
}

/// Acceptor-side handshake state.
pub struct ServerHandshake {
    ephemeral: StaticSecret,
    ephemeral_public: PublicKey,
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandshake {
    pub fn new() -> Self {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        Self {
            ephemeral,
            ephemeral_public,
        }
    }

    pub fn ephemeral_public(&self) -> PublicKeyBytes {
        *self.ephemeral_public.as_bytes()
    }

    /// Finish the handshake with the client's static and ephemeral keys
    /// from its hello.
    pub fn complete(
        self,
        identity: &IdentityKeyPair,
        client_static: &PublicKeyBytes,
        client_ephemeral: &PublicKeyBytes,
    ) -> Result<TransportKeys, CryptoError> {
        let mut ikm = [0u8; 96];
        ikm[..32].copy_from_slice(&dh(&self.ephemeral, client_ephemeral)?);
        ikm[32..64].copy_from_slice(&dh(&self.ephemeral, client_static)?);
        ikm[64..].copy_from_slice(&dh(identity.secret(), client_ephemeral)?);
        derive_keys(&mut ikm, false)
    }
}
