//! Record cipher for tunnel messages.
//!
//! One `RecordCipher` per transport direction, keyed from the handshake key
//! schedule. ChaCha20-Poly1305 AEAD; nonce layout is a 4-byte monotonic
//! counter followed by an 8-byte random per-cipher prefix, so nonces never
//! repeat within a connection and never collide across directions.

use std::sync::atomic::{AtomicU32, Ordering};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// A sealed record: ciphertext plus the nonce that opened it.
#[derive(Debug, Clone)]
pub struct SealedRecord {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// AEAD cipher for one direction of one tunnel connection.
pub struct RecordCipher {
    cipher: ChaCha20Poly1305,
    nonce_prefix: [u8; 8],
    nonce_counter: AtomicU32,
}

impl Drop for RecordCipher {
    fn drop(&mut self) {
        self.nonce_prefix.zeroize();
    }
}

impl RecordCipher {
    /// Build a cipher from a 32-byte traffic key.
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::from_slice(key_bytes);
        let cipher = ChaCha20Poly1305::new(key);

        let mut nonce_prefix = [0u8; 8];
        OsRng.fill_bytes(&mut nonce_prefix);

        Self {
            cipher,
            nonce_prefix,
            nonce_counter: AtomicU32::new(0),
        }
    }

    /// Encrypt one record.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedRecord, CryptoError> {
        let nonce_bytes = self.next_nonce()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok(SealedRecord {
            ciphertext,
            nonce: nonce_bytes,
        })
    }

    /// Decrypt one record.
    pub fn open(&self, ciphertext: &[u8], nonce_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: nonce_bytes.len(),
            });
        }
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Next unique nonce: `[4-byte counter (BE)] [8-byte prefix]`.
    ///
    /// A compare-and-swap loop guards the counter so a wrap can never reuse
    /// a nonce; exhaustion forces the connection to re-handshake.
    fn next_nonce(&self) -> Result<[u8; NONCE_SIZE], CryptoError> {
        loop {
            let current = self.nonce_counter.load(Ordering::Relaxed);
            if current == u32::MAX {
                return Err(CryptoError::NonceExhausted);
            }
            if let Ok(prev) = self.nonce_counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                let mut nonce = [0u8; NONCE_SIZE];
                nonce[..4].copy_from_slice(&prev.to_be_bytes());
                nonce[4..].copy_from_slice(&self.nonce_prefix);
                return Ok(nonce);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher_pair() -> (RecordCipher, RecordCipher) {
        let key = [7u8; 32];
        (RecordCipher::new(&key), RecordCipher::new(&key))
    }

    #[test]
    fn seal_open_roundtrip() {
        let (tx, rx) = cipher_pair();
        let sealed = tx.seal(b"relay payload").unwrap();
        let opened = rx.open(&sealed.ciphertext, &sealed.nonce).unwrap();
        assert_eq!(opened, b"relay payload");
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let (tx, _) = cipher_pair();
        let other = RecordCipher::new(&[9u8; 32]);
        let sealed = tx.seal(b"secret").unwrap();
        assert!(other.open(&sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn open_tampered_ciphertext_fails() {
        let (tx, rx) = cipher_pair();
        let mut sealed = tx.seal(b"secret").unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(rx.open(&sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn open_rejects_bad_nonce_length() {
        let (tx, rx) = cipher_pair();
        let sealed = tx.seal(b"x").unwrap();
        assert!(matches!(
            rx.open(&sealed.ciphertext, &sealed.nonce[..8]),
            Err(CryptoError::InvalidNonceLength { .. })
        ));
    }

    #[test]
    fn nonces_never_repeat() {
        let (tx, _) = cipher_pair();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let sealed = tx.seal(b"x").unwrap();
            assert!(seen.insert(sealed.nonce), "nonce collision");
        }
    }

    #[test]
    fn counter_exhaustion_is_an_error() {
        let (tx, _) = cipher_pair();
        tx.nonce_counter.store(u32::MAX, Ordering::Relaxed);
        assert!(matches!(tx.seal(b"x"), Err(CryptoError::NonceExhausted)));
    }

    #[test]
    fn large_record_roundtrip() {
        let (tx, rx) = cipher_pair();
        let payload = vec![0xabu8; 1024 * 1024];
        let sealed = tx.seal(&payload).unwrap();
        assert_eq!(rx.open(&sealed.ciphertext, &sealed.nonce).unwrap(), payload);
    }
}
