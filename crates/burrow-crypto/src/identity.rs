//! Identity keypair management.
//!
//! Each endpoint has a long-lived X25519 keypair. The public half is the
//! endpoint's identity on the tunnel: the server pins are loaded from it and
//! the server's authorizer decides peer admission by it.

use std::path::Path;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Raw length of X25519 keys.
pub const KEY_SIZE: usize = 32;

/// A raw public key as carried on the wire and in key files.
pub type PublicKeyBytes = [u8; KEY_SIZE];

/// A long-term X25519 keypair.
pub struct IdentityKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl IdentityKeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        let secret = StaticSecret::from(arr);
        let public = PublicKey::from(&secret);
        arr.zeroize();
        Ok(Self { secret, public })
    }

    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_bytes(&self) -> PublicKeyBytes {
        *self.public.as_bytes()
    }

    /// The secret key as raw bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    pub const fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Colon-separated hex fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self.public.as_bytes())
    }

    /// Save the secret key to a file with owner-only permissions.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut bytes = self.secret_bytes();
        std::fs::write(path, bytes)?;
        bytes.zeroize();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load a keypair from a file containing the 32-byte secret key.
    ///
    /// On Unix the file must be 0600 (owner-only); anything looser is
    /// rejected before a byte is read.
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        use std::io::Read;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(path)?;
            let mode = metadata.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("secret key file has insecure permissions: {mode:o} (expected 600)"),
                )));
            }
        }

        let mut file = std::fs::File::open(path)?;
        let mut buf = [0u8; KEY_SIZE];
        file.read_exact(&mut buf)?;
        let result = Self::from_secret_bytes(&buf);
        buf.zeroize();
        result
    }
}

/// Constant-time equality for raw public keys.
pub fn keys_equal(a: &PublicKeyBytes, b: &PublicKeyBytes) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// Compute a colon-separated hex fingerprint from raw public key bytes.
pub fn fingerprint_of(pubkey_bytes: &PublicKeyBytes) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(pubkey_bytes);
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestDir {
        dir: std::path::PathBuf,
    }

    impl TestDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("burrow-test-{}", rand::random::<u64>()));
            Self { dir }
        }

        fn key_path(&self) -> std::path::PathBuf {
            self.dir.join("identity.key")
        }
    }

    impl Drop for TestDir {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    #[test]
    fn generate_produces_32_byte_keys() {
        let kp = IdentityKeyPair::generate();
        assert_eq!(kp.public_bytes().len(), KEY_SIZE);
        assert_eq!(kp.secret_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn secret_bytes_roundtrip() {
        let kp = IdentityKeyPair::generate();
        let kp2 = IdentityKeyPair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(kp2.public_bytes(), kp.public_bytes());
    }

    #[test]
    fn from_secret_bytes_rejects_wrong_length() {
        assert!(matches!(
            IdentityKeyPair::from_secret_bytes(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn save_and_load_keypair() {
        let dir = TestDir::new();
        let kp = IdentityKeyPair::generate();
        kp.save_to_file(&dir.key_path()).unwrap();

        let loaded = IdentityKeyPair::load_from_file(&dir.key_path()).unwrap();
        assert_eq!(loaded.public_bytes(), kp.public_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_permissions_are_restrictive() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TestDir::new();
        let kp = IdentityKeyPair::generate();
        kp.save_to_file(&dir.key_path()).unwrap();

        let perms = std::fs::metadata(dir.key_path()).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn load_rejects_world_readable_key() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TestDir::new();
        let kp = IdentityKeyPair::generate();
        kp.save_to_file(&dir.key_path()).unwrap();
        std::fs::set_permissions(dir.key_path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(IdentityKeyPair::load_from_file(&dir.key_path()).is_err());
    }

    #[test]
    fn load_truncated_file_fails() {
        let dir = TestDir::new();
        std::fs::create_dir_all(&dir.dir).unwrap();
        std::fs::write(dir.key_path(), [0u8; 20]).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.key_path(), std::fs::Permissions::from_mode(0o600))
                .unwrap();
        }
        assert!(IdentityKeyPair::load_from_file(&dir.key_path()).is_err());
    }

    #[test]
    fn fingerprint_is_colon_separated_hex() {
        let fp = IdentityKeyPair::generate().fingerprint();
        assert_eq!(fp.len(), 95);
        for segment in fp.split(':') {
            assert_eq!(segment.len(), 2);
            assert!(segment.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn keys_equal_compares_raw_bytes() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        assert!(keys_equal(&a.public_bytes(), &a.public_bytes()));
        assert!(!keys_equal(&a.public_bytes(), &b.public_bytes()));
    }

    #[test]
    fn debug_redacts_secret() {
        let kp = IdentityKeyPair::generate();
        let out = format!("{kp:?}");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains(&hex::encode(kp.secret_bytes())));
    }
}
