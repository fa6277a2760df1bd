//! Key provisioning and peer authorization
//!
//! The tunnel core is agnostic about where key material lives; it talks to a
//! [`KeyStore`]. This crate provides the contract plus two backings: a
//! certificates directory on disk (with a watcher that picks up new client
//! keys without a restart) and an in-memory store for tests and
//! environment-injected deployments.

pub mod store;
pub mod watcher;

pub use store::{provision, DirKeyStore, KeyStore, KeyStoreError, Role, StaticKeyStore};
pub use watcher::AuthorizedKeys;
