//! # Key Management
//!
//! Generates, seals and persists the recipient's long-term stealth key.
//! One [`KeyManager`] per identity; it is handed its storage namespaces and
//! its [`Authenticator`] explicitly, so several identities can coexist in one
//! process.

pub mod auth;
pub mod manager;

pub use auth::{Authenticator, PassphraseAuthenticator};
pub use manager::{sealing_key_for, KeyManager, KeyMetadata, KeyPair, ProvisionedKeys, SealedSecret};
