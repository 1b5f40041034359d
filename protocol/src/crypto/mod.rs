//! # Cryptographic Primitives for SHROUD
//!
//! Everything secret in the protocol flows through here:
//!
//! - **X25519** for key agreement between the sender's ephemeral key and the
//!   recipient's long-term key.
//! - **HKDF-SHA256** to split the shared secret into a note secret and a
//!   nullifier.
//! - **Poseidon over BN254** as the algebraic commitment hash, so the
//!   downstream withdrawal circuit can recompute it cheaply.
//! - **AES-256-GCM** and **Argon2id** to seal keys and notes at rest.
//!
//! Everything here is a thin, type-safe wrapper around audited crates.

pub mod encryption;
pub mod hash;
pub mod kdf;
pub mod keys;

pub use encryption::{decrypt_with_aad, encrypt_with_aad, EncryptionError};
pub use hash::{algebraic_hash, bytes_to_limbs, domain_separated_hash};
pub use kdf::{derive_passphrase_key, hkdf_sha256, random_salt, KdfError};
pub use keys::{EphemeralKeyPair, KeyError, StealthKeypair, StealthPublicKey, StealthSecretKey};

/// Sealing keys cross the public API wrapped in this.
pub use zeroize::Zeroizing;
