//! # Stealth Commitments
//!
//! A sender who knows only the recipient's public key `B` can publish a
//! commitment that the recipient, and nobody else, recognizes as theirs.
//!
//! ```text
//! sender:     (r, R) fresh            shared = X25519(r, B)
//! recipient:  b (long-term)           shared = X25519(b, R)
//! both:       secret, nullifier = HKDF(shared); C = Poseidon(secret, nullifier)
//! ```
//!
//! The sender publishes `(C, R)`. The recipient runs the right-hand side for
//! every published pair and keeps the ones where `C` recomputes. That is
//! trial decryption: no out-of-band signal, at the cost of one X25519 and one
//! Poseidon per published commitment.
//!
//! ## Architecture
//!
//! ```text
//! derivation.rs  — shared secret -> secret, nullifier, commitment
//! commitment.rs  — CommitmentGenerator (sender)
//! verifier.rs    — CommitmentVerifier, trial decryption (recipient)
//! ```

pub mod commitment;
pub mod derivation;
pub mod verifier;

pub use commitment::{CommitmentGenerator, CreatedCommitment};
pub use derivation::{compute_commitment, derive_secret_material, CommitmentValue, DerivedSecretMaterial};
pub use verifier::{try_derive, CommitmentVerifier, TrialOutcome, VerifierConfig};

use thiserror::Error;

use crate::crypto::keys::KeyError;

#[derive(Debug, Error)]
pub enum CommitmentError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("secure random number generator unavailable: {0}")]
    Entropy(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

impl From<KeyError> for CommitmentError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::Entropy(msg) => CommitmentError::Entropy(msg),
            KeyError::KeyDerivation(msg) => CommitmentError::KeyDerivation(msg),
            KeyError::InvalidKey(msg) => CommitmentError::InvalidKey(msg),
            other => CommitmentError::InvalidKey(other.to_string()),
        }
    }
}
