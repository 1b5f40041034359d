//! Recipient side: trial decryption.
//!
//! Every published commitment is tried. The derivation is identical for
//! owned and foreign commitments; only the final comparison differs.
//! Malformed records are not errors here, they are simply not ours.

use std::fmt;
use std::num::NonZeroUsize;
use std::panic;
use std::thread;

use tracing::debug;

use super::derivation::{derive_secret_material, CommitmentValue, DerivedSecretMaterial};
use super::CommitmentError;
use crate::config::{DERIVED_LENGTH, DEFAULT_PARALLEL_THRESHOLD};
use crate::crypto::keys::{StealthPublicKey, StealthSecretKey};
use crate::discovery::events::DepositObserved;
use crate::notes::note::Note;

// ---------------------------------------------------------------------------
// TrialOutcome
// ---------------------------------------------------------------------------

/// Result of one trial. `Owned` carries the material needed to spend.
pub enum TrialOutcome {
    NotOwned,
    Owned(DerivedSecretMaterial),
}

impl TrialOutcome {
    pub fn is_owner(&self) -> bool {
        matches!(self, TrialOutcome::Owned(_))
    }

    pub fn secret(&self) -> Option<&[u8; DERIVED_LENGTH]> {
        match self {
            TrialOutcome::Owned(m) => Some(m.secret()),
            TrialOutcome::NotOwned => None,
        }
    }

    pub fn nullifier(&self) -> Option<&[u8; DERIVED_LENGTH]> {
        match self {
            TrialOutcome::Owned(m) => Some(m.nullifier()),
            TrialOutcome::NotOwned => None,
        }
    }

    pub fn into_material(self) -> Option<DerivedSecretMaterial> {
        match self {
            TrialOutcome::Owned(m) => Some(m),
            TrialOutcome::NotOwned => None,
        }
    }
}

impl fmt::Debug for TrialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialOutcome::NotOwned => f.write_str("NotOwned"),
            TrialOutcome::Owned(_) => f.write_str("Owned(<redacted>)"),
        }
    }
}

/// Try one published `(ephemeral key, commitment)` pair against `secret_key`.
pub fn try_derive(
    ephemeral_public_key: &[u8],
    secret_key: &StealthSecretKey,
    observed_commitment: &[u8],
) -> TrialOutcome {
    match trial(ephemeral_public_key, secret_key, observed_commitment) {
        Ok(outcome) => outcome,
        Err(e) => {
            debug!(error = %e, "malformed deposit, treating as not owned");
            TrialOutcome::NotOwned
        }
    }
}

fn trial(
    ephemeral_public_key: &[u8],
    secret_key: &StealthSecretKey,
    observed_commitment: &[u8],
) -> Result<TrialOutcome, CommitmentError> {
    let ephemeral = StealthPublicKey::try_from_slice(ephemeral_public_key)
        .map_err(|e| CommitmentError::InvalidInput(e.to_string()))?;
    let observed = CommitmentValue::try_from_slice(observed_commitment)?;
    let shared = secret_key
        .diffie_hellman(&ephemeral)
        .map_err(|e| CommitmentError::InvalidInput(e.to_string()))?;
    let material = derive_secret_material(&shared)?;

    if material.commitment() == observed {
        Ok(TrialOutcome::Owned(material))
    } else {
        Ok(TrialOutcome::NotOwned)
    }
}

// ---------------------------------------------------------------------------
// CommitmentVerifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// Batches shorter than this run on the calling thread.
    pub parallel_threshold: usize,
    /// Worker threads for larger batches.
    pub workers: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            workers: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

/// Holds the recipient's private key for the lifetime of a scan.
pub struct CommitmentVerifier {
    secret_key: StealthSecretKey,
    public_key: StealthPublicKey,
    config: VerifierConfig,
}

impl CommitmentVerifier {
    pub fn new(secret_key: StealthSecretKey, config: VerifierConfig) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
            config,
        }
    }

    pub fn public_key(&self) -> StealthPublicKey {
        self.public_key
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn try_derive(&self, ephemeral_public_key: &[u8], observed_commitment: &[u8]) -> TrialOutcome {
        try_derive(ephemeral_public_key, &self.secret_key, observed_commitment)
    }

    /// A `Note` if the deposit is ours, `None` otherwise.
    pub fn verify_one(&self, deposit: &DepositObserved) -> Option<Note> {
        let material = self
            .try_derive(&deposit.ephemeral_public_key, &deposit.commitment)
            .into_material()?;
        Some(Note::discovered(deposit, &material))
    }

    /// Trial-decrypt a batch. Output order follows input order.
    pub fn verify_batch(&self, deposits: &[DepositObserved]) -> Vec<Note> {
        let workers = self.config.workers.max(1);
        if deposits.is_empty() || deposits.len() < self.config.parallel_threshold || workers == 1 {
            return self.verify_chunk(deposits);
        }

        let chunk_size = deposits.len().div_ceil(workers);
        thread::scope(|scope| {
            let handles: Vec<_> = deposits
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || self.verify_chunk(chunk)))
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(notes) => notes,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    fn verify_chunk(&self, deposits: &[DepositObserved]) -> Vec<Note> {
        deposits.iter().filter_map(|d| self.verify_one(d)).collect()
    }
}

impl fmt::Debug for CommitmentVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitmentVerifier")
            .field("public_key", &self.public_key)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::StealthKeypair;
    use crate::stealth::commitment::CommitmentGenerator;

    fn deposit_for(recipient: &StealthPublicKey, leaf_index: u64) -> DepositObserved {
        let created = CommitmentGenerator::new()
            .create_commitment(recipient.as_bytes())
            .unwrap();
        DepositObserved {
            commitment: created.commitment.as_bytes().to_vec(),
            ephemeral_public_key: created.ephemeral_public_key.to_vec(),
            amount: 1_000 + leaf_index,
            leaf_index,
            block_number: 10 + leaf_index,
            timestamp: 1_700_000_000,
        }
    }

    fn mixed_batch(bob: &StealthKeypair, n: u64) -> Vec<DepositObserved> {
        let stranger = StealthKeypair::generate().unwrap().public_key();
        (0..n)
            .map(|i| {
                if i % 3 == 0 {
                    deposit_for(&bob.public_key(), i)
                } else {
                    deposit_for(&stranger, i)
                }
            })
            .collect()
    }

    #[test]
    fn short_ephemeral_key_is_not_owner() {
        let bob = StealthKeypair::generate().unwrap();
        let outcome = try_derive(&[1u8; 31], bob.secret_key(), &[0u8; 32]);
        assert!(!outcome.is_owner());
    }

    #[test]
    fn short_commitment_is_not_owner() {
        let bob = StealthKeypair::generate().unwrap();
        let d = deposit_for(&bob.public_key(), 0);
        let outcome = try_derive(&d.ephemeral_public_key, bob.secret_key(), &d.commitment[..31]);
        assert!(!outcome.is_owner());
    }

    #[test]
    fn low_order_ephemeral_key_is_not_owner() {
        let bob = StealthKeypair::generate().unwrap();
        let outcome = try_derive(&[0u8; 32], bob.secret_key(), &[0u8; 32]);
        assert!(!outcome.is_owner());
    }

    #[test]
    fn batch_finds_only_own_notes_in_order() {
        let bob = StealthKeypair::generate().unwrap();
        let batch = mixed_batch(&bob, 12);
        let verifier = CommitmentVerifier::new(bob.secret_key().clone(), VerifierConfig::default());

        let notes = verifier.verify_batch(&batch);
        let leaves: Vec<u64> = notes.iter().map(|n| n.leaf_index).collect();
        assert_eq!(leaves, vec![0, 3, 6, 9]);
        assert!(notes.iter().all(|n| n.check_integrity()));
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let bob = StealthKeypair::generate().unwrap();
        let batch = mixed_batch(&bob, 40);

        let sequential = CommitmentVerifier::new(
            bob.secret_key().clone(),
            VerifierConfig {
                parallel_threshold: usize::MAX,
                workers: 1,
            },
        );
        let parallel = CommitmentVerifier::new(
            bob.secret_key().clone(),
            VerifierConfig {
                parallel_threshold: 4,
                workers: 4,
            },
        );

        let a: Vec<_> = sequential.verify_batch(&batch).into_iter().map(|n| n.commitment).collect();
        let b: Vec<_> = parallel.verify_batch(&batch).into_iter().map(|n| n.commitment).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 14);
    }

    #[test]
    fn malformed_records_do_not_abort_batch() {
        let bob = StealthKeypair::generate().unwrap();
        let mut batch = mixed_batch(&bob, 6);
        batch[1].ephemeral_public_key.truncate(5);
        batch[2].commitment.clear();

        let verifier = CommitmentVerifier::new(bob.secret_key().clone(), VerifierConfig::default());
        assert_eq!(verifier.verify_batch(&batch).len(), 2);
    }

    #[test]
    fn empty_batch() {
        let bob = StealthKeypair::generate().unwrap();
        let verifier = CommitmentVerifier::new(bob.secret_key().clone(), VerifierConfig::default());
        assert!(verifier.verify_batch(&[]).is_empty());
    }

    #[test]
    fn empty_batch_with_parallelism_forced() {
        let bob = StealthKeypair::generate().unwrap();
        let config = VerifierConfig {
            parallel_threshold: 0,
            workers: 4,
        };
        let verifier = CommitmentVerifier::new(bob.secret_key().clone(), config);
        assert!(verifier.verify_batch(&[]).is_empty());
        assert_eq!(verifier.verify_batch(&mixed_batch(&bob, 6)).len(), 2);
    }
}
