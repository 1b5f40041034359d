//! The hand-off to the proof system.
//!
//! Proof generation lives in an external [`ProofService`]. This module only
//! assembles its private inputs, calls it, and records the spend once the
//! withdrawal is confirmed on chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroize;

use super::listeners::NoteListeners;
use super::note::{Note, NoteStatus};
use super::store::{NoteStore, NoteStoreError, SpendOutcome};
use crate::config::DERIVED_LENGTH;
use crate::stealth::derivation::CommitmentValue;

#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("note not found: {0}")]
    NoteNotFound(String),

    #[error("note already spent: {0}")]
    AlreadySpent(String),

    #[error("note fails integrity check: {0}")]
    IntegrityViolation(String),

    #[error("proof service failed: {0}")]
    Proof(String),

    #[error(transparent)]
    Store(#[from] NoteStoreError),
}

/// Private inputs of the withdrawal circuit. Wiped on drop.
#[derive(Clone, Serialize)]
pub struct WithdrawalProofInputs {
    #[serde(with = "hex::serde")]
    pub nullifier: [u8; DERIVED_LENGTH],
    #[serde(with = "hex::serde")]
    pub secret: [u8; DERIVED_LENGTH],
    pub commitment: CommitmentValue,
    pub leaf_index: u64,
}

impl Drop for WithdrawalProofInputs {
    fn drop(&mut self) {
        self.nullifier.zeroize();
        self.secret.zeroize();
    }
}

impl fmt::Debug for WithdrawalProofInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithdrawalProofInputs")
            .field("commitment", &self.commitment)
            .field("leaf_index", &self.leaf_index)
            .finish_non_exhaustive()
    }
}

/// Pure data assembly. Refuses spent notes and notes that do not recompute.
pub fn prepare_withdrawal_proof_inputs(note: &Note) -> Result<WithdrawalProofInputs, WithdrawalError> {
    if note.status == NoteStatus::Spent {
        return Err(WithdrawalError::AlreadySpent(note.commitment.short_hex()));
    }
    if !note.check_integrity() {
        return Err(WithdrawalError::IntegrityViolation(note.commitment.short_hex()));
    }
    Ok(WithdrawalProofInputs {
        nullifier: note.nullifier,
        secret: note.secret,
        commitment: note.commitment,
        leaf_index: note.leaf_index,
    })
}

/// Whatever the proof system produced, plus the public signals the
/// withdrawal transaction needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalProof {
    #[serde(with = "hex::serde")]
    pub proof: Vec<u8>,
    pub commitment: CommitmentValue,
    #[serde(with = "hex::serde")]
    pub nullifier: [u8; DERIVED_LENGTH],
}

#[async_trait]
pub trait ProofService: Send + Sync {
    async fn prove_withdrawal(
        &self,
        inputs: &WithdrawalProofInputs,
    ) -> Result<WithdrawalProof, WithdrawalError>;
}

/// `prepare` -> `request_proof` -> (withdraw on chain) -> `confirm`.
pub struct WithdrawalFlow {
    store: Arc<NoteStore>,
    prover: Arc<dyn ProofService>,
    listeners: Option<Arc<NoteListeners>>,
}

impl WithdrawalFlow {
    pub fn new(store: Arc<NoteStore>, prover: Arc<dyn ProofService>) -> Self {
        Self {
            store,
            prover,
            listeners: None,
        }
    }

    /// Notify these listeners after a confirmed spend.
    pub fn with_listeners(mut self, listeners: Arc<NoteListeners>) -> Self {
        self.listeners = Some(listeners);
        self
    }

    pub fn prepare(&self, commitment: &CommitmentValue) -> Result<WithdrawalProofInputs, WithdrawalError> {
        let note = self
            .store
            .get_note(commitment)
            .ok_or_else(|| WithdrawalError::NoteNotFound(commitment.short_hex()))?;
        prepare_withdrawal_proof_inputs(&note)
    }

    pub async fn request_proof(&self, commitment: &CommitmentValue) -> Result<WithdrawalProof, WithdrawalError> {
        let inputs = self.prepare(commitment)?;
        let proof = self.prover.prove_withdrawal(&inputs).await?;
        info!(commitment = %commitment.short_hex(), "withdrawal proof received");
        Ok(proof)
    }

    /// Record the spend after the withdrawal transaction is confirmed.
    pub fn confirm(&self, commitment: &CommitmentValue) -> Result<SpendOutcome, WithdrawalError> {
        let outcome = self.store.mark_spent(commitment)?;
        match outcome {
            SpendOutcome::Spent => {
                if let Some(listeners) = &self.listeners {
                    listeners.notify(&self.store.get_available_notes());
                }
            }
            SpendOutcome::AlreadySpent => {
                warn!(commitment = %commitment.short_hex(), "withdrawal confirmed twice");
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use zeroize::Zeroizing;

    use crate::crypto::keys::{EphemeralKeyPair, StealthKeypair};
    use crate::discovery::events::DepositObserved;
    use crate::notes::store::NoteStoreConfig;
    use crate::storage::{MemoryStore, RetryPolicy};
    use crate::stealth::derivation::derive_secret_material;

    /// Echoes the nullifier back as the "proof".
    struct EchoProver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProofService for EchoProver {
        async fn prove_withdrawal(
            &self,
            inputs: &WithdrawalProofInputs,
        ) -> Result<WithdrawalProof, WithdrawalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WithdrawalProof {
                proof: inputs.nullifier.to_vec(),
                commitment: inputs.commitment,
                nullifier: inputs.nullifier,
            })
        }
    }

    struct FailingProver;

    #[async_trait]
    impl ProofService for FailingProver {
        async fn prove_withdrawal(
            &self,
            _inputs: &WithdrawalProofInputs,
        ) -> Result<WithdrawalProof, WithdrawalError> {
            Err(WithdrawalError::Proof("prover offline".into()))
        }
    }

    fn note() -> Note {
        let bob = StealthKeypair::generate().unwrap();
        let eph = EphemeralKeyPair::generate().unwrap();
        let epk = eph.public_key_bytes();
        let material = derive_secret_material(&eph.agree(&bob.public_key()).unwrap()).unwrap();
        let deposit = DepositObserved {
            commitment: material.commitment().as_bytes().to_vec(),
            ephemeral_public_key: epk.to_vec(),
            amount: 100_000_000,
            leaf_index: 3,
            block_number: 11,
            timestamp: 0,
        };
        Note::discovered(&deposit, &material)
    }

    fn store_with(note: &Note) -> Arc<NoteStore> {
        let store = NoteStore::open(
            Arc::new(MemoryStore::new()),
            Zeroizing::new([1u8; 32]),
            NoteStoreConfig {
                retry: RetryPolicy::none(),
                ..Default::default()
            },
        )
        .unwrap();
        store.add_note(note.clone()).unwrap();
        Arc::new(store)
    }

    #[test]
    fn inputs_carry_note_fields() {
        let n = note();
        let inputs = prepare_withdrawal_proof_inputs(&n).unwrap();
        assert_eq!(inputs.nullifier, n.nullifier);
        assert_eq!(inputs.secret, n.secret);
        assert_eq!(inputs.commitment, n.commitment);
        assert_eq!(inputs.leaf_index, 3);
    }

    #[test]
    fn spent_note_is_refused() {
        let mut n = note();
        n.status = NoteStatus::Spent;
        assert!(matches!(
            prepare_withdrawal_proof_inputs(&n),
            Err(WithdrawalError::AlreadySpent(_))
        ));
    }

    #[test]
    fn corrupted_note_is_refused() {
        let mut n = note();
        n.secret[5] ^= 0x10;
        assert!(matches!(
            prepare_withdrawal_proof_inputs(&n),
            Err(WithdrawalError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn debug_hides_secrets() {
        let n = note();
        let inputs = prepare_withdrawal_proof_inputs(&n).unwrap();
        assert!(!format!("{inputs:?}").contains(&hex::encode(n.secret)));
    }

    #[tokio::test]
    async fn full_flow_marks_spent_and_notifies() {
        let n = note();
        let store = store_with(&n);
        let prover = Arc::new(EchoProver {
            calls: AtomicUsize::new(0),
        });
        let listeners = Arc::new(NoteListeners::new());
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let s = seen.clone();
        listeners.add(Arc::new(move |notes: &[Note]| s.store(notes.len(), Ordering::SeqCst)));

        let flow = WithdrawalFlow::new(store.clone(), prover.clone()).with_listeners(listeners);
        let proof = flow.request_proof(&n.commitment).await.unwrap();
        assert_eq!(proof.nullifier, n.nullifier);
        assert_eq!(prover.calls.load(Ordering::SeqCst), 1);

        assert_eq!(flow.confirm(&n.commitment).unwrap(), SpendOutcome::Spent);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(flow.confirm(&n.commitment).unwrap(), SpendOutcome::AlreadySpent);

        // A spent note cannot be proven again.
        assert!(matches!(
            flow.request_proof(&n.commitment).await,
            Err(WithdrawalError::AlreadySpent(_))
        ));
        assert_eq!(prover.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prover_failure_leaves_note_available() {
        let n = note();
        let store = store_with(&n);
        let flow = WithdrawalFlow::new(store.clone(), Arc::new(FailingProver));
        assert!(matches!(
            flow.request_proof(&n.commitment).await,
            Err(WithdrawalError::Proof(_))
        ));
        assert_eq!(store.get_available_notes().len(), 1);
    }

    #[test]
    fn unknown_commitment() {
        let n = note();
        let store = store_with(&n);
        let flow = WithdrawalFlow::new(store, Arc::new(FailingProver));
        let other = note().commitment;
        assert!(matches!(
            flow.prepare(&other),
            Err(WithdrawalError::NoteNotFound(_))
        ));
        assert!(matches!(
            flow.confirm(&other),
            Err(WithdrawalError::Store(NoteStoreError::NoteNotFound(_)))
        ));
    }
}
