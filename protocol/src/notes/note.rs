//! The `Note` model: a discovered deposit plus the secrets to spend it.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::config::{DERIVED_LENGTH, KEY_LENGTH, NOTE_ID_CONTEXT};
use crate::crypto::hash::domain_separated_hash;
use crate::discovery::events::DepositObserved;
use crate::stealth::derivation::{compute_commitment, CommitmentValue, DerivedSecretMaterial};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteStatus {
    Available,
    Spent,
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteStatus::Available => f.write_str("available"),
            NoteStatus::Spent => f.write_str("spent"),
        }
    }
}

/// Deterministic id: hex of the first 16 bytes of a domain-separated BLAKE3
/// hash of the commitment. Redelivered deposits get the same id.
pub fn note_id(commitment: &CommitmentValue) -> String {
    let digest = domain_separated_hash(NOTE_ID_CONTEXT, commitment.as_bytes());
    hex::encode(&digest[..16])
}

/// A deposit addressed to us.
///
/// `secret` and `nullifier` are wiped when the note is dropped and are never
/// printed by `Debug`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub commitment: CommitmentValue,
    pub secret: [u8; DERIVED_LENGTH],
    pub nullifier: [u8; DERIVED_LENGTH],
    pub ephemeral_public_key: [u8; KEY_LENGTH],
    pub leaf_index: u64,
    pub block_number: u64,
    /// Base units.
    pub amount: u64,
    /// Unix seconds, as reported by the ledger.
    pub received_at: i64,
    pub status: NoteStatus,
}

impl Note {
    /// Build an available note from a deposit and the material that proved
    /// ownership of it.
    pub fn discovered(deposit: &DepositObserved, material: &DerivedSecretMaterial) -> Self {
        let commitment = material.commitment();
        let mut ephemeral_public_key = [0u8; KEY_LENGTH];
        if deposit.ephemeral_public_key.len() == KEY_LENGTH {
            ephemeral_public_key.copy_from_slice(&deposit.ephemeral_public_key);
        }
        Self {
            id: note_id(&commitment),
            commitment,
            secret: *material.secret(),
            nullifier: *material.nullifier(),
            ephemeral_public_key,
            leaf_index: deposit.leaf_index,
            block_number: deposit.block_number,
            amount: deposit.amount,
            received_at: deposit.timestamp,
            status: NoteStatus::Available,
        }
    }

    /// `commitment == Poseidon(secret, nullifier)` and the id matches.
    pub fn check_integrity(&self) -> bool {
        compute_commitment(&self.secret, &self.nullifier) == self.commitment
            && self.id == note_id(&self.commitment)
    }

    pub fn is_available(&self) -> bool {
        self.status == NoteStatus::Available
    }
}

impl Drop for Note {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.nullifier.zeroize();
    }
}

impl fmt::Debug for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Note")
            .field("id", &self.id)
            .field("commitment", &self.commitment)
            .field("leaf_index", &self.leaf_index)
            .field("block_number", &self.block_number)
            .field("amount", &self.amount)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{EphemeralKeyPair, StealthKeypair};
    use crate::stealth::derivation::derive_secret_material;

    fn sample() -> Note {
        let bob = StealthKeypair::generate().unwrap();
        let eph = EphemeralKeyPair::generate().unwrap();
        let epk = eph.public_key_bytes();
        let material = derive_secret_material(&eph.agree(&bob.public_key()).unwrap()).unwrap();
        let deposit = DepositObserved {
            commitment: material.commitment().as_bytes().to_vec(),
            ephemeral_public_key: epk.to_vec(),
            amount: 100_000_000,
            leaf_index: 7,
            block_number: 42,
            timestamp: 1_700_000_123,
        };
        Note::discovered(&deposit, &material)
    }

    #[test]
    fn discovered_note_is_consistent() {
        let note = sample();
        assert!(note.check_integrity());
        assert!(note.is_available());
        assert_eq!(note.leaf_index, 7);
        assert_eq!(note.block_number, 42);
        assert_eq!(note.received_at, 1_700_000_123);
        assert_eq!(note.id.len(), 32);
    }

    #[test]
    fn id_is_deterministic() {
        let note = sample();
        assert_eq!(note_id(&note.commitment), note.id);
    }

    #[test]
    fn tampered_secret_fails_integrity() {
        let mut note = sample();
        note.secret[0] ^= 1;
        assert!(!note.check_integrity());
    }

    #[test]
    fn tampered_id_fails_integrity() {
        let mut note = sample();
        note.id = "00".repeat(16);
        assert!(!note.check_integrity());
    }

    #[test]
    fn debug_hides_secrets() {
        let note = sample();
        let dbg = format!("{note:?}");
        assert!(!dbg.contains(&hex::encode(note.secret)));
        assert!(!dbg.contains(&hex::encode(note.nullifier)));
        assert!(dbg.contains(&note.id));
    }
}
