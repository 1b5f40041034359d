//! Sender side: one fresh commitment per payment.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::derivation::{derive_secret_material, CommitmentValue};
use super::CommitmentError;
use crate::config::KEY_LENGTH;
use crate::crypto::keys::{EphemeralKeyPair, StealthPublicKey};

/// What the sender publishes alongside the deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCommitment {
    pub commitment: CommitmentValue,
    #[serde(with = "hex::serde")]
    pub ephemeral_public_key: [u8; KEY_LENGTH],
}

/// Stateless. Cheap to construct, safe to share.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommitmentGenerator;

impl CommitmentGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Commit to `recipient_public_key` with a fresh ephemeral key.
    ///
    /// The recipient key is validated before any randomness is drawn.
    pub fn create_commitment(
        &self,
        recipient_public_key: &[u8],
    ) -> Result<CreatedCommitment, CommitmentError> {
        let recipient = StealthPublicKey::try_from_slice(recipient_public_key)?;
        let ephemeral = EphemeralKeyPair::generate()?;
        self.create_commitment_with(ephemeral, &recipient)
    }

    /// Commit with a caller-supplied ephemeral key. The key is consumed.
    pub fn create_commitment_with(
        &self,
        ephemeral: EphemeralKeyPair,
        recipient: &StealthPublicKey,
    ) -> Result<CreatedCommitment, CommitmentError> {
        let ephemeral_public_key = ephemeral.public_key_bytes();
        let shared = ephemeral.agree(recipient)?;
        let material = derive_secret_material(&shared)?;
        let commitment = material.commitment();

        debug!(commitment = %commitment.short_hex(), "commitment created");
        Ok(CreatedCommitment {
            commitment,
            ephemeral_public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::StealthKeypair;

    #[test]
    fn rejects_wrong_length_recipient() {
        let gen = CommitmentGenerator::new();
        assert!(matches!(
            gen.create_commitment(&[7u8; 31]),
            Err(CommitmentError::InvalidKey(_))
        ));
        assert!(matches!(
            gen.create_commitment(&[]),
            Err(CommitmentError::InvalidKey(_))
        ));
    }

    #[test]
    fn rejects_low_order_recipient() {
        let gen = CommitmentGenerator::new();
        assert!(matches!(
            gen.create_commitment(&[0u8; 32]),
            Err(CommitmentError::InvalidKey(_))
        ));
    }

    #[test]
    fn deterministic_with_same_ephemeral() {
        let gen = CommitmentGenerator::new();
        let recipient = StealthKeypair::from_secret_bytes([5u8; 32]).public_key();
        let a = gen
            .create_commitment_with(EphemeralKeyPair::from_secret_bytes([9u8; 32]), &recipient)
            .unwrap();
        let b = gen
            .create_commitment_with(EphemeralKeyPair::from_secret_bytes([9u8; 32]), &recipient)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_ephemeral_every_time() {
        let gen = CommitmentGenerator::new();
        let recipient = StealthKeypair::generate().unwrap().public_key();
        let a = gen.create_commitment(recipient.as_bytes()).unwrap();
        let b = gen.create_commitment(recipient.as_bytes()).unwrap();
        assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
        assert_ne!(a.commitment, b.commitment);
    }

    #[test]
    fn serializes_with_hex_fields() {
        let gen = CommitmentGenerator::new();
        let recipient = StealthKeypair::generate().unwrap().public_key();
        let c = gen.create_commitment(recipient.as_bytes()).unwrap();
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json["ephemeral_public_key"].as_str().unwrap(),
            hex::encode(c.ephemeral_public_key)
        );
    }
}
