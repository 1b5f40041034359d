//! Shared-secret to commitment derivation.
//!
//! Sender and recipient both run exactly this code path; the only difference
//! is which side of the key agreement they hold.
//!
//! ```text
//! secret     = HKDF-SHA256(salt = 0^32, ikm = shared, info = "string1")
//! nullifier  = HKDF-SHA256(salt = 0^32, ikm = shared, info = "string2")
//! commitment = Poseidon(limbs(secret) || limbs(nullifier))
//! ```

use std::fmt;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CommitmentError;
use crate::config::{DERIVED_LENGTH, HKDF_SALT, NULLIFIER_INFO, SECRET_INFO};
use crate::crypto::hash::algebraic_hash;
use crate::crypto::kdf::hkdf_sha256;

// ---------------------------------------------------------------------------
// CommitmentValue
// ---------------------------------------------------------------------------

/// A BN254 scalar encoded as 32 little-endian bytes.
///
/// Equality is byte equality. A non-canonical encoding (a value at or above
/// the field modulus) never equals a recomputed commitment. Serialized as
/// hex for human-readable formats and as raw bytes for bincode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitmentValue([u8; 32]);

impl CommitmentValue {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, CommitmentError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| {
            CommitmentError::InvalidInput(format!("commitment must be 32 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_field(f: Fr) -> Self {
        let bytes = f.into_bigint().to_bytes_le();
        let mut arr = [0u8; 32];
        arr[..bytes.len()].copy_from_slice(&bytes);
        Self(arr)
    }

    pub fn to_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CommitmentError> {
        let bytes = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| CommitmentError::InvalidInput(e.to_string()))?;
        Self::try_from_slice(&bytes)
    }

    /// First 8 bytes in hex. What the logs get.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Serialize for CommitmentValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for CommitmentValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            Ok(Self(<[u8; 32]>::deserialize(deserializer)?))
        }
    }
}

impl AsRef<[u8]> for CommitmentValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CommitmentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CommitmentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitmentValue({})", self.short_hex())
    }
}

// ---------------------------------------------------------------------------
// DerivedSecretMaterial
// ---------------------------------------------------------------------------

/// Everything derived from one key agreement. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedSecretMaterial {
    shared_secret: [u8; 32],
    secret: [u8; DERIVED_LENGTH],
    nullifier: [u8; DERIVED_LENGTH],
}

impl DerivedSecretMaterial {
    pub fn shared_secret(&self) -> &[u8; 32] {
        &self.shared_secret
    }

    pub fn secret(&self) -> &[u8; DERIVED_LENGTH] {
        &self.secret
    }

    pub fn nullifier(&self) -> &[u8; DERIVED_LENGTH] {
        &self.nullifier
    }

    pub fn commitment(&self) -> CommitmentValue {
        compute_commitment(&self.secret, &self.nullifier)
    }
}

impl fmt::Debug for DerivedSecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedSecretMaterial(<redacted>)")
    }
}

/// Split an X25519 shared secret into note secret and nullifier.
pub fn derive_secret_material(shared: &SharedSecret) -> Result<DerivedSecretMaterial, CommitmentError> {
    let ikm = shared.as_bytes();
    let secret = hkdf_sha256(&HKDF_SALT, ikm, SECRET_INFO)
        .map_err(|e| CommitmentError::KeyDerivation(e.to_string()))?;
    let nullifier = hkdf_sha256(&HKDF_SALT, ikm, NULLIFIER_INFO)
        .map_err(|e| CommitmentError::KeyDerivation(e.to_string()))?;
    Ok(DerivedSecretMaterial {
        shared_secret: *ikm,
        secret: *secret,
        nullifier: *nullifier,
    })
}

/// `Poseidon(limbs(secret) || limbs(nullifier))` as a commitment value.
pub fn compute_commitment(
    secret: &[u8; DERIVED_LENGTH],
    nullifier: &[u8; DERIVED_LENGTH],
) -> CommitmentValue {
    CommitmentValue::from_field(algebraic_hash(secret, nullifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{EphemeralKeyPair, StealthKeypair};

    #[test]
    fn field_roundtrip() {
        let c = compute_commitment(&[1u8; 32], &[2u8; 32]);
        assert_eq!(CommitmentValue::from_field(c.to_field()), c);
    }

    #[test]
    fn hex_roundtrip_accepts_prefix() {
        let c = compute_commitment(&[1u8; 32], &[2u8; 32]);
        assert_eq!(CommitmentValue::from_hex(&c.to_hex()).unwrap(), c);
        assert_eq!(CommitmentValue::from_hex(&format!("0x{}", c.to_hex())).unwrap(), c);
    }

    #[test]
    fn json_uses_hex_and_bincode_uses_bytes() {
        let c = compute_commitment(&[1u8; 32], &[2u8; 32]);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"{}\"", c.to_hex()));
        assert_eq!(serde_json::from_str::<CommitmentValue>(&json).unwrap(), c);

        let bin = bincode::serialize(&c).unwrap();
        assert_eq!(bin.len(), 32);
        assert_eq!(bincode::deserialize::<CommitmentValue>(&bin).unwrap(), c);
    }

    #[test]
    fn wrong_length_commitment_rejected() {
        assert!(CommitmentValue::try_from_slice(&[0u8; 31]).is_err());
        assert!(CommitmentValue::from_hex("abcd").is_err());
    }

    #[test]
    fn secret_and_nullifier_differ() {
        let recipient = StealthKeypair::generate().unwrap();
        let shared = EphemeralKeyPair::generate()
            .unwrap()
            .agree(&recipient.public_key())
            .unwrap();
        let m = derive_secret_material(&shared).unwrap();
        assert_ne!(m.secret(), m.nullifier());
        assert_eq!(m.shared_secret(), shared.as_bytes());
    }

    #[test]
    fn debug_is_redacted() {
        let recipient = StealthKeypair::generate().unwrap();
        let shared = EphemeralKeyPair::generate()
            .unwrap()
            .agree(&recipient.public_key())
            .unwrap();
        let m = derive_secret_material(&shared).unwrap();
        let dbg = format!("{m:?}");
        assert!(!dbg.contains(&hex::encode(m.secret())));
    }
}
