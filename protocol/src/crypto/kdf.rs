//! Key derivation: HKDF-SHA256 for protocol material, Argon2id for
//! passphrase-derived sealing keys.

use argon2::Argon2;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{DERIVED_LENGTH, KEY_SEAL_SALT_LENGTH};

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("HKDF expansion failed")]
    Expand,

    #[error("passphrase derivation failed: {0}")]
    Passphrase(String),

    #[error("secure random number generator unavailable")]
    Entropy,
}

/// One HKDF-SHA256 extract-and-expand producing 32 bytes.
pub fn hkdf_sha256(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
) -> Result<Zeroizing<[u8; DERIVED_LENGTH]>, KdfError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new([0u8; DERIVED_LENGTH]);
    hk.expand(info, &mut okm[..])
        .map_err(|_| KdfError::Expand)?;
    Ok(okm)
}

/// Stretch a passphrase into a 32-byte AES key with Argon2id defaults.
pub fn derive_passphrase_key(
    passphrase: &[u8],
    salt: &[u8],
) -> Result<Zeroizing<[u8; 32]>, KdfError> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(passphrase, salt, &mut key[..])
        .map_err(|e| KdfError::Passphrase(e.to_string()))?;
    Ok(key)
}

/// Fresh random salt for [`derive_passphrase_key`].
pub fn random_salt() -> Result<[u8; KEY_SEAL_SALT_LENGTH], KdfError> {
    let mut salt = [0u8; KEY_SEAL_SALT_LENGTH];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|_| KdfError::Entropy)?;
    Ok(salt)
}
