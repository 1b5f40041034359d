//! # At-Rest Sealing (AES-256-GCM)
//!
//! The wallet never writes a private key or a note secret to disk in the
//! clear. Both go through [`encrypt_with_aad`], which binds a purpose label
//! (the AAD) into the authentication tag so a sealed note list can never be
//! opened as a sealed private key and vice versa.
//!
//! ## Format
//!
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`, one contiguous buffer.
//! Nonces are random 96-bit values from the OS RNG. Sealing happens a handful
//! of times per session, far below the birthday bound.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during sealing/unsealing.
///
/// "Wrong key" and "tampered blob" are indistinguishable on purpose.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("sealed blob too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,

    #[error("secure random number generator unavailable")]
    Entropy,
}

/// Seal `plaintext` under `key`, authenticating `aad` alongside it.
///
/// # Example
///
/// ```
/// use shroud_protocol::crypto::encryption::{decrypt_with_aad, encrypt_with_aad};
///
/// let key = [0x42u8; 32];
/// let sealed = encrypt_with_aad(&key, b"note list", b"notes").unwrap();
/// assert_eq!(decrypt_with_aad(&key, &sealed, b"notes").unwrap(), b"note list");
/// assert!(decrypt_with_aad(&key, &sealed, b"keys").is_err());
/// ```
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|_| EncryptionError::Entropy)?;

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut sealed = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a blob produced by [`encrypt_with_aad`]. The AAD must match exactly.
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(7);
        }
        key
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let sealed = encrypt_with_aad(&key, b"three notes, one spent", b"notes").unwrap();
        let opened = decrypt_with_aad(&key, &sealed, b"notes").unwrap();
        assert_eq!(opened, b"three notes, one spent");
    }

    #[test]
    fn test_sealed_length() {
        let key = test_key();
        let sealed = encrypt_with_aad(&key, b"", b"aad").unwrap();
        assert_eq!(sealed.len(), AES_NONCE_LENGTH + AES_TAG_LENGTH);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key();
        let sealed = encrypt_with_aad(&key, b"secret", b"aad").unwrap();
        let mut wrong = key;
        wrong[31] ^= 0x01;
        assert!(matches!(
            decrypt_with_aad(&wrong, &sealed, b"aad"),
            Err(EncryptionError::DecryptFailed)
        ));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let sealed = encrypt_with_aad(&key, b"secret", b"private-key").unwrap();
        assert!(decrypt_with_aad(&key, &sealed, b"note-store").is_err());
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = test_key();
        let mut sealed = encrypt_with_aad(&key, b"secret", b"aad").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert!(decrypt_with_aad(&key, &sealed, b"aad").is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let key = test_key();
        assert!(matches!(
            decrypt_with_aad(&key, &[0u8; 20], b"aad"),
            Err(EncryptionError::CiphertextTooShort)
        ));
    }

    #[test]
    fn test_nonces_differ() {
        let key = test_key();
        let a = encrypt_with_aad(&key, b"same", b"aad").unwrap();
        let b = encrypt_with_aad(&key, b"same", b"aad").unwrap();
        assert_ne!(&a[..AES_NONCE_LENGTH], &b[..AES_NONCE_LENGTH]);
    }
}
