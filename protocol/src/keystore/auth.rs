//! The authentication gate in front of the private key.
//!
//! The key manager never holds a credential itself. It asks an
//! [`Authenticator`] for a key-encryption key every time the private key is
//! sealed or unsealed; whatever challenge the platform has (passphrase,
//! biometric prompt, hardware token) lives behind this trait.

use std::fmt;

use zeroize::Zeroizing;

use crate::crypto::keys::KeyError;
use crate::crypto::kdf::derive_passphrase_key;

pub trait Authenticator: Send + Sync {
    /// Produce the 32-byte key-encryption key bound to `salt`.
    ///
    /// Returns [`KeyError::AuthenticationRequired`] when no credential is
    /// available. A wrong credential is not detectable here; it surfaces as
    /// [`KeyError::AuthenticationFailed`] when unsealing.
    fn key_encryption_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeyError>;
}

/// Argon2id over a passphrase.
pub struct PassphraseAuthenticator {
    passphrase: Option<Zeroizing<String>>,
}

impl PassphraseAuthenticator {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(Zeroizing::new(passphrase.into())),
        }
    }

    /// An authenticator with no credential. Public-key reads still work.
    pub fn locked() -> Self {
        Self { passphrase: None }
    }

    pub fn is_locked(&self) -> bool {
        self.passphrase.is_none()
    }
}

impl Authenticator for PassphraseAuthenticator {
    fn key_encryption_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeyError> {
        let passphrase = self
            .passphrase
            .as_ref()
            .ok_or(KeyError::AuthenticationRequired)?;
        derive_passphrase_key(passphrase.as_bytes(), salt)
            .map_err(|e| KeyError::KeyDerivation(e.to_string()))
    }
}

impl fmt::Debug for PassphraseAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassphraseAuthenticator")
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = b"0123456789abcdef";

    #[test]
    fn locked_requires_authentication() {
        let auth = PassphraseAuthenticator::locked();
        assert!(matches!(
            auth.key_encryption_key(SALT),
            Err(KeyError::AuthenticationRequired)
        ));
    }

    #[test]
    fn same_passphrase_same_kek() {
        let a = PassphraseAuthenticator::new("hunter2");
        let b = PassphraseAuthenticator::new("hunter2");
        assert_eq!(
            *a.key_encryption_key(SALT).unwrap(),
            *b.key_encryption_key(SALT).unwrap()
        );
    }

    #[test]
    fn debug_hides_passphrase() {
        let dbg = format!("{:?}", PassphraseAuthenticator::new("hunter2"));
        assert!(!dbg.contains("hunter2"));
    }
}
