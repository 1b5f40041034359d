//! Long-term stealth key custody.
//!
//! The private key is sealed with AES-256-GCM under a key-encryption key the
//! [`Authenticator`] derives from a fresh salt, and lands in the secure
//! namespace. The public key and a metadata record go to the local
//! namespace, where reading them needs no authentication.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::auth::Authenticator;
use crate::config::{HKDF_SALT, KEY_AGREEMENT_ALGORITHM, KEY_LENGTH, NOTE_SEALING_INFO, PRIVATE_KEY_AAD};
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad, EncryptionError};
use crate::crypto::kdf::{hkdf_sha256, random_salt, KdfError};
use crate::crypto::keys::{KeyError, StealthKeypair, StealthPublicKey, StealthSecretKey};
use crate::storage::{
    load_record, save_record, KeyValueStore, RetryPolicy, KEY_METADATA, KEY_PRIVATE, KEY_PUBLIC,
};

impl From<KdfError> for KeyError {
    fn from(e: KdfError) -> Self {
        match e {
            KdfError::Entropy => KeyError::Entropy(e.to_string()),
            other => KeyError::KeyDerivation(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A freshly generated identity, before or after it has been stored.
#[derive(Clone)]
pub struct KeyPair {
    pub keypair: StealthKeypair,
    pub key_id: String,
    pub created_at: DateTime<Utc>,
}

impl KeyPair {
    pub fn public_key(&self) -> StealthPublicKey {
        self.keypair.public_key()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id)
            .field("public_key", &self.keypair.public_key())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// The non-secret description of a provisioned identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub public_key: StealthPublicKey,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
}

/// What `generate_and_store_keys` hands back to the setup flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedKeys {
    pub public_key: StealthPublicKey,
    pub key_id: String,
}

impl From<&KeyMetadata> for ProvisionedKeys {
    fn from(meta: &KeyMetadata) -> Self {
        Self {
            public_key: meta.public_key,
            key_id: meta.key_id.clone(),
        }
    }
}

/// The sealed private key as stored in the secure namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedSecret {
    pub salt: Vec<u8>,
    /// `nonce || ciphertext || tag`.
    pub ciphertext: Vec<u8>,
}

// ---------------------------------------------------------------------------
// KeyManager
// ---------------------------------------------------------------------------

pub struct KeyManager {
    secure: Arc<dyn KeyValueStore>,
    local: Arc<dyn KeyValueStore>,
    auth: Arc<dyn Authenticator>,
    retry: RetryPolicy,
}

impl KeyManager {
    pub fn new(
        secure: Arc<dyn KeyValueStore>,
        local: Arc<dyn KeyValueStore>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            secure,
            local,
            auth,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fresh key pair from the OS RNG. Nothing is persisted.
    pub fn generate_key_pair(&self) -> Result<KeyPair, KeyError> {
        Self::wrap(StealthKeypair::generate()?)
    }

    pub fn generate_key_pair_from_rng<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<KeyPair, KeyError> {
        Self::wrap(StealthKeypair::generate_from_rng(rng)?)
    }

    fn wrap(keypair: StealthKeypair) -> Result<KeyPair, KeyError> {
        Ok(KeyPair {
            keypair,
            key_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        })
    }

    /// Persist `key_pair`. If an identity is already provisioned, its
    /// metadata is returned and nothing is overwritten.
    pub fn store(&self, key_pair: &KeyPair) -> Result<KeyMetadata, KeyError> {
        if let Some(existing) = self.metadata()? {
            info!(key_id = %existing.key_id, "stealth key already provisioned, keeping it");
            return Ok(existing);
        }

        let salt = random_salt()?;
        let kek = self.auth.key_encryption_key(&salt)?;
        let secret = key_pair.keypair.secret_key().to_bytes();
        let ciphertext = encrypt_with_aad(&kek, &secret[..], PRIVATE_KEY_AAD)
            .map_err(|e| match e {
                EncryptionError::Entropy => KeyError::Entropy(e.to_string()),
                other => KeyError::KeyDerivation(other.to_string()),
            })?;
        let sealed = SealedSecret {
            salt: salt.to_vec(),
            ciphertext,
        };

        let public = key_pair.public_key();
        let metadata = KeyMetadata {
            key_id: key_pair.key_id.clone(),
            public_key: public,
            algorithm: KEY_AGREEMENT_ALGORITHM.to_string(),
            created_at: key_pair.created_at,
        };

        // Metadata goes last: its presence is what marks the identity as
        // provisioned.
        self.retry
            .run("store private key", || save_record(self.secure.as_ref(), KEY_PRIVATE, &sealed))?;
        self.retry.run("store public key", || {
            self.local.put(KEY_PUBLIC, public.as_bytes())?;
            self.local.flush()
        })?;
        self.retry
            .run("store key metadata", || save_record(self.local.as_ref(), KEY_METADATA, &metadata))?;

        info!(key_id = %metadata.key_id, "stealth key provisioned");
        Ok(metadata)
    }

    pub fn metadata(&self) -> Result<Option<KeyMetadata>, KeyError> {
        Ok(load_record(self.local.as_ref(), KEY_METADATA)?)
    }

    /// The public key. No authentication needed.
    pub fn get_public_key(&self) -> Result<Option<StealthPublicKey>, KeyError> {
        match self.local.get(KEY_PUBLIC)? {
            Some(bytes) => Ok(Some(StealthPublicKey::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Unseal the private key. Goes through the authenticator every call.
    pub fn get_private_key(&self) -> Result<Option<StealthSecretKey>, KeyError> {
        let sealed: SealedSecret = match load_record(self.secure.as_ref(), KEY_PRIVATE)? {
            Some(sealed) => sealed,
            None => return Ok(None),
        };

        let kek = self.auth.key_encryption_key(&sealed.salt)?;
        let plaintext = Zeroizing::new(
            decrypt_with_aad(&kek, &sealed.ciphertext, PRIVATE_KEY_AAD)
                .map_err(|_| KeyError::AuthenticationFailed)?,
        );
        let bytes: [u8; KEY_LENGTH] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidKey("sealed private key has wrong length".into()))?;
        let secret = StealthSecretKey::from_bytes(bytes);

        if let Some(public) = self.get_public_key()? {
            if secret.public_key() != public {
                return Err(KeyError::KeypairMismatch);
            }
        }
        debug!("private key unsealed");
        Ok(Some(secret))
    }

    /// Purge the identity. Irreversible: notes addressed to the old public
    /// key become undiscoverable.
    pub fn delete(&self) -> Result<(), KeyError> {
        let key_id = self.metadata()?.map(|m| m.key_id);
        warn!(?key_id, "deleting stealth key material");
        // Metadata goes first, the mirror of `store`.
        self.retry.run("delete key metadata", || self.local.remove(KEY_METADATA))?;
        self.retry.run("delete private key", || self.secure.remove(KEY_PRIVATE))?;
        self.retry.run("delete public key", || self.local.remove(KEY_PUBLIC))?;
        self.secure.flush()?;
        self.local.flush()?;
        Ok(())
    }

    /// Generate and persist on first use; afterwards return what exists.
    pub fn generate_and_store_keys(&self) -> Result<ProvisionedKeys, KeyError> {
        if let Some(existing) = self.metadata()? {
            return Ok(ProvisionedKeys::from(&existing));
        }
        let key_pair = self.generate_key_pair()?;
        let metadata = self.store(&key_pair)?;
        Ok(ProvisionedKeys::from(&metadata))
    }

    /// Symmetric key protecting the note store, derived from the private key.
    pub fn note_sealing_key(&self) -> Result<Zeroizing<[u8; 32]>, KeyError> {
        let secret = self
            .get_private_key()?
            .ok_or_else(|| KeyError::InvalidKey("no stealth key provisioned".into()))?;
        Ok(sealing_key_for(&secret)?)
    }
}

/// `HKDF-SHA256(salt=0^32, ikm=private_key, info="shroud-note-store-v1")`.
pub fn sealing_key_for(secret: &StealthSecretKey) -> Result<Zeroizing<[u8; 32]>, KdfError> {
    hkdf_sha256(&HKDF_SALT, &secret.to_bytes()[..], NOTE_SEALING_INFO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::auth::PassphraseAuthenticator;
    use crate::storage::MemoryStore;

    struct Fixture {
        secure: Arc<MemoryStore>,
        local: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                secure: Arc::new(MemoryStore::new()),
                local: Arc::new(MemoryStore::new()),
            }
        }

        fn manager(&self, auth: PassphraseAuthenticator) -> KeyManager {
            KeyManager::new(self.secure.clone(), self.local.clone(), Arc::new(auth))
                .with_retry_policy(RetryPolicy::none())
        }
    }

    #[test]
    fn store_then_read_back() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        let kp = km.generate_key_pair().unwrap();
        let meta = km.store(&kp).unwrap();

        assert_eq!(meta.key_id, kp.key_id);
        assert_eq!(meta.algorithm, "X25519");
        assert_eq!(km.get_public_key().unwrap(), Some(kp.public_key()));
        let secret = km.get_private_key().unwrap().unwrap();
        assert_eq!(secret.public_key(), kp.public_key());
    }

    #[test]
    fn private_key_is_not_stored_in_clear() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        let kp = km.generate_key_pair().unwrap();
        km.store(&kp).unwrap();

        let raw = fx.secure.get(KEY_PRIVATE).unwrap().unwrap();
        let secret = kp.keypair.secret_key().to_bytes();
        assert!(!raw.windows(32).any(|w| w == &secret[..]));
        assert!(fx.local.get(KEY_PRIVATE).unwrap().is_none());
    }

    #[test]
    fn store_is_idempotent() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        let first = km.generate_key_pair().unwrap();
        let second = km.generate_key_pair().unwrap();

        let m1 = km.store(&first).unwrap();
        let m2 = km.store(&second).unwrap();
        assert_eq!(m1, m2);
        assert_eq!(km.get_public_key().unwrap(), Some(first.public_key()));
    }

    #[test]
    fn generate_and_store_keys_returns_existing() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        let a = km.generate_and_store_keys().unwrap();
        let b = km.generate_and_store_keys().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn locked_authenticator_gates_private_key_only() {
        let fx = Fixture::new();
        fx.manager(PassphraseAuthenticator::new("pw"))
            .generate_and_store_keys()
            .unwrap();

        let locked = fx.manager(PassphraseAuthenticator::locked());
        assert!(locked.get_public_key().unwrap().is_some());
        assert!(matches!(
            locked.get_private_key(),
            Err(KeyError::AuthenticationRequired)
        ));
    }

    #[test]
    fn wrong_passphrase_fails_authentication() {
        let fx = Fixture::new();
        fx.manager(PassphraseAuthenticator::new("pw"))
            .generate_and_store_keys()
            .unwrap();

        let wrong = fx.manager(PassphraseAuthenticator::new("not-pw"));
        assert!(matches!(
            wrong.get_private_key(),
            Err(KeyError::AuthenticationFailed)
        ));
    }

    #[test]
    fn swapped_public_key_is_detected() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        km.generate_and_store_keys().unwrap();

        let other = StealthKeypair::generate().unwrap().public_key();
        fx.local.put(KEY_PUBLIC, other.as_bytes()).unwrap();
        assert!(matches!(km.get_private_key(), Err(KeyError::KeypairMismatch)));
    }

    #[test]
    fn delete_purges_everything() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        km.generate_and_store_keys().unwrap();
        km.delete().unwrap();

        assert!(km.get_public_key().unwrap().is_none());
        assert!(km.get_private_key().unwrap().is_none());
        assert!(km.metadata().unwrap().is_none());
        assert!(fx.secure.is_empty());
        assert!(fx.local.is_empty());
    }

    #[test]
    fn failed_delete_leaves_a_usable_identity() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        let provisioned = km.generate_and_store_keys().unwrap();

        fx.local.fail_next_writes(1);
        assert!(matches!(km.delete(), Err(KeyError::Storage(_))));
        assert!(km.metadata().unwrap().is_some());
        let secret = km.get_private_key().unwrap().unwrap();
        assert_eq!(secret.public_key(), provisioned.public_key);
    }

    #[test]
    fn half_deleted_identity_can_be_provisioned_again() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        let old = km.generate_and_store_keys().unwrap();

        fx.secure.fail_next_writes(1);
        assert!(km.delete().is_err());
        assert!(km.metadata().unwrap().is_none());

        let fresh = km.generate_and_store_keys().unwrap();
        assert_ne!(fresh.key_id, old.key_id);
        let secret = km.get_private_key().unwrap().unwrap();
        assert_eq!(secret.public_key(), fresh.public_key);
    }

    #[test]
    fn empty_store_returns_none() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::locked());
        assert!(km.get_public_key().unwrap().is_none());
        assert!(km.get_private_key().unwrap().is_none());
    }

    #[test]
    fn sealing_key_is_stable_and_needs_a_key() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        assert!(km.note_sealing_key().is_err());

        km.generate_and_store_keys().unwrap();
        let a = km.note_sealing_key().unwrap();
        let b = km.note_sealing_key().unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn storage_failure_surfaces_as_key_error() {
        let fx = Fixture::new();
        let km = fx.manager(PassphraseAuthenticator::new("pw"));
        let kp = km.generate_key_pair().unwrap();
        fx.secure.fail_next_writes(1);
        assert!(matches!(km.store(&kp), Err(KeyError::Storage(_))));
        assert!(km.metadata().unwrap().is_none());
    }

    #[test]
    fn transient_storage_failure_is_retried() {
        let fx = Fixture::new();
        let km = KeyManager::new(
            fx.secure.clone(),
            fx.local.clone(),
            Arc::new(PassphraseAuthenticator::new("pw")),
        )
        .with_retry_policy(RetryPolicy {
            attempts: 3,
            backoff: std::time::Duration::from_millis(1),
        });
        let kp = km.generate_key_pair().unwrap();
        fx.secure.fail_next_writes(2);
        km.store(&kp).unwrap();
        assert!(km.metadata().unwrap().is_some());
    }
}
