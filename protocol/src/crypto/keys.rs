//! # Key Types
//!
//! X25519 key material for stealth commitments.
//!
//! Every recipient holds one long-term [`StealthKeypair`]. Its public half is
//! the only thing a sender ever needs; it is handed out as a bech32m
//! [stealth address](StealthPublicKey::to_address). Every commitment a sender
//! creates uses a fresh [`EphemeralKeyPair`] whose private half is consumed by
//! the key agreement and zeroized right after.
//!
//! ## Security considerations
//!
//! - Secret scalars are zeroized on drop (x25519-dalek's `zeroize` feature).
//! - We use the OS RNG (`OsRng`) for key generation and surface an RNG failure
//!   as [`KeyError::Entropy`] instead of panicking.
//! - Key agreements against low-order points are rejected: they produce a
//!   predictable all-zero shared secret.
//! - Key bytes are never logged and never appear in `Debug` output.

use std::fmt;

use bech32::{Bech32m, Hrp};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::config::{ADDRESS_HRP, KEY_LENGTH};
use crate::storage::StorageError;

/// Errors that can occur during key generation, parsing and custody.
///
/// Kept vague about *why* a key was rejected.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secure random number generator unavailable: {0}")]
    Entropy(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("keypair validation failed: public key does not match secret key")]
    KeypairMismatch,

    #[error("invalid stealth address: {0}")]
    InvalidAddress(String),

    #[error("authentication required to access the private key")]
    AuthenticationRequired,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("key storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Fill a 32-byte seed from `rng`, surfacing RNG failure as `KeyError::Entropy`.
fn fresh_seed<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Zeroizing<[u8; 32]>, KeyError> {
    let mut seed = Zeroizing::new([0u8; KEY_LENGTH]);
    rng.try_fill_bytes(&mut seed[..])
        .map_err(|e| KeyError::Entropy(e.to_string()))?;
    Ok(seed)
}

// ---------------------------------------------------------------------------
// StealthSecretKey
// ---------------------------------------------------------------------------

/// The recipient's long-term private key. 32 bytes of pure responsibility:
/// losing it makes every note addressed to the matching public key
/// permanently undiscoverable.
#[derive(Clone)]
pub struct StealthSecretKey(StaticSecret);

impl StealthSecretKey {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Export the raw secret bytes. The returned buffer zeroizes on drop.
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_LENGTH]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// Re-derive the matching public key.
    pub fn public_key(&self) -> StealthPublicKey {
        StealthPublicKey::from_bytes(PublicKey::from(&self.0).to_bytes())
    }

    /// X25519 with a peer public key. Rejects non-contributory results.
    pub fn diffie_hellman(&self, peer: &StealthPublicKey) -> Result<SharedSecret, KeyError> {
        let shared = self.0.diffie_hellman(&peer.to_x25519());
        if !shared.was_contributory() {
            return Err(KeyError::InvalidKey("low-order public key".into()));
        }
        Ok(shared)
    }
}

impl fmt::Debug for StealthSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StealthSecretKey(pub={})", self.public_key().short_hex())
    }
}

// ---------------------------------------------------------------------------
// StealthKeypair
// ---------------------------------------------------------------------------

/// A recipient identity: long-term X25519 secret plus its public key.
///
/// `StealthKeypair` intentionally does NOT implement `Serialize`. Persisting
/// the secret goes through the sealed keystore, never through serde.
///
/// # Examples
///
/// ```
/// use shroud_protocol::crypto::keys::StealthKeypair;
///
/// let kp = StealthKeypair::generate().unwrap();
/// let address = kp.public_key().to_address();
/// assert!(address.starts_with("shroud1"));
/// ```
#[derive(Clone)]
pub struct StealthKeypair {
    secret: StealthSecretKey,
    public: StealthPublicKey,
}

impl StealthKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Result<Self, KeyError> {
        Self::generate_from_rng(&mut OsRng)
    }

    /// Generate a keypair from any cryptographic RNG.
    pub fn generate_from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, KeyError> {
        let seed = fresh_seed(rng)?;
        Ok(Self::from_secret_bytes(*seed))
    }

    /// Reconstruct a keypair from raw secret bytes. The public key is
    /// re-derived so the two halves can never disagree.
    pub fn from_secret_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self::from_secret(StealthSecretKey::from_bytes(bytes))
    }

    /// Build a keypair around an existing secret key.
    pub fn from_secret(secret: StealthSecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_key(&self) -> StealthPublicKey {
        self.public
    }

    pub fn secret_key(&self) -> &StealthSecretKey {
        &self.secret
    }

    /// Consume the keypair and keep only the secret half.
    pub fn into_secret(self) -> StealthSecretKey {
        self.secret
    }
}

impl fmt::Debug for StealthKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StealthKeypair(pub={})", self.public.to_hex())
    }
}

impl PartialEq for StealthKeypair {
    /// Compared by public key; secret material is never compared directly.
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for StealthKeypair {}

// ---------------------------------------------------------------------------
// StealthPublicKey
// ---------------------------------------------------------------------------

/// The public half of a recipient identity, safe to share with the world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StealthPublicKey {
    bytes: [u8; KEY_LENGTH],
}

impl StealthPublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Length-checked construction from an untrusted slice.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LENGTH] = slice.try_into().map_err(|_| {
            KeyError::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                slice.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.bytes
    }

    pub fn to_x25519(&self) -> PublicKey {
        PublicKey::from(self.bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::try_from_slice(&bytes)
    }

    /// Encode as a bech32m stealth address (`shroud1...`). This is the string
    /// a recipient hands to senders out-of-band.
    pub fn to_address(&self) -> String {
        let hrp = Hrp::parse(ADDRESS_HRP).expect("static HRP is valid");
        bech32::encode::<Bech32m>(hrp, &self.bytes)
            .expect("encoding a 32-byte payload should never fail")
    }

    /// Parse a bech32m stealth address, validating HRP and payload length.
    pub fn from_address(addr: &str) -> Result<Self, KeyError> {
        let (hrp, data) =
            bech32::decode(addr).map_err(|e| KeyError::InvalidAddress(e.to_string()))?;
        let expected = Hrp::parse(ADDRESS_HRP).expect("static HRP is valid");
        if hrp != expected {
            return Err(KeyError::InvalidAddress(format!(
                "expected prefix '{ADDRESS_HRP}', got '{hrp}'"
            )));
        }
        Self::try_from_slice(&data).map_err(|e| KeyError::InvalidAddress(e.to_string()))
    }

    /// Accept either a stealth address or a hex-encoded key.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let s = s.trim();
        if s.starts_with(ADDRESS_HRP) {
            Self::from_address(s)
        } else {
            Self::from_hex(s)
        }
    }

    fn short_hex(&self) -> String {
        hex::encode(&self.bytes[..8])
    }
}

impl fmt::Display for StealthPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StealthPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StealthPublicKey({})", self.short_hex())
    }
}

// ---------------------------------------------------------------------------
// EphemeralKeyPair
// ---------------------------------------------------------------------------

/// Single-use sender key. Only the public half leaves this struct.
///
/// [`agree`](Self::agree) takes `self` by value, so the private scalar cannot
/// be reused after the key agreement, and it is zeroized when dropped.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Fresh ephemeral key from the OS RNG.
    pub fn generate() -> Result<Self, KeyError> {
        Self::generate_from_rng(&mut OsRng)
    }

    pub fn generate_from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, KeyError> {
        let seed = fresh_seed(rng)?;
        Ok(Self::from_secret_bytes(*seed))
    }

    /// Deterministic construction, for test vectors and reproducibility checks.
    pub fn from_secret_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; KEY_LENGTH] {
        self.public.to_bytes()
    }

    /// Perform the key agreement with the recipient and destroy the secret.
    pub fn agree(self, recipient: &StealthPublicKey) -> Result<SharedSecret, KeyError> {
        let shared = self.secret.diffie_hellman(&recipient.to_x25519());
        if !shared.was_contributory() {
            return Err(KeyError::InvalidKey("low-order recipient key".into()));
        }
        Ok(shared)
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EphemeralKeyPair(pub={})", hex::encode(self.public.as_bytes()))
    }
}
