//! # Protocol Configuration & Constants
//!
//! Every magic number in SHROUD lives here. Most of them are part of the
//! commitment derivation, which means sender and recipient implementations
//! must agree on them bit for bit. Changing any value in the "Derivation"
//! section orphans every commitment ever created with the old value.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string of the commitment protocol.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Protocol fingerprint used in storage domain tags.
pub const PROTOCOL_FINGERPRINT: &str = "SHROUD-STEALTH-2026";

// ---------------------------------------------------------------------------
// Key Parameters
// ---------------------------------------------------------------------------

/// X25519 for key agreement. Montgomery form of Curve25519.
pub const KEY_AGREEMENT_ALGORITHM: &str = "X25519";

/// Length of X25519 public and private keys in bytes.
pub const KEY_LENGTH: usize = 32;

/// Bech32m human-readable prefix for stealth addresses handed to senders.
pub const ADDRESS_HRP: &str = "shroud";

/// Argon2 salt length used when sealing the private key.
pub const KEY_SEAL_SALT_LENGTH: usize = 16;

/// AES-256 key length for at-rest sealing.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length (96 bits).
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length.
pub const AES_TAG_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// HKDF salt: 32 zero bytes.
pub const HKDF_SALT: [u8; 32] = [0u8; 32];

/// HKDF info string for the note secret.
pub const SECRET_INFO: &[u8] = b"string1";

/// HKDF info string for the note nullifier.
pub const NULLIFIER_INFO: &[u8] = b"string2";

/// Output length of each HKDF expansion.
pub const DERIVED_LENGTH: usize = 32;

/// HKDF info string for the note store sealing key.
pub const NOTE_SEALING_INFO: &[u8] = b"shroud-note-store-v1";

/// Domain tag for deterministic note ids.
pub const NOTE_ID_CONTEXT: &str = "shroud v1 note id";

// ---------------------------------------------------------------------------
// Algebraic Hash (Poseidon over BN254 Fr)
// ---------------------------------------------------------------------------

/// Bit size of the BN254 scalar field modulus.
pub const POSEIDON_PRIME_BITS: u64 = 254;

/// Sponge rate.
pub const POSEIDON_RATE: usize = 2;

/// Sponge capacity.
pub const POSEIDON_CAPACITY: usize = 1;

/// Full rounds (split evenly before and after the partial rounds).
pub const POSEIDON_FULL_ROUNDS: usize = 8;

/// Partial rounds for t = 3 at the 128-bit security level.
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// S-box exponent.
pub const POSEIDON_ALPHA: u64 = 5;

// ---------------------------------------------------------------------------
// Note Store
// ---------------------------------------------------------------------------

/// Default upper bound on stored notes.
pub const DEFAULT_NOTE_CAPACITY: usize = 10_000;

/// Associated data bound into the sealed note list.
pub const NOTE_STORE_AAD: &[u8] = b"shroud-note-store-v1";

/// Associated data bound into the sealed private key.
pub const PRIVATE_KEY_AAD: &[u8] = b"shroud-private-key-v1";

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Number of deposit events verified per batch.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 256;

/// Batches smaller than this are verified on the calling thread.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

/// Blocks below the cursor fetched again on incremental scans and
/// resubscribes, for deposits delivered late or out of order.
pub const DEFAULT_SCAN_LOOKBACK: u64 = 64;

/// Delay before re-subscribing after the live stream closes or fails.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Storage retries
// ---------------------------------------------------------------------------

/// Attempts made for a storage write before the error is surfaced.
pub const STORAGE_RETRY_ATTEMPTS: u32 = 3;

/// Initial backoff between storage attempts; doubles every retry.
pub const STORAGE_RETRY_BACKOFF: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Decimal places of the transferred asset. Display only; amounts are
/// always integers in the smallest unit.
pub const AMOUNT_DECIMALS: u8 = 8;

/// One whole unit in base units.
pub const BASE_UNITS_PER_COIN: u64 = 100_000_000;
