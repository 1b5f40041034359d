//! # Storage Module
//!
//! Everything the wallet persists goes through the [`KeyValueStore`] trait:
//! a flat, string-keyed byte store. Two implementations ship:
//!
//! ```text
//! db.rs      — WalletDb: sled, one pair of trees per identity
//! memory.rs  — MemoryStore: HashMap behind a RwLock, for tests
//! retry.rs   — RetryPolicy: exponential backoff around writes
//! ```
//!
//! Each identity gets two namespaces:
//!
//! | Namespace | Keys                                                        |
//! |-----------|-------------------------------------------------------------|
//! | `secure`  | `stealth.private_key` (sealed)                              |
//! | `local`   | `stealth.public_key`, `stealth.key_metadata`, `notes.sealed`, `discovery.cursor` |
//!
//! Records are bincode. Anything secret is sealed before it reaches a store;
//! the stores themselves never see plaintext key material.

pub mod db;
pub mod memory;
pub mod retry;

pub use db::{IdentityStores, SledStore, WalletDb};
pub use memory::MemoryStore;
pub use retry::RetryPolicy;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Well-known keys
// ---------------------------------------------------------------------------

/// Sealed private key (secure namespace).
pub const KEY_PRIVATE: &str = "stealth.private_key";
/// Raw 32-byte public key (local namespace).
pub const KEY_PUBLIC: &str = "stealth.public_key";
/// bincode `KeyMetadata` (local namespace).
pub const KEY_METADATA: &str = "stealth.key_metadata";
/// Sealed note list (local namespace).
pub const KEY_NOTES: &str = "notes.sealed";
/// Highest processed block number, 8 bytes big-endian (local namespace).
pub const KEY_CURSOR: &str = "discovery.cursor";

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Backend failures may be transient; a record that does not decode
    /// will not decode any better on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Backend(_))
    }
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// A flat byte store. Implementations must be safe to share across threads.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Make previous writes durable. A no-op for volatile stores.
    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Read and bincode-decode a record.
pub fn load_record<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// bincode-encode and write a record, then flush.
pub fn save_record<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let bytes = bincode::serialize(value)?;
    store.put(key, &bytes)?;
    store.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        height: u64,
        label: String,
    }

    #[test]
    fn record_roundtrip_through_memory_store() {
        let store = MemoryStore::new();
        let record = Record {
            height: 42,
            label: "cursor".into(),
        };
        save_record(&store, "r", &record).unwrap();
        assert_eq!(load_record::<Record>(&store, "r").unwrap(), Some(record));
        assert_eq!(load_record::<Record>(&store, "missing").unwrap(), None);
    }

    #[test]
    fn garbage_record_is_serialization_error() {
        let store = MemoryStore::new();
        store.put("r", &[0xff]).unwrap();
        let err = load_record::<Record>(&store, "r").unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
        assert!(!err.is_retryable());
    }
}
