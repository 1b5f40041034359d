//! # WalletDb — Persistent Storage Engine
//!
//! The on-disk layer for the wallet, built on sled's embedded key-value
//! store.
//!
//! ## Tree Layout
//!
//! Every identity owns two named trees:
//!
//! | Tree                 | Key (UTF-8)           | Value                   |
//! |----------------------|-----------------------|-------------------------|
//! | `<identity>/secure`  | `stealth.private_key` | `bincode(SealedSecret)` |
//! | `<identity>/local`   | everything else       | see `storage` module    |
//!
//! Several identities can live in one database without seeing each other's
//! records. Dropping an identity drops both of its trees.

use std::path::Path;
use std::sync::Arc;

use sled::{Db, Tree};

use super::{KeyValueStore, StorageResult};

const SECURE_SUFFIX: &str = "secure";
const LOCAL_SUFFIX: &str = "local";

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// One sled tree exposed as a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct SledStore {
    tree: Tree,
}

impl SledStore {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Number of records in this namespace.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.tree.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        self.tree.flush()?;
        Ok(())
    }
}

/// The secure and local namespaces of one identity.
#[derive(Debug, Clone)]
pub struct IdentityStores {
    pub secure: Arc<SledStore>,
    pub local: Arc<SledStore>,
}

// ---------------------------------------------------------------------------
// WalletDb
// ---------------------------------------------------------------------------

/// Persistent storage for one or more wallet identities.
///
/// # Thread Safety
///
/// sled trees support lock-free concurrent reads and serialized writes, so
/// `WalletDb` and the stores it hands out can be shared via `Arc` freely.
#[derive(Debug, Clone)]
pub struct WalletDb {
    db: Db,
}

impl WalletDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path)?;
        Ok(Self::from_db(db))
    }

    /// A database that lives in memory and disappears on drop. For tests.
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db))
    }

    fn from_db(db: Db) -> Self {
        Self { db }
    }

    /// Open (creating if needed) both namespaces for `identity`.
    pub fn identity(&self, identity: &str) -> StorageResult<IdentityStores> {
        let secure = self.db.open_tree(tree_name(identity, SECURE_SUFFIX))?;
        let local = self.db.open_tree(tree_name(identity, LOCAL_SUFFIX))?;
        Ok(IdentityStores {
            secure: Arc::new(SledStore::new(secure)),
            local: Arc::new(SledStore::new(local)),
        })
    }

    /// Names of identities that have at least one tree in this database.
    pub fn identities(&self) -> Vec<String> {
        let suffix = format!("/{LOCAL_SUFFIX}");
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .into_iter()
            .filter_map(|raw| {
                let name = String::from_utf8(raw.to_vec()).ok()?;
                name.strip_suffix(&suffix).map(str::to_owned)
            })
            .collect();
        names.sort();
        names
    }

    /// Drop both trees of `identity`. Irreversible.
    pub fn drop_identity(&self, identity: &str) -> StorageResult<()> {
        self.db.drop_tree(tree_name(identity, SECURE_SUFFIX))?;
        self.db.drop_tree(tree_name(identity, LOCAL_SUFFIX))?;
        self.db.flush()?;
        Ok(())
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn tree_name(identity: &str, suffix: &str) -> String {
    format!("{identity}/{suffix}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
