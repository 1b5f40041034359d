//! One opened identity: its database trees and its key manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use shroud_protocol::crypto::{StealthPublicKey, StealthSecretKey};
use shroud_protocol::discovery::{ChainWatcher, DiscoveryConfig, NoteDiscoveryEngine};
use shroud_protocol::keystore::{sealing_key_for, KeyManager, PassphraseAuthenticator};
use shroud_protocol::notes::{NoteStore, NoteStoreConfig};
use shroud_protocol::stealth::{CommitmentVerifier, VerifierConfig};
use shroud_protocol::storage::{IdentityStores, WalletDb};

use crate::cli::GlobalArgs;

const NOT_INITIALIZED: &str = "identity has no stealth key; run `shroud-wallet init` first";

pub struct Session {
    pub identity: String,
    pub data_dir: PathBuf,
    pub stores: IdentityStores,
    pub keys: KeyManager,
    // Keeps the sled handle alive for the stores above.
    _db: WalletDb,
}

impl Session {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let data_dir = expand_home(&global.data_dir);
        let db_path = data_dir.join("db");
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

        let db = WalletDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        let stores = db
            .identity(&global.identity)
            .with_context(|| format!("failed to open identity {:?}", global.identity))?;

        let auth = match &global.passphrase {
            Some(passphrase) => PassphraseAuthenticator::new(passphrase.clone()),
            None => PassphraseAuthenticator::locked(),
        };
        let keys = KeyManager::new(stores.secure.clone(), stores.local.clone(), Arc::new(auth));
        debug!(identity = %global.identity, path = %db_path.display(), "wallet database opened");

        Ok(Self {
            identity: global.identity.clone(),
            data_dir,
            stores,
            keys,
            _db: db,
        })
    }

    pub fn public_key(&self) -> Result<StealthPublicKey> {
        self.keys.get_public_key()?.context(NOT_INITIALIZED)
    }

    fn private_key(&self) -> Result<StealthSecretKey> {
        self.keys
            .get_private_key()
            .context("failed to unseal the private key (check SHROUD_PASSPHRASE)")?
            .context(NOT_INITIALIZED)
    }

    fn open_store(&self, secret: &StealthSecretKey) -> Result<Arc<NoteStore>> {
        let sealing_key = sealing_key_for(secret)?;
        let store = NoteStore::open(self.stores.local.clone(), sealing_key, NoteStoreConfig::default())
            .context("failed to open the note store")?;
        Ok(Arc::new(store))
    }

    pub fn note_store(&self) -> Result<Arc<NoteStore>> {
        let secret = self.private_key()?;
        self.open_store(&secret)
    }

    /// Unseals the key once and wires verifier, store and cursor together.
    pub fn engine(
        &self,
        watcher: Arc<dyn ChainWatcher>,
        config: DiscoveryConfig,
    ) -> Result<Arc<NoteDiscoveryEngine>> {
        let secret = self.private_key()?;
        let store = self.open_store(&secret)?;
        let verifier = CommitmentVerifier::new(secret, VerifierConfig::default());
        let engine = NoteDiscoveryEngine::new(
            watcher,
            Arc::new(verifier),
            store,
            self.stores.local.clone(),
            config,
        )?;
        Ok(Arc::new(engine))
    }
}

/// `~/x` -> `$HOME/x`. Anything else is returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
