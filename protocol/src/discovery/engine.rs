//! The note discovery engine.
//!
//! Replays history from `start_block`, then follows the live deposit stream,
//! trial-decrypting every batch and inserting matches into the note store.
//! The run loop follows the usual shutdown pattern: a `watch` channel checked
//! between batches, and a `select!` around every wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::events::{ChainWatcher, DepositObserved, WatchError};
use crate::config::{DEFAULT_RESUBSCRIBE_DELAY, DEFAULT_SCAN_BATCH_SIZE, DEFAULT_SCAN_LOOKBACK};
use crate::notes::listeners::{ListenerId, NoteListeners};
use crate::notes::note::Note;
use crate::notes::store::{NoteStore, NoteStoreError};
use crate::stealth::verifier::CommitmentVerifier;
use crate::storage::{KeyValueStore, RetryPolicy, StorageError, KEY_CURSOR};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("note store error: {0}")]
    Store(NoteStoreError),

    #[error("integrity violation, discovery stopped: {0}")]
    Integrity(NoteStoreError),

    #[error("discovery engine is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("cursor persistence failed: {0}")]
    Cursor(#[from] StorageError),

    #[error("verification task failed: {0}")]
    Task(String),
}

impl From<NoteStoreError> for DiscoveryError {
    fn from(e: NoteStoreError) -> Self {
        if e.is_fatal() {
            DiscoveryError::Integrity(e)
        } else {
            DiscoveryError::Store(e)
        }
    }
}

impl DiscoveryError {
    /// Errors that stop the run loop instead of being logged and retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::Integrity(_) | DiscoveryError::Task(_))
    }
}

// ---------------------------------------------------------------------------
// Configuration and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum events verified and persisted together.
    pub batch_size: usize,
    /// First block that can hold deposits for this identity.
    pub start_block: u64,
    /// Incremental scans and resubscribes start this many blocks below the
    /// cursor. The cursor block itself is always fetched again.
    pub lookback: u64,
    /// Wait before resubscribing after a closed stream or failed subscription.
    pub resubscribe_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SCAN_BATCH_SIZE,
            start_block: 0,
            lookback: DEFAULT_SCAN_LOOKBACK,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Stopped,
    Starting,
    Listening,
}

/// Counters since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub events_seen: u64,
    pub malformed_events: u64,
    pub notes_discovered: u64,
    pub stream_errors: u64,
    pub batches: u64,
}

#[derive(Default)]
struct Counters {
    events_seen: AtomicU64,
    malformed_events: AtomicU64,
    notes_discovered: AtomicU64,
    stream_errors: AtomicU64,
    batches: AtomicU64,
}

/// How a wait inside the run loop ended.
enum Wake<T> {
    Ready(T),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct NoteDiscoveryEngine {
    watcher: Arc<dyn ChainWatcher>,
    verifier: Arc<CommitmentVerifier>,
    store: Arc<NoteStore>,
    cursor_store: Arc<dyn KeyValueStore>,
    retry: RetryPolicy,
    config: DiscoveryConfig,
    state: RwLock<EngineState>,
    cursor: Mutex<Option<u64>>,
    listeners: Arc<NoteListeners>,
    counters: Counters,
}

impl NoteDiscoveryEngine {
    /// Loads the persisted cursor, if any, from `cursor_store`.
    pub fn new(
        watcher: Arc<dyn ChainWatcher>,
        verifier: Arc<CommitmentVerifier>,
        store: Arc<NoteStore>,
        cursor_store: Arc<dyn KeyValueStore>,
        config: DiscoveryConfig,
    ) -> Result<Self, DiscoveryError> {
        let cursor = load_cursor(cursor_store.as_ref())?;
        let retry = store.config().retry;
        Ok(Self {
            watcher,
            verifier,
            store,
            cursor_store,
            retry,
            config,
            state: RwLock::new(EngineState::Stopped),
            cursor: Mutex::new(cursor),
            listeners: Arc::new(NoteListeners::new()),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Highest block number processed so far.
    pub fn cursor(&self) -> Option<u64> {
        *self.cursor.lock()
    }

    pub fn store(&self) -> &Arc<NoteStore> {
        &self.store
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            events_seen: self.counters.events_seen.load(Ordering::Relaxed),
            malformed_events: self.counters.malformed_events.load(Ordering::Relaxed),
            notes_discovered: self.counters.notes_discovered.load(Ordering::Relaxed),
            stream_errors: self.counters.stream_errors.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
        }
    }

    pub fn list_available_notes(&self) -> Vec<Note> {
        self.store.get_available_notes()
    }

    /// Called with the available-note set whenever a batch inserts a note.
    pub fn on_notes_updated<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&[Note]) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(callback))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// The registry, for sharing with a `WithdrawalFlow`.
    pub fn listeners(&self) -> Arc<NoteListeners> {
        Arc::clone(&self.listeners)
    }

    /// Forget the cursor. The next scan starts from `start_block` again.
    pub fn reset_cursor(&self) -> Result<(), DiscoveryError> {
        self.retry.run("clear discovery cursor", || {
            self.cursor_store.remove(KEY_CURSOR)?;
            self.cursor_store.flush()
        })?;
        *self.cursor.lock() = None;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scanning
    // -----------------------------------------------------------------------

    /// Full replay from `start_block` to the current head. Returns the number
    /// of newly inserted notes. Already-known commitments are skipped, so
    /// this is what a restart should call.
    pub async fn run_replay(&self) -> Result<usize, DiscoveryError> {
        self.scan_from(self.config.start_block, None).await
    }

    /// Incremental catch-up from `lookback` blocks below the cursor, or a
    /// full replay if nothing has been processed yet. Deposits further back
    /// than the lookback window need [`run_replay`](Self::run_replay).
    pub async fn scan_once(&self) -> Result<usize, DiscoveryError> {
        let from = self.resume_block();
        self.scan_from(from, None).await
    }

    /// Fetch everything from `from_block` and process it in batches. With a
    /// shutdown receiver, stops at the first batch boundary after it fires.
    async fn scan_from(
        &self,
        from_block: u64,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<usize, DiscoveryError> {
        let events = self.watcher.fetch_range(from_block, None).await?;
        info!(from_block, events = events.len(), "scanning deposit history");

        let mut inserted = 0;
        for chunk in events.chunks(self.config.batch_size.max(1)) {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!(inserted, cursor = ?self.cursor(), "history scan interrupted by shutdown");
                break;
            }
            inserted += self.process_batch(chunk.to_vec()).await?;
        }
        Ok(inserted)
    }

    /// Verify one batch off the async runtime, insert the matches with a
    /// single write and persist the new cursor, then notify listeners.
    pub async fn process_batch(&self, batch: Vec<DepositObserved>) -> Result<usize, DiscoveryError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let seen = batch.len() as u64;
        let malformed = batch.iter().filter(|d| !d.is_well_formed()).count() as u64;
        let new_cursor = batch
            .iter()
            .map(|d| d.block_number)
            .max()
            .filter(|block| self.cursor().map_or(true, |c| *block > c));

        let verifier = Arc::clone(&self.verifier);
        let store = Arc::clone(&self.store);
        let cursor_store = Arc::clone(&self.cursor_store);
        let retry = self.retry;
        // Both writes may sleep in retry backoff.
        let (found, inserted) = tokio::task::spawn_blocking(move || -> Result<_, DiscoveryError> {
            let notes = verifier.verify_batch(&batch);
            let found = notes.len();
            let inserted = store.add_notes(notes)?;
            if let Some(block) = new_cursor {
                persist_cursor(cursor_store.as_ref(), retry, block)?;
            }
            Ok((found, inserted))
        })
        .await
        .map_err(|e| DiscoveryError::Task(e.to_string()))??;

        self.counters.events_seen.fetch_add(seen, Ordering::Relaxed);
        self.counters.malformed_events.fetch_add(malformed, Ordering::Relaxed);
        self.counters.notes_discovered.fetch_add(inserted as u64, Ordering::Relaxed);
        self.counters.batches.fetch_add(1, Ordering::Relaxed);

        if let Some(block) = new_cursor {
            let mut cursor = self.cursor.lock();
            if (*cursor).map_or(true, |c| block > c) {
                *cursor = Some(block);
            }
        }

        debug!(events = seen, malformed, owned = found, inserted, cursor = ?self.cursor(), "batch processed");
        if inserted > 0 {
            info!(inserted, available = self.store.get_available_notes().len(), "new notes discovered");
            self.listeners.notify(&self.store.get_available_notes());
        }
        Ok(inserted)
    }

    /// First block fetched when picking up after the cursor.
    fn resume_block(&self) -> u64 {
        match self.cursor() {
            Some(cursor) => cursor
                .saturating_sub(self.config.lookback)
                .max(self.config.start_block),
            None => self.config.start_block,
        }
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Replay, then follow the live stream until `shutdown` turns true or its
    /// sender is dropped. Only a fatal store error ends the loop with `Err`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DiscoveryError> {
        {
            let mut state = self.state.write();
            if *state != EngineState::Stopped {
                return Err(DiscoveryError::AlreadyRunning);
            }
            *state = EngineState::Starting;
        }
        info!(start_block = self.config.start_block, "note discovery starting");

        let result = self.run_inner(&mut shutdown).await;

        *self.state.write() = EngineState::Stopped;
        match &result {
            Ok(()) => info!(cursor = ?self.cursor(), "note discovery stopped"),
            Err(e) => error!(error = %e, "note discovery halted"),
        }
        result
    }

    async fn run_inner(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), DiscoveryError> {
        // Starting: replay until it succeeds.
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match self.scan_from(self.config.start_block, Some(&*shutdown)).await {
                Ok(_) if *shutdown.borrow() => return Ok(()),
                Ok(inserted) => {
                    info!(inserted, cursor = ?self.cursor(), "history replay complete");
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "history replay failed, retrying");
                    if let Wake::Shutdown = self.pause(shutdown).await {
                        return Ok(());
                    }
                }
            }
        }

        *self.state.write() = EngineState::Listening;

        // Listening: one subscription per iteration.
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let from_block = self.resume_block();
            let stream = match self.watcher.subscribe(from_block).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.counters.stream_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, from_block, "subscription failed, retrying");
                    if let Wake::Shutdown = self.pause(shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            debug!(from_block, "subscribed to deposit stream");

            let mut batches = stream.ready_chunks(self.config.batch_size.max(1));
            loop {
                let next = tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() { Wake::Shutdown } else { Wake::Ready(None) }
                    }
                    items = batches.next() => Wake::Ready(Some(items)),
                };
                let items = match next {
                    Wake::Shutdown => return Ok(()),
                    // The flag changed; re-check it.
                    Wake::Ready(None) => {
                        if *shutdown.borrow() {
                            return Ok(());
                        }
                        continue;
                    }
                    Wake::Ready(Some(items)) => items,
                };
                let Some(items) = items else {
                    warn!("deposit stream closed, resubscribing");
                    break;
                };

                let mut batch = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Ok(deposit) => batch.push(deposit),
                        Err(e) => {
                            self.counters.stream_errors.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "skipping deposit stream error");
                        }
                    }
                }
                match self.process_batch(batch).await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    // Not fatal: the notes come back on the next replay.
                    Err(e) => error!(error = %e, "batch not persisted"),
                }
            }

            if let Wake::Shutdown = self.pause(shutdown).await {
                return Ok(());
            }
        }
    }

    /// Sleep for the resubscribe delay unless shutdown arrives first.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> Wake<()> {
        let woke = tokio::select! {
            _ = tokio::time::sleep(self.config.resubscribe_delay) => None,
            changed = shutdown.changed() => Some(changed.is_err()),
        };
        match woke {
            Some(true) => Wake::Shutdown,
            _ if *shutdown.borrow() => Wake::Shutdown,
            _ => Wake::Ready(()),
        }
    }
}

fn persist_cursor(store: &dyn KeyValueStore, retry: RetryPolicy, block: u64) -> Result<(), StorageError> {
    retry.run("persist discovery cursor", || {
        store.put(KEY_CURSOR, &block.to_be_bytes())?;
        store.flush()
    })
}

fn load_cursor(store: &dyn KeyValueStore) -> Result<Option<u64>, StorageError> {
    let Some(raw) = store.get(KEY_CURSOR)? else {
        return Ok(None);
    };
    let bytes: [u8; 8] = raw
        .as_slice()
        .try_into()
        .map_err(|_| StorageError::Serialization(format!("cursor record has {} bytes", raw.len())))?;
    Ok(Some(u64::from_be_bytes(bytes)))
}
