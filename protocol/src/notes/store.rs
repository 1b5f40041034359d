//! # NoteStore
//!
//! The recipient's local ledger of discovered notes.
//!
//! ## Persistence
//!
//! The whole note list is one record: bincode, sealed with AES-256-GCM under
//! the note sealing key, associated data `shroud-note-store-v1`. Every
//! mutation rewrites it. A mutation whose write fails is rolled back in
//! memory, so memory never runs ahead of disk.
//!
//! ## Invariants
//!
//! - Every stored note satisfies `commitment == Poseidon(secret, nullifier)`.
//!   Checked on insert and again for every note on load; a failure on load
//!   is fatal.
//! - At most one note per commitment. Inserting a known commitment is a
//!   no-op, which is what makes redelivered ledger events harmless.
//! - Unspent notes are never evicted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::note::{Note, NoteStatus};
use crate::config::{AES_KEY_LENGTH, DEFAULT_NOTE_CAPACITY, NOTE_STORE_AAD};
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad};
use crate::stealth::derivation::CommitmentValue;
use crate::storage::{KeyValueStore, RetryPolicy, StorageError, KEY_NOTES};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NoteStoreError {
    #[error("note not found: {0}")]
    NoteNotFound(String),

    #[error("note already spent: {0}")]
    AlreadySpent(String),

    #[error("commitment does not match secret and nullifier: {0}")]
    CommitmentMismatch(String),

    #[error("note store is full ({capacity} notes)")]
    CapacityExceeded { capacity: usize },

    #[error("note store integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("note store persistence failed: {0}")]
    Storage(#[from] StorageError),

    #[error("note store sealing failed: {0}")]
    Sealing(String),
}

impl NoteStoreError {
    /// Integrity failures mean the on-disk state cannot be trusted; the
    /// caller must stop rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NoteStoreError::IntegrityViolation(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendOutcome {
    Spent,
    AlreadySpent,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when an insert would exceed the capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Refuse the insert with `CapacityExceeded`.
    #[default]
    RejectNew,
    /// Evict the oldest spent note; refuse if there is none.
    EvictOldestSpent,
}

#[derive(Debug, Clone, Copy)]
pub struct NoteStoreConfig {
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub retry: RetryPolicy,
}

impl Default for NoteStoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_NOTE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// NoteIndex
// ---------------------------------------------------------------------------

/// Insertion-ordered notes plus a commitment index.
#[derive(Clone, Default)]
struct NoteIndex {
    notes: Vec<Note>,
    by_commitment: HashMap<CommitmentValue, usize>,
}

impl NoteIndex {
    fn from_notes(notes: Vec<Note>) -> Self {
        let mut index = Self {
            notes,
            by_commitment: HashMap::new(),
        };
        index.reindex();
        index
    }

    fn reindex(&mut self) {
        self.by_commitment = self
            .notes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.commitment, i))
            .collect();
    }

    fn contains(&self, commitment: &CommitmentValue) -> bool {
        self.by_commitment.contains_key(commitment)
    }

    fn push(&mut self, note: Note) {
        self.by_commitment.insert(note.commitment, self.notes.len());
        self.notes.push(note);
    }

    /// Position of the spent note with the lowest (block, leaf).
    fn oldest_spent(&self) -> Option<usize> {
        self.notes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status == NoteStatus::Spent)
            .min_by_key(|(_, n)| (n.block_number, n.leaf_index))
            .map(|(i, _)| i)
    }

    fn remove(&mut self, position: usize) -> Note {
        let note = self.notes.remove(position);
        self.reindex();
        note
    }
}

// ---------------------------------------------------------------------------
// NoteStore
// ---------------------------------------------------------------------------

pub struct NoteStore {
    backend: Arc<dyn KeyValueStore>,
    sealing_key: Zeroizing<[u8; AES_KEY_LENGTH]>,
    config: NoteStoreConfig,
    inner: Mutex<NoteIndex>,
}

impl NoteStore {
    /// Load the sealed note list from `backend`, verifying every note.
    pub fn open(
        backend: Arc<dyn KeyValueStore>,
        sealing_key: Zeroizing<[u8; AES_KEY_LENGTH]>,
        config: NoteStoreConfig,
    ) -> Result<Self, NoteStoreError> {
        let notes = match backend.get(KEY_NOTES)? {
            Some(sealed) => unseal(&sealing_key, &sealed)?,
            None => Vec::new(),
        };

        let mut seen = HashSet::with_capacity(notes.len());
        for note in &notes {
            if !note.check_integrity() {
                error!(commitment = %note.commitment.short_hex(), "stored note fails integrity check");
                return Err(NoteStoreError::IntegrityViolation(format!(
                    "note {} does not recompute",
                    note.commitment.short_hex()
                )));
            }
            if !seen.insert(note.commitment) {
                return Err(NoteStoreError::IntegrityViolation(format!(
                    "duplicate commitment {}",
                    note.commitment.short_hex()
                )));
            }
        }

        info!(notes = notes.len(), capacity = config.capacity, "note store opened");
        Ok(Self {
            backend,
            sealing_key,
            config,
            inner: Mutex::new(NoteIndex::from_notes(notes)),
        })
    }

    pub fn config(&self) -> &NoteStoreConfig {
        &self.config
    }

    /// Insert one note. Known commitments are a no-op.
    pub fn add_note(&self, note: Note) -> Result<AddOutcome, NoteStoreError> {
        let mut inner = self.inner.lock();
        match self.insert_all(&mut inner, vec![note])? {
            0 => Ok(AddOutcome::Duplicate),
            _ => Ok(AddOutcome::Inserted),
        }
    }

    /// Insert a batch with one persisted write. Either every new note lands
    /// or none does. Returns the number of newly inserted notes.
    pub fn add_notes(&self, notes: Vec<Note>) -> Result<usize, NoteStoreError> {
        let mut inner = self.inner.lock();
        self.insert_all(&mut inner, notes)
    }

    fn insert_all(&self, inner: &mut NoteIndex, notes: Vec<Note>) -> Result<usize, NoteStoreError> {
        let mut batch_seen = HashSet::new();
        let mut fresh = Vec::new();
        for note in notes {
            if !note.check_integrity() {
                warn!(commitment = %note.commitment.short_hex(), "rejecting note that does not recompute");
                return Err(NoteStoreError::CommitmentMismatch(note.commitment.short_hex()));
            }
            if inner.contains(&note.commitment) || !batch_seen.insert(note.commitment) {
                debug!(commitment = %note.commitment.short_hex(), "duplicate note ignored");
                continue;
            }
            fresh.push(note);
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let snapshot = inner.clone();
        let inserted = fresh.len();
        for note in fresh {
            if let Err(e) = self.make_room(inner) {
                *inner = snapshot;
                return Err(e);
            }
            inner.push(note);
        }

        if let Err(e) = self.persist(inner) {
            *inner = snapshot;
            return Err(e);
        }
        debug!(inserted, total = inner.notes.len(), "notes stored");
        Ok(inserted)
    }

    fn make_room(&self, inner: &mut NoteIndex) -> Result<(), NoteStoreError> {
        if inner.notes.len() < self.config.capacity {
            return Ok(());
        }
        let capacity = self.config.capacity;
        match self.config.overflow_policy {
            OverflowPolicy::RejectNew => Err(NoteStoreError::CapacityExceeded { capacity }),
            OverflowPolicy::EvictOldestSpent => match inner.oldest_spent() {
                Some(position) => {
                    let evicted = inner.remove(position);
                    info!(commitment = %evicted.commitment.short_hex(), "evicted spent note");
                    Ok(())
                }
                None => Err(NoteStoreError::CapacityExceeded { capacity }),
            },
        }
    }

    /// Every available note, in discovery order.
    pub fn get_available_notes(&self) -> Vec<Note> {
        self.inner
            .lock()
            .notes
            .iter()
            .filter(|n| n.is_available())
            .cloned()
            .collect()
    }

    pub fn get_note(&self, commitment: &CommitmentValue) -> Option<Note> {
        let inner = self.inner.lock();
        inner
            .by_commitment
            .get(commitment)
            .map(|&i| inner.notes[i].clone())
    }

    pub fn all_notes(&self) -> Vec<Note> {
        self.inner.lock().notes.clone()
    }

    /// Sum of available amounts, in base units.
    pub fn available_balance(&self) -> u64 {
        self.inner
            .lock()
            .notes
            .iter()
            .filter(|n| n.is_available())
            .fold(0u64, |acc, n| acc.saturating_add(n.amount))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a note spent. Spending twice is a no-op reported as
    /// `AlreadySpent`; the note itself is kept.
    pub fn mark_spent(&self, commitment: &CommitmentValue) -> Result<SpendOutcome, NoteStoreError> {
        let mut inner = self.inner.lock();
        let position = *inner
            .by_commitment
            .get(commitment)
            .ok_or_else(|| NoteStoreError::NoteNotFound(commitment.short_hex()))?;

        if inner.notes[position].status == NoteStatus::Spent {
            return Ok(SpendOutcome::AlreadySpent);
        }

        inner.notes[position].status = NoteStatus::Spent;
        if let Err(e) = self.persist(&inner) {
            inner.notes[position].status = NoteStatus::Available;
            return Err(e);
        }
        info!(commitment = %commitment.short_hex(), "note marked spent");
        Ok(SpendOutcome::Spent)
    }

    /// Forget every note. Used on wallet reset.
    pub fn clear(&self) -> Result<(), NoteStoreError> {
        let mut inner = self.inner.lock();
        self.config.retry.run("clear notes", || {
            self.backend.remove(KEY_NOTES)?;
            self.backend.flush()
        })?;
        let dropped = inner.notes.len();
        *inner = NoteIndex::default();
        warn!(dropped, "note store cleared");
        Ok(())
    }

    fn persist(&self, inner: &NoteIndex) -> Result<(), NoteStoreError> {
        let plaintext = Zeroizing::new(bincode::serialize(&inner.notes).map_err(StorageError::from)?);
        let sealed = encrypt_with_aad(&self.sealing_key, &plaintext, NOTE_STORE_AAD)
            .map_err(|e| NoteStoreError::Sealing(e.to_string()))?;
        self.config.retry.run("persist notes", || {
            self.backend.put(KEY_NOTES, &sealed)?;
            self.backend.flush()
        })?;
        Ok(())
    }
}

fn unseal(key: &[u8; AES_KEY_LENGTH], sealed: &[u8]) -> Result<Vec<Note>, NoteStoreError> {
    let plaintext = Zeroizing::new(
        decrypt_with_aad(key, sealed, NOTE_STORE_AAD)
            .map_err(|e| NoteStoreError::IntegrityViolation(format!("sealed note list: {e}")))?,
    );
    bincode::deserialize(&plaintext)
        .map_err(|e| NoteStoreError::IntegrityViolation(format!("note list does not decode: {e}")))
}
