//! Ledger events and the `ChainWatcher` boundary.
//!
//! The ledger itself is someone else's problem. Whatever talks to it
//! implements [`ChainWatcher`] and hands us [`DepositObserved`] records.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::KEY_LENGTH;
use crate::stealth::commitment::CreatedCommitment;

/// Capacity of the live channel of [`MemoryChainWatcher`].
const LIVE_CHANNEL_CAPACITY: usize = 1024;

/// One published deposit, exactly as the ledger reports it.
///
/// Byte fields are kept as raw vectors: the ledger is untrusted, and a
/// wrong-length field is something the verifier must see and discard, not
/// something deserialization should choke on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositObserved {
    #[serde(with = "hex::serde")]
    pub commitment: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub ephemeral_public_key: Vec<u8>,
    pub amount: u64,
    pub leaf_index: u64,
    pub block_number: u64,
    pub timestamp: i64,
}

impl DepositObserved {
    /// What the ledger would report for a sender's freshly created commitment.
    pub fn from_created(
        created: &CreatedCommitment,
        amount: u64,
        leaf_index: u64,
        block_number: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            commitment: created.commitment.as_bytes().to_vec(),
            ephemeral_public_key: created.ephemeral_public_key.to_vec(),
            amount,
            leaf_index,
            block_number,
            timestamp,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.commitment.len() == 32 && self.ephemeral_public_key.len() == KEY_LENGTH
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("chain watcher unavailable: {0}")]
    Unavailable(String),

    #[error("deposit stream error: {0}")]
    Stream(String),

    #[error("deposit stream lagged, {0} events skipped")]
    Lagged(u64),
}

pub type DepositStream = BoxStream<'static, Result<DepositObserved, WatchError>>;

#[async_trait]
pub trait ChainWatcher: Send + Sync {
    /// Historical deposits with `from_block <= block_number <= to_block`.
    /// `to_block = None` means up to the current head.
    async fn fetch_range(
        &self,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<DepositObserved>, WatchError>;

    /// Live deposits with `block_number >= from_block`. The stream ends when
    /// the connection does; callers resubscribe.
    async fn subscribe(&self, from_block: u64) -> Result<DepositStream, WatchError>;
}

// ---------------------------------------------------------------------------
// MemoryChainWatcher
// ---------------------------------------------------------------------------

/// An in-process ledger: a history vector plus a broadcast channel for live
/// deposits. Used by tests and by the CLI to replay exported event files.
pub struct MemoryChainWatcher {
    history: RwLock<Vec<DepositObserved>>,
    live: RwLock<broadcast::Sender<DepositObserved>>,
    failing_subscriptions: AtomicU32,
}

impl Default for MemoryChainWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChainWatcher {
    pub fn new() -> Self {
        Self::with_history(Vec::new())
    }

    pub fn with_history(history: Vec<DepositObserved>) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(history),
            live: RwLock::new(live),
            failing_subscriptions: AtomicU32::new(0),
        }
    }

    /// Append to history and push to live subscribers.
    pub fn publish(&self, deposit: DepositObserved) {
        let mut history = self.history.write();
        history.push(deposit.clone());
        // No subscribers is fine.
        let _ = self.live.read().send(deposit);
    }

    /// Close every live stream. New subscriptions get a fresh channel.
    pub fn disconnect_subscribers(&self) {
        let (fresh, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        *self.live.write() = fresh;
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_next_subscriptions(&self, n: u32) {
        self.failing_subscriptions.store(n, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.live.read().receiver_count()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

#[async_trait]
impl ChainWatcher for MemoryChainWatcher {
    async fn fetch_range(
        &self,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<DepositObserved>, WatchError> {
        let to_block = to_block.unwrap_or(u64::MAX);
        Ok(self
            .history
            .read()
            .iter()
            .filter(|d| d.block_number >= from_block && d.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn subscribe(&self, from_block: u64) -> Result<DepositStream, WatchError> {
        let injected = self
            .failing_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(WatchError::Unavailable("injected subscription failure".into()));
        }

        // Snapshot history and register the receiver under the same lock, so
        // nothing published in between is lost.
        let history = self.history.read();
        let rx = self.live.read().subscribe();
        let backlog: Vec<_> = history
            .iter()
            .filter(|d| d.block_number >= from_block)
            .cloned()
            .map(Ok)
            .collect();
        drop(history);

        let live = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(deposit) => Some((Ok(deposit), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => Some((Err(WatchError::Lagged(n)), rx)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .filter(move |item| {
            let keep = match item {
                Ok(d) => d.block_number >= from_block,
                Err(_) => true,
            };
            futures::future::ready(keep)
        });

        Ok(stream::iter(backlog).chain(live).boxed())
    }
}
