//! Exponential backoff for storage writes.
//!
//! Losing a write here can mean losing track of spendable funds, so transient
//! backend failures get a few more chances before the caller sees them.

use std::thread;
use std::time::Duration;

use tracing::{error, warn};

use super::StorageResult;
use crate::config::{STORAGE_RETRY_ATTEMPTS, STORAGE_RETRY_BACKOFF};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Sleep before the second attempt; doubled for every attempt after.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: STORAGE_RETRY_ATTEMPTS,
            backoff: STORAGE_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. Blocks the calling thread while backing off.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> StorageResult<T>) -> StorageResult<T> {
        let attempts = self.attempts.max(1);
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        operation = what,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "storage write failed, retrying"
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        operation = what,
                        attempt,
                        error = %e,
                        "storage write failed; local wallet state may be stale"
                    );
                    return Err(e);
                }
            }
        }
    }
}
