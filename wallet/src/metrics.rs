//! # Prometheus Metrics
//!
//! Scan metrics in a dedicated [`prometheus::Registry`] (prefix `shroud_`).
//! The wallet is a one-shot CLI, so nothing is served; `scan --metrics`
//! prints the text exposition after the scan.

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use shroud_protocol::discovery::ScanStats;
use shroud_protocol::notes::NoteStore;

pub struct WalletMetrics {
    registry: Registry,
    /// Deposit records examined.
    pub events_seen_total: IntCounter,
    /// Records with wrong-length fields.
    pub malformed_events_total: IntCounter,
    /// Notes newly inserted into the store.
    pub notes_discovered_total: IntCounter,
    pub stream_errors_total: IntCounter,
    pub scan_batches_total: IntCounter,
    pub notes_available: IntGauge,
    /// Sum of available notes, in base units.
    pub available_balance: IntGauge,
    /// Highest processed block, or -1 before the first batch.
    pub scan_cursor: IntGauge,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, metric: C) -> prometheus::Result<C> {
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl WalletMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("shroud".into()), None)?;

        let events_seen_total = register(
            &registry,
            IntCounter::new("events_seen_total", "Deposit records examined by trial decryption")?,
        )?;
        let malformed_events_total = register(
            &registry,
            IntCounter::new("malformed_events_total", "Deposit records with malformed fields")?,
        )?;
        let notes_discovered_total = register(
            &registry,
            IntCounter::new("notes_discovered_total", "Notes newly added to the note store")?,
        )?;
        let stream_errors_total = register(
            &registry,
            IntCounter::new("stream_errors_total", "Deposit stream and subscription errors")?,
        )?;
        let scan_batches_total = register(
            &registry,
            IntCounter::new("scan_batches_total", "Batches verified and persisted")?,
        )?;
        let notes_available = register(
            &registry,
            IntGauge::new("notes_available", "Unspent notes in the note store")?,
        )?;
        let available_balance = register(
            &registry,
            IntGauge::new("available_balance_base_units", "Sum of unspent notes in base units")?,
        )?;
        let scan_cursor = register(
            &registry,
            IntGauge::new("scan_cursor_block", "Highest block processed by discovery")?,
        )?;

        Ok(Self {
            registry,
            events_seen_total,
            malformed_events_total,
            notes_discovered_total,
            stream_errors_total,
            scan_batches_total,
            notes_available,
            available_balance,
            scan_cursor,
        })
    }

    /// Copy the engine counters and the store totals into the registry.
    /// Counters are monotonic, so only the increase since the last call is
    /// added.
    pub fn observe(&self, stats: &ScanStats, store: &NoteStore, cursor: Option<u64>) {
        advance(&self.events_seen_total, stats.events_seen);
        advance(&self.malformed_events_total, stats.malformed_events);
        advance(&self.notes_discovered_total, stats.notes_discovered);
        advance(&self.stream_errors_total, stats.stream_errors);
        advance(&self.scan_batches_total, stats.batches);

        self.notes_available.set(store.get_available_notes().len() as i64);
        self.available_balance
            .set(i64::try_from(store.available_balance()).unwrap_or(i64::MAX));
        self.scan_cursor
            .set(cursor.and_then(|c| i64::try_from(c).ok()).unwrap_or(-1));
    }

    /// Prometheus text exposition of everything registered.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
