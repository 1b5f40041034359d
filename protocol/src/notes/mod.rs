//! # Notes
//!
//! A note is a deposit we own, together with the secret and nullifier that
//! let us withdraw it.
//!
//! ```text
//! note.rs        — Note, NoteStatus, deterministic note ids
//! store.rs       — NoteStore: sealed, bounded, idempotent
//! listeners.rs   — change notifications for the available set
//! withdrawal.rs  — proof inputs, ProofService, WithdrawalFlow
//! ```

pub mod listeners;
pub mod note;
pub mod store;
pub mod withdrawal;

pub use listeners::{ListenerId, NoteListeners, NotesCallback};
pub use note::{note_id, Note, NoteStatus};
pub use store::{AddOutcome, NoteStore, NoteStoreConfig, NoteStoreError, OverflowPolicy, SpendOutcome};
pub use withdrawal::{
    prepare_withdrawal_proof_inputs, ProofService, WithdrawalError, WithdrawalFlow, WithdrawalProof,
    WithdrawalProofInputs,
};

use crate::config::{AMOUNT_DECIMALS, BASE_UNITS_PER_COIN};

/// Render base units as a decimal amount, e.g. `150000000` -> `"1.50000000"`.
pub fn format_amount(base_units: u64) -> String {
    format!(
        "{}.{:0width$}",
        base_units / BASE_UNITS_PER_COIN,
        base_units % BASE_UNITS_PER_COIN,
        width = AMOUNT_DECIMALS as usize
    )
}

/// Parse a decimal amount into base units. At most 8 fractional digits.
pub fn parse_amount(s: &str) -> Option<u64> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > AMOUNT_DECIMALS as usize || (whole.is_empty() && frac.is_empty()) {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_units: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = AMOUNT_DECIMALS as usize);
        padded.parse().ok()?
    };
    whole.checked_mul(BASE_UNITS_PER_COIN)?.checked_add(frac_units)
}
