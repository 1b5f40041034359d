// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # SHROUD Protocol — Core Library
//!
//! Stealth commitments and note discovery. A sender who knows only the
//! recipient's public key publishes a commitment plus an ephemeral public key;
//! the recipient trial-decrypts every published deposit, recognizes its own,
//! and keeps the secret and nullifier needed to withdraw later. Nobody else can
//! link a deposit to its recipient.
//!
//! X25519 for key agreement, HKDF-SHA256 to split the shared secret, Poseidon
//! over BN254 for the commitment (so a circuit can recompute it), AES-256-GCM
//! for everything at rest.
//!
//! ## Architecture
//!
//! - **config** — Protocol constants. Change one and old deposits vanish.
//! - **crypto** — Keys, KDFs, hashes, authenticated encryption.
//! - **storage** — Key-value persistence over sled, plus retries.
//! - **keystore** — Key custody: generate, seal, load, delete.
//! - **stealth** — Commitment creation and trial decryption.
//! - **notes** — Owned deposits, the note store, the withdrawal hand-off.
//! - **discovery** — The engine that turns the deposit feed into notes.
//!
//! ```text
//! ChainWatcher -> NoteDiscoveryEngine -> CommitmentVerifier -> NoteStore
//!                                                                 |
//!                                 ProofService <- WithdrawalFlow <-
//! ```

pub mod config;
pub mod crypto;
pub mod discovery;
pub mod keystore;
pub mod notes;
pub mod stealth;
pub mod storage;
