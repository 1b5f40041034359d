//! # Discovery
//!
//! Turns the public deposit feed into notes we own.
//!
//! ```text
//! events.rs  — DepositObserved, ChainWatcher, MemoryChainWatcher
//! engine.rs  — NoteDiscoveryEngine: replay, live follow, cursor, listeners
//! ```

pub mod engine;
pub mod events;

pub use engine::{DiscoveryConfig, DiscoveryError, EngineState, NoteDiscoveryEngine, ScanStats};
pub use events::{ChainWatcher, DepositObserved, DepositStream, MemoryChainWatcher, WatchError};
