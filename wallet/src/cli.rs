//! # CLI Interface
//!
//! Command-line structure for `shroud-wallet`, via `clap` derive. Global
//! options pick the data directory, the identity and the passphrase; every
//! subcommand works on that one identity.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// SHROUD recipient wallet.
///
/// Provisions a stealth key, creates commitments for other recipients, and
/// discovers deposits addressed to this wallet by trial decryption.
#[derive(Parser, Debug)]
#[command(
    name = "shroud-wallet",
    about = "SHROUD stealth-commitment wallet",
    version,
    propagate_version = true
)]
pub struct ShroudWalletCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Wallet data directory. Created on `init`.
    #[arg(long, short = 'd', global = true, env = "SHROUD_DATA_DIR", default_value = "~/.shroud")]
    pub data_dir: PathBuf,

    /// Identity to operate on. Each identity has its own key and notes.
    #[arg(long, short = 'i', global = true, default_value = "default")]
    pub identity: String,

    /// Passphrase that seals the private key.
    ///
    /// Prefer the environment variable over the flag; flags end up in shell
    /// history.
    #[arg(long, global = true, env = "SHROUD_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Log output format.
    #[arg(long, global = true, env = "SHROUD_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate and seal a stealth key for this identity.
    Init,
    /// Print this identity's stealth address and public key.
    Address,
    /// Create a commitment for a recipient and print the deposit record.
    Send(SendArgs),
    /// Discover owned deposits in an event file.
    Scan(ScanArgs),
    /// List discovered notes.
    Notes(NotesArgs),
    /// Print the withdrawal proof inputs for a note.
    Withdraw(CommitmentArg),
    /// Record a confirmed withdrawal.
    MarkSpent(CommitmentArg),
    /// Forget all notes and the scan cursor. Keys are kept.
    Reset(ResetArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `send`.
#[derive(Parser, Debug)]
pub struct SendArgs {
    /// Recipient stealth address (`shroud1...`) or hex public key.
    pub recipient: String,

    /// Amount in coins, e.g. `1.5`. Eight decimal places at most.
    #[arg(long, short = 'a', default_value = "1.0")]
    pub amount: String,

    /// Block number to record in the deposit.
    #[arg(long, default_value_t = 0)]
    pub block: u64,

    /// Leaf index to record in the deposit.
    #[arg(long, default_value_t = 0)]
    pub leaf_index: u64,

    /// Append the deposit record to this JSON-lines file as well.
    #[arg(long)]
    pub append_to: Option<PathBuf>,
}

/// Arguments for `scan`.
#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// JSON-lines file of deposit records.
    #[arg(long, short = 'e')]
    pub events: PathBuf,

    /// First block that can hold deposits for this identity.
    #[arg(long, default_value_t = 0)]
    pub start_block: u64,

    /// Events verified and persisted per batch.
    #[arg(long, default_value_t = shroud_protocol::config::DEFAULT_SCAN_BATCH_SIZE)]
    pub batch_size: usize,

    /// Keep running and pick up lines appended to the file until Ctrl+C.
    #[arg(long)]
    pub follow: bool,

    /// Print Prometheus metrics after the scan.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `notes`.
#[derive(Parser, Debug)]
pub struct NotesArgs {
    /// Include spent notes.
    #[arg(long)]
    pub all: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct CommitmentArg {
    /// Commitment as hex, with or without `0x`.
    pub commitment: String,
}

/// Arguments for `reset`.
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Required. Notes are rediscovered by the next scan from block zero.
    #[arg(long)]
    pub yes: bool,
}
