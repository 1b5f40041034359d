// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # SHROUD Wallet
//!
//! Entry point for the `shroud-wallet` binary. Parses CLI arguments,
//! initializes logging, opens the identity and dispatches:
//!
//! - `init`        — generate and seal the stealth key
//! - `address`     — print the stealth address
//! - `send`        — create a commitment for someone else
//! - `scan`        — trial-decrypt a deposit file, optionally tailing it
//! - `notes`       — list discovered notes
//! - `withdraw`    — print withdrawal proof inputs
//! - `mark-spent`  — record a confirmed withdrawal
//! - `reset`       — forget notes and the scan cursor
//! - `version`     — print build version information

mod cli;
mod feed;
mod logging;
mod metrics;
mod session;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tokio::sync::watch;

use shroud_protocol::config::{PROTOCOL_FINGERPRINT, PROTOCOL_VERSION};
use shroud_protocol::crypto::StealthPublicKey;
use shroud_protocol::discovery::{DepositObserved, DiscoveryConfig, MemoryChainWatcher};
use shroud_protocol::notes::{
    format_amount, parse_amount, prepare_withdrawal_proof_inputs, Note, NoteStatus, SpendOutcome,
};
use shroud_protocol::stealth::{CommitmentGenerator, CommitmentValue};

use cli::{Commands, GlobalArgs, ShroudWalletCli};
use metrics::WalletMetrics;
use session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ShroudWalletCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.global.log_format);

    match cli.command {
        Commands::Init => init_identity(&cli.global),
        Commands::Address => show_address(&cli.global),
        Commands::Send(args) => send(args),
        Commands::Scan(args) => scan(&cli.global, args).await,
        Commands::Notes(args) => list_notes(&cli.global, args),
        Commands::Withdraw(arg) => withdraw(&cli.global, arg),
        Commands::MarkSpent(arg) => mark_spent(&cli.global, arg),
        Commands::Reset(args) => reset(&cli.global, args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn init_identity(global: &GlobalArgs) -> Result<()> {
    if global.passphrase.is_none() {
        bail!("a passphrase is required to seal the key; set SHROUD_PASSPHRASE");
    }
    let session = Session::open(global)?;
    let existed = session.keys.metadata()?.is_some();
    let provisioned = session
        .keys
        .generate_and_store_keys()
        .context("failed to provision the stealth key")?;

    tracing::info!(identity = %session.identity, key_id = %provisioned.key_id, "identity ready");

    if existed {
        println!("Identity already initialized; existing key kept.");
    } else {
        println!("Identity initialized.");
    }
    println!("  Identity       : {}", session.identity);
    println!("  Data directory : {}", session.data_dir.display());
    println!("  Key id         : {}", provisioned.key_id);
    println!("  Address        : {}", provisioned.public_key.to_address());
    Ok(())
}

fn show_address(global: &GlobalArgs) -> Result<()> {
    let session = Session::open(global)?;
    let public = session.public_key()?;
    println!("{}", public.to_address());
    println!("{}", public.to_hex());
    Ok(())
}

/// Prints the deposit record the ledger would publish for this commitment.
fn send(args: cli::SendArgs) -> Result<()> {
    let recipient = StealthPublicKey::parse(&args.recipient).context("invalid recipient")?;
    let amount = parse_amount(&args.amount)
        .with_context(|| format!("invalid amount {:?}", args.amount))?;

    let created = CommitmentGenerator::new().create_commitment(recipient.as_bytes())?;
    let deposit = DepositObserved::from_created(
        &created,
        amount,
        args.leaf_index,
        args.block,
        Utc::now().timestamp(),
    );
    tracing::info!(
        commitment = %created.commitment.short_hex(),
        amount = %format_amount(amount),
        "commitment created"
    );

    println!("{}", serde_json::to_string(&deposit)?);
    if let Some(path) = &args.append_to {
        feed::append_deposit(path, &deposit)?;
    }
    Ok(())
}

async fn scan(global: &GlobalArgs, args: cli::ScanArgs) -> Result<()> {
    let events = feed::read_events(&args.events)?;
    if events.skipped > 0 {
        tracing::warn!(skipped = events.skipped, "some deposit records could not be parsed");
    }
    let offset = events.offset;
    let watcher = Arc::new(MemoryChainWatcher::with_history(events.deposits));

    let session = Session::open(global)?;
    let config = DiscoveryConfig {
        batch_size: args.batch_size,
        start_block: args.start_block,
        ..Default::default()
    };
    let engine = session.engine(watcher.clone(), config)?;
    let before = engine.store().len();

    if args.follow {
        engine.on_notes_updated(|notes: &[Note]| {
            let balance: u64 = notes.iter().map(|n| n.amount).sum();
            tracing::info!(available = notes.len(), balance = %format_amount(balance), "available notes changed");
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let engine = Arc::clone(&engine);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { engine.run(shutdown).await })
        };
        let tail = tokio::spawn(feed::follow(
            args.events.clone(),
            Arc::clone(&watcher),
            offset,
            shutdown_rx,
        ));

        tracing::info!(path = %args.events.display(), "following event file, Ctrl+C to stop");
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);

        if let Err(e) = tail.await? {
            tracing::warn!(error = %e, "event file tail stopped early");
        }
        runner.await?.context("note discovery failed")?;
    } else {
        // Every invocation is a restart: replay the whole file and let the
        // store skip what it already has.
        engine.run_replay().await.context("scan failed")?;
    }

    let store = engine.store();
    let stats = engine.stats();
    println!("Scanned {} deposit records ({} malformed).", stats.events_seen, stats.malformed_events);
    println!("  New notes      : {}", store.len().saturating_sub(before));
    println!("  Available      : {}", store.get_available_notes().len());
    println!("  Balance        : {}", format_amount(store.available_balance()));
    match engine.cursor() {
        Some(block) => println!("  Scanned up to  : block {block}"),
        None => println!("  Scanned up to  : -"),
    }

    if args.metrics {
        let metrics = WalletMetrics::new()?;
        metrics.observe(&stats, store, engine.cursor());
        print!("{}", metrics.encode()?);
    }
    Ok(())
}

/// What `notes --json` prints. Secrets stay out.
#[derive(Serialize)]
struct NoteView {
    id: String,
    commitment: CommitmentValue,
    amount: String,
    block_number: u64,
    leaf_index: u64,
    status: NoteStatus,
    received_at: Option<DateTime<Utc>>,
}

impl From<&Note> for NoteView {
    fn from(note: &Note) -> Self {
        Self {
            id: note.id.clone(),
            commitment: note.commitment,
            amount: format_amount(note.amount),
            block_number: note.block_number,
            leaf_index: note.leaf_index,
            status: note.status,
            received_at: DateTime::from_timestamp(note.received_at, 0),
        }
    }
}

fn list_notes(global: &GlobalArgs, args: cli::NotesArgs) -> Result<()> {
    let session = Session::open(global)?;
    let store = session.note_store()?;
    let mut notes = if args.all {
        store.all_notes()
    } else {
        store.get_available_notes()
    };
    notes.sort_by_key(|n| (n.block_number, n.leaf_index));
    let views: Vec<NoteView> = notes.iter().map(NoteView::from).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    println!(
        "{:<32}  {:<16}  {:>18}  {:>10}  {:>6}  {:<9}  RECEIVED",
        "ID", "COMMITMENT", "AMOUNT", "BLOCK", "LEAF", "STATUS"
    );
    for view in &views {
        let received = view
            .received_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<32}  {:<16}  {:>18}  {:>10}  {:>6}  {:<9}  {}",
            view.id,
            view.commitment.short_hex(),
            view.amount,
            view.block_number,
            view.leaf_index,
            view.status.to_string(),
            received
        );
    }
    println!("Available balance: {}", format_amount(store.available_balance()));
    Ok(())
}

/// Prints the private proof inputs for an external prover.
fn withdraw(global: &GlobalArgs, arg: cli::CommitmentArg) -> Result<()> {
    let commitment = CommitmentValue::from_hex(&arg.commitment).context("invalid commitment")?;
    let session = Session::open(global)?;
    let store = session.note_store()?;
    let note = store
        .get_note(&commitment)
        .with_context(|| format!("no note with commitment {}", commitment.short_hex()))?;
    let inputs = prepare_withdrawal_proof_inputs(&note)?;

    tracing::warn!("output contains the note secret and nullifier; hand it only to the prover");
    println!("{}", serde_json::to_string_pretty(&inputs)?);
    Ok(())
}

fn mark_spent(global: &GlobalArgs, arg: cli::CommitmentArg) -> Result<()> {
    let commitment = CommitmentValue::from_hex(&arg.commitment).context("invalid commitment")?;
    let session = Session::open(global)?;
    let store = session.note_store()?;
    match store.mark_spent(&commitment)? {
        SpendOutcome::Spent => println!("Note {} marked spent.", commitment.short_hex()),
        SpendOutcome::AlreadySpent => println!("Note {} was already spent.", commitment.short_hex()),
    }
    println!("Available balance: {}", format_amount(store.available_balance()));
    Ok(())
}

fn reset(global: &GlobalArgs, args: cli::ResetArgs) -> Result<()> {
    if !args.yes {
        bail!("refusing to reset without --yes");
    }
    let session = Session::open(global)?;
    let engine = session.engine(Arc::new(MemoryChainWatcher::new()), DiscoveryConfig::default())?;
    let dropped = engine.store().len();
    engine.store().clear()?;
    engine.reset_cursor()?;
    tracing::warn!(identity = %session.identity, dropped, "note store and scan cursor cleared");
    println!("Cleared {dropped} notes. The next scan starts from the beginning.");
    Ok(())
}

fn print_version() {
    println!("shroud-wallet {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {PROTOCOL_VERSION} ({PROTOCOL_FINGERPRINT})");
    println!("rustc         {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use cli::{LogFormatArg, ScanArgs, SendArgs};

    fn global(dir: &Path) -> GlobalArgs {
        GlobalArgs {
            data_dir: dir.join("wallet"),
            identity: "bob".into(),
            passphrase: Some("pw".into()),
            log_format: LogFormatArg::Pretty,
        }
    }

    fn scan_args(events: &Path) -> ScanArgs {
        ScanArgs {
            events: events.to_path_buf(),
            start_block: 0,
            batch_size: 2,
            follow: false,
            metrics: false,
        }
    }

    #[tokio::test]
    async fn each_scan_picks_up_deposits_behind_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let global = global(dir.path());
        let events = dir.path().join("deposits.jsonl");
        init_identity(&global).unwrap();
        let address = Session::open(&global).unwrap().public_key().unwrap().to_address();
        let send_at = |block: u64| {
            send(SendArgs {
                recipient: address.clone(),
                amount: "1.0".into(),
                block,
                leaf_index: block,
                append_to: Some(events.clone()),
            })
            .unwrap()
        };

        send_at(5);
        scan(&global, scan_args(&events)).await.unwrap();
        send_at(5);
        send_at(0);
        scan(&global, scan_args(&events)).await.unwrap();

        let store = Session::open(&global).unwrap().note_store().unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.available_balance(), 3 * 100_000_000);
    }
}
