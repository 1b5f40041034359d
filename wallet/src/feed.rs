//! JSON-lines deposit files.
//!
//! One `DepositObserved` per line, as printed by `send`. `scan` loads the
//! file into a [`MemoryChainWatcher`]; with `--follow` it keeps tailing the
//! file and publishes appended lines as live events.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

use shroud_protocol::discovery::{DepositObserved, MemoryChainWatcher};

/// How often `follow` re-reads the file.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct EventFile {
    pub deposits: Vec<DepositObserved>,
    /// Lines that did not parse.
    pub skipped: usize,
    /// Bytes consumed, up to the last complete line.
    pub offset: usize,
}

/// Parse the complete lines of `bytes`. A trailing partial line is left for
/// the next read.
pub fn parse_lines(bytes: &[u8]) -> EventFile {
    let mut file = EventFile::default();
    let Some(last_newline) = bytes.iter().rposition(|b| *b == b'\n') else {
        return file;
    };
    file.offset = last_newline + 1;

    for (number, line) in bytes[..file.offset].split(|b| *b == b'\n').enumerate() {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<DepositObserved>(line) {
            Ok(deposit) => file.deposits.push(deposit),
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping unparseable deposit record");
                file.skipped += 1;
            }
        }
    }
    file
}

pub fn read_events(path: &Path) -> Result<EventFile> {
    let mut bytes = std::fs::read(path)
        .with_context(|| format!("failed to read event file {}", path.display()))?;
    // A file written by hand may lack the final newline.
    if bytes.last().is_some_and(|b| *b != b'\n') {
        bytes.push(b'\n');
    }
    Ok(parse_lines(&bytes))
}

pub fn append_deposit(path: &Path, deposit: &DepositObserved) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let line = serde_json::to_string(deposit)?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Tail `path` from `offset`, publishing each new complete line, until
/// `shutdown` turns true.
pub async fn follow(
    path: PathBuf,
    watcher: Arc<MemoryChainWatcher>,
    mut offset: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = shutdown.changed() => return Ok(()),
        }

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read event file {}", path.display()))?;
        if bytes.len() < offset {
            warn!(path = %path.display(), "event file shrank, starting over");
            offset = 0;
        }
        let fresh = parse_lines(&bytes[offset..]);
        if fresh.offset == 0 {
            continue;
        }
        offset += fresh.offset;
        debug!(new = fresh.deposits.len(), offset, "event file grew");
        for deposit in fresh.deposits {
            watcher.publish(deposit);
        }
    }
}
