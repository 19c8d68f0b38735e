//! Signal inbox
//!
//! A Signal Source drops JSON files (one signal object or an array of them)
//! into `<data_dir>/inbox/`. Each trigger interval the daemon reads them,
//! ingests the signals and removes the file. Files that do not parse are
//! moved to `inbox/rejected/` so they are not retried forever.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::PendingSignal;

#[derive(Deserialize)]
#[serde(untagged)]
enum SignalFile {
    Many(Vec<PendingSignal>),
    One(PendingSignal),
}

/// Parse a signal file body (object or array)
pub fn parse_signals(json: &str) -> Result<Vec<PendingSignal>> {
    let parsed: SignalFile = serde_json::from_str(json).context("Not a signal or list of signals")?;
    Ok(match parsed {
        SignalFile::Many(signals) => signals,
        SignalFile::One(signal) => vec![signal],
    })
}

/// Signals read from one inbox file, removed on `acknowledge`
#[derive(Debug)]
pub struct InboxBatch {
    pub path: PathBuf,
    pub signals: Vec<PendingSignal>,
}

impl InboxBatch {
    pub fn acknowledge(self) -> Result<()> {
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove {}", self.path.display()))
    }
}

pub struct SignalInbox {
    dir: PathBuf,
}

impl SignalInbox {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("rejected")).context("Failed to create inbox directory")?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse every `*.json` file in name order. Unparseable files are moved
    /// aside and left out of the result.
    pub fn read_batches(&self) -> Result<Vec<InboxBatch>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut batches = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))
                .and_then(|body| parse_signals(&body));
            match parsed {
                Ok(signals) => {
                    info!(
                        file = %path.display(),
                        count = signals.len(),
                        "📥 [INBOX] Signal file read"
                    );
                    batches.push(InboxBatch { path, signals });
                }
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        error = %format!("{:#}", e),
                        "[INBOX] Rejecting signal file"
                    );
                    self.reject(&path)?;
                }
            }
        }
        Ok(batches)
    }

    fn reject(&self, path: &Path) -> Result<()> {
        let Some(name) = path.file_name() else {
            return Ok(());
        };
        let target = self.dir.join("rejected").join(name);
        fs::rename(path, &target)
            .with_context(|| format!("Failed to move {} to {}", path.display(), target.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNAL: &str = r#"{
        "asset": "BTC",
        "direction": "BUY",
        "entry_range": "99-100",
        "target": 111.0,
        "stop": 95.0,
        "entry_time": "2024-05-01T10:00:00Z",
        "exit_time": "2024-05-02T10:00:00Z",
        "technical_context": {"rsi": 41.5, "trend": "up"}
    }"#;

    fn temp_inbox() -> PathBuf {
        std::env::temp_dir().join(format!("paperdesk_inbox_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn accepts_single_object_and_array() {
        assert_eq!(parse_signals(SIGNAL).unwrap().len(), 1);
        let many = format!("[{0},{0}]", SIGNAL);
        assert_eq!(parse_signals(&many).unwrap().len(), 2);
        assert!(parse_signals("{\"asset\": 1}").is_err());
    }

    #[test]
    fn reads_valid_files_and_rejects_garbage() {
        let dir = temp_inbox();
        let inbox = SignalInbox::new(&dir).unwrap();
        fs::write(dir.join("a.json"), SIGNAL).unwrap();
        fs::write(dir.join("b.json"), "not json").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let batches = inbox.read_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].signals[0].asset, "BTC");
        assert!(dir.join("rejected").join("b.json").exists());
        assert!(dir.join("notes.txt").exists());

        for batch in batches {
            batch.acknowledge().unwrap();
        }
        assert!(!dir.join("a.json").exists());
        assert!(inbox.read_batches().unwrap().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }
}
