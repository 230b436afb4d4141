//! Append-only durable log of signal transitions.
//!
//! Every lifecycle transition writes one JSON line; the newest line for
//! an identity is its current state. Replay on startup repopulates the
//! de-duplication set so a restart can never double-execute a signal.
//! Signals are evicted from active memory after retention, never from
//! this log.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use std::collections::HashMap;
use thetapilot_core::Signal;

/// Append-only JSONL journal.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Opens (creating if necessary) a journal at `path`.
    ///
    /// # Errors
    /// Returns error if the file or its parent directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating journal directory {}", dir.display()))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening journal {}", path.display()))?;

        Ok(Self { path })
    }

    /// Appends one signal snapshot.
    ///
    /// # Errors
    /// Returns error on serialization or I/O failure.
    pub fn append(&self, signal: &Signal) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening journal {}", self.path.display()))?;
        let line = serde_json::to_string(signal)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Replays the journal, returning the latest snapshot per identity.
    ///
    /// Corrupt lines are skipped with a warning; a torn final write must
    /// not take the engine down.
    ///
    /// # Errors
    /// Returns error if the file cannot be read.
    pub fn replay(&self) -> Result<Vec<Signal>> {
        let file = fs::File::open(&self.path)
            .with_context(|| format!("reading journal {}", self.path.display()))?;

        let mut latest: HashMap<String, Signal> = HashMap::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Signal>(&line) {
                Ok(signal) => {
                    latest.insert(signal.id.clone(), signal);
                }
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, "Skipping corrupt journal line");
                }
            }
        }

        Ok(latest.into_values().collect())
    }
}
