//! State Store - resumable checkpoint persistence
//!
//! Progress lives under `{base}/.gzh/state/` as two files: an append-only
//! `journal.jsonl` written after every task completion, and a `state.json`
//! snapshot replaced atomically (write-to-temp + rename). The journal is
//! the source of truth; the snapshot is a convenience index rebuilt from it
//! on load when the two disagree.
//!
//! Resume rules: Success, Skipped and Conflict are terminal and not
//! re-enqueued; Failed is re-enqueued unless the failure was permanent
//! (auth, remote mismatch); Interrupted is always re-enqueued.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::strategy::{ErrorDetail, TaskResult, TaskStatus};

const STATE_DIR: &str = ".gzh/state";
const JOURNAL_FILE: &str = "journal.jsonl";
const SNAPSHOT_FILE: &str = "state.json";

/// One line of the journal: the terminal outcome of one task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub key: String,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl CheckpointRecord {
    fn from_result(result: &TaskResult) -> Self {
        Self {
            key: result.key.clone(),
            status: result.status,
            timestamp: Utc::now(),
            error: result.error.clone(),
        }
    }
}

/// Snapshot index: latest checkpoint per repository key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub records: HashMap<String, CheckpointRecord>,
}

impl SyncState {
    /// Whether a repository with this prior checkpoint should run again.
    pub fn should_enqueue(&self, key: &str) -> bool {
        match self.records.get(key) {
            None => true,
            Some(record) => match record.status {
                TaskStatus::Success | TaskStatus::Skipped | TaskStatus::Conflict => false,
                TaskStatus::Interrupted => true,
                TaskStatus::Failed => !record
                    .error
                    .as_ref()
                    .is_some_and(ErrorDetail::is_permanent),
            },
        }
    }

    pub fn has_interrupted(&self) -> bool {
        self.records
            .values()
            .any(|r| r.status == TaskStatus::Interrupted)
    }
}

/// Single writer of checkpoints for a run.
pub struct StateStore {
    dir: PathBuf,
    journal: File,
    state: SyncState,
}

impl StateStore {
    /// Open (or create) the store under the base target directory and load
    /// any prior state.
    pub fn open(base: &Path) -> Result<Self> {
        let dir = base.join(STATE_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state dir: {}", dir.display()))?;

        let state = Self::load_state(&dir)?;
        let journal_path = dir.join(JOURNAL_FILE);
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .with_context(|| format!("Failed to open journal: {}", journal_path.display()))?;

        debug!(dir = %dir.display(), known = state.records.len(), "state store opened");
        Ok(Self { dir, journal, state })
    }

    fn load_state(dir: &Path) -> Result<SyncState> {
        let journal_path = dir.join(JOURNAL_FILE);
        if !journal_path.exists() {
            return Ok(SyncState::default());
        }

        // Replay the journal; later lines win. A torn final line from a
        // crashed run is skipped, not fatal.
        let file = File::open(&journal_path)
            .with_context(|| format!("Failed to read journal: {}", journal_path.display()))?;
        let mut state = SyncState::default();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckpointRecord>(&line) {
                Ok(record) => {
                    state.records.insert(record.key.clone(), record);
                }
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "skipping malformed journal line");
                }
            }
        }
        Ok(state)
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Append one completion to the journal and refresh the snapshot.
    pub fn record(&mut self, result: &TaskResult) -> Result<()> {
        let record = CheckpointRecord::from_result(result);
        let line = serde_json::to_string(&record).context("Failed to serialize checkpoint")?;
        writeln!(self.journal, "{line}").context("Failed to append to journal")?;
        self.journal.flush().context("Failed to flush journal")?;

        self.state.records.insert(record.key.clone(), record);
        self.write_snapshot()
    }

    fn write_snapshot(&self) -> Result<()> {
        let path = self.dir.join(SNAPSHOT_FILE);
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        let content =
            serde_json::to_string_pretty(&self.state).context("Failed to serialize state")?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace snapshot: {}", path.display()))?;
        Ok(())
    }

    /// Drop all prior checkpoints, used when starting a non-resume run so a
    /// stale journal cannot mask repositories from this pass.
    pub fn reset(&mut self) -> Result<()> {
        let journal_path = self.dir.join(JOURNAL_FILE);
        self.journal = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&journal_path)
            .with_context(|| format!("Failed to truncate journal: {}", journal_path.display()))?;
        self.state = SyncState::default();
        self.write_snapshot()?;
        info!("checkpoint state reset");
        Ok(())
    }
}
