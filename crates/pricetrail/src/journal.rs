//! JSONL run journal: one line per extraction attempt, plus a summary line.
//!
//! The journal is append-only. Several runs may share one file; each run
//! ends with its own `summary` line.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{JournalError, Stage};
use crate::types::{InstrumentCategory, IntervalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Attempt {
        timestamp: String,
        symbol: String,
        category: InstrumentCategory,
        interval: IntervalKind,
        outcome: Outcome,
        rows: usize,
        dropped_rows: usize,
        elapsed_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Summary {
        timestamp: String,
        attempted: usize,
        succeeded: usize,
        failed: usize,
        rows: usize,
        dropped_rows: usize,
    },
}

/// Append-only JSONL writer.
pub struct RunJournal {
    file: File,
    path: PathBuf,
}

impl RunJournal {
    /// Open or create the journal, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let open_err = |source| JournalError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}")?;
        Ok(())
    }
}

/// RFC 3339 timestamp for a journal line.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("journal.jsonl");

        let mut journal = RunJournal::open(&path).unwrap();
        journal
            .record(&JournalEntry::Attempt {
                timestamp: timestamp(),
                symbol: "gold".into(),
                category: InstrumentCategory::Commodity,
                interval: IntervalKind::Weekly,
                outcome: Outcome::Failed,
                rows: 0,
                dropped_rows: 0,
                elapsed_ms: 12,
                stage: Some(Stage::ReadTable),
                error: Some("results table not found".into()),
            })
            .unwrap();
        journal
            .record(&JournalEntry::Summary {
                timestamp: timestamp(),
                attempted: 1,
                succeeded: 0,
                failed: 1,
                rows: 0,
                dropped_rows: 0,
            })
            .unwrap();
        drop(journal);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "attempt");
        assert_eq!(first["interval"], "Weekly");
        assert_eq!(first["stage"], "read_table");
        assert_eq!(first["outcome"], "failed");

        let second: JournalEntry = serde_json::from_str(lines[1]).unwrap();
        assert!(matches!(second, JournalEntry::Summary { failed: 1, .. }));
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let summary = JournalEntry::Summary {
            timestamp: timestamp(),
            attempted: 0,
            succeeded: 0,
            failed: 0,
            rows: 0,
            dropped_rows: 0,
        };

        RunJournal::open(&path).unwrap().record(&summary).unwrap();
        RunJournal::open(&path).unwrap().record(&summary).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
