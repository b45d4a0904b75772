//! Error types for every layer of the pipeline.
//!
//! Normalization errors are row-local, strategy errors are operation-local,
//! extraction errors are local to one (instrument, interval) pair. Only
//! persistence, configuration and a lost browser session reach the caller
//! of a run.

use std::fmt;
use std::path::PathBuf;

/// Value-normalization failures. Recovered by dropping the row.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("malformed number: {0:?}")]
    MalformedNumber(String),

    #[error("bad date: {0:?}")]
    BadDate(String),
}

/// Failures reported by a browsing driver.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowseError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("interaction failed: {0}")]
    Interaction(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The underlying browser went away; nothing further can succeed.
    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("browser launch failed: {0}")]
    Launch(String),
}

/// Failures of one layout variant's operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("interaction failed: {0}")]
    InteractionFailed(String),

    #[error("results table not found: {0}")]
    TableNotFound(String),

    #[error("browser error: {0}")]
    Browse(BrowseError),
}

impl StrategyError {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::Browse(BrowseError::SessionLost(_)))
    }
}

impl From<BrowseError> for StrategyError {
    fn from(e: BrowseError) -> Self {
        match e {
            BrowseError::ElementNotFound(what) => Self::ElementNotFound(what),
            BrowseError::Interaction(what) => Self::InteractionFailed(what),
            other => Self::Browse(other),
        }
    }
}

/// Pipeline stage of one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Navigate,
    SelectInterval,
    SelectDateRange,
    ReadTable,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Navigate => "navigate",
            Self::SelectInterval => "select_interval",
            Self::SelectDateRange => "select_date_range",
            Self::ReadTable => "read_table",
        };
        f.write_str(name)
    }
}

/// An (instrument, interval) extraction that could not complete.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("extraction failed at {stage}: {cause}")]
    Failed { stage: Stage, cause: StrategyError },
}

impl ExtractionError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Failed { stage, .. } => *stage,
        }
    }

    pub fn is_session_lost(&self) -> bool {
        match self {
            Self::Failed { cause, .. } => cause.is_session_lost(),
        }
    }
}

/// Sink-layer failures. Always surfaced to the run caller.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored value is invalid: {0}")]
    InvalidValue(String),
}

/// Run-level failures of the coordinator.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    /// The run stopped early. `report` holds what was collected before.
    #[error("browser session lost during {stage} of {symbol} ({interval}): {cause}")]
    SessionLost {
        symbol: String,
        interval: crate::types::IntervalKind,
        stage: Stage,
        cause: StrategyError,
        report: Box<crate::coordinator::RunReport>,
    },
}

impl ScrapeError {
    /// Rows and counts gathered before the run stopped.
    pub fn partial_report(&self) -> &crate::coordinator::RunReport {
        match self {
            Self::SessionLost { report, .. } => report,
        }
    }
}

/// Run-journal write failures. Logged by the coordinator, never fatal.
#[derive(thiserror::Error, Debug)]
pub enum JournalError {
    #[error("failed to open journal {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write journal entry: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration loading and validation failures.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browse_error_maps_to_strategy_error() {
        let e: StrategyError = BrowseError::ElementNotFound(".menu".into()).into();
        assert_eq!(e, StrategyError::ElementNotFound(".menu".into()));

        let e: StrategyError = BrowseError::SessionLost("closed".into()).into();
        assert!(e.is_session_lost());
    }

    #[test]
    fn test_extraction_error_display() {
        let e = ExtractionError::Failed {
            stage: Stage::ReadTable,
            cause: StrategyError::TableNotFound("historical-data-table".into()),
        };
        assert_eq!(
            e.to_string(),
            "extraction failed at read_table: results table not found: historical-data-table"
        );
        assert_eq!(e.stage(), Stage::ReadTable);
        assert!(!e.is_session_lost());
    }
}
