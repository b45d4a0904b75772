//! Run loop over the instrument catalog.
//!
//! Extractions run one at a time over a single browsing session, catalog
//! order outer and interval order inner. A failed pair is logged and
//! skipped. Only a lost browser session ends the run early.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::browsing::Browsing;
use crate::error::{ExtractionError, ScrapeError, Stage, StrategyError};
use crate::journal::{timestamp, JournalEntry, Outcome, RunJournal};
use crate::session::{Extraction, ExtractionSession};
use crate::types::{Dataset, InstrumentRef, IntervalKind};

/// An (instrument, interval) pair that produced no rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairFailure {
    pub symbol: String,
    pub interval: IntervalKind,
    pub stage: Stage,
    pub cause: StrategyError,
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<PairFailure>,
    pub rows: usize,
    pub dropped_rows: usize,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} extractions succeeded, {} rows collected, {} rows dropped",
            self.succeeded, self.attempted, self.rows, self.dropped_rows
        )
    }
}

/// Rows and counts of a run, complete or stopped early.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub dataset: Dataset,
    pub summary: RunSummary,
}

pub struct ScrapeCoordinator {
    session: ExtractionSession,
    journal: Option<RunJournal>,
}

impl ScrapeCoordinator {
    pub fn new(session: ExtractionSession) -> Self {
        Self {
            session,
            journal: None,
        }
    }

    /// Record every attempt and the final summary to `journal`.
    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Extract every (instrument, interval) pair, then close `browsing`.
    ///
    /// The session is closed exactly once, whether the run completes, stops
    /// on a lost session, or panics. A failed close is only logged. A lost
    /// session still logs and journals the summary, and the error carries
    /// the rows collected up to that point.
    pub async fn run<B: Browsing>(
        &mut self,
        mut browsing: B,
        catalog: &[InstrumentRef],
        intervals: &[IntervalKind],
        start_year: i32,
        end_year: i32,
    ) -> Result<RunReport, ScrapeError> {
        let outcome = AssertUnwindSafe(self.run_pairs(
            &mut browsing,
            catalog,
            intervals,
            start_year,
            end_year,
        ))
        .catch_unwind()
        .await;

        match browsing.close().await {
            Ok(()) => debug!("Browser session closed"),
            Err(e) => warn!("Failed to close browser session: {e}"),
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_pairs(
        &mut self,
        browsing: &mut dyn Browsing,
        catalog: &[InstrumentRef],
        intervals: &[IntervalKind],
        start_year: i32,
        end_year: i32,
    ) -> Result<RunReport, ScrapeError> {
        let mut dataset = Dataset::new();
        let mut summary = RunSummary::default();
        let pacing = self.session.timings().pacing_delay();

        info!(
            instruments = catalog.len(),
            intervals = intervals.len(),
            start_year,
            end_year,
            "Starting scrape run"
        );

        for instrument in catalog {
            for &interval in intervals {
                if summary.attempted > 0 {
                    tokio::time::sleep(pacing).await;
                }
                summary.attempted += 1;

                let started = Instant::now();
                let result = self
                    .session
                    .extract(browsing, instrument, interval, start_year, end_year)
                    .await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.journal_attempt(instrument, interval, &result, elapsed_ms);

                match result {
                    Ok(Extraction { rows, dropped, .. }) => {
                        summary.succeeded += 1;
                        summary.rows += rows.len();
                        summary.dropped_rows += dropped.len();
                        dataset.extend(rows);
                    }
                    Err(ExtractionError::Failed { stage, cause }) => {
                        if cause.is_session_lost() {
                            warn!(symbol = %instrument.symbol, %interval, "Browser session lost, stopping run");
                            summary.failures.push(PairFailure {
                                symbol: instrument.symbol.clone(),
                                interval,
                                stage,
                                cause: cause.clone(),
                            });
                            self.finish(&summary);
                            return Err(ScrapeError::SessionLost {
                                symbol: instrument.symbol.clone(),
                                interval,
                                stage,
                                cause,
                                report: Box::new(RunReport { dataset, summary }),
                            });
                        }
                        warn!(symbol = %instrument.symbol, %interval, %stage, "Extraction failed: {cause}");
                        summary.failures.push(PairFailure {
                            symbol: instrument.symbol.clone(),
                            interval,
                            stage,
                            cause,
                        });
                    }
                }
            }
        }

        self.finish(&summary);
        Ok(RunReport { dataset, summary })
    }

    fn finish(&mut self, summary: &RunSummary) {
        info!("Scrape run finished: {summary}");
        self.journal_summary(summary);
    }

    fn journal_attempt(
        &mut self,
        instrument: &InstrumentRef,
        interval: IntervalKind,
        result: &Result<Extraction, ExtractionError>,
        elapsed_ms: u64,
    ) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };

        let (outcome, rows, dropped_rows, stage, error) = match result {
            Ok(ext) => (Outcome::Succeeded, ext.rows.len(), ext.dropped.len(), None, None),
            Err(e) => (Outcome::Failed, 0, 0, Some(e.stage()), Some(e.to_string())),
        };
        let entry = JournalEntry::Attempt {
            timestamp: timestamp(),
            symbol: instrument.symbol.clone(),
            category: instrument.category,
            interval,
            outcome,
            rows,
            dropped_rows,
            elapsed_ms,
            stage,
            error,
        };
        if let Err(e) = journal.record(&entry) {
            warn!("Journal write to {} failed: {e}", journal.path().display());
        }
    }

    fn journal_summary(&mut self, summary: &RunSummary) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };

        let entry = JournalEntry::Summary {
            timestamp: timestamp(),
            attempted: summary.attempted,
            succeeded: summary.succeeded,
            failed: summary.failed(),
            rows: summary.rows,
            dropped_rows: summary.dropped_rows,
        };
        if let Err(e) = journal.record(&entry) {
            warn!("Journal write to {} failed: {e}", journal.path().display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            attempted: 9,
            succeeded: 6,
            failures: Vec::new(),
            rows: 1200,
            dropped_rows: 3,
        };
        assert_eq!(
            summary.to_string(),
            "6/9 extractions succeeded, 1200 rows collected, 3 rows dropped"
        );
    }
}
