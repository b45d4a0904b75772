//! One (instrument, interval) extraction against the live page.

use tracing::{debug, info, warn};

use crate::browsing::{Browsing, Locator};
use crate::config::Timings;
use crate::error::{BrowseError, ExtractionError, NormalizationError, Stage, StrategyError};
use crate::layout::{default_layouts, with_fallback, LayoutStrategy};
use crate::normalize::{interval_to_selector_index, normalize_observation, DateFormat, RowContext};
use crate::types::{CanonicalObservation, InstrumentRef, IntervalKind, RawObservation};

/// Cookie-consent button that covers the page on first visit.
const CONSENT_BUTTON_ID: &str = "onetrust-accept-btn-handler";

/// Layout variant that won each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantsUsed {
    pub select_interval: &'static str,
    pub select_date_range: &'static str,
    pub read_table: &'static str,
}

/// A row dropped during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDiagnostic {
    /// Position in the source table, 0-based.
    pub row_index: usize,
    pub raw: RawObservation,
    pub error: NormalizationError,
}

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub variant_used: VariantsUsed,
    /// Normalized rows, in table order.
    pub rows: Vec<CanonicalObservation>,
    pub dropped: Vec<RowDiagnostic>,
}

/// Drives a browsing session through one extraction at a time.
pub struct ExtractionSession {
    base_url: String,
    layouts: Vec<Box<dyn LayoutStrategy>>,
    timings: Timings,
    date_format: DateFormat,
}

impl ExtractionSession {
    /// Session over the built-in layout variants.
    pub fn new(base_url: impl Into<String>, timings: Timings) -> Self {
        let layouts = default_layouts(&timings);
        Self::with_layouts(base_url, layouts, timings)
    }

    /// Session over an explicit variant list, tried in the given order.
    pub fn with_layouts(
        base_url: impl Into<String>,
        layouts: Vec<Box<dyn LayoutStrategy>>,
        timings: Timings,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            layouts,
            timings,
            date_format: DateFormat::default(),
        }
    }

    pub fn with_date_format(mut self, date_format: DateFormat) -> Self {
        self.date_format = date_format;
        self
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Navigate to the instrument's page, configure interval and date range,
    /// then read and normalize the results table.
    pub async fn extract(
        &self,
        browsing: &mut dyn Browsing,
        instrument: &InstrumentRef,
        interval: IntervalKind,
        start_year: i32,
        end_year: i32,
    ) -> Result<Extraction, ExtractionError> {
        let url = instrument.url(&self.base_url);
        info!(symbol = %instrument.symbol, %interval, "Loading {url}");
        browsing
            .navigate(&url)
            .await
            .map_err(|e| failed(Stage::Navigate, e))?;

        let page: &dyn Browsing = &*browsing;
        self.wait_until_ready(page).await?;
        dismiss_consent(page).await?;

        let index = interval_to_selector_index(interval);
        let layouts = self.layouts.as_slice();

        let chosen_interval = with_fallback(layouts, &self.timings, "select_interval", |l| {
            l.select_interval(page, index)
        })
        .await
        .map_err(|cause| ExtractionError::Failed {
            stage: Stage::SelectInterval,
            cause,
        })?;

        let chosen_range = with_fallback(layouts, &self.timings, "select_date_range", |l| {
            l.select_date_range(page, start_year, end_year)
        })
        .await
        .map_err(|cause| ExtractionError::Failed {
            stage: Stage::SelectDateRange,
            cause,
        })?;

        tokio::time::sleep(self.timings.settle_delay()).await;

        let table = with_fallback(layouts, &self.timings, "read_table", |l| l.read_table(page))
            .await
            .map_err(|cause| ExtractionError::Failed {
                stage: Stage::ReadTable,
                cause,
            })?;

        let ctx = RowContext {
            instrument,
            currency_code: &table.value.currency_code,
            interval,
            date_format: self.date_format,
        };

        let mut rows = Vec::with_capacity(table.value.rows.len());
        let mut dropped = Vec::new();
        for (row_index, raw) in table.value.rows.iter().enumerate() {
            match normalize_observation(raw, &ctx) {
                Ok(row) => rows.push(row),
                Err(error) => {
                    warn!(symbol = %instrument.symbol, %interval, row_index, "Dropping row: {error}");
                    dropped.push(RowDiagnostic {
                        row_index,
                        raw: raw.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            symbol = %instrument.symbol,
            %interval,
            rows = rows.len(),
            dropped = dropped.len(),
            layout = table.layout,
            "Extracted table"
        );

        Ok(Extraction {
            variant_used: VariantsUsed {
                select_interval: chosen_interval.layout,
                select_date_range: chosen_range.layout,
                read_table: table.layout,
            },
            rows,
            dropped,
        })
    }

    /// Wait for any variant's controls. Timing out is not fatal here; the
    /// stage fallback reports what is actually missing.
    async fn wait_until_ready(&self, page: &dyn Browsing) -> Result<(), ExtractionError> {
        let markers: Vec<Locator> = self.layouts.iter().map(|l| l.ready_marker()).collect();
        let ready = page
            .wait_for_any(
                &markers,
                self.timings.page_ready_timeout(),
                self.timings.poll_interval(),
            )
            .await
            .map_err(|e| failed(Stage::Navigate, e))?;

        match ready {
            Some(i) => debug!(layout = self.layouts[i].name(), "Page controls rendered"),
            None => debug!("No layout marker appeared before timeout"),
        }
        Ok(())
    }
}

async fn dismiss_consent(page: &dyn Browsing) -> Result<(), ExtractionError> {
    let clicked = match page.find(&Locator::id(CONSENT_BUTTON_ID)).await {
        Ok(button) => button.click().await,
        Err(e) => Err(e),
    };
    match clicked {
        Ok(()) => debug!("Dismissed consent overlay"),
        Err(e @ BrowseError::SessionLost(_)) => return Err(failed(Stage::Navigate, e)),
        Err(e) => debug!("No consent overlay: {e}"),
    }
    Ok(())
}

fn failed(stage: Stage, e: BrowseError) -> ExtractionError {
    ExtractionError::Failed {
        stage,
        cause: StrategyError::from(e),
    }
}
