//! Page-layout variants and the fallback protocol that picks between them.
//!
//! The source renders at least two incompatible markups for its
//! historical-data pages. Each [`LayoutStrategy`] knows one of them. The
//! extraction session asks [`with_fallback`] to run an operation against
//! every variant in priority order, so a page may match one variant's
//! interval control and another variant's table.

pub mod flex_rows;
pub mod react_select;
pub mod table;

pub use flex_rows::FlexRowsLayout;
pub use react_select::ReactSelectLayout;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::browsing::{Browsing, Locator};
use crate::config::Timings;
use crate::error::StrategyError;
use crate::types::RawObservation;

/// Rows and currency read from a results table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRead {
    pub rows: Vec<RawObservation>,
    pub currency_code: String,
}

/// One page-layout variant.
#[async_trait]
pub trait LayoutStrategy: Send + Sync {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// An element whose presence shows this variant's controls have rendered.
    fn ready_marker(&self) -> Locator;

    /// Open the interval control and activate option `index`.
    async fn select_interval(
        &self,
        browsing: &dyn Browsing,
        index: usize,
    ) -> Result<(), StrategyError>;

    /// Fill and commit the date-range control for `start_year..end_year`.
    async fn select_date_range(
        &self,
        browsing: &dyn Browsing,
        start_year: i32,
        end_year: i32,
    ) -> Result<(), StrategyError>;

    /// Locate the results table and the currency label.
    async fn read_table(&self, browsing: &dyn Browsing) -> Result<TableRead, StrategyError>;
}

/// The known variants, in priority order.
pub fn default_layouts(timings: &Timings) -> Vec<Box<dyn LayoutStrategy>> {
    vec![
        Box::new(ReactSelectLayout::new(timings.picker_settle())),
        Box::new(FlexRowsLayout::new(timings.input_settle())),
    ]
}

/// Successful fallback run.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    /// Variant that succeeded.
    pub layout: &'static str,
    /// Attempts spent across all variants, including the successful one.
    pub attempts: u32,
}

/// Run `op` against each layout in order, retrying each up to
/// `timings.attempts_per_variant` times. The first success wins.
///
/// When every variant is exhausted the last error is returned. A lost
/// browser session stops immediately.
pub async fn with_fallback<'a, T, F>(
    layouts: &'a [Box<dyn LayoutStrategy>],
    timings: &Timings,
    operation: &str,
    mut op: F,
) -> Result<Resolved<T>, StrategyError>
where
    F: FnMut(&'a dyn LayoutStrategy) -> BoxFuture<'a, Result<T, StrategyError>>,
{
    let per_variant = timings.attempts_per_variant.max(1);
    let mut attempts = 0u32;
    let mut last_err = None;

    for layout in layouts {
        for attempt in 1..=per_variant {
            attempts += 1;
            match op(layout.as_ref()).await {
                Ok(value) => {
                    debug!(layout = layout.name(), attempt, "{operation} succeeded");
                    return Ok(Resolved {
                        value,
                        layout: layout.name(),
                        attempts,
                    });
                }
                Err(e) if e.is_session_lost() => return Err(e),
                Err(e) => {
                    debug!(layout = layout.name(), attempt, "{operation} failed: {e}");
                    last_err = Some(e);
                    if attempt < per_variant {
                        tokio::time::sleep(timings.poll_interval()).await;
                    }
                }
            }
        }
    }

    warn!("{operation}: every layout failed after {attempts} attempts");
    Err(last_err.unwrap_or_else(|| {
        StrategyError::ElementNotFound(format!("no layouts configured for {operation}"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browsing::{BrowseResult, Element};
    use crate::error::BrowseError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoPage;

    #[async_trait]
    impl Browsing for NoPage {
        async fn navigate(&mut self, _url: &str) -> BrowseResult<()> {
            Ok(())
        }
        async fn find(&self, locator: &Locator) -> BrowseResult<Box<dyn Element>> {
            Err(BrowseError::ElementNotFound(locator.to_string()))
        }
        async fn find_all(&self, _locator: &Locator) -> BrowseResult<Vec<Box<dyn Element>>> {
            Ok(Vec::new())
        }
        async fn close(&mut self) -> BrowseResult<()> {
            Ok(())
        }
    }

    /// Fails a fixed number of times, then succeeds.
    struct Flaky {
        name: &'static str,
        failures: u32,
        calls: AtomicU32,
        error: StrategyError,
    }

    impl Flaky {
        fn new(name: &'static str, failures: u32, error: StrategyError) -> Self {
            Self {
                name,
                failures,
                calls: AtomicU32::new(0),
                error,
            }
        }

        fn step(&self) -> Result<(), StrategyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl LayoutStrategy for Flaky {
        fn name(&self) -> &'static str {
            self.name
        }
        fn ready_marker(&self) -> Locator {
            Locator::id(self.name)
        }
        async fn select_interval(&self, _: &dyn Browsing, _: usize) -> Result<(), StrategyError> {
            self.step()
        }
        async fn select_date_range(
            &self,
            _: &dyn Browsing,
            _: i32,
            _: i32,
        ) -> Result<(), StrategyError> {
            self.step()
        }
        async fn read_table(&self, _: &dyn Browsing) -> Result<TableRead, StrategyError> {
            self.step().map(|()| TableRead {
                rows: Vec::new(),
                currency_code: self.name.to_string(),
            })
        }
    }

    fn timings(attempts: u32) -> Timings {
        Timings {
            attempts_per_variant: attempts,
            ..Timings::immediate()
        }
    }

    #[tokio::test]
    async fn test_retries_within_variant_before_falling_back() {
        let layouts: Vec<Box<dyn LayoutStrategy>> = vec![
            Box::new(Flaky::new("a", 2, StrategyError::ElementNotFound("a".into()))),
            Box::new(Flaky::new("b", 0, StrategyError::ElementNotFound("b".into()))),
        ];
        let page = NoPage;
        let resolved = with_fallback(&layouts, &timings(3), "select_interval", |l| {
            l.select_interval(&page, 0)
        })
        .await
        .unwrap();
        assert_eq!(resolved.layout, "a");
        assert_eq!(resolved.attempts, 3);
    }

    #[tokio::test]
    async fn test_falls_back_to_second_variant() {
        let layouts: Vec<Box<dyn LayoutStrategy>> = vec![
            Box::new(Flaky::new("a", u32::MAX, StrategyError::TableNotFound("a".into()))),
            Box::new(Flaky::new("b", 0, StrategyError::TableNotFound("b".into()))),
        ];
        let page = NoPage;
        let resolved = with_fallback(&layouts, &timings(2), "read_table", |l| l.read_table(&page))
            .await
            .unwrap();
        assert_eq!(resolved.layout, "b");
        assert_eq!(resolved.value.currency_code, "b");
        assert_eq!(resolved.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let layouts: Vec<Box<dyn LayoutStrategy>> = vec![
            Box::new(Flaky::new("a", u32::MAX, StrategyError::TableNotFound("a".into()))),
            Box::new(Flaky::new("b", u32::MAX, StrategyError::TableNotFound("b".into()))),
        ];
        let page = NoPage;
        let err = with_fallback(&layouts, &timings(2), "read_table", |l| l.read_table(&page))
            .await
            .unwrap_err();
        assert_eq!(err, StrategyError::TableNotFound("b".into()));
    }

    #[tokio::test]
    async fn test_session_lost_stops_fallback() {
        let lost = StrategyError::Browse(BrowseError::SessionLost("gone".into()));
        let second = Flaky::new("b", 0, StrategyError::ElementNotFound("b".into()));
        let layouts: Vec<Box<dyn LayoutStrategy>> =
            vec![Box::new(Flaky::new("a", u32::MAX, lost.clone())), Box::new(second)];
        let page = NoPage;
        let err = with_fallback(&layouts, &timings(3), "select_interval", |l| {
            l.select_interval(&page, 1)
        })
        .await
        .unwrap_err();
        assert_eq!(err, lost);
    }

    #[test]
    fn test_default_priority_order() {
        let layouts = default_layouts(&Timings::immediate());
        let names: Vec<_> = layouts.iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["react-select", "flex-rows"]);
    }
}
