//! Layout with a react-select interval dropdown and a two-field native date
//! popup.

use std::time::Duration;

use async_trait::async_trait;

use super::table::parse_history_table;
use super::{LayoutStrategy, TableRead};
use crate::browsing::{Browsing, Locator};
use crate::error::{BrowseError, StrategyError};

const VALUE_CLASS: &str = "css-1uccc91-singleValue";
const MENU_CLASS: &str = "css-1uhu340-menu";
const OPTION_ID_PREFIX: &str = "react-select-2-option-";
/// The menu opens asynchronously after the value is clicked.
const MENU_POLL: Duration = Duration::from_millis(100);

const DATE_BOX_CLASS: &str = "DatePickerWrapper_input__UVqms";
const DATE_FIELD_CLASS: &str = "NativeDateInput_root__lZxBl";
const DATE_FOOTER_CLASS: &str = "HistoryDatePicker_footer__xzpr0";

const TABLE_ATTR: &str = "data-test";
const TABLE_MARKER: &str = "historical-data-table";
const CURRENCY_CLASS: &str = "instrument-metadata_currency__XER9q";

/// The popup sometimes drops the first commit, so it is filled this many times.
const COMMIT_PASSES: usize = 2;

/// react-select dropdown + native date inputs.
///
/// End boundary is Jan 1 of `end_year - 1`.
pub struct ReactSelectLayout {
    /// Wait after each commit of the date popup, also the menu-open timeout.
    settle: Duration,
}

impl ReactSelectLayout {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    /// Text typed into the (start, end) fields.
    pub fn boundaries(start_year: i32, end_year: i32) -> (String, String) {
        (
            format!("01.01.{start_year}"),
            format!("01.01.{}", end_year - 1),
        )
    }
}

#[async_trait]
impl LayoutStrategy for ReactSelectLayout {
    fn name(&self) -> &'static str {
        "react-select"
    }

    fn ready_marker(&self) -> Locator {
        Locator::class(VALUE_CLASS)
    }

    async fn select_interval(
        &self,
        browsing: &dyn Browsing,
        index: usize,
    ) -> Result<(), StrategyError> {
        browsing.find(&Locator::class(VALUE_CLASS)).await?.click().await?;

        let menu_locator = Locator::class(MENU_CLASS);
        if !browsing.wait_for(&menu_locator, self.settle, MENU_POLL).await? {
            return Err(StrategyError::ElementNotFound(menu_locator.to_string()));
        }
        let menu = browsing.find(&menu_locator).await?;
        menu.find(&Locator::id(format!("{OPTION_ID_PREFIX}{index}")))
            .await?
            .click()
            .await?;
        Ok(())
    }

    async fn select_date_range(
        &self,
        browsing: &dyn Browsing,
        start_year: i32,
        end_year: i32,
    ) -> Result<(), StrategyError> {
        let (start_text, end_text) = Self::boundaries(start_year, end_year);

        for _ in 0..COMMIT_PASSES {
            browsing.find(&Locator::class(DATE_BOX_CLASS)).await?.click().await?;

            let fields = browsing.find_all(&Locator::class(DATE_FIELD_CLASS)).await?;
            let [start_field, end_field, ..] = fields.as_slice() else {
                return Err(StrategyError::ElementNotFound(format!(
                    "expected two {DATE_FIELD_CLASS} fields, found {}",
                    fields.len()
                )));
            };

            let end_input = end_field.find(&Locator::tag("input")).await?;
            end_input.clear().await?;
            end_input.send_text(&end_text).await?;

            let start_input = start_field.find(&Locator::tag("input")).await?;
            start_input.clear().await?;
            start_input.send_text(&start_text).await?;

            browsing
                .find(&Locator::class(DATE_FOOTER_CLASS))
                .await?
                .find(&Locator::tag("button"))
                .await?
                .click()
                .await?;

            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }

    async fn read_table(&self, browsing: &dyn Browsing) -> Result<TableRead, StrategyError> {
        let table = browsing
            .find(&Locator::attribute(TABLE_ATTR, TABLE_MARKER))
            .await
            .map_err(|e| match e {
                BrowseError::ElementNotFound(what) => StrategyError::TableNotFound(what),
                other => other.into(),
            })?;

        let rows = parse_history_table(&table.outer_html().await?);
        if rows.is_empty() {
            return Err(StrategyError::TableNotFound(format!(
                "{TABLE_MARKER} has no data rows"
            )));
        }

        // Label renders as "<caption>\n<code>"
        let label = browsing.find(&Locator::class(CURRENCY_CLASS)).await?.text().await?;
        let currency_code = label
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .nth(1)
            .ok_or_else(|| {
                StrategyError::ElementNotFound(format!("currency code in {CURRENCY_CLASS}"))
            })?
            .to_string();

        Ok(TableRead {
            rows,
            currency_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_exclude_end_year() {
        let (start, end) = ReactSelectLayout::boundaries(2010, 2024);
        assert_eq!(start, "01.01.2010");
        assert_eq!(end, "01.01.2023");
    }
}
