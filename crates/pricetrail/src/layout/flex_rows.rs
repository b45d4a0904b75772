//! Layout with a plain row-list interval menu and a single date popup whose
//! inputs are addressed by position.
//!
//! Most controls here carry no stable id, so they are matched by their full
//! `class` attribute.

use std::time::Duration;

use async_trait::async_trait;

use super::table::parse_history_table;
use super::{LayoutStrategy, TableRead};
use crate::browsing::{Browsing, Element, Locator};
use crate::error::{BrowseError, StrategyError};
use crate::types::IntervalKind;

const MENU_TRIGGER_CLASS: &str = "flex-1";
const MENU_ROW_CLASS: &str = "historical-data-v2_menu-row-text__ZgtVH";

// Trailing space is part of the rendered attribute.
const DATE_FRAME_CLASS: &str = "flex py-2 px-[14px] gap-[14px] flex-1 border border-solid border-[#CFD4DA] rounded bg-[#FFF] shadow-select items-center ";
const DATE_APPLY_CLASS: &str = "flex py-2.5 pl-4 pr-6 items-center gap-3 rounded bg-v2-blue shadow-button hover:bg-[#116BCC] cursor-pointer";
const START_INPUT: usize = 1;
const END_INPUT: usize = 2;

const TABLE_CLASS: &str = "w-full text-xs leading-4 overflow-x-auto freeze-column-w-1";
const CURRENCY_CLASS: &str = "ml-1.5 font-bold";

/// Row-list menu + positional date inputs.
///
/// End boundary is typed as `01.00.{end_year}`, start as Dec 31 of the year
/// before `start_year`.
pub struct FlexRowsLayout {
    /// Wait between opening the popup and typing into each input.
    settle: Duration,
}

impl FlexRowsLayout {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    /// Text typed into the (start, end) inputs.
    pub fn boundaries(start_year: i32, end_year: i32) -> (String, String) {
        (
            format!("31.12.{}", start_year - 1),
            format!("01.00.{end_year}"),
        )
    }
}

fn class_attr(value: &str) -> Locator {
    Locator::attribute("class", value)
}

async fn nth_input(browsing: &dyn Browsing, n: usize) -> Result<Box<dyn Element>, StrategyError> {
    let mut inputs = browsing.find_all(&Locator::tag("input")).await?;
    let found = inputs.len();
    if n >= found {
        return Err(StrategyError::ElementNotFound(format!(
            "input #{n} (page has {found})"
        )));
    }
    Ok(inputs.swap_remove(n))
}

#[async_trait]
impl LayoutStrategy for FlexRowsLayout {
    fn name(&self) -> &'static str {
        "flex-rows"
    }

    fn ready_marker(&self) -> Locator {
        class_attr(DATE_FRAME_CLASS)
    }

    async fn select_interval(
        &self,
        browsing: &dyn Browsing,
        index: usize,
    ) -> Result<(), StrategyError> {
        let mut trigger = None;
        for candidate in browsing.find_all(&Locator::class(MENU_TRIGGER_CLASS)).await? {
            if IntervalKind::is_label(candidate.text().await?.trim()) {
                trigger = Some(candidate);
                break;
            }
        }
        let trigger = trigger.ok_or_else(|| {
            StrategyError::ElementNotFound(format!(
                "{MENU_TRIGGER_CLASS} element showing an interval label"
            ))
        })?;
        trigger.click().await?;

        let mut rows = browsing.find_all(&Locator::class(MENU_ROW_CLASS)).await?;
        if index >= rows.len() {
            return Err(StrategyError::ElementNotFound(format!(
                "{MENU_ROW_CLASS} row #{index} (menu has {})",
                rows.len()
            )));
        }
        rows.swap_remove(index).click().await?;
        Ok(())
    }

    async fn select_date_range(
        &self,
        browsing: &dyn Browsing,
        start_year: i32,
        end_year: i32,
    ) -> Result<(), StrategyError> {
        let (start_text, end_text) = Self::boundaries(start_year, end_year);

        browsing.find(&class_attr(DATE_FRAME_CLASS)).await?.click().await?;
        tokio::time::sleep(self.settle).await;

        let end_input = nth_input(browsing, END_INPUT).await?;
        end_input.clear().await?;
        end_input.send_text(&end_text).await?;
        tokio::time::sleep(self.settle).await;

        let start_input = nth_input(browsing, START_INPUT).await?;
        start_input.clear().await?;
        start_input.send_text(&start_text).await?;

        browsing.find(&class_attr(DATE_APPLY_CLASS)).await?.click().await?;
        Ok(())
    }

    async fn read_table(&self, browsing: &dyn Browsing) -> Result<TableRead, StrategyError> {
        let table = browsing
            .find(&class_attr(TABLE_CLASS))
            .await
            .map_err(|e| match e {
                BrowseError::ElementNotFound(what) => StrategyError::TableNotFound(what),
                other => other.into(),
            })?;

        let rows = parse_history_table(&table.outer_html().await?);
        if rows.is_empty() {
            return Err(StrategyError::TableNotFound(format!(
                "{TABLE_CLASS} has no data rows"
            )));
        }

        let currency_code = browsing
            .find(&class_attr(CURRENCY_CLASS))
            .await?
            .text()
            .await?
            .trim()
            .to_string();
        if currency_code.is_empty() {
            return Err(StrategyError::ElementNotFound(format!(
                "currency code in {CURRENCY_CLASS}"
            )));
        }

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
    fn test_boundaries_keep_positional_convention() {
        let (start, end) = FlexRowsLayout::boundaries(2010, 2024);
        assert_eq!(start, "31.12.2009");
        assert_eq!(end, "01.00.2024");
    }

    #[test]
    fn test_exact_class_locators() {
        assert_eq!(
            class_attr(CURRENCY_CLASS).to_css(),
            r#"[class="ml-1.5 font-bold"]"#
        );
        assert!(class_attr(DATE_FRAME_CLASS).to_css().ends_with("items-center \"]"));
    }
}
