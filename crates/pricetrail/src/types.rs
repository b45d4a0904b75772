//! Domain types: instruments, intervals, raw and canonical observations, and
//! the run-owned dataset.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Asset class of an instrument. Decides the page path segment on the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentCategory {
    Currency,
    Equity,
    Commodity,
}

impl InstrumentCategory {
    /// Path segment the source uses for this category.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Currency => "currencies",
            Self::Equity => "equities",
            Self::Commodity => "commodities",
        }
    }
}

impl fmt::Display for InstrumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Currency => "currency",
            Self::Equity => "equity",
            Self::Commodity => "commodity",
        };
        f.write_str(name)
    }
}

/// A configured instrument. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentRef {
    /// Catalog symbol / page slug (e.g. `eur-usd`).
    pub symbol: String,
    pub category: InstrumentCategory,
    /// Page path relative to the source base URL.
    pub source_path: String,
}

impl InstrumentRef {
    /// Build a reference with the source's historical-data page path.
    pub fn new(symbol: impl Into<String>, category: InstrumentCategory) -> Self {
        let symbol = symbol.into();
        let source_path = format!("{}/{}-historical-data", category.path_segment(), symbol);
        Self {
            symbol,
            category,
            source_path,
        }
    }

    /// Full page URL under `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        if base_url.ends_with('/') {
            format!("{base_url}{}", self.source_path)
        } else {
            format!("{base_url}/{}", self.source_path)
        }
    }
}

/// Sampling granularity of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalKind {
    Daily,
    Weekly,
    Monthly,
}

impl IntervalKind {
    /// Position of this interval in the source's interval control.
    pub fn selector_index(self) -> usize {
        match self {
            Self::Daily => 0,
            Self::Weekly => 1,
            Self::Monthly => 2,
        }
    }

    /// Label the source shows for this interval.
    pub fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        }
    }

    pub fn all() -> [IntervalKind; 3] {
        [Self::Daily, Self::Weekly, Self::Monthly]
    }

    /// Map a UI label to an interval. Unknown labels resolve to `Daily`.
    pub fn from_label_or_daily(label: &str) -> Self {
        label.parse().unwrap_or(Self::Daily)
    }

    /// Whether `text` is one of the interval labels the source renders.
    pub fn is_label(text: &str) -> bool {
        Self::all().iter().any(|k| k.label() == text.trim())
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IntervalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

/// One results-table row as scraped, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawObservation {
    pub date_text: String,
    pub last_text: String,
    pub open_text: String,
    pub max_text: String,
    pub min_text: String,
    pub volume_text: String,
    pub change_text: String,
}

/// A fully normalized, typed observation ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalObservation {
    pub instrument: InstrumentRef,
    pub currency_code: String,
    pub interval: IntervalKind,
    pub date: NaiveDate,
    pub last_price: Option<Decimal>,
    pub open_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub volume: String,
    pub change: String,
}

/// Id/name pair for an instrument or currency, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// 1-based, first-seen order.
    pub id: i64,
    pub name: String,
}

pub type InstrumentRecord = CatalogRecord;
pub type CurrencyRecord = CatalogRecord;

/// Observations accumulated over one run, in (catalog, interval, table row)
/// order. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    rows: Vec<CanonicalObservation>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one extraction's rows, keeping their order.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = CanonicalObservation>) {
        self.rows.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CanonicalObservation> {
        self.rows.iter()
    }
}

impl FromIterator<CanonicalObservation> for Dataset {
    fn from_iter<I: IntoIterator<Item = CanonicalObservation>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a CanonicalObservation;
    type IntoIter = std::slice::Iter<'a, CanonicalObservation>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
