//! Value normalization: repairs the source's locale-specific numbers, parses
//! its dates, and maps intervals to control positions.
//!
//! Everything here is pure. The source renders `1 234,56` style numbers; by
//! the time a cell reaches [`normalize_price`] its commas have been rewritten
//! to dots ([`dot_decimal`]), so a value with a thousands separator arrives
//! as `1.234.56`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::NormalizationError;
use crate::types::{CanonicalObservation, InstrumentRef, IntervalKind, RawObservation};

/// Date layouts the source is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    /// `DD.MM.YYYY`
    #[default]
    DayMonthYear,
    /// `YYYY-MM-DD`
    Iso,
}

impl DateFormat {
    fn chrono_pattern(self) -> &'static str {
        match self {
            Self::DayMonthYear => "%d.%m.%Y",
            Self::Iso => "%Y-%m-%d",
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DayMonthYear => f.write_str("DD.MM.YYYY"),
            Self::Iso => f.write_str("YYYY-MM-DD"),
        }
    }
}

impl FromStr for DateFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DD.MM.YYYY" => Ok(Self::DayMonthYear),
            "YYYY-MM-DD" => Ok(Self::Iso),
            other => Err(format!("unsupported date format: {other}")),
        }
    }
}

/// Rewrite decimal commas to dots, the way cells are read off the page.
pub fn dot_decimal(text: &str) -> String {
    text.replace(',', ".")
}

/// Parse a price cell.
///
/// Blank input is `Ok(None)`. `a.b` parses directly. `a.b.c` is a thousands
/// separator that collided with the decimal point: `b` must be a three-digit
/// group and the value is `ab.c`. Anything else is `MalformedNumber`.
///
/// Values whose middle segment is not exactly three digits, such as `1.23.4`
/// or `1.1.20`, are rejected on purpose rather than concatenated: they are not
/// thousands-grouped prices and the row is dropped.
pub fn normalize_price(raw: &str) -> Result<Option<Decimal>, NormalizationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let malformed = || NormalizationError::MalformedNumber(raw.to_string());
    let segments: Vec<&str> = text.split('.').collect();

    let canonical = match segments.as_slice() {
        [int, frac] if is_signed_digits(int) && is_digits(frac) => format!("{int}.{frac}"),
        [head, group, frac]
            if is_signed_digits(head) && group.len() == 3 && is_digits(group) && is_digits(frac) =>
        {
            format!("{head}{group}.{frac}")
        }
        _ => return Err(malformed()),
    };

    Decimal::from_str(&canonical).map(Some).map_err(|_| malformed())
}

/// Parse a date cell in the given layout.
pub fn normalize_date(raw: &str, format: DateFormat) -> Result<NaiveDate, NormalizationError> {
    NaiveDate::parse_from_str(raw.trim(), format.chrono_pattern())
        .map_err(|_| NormalizationError::BadDate(raw.to_string()))
}

/// Position of `kind` in the source's interval control.
pub fn interval_to_selector_index(kind: IntervalKind) -> usize {
    kind.selector_index()
}

/// What an extraction attaches to every row it normalizes.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub instrument: &'a InstrumentRef,
    pub currency_code: &'a str,
    pub interval: IntervalKind,
    pub date_format: DateFormat,
}

/// Normalize one scraped row. The first failing cell decides the error.
pub fn normalize_observation(
    raw: &RawObservation,
    ctx: &RowContext<'_>,
) -> Result<CanonicalObservation, NormalizationError> {
    Ok(CanonicalObservation {
        instrument: ctx.instrument.clone(),
        currency_code: ctx.currency_code.to_string(),
        interval: ctx.interval,
        date: normalize_date(&raw.date_text, ctx.date_format)?,
        last_price: normalize_price(&raw.last_text)?,
        open_price: normalize_price(&raw.open_text)?,
        max_price: normalize_price(&raw.max_text)?,
        min_price: normalize_price(&raw.min_text)?,
        volume: raw.volume_text.trim().to_string(),
        change: raw.change_text.trim().to_string(),
    })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_signed_digits(s: &str) -> bool {
    is_digits(s.strip_prefix(['-', '+']).unwrap_or(s))
}
