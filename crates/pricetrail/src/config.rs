//! Configuration loading and resolution.
//!
//! A run is configured once at startup from a JSON file (or the built-in
//! defaults) and is immutable afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::normalize::DateFormat;
use crate::types::{InstrumentCategory, InstrumentRef, IntervalKind};

/// Default source site.
pub const DEFAULT_BASE_URL: &str = "https://pl.investing.com/";

/// Default SQLite file name.
pub const DEFAULT_DB_FILE: &str = "stock_prices.db";

/// Config file looked up in the working directory.
const CWD_CONFIG_FILE: &str = "pricetrail.json";

/// Symbols of one category, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub category: InstrumentCategory,
    pub symbols: Vec<String>,
}

/// Retry budgets and delays. Fixed for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Attempts per layout variant before falling back to the next one.
    pub attempts_per_variant: u32,
    /// Delay between attempts of the same variant.
    pub poll_interval_ms: u64,
    /// How long to wait for any layout's controls after navigation.
    pub page_ready_timeout_ms: u64,
    /// Wait after the date range is committed, for the table to re-render.
    pub settle_delay_ms: u64,
    /// Minimum gap between consecutive extractions.
    pub pacing_delay_ms: u64,
    /// Wait after each commit of the two-field date popup.
    pub picker_settle_ms: u64,
    /// Wait between typing into the positional date inputs.
    pub input_settle_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            attempts_per_variant: 3,
            poll_interval_ms: 1_000,
            page_ready_timeout_ms: 10_000,
            settle_delay_ms: 5_000,
            pacing_delay_ms: 5_000,
            picker_settle_ms: 5_000,
            input_settle_ms: 1_000,
        }
    }
}

impl Timings {
    /// All delays zero, one attempt per variant. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            attempts_per_variant: 1,
            poll_interval_ms: 0,
            page_ready_timeout_ms: 0,
            settle_delay_ms: 0,
            pacing_delay_ms: 0,
            picker_settle_ms: 0,
            input_settle_ms: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn page_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.page_ready_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn picker_settle(&self) -> Duration {
        Duration::from_millis(self.picker_settle_ms)
    }

    pub fn input_settle(&self) -> Duration {
        Duration::from_millis(self.input_settle_ms)
    }
}

/// How to launch the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Explicit Chromium binary. Falls back to `PRICETRAIL_CHROMIUM_PATH`, then `PATH`.
    pub chromium_path: Option<PathBuf>,
    /// Extra command-line flags.
    pub args: Vec<String>,
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
            args: Vec::new(),
            navigation_timeout_ms: 30_000,
        }
    }
}

/// Everything a scrape run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub base_url: String,
    pub catalog: Vec<CatalogEntry>,
    pub intervals: Vec<IntervalKind>,
    pub start_year: i32,
    pub end_year: i32,
    /// Layout of the date column in scraped tables.
    pub date_format: DateFormat,
    pub timings: Timings,
    pub browser: BrowserSettings,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        let entry = |category, symbols: &[&str]| CatalogEntry {
            category,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            catalog: vec![
                entry(
                    InstrumentCategory::Currency,
                    &["eur-usd", "gbp-usd", "eur-pln", "usd-cad"],
                ),
                entry(
                    InstrumentCategory::Equity,
                    &["cdproject", "11bit", "nintendo-ltd", "activision-inc"],
                ),
                entry(
                    InstrumentCategory::Commodity,
                    &["gold", "silver", "platinum", "copper"],
                ),
            ],
            intervals: IntervalKind::all().to_vec(),
            start_year: 2010,
            end_year: 2024,
            date_format: DateFormat::default(),
            timings: Timings::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl ScrapeConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the resolved path, or fall back to the defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match resolve_config_path(explicit) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_year >= self.end_year {
            return Err(ConfigError::Invalid(format!(
                "start_year ({}) must be before end_year ({})",
                self.start_year, self.end_year
            )));
        }
        if self.instruments().is_empty() {
            return Err(ConfigError::Invalid("catalog has no symbols".into()));
        }
        if self.intervals.is_empty() {
            return Err(ConfigError::Invalid("no intervals configured".into()));
        }
        if self.timings.attempts_per_variant == 0 {
            return Err(ConfigError::Invalid(
                "timings.attempts_per_variant must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Instruments in catalog order.
    pub fn instruments(&self) -> Vec<InstrumentRef> {
        self.catalog
            .iter()
            .flat_map(|entry| {
                entry
                    .symbols
                    .iter()
                    .map(move |symbol| InstrumentRef::new(symbol.as_str(), entry.category))
            })
            .collect()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Resolve the config file path.
///
/// Order: explicit path, `PRICETRAIL_CONFIG`, `./pricetrail.json`,
/// `~/.pricetrail/config.json`. `None` means use the defaults.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("PRICETRAIL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(CWD_CONFIG_FILE);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    dirs::home_dir()
        .map(|home| home.join(".pricetrail").join("config.json"))
        .filter(|p| p.exists())
}

/// Resolve the SQLite database path: explicit, `PRICETRAIL_DB`, then
/// `stock_prices.db` in the working directory.
pub fn resolve_db_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(env_path) = std::env::var("PRICETRAIL_DB") {
        return PathBuf::from(env_path);
    }

    PathBuf::from(DEFAULT_DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_order() {
        let config = ScrapeConfig::default();
        let instruments = config.instruments();
        assert_eq!(instruments.len(), 12);
        assert_eq!(instruments[0].symbol, "eur-usd");
        assert_eq!(instruments[4].source_path, "equities/cdproject-historical-data");
        assert_eq!(instruments[11].symbol, "copper");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricetrail.json");
        std::fs::write(
            &path,
            r#"{
                "catalog": [{ "category": "currency", "symbols": ["eur-usd"] }],
                "intervals": ["Daily"],
                "start_year": 2020,
                "end_year": 2021,
                "date_format": "iso",
                "timings": { "pacing_delay_ms": 0 }
            }"#,
        )
        .unwrap();

        let config = ScrapeConfig::load(&path).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.instruments().len(), 1);
        assert_eq!(config.timings.pacing_delay_ms, 0);
        assert_eq!(config.timings.attempts_per_variant, 3);
        assert_eq!(config.date_format, DateFormat::Iso);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_invalid_year_window() {
        let config = ScrapeConfig {
            start_year: 2024,
            end_year: 2024,
            ..ScrapeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unparseable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ScrapeConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_explicit_paths_win() {
        let explicit = Path::new("/tmp/custom.json");
        assert_eq!(resolve_config_path(Some(explicit)), Some(explicit.to_path_buf()));
        assert_eq!(
            resolve_db_path(Some(Path::new("prices.db"))),
            PathBuf::from("prices.db")
        );
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = ScrapeConfig::default();
        let json = config.to_json_pretty().unwrap();
        let back: ScrapeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
