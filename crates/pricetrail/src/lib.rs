//! Pricetrail: historical price extraction from layout-shifting web pages,
//! value normalization, and SQLite persistence.

pub mod browsing;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod journal;
pub mod layout;
pub mod normalize;
pub mod session;
pub mod store;
pub mod types;

pub use browsing::chromium::ChromiumBrowsing;
pub use browsing::{Browsing, Element, Locator};
pub use config::{ScrapeConfig, Timings};
pub use coordinator::{RunReport, RunSummary, ScrapeCoordinator};
pub use error::*;
pub use journal::RunJournal;
pub use layout::{default_layouts, LayoutStrategy};
pub use normalize::{normalize_date, normalize_observation, normalize_price, DateFormat};
pub use session::{Extraction, ExtractionSession, RowDiagnostic};
pub use store::{CatalogStore, PersistReport, SeriesQuery, SeriesRow};
pub use types::*;
