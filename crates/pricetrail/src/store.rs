//! SQLite persistence for collected observations.
//!
//! Three relations: `instrument` and `currency` name tables, and the
//! append-only `stock` fact table referencing both. Dates are stored as ISO
//! `YYYY-MM-DD` text so range filters compare correctly.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::info;

use crate::error::PersistError;
use crate::types::{CatalogRecord, CurrencyRecord, Dataset, InstrumentRecord, IntervalKind};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS instrument (
        instrument_id INTEGER PRIMARY KEY,
        instrument_name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS currency (
        currency_id INTEGER PRIMARY KEY,
        currency_name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS stock (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        instrument_id INTEGER NOT NULL,
        currency_id INTEGER NOT NULL,
        date TEXT NOT NULL,
        interval TEXT NOT NULL,
        last_price REAL,
        open_price REAL,
        max_price REAL,
        min_price REAL,
        volume TEXT,
        change TEXT,
        FOREIGN KEY (instrument_id) REFERENCES instrument (instrument_id),
        FOREIGN KEY (currency_id) REFERENCES currency (currency_id)
    );
    CREATE INDEX IF NOT EXISTS idx_stock_series ON stock (instrument_id, interval, date);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One of the two name tables.
#[derive(Debug, Clone, Copy)]
enum NameTable {
    Instrument,
    Currency,
}

impl NameTable {
    fn select_all(self) -> &'static str {
        match self {
            Self::Instrument => {
                "SELECT instrument_id, instrument_name FROM instrument ORDER BY instrument_id"
            }
            Self::Currency => "SELECT currency_id, currency_name FROM currency ORDER BY currency_id",
        }
    }

    fn insert(self) -> &'static str {
        match self {
            Self::Instrument => {
                "INSERT INTO instrument (instrument_id, instrument_name) VALUES (?1, ?2)"
            }
            Self::Currency => "INSERT INTO currency (currency_id, currency_name) VALUES (?1, ?2)",
        }
    }
}

/// What one `persist` call wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Every instrument the dataset referenced, with its id.
    pub instruments: Vec<InstrumentRecord>,
    /// Every currency the dataset referenced, with its id.
    pub currencies: Vec<CurrencyRecord>,
    pub new_instruments: usize,
    pub new_currencies: usize,
    pub rows_written: usize,
    /// Price rows removed by [`CatalogStore::replace`].
    pub rows_deleted: usize,
}

/// Filter for reading a stored price series back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    pub instrument: String,
    pub interval: IntervalKind,
    /// Inclusive lower bound.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound.
    pub to: Option<NaiveDate>,
}

/// A stored observation joined back to its names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    pub instrument_name: String,
    pub currency_name: String,
    pub date: NaiveDate,
    pub interval: IntervalKind,
    pub last_price: Option<f64>,
    pub open_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_price: Option<f64>,
    pub volume: String,
    pub change: String,
}

/// Observation store backed by SQLite.
pub struct CatalogStore {
    db: Connection,
    path: Option<PathBuf>,
}

impl CatalogStore {
    /// Open or create the database file and its schema.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        let db = Connection::open(path).map_err(|source| PersistError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(db, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, PersistError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(db: Connection, path: Option<PathBuf>) -> Result<Self, PersistError> {
        db.execute_batch("PRAGMA foreign_keys = ON;")?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db, path })
    }

    /// File backing the store, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append every row of `dataset` in a single transaction.
    ///
    /// Names already stored keep their id. New names get the next ids in
    /// first-seen order. Price rows are never deduplicated.
    pub fn persist(&mut self, dataset: &Dataset) -> Result<PersistReport, PersistError> {
        self.write(dataset, false)
    }

    /// Delete every stored price row and write `dataset` in its place.
    ///
    /// Both happen in one transaction, so a failed write keeps the old rows.
    /// Name tables are kept so ids stay stable.
    pub fn replace(&mut self, dataset: &Dataset) -> Result<PersistReport, PersistError> {
        self.write(dataset, true)
    }

    fn write(&mut self, dataset: &Dataset, replace: bool) -> Result<PersistReport, PersistError> {
        let tx = self.db.transaction()?;

        let rows_deleted = if replace {
            tx.execute("DELETE FROM stock", [])?
        } else {
            0
        };

        let (instrument_ids, instruments, new_instruments) = assign_ids(
            &tx,
            NameTable::Instrument,
            dataset.iter().map(|row| row.instrument.symbol.as_str()),
        )?;
        let (currency_ids, currencies, new_currencies) = assign_ids(
            &tx,
            NameTable::Currency,
            dataset.iter().map(|row| row.currency_code.as_str()),
        )?;

        let mut rows_written = 0;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO stock (instrument_id, currency_id, date, interval,
                                    last_price, open_price, max_price, min_price, volume, change)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for row in dataset {
                let instrument_id = lookup(&instrument_ids, &row.instrument.symbol)?;
                let currency_id = lookup(&currency_ids, &row.currency_code)?;
                rows_written += insert.execute(params![
                    instrument_id,
                    currency_id,
                    row.date.format(DATE_FORMAT).to_string(),
                    row.interval.label(),
                    row.last_price.and_then(|d| d.to_f64()),
                    row.open_price.and_then(|d| d.to_f64()),
                    row.max_price.and_then(|d| d.to_f64()),
                    row.min_price.and_then(|d| d.to_f64()),
                    row.volume,
                    row.change,
                ])?;
            }
        }

        tx.commit()?;

        info!(
            rows = rows_written,
            deleted = rows_deleted,
            new_instruments, new_currencies, "Persisted dataset"
        );

        Ok(PersistReport {
            instruments,
            currencies,
            new_instruments,
            new_currencies,
            rows_written,
            rows_deleted,
        })
    }

    pub fn price_row_count(&self) -> Result<usize, PersistError> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM stock", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| PersistError::InvalidValue(format!("row count {count}")))
    }

    pub fn instruments(&self) -> Result<Vec<InstrumentRecord>, PersistError> {
        load_names(&self.db, NameTable::Instrument)
    }

    pub fn currencies(&self) -> Result<Vec<CurrencyRecord>, PersistError> {
        load_names(&self.db, NameTable::Currency)
    }

    pub fn instrument_id(&self, name: &str) -> Result<Option<i64>, PersistError> {
        Ok(self
            .db
            .query_row(
                "SELECT instrument_id FROM instrument WHERE instrument_name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Stored rows for one instrument and interval, ordered by date.
    pub fn series(&self, query: &SeriesQuery) -> Result<Vec<SeriesRow>, PersistError> {
        let mut stmt = self.db.prepare_cached(
            "SELECT i.instrument_name, c.currency_name, s.date, s.interval,
                    s.last_price, s.open_price, s.max_price, s.min_price, s.volume, s.change
             FROM stock s
             JOIN instrument i ON i.instrument_id = s.instrument_id
             JOIN currency c ON c.currency_id = s.currency_id
             WHERE i.instrument_name = ?1
               AND s.interval = ?2
               AND (?3 IS NULL OR s.date >= ?3)
               AND (?4 IS NULL OR s.date <= ?4)
             ORDER BY s.date, s.id",
        )?;

        let from = query.from.map(|d| d.format(DATE_FORMAT).to_string());
        let to = query.to.map(|d| d.format(DATE_FORMAT).to_string());

        let raw = stmt
            .query_map(
                params![query.instrument, query.interval.label(), from, to],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<f64>>(6)?,
                        row.get::<_, Option<f64>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(instrument_name, currency_name, date, interval, last, open, max, min, volume, change)| {
                    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                        .map_err(|_| PersistError::InvalidValue(format!("date {date:?}")))?;
                    let interval = interval
                        .parse::<IntervalKind>()
                        .map_err(PersistError::InvalidValue)?;
                    Ok(SeriesRow {
                        instrument_name,
                        currency_name,
                        date,
                        interval,
                        last_price: last,
                        open_price: open,
                        max_price: max,
                        min_price: min,
                        volume: volume.unwrap_or_default(),
                        change: change.unwrap_or_default(),
                    })
                },
            )
            .collect()
    }
}

/// Resolve ids for `names`, inserting the ones not yet stored.
///
/// Returns the name→id map, the referenced records in first-seen order, and
/// how many were inserted.
fn assign_ids<'a>(
    tx: &Transaction<'_>,
    table: NameTable,
    names: impl Iterator<Item = &'a str>,
) -> Result<(HashMap<String, i64>, Vec<CatalogRecord>, usize), PersistError> {
    let mut ids: HashMap<String, i64> = load_names(tx, table)?
        .into_iter()
        .map(|r| (r.name, r.id))
        .collect();
    let mut next_id = ids.values().copied().max().unwrap_or(0) + 1;

    let mut referenced = Vec::new();
    let mut seen = HashSet::new();
    let mut inserted = 0;
    let mut insert = tx.prepare_cached(table.insert())?;

    for name in names {
        if !seen.insert(name) {
            continue;
        }
        let id = match ids.get(name) {
            Some(&id) => id,
            None => {
                let id = next_id;
                insert.execute(params![id, name])?;
                ids.insert(name.to_string(), id);
                inserted += 1;
                next_id += 1;
                id
            }
        };
        referenced.push(CatalogRecord {
            id,
            name: name.to_string(),
        });
    }

    Ok((ids, referenced, inserted))
}

fn load_names(db: &Connection, table: NameTable) -> Result<Vec<CatalogRecord>, PersistError> {
    let mut stmt = db.prepare_cached(table.select_all())?;
    let records = stmt
        .query_map([], |row| {
            Ok(CatalogRecord {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

fn lookup(ids: &HashMap<String, i64>, name: &str) -> Result<i64, PersistError> {
    ids.get(name)
        .copied()
        .ok_or_else(|| PersistError::InvalidValue(format!("no id assigned to {name:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalObservation, InstrumentCategory, InstrumentRef};
    use rust_decimal_macros::dec;

    fn observation(symbol: &str, currency: &str, date: &str) -> CanonicalObservation {
        CanonicalObservation {
            instrument: InstrumentRef::new(symbol, InstrumentCategory::Currency),
            currency_code: currency.to_string(),
            interval: IntervalKind::Daily,
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            last_price: Some(dec!(1.1234)),
            open_price: Some(dec!(1.1200)),
            max_price: Some(dec!(2034.5)),
            min_price: None,
            volume: String::new(),
            change: "-0.46%".to_string(),
        }
    }

    fn sample() -> Dataset {
        vec![
            observation("eur-usd", "USD", "2021-03-05"),
            observation("eur-usd", "USD", "2021-03-04"),
            observation("eur-pln", "PLN", "2021-03-05"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_first_seen_ids() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let report = store.persist(&sample()).unwrap();

        assert_eq!(report.rows_written, 3);
        assert_eq!(
            report.instruments,
            vec![
                CatalogRecord { id: 1, name: "eur-usd".into() },
                CatalogRecord { id: 2, name: "eur-pln".into() },
            ]
        );
        assert_eq!(report.currencies[0], CatalogRecord { id: 1, name: "USD".into() });
        assert_eq!(report.currencies[1], CatalogRecord { id: 2, name: "PLN".into() });
    }

    #[test]
    fn test_persist_twice_keeps_ids_and_doubles_rows() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let first = store.persist(&sample()).unwrap();
        let second = store.persist(&sample()).unwrap();

        assert_eq!(first.instruments, second.instruments);
        assert_eq!(first.currencies, second.currencies);
        assert_eq!(second.new_instruments, 0);
        assert_eq!(store.price_row_count().unwrap(), 6);
        assert_eq!(store.instruments().unwrap().len(), 2);
    }

    #[test]
    fn test_new_names_continue_after_stored_ids() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store
            .persist(&vec![observation("gold", "USD", "2021-01-04")].into_iter().collect())
            .unwrap();

        let report = store
            .persist(
                &vec![
                    observation("silver", "USD", "2021-01-04"),
                    observation("gold", "USD", "2021-01-05"),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap();

        assert_eq!(store.instrument_id("gold").unwrap(), Some(1));
        assert_eq!(store.instrument_id("silver").unwrap(), Some(2));
        assert_eq!(report.new_instruments, 1);
        assert_eq!(store.instrument_id("copper").unwrap(), None);
    }

    #[test]
    fn test_series_filters_and_orders_by_date() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store.persist(&sample()).unwrap();

        let rows = store
            .series(&SeriesQuery {
                instrument: "eur-usd".into(),
                interval: IntervalKind::Daily,
                from: None,
                to: None,
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        assert_eq!(rows[0].currency_name, "USD");
        assert!((rows[0].last_price.unwrap() - 1.1234).abs() < 1e-9);
        assert_eq!(rows[0].max_price, Some(2034.5));
        assert_eq!(rows[0].min_price, None);

        let bounded = store
            .series(&SeriesQuery {
                instrument: "eur-usd".into(),
                interval: IntervalKind::Daily,
                from: NaiveDate::from_ymd_opt(2021, 3, 5),
                to: None,
            })
            .unwrap();
        assert_eq!(bounded.len(), 1);

        let weekly = store
            .series(&SeriesQuery {
                instrument: "eur-usd".into(),
                interval: IntervalKind::Weekly,
                from: None,
                to: None,
            })
            .unwrap();
        assert!(weekly.is_empty());
    }

    #[test]
    fn test_replace_keeps_names_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock_prices.db");

        let mut store = CatalogStore::open(&path).unwrap();
        store.persist(&sample()).unwrap();
        let fresh: Dataset = vec![observation("eur-pln", "PLN", "2021-03-08")].into_iter().collect();
        let report = store.replace(&fresh).unwrap();
        assert_eq!(report.rows_deleted, 3);
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.instruments, vec![CatalogRecord { id: 2, name: "eur-pln".into() }]);
        drop(store);

        let store = CatalogStore::open(&path).unwrap();
        assert_eq!(store.price_row_count().unwrap(), 1);
        assert_eq!(store.currencies().unwrap().len(), 2);
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn test_failed_replace_keeps_existing_rows() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store.persist(&sample()).unwrap();

        // The trigger fails the write after the delete has run
        store
            .db
            .execute_batch(
                "CREATE TRIGGER reject_copper BEFORE INSERT ON instrument
                 WHEN NEW.instrument_name = 'copper'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let bad: Dataset = vec![observation("copper", "USD", "2021-03-08")].into_iter().collect();

        assert!(store.replace(&bad).is_err());
        assert_eq!(store.price_row_count().unwrap(), 3);
        assert_eq!(store.instrument_id("copper").unwrap(), None);
    }

    #[test]
    fn test_empty_dataset_is_noop() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let report = store.persist(&Dataset::new()).unwrap();
        assert_eq!(report, PersistReport::default());
    }
}
