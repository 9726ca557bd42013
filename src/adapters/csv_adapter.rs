//! CSV import into the local SQLite market data tables.
//!
//! A data directory holds one `{SYMBOL}.csv` bar file per symbol
//! (`date,open,high,low,close,volume`) plus two optional reserved files:
//! `fundamentals.csv` and `listings.csv`.

use crate::adapters::sqlite_adapter::SqliteAdapter;
use crate::domain::error::VantageError;
use crate::domain::fundamentals::FundamentalSnapshot;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const FUNDAMENTALS_FILE: &str = "fundamentals.csv";
const LISTINGS_FILE: &str = "listings.csv";

#[derive(Debug, Deserialize)]
struct BarRecord {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListingRecord {
    pub symbol: String,
    pub listed_on: NaiveDate,
    pub delisted_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportSummary {
    pub symbols: usize,
    pub bars: usize,
    pub fundamentals: usize,
    pub listings: usize,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

fn parse_error(path: &Path, err: csv::Error) -> VantageError {
    VantageError::invalid(format!("{}: {err}", path.display()))
}

fn read_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, VantageError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| parse_error(path, e))?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result.map_err(|e| parse_error(path, e))?);
    }
    Ok(records)
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Bar files in the directory as `(symbol, path)`, sorted by symbol.
    pub fn bar_files(&self) -> Result<Vec<(String, PathBuf)>, VantageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == FUNDAMENTALS_FILE || name == LISTINGS_FILE {
                continue;
            }
            if let Some(symbol) = name.strip_suffix(".csv") {
                files.push((symbol.to_uppercase(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn read_bars(&self, symbol: &str, path: &Path) -> Result<Vec<OhlcvBar>, VantageError> {
        let mut bars: Vec<OhlcvBar> = read_records::<BarRecord>(path)?
            .into_iter()
            .map(|r| OhlcvBar {
                symbol: symbol.to_string(),
                date: r.date,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            })
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    pub fn read_fundamentals(&self) -> Result<Vec<FundamentalSnapshot>, VantageError> {
        let path = self.base_path.join(FUNDAMENTALS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_records(&path)
    }

    pub fn read_listings(&self) -> Result<Vec<ListingRecord>, VantageError> {
        let path = self.base_path.join(LISTINGS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_records(&path)
    }

    pub fn import_into(&self, store: &SqliteAdapter) -> Result<ImportSummary, VantageError> {
        let mut summary = ImportSummary::default();
        for (symbol, path) in self.bar_files()? {
            let bars = self.read_bars(&symbol, &path)?;
            summary.bars += store.insert_bars(&bars)?;
            summary.symbols += 1;
        }
        summary.fundamentals = store.insert_fundamentals(&self.read_fundamentals()?)?;
        for listing in self.read_listings()? {
            store.upsert_listing(&listing.symbol, listing.listed_on, listing.delisted_on)?;
            summary.listings += 1;
        }
        info!(
            path = %self.base_path.display(),
            symbols = summary.symbols,
            bars = summary.bars,
            fundamentals = summary.fundamentals,
            listings = summary.listings,
            "csv import complete"
        );
        Ok(summary)
    }
}
