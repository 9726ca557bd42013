//! Market data provider port.
//!
//! Calls are batch-shaped with per-symbol outcomes: a symbol the provider
//! cannot serve never fails the whole request. The outer `Result` is reserved
//! for the provider itself being unreachable or misconfigured.

use crate::domain::error::{FetchError, VantageError};
use crate::domain::fundamentals::FundamentalSnapshot;
use crate::domain::ohlcv::{Interval, OhlcvBar};
use chrono::NaiveDate;
use std::collections::BTreeMap;

pub type SymbolResults<T> = BTreeMap<String, Result<T, FetchError>>;

pub trait MarketDataPort: Send + Sync {
    /// Bars for each symbol over `[start, end]`, sorted by date.
    fn fetch_historical(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<SymbolResults<Vec<OhlcvBar>>, VantageError>;

    /// Latest fundamentals known on `as_of` for each symbol.
    fn fetch_fundamentals(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
    ) -> Result<SymbolResults<FundamentalSnapshot>, VantageError>;

    /// Symbols listed (and not yet delisted) on `as_of`.
    fn list_population(&self, as_of: NaiveDate) -> Result<Vec<String>, VantageError>;
}
