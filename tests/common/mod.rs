#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc, Weekday, Datelike};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use vantage::adapters::sqlite_adapter::SqliteAdapter;
use vantage::cli::Services;
use vantage::domain::cancel::CancelFlag;
use vantage::domain::config_validation::AppConfig;
use vantage::domain::criteria::ScreeningCriteria;
use vantage::domain::error::{FetchError, VantageError};
use vantage::domain::fundamentals::FundamentalSnapshot;
pub use vantage::domain::ohlcv::{Interval, OhlcvBar};
use vantage::domain::universe::Universe;
use vantage::ports::market_data_port::{MarketDataPort, SymbolResults};
use vantage::ports::snapshot_port::UniverseRepository;

struct Listing {
    listed_on: NaiveDate,
    delisted_on: Option<NaiveDate>,
    market_cap: f64,
    /// Daily compounded price drift.
    drift: f64,
}

/// In-memory provider. Prices are a deterministic function of the date, so
/// repeated fetches return identical bars.
pub struct MockGateway {
    listings: BTreeMap<String, Listing>,
    failing: BTreeSet<String>,
    no_fundamentals: BTreeSet<String>,
    cancel_on_fetch: Option<CancelFlag>,
    pub history_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            listings: BTreeMap::new(),
            failing: BTreeSet::new(),
            no_fundamentals: BTreeSet::new(),
            cancel_on_fetch: None,
            history_calls: AtomicUsize::new(0),
        }
    }

    /// Listed since 2000 and never delisted.
    pub fn with_symbol(self, symbol: &str, market_cap: f64, drift: f64) -> Self {
        self.with_listing(symbol, market_cap, drift, d("2000-01-01"), None)
    }

    pub fn with_listing(
        mut self,
        symbol: &str,
        market_cap: f64,
        drift: f64,
        listed_on: NaiveDate,
        delisted_on: Option<NaiveDate>,
    ) -> Self {
        self.listings.insert(
            symbol.to_string(),
            Listing {
                listed_on,
                delisted_on,
                market_cap,
                drift,
            },
        );
        self
    }

    /// Bars requests for `symbol` fail.
    pub fn with_failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    pub fn without_fundamentals(mut self, symbol: &str) -> Self {
        self.no_fundamentals.insert(symbol.to_string());
        self
    }

    /// Every bars request cancels `flag` before answering.
    pub fn cancelling(mut self, flag: CancelFlag) -> Self {
        self.cancel_on_fetch = Some(flag);
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

pub fn price(drift: f64, date: NaiveDate) -> f64 {
    let days = (date - d("2020-01-01")).num_days() as i32;
    100.0 * (1.0 + drift).powi(days)
}

pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

impl MarketDataPort for MockGateway {
    fn fetch_historical(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> Result<SymbolResults<Vec<OhlcvBar>>, VantageError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.cancel_on_fetch {
            flag.cancel();
        }
        let mut results = SymbolResults::new();
        for symbol in symbols {
            let outcome = match self.listings.get(symbol) {
                _ if self.failing.contains(symbol) => {
                    Err(FetchError::Other("provider rejected symbol".into()))
                }
                None => Err(FetchError::NotFound),
                Some(listing) => Ok(weekdays(start, end)
                    .into_iter()
                    .map(|date| {
                        let close = price(listing.drift, date);
                        OhlcvBar {
                            symbol: symbol.clone(),
                            date,
                            open: close,
                            high: close * 1.01,
                            low: close * 0.99,
                            close,
                            volume: 100_000,
                        }
                    })
                    .collect()),
            };
            results.insert(symbol.clone(), outcome);
        }
        Ok(results)
    }

    fn fetch_fundamentals(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
    ) -> Result<SymbolResults<FundamentalSnapshot>, VantageError> {
        let mut results = SymbolResults::new();
        for symbol in symbols {
            let outcome = match self.listings.get(symbol) {
                Some(listing) if !self.no_fundamentals.contains(symbol) => {
                    let mut f = FundamentalSnapshot::new(symbol.clone(), as_of, "Materials");
                    f.market_cap = Some(listing.market_cap);
                    f.quality_score = Some(0.5);
                    Ok(f)
                }
                _ => Err(FetchError::NotFound),
            };
            results.insert(symbol.clone(), outcome);
        }
        Ok(results)
    }

    fn list_population(&self, as_of: NaiveDate) -> Result<Vec<String>, VantageError> {
        Ok(self
            .listings
            .iter()
            .filter(|(_, l)| l.listed_on <= as_of && l.delisted_on.is_none_or(|end| as_of < end))
            .map(|(symbol, _)| symbol.clone())
            .collect())
    }
}

pub fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Services over an in-memory store with `gateway` as the provider.
pub fn services(gateway: Arc<MockGateway>) -> Services {
    services_with(gateway, &AppConfig::default())
}

pub fn services_with(gateway: Arc<MockGateway>, config: &AppConfig) -> Services {
    let store = Arc::new(SqliteAdapter::in_memory().unwrap());
    store.initialize_schema().unwrap();
    Services::wire(store, gateway, config)
}

pub fn create_universe(services: &Services, id: &str) {
    let universe = Universe::new(id, "tester", ScreeningCriteria::default(), now()).unwrap();
    services.store.insert_universe(&universe).unwrap();
}

/// A,B,C listed throughout; B leaves and D joins on 2023-02-01.
pub fn rotating_gateway() -> MockGateway {
    MockGateway::new()
        .with_symbol("A", 3.0e9, 0.001)
        .with_listing("B", 2.0e9, -0.001, d("2000-01-01"), Some(d("2023-02-01")))
        .with_symbol("C", 1.0e9, 0.0)
        .with_listing("D", 4.0e9, 0.002, d("2023-02-01"), None)
}

pub fn member_symbols(members: &[vantage::domain::snapshot::SnapshotMember]) -> Vec<String> {
    members.iter().map(|m| m.symbol.clone()).collect()
}
