//! Retrying decorator over any [`MarketDataPort`].
//!
//! Symbols that come back `FetchError::Transient` are re-requested with
//! exponential backoff (`base_delay * 2^(attempt - 1)`); every other
//! per-symbol outcome is final. A provider-level `Gateway` error is retried
//! the same way. Calls are blocking and expected to run on the blocking pool.

use crate::domain::config_validation::RetrySettings;
use crate::domain::error::VantageError;
use crate::domain::fundamentals::FundamentalSnapshot;
use crate::domain::ohlcv::{Interval, OhlcvBar};
use crate::ports::market_data_port::{MarketDataPort, SymbolResults};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct RetryingGateway {
    inner: Arc<dyn MarketDataPort>,
    settings: RetrySettings,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn MarketDataPort>, settings: RetrySettings) -> Self {
        Self { inner, settings }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.settings.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    fn call_with_retry<T>(
        &self,
        what: &str,
        mut call: impl FnMut() -> Result<T, VantageError>,
    ) -> Result<T, VantageError> {
        let mut attempt = 0;
        loop {
            match call() {
                Err(VantageError::Gateway { reason }) if attempt < self.settings.max_retries => {
                    attempt += 1;
                    warn!(what, attempt, %reason, "provider call failed, retrying");
                    std::thread::sleep(self.delay(attempt));
                }
                other => return other,
            }
        }
    }

    fn per_symbol<T>(
        &self,
        what: &str,
        symbols: &[String],
        fetch: impl Fn(&[String]) -> Result<SymbolResults<T>, VantageError>,
    ) -> Result<SymbolResults<T>, VantageError> {
        let mut results = self.call_with_retry(what, || fetch(symbols))?;
        for attempt in 1..=self.settings.max_retries {
            let transient: Vec<String> = results
                .iter()
                .filter(|(_, r)| matches!(r, Err(e) if e.is_transient()))
                .map(|(s, _)| s.clone())
                .collect();
            if transient.is_empty() {
                break;
            }
            warn!(what, attempt, symbols = transient.len(), "retrying transient symbol failures");
            std::thread::sleep(self.delay(attempt));
            let retried = self.call_with_retry(what, || fetch(&transient))?;
            for (symbol, outcome) in retried {
                if transient.contains(&symbol) {
                    results.insert(symbol, outcome);
                }
            }
        }
        Ok(results)
    }
}

impl MarketDataPort for RetryingGateway {
    fn fetch_historical(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<SymbolResults<Vec<OhlcvBar>>, VantageError> {
        self.per_symbol("fetch_historical", symbols, |batch| {
            self.inner.fetch_historical(batch, start, end, interval)
        })
    }

    fn fetch_fundamentals(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
    ) -> Result<SymbolResults<FundamentalSnapshot>, VantageError> {
        self.per_symbol("fetch_fundamentals", symbols, |batch| {
            self.inner.fetch_fundamentals(batch, as_of)
        })
    }

    fn list_population(&self, as_of: NaiveDate) -> Result<Vec<String>, VantageError> {
        self.call_with_retry("list_population", || self.inner.list_population(as_of))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::FetchError;
    use parking_lot::Mutex;

    /// Fails symbol "FLAKY" transiently `failures` times, "GONE" permanently.
    struct Flaky {
        failures: Mutex<u32>,
        calls: Mutex<Vec<Vec<String>>>,
        outage: Mutex<u32>,
    }

    impl Flaky {
        fn new(failures: u32, outage: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
                outage: Mutex::new(outage),
            }
        }
    }

    impl MarketDataPort for Flaky {
        fn fetch_historical(
            &self,
            symbols: &[String],
            _start: NaiveDate,
            _end: NaiveDate,
            _interval: Interval,
        ) -> Result<SymbolResults<Vec<OhlcvBar>>, VantageError> {
            self.calls.lock().push(symbols.to_vec());
            let mut results = SymbolResults::new();
            for s in symbols {
                let outcome = match s.as_str() {
                    "GONE" => Err(FetchError::NotFound),
                    "FLAKY" => {
                        let mut left = self.failures.lock();
                        if *left > 0 {
                            *left -= 1;
                            Err(FetchError::Transient("timeout".into()))
                        } else {
                            Ok(vec![])
                        }
                    }
                    _ => Ok(vec![]),
                };
                results.insert(s.clone(), outcome);
            }
            Ok(results)
        }

        fn fetch_fundamentals(
            &self,
            _symbols: &[String],
            _as_of: NaiveDate,
        ) -> Result<SymbolResults<FundamentalSnapshot>, VantageError> {
            Ok(SymbolResults::new())
        }

        fn list_population(&self, _as_of: NaiveDate) -> Result<Vec<String>, VantageError> {
            let mut left = self.outage.lock();
            if *left > 0 {
                *left -= 1;
                return Err(VantageError::Gateway {
                    reason: "connection refused".into(),
                });
            }
            Ok(vec!["A".into()])
        }
    }

    fn settings(max_retries: u32) -> RetrySettings {
        RetrySettings {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn transient_symbols_are_retried_alone() {
        let inner = Arc::new(Flaky::new(2, 0));
        let gateway = RetryingGateway::new(inner.clone(), settings(3));
        let results = gateway
            .fetch_historical(&symbols(&["A", "FLAKY", "GONE"]), day(), day(), Interval::Daily)
            .unwrap();
        assert!(results["FLAKY"].is_ok());
        assert_eq!(results["GONE"], Err(FetchError::NotFound));
        let calls = inner.calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], symbols(&["FLAKY"]));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let inner = Arc::new(Flaky::new(10, 0));
        let gateway = RetryingGateway::new(inner.clone(), settings(2));
        let results = gateway
            .fetch_historical(&symbols(&["FLAKY"]), day(), day(), Interval::Daily)
            .unwrap();
        assert!(matches!(results["FLAKY"], Err(FetchError::Transient(_))));
        assert_eq!(inner.calls.lock().len(), 3);
    }

    #[test]
    fn provider_outage_is_retried() {
        let gateway = RetryingGateway::new(Arc::new(Flaky::new(0, 1)), settings(1));
        assert_eq!(gateway.list_population(day()).unwrap(), vec!["A"]);

        let gateway = RetryingGateway::new(Arc::new(Flaky::new(0, 5)), settings(1));
        assert!(matches!(
            gateway.list_population(day()),
            Err(VantageError::Gateway { .. })
        ));
    }

    #[test]
    fn backoff_doubles() {
        let gateway = RetryingGateway::new(Arc::new(Flaky::new(0, 0)), settings(3));
        assert_eq!(gateway.delay(1), Duration::from_millis(1));
        assert_eq!(gateway.delay(3), Duration::from_millis(4));
    }
}
