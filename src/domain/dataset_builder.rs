//! Complete Dataset construction and caching.
//!
//! The builder reads a universe's snapshot timeline, takes the superset of
//! every member that appears in it, and fetches bars for the whole range in
//! bounded-concurrency batches. Indicators are computed once the fetch permit
//! has been released. Finished datasets are published to the cache in a
//! single write.

use crate::domain::cancel::CancelFlag;
use crate::domain::dataset::{
    CompleteDataset, DatasetKey, IndicatorGap, SymbolSeries, content_hash,
};
use crate::domain::error::{FetchError, VantageError};
use crate::domain::indicator::{IndicatorType, compute_indicator};
use crate::domain::ohlcv::{Interval, OhlcvBar};
use crate::domain::screening::load_timeline;
use crate::domain::snapshot::SnapshotRevision;
use crate::ports::market_data_port::{MarketDataPort, SymbolResults};
use crate::ports::snapshot_port::SnapshotStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub max_concurrency: usize,
    pub batch_size: usize,
    pub ttl: Duration,
    pub interval: Interval,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            interval: Interval::Daily,
        }
    }
}

pub fn default_indicators() -> Vec<IndicatorType> {
    vec![
        IndicatorType::macd_default(),
        IndicatorType::rsi_default(),
        IndicatorType::momentum_default(),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRequest {
    pub universe_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default = "default_indicators")]
    pub indicators: Vec<IndicatorType>,
}

impl DatasetRequest {
    pub fn new(
        universe_id: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        indicators: Vec<IndicatorType>,
    ) -> Self {
        Self {
            universe_id: universe_id.into(),
            start,
            end,
            indicators,
        }
    }

    pub fn validate(&self) -> Result<(), VantageError> {
        if self.start > self.end {
            return Err(VantageError::invalid(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.indicators.is_empty() {
            return Err(VantageError::invalid("at least one indicator is required"));
        }
        for indicator in &self.indicators {
            indicator.validate()?;
        }
        Ok(())
    }

    pub fn key(&self, revision: Option<SnapshotRevision>) -> DatasetKey {
        DatasetKey::new(
            self.universe_id.clone(),
            self.start,
            self.end,
            self.indicators.iter().copied(),
            revision,
        )
    }
}

/// First date to fetch so that the longest indicator is past warmup at `start`.
pub fn history_start(start: NaiveDate, indicators: &[IndicatorType]) -> NaiveDate {
    let bars = indicators
        .iter()
        .map(|i| i.min_history())
        .max()
        .unwrap_or(0) as i64;
    // trading days to calendar days, plus a week of slack for holidays
    let days = (bars * 7 + 4) / 5 + 7;
    start - Duration::days(days)
}

/// In-memory dataset cache keyed by handle.
#[derive(Default)]
pub struct DatasetCache {
    entries: RwLock<HashMap<String, Arc<CompleteDataset>>>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: &str) -> Option<Arc<CompleteDataset>> {
        self.entries.read().get(handle).cloned()
    }

    /// Fresh entry for exactly `key`. Entries of the same scope built against
    /// another revision, or past their expiry, are evicted.
    pub fn resolve(&self, key: &DatasetKey, now: DateTime<Utc>) -> Option<Arc<CompleteDataset>> {
        let handle = key.handle();
        if let Some(dataset) = self.entries.read().get(&handle) {
            if !dataset.is_expired(now) {
                return Some(Arc::clone(dataset));
            }
        }

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, ds| !(ds.key.same_scope(key) && (ds.key != *key || ds.is_expired(now))));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(universe_id = %key.universe_id, evicted, "evicted superseded datasets");
        }
        None
    }

    /// Insert `dataset`, replacing every entry of the same scope.
    pub fn publish(&self, dataset: CompleteDataset) -> Arc<CompleteDataset> {
        let dataset = Arc::new(dataset);
        let mut entries = self.entries.write();
        entries.retain(|_, ds| !ds.key.same_scope(&dataset.key));
        entries.insert(dataset.handle.clone(), Arc::clone(&dataset));
        dataset
    }

    pub fn evict(&self, handle: &str) -> bool {
        self.entries.write().remove(handle).is_some()
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, ds| !ds.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn task_failed(err: tokio::task::JoinError) -> VantageError {
    VantageError::Gateway {
        reason: format!("background task failed: {err}"),
    }
}

/// Run blocking port calls off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, VantageError>
where
    F: FnOnce() -> Result<T, VantageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(task_failed)?
}

#[derive(Debug, Default)]
struct BatchOutcome {
    series: Vec<SymbolSeries>,
    missing: Vec<(String, String)>,
    gaps: Vec<IndicatorGap>,
}

fn compute_batch(
    fetched: SymbolResults<Vec<OhlcvBar>>,
    indicators: &[IndicatorType],
    computed_at: DateTime<Utc>,
) -> Result<BatchOutcome, VantageError> {
    let mut outcome = BatchOutcome::default();

    for (symbol, result) in fetched {
        let bars = match result {
            Ok(bars) if bars.is_empty() => {
                outcome.missing.push((symbol, "no bars in range".into()));
                continue;
            }
            Ok(bars) => bars,
            Err(e) => {
                outcome.missing.push((symbol, e.to_string()));
                continue;
            }
        };

        let mut computed = BTreeMap::new();
        for &indicator in indicators {
            match compute_indicator(&symbol, &bars, indicator, computed_at) {
                Ok(result) => {
                    computed.insert(indicator, result);
                }
                Err(VantageError::InsufficientHistory {
                    required,
                    available,
                    ..
                }) => outcome.gaps.push(IndicatorGap {
                    symbol: symbol.clone(),
                    indicator,
                    required,
                    available,
                }),
                Err(e) => return Err(e),
            }
        }

        outcome.series.push(SymbolSeries {
            symbol,
            bars,
            indicators: computed,
        });
    }

    Ok(outcome)
}

struct BatchJob {
    gateway: Arc<dyn MarketDataPort>,
    semaphore: Arc<Semaphore>,
    symbols: Vec<String>,
    fetch_start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
    indicators: Vec<IndicatorType>,
    computed_at: DateTime<Utc>,
    cancel: CancelFlag,
}

impl BatchJob {
    async fn run(self) -> Result<BatchOutcome, VantageError> {
        let permit = self
            .semaphore
            .acquire_owned()
            .await
            .map_err(|e| VantageError::Gateway {
                reason: e.to_string(),
            })?;
        self.cancel.check()?;

        let gateway = self.gateway;
        let requested = self.symbols.clone();
        let (symbols, start, end, interval) =
            (self.symbols, self.fetch_start, self.end, self.interval);
        let mut fetched =
            blocking(move || gateway.fetch_historical(&symbols, start, end, interval)).await?;
        drop(permit);

        for symbol in requested {
            fetched.entry(symbol).or_insert(Err(FetchError::NotFound));
        }

        self.cancel.check()?;
        let indicators = self.indicators;
        let computed_at = self.computed_at;
        blocking(move || compute_batch(fetched, &indicators, computed_at)).await
    }
}

fn abort_all(handles: &[JoinHandle<Result<BatchOutcome, VantageError>>]) {
    for handle in handles {
        handle.abort();
    }
}

pub struct DatasetBuilder {
    gateway: Arc<dyn MarketDataPort>,
    store: Arc<dyn SnapshotStore>,
    cache: Arc<DatasetCache>,
    settings: BuilderSettings,
}

impl DatasetBuilder {
    pub fn new(
        gateway: Arc<dyn MarketDataPort>,
        store: Arc<dyn SnapshotStore>,
        cache: Arc<DatasetCache>,
        settings: BuilderSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<DatasetCache> {
        &self.cache
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    /// Key for `request` against the universe's current snapshot revision.
    pub async fn current_key(&self, request: &DatasetRequest) -> Result<DatasetKey, VantageError> {
        let store = Arc::clone(&self.store);
        let (universe_id, end) = (request.universe_id.clone(), request.end);
        let revision = blocking(move || store.latest_revision(&universe_id, end)).await?;
        Ok(request.key(revision))
    }

    pub fn get(&self, handle: &str) -> Result<Arc<CompleteDataset>, VantageError> {
        self.cache
            .get(handle)
            .ok_or_else(|| VantageError::DatasetNotFound(handle.to_string()))
    }

    /// `DatasetStale` (after evicting it) when a snapshot has been appended
    /// since `dataset` was built.
    pub async fn ensure_fresh(&self, dataset: &CompleteDataset) -> Result<(), VantageError> {
        let store = Arc::clone(&self.store);
        let (universe_id, end) = (dataset.key.universe_id.clone(), dataset.key.end);
        let current = blocking(move || store.latest_revision(&universe_id, end)).await?;
        if current != dataset.key.snapshot_revision {
            self.cache.evict(&dataset.handle);
            return Err(VantageError::DatasetStale {
                handle: dataset.handle.clone(),
                universe_id: dataset.key.universe_id.clone(),
            });
        }
        Ok(())
    }

    /// Cached dataset for the current revision, or a fresh build. The flag is
    /// `true` on a cache hit.
    pub async fn resolve_or_build(
        &self,
        request: &DatasetRequest,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<(Arc<CompleteDataset>, bool), VantageError> {
        request.validate()?;
        let purged = self.cache.purge_expired(now);
        if purged > 0 {
            debug!(purged, "expired datasets evicted");
        }
        let key = self.current_key(request).await?;
        if let Some(dataset) = self.cache.resolve(&key, now) {
            debug!(handle = %dataset.handle, "dataset cache hit");
            return Ok((dataset, true));
        }
        let dataset = self.build(request, now, cancel).await?;
        Ok((dataset, false))
    }

    pub async fn build(
        &self,
        request: &DatasetRequest,
        built_at: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<Arc<CompleteDataset>, VantageError> {
        request.validate()?;
        cancel.check()?;

        let store = Arc::clone(&self.store);
        let (universe_id, start, end) = (request.universe_id.clone(), request.start, request.end);
        // revision first: a snapshot appended mid-build makes this key stale
        let (revision, timeline) = blocking(move || {
            let revision = store.latest_revision(&universe_id, end)?;
            let timeline = load_timeline(store.as_ref(), &universe_id, start, end)?;
            Ok((revision, timeline))
        })
        .await?;

        if timeline.is_empty() {
            return Err(VantageError::NoSnapshotAvailable {
                universe_id: request.universe_id.clone(),
                date: request.end,
            });
        }

        let key = request.key(revision);
        let superset: BTreeSet<String> = timeline
            .iter()
            .flat_map(|s| s.members.iter().map(|m| m.symbol.clone()))
            .collect();
        if superset.is_empty() {
            return Err(VantageError::PartialFetchFailure {
                requested: 0,
                missing: Vec::new(),
            });
        }

        let symbols: Vec<String> = superset.iter().cloned().collect();
        let fetch_start = history_start(start, &key.indicators);
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));

        info!(
            universe_id = %key.universe_id,
            %start,
            %end,
            snapshots = timeline.len(),
            symbols = symbols.len(),
            "building complete dataset"
        );

        let mut handles = Vec::new();
        for batch in symbols.chunks(self.settings.batch_size.max(1)) {
            if let Err(e) = cancel.check() {
                abort_all(&handles);
                return Err(e);
            }
            let job = BatchJob {
                gateway: Arc::clone(&self.gateway),
                semaphore: Arc::clone(&semaphore),
                symbols: batch.to_vec(),
                fetch_start,
                end,
                interval: self.settings.interval,
                indicators: key.indicators.clone(),
                computed_at: built_at,
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(job.run()));
        }

        let mut series = BTreeMap::new();
        let mut missing = BTreeMap::new();
        let mut indicator_gaps = Vec::new();
        for i in 0..handles.len() {
            let joined = (&mut handles[i]).await.map_err(task_failed);
            let outcome = match joined.and_then(|r| r) {
                Ok(outcome) => outcome,
                Err(e) => {
                    abort_all(&handles[i + 1..]);
                    return Err(e);
                }
            };
            for s in outcome.series {
                series.insert(s.symbol.clone(), s);
            }
            missing.extend(outcome.missing);
            indicator_gaps.extend(outcome.gaps);
        }
        cancel.check()?;

        if series.is_empty() {
            return Err(VantageError::PartialFetchFailure {
                requested: superset.len(),
                missing: missing.keys().cloned().collect(),
            });
        }
        if !missing.is_empty() {
            warn!(
                universe_id = %key.universe_id,
                missing = missing.len(),
                requested = superset.len(),
                symbols = ?missing.keys().collect::<Vec<_>>(),
                "dataset built without some symbols"
            );
        }

        let handle = key.handle();
        let dataset = CompleteDataset {
            content_hash: content_hash(&series, &missing),
            handle,
            key,
            superset,
            series,
            missing,
            indicator_gaps,
            built_at,
            expires_at: built_at + self.settings.ttl,
        };

        info!(
            handle = %dataset.handle,
            symbols = dataset.series.len(),
            gaps = dataset.indicator_gaps.len(),
            content_hash = %dataset.content_hash,
            "dataset published"
        );
        Ok(self.cache.publish(dataset))
    }
}
