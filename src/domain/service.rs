//! Backtest orchestration: dataset resolution, engine execution on the
//! blocking pool, and an in-memory registry of finished runs.

use crate::domain::attribution::{AttributionReport, analyze};
use crate::domain::backtest::{
    BacktestConfig, BacktestResult, BacktestSpec, UniverseMode, run_backtest,
};
use crate::domain::cancel::CancelFlag;
use crate::domain::dataset::CompleteDataset;
use crate::domain::dataset_builder::{DatasetBuilder, DatasetRequest, blocking};
use crate::domain::error::VantageError;
use crate::domain::indicator::IndicatorType;
use crate::domain::screening::load_timeline;
use crate::domain::snapshot::UniverseSnapshot;
use crate::domain::strategy::Strategy;
use crate::ports::snapshot_port::SnapshotStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_STORED_RUNS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRequest {
    #[serde(flatten)]
    pub spec: BacktestSpec,
    /// Overrides the configured defaults when present.
    #[serde(default)]
    pub config: Option<BacktestConfig>,
    /// Indicators to compute; defaults to what the strategy reads.
    #[serde(default)]
    pub indicators: Option<Vec<IndicatorType>>,
    /// Run on a previously built dataset instead of resolving one.
    #[serde(default)]
    pub dataset_handle: Option<String>,
}

impl BacktestRequest {
    pub fn new(spec: BacktestSpec) -> Self {
        Self {
            spec,
            config: None,
            indicators: None,
            dataset_handle: None,
        }
    }

    pub fn with_dataset(mut self, handle: impl Into<String>) -> Self {
        self.dataset_handle = Some(handle.into());
        self
    }

    fn dataset_request(&self) -> DatasetRequest {
        let indicators = match (&self.indicators, &self.spec.strategy) {
            (Some(explicit), _) => explicit.clone(),
            (None, Strategy::CompositeSignal { composite, .. }) => composite.indicators(),
            (None, _) => vec![
                IndicatorType::macd_default(),
                IndicatorType::rsi_default(),
                IndicatorType::momentum_default(),
            ],
        };
        DatasetRequest::new(
            self.spec.universe_id.clone(),
            self.spec.start,
            self.spec.end,
            indicators,
        )
    }

    /// Indicators a supplied dataset must carry.
    fn required_indicators(&self) -> Vec<IndicatorType> {
        match (&self.indicators, &self.spec.strategy) {
            (Some(explicit), _) => explicit.clone(),
            (None, Strategy::CompositeSignal { composite, .. }) => composite.indicators(),
            (None, _) => Vec::new(),
        }
    }

    /// `InvalidRequest` unless `dataset` belongs to this universe, spans the
    /// whole backtest range and carries the indicators the run reads.
    fn check_dataset(&self, dataset: &CompleteDataset) -> Result<(), VantageError> {
        let key = &dataset.key;
        if key.universe_id != self.spec.universe_id {
            return Err(VantageError::invalid(format!(
                "dataset {} belongs to universe {}, not {}",
                dataset.handle, key.universe_id, self.spec.universe_id
            )));
        }
        if key.start > self.spec.start || key.end < self.spec.end {
            return Err(VantageError::invalid(format!(
                "dataset {} covers {}..{}, backtest needs {}..{}",
                dataset.handle, key.start, key.end, self.spec.start, self.spec.end
            )));
        }
        if let Some(absent) = self
            .required_indicators()
            .into_iter()
            .find(|i| !key.indicators.contains(i))
        {
            return Err(VantageError::invalid(format!(
                "dataset {} lacks indicator {absent}",
                dataset.handle
            )));
        }
        Ok(())
    }
}

/// A finished run with the exact inputs it consumed, so reruns for
/// attribution see the same data.
struct StoredRun {
    result: Arc<BacktestResult>,
    dataset: Arc<CompleteDataset>,
    timeline: Arc<Vec<UniverseSnapshot>>,
    attribution: Option<AttributionReport>,
}

/// Finished runs, oldest evicted first once `capacity` is exceeded.
struct RunRegistry {
    runs: HashMap<String, StoredRun>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RunRegistry {
    fn new(capacity: usize) -> Self {
        Self {
            runs: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, id: String, run: StoredRun) {
        if self.runs.insert(id.clone(), run).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.runs.remove(&oldest);
                debug!(id = %oldest, "backtest run evicted");
            }
        }
    }
}

pub struct BacktestService {
    builder: Arc<DatasetBuilder>,
    store: Arc<dyn SnapshotStore>,
    defaults: BacktestConfig,
    runs: RwLock<RunRegistry>,
}

impl BacktestService {
    pub fn new(
        builder: Arc<DatasetBuilder>,
        store: Arc<dyn SnapshotStore>,
        defaults: BacktestConfig,
    ) -> Self {
        Self {
            builder,
            store,
            defaults,
            runs: RwLock::new(RunRegistry::new(DEFAULT_MAX_STORED_RUNS)),
        }
    }

    /// Keep at most `max_runs` finished runs.
    pub fn with_max_runs(self, max_runs: usize) -> Self {
        Self {
            runs: RwLock::new(RunRegistry::new(max_runs)),
            ..self
        }
    }

    pub fn builder(&self) -> &Arc<DatasetBuilder> {
        &self.builder
    }

    /// Run a backtest on the dataset named by `dataset_handle`, or on one
    /// resolved for the request. A dataset that goes stale before execution
    /// is rebuilt once over its own scope.
    pub async fn run(
        &self,
        request: &BacktestRequest,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<Arc<BacktestResult>, VantageError> {
        request.spec.validate()?;
        let config = request.config.clone().unwrap_or_else(|| self.defaults.clone());
        config.validate()?;

        let dataset = match &request.dataset_handle {
            Some(handle) => {
                let dataset = self.builder.get(handle)?;
                request.check_dataset(&dataset)?;
                dataset
            }
            None => {
                self.builder
                    .resolve_or_build(&request.dataset_request(), now, cancel)
                    .await?
                    .0
            }
        };

        let (result, dataset, timeline) = match self
            .run_on(&request.spec, &config, Arc::clone(&dataset), cancel)
            .await
        {
            Err(VantageError::DatasetStale { handle, .. }) => {
                warn!(%handle, universe_id = %request.spec.universe_id, "dataset went stale, rebuilding");
                let key = &dataset.key;
                let scope = DatasetRequest::new(
                    key.universe_id.clone(),
                    key.start,
                    key.end,
                    key.indicators.clone(),
                );
                let (rebuilt, _) = self.builder.resolve_or_build(&scope, now, cancel).await?;
                self.run_on(&request.spec, &config, rebuilt, cancel).await?
            }
            other => other?,
        };

        let result = Arc::new(result);
        info!(
            id = %result.id,
            universe_id = %result.universe_id,
            strategy = result.strategy.name(),
            dataset_handle = %result.dataset_handle,
            total_return = result.metrics.total_return,
            rebalances = result.rebalances.len(),
            "backtest completed"
        );
        self.runs.write().insert(
            result.id.clone(),
            StoredRun {
                result: Arc::clone(&result),
                dataset,
                timeline,
                attribution: None,
            },
        );
        Ok(result)
    }

    /// Execute on `dataset` after checking it against the universe's current
    /// snapshot revision.
    async fn run_on(
        &self,
        spec: &BacktestSpec,
        config: &BacktestConfig,
        dataset: Arc<CompleteDataset>,
        cancel: &CancelFlag,
    ) -> Result<(BacktestResult, Arc<CompleteDataset>, Arc<Vec<UniverseSnapshot>>), VantageError> {
        let store = Arc::clone(&self.store);
        let (universe_id, start, end) = (spec.universe_id.clone(), spec.start, spec.end);
        let revision_end = dataset.key.end;
        let (revision, timeline) = blocking(move || {
            let revision = store.latest_revision(&universe_id, revision_end)?;
            let timeline = load_timeline(store.as_ref(), &universe_id, start, end)?;
            Ok((revision, timeline))
        })
        .await?;
        if revision != dataset.key.snapshot_revision {
            self.builder.cache().evict(&dataset.handle);
            return Err(VantageError::DatasetStale {
                handle: dataset.handle.clone(),
                universe_id: spec.universe_id.clone(),
            });
        }

        let timeline = Arc::new(timeline);
        let result = execute(spec.clone(), config.clone(), &dataset, &timeline, cancel).await?;
        Ok((result, dataset, timeline))
    }

    pub fn get(&self, id: &str) -> Result<Arc<BacktestResult>, VantageError> {
        self.runs
            .read()
            .runs
            .get(id)
            .map(|run| Arc::clone(&run.result))
            .ok_or_else(|| VantageError::BacktestNotFound(id.to_string()))
    }

    /// Attribution for a finished temporal run. The benchmark and static
    /// reruns use the dataset and timeline of the original run; the report
    /// is computed once per run.
    pub async fn attribution(
        &self,
        id: &str,
        cancel: &CancelFlag,
    ) -> Result<AttributionReport, VantageError> {
        let (result, dataset, timeline) = {
            let registry = self.runs.read();
            let run = registry
                .runs
                .get(id)
                .ok_or_else(|| VantageError::BacktestNotFound(id.to_string()))?;
            if let Some(report) = &run.attribution {
                return Ok(report.clone());
            }
            (
                Arc::clone(&run.result),
                Arc::clone(&run.dataset),
                Arc::clone(&run.timeline),
            )
        };
        if result.mode != UniverseMode::Temporal {
            return Err(VantageError::invalid(format!(
                "backtest {id} ran on a static universe; attribution needs a temporal run"
            )));
        }

        let spec = result.spec();
        let benchmark_spec = spec.with_strategy(Strategy::SnapshotWeighted, UniverseMode::Temporal);
        let static_spec = spec.with_strategy(spec.strategy.clone(), UniverseMode::Static);
        let benchmark = execute(benchmark_spec, result.config.clone(), &dataset, &timeline, cancel).await?;
        let static_run = execute(static_spec, result.config.clone(), &dataset, &timeline, cancel).await?;

        let report = analyze(&result, &benchmark, &static_run)?;
        info!(
            id,
            selection = report.selection_effect,
            survivorship_bias = report.survivorship_bias,
            "attribution computed"
        );
        if let Some(run) = self.runs.write().runs.get_mut(id) {
            run.attribution = Some(report.clone());
        }
        Ok(report)
    }
}

async fn execute(
    spec: BacktestSpec,
    config: BacktestConfig,
    dataset: &Arc<CompleteDataset>,
    timeline: &Arc<Vec<UniverseSnapshot>>,
    cancel: &CancelFlag,
) -> Result<BacktestResult, VantageError> {
    let dataset = Arc::clone(dataset);
    let timeline = Arc::clone(timeline);
    let cancel = cancel.clone();
    blocking(move || run_backtest(&spec, &config, &dataset, &timeline, &cancel)).await
}
