//! Temporal backtest engine.
//!
//! On each rebalance date the engine trades only the names in the snapshot
//! in force on that date (or, in static mode, the snapshot in force at the
//! end of the run) that also have data in the dataset. Holdings are marked
//! daily at their last known close. The engine is a pure function of its
//! inputs: it never reads the clock and never touches storage.

use crate::domain::calendar::{Frequency, align_to_trading_days};
use crate::domain::cancel::CancelFlag;
use crate::domain::dataset::CompleteDataset;
use crate::domain::error::VantageError;
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::{EquityPoint, Portfolio, TradeRecord};
use crate::domain::snapshot::{UniverseSnapshot, composition_at};
use crate::domain::strategy::{Strategy, StrategyContext};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_TRANSACTION_COST_BPS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniverseMode {
    /// Point-in-time membership on every rebalance date.
    #[default]
    Temporal,
    /// End-of-period membership applied to the whole run.
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub transaction_cost_bps: f64,
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            transaction_cost_bps: DEFAULT_TRANSACTION_COST_BPS,
            risk_free_rate: 0.0,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), VantageError> {
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(VantageError::invalid("initial_capital must be positive"));
        }
        if !(self.transaction_cost_bps.is_finite() && self.transaction_cost_bps >= 0.0) {
            return Err(VantageError::invalid("transaction_cost_bps must be non-negative"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(VantageError::invalid("risk_free_rate must be finite"));
        }
        Ok(())
    }
}

/// What to run: everything except the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSpec {
    pub universe_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(alias = "rebalance_frequency")]
    pub frequency: Frequency,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub mode: UniverseMode,
}

impl BacktestSpec {
    pub fn validate(&self) -> Result<(), VantageError> {
        if self.start > self.end {
            return Err(VantageError::invalid(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        self.strategy.validate()
    }

    pub fn with_strategy(&self, strategy: Strategy, mode: UniverseMode) -> Self {
        Self {
            strategy,
            mode,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceRecord {
    pub date: NaiveDate,
    pub snapshot_date: NaiveDate,
    /// Tradable members on this date.
    pub members: Vec<String>,
    /// Post-trade weights.
    pub holdings: BTreeMap<String, f64>,
    pub trades: Vec<TradeRecord>,
    pub forced_exits: Vec<String>,
    pub strategy_turnover: f64,
    pub universe_turnover: f64,
    pub strategy_cost: f64,
    pub universe_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub strategy_turnover: f64,
    pub universe_turnover: f64,
    pub strategy_cost: f64,
    pub universe_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    pub fn universe_share(&self) -> f64 {
        if self.total_cost > 0.0 {
            self.universe_cost / self.total_cost
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: String,
    pub universe_id: String,
    pub mode: UniverseMode,
    pub strategy: Strategy,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frequency: Frequency,
    pub dataset_handle: String,
    pub config: BacktestConfig,
    pub equity_curve: Vec<EquityPoint>,
    pub rebalances: Vec<RebalanceRecord>,
    pub costs: CostBreakdown,
    pub metrics: Metrics,
}

impl BacktestResult {
    pub fn spec(&self) -> BacktestSpec {
        BacktestSpec {
            universe_id: self.universe_id.clone(),
            start: self.start,
            end: self.end,
            frequency: self.frequency,
            strategy: self.strategy.clone(),
            mode: self.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Initialized,
    Running { step: usize },
    Completed,
    Failed { reason: String },
}

/// Deterministic run identifier over the `BacktestSpec`, config and dataset content.
pub fn backtest_id(spec: &BacktestSpec, config: &BacktestConfig, dataset: &CompleteDataset) -> String {
    let canonical = serde_json::json!({
        "spec": spec,
        "config": config,
        "dataset_handle": &dataset.handle,
        "content_hash": &dataset.content_hash,
    });
    blake3::hash(canonical.to_string().as_bytes())
        .to_hex()
        .to_string()
}

pub struct BacktestEngine<'a> {
    spec: &'a BacktestSpec,
    config: &'a BacktestConfig,
    dataset: &'a CompleteDataset,
    timeline: &'a [UniverseSnapshot],
    state: EngineState,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(
        spec: &'a BacktestSpec,
        config: &'a BacktestConfig,
        dataset: &'a CompleteDataset,
        timeline: &'a [UniverseSnapshot],
    ) -> Self {
        Self {
            spec,
            config,
            dataset,
            timeline,
            state: EngineState::Initialized,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Run to completion. Any error moves the engine to `Failed` and no
    /// partial result is returned.
    pub fn run(&mut self, cancel: &CancelFlag) -> Result<BacktestResult, VantageError> {
        if self.state != EngineState::Initialized {
            return Err(VantageError::invalid("backtest engine has already run"));
        }
        match self.execute(cancel) {
            Ok(result) => {
                self.state = EngineState::Completed;
                Ok(result)
            }
            Err(e) => {
                self.state = EngineState::Failed {
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    fn price_of(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.dataset
            .series(symbol)
            .and_then(|s| s.close_on_or_before(date))
    }

    fn snapshot_for(
        &self,
        date: NaiveDate,
        fixed: Option<&'a UniverseSnapshot>,
    ) -> Result<&'a UniverseSnapshot, VantageError> {
        match fixed {
            Some(snapshot) => Ok(snapshot),
            None => composition_at(self.timeline, &self.spec.universe_id, date),
        }
    }

    fn tradable(&self, snapshot: &UniverseSnapshot, date: NaiveDate) -> Vec<String> {
        snapshot
            .members
            .iter()
            .filter(|m| !self.dataset.missing.contains_key(&m.symbol))
            .filter(|m| {
                self.dataset
                    .series(&m.symbol)
                    .is_some_and(|s| s.has_bar_on_or_before(date))
            })
            .map(|m| m.symbol.clone())
            .collect()
    }

    fn execute(&mut self, cancel: &CancelFlag) -> Result<BacktestResult, VantageError> {
        let spec = self.spec;
        spec.validate()?;
        self.config.validate()?;
        if self.dataset.key.universe_id != spec.universe_id {
            return Err(VantageError::invalid(format!(
                "dataset {} belongs to universe {}, not {}",
                self.dataset.handle, self.dataset.key.universe_id, spec.universe_id
            )));
        }

        let trading_days = self.dataset.trading_days(spec.start, spec.end);
        if trading_days.is_empty() {
            return Err(VantageError::BacktestStepFailure {
                date: spec.start,
                reason: "no trading days in range".into(),
            });
        }
        let rebalance_dates: BTreeSet<NaiveDate> =
            align_to_trading_days(&spec.frequency.schedule(spec.start, spec.end), &trading_days)
                .into_iter()
                .collect();

        let fixed = match spec.mode {
            UniverseMode::Temporal => None,
            UniverseMode::Static => Some(composition_at(
                self.timeline,
                &spec.universe_id,
                spec.end,
            )?),
        };

        let mut portfolio = Portfolio::new(self.config.initial_capital);
        let mut rebalances = Vec::with_capacity(rebalance_dates.len());
        let mut costs = CostBreakdown::default();

        for (step, &day) in trading_days.iter().enumerate() {
            cancel.check()?;
            self.state = EngineState::Running { step };

            if rebalance_dates.contains(&day) {
                let record = self.rebalance(&mut portfolio, day, fixed)?;
                costs.strategy_turnover += record.strategy_turnover;
                costs.universe_turnover += record.universe_turnover;
                costs.strategy_cost += record.strategy_cost;
                costs.universe_cost += record.universe_cost;
                rebalances.push(record);
            }

            let equity = portfolio.total_equity(|s| self.price_of(s, day));
            portfolio.record_equity(day, equity);
        }

        costs.total_cost = costs.strategy_cost + costs.universe_cost;

        let metrics = Metrics::compute(
            &portfolio.equity_curve,
            self.config.initial_capital,
            self.config.risk_free_rate,
        );

        Ok(BacktestResult {
            id: backtest_id(spec, self.config, self.dataset),
            universe_id: spec.universe_id.clone(),
            mode: spec.mode,
            strategy: spec.strategy.clone(),
            start: spec.start,
            end: spec.end,
            frequency: spec.frequency,
            dataset_handle: self.dataset.handle.clone(),
            config: self.config.clone(),
            equity_curve: portfolio.equity_curve,
            rebalances,
            costs,
            metrics,
        })
    }

    fn rebalance(
        &self,
        portfolio: &mut Portfolio,
        day: NaiveDate,
        fixed: Option<&'a UniverseSnapshot>,
    ) -> Result<RebalanceRecord, VantageError> {
        let snapshot = self.snapshot_for(day, fixed)?;
        let tradable = self.tradable(snapshot, day);
        if tradable.is_empty() {
            return Err(VantageError::BacktestStepFailure {
                date: day,
                reason: format!(
                    "no tradable members in snapshot of {}",
                    snapshot.snapshot_date
                ),
            });
        }

        let held = portfolio.held_symbols();
        let ctx = StrategyContext {
            date: day,
            tradable: &tradable,
            snapshot,
            dataset: self.dataset,
            held: &held,
        };
        let targets = self
            .spec
            .strategy
            .target_weights(&ctx)
            .map_err(|reason| VantageError::BacktestStepFailure { date: day, reason })?;

        let tradable_set: BTreeSet<String> = tradable.iter().cloned().collect();
        if let Some(outside) = targets.keys().find(|s| !tradable_set.contains(*s)) {
            return Err(VantageError::BacktestStepFailure {
                date: day,
                reason: format!("strategy targeted non-member {outside}"),
            });
        }

        let outcome = portfolio.rebalance(
            &targets,
            &tradable_set,
            |s| self.price_of(s, day),
            self.config.transaction_cost_bps,
        );
        if outcome.equity_before <= 0.0 {
            return Err(VantageError::BacktestStepFailure {
                date: day,
                reason: "portfolio equity exhausted".into(),
            });
        }

        debug!(
            date = %day,
            snapshot = %snapshot.snapshot_date,
            tradable = tradable.len(),
            targets = targets.len(),
            forced_exits = outcome.forced_exits.len(),
            "rebalanced"
        );

        Ok(RebalanceRecord {
            date: day,
            snapshot_date: snapshot.snapshot_date,
            members: tradable,
            holdings: portfolio.weights(|s| self.price_of(s, day)),
            strategy_turnover: outcome.strategy_traded / outcome.equity_before,
            universe_turnover: outcome.universe_traded / outcome.equity_before,
            strategy_cost: outcome.strategy_cost,
            universe_cost: outcome.universe_cost,
            trades: outcome.trades,
            forced_exits: outcome.forced_exits,
        })
    }
}

/// Convenience wrapper: build an engine and run it.
pub fn run_backtest(
    spec: &BacktestSpec,
    config: &BacktestConfig,
    dataset: &CompleteDataset,
    timeline: &[UniverseSnapshot],
    cancel: &CancelFlag,
) -> Result<BacktestResult, VantageError> {
    BacktestEngine::new(spec, config, dataset, timeline).run(cancel)
}
