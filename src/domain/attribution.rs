//! Return attribution for a temporal backtest.
//!
//! A strategy run is compared with two runs over the same dataset: the
//! temporal snapshot-weighted benchmark (what the universe itself returned)
//! and the static-universe rerun of the same strategy (what it would have
//! reported with hindsight membership).

use crate::domain::backtest::{BacktestResult, UniverseMode};
use crate::domain::error::VantageError;
use crate::domain::metrics::{TRADING_DAYS_PER_YEAR, daily_returns, mean};
use crate::domain::portfolio::EquityPoint;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionReport {
    pub backtest_id: String,
    pub benchmark_id: String,
    pub static_id: String,
    pub strategy_return: f64,
    pub strategy_cagr: f64,
    /// Total return of the temporal snapshot-weighted benchmark.
    pub universe_effect: f64,
    /// Strategy minus benchmark total return.
    pub selection_effect: f64,
    pub beta: f64,
    /// Annualized intercept of daily strategy returns on benchmark returns.
    pub alpha: f64,
    /// Static minus temporal total return of the same strategy.
    pub survivorship_bias: f64,
    pub universe_cost_share: f64,
}

/// Returns aligned on the dates both curves share.
fn aligned_returns(a: &[EquityPoint], b: &[EquityPoint]) -> (Vec<f64>, Vec<f64>) {
    let other: BTreeMap<NaiveDate, f64> = b.iter().map(|p| (p.date, p.equity)).collect();
    let (left, right): (Vec<EquityPoint>, Vec<EquityPoint>) = a
        .iter()
        .filter_map(|p| {
            other.get(&p.date).map(|&equity| {
                (
                    *p,
                    EquityPoint {
                        date: p.date,
                        equity,
                    },
                )
            })
        })
        .unzip();
    (daily_returns(&left), daily_returns(&right))
}

/// OLS slope and intercept of `y` on `x`. A flat `x` gives zero beta.
fn ols(x: &[f64], y: &[f64]) -> (f64, f64) {
    if x.is_empty() || x.len() != y.len() {
        return (0.0, 0.0);
    }
    let mx = mean(x);
    let my = mean(y);
    let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let var: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    let beta = if var > 0.0 { cov / var } else { 0.0 };
    (beta, my - beta * mx)
}

pub fn analyze(
    strategy_run: &BacktestResult,
    benchmark_run: &BacktestResult,
    static_run: &BacktestResult,
) -> Result<AttributionReport, VantageError> {
    if strategy_run.mode != UniverseMode::Temporal || benchmark_run.mode != UniverseMode::Temporal {
        return Err(VantageError::invalid(
            "strategy and benchmark runs must use the temporal universe",
        ));
    }
    if static_run.mode != UniverseMode::Static {
        return Err(VantageError::invalid("survivorship baseline must be a static run"));
    }
    for run in [benchmark_run, static_run] {
        if run.dataset_handle != strategy_run.dataset_handle {
            return Err(VantageError::invalid(format!(
                "run {} used dataset {}, expected {}",
                run.id, run.dataset_handle, strategy_run.dataset_handle
            )));
        }
    }

    let (strategy_returns, benchmark_returns) =
        aligned_returns(&strategy_run.equity_curve, &benchmark_run.equity_curve);
    let (beta, daily_alpha) = ols(&benchmark_returns, &strategy_returns);

    let strategy_return = strategy_run.metrics.total_return;
    let universe_effect = benchmark_run.metrics.total_return;

    Ok(AttributionReport {
        backtest_id: strategy_run.id.clone(),
        benchmark_id: benchmark_run.id.clone(),
        static_id: static_run.id.clone(),
        strategy_return,
        strategy_cagr: strategy_run.metrics.cagr,
        universe_effect,
        selection_effect: strategy_return - universe_effect,
        beta,
        alpha: daily_alpha * TRADING_DAYS_PER_YEAR,
        survivorship_bias: static_run.metrics.total_return - strategy_return,
        universe_cost_share: strategy_run.costs.universe_share(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{BacktestConfig, CostBreakdown};
    use crate::domain::calendar::Frequency;
    use crate::domain::metrics::Metrics;
    use crate::domain::strategy::Strategy;
    use approx::assert_relative_eq;

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                date: start + chrono::Duration::days(i as i64),
                equity,
            })
            .collect()
    }

    fn run(id: &str, mode: UniverseMode, values: &[f64]) -> BacktestResult {
        let equity_curve = curve(values);
        let metrics = Metrics::compute(&equity_curve, values[0], 0.0);
        BacktestResult {
            id: id.into(),
            universe_id: "u".into(),
            mode,
            strategy: Strategy::EqualWeight,
            start: equity_curve[0].date,
            end: equity_curve[equity_curve.len() - 1].date,
            frequency: Frequency::Monthly,
            dataset_handle: "ds".into(),
            config: BacktestConfig::default(),
            equity_curve,
            rebalances: vec![],
            costs: CostBreakdown {
                universe_cost: 1.0,
                strategy_cost: 1.0,
                total_cost: 2.0,
                ..CostBreakdown::default()
            },
            metrics,
        }
    }

    #[test]
    fn ols_recovers_slope_and_intercept() {
        let x = [0.01, -0.02, 0.03, 0.0];
        let y: Vec<f64> = x.iter().map(|v| 0.001 + 2.0 * v).collect();
        let (beta, alpha) = ols(&x, &y);
        assert_relative_eq!(beta, 2.0, epsilon = 1e-9);
        assert_relative_eq!(alpha, 0.001, epsilon = 1e-9);
        assert_eq!(ols(&[0.0, 0.0], &[0.1, 0.2]).0, 0.0);
    }

    #[test]
    fn effects_decompose_total_return() {
        let strategy = run("s", UniverseMode::Temporal, &[100.0, 104.0, 106.0, 112.0]);
        let benchmark = run("b", UniverseMode::Temporal, &[100.0, 102.0, 103.0, 106.0]);
        let static_run = run("x", UniverseMode::Static, &[100.0, 108.0, 112.0, 125.0]);
        let report = analyze(&strategy, &benchmark, &static_run).unwrap();

        assert_relative_eq!(report.strategy_return, 0.12, epsilon = 1e-9);
        assert_relative_eq!(report.universe_effect, 0.06, epsilon = 1e-9);
        assert_relative_eq!(
            report.universe_effect + report.selection_effect,
            report.strategy_return,
            epsilon = 1e-12
        );
        assert_relative_eq!(report.survivorship_bias, 0.13, epsilon = 1e-9);
        assert!(report.beta > 0.0);
        assert_relative_eq!(report.universe_cost_share, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn identical_runs_have_unit_beta_and_no_alpha() {
        let values = [100.0, 101.0, 99.0, 103.0, 104.0];
        let strategy = run("s", UniverseMode::Temporal, &values);
        let benchmark = run("b", UniverseMode::Temporal, &values);
        let static_run = run("x", UniverseMode::Static, &values);
        let report = analyze(&strategy, &benchmark, &static_run).unwrap();
        assert_relative_eq!(report.beta, 1.0, epsilon = 1e-9);
        assert_relative_eq!(report.alpha, 0.0, epsilon = 1e-9);
        assert_eq!(report.survivorship_bias, 0.0);
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let strategy = run("s", UniverseMode::Temporal, &[100.0, 101.0]);
        let benchmark = run("b", UniverseMode::Temporal, &[100.0, 101.0]);
        let wrong_mode = run("x", UniverseMode::Temporal, &[100.0, 101.0]);
        assert!(analyze(&strategy, &benchmark, &wrong_mode).is_err());

        let mut other_dataset = run("x", UniverseMode::Static, &[100.0, 101.0]);
        other_dataset.dataset_handle = "other".into();
        assert!(matches!(
            analyze(&strategy, &benchmark, &other_dataset),
            Err(VantageError::InvalidRequest { .. })
        ));
    }
}
