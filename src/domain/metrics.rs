//! Performance metrics over an equity curve.

use super::portfolio::EquityPoint;
use serde::{Deserialize, Serialize};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: i64,
    pub final_equity: f64,
}

impl Metrics {
    pub fn compute(equity_curve: &[EquityPoint], initial_capital: f64, risk_free_rate: f64) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let years = equity_curve.len() as f64 / TRADING_DAYS_PER_YEAR;
        let cagr = if years > 0.0 && total_return.is_finite() && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);

        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let returns = daily_returns(equity_curve);
        let volatility = stddev(&returns) * TRADING_DAYS_PER_YEAR.sqrt();
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&returns, daily_rf);

        Metrics {
            total_return,
            cagr,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            final_equity,
        }
    }
}

/// Simple returns between consecutive points; zero where the prior equity is not positive.
pub fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > 0.0 { (curr - prev) / prev } else { 0.0 }
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation.
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|r| (r - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, i64) {
    if equity_curve.is_empty() {
        return (0.0, 0);
    }

    let mut peak = equity_curve[0].equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0i64;
    let mut current_dd_duration = 0i64;

    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 && point.equity < peak {
            let dd = (peak - point.equity) / peak;
            max_dd = max_dd.max(dd);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(returns: &[f64], daily_rf: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let excess_return = mean(returns) - daily_rf;
    let sd = stddev(returns);

    let sharpe = if sd > 0.0 {
        (excess_return / sd) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let downside: f64 = returns
        .iter()
        .filter(|&&r| r < daily_rf)
        .map(|&r| (r - daily_rf).powi(2))
        .sum();
    let downside_stddev = (downside / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    (sharpe, sortino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn make_equity_curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                equity: v,
            })
            .collect()
    }

    #[test]
    fn metrics_empty_curve() {
        let metrics = Metrics::compute(&[], 100_000.0, 0.05);
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.final_equity, 100_000.0);
        assert_eq!(metrics.max_drawdown, 0.0);
    }

    #[test]
    fn metrics_total_return() {
        let up = Metrics::compute(&make_equity_curve(&[100_000.0, 110_000.0]), 100_000.0, 0.0);
        assert_relative_eq!(up.total_return, 0.10, epsilon = 1e-9);
        let down = Metrics::compute(&make_equity_curve(&[100_000.0, 90_000.0]), 100_000.0, 0.0);
        assert_relative_eq!(down.total_return, -0.10, epsilon = 1e-9);
    }

    #[test]
    fn metrics_cagr_over_one_year() {
        let mut values = vec![100_000.0; 251];
        values.push(121_000.0);
        let metrics = Metrics::compute(&make_equity_curve(&values), 100_000.0, 0.0);
        assert_relative_eq!(metrics.cagr, 0.21, epsilon = 1e-9);
    }

    #[test]
    fn metrics_max_drawdown() {
        let curve = make_equity_curve(&[100.0, 110.0, 90.0, 95.0, 80.0, 100.0]);
        let (dd, _) = compute_drawdown(&curve);
        assert_relative_eq!(dd, (110.0 - 80.0) / 110.0, epsilon = 1e-9);
    }

    #[test]
    fn metrics_max_drawdown_duration() {
        let curve = make_equity_curve(&[100.0, 110.0, 100.0, 90.0, 85.0, 95.0]);
        let (_, duration) = compute_drawdown(&curve);
        assert_eq!(duration, 4);
    }

    #[test]
    fn metrics_sharpe_ratio_positive() {
        let mut values = vec![100_000.0];
        for i in 1..253 {
            values.push(100_000.0 * (1.0 + 0.001 * (i as f64)));
        }
        let metrics = Metrics::compute(&make_equity_curve(&values), 100_000.0, 0.0);
        assert!(metrics.sharpe_ratio > 0.0);
        assert!(metrics.volatility > 0.0);
    }

    #[test]
    fn metrics_flat_curve_has_zero_risk() {
        let metrics = Metrics::compute(&make_equity_curve(&[100.0; 10]), 100.0, 0.0);
        assert_eq!(metrics.volatility, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.sortino_ratio, 0.0);
    }

    #[test]
    fn metrics_sortino_ratio_finite() {
        let returns = daily_returns(&make_equity_curve(&[100.0, 101.0, 100.5, 101.5, 100.0, 102.0]));
        let (sharpe, sortino) = compute_risk_adjusted(&returns, 0.0);
        assert!(sharpe.is_finite());
        assert!(sortino.is_finite());
    }

    #[test]
    fn daily_returns_values() {
        let r = daily_returns(&make_equity_curve(&[100.0, 110.0, 99.0]));
        assert_relative_eq!(r[0], 0.10, epsilon = 1e-12);
        assert_relative_eq!(r[1], -0.10, epsilon = 1e-12);
    }
}
