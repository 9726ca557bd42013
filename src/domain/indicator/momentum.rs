//! Momentum as simple rate of change.
//!
//! MOM(n)[i] = (C[i] - C[i-n]) / C[i-n], as a fraction (0.02 == 2%)
//! If C[i-n] == 0: MOM = 0
//! Warmup: first n bars invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorValue, Signal, SignalPoint};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_momentum(bars: &[OhlcvBar], lookback: usize) -> Vec<IndicatorPoint> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let valid = lookback > 0 && i >= lookback;
            let value = if valid {
                let prev_close = bars[i - lookback].close;
                if prev_close == 0.0 {
                    0.0
                } else {
                    (bar.close - prev_close) / prev_close
                }
            } else {
                0.0
            };
            IndicatorPoint {
                date: bar.date,
                valid,
                value: IndicatorValue::Simple(value),
            }
        })
        .collect()
}

/// +1 / -1 when the rate of change exceeds ±`threshold`, else 0.
pub fn momentum_signals(values: &[IndicatorPoint], threshold: f64) -> Vec<SignalPoint> {
    values
        .iter()
        .map(|p| SignalPoint {
            date: p.date,
            signal: if p.valid {
                Signal::from_threshold(p.value.primary(), threshold)
            } else {
                Signal::Hold
            },
        })
        .collect()
}
