//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and signals:
//! - `IndicatorType`: indicator identity + parameters (hashable, ordered; used as a map key)
//! - `IndicatorPoint`: a single point in an indicator time series
//! - `Signal`: discrete trading signal in {-1, 0, 1}
//! - `IndicatorResult`: value and signal series for one symbol and indicator

pub mod ema;
pub mod macd;
pub mod momentum;
pub mod rsi;

use crate::domain::error::VantageError;
use crate::domain::ohlcv::OhlcvBar;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_RSI_PERIOD: usize = 14;
pub const DEFAULT_RSI_OVERBOUGHT: u32 = 70;
pub const DEFAULT_RSI_OVERSOLD: u32 = 30;
pub const DEFAULT_MOMENTUM_LOOKBACK: usize = 10;
pub const DEFAULT_MOMENTUM_THRESHOLD_BPS: u32 = 200;

/// Extra bars MACD needs beyond `slow + signal` before its crossovers are trusted.
pub const MACD_HISTORY_BUFFER: usize = 10;

fn default_rsi_period() -> usize {
    DEFAULT_RSI_PERIOD
}
fn default_rsi_overbought() -> u32 {
    DEFAULT_RSI_OVERBOUGHT
}
fn default_rsi_oversold() -> u32 {
    DEFAULT_RSI_OVERSOLD
}
fn default_macd_fast() -> usize {
    macd::DEFAULT_FAST
}
fn default_macd_slow() -> usize {
    macd::DEFAULT_SLOW
}
fn default_macd_signal() -> usize {
    macd::DEFAULT_SIGNAL
}
fn default_momentum_lookback() -> usize {
    DEFAULT_MOMENTUM_LOOKBACK
}
fn default_momentum_threshold() -> u32 {
    DEFAULT_MOMENTUM_THRESHOLD_BPS
}

/// Indicator identity with its parameters. Thresholds are stored as integers
/// (RSI levels, basis points) so the type stays `Eq + Hash + Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorType {
    Macd {
        #[serde(default = "default_macd_fast")]
        fast: usize,
        #[serde(default = "default_macd_slow")]
        slow: usize,
        #[serde(default = "default_macd_signal")]
        signal: usize,
    },
    Rsi {
        #[serde(default = "default_rsi_period")]
        period: usize,
        #[serde(default = "default_rsi_overbought")]
        overbought: u32,
        #[serde(default = "default_rsi_oversold")]
        oversold: u32,
    },
    Momentum {
        #[serde(default = "default_momentum_lookback")]
        lookback: usize,
        #[serde(default = "default_momentum_threshold")]
        threshold_bps: u32,
    },
}

/// Indicator family, ordered by override priority (highest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Macd,
    Rsi,
    Momentum,
}

impl IndicatorType {
    pub fn rsi_default() -> Self {
        IndicatorType::Rsi {
            period: DEFAULT_RSI_PERIOD,
            overbought: DEFAULT_RSI_OVERBOUGHT,
            oversold: DEFAULT_RSI_OVERSOLD,
        }
    }

    pub fn macd_default() -> Self {
        IndicatorType::Macd {
            fast: macd::DEFAULT_FAST,
            slow: macd::DEFAULT_SLOW,
            signal: macd::DEFAULT_SIGNAL,
        }
    }

    pub fn momentum_default() -> Self {
        IndicatorType::Momentum {
            lookback: DEFAULT_MOMENTUM_LOOKBACK,
            threshold_bps: DEFAULT_MOMENTUM_THRESHOLD_BPS,
        }
    }

    pub fn kind(&self) -> IndicatorKind {
        match self {
            IndicatorType::Macd { .. } => IndicatorKind::Macd,
            IndicatorType::Rsi { .. } => IndicatorKind::Rsi,
            IndicatorType::Momentum { .. } => IndicatorKind::Momentum,
        }
    }

    /// Minimum number of bars required before the indicator is computed.
    pub fn min_history(&self) -> usize {
        match *self {
            IndicatorType::Rsi { period, .. } => 2 * period,
            IndicatorType::Macd { slow, signal, .. } => slow + signal + MACD_HISTORY_BUFFER,
            IndicatorType::Momentum { lookback, .. } => lookback + 1,
        }
    }

    pub fn validate(&self) -> Result<(), VantageError> {
        match *self {
            IndicatorType::Rsi {
                period,
                overbought,
                oversold,
            } => {
                if period == 0 {
                    return Err(VantageError::invalid("RSI period must be positive"));
                }
                if oversold >= overbought || overbought > 100 {
                    return Err(VantageError::invalid(
                        "RSI thresholds must satisfy oversold < overbought <= 100",
                    ));
                }
            }
            IndicatorType::Macd { fast, slow, signal } => {
                if fast == 0 || slow == 0 || signal == 0 {
                    return Err(VantageError::invalid("MACD periods must be positive"));
                }
                if fast >= slow {
                    return Err(VantageError::invalid("MACD fast period must be below slow"));
                }
            }
            IndicatorType::Momentum { lookback, .. } => {
                if lookback == 0 {
                    return Err(VantageError::invalid("momentum lookback must be positive"));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Rsi {
                period,
                overbought,
                oversold,
            } => write!(f, "RSI({},{},{})", period, overbought, oversold),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Momentum {
                lookback,
                threshold_bps,
            } => {
                let pct = *threshold_bps as f64 / 100.0;
                write!(f, "MOMENTUM({},{}%)", lookback, pct)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IndicatorValue {
    Simple(f64),
    Macd { line: f64, signal: f64, histogram: f64 },
}

impl IndicatorValue {
    /// Headline value: the scalar, or the MACD histogram.
    pub fn primary(&self) -> f64 {
        match *self {
            IndicatorValue::Simple(v) => v,
            IndicatorValue::Macd { histogram, .. } => histogram,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub date: NaiveDate,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Signal {
    Sell,
    #[default]
    Hold,
    Buy,
}

impl Signal {
    pub fn as_f64(self) -> f64 {
        i8::from(self) as f64
    }

    pub fn is_active(self) -> bool {
        self != Signal::Hold
    }

    /// Strict threshold at ±`band` into {-1, 0, 1}.
    pub fn from_threshold(value: f64, band: f64) -> Self {
        if value > band {
            Signal::Buy
        } else if value < -band {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

impl From<Signal> for i8 {
    fn from(s: Signal) -> i8 {
        match s {
            Signal::Sell => -1,
            Signal::Hold => 0,
            Signal::Buy => 1,
        }
    }
}

impl TryFrom<i8> for Signal {
    type Error = String;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(Signal::Sell),
            0 => Ok(Signal::Hold),
            1 => Ok(Signal::Buy),
            other => Err(format!("signal out of range: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalPoint {
    pub date: NaiveDate,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult {
    pub symbol: String,
    pub indicator: IndicatorType,
    pub values: Vec<IndicatorPoint>,
    pub signals: Vec<SignalPoint>,
    pub computed_at: DateTime<Utc>,
    /// Fraction of points past warmup.
    pub confidence: f64,
}

impl IndicatorResult {
    /// Signal at the last point dated on or before `date`; `Hold` before the first.
    pub fn signal_on_or_before(&self, date: NaiveDate) -> Signal {
        let idx = self.signals.partition_point(|p| p.date <= date);
        idx.checked_sub(1)
            .map(|i| self.signals[i].signal)
            .unwrap_or_default()
    }

    /// Last valid value dated on or before `date`.
    pub fn value_on_or_before(&self, date: NaiveDate) -> Option<f64> {
        let idx = self.values.partition_point(|p| p.date <= date);
        self.values[..idx]
            .iter()
            .rev()
            .find(|p| p.valid)
            .map(|p| p.value.primary())
    }
}

/// Compute one indicator and its signals for a symbol's bars.
pub fn compute_indicator(
    symbol: &str,
    bars: &[OhlcvBar],
    indicator: IndicatorType,
    computed_at: DateTime<Utc>,
) -> Result<IndicatorResult, VantageError> {
    indicator.validate()?;

    let required = indicator.min_history();
    if bars.len() < required {
        return Err(VantageError::InsufficientHistory {
            indicator: indicator.to_string(),
            required,
            available: bars.len(),
        });
    }

    let (values, signals) = match indicator {
        IndicatorType::Rsi {
            period,
            overbought,
            oversold,
        } => {
            let values = rsi::calculate_rsi(bars, period);
            let signals = rsi::rsi_signals(&values, overbought as f64, oversold as f64);
            (values, signals)
        }
        IndicatorType::Macd { fast, slow, signal } => {
            let values = macd::calculate_macd(bars, fast, slow, signal);
            let signals = macd::crossover_signals(&values);
            (values, signals)
        }
        IndicatorType::Momentum {
            lookback,
            threshold_bps,
        } => {
            let values = momentum::calculate_momentum(bars, lookback);
            let signals = momentum::momentum_signals(&values, threshold_bps as f64 / 10_000.0);
            (values, signals)
        }
    };

    let valid = values.iter().filter(|p| p.valid).count();
    let confidence = if values.is_empty() {
        0.0
    } else {
        valid as f64 / values.len() as f64
    };

    Ok(IndicatorResult {
        symbol: symbol.to_string(),
        indicator,
        values,
        signals,
        computed_at,
        confidence,
    })
}
