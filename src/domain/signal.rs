//! Composite signal resolution.
//!
//! Component signals are blended by normalized weight, then a fixed priority
//! override applies: MACD > RSI > weighted blend. The first family (in that
//! order) with any nonzero component replaces the blend with its own
//! weight-renormalized value. The result is thresholded at ±0.33.

use crate::domain::error::VantageError;
use crate::domain::indicator::{IndicatorKind, IndicatorResult, IndicatorType, Signal};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const COMPOSITE_THRESHOLD: f64 = 0.33;

/// Families that override the blend when active, highest priority first.
const OVERRIDE_ORDER: [IndicatorKind; 2] = [IndicatorKind::Macd, IndicatorKind::Rsi];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedIndicator {
    pub indicator: IndicatorType,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeConfig {
    pub components: Vec<WeightedIndicator>,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        let third = 1.0 / 3.0;
        Self {
            components: vec![
                WeightedIndicator {
                    indicator: IndicatorType::macd_default(),
                    weight: third,
                },
                WeightedIndicator {
                    indicator: IndicatorType::rsi_default(),
                    weight: third,
                },
                WeightedIndicator {
                    indicator: IndicatorType::momentum_default(),
                    weight: third,
                },
            ],
        }
    }
}

impl CompositeConfig {
    pub fn indicators(&self) -> Vec<IndicatorType> {
        self.components.iter().map(|c| c.indicator).collect()
    }

    pub fn validate(&self) -> Result<(), VantageError> {
        if self.components.is_empty() {
            return Err(VantageError::invalid("composite needs at least one indicator"));
        }
        let mut seen = HashSet::new();
        for c in &self.components {
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(VantageError::invalid(format!(
                    "weight for {} must be finite and non-negative",
                    c.indicator
                )));
            }
            if !seen.insert(c.indicator) {
                return Err(VantageError::invalid(format!(
                    "duplicate indicator {}",
                    c.indicator
                )));
            }
            c.indicator.validate()?;
        }
        if self.components.iter().map(|c| c.weight).sum::<f64>() <= 0.0 {
            return Err(VantageError::invalid("indicator weights must sum to a positive value"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSignal {
    pub indicator: IndicatorType,
    pub signal: Signal,
    /// Normalized weight over the components that were available.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub symbol: String,
    pub date: NaiveDate,
    pub signal: Signal,
    pub raw_value: f64,
    pub overridden_by: Option<IndicatorKind>,
    pub components: Vec<ComponentSignal>,
}

/// Resolve already-normalized component signals into `(value, overriding family)`.
pub fn resolve(components: &[ComponentSignal]) -> (f64, Option<IndicatorKind>) {
    for kind in OVERRIDE_ORDER {
        let family: Vec<&ComponentSignal> = components
            .iter()
            .filter(|c| c.indicator.kind() == kind)
            .collect();
        if family.iter().any(|c| c.signal.is_active()) {
            let weight: f64 = family.iter().map(|c| c.weight).sum();
            let value = if weight > 0.0 {
                family.iter().map(|c| c.weight * c.signal.as_f64()).sum::<f64>() / weight
            } else {
                // zero-weight members still carry the override; average them
                family.iter().map(|c| c.signal.as_f64()).sum::<f64>() / family.len() as f64
            };
            return (value, Some(kind));
        }
    }

    let blend = components
        .iter()
        .map(|c| c.weight * c.signal.as_f64())
        .sum();
    (blend, None)
}

/// Composite signal for `symbol` on `date`, using each component's signal at
/// its last point on or before `date`. Components without a result are left
/// out and the remaining weights renormalized.
pub fn composite_at(
    symbol: &str,
    date: NaiveDate,
    config: &CompositeConfig,
    results: &BTreeMap<IndicatorType, IndicatorResult>,
) -> CompositeSignal {
    let available: Vec<(&WeightedIndicator, &IndicatorResult)> = config
        .components
        .iter()
        .filter_map(|c| results.get(&c.indicator).map(|r| (c, r)))
        .collect();

    let total: f64 = available.iter().map(|(c, _)| c.weight).sum();

    let components: Vec<ComponentSignal> = available
        .iter()
        .map(|(c, r)| ComponentSignal {
            indicator: c.indicator,
            signal: r.signal_on_or_before(date),
            weight: if total > 0.0 { c.weight / total } else { 0.0 },
        })
        .collect();

    let (raw_value, overridden_by) = resolve(&components);

    CompositeSignal {
        symbol: symbol.to_string(),
        date,
        signal: Signal::from_threshold(raw_value, COMPOSITE_THRESHOLD),
        raw_value,
        overridden_by,
        components,
    }
}
