//! Portfolio construction strategies.
//!
//! A strategy maps the tradable set on a rebalance date to target weights.
//! Weights sum to one, or to zero when the strategy chooses to hold cash.

use crate::domain::dataset::CompleteDataset;
use crate::domain::error::VantageError;
use crate::domain::indicator::Signal;
use crate::domain::signal::CompositeConfig;
use crate::domain::snapshot::UniverseSnapshot;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_MAX_POSITIONS: usize = 20;

fn default_max_positions() -> usize {
    DEFAULT_MAX_POSITIONS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// 1/n across the tradable set.
    #[default]
    EqualWeight,
    /// Snapshot inclusion weights, renormalized over the tradable set.
    SnapshotWeighted,
    /// Hold names whose composite signal is Buy; keep existing holdings
    /// until they turn Sell.
    CompositeSignal {
        #[serde(default = "default_max_positions")]
        max_positions: usize,
        #[serde(default)]
        composite: CompositeConfig,
    },
}

/// Everything a strategy may look at on one rebalance date.
pub struct StrategyContext<'a> {
    pub date: NaiveDate,
    /// Sorted.
    pub tradable: &'a [String],
    pub snapshot: &'a UniverseSnapshot,
    pub dataset: &'a CompleteDataset,
    pub held: &'a BTreeSet<String>,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::EqualWeight => "equal_weight",
            Strategy::SnapshotWeighted => "snapshot_weighted",
            Strategy::CompositeSignal { .. } => "composite_signal",
        }
    }

    pub fn validate(&self) -> Result<(), VantageError> {
        if let Strategy::CompositeSignal {
            max_positions,
            composite,
        } = self
        {
            if *max_positions == 0 {
                return Err(VantageError::invalid("max_positions must be positive"));
            }
            composite.validate()?;
        }
        Ok(())
    }

    pub fn target_weights(&self, ctx: &StrategyContext<'_>) -> Result<BTreeMap<String, f64>, String> {
        match self {
            Strategy::EqualWeight => Ok(equal_weights(ctx.tradable.iter())),
            Strategy::SnapshotWeighted => {
                let raw: Vec<(&String, f64)> = ctx
                    .tradable
                    .iter()
                    .map(|s| (s, ctx.snapshot.weight_of(s).unwrap_or(0.0)))
                    .collect();
                let total: f64 = raw.iter().map(|(_, w)| w).sum();
                if total <= 0.0 {
                    return Ok(equal_weights(ctx.tradable.iter()));
                }
                Ok(raw
                    .into_iter()
                    .map(|(s, w)| (s.clone(), w / total))
                    .collect())
            }
            Strategy::CompositeSignal {
                max_positions,
                composite,
            } => {
                let mut candidates: Vec<(&String, f64)> = Vec::new();
                for symbol in ctx.tradable {
                    let series = ctx
                        .dataset
                        .series(symbol)
                        .ok_or_else(|| format!("no series for tradable symbol {symbol}"))?;
                    let signal = series.composite_at(ctx.date, composite);
                    let keep = match signal.signal {
                        Signal::Buy => true,
                        Signal::Hold => ctx.held.contains(symbol),
                        Signal::Sell => false,
                    };
                    if keep {
                        candidates.push((symbol, signal.raw_value));
                    }
                }
                candidates.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                candidates.truncate(*max_positions);
                Ok(equal_weights(candidates.into_iter().map(|(s, _)| s)))
            }
        }
    }
}

fn equal_weights<'a>(symbols: impl Iterator<Item = &'a String>) -> BTreeMap<String, f64> {
    let symbols: Vec<&String> = symbols.collect();
    if symbols.is_empty() {
        return BTreeMap::new();
    }
    let w = 1.0 / symbols.len() as f64;
    symbols.into_iter().map(|s| (s.clone(), w)).collect()
}
