//! Screening criteria: a closed set of filter kinds combined with AND.

use crate::domain::fundamentals::FundamentalSnapshot;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundamentalMetric {
    MarketCap,
    PeRatio,
    DividendYield,
    RevenueGrowth,
}

impl FundamentalMetric {
    pub fn value_of(self, f: &FundamentalSnapshot) -> Option<f64> {
        match self {
            FundamentalMetric::MarketCap => f.market_cap,
            FundamentalMetric::PeRatio => f.pe_ratio,
            FundamentalMetric::DividendYield => f.dividend_yield,
            FundamentalMetric::RevenueGrowth => f.revenue_growth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Gt => left > right,
            Comparison::Gte => left >= right,
            Comparison::Lt => left < right,
            Comparison::Lte => left <= right,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScreeningFilter {
    FundamentalThreshold {
        metric: FundamentalMetric,
        comparison: Comparison,
        value: f64,
    },
    Sector {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    LiquidityFloor {
        min_avg_dollar_volume: f64,
    },
    QualityScore {
        min_score: f64,
    },
}

impl ScreeningFilter {
    /// A filter whose input value is missing does not pass.
    pub fn passes(&self, f: &FundamentalSnapshot) -> bool {
        match self {
            ScreeningFilter::FundamentalThreshold {
                metric,
                comparison,
                value,
            } => metric
                .value_of(f)
                .is_some_and(|v| comparison.holds(v, *value)),
            ScreeningFilter::Sector { include, exclude } => {
                let included = include.is_empty()
                    || include.iter().any(|s| s.eq_ignore_ascii_case(&f.sector));
                let excluded = exclude.iter().any(|s| s.eq_ignore_ascii_case(&f.sector));
                included && !excluded
            }
            ScreeningFilter::LiquidityFloor {
                min_avg_dollar_volume,
            } => f
                .avg_dollar_volume
                .is_some_and(|v| v >= *min_avg_dollar_volume),
            ScreeningFilter::QualityScore { min_score } => {
                f.quality_score.is_some_and(|q| q >= *min_score)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreeningCriteria {
    #[serde(default)]
    pub filters: Vec<ScreeningFilter>,
    #[serde(default)]
    pub max_members: Option<usize>,
}

impl ScreeningCriteria {
    pub fn new(filters: Vec<ScreeningFilter>) -> Self {
        Self {
            filters,
            max_members: None,
        }
    }

    pub fn with_max_members(mut self, max: usize) -> Self {
        self.max_members = Some(max);
        self
    }

    pub fn matches(&self, f: &FundamentalSnapshot) -> bool {
        self.filters.iter().all(|filter| filter.passes(f))
    }

    /// Apply all filters, then rank by market cap (descending, ties by symbol)
    /// when a member cap is set. Output is ordered by symbol.
    pub fn screen<'a>(&self, population: &'a [FundamentalSnapshot]) -> Vec<&'a FundamentalSnapshot> {
        let mut passing: Vec<&FundamentalSnapshot> =
            population.iter().filter(|f| self.matches(f)).collect();

        if let Some(max) = self.max_members {
            passing.sort_by(|a, b| {
                let ca = a.market_cap.unwrap_or(f64::NEG_INFINITY);
                let cb = b.market_cap.unwrap_or(f64::NEG_INFINITY);
                cb.partial_cmp(&ca)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.symbol.cmp(&b.symbol))
            });
            passing.truncate(max);
        }

        passing.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        passing
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_members == Some(0) {
            return Err("max_members must be positive".into());
        }
        for filter in &self.filters {
            match filter {
                ScreeningFilter::FundamentalThreshold { value, .. } if !value.is_finite() => {
                    return Err("threshold value must be finite".into());
                }
                ScreeningFilter::LiquidityFloor {
                    min_avg_dollar_volume,
                } if *min_avg_dollar_volume < 0.0 => {
                    return Err("min_avg_dollar_volume must be non-negative".into());
                }
                ScreeningFilter::Sector { include, exclude }
                    if include
                        .iter()
                        .any(|s| exclude.iter().any(|e| e.eq_ignore_ascii_case(s))) =>
                {
                    return Err("sector cannot be both included and excluded".into());
                }
                _ => {}
            }
        }
        Ok(())
    }
}
