//! Point-in-time fundamental values used by screening.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub sector: String,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub avg_dollar_volume: Option<f64>,
    pub quality_score: Option<f64>,
}

impl FundamentalSnapshot {
    pub fn new(symbol: impl Into<String>, as_of: NaiveDate, sector: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            as_of,
            sector: sector.into(),
            market_cap: None,
            pe_ratio: None,
            dividend_yield: None,
            revenue_growth: None,
            avg_dollar_volume: None,
            quality_score: None,
        }
    }
}
