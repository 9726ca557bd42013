//! Portfolio state, rebalancing and equity tracking.
//!
//! Holdings are fractional share quantities. A rebalance first liquidates
//! holdings that dropped out of the tradable set (universe-driven), then
//! trades every remaining name to its target weight (strategy-driven).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const QUANTITY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    /// Signed traded value: positive for buys, negative for sells.
    pub value: f64,
    pub price: f64,
    /// Exit forced by the symbol leaving the universe.
    pub forced: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceOutcome {
    pub equity_before: f64,
    pub trades: Vec<TradeRecord>,
    pub forced_exits: Vec<String>,
    pub strategy_traded: f64,
    pub universe_traded: f64,
    pub strategy_cost: f64,
    pub universe_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub holdings: BTreeMap<String, f64>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            holdings: BTreeMap::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn held_symbols(&self) -> BTreeSet<String> {
        self.holdings.keys().cloned().collect()
    }

    pub fn quantity(&self, symbol: &str) -> f64 {
        self.holdings.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn total_equity<F>(&self, price_of: F) -> f64
    where
        F: Fn(&str) -> Option<f64>,
    {
        let position_value: f64 = self
            .holdings
            .iter()
            .filter_map(|(symbol, qty)| price_of(symbol).map(|p| qty * p))
            .sum();
        self.cash + position_value
    }

    /// Post-trade weights by market value.
    pub fn weights<F>(&self, price_of: F) -> BTreeMap<String, f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let equity = self.total_equity(&price_of);
        self.holdings
            .iter()
            .map(|(symbol, qty)| {
                let value = price_of(symbol).map(|p| qty * p).unwrap_or(0.0);
                let weight = if equity > 0.0 { value / equity } else { 0.0 };
                (symbol.clone(), weight)
            })
            .collect()
    }

    pub fn record_equity(&mut self, date: NaiveDate, equity: f64) {
        self.equity_curve.push(EquityPoint { date, equity });
    }

    /// Trade to `targets` (weights on pre-trade equity). Holdings outside
    /// `tradable` are sold first as forced exits. Costs are charged at
    /// `cost_bps` on traded value and taken from cash.
    ///
    /// `price_of` must return a price for every held or targeted symbol;
    /// symbols without one are left untouched.
    pub fn rebalance<F>(
        &mut self,
        targets: &BTreeMap<String, f64>,
        tradable: &BTreeSet<String>,
        price_of: F,
        cost_bps: f64,
    ) -> RebalanceOutcome
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut outcome = RebalanceOutcome {
            equity_before: self.total_equity(&price_of),
            ..RebalanceOutcome::default()
        };

        let leaving: Vec<String> = self
            .holdings
            .keys()
            .filter(|s| !tradable.contains(*s))
            .cloned()
            .collect();
        for symbol in leaving {
            let Some(price) = price_of(&symbol) else {
                continue;
            };
            let qty = self.holdings.remove(&symbol).unwrap_or(0.0);
            let value = qty * price;
            self.cash += value;
            outcome.universe_traded += value.abs();
            outcome.trades.push(TradeRecord {
                symbol: symbol.clone(),
                value: -value,
                price,
                forced: true,
            });
            outcome.forced_exits.push(symbol);
        }

        let symbols: BTreeSet<String> = self
            .holdings
            .keys()
            .chain(targets.keys())
            .cloned()
            .collect();
        for symbol in symbols {
            let Some(price) = price_of(&symbol).filter(|p| *p > 0.0) else {
                continue;
            };
            let weight = targets.get(&symbol).copied().unwrap_or(0.0);
            let target_qty = weight * outcome.equity_before / price;
            let delta = target_qty - self.quantity(&symbol);
            if delta.abs() <= QUANTITY_EPSILON {
                continue;
            }

            let value = delta * price;
            self.cash -= value;
            outcome.strategy_traded += value.abs();
            outcome.trades.push(TradeRecord {
                symbol: symbol.clone(),
                value,
                price,
                forced: false,
            });
            if target_qty.abs() <= QUANTITY_EPSILON {
                self.holdings.remove(&symbol);
            } else {
                self.holdings.insert(symbol, target_qty);
            }
        }

        let rate = cost_bps / 10_000.0;
        outcome.strategy_cost = outcome.strategy_traded * rate;
        outcome.universe_cost = outcome.universe_traded * rate;
        self.cash -= outcome.strategy_cost + outcome.universe_cost;
        outcome
    }
}
