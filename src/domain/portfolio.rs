//! Portfolio state, snapshots and equity tracking.
//!
//! Positions live in a `BTreeMap` so valuation always sums in symbol order;
//! equity is bit-for-bit reproducible across runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::execution::Fill;
use super::position::{Position, Side};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Immutable view of the portfolio at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub positions: BTreeMap<String, Position>,
    pub equity: f64,
}

impl PortfolioSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |p| p.quantity)
    }

    /// Sum of absolute position values at their last marks.
    pub fn gross_exposure(&self) -> f64 {
        self.positions.values().map(Position::exposure).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_cash: f64,
    positions: BTreeMap<String, Position>,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Self {
        Portfolio {
            cash: initial_cash,
            initial_cash,
            positions: BTreeMap::new(),
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |p| p.quantity)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Update the valuation price of an open position.
    pub fn mark(&mut self, symbol: &str, price: f64) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.last_price = price;
        }
    }

    pub fn equity(&self) -> f64 {
        self.cash + self.positions.values().map(Position::market_value).sum::<f64>()
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp,
            cash: self.cash,
            positions: self.positions.clone(),
            equity: self.equity(),
        }
    }

    /// Settle a fill: move cash, then grow, shrink, close or flip the position.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let notional = fill.quantity as f64 * fill.price;
        match fill.side {
            Side::Buy => self.cash -= notional + fill.commission,
            Side::Sell => self.cash += notional - fill.commission,
        }

        let delta = fill.side.signed_quantity(fill.quantity);
        let current = self.quantity(&fill.symbol);
        let next = current + delta;

        if next == 0 {
            self.positions.remove(&fill.symbol);
            return;
        }

        let average_entry_price = if current == 0 || current.signum() != next.signum() {
            // New position, or flipped through flat: the remainder opened at this fill.
            fill.price
        } else if next.abs() > current.abs() {
            let held = current.unsigned_abs() as f64;
            let added = fill.quantity as f64;
            let prev_avg = self.positions[&fill.symbol].average_entry_price;
            (held * prev_avg + added * fill.price) / (held + added)
        } else {
            self.positions[&fill.symbol].average_entry_price
        };

        self.positions.insert(
            fill.symbol.clone(),
            Position {
                symbol: fill.symbol.clone(),
                quantity: next,
                average_entry_price,
                last_price: fill.price,
            },
        );
    }
}
