//! Positions and trade sides.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn signed_quantity(&self, quantity: i64) -> i64 {
        match self {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    /// Signed; positive is long.
    pub quantity: i64,
    pub average_entry_price: f64,
    /// Most recent mark used for valuation.
    pub last_price: f64,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: i64, average_entry_price: f64) -> Self {
        Position {
            symbol: symbol.into(),
            quantity,
            average_entry_price,
            last_price: average_entry_price,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    /// Signed value at the last mark; shorts are negative.
    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.last_price
    }

    /// Gross value at the last mark.
    pub fn exposure(&self) -> f64 {
        self.quantity.unsigned_abs() as f64 * self.last_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.quantity as f64 * (self.last_price - self.average_entry_price)
    }
}
