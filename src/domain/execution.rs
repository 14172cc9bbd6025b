//! Fill simulation: slippage, commission and order sizing.
//!
//! Every fill executes at the bar close, moved against the trade direction by
//! the configured number of basis points.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::EngineError;
use super::position::Side;

const SECTION: &str = "backtest";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    /// Execution price after slippage.
    pub price: f64,
    pub commission: f64,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CommissionModel {
    #[default]
    None,
    /// Fixed fee per fill.
    Flat { fee: f64 },
    /// Rate per share, never less than `minimum` per fill.
    PerShare { rate: f64, minimum: f64 },
    /// Percentage of notional.
    Percent { pct: f64 },
}

impl CommissionModel {
    pub fn commission(&self, quantity: i64, price: f64) -> f64 {
        match *self {
            CommissionModel::None => 0.0,
            CommissionModel::Flat { fee } => fee,
            CommissionModel::PerShare { rate, minimum } => {
                (quantity.unsigned_abs() as f64 * rate).max(minimum)
            }
            CommissionModel::Percent { pct } => {
                quantity.unsigned_abs() as f64 * price * pct / 100.0
            }
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let fields: &[(&str, f64)] = match self {
            CommissionModel::None => &[],
            CommissionModel::Flat { fee } => &[("commission_fee", *fee)],
            CommissionModel::PerShare { rate, minimum } => &[
                ("commission_rate", *rate),
                ("commission_minimum", *minimum),
            ],
            CommissionModel::Percent { pct } => &[("commission_pct", *pct)],
        };
        for (key, value) in fields {
            if !value.is_finite() || *value < 0.0 {
                return Err(EngineError::invalid(
                    SECTION,
                    key,
                    format!("must be a non-negative number, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub commission: CommissionModel,
    pub slippage_bps: f64,
    pub allow_shorting: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission: CommissionModel::None,
            slippage_bps: 5.0,
            allow_shorting: false,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.commission.validate()?;
        let bps = self.slippage_bps;
        if !bps.is_finite() || !(0.0..10_000.0).contains(&bps) {
            return Err(EngineError::invalid(
                SECTION,
                "slippage_bps",
                format!("must be in [0, 10000), got {}", self.slippage_bps),
            ));
        }
        Ok(())
    }
}

/// Buys pay up, sells receive less.
pub fn apply_slippage(market_price: f64, side: Side, slippage_bps: f64) -> f64 {
    market_price * (1.0 + side.sign() * slippage_bps / 10_000.0)
}

pub fn simulate_fill(
    symbol: &str,
    side: Side,
    quantity: i64,
    market_price: f64,
    timestamp: DateTime<Utc>,
    config: &ExecutionConfig,
) -> Fill {
    let price = apply_slippage(market_price, side, config.slippage_bps);
    Fill {
        symbol: symbol.to_string(),
        side,
        quantity,
        price,
        commission: config.commission.commission(quantity, price),
        timestamp,
    }
}

/// Whole-share quantity for a decision.
///
/// Buys cover an open short, otherwise spend `position_size_percent` of
/// equity. Sells close an open long, or open a sized short when shorting is
/// allowed. Returns 0 when nothing should trade.
pub fn size_order(
    side: Side,
    held: i64,
    equity: f64,
    execution_price: f64,
    position_size_percent: f64,
    allow_shorting: bool,
) -> i64 {
    let sized = || {
        if execution_price <= 0.0 || equity <= 0.0 {
            return 0;
        }
        (equity * position_size_percent / 100.0 / execution_price).floor() as i64
    };
    match side {
        Side::Buy if held < 0 => -held,
        Side::Buy => sized(),
        Side::Sell if held > 0 => held,
        Side::Sell if held == 0 && allow_shorting => sized(),
        Side::Sell => 0,
    }
}
