//! Performance metrics, computed after a run from the equity curve and the
//! fill ledger only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::execution::Fill;
use super::portfolio::EquityPoint;
use super::position::Side;

/// A position opened from flat and closed back to flat, rebuilt from fills.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTrip {
    pub symbol: String,
    /// `Buy` for a long trip, `Sell` for a short one.
    pub direction: Side,
    pub quantity: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub commission: f64,
    /// Net of commission.
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub initial_cash: f64,
    pub final_equity: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub total_return: f64,
    pub annualized_return: f64,
    pub max_drawdown: f64,
    /// Longest run of steps spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub win_rate: f64,
    /// Number of fills.
    pub trade_count: usize,
    pub round_trips: Vec<RoundTrip>,
    pub total_commission: f64,
}

impl PerformanceReport {
    pub fn compute(
        initial_cash: f64,
        equity_curve: &[EquityPoint],
        fills: &[Fill],
        bars_per_year: f64,
        risk_free_rate: f64,
    ) -> Self {
        let final_equity = equity_curve.last().map_or(initial_cash, |p| p.equity);

        let total_return = if initial_cash > 0.0 {
            final_equity / initial_cash - 1.0
        } else {
            0.0
        };

        let years = equity_curve.len() as f64 / bars_per_year;
        let annualized_return = if years > 0.0 && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let period_rf = risk_free_rate / bars_per_year;
        let (sharpe_ratio, sortino_ratio) =
            compute_risk_adjusted(equity_curve, period_rf, bars_per_year);

        let round_trips = round_trips(fills);
        let win_rate = if round_trips.is_empty() {
            0.0
        } else {
            round_trips.iter().filter(|t| t.pnl > 0.0).count() as f64 / round_trips.len() as f64
        };

        PerformanceReport {
            initial_cash,
            final_equity,
            equity_curve: equity_curve.to_vec(),
            total_return,
            annualized_return,
            max_drawdown,
            max_drawdown_duration,
            sharpe_ratio,
            sortino_ratio,
            win_rate,
            trade_count: fills.len(),
            total_commission: fills.iter().map(|f| f.commission).sum(),
            round_trips,
        }
    }
}

/// Largest fractional peak-to-trough decline, and the longest underwater run.
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut underwater = 0usize;
    let mut max_underwater = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            underwater = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
            underwater += 1;
            max_underwater = max_underwater.max(underwater);
        }
    }

    (max_dd, max_underwater)
}

/// Sharpe and Sortino over per-step returns, annualized by `periods_per_year`.
fn compute_risk_adjusted(
    equity_curve: &[EquityPoint],
    period_rf: f64,
    periods_per_year: f64,
) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > 0.0 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let stddev = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
    let excess = mean - period_rf;
    let annualize = periods_per_year.sqrt();

    let sharpe = if stddev > 0.0 {
        excess / stddev * annualize
    } else {
        0.0
    };

    let downside = (returns
        .iter()
        .filter(|&&r| r < period_rf)
        .map(|&r| (r - period_rf).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();
    let sortino = if downside > 0.0 {
        excess / downside * annualize
    } else {
        0.0
    };

    (sharpe, sortino)
}

#[derive(Debug)]
struct OpenTrip {
    position: i64,
    average_price: f64,
    entry_quantity: i64,
    exit_quantity: i64,
    exit_notional: f64,
    gross_pnl: f64,
    commission: f64,
    opened_at: DateTime<Utc>,
}

impl OpenTrip {
    fn open(quantity: i64, price: f64, commission: f64, at: DateTime<Utc>) -> Self {
        OpenTrip {
            position: quantity,
            average_price: price,
            entry_quantity: quantity.abs(),
            exit_quantity: 0,
            exit_notional: 0.0,
            gross_pnl: 0.0,
            commission,
            opened_at: at,
        }
    }

    fn close(self, symbol: &str, closed_at: DateTime<Utc>) -> RoundTrip {
        RoundTrip {
            symbol: symbol.to_string(),
            direction: if self.position > 0 { Side::Buy } else { Side::Sell },
            quantity: self.entry_quantity,
            entry_price: self.average_price,
            exit_price: self.exit_notional / self.exit_quantity as f64,
            opened_at: self.opened_at,
            closed_at,
            commission: self.commission,
            pnl: self.gross_pnl - self.commission,
        }
    }
}

/// Rebuild flat-to-flat trips per symbol from the ledger. Average-cost basis;
/// a fill that flips the position closes one trip and opens the next, with its
/// commission split by quantity. Trips still open at the end are not reported.
pub fn round_trips(fills: &[Fill]) -> Vec<RoundTrip> {
    let mut open: BTreeMap<&str, OpenTrip> = BTreeMap::new();
    let mut closed = Vec::new();

    for fill in fills {
        let signed = fill.side.signed_quantity(fill.quantity);
        if signed == 0 {
            continue;
        }

        let Some(trip) = open.get_mut(fill.symbol.as_str()) else {
            open.insert(
                fill.symbol.as_str(),
                OpenTrip::open(signed, fill.price, fill.commission, fill.timestamp),
            );
            continue;
        };

        if trip.position.signum() == signed.signum() {
            let held = trip.position.abs() as f64;
            let added = signed.abs() as f64;
            trip.average_price = (held * trip.average_price + added * fill.price) / (held + added);
            trip.position += signed;
            trip.entry_quantity += signed.abs();
            trip.commission += fill.commission;
            continue;
        }

        let closing = signed.abs().min(trip.position.abs());
        let remainder = signed.abs() - closing;
        let closing_share = closing as f64 / signed.abs() as f64;

        trip.gross_pnl +=
            closing as f64 * (fill.price - trip.average_price) * trip.position.signum() as f64;
        trip.exit_quantity += closing;
        trip.exit_notional += closing as f64 * fill.price;
        trip.commission += fill.commission * closing_share;

        let still_open = trip.position.abs() > closing;
        if still_open {
            trip.position += signed;
            continue;
        }

        if let Some(trip) = open.remove(fill.symbol.as_str()) {
            closed.push(trip.close(&fill.symbol, fill.timestamp));
        }
        if remainder > 0 {
            open.insert(
                fill.symbol.as_str(),
                OpenTrip::open(
                    remainder * signed.signum(),
                    fill.price,
                    fill.commission * (1.0 - closing_share),
                    fill.timestamp,
                ),
            );
        }
    }

    closed
}
