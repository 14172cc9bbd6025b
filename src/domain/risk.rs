//! Pre-trade risk validation.
//!
//! [`validate`] is a pure function of the trade, a portfolio snapshot and the
//! day counters. Every rule is evaluated and every violation reported, in rule
//! order. A value sitting exactly on a limit is a violation.
//!
//! [`RiskValidator`] wraps it with the per-day bookkeeping: the UTC trading
//! day, the equity the day started with and the number of fills so far.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;

use super::error::EngineError;
use super::portfolio::PortfolioSnapshot;
use super::position::Side;

const SECTION: &str = "risk";

#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    /// Largest single-trade notional, as a percent of equity.
    pub max_position_size_percent: f64,
    /// Drawdown from day-start equity at which buys stop for the day.
    pub max_daily_loss_percent: f64,
    /// Largest gross exposure after a trade, as a percent of equity.
    pub max_portfolio_exposure_percent: f64,
    pub max_trades_per_day: u32,
    pub min_confidence_percent: f64,
    /// Retry oversized trades with the largest quantity that fits.
    pub size_down: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            max_position_size_percent: 20.0,
            max_daily_loss_percent: 2.0,
            max_portfolio_exposure_percent: 80.0,
            max_trades_per_day: 10,
            min_confidence_percent: 30.0,
            size_down: false,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (key, value) in [
            ("max_position_size_percent", self.max_position_size_percent),
            ("max_daily_loss_percent", self.max_daily_loss_percent),
            (
                "max_portfolio_exposure_percent",
                self.max_portfolio_exposure_percent,
            ),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(EngineError::invalid(
                    SECTION,
                    key,
                    format!("must be a positive percentage, got {value}"),
                ));
            }
        }
        if !(0.0..=100.0).contains(&self.min_confidence_percent) {
            return Err(EngineError::invalid(
                SECTION,
                "min_confidence_percent",
                format!("must be in [0, 100], got {}", self.min_confidence_percent),
            ));
        }
        if self.max_trades_per_day == 0 {
            return Err(EngineError::invalid(
                SECTION,
                "max_trades_per_day",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskViolation {
    PositionSize,
    DailyLoss,
    PortfolioExposure,
    TradeFrequency,
    Confidence,
}

impl RiskViolation {
    pub fn code(&self) -> &'static str {
        match self {
            RiskViolation::PositionSize => "POSITION_SIZE_LIMIT",
            RiskViolation::DailyLoss => "DAILY_LOSS_LIMIT",
            RiskViolation::PortfolioExposure => "PORTFOLIO_EXPOSURE_LIMIT",
            RiskViolation::TradeFrequency => "TRADE_FREQUENCY_LIMIT",
            RiskViolation::Confidence => "CONFIDENCE_THRESHOLD",
        }
    }

    fn depends_on_quantity(&self) -> bool {
        matches!(
            self,
            RiskViolation::PositionSize | RiskViolation::PortfolioExposure
        )
    }
}

impl fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposedTrade {
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub reference_price: f64,
    /// 0-100.
    pub confidence: f64,
    pub rationale: String,
}

impl ProposedTrade {
    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.reference_price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskVerdict {
    pub approved: bool,
    pub reasons: Vec<RiskViolation>,
    /// Set when the trade was approved only after sizing down.
    pub adjusted_quantity: Option<i64>,
}

impl RiskVerdict {
    /// Quantity to execute, if any.
    pub fn approved_quantity(&self, requested: i64) -> Option<i64> {
        self.approved
            .then(|| self.adjusted_quantity.unwrap_or(requested))
    }

    pub fn reason_codes(&self) -> Vec<&'static str> {
        self.reasons.iter().map(RiskViolation::code).collect()
    }
}

/// Check a proposed trade against every rule.
pub fn validate(
    trade: &ProposedTrade,
    portfolio: &PortfolioSnapshot,
    day_start_equity: f64,
    trades_today: u32,
    limits: &RiskLimits,
) -> RiskVerdict {
    let mut reasons = sized_violations(trade, trade.quantity, portfolio, limits);

    if trade.side == Side::Buy && day_start_equity > 0.0 {
        let change = (portfolio.equity - day_start_equity) / day_start_equity;
        if change <= -limits.max_daily_loss_percent / 100.0 {
            reasons.push(RiskViolation::DailyLoss);
        }
    }
    if trades_today >= limits.max_trades_per_day {
        reasons.push(RiskViolation::TradeFrequency);
    }
    if trade.confidence < limits.min_confidence_percent {
        reasons.push(RiskViolation::Confidence);
    }
    reasons.sort_by_key(|r| *r as u8);

    if reasons.is_empty() {
        return RiskVerdict {
            approved: true,
            reasons,
            adjusted_quantity: None,
        };
    }

    if limits.size_down && reasons.iter().all(RiskViolation::depends_on_quantity) {
        if let Some(quantity) = largest_passing_quantity(trade, portfolio, limits) {
            return RiskVerdict {
                approved: true,
                reasons: Vec::new(),
                adjusted_quantity: Some(quantity),
            };
        }
    }

    RiskVerdict {
        approved: false,
        reasons,
        adjusted_quantity: None,
    }
}

/// The position-size and exposure rules for `trade` executed at `quantity`.
fn sized_violations(
    trade: &ProposedTrade,
    quantity: i64,
    portfolio: &PortfolioSnapshot,
    limits: &RiskLimits,
) -> Vec<RiskViolation> {
    let mut reasons = Vec::new();
    let equity = portfolio.equity;
    let price = trade.reference_price;
    let held = portfolio.quantity(&trade.symbol);
    let after = held + trade.side.signed_quantity(quantity);

    let position_limit = limits.max_position_size_percent / 100.0 * equity;
    let checked_notional = match trade.side {
        // Covering a short only reduces risk.
        Side::Buy if after <= 0 => None,
        Side::Buy => Some(quantity as f64 * price),
        Side::Sell if after < 0 && after < held => Some(after.unsigned_abs() as f64 * price),
        Side::Sell => None,
    };
    if checked_notional.is_some_and(|notional| notional >= position_limit) {
        reasons.push(RiskViolation::PositionSize);
    }

    let this_before = portfolio
        .position(&trade.symbol)
        .map_or(0.0, |p| p.exposure());
    let gross_before = portfolio.gross_exposure();
    let gross_after = gross_before - this_before + after.unsigned_abs() as f64 * price;
    let exposure_limit = limits.max_portfolio_exposure_percent / 100.0 * equity;
    if after.unsigned_abs() > held.unsigned_abs() && gross_after >= exposure_limit {
        reasons.push(RiskViolation::PortfolioExposure);
    }

    reasons
}

/// Binary search for the largest quantity below the requested one that clears
/// both size rules. Passing quantities form a prefix of `1..requested`.
fn largest_passing_quantity(
    trade: &ProposedTrade,
    portfolio: &PortfolioSnapshot,
    limits: &RiskLimits,
) -> Option<i64> {
    let passes = |q: i64| sized_violations(trade, q, portfolio, limits).is_empty();
    if trade.quantity <= 1 || !passes(1) {
        return None;
    }
    let (mut lo, mut hi) = (1, trade.quantity - 1);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if passes(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some(lo)
}

/// Day-aware wrapper around [`validate`].
#[derive(Debug, Clone)]
pub struct RiskValidator {
    limits: RiskLimits,
    current_day: Option<NaiveDate>,
    day_start_equity: f64,
    trades_today: u32,
}

impl RiskValidator {
    pub fn new(limits: RiskLimits) -> Result<Self, EngineError> {
        limits.validate()?;
        Ok(RiskValidator {
            limits,
            current_day: None,
            day_start_equity: 0.0,
            trades_today: 0,
        })
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn day_start_equity(&self) -> f64 {
        self.day_start_equity
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    /// Start a new trading day when `timestamp` falls on a new UTC date.
    /// `equity` is the equity at the close of the previous step.
    pub fn roll_day(&mut self, timestamp: DateTime<Utc>, equity: f64) -> bool {
        let day = timestamp.date_naive();
        if self.current_day == Some(day) {
            return false;
        }
        self.current_day = Some(day);
        self.day_start_equity = equity;
        self.trades_today = 0;
        true
    }

    pub fn check(&self, trade: &ProposedTrade, portfolio: &PortfolioSnapshot) -> RiskVerdict {
        validate(
            trade,
            portfolio,
            self.day_start_equity,
            self.trades_today,
            &self.limits,
        )
    }

    pub fn record_fill(&mut self) {
        self.trades_today += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Position;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    fn snapshot(cash: f64, positions: &[(&str, i64, f64)]) -> PortfolioSnapshot {
        let positions: BTreeMap<String, Position> = positions
            .iter()
            .map(|&(symbol, quantity, price)| (symbol.to_string(), Position::new(symbol, quantity, price)))
            .collect();
        let equity = cash + positions.values().map(Position::market_value).sum::<f64>();
        PortfolioSnapshot {
            timestamp: ts(10),
            cash,
            positions,
            equity,
        }
    }

    fn trade(side: Side, quantity: i64, price: f64) -> ProposedTrade {
        ProposedTrade {
            symbol: "BHP".into(),
            side,
            quantity,
            reference_price: price,
            confidence: 80.0,
            rationale: "test".into(),
        }
    }

    fn loose_limits() -> RiskLimits {
        RiskLimits {
            max_position_size_percent: 10.0,
            max_daily_loss_percent: 2.0,
            max_portfolio_exposure_percent: 100.0,
            max_trades_per_day: 5,
            min_confidence_percent: 50.0,
            size_down: false,
        }
    }

    #[test]
    fn position_size_boundary_rejects_exactly_at_limit() {
        let portfolio = snapshot(100_000.0, &[]);
        // 10% of 100k = 10k; 100 shares at $100 sits exactly on the limit.
        let verdict = validate(&trade(Side::Buy, 100, 100.0), &portfolio, 100_000.0, 0, &loose_limits());
        assert!(!verdict.approved);
        assert_eq!(verdict.reasons, vec![RiskViolation::PositionSize]);
    }

    #[test]
    fn position_size_one_unit_below_approves() {
        let portfolio = snapshot(100_000.0, &[]);
        let verdict = validate(&trade(Side::Buy, 99, 100.0), &portfolio, 100_000.0, 0, &loose_limits());
        assert!(verdict.approved);
        assert!(verdict.reasons.is_empty());
        assert_eq!(verdict.approved_quantity(99), Some(99));
    }

    #[test]
    fn closing_a_long_is_never_size_limited() {
        let portfolio = snapshot(50_000.0, &[("BHP", 500, 100.0)]);
        let verdict = validate(&trade(Side::Sell, 500, 100.0), &portfolio, 100_000.0, 0, &loose_limits());
        assert!(verdict.approved, "{:?}", verdict.reasons);
    }

    #[test]
    fn growing_short_checks_resulting_position() {
        let portfolio = snapshot(100_000.0, &[]);
        let verdict = validate(&trade(Side::Sell, 100, 100.0), &portfolio, 100_000.0, 0, &loose_limits());
        assert_eq!(verdict.reasons, vec![RiskViolation::PositionSize]);
    }

    #[test]
    fn daily_loss_blocks_buys_only() {
        // Day started at 100k, now at 97k: a 3% drop against a 2% limit.
        let portfolio = snapshot(97_000.0, &[]);
        let buy = validate(&trade(Side::Buy, 10, 100.0), &portfolio, 100_000.0, 0, &loose_limits());
        assert_eq!(buy.reasons, vec![RiskViolation::DailyLoss]);

        let held = snapshot(96_000.0, &[("BHP", 10, 100.0)]);
        let sell = validate(&trade(Side::Sell, 10, 100.0), &held, 100_000.0, 0, &loose_limits());
        assert!(sell.approved);
    }

    #[test]
    fn daily_loss_boundary_rejects() {
        let portfolio = snapshot(98_000.0, &[]);
        let verdict = validate(&trade(Side::Buy, 10, 100.0), &portfolio, 100_000.0, 0, &loose_limits());
        assert_eq!(verdict.reasons, vec![RiskViolation::DailyLoss]);

        let portfolio = snapshot(98_001.0, &[]);
        let verdict = validate(&trade(Side::Buy, 10, 100.0), &portfolio, 100_000.0, 0, &loose_limits());
        assert!(verdict.approved);
    }

    #[test]
    fn exposure_counts_existing_positions() {
        let mut limits = loose_limits();
        limits.max_portfolio_exposure_percent = 50.0;
        limits.max_position_size_percent = 100.0;
        let portfolio = snapshot(60_000.0, &[("CBA", 400, 100.0)]);
        // 40k held + 10k new = 50k, exactly half of 100k equity.
        let verdict = validate(&trade(Side::Buy, 100, 100.0), &portfolio, 100_000.0, 0, &limits);
        assert_eq!(verdict.reasons, vec![RiskViolation::PortfolioExposure]);

        let verdict = validate(&trade(Side::Buy, 99, 100.0), &portfolio, 100_000.0, 0, &limits);
        assert!(verdict.approved);
    }

    #[test]
    fn exposure_ignored_for_reducing_trades() {
        let mut limits = loose_limits();
        limits.max_portfolio_exposure_percent = 10.0;
        let portfolio = snapshot(0.0, &[("BHP", 1000, 100.0)]);
        let verdict = validate(&trade(Side::Sell, 200, 100.0), &portfolio, 100_000.0, 0, &limits);
        assert!(verdict.approved);
    }

    #[test]
    fn frequency_limit_at_count() {
        let portfolio = snapshot(100_000.0, &[]);
        let verdict = validate(&trade(Side::Buy, 10, 100.0), &portfolio, 100_000.0, 5, &loose_limits());
        assert_eq!(verdict.reasons, vec![RiskViolation::TradeFrequency]);
        let verdict = validate(&trade(Side::Buy, 10, 100.0), &portfolio, 100_000.0, 4, &loose_limits());
        assert!(verdict.approved);
    }

    #[test]
    fn confidence_threshold_is_strict() {
        let portfolio = snapshot(100_000.0, &[]);
        let mut t = trade(Side::Buy, 10, 100.0);
        t.confidence = 50.0;
        assert!(validate(&t, &portfolio, 100_000.0, 0, &loose_limits()).approved);
        t.confidence = 49.9;
        let verdict = validate(&t, &portfolio, 100_000.0, 0, &loose_limits());
        assert_eq!(verdict.reason_codes(), vec!["CONFIDENCE_THRESHOLD"]);
    }

    #[test]
    fn all_violations_collected_in_rule_order() {
        let mut limits = loose_limits();
        limits.max_portfolio_exposure_percent = 5.0;
        let portfolio = snapshot(97_000.0, &[]);
        let mut t = trade(Side::Buy, 500, 100.0);
        t.confidence = 10.0;
        let verdict = validate(&t, &portfolio, 100_000.0, 9, &limits);
        assert_eq!(
            verdict.reason_codes(),
            vec![
                "POSITION_SIZE_LIMIT",
                "DAILY_LOSS_LIMIT",
                "PORTFOLIO_EXPOSURE_LIMIT",
                "TRADE_FREQUENCY_LIMIT",
                "CONFIDENCE_THRESHOLD",
            ]
        );
        assert!(!verdict.approved);
    }

    #[test]
    fn size_down_finds_largest_fitting_quantity() {
        let mut limits = loose_limits();
        limits.size_down = true;
        let portfolio = snapshot(100_000.0, &[]);
        let verdict = validate(&trade(Side::Buy, 250, 100.0), &portfolio, 100_000.0, 0, &limits);
        assert!(verdict.approved);
        assert!(verdict.reasons.is_empty());
        assert_eq!(verdict.adjusted_quantity, Some(99));
        assert_eq!(verdict.approved_quantity(250), Some(99));
    }

    #[test]
    fn size_down_does_not_override_other_rules() {
        let mut limits = loose_limits();
        limits.size_down = true;
        let portfolio = snapshot(100_000.0, &[]);
        let verdict = validate(&trade(Side::Buy, 250, 100.0), &portfolio, 100_000.0, 5, &limits);
        assert!(!verdict.approved);
        assert_eq!(
            verdict.reasons,
            vec![RiskViolation::PositionSize, RiskViolation::TradeFrequency]
        );
    }

    #[test]
    fn size_down_gives_up_when_one_share_is_too_much() {
        let mut limits = loose_limits();
        limits.size_down = true;
        let portfolio = snapshot(1_000.0, &[]);
        let verdict = validate(&trade(Side::Buy, 3, 500.0), &portfolio, 1_000.0, 0, &limits);
        assert!(!verdict.approved);
        assert_eq!(verdict.adjusted_quantity, None);
    }

    #[test]
    fn invalid_limits_rejected() {
        let limits = RiskLimits {
            max_daily_loss_percent: -1.0,
            ..RiskLimits::default()
        };
        assert!(RiskValidator::new(limits).is_err());

        let limits = RiskLimits {
            min_confidence_percent: 120.0,
            ..RiskLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn validator_rolls_day_and_counts_fills() {
        let mut validator = RiskValidator::new(loose_limits()).unwrap();
        assert!(validator.roll_day(ts(10), 100_000.0));
        validator.record_fill();
        validator.record_fill();
        assert!(!validator.roll_day(ts(14), 95_000.0));
        assert_eq!(validator.trades_today(), 2);
        assert_eq!(validator.day_start_equity(), 100_000.0);

        let next_day = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        assert!(validator.roll_day(next_day, 95_000.0));
        assert_eq!(validator.trades_today(), 0);
        assert_eq!(validator.day_start_equity(), 95_000.0);
    }

    #[test]
    fn validator_check_uses_day_state() {
        let mut validator = RiskValidator::new(loose_limits()).unwrap();
        validator.roll_day(ts(9), 100_000.0);
        let verdict = validator.check(&trade(Side::Buy, 10, 100.0), &snapshot(97_000.0, &[]));
        assert_eq!(verdict.reasons, vec![RiskViolation::DailyLoss]);
    }
}
