//! Backtest simulator.
//!
//! Bars from every symbol are merged into one chronological timeline. Each
//! step handles one timestamp: symbols with a bar there are marked, their
//! streaming indicator state is extended by that bar alone, and any decision
//! is sized, risk-checked and filled before the step's equity is recorded.
//! A symbol without a bar at a timestamp is simply skipped for that step.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use super::error::EngineError;
use super::execution::{ExecutionConfig, Fill, apply_slippage, simulate_fill, size_order};
use super::fusion::{Action, DecisionSource, FusionPolicy, TechnicalDecisions};
use super::indicator::{IndicatorConfig, IndicatorState};
use super::metrics::PerformanceReport;
use super::ohlcv::{Bar, validate_series};
use super::portfolio::{EquityPoint, Portfolio, PortfolioSnapshot};
use super::position::Side;
use super::risk::{ProposedTrade, RiskLimits, RiskValidator, RiskViolation};

const SECTION: &str = "backtest";

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_cash: f64,
    /// Share of equity committed by each new buy (or short), in percent.
    pub position_size_percent: f64,
    /// Steps per year, used to annualize returns and ratios.
    pub bars_per_year: f64,
    pub risk_free_rate: f64,
    pub indicators: IndicatorConfig,
    pub fusion: FusionPolicy,
    pub risk: RiskLimits,
    pub execution: ExecutionConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_cash: 100_000.0,
            position_size_percent: 10.0,
            bars_per_year: 252.0,
            risk_free_rate: 0.0,
            indicators: IndicatorConfig::default(),
            fusion: FusionPolicy::default(),
            risk: RiskLimits::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.initial_cash > 0.0 && self.initial_cash.is_finite()) {
            return Err(EngineError::invalid(
                SECTION,
                "initial_cash",
                format!("must be positive, got {}", self.initial_cash),
            ));
        }
        if !(self.position_size_percent > 0.0 && self.position_size_percent <= 100.0) {
            return Err(EngineError::invalid(
                SECTION,
                "position_size_percent",
                format!("must be in (0, 100], got {}", self.position_size_percent),
            ));
        }
        if !(self.bars_per_year > 0.0 && self.bars_per_year.is_finite()) {
            return Err(EngineError::invalid(
                SECTION,
                "bars_per_year",
                format!("must be positive, got {}", self.bars_per_year),
            ));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::invalid(
                SECTION,
                "risk_free_rate",
                "must be a finite number",
            ));
        }
        self.indicators.validate()?;
        self.fusion.validate()?;
        self.risk.validate()?;
        self.execution.validate()
    }
}

/// A trade the risk validator turned down.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedTrade {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub confidence: f64,
    pub reasons: Vec<RiskViolation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub report: PerformanceReport,
    pub fills: Vec<Fill>,
    pub rejections: Vec<RejectedTrade>,
    pub final_snapshot: PortfolioSnapshot,
}

/// One symbol's bars with a read cursor and its indicator state.
#[derive(Debug)]
struct SymbolStream {
    bars: Vec<Bar>,
    next: usize,
    state: IndicatorState,
}

impl SymbolStream {
    /// Take the next bar if it falls exactly on `timestamp`.
    fn take_at(&mut self, timestamp: DateTime<Utc>) -> Option<Bar> {
        let bar = self.bars.get(self.next)?;
        if bar.timestamp != timestamp {
            return None;
        }
        self.next += 1;
        Some(bar.clone())
    }
}

/// Sorted union of every bar timestamp across symbols.
pub fn build_unified_timeline(series: &BTreeMap<String, Vec<Bar>>) -> Vec<DateTime<Utc>> {
    let unique: BTreeSet<DateTime<Utc>> = series
        .values()
        .flat_map(|bars| bars.iter().map(|bar| bar.timestamp))
        .collect();
    unique.into_iter().collect()
}

pub struct BacktestSimulator<D: DecisionSource = TechnicalDecisions> {
    config: BacktestConfig,
    decisions: D,
    streams: BTreeMap<String, SymbolStream>,
    timeline: Vec<DateTime<Utc>>,
    cursor: usize,
    portfolio: Portfolio,
    risk: RiskValidator,
    fills: Vec<Fill>,
    rejections: Vec<RejectedTrade>,
    equity_curve: Vec<EquityPoint>,
}

impl BacktestSimulator<TechnicalDecisions> {
    /// Simulator driven by technical-only fusion with the configured policy.
    pub fn technical(
        config: BacktestConfig,
        series: BTreeMap<String, Vec<Bar>>,
    ) -> Result<Self, EngineError> {
        let decisions = TechnicalDecisions::new(config.fusion.clone());
        BacktestSimulator::new(config, series, decisions)
    }
}

impl<D: DecisionSource> BacktestSimulator<D> {
    /// Validates the configuration and every bar series before any step runs.
    pub fn new(
        config: BacktestConfig,
        series: BTreeMap<String, Vec<Bar>>,
        decisions: D,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        for (symbol, bars) in &series {
            validate_series(bars)?;
            if let Some(bar) = bars.iter().find(|bar| &bar.symbol != symbol) {
                return Err(EngineError::DataIntegrity {
                    symbol: symbol.clone(),
                    timestamp: bar.timestamp,
                    reason: format!("bar for '{}' filed under '{symbol}'", bar.symbol),
                });
            }
        }

        let timeline = build_unified_timeline(&series);
        let streams = series
            .into_iter()
            .map(|(symbol, bars)| {
                let state = IndicatorState::new(symbol.clone(), &config.indicators);
                (
                    symbol,
                    SymbolStream {
                        bars,
                        next: 0,
                        state,
                    },
                )
            })
            .collect();

        Ok(BacktestSimulator {
            portfolio: Portfolio::new(config.initial_cash),
            risk: RiskValidator::new(config.risk.clone())?,
            decisions,
            streams,
            timeline,
            cursor: 0,
            fills: Vec::new(),
            rejections: Vec::new(),
            equity_curve: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn rejections(&self) -> &[RejectedTrade] {
        &self.rejections
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.timeline.len()
    }

    pub fn remaining_steps(&self) -> usize {
        self.timeline.len().saturating_sub(self.cursor)
    }

    /// Process the next timestamp. Returns `None` once the timeline is exhausted.
    pub fn step(&mut self) -> Result<Option<EquityPoint>, EngineError> {
        let Some(&timestamp) = self.timeline.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let previous_equity = self
            .equity_curve
            .last()
            .map_or(self.config.initial_cash, |p| p.equity);
        if self.risk.roll_day(timestamp, previous_equity) {
            debug!(%timestamp, day_start_equity = previous_equity, "new trading day");
        }

        let mut arrived = Vec::new();
        for (symbol, stream) in self.streams.iter_mut() {
            if let Some(bar) = stream.take_at(timestamp) {
                self.portfolio.mark(symbol, bar.close);
                arrived.push(bar);
            }
        }

        for bar in &arrived {
            self.process_bar(bar)?;
        }

        let point = EquityPoint {
            timestamp,
            equity: self.portfolio.equity(),
        };
        self.equity_curve.push(point);
        Ok(Some(point))
    }

    fn process_bar(&mut self, bar: &Bar) -> Result<(), EngineError> {
        let Some(stream) = self.streams.get_mut(&bar.symbol) else {
            return Ok(());
        };
        let signals = match stream.state.update(bar) {
            Ok(signals) => signals,
            Err(e) if e.is_recoverable() => {
                debug!(symbol = %bar.symbol, timestamp = %bar.timestamp, reason = %e, "no signal yet");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let decision = self.decisions.decide(&signals);
        let side = match decision.action {
            Action::Buy => Side::Buy,
            Action::Sell => Side::Sell,
            Action::Hold => return Ok(()),
        };

        let execution = &self.config.execution;
        let estimated_price = apply_slippage(bar.close, side, execution.slippage_bps);
        let quantity = size_order(
            side,
            self.portfolio.quantity(&bar.symbol),
            self.portfolio.equity(),
            estimated_price,
            self.config.position_size_percent,
            execution.allow_shorting,
        );
        if quantity == 0 {
            debug!(symbol = %bar.symbol, timestamp = %bar.timestamp, %side, "nothing to trade");
            return Ok(());
        }

        let trade = ProposedTrade {
            symbol: bar.symbol.clone(),
            side,
            quantity,
            reference_price: bar.close,
            confidence: decision.confidence,
            rationale: decision.reasoning,
        };
        let snapshot = self.portfolio.snapshot(bar.timestamp);
        let verdict = self.risk.check(&trade, &snapshot);

        let Some(quantity) = verdict.approved_quantity(quantity) else {
            info!(
                symbol = %bar.symbol,
                timestamp = %bar.timestamp,
                %side,
                quantity,
                reasons = ?verdict.reason_codes(),
                "trade rejected"
            );
            self.rejections.push(RejectedTrade {
                timestamp: bar.timestamp,
                symbol: trade.symbol,
                side,
                quantity,
                confidence: trade.confidence,
                reasons: verdict.reasons,
            });
            return Ok(());
        };

        let fill = simulate_fill(
            &bar.symbol,
            side,
            quantity,
            bar.close,
            bar.timestamp,
            &self.config.execution,
        );
        if side == Side::Buy && fill.notional() + fill.commission > self.portfolio.cash {
            debug!(
                symbol = %bar.symbol,
                timestamp = %bar.timestamp,
                cost = fill.notional() + fill.commission,
                cash = self.portfolio.cash,
                "insufficient cash, skipping buy"
            );
            return Ok(());
        }

        debug!(
            symbol = %fill.symbol,
            timestamp = %fill.timestamp,
            side = %fill.side,
            quantity = fill.quantity,
            price = fill.price,
            commission = fill.commission,
            "filled"
        );
        self.portfolio.apply_fill(&fill);
        // The fill price carries slippage; equity marks at the close.
        self.portfolio.mark(&bar.symbol, bar.close);
        self.risk.record_fill();
        self.fills.push(fill);
        Ok(())
    }

    /// Run every remaining step and build the result.
    pub fn run(mut self) -> Result<BacktestResult, EngineError> {
        info!(
            symbols = self.streams.len(),
            steps = self.remaining_steps(),
            initial_cash = self.config.initial_cash,
            "starting backtest"
        );
        while self.step()?.is_some() {}
        Ok(self.finish())
    }

    /// Build the result from whatever has run so far.
    pub fn finish(self) -> BacktestResult {
        let report = PerformanceReport::compute(
            self.config.initial_cash,
            &self.equity_curve,
            &self.fills,
            self.config.bars_per_year,
            self.config.risk_free_rate,
        );
        info!(
            fills = report.trade_count,
            rejections = self.rejections.len(),
            total_return = report.total_return,
            max_drawdown = report.max_drawdown,
            "backtest finished"
        );
        let last = self
            .equity_curve
            .last()
            .map(|p| p.timestamp)
            .unwrap_or_default();
        BacktestResult {
            final_snapshot: self.portfolio.snapshot(last),
            report,
            fills: self.fills,
            rejections: self.rejections,
        }
    }
}
