//! Technical indicator implementations.
//!
//! Every indicator comes in two shapes with identical numerics:
//! - batch: `calculate_*` over a full bar slice, returning an `IndicatorSeries`
//! - step: a `*State` that is extended one bar at a time in O(1) amortized
//!
//! [`engine::IndicatorEngine`] and [`engine::IndicatorState`] combine the step
//! states into a [`SignalBundle`] per bar.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod volume;

pub use atr::{AtrState, calculate_atr};
pub use bollinger::{BollingerState, calculate_bollinger};
pub use ema::{EmaState, calculate_ema};
pub use engine::{IndicatorEngine, IndicatorState};
pub use macd::{MacdState, calculate_macd};
pub use rsi::{RsiState, calculate_rsi};
pub use sma::{SmaState, calculate_sma};
pub use volume::{VolumeRatioState, calculate_volume_ratio};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::error::EngineError;

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

impl IndicatorValue {
    /// The scalar reading, if this is a single-valued indicator.
    pub fn simple(&self) -> Option<f64> {
        match self {
            IndicatorValue::Simple(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    VolumeRatio(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Scalar values of the valid points, in order.
    pub fn valid_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .filter(|p| p.valid)
            .filter_map(|p| p.value.simple())
            .collect()
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::VolumeRatio(period) => write!(f, "VOLRATIO({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

/// Direction of a MACD line / signal line cross on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Crossover {
    Bullish,
    Bearish,
    None,
}

impl Crossover {
    /// Classify the move of `line - signal` from `prev_diff` to `diff`.
    pub fn from_diffs(prev_diff: f64, diff: f64) -> Self {
        if prev_diff <= 0.0 && diff > 0.0 {
            Crossover::Bullish
        } else if prev_diff >= 0.0 && diff < 0.0 {
            Crossover::Bearish
        } else {
            Crossover::None
        }
    }
}

impl fmt::Display for Crossover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crossover::Bullish => write!(f, "bullish"),
            Crossover::Bearish => write!(f, "bearish"),
            Crossover::None => write!(f, "none"),
        }
    }
}

/// Weights of the normalized components inside the composite score.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeWeights {
    pub trend: f64,
    pub momentum: f64,
    pub volume: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        CompositeWeights {
            trend: 0.5,
            momentum: 0.3,
            volume: 0.2,
        }
    }
}

impl CompositeWeights {
    pub fn total(&self) -> f64 {
        self.trend + self.momentum + self.volume
    }
}

/// Window sizes and composite tuning for the indicator engine.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    pub short_window: usize,
    pub long_window: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub atr_period: usize,
    pub volume_period: usize,
    pub weights: CompositeWeights,
    /// Relative spread (e.g. 0.05 = 5%) at which a trend component saturates to ±1.
    pub trend_saturation: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            short_window: 20,
            long_window: 50,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_k: 2.0,
            atr_period: 14,
            volume_period: 20,
            weights: CompositeWeights::default(),
            trend_saturation: 0.05,
        }
    }
}

impl IndicatorConfig {
    /// Bars needed before every indicator in the bundle is valid.
    pub fn required_history(&self) -> usize {
        [
            self.long_window,
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal - 1,
            self.bollinger_period,
            self.atr_period,
            self.volume_period,
            2,
        ]
        .into_iter()
        .max()
        .unwrap_or(2)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let windows = [
            ("short_window", self.short_window),
            ("long_window", self.long_window),
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bollinger_period", self.bollinger_period),
            ("atr_period", self.atr_period),
            ("volume_period", self.volume_period),
        ];
        for (key, value) in windows {
            if value == 0 {
                return Err(EngineError::invalid(
                    "indicators",
                    key,
                    format!("{key} must be at least 1"),
                ));
            }
        }
        if self.short_window >= self.long_window {
            return Err(EngineError::invalid(
                "indicators",
                "short_window",
                "short_window must be smaller than long_window",
            ));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(EngineError::invalid(
                "indicators",
                "macd_fast",
                "macd_fast must be smaller than macd_slow",
            ));
        }
        if !(self.bollinger_k > 0.0 && self.bollinger_k.is_finite()) {
            return Err(EngineError::invalid(
                "indicators",
                "bollinger_k",
                "bollinger_k must be positive",
            ));
        }
        if !(self.trend_saturation > 0.0 && self.trend_saturation.is_finite()) {
            return Err(EngineError::invalid(
                "indicators",
                "trend_saturation",
                "trend_saturation must be positive",
            ));
        }
        let w = &self.weights;
        for (key, value) in [
            ("trend_weight", w.trend),
            ("momentum_weight", w.momentum),
            ("volume_weight", w.volume),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(EngineError::invalid(
                    "indicators",
                    key,
                    format!("{key} must be non-negative"),
                ));
            }
        }
        if w.total() <= 0.0 {
            return Err(EngineError::invalid(
                "indicators",
                "trend_weight",
                "composite weights must not all be zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdReading {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
    pub crossover: Crossover,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bands {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Everything the engine derives for one symbol at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalBundle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub sma_short: f64,
    pub sma_long: f64,
    pub ema_short: f64,
    pub ema_long: f64,
    pub rsi: f64,
    pub macd: MacdReading,
    pub bollinger: Bands,
    pub atr: f64,
    pub volume_ratio: f64,
    pub trend_score: f64,
    pub momentum_score: f64,
    pub volume_score: f64,
    pub composite_score: f64,
}

impl fmt::Display for SignalBundle {
    /// Plain-text rendering handed to the advisory bridge.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Symbol: {}", self.symbol)?;
        writeln!(f, "Timestamp: {}", self.timestamp.to_rfc3339())?;
        writeln!(f, "Close: {:.4}", self.close)?;
        writeln!(
            f,
            "Moving averages: SMA short {:.4}, SMA long {:.4}, EMA short {:.4}, EMA long {:.4}",
            self.sma_short, self.sma_long, self.ema_short, self.ema_long
        )?;
        writeln!(f, "RSI: {:.2}", self.rsi)?;
        writeln!(
            f,
            "MACD: line {:.4}, signal {:.4}, histogram {:.4}, crossover {}",
            self.macd.line, self.macd.signal, self.macd.histogram, self.macd.crossover
        )?;
        writeln!(
            f,
            "Bollinger: upper {:.4}, middle {:.4}, lower {:.4}",
            self.bollinger.upper, self.bollinger.middle, self.bollinger.lower
        )?;
        writeln!(f, "ATR: {:.4}", self.atr)?;
        writeln!(f, "Volume ratio: {:.2}", self.volume_ratio)?;
        write!(
            f,
            "Composite score: {:.3} (trend {:.3}, momentum {:.3}, volume {:.3})",
            self.composite_score, self.trend_score, self.momentum_score, self.volume_score
        )
    }
}
