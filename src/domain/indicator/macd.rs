//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: slow - 1 + signal - 1 bars.

use crate::domain::indicator::{
    Crossover, EmaState, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
    MacdReading, calculate_ema,
};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    bars: &[Bar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    if bars.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Macd {
                fast,
                slow,
                signal: signal_period,
            },
            values: Vec::new(),
        };
    }

    let ema_fast = ema_raw_values(bars, fast);
    let ema_slow = ema_raw_values(bars, slow);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let k = 2.0 / (signal_period as f64 + 1.0);
    let mut signal_line: Vec<f64> = vec![0.0; bars.len()];
    let macd_warmup = slow - 1;

    if macd_warmup + signal_period <= bars.len() {
        let sum: f64 = macd_line[macd_warmup..macd_warmup + signal_period]
            .iter()
            .sum();
        let mut signal_ema = sum / signal_period as f64;
        signal_line[macd_warmup + signal_period - 1] = signal_ema;

        for i in (macd_warmup + signal_period)..bars.len() {
            signal_ema += k * (macd_line[i] - signal_ema);
            signal_line[i] = signal_ema;
        }
    }

    let signal_warmup = slow - 1 + signal_period - 1;

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: i >= signal_warmup,
            value: IndicatorValue::Macd {
                line: macd_line[i],
                signal: signal_line[i],
                histogram: macd_line[i] - signal_line[i],
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Macd {
            fast,
            slow,
            signal: signal_period,
        },
        values,
    }
}

/// Extract raw f64 values from the EMA module, using 0.0 for warmup bars.
fn ema_raw_values(bars: &[Bar], period: usize) -> Vec<f64> {
    calculate_ema(bars, period)
        .values
        .iter()
        .map(|p| p.value.simple().unwrap_or(0.0))
        .collect()
}

/// Streaming MACD. The signal EMA is fed only once the slow EMA is seeded,
/// matching the batch seeding. Requires `fast <= slow`.
#[derive(Debug, Clone)]
pub struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
    prev_diff: Option<f64>,
    last: Option<MacdReading>,
}

impl MacdState {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        MacdState {
            fast: EmaState::new(fast),
            slow: EmaState::new(slow),
            signal: EmaState::new(signal),
            prev_diff: None,
            last: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<MacdReading> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);

        let (Some(fast), Some(slow)) = (fast, slow) else {
            return None;
        };
        let line = fast - slow;
        let signal = self.signal.update(line)?;
        let histogram = line - signal;

        let crossover = match self.prev_diff {
            Some(prev) => Crossover::from_diffs(prev, histogram),
            None => Crossover::None,
        };
        self.prev_diff = Some(histogram);

        let reading = MacdReading {
            line,
            signal,
            histogram,
            crossover,
        };
        self.last = Some(reading);
        Some(reading)
    }

    pub fn value(&self) -> Option<MacdReading> {
        self.last
    }
}
