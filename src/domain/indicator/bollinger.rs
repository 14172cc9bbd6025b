//! Bollinger Bands indicator.
//!
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//! Warmup: first (period-1) bars are invalid.

use std::collections::VecDeque;

use crate::domain::indicator::{
    Bands, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::Bar;

pub fn calculate_bollinger(bars: &[Bar], period: usize, multiplier: f64) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    let warmup = period.saturating_sub(1);

    for i in 0..bars.len() {
        let valid = period > 0 && i >= warmup;

        let (upper, middle, lower) = if valid {
            let window = &bars[i + 1 - period..=i];
            let middle_val: f64 = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
            let variance: f64 = window
                .iter()
                .map(|b| {
                    let diff = b.close - middle_val;
                    diff * diff
                })
                .sum::<f64>()
                / period as f64;
            let stddev = variance.sqrt();
            (
                middle_val + multiplier * stddev,
                middle_val,
                middle_val - multiplier * stddev,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        values.push(IndicatorPoint {
            timestamp: bars[i].timestamp,
            valid,
            value: IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            },
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100: (multiplier * 100.0).round() as u32,
        },
        values,
    }
}

/// Streaming bands from a running sum and sum of squares.
#[derive(Debug, Clone)]
pub struct BollingerState {
    period: usize,
    multiplier: f64,
    window: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl BollingerState {
    pub fn new(period: usize, multiplier: f64) -> Self {
        BollingerState {
            period,
            multiplier,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<Bands> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(close);
        self.sum += close;
        self.sum_sq += close * close;
        if self.window.len() > self.period {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= oldest;
                self.sum_sq -= oldest * oldest;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<Bands> {
        if self.period == 0 || self.window.len() < self.period {
            return None;
        }
        let n = self.period as f64;
        let middle = self.sum / n;
        // Cancellation can leave a tiny negative variance on flat windows.
        let variance = (self.sum_sq / n - middle * middle).max(0.0);
        let stddev = variance.sqrt();
        Some(Bands {
            upper: middle + self.multiplier * stddev,
            middle,
            lower: middle - self.multiplier * stddev,
        })
    }
}
