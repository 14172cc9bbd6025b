//! Average True Range with Wilder smoothing.
//!
//! TR[0] = high - low, TR[i] = true_range(prev_close).
//! Seed: mean of the first n TRs, then ATR = (prev * (n-1) + TR) / n.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_atr(bars: &[Bar], period: usize) -> IndicatorSeries {
    if bars.len() < period || period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Atr(period),
            values: vec![],
        };
    }

    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut results: Vec<IndicatorPoint> = Vec::with_capacity(bars.len());
    let mut atr = 0.0;

    for i in 0..bars.len() {
        if i < period - 1 {
            results.push(IndicatorPoint {
                timestamp: bars[i].timestamp,
                valid: false,
                value: IndicatorValue::Simple(0.0),
            });
            continue;
        }
        atr = if i == period - 1 {
            tr_values[0..=i].iter().sum::<f64>() / period as f64
        } else {
            (atr * (period - 1) as f64 + tr_values[i]) / period as f64
        };
        results.push(IndicatorPoint {
            timestamp: bars[i].timestamp,
            valid: true,
            value: IndicatorValue::Simple(atr),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values: results,
    }
}

#[derive(Debug, Clone)]
pub struct AtrState {
    period: usize,
    prev_close: Option<f64>,
    count: usize,
    tr_sum: f64,
    atr: Option<f64>,
}

impl AtrState {
    pub fn new(period: usize) -> Self {
        AtrState {
            period,
            prev_close: None,
            count: 0,
            tr_sum: 0.0,
            atr: None,
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let tr = match self.prev_close.replace(bar.close) {
            Some(prev_close) => bar.true_range(prev_close),
            None => bar.high - bar.low,
        };
        if self.period == 0 {
            return None;
        }
        self.count += 1;
        let n = self.period as f64;
        self.atr = match self.atr {
            Some(prev) => Some((prev * (n - 1.0) + tr) / n),
            None => {
                self.tr_sum += tr;
                (self.count == self.period).then(|| self.tr_sum / n)
            }
        };
        self.atr
    }

    pub fn value(&self) -> Option<f64> {
        self.atr
    }
}
