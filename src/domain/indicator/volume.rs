//! Volume ratio: current volume / SMA(volume, n).
//!
//! Values above 1 mean above-average participation. A zero average reads 1.0.

use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, SmaState,
};
use crate::domain::ohlcv::Bar;

fn ratio(volume: f64, average: f64) -> f64 {
    if average > 0.0 { volume / average } else { 1.0 }
}

pub fn calculate_volume_ratio(bars: &[Bar], period: usize) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::VolumeRatio(period),
            values: Vec::new(),
        };
    }

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let valid = i + 1 >= period;
            let value = if valid {
                let average = bars[i + 1 - period..=i]
                    .iter()
                    .map(|b| b.volume)
                    .sum::<f64>()
                    / period as f64;
                ratio(bar.volume, average)
            } else {
                0.0
            };
            IndicatorPoint {
                timestamp: bar.timestamp,
                valid,
                value: IndicatorValue::Simple(value),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::VolumeRatio(period),
        values,
    }
}

#[derive(Debug, Clone)]
pub struct VolumeRatioState {
    average: SmaState,
    last: Option<f64>,
}

impl VolumeRatioState {
    pub fn new(period: usize) -> Self {
        VolumeRatioState {
            average: SmaState::new(period),
            last: None,
        }
    }

    pub fn update(&mut self, volume: f64) -> Option<f64> {
        self.last = self.average.update(volume).map(|avg| ratio(volume, avg));
        self.last
    }

    pub fn value(&self) -> Option<f64> {
        self.last
    }
}
