//! Signal bundle assembly.
//!
//! [`IndicatorState`] is the streaming form: one state per symbol, extended
//! with exactly one bar per call. [`IndicatorEngine::compute`] is the
//! point-in-time form: it replays `bars[..=as_of_index]` through a fresh state,
//! so it cannot observe anything after `as_of_index`.

use chrono::{DateTime, Utc};

use crate::domain::error::EngineError;
use crate::domain::indicator::{
    AtrState, BollingerState, EmaState, IndicatorConfig, MacdState, RsiState, SignalBundle,
    SmaState, VolumeRatioState,
};
use crate::domain::ohlcv::Bar;

#[derive(Debug, Clone)]
pub struct IndicatorState {
    config: IndicatorConfig,
    symbol: String,
    bars_seen: usize,
    prev_close: Option<f64>,
    sma_short: SmaState,
    sma_long: SmaState,
    ema_short: EmaState,
    ema_long: EmaState,
    rsi: RsiState,
    macd: MacdState,
    bollinger: BollingerState,
    atr: AtrState,
    volume: VolumeRatioState,
    last_timestamp: Option<DateTime<Utc>>,
}

impl IndicatorState {
    pub fn new(symbol: impl Into<String>, config: &IndicatorConfig) -> Self {
        IndicatorState {
            config: config.clone(),
            symbol: symbol.into(),
            bars_seen: 0,
            prev_close: None,
            sma_short: SmaState::new(config.short_window),
            sma_long: SmaState::new(config.long_window),
            ema_short: EmaState::new(config.short_window),
            ema_long: EmaState::new(config.long_window),
            rsi: RsiState::new(config.rsi_period),
            macd: MacdState::new(config.macd_fast, config.macd_slow, config.macd_signal),
            bollinger: BollingerState::new(config.bollinger_period, config.bollinger_k),
            atr: AtrState::new(config.atr_period),
            volume: VolumeRatioState::new(config.volume_period),
            last_timestamp: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Extend the state with the next bar and return the bundle as of that bar.
    ///
    /// Returns `InsufficientData` until the longest lookback is filled; the
    /// state still absorbs the bar in that case.
    pub fn update(&mut self, bar: &Bar) -> Result<SignalBundle, EngineError> {
        self.bars_seen += 1;
        self.last_timestamp = Some(bar.timestamp);
        let prev_close = self.prev_close.replace(bar.close);

        let sma_short = self.sma_short.update(bar.close);
        let sma_long = self.sma_long.update(bar.close);
        let ema_short = self.ema_short.update(bar.close);
        let ema_long = self.ema_long.update(bar.close);
        let rsi = self.rsi.update(bar.close);
        let macd = self.macd.update(bar.close);
        let bollinger = self.bollinger.update(bar.close);
        let atr = self.atr.update(bar);
        let volume_ratio = self.volume.update(bar.volume);

        let required = self.config.required_history();
        let insufficient = || EngineError::InsufficientData {
            symbol: self.symbol.clone(),
            bars: self.bars_seen,
            required,
        };
        if self.bars_seen < required {
            return Err(insufficient());
        }
        let (
            Some(sma_short),
            Some(sma_long),
            Some(ema_short),
            Some(ema_long),
            Some(rsi),
            Some(macd),
            Some(bollinger),
            Some(atr),
            Some(volume_ratio),
            Some(prev_close),
        ) = (
            sma_short,
            sma_long,
            ema_short,
            ema_long,
            rsi,
            macd,
            bollinger,
            atr,
            volume_ratio,
            prev_close,
        )
        else {
            return Err(insufficient());
        };

        let saturation = self.config.trend_saturation;
        let ma_trend = normalize((sma_short - sma_long) / sma_long, saturation);
        let macd_trend = normalize(macd.line / bar.close, saturation);
        let trend_score = (ma_trend + macd_trend) / 2.0;

        let momentum_score = ((rsi - 50.0) / 50.0).clamp(-1.0, 1.0);

        let direction = if bar.close > prev_close {
            1.0
        } else if bar.close < prev_close {
            -1.0
        } else {
            0.0
        };
        let volume_score = direction * (volume_ratio - 1.0).clamp(-1.0, 1.0);

        let weights = &self.config.weights;
        let composite_score = ((weights.trend * trend_score
            + weights.momentum * momentum_score
            + weights.volume * volume_score)
            / weights.total())
        .clamp(-1.0, 1.0);

        Ok(SignalBundle {
            symbol: self.symbol.clone(),
            timestamp: bar.timestamp,
            close: bar.close,
            sma_short,
            sma_long,
            ema_short,
            ema_long,
            rsi,
            macd,
            bollinger,
            atr,
            volume_ratio,
            trend_score,
            momentum_score,
            volume_score,
            composite_score,
        })
    }
}

/// Map a relative spread onto [-1, 1], saturating at `saturation`.
fn normalize(spread: f64, saturation: f64) -> f64 {
    if !spread.is_finite() {
        return 0.0;
    }
    (spread / saturation).clamp(-1.0, 1.0)
}

/// Point-in-time indicator computation over a bar history.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(IndicatorEngine { config })
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    pub fn required_history(&self) -> usize {
        self.config.required_history()
    }

    /// A fresh streaming state for `symbol` using this engine's configuration.
    pub fn state(&self, symbol: impl Into<String>) -> IndicatorState {
        IndicatorState::new(symbol, &self.config)
    }

    /// Signal bundle as of `bars[as_of_index]`, using only `bars[..=as_of_index]`.
    pub fn compute(&self, bars: &[Bar], as_of_index: usize) -> Result<SignalBundle, EngineError> {
        let symbol = bars.first().map(|b| b.symbol.clone()).unwrap_or_default();
        let required = self.required_history();
        let Some(window) = bars.get(..=as_of_index) else {
            return Err(EngineError::InsufficientData {
                symbol,
                bars: bars.len(),
                required: required.max(as_of_index + 1),
            });
        };
        if window.len() < required {
            return Err(EngineError::InsufficientData {
                symbol,
                bars: window.len(),
                required,
            });
        }

        let mut state = self.state(symbol);
        let (last, history) = window
            .split_last()
            .ok_or_else(|| EngineError::InsufficientData {
                symbol: state.symbol().to_string(),
                bars: 0,
                required,
            })?;
        for bar in history {
            // Warmup errors are expected until the lookback is filled.
            let _ = state.update(bar);
        }
        state.update(last)
    }

    /// Bundles for every index of `bars` in one streaming pass. `None` marks
    /// bars inside the warmup window.
    pub fn compute_series(&self, bars: &[Bar]) -> Vec<Option<SignalBundle>> {
        let symbol = bars.first().map(|b| b.symbol.clone()).unwrap_or_default();
        let mut state = self.state(symbol);
        bars.iter().map(|bar| state.update(bar).ok()).collect()
    }
}
