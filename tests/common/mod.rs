#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use fusiontrader::domain::backtest::{BacktestConfig, RejectedTrade};
use fusiontrader::domain::error::EngineError;
use fusiontrader::domain::execution::Fill;
use fusiontrader::domain::fusion::{Action, AdvisoryOpinion, Sentiment};
use fusiontrader::domain::indicator::{CompositeWeights, IndicatorConfig};
use fusiontrader::domain::metrics::PerformanceReport;
pub use fusiontrader::domain::ohlcv::Bar;
use fusiontrader::ports::advisory_port::AdvisoryPort;
use fusiontrader::ports::data_port::DataPort;
use fusiontrader::ports::report_port::ReportPort;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(EngineError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.timestamp >= start && b.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, EngineError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Advisory port returning the same opinion for every symbol.
pub struct FixedAdvisory {
    pub opinion: AdvisoryOpinion,
    pub prompts: RefCell<Vec<String>>,
}

impl FixedAdvisory {
    pub fn new(sentiment: Sentiment, action: Action, confidence: f64) -> Self {
        FixedAdvisory {
            opinion: AdvisoryOpinion {
                sentiment,
                confidence,
                action,
                reasoning: "fixed test opinion".into(),
            },
            prompts: RefCell::new(Vec::new()),
        }
    }
}

impl AdvisoryPort for FixedAdvisory {
    fn opinion(&self, _symbol: &str, prompt: &str) -> Result<AdvisoryOpinion, EngineError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        Ok(self.opinion.clone())
    }
}

/// Advisory port that is always down.
pub struct FailingAdvisory;

impl AdvisoryPort for FailingAdvisory {
    fn opinion(&self, _symbol: &str, _prompt: &str) -> Result<AdvisoryOpinion, EngineError> {
        Err(EngineError::AdvisoryUnavailable {
            reason: "connection refused".into(),
        })
    }
}

/// Report port that keeps what it was asked to write.
#[derive(Default)]
pub struct RecordingReportPort {
    pub written: RefCell<Vec<(PerformanceReport, Vec<Fill>, Vec<RejectedTrade>, PathBuf)>>,
}

impl ReportPort for RecordingReportPort {
    fn write(
        &self,
        report: &PerformanceReport,
        fills: &[Fill],
        rejections: &[RejectedTrade],
        output_path: &Path,
    ) -> Result<(), EngineError> {
        self.written.borrow_mut().push((
            report.clone(),
            fills.to_vec(),
            rejections.to_vec(),
            output_path.to_path_buf(),
        ));
        Ok(())
    }
}

pub fn start() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap()
}

/// Bars at the given closes, spaced by `step`. Each bar opens at the previous
/// close and spans exactly open..close.
pub fn bars_from_closes(symbol: &str, closes: &[f64], step: Duration) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or(100.0);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar {
                symbol: symbol.to_string(),
                timestamp: start() + step * i as i32,
                open,
                high: open.max(close),
                low: open.min(close),
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

pub fn flat_bars(symbol: &str, n: usize, price: f64) -> Vec<Bar> {
    bars_from_closes(symbol, &vec![price; n], Duration::days(1))
}

/// Daily bars climbing linearly from 100 to 160.
pub fn rising_bars(symbol: &str, n: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| 100.0 + 60.0 * i as f64 / (n.max(2) - 1) as f64)
        .collect();
    bars_from_closes(symbol, &closes, Duration::days(1))
}

pub fn hourly_bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    bars_from_closes(symbol, closes, Duration::hours(1))
}

/// Windows short enough that signals start on the fourth bar.
pub fn small_indicators() -> IndicatorConfig {
    IndicatorConfig {
        short_window: 2,
        long_window: 3,
        rsi_period: 2,
        macd_fast: 2,
        macd_slow: 3,
        macd_signal: 2,
        bollinger_period: 3,
        atr_period: 2,
        volume_period: 2,
        weights: CompositeWeights::default(),
        ..IndicatorConfig::default()
    }
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig::default()
}
