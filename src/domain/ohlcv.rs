//! OHLCV bar representation and integrity checks.

use chrono::{DateTime, Utc};

use super::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    /// Check the OHLC invariants of a single bar.
    pub fn validate(&self) -> Result<(), EngineError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(self.integrity(format!("{name} is not finite ({value})")));
            }
        }

        if self.volume < 0.0 {
            return Err(self.integrity(format!("negative volume {}", self.volume)));
        }
        if self.low <= 0.0 {
            return Err(self.integrity(format!("non-positive low {}", self.low)));
        }
        let body_high = self.open.max(self.close);
        if self.high < body_high {
            return Err(self.integrity(format!(
                "high {} below max(open, close) {}",
                self.high, body_high
            )));
        }
        let body_low = self.open.min(self.close);
        if self.low > body_low {
            return Err(self.integrity(format!(
                "low {} above min(open, close) {}",
                self.low, body_low
            )));
        }
        Ok(())
    }

    fn integrity(&self, reason: String) -> EngineError {
        EngineError::DataIntegrity {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            reason,
        }
    }
}

/// Validate a per-symbol series: every bar well formed, one symbol, strictly
/// increasing timestamps.
pub fn validate_series(bars: &[Bar]) -> Result<(), EngineError> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate()?;
        if i == 0 {
            continue;
        }
        let prev = &bars[i - 1];
        if bar.symbol != prev.symbol {
            return Err(bar.integrity(format!(
                "symbol changed from {} within one series",
                prev.symbol
            )));
        }
        if bar.timestamp <= prev.timestamp {
            return Err(bar.integrity(format!(
                "timestamp not after previous bar at {}",
                prev.timestamp
            )));
        }
    }
    Ok(())
}
