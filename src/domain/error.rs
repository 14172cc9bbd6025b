//! Domain error types.
//!
//! Recoverable conditions (`InsufficientData`, `AdvisoryUnavailable`) are
//! handled inside the simulator and logged as skipped steps. Everything else
//! propagates to the caller.

use chrono::{DateTime, Utc};

/// A best-effort advisory response that could not be turned into a typed opinion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("advisory parse error: {reason}")]
pub struct AdvisoryParseError {
    pub reason: String,
}

impl AdvisoryParseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Top-level error type for fusiontrader.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient data for {symbol}: have {bars} bars, need {required}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        required: usize,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("advisory unavailable: {reason}")]
    AdvisoryUnavailable { reason: String },

    #[error("data integrity violation for {symbol} at {timestamp}: {reason}")]
    DataIntegrity {
        symbol: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("data source error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        EngineError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors the simulator absorbs instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData { .. } | EngineError::AdvisoryUnavailable { .. }
        )
    }
}

impl From<AdvisoryParseError> for EngineError {
    fn from(err: AdvisoryParseError) -> Self {
        EngineError::AdvisoryUnavailable { reason: err.reason }
    }
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        let code: u8 = match err {
            EngineError::Io(_) => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => 2,
            EngineError::Data { .. } => 3,
            EngineError::AdvisoryUnavailable { .. } => 4,
            EngineError::InsufficientData { .. } | EngineError::DataIntegrity { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
