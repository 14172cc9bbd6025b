//! Bar source port trait.

use crate::domain::error::EngineError;
use crate::domain::ohlcv::Bar;
use chrono::{DateTime, Utc};

pub trait DataPort {
    /// Bars for `symbol` with `start <= timestamp <= end`, oldest first.
    /// Gaps are returned as gaps.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError>;

    fn list_symbols(&self) -> Result<Vec<String>, EngineError>;
}
