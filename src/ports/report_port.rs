//! Report output port trait.

use crate::domain::backtest::RejectedTrade;
use crate::domain::error::EngineError;
use crate::domain::execution::Fill;
use crate::domain::metrics::PerformanceReport;
use std::path::Path;

/// Port for writing backtest reports.
pub trait ReportPort {
    fn write(
        &self,
        report: &PerformanceReport,
        fills: &[Fill],
        rejections: &[RejectedTrade],
        output_path: &Path,
    ) -> Result<(), EngineError>;
}
