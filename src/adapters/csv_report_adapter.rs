//! CSV report writer.
//!
//! `output_path` receives a `metric,value` summary. The equity curve, fill
//! ledger, round trips and risk rejections go to sibling files named
//! `<stem>_equity.csv`, `<stem>_fills.csv`, `<stem>_trips.csv` and
//! `<stem>_rejections.csv`.

use crate::domain::backtest::RejectedTrade;
use crate::domain::error::EngineError;
use crate::domain::execution::Fill;
use crate::domain::metrics::PerformanceReport;
use crate::domain::position::Side;
use crate::ports::report_port::ReportPort;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    metric: &'a str,
    value: String,
}

/// Flattened rejection; violation codes are joined with `;`.
#[derive(Debug, Serialize)]
struct RejectionRow<'a> {
    timestamp: DateTime<Utc>,
    symbol: &'a str,
    side: Side,
    quantity: i64,
    confidence: f64,
    reasons: String,
}

impl<'a> From<&'a RejectedTrade> for RejectionRow<'a> {
    fn from(rejection: &'a RejectedTrade) -> Self {
        RejectionRow {
            timestamp: rejection.timestamp,
            symbol: &rejection.symbol,
            side: rejection.side,
            quantity: rejection.quantity,
            confidence: rejection.confidence,
            reasons: rejection
                .reasons
                .iter()
                .map(|r| r.code())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        CsvReportAdapter
    }

    /// Path of a sibling file `<stem>_<suffix>.csv` next to `output_path`.
    pub fn sibling_path(output_path: &Path, suffix: &str) -> PathBuf {
        let stem = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        output_path.with_file_name(format!("{stem}_{suffix}.csv"))
    }
}

fn csv_error(path: &Path, e: csv::Error) -> EngineError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => EngineError::Io(io),
        other => EngineError::Data {
            reason: format!("failed to write {}: {:?}", path.display(), other),
        },
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| csv_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

fn summary_rows(report: &PerformanceReport, rejected: usize) -> Vec<SummaryRow<'static>> {
    let row = |metric: &'static str, value: String| SummaryRow { metric, value };
    vec![
        row("initial_cash", format!("{:.2}", report.initial_cash)),
        row("final_equity", format!("{:.2}", report.final_equity)),
        row("total_return", format!("{:.6}", report.total_return)),
        row("annualized_return", format!("{:.6}", report.annualized_return)),
        row("max_drawdown", format!("{:.6}", report.max_drawdown)),
        row(
            "max_drawdown_duration",
            report.max_drawdown_duration.to_string(),
        ),
        row("sharpe_ratio", format!("{:.4}", report.sharpe_ratio)),
        row("sortino_ratio", format!("{:.4}", report.sortino_ratio)),
        row("win_rate", format!("{:.4}", report.win_rate)),
        row("trade_count", report.trade_count.to_string()),
        row("round_trips", report.round_trips.len().to_string()),
        row("total_commission", format!("{:.2}", report.total_commission)),
        row("rejected_trades", rejected.to_string()),
    ]
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        report: &PerformanceReport,
        fills: &[Fill],
        rejections: &[RejectedTrade],
        output_path: &Path,
    ) -> Result<(), EngineError> {
        write_rows(output_path, &summary_rows(report, rejections.len()))?;
        write_rows(
            &Self::sibling_path(output_path, "equity"),
            &report.equity_curve,
        )?;
        write_rows(&Self::sibling_path(output_path, "fills"), fills)?;
        write_rows(
            &Self::sibling_path(output_path, "trips"),
            &report.round_trips,
        )?;
        let rows: Vec<RejectionRow> = rejections.iter().map(RejectionRow::from).collect();
        write_rows(&Self::sibling_path(output_path, "rejections"), &rows)?;
        Ok(())
    }
}
