//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_advisory_adapter::FileAdvisoryAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{BacktestConfig, BacktestResult, BacktestSimulator};
use crate::domain::config_validation::{
    DataWindow, build_backtest_config, build_data_window, parse_symbols,
};
use crate::domain::error::EngineError;
use crate::domain::fusion::AdvisedDecisions;
use crate::domain::indicator::{IndicatorEngine, SignalBundle};
use crate::domain::ohlcv::Bar;
use crate::ports::advisory_port::AdvisoryPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(
    name = "fusiontrader",
    about = "Backtester fusing technical indicators with advisory opinions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over CSV bar files
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory holding one `<SYMBOL>.csv` per symbol
        #[arg(short, long)]
        data: PathBuf,
        /// Comma-separated symbols, overriding `[backtest] symbols`
        #[arg(long)]
        symbols: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Directory holding one `<SYMBOL>.txt` advisory response per symbol
        #[arg(long)]
        advisory: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the latest signal bundle for one symbol
    Signals {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        symbol: String,
    },
    /// List symbols available in a data directory
    ListSymbols {
        #[arg(short, long)]
        data: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Backtest {
            config,
            data,
            symbols,
            output,
            advisory,
            dry_run,
        } => run_backtest(
            &config,
            &data,
            symbols.as_deref(),
            output.as_deref(),
            advisory.as_deref(),
            dry_run,
        ),
        Command::Validate { config } => run_validate(&config),
        Command::Signals {
            config,
            data,
            symbol,
        } => run_signals(&config, &data, &symbol),
        Command::ListSymbols { data } => run_list_symbols(&data),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, EngineError> {
    FileConfigAdapter::from_file(path)
}

/// Symbols from the command line if given, otherwise from the config.
pub fn resolve_symbols(cli_symbols: Option<&str>, window: &DataWindow) -> Vec<String> {
    match cli_symbols {
        Some(raw) => parse_symbols(raw),
        None => window.symbols.clone(),
    }
}

fn run_validate(config_path: &Path) -> Result<(), EngineError> {
    let adapter = load_config(config_path)?;
    let config = build_backtest_config(&adapter)?;
    let window = build_data_window(&adapter)?;
    eprintln!("Configuration OK: {}", config_path.display());
    eprintln!(
        "  warm-up: {} bars, symbols: {}",
        config.indicators.required_history(),
        if window.symbols.is_empty() {
            "(none)".to_string()
        } else {
            window.symbols.join(",")
        }
    );
    Ok(())
}

fn run_list_symbols(data_dir: &Path) -> Result<(), EngineError> {
    let adapter = CsvAdapter::new(data_dir.to_path_buf());
    for symbol in adapter.list_symbols()? {
        println!("{symbol}");
    }
    Ok(())
}

fn run_signals(config_path: &Path, data_dir: &Path, symbol: &str) -> Result<(), EngineError> {
    let adapter = load_config(config_path)?;
    let config = build_backtest_config(&adapter)?;
    let window = build_data_window(&adapter)?;
    let data = CsvAdapter::new(data_dir.to_path_buf());
    let bundle = latest_signals(&data, &config, &window, &symbol.to_uppercase())?;
    println!("{bundle}");
    Ok(())
}

/// Signal bundle as of the last bar in the window.
pub fn latest_signals(
    data_port: &dyn DataPort,
    config: &BacktestConfig,
    window: &DataWindow,
    symbol: &str,
) -> Result<SignalBundle, EngineError> {
    let engine = IndicatorEngine::new(config.indicators.clone())?;
    let bars = data_port.fetch_bars(symbol, window.start, window.end)?;
    match bars.len().checked_sub(1) {
        Some(last) => engine.compute(&bars, last),
        None => Err(EngineError::InsufficientData {
            symbol: symbol.to_string(),
            bars: 0,
            required: engine.required_history(),
        }),
    }
}

fn run_backtest(
    config_path: &Path,
    data_dir: &Path,
    cli_symbols: Option<&str>,
    output_path: Option<&Path>,
    advisory_dir: Option<&Path>,
    dry_run: bool,
) -> Result<(), EngineError> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    let config = build_backtest_config(&adapter)?;
    let mut window = build_data_window(&adapter)?;

    window.symbols = resolve_symbols(cli_symbols, &window);
    let data = CsvAdapter::new(data_dir.to_path_buf());
    if window.symbols.is_empty() {
        window.symbols = data.list_symbols()?;
    }

    if dry_run {
        let series = load_series(&data, &window)?;
        eprintln!(
            "Dry run: {} symbols, {} bars, warm-up {} bars",
            series.len(),
            series.values().map(Vec::len).sum::<usize>(),
            config.indicators.required_history()
        );
        return Ok(());
    }

    let advisory = advisory_dir.map(|dir| FileAdvisoryAdapter::new(dir.to_path_buf()));
    let output = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("report.csv"));

    run_backtest_pipeline(
        &data,
        advisory.as_ref().map(|a| a as &dyn AdvisoryPort),
        config,
        &window,
        &CsvReportAdapter::new(),
        &output,
    )
    .map(|_| ())
}

/// Fetch every symbol in the window. Symbols that fail to load or have no
/// bars in range are skipped with a warning.
pub fn load_series(
    data_port: &dyn DataPort,
    window: &DataWindow,
) -> Result<BTreeMap<String, Vec<Bar>>, EngineError> {
    let mut series = BTreeMap::new();
    for symbol in &window.symbols {
        match data_port.fetch_bars(symbol, window.start, window.end) {
            Ok(bars) if bars.is_empty() => {
                eprintln!("warning: skipping {symbol} (no bars in range)");
            }
            Ok(bars) => {
                series.insert(symbol.clone(), bars);
            }
            Err(e) => {
                eprintln!("warning: skipping {symbol} ({e})");
            }
        }
    }

    if series.is_empty() {
        return Err(EngineError::Data {
            reason: "no symbols with data to backtest".to_string(),
        });
    }
    Ok(series)
}

/// Load data, simulate, print a console summary and write the report.
pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    advisory: Option<&dyn AdvisoryPort>,
    config: BacktestConfig,
    window: &DataWindow,
    report_port: &dyn ReportPort,
    output_path: &Path,
) -> Result<BacktestResult, EngineError> {
    let series = load_series(data_port, window)?;
    eprintln!(
        "Running backtest: {} symbols, {} advisory",
        series.len(),
        if advisory.is_some() { "with" } else { "without" }
    );

    let result = match advisory {
        Some(port) => {
            let decisions = AdvisedDecisions::new(port, config.fusion.clone());
            BacktestSimulator::new(config, series, decisions)?.run()?
        }
        None => BacktestSimulator::technical(config, series)?.run()?,
    };

    print_summary(&result);
    report_port.write(&result.report, &result.fills, &result.rejections, output_path)?;
    eprintln!("\nReport written to: {}", output_path.display());
    Ok(result)
}

fn print_summary(result: &BacktestResult) {
    let report = &result.report;
    eprintln!("\n=== Results ===");
    eprintln!("Final Equity:     {:.2}", report.final_equity);
    eprintln!("Total Return:     {:.2}%", report.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", report.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", report.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", report.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", report.max_drawdown * 100.0);
    eprintln!("Fills:            {}", report.trade_count);
    eprintln!("Round Trips:      {}", report.round_trips.len());
    eprintln!("Win Rate:         {:.1}%", report.win_rate * 100.0);
    eprintln!("Commission:       {:.2}", report.total_commission);
    eprintln!("Rejected Trades:  {}", result.rejections.len());

    let mut by_code: BTreeMap<&str, usize> = BTreeMap::new();
    for rejection in &result.rejections {
        for reason in &rejection.reasons {
            *by_code.entry(reason.code()).or_default() += 1;
        }
    }
    for (code, count) in by_code {
        eprintln!("  {code}: {count}");
    }
}
