//! Configuration loading and validation.
//!
//! Builds a [`BacktestConfig`] from the `[backtest]`, `[indicators]`,
//! `[fusion]` and `[risk]` sections. Keys are optional unless stated;
//! a present key that does not parse is an error, never a silent default.

use chrono::{DateTime, NaiveDate, Utc};
use std::str::FromStr;
use tracing::warn;

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::EngineError;
use crate::domain::execution::{CommissionModel, ExecutionConfig};
use crate::domain::fusion::{FusionPolicy, TradingProfile};
use crate::domain::indicator::{CompositeWeights, IndicatorConfig};
use crate::domain::risk::RiskLimits;
use crate::ports::config_port::ConfigPort;

/// Date range and symbol list for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct DataWindow {
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

const KNOWN_KEYS: &[(&str, &[&str])] = &[
    (
        "backtest",
        &[
            "initial_cash",
            "position_size_percent",
            "bars_per_year",
            "risk_free_rate",
            "commission_model",
            "commission_fee",
            "commission_rate",
            "commission_minimum",
            "commission_pct",
            "slippage_bps",
            "allow_shorting",
            "symbols",
            "start_date",
            "end_date",
        ],
    ),
    (
        "indicators",
        &[
            "short_window",
            "long_window",
            "rsi_period",
            "macd_fast",
            "macd_slow",
            "macd_signal",
            "bollinger_period",
            "bollinger_k",
            "atr_period",
            "volume_period",
            "trend_weight",
            "momentum_weight",
            "volume_weight",
            "trend_saturation",
        ],
    ),
    (
        "fusion",
        &["profile", "technical_weight", "advisory_weight", "threshold"],
    ),
    (
        "risk",
        &[
            "max_position_size_percent",
            "max_daily_loss_percent",
            "max_portfolio_exposure_percent",
            "max_trades_per_day",
            "min_confidence_percent",
            "size_down",
        ],
    ),
];

/// Keys in the known sections that nothing reads, as `[section] key`.
/// Usually a typo that would otherwise silently fall back to a default.
pub fn unknown_keys(config: &dyn ConfigPort) -> Vec<String> {
    KNOWN_KEYS
        .iter()
        .flat_map(|(section, known)| {
            config
                .keys(section)
                .into_iter()
                .filter(move |key| !known.contains(&key.as_str()))
                .map(move |key| format!("[{section}] {key}"))
        })
        .collect()
}

fn parse_value<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    expected: &str,
) -> Result<Option<T>, EngineError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            EngineError::invalid(section, key, format!("expected {expected}, got '{raw}'"))
        }),
    }
}

fn get_f64(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, EngineError> {
    Ok(parse_value(config, section, key, "a number")?.unwrap_or(default))
}

fn get_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, EngineError> {
    Ok(parse_value(config, section, key, "a non-negative integer")?.unwrap_or(default))
}

fn get_bool(config: &dyn ConfigPort, section: &str, key: &str, default: bool) -> Result<bool, EngineError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(EngineError::invalid(
                section,
                key,
                format!("expected true/false, got '{raw}'"),
            )),
        },
    }
}

fn require_f64(config: &dyn ConfigPort, section: &str, key: &str) -> Result<f64, EngineError> {
    parse_value(config, section, key, "a number")?.ok_or_else(|| EngineError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    })
}

fn build_commission(config: &dyn ConfigPort) -> Result<CommissionModel, EngineError> {
    let model = config
        .get_string("backtest", "commission_model")
        .unwrap_or_else(|| "none".to_string());
    match model.trim().to_lowercase().as_str() {
        "none" => Ok(CommissionModel::None),
        "flat" => Ok(CommissionModel::Flat {
            fee: require_f64(config, "backtest", "commission_fee")?,
        }),
        "per_share" => Ok(CommissionModel::PerShare {
            rate: require_f64(config, "backtest", "commission_rate")?,
            minimum: get_f64(config, "backtest", "commission_minimum", 0.0)?,
        }),
        "percent" => Ok(CommissionModel::Percent {
            pct: require_f64(config, "backtest", "commission_pct")?,
        }),
        other => Err(EngineError::invalid(
            "backtest",
            "commission_model",
            format!("unknown model '{other}' (expected none, flat, per_share or percent)"),
        )),
    }
}

fn build_indicators(config: &dyn ConfigPort) -> Result<IndicatorConfig, EngineError> {
    let d = IndicatorConfig::default();
    let s = "indicators";
    Ok(IndicatorConfig {
        short_window: get_usize(config, s, "short_window", d.short_window)?,
        long_window: get_usize(config, s, "long_window", d.long_window)?,
        rsi_period: get_usize(config, s, "rsi_period", d.rsi_period)?,
        macd_fast: get_usize(config, s, "macd_fast", d.macd_fast)?,
        macd_slow: get_usize(config, s, "macd_slow", d.macd_slow)?,
        macd_signal: get_usize(config, s, "macd_signal", d.macd_signal)?,
        bollinger_period: get_usize(config, s, "bollinger_period", d.bollinger_period)?,
        bollinger_k: get_f64(config, s, "bollinger_k", d.bollinger_k)?,
        atr_period: get_usize(config, s, "atr_period", d.atr_period)?,
        volume_period: get_usize(config, s, "volume_period", d.volume_period)?,
        weights: CompositeWeights {
            trend: get_f64(config, s, "trend_weight", d.weights.trend)?,
            momentum: get_f64(config, s, "momentum_weight", d.weights.momentum)?,
            volume: get_f64(config, s, "volume_weight", d.weights.volume)?,
        },
        trend_saturation: get_f64(config, s, "trend_saturation", d.trend_saturation)?,
    })
}

fn build_profile(config: &dyn ConfigPort) -> Result<TradingProfile, EngineError> {
    match config.get_string("fusion", "profile") {
        None => Ok(TradingProfile::Moderate),
        Some(raw) => raw
            .parse()
            .map_err(|reason: String| EngineError::invalid("fusion", "profile", reason)),
    }
}

fn build_fusion(config: &dyn ConfigPort, base: FusionPolicy) -> Result<FusionPolicy, EngineError> {
    let s = "fusion";
    Ok(FusionPolicy {
        technical_weight: get_f64(config, s, "technical_weight", base.technical_weight)?,
        advisory_weight: get_f64(config, s, "advisory_weight", base.advisory_weight)?,
        threshold: get_f64(config, s, "threshold", base.threshold)?,
    })
}

fn build_risk(config: &dyn ConfigPort, base: RiskLimits) -> Result<RiskLimits, EngineError> {
    let s = "risk";
    Ok(RiskLimits {
        max_position_size_percent: get_f64(
            config,
            s,
            "max_position_size_percent",
            base.max_position_size_percent,
        )?,
        max_daily_loss_percent: get_f64(config, s, "max_daily_loss_percent", base.max_daily_loss_percent)?,
        max_portfolio_exposure_percent: get_f64(
            config,
            s,
            "max_portfolio_exposure_percent",
            base.max_portfolio_exposure_percent,
        )?,
        max_trades_per_day: parse_value(config, s, "max_trades_per_day", "a non-negative integer")?
            .unwrap_or(base.max_trades_per_day),
        min_confidence_percent: get_f64(config, s, "min_confidence_percent", base.min_confidence_percent)?,
        size_down: get_bool(config, s, "size_down", base.size_down)?,
    })
}

/// Read every section and validate the assembled configuration.
pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, EngineError> {
    for key in unknown_keys(config) {
        warn!(key = %key, "unrecognized config key ignored");
    }

    let d = BacktestConfig::default();
    let profile = build_profile(config)?;

    let backtest = BacktestConfig {
        initial_cash: get_f64(config, "backtest", "initial_cash", d.initial_cash)?,
        position_size_percent: get_f64(
            config,
            "backtest",
            "position_size_percent",
            d.position_size_percent,
        )?,
        bars_per_year: get_f64(config, "backtest", "bars_per_year", d.bars_per_year)?,
        risk_free_rate: get_f64(config, "backtest", "risk_free_rate", d.risk_free_rate)?,
        indicators: build_indicators(config)?,
        fusion: build_fusion(config, profile.fusion_policy())?,
        risk: build_risk(config, profile.risk_limits())?,
        execution: ExecutionConfig {
            commission: build_commission(config)?,
            slippage_bps: get_f64(config, "backtest", "slippage_bps", d.execution.slippage_bps)?,
            allow_shorting: get_bool(config, "backtest", "allow_shorting", d.execution.allow_shorting)?,
        },
    };
    backtest.validate()?;
    Ok(backtest)
}

fn parse_bound(config: &dyn ConfigPort, key: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
    let Some(raw) = config.get_string("backtest", key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| {
            EngineError::invalid(
                "backtest",
                key,
                format!("invalid date '{raw}', expected YYYY-MM-DD or RFC 3339"),
            )
        })
}

/// Split a comma-separated symbol list, dropping blanks and duplicates.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

/// `[backtest] symbols`, `start_date` and `end_date`. Missing dates leave the
/// range open; an inverted range is an error.
pub fn build_data_window(config: &dyn ConfigPort) -> Result<DataWindow, EngineError> {
    let start = parse_bound(config, "start_date")?.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = parse_bound(config, "end_date")?.unwrap_or(DateTime::<Utc>::MAX_UTC);
    if start > end {
        return Err(EngineError::invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }
    let symbols = config
        .get_string("backtest", "symbols")
        .map(|raw| parse_symbols(&raw))
        .unwrap_or_default();
    Ok(DataWindow {
        symbols,
        start,
        end,
    })
}
