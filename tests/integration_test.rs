//! End-to-end backtests through the public API with mock ports.

mod common;

use approx::assert_relative_eq;
use chrono::Duration;
use common::*;
use fusiontrader::cli::{load_series, run_backtest_pipeline};
use fusiontrader::domain::backtest::{BacktestConfig, BacktestResult, BacktestSimulator};
use fusiontrader::domain::config_validation::DataWindow;
use fusiontrader::domain::error::EngineError;
use fusiontrader::domain::execution::CommissionModel;
use fusiontrader::domain::fusion::{
    Action, AdvisedDecisions, DecisionSource, FusionDecision, Sentiment,
};
use fusiontrader::domain::indicator::{IndicatorEngine, SignalBundle};
use fusiontrader::domain::position::Side;
use fusiontrader::domain::risk::{RiskLimits, RiskViolation};
use fusiontrader::ports::advisory_port::AdvisoryPort;
use std::collections::BTreeMap;
use std::path::Path;

fn series(entries: Vec<(&str, Vec<Bar>)>) -> BTreeMap<String, Vec<Bar>> {
    entries
        .into_iter()
        .map(|(symbol, bars)| (symbol.to_string(), bars))
        .collect()
}

fn run_technical(config: BacktestConfig, data: BTreeMap<String, Vec<Bar>>) -> BacktestResult {
    BacktestSimulator::technical(config, data)
        .unwrap()
        .run()
        .unwrap()
}

mod technical_runs {
    use super::*;

    #[test]
    fn flat_market_never_trades() {
        let result = run_technical(sample_config(), series(vec![("BHP", flat_bars("BHP", 100, 50.0))]));

        assert!(result.fills.is_empty());
        assert!(result.rejections.is_empty());
        assert_eq!(result.report.equity_curve.len(), 100);
        assert_relative_eq!(result.report.total_return, 0.0);
        assert_relative_eq!(result.report.final_equity, 100_000.0);
        assert_relative_eq!(result.report.max_drawdown, 0.0);
    }

    #[test]
    fn rising_market_buys_with_slippage_and_commission() {
        let mut config = sample_config();
        config.execution.commission = CommissionModel::Flat { fee: 5.0 };
        let bars = rising_bars("BHP", 60);
        let result = run_technical(config.clone(), series(vec![("BHP", bars.clone())]));

        assert!(!result.fills.is_empty());
        assert!(result.fills.iter().all(|f| f.side == Side::Buy));
        assert!(result.report.final_equity > config.initial_cash);

        let first = &result.fills[0];
        let bar = bars
            .iter()
            .find(|b| b.timestamp == first.timestamp)
            .unwrap();
        assert_relative_eq!(first.price, bar.close * (1.0 + 5.0 / 10_000.0), epsilon = 1e-9);
        assert_relative_eq!(first.commission, 5.0);

        let expected_qty =
            (config.initial_cash * config.position_size_percent / 100.0 / first.price).floor() as i64;
        assert_eq!(first.quantity, expected_qty);

        let point = result
            .report
            .equity_curve
            .iter()
            .find(|p| p.timestamp == first.timestamp)
            .unwrap();
        let slippage_cost = first.quantity as f64 * (first.price - bar.close);
        assert_relative_eq!(
            point.equity,
            config.initial_cash - slippage_cost - 5.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn no_signal_before_warmup_completes() {
        let config = sample_config();
        let warmup = config.indicators.required_history();
        let bars = rising_bars("BHP", 60);
        let result = run_technical(config, series(vec![("BHP", bars.clone())]));

        let first_signal_bar = bars[warmup - 1].timestamp;
        assert!(result.fills.iter().all(|f| f.timestamp >= first_signal_bar));
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let data = series(vec![
            ("BHP", rising_bars("BHP", 70)),
            ("CBA", flat_bars("CBA", 70, 20.0)),
        ]);
        let a = run_technical(sample_config(), data.clone());
        let b = run_technical(sample_config(), data);
        assert_eq!(a, b);
    }

    #[test]
    fn report_is_consistent_with_ledger() {
        let mut config = sample_config();
        config.execution.commission = CommissionModel::Percent { pct: 0.1 };
        let result = run_technical(config, series(vec![("BHP", rising_bars("BHP", 80))]));

        assert_eq!(result.report.trade_count, result.fills.len());
        let commission: f64 = result.fills.iter().map(|f| f.commission).sum();
        assert_relative_eq!(result.report.total_commission, commission, epsilon = 1e-9);
        assert_relative_eq!(
            result.report.final_equity,
            result.report.equity_curve.last().unwrap().equity
        );
        assert_relative_eq!(result.final_snapshot.equity, result.report.final_equity);
    }
}

mod risk_enforcement {
    use super::*;

    #[test]
    fn daily_loss_blocks_buys_but_not_sells() {
        let config = BacktestConfig {
            indicators: small_indicators(),
            position_size_percent: 90.0,
            risk: RiskLimits {
                max_position_size_percent: 100.0,
                max_portfolio_exposure_percent: 100.0,
                ..RiskLimits::default()
            },
            ..BacktestConfig::default()
        };
        // Signals start on the fourth bar; every bar is on the same UTC day.
        let bars = hourly_bars("BHP", &[100.0, 100.0, 100.0, 100.0, 98.0, 96.0, 96.0, 96.0]);
        let script = [Action::Buy, Action::Hold, Action::Hold, Action::Buy, Action::Sell];
        let mut calls = 0;
        let scripted = move |_: &SignalBundle| {
            let action = script.get(calls).copied().unwrap_or(Action::Hold);
            calls += 1;
            FusionDecision::manual(action, 90.0, "scripted")
        };

        let result = BacktestSimulator::new(config, series(vec![("BHP", bars.clone())]), scripted)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].side, Side::Buy);
        assert_eq!(result.fills[0].timestamp, bars[3].timestamp);
        assert_eq!(result.fills[1].side, Side::Sell);
        assert_eq!(result.fills[1].quantity, result.fills[0].quantity);

        assert_eq!(result.rejections.len(), 1);
        let rejection = &result.rejections[0];
        assert_eq!(rejection.timestamp, bars[6].timestamp);
        assert_eq!(rejection.side, Side::Buy);
        assert!(rejection.reasons.contains(&RiskViolation::DailyLoss));
        assert_eq!(result.final_snapshot.quantity("BHP"), 0);
    }

    #[test]
    fn trade_frequency_caps_fills_per_day() {
        let config = BacktestConfig {
            indicators: small_indicators(),
            risk: RiskLimits {
                max_trades_per_day: 2,
                ..RiskLimits::default()
            },
            ..BacktestConfig::default()
        };
        let bars = hourly_bars("BHP", &[10.0; 10]);
        let always_buy = |_: &SignalBundle| FusionDecision::manual(Action::Buy, 80.0, "scripted");

        let result = BacktestSimulator::new(config, series(vec![("BHP", bars)]), always_buy)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(result.fills.len(), 2);
        assert!(!result.rejections.is_empty());
        assert!(result
            .rejections
            .iter()
            .all(|r| r.reasons.contains(&RiskViolation::TradeFrequency)));
    }

    #[test]
    fn low_confidence_is_rejected() {
        let config = BacktestConfig {
            indicators: small_indicators(),
            ..BacktestConfig::default()
        };
        let bars = flat_bars("BHP", 6, 10.0);
        let timid = |_: &SignalBundle| FusionDecision::manual(Action::Buy, 10.0, "scripted");

        let result = BacktestSimulator::new(config, series(vec![("BHP", bars)]), timid)
            .unwrap()
            .run()
            .unwrap();

        assert!(result.fills.is_empty());
        assert_eq!(result.rejections.len(), 3);
        assert_eq!(result.rejections[0].reasons, vec![RiskViolation::Confidence]);
    }
}

mod advisory_fusion {
    use super::*;

    #[test]
    fn failing_advisory_degrades_to_technical() {
        let config = sample_config();
        let data = series(vec![("BHP", rising_bars("BHP", 60))]);
        let technical = run_technical(config.clone(), data.clone());

        let mut advised = AdvisedDecisions::new(FailingAdvisory, config.fusion.clone());
        let result = BacktestSimulator::new(config.clone(), data, |s: &SignalBundle| advised.decide(s))
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(result, technical);
        let signal_bars = 60 - config.indicators.required_history() + 1;
        assert_eq!(advised.degraded_count(), signal_bars);
    }

    #[test]
    fn bearish_advisory_vetoes_technical_buys() {
        let config = sample_config();
        let data = series(vec![("BHP", rising_bars("BHP", 60))]);
        assert!(!run_technical(config.clone(), data.clone()).fills.is_empty());

        let advisory = FixedAdvisory::new(Sentiment::Bearish, Action::Sell, 100.0);
        let decisions = AdvisedDecisions::new(&advisory, config.fusion.clone());
        let result = BacktestSimulator::new(config, data, decisions)
            .unwrap()
            .run()
            .unwrap();

        assert!(result.fills.is_empty());
        let prompts = advisory.prompts.borrow();
        assert_eq!(prompts.len(), 11);
        assert!(prompts.iter().all(|p| p.contains("Composite score:")));
        assert!(prompts[0].contains("BHP"));
    }
}

mod look_ahead {
    use super::*;

    #[test]
    fn decisions_only_see_history() {
        let config = BacktestConfig {
            indicators: small_indicators(),
            ..BacktestConfig::default()
        };
        let bhp = rising_bars("BHP", 12);
        let closes: Vec<f64> = (0..6).map(|i| 40.0 - i as f64).collect();
        let cba = bars_from_closes("CBA", &closes, Duration::days(2));
        let data = series(vec![("BHP", bhp.clone()), ("CBA", cba.clone())]);

        let mut seen: Vec<SignalBundle> = Vec::new();
        let recorder = |s: &SignalBundle| {
            seen.push(s.clone());
            FusionDecision::hold("observe")
        };
        BacktestSimulator::new(config.clone(), data, recorder)
            .unwrap()
            .run()
            .unwrap();

        assert!(seen.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(seen.iter().filter(|s| s.symbol == "BHP").count(), 12 - 3);
        assert_eq!(seen.iter().filter(|s| s.symbol == "CBA").count(), 6 - 3);

        let engine = IndicatorEngine::new(config.indicators).unwrap();
        for bundle in &seen {
            let bars = if bundle.symbol == "BHP" { &bhp } else { &cba };
            let index = bars
                .iter()
                .position(|b| b.timestamp == bundle.timestamp)
                .unwrap();
            let expected = engine.compute(bars, index).unwrap();
            assert_eq!(bundle, &expected);
        }
    }
}

mod failures {
    use super::*;

    #[test]
    fn malformed_config_fails_before_running() {
        let mut config = sample_config();
        config.indicators.short_window = 0;
        let result = BacktestSimulator::technical(config, series(vec![("BHP", flat_bars("BHP", 60, 10.0))]));
        assert!(matches!(result, Err(EngineError::ConfigInvalid { .. })));
    }

    #[test]
    fn corrupt_bar_is_an_integrity_error() {
        let mut bars = flat_bars("BHP", 60, 10.0);
        bars[30].high = 5.0;
        let result = BacktestSimulator::technical(sample_config(), series(vec![("BHP", bars)]));
        assert!(matches!(result, Err(EngineError::DataIntegrity { .. })));
    }

    #[test]
    fn out_of_order_bars_are_rejected() {
        let mut bars = flat_bars("BHP", 60, 10.0);
        bars.swap(10, 11);
        let result = BacktestSimulator::technical(sample_config(), series(vec![("BHP", bars)]));
        assert!(matches!(result, Err(EngineError::DataIntegrity { .. })));
    }
}

mod pipeline {
    use super::*;

    fn window(symbols: &[&str]) -> DataWindow {
        DataWindow {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            start: chrono::DateTime::<chrono::Utc>::MIN_UTC,
            end: chrono::DateTime::<chrono::Utc>::MAX_UTC,
        }
    }

    #[test]
    fn skips_failing_symbols_and_writes_report() {
        let port = MockDataPort::new()
            .with_bars("BHP", rising_bars("BHP", 60))
            .with_error("XYZ", "file not found");
        let reports = RecordingReportPort::default();

        let result = run_backtest_pipeline(
            &port,
            None,
            sample_config(),
            &window(&["BHP", "XYZ"]),
            &reports,
            Path::new("out.csv"),
        )
        .unwrap();

        let written = reports.written.borrow();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, result.report);
        assert_eq!(written[0].1, result.fills);
        assert_eq!(written[0].2, result.rejections);
        assert_eq!(written[0].3, Path::new("out.csv"));
        assert!(result.fills.iter().all(|f| f.symbol == "BHP"));
    }

    #[test]
    fn load_series_skips_failed_and_empty_symbols() {
        let port = MockDataPort::new()
            .with_bars("BHP", rising_bars("BHP", 10))
            .with_bars("RIO", Vec::new())
            .with_error("XYZ", "file not found");

        let series = load_series(&port, &window(&["BHP", "RIO", "XYZ"])).unwrap();
        assert_eq!(series.keys().collect::<Vec<_>>(), vec!["BHP"]);
        assert_eq!(series["BHP"].len(), 10);
    }

    #[test]
    fn rejections_reach_the_report_port() {
        let port = MockDataPort::new().with_bars("BHP", rising_bars("BHP", 60));
        let config = BacktestConfig {
            risk: RiskLimits {
                max_position_size_percent: 5.0,
                ..RiskLimits::default()
            },
            ..sample_config()
        };
        let reports = RecordingReportPort::default();

        let result = run_backtest_pipeline(
            &port,
            None,
            config,
            &window(&["BHP"]),
            &reports,
            Path::new("out.csv"),
        )
        .unwrap();

        assert!(result.fills.is_empty());
        assert!(!result.rejections.is_empty());
        let written = reports.written.borrow();
        assert_eq!(written[0].2, result.rejections);
        assert!(written[0].2.iter().all(|r| r.reasons.contains(&RiskViolation::PositionSize)));
    }

    #[test]
    fn no_usable_symbols_is_a_data_error() {
        let port = MockDataPort::new().with_error("XYZ", "file not found");
        let reports = RecordingReportPort::default();
        let result = run_backtest_pipeline(
            &port,
            None,
            sample_config(),
            &window(&["XYZ", "ABC"]),
            &reports,
            Path::new("out.csv"),
        );
        assert!(matches!(result, Err(EngineError::Data { .. })));
        assert!(reports.written.borrow().is_empty());
    }

    #[test]
    fn advisory_port_is_consulted() {
        let port = MockDataPort::new().with_bars("BHP", rising_bars("BHP", 55));
        let advisory = FixedAdvisory::new(Sentiment::Bullish, Action::Buy, 90.0);
        let reports = RecordingReportPort::default();

        run_backtest_pipeline(
            &port,
            Some(&advisory as &dyn AdvisoryPort),
            sample_config(),
            &window(&["BHP"]),
            &reports,
            Path::new("out.csv"),
        )
        .unwrap();

        assert_eq!(advisory.prompts.borrow().len(), 55 - 50 + 1);
    }
}
