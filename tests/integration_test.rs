//! Integration tests for the validate -> run -> measure pipeline.
//!
//! Tests cover:
//! - Full pipeline from a data port through metrics
//! - Failure semantics (precompute errors, unknown parameters, rejected source)
//! - Hook failures recorded by the sequential backend
//! - Determinism and sweep ordering
//! - CSV and JSON adapters around the pipeline

mod common;

use approx::assert_relative_eq;
use common::*;
use std::fs;
use stratlab::adapters::csv_adapter::CsvAdapter;
use stratlab::adapters::json_report_adapter::JsonReportAdapter;
use stratlab::domain::backtest::{
    Backend, BacktestConfig, RunStatus, check_parity, run_backtest, run_source,
};
use stratlab::domain::error::StratlabError;
use stratlab::domain::metrics::Metrics;
use stratlab::domain::position::ExitReason;
use stratlab::domain::sandbox;
use stratlab::domain::script_parser::parse;
use stratlab::domain::sweep::{ParamGrid, run_sweep};
use stratlab::ports::data_port::DataPort;
use stratlab::ports::report_port::ReportPort;
use tempfile::TempDir;

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap()
}

mod full_backtest_pipeline {
    use super::*;

    #[test]
    fn full_pipeline_with_mock_data_port() {
        let port = MockDataPort::new().with_bars("WAVE", bars_from_closes(&wave_closes(200), 0.5));
        let bars = port.fetch_bars("WAVE").unwrap();
        assert_eq!(bars.len(), 200);

        let config = sample_config();
        let result = run_source(SMA_CROSS, &params(&[]), &bars, &config);

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.strategy.as_deref(), Some("SmaCross"));
        assert_eq!(result.parameters["fast"], 3.0);
        assert_eq!(result.parameters["slow"], 8.0);
        assert!(result.error.is_none());
        assert!(!result.trades.is_empty());

        for trade in &result.trades {
            assert!(trade.exit_index > trade.entry_index);
            assert_eq!(trade.bars_held, trade.exit_index - trade.entry_index);
            assert!(trade.mae >= 0.0 && trade.mfe >= 0.0);
            assert!(trade.initial_risk.is_none());
        }
        for pair in result.trades.windows(2) {
            assert!(pair[1].entry_index > pair[0].exit_index);
        }

        let m = &result.metrics;
        let pnl_sum: f64 = result.trades.iter().map(|t| t.pnl).sum();
        assert_eq!(m.total_trades, result.trades.len());
        assert_eq!(m.long_trades + m.short_trades, m.total_trades);
        assert_eq!(
            m.winning_trades + m.losing_trades + m.breakeven_trades,
            m.total_trades
        );
        assert_relative_eq!(m.net_profit, pnl_sum, epsilon = 1e-9);
        assert_relative_eq!(m.final_equity, config.initial_capital + pnl_sum, epsilon = 1e-9);
        assert_relative_eq!(m.gross_profit - m.gross_loss, m.net_profit, epsilon = 1e-9);
        assert!(m.total_commission > 0.0);
    }

    #[test]
    fn data_port_error_propagates() {
        let port = MockDataPort::new().with_error("BAD", "connection refused");
        let err = port.fetch_bars("BAD").unwrap_err();
        assert!(matches!(err, StratlabError::Data { reason } if reason == "connection refused"));
    }

    #[test]
    fn both_backends_agree_on_dsl_strategies() {
        let bars = bars_from_closes(&wave_closes(250), 1.5);
        for source in [SMA_CROSS, BREAKOUT] {
            let program = sandbox::admit(source).unwrap();
            let report = check_parity(&program, &params(&[]), &bars, &sample_config());
            assert!(report.is_match(), "{:?}", report.mismatches);
            assert!(report.vectorized.is_success());
            assert!(report.sequential.is_success());
            assert!(report.sequential.hook_failures.is_empty());
        }
    }

    #[test]
    fn breakout_uses_stops_and_position_size() {
        let bars = bars_from_closes(&wave_closes(250), 1.5);
        let result = run_source(BREAKOUT, &params(&[]), &bars, &sample_config());
        assert!(result.is_success());
        assert!(!result.trades.is_empty());
        assert!(result.trades.iter().all(|t| t.size == 2.0));
        assert!(result.trades.iter().all(|t| t.initial_risk.is_some()));
        assert!(
            result
                .trades
                .iter()
                .any(|t| matches!(t.exit_reason, ExitReason::StopLoss | ExitReason::TakeProfit))
        );
    }

    #[test]
    fn empty_series_runs_clean() {
        let bars = bars_from_closes(&[], 0.0);
        let result = run_source(SMA_CROSS, &params(&[]), &bars, &sample_config());
        assert!(result.is_success());
        assert!(result.trades.is_empty());
        assert_eq!(result.metrics, Metrics::empty(sample_config().initial_capital));
    }
}

mod failure_semantics {
    use super::*;

    #[test]
    fn precompute_error_fails_run_with_empty_metrics() {
        let source = SMA_CROSS.replace(
            "fn entry_long { return cross_above(fast_ma, slow_ma) }",
            "fn entry_long { return fast_ma - slow_ma }",
        );
        let program = parse(&source).unwrap();
        let config = sample_config();
        let result = run_backtest(&program, &params(&[]), &bars_from_closes(&wave_closes(50), 0.5), &config);

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap().starts_with("entry_long:"));
        assert!(result.trades.is_empty());
        assert_eq!(result.metrics, Metrics::empty(config.initial_capital));
    }

    #[test]
    fn unknown_parameter_fails_run() {
        let bars = bars_from_closes(&wave_closes(50), 0.5);
        let result = run_source(SMA_CROSS, &params(&[("ghost", 1.0)]), &bars, &sample_config());
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("ghost"));
    }

    #[test]
    fn invalid_period_parameter_fails_run() {
        let bars = bars_from_closes(&wave_closes(50), 0.5);
        let result = run_source(SMA_CROSS, &params(&[("fast", 2.5)]), &bars, &sample_config());
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap().starts_with("define_variables:"));
    }

    #[test]
    fn rejected_source_fails_run_with_verdict_kind() {
        let bars = bars_from_closes(&wave_closes(50), 0.5);
        let source = format!("import os\n{}", SMA_CROSS);
        let result = run_source(&source, &params(&[]), &bars, &sample_config());
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.strategy.is_none());
        assert!(result.error.as_deref().unwrap().starts_with("SecurityViolation:"));
    }

    #[test]
    fn hook_failures_recorded_and_run_continues() {
        let source = SMA_CROSS.replace(
            "fn exit { return (is_long and fast_ma < slow_ma) or (is_short and fast_ma > slow_ma) }",
            "fn exit { return ta.sma(close, 2) > 0 }",
        );
        let program = parse(&source).unwrap();
        let bars = bars_from_closes(&wave_closes(120), 0.5);
        let config = BacktestConfig {
            backend: Backend::Sequential,
            ..sample_config()
        };

        let result = run_backtest(&program, &params(&[]), &bars, &config);
        assert!(result.is_success());
        assert!(!result.hook_failures.is_empty());
        assert!(result.hook_failures.iter().all(|f| f.message.contains("ta.sma")));
        // No exit ever fires, so the first position is held to the end.
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfData);
        assert_eq!(result.trades[0].exit_index, bars.len() - 1);
    }
}

mod determinism_and_sweep {
    use super::*;

    #[test]
    fn identical_inputs_give_identical_results() {
        let bars = bars_from_closes(&wave_closes(300), 1.0);
        let program = sandbox::admit(BREAKOUT).unwrap();
        for backend in [Backend::Vectorized, Backend::Sequential] {
            let config = BacktestConfig {
                backend,
                ..sample_config()
            };
            let a = run_backtest(&program, &params(&[]), &bars, &config);
            let b = run_backtest(&program, &params(&[]), &bars, &config);
            assert_eq!(to_json(&a), to_json(&b));
        }
    }

    #[test]
    fn sweep_matches_individual_runs_in_grid_order() {
        let bars = bars_from_closes(&wave_closes(200), 0.5);
        let program = sandbox::admit(SMA_CROSS).unwrap();
        let config = sample_config();
        let mut grid = ParamGrid::new();
        grid.insert("fast".into(), vec![2.0, 4.0]);
        grid.insert("slow".into(), vec![8.0, 13.0]);

        let results = run_sweep(&program, &params(&[]), &grid, &bars, &config);
        assert_eq!(results.len(), 4);

        let expected = [(2.0, 8.0), (2.0, 13.0), (4.0, 8.0), (4.0, 13.0)];
        for (result, (fast, slow)) in results.iter().zip(expected) {
            assert_eq!(result.parameters["fast"], fast);
            assert_eq!(result.parameters["slow"], slow);
            let single = run_backtest(
                &program,
                &params(&[("fast", fast), ("slow", slow)]),
                &bars,
                &config,
            );
            assert_eq!(to_json(result), to_json(&single));
        }
    }
}

mod adapters_around_pipeline {
    use super::*;

    #[test]
    fn csv_round_trip_feeds_pipeline() {
        let bars = bars_from_closes(&wave_closes(80), 0.5);
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("WAVE.csv"), bars_to_csv(&bars)).unwrap();

        let loaded = CsvAdapter::new(dir.path().to_path_buf())
            .fetch_bars("WAVE")
            .unwrap();
        assert_eq!(loaded, bars);

        let a = run_source(SMA_CROSS, &params(&[]), &loaded, &sample_config());
        let b = run_source(SMA_CROSS, &params(&[]), &bars, &sample_config());
        assert_eq!(to_json(&a), to_json(&b));
    }

    #[test]
    fn json_report_contains_envelope() {
        let bars = bars_from_closes(&wave_closes(150), 0.5);
        let result = run_source(SMA_CROSS, &params(&[]), &bars, &sample_config());
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");

        JsonReportAdapter::new()
            .write_run(&result, path.to_str().unwrap())
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["backend"], "vectorized");
        assert_eq!(json["strategy"], "SmaCross");
        assert!(json["error"].is_null());
        assert_eq!(
            json["trades"].as_array().unwrap().len(),
            result.trades.len()
        );
        assert_eq!(
            json["metrics"]["total_trades"].as_u64().unwrap() as usize,
            result.metrics.total_trades
        );
        assert_eq!(json["parameters"]["fast"], 3.0);
    }

    #[test]
    fn failed_run_report_keeps_error() {
        let bars = bars_from_closes(&wave_closes(20), 0.5);
        let result = run_source("not a strategy", &params(&[]), &bars, &sample_config());
        let json: serde_json::Value = serde_json::from_str(&to_json(&result)).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json["error"].as_str().unwrap().starts_with("SyntaxError:"));
        assert_eq!(json["metrics"]["total_trades"], 0);
        assert!(json["trades"].as_array().unwrap().is_empty());
    }
}
