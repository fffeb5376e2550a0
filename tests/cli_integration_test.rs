//! CLI integration tests with real INI, strategy and CSV files on disk.
//!
//! Tests cover:
//! - Config parsing (build_backtest_config, read_params)
//! - Each subcommand end to end, including its JSON output
//! - Exit codes for config, data and strategy failures

mod common;

use common::*;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use stratlab::adapters::file_config_adapter::FileConfigAdapter;
use stratlab::cli::{self, Cli, Command};
use stratlab::domain::backtest::Backend;
use tempfile::TempDir;

const VALID_INI: &str = r#"
[backtest]
initial_capital = 10000.0
commission_fixed = 1.0
commission_pct = 0.05
close_at_end = true
backend = vectorized

[params]
fast = 3
slow = 8
"#;

// ExitCode has no PartialEq, so compare through Debug.
fn assert_exit(actual: ExitCode, expected: ExitCode) {
    assert_eq!(format!("{:?}", actual), format!("{:?}", expected));
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Workspace {
            dir: TempDir::new().unwrap(),
        };
        ws.write("config.ini", VALID_INI);
        ws.write("strategy.strat", SMA_CROSS);
        ws.write("WAVE.csv", &bars_to_csv(&bars_from_closes(&wave_closes(150), 0.5)));
        ws
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) {
        fs::write(self.path(name), content).unwrap();
    }

    fn read_json(&self, name: &str) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(self.path(name)).unwrap()).unwrap()
    }

    fn backtest(&self, backend: Option<Backend>) -> ExitCode {
        cli::run(Cli {
            command: Command::Backtest {
                config: self.path("config.ini"),
                strategy: self.path("strategy.strat"),
                data: self.path("WAVE.csv"),
                output: Some(self.path("out/run.json")),
                backend,
            },
        })
    }
}

mod config_loading {
    use super::*;

    #[test]
    fn build_backtest_config_valid_full() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let config = cli::build_backtest_config(&adapter).unwrap();
        assert_eq!(config.initial_capital, 10_000.0);
        assert_eq!(config.engine.commission.fixed, 1.0);
        assert_eq!(config.engine.commission.percent, 0.05);
        assert!(config.engine.close_at_end);
        assert!(!config.engine.allow_same_bar_reentry);
        assert_eq!(config.backend, Backend::Vectorized);
    }

    #[test]
    fn read_params_from_file() {
        let ws = Workspace::new();
        let adapter = cli::load_config(&ws.path("config.ini")).unwrap();
        let params = cli::read_params(&adapter).unwrap();
        assert_eq!(params, common::params(&[("fast", 3.0), ("slow", 8.0)]));
    }

    #[test]
    fn load_config_missing_file() {
        let result = cli::load_config(&PathBuf::from("/nonexistent/config.ini"));
        assert_exit(result.err().unwrap(), ExitCode::from(2));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_strategy_exits_zero_and_writes_verdict() {
        let ws = Workspace::new();
        let code = cli::run(Cli {
            command: Command::Validate {
                strategy: ws.path("strategy.strat"),
                output: Some(ws.path("verdict.json")),
            },
        });
        assert_exit(code, ExitCode::SUCCESS);
        let verdict = ws.read_json("verdict.json");
        assert_eq!(verdict["accepted"], true);
        assert_eq!(verdict["kind"], "None");
    }

    #[test]
    fn rejected_strategy_exits_four() {
        let ws = Workspace::new();
        ws.write("bad.strat", &format!("import os\n{}", SMA_CROSS));
        let code = cli::run(Cli {
            command: Command::Validate {
                strategy: ws.path("bad.strat"),
                output: Some(ws.path("verdict.json")),
            },
        });
        assert_exit(code, ExitCode::from(4));
        let verdict = ws.read_json("verdict.json");
        assert_eq!(verdict["accepted"], false);
        assert_eq!(verdict["kind"], "SecurityViolation");
    }

    #[test]
    fn missing_strategy_file_is_io_error() {
        let ws = Workspace::new();
        let code = cli::run(Cli {
            command: Command::Validate {
                strategy: ws.path("nope.strat"),
                output: None,
            },
        });
        assert_exit(code, ExitCode::from(1));
    }
}

mod backtest_command {
    use super::*;

    #[test]
    fn writes_run_report() {
        let ws = Workspace::new();
        assert_exit(ws.backtest(None), ExitCode::SUCCESS);

        let run = ws.read_json("out/run.json");
        assert_eq!(run["status"], "success");
        assert_eq!(run["backend"], "vectorized");
        assert_eq!(run["parameters"]["fast"], 3.0);
        assert!(!run["trades"].as_array().unwrap().is_empty());
    }

    #[test]
    fn backend_flag_overrides_config() {
        let ws = Workspace::new();
        assert_exit(ws.backtest(Some(Backend::Sequential)), ExitCode::SUCCESS);
        assert_eq!(ws.read_json("out/run.json")["backend"], "sequential");
    }

    #[test]
    fn invalid_config_exits_two() {
        let ws = Workspace::new();
        ws.write("config.ini", &VALID_INI.replace("initial_capital = 10000.0", "initial_capital = -1"));
        assert_exit(ws.backtest(None), ExitCode::from(2));
        assert!(!ws.path("out/run.json").exists());
    }

    #[test]
    fn bad_data_exits_three() {
        let ws = Workspace::new();
        ws.write("WAVE.csv", "date,price\n2024-01-01,1\n");
        assert_exit(ws.backtest(None), ExitCode::from(3));
    }

    #[test]
    fn rejected_strategy_exits_four() {
        let ws = Workspace::new();
        ws.write("strategy.strat", "strategy S extends Strategy { fn exit { return false } }");
        assert_exit(ws.backtest(None), ExitCode::from(4));
    }

    #[test]
    fn failed_run_still_writes_report() {
        let ws = Workspace::new();
        ws.write("config.ini", &format!("{}ghost = 1\n", VALID_INI));
        assert_exit(ws.backtest(None), ExitCode::from(4));

        let run = ws.read_json("out/run.json");
        assert_eq!(run["status"], "failed");
        assert!(run["error"].as_str().unwrap().contains("ghost"));
    }
}

mod parity_and_sweep_commands {
    use super::*;

    #[test]
    fn parity_reports_match() {
        let ws = Workspace::new();
        let code = cli::run(Cli {
            command: Command::Parity {
                config: ws.path("config.ini"),
                strategy: ws.path("strategy.strat"),
                data: ws.path("WAVE.csv"),
                output: Some(ws.path("parity.json")),
            },
        });
        assert_exit(code, ExitCode::SUCCESS);

        let report = ws.read_json("parity.json");
        assert!(report["mismatches"].as_array().unwrap().is_empty());
        assert_eq!(report["vectorized"]["trades"], report["sequential"]["trades"]);
    }

    #[test]
    fn sweep_writes_all_runs() {
        let ws = Workspace::new();
        let code = cli::run(Cli {
            command: Command::Sweep {
                config: ws.path("config.ini"),
                strategy: ws.path("strategy.strat"),
                data: ws.path("WAVE.csv"),
                grid: vec!["fast=2,3".into(), "slow=8,10,12".into()],
                output: Some(ws.path("sweep.json")),
            },
        });
        assert_exit(code, ExitCode::SUCCESS);

        let runs = ws.read_json("sweep.json");
        let runs = runs.as_array().unwrap();
        assert_eq!(runs.len(), 6);
        assert_eq!(runs[0]["parameters"]["fast"], 2.0);
        assert_eq!(runs[0]["parameters"]["slow"], 8.0);
        assert_eq!(runs[5]["parameters"]["fast"], 3.0);
        assert_eq!(runs[5]["parameters"]["slow"], 12.0);
        assert!(runs.iter().all(|r| r["status"] == "success"));
    }

    #[test]
    fn malformed_grid_exits_two() {
        let ws = Workspace::new();
        let code = cli::run(Cli {
            command: Command::Sweep {
                config: ws.path("config.ini"),
                strategy: ws.path("strategy.strat"),
                data: ws.path("WAVE.csv"),
                grid: vec!["fast".into()],
                output: None,
            },
        });
        assert_exit(code, ExitCode::from(2));
    }
}
