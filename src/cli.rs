//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{self, Backend, BacktestConfig, RunResult};
use crate::domain::bars::BarSeries;
use crate::domain::config_validation::{
    BACKTEST_SECTION, PARAMS_SECTION, number, validate_backtest_config,
};
use crate::domain::error::StratlabError;
use crate::domain::execution::{CommissionModel, EngineConfig};
use crate::domain::sandbox;
use crate::domain::script_ast::Program;
use crate::domain::sweep::{self, ParamGrid};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

/// Exit code when the two backends disagree.
const PARITY_MISMATCH_EXIT: u8 = 5;

#[derive(Parser, Debug)]
#[command(name = "stratlab", about = "Sandboxed strategy backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a strategy file without running it on real data
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        backend: Option<Backend>,
    },
    /// Run both backends and compare their trade ledgers
    Parity {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Backtest every combination of a parameter grid
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        /// `name=v1,v2,...`, repeatable
        #[arg(short, long, required = true)]
        grid: Vec<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Validate { strategy, output } => run_validate(&strategy, output.as_deref()),
        Command::Backtest {
            config,
            strategy,
            data,
            output,
            backend,
        } => run_backtest(&config, &strategy, &data, output.as_deref(), backend),
        Command::Parity {
            config,
            strategy,
            data,
            output,
        } => run_parity(&config, &strategy, &data, output.as_deref()),
        Command::Sweep {
            config,
            strategy,
            data,
            grid,
            output,
        } => run_sweep(&config, &strategy, &data, &grid, output.as_deref()),
    }
}

fn fail(err: StratlabError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        fail(StratlabError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
    })
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, StratlabError> {
    let backend = match adapter.get_string(BACKTEST_SECTION, "backend") {
        Some(raw) => raw.parse().map_err(|reason| StratlabError::ConfigInvalid {
            section: BACKTEST_SECTION.into(),
            key: "backend".into(),
            reason,
        })?,
        None => Backend::default(),
    };
    let defaults = BacktestConfig::default();

    Ok(BacktestConfig {
        initial_capital: adapter.get_double(
            BACKTEST_SECTION,
            "initial_capital",
            defaults.initial_capital,
        ),
        risk_free_rate: adapter.get_double(BACKTEST_SECTION, "risk_free_rate", 0.0),
        engine: EngineConfig {
            commission: CommissionModel {
                fixed: adapter.get_double(BACKTEST_SECTION, "commission_fixed", 0.0),
                percent: adapter.get_double(BACKTEST_SECTION, "commission_pct", 0.0),
                per_unit: adapter.get_double(BACKTEST_SECTION, "commission_per_unit", 0.0),
            },
            allow_same_bar_reentry: adapter.get_bool(
                BACKTEST_SECTION,
                "allow_same_bar_reentry",
                false,
            ),
            close_at_end: adapter.get_bool(BACKTEST_SECTION, "close_at_end", false),
        },
        backend,
    })
}

/// Parameter overrides from the `[params]` section.
pub fn read_params(adapter: &dyn ConfigPort) -> Result<BTreeMap<String, f64>, StratlabError> {
    let mut params = BTreeMap::new();
    for key in adapter.keys(PARAMS_SECTION) {
        if let Some(value) = number(adapter, PARAMS_SECTION, &key)? {
            params.insert(key, value);
        }
    }
    Ok(params)
}

/// Parse one `--grid name=v1,v2,...` argument.
pub fn parse_grid_arg(arg: &str) -> Result<(String, Vec<f64>), StratlabError> {
    let invalid = |reason: String| StratlabError::ConfigInvalid {
        section: "grid".into(),
        key: arg.to_string(),
        reason,
    };
    let (name, values) = arg
        .split_once('=')
        .ok_or_else(|| invalid("expected name=v1,v2,...".into()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("parameter name is empty".into()));
    }
    let values = values
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .ok_or_else(|| invalid(format!("'{}' is not a finite number", v.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name.to_string(), values))
}

fn read_strategy(path: &Path) -> Result<String, ExitCode> {
    eprintln!("Loading strategy from {}", path.display());
    fs::read_to_string(path).map_err(|e| fail(e.into()))
}

fn admit_strategy(source: &str) -> Result<Program, ExitCode> {
    sandbox::admit(source).map_err(|verdict| {
        fail(StratlabError::StrategyRejected {
            kind: verdict.kind.to_string(),
            message: verdict.message,
        })
    })
}

fn load_bars(path: &Path) -> Result<BarSeries, ExitCode> {
    eprintln!("Loading bars from {}", path.display());
    let (adapter, symbol) = CsvAdapter::for_file(path);
    adapter.fetch_bars(&symbol).map_err(fail)
}

/// Everything a run needs, loaded and validated.
struct RunInputs {
    config: BacktestConfig,
    params: BTreeMap<String, f64>,
    program: Program,
    bars: BarSeries,
}

fn prepare(
    config_path: &Path,
    strategy_path: &Path,
    data_path: &Path,
) -> Result<RunInputs, ExitCode> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter).map_err(fail)?;
    let config = build_backtest_config(&adapter).map_err(fail)?;
    let params = read_params(&adapter).map_err(fail)?;

    let source = read_strategy(strategy_path)?;
    let program = admit_strategy(&source)?;
    let bars = load_bars(data_path)?;

    Ok(RunInputs {
        config,
        params,
        program,
        bars,
    })
}

/// Print to stdout when no output path is given.
fn emit<W, J>(output: Option<&Path>, write: W, stdout_json: J) -> Result<(), StratlabError>
where
    W: FnOnce(&JsonReportAdapter, &str) -> Result<(), StratlabError>,
    J: FnOnce() -> serde_json::Result<String>,
{
    match output {
        Some(path) => {
            write(&JsonReportAdapter::new(), &path.display().to_string())?;
            eprintln!("\nReport written to: {}", path.display());
            Ok(())
        }
        None => {
            let json = stdout_json().map_err(|e| StratlabError::Report {
                reason: format!("failed to serialize report: {}", e),
            })?;
            println!("{json}");
            Ok(())
        }
    }
}

fn print_summary(result: &RunResult) {
    let m = &result.metrics;
    eprintln!("\n=== Results ({}) ===", result.backend);
    eprintln!("Net Profit:       {:.2}", m.net_profit);
    eprintln!("Total Return:     {:.2}%", m.total_return_pct);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown_pct);
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    if !result.hook_failures.is_empty() {
        eprintln!("Hook Failures:    {}", result.hook_failures.len());
    }
}

fn run_validate(strategy_path: &Path, output: Option<&Path>) -> ExitCode {
    let source = match read_strategy(strategy_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let verdict = sandbox::validate(&source);
    if verdict.accepted {
        eprintln!("Strategy is valid.");
    } else {
        eprintln!("Strategy rejected ({}):\n{}", verdict.kind, verdict.message);
    }

    if let Err(e) = emit(
        output,
        |adapter, path| adapter.write_verdict(&verdict, path),
        || serde_json::to_string_pretty(&verdict),
    ) {
        return fail(e);
    }

    if verdict.accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(&StratlabError::StrategyRejected {
            kind: verdict.kind.to_string(),
            message: verdict.message,
        })
    }
}

fn run_backtest(
    config_path: &Path,
    strategy_path: &Path,
    data_path: &Path,
    output: Option<&Path>,
    backend: Option<Backend>,
) -> ExitCode {
    let mut inputs = match prepare(config_path, strategy_path, data_path) {
        Ok(i) => i,
        Err(code) => return code,
    };
    if let Some(backend) = backend {
        inputs.config.backend = backend;
    }

    eprintln!(
        "Running backtest: {} bars, {} backend",
        inputs.bars.len(),
        inputs.config.backend
    );
    let mut progress = |done: usize, total: usize| {
        tracing::debug!(done, total, "engine progress");
    };
    let result = backtest::run_backtest_with_progress(
        &inputs.program,
        &inputs.params,
        &inputs.bars,
        &inputs.config,
        Some(&mut progress),
    );

    match &result.error {
        None => print_summary(&result),
        Some(error) => eprintln!("error: {error}"),
    }

    if let Err(e) = emit(
        output,
        |adapter, path| adapter.write_run(&result, path),
        || serde_json::to_string_pretty(&result),
    ) {
        return fail(e);
    }

    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(4)
    }
}

fn run_parity(
    config_path: &Path,
    strategy_path: &Path,
    data_path: &Path,
    output: Option<&Path>,
) -> ExitCode {
    let inputs = match prepare(config_path, strategy_path, data_path) {
        Ok(i) => i,
        Err(code) => return code,
    };

    eprintln!("Running both backends on {} bars", inputs.bars.len());
    let report =
        backtest::check_parity(&inputs.program, &inputs.params, &inputs.bars, &inputs.config);

    if let Err(e) = emit(
        output,
        |adapter, path| adapter.write_parity(&report, path),
        || serde_json::to_string_pretty(&report),
    ) {
        return fail(e);
    }

    for run in [&report.vectorized, &report.sequential] {
        if let Some(error) = &run.error {
            eprintln!("error: {} backend failed: {}", run.backend, error);
            return ExitCode::from(4);
        }
    }

    if report.is_match() {
        eprintln!(
            "Backends agree on {} trades.",
            report.vectorized.trades.len()
        );
        ExitCode::SUCCESS
    } else {
        eprintln!("Backends disagree:");
        for mismatch in &report.mismatches {
            eprintln!("  {}", mismatch);
        }
        ExitCode::from(PARITY_MISMATCH_EXIT)
    }
}

fn run_sweep(
    config_path: &Path,
    strategy_path: &Path,
    data_path: &Path,
    grid_args: &[String],
    output: Option<&Path>,
) -> ExitCode {
    let mut grid = ParamGrid::new();
    for arg in grid_args {
        match parse_grid_arg(arg) {
            Ok((name, values)) => {
                grid.insert(name, values);
            }
            Err(e) => return fail(e),
        }
    }

    let inputs = match prepare(config_path, strategy_path, data_path) {
        Ok(i) => i,
        Err(code) => return code,
    };

    let results = sweep::run_sweep(
        &inputs.program,
        &inputs.params,
        &grid,
        &inputs.bars,
        &inputs.config,
    );

    eprintln!("\n=== Sweep ({} runs) ===", results.len());
    for result in &results {
        let label = result
            .parameters
            .iter()
            .filter(|(name, _)| grid.contains_key(*name))
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        match &result.error {
            None => eprintln!(
                "  {}:  {} trades, net {:.2}, sharpe {:.2}",
                label,
                result.metrics.total_trades,
                result.metrics.net_profit,
                result.metrics.sharpe_ratio
            ),
            Some(error) => eprintln!("  {}:  failed: {}", label, error),
        }
    }

    if let Err(e) = emit(
        output,
        |adapter, path| adapter.write_sweep(&results, path),
        || serde_json::to_string_pretty(&results),
    ) {
        return fail(e);
    }

    ExitCode::SUCCESS
}
