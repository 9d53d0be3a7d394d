//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::adapters::memory_strategy_repository::MemoryStrategyRepository;
use crate::adapters::trade_csv::write_trades_file;
use crate::domain::backtest::{self as backtest_engine, RunStatus};
use crate::domain::config_validation::{
    build_backtest_config, build_signal_backtest_config, build_signal_config, build_strategy_spec, read_codes,
};
use crate::domain::error::FundlabError;
use crate::domain::ledger::EquityPoint;
use crate::domain::metrics::{MetricContext, MetricRegistry, MetricReport, report_for};
use crate::domain::signal::SignalBlender;
use crate::domain::signal_backtest::{SignalContexts, run_signal_backtest};
use crate::domain::strategy::{StrategyPreset, StrategySpec};
use crate::domain::universe::{MIN_PRICE_POINTS, load_universe};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::PriceDataPort;
use crate::ports::report_port::ReportPort;
use crate::ports::strategy_repository::StrategyRepository;

#[derive(Parser, Debug)]
#[command(name = "fundlab", about = "Fund basket backtester and signal blender")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a basket strategy backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory of `<code>.csv` price files (overrides [backtest] data_dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Preset id to use instead of the [strategy] section
        #[arg(short, long)]
        strategy: Option<String>,
        /// JSON report path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Trade CSV path
        #[arg(long)]
        trades: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the single-fund signal backtest
    Signal {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Fund code (overrides [signal] code)
        #[arg(long)]
        code: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        trades: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the built-in strategy presets
    Presets,
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Backtest {
            config,
            data_dir,
            strategy,
            output,
            trades,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config, strategy.as_deref())
            } else {
                run_backtest(
                    &config,
                    data_dir.as_deref(),
                    strategy.as_deref(),
                    output.as_deref(),
                    trades.as_deref(),
                )
            }
        }
        Command::Signal {
            config,
            data_dir,
            code,
            output,
            trades,
        } => run_signal(
            &config,
            data_dir.as_deref(),
            code.as_deref(),
            output.as_deref(),
            trades.as_deref(),
        ),
        Command::Validate { config } => run_validate(&config),
        Command::Presets => {
            run_presets();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, FundlabError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

fn resolve_strategy(adapter: &dyn ConfigPort, preset: Option<&str>) -> Result<StrategySpec, FundlabError> {
    match preset {
        Some(id) => MemoryStrategyRepository::with_presets().get(id),
        None => build_strategy_spec(adapter),
    }
}

fn resolve_data_dir(adapter: &dyn ConfigPort, section: &str, flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| adapter.get_string(section, "data_dir").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_backtest(
    config_path: &Path,
    data_dir: Option<&Path>,
    preset: Option<&str>,
    output_path: Option<&Path>,
    trades_path: Option<&Path>,
) -> Result<(), FundlabError> {
    let adapter = load_config(config_path)?;
    let bt_config = build_backtest_config(&adapter)?;
    let codes = read_codes(&adapter, "backtest")?;
    let strategy = resolve_strategy(&adapter, preset)?;
    eprintln!("Strategy: {}", strategy.name);

    let data = CsvAdapter::new(resolve_data_dir(&adapter, "backtest", data_dir));
    let min_points = adapter.get_int("backtest", "min_points", MIN_PRICE_POINTS as i64).max(1) as usize;
    let universe = load_universe(&data, &codes, bt_config.start_date, bt_config.end_date, min_points)?;
    for skipped in &universe.skipped {
        eprintln!("warning: skipping {} ({:?})", skipped.code, skipped.reason);
    }
    if let Some(benchmark) = bt_config.benchmark.as_deref() {
        if !universe.codes().contains(&benchmark) {
            warn!(benchmark, "benchmark is not part of the loaded universe, benchmark metrics will be neutral");
        }
    }

    eprintln!(
        "Running backtest: {} codes, {} to {}",
        universe.series.len(),
        bt_config.start_date,
        bt_config.end_date,
    );
    let result = backtest_engine::run_backtest(&universe.series, &strategy, &bt_config, None)?;
    let metrics = report_for(&result, bt_config.risk_free_rate);

    match &result.status {
        RunStatus::Completed => {}
        RunStatus::Cancelled { date } => eprintln!("warning: run cancelled on {date}"),
        RunStatus::Aborted { date, reason } => eprintln!("warning: run aborted on {date}: {reason}"),
    }
    print_summary(result.initial_capital, result.final_equity(), &metrics);

    if let Some(path) = trades_path {
        write_trades_file(path, &result.trades)?;
        eprintln!("Trades written to: {}", path.display());
    }
    let output = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("report.json"));
    JsonReportAdapter::new().write(&result, &metrics, &output.to_string_lossy())?;
    eprintln!("Report written to: {}", output.display());
    Ok(())
}

fn run_dry_run(config_path: &Path, preset: Option<&str>) -> Result<(), FundlabError> {
    let adapter = load_config(config_path)?;
    let bt_config = build_backtest_config(&adapter)?;
    let codes = read_codes(&adapter, "backtest")?;
    let strategy = resolve_strategy(&adapter, preset)?;
    eprintln!("Config validated successfully");

    eprintln!("\nStrategy: {}", strategy.name);
    if strategy.filters.is_empty() {
        eprintln!("  filters:   (none)");
    }
    for condition in &strategy.filters {
        eprintln!("  filter:    {}", condition);
    }
    eprintln!("  sort:      {} {:?}", strategy.sort_field, strategy.sort_order);
    eprintln!("  basket:    {}", strategy.basket_size());
    eprintln!("  rebalance: {}", strategy.rebalance);

    eprintln!("\nUniverse:");
    eprintln!("  codes: {}", codes.join(", "));
    eprintln!("  range: {} to {}", bt_config.start_date, bt_config.end_date);

    eprintln!("\nDry run complete: configuration is valid");
    Ok(())
}

fn run_signal(
    config_path: &Path,
    data_dir: Option<&Path>,
    code: Option<&str>,
    output_path: Option<&Path>,
    trades_path: Option<&Path>,
) -> Result<(), FundlabError> {
    let adapter = load_config(config_path)?;
    let signal_config = build_signal_config(&adapter)?;
    let sb_config = build_signal_backtest_config(&adapter)?;
    let code = match code {
        Some(c) => c.trim().to_uppercase(),
        None => adapter
            .get_string("signal", "code")
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| FundlabError::ConfigMissing {
                section: "signal".into(),
                key: "code".into(),
            })?,
    };

    let data = CsvAdapter::new(resolve_data_dir(&adapter, "signal", data_dir));
    let series = data.fetch_series(&code, NaiveDate::MIN, NaiveDate::MAX)?;
    let blender = SignalBlender::new(signal_config)?;
    eprintln!("Running signal backtest: {} ({} points)", code, series.len());
    let result = run_signal_backtest(&series, &blender, &sb_config, &SignalContexts::default())?;

    let risk_free_rate = adapter.get_double("signal", "risk_free_rate", 0.0);
    let ctx = MetricContext::new(&result.equity_curve, &result.trades).with_risk_free_rate(risk_free_rate);
    let metrics = MetricRegistry::with_builtins().evaluate(&ctx);
    print_summary(result.initial_capital, final_equity(&result.equity_curve, result.initial_capital), &metrics);

    if let Some(path) = trades_path {
        write_trades_file(path, &result.trades)?;
        eprintln!("Trades written to: {}", path.display());
    }
    if let Some(path) = output_path {
        JsonReportAdapter::new().write_signal(&result, &metrics, &path.to_string_lossy())?;
        eprintln!("Report written to: {}", path.display());
    }
    Ok(())
}

fn final_equity(curve: &[EquityPoint], initial: f64) -> f64 {
    curve.last().map(|p| p.equity).unwrap_or(initial)
}

fn run_validate(config_path: &Path) -> Result<(), FundlabError> {
    let adapter = load_config(config_path)?;

    if adapter.get_string("backtest", "start_date").is_some() {
        let bt = build_backtest_config(&adapter)?;
        let codes = read_codes(&adapter, "backtest")?;
        eprintln!(
            "[backtest] ok: {} codes, {} to {}",
            codes.len(),
            bt.start_date,
            bt.end_date
        );
    }
    if adapter.get_string("strategy", "preset").is_some() || adapter.get_string("strategy", "name").is_some() {
        let spec = build_strategy_spec(&adapter)?;
        eprintln!("[strategy] ok: {}", spec.name);
    }
    let signal = build_signal_config(&adapter)?;
    build_signal_backtest_config(&adapter)?;
    eprintln!("[signal] ok: {} rules", signal.rules.rules().len());

    eprintln!("\nConfiguration is valid");
    Ok(())
}

fn run_presets() {
    for preset in StrategyPreset::ALL {
        println!("{:<16} {}", preset.id(), preset.description());
    }
}

fn print_summary(initial_capital: f64, final_equity: f64, metrics: &MetricReport) {
    let get = |name: &str| metrics.get(name).unwrap_or(0.0);
    eprintln!("\n=== Results ===");
    eprintln!("Initial Capital:  {:.2}", initial_capital);
    eprintln!("Final Equity:     {:.2}", final_equity);
    eprintln!("Total Return:     {:.2}%", get("total_return") * 100.0);
    eprintln!("Annualized:       {:.2}%", get("annualized_return") * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", get("sharpe_ratio"));
    eprintln!("Sortino Ratio:    {:.2}", get("sortino_ratio"));
    eprintln!("Max Drawdown:     {:.1}%", get("max_drawdown") * 100.0);
    eprintln!("Trades:           {}", get("trade_count") as usize);
    eprintln!("Win Rate:         {:.1}%", get("win_rate") * 100.0);
}
