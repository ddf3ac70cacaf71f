//! PitLab CLI: run, sweep, validate, and synthetic data commands.
//!
//! Commands:
//! - `run`: execute one backtest from a TOML config file
//! - `sweep`: run the config's `[sweep]` grid in parallel and rank the results
//! - `validate`: train / out-of-sample split at a date
//! - `synth`: write a synthetic universe and a sample config
//!
//! Logging goes through `env_logger`; set `RUST_LOG=info` (or `debug`) for detail.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pitlab_core::engine::Rebalance;
use pitlab_core::tilt::TiltConfig;
use pitlab_runner::export::{export_sweep_csv, export_validation_json, save_artifacts};
use pitlab_runner::synthetic::{generate, SyntheticConfig};
use pitlab_runner::validation::{split_at_fraction, DEFAULT_MIN_DATES};
use pitlab_runner::{
    load_inputs, run_from_config, validate_split, BacktestResult, FitnessMetric, InputPaths,
    ParamGrid, ParamSweep, RunConfig,
};

#[derive(Parser)]
#[command(
    name = "pitlab",
    about = "PitLab CLI: point-in-time portfolio backtesting"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        config: PathBuf,

        /// Override [run] start (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,

        /// Override [run] end (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Run the config's [sweep] grid and rank the configurations.
    Sweep {
        /// Path to a TOML config file with a [sweep] section.
        config: PathBuf,

        /// Ranking metric: sharpe, sortino, calmar, cagr, total_return, max_drawdown, total_cost.
        #[arg(long, default_value = "sharpe")]
        metric: FitnessMetric,

        /// Worker threads (defaults to the rayon global pool).
        #[arg(long)]
        threads: Option<usize>,

        /// Per-configuration time limit in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Rows to print.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Run configurations one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Output directory for the sweep table and the best run's artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Train / out-of-sample validation at a split date.
    Validate {
        /// Path to a TOML config file.
        config: PathBuf,

        /// First out-of-sample date (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        split: Option<NaiveDate>,

        /// Split at this fraction of the calendar when --split is not given.
        #[arg(long, default_value_t = 0.7)]
        fraction: f64,

        /// Fewest dates either side may have.
        #[arg(long, default_value_t = DEFAULT_MIN_DATES)]
        min_dates: usize,

        /// Output directory for the validation summary.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Write a synthetic universe (CSV) and a sample run.toml.
    Synth {
        /// Directory to write into.
        #[arg(long, default_value = "synthetic")]
        out_dir: PathBuf,

        #[arg(long, default_value_t = 20)]
        symbols: usize,

        /// Trading days to generate.
        #[arg(long, default_value_t = 504)]
        days: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// First calendar date (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            start,
            end,
            output_dir,
        } => run_cmd(&config, start, end, &output_dir),
        Commands::Sweep {
            config,
            metric,
            threads,
            timeout_secs,
            top,
            sequential,
            output_dir,
        } => sweep_cmd(
            &config,
            metric,
            threads,
            timeout_secs,
            top,
            sequential,
            &output_dir,
        ),
        Commands::Validate {
            config,
            split,
            fraction,
            min_dates,
            output_dir,
        } => validate_cmd(&config, split, fraction, min_dates, &output_dir),
        Commands::Synth {
            out_dir,
            symbols,
            days,
            seed,
            start,
        } => synth_cmd(&out_dir, symbols, days, seed, start),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

fn load_config(path: &Path) -> Result<RunConfig> {
    let config = RunConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    info!("config {} -> run id {}", path.display(), config.run_id());
    Ok(config)
}

fn run_cmd(
    config_path: &Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output_dir: &Path,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if start.is_some() {
        config.run.start = start;
    }
    if end.is_some() {
        config.run.end = end;
    }
    config.to_engine_config()?;

    let result = run_from_config(&config)?;
    print_summary(&result);

    let run_dir = save_artifacts(&result, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn sweep_cmd(
    config_path: &Path,
    metric: FitnessMetric,
    threads: Option<usize>,
    timeout_secs: Option<u64>,
    top: usize,
    sequential: bool,
    output_dir: &Path,
) -> Result<()> {
    let config = load_config(config_path)?;
    let grid: ParamGrid = match &config.sweep {
        Some(grid) if !grid.is_empty() => grid.clone(),
        _ => bail!("{} has no [sweep] grid", config_path.display()),
    };
    let inputs = load_inputs(&config.inputs)?;

    let mut sweep = ParamSweep::new().with_parallelism(!sequential);
    if let Some(n) = threads {
        sweep = sweep.with_threads(n);
    }
    if let Some(secs) = timeout_secs {
        sweep = sweep.with_timeout(Duration::from_secs(secs));
    }
    let results = sweep.sweep_with_progress(&grid, &config, &inputs, |done, total, entry| {
        if let Some(reason) = entry.failure() {
            eprintln!("[{done}/{total}] config {} failed: {reason}", entry.index);
        } else {
            eprintln!("[{done}/{total}] config {} done", entry.index);
        }
    });

    println!();
    println!(
        "Sweep: {} configurations, {} completed, {} failed (ranked by {metric})",
        results.len(),
        results.completed().count(),
        results.failed().count()
    );
    println!(
        "{:>4}  {:>9}  {:>8}  {:>8}  {:>9}  overrides",
        "rank", metric.as_str(), "return", "max_dd", "cost"
    );
    for (i, entry) in results.ranked(metric).iter().take(top).enumerate() {
        let Some(r) = entry.result() else { continue };
        let overrides: Vec<String> = entry
            .overrides
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!(
            "{:>4}  {:>9.4}  {:>7.2}%  {:>7.2}%  {:>8.4}%  {}",
            i + 1,
            metric.extract(&r.metrics),
            r.metrics.total_return * 100.0,
            r.metrics.max_drawdown * 100.0,
            r.metrics.total_cost * 100.0,
            overrides.join(" ")
        );
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let csv_path = output_dir.join(format!("{}_sweep.csv", config.run.name));
    std::fs::write(&csv_path, export_sweep_csv(&results, metric)?)
        .with_context(|| format!("failed to write {}", csv_path.display()))?;
    println!("Sweep table saved to: {}", csv_path.display());

    if let Some(best) = results.best(metric).and_then(|e| e.result()) {
        let run_dir = save_artifacts(best, output_dir)?;
        println!("Best run artifacts saved to: {}", run_dir.display());
    }
    Ok(())
}

fn validate_cmd(
    config_path: &Path,
    split: Option<NaiveDate>,
    fraction: f64,
    min_dates: usize,
    output_dir: &Path,
) -> Result<()> {
    let config = load_config(config_path)?;
    let inputs = load_inputs(&config.inputs)?;
    let split_date = match split {
        Some(d) => d,
        None => match split_at_fraction(&config, &inputs, fraction) {
            Some(d) => d,
            None => bail!("no price dates in the configured range"),
        },
    };

    let v = validate_split(&config, &inputs, split_date, min_dates)?;
    println!("Split at {}", v.split_date);
    println!("  Train:");
    print_metrics(&v.train);
    println!("  Test:");
    print_metrics(&v.test);
    match v.degradation_ratio {
        Some(ratio) => println!("  Degradation: {ratio:.3} ({:?})", v.degradation_flag),
        None => println!("  Degradation: n/a ({:?})", v.degradation_flag),
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let path = output_dir.join(format!("{}_validation.json", config.run.name));
    std::fs::write(&path, export_validation_json(&v)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Validation summary saved to: {}", path.display());
    Ok(())
}

fn synth_cmd(
    out_dir: &Path,
    symbols: usize,
    days: usize,
    seed: u64,
    start: Option<NaiveDate>,
) -> Result<()> {
    let mut synth = SyntheticConfig {
        n_symbols: symbols,
        n_days: days,
        seed,
        ..SyntheticConfig::default()
    };
    if let Some(d) = start {
        synth.start = d;
    }
    let data = generate(&synth);
    data.write_csv(out_dir)?;

    let mut config = RunConfig {
        inputs: InputPaths {
            prices: "prices.csv".into(),
            facts: Some("facts.csv".into()),
            scores: Some("scores.csv".into()),
            triggers: Some("triggers.csv".into()),
        },
        rebalance: Rebalance::Weekly,
        tilt: Some(TiltConfig::default()),
        sweep: Some(ParamGrid {
            target_vol: vec![0.08, 0.10, 0.15],
            tilt_per_event: vec![0.0, 0.005, 0.01],
            ..ParamGrid::default()
        }),
        ..RunConfig::default()
    };
    config.run.name = "synthetic".into();
    let toml_path = out_dir.join("run.toml");
    std::fs::write(&toml_path, config.to_toml()?)
        .with_context(|| format!("failed to write {}", toml_path.display()))?;

    println!(
        "Wrote {} price rows, {} fact rows, {} scores, {} triggers to {}",
        data.prices.len(),
        data.facts.len(),
        data.scores.len(),
        data.triggers.len(),
        out_dir.display()
    );
    println!("Sample config: {}", toml_path.display());
    Ok(())
}

fn print_metrics(result: &BacktestResult) {
    let m = &result.metrics;
    println!("    Days:            {}", m.days);
    println!("    Total Return:    {:.2}%", m.total_return * 100.0);
    println!("    CAGR:            {:.2}%", m.cagr * 100.0);
    println!("    Volatility:      {:.2}%", m.annualized_volatility * 100.0);
    println!("    Sharpe:          {:.3}", m.sharpe);
    println!("    Sortino:         {:.3}", m.sortino);
    println!("    Max Drawdown:    {:.2}%", m.max_drawdown * 100.0);
    println!("    Calmar:          {:.3}", m.calmar);
    println!("    Avg Turnover:    {:.4}", m.avg_turnover);
    println!("    Total Cost:      {:.4}%", m.total_cost * 100.0);
}

fn print_summary(result: &BacktestResult) {
    println!();
    println!("=== Backtest Result: {} ===", result.config.run.name);
    println!("Run ID:          {}", result.run_id);
    if let (Some(start), Some(end)) = (result.start_date, result.end_date) {
        println!("Period:          {start} to {end}");
    }
    println!("Initial Capital: ${:.0}", result.initial_capital);
    println!("Final Equity:    ${:.0}", result.final_equity);
    println!();
    print_metrics(result);
    let m = &result.metrics;
    println!("    Avg Leverage:    {:.3}", m.avg_leverage);
    println!();
    let d = &result.diagnostics;
    println!(
        "Rebalances:      {} ({} skipped)",
        d.rebalance_count, d.skipped_rebalances
    );
    println!("Events:          {}", result.events.len());
    if m.trade_count > 0 {
        println!(
            "Trades:          {} (win rate {:.1}%, profit factor {:.2})",
            m.trade_count,
            m.win_rate * 100.0,
            m.profit_factor
        );
        for (reason, count) in &m.exit_reasons {
            println!("  {reason:<16} {count}");
        }
    }
    println!("Open positions:  {}", result.open_positions.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_are_parsed_by_the_command_line() {
        let cli = Cli::try_parse_from(["pitlab", "run", "cfg.toml", "--start", "2024-01-02"])
            .unwrap();
        match cli.command {
            Commands::Run { start, end, .. } => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 2));
                assert_eq!(end, None);
            }
            _ => panic!("expected run"),
        }

        let cli = Cli::try_parse_from(["pitlab", "validate", "cfg.toml", "--split", "2023-06-30"])
            .unwrap();
        match cli.command {
            Commands::Validate { split, .. } => {
                assert_eq!(split, NaiveDate::from_ymd_opt(2023, 6, 30));
            }
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn malformed_date_is_rejected_before_running() {
        let cases: [&[&str]; 3] = [
            &["pitlab", "run", "cfg.toml", "--end", "2024-13-01"],
            &["pitlab", "validate", "cfg.toml", "--split", "06/30/2023"],
            &["pitlab", "synth", "--out-dir", "x", "--start", "soon"],
        ];
        for args in cases {
            assert!(Cli::try_parse_from(args.iter().copied()).is_err(), "{args:?}");
        }
    }
}
