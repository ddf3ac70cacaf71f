//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! Export formats for backtest results:
//! - **JSON**: full round-trip serialization with schema versioning
//! - **CSV**: daily returns, trade log, event ledger, target weights, sweep table
//! - **Markdown**: human-readable single-run summary
//!
//! All persisted artifacts include a `schema_version` field. Unknown versions
//! are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pitlab_core::domain::TradeRecord;
use pitlab_core::engine::DailyRecord;
use pitlab_core::tilt::EventRecord;

use crate::fitness::FitnessMetric;
use crate::runner::{BacktestResult, SCHEMA_VERSION};
use crate::sweep::SweepResults;
use crate::validation::ValidationResult;

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

/// Summary JSON: identity and metrics without the per-date series.
pub fn export_summary_json(result: &BacktestResult) -> Result<String> {
    let summary = serde_json::json!({
        "schema_version": result.schema_version,
        "run_id": result.run_id,
        "name": result.config.run.name,
        "start_date": result.start_date,
        "end_date": result.end_date,
        "initial_capital": result.initial_capital,
        "final_equity": result.final_equity,
        "dataset_hash": result.dataset_hash,
        "metrics": result.metrics,
        "diagnostics": result.diagnostics,
        "open_positions": result.open_positions.len(),
    });
    serde_json::to_string_pretty(&summary).context("failed to serialize run summary")
}

/// Validation split summary as JSON (both sides' metrics, no series).
pub fn export_validation_json(v: &ValidationResult) -> Result<String> {
    let summary = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "split_date": v.split_date,
        "train_sharpe": v.train_sharpe,
        "test_sharpe": v.test_sharpe,
        "degradation_ratio": v.degradation_ratio,
        "degradation_flag": v.degradation_flag,
        "train": { "run_id": v.train.run_id, "start_date": v.train.start_date,
                   "end_date": v.train.end_date, "metrics": v.train.metrics },
        "test": { "run_id": v.test.run_id, "start_date": v.test.start_date,
                  "end_date": v.test.end_date, "metrics": v.test.metrics },
    });
    serde_json::to_string_pretty(&summary).context("failed to serialize validation summary")
}

// ─── CSV export ─────────────────────────────────────────────────────

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Daily return decomposition, one row per date.
pub fn export_daily_csv(daily: &[DailyRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "date",
        "unlevered_return",
        "leverage",
        "gross_return",
        "cost",
        "turnover",
        "net_return",
        "equity",
        "drawdown",
        "regime",
        "rebalanced",
        "active_events",
        "shortfall",
        "gross_exposure",
    ])?;
    for d in daily {
        wtr.write_record([
            &d.date.to_string(),
            &format!("{:.10}", d.unlevered_return),
            &format!("{:.6}", d.leverage),
            &format!("{:.10}", d.gross_return),
            &format!("{:.10}", d.cost),
            &format!("{:.8}", d.turnover),
            &format!("{:.10}", d.net_return),
            &format!("{:.2}", d.equity),
            &format!("{:.8}", d.drawdown),
            &format!("{:?}", d.regime).to_lowercase(),
            &d.rebalanced.to_string(),
            &d.active_events.to_string(),
            &format!("{:.8}", d.shortfall),
            &format!("{:.6}", d.weights.gross()),
        ])?;
    }
    finish(wtr)
}

/// Target weights in long format: date, symbol, weight.
pub fn export_weights_csv(daily: &[DailyRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "symbol", "weight"])?;
    for d in daily {
        let date = d.date.to_string();
        for (symbol, weight) in d.weights.iter() {
            wtr.write_record([date.as_str(), symbol, &format!("{weight:.8}")])?;
        }
    }
    finish(wtr)
}

/// Closed ledger trades.
pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "symbol",
        "side",
        "entry_date",
        "entry_price",
        "exit_date",
        "exit_price",
        "exit_reason",
        "size",
        "quantity",
        "gross_pnl",
        "transaction_cost",
        "net_pnl",
        "holding_days",
    ])?;
    for t in trades {
        wtr.write_record([
            t.symbol.as_str(),
            &format!("{:?}", t.side),
            &t.entry_date.to_string(),
            &format!("{:.6}", t.entry_price),
            &t.exit_date.to_string(),
            &format!("{:.6}", t.exit_price),
            t.exit_reason.as_str(),
            &format!("{:.6}", t.size),
            &format!("{:.6}", t.quantity),
            &format!("{:.2}", t.gross_pnl),
            &format!("{:.2}", t.transaction_cost),
            &format!("{:.2}", t.net_pnl),
            &t.holding_days.to_string(),
        ])?;
    }
    finish(wtr)
}

/// The event ledger, including events still active at the end.
pub fn export_events_csv(events: &[EventRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "symbol",
        "open_date",
        "close_date",
        "tilt",
        "status",
        "funded_amount",
        "shortfall",
    ])?;
    for e in events {
        wtr.write_record([
            &e.id.0.to_string(),
            &e.symbol,
            &e.open_date.to_string(),
            &e.close_date.map(|d| d.to_string()).unwrap_or_default(),
            &format!("{:.6}", e.tilt),
            &format!("{:?}", e.status).to_lowercase(),
            &format!("{:.6}", e.funded_amount),
            &format!("{:.6}", e.shortfall),
        ])?;
    }
    finish(wtr)
}

/// One row per sweep configuration, ranked best first by `metric`; failed
/// configurations follow in grid order.
pub fn export_sweep_csv(results: &SweepResults, metric: FitnessMetric) -> Result<String> {
    let axes: Vec<String> = {
        let mut names: Vec<String> = results
            .all()
            .iter()
            .flat_map(|e| e.overrides.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    };

    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header: Vec<String> = vec!["rank".into(), "index".into(), "run_id".into()];
    header.extend(axes.iter().cloned());
    header.extend(
        [
            "status",
            "total_return",
            "cagr",
            "annualized_volatility",
            "sharpe",
            "sortino",
            "max_drawdown",
            "calmar",
            "avg_turnover",
            "total_cost",
            "trade_count",
            "error",
        ]
        .map(String::from),
    );
    wtr.write_record(&header)?;

    let ranked = results.ranked(metric);
    let failed: Vec<_> = results.failed().collect();
    for (rank, entry) in ranked.iter().chain(failed.iter()).enumerate() {
        let mut row: Vec<String> = vec![
            entry.result().map(|_| (rank + 1).to_string()).unwrap_or_default(),
            entry.index.to_string(),
            entry.run_id.clone(),
        ];
        for axis in &axes {
            row.push(entry.overrides.get(axis).map(|v| v.to_string()).unwrap_or_default());
        }
        match entry.result() {
            Some(r) => {
                let m = &r.metrics;
                row.push("completed".into());
                row.extend(
                    [
                        m.total_return,
                        m.cagr,
                        m.annualized_volatility,
                        m.sharpe,
                        m.sortino,
                        m.max_drawdown,
                        m.calmar,
                        m.avg_turnover,
                        m.total_cost,
                    ]
                    .iter()
                    .map(|v| format!("{v:.6}")),
                );
                row.push(m.trade_count.to_string());
                row.push(String::new());
            }
            None => {
                row.push("failed".into());
                row.extend(std::iter::repeat(String::new()).take(10));
                row.push(entry.failure().unwrap_or_default().to_string());
            }
        }
        wtr.write_record(&row)?;
    }
    finish(wtr)
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a single backtest run.
///
/// Creates a directory named `{name}_{run_id prefix}/` under `output_dir`
/// containing:
/// - `manifest.json`: the full `BacktestResult`
/// - `summary.json`: identity, metrics, and diagnostics
/// - `daily.csv`, `weights.csv`, `trades.csv`, `events.csv`
/// - `report.md`
///
/// Returns the path to the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let prefix = result.run_id.get(..12).unwrap_or(&result.run_id);
    let run_dir = output_dir.join(format!("{}_{}", result.config.run.name, prefix));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let files = [
        ("manifest.json", export_json(result)?),
        ("summary.json", export_summary_json(result)?),
        ("daily.csv", export_daily_csv(&result.daily)?),
        ("weights.csv", export_weights_csv(&result.daily)?),
        ("trades.csv", export_trades_csv(&result.trades)?),
        ("events.csv", export_events_csv(&result.events)?),
        ("report.md", generate_report(result)),
    ];
    for (name, content) in files {
        let path = run_dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's manifest.json.
///
/// Rejects unknown schema versions.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

/// Generate a Markdown report for a single backtest run.
pub fn generate_report(result: &BacktestResult) -> String {
    let mut md = String::with_capacity(2048);
    let fmt_date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();

    md.push_str("# Backtest Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Name | {} |\n", result.config.run.name));
    md.push_str(&format!("| Run ID | {} |\n", result.run_id));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        fmt_date(result.start_date),
        fmt_date(result.end_date)
    ));
    md.push_str(&format!(
        "| Initial Capital | ${:.0} |\n",
        result.initial_capital
    ));
    md.push_str(&format!("| Final Equity | ${:.0} |\n", result.final_equity));
    md.push_str(&format!("| Dataset Hash | {} |\n", result.dataset_hash));
    md.push('\n');

    let m = &result.metrics;
    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Total Return | {:.2}% |\n", m.total_return * 100.0));
    md.push_str(&format!("| CAGR | {:.2}% |\n", m.cagr * 100.0));
    md.push_str(&format!(
        "| Annualized Volatility | {:.2}% |\n",
        m.annualized_volatility * 100.0
    ));
    md.push_str(&format!("| Sharpe | {:.3} |\n", m.sharpe));
    md.push_str(&format!("| Sortino | {:.3} |\n", m.sortino));
    md.push_str(&format!("| Calmar | {:.3} |\n", m.calmar));
    md.push_str(&format!("| Max Drawdown | {:.2}% |\n", m.max_drawdown * 100.0));
    md.push_str(&format!("| Avg Turnover | {:.4} |\n", m.avg_turnover));
    md.push_str(&format!("| Total Cost | {:.4}% |\n", m.total_cost * 100.0));
    md.push_str(&format!("| Avg Leverage | {:.3} |\n", m.avg_leverage));
    md.push('\n');

    let d = &result.diagnostics;
    md.push_str("## Diagnostics\n\n");
    md.push_str(&format!(
        "- Rebalances: {} ({} skipped)\n",
        d.rebalance_count, d.skipped_rebalances
    ));
    md.push_str(&format!(
        "- Regime days: {} normal, {} reduced, {} defensive\n",
        d.risk.days_normal, d.risk.days_reduced, d.risk.days_defensive
    ));
    md.push_str(&format!(
        "- Overlay shortfall: {:.4} over {} days\n",
        d.total_shortfall, d.shortfall_days
    ));
    md.push_str(&format!("- Ledger rejections: {}\n", d.rejections.total()));
    md.push_str(&format!("- Events: {}\n", result.events.len()));
    if !d.unknown_trigger_symbols.is_empty() {
        md.push_str(&format!(
            "- Unknown trigger symbols: {}\n",
            d.unknown_trigger_symbols.join(", ")
        ));
    }
    md.push('\n');

    if m.trade_count > 0 {
        md.push_str("## Trades\n\n");
        md.push_str("| Metric | Value |\n");
        md.push_str("| --- | --- |\n");
        md.push_str(&format!("| Trades | {} |\n", m.trade_count));
        md.push_str(&format!("| Win Rate | {:.1}% |\n", m.win_rate * 100.0));
        md.push_str(&format!("| Profit Factor | {:.2} |\n", m.profit_factor));
        md.push_str(&format!("| Avg Holding (days) | {:.1} |\n", m.avg_holding_days));
        for (reason, count) in &m.exit_reasons {
            md.push_str(&format!("| {reason} | {count} |\n"));
        }
        md.push('\n');
    }

    md
}
