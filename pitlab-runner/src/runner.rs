//! Backtest runner: wires together configuration, inputs, the driver, and metrics.
//!
//! Two entry points:
//! - `run_from_config()`: loads the CSV inputs named in the config, then runs. Used by the CLI.
//! - `run_with_inputs()`: takes pre-loaded inputs, no I/O. Used by sweeps and validation.

use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pitlab_core::domain::{Position, TradeRecord};
use pitlab_core::engine::{
    run_backtest_with_control, DailyRecord, MarketData, RunControl, RunDiagnostics,
};
use pitlab_core::scoring::{FactFieldScorer, Scorer};
use pitlab_core::tilt::EventRecord;
use pitlab_core::EngineError;

use crate::config::{ConfigError, RunConfig, RunId, ScorerConfig};
use crate::data_loader::{load_inputs, LoadError, LoadedInputs};
use crate::metrics::PerformanceMetrics;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Load(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("scorer type 'score_file' needs [inputs] scores")]
    MissingScores,
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub config: RunConfig,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub dataset_hash: String,
    pub metrics: PerformanceMetrics,
    pub diagnostics: RunDiagnostics,
    pub daily: Vec<DailyRecord>,
    pub trades: Vec<TradeRecord>,
    pub events: Vec<EventRecord>,
    pub open_positions: Vec<Position>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Load the configured inputs and run once.
pub fn run_from_config(config: &RunConfig) -> Result<BacktestResult, RunError> {
    let inputs = load_inputs(&config.inputs)?;
    run_with_inputs(config, &inputs, &RunControl::default())
}

/// Run a backtest with pre-loaded inputs: no I/O.
///
/// The inputs are restricted to `[run] start..=end`. Facts effective before
/// `start` stay visible; triggers outside the range are dropped.
pub fn run_with_inputs(
    config: &RunConfig,
    inputs: &LoadedInputs,
    control: &RunControl,
) -> Result<BacktestResult, RunError> {
    let engine_config = config.to_engine_config()?;

    let sliced;
    let data: &MarketData = match (config.run.start, config.run.end) {
        (None, None) => &inputs.data,
        (start, end) => {
            let start = start.unwrap_or(NaiveDate::MIN);
            let end = end.unwrap_or(NaiveDate::MAX);
            sliced = inputs.data.slice_dates(start, end);
            &sliced
        }
    };

    let fact_scorer;
    let scorer: &dyn Scorer = match &config.scorer {
        ScorerConfig::ScoreFile => inputs.scores.as_ref().ok_or(RunError::MissingScores)?,
        ScorerConfig::FactField {
            field,
            lag_days,
            higher_is_better,
        } => {
            let mut s = FactFieldScorer::new(field.as_str()).with_lag(*lag_days);
            if !higher_is_better {
                s = s.lower_is_better();
            }
            fact_scorer = s;
            &fact_scorer
        }
    };

    let output = run_backtest_with_control(data, scorer, &engine_config, control)?;
    let metrics = PerformanceMetrics::compute(&output);
    let run_id = config.run_id();
    info!(
        "run '{}' ({}): {} dates, total return {:.2}%, sharpe {:.2}",
        config.run.name,
        &run_id[..12],
        metrics.days,
        metrics.total_return * 100.0,
        metrics.sharpe
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        config: config.clone(),
        start_date: output.daily.first().map(|d| d.date),
        end_date: output.daily.last().map(|d| d.date),
        initial_capital: engine_config.initial_capital,
        final_equity: output.final_equity,
        dataset_hash: inputs.dataset_hash.clone(),
        metrics,
        diagnostics: output.diagnostics,
        daily: output.daily,
        trades: output.trades,
        events: output.events,
        open_positions: output.open_positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{generate, SyntheticConfig};
    use pitlab_core::engine::Rebalance;
    use pitlab_core::tilt::TiltConfig;
    use std::time::Instant;

    fn inputs() -> LoadedInputs {
        generate(&SyntheticConfig {
            n_symbols: 6,
            n_days: 160,
            trigger_rate: 0.03,
            ..SyntheticConfig::default()
        })
        .to_inputs()
        .unwrap()
    }

    fn config() -> RunConfig {
        RunConfig {
            rebalance: Rebalance::Weekly,
            tilt: Some(TiltConfig::default()),
            ..RunConfig::default()
        }
    }

    #[test]
    fn runs_on_synthetic_inputs() {
        let inputs = inputs();
        let result = run_with_inputs(&config(), &inputs, &RunControl::default()).unwrap();
        assert_eq!(result.schema_version, SCHEMA_VERSION);
        assert_eq!(result.daily.len(), 160);
        assert_eq!(result.metrics.days, 160);
        assert_eq!(result.run_id, config().run_id());
        assert_eq!(result.dataset_hash, inputs.dataset_hash);
        let last = result.daily.last().unwrap();
        assert!((result.final_equity - last.equity).abs() < 1e-6);
        assert!(result.diagnostics.rebalance_count > 0);
    }

    #[test]
    fn date_range_restricts_calendar() {
        let inputs = inputs();
        let dates = inputs.data.prices.dates().to_vec();
        let mut cfg = config();
        cfg.run.start = Some(dates[20]);
        cfg.run.end = Some(dates[99]);
        let result = run_with_inputs(&cfg, &inputs, &RunControl::default()).unwrap();
        assert_eq!(result.daily.len(), 80);
        assert_eq!(result.start_date, Some(dates[20]));
        assert_eq!(result.end_date, Some(dates[99]));
    }

    #[test]
    fn fact_field_scorer_runs_without_score_file() {
        let mut inputs = inputs();
        inputs.scores = None;
        let mut cfg = config();
        let err = run_with_inputs(&cfg, &inputs, &RunControl::default()).unwrap_err();
        assert!(matches!(err, RunError::MissingScores));

        cfg.scorer = ScorerConfig::FactField {
            field: "quality".into(),
            lag_days: 0,
            higher_is_better: false,
        };
        let result = run_with_inputs(&cfg, &inputs, &RunControl::default()).unwrap();
        assert_eq!(result.daily.len(), 160);
    }

    #[test]
    fn expired_deadline_cancels() {
        let inputs = inputs();
        let control = RunControl::default().with_deadline(Instant::now());
        let err = run_with_inputs(&config(), &inputs, &control).unwrap_err();
        assert!(matches!(err, RunError::Engine(EngineError::Cancelled { .. })), "{err}");
    }

    #[test]
    fn result_json_round_trip_keeps_schema_version() {
        let result = run_with_inputs(&config(), &inputs(), &RunControl::default()).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let back: BacktestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schema_version, SCHEMA_VERSION);
        assert_eq!(back.run_id, result.run_id);
        assert_eq!(back.daily.len(), result.daily.len());
        assert_eq!(back.end_date, result.end_date);
    }
}
