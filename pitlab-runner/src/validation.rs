//! Train / out-of-sample validation at a split date.
//!
//! The calendar (optionally limited by `[run] start..=end`) is cut at a split
//! date: the training run covers dates strictly before it and the test run
//! covers the split date onward. Each side runs with fresh state over a date
//! slice of the same immutable inputs. The Sharpe degradation ratio compares
//! the two to detect overfitting.

use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pitlab_core::engine::RunControl;

use crate::config::RunConfig;
use crate::data_loader::LoadedInputs;
use crate::runner::{run_with_inputs, BacktestResult, RunError};

/// Fewest dates either side may have.
pub const DEFAULT_MIN_DATES: usize = 20;

/// How the degradation ratio was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationFlag {
    /// Train Sharpe >= 0.1, ratio computed normally.
    Normal,
    /// Train Sharpe < 0.1, using difference metric (test - train) instead.
    LowTrainSharpe,
    /// Train Sharpe is negative, ratio skipped entirely.
    NegativeTrainSharpe,
    /// Train Sharpe positive (>= 0.1) but test Sharpe negative: clamped to 0.0.
    FailedTest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub split_date: NaiveDate,
    pub train_sharpe: f64,
    pub test_sharpe: f64,
    /// Test Sharpe / train Sharpe. None when it cannot be computed (see flag).
    pub degradation_ratio: Option<f64>,
    pub degradation_flag: DegradationFlag,
    pub train: BacktestResult,
    pub test: BacktestResult,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("split date {split} leaves no dates on one side of {first}..={last}")]
    SplitOutOfRange {
        split: NaiveDate,
        first: NaiveDate,
        last: NaiveDate,
    },
    #[error("price calendar has no dates in the configured range")]
    EmptyCalendar,
    #[error("insufficient data: {side} has {dates} dates < minimum {min}")]
    InsufficientData {
        side: &'static str,
        dates: usize,
        min: usize,
    },
    #[error("backtest error on {side}: {source}")]
    Run {
        side: &'static str,
        #[source]
        source: RunError,
    },
}

/// Calendar dates inside the config's `[run]` range.
fn run_calendar(config: &RunConfig, inputs: &LoadedInputs) -> Vec<NaiveDate> {
    let start = config.run.start.unwrap_or(NaiveDate::MIN);
    let end = config.run.end.unwrap_or(NaiveDate::MAX);
    inputs
        .data
        .prices
        .dates()
        .iter()
        .copied()
        .filter(|d| *d >= start && *d <= end)
        .collect()
}

/// The calendar date at `fraction` of the configured range, used as a
/// default split. None for an empty calendar.
pub fn split_at_fraction(
    config: &RunConfig,
    inputs: &LoadedInputs,
    fraction: f64,
) -> Option<NaiveDate> {
    let calendar = run_calendar(config, inputs);
    if calendar.is_empty() {
        return None;
    }
    let idx = ((calendar.len() as f64) * fraction.clamp(0.0, 1.0)) as usize;
    calendar.get(idx.min(calendar.len() - 1)).copied()
}

/// Run the train and test sides of a split.
pub fn validate_split(
    config: &RunConfig,
    inputs: &LoadedInputs,
    split: NaiveDate,
    min_dates: usize,
) -> Result<ValidationResult, ValidationError> {
    let calendar = run_calendar(config, inputs);
    let (first, last) = match (calendar.first(), calendar.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return Err(ValidationError::EmptyCalendar),
    };
    let n_train = calendar.partition_point(|d| *d < split);
    if n_train == 0 || n_train == calendar.len() {
        return Err(ValidationError::SplitOutOfRange { split, first, last });
    }
    let n_test = calendar.len() - n_train;
    for (side, dates) in [("train", n_train), ("test", n_test)] {
        if dates < min_dates {
            return Err(ValidationError::InsufficientData {
                side,
                dates,
                min: min_dates,
            });
        }
    }

    let mut train_cfg = config.clone();
    train_cfg.run.start = Some(first);
    train_cfg.run.end = Some(calendar[n_train - 1]);
    let mut test_cfg = config.clone();
    test_cfg.run.start = Some(calendar[n_train]);
    test_cfg.run.end = Some(last);

    let control = RunControl::default();
    let train = run_with_inputs(&train_cfg, inputs, &control)
        .map_err(|source| ValidationError::Run { side: "train", source })?;
    let test = run_with_inputs(&test_cfg, inputs, &control)
        .map_err(|source| ValidationError::Run { side: "test", source })?;

    let train_sharpe = train.metrics.sharpe;
    let test_sharpe = test.metrics.sharpe;
    let (degradation_ratio, degradation_flag) =
        compute_degradation_ratio(train_sharpe, test_sharpe);
    info!(
        "split {split}: train sharpe {train_sharpe:.2} ({n_train} dates), test sharpe {test_sharpe:.2} ({n_test} dates), {degradation_flag:?}"
    );

    Ok(ValidationResult {
        split_date: split,
        train_sharpe,
        test_sharpe,
        degradation_ratio,
        degradation_flag,
        train,
        test,
    })
}

/// Degradation of test vs train Sharpe.
///
/// - train >= 0.1: ratio = test / train (Normal)
/// - train < 0.1 and >= 0: difference = test - train (LowTrainSharpe)
/// - train < 0: ratio skipped (NegativeTrainSharpe)
/// - train >= 0.1 but test < 0: clamped to 0.0 (FailedTest)
pub fn compute_degradation_ratio(
    train_sharpe: f64,
    test_sharpe: f64,
) -> (Option<f64>, DegradationFlag) {
    if train_sharpe < 0.0 {
        (None, DegradationFlag::NegativeTrainSharpe)
    } else if train_sharpe < 0.1 {
        (Some(test_sharpe - train_sharpe), DegradationFlag::LowTrainSharpe)
    } else if test_sharpe < 0.0 {
        (Some(0.0), DegradationFlag::FailedTest)
    } else {
        (Some(test_sharpe / train_sharpe), DegradationFlag::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{generate, SyntheticConfig};

    fn inputs() -> LoadedInputs {
        generate(&SyntheticConfig {
            n_symbols: 5,
            n_days: 150,
            ..SyntheticConfig::default()
        })
        .to_inputs()
        .unwrap()
    }

    // ─── Degradation ratio tests ─────────────────────────────────

    #[test]
    fn degradation_normal() {
        let (ratio, flag) = compute_degradation_ratio(2.0, 1.0);
        assert_eq!(flag, DegradationFlag::Normal);
        assert!((ratio.unwrap() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn degradation_low_train_sharpe() {
        let (ratio, flag) = compute_degradation_ratio(0.05, 0.03);
        assert_eq!(flag, DegradationFlag::LowTrainSharpe);
        assert!((ratio.unwrap() - (-0.02)).abs() < 1e-10);
    }

    #[test]
    fn degradation_negative_and_failed() {
        assert_eq!(
            compute_degradation_ratio(-0.5, 1.0),
            (None, DegradationFlag::NegativeTrainSharpe)
        );
        assert_eq!(
            compute_degradation_ratio(1.0, -0.5),
            (Some(0.0), DegradationFlag::FailedTest)
        );
    }

    // ─── Split tests ─────────────────────────────────────────────

    #[test]
    fn split_partitions_calendar() {
        let inputs = inputs();
        let config = RunConfig::default();
        let dates = inputs.data.prices.dates().to_vec();
        let result = validate_split(&config, &inputs, dates[100], DEFAULT_MIN_DATES).unwrap();
        assert_eq!(result.train.daily.len(), 100);
        assert_eq!(result.test.daily.len(), 50);
        assert_eq!(result.train.end_date, Some(dates[99]));
        assert_eq!(result.test.start_date, Some(dates[100]));
        assert_eq!(result.train_sharpe, result.train.metrics.sharpe);
    }

    #[test]
    fn split_sides_start_from_fresh_state() {
        let inputs = inputs();
        let config = RunConfig::default();
        let dates = inputs.data.prices.dates().to_vec();
        let result = validate_split(&config, &inputs, dates[100], DEFAULT_MIN_DATES).unwrap();
        // The test side starts with initial capital, not the train side's equity.
        let first = &result.test.daily[0];
        let opening = first.equity / (1.0 + first.net_return);
        assert!((opening - config.run.initial_capital).abs() < 1e-6);
    }

    #[test]
    fn split_errors() {
        let inputs = inputs();
        let config = RunConfig::default();
        let dates = inputs.data.prices.dates().to_vec();

        let err = validate_split(&config, &inputs, dates[0], 1).unwrap_err();
        assert!(matches!(err, ValidationError::SplitOutOfRange { .. }));

        let err = validate_split(&config, &inputs, dates[140], DEFAULT_MIN_DATES).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InsufficientData { side: "test", dates: 10, .. }
        ));
    }

    #[test]
    fn fraction_split_respects_run_range() {
        let inputs = inputs();
        let dates = inputs.data.prices.dates().to_vec();
        let mut config = RunConfig::default();
        assert_eq!(split_at_fraction(&config, &inputs, 0.5), Some(dates[75]));
        config.run.start = Some(dates[50]);
        assert_eq!(split_at_fraction(&config, &inputs, 0.5), Some(dates[100]));
        assert_eq!(split_at_fraction(&config, &inputs, 2.0), Some(dates[149]));
    }
}
