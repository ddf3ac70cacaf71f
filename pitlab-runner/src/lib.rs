//! PitLab Runner: backtest orchestration around `pitlab-core`.
//!
//! This crate builds on `pitlab-core` to provide:
//! - TOML run configuration with a content-addressed run id
//! - CSV loaders for prices, facts, scores, and event triggers
//! - Deterministic synthetic universes for demos and tests
//! - Single-run runner with performance metrics
//! - Parallel parameter sweeps with per-configuration isolation
//! - Train / out-of-sample split validation
//! - JSON, CSV, and Markdown export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod fitness;
pub mod metrics;
pub mod runner;
pub mod sweep;
pub mod synthetic;
pub mod validation;

pub use config::{ConfigError, InputPaths, RunConfig, RunId, ScorerConfig};
pub use data_loader::{load_inputs, LoadError, LoadedInputs};
pub use fitness::FitnessMetric;
pub use metrics::PerformanceMetrics;
pub use runner::{run_from_config, run_with_inputs, BacktestResult, RunError, SCHEMA_VERSION};
pub use sweep::{ParamGrid, ParamSweep, SweepEntry, SweepOutcome, SweepResults};
pub use synthetic::{SyntheticConfig, SyntheticData};
pub use validation::{validate_split, DegradationFlag, ValidationError, ValidationResult};
