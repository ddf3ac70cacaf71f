//! Parameter sweep: grid search over engine parameters.
//!
//! A `ParamGrid` lists values per axis; the cartesian product of all
//! non-empty axes is applied as overrides on a base `RunConfig`. Each
//! configuration runs with fresh engine state on the rayon pool, sharing
//! only the immutable loaded inputs. A failing configuration (error,
//! panic, or timeout) is recorded as `Failed` and never affects siblings.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pitlab_core::cost::{CostCoefficients, CostModel};
use pitlab_core::engine::RunControl;
use pitlab_core::ledger::LedgerConfig;
use pitlab_core::tilt::TiltConfig;

use crate::config::{RunConfig, RunId};
use crate::data_loader::LoadedInputs;
use crate::fitness::FitnessMetric;
use crate::runner::{run_with_inputs, BacktestResult};

/// Values to try per axis. Empty axes keep the base config's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub min_leverage: Vec<f64>,
    pub max_leverage: Vec<f64>,
    pub target_vol: Vec<f64>,
    /// Liquidity model base bps, or the flat fee.
    pub cost_base_bps: Vec<f64>,
    pub tilt_per_event: Vec<f64>,
    pub tilt_horizon: Vec<usize>,
    /// Fixed tilt budget as a fraction of gross; switches the book to budget mode.
    pub tilt_budget: Vec<f64>,
    pub stop_loss: Vec<f64>,
}

/// Parameter overrides of one grid point, keyed by axis name.
pub type Overrides = BTreeMap<String, f64>;

impl ParamGrid {
    /// Number of grid points before invalid combinations are dropped.
    pub fn size(&self) -> usize {
        self.axes()
            .iter()
            .map(|(_, values)| values.len().max(1))
            .product()
    }

    pub fn is_empty(&self) -> bool {
        self.axes().iter().all(|(_, values)| values.is_empty())
    }

    fn axes(&self) -> [(&'static str, Vec<f64>); 8] {
        [
            ("min_leverage", self.min_leverage.clone()),
            ("max_leverage", self.max_leverage.clone()),
            ("target_vol", self.target_vol.clone()),
            ("cost_base_bps", self.cost_base_bps.clone()),
            ("tilt_per_event", self.tilt_per_event.clone()),
            (
                "tilt_horizon",
                self.tilt_horizon.iter().map(|&h| h as f64).collect(),
            ),
            ("tilt_budget", self.tilt_budget.clone()),
            ("stop_loss", self.stop_loss.clone()),
        ]
    }

    /// Expand the grid over `base`, in a stable order.
    ///
    /// Points with `min_leverage > max_leverage` are skipped.
    pub fn generate_configs(&self, base: &RunConfig) -> Vec<(Overrides, RunConfig)> {
        let mut points: Vec<Overrides> = vec![Overrides::new()];
        for (name, values) in self.axes() {
            if values.is_empty() {
                continue;
            }
            points = points
                .into_iter()
                .flat_map(|point| {
                    values.iter().map(move |&v| {
                        let mut p = point.clone();
                        p.insert(name.to_string(), v);
                        p
                    })
                })
                .collect();
        }

        points
            .into_iter()
            .filter_map(|overrides| {
                let config = apply_overrides(base, &overrides);
                if config.risk.min_leverage > config.risk.max_leverage {
                    debug!("skipping grid point with min_leverage > max_leverage: {overrides:?}");
                    return None;
                }
                Some((overrides, config))
            })
            .collect()
    }
}

/// Apply named overrides to a copy of `base`.
///
/// Tilt and stop-loss overrides switch the tilt book or ledger on with
/// default settings when the base leaves them off.
pub fn apply_overrides(base: &RunConfig, overrides: &Overrides) -> RunConfig {
    let mut config = base.clone();
    for (name, &value) in overrides {
        match name.as_str() {
            "min_leverage" => config.risk.min_leverage = value,
            "max_leverage" => config.risk.max_leverage = value,
            "target_vol" => config.risk.target_vol = value,
            "cost_base_bps" => {
                config.costs = match config.costs {
                    CostModel::Liquidity(c) => CostModel::Liquidity(CostCoefficients {
                        base_bps: value,
                        ..c
                    }),
                    CostModel::Flat { .. } | CostModel::Frictionless => {
                        CostModel::Flat { fee_bps: value }
                    }
                }
            }
            "tilt_per_event" => {
                config.tilt.get_or_insert_with(TiltConfig::default).tilt_per_event = value
            }
            "tilt_horizon" => {
                config.tilt.get_or_insert_with(TiltConfig::default).horizon = value as usize
            }
            "tilt_budget" => {
                config.tilt.get_or_insert_with(TiltConfig::default).budget = Some(value)
            }
            "stop_loss" => {
                config
                    .ledger
                    .get_or_insert_with(LedgerConfig::default)
                    .exits
                    .stop_loss = Some(value)
            }
            other => warn!("ignoring unknown sweep axis '{other}'"),
        }
    }
    config
}

// ─── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SweepOutcome {
    Completed(Box<BacktestResult>),
    Failed { reason: String },
}

/// One configuration of a sweep and what became of it.
#[derive(Debug, Clone)]
pub struct SweepEntry {
    /// Position in grid order.
    pub index: usize,
    pub run_id: RunId,
    pub overrides: Overrides,
    pub outcome: SweepOutcome,
}

impl SweepEntry {
    pub fn result(&self) -> Option<&BacktestResult> {
        match &self.outcome {
            SweepOutcome::Completed(r) => Some(r),
            SweepOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            SweepOutcome::Completed(_) => None,
            SweepOutcome::Failed { reason } => Some(reason),
        }
    }
}

/// Results of a parameter sweep, in grid order.
#[derive(Debug, Clone, Default)]
pub struct SweepResults {
    entries: Vec<SweepEntry>,
}

impl SweepResults {
    fn new(mut entries: Vec<SweepEntry>) -> Self {
        entries.sort_by_key(|e| e.index);
        Self { entries }
    }

    pub fn all(&self) -> &[SweepEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, run_id: &str) -> Option<&SweepEntry> {
        self.entries.iter().find(|e| e.run_id == run_id)
    }

    pub fn completed(&self) -> impl Iterator<Item = &SweepEntry> + '_ {
        self.entries.iter().filter(|e| e.result().is_some())
    }

    pub fn failed(&self) -> impl Iterator<Item = &SweepEntry> + '_ {
        self.entries.iter().filter(|e| e.failure().is_some())
    }

    /// Completed entries, best first by `metric`. Ties keep grid order.
    pub fn ranked(&self, metric: FitnessMetric) -> Vec<&SweepEntry> {
        let mut ranked: Vec<&SweepEntry> = self.completed().collect();
        ranked.sort_by(|a, b| {
            let va = a.result().map_or(f64::NAN, |r| metric.extract(&r.metrics));
            let vb = b.result().map_or(f64::NAN, |r| metric.extract(&r.metrics));
            metric.compare(va, vb)
        });
        ranked
    }

    pub fn best(&self, metric: FitnessMetric) -> Option<&SweepEntry> {
        self.ranked(metric).into_iter().next()
    }
}

// ─── Executor ────────────────────────────────────────────────────────

/// Parameter sweep executor.
///
/// Runs every configuration of a grid, optionally in parallel.
#[derive(Debug, Clone)]
pub struct ParamSweep {
    parallel: bool,
    threads: Option<usize>,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for ParamSweep {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSweep {
    pub fn new() -> Self {
        Self {
            parallel: true,
            threads: None,
            timeout: None,
            cancel: None,
        }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run on a dedicated pool of `n` threads instead of the global pool.
    pub fn with_threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }

    /// Per-configuration wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shared stop flag; configurations still running fail as cancelled.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn sweep(
        &self,
        grid: &ParamGrid,
        base: &RunConfig,
        inputs: &LoadedInputs,
    ) -> SweepResults {
        self.sweep_with_progress(grid, base, inputs, |_, _, _| {})
    }

    /// Executes a sweep with progress reporting.
    ///
    /// The callback is invoked after each configuration finishes with:
    /// - Number of configurations finished so far
    /// - Total number of configs
    /// - The finished entry
    pub fn sweep_with_progress<F>(
        &self,
        grid: &ParamGrid,
        base: &RunConfig,
        inputs: &LoadedInputs,
        progress_callback: F,
    ) -> SweepResults
    where
        F: Fn(usize, usize, &SweepEntry) + Send + Sync,
    {
        let configs = grid.generate_configs(base);
        let total = configs.len();
        info!("sweeping {total} configurations (parallel: {})", self.parallel);
        let done = AtomicUsize::new(0);

        let run_one = |(index, (overrides, config)): (usize, &(Overrides, RunConfig))| {
            let entry = self.run_config(index, overrides, config, inputs);
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress_callback(finished, total, &entry);
            entry
        };

        let entries: Vec<SweepEntry> = if !self.parallel {
            configs.iter().enumerate().map(run_one).collect()
        } else if let Some(pool) = self.thread_pool() {
            pool.install(|| configs.par_iter().enumerate().map(run_one).collect())
        } else {
            configs.par_iter().enumerate().map(run_one).collect()
        };

        let results = SweepResults::new(entries);
        let failed = results.failed().count();
        if failed > 0 {
            warn!("{failed} of {total} sweep configurations failed");
        }
        results
    }

    fn thread_pool(&self) -> Option<rayon::ThreadPool> {
        let n = self.threads?;
        match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("failed to build a {n}-thread pool ({e}); using the global pool");
                None
            }
        }
    }

    fn run_config(
        &self,
        index: usize,
        overrides: &Overrides,
        config: &RunConfig,
        inputs: &LoadedInputs,
    ) -> SweepEntry {
        let mut control = RunControl::default();
        if let Some(timeout) = self.timeout {
            control = control.with_deadline(Instant::now() + timeout);
        }
        if let Some(flag) = &self.cancel {
            control = control.with_cancel_flag(Arc::clone(flag));
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            run_with_inputs(config, inputs, &control)
        })) {
            Ok(Ok(result)) => SweepOutcome::Completed(Box::new(result)),
            Ok(Err(e)) => SweepOutcome::Failed {
                reason: e.to_string(),
            },
            Err(payload) => SweepOutcome::Failed {
                reason: format!("panicked: {}", panic_message(payload.as_ref())),
            },
        };
        if let SweepOutcome::Failed { reason } = &outcome {
            debug!("configuration {index} {overrides:?} failed: {reason}");
        }

        SweepEntry {
            index,
            run_id: config.run_id(),
            overrides: overrides.clone(),
            outcome,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
