//! Serializable run configuration (TOML).
//!
//! A config file names the input tables and every engine parameter:
//!
//! ```toml
//! [run]
//! name = "quality_tilt"
//! initial_capital = 1000000.0
//! start = "2019-01-02"          # dates are quoted strings
//!
//! [inputs]
//! prices = "data/prices.csv"
//! scores = "data/scores.csv"
//! triggers = "data/triggers.csv"
//!
//! [rebalance]
//! type = "monthly"
//!
//! [baseline]
//! type = "top_n"
//! n = 50
//!
//! [costs]
//! model = "liquidity"
//! base_bps = 2.0
//!
//! [tilt]
//! tilt_per_event = 0.005
//! horizon = 10
//! ```
//!
//! Missing sections take the engine defaults; `[ledger]` and `[tilt]` are
//! only active when present.

use chrono::NaiveDate;
use pitlab_core::cost::CostModel;
use pitlab_core::engine::{BaselineConfig, EngineConfig, Rebalance};
use pitlab_core::ledger::LedgerConfig;
use pitlab_core::risk::RiskConfig;
use pitlab_core::tilt::TiltConfig;
use pitlab_core::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sweep::ParamGrid;

/// Unique identifier for a run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<EngineError> for ConfigError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidConfig(msg) => ConfigError::Invalid(msg),
            other => ConfigError::Invalid(other.to_string()),
        }
    }
}

/// `[run]`: identity, capital, and date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub name: String,
    pub initial_capital: f64,
    /// First date to simulate (inclusive); the first price date when unset.
    pub start: Option<NaiveDate>,
    /// Last date to simulate (inclusive); the last price date when unset.
    pub end: Option<NaiveDate>,
    /// Σ|w| of the target book before leverage.
    pub gross_target: f64,
    /// Trailing window for average daily dollar volume.
    pub adv_window: usize,
    /// Trailing window for instrument volatility.
    pub vol_window: usize,
}

impl Default for RunSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            name: "run".into(),
            initial_capital: engine.initial_capital,
            start: None,
            end: None,
            gross_target: engine.gross_target,
            adv_window: engine.adv_window,
            vol_window: engine.vol_window,
        }
    }
}

/// `[inputs]`: CSV paths, resolved relative to the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub prices: PathBuf,
    pub facts: Option<PathBuf>,
    pub scores: Option<PathBuf>,
    pub triggers: Option<PathBuf>,
}

impl InputPaths {
    /// Rebase relative paths onto `dir`.
    pub fn resolved(&self, dir: &Path) -> InputPaths {
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                dir.join(p)
            }
        };
        InputPaths {
            prices: join(&self.prices),
            facts: self.facts.as_deref().map(join),
            scores: self.scores.as_deref().map(join),
            triggers: self.triggers.as_deref().map(join),
        }
    }
}

/// `[scorer]`: where per-date scores come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScorerConfig {
    /// Pre-computed, already shifted scores from `inputs.scores`.
    #[default]
    ScoreFile,
    /// Rank on one point-in-time resolved fact field.
    FactField {
        field: String,
        #[serde(default)]
        lag_days: u32,
        #[serde(default = "default_true")]
        higher_is_better: bool,
    },
}

fn default_true() -> bool {
    true
}

/// Serializable configuration for a single run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub run: RunSection,
    pub inputs: InputPaths,
    pub scorer: ScorerConfig,
    pub rebalance: Rebalance,
    pub baseline: BaselineConfig,
    pub costs: CostModel,
    pub risk: RiskConfig,
    pub ledger: Option<LedgerConfig>,
    pub tilt: Option<TiltConfig>,
    /// Parameter grid used by `pitlab sweep`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<ParamGrid>,
}

impl RunConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(content)?;
        config.to_engine_config()?;
        Ok(config)
    }

    /// Read and validate a config file. Input paths are rebased onto the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(dir) = path.parent() {
            config.inputs = config.inputs.resolved(dir);
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The immutable engine configuration for this run.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        if let (Some(start), Some(end)) = (self.run.start, self.run.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "run.start {start} is after run.end {end}"
                )));
            }
        }
        let engine = EngineConfig {
            initial_capital: self.run.initial_capital,
            rebalance: self.rebalance,
            baseline: self.baseline,
            gross_target: self.run.gross_target,
            costs: self.costs,
            adv_window: self.run.adv_window,
            vol_window: self.run.vol_window,
            risk: self.risk.clone(),
            ledger: self.ledger.clone(),
            tilt: self.tilt.clone(),
        };
        engine.validate()?;
        Ok(engine)
    }

    /// Deterministic hash of everything that determines the run's output.
    ///
    /// Two runs with identical configs share a RunId. The sweep grid is not
    /// part of the identity.
    pub fn run_id(&self) -> RunId {
        let mut identity = self.clone();
        identity.sweep = None;
        let bytes = serde_json::to_vec(&identity).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitlab_core::engine::TopNWeighting;

    const SAMPLE: &str = r#"
[run]
name = "quality"
initial_capital = 250000.0
start = "2020-01-02"
end = "2020-12-31"

[inputs]
prices = "prices.csv"
scores = "scores.csv"

[rebalance]
type = "every_n"
n = 5

[baseline]
type = "top_n"
n = 10
weighting = "score"

[costs]
model = "flat"
fee_bps = 5.0

[risk]
target_vol = 0.12
lookback = 40

[tilt]
tilt_per_event = 0.01
horizon = 5
"#;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_full_config() {
        let config = RunConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.run.name, "quality");
        assert_eq!(config.run.start, Some(d(2020, 1, 2)));
        assert_eq!(config.rebalance, Rebalance::EveryN { n: 5 });
        assert_eq!(
            config.baseline,
            BaselineConfig::TopN {
                n: 10,
                weighting: TopNWeighting::Score,
                min_score: None
            }
        );
        assert_eq!(config.costs, CostModel::Flat { fee_bps: 5.0 });
        assert_eq!(config.risk.lookback, 40);
        assert!(config.ledger.is_none());
        let tilt = config.tilt.as_ref().unwrap();
        assert_eq!(tilt.horizon, 5);
        // Unset fields keep their defaults.
        assert_eq!(tilt.max_tilt, TiltConfig::default().max_tilt);
    }

    #[test]
    fn empty_config_uses_engine_defaults() {
        let config = RunConfig::from_toml("").unwrap();
        let engine = config.to_engine_config().unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(engine.initial_capital, defaults.initial_capital);
        assert_eq!(engine.rebalance, defaults.rebalance);
        assert_eq!(engine.costs, defaults.costs);
        assert_eq!(config.scorer, ScorerConfig::ScoreFile);
    }

    #[test]
    fn fact_field_scorer_section() {
        let config = RunConfig::from_toml(
            r#"
[scorer]
type = "fact_field"
field = "roe"
lag_days = 45
"#,
        )
        .unwrap();
        assert_eq!(
            config.scorer,
            ScorerConfig::FactField {
                field: "roe".into(),
                lag_days: 45,
                higher_is_better: true
            }
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let err = RunConfig::from_toml("[risk]\nmin_leverage = 3.0\nmax_leverage = 1.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");

        let err = RunConfig::from_toml("[run]\nstart = \"2021-01-01\"\nend = \"2020-01-01\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("after"));

        let err = RunConfig::from_toml("[baseline]\ntype = \"nope\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn run_id_deterministic() {
        let config = RunConfig::from_toml(SAMPLE).unwrap();
        let id1 = config.run_id();
        let id2 = config.clone().run_id();
        assert_eq!(id1, id2, "RunId should be deterministic");
        assert_eq!(id1.len(), 64);
    }

    #[test]
    fn run_id_changes_with_params() {
        let config1 = RunConfig::from_toml(SAMPLE).unwrap();
        let mut config2 = config1.clone();
        config2.risk.target_vol = 0.15;
        assert_ne!(config1.run_id(), config2.run_id());

        let mut config3 = config1.clone();
        config3.sweep = Some(ParamGrid::default());
        assert_eq!(config1.run_id(), config3.run_id());
    }

    #[test]
    fn toml_round_trip() {
        let config = RunConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        let back = RunConfig::from_toml(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn relative_inputs_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.inputs.prices, dir.path().join("prices.csv"));
        assert_eq!(config.inputs.scores, Some(dir.path().join("scores.csv")));
        assert!(config.inputs.facts.is_none());

        let missing = RunConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
