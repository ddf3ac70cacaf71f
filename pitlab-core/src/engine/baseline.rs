//! Baseline allocation built on rebalance dates.

use crate::domain::WeightVector;
use crate::error::EngineError;
use crate::scoring::ScoreMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopNWeighting {
    #[default]
    Equal,
    /// Proportional to `score − min_score` (0 when unset).
    Score,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaselineConfig {
    /// No baseline sleeve; the ledger alone trades.
    None,
    /// Every instrument priced on the rebalance date.
    #[default]
    EqualWeight,
    /// The `n` highest finite scores strictly above `min_score`.
    TopN {
        n: usize,
        #[serde(default)]
        weighting: TopNWeighting,
        #[serde(default)]
        min_score: Option<f64>,
    },
    /// Long the top quantile, short the bottom quantile, each at half the gross.
    LongShort { quantile: f64 },
}

impl BaselineConfig {
    pub fn needs_scores(&self) -> bool {
        matches!(
            self,
            BaselineConfig::TopN { .. } | BaselineConfig::LongShort { .. }
        )
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            BaselineConfig::TopN { n: 0, .. } => {
                Err(EngineError::invalid("baseline.n must be at least 1"))
            }
            BaselineConfig::LongShort { quantile } if !(*quantile > 0.0 && *quantile <= 0.5) => {
                Err(EngineError::invalid("baseline.quantile must lie in (0, 0.5]"))
            }
            _ => Ok(()),
        }
    }

    /// Target weights over `universe` (instruments priced today) with Σ|w| = `gross`.
    pub fn build(&self, universe: &[String], scores: Option<&ScoreMap>, gross: f64) -> WeightVector {
        match self {
            BaselineConfig::None => WeightVector::new(),
            BaselineConfig::EqualWeight => equal(universe.iter().map(String::as_str), gross),
            BaselineConfig::TopN {
                n,
                weighting,
                min_score,
            } => {
                let Some(scores) = scores else {
                    return WeightVector::new();
                };
                let mut ranked = ranked(universe, scores);
                if let Some(floor) = min_score {
                    ranked.retain(|(_, s)| s > floor);
                }
                ranked.truncate(*n);
                match weighting {
                    TopNWeighting::Equal => equal(ranked.iter().map(|(s, _)| *s), gross),
                    TopNWeighting::Score => {
                        let floor = min_score.unwrap_or(0.0);
                        let raw: Vec<(&str, f64)> = ranked
                            .iter()
                            .map(|(s, v)| (*s, (v - floor).max(0.0)))
                            .collect();
                        let total: f64 = raw.iter().map(|(_, v)| v).sum();
                        if total <= 0.0 {
                            return equal(ranked.iter().map(|(s, _)| *s), gross);
                        }
                        raw.into_iter()
                            .map(|(s, v)| (s, gross * v / total))
                            .collect()
                    }
                }
            }
            BaselineConfig::LongShort { quantile } => {
                let Some(scores) = scores else {
                    return WeightVector::new();
                };
                let ranked = ranked(universe, scores);
                let n = ranked.len();
                if n < 2 {
                    return WeightVector::new();
                }
                let k = ((n as f64 * quantile).floor() as usize).clamp(1, n / 2);
                let leg = gross / 2.0 / k as f64;
                let mut wv = WeightVector::new();
                for (s, _) in &ranked[..k] {
                    wv.set(*s, leg);
                }
                for (s, _) in &ranked[n - k..] {
                    wv.set(*s, -leg);
                }
                wv
            }
        }
    }
}

/// Finite scores of universe members, highest first, ties by symbol.
fn ranked<'a>(universe: &'a [String], scores: &ScoreMap) -> Vec<(&'a str, f64)> {
    let mut out: Vec<(&str, f64)> = universe
        .iter()
        .filter_map(|s| {
            scores
                .get(s)
                .copied()
                .filter(|v| v.is_finite())
                .map(|v| (s.as_str(), v))
        })
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    out
}

fn equal<'a>(symbols: impl Iterator<Item = &'a str>, gross: f64) -> WeightVector {
    let symbols: Vec<&str> = symbols.collect();
    if symbols.is_empty() {
        return WeightVector::new();
    }
    let w = gross / symbols.len() as f64;
    symbols.into_iter().map(|s| (s, w)).collect()
}
