//! Scorer interface: the seam between strategy modules and the engine.
//!
//! A scorer is a pure `date × instrument → score` function. It receives a
//! [`ScoreContext`] whose price and fact views end strictly before the
//! rebalance date, so no scorer can observe the date it is scoring for.

use crate::domain::PriceHistory;
use crate::pit::{FactLookup, PitView};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-instrument scores for one date. NaN means "no opinion".
pub type ScoreMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    /// No scores for this date; the rebalance is skipped.
    #[error("scores unavailable: {0}")]
    Unavailable(String),
    /// Unrecoverable; the run aborts.
    #[error("scorer failed: {0}")]
    Fatal(String),
}

/// Everything a scorer may look at on a rebalance date.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext<'a> {
    pub date: NaiveDate,
    pub index: usize,
    /// Instruments with a price on `date`.
    pub universe: &'a [String],
    /// Prices strictly before `date`.
    pub prices: PriceHistory<'a>,
    /// Facts knowable strictly before `date`.
    pub facts: PitView<'a>,
}

pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<ScoreMap, ScoreError>;
}

// ─── Precomputed score table ─────────────────────────────────────────

/// Scores supplied ahead of time, keyed by date.
///
/// Scores are taken as already shifted: the value stored under a date is the
/// one to act on that date.
#[derive(Debug, Clone, Default)]
pub struct ScoreTable {
    by_date: BTreeMap<NaiveDate, ScoreMap>,
}

impl ScoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, symbol: impl Into<String>, score: f64) {
        self.by_date
            .entry(date)
            .or_default()
            .insert(symbol.into(), score);
    }

    pub fn len(&self) -> usize {
        self.by_date.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.by_date.keys().copied()
    }
}

impl FromIterator<(NaiveDate, String, f64)> for ScoreTable {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, String, f64)>>(iter: I) -> Self {
        let mut table = ScoreTable::new();
        for (date, symbol, score) in iter {
            table.insert(date, symbol, score);
        }
        table
    }
}

impl Scorer for ScoreTable {
    fn name(&self) -> &str {
        "score_table"
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<ScoreMap, ScoreError> {
        let scores = self
            .by_date
            .get(&ctx.date)
            .ok_or_else(|| ScoreError::Unavailable(format!("no scores for {}", ctx.date)))?;
        Ok(scores
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(s, v)| (s.clone(), *v))
            .collect())
    }
}

// ─── Fact-field scorer ───────────────────────────────────────────────

/// Scores each instrument by one point-in-time resolved fact field.
#[derive(Debug, Clone)]
pub struct FactFieldScorer {
    pub field: String,
    pub lag_days: u32,
    pub higher_is_better: bool,
}

impl FactFieldScorer {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            lag_days: 0,
            higher_is_better: true,
        }
    }

    pub fn with_lag(mut self, lag_days: u32) -> Self {
        self.lag_days = lag_days;
        self
    }

    pub fn lower_is_better(mut self) -> Self {
        self.higher_is_better = false;
        self
    }
}

impl Scorer for FactFieldScorer {
    fn name(&self) -> &str {
        "fact_field"
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<ScoreMap, ScoreError> {
        let sign = if self.higher_is_better { 1.0 } else { -1.0 };
        Ok(ctx
            .universe
            .iter()
            .filter_map(|symbol| {
                match ctx.facts.resolve_field(symbol, &self.field, self.lag_days) {
                    FactLookup::Present { value, .. } if value.is_finite() => {
                        Some((symbol.clone(), sign * value))
                    }
                    _ => None,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FactRow, PriceRow, PriceTable};
    use crate::pit::FactStore;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn score_table_missing_date_is_unavailable() {
        let prices = PriceTable::from_rows(vec![PriceRow::new(d(2), "A", 1.0)]).unwrap();
        let facts = FactStore::default();
        let universe = vec!["A".to_string()];
        let mut table = ScoreTable::new();
        table.insert(d(3), "A", 1.0);
        table.insert(d(2), "A", f64::NAN);

        let ctx = |date| ScoreContext {
            date,
            index: 0,
            universe: &universe,
            prices: prices.history(0),
            facts: facts.as_of(date),
        };
        assert!(table.score(&ctx(d(2))).unwrap().is_empty());
        assert_eq!(table.score(&ctx(d(3))).unwrap()["A"], 1.0);
        assert!(matches!(
            table.score(&ctx(d(4))),
            Err(ScoreError::Unavailable(_))
        ));
    }

    #[test]
    fn fact_field_scorer_uses_pit_view() {
        let prices = PriceTable::from_rows(vec![PriceRow::new(d(2), "A", 1.0)]).unwrap();
        let facts = FactStore::new(vec![
            FactRow::new("A", d(1)).with_field("roe", 0.2),
            FactRow::new("B", d(5)).with_field("roe", 0.9),
            FactRow::new("C", d(1)).with_field("pe", 12.0),
        ]);
        let universe: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let ctx = ScoreContext {
            date: d(4),
            index: 0,
            universe: &universe,
            prices: prices.history(0),
            facts: facts.as_of(d(3)),
        };
        let scores = FactFieldScorer::new("roe").score(&ctx).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores["A"], 0.2);

        let inverted = FactFieldScorer::new("roe").lower_is_better().score(&ctx).unwrap();
        assert_eq!(inverted["A"], -0.2);
    }
}
