//! Synthetic universe generation for demos and tests.
//!
//! Each instrument gets its own `StdRng` seeded from a BLAKE3 hash of the
//! run seed and the symbol, so adding instruments never changes the paths of
//! existing ones. Output is deterministic for a given config.
//!
//! Generated tables:
//! - prices: geometric random walk on weekdays, with volumes
//! - facts: quarterly filings that become effective after a random delay
//! - scores: trailing momentum, already shifted (uses closes before the date)
//! - triggers: sparse random events with a strength in [0.5, 1.5)

use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use pitlab_core::domain::{EventTrigger, FactRow, PriceRow, PriceTable, PriceTableError};
use pitlab_core::cost::TRADING_DAYS_PER_YEAR;
use pitlab_core::engine::MarketData;
use pitlab_core::pit::FactStore;
use pitlab_core::scoring::ScoreTable;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::InputPaths;
use crate::data_loader::LoadedInputs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub n_symbols: usize,
    pub start: NaiveDate,
    /// Number of trading (week)days.
    pub n_days: usize,
    pub seed: u64,
    pub annual_drift: f64,
    pub annual_vol: f64,
    /// Trading days between fiscal period ends.
    pub fact_every: usize,
    /// Calendar days from period end to filing, drawn uniformly.
    pub filing_lag_days: (u64, u64),
    /// Per instrument, per date probability of a trigger.
    pub trigger_rate: f64,
    /// Momentum lookback for the generated scores.
    pub score_lookback: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_symbols: 20,
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            n_days: 504,
            seed: 42,
            annual_drift: 0.06,
            annual_vol: 0.25,
            fact_every: 63,
            filing_lag_days: (20, 45),
            trigger_rate: 0.005,
            score_lookback: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticData {
    pub prices: Vec<PriceRow>,
    pub facts: Vec<FactRow>,
    pub scores: Vec<(NaiveDate, String, f64)>,
    pub triggers: Vec<EventTrigger>,
}

fn symbol_rng(seed: u64, symbol: &str) -> StdRng {
    let hash = blake3::hash(format!("{seed}:{symbol}").as_bytes());
    StdRng::from_seed(*hash.as_bytes())
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    StandardNormal.sample(rng)
}

fn weekdays(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(n);
    let mut current = start;
    while out.len() < n {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(current);
        }
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    out
}

/// Generate a synthetic universe.
pub fn generate(config: &SyntheticConfig) -> SyntheticData {
    let dates = weekdays(config.start, config.n_days);
    let daily_drift = config.annual_drift / TRADING_DAYS_PER_YEAR;
    let daily_vol = config.annual_vol / TRADING_DAYS_PER_YEAR.sqrt();
    let (lag_lo, lag_hi) = config.filing_lag_days;
    let mut data = SyntheticData::default();

    for i in 0..config.n_symbols {
        let symbol = format!("SYN{i:03}");
        let mut rng = symbol_rng(config.seed, &symbol);

        // ── Prices ──
        let mut closes = Vec::with_capacity(dates.len());
        let mut price = rng.gen_range(20.0..200.0);
        for date in &dates {
            let r = daily_drift + daily_vol * standard_normal(&mut rng);
            price *= (1.0 + r).max(0.01);
            closes.push(price);
            let volume = rng.gen_range(200_000.0..2_000_000.0_f64).round();
            data.prices
                .push(PriceRow::new(*date, symbol.clone(), price).with_volume(volume));
        }

        // ── Facts ──
        let mut quality = rng.gen_range(-1.0..1.0);
        for t in (config.fact_every.max(1) - 1..dates.len()).step_by(config.fact_every.max(1)) {
            quality += 0.3 * standard_normal(&mut rng);
            let lookback = t.saturating_sub(config.fact_every);
            let growth = closes[t] / closes[lookback] - 1.0;
            let filed = dates[t] + Days::new(rng.gen_range(lag_lo..=lag_hi.max(lag_lo)));
            let fields = BTreeMap::from([
                ("quality".to_string(), quality),
                ("growth".to_string(), growth),
            ]);
            data.facts
                .push(FactRow::from_filing(symbol.clone(), dates[t], filed, 0, fields));
        }

        // ── Scores ──
        let k = config.score_lookback.max(1);
        for t in (k + 1)..dates.len() {
            let momentum = closes[t - 1] / closes[t - 1 - k] - 1.0;
            data.scores.push((dates[t], symbol.clone(), momentum));
        }

        // ── Triggers ──
        for date in &dates {
            if rng.gen_bool(config.trigger_rate.clamp(0.0, 1.0)) {
                let strength = rng.gen_range(0.5..1.5);
                data.triggers
                    .push(EventTrigger::new(symbol.clone(), *date).with_strength(strength));
            }
        }
    }
    data
}

impl SyntheticData {
    /// Build in-memory run inputs.
    pub fn to_inputs(&self) -> Result<LoadedInputs, PriceTableError> {
        let prices = PriceTable::from_rows(self.prices.iter().cloned())?;
        let data = MarketData::new(prices)
            .with_facts(FactStore::new(self.facts.iter().cloned()))
            .with_triggers(self.triggers.clone());
        let scores: ScoreTable = self.scores.iter().cloned().collect();
        Ok(LoadedInputs::new(data, Some(scores)))
    }

    /// Write the four tables as CSV into `dir` and return their paths.
    pub fn write_csv(&self, dir: &Path) -> Result<InputPaths> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let paths = InputPaths {
            prices: dir.join("prices.csv"),
            facts: Some(dir.join("facts.csv")),
            scores: Some(dir.join("scores.csv")),
            triggers: Some(dir.join("triggers.csv")),
        };

        let mut w = csv::Writer::from_path(&paths.prices)
            .with_context(|| format!("failed to create {}", paths.prices.display()))?;
        w.write_record(["date", "symbol", "close", "volume"])?;
        for row in &self.prices {
            w.write_record([
                row.date.to_string(),
                row.symbol.clone(),
                format!("{:.6}", row.close),
                row.volume.map(|v| format!("{v:.0}")).unwrap_or_default(),
            ])?;
        }
        w.flush()?;

        let facts_path = dir.join("facts.csv");
        let mut w = csv::Writer::from_path(&facts_path)
            .with_context(|| format!("failed to create {}", facts_path.display()))?;
        w.write_record(["symbol", "effective_date", "field", "value"])?;
        for row in &self.facts {
            for (field, value) in &row.fields {
                w.write_record([
                    row.symbol.clone(),
                    row.effective_date.to_string(),
                    field.clone(),
                    format!("{value:.8}"),
                ])?;
            }
        }
        w.flush()?;

        let scores_path = dir.join("scores.csv");
        let mut w = csv::Writer::from_path(&scores_path)
            .with_context(|| format!("failed to create {}", scores_path.display()))?;
        w.write_record(["date", "symbol", "score"])?;
        for (date, symbol, score) in &self.scores {
            w.write_record([date.to_string(), symbol.clone(), format!("{score:.8}")])?;
        }
        w.flush()?;

        let triggers_path = dir.join("triggers.csv");
        let mut w = csv::Writer::from_path(&triggers_path)
            .with_context(|| format!("failed to create {}", triggers_path.display()))?;
        w.write_record(["symbol", "trigger_date", "strength"])?;
        for t in &self.triggers {
            w.write_record([
                t.symbol.clone(),
                t.trigger_date.to_string(),
                format!("{:.4}", t.strength),
            ])?;
        }
        w.flush()?;

        Ok(paths)
    }
}
