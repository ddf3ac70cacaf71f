//! CSV loading for the four input tables.
//!
//! - prices:   `date,symbol,close[,volume]`
//! - facts:    `symbol,effective_date,field,value` (long format)
//! - scores:   `date,symbol,score` (already shifted)
//! - triggers: `symbol,trigger_date[,strength]`
//!
//! Every loader has a reader-based variant so tests and the synthetic
//! generator can work in memory. Empty cells in numeric columns are read as
//! missing values, never as zero.

use chrono::NaiveDate;
use log::{debug, info};
use pitlab_core::domain::{EventTrigger, FactRow, PriceRow, PriceTable, PriceTableError};
use pitlab_core::engine::MarketData;
use pitlab_core::pit::FactStore;
use pitlab_core::scoring::ScoreTable;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::InputPaths;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed row in {table}: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("invalid price table: {0}")]
    Prices(#[from] PriceTableError),
}

// ─── Row schemas ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PriceRecord {
    date: NaiveDate,
    symbol: String,
    close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FactRecord {
    symbol: String,
    effective_date: NaiveDate,
    field: String,
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ScoreRecord {
    date: NaiveDate,
    symbol: String,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TriggerRecord {
    symbol: String,
    trigger_date: NaiveDate,
    #[serde(default)]
    strength: Option<f64>,
}

fn records<R, T>(reader: R, table: &'static str) -> Result<Vec<T>, LoadError>
where
    R: Read,
    T: for<'de> Deserialize<'de>,
{
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| LoadError::Csv { table, source })
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Individual tables ───────────────────────────────────────────────

/// Parse a price CSV. A blank close is a missing observation.
pub fn read_prices<R: Read>(reader: R) -> Result<PriceTable, LoadError> {
    let rows = records::<_, PriceRecord>(reader, "prices")?
        .into_iter()
        .map(|r| PriceRow {
            date: r.date,
            symbol: r.symbol,
            close: r.close.unwrap_or(f64::NAN),
            volume: r.volume,
        });
    Ok(PriceTable::from_rows(rows)?)
}

/// Parse a long-format fact CSV.
///
/// Rows sharing `(symbol, effective_date)` are merged into one [`FactRow`];
/// a field repeated under the same key keeps its last value.
pub fn read_facts<R: Read>(reader: R) -> Result<FactStore, LoadError> {
    let mut merged: BTreeMap<(String, NaiveDate), FactRow> = BTreeMap::new();
    let mut skipped = 0usize;
    for r in records::<_, FactRecord>(reader, "facts")? {
        let Some(value) = r.value else {
            skipped += 1;
            continue;
        };
        merged
            .entry((r.symbol.clone(), r.effective_date))
            .or_insert_with(|| FactRow::new(r.symbol, r.effective_date))
            .fields
            .insert(r.field, value);
    }
    if skipped > 0 {
        debug!("facts: skipped {skipped} rows with blank values");
    }
    Ok(FactStore::new(merged.into_values()))
}

/// Parse a score CSV. Blank scores are dropped.
pub fn read_scores<R: Read>(reader: R) -> Result<ScoreTable, LoadError> {
    Ok(records::<_, ScoreRecord>(reader, "scores")?
        .into_iter()
        .filter_map(|r| r.score.map(|s| (r.date, r.symbol, s)))
        .collect())
}

/// Parse a trigger CSV. Strength defaults to 1.0.
pub fn read_triggers<R: Read>(reader: R) -> Result<Vec<EventTrigger>, LoadError> {
    Ok(records::<_, TriggerRecord>(reader, "triggers")?
        .into_iter()
        .map(|r| {
            let trigger = EventTrigger::new(r.symbol, r.trigger_date);
            match r.strength {
                Some(s) => trigger.with_strength(s),
                None => trigger,
            }
        })
        .collect())
}

pub fn load_prices(path: &Path) -> Result<PriceTable, LoadError> {
    read_prices(open(path)?)
}

pub fn load_facts(path: &Path) -> Result<FactStore, LoadError> {
    read_facts(open(path)?)
}

pub fn load_scores(path: &Path) -> Result<ScoreTable, LoadError> {
    read_scores(open(path)?)
}

pub fn load_triggers(path: &Path) -> Result<Vec<EventTrigger>, LoadError> {
    read_triggers(open(path)?)
}

// ─── All inputs of a run ─────────────────────────────────────────────

/// Everything a run reads from disk, loaded once and shared by reference.
#[derive(Debug, Clone)]
pub struct LoadedInputs {
    pub data: MarketData,
    pub scores: Option<ScoreTable>,
    /// BLAKE3 over the aligned price table, for provenance.
    pub dataset_hash: String,
}

impl LoadedInputs {
    pub fn new(data: MarketData, scores: Option<ScoreTable>) -> Self {
        let dataset_hash = compute_dataset_hash(&data.prices);
        Self {
            data,
            scores,
            dataset_hash,
        }
    }
}

/// Load the tables named in `[inputs]`. Optional tables that are not
/// configured are left empty.
pub fn load_inputs(paths: &InputPaths) -> Result<LoadedInputs, LoadError> {
    let prices = load_prices(&paths.prices)?;
    let facts = paths
        .facts
        .as_deref()
        .map(load_facts)
        .transpose()?
        .unwrap_or_default();
    let triggers = paths
        .triggers
        .as_deref()
        .map(load_triggers)
        .transpose()?
        .unwrap_or_default();
    let scores = paths.scores.as_deref().map(load_scores).transpose()?;

    info!(
        "loaded {} dates x {} instruments, {} fact rows, {} triggers, {} scores",
        prices.len(),
        prices.symbols().len(),
        facts.len(),
        triggers.len(),
        scores.as_ref().map_or(0, ScoreTable::len)
    );

    let data = MarketData::new(prices)
        .with_facts(facts)
        .with_triggers(triggers);
    Ok(LoadedInputs::new(data, scores))
}

/// Compute a deterministic BLAKE3 hash over the price table.
///
/// The hash covers dates, symbols, closes, and volumes in sorted symbol order.
pub fn compute_dataset_hash(prices: &PriceTable) -> String {
    let mut hasher = blake3::Hasher::new();
    for date in prices.dates() {
        hasher.update(date.to_string().as_bytes());
    }
    for (s, symbol) in prices.symbols().iter().enumerate() {
        hasher.update(symbol.as_bytes());
        for close in prices.close_column(s) {
            hasher.update(&close.to_le_bytes());
        }
        for volume in prices.volume_column(s) {
            hasher.update(&volume.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}
