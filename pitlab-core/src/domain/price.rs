//! PriceTable: the canonical time axis.
//!
//! Rows for many instruments are aligned onto the union of their dates.
//! A missing observation is stored as NaN (no forward-fill of tradable
//! price data). Read access during a run goes through two views:
//! [`Quotes`] (exactly one date) and [`PriceHistory`] (strictly earlier dates).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use thiserror::Error;

/// One input row: a close (and optional volume) for one instrument on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl PriceRow {
    pub fn new(date: NaiveDate, symbol: impl Into<String>, close: f64) -> Self {
        Self {
            date,
            symbol: symbol.into(),
            close,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceTableError {
    #[error("price table has no rows")]
    Empty,
    #[error("duplicate price row for '{symbol}' on {date}")]
    DuplicateRow { symbol: String, date: NaiveDate },
    #[error("non-positive close {close} for '{symbol}' on {date}")]
    InvalidClose {
        symbol: String,
        date: NaiveDate,
        close: f64,
    },
}

/// Immutable, date-aligned close/volume columns for a universe of instruments.
#[derive(Debug, Clone)]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    index: HashMap<String, usize>,
    /// `closes[symbol][date]`, NaN where the instrument has no observation.
    closes: Vec<Vec<f64>>,
    /// `volumes[symbol][date]`, NaN where unknown.
    volumes: Vec<Vec<f64>>,
}

impl PriceTable {
    /// Build a table from unordered rows.
    ///
    /// Rows with a NaN close are treated as missing observations.
    pub fn from_rows<I>(rows: I) -> Result<Self, PriceTableError>
    where
        I: IntoIterator<Item = PriceRow>,
    {
        let rows: Vec<PriceRow> = rows.into_iter().collect();
        if rows.is_empty() {
            return Err(PriceTableError::Empty);
        }

        let dates: Vec<NaiveDate> = rows
            .iter()
            .map(|r| r.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let symbols: Vec<String> = rows
            .iter()
            .map(|r| r.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: HashMap<String, usize> = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        let date_pos: HashMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut closes = vec![vec![f64::NAN; dates.len()]; symbols.len()];
        let mut volumes = vec![vec![f64::NAN; dates.len()]; symbols.len()];
        let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();

        for row in rows {
            let s = index[&row.symbol];
            let t = date_pos[&row.date];
            if !seen.insert((s, t)) {
                return Err(PriceTableError::DuplicateRow {
                    symbol: row.symbol,
                    date: row.date,
                });
            }
            if row.close.is_nan() {
                continue;
            }
            if row.close <= 0.0 || row.close.is_infinite() {
                return Err(PriceTableError::InvalidClose {
                    symbol: row.symbol,
                    date: row.date,
                    close: row.close,
                });
            }
            closes[s][t] = row.close;
            if let Some(v) = row.volume {
                volumes[s][t] = v;
            }
        }

        Ok(Self {
            dates,
            symbols,
            index,
            closes,
            volumes,
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn date(&self, t: usize) -> NaiveDate {
        self.dates[t]
    }

    /// Instruments in sorted order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    /// Position of `date` on the calendar, if it is a trading date.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// First calendar position on or after `date` (may equal `len()`).
    pub fn first_index_on_or_after(&self, date: NaiveDate) -> usize {
        self.dates.partition_point(|d| *d < date)
    }

    /// Close of instrument `s` at date index `t`, `None` if missing.
    pub fn close_at(&self, s: usize, t: usize) -> Option<f64> {
        let c = self.closes[s][t];
        (!c.is_nan()).then_some(c)
    }

    pub fn volume_at(&self, s: usize, t: usize) -> Option<f64> {
        let v = self.volumes[s][t];
        (!v.is_nan()).then_some(v)
    }

    /// Full close column for instrument `s` (NaN where missing).
    pub fn close_column(&self, s: usize) -> &[f64] {
        &self.closes[s]
    }

    pub fn volume_column(&self, s: usize) -> &[f64] {
        &self.volumes[s]
    }

    /// Read-only view of a single date.
    pub fn quotes(&self, t: usize) -> Quotes<'_> {
        Quotes { table: self, t }
    }

    /// Read-only view of all dates strictly before `t`.
    pub fn history(&self, t: usize) -> PriceHistory<'_> {
        PriceHistory {
            table: self,
            end: t.min(self.len()),
        }
    }

    /// Copy of the table restricted to a range of date indices.
    pub fn slice(&self, range: Range<usize>) -> PriceTable {
        let start = range.start.min(self.len());
        let range = start..range.end.min(self.len()).max(start);
        PriceTable {
            dates: self.dates[range.clone()].to_vec(),
            symbols: self.symbols.clone(),
            index: self.index.clone(),
            closes: self.closes.iter().map(|c| c[range.clone()].to_vec()).collect(),
            volumes: self
                .volumes
                .iter()
                .map(|v| v[range.clone()].to_vec())
                .collect(),
        }
    }

    /// Copy of the table restricted to `start..=end` (inclusive dates).
    pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> PriceTable {
        let lo = self.first_index_on_or_after(start);
        let hi = self.dates.partition_point(|d| *d <= end);
        self.slice(lo..hi.max(lo))
    }
}

/// Prices for exactly one date of the calendar.
#[derive(Debug, Clone, Copy)]
pub struct Quotes<'a> {
    table: &'a PriceTable,
    t: usize,
}

impl<'a> Quotes<'a> {
    pub fn index(&self) -> usize {
        self.t
    }

    pub fn date(&self) -> NaiveDate {
        self.table.date(self.t)
    }

    pub fn close(&self, symbol: &str) -> Option<f64> {
        self.table
            .symbol_index(symbol)
            .and_then(|s| self.table.close_at(s, self.t))
    }

    pub fn close_at(&self, s: usize) -> Option<f64> {
        self.table.close_at(s, self.t)
    }

    pub fn has_price(&self, symbol: &str) -> bool {
        self.close(symbol).is_some()
    }
}

/// Prices for every date strictly before a cut-off index.
///
/// Slices handed out by this view end at the cut-off, so a consumer cannot
/// index into later dates.
#[derive(Debug, Clone, Copy)]
pub struct PriceHistory<'a> {
    table: &'a PriceTable,
    end: usize,
}

impl<'a> PriceHistory<'a> {
    /// Number of visible dates.
    pub fn len(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    pub fn dates(&self) -> &'a [NaiveDate] {
        &self.table.dates[..self.end]
    }

    pub fn closes(&self, symbol: &str) -> Option<&'a [f64]> {
        let s = self.table.symbol_index(symbol)?;
        Some(&self.table.closes[s][..self.end])
    }

    pub fn volumes(&self, symbol: &str) -> Option<&'a [f64]> {
        let s = self.table.symbol_index(symbol)?;
        Some(&self.table.volumes[s][..self.end])
    }

    /// Most recent non-missing close before the cut-off.
    pub fn last_close(&self, symbol: &str) -> Option<f64> {
        self.closes(symbol)?
            .iter()
            .rev()
            .copied()
            .find(|c| !c.is_nan())
    }
}
