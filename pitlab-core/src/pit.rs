//! Point-in-time aligner.
//!
//! Answers "what was the latest fact about this instrument that was knowable
//! on this date?" A row is eligible at `date` when
//! `effective_date + lag_days ≤ date`. Rows are sorted once at construction
//! and every lookup is a binary search, so answers never depend on call order.

use crate::domain::FactRow;
use chrono::{Days, NaiveDate};
use std::collections::HashMap;

/// Result of resolving a single field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FactLookup {
    Present {
        value: f64,
        effective_date: NaiveDate,
    },
    /// Eligible rows exist but none carries the field.
    MissingField,
    /// No row is knowable yet.
    NoEligibleRow,
}

impl FactLookup {
    pub fn value(&self) -> Option<f64> {
        match self {
            FactLookup::Present { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// Per-instrument fact rows sorted by effective date.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    rows: HashMap<String, Vec<FactRow>>,
}

impl FactStore {
    /// Build from unordered rows.
    ///
    /// Rows sharing an effective date keep their input order, so the row
    /// supplied last (a restatement) is the one resolved.
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = FactRow>,
    {
        let mut by_symbol: HashMap<String, Vec<FactRow>> = HashMap::new();
        for row in rows {
            by_symbol.entry(row.symbol.clone()).or_default().push(row);
        }
        for rows in by_symbol.values_mut() {
            rows.sort_by_key(|r| r.effective_date);
        }
        Self { rows: by_symbol }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of rows across instruments.
    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.keys().map(|s| s.as_str())
    }

    pub fn rows_for(&self, symbol: &str) -> &[FactRow] {
        self.rows.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows with `effective_date + lag_days ≤ date`, oldest first.
    fn eligible(&self, symbol: &str, date: NaiveDate, lag_days: u32) -> &[FactRow] {
        let Some(rows) = self.rows.get(symbol) else {
            return &[];
        };
        let Some(cutoff) = date.checked_sub_days(Days::new(u64::from(lag_days))) else {
            return &[];
        };
        let n = rows.partition_point(|r| r.effective_date <= cutoff);
        &rows[..n]
    }

    /// Latest row with `effective_date + lag_days ≤ date`.
    pub fn resolve(&self, symbol: &str, date: NaiveDate, lag_days: u32) -> Option<&FactRow> {
        self.eligible(symbol, date, lag_days).last()
    }

    /// Resolve one field, distinguishing "no row yet" from "no row with the field".
    ///
    /// Rows are sparse: a newer row that does not carry `field` leaves an
    /// older knowable value in force.
    pub fn resolve_field(
        &self,
        symbol: &str,
        field: &str,
        date: NaiveDate,
        lag_days: u32,
    ) -> FactLookup {
        let rows = self.eligible(symbol, date, lag_days);
        if rows.is_empty() {
            return FactLookup::NoEligibleRow;
        }
        rows.iter()
            .rev()
            .find_map(|row| {
                row.get(field).map(|value| FactLookup::Present {
                    value,
                    effective_date: row.effective_date,
                })
            })
            .unwrap_or(FactLookup::MissingField)
    }

    /// Snapshot that can only resolve at `date`.
    pub fn as_of(&self, date: NaiveDate) -> PitView<'_> {
        PitView { store: self, date }
    }

    /// Copy holding only rows effective on or before `end`.
    pub fn truncated(&self, end: NaiveDate) -> FactStore {
        let rows = self
            .rows
            .iter()
            .map(|(s, rows)| {
                let n = rows.partition_point(|r| r.effective_date <= end);
                (s.clone(), rows[..n].to_vec())
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect();
        FactStore { rows }
    }
}

/// Read-only view of a [`FactStore`] pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct PitView<'a> {
    store: &'a FactStore,
    date: NaiveDate,
}

impl<'a> PitView<'a> {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn resolve(&self, symbol: &str, lag_days: u32) -> Option<&'a FactRow> {
        self.store.resolve(symbol, self.date, lag_days)
    }

    pub fn resolve_field(&self, symbol: &str, field: &str, lag_days: u32) -> FactLookup {
        self.store.resolve_field(symbol, field, self.date, lag_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn store() -> FactStore {
        FactStore::new(vec![
            FactRow::new("AAPL", d(3, 1)).with_field("eps", 2.0),
            FactRow::new("AAPL", d(1, 15)).with_field("eps", 1.0),
            FactRow::new("AAPL", d(3, 1)).with_field("eps", 2.5),
            FactRow::new("MSFT", d(2, 1)).with_field("roe", 0.3),
        ])
    }

    #[test]
    fn resolves_latest_eligible_row() {
        let s = store();
        assert!(s.resolve("AAPL", d(1, 14), 0).is_none());
        assert_eq!(s.resolve("AAPL", d(1, 15), 0).unwrap().get("eps"), Some(1.0));
        assert_eq!(s.resolve("AAPL", d(2, 29), 0).unwrap().get("eps"), Some(1.0));
        // Same effective date: the later input row wins.
        assert_eq!(s.resolve("AAPL", d(3, 1), 0).unwrap().get("eps"), Some(2.5));
        assert!(s.resolve("IBM", d(6, 1), 0).is_none());
    }

    #[test]
    fn lag_shifts_eligibility() {
        let s = store();
        assert_eq!(s.resolve("AAPL", d(3, 5), 5).unwrap().get("eps"), Some(1.0));
        assert_eq!(s.resolve("AAPL", d(3, 6), 5).unwrap().get("eps"), Some(2.5));
    }

    #[test]
    fn field_lookup_is_explicit() {
        let s = store();
        assert_eq!(
            s.resolve_field("MSFT", "roe", d(2, 1), 0),
            FactLookup::Present {
                value: 0.3,
                effective_date: d(2, 1)
            }
        );
        assert_eq!(s.resolve_field("MSFT", "eps", d(2, 1), 0), FactLookup::MissingField);
        assert_eq!(s.resolve_field("MSFT", "roe", d(1, 1), 0), FactLookup::NoEligibleRow);
    }

    #[test]
    fn newer_row_without_field_keeps_older_value() {
        let s = FactStore::new(vec![
            FactRow::new("A", d(3, 1)).with_field("roe", 0.12),
            FactRow::new("A", d(3, 5)).with_field("eps", 1.5),
        ]);
        assert_eq!(
            s.resolve_field("A", "roe", d(3, 10), 0),
            FactLookup::Present {
                value: 0.12,
                effective_date: d(3, 1)
            }
        );
        assert_eq!(s.resolve_field("A", "eps", d(3, 10), 0).value(), Some(1.5));
        // The eps row is not knowable yet.
        assert_eq!(s.resolve_field("A", "eps", d(3, 4), 0), FactLookup::MissingField);
    }

    #[test]
    fn view_is_pinned_to_its_date() {
        let s = store();
        let view = s.as_of(d(2, 1));
        assert_eq!(view.date(), d(2, 1));
        assert_eq!(view.resolve("AAPL", 0).unwrap().get("eps"), Some(1.0));
        assert_eq!(view.resolve_field("MSFT", "roe", 1), FactLookup::NoEligibleRow);
    }

    #[test]
    fn truncation_drops_future_rows() {
        let s = store().truncated(d(2, 15));
        assert_eq!(s.len(), 2);
        assert_eq!(s.rows_for("AAPL").len(), 1);
    }
}
