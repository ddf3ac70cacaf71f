//! FactRow: one irregularly dated observation of an instrument's fundamentals.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A sparse fact observation that becomes knowable on `effective_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub symbol: String,
    pub effective_date: NaiveDate,
    pub fields: BTreeMap<String, f64>,
}

impl FactRow {
    pub fn new(symbol: impl Into<String>, effective_date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            effective_date,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: f64) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    /// Build a row from a filing: the row becomes effective `delay_days`
    /// after the later of the period end and the filing date.
    pub fn from_filing(
        symbol: impl Into<String>,
        period_end: NaiveDate,
        filed: NaiveDate,
        delay_days: u64,
        fields: BTreeMap<String, f64>,
    ) -> Self {
        let base = period_end.max(filed);
        let effective_date = base
            .checked_add_days(Days::new(delay_days))
            .unwrap_or(NaiveDate::MAX);
        Self {
            symbol: symbol.into(),
            effective_date,
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied()
    }
}
