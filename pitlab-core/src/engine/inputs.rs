//! MarketData: the immutable inputs of a run.

use crate::domain::{EventTrigger, PriceTable};
use crate::pit::FactStore;
use chrono::NaiveDate;

/// Prices, facts, and event triggers shared read-only by every run.
#[derive(Debug, Clone)]
pub struct MarketData {
    pub prices: PriceTable,
    pub facts: FactStore,
    pub triggers: Vec<EventTrigger>,
}

impl MarketData {
    pub fn new(prices: PriceTable) -> Self {
        Self {
            prices,
            facts: FactStore::default(),
            triggers: Vec::new(),
        }
    }

    pub fn with_facts(mut self, facts: FactStore) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<EventTrigger>) -> Self {
        self.triggers = triggers;
        self
    }

    /// Inputs restricted to `start..=end`.
    ///
    /// Facts effective after `end` and triggers outside the range are dropped.
    pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> MarketData {
        MarketData {
            prices: self.prices.slice_dates(start, end),
            facts: self.facts.truncated(end),
            triggers: self
                .triggers
                .iter()
                .filter(|t| t.trigger_date >= start && t.trigger_date <= end)
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FactRow, PriceRow};

    #[test]
    fn slicing_restricts_every_input() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let prices = PriceTable::from_rows(
            (1..=10).map(|day| PriceRow::new(d(day), "A", 100.0 + day as f64)),
        )
        .unwrap();
        let data = MarketData::new(prices)
            .with_facts(FactStore::new(vec![
                FactRow::new("A", d(2)).with_field("x", 1.0),
                FactRow::new("A", d(9)).with_field("x", 2.0),
            ]))
            .with_triggers(vec![EventTrigger::new("A", d(3)), EventTrigger::new("A", d(8))]);

        let train = data.slice_dates(d(1), d(5));
        assert_eq!(train.prices.len(), 5);
        assert_eq!(train.facts.len(), 1);
        assert_eq!(train.triggers.len(), 1);
    }
}
