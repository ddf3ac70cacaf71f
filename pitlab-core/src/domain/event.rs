//! Events: time-boxed weight tilts opened by external triggers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created this date, not yet contributing weight.
    Scheduled,
    /// `open ≤ date < close`.
    Active,
    /// `date ≥ close`; kept for history only.
    Expired,
}

/// An externally supplied signal that an instrument deserves a tilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub symbol: String,
    pub trigger_date: NaiveDate,
    #[serde(default = "default_strength")]
    pub strength: f64,
}

fn default_strength() -> f64 {
    1.0
}

impl EventTrigger {
    pub fn new(symbol: impl Into<String>, trigger_date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            trigger_date,
            strength: default_strength(),
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }
}

/// A scheduled tilt with a bounded horizon on the trading calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub symbol: String,
    pub open_date: NaiveDate,
    pub open_index: usize,
    /// Calendar index at which the event stops contributing.
    pub close_index: usize,
    /// `None` when the horizon runs past the end of the calendar.
    pub close_date: Option<NaiveDate>,
    pub tilt: f64,
    pub status: EventStatus,
}

impl Event {
    pub fn is_active_at(&self, index: usize) -> bool {
        self.open_index <= index && index < self.close_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_window_is_half_open() {
        let ev = Event {
            id: EventId(1),
            symbol: "AAPL".into(),
            open_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open_index: 3,
            close_index: 13,
            close_date: None,
            tilt: 0.02,
            status: EventStatus::Scheduled,
        };
        assert!(!ev.is_active_at(2));
        assert!(ev.is_active_at(3));
        assert!(ev.is_active_at(12));
        assert!(!ev.is_active_at(13));
    }

    #[test]
    fn trigger_strength_defaults_to_one() {
        let t: EventTrigger =
            serde_json::from_str(r#"{"symbol":"AAPL","trigger_date":"2024-01-02"}"#).unwrap();
        assert_eq!(t.strength, 1.0);
    }
}
