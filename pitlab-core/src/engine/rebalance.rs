//! Rebalance cadence on the trading calendar.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rebalance {
    /// Every `n` trading dates, starting with the first.
    EveryN { n: usize },
    /// First trading date of each ISO week.
    Weekly,
    /// First trading date of each month.
    Monthly,
    /// First trading date of each calendar quarter.
    Quarterly,
}

impl Default for Rebalance {
    fn default() -> Self {
        Rebalance::Monthly
    }
}

impl Rebalance {
    /// Whether calendar position `t` is a rebalance date. Looks only at `dates[..=t]`.
    pub fn is_rebalance_date(&self, dates: &[NaiveDate], t: usize) -> bool {
        if t == 0 {
            return true;
        }
        let (prev, cur) = (dates[t - 1], dates[t]);
        match self {
            Rebalance::EveryN { n } => t % (*n).max(1) == 0,
            Rebalance::Weekly => prev.iso_week() != cur.iso_week(),
            Rebalance::Monthly => (prev.year(), prev.month()) != (cur.year(), cur.month()),
            Rebalance::Quarterly => {
                (prev.year(), prev.month0() / 3) != (cur.year(), cur.month0() / 3)
            }
        }
    }
}
