//! Per-date records and run outputs.

use crate::domain::{Position, TradeRecord, WeightVector};
use crate::ledger::RejectionStats;
use crate::risk::{RiskDiagnostics, RiskRegime};
use crate::tilt::EventRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Everything the driver decided and realized on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    /// Σ w_{t−1,i} r_{t,i} before leverage.
    pub unlevered_return: f64,
    /// Leverage applied to this date's return.
    pub leverage: f64,
    /// `leverage × unlevered_return`.
    pub gross_return: f64,
    /// Transaction cost as a fraction of portfolio value.
    pub cost: f64,
    /// Unlevered Σ|w_t − w_{t−1}|.
    pub turnover: f64,
    pub net_return: f64,
    /// Portfolio value at the close.
    pub equity: f64,
    /// Drawdown of cumulative net return after this date.
    pub drawdown: f64,
    /// Regime that set this date's leverage.
    pub regime: RiskRegime,
    pub rebalanced: bool,
    pub active_events: usize,
    /// Overlay funding shortfall on this date.
    pub shortfall: f64,
    /// Unlevered target weights at the close.
    pub weights: WeightVector,
}

/// Aggregate counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub rebalance_count: usize,
    /// Rebalances skipped because scores were unavailable.
    pub skipped_rebalances: usize,
    pub rejections: RejectionStats,
    pub total_shortfall: f64,
    pub shortfall_days: usize,
    pub capped_excess: f64,
    /// Trigger symbols absent from the price table.
    pub unknown_trigger_symbols: Vec<String>,
    /// Triggers dated after the last trading date.
    pub triggers_out_of_range: usize,
    pub risk: RiskDiagnostics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub daily: Vec<DailyRecord>,
    /// Closed ledger trades, in exit order.
    pub trades: Vec<TradeRecord>,
    pub events: Vec<EventRecord>,
    /// Ledger positions still open after the last date.
    pub open_positions: Vec<Position>,
    pub final_equity: f64,
    pub diagnostics: RunDiagnostics,
}

impl RunOutput {
    pub fn net_returns(&self) -> Vec<f64> {
        self.daily.iter().map(|d| d.net_return).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.daily.iter().map(|d| d.date).collect()
    }

    pub fn total_cost(&self) -> f64 {
        self.daily.iter().map(|d| d.cost).sum()
    }
}
