//! TradeRecord: a completed round trip emitted when a ledger position closes.

use super::position::PositionSide;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a position was closed. Exactly one per closed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    ProfitTarget,
    TimeExit,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::ProfitTarget => "PROFIT_TARGET",
            ExitReason::TimeExit => "TIME_EXIT",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    // ── Identification ──
    pub symbol: String,
    pub side: PositionSide,

    // ── Entry ──
    pub entry_date: NaiveDate,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size ──
    /// Target weight held while open.
    pub size: f64,
    pub quantity: f64,

    // ── PnL ──
    pub gross_pnl: f64,
    /// Round-trip cost: entry plus exit.
    pub transaction_cost: f64,
    pub net_pnl: f64,

    // ── Duration ──
    pub holding_days: usize,
}

impl TradeRecord {
    /// Net return on the entry notional.
    pub fn return_pct(&self) -> f64 {
        let notional = self.entry_price * self.quantity;
        if notional == 0.0 {
            return 0.0;
        }
        self.net_pnl / notional
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> TradeRecord {
        TradeRecord {
            symbol: "SPY".into(),
            side: PositionSide::Long,
            entry_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            entry_price: 100.0,
            exit_date: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
            exit_price: 110.0,
            exit_reason: ExitReason::ProfitTarget,
            size: 0.05,
            quantity: 50.0,
            gross_pnl: 500.0,
            transaction_cost: 15.0,
            net_pnl: 485.0,
            holding_days: 4,
        }
    }

    #[test]
    fn return_pct_calculation() {
        let trade = sample_trade();
        let expected = 485.0 / (100.0 * 50.0);
        assert!((trade.return_pct() - expected).abs() < 1e-10);
        assert!(trade.is_winner());
    }

    #[test]
    fn exit_reason_serializes_screaming() {
        let json = serde_json::to_string(&ExitReason::TrailingStop).unwrap();
        assert_eq!(json, "\"TRAILING_STOP\"");
        assert_eq!(ExitReason::TimeExit.to_string(), "TIME_EXIT");
    }
}
