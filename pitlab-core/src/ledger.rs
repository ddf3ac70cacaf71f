//! Position lifecycle ledger.
//!
//! Owns every open position and the log of closed ones. Each date the driver
//! asks it to evaluate exits on that date's closes, then (on rebalance dates)
//! submits a ranked list of entry candidates. The ledger contributes a
//! constant-weight sleeve to the day's allocation.
//!
//! Exit priority on any date: stop loss (always), then, once `min_hold`
//! trading dates have elapsed, trailing stop, profit target, time exit.

use crate::cost::{CostModel, LiquiditySnapshot};
use crate::domain::{
    ExitReason, Position, PositionSide, PositionStatus, Quotes, TradeRecord, WeightVector,
};
use crate::error::EngineError;
use crate::scoring::ScoreMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative slack on threshold comparisons so that a close of exactly
/// `entry × (1 − stop)` triggers despite floating-point rounding.
const THRESHOLD_TOLERANCE: f64 = 1e-9;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitRules {
    /// Close the position once its return falls to `−stop_loss`.
    pub stop_loss: Option<f64>,
    /// Close once price gives back this fraction from the high-water mark.
    pub trailing_stop: Option<f64>,
    pub profit_target: Option<f64>,
    /// Maximum holding period in trading dates.
    pub max_hold: Option<usize>,
    /// Only the stop loss may fire before this many trading dates.
    pub min_hold: usize,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            stop_loss: Some(0.08),
            trailing_stop: None,
            profit_target: Some(0.15),
            max_hold: Some(20),
            min_hold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_positions: usize,
    /// Target weight of each position.
    pub position_size: f64,
    /// Smallest entry notional in currency.
    pub min_notional: f64,
    /// Scores must exceed this (in magnitude, for shorts) to become candidates.
    pub entry_threshold: f64,
    pub allow_short: bool,
    pub max_entries_per_rebalance: Option<usize>,
    /// Gross weight reserved for the ledger; `max_positions × position_size` when unset.
    pub sleeve: Option<f64>,
    pub exits: ExitRules,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_positions: 20,
            position_size: 0.05,
            min_notional: 1_000.0,
            entry_threshold: 0.0,
            allow_short: false,
            max_entries_per_rebalance: Some(5),
            sleeve: None,
            exits: ExitRules::default(),
        }
    }
}

impl LedgerConfig {
    pub fn sleeve(&self) -> f64 {
        self.sleeve
            .unwrap_or(self.max_positions as f64 * self.position_size)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.position_size > 0.0 && self.position_size.is_finite()) {
            return Err(EngineError::invalid("ledger.position_size must be positive"));
        }
        if self.max_positions == 0 {
            return Err(EngineError::invalid("ledger.max_positions must be at least 1"));
        }
        if self.sleeve() < 0.0 || !self.sleeve().is_finite() {
            return Err(EngineError::invalid("ledger.sleeve must be non-negative"));
        }
        let e = &self.exits;
        for (name, v) in [
            ("stop_loss", e.stop_loss),
            ("trailing_stop", e.trailing_stop),
            ("profit_target", e.profit_target),
        ] {
            if let Some(v) = v {
                if !(v > 0.0 && v.is_finite()) {
                    return Err(EngineError::invalid(format!(
                        "ledger.exits.{name} must be positive"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ─── Candidates ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryCandidate {
    pub symbol: String,
    pub score: f64,
    pub side: PositionSide,
}

/// Turn a score map into candidates ranked by |score| descending, ties by symbol.
pub fn rank_candidates(scores: &ScoreMap, config: &LedgerConfig) -> Vec<EntryCandidate> {
    let mut out: Vec<EntryCandidate> = scores
        .iter()
        .filter(|(_, s)| s.is_finite())
        .filter_map(|(symbol, &score)| {
            let side = if score > config.entry_threshold {
                PositionSide::Long
            } else if config.allow_short && score < -config.entry_threshold {
                PositionSide::Short
            } else {
                return None;
            };
            Some(EntryCandidate {
                symbol: symbol.clone(),
                score,
                side,
            })
        })
        .collect();
    out.sort_by(|a, b| {
        b.score
            .abs()
            .total_cmp(&a.score.abs())
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    out
}

/// Why candidates were turned away. Never retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionStats {
    pub duplicate: usize,
    pub capacity: usize,
    pub budget: usize,
    pub no_price: usize,
}

impl RejectionStats {
    pub fn total(&self) -> usize {
        self.duplicate + self.capacity + self.budget + self.no_price
    }
}

// ─── Ledger ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PositionLedger {
    config: LedgerConfig,
    open: BTreeMap<String, Position>,
    closed: Vec<TradeRecord>,
    rejections: RejectionStats,
}

impl PositionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            open: BTreeMap::new(),
            closed: Vec::new(),
            rejections: RejectionStats::default(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.open.contains_key(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> + '_ {
        self.open.values()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.closed
    }

    pub fn rejections(&self) -> RejectionStats {
        self.rejections
    }

    /// Gross weight committed to open positions.
    pub fn committed(&self) -> f64 {
        self.open.values().map(|p| p.size).sum()
    }

    /// Signed weights of the ledger sleeve.
    pub fn weights(&self) -> WeightVector {
        self.open
            .values()
            .map(|p| (p.symbol.clone(), p.weight()))
            .collect()
    }

    /// Check every open position against the closes of `quotes`.
    ///
    /// Positions without a price on this date are skipped and keep their
    /// weight. Returns the trades closed on this date.
    pub fn evaluate_exits(
        &mut self,
        quotes: &Quotes<'_>,
        cost: &CostModel,
        liquidity: &LiquiditySnapshot,
    ) -> Vec<TradeRecord> {
        let index = quotes.index();
        let rules = self.config.exits.clone();
        let mut exits: Vec<(String, f64, ExitReason)> = Vec::new();

        for (symbol, pos) in self.open.iter_mut() {
            if index <= pos.entry_index {
                continue;
            }
            let Some(price) = quotes.close(symbol) else {
                continue;
            };
            pos.bars_held = index - pos.entry_index;
            pos.update_mark(price);
            if let Some(reason) = exit_reason(pos, price, &rules) {
                exits.push((symbol.clone(), price, reason));
            }
        }

        let mut closed = Vec::with_capacity(exits.len());
        for (symbol, price, reason) in exits {
            let Some(mut pos) = self.open.remove(&symbol) else {
                continue;
            };
            pos.status = PositionStatus::Closed;
            let entry_cost = pos.cost_basis - pos.quantity * pos.entry_price;
            let exit_cost = cost.trade_cost(&symbol, pos.quantity * price, liquidity);
            let gross_pnl = pos.gross_pnl(price);
            let transaction_cost = entry_cost + exit_cost;
            debug!(
                "close {} {:?} on {} at {:.4}: {}",
                symbol,
                pos.side,
                quotes.date(),
                price,
                reason
            );
            closed.push(TradeRecord {
                symbol,
                side: pos.side,
                entry_date: pos.entry_date,
                entry_price: pos.entry_price,
                exit_date: quotes.date(),
                exit_price: price,
                exit_reason: reason,
                size: pos.size,
                quantity: pos.quantity,
                gross_pnl,
                transaction_cost,
                net_pnl: gross_pnl - transaction_cost,
                holding_days: pos.bars_held,
            });
        }
        self.closed.extend(closed.iter().cloned());
        closed
    }

    /// Open positions for ranked candidates at the closes of `quotes`.
    ///
    /// Returns the symbols entered. Rejected candidates are counted by reason.
    pub fn submit_entries(
        &mut self,
        candidates: &[EntryCandidate],
        quotes: &Quotes<'_>,
        equity: f64,
        cost: &CostModel,
        liquidity: &LiquiditySnapshot,
    ) -> Vec<String> {
        let size = self.config.position_size;
        let sleeve = self.config.sleeve();
        let per_call = self.config.max_entries_per_rebalance.unwrap_or(usize::MAX);
        let mut entered = Vec::new();

        for cand in candidates {
            if self.open.contains_key(&cand.symbol) {
                self.rejections.duplicate += 1;
                continue;
            }
            if self.open.len() >= self.config.max_positions || entered.len() >= per_call {
                self.rejections.capacity += 1;
                continue;
            }
            let Some(price) = quotes.close(&cand.symbol) else {
                self.rejections.no_price += 1;
                continue;
            };
            let notional = size * equity;
            if notional < self.config.min_notional || self.committed() + size > sleeve + 1e-12 {
                self.rejections.budget += 1;
                continue;
            }
            let entry_cost = cost.trade_cost(&cand.symbol, notional, liquidity);
            let pos = Position::open(
                cand.symbol.clone(),
                cand.side,
                quotes.date(),
                quotes.index(),
                price,
                size,
                equity,
                entry_cost,
            );
            debug!(
                "open {} {:?} on {} at {:.4} (score {:.4})",
                cand.symbol,
                cand.side,
                quotes.date(),
                price,
                cand.score
            );
            self.open.insert(cand.symbol.clone(), pos);
            entered.push(cand.symbol.clone());
        }
        entered
    }

    /// Consume the ledger, returning still-open positions and closed trades.
    pub fn into_parts(self) -> (Vec<Position>, Vec<TradeRecord>, RejectionStats) {
        (self.open.into_values().collect(), self.closed, self.rejections)
    }
}

fn exit_reason(pos: &Position, price: f64, rules: &ExitRules) -> Option<ExitReason> {
    let ret = pos.return_pct(price);
    if let Some(stop) = rules.stop_loss {
        if ret <= -stop + THRESHOLD_TOLERANCE {
            return Some(ExitReason::StopLoss);
        }
    }
    if pos.bars_held < rules.min_hold {
        return None;
    }
    if let Some(trail) = rules.trailing_stop {
        if pos.drawdown_from_mark(price) >= trail - THRESHOLD_TOLERANCE {
            return Some(ExitReason::TrailingStop);
        }
    }
    if let Some(target) = rules.profit_target {
        if ret >= target - THRESHOLD_TOLERANCE {
            return Some(ExitReason::ProfitTarget);
        }
    }
    if let Some(max_hold) = rules.max_hold {
        if pos.bars_held >= max_hold {
            return Some(ExitReason::TimeExit);
        }
    }
    None
}
