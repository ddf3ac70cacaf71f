//! Performance metrics: pure functions that compute strategy statistics.
//!
//! Portfolio metrics are computed from the daily net return series; trade
//! metrics from the ledger's closed trades. No dependencies on the runner,
//! the data pipeline, or the driver state.

use pitlab_core::domain::TradeRecord;
use pitlab_core::engine::RunOutput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use pitlab_core::cost::TRADING_DAYS_PER_YEAR;

/// Aggregate performance metrics for a single backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub days: usize,
    pub total_return: f64,
    pub cagr: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    /// Mean unlevered turnover per date.
    pub avg_turnover: f64,
    /// Σ daily cost fractions.
    pub total_cost: f64,
    pub avg_leverage: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_holding_days: f64,
    pub exit_reasons: BTreeMap<String, usize>,
}

impl PerformanceMetrics {
    /// Compute all metrics from a driver output.
    pub fn compute(output: &RunOutput) -> Self {
        let returns = output.net_returns();
        let days = returns.len();
        let mean_of = |f: fn(&pitlab_core::engine::DailyRecord) -> f64| {
            mean_f64(&output.daily.iter().map(f).collect::<Vec<_>>())
        };
        Self {
            days,
            total_return: total_return(&returns),
            cagr: cagr(&returns),
            annualized_volatility: annualized_volatility(&returns),
            sharpe: sharpe_ratio(&returns, 0.0),
            sortino: sortino_ratio(&returns, 0.0),
            calmar: calmar_ratio(&returns),
            max_drawdown: max_drawdown(&returns),
            avg_turnover: mean_of(|d| d.turnover),
            total_cost: output.total_cost(),
            avg_leverage: mean_of(|d| d.leverage),
            trade_count: output.trades.len(),
            win_rate: win_rate(&output.trades),
            profit_factor: profit_factor(&output.trades),
            avg_holding_days: avg_holding_days(&output.trades),
            exit_reasons: exit_reason_counts(&output.trades),
        }
    }
}

// ─── Return-series metrics ──────────────────────────────────────────

/// Compounded return: Π(1 + r) − 1.
pub fn total_return(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Compound Annual Growth Rate over 252-day years.
///
/// Returns 0.0 for fewer than two dates or a wiped-out book.
pub fn cagr(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let growth = 1.0 + total_return(returns);
    if growth <= 0.0 {
        return 0.0;
    }
    let years = returns.len() as f64 / TRADING_DAYS_PER_YEAR;
    growth.powf(1.0 / years) - 1.0
}

pub fn annualized_volatility(returns: &[f64]) -> f64 {
    std_dev(returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sharpe ratio: mean(r − rf) / std(r − rf) × √252.
///
/// Returns 0.0 if variance is zero or fewer than 2 dates.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let std = std_dev(&excess);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(&excess) / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio (downside deviation only).
///
/// Returns 0.0 if there is no downside or fewer than 2 dates.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let downside_sq: f64 = excess.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    if downside_sq == 0.0 {
        return 0.0;
    }
    let downside_std = (downside_sq / excess.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean_f64(&excess) / downside_std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Calmar ratio: CAGR / |max_drawdown|.
///
/// Returns 0.0 if there is no drawdown or CAGR is non-positive.
pub fn calmar_ratio(returns: &[f64]) -> f64 {
    let c = cagr(returns);
    let dd = max_drawdown(returns);
    if dd >= 0.0 || c <= 0.0 {
        return 0.0;
    }
    c / dd.abs()
}

/// Maximum drawdown of the compounded curve as a negative fraction.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut wealth = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut max_dd = 0.0_f64;
    for r in returns {
        wealth *= 1.0 + r;
        peak = peak.max(wealth);
        if peak > 0.0 {
            max_dd = max_dd.min(wealth / peak - 1.0);
        }
    }
    max_dd
}

// ─── Trade metrics ──────────────────────────────────────────────────

/// Win rate: fraction of trades that were winners.
pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64
}

/// Profit factor: gross profits / gross losses.
///
/// Capped at 100.0 for edge cases (all winners, zero losses).
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.net_pnl > 0.0)
        .map(|t| t.net_pnl)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.net_pnl < 0.0)
        .map(|t| t.net_pnl.abs())
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

pub fn avg_holding_days(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.holding_days).sum::<usize>() as f64 / trades.len() as f64
}

/// Closed trades per exit reason, keyed by the reason's wire name.
pub fn exit_reason_counts(trades: &[TradeRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for trade in trades {
        *counts.entry(trade.exit_reason.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

// ─── Helpers ────────────────────────────────────────────────────────

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
