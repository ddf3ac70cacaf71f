//! PitLab Core: point-in-time portfolio backtesting.
//!
//! This crate turns per-date, per-instrument scores into realized,
//! cost-adjusted portfolio returns without look-ahead:
//! - Domain types (price table, fact rows, weights, positions, trades, events)
//! - Point-in-time aligner for irregularly dated facts
//! - Transaction cost model tied to turnover
//! - Volatility-targeting risk scaler with drawdown regimes
//! - Position lifecycle ledger with prioritized exit rules
//! - Event tilt book and the budget-constrained overlay
//! - The date-by-date backtest driver

pub mod cost;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod overlay;
pub mod pit;
pub mod risk;
pub mod scoring;
pub mod tilt;

pub use error::EngineError;
