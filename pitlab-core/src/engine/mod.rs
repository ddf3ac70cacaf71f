//! Backtest engine: configuration, baseline construction, and the date loop.
//!
//! The driver owns the time axis. Each date it calls the ledger, the tilt
//! book, the risk scaler, and the cost model exactly once, in a fixed order.

pub mod baseline;
pub mod config;
pub mod driver;
pub mod inputs;
pub mod rebalance;
pub mod state;

pub use baseline::{BaselineConfig, TopNWeighting};
pub use config::EngineConfig;
pub use driver::{run_backtest, run_backtest_with_control, RunControl};
pub use inputs::MarketData;
pub use rebalance::Rebalance;
pub use state::{DailyRecord, RunDiagnostics, RunOutput};
