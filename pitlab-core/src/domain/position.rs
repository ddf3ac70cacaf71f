//! Position: one open or closed holding owned by the ledger.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A ledger position.
///
/// `size` is the constant target weight (fraction of capital) held while the
/// position is open. `high_water_mark` tracks the most favorable close seen
/// since entry: the highest for longs, the lowest for shorts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_date: NaiveDate,
    pub entry_index: usize,
    pub entry_price: f64,
    pub size: f64,
    pub quantity: f64,
    pub cost_basis: f64,
    pub high_water_mark: f64,
    pub bars_held: usize,
    pub status: PositionStatus,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: impl Into<String>,
        side: PositionSide,
        entry_date: NaiveDate,
        entry_index: usize,
        entry_price: f64,
        size: f64,
        equity: f64,
        entry_cost: f64,
    ) -> Self {
        let notional = size * equity;
        Self {
            symbol: symbol.into(),
            side,
            entry_date,
            entry_index,
            entry_price,
            size,
            quantity: notional / entry_price,
            cost_basis: notional + entry_cost,
            high_water_mark: entry_price,
            bars_held: 0,
            status: PositionStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Signed weight this position contributes to the portfolio.
    pub fn weight(&self) -> f64 {
        self.side.sign() * self.size
    }

    /// Return since entry at `price`, inverted for shorts.
    pub fn return_pct(&self, price: f64) -> f64 {
        self.side.sign() * (price / self.entry_price - 1.0)
    }

    /// Move the high-water mark toward the favorable side.
    pub fn update_mark(&mut self, price: f64) {
        self.high_water_mark = match self.side {
            PositionSide::Long => self.high_water_mark.max(price),
            PositionSide::Short => self.high_water_mark.min(price),
        };
    }

    /// Fractional giveback from the high-water mark at `price` (≥ 0 when adverse).
    pub fn drawdown_from_mark(&self, price: f64) -> f64 {
        match self.side {
            PositionSide::Long => 1.0 - price / self.high_water_mark,
            PositionSide::Short => price / self.high_water_mark - 1.0,
        }
    }

    /// Gross profit in currency at `price`.
    pub fn gross_pnl(&self, price: f64) -> f64 {
        self.side.sign() * self.quantity * (price - self.entry_price)
    }
}
