//! Engine-level errors.

use crate::domain::PriceTableError;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("price calendar is empty")]
    EmptyCalendar,

    #[error("scorer failed on {date}: {message}")]
    Scorer { date: NaiveDate, message: String },

    #[error("run cancelled at {date} (date index {index})")]
    Cancelled { date: NaiveDate, index: usize },

    #[error(transparent)]
    Prices(#[from] PriceTableError),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidConfig(msg.into())
    }
}
