//! Domain types for PitLab

pub mod event;
pub mod fact;
pub mod position;
pub mod price;
pub mod trade;
pub mod weights;

pub use event::{Event, EventId, EventStatus, EventTrigger};
pub use fact::FactRow;
pub use position::{Position, PositionSide, PositionStatus};
pub use price::{PriceHistory, PriceRow, PriceTable, PriceTableError, Quotes};
pub use trade::{ExitReason, TradeRecord};
pub use weights::{WeightVector, WEIGHT_EPSILON};

/// Symbol type alias
pub type Symbol = String;
