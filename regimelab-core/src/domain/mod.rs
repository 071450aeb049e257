//! Domain types for RegimeLab

pub mod bar;
pub mod feature;
pub mod position;
pub mod trade;

pub use bar::{Bar, Indicators};
pub use feature::{join_features, Feature};
pub use position::{OrderSide, Position, PositionStatus, Side};
pub use trade::{ExitReason, TradeRecord};
