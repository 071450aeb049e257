//! Historical replay — the decision pipeline driven bar by bar with
//! execution frictions.

pub mod friction;
pub mod replay;

pub use friction::FrictionModel;
pub use replay::{replay, EquityPoint, ReplayError, ReplayOutcome};
