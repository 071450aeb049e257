//! Order execution seam.
//!
//! The scheduler talks to a `Broker`; `PaperBroker` simulates fills with the
//! same friction model the backtest uses. Signal-only mode never reaches a
//! broker at all.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

use regimelab_core::domain::OrderSide;
use regimelab_core::engine::FrictionModel;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("order for {symbol} rejected: {reason}")]
    Rejected { symbol: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// Quote the order was sized against.
    pub reference_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillReport {
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
}

pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    /// Whether orders can be sent right now.
    fn is_available(&self) -> bool {
        true
    }

    fn submit(&self, request: &FillRequest) -> Result<FillReport, BrokerError>;
}

/// Simulated execution: fills immediately at the reference price shifted by
/// spread and slippage, for the partial-fill share of the quantity.
#[derive(Debug, Default)]
pub struct PaperBroker {
    friction: FrictionModel,
    fills: AtomicU64,
}

impl PaperBroker {
    pub fn new(friction: FrictionModel) -> Self {
        Self {
            friction,
            fills: AtomicU64::new(0),
        }
    }

    /// Orders filled so far.
    pub fn fill_count(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
    }
}

impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    fn submit(&self, request: &FillRequest) -> Result<FillReport, BrokerError> {
        if !(request.quantity > 0.0) || !(request.reference_price > 0.0) {
            return Err(BrokerError::Rejected {
                symbol: request.symbol.clone(),
                reason: format!(
                    "quantity {} at {} is not fillable",
                    request.quantity, request.reference_price
                ),
            });
        }
        let price = self.friction.fill_price(request.reference_price, request.side);
        let quantity = self.friction.filled_quantity(request.quantity);
        self.fills.fetch_add(1, Ordering::Relaxed);
        debug!(symbol = %request.symbol, side = ?request.side, price, quantity, "paper fill");
        Ok(FillReport {
            price,
            quantity,
            commission: self.friction.commission(price, quantity),
        })
    }
}
