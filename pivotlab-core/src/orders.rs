//! Order sink: where exit decisions become sell orders.
//!
//! The engine records an exit whether or not the sink accepts it; a sink
//! failure is an operational alert, not a reason to keep risk open in the
//! books.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellOrder {
    pub symbol: String,
    pub shares: u64,
    /// `None` is a market order.
    pub limit_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub symbol: String,
    pub shares: u64,
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order for {symbol} rejected: {reason}")]
    Rejected { symbol: String, reason: String },

    #[error("order sink unavailable: {0}")]
    Unavailable(String),
}

pub trait OrderSink: Send + Sync {
    fn name(&self) -> &str;

    fn sell(&self, order: &SellOrder) -> Result<OrderConfirmation, OrderError>;
}

/// Accepts every order and keeps it in memory.
#[derive(Debug, Default)]
pub struct PaperSink {
    orders: Mutex<Vec<SellOrder>>,
    next_id: AtomicU64,
}

impl PaperSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders accepted so far, oldest first.
    pub fn orders(&self) -> Vec<SellOrder> {
        self.orders.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OrderSink for PaperSink {
    fn name(&self) -> &str {
        "paper"
    }

    fn sell(&self, order: &SellOrder) -> Result<OrderConfirmation, OrderError> {
        if order.shares == 0 {
            return Err(OrderError::Rejected {
                symbol: order.symbol.clone(),
                reason: "zero shares".into(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(order.clone());
        info!(symbol = %order.symbol, shares = order.shares, limit = ?order.limit_price, id, "paper sell");
        Ok(OrderConfirmation {
            order_id: format!("paper-{id}"),
            symbol: order.symbol.clone(),
            shares: order.shares,
        })
    }
}

/// Auto-execution disabled: every order is logged for a human to place.
#[derive(Debug, Default)]
pub struct ManualSink {
    next_id: AtomicU64,
}

impl ManualSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderSink for ManualSink {
    fn name(&self) -> &str {
        "manual"
    }

    fn sell(&self, order: &SellOrder) -> Result<OrderConfirmation, OrderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        match order.limit_price {
            Some(limit) => warn!(
                symbol = %order.symbol,
                shares = order.shares,
                limit,
                "manual action required: place limit sell"
            ),
            None => warn!(
                symbol = %order.symbol,
                shares = order.shares,
                "manual action required: place market sell"
            ),
        }
        Ok(OrderConfirmation {
            order_id: format!("manual-{id}"),
            symbol: order.symbol.clone(),
            shares: order.shares,
        })
    }
}
