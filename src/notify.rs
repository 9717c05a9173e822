use crate::book::BookLevel;
use crate::model::{Fill, OrderStatus, Outcome, Side};
use serde::Serialize;
use uuid::Uuid;

/// Fire-and-forget notifications pushed to the outer transport after a
/// commit. Delivery is best-effort; clients re-fetch on reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BookSnapshot {
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    },
    Trade {
        price_cents: i64,
        qty: i64,
        taker_side: Side,
    },
    /// Addressed to the owning user by the transport layer.
    OrderUpdate {
        user_id: Uuid,
        order_id: Uuid,
        status: OrderStatus,
        fills: Vec<Fill>,
    },
    MarketResolved {
        resolves_to: Outcome,
    },
}

pub trait Publisher: Send + Sync {
    fn publish(&self, market_id: Uuid, note: &Notification);
}

/// Publisher that only logs; used by the daemon when no transport is wired.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, market_id: Uuid, note: &Notification) {
        if let Ok(json) = serde_json::to_string(note) {
            log::debug!("[notify] market {market_id}: {json}");
        }
    }
}

/// Publisher that drops everything.
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _market_id: Uuid, _note: &Notification) {}
}
