use crate::model::Side;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BookError {
    #[error("duplicate order id {0}")]
    DuplicateOrder(Uuid),
    #[error("unknown order id {0}")]
    UnknownOrder(Uuid),
    #[error("fill qty {qty} exceeds remaining {remaining} on order {order_id}")]
    Overfill {
        order_id: Uuid,
        qty: i64,
        remaining: i64,
    },
}

/// A resting order as the book sees it. Storage rows are the source of
/// truth; entries carry only what matching and lock release need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub side: Side,
    pub price_cents: i64,
    pub remaining_qty: i64,
    pub locked_cents: i64,
    pub seq: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price_cents: i64,
    pub qty: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl BookSnapshot {
    pub fn truncated(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self.bids.iter().take(depth).copied().collect(),
            asks: self.asks.iter().take(depth).copied().collect(),
        }
    }
}

/// A planned fill against a resting order. Execution price is always the
/// maker's resting price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub entry: BookEntry,
    pub fill_qty: i64,
    pub fill_price_cents: i64,
}

/// In-memory limit order book for a single market, owned by exactly one
/// writer. Price levels are FIFO queues keyed by price; a flat index gives
/// O(1) lookup and cancel.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<i64, VecDeque<Uuid>>,
    asks: BTreeMap<i64, VecDeque<Uuid>>,
    index: HashMap<Uuid, BookEntry>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn best_bid(&self) -> Option<i64> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<i64> {
        self.asks.keys().next().copied()
    }

    pub fn entry(&self, order_id: &Uuid) -> Option<&BookEntry> {
        self.index.get(order_id)
    }

    /// All resting entries ordered by seq, i.e. arrival order.
    pub fn entries_in_seq_order(&self) -> Vec<BookEntry> {
        let mut entries: Vec<BookEntry> = self.index.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let mut bids = Vec::new();
        for (price, queue) in self.bids.iter().rev().take(depth) {
            bids.push(BookLevel {
                price_cents: *price,
                qty: self.level_qty(queue),
            });
        }
        let mut asks = Vec::new();
        for (price, queue) in self.asks.iter().take(depth) {
            asks.push(BookLevel {
                price_cents: *price,
                qty: self.level_qty(queue),
            });
        }
        BookSnapshot { bids, asks }
    }

    pub fn add(&mut self, entry: BookEntry) -> Result<(), BookError> {
        if self.index.contains_key(&entry.order_id) {
            return Err(BookError::DuplicateOrder(entry.order_id));
        }
        let levels = match entry.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        levels
            .entry(entry.price_cents)
            .or_default()
            .push_back(entry.order_id);
        self.index.insert(entry.order_id, entry);
        Ok(())
    }

    pub fn remove(&mut self, order_id: &Uuid) -> Option<BookEntry> {
        let entry = self.index.remove(order_id)?;
        let levels = match entry.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(queue) = levels.get_mut(&entry.price_cents) {
            queue.retain(|id| id != order_id);
            if queue.is_empty() {
                levels.remove(&entry.price_cents);
            }
        }
        Some(entry)
    }

    /// Reduces the remaining qty of a resting order, removing it once fully
    /// consumed. Returns the remaining qty after the fill.
    pub fn apply_fill(&mut self, order_id: &Uuid, qty: i64) -> Result<i64, BookError> {
        let entry = self
            .index
            .get_mut(order_id)
            .ok_or(BookError::UnknownOrder(*order_id))?;
        if qty > entry.remaining_qty {
            return Err(BookError::Overfill {
                order_id: *order_id,
                qty,
                remaining: entry.remaining_qty,
            });
        }
        entry.remaining_qty -= qty;
        if entry.remaining_qty == 0 {
            self.remove(order_id);
            return Ok(0);
        }
        Ok(entry.remaining_qty)
    }

    /// Walks opposite-side levels in price order and returns planned fills
    /// without mutating the book. `limit_price` of None matches at any price
    /// (MARKET). Entries owned by `exclude_user` are skipped silently, with
    /// the quantity flowing to the next eligible entry.
    pub fn find_matches(
        &self,
        side: Side,
        limit_price: Option<i64>,
        max_qty: i64,
        exclude_user: Uuid,
    ) -> Vec<Match> {
        let mut matches = Vec::new();
        let mut rem = max_qty;

        match side {
            Side::Buy => {
                for (ask_price, queue) in self.asks.iter() {
                    if rem <= 0 {
                        break;
                    }
                    if limit_price.is_some_and(|limit| *ask_price > limit) {
                        break;
                    }
                    self.walk_level(queue, *ask_price, exclude_user, &mut rem, &mut matches);
                }
            }
            Side::Sell => {
                for (bid_price, queue) in self.bids.iter().rev() {
                    if rem <= 0 {
                        break;
                    }
                    if limit_price.is_some_and(|limit| *bid_price < limit) {
                        break;
                    }
                    self.walk_level(queue, *bid_price, exclude_user, &mut rem, &mut matches);
                }
            }
        }
        matches
    }

    fn walk_level(
        &self,
        queue: &VecDeque<Uuid>,
        price: i64,
        exclude_user: Uuid,
        rem: &mut i64,
        matches: &mut Vec<Match>,
    ) {
        for order_id in queue {
            if *rem <= 0 {
                break;
            }
            let Some(entry) = self.index.get(order_id) else {
                continue;
            };
            if entry.user_id == exclude_user {
                continue;
            }
            let fill_qty = (*rem).min(entry.remaining_qty);
            if fill_qty == 0 {
                continue;
            }
            matches.push(Match {
                entry: entry.clone(),
                fill_qty,
                fill_price_cents: price,
            });
            *rem -= fill_qty;
        }
    }

    fn level_qty(&self, queue: &VecDeque<Uuid>) -> i64 {
        queue
            .iter()
            .filter_map(|id| self.index.get(id))
            .map(|e| e.remaining_qty)
            .sum()
    }
}
