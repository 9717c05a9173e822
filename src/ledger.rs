//! Collateral and position accounting.
//!
//! Every function here is pure and operates on non-negative integer cents.
//! Lock estimates round up (ceil), actual fee charges round down (floor),
//! which keeps collateral sufficient without ever charging more than earned.

use crate::model::{Outcome, OrderType, Side, MAX_PRICE_CENTS, SHARE_VALUE_CENTS};
use serde::{Deserialize, Serialize};

/// Worst-case cash a single share could owe on fill at the order's own
/// price. MARKET orders lock the symmetric worst case on both sides.
pub fn per_share_lock_cents(side: Side, order_type: OrderType, price_cents: Option<i64>) -> i64 {
    match (order_type, price_cents) {
        (OrderType::Market, _) => MAX_PRICE_CENTS,
        (OrderType::Limit, Some(p)) => match side {
            Side::Buy => p,
            Side::Sell => SHARE_VALUE_CENTS - p,
        },
        // Validation rejects priceless LIMIT orders upstream.
        (OrderType::Limit, None) => MAX_PRICE_CENTS,
    }
}

/// Conservative fee reservation taken at lock time (ceil).
pub fn fee_estimate_cents(price_ref_cents: i64, qty: i64, fee_bps: i64) -> i64 {
    (price_ref_cents * qty * fee_bps + 9_999) / 10_000
}

/// Fee actually charged to the taker per fill (floor). Makers pay no fee.
pub fn taker_fee_cents(price_cents: i64, qty: i64, fee_bps: i64) -> i64 {
    price_cents * qty * fee_bps / 10_000
}

/// Total lock required to accept an order: worst-case fill cash plus the
/// fee reservation. `P_ref` is the limit price for LIMIT and the price cap
/// for MARKET.
pub fn required_lock_cents(
    side: Side,
    order_type: OrderType,
    price_cents: Option<i64>,
    qty: i64,
    fee_bps: i64,
) -> i64 {
    let per_share = per_share_lock_cents(side, order_type, price_cents);
    let price_ref = match order_type {
        OrderType::Limit => price_cents.unwrap_or(MAX_PRICE_CENTS),
        OrderType::Market => MAX_PRICE_CENTS,
    };
    per_share * qty + fee_estimate_cents(price_ref, qty, fee_bps)
}

/// Lock retained by a resting LIMIT order, recomputed from its remainder.
/// The maker-side release on a fill is `old lock − resting_lock(remaining)`,
/// which releases per-share collateral plus the pro-rated fee reservation.
pub fn resting_lock_cents(side: Side, price_cents: i64, remaining_qty: i64, fee_bps: i64) -> i64 {
    if remaining_qty == 0 {
        return 0;
    }
    let per_share = match side {
        Side::Buy => price_cents,
        Side::Sell => SHARE_VALUE_CENTS - price_cents,
    };
    per_share * remaining_qty + fee_estimate_cents(price_cents, remaining_qty, fee_bps)
}

/// Cash effect of settling a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleEffect {
    /// Positive credits the wallet, negative debits it.
    pub payout_cents: i64,
    pub lock_released_cents: i64,
    pub realized_pnl_delta_cents: i64,
}

/// Per-(market, user) position accounting state.
///
/// `yes_shares` is signed: positive long, negative short. `avg_cost_cents`
/// is the weighted-average entry for the long side only. `locked_cents` is
/// the collateral reserved against short exposure, `(100 − sell price)` per
/// share at fill time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionState {
    pub yes_shares: i64,
    pub avg_cost_cents: i64,
    pub locked_cents: i64,
    pub realized_pnl_cents: i64,
}

impl PositionState {
    /// Applies one fill at the execution price. A fill that crosses zero is
    /// split into its closing and opening legs.
    pub fn apply_fill(&mut self, side: Side, price_cents: i64, qty: i64) {
        match side {
            Side::Buy => self.apply_buy(price_cents, qty),
            Side::Sell => self.apply_sell(price_cents, qty),
        }
    }

    fn apply_buy(&mut self, price: i64, qty: i64) {
        let mut qty = qty;
        if self.yes_shares < 0 {
            let short = -self.yes_shares;
            let covered = qty.min(short);
            let release = if covered == short {
                self.locked_cents
            } else {
                self.locked_cents * covered / short
            };
            self.realized_pnl_cents += (SHARE_VALUE_CENTS - price) * covered - release;
            self.locked_cents -= release;
            self.yes_shares += covered;
            qty -= covered;
        }
        if qty > 0 {
            let old = self.yes_shares;
            self.avg_cost_cents = (self.avg_cost_cents * old + price * qty) / (old + qty);
            self.yes_shares = old + qty;
        }
    }

    fn apply_sell(&mut self, price: i64, qty: i64) {
        let mut qty = qty;
        if self.yes_shares > 0 {
            let sold = qty.min(self.yes_shares);
            self.realized_pnl_cents += (price - self.avg_cost_cents) * sold;
            self.yes_shares -= sold;
            qty -= sold;
        }
        if qty > 0 {
            self.locked_cents += (SHARE_VALUE_CENTS - price) * qty;
            self.yes_shares -= qty;
        }
    }

    /// Settlement effect for this position. Longs were paid for at trade
    /// time, so a NO resolution moves no cash; shorts keep the sale proceeds
    /// and the released collateral realizes the profit.
    pub fn settle(&self, outcome: Outcome) -> SettleEffect {
        let lock_released = self.locked_cents;
        let (payout, realized_delta) = match outcome {
            Outcome::Yes => {
                if self.yes_shares > 0 {
                    (
                        self.yes_shares * SHARE_VALUE_CENTS,
                        (SHARE_VALUE_CENTS - self.avg_cost_cents) * self.yes_shares,
                    )
                } else if self.yes_shares < 0 {
                    (self.yes_shares * SHARE_VALUE_CENTS, -self.locked_cents)
                } else {
                    (0, 0)
                }
            }
            Outcome::No => {
                if self.yes_shares > 0 {
                    (0, -self.avg_cost_cents * self.yes_shares)
                } else if self.yes_shares < 0 {
                    (0, -self.yes_shares * SHARE_VALUE_CENTS - self.locked_cents)
                } else {
                    (0, 0)
                }
            }
        };
        SettleEffect {
            payout_cents: payout,
            lock_released_cents: lock_released,
            realized_pnl_delta_cents: realized_delta,
        }
    }
}
