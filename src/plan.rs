//! Execution planning.
//!
//! The single writer peeks the book, plans every durable effect of a command
//! as plain data, and hands the plan to the store to apply in one
//! transaction. Planning never touches the store and never mutates the book;
//! the book is only mutated after the transaction commits.

use crate::book::{BookEntry, Match};
use crate::ledger::{
    required_lock_cents, resting_lock_cents, taker_fee_cents, PositionState,
};
use crate::model::{
    CancelReason, Event, EventRow, Fill, MarketResolvedEvent, OrderAcceptedEvent,
    OrderCanceledEvent, OrderFilledEvent, OrderStatus, OrderType, Outcome, PlaceOrderRequest,
    PlaceOrderResult, Position, PositionSettledEvent, SettlementSummary, Side,
    TradeExecutedEvent, MAX_ORDER_QTY, MAX_PRICE_CENTS, MIN_PRICE_CENTS,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-market monotonic sequence allocator. Owned by the engine; a plan
/// draws the seq values it needs, and the engine only advances its counter
/// once the transaction commits, so rollbacks leave no gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequencer {
    current: i64,
}

impl Sequencer {
    pub fn starting_after(current: i64) -> Self {
        Self { current }
    }

    pub fn next(&mut self) -> i64 {
        self.current += 1;
        self.current
    }

    pub fn current(&self) -> i64 {
        self.current
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("limit orders require a price")]
    MissingPrice,
    #[error("market orders carry no price")]
    UnexpectedPrice,
    #[error("price must be between 1 and 99")]
    PriceOutOfRange,
    #[error("price must be a multiple of the {0}-cent tick")]
    TickViolation(i64),
    #[error("qty must be between 1 and 100000")]
    QtyOutOfRange,
}

/// Static validation; failures reject the order before any funds are locked.
pub fn validate_request(
    tick_size_cents: i64,
    req: &PlaceOrderRequest,
) -> Result<(), ValidationError> {
    if req.qty < 1 || req.qty > MAX_ORDER_QTY {
        return Err(ValidationError::QtyOutOfRange);
    }
    match req.order_type {
        OrderType::Limit => {
            let price = req.price_cents.ok_or(ValidationError::MissingPrice)?;
            if !(MIN_PRICE_CENTS..=MAX_PRICE_CENTS).contains(&price) {
                return Err(ValidationError::PriceOutOfRange);
            }
            if price % tick_size_cents != 0 {
                return Err(ValidationError::TickViolation(tick_size_cents));
            }
        }
        OrderType::Market => {
            if req.price_cents.is_some() {
                return Err(ValidationError::UnexpectedPrice);
            }
        }
    }
    Ok(())
}

// ── Place plan ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRowPlan {
    pub id: Uuid,
    pub market_id: Uuid,
    pub user_id: Uuid,
    pub side: Side,
    pub order_type: OrderType,
    pub price_cents: Option<i64>,
    pub qty: i64,
    pub remaining_qty: i64,
    pub locked_cents: i64,
    pub status: OrderStatus,
    pub seq: i64,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRowPlan {
    pub id: Uuid,
    pub maker_order_id: Uuid,
    pub maker_user_id: Uuid,
    pub price_cents: i64,
    pub qty: i64,
    pub fee_cents: i64,
    pub seq: i64,
}

/// New remaining/lock/status for a maker order consumed by a fill. The lock
/// is recomputed from the remainder, which releases the filled share of the
/// maker's collateral plus the pro-rated fee reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakerUpdate {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub remaining_qty: i64,
    pub locked_cents: i64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub user_id: Uuid,
    pub delta_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionWrite {
    pub user_id: Uuid,
    pub state: PositionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacePlan {
    pub market_id: Uuid,
    pub order: OrderRowPlan,
    /// Worst-case lock for the full requested qty, verified against the
    /// taker's available balance under row lock before any row is written.
    pub required_lock_cents: i64,
    pub trades: Vec<TradeRowPlan>,
    pub maker_updates: Vec<MakerUpdate>,
    pub balance_deltas: Vec<BalanceDelta>,
    pub positions: Vec<PositionWrite>,
    pub platform_fee_cents: i64,
    pub events: Vec<EventRow>,
    /// Users whose wallet lock is recomputed authoritatively at commit.
    pub affected_users: Vec<Uuid>,
    /// In-memory book mutations applied after the commit succeeds.
    pub book_fills: Vec<(Uuid, i64)>,
    pub resting: Option<BookEntry>,
    pub result: PlaceOrderResult,
}

/// Builds the full durable effect of accepting one order against the
/// current book. `matches` comes from a non-mutating
/// [`find_matches`](crate::book::OrderBook::find_matches) walk and
/// `positions` holds the pre-read accounting state for the taker and every
/// maker user (safe to read outside the transaction: this engine is the
/// only writer for the market).
pub fn plan_place(
    market_id: Uuid,
    fee_bps: i64,
    user_id: Uuid,
    req: &PlaceOrderRequest,
    matches: &[Match],
    positions: &HashMap<Uuid, PositionState>,
    seq: &mut Sequencer,
) -> PlacePlan {
    let order_id = Uuid::new_v4();
    let fill_total: i64 = matches.iter().map(|m| m.fill_qty).sum();

    let (status, remaining_qty) = if fill_total == req.qty {
        (OrderStatus::Filled, 0)
    } else if req.order_type == OrderType::Market {
        if fill_total > 0 {
            // market remainder is discarded, never rests
            (OrderStatus::Filled, 0)
        } else {
            (OrderStatus::Canceled, 0)
        }
    } else if fill_total > 0 {
        (OrderStatus::Partial, req.qty - fill_total)
    } else {
        (OrderStatus::Open, req.qty)
    };

    let no_liquidity_cancel = status == OrderStatus::Canceled;
    // The worst-case lock for the full requested qty gates acceptance even
    // when the order cancels unfilled; the whole amount is released within
    // the same transaction.
    let required_lock =
        required_lock_cents(req.side, req.order_type, req.price_cents, req.qty, fee_bps);

    let order_lock = match (status, req.price_cents) {
        (OrderStatus::Open | OrderStatus::Partial, Some(price)) => {
            resting_lock_cents(req.side, price, remaining_qty, fee_bps)
        }
        _ => 0,
    };

    let order_seq = seq.next();
    let mut events = vec![EventRow {
        market_id: Some(market_id),
        seq: Some(order_seq),
        event: Event::OrderAccepted(OrderAcceptedEvent {
            order_id,
            user_id,
            side: req.side,
            order_type: req.order_type,
            price_cents: req.price_cents,
            qty: req.qty,
        }),
    }];

    let mut trades = Vec::with_capacity(matches.len());
    let mut maker_updates = Vec::with_capacity(matches.len());
    let mut fills = Vec::with_capacity(matches.len());
    let mut balance_by_user: HashMap<Uuid, i64> = HashMap::new();
    let mut position_by_user: HashMap<Uuid, PositionState> = HashMap::new();
    let mut book_fills = Vec::with_capacity(matches.len());
    let mut platform_fee = 0;

    for m in matches {
        let trade_id = Uuid::new_v4();
        let trade_seq = seq.next();
        let price = m.fill_price_cents;
        let qty = m.fill_qty;
        let fee = taker_fee_cents(price, qty, fee_bps);
        let cash = price * qty;

        let maker = &m.entry;
        let maker_remaining = maker.remaining_qty - qty;
        let maker_status = if maker_remaining == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        maker_updates.push(MakerUpdate {
            order_id: maker.order_id,
            user_id: maker.user_id,
            remaining_qty: maker_remaining,
            locked_cents: resting_lock_cents(maker.side, maker.price_cents, maker_remaining, fee_bps),
            status: maker_status,
        });

        // Cash moves at the maker's resting price; the taker alone pays the fee.
        match req.side {
            Side::Buy => {
                *balance_by_user.entry(user_id).or_default() -= cash + fee;
                *balance_by_user.entry(maker.user_id).or_default() += cash;
            }
            Side::Sell => {
                *balance_by_user.entry(user_id).or_default() += cash - fee;
                *balance_by_user.entry(maker.user_id).or_default() -= cash;
            }
        }
        platform_fee += fee;

        position_by_user
            .entry(user_id)
            .or_insert_with(|| positions.get(&user_id).copied().unwrap_or_default())
            .apply_fill(req.side, price, qty);
        position_by_user
            .entry(maker.user_id)
            .or_insert_with(|| positions.get(&maker.user_id).copied().unwrap_or_default())
            .apply_fill(maker.side, price, qty);

        trades.push(TradeRowPlan {
            id: trade_id,
            maker_order_id: maker.order_id,
            maker_user_id: maker.user_id,
            price_cents: price,
            qty,
            fee_cents: fee,
            seq: trade_seq,
        });
        fills.push(Fill {
            maker_order_id: maker.order_id,
            price_cents: price,
            qty,
            fee_cents: fee,
            seq: trade_seq,
        });
        book_fills.push((maker.order_id, qty));

        events.push(EventRow {
            market_id: Some(market_id),
            seq: Some(trade_seq),
            event: Event::TradeExecuted(TradeExecutedEvent {
                trade_id,
                maker_order_id: maker.order_id,
                taker_order_id: order_id,
                price_cents: price,
                qty,
                fee_cents: fee,
                taker_side: req.side,
            }),
        });
        if maker_status == OrderStatus::Filled {
            events.push(EventRow {
                market_id: Some(market_id),
                seq: Some(seq.next()),
                event: Event::OrderFilled(OrderFilledEvent {
                    order_id: maker.order_id,
                    user_id: maker.user_id,
                }),
            });
        }
    }

    match status {
        OrderStatus::Filled => {
            events.push(EventRow {
                market_id: Some(market_id),
                seq: Some(seq.next()),
                event: Event::OrderFilled(OrderFilledEvent { order_id, user_id }),
            });
        }
        OrderStatus::Canceled => {
            events.push(EventRow {
                market_id: Some(market_id),
                seq: Some(seq.next()),
                event: Event::OrderCanceled(OrderCanceledEvent {
                    order_id,
                    user_id,
                    reason: CancelReason::NoLiquidity,
                }),
            });
        }
        _ => {}
    }

    let mut balance_deltas: Vec<BalanceDelta> = balance_by_user
        .into_iter()
        .filter(|(_, delta)| *delta != 0)
        .map(|(user_id, delta_cents)| BalanceDelta {
            user_id,
            delta_cents,
        })
        .collect();
    balance_deltas.sort_by_key(|d| d.user_id);

    let mut position_writes: Vec<PositionWrite> = position_by_user
        .into_iter()
        .map(|(user_id, state)| PositionWrite { user_id, state })
        .collect();
    position_writes.sort_by_key(|p| p.user_id);

    // Canonical user ordering keeps wallet row locks deadlock-free.
    let mut affected_users: Vec<Uuid> = maker_updates.iter().map(|m| m.user_id).collect();
    affected_users.push(user_id);
    affected_users.sort();
    affected_users.dedup();

    let resting = match status {
        OrderStatus::Open | OrderStatus::Partial => req.price_cents.map(|price| BookEntry {
            order_id,
            user_id,
            side: req.side,
            price_cents: price,
            remaining_qty,
            locked_cents: order_lock,
            seq: order_seq,
        }),
        _ => None,
    };

    PlacePlan {
        market_id,
        order: OrderRowPlan {
            id: order_id,
            market_id,
            user_id,
            side: req.side,
            order_type: req.order_type,
            price_cents: req.price_cents,
            qty: req.qty,
            remaining_qty,
            locked_cents: order_lock,
            status,
            seq: order_seq,
            client_order_id: req.client_order_id.clone(),
        },
        required_lock_cents: required_lock,
        trades,
        maker_updates,
        balance_deltas,
        positions: position_writes,
        platform_fee_cents: platform_fee,
        events,
        affected_users,
        book_fills,
        resting,
        result: PlaceOrderResult {
            order_id: Some(order_id),
            status,
            fills,
            reason: if no_liquidity_cancel {
                Some("no liquidity".to_string())
            } else {
                None
            },
        },
    }
}

// ── Settlement plan ──────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanceledOrderPlan {
    pub order_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub market_id: Uuid,
    pub resolves_to: Outcome,
    pub canceled_orders: Vec<CanceledOrderPlan>,
    pub positions: Vec<PositionWrite>,
    pub balance_deltas: Vec<BalanceDelta>,
    pub events: Vec<EventRow>,
    pub affected_users: Vec<Uuid>,
    pub summary: SettlementSummary,
}

/// Plans the one-shot resolution of a market: every resting order is
/// canceled, every position pays out or releases collateral, and the market
/// transitions to RESOLVED. Applied as a single all-or-nothing transaction.
pub fn plan_settlement(
    market_id: Uuid,
    resolves_to: Outcome,
    admin_user_id: Uuid,
    open_orders: &[BookEntry],
    positions: &[Position],
    seq: &mut Sequencer,
) -> SettlementPlan {
    let mut events = Vec::new();
    let mut canceled_orders = Vec::with_capacity(open_orders.len());
    let mut affected_users = Vec::new();

    for entry in open_orders {
        canceled_orders.push(CanceledOrderPlan {
            order_id: entry.order_id,
            user_id: entry.user_id,
        });
        affected_users.push(entry.user_id);
        events.push(EventRow {
            market_id: Some(market_id),
            seq: Some(seq.next()),
            event: Event::OrderCanceled(OrderCanceledEvent {
                order_id: entry.order_id,
                user_id: entry.user_id,
                reason: CancelReason::MarketSettlement,
            }),
        });
    }

    let mut position_writes = Vec::with_capacity(positions.len());
    let mut balance_deltas = Vec::new();
    let mut settled = 0;
    let mut total_payout = 0;

    for pos in positions {
        let state = PositionState {
            yes_shares: pos.yes_shares,
            avg_cost_cents: pos.avg_cost_cents,
            locked_cents: pos.locked_cents,
            realized_pnl_cents: pos.realized_pnl_cents,
        };
        let effect = state.settle(resolves_to);

        position_writes.push(PositionWrite {
            user_id: pos.user_id,
            state: PositionState {
                yes_shares: pos.yes_shares,
                avg_cost_cents: pos.avg_cost_cents,
                locked_cents: 0,
                realized_pnl_cents: pos.realized_pnl_cents + effect.realized_pnl_delta_cents,
            },
        });
        affected_users.push(pos.user_id);

        if effect.payout_cents != 0 {
            balance_deltas.push(BalanceDelta {
                user_id: pos.user_id,
                delta_cents: effect.payout_cents,
            });
        }
        if effect.payout_cents > 0 {
            total_payout += effect.payout_cents;
        }
        if pos.yes_shares != 0 {
            settled += 1;
            events.push(EventRow {
                market_id: Some(market_id),
                seq: Some(seq.next()),
                event: Event::PositionSettled(PositionSettledEvent {
                    user_id: pos.user_id,
                    yes_shares: pos.yes_shares,
                    payout_cents: effect.payout_cents,
                    lock_released_cents: effect.lock_released_cents,
                    realized_pnl_delta_cents: effect.realized_pnl_delta_cents,
                }),
            });
        }
    }

    let summary = SettlementSummary {
        settled_positions: settled,
        total_payout_cents: total_payout,
    };
    events.push(EventRow {
        market_id: Some(market_id),
        seq: Some(seq.next()),
        event: Event::MarketResolved(MarketResolvedEvent {
            resolves_to,
            admin_user_id,
            settled_positions: settled,
            total_payout_cents: total_payout,
        }),
    });

    balance_deltas.sort_by_key(|d| d.user_id);
    affected_users.sort();
    affected_users.dedup();

    SettlementPlan {
        market_id,
        resolves_to,
        canceled_orders,
        positions: position_writes,
        balance_deltas,
        events,
        affected_users,
        summary,
    }
}
