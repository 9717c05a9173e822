//! End-to-end matching and settlement scenarios over the pure core: the
//! book plans fills, `plan` materializes durable effects, and this harness
//! applies them the way the engine does after a commit, re-checking the
//! accounting invariants after every command.

use crate::book::{BookLevel, OrderBook};
use crate::ledger::PositionState;
use crate::model::{
    OrderStatus, OrderType, Outcome, PlaceOrderRequest, Position, SettlementSummary, Side,
};
use crate::plan::{
    plan_place, plan_settlement, validate_request, OrderRowPlan, PlacePlan, Sequencer,
};
use std::collections::HashMap;
use uuid::Uuid;

const FEE_BPS: i64 = 100;
const TICK_CENTS: i64 = 1;

fn uid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn buy_limit(price: i64, qty: i64) -> PlaceOrderRequest {
    PlaceOrderRequest {
        side: Side::Buy,
        order_type: OrderType::Limit,
        price_cents: Some(price),
        qty,
        client_order_id: None,
    }
}

fn sell_limit(price: i64, qty: i64) -> PlaceOrderRequest {
    PlaceOrderRequest {
        side: Side::Sell,
        order_type: OrderType::Limit,
        price_cents: Some(price),
        qty,
        client_order_id: None,
    }
}

fn buy_market(qty: i64) -> PlaceOrderRequest {
    PlaceOrderRequest {
        side: Side::Buy,
        order_type: OrderType::Market,
        price_cents: None,
        qty,
        client_order_id: None,
    }
}

/// Single-market exchange state, driven the way the engine drives it: plan
/// against the book, gate on available funds, apply durable effects, then
/// mutate the book.
struct Sim {
    market_id: Uuid,
    book: OrderBook,
    seq: Sequencer,
    positions: HashMap<Uuid, PositionState>,
    balances: HashMap<Uuid, i64>,
    locked: HashMap<Uuid, i64>,
    orders: HashMap<Uuid, OrderRowPlan>,
    fees: i64,
    deposited: i64,
    last_seq_seen: i64,
}

impl Sim {
    fn new() -> Self {
        Self {
            market_id: Uuid::new_v4(),
            book: OrderBook::new(),
            seq: Sequencer::starting_after(0),
            positions: HashMap::new(),
            balances: HashMap::new(),
            locked: HashMap::new(),
            orders: HashMap::new(),
            fees: 0,
            deposited: 0,
            last_seq_seen: 0,
        }
    }

    fn fund(&mut self, user: Uuid, cents: i64) {
        *self.balances.entry(user).or_default() += cents;
        self.deposited += cents;
    }

    fn available(&self, user: Uuid) -> i64 {
        self.balances.get(&user).copied().unwrap_or(0)
            - self.locked.get(&user).copied().unwrap_or(0)
    }

    fn place(&mut self, user: Uuid, req: PlaceOrderRequest) -> PlacePlan {
        match self.try_place(user, req) {
            Ok(plan) => plan,
            Err((required, available)) => {
                panic!("test seeded insufficient funds: need {required}, have {available}")
            }
        }
    }

    /// The durable gate: rejects on `available < L` with no state change,
    /// rolling the seq allocator back the way the engine does.
    fn try_place(
        &mut self,
        user: Uuid,
        req: PlaceOrderRequest,
    ) -> Result<PlacePlan, (i64, i64)> {
        validate_request(TICK_CENTS, &req).expect("request must be valid");
        let limit_price = match req.order_type {
            OrderType::Limit => req.price_cents,
            OrderType::Market => None,
        };
        let matches = self.book.find_matches(req.side, limit_price, req.qty, user);
        let seq_before = self.seq;
        let plan = plan_place(
            self.market_id,
            FEE_BPS,
            user,
            &req,
            &matches,
            &self.positions.clone(),
            &mut self.seq,
        );

        let available = self.available(user);
        if available < plan.required_lock_cents {
            self.seq = seq_before;
            return Err((plan.required_lock_cents, available));
        }

        self.orders.insert(plan.order.id, plan.order.clone());
        for maker in &plan.maker_updates {
            let row = self.orders.get_mut(&maker.order_id).expect("maker row");
            row.remaining_qty = maker.remaining_qty;
            row.locked_cents = maker.locked_cents;
            row.status = maker.status;
        }
        for write in &plan.positions {
            self.positions.insert(write.user_id, write.state);
        }
        for delta in &plan.balance_deltas {
            *self.balances.entry(delta.user_id).or_default() += delta.delta_cents;
        }
        self.fees += plan.platform_fee_cents;
        for affected in &plan.affected_users {
            self.recalc_locked(*affected);
        }

        for (order_id, qty) in &plan.book_fills {
            self.book.apply_fill(order_id, *qty).expect("book fill");
        }
        if let Some(entry) = plan.resting.clone() {
            self.book.add(entry).expect("book add");
        }

        for event in &plan.events {
            let seq = event.seq.expect("engine events carry a seq");
            assert!(seq > self.last_seq_seen, "seq must be strictly monotonic");
            self.last_seq_seen = seq;
        }
        self.assert_invariants();
        Ok(plan)
    }

    fn cancel(&mut self, order_id: Uuid) {
        let row = self.orders.get_mut(&order_id).expect("order row");
        assert!(!row.status.is_terminal(), "cancel of a terminal order");
        row.status = OrderStatus::Canceled;
        row.remaining_qty = 0;
        row.locked_cents = 0;
        let user = row.user_id;
        self.last_seq_seen = self.seq.next();
        self.book.remove(&order_id);
        self.recalc_locked(user);
        self.assert_invariants();
    }

    fn resolve(&mut self, outcome: Outcome, admin: Uuid) -> SettlementSummary {
        let open_orders = self.book.entries_in_seq_order();
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .map(|(user_id, state)| Position {
                market_id: self.market_id,
                user_id: *user_id,
                yes_shares: state.yes_shares,
                avg_cost_cents: state.avg_cost_cents,
                locked_cents: state.locked_cents,
                realized_pnl_cents: state.realized_pnl_cents,
            })
            .collect();
        positions.sort_by_key(|p| p.user_id);

        let plan = plan_settlement(
            self.market_id,
            outcome,
            admin,
            &open_orders,
            &positions,
            &mut self.seq,
        );
        for canceled in &plan.canceled_orders {
            let row = self.orders.get_mut(&canceled.order_id).expect("order row");
            row.status = OrderStatus::Canceled;
            row.remaining_qty = 0;
            row.locked_cents = 0;
        }
        for write in &plan.positions {
            self.positions.insert(write.user_id, write.state);
        }
        for delta in &plan.balance_deltas {
            *self.balances.entry(delta.user_id).or_default() += delta.delta_cents;
        }
        for affected in &plan.affected_users {
            self.recalc_locked(*affected);
        }
        self.book = OrderBook::new();
        self.assert_invariants();
        plan.summary
    }

    /// Mirrors the store's authoritative per-user lock recalculation.
    fn recalc_locked(&mut self, user: Uuid) {
        let order_lock: i64 = self
            .orders
            .values()
            .filter(|o| {
                o.user_id == user
                    && matches!(o.status, OrderStatus::Open | OrderStatus::Partial)
            })
            .map(|o| o.locked_cents)
            .sum();
        let position_lock = self
            .positions
            .get(&user)
            .map(|p| p.locked_cents)
            .unwrap_or(0);
        self.locked.insert(user, order_lock + position_lock);
    }

    fn assert_invariants(&self) {
        for (user, balance) in &self.balances {
            let locked = self.locked.get(user).copied().unwrap_or(0);
            assert!(
                locked >= 0 && *balance >= locked,
                "solvency violated for {user}: balance {balance}, locked {locked}"
            );
        }
        let total: i64 = self.balances.values().sum();
        assert_eq!(
            total + self.fees,
            self.deposited,
            "cash is not conserved"
        );
        for (id, row) in &self.orders {
            match row.status {
                OrderStatus::Open | OrderStatus::Partial => {
                    let entry = self.book.entry(id).expect("open order missing from book");
                    assert_eq!(entry.remaining_qty, row.remaining_qty);
                    assert!(row.remaining_qty > 0);
                }
                _ => {
                    assert!(self.book.entry(id).is_none(), "terminal order in book");
                    assert_eq!(row.remaining_qty, 0);
                    assert_eq!(row.locked_cents, 0);
                }
            }
        }
    }
}

#[test]
fn price_priority_sweeps_best_levels_first() {
    let mut sim = Sim::new();
    let maker = uid(1);
    let taker = uid(2);
    sim.fund(maker, 10_000);
    sim.fund(taker, 10_000);

    sim.place(maker, sell_limit(55, 10));
    sim.place(maker, sell_limit(58, 5));
    sim.place(maker, sell_limit(60, 20));

    let plan = sim.place(taker, buy_limit(60, 18));
    assert_eq!(plan.order.status, OrderStatus::Filled);

    let fills: Vec<(i64, i64, i64)> = plan
        .result
        .fills
        .iter()
        .map(|f| (f.price_cents, f.qty, f.fee_cents))
        .collect();
    assert_eq!(fills, vec![(55, 10, 5), (58, 5, 2), (60, 3, 1)]);
    assert_eq!(plan.platform_fee_cents, 8);

    // prices and maker seqs are non-decreasing
    let mut last = (0, 0);
    for f in &plan.result.fills {
        assert!((f.price_cents, f.seq) >= last);
        last = (f.price_cents, f.seq);
    }

    // the 60-level ask keeps its unfilled remainder
    assert_eq!(sim.book.best_ask(), Some(60));
    assert_eq!(
        sim.book.snapshot(5).asks,
        vec![BookLevel {
            price_cents: 60,
            qty: 17
        }]
    );
}

#[test]
fn fifo_within_a_price_level() {
    let mut sim = Sim::new();
    let maker_a = uid(1);
    let maker_b = uid(2);
    let taker = uid(3);
    sim.fund(maker_a, 2_000);
    sim.fund(maker_b, 2_000);
    sim.fund(taker, 2_000);

    let first = sim.place(maker_a, sell_limit(55, 5));
    let second = sim.place(maker_b, sell_limit(55, 5));

    let plan = sim.place(taker, buy_limit(55, 7));
    assert_eq!(plan.result.fills.len(), 2);
    assert_eq!(
        plan.result.fills[0].maker_order_id,
        first.order.id,
        "earlier arrival fills first"
    );
    assert_eq!(plan.result.fills[0].qty, 5);
    assert_eq!(plan.result.fills[1].maker_order_id, second.order.id);
    assert_eq!(plan.result.fills[1].qty, 2);

    assert_eq!(sim.orders[&first.order.id].status, OrderStatus::Filled);
    assert_eq!(sim.orders[&second.order.id].status, OrderStatus::Partial);
    assert_eq!(sim.orders[&second.order.id].remaining_qty, 3);
}

#[test]
fn resting_bid_locks_price_plus_fee_estimate() {
    let mut sim = Sim::new();
    let user = uid(1);
    sim.fund(user, 1_000);

    let plan = sim.place(user, buy_limit(50, 10));
    assert_eq!(plan.order.status, OrderStatus::Open);
    assert_eq!(plan.required_lock_cents, 505);
    assert_eq!(sim.locked[&user], 505);
    assert_eq!(sim.available(user), 495);
    assert_eq!(
        sim.book.snapshot(5).bids,
        vec![BookLevel {
            price_cents: 50,
            qty: 10
        }]
    );
}

#[test]
fn market_order_on_empty_book_cancels_without_touching_wallet() {
    let mut sim = Sim::new();
    let user = uid(1);
    sim.fund(user, 1_000);

    let plan = sim.place(user, buy_market(5));
    assert_eq!(plan.order.status, OrderStatus::Canceled);
    assert!(plan.result.fills.is_empty());
    assert_eq!(sim.balances[&user], 1_000);
    assert_eq!(sim.locked.get(&user).copied().unwrap_or(0), 0);
}

#[test]
fn underfunded_market_order_rejects_before_the_cancel_is_recorded() {
    let mut sim = Sim::new();
    let user = uid(1);
    sim.fund(user, 100);

    // empty book, but the worst-case lock (99*5 plus fee estimate) gates first
    let (required, available) = sim.try_place(user, buy_market(5)).unwrap_err();
    assert_eq!(required, 500);
    assert_eq!(available, 100);

    assert_eq!(sim.balances[&user], 100);
    assert!(sim.orders.is_empty());
    assert!(sim.book.is_empty());
    // rollback leaves no seq gap
    assert_eq!(sim.seq.current(), 0);
}

#[test]
fn own_resting_orders_are_never_matched() {
    let mut sim = Sim::new();
    let user = uid(1);
    sim.fund(user, 5_000);

    sim.place(user, sell_limit(55, 10));
    let plan = sim.place(user, buy_limit(60, 10));

    assert_eq!(plan.order.status, OrderStatus::Open);
    assert!(plan.result.fills.is_empty());
    // both orders rest, the book is crossed only against the same user
    assert_eq!(sim.book.best_bid(), Some(60));
    assert_eq!(sim.book.best_ask(), Some(55));
}

#[test]
fn settlement_pays_longs_and_debits_shorts() {
    let mut sim = Sim::new();
    let alice = uid(1);
    let bob = uid(2);
    let carol = uid(3);
    let dave = uid(4);
    for user in [alice, bob, carol, dave] {
        sim.fund(user, 5_000);
    }

    // Alice long 10 @ 40 (Carol takes the short side)
    sim.place(alice, buy_limit(40, 10));
    sim.place(carol, sell_limit(40, 10));
    // Bob short 10 @ 70 (Dave takes the long side)
    sim.place(dave, buy_limit(70, 10));
    sim.place(bob, sell_limit(70, 10));

    assert_eq!(sim.positions[&alice].yes_shares, 10);
    assert_eq!(sim.positions[&alice].avg_cost_cents, 40);
    assert_eq!(sim.positions[&bob].yes_shares, -10);
    assert_eq!(sim.positions[&bob].locked_cents, 300);

    let balances_before: HashMap<Uuid, i64> = sim.balances.clone();
    let summary = sim.resolve(Outcome::Yes, uid(99));

    assert_eq!(summary.settled_positions, 4);
    assert_eq!(summary.total_payout_cents, 2_000);
    assert_eq!(sim.balances[&alice] - balances_before[&alice], 1_000);
    assert_eq!(sim.balances[&bob] - balances_before[&bob], -1_000);
    assert_eq!(sim.positions[&alice].realized_pnl_cents, 600);
    assert_eq!(sim.positions[&bob].realized_pnl_cents, -300);
    for user in [alice, bob, carol, dave] {
        assert_eq!(sim.positions[&user].locked_cents, 0);
        assert_eq!(sim.locked[&user], 0);
    }
}

#[test]
fn settlement_on_no_releases_short_collateral_only() {
    let mut sim = Sim::new();
    let seller = uid(1);
    let buyer = uid(2);
    sim.fund(seller, 5_000);
    sim.fund(buyer, 5_000);

    sim.place(buyer, buy_limit(70, 10));
    sim.place(seller, sell_limit(70, 10));

    let balances_before = sim.balances.clone();
    let summary = sim.resolve(Outcome::No, uid(99));

    assert_eq!(summary.total_payout_cents, 0);
    assert_eq!(sim.balances[&seller], balances_before[&seller]);
    assert_eq!(sim.balances[&buyer], balances_before[&buyer]);
    // the seller keeps the 700 sale proceeds: 300 of collateral released
    assert_eq!(sim.positions[&seller].realized_pnl_cents, 700);
    assert_eq!(sim.positions[&buyer].realized_pnl_cents, -700);
    assert_eq!(sim.locked[&seller], 0);
}

#[test]
fn settlement_cancels_resting_orders_first() {
    let mut sim = Sim::new();
    let user = uid(1);
    sim.fund(user, 2_000);

    let plan = sim.place(user, buy_limit(50, 10));
    assert_eq!(sim.locked[&user], 505);

    let summary = sim.resolve(Outcome::No, uid(99));
    assert_eq!(summary.settled_positions, 0);
    assert_eq!(sim.orders[&plan.order.id].status, OrderStatus::Canceled);
    assert_eq!(sim.locked[&user], 0);
    assert_eq!(sim.balances[&user], 2_000);
}

#[test]
fn cancel_releases_the_resting_lock() {
    let mut sim = Sim::new();
    let user = uid(1);
    sim.fund(user, 1_000);

    let plan = sim.place(user, buy_limit(50, 10));
    assert_eq!(sim.locked[&user], 505);

    sim.cancel(plan.order.id);
    assert_eq!(sim.locked[&user], 0);
    assert_eq!(sim.available(user), 1_000);
    assert!(sim.book.is_empty());
}

#[test]
fn rebuild_restores_levels_fifo_and_remainders() {
    let mut sim = Sim::new();
    let alice = uid(1);
    let bob = uid(2);
    let carol = uid(3);
    for user in [alice, bob, carol] {
        sim.fund(user, 20_000);
    }

    sim.place(alice, sell_limit(55, 10));
    sim.place(bob, sell_limit(55, 8));
    sim.place(carol, sell_limit(60, 4));
    sim.place(alice, buy_limit(30, 6));
    // partial fill leaves bob's order with a remainder
    sim.place(carol, buy_limit(55, 12));
    let canceled = sim.place(bob, buy_limit(20, 3));
    sim.cancel(canceled.order.id);

    // restart: load OPEN/PARTIAL rows by seq into a fresh book
    let mut rows: Vec<&OrderRowPlan> = sim
        .orders
        .values()
        .filter(|o| matches!(o.status, OrderStatus::Open | OrderStatus::Partial))
        .collect();
    rows.sort_by_key(|o| o.seq);

    let mut rebuilt = OrderBook::new();
    for row in rows {
        let price_cents = row.price_cents.expect("resting orders have a price");
        rebuilt
            .add(crate::book::BookEntry {
                order_id: row.id,
                user_id: row.user_id,
                side: row.side,
                price_cents,
                remaining_qty: row.remaining_qty,
                locked_cents: row.locked_cents,
                seq: row.seq,
            })
            .expect("rebuild add");
    }

    assert_eq!(
        rebuilt.entries_in_seq_order(),
        sim.book.entries_in_seq_order()
    );
    assert_eq!(rebuilt.snapshot(10), sim.book.snapshot(10));
}

#[test]
fn single_share_orders_match_at_every_price() {
    for price in 1..=99 {
        let mut sim = Sim::new();
        let maker = uid(1);
        let taker = uid(2);
        sim.fund(maker, 200);
        sim.fund(taker, 200);

        sim.place(maker, sell_limit(price, 1));
        let plan = sim.place(taker, buy_limit(price, 1));
        assert_eq!(plan.order.status, OrderStatus::Filled, "price {price}");
        assert_eq!(plan.result.fills[0].price_cents, price);
        assert_eq!(plan.result.fills[0].fee_cents, price / 100);
    }
}

#[test]
fn short_cover_round_trip_keeps_books_clean() {
    let mut sim = Sim::new();
    let shorter = uid(1);
    let other = uid(2);
    sim.fund(shorter, 10_000);
    sim.fund(other, 10_000);

    // open a short at 60, cover it at 45
    sim.place(other, buy_limit(60, 10));
    sim.place(shorter, sell_limit(60, 10));
    assert_eq!(sim.positions[&shorter].locked_cents, 400);

    sim.place(other, sell_limit(45, 10));
    sim.place(shorter, buy_limit(45, 10));

    assert_eq!(sim.positions[&shorter].yes_shares, 0);
    assert_eq!(sim.positions[&shorter].locked_cents, 0);
    assert_eq!(sim.positions[&shorter].realized_pnl_cents, 150);
    assert_eq!(sim.locked[&shorter], 0);
}
