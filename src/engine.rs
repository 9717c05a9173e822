//! Per-market single-writer engine.
//!
//! One engine task owns its market's book and seq counter and drains a
//! bounded command mailbox, so commands for one market are totally ordered
//! by arrival while markets proceed in parallel. Planning peeks the book
//! without mutating it; the book is only touched after the store commits.

use crate::book::{BookEntry, BookSnapshot, OrderBook};
use crate::model::{
    CancelAck, CancelReason, Market, Order, OrderStatus, OrderType, Outcome, PlaceOrderRequest,
    PlaceOrderResult, SettlementSummary,
};
use crate::notify::{Notification, Publisher};
use crate::plan::{plan_place, plan_settlement, validate_request, Sequencer};
use crate::store::{Store, StoreError};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

pub const MAILBOX_CAPACITY: usize = 64;
pub const SNAPSHOT_DEPTH: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("market not found")]
    MarketNotFound,
    #[error("market is not open")]
    MarketNotOpen,
    #[error("order not found")]
    OrderNotFound,
    #[error("order belongs to another user")]
    Forbidden,
    #[error("engine mailbox full")]
    Busy,
    #[error("command deadline expired")]
    Timeout,
    #[error("engine stopped before replying")]
    Stopped,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub(crate) enum Command {
    Place {
        user_id: Uuid,
        req: PlaceOrderRequest,
        deadline: Option<Instant>,
        reply: oneshot::Sender<Result<PlaceOrderResult, EngineError>>,
    },
    Cancel {
        order_id: Uuid,
        user_id: Uuid,
        admin_override: bool,
        deadline: Option<Instant>,
        reply: oneshot::Sender<Result<CancelAck, EngineError>>,
    },
    Resolve {
        resolves_to: Outcome,
        admin_user_id: Uuid,
        reply: oneshot::Sender<Result<SettlementSummary, EngineError>>,
    },
}

/// Client side of a market's mailbox. Cloneable; the watch receiver serves
/// book snapshots without serializing through the writer.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<BookSnapshot>,
}

impl EngineHandle {
    pub async fn place_order(
        &self,
        user_id: Uuid,
        req: PlaceOrderRequest,
        deadline: Option<Instant>,
    ) -> Result<PlaceOrderResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Place {
            user_id,
            req,
            deadline,
            reply: reply_tx,
        })?;
        reply_rx.await.map_err(|_| EngineError::Stopped)?
    }

    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        admin_override: bool,
        deadline: Option<Instant>,
    ) -> Result<CancelAck, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Cancel {
            order_id,
            user_id,
            admin_override,
            deadline,
            reply: reply_tx,
        })?;
        reply_rx.await.map_err(|_| EngineError::Stopped)?
    }

    pub async fn resolve_market(
        &self,
        resolves_to: Outcome,
        admin_user_id: Uuid,
    ) -> Result<SettlementSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Resolve {
            resolves_to,
            admin_user_id,
            reply: reply_tx,
        })?;
        reply_rx.await.map_err(|_| EngineError::Stopped)?
    }

    pub fn book_snapshot(&self, depth: usize) -> BookSnapshot {
        self.snapshot_rx.borrow().truncated(depth)
    }

    fn send(&self, cmd: Command) -> Result<(), EngineError> {
        // Bounded mailbox: a full queue is backpressure for the transport,
        // a closed one means the market was resolved.
        self.tx.try_send(cmd).map_err(|err| match err {
            TrySendError::Full(_) => EngineError::Busy,
            TrySendError::Closed(_) => EngineError::MarketNotOpen,
        })
    }
}

pub struct MarketEngine {
    market: Market,
    fee_bps: i64,
    book: OrderBook,
    seq: i64,
    store: Arc<Store>,
    publisher: Arc<dyn Publisher>,
    snapshot_tx: watch::Sender<BookSnapshot>,
}

impl MarketEngine {
    /// Rebuilds the in-memory book from durably OPEN/PARTIAL orders and
    /// restores the seq counter, then returns the engine plus the snapshot
    /// channel for readers.
    pub(crate) async fn bootstrap(
        market: Market,
        fee_bps: i64,
        store: Arc<Store>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<(Self, watch::Receiver<BookSnapshot>), EngineError> {
        let orders = store.load_open_orders(market.id).await?;
        let mut book = OrderBook::new();
        for order in &orders {
            let Some(price_cents) = order.price_cents else {
                warn!(
                    "[engine] market {}: open order {} has no price, skipping",
                    market.id, order.id
                );
                continue;
            };
            if let Err(err) = book.add(BookEntry {
                order_id: order.id,
                user_id: order.user_id,
                side: order.side,
                price_cents,
                remaining_qty: order.remaining_qty,
                locked_cents: order.locked_cents,
                seq: order.seq,
            }) {
                warn!("[engine] market {}: rebuild skip: {err}", market.id);
            }
        }
        let seq = store.max_seq(market.id).await?;
        info!(
            "[engine] market {}: loaded {} orders, seq={}",
            market.id,
            book.len(),
            seq
        );

        let (snapshot_tx, snapshot_rx) = watch::channel(book.snapshot(SNAPSHOT_DEPTH));
        Ok((
            Self {
                market,
                fee_bps,
                book,
                seq,
                store,
                publisher,
                snapshot_tx,
            },
            snapshot_rx,
        ))
    }

    /// Drains the mailbox until the channel closes or the market resolves.
    /// A failed command does not block subsequent commands.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Place {
                    user_id,
                    req,
                    deadline,
                    reply,
                } => {
                    if deadline_expired(deadline) {
                        let _ = reply.send(Err(EngineError::Timeout));
                        continue;
                    }
                    let _ = reply.send(self.place_order(user_id, &req).await);
                }
                Command::Cancel {
                    order_id,
                    user_id,
                    admin_override,
                    deadline,
                    reply,
                } => {
                    if deadline_expired(deadline) {
                        let _ = reply.send(Err(EngineError::Timeout));
                        continue;
                    }
                    let _ = reply.send(self.cancel_order(order_id, user_id, admin_override).await);
                }
                Command::Resolve {
                    resolves_to,
                    admin_user_id,
                    reply,
                } => {
                    let result = self.resolve_market(resolves_to, admin_user_id).await;
                    let resolved = result.is_ok();
                    let _ = reply.send(result);
                    if resolved {
                        break;
                    }
                }
            }
        }
    }

    async fn place_order(
        &mut self,
        user_id: Uuid,
        req: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResult, EngineError> {
        if let Err(err) = validate_request(self.market.tick_size_cents, req) {
            return Ok(PlaceOrderResult::rejected(err.to_string()));
        }
        if let Some(key) = &req.client_order_id {
            if self.store.client_order_id_exists(user_id, key).await? {
                return Ok(PlaceOrderResult::rejected("duplicate client_order_id"));
            }
        }

        let limit_price = match req.order_type {
            OrderType::Limit => req.price_cents,
            OrderType::Market => None,
        };
        let matches = self
            .book
            .find_matches(req.side, limit_price, req.qty, user_id);

        // Positions are pre-read outside the transaction; this task is the
        // only writer for the market, so they cannot move underneath us.
        let mut users: Vec<Uuid> = matches.iter().map(|m| m.entry.user_id).collect();
        users.push(user_id);
        users.sort();
        users.dedup();
        let positions = self
            .store
            .positions_for_users(self.market.id, &users)
            .await?;

        let mut seq = Sequencer::starting_after(self.seq);
        let plan = plan_place(
            self.market.id,
            self.fee_bps,
            user_id,
            req,
            &matches,
            &positions,
            &mut seq,
        );

        match self.store.apply_place(&plan).await {
            Ok(()) => {}
            Err(StoreError::WalletNotFound(_)) => {
                return Ok(PlaceOrderResult::rejected("wallet not found"));
            }
            Err(StoreError::InsufficientFunds {
                required,
                available,
            }) => {
                return Ok(PlaceOrderResult::rejected(format!(
                    "insufficient balance: need {required}, have {available}"
                )));
            }
            Err(StoreError::DuplicateClientOrderId) => {
                return Ok(PlaceOrderResult::rejected("duplicate client_order_id"));
            }
            Err(err) => {
                error!(
                    "[engine] market {}: place rolled back: {err}",
                    self.market.id
                );
                return Err(EngineError::Storage(err));
            }
        }
        self.seq = seq.current();

        for (order_id, qty) in &plan.book_fills {
            if let Err(err) = self.book.apply_fill(order_id, *qty) {
                error!(
                    "[engine] market {}: book out of sync applying fill: {err}",
                    self.market.id
                );
            }
        }
        if let Some(entry) = plan.resting.clone() {
            if let Err(err) = self.book.add(entry) {
                error!(
                    "[engine] market {}: book out of sync adding order: {err}",
                    self.market.id
                );
            }
        }

        self.publish_book();
        for trade in &plan.trades {
            self.publisher.publish(
                self.market.id,
                &Notification::Trade {
                    price_cents: trade.price_cents,
                    qty: trade.qty,
                    taker_side: req.side,
                },
            );
        }
        self.publisher.publish(
            self.market.id,
            &Notification::OrderUpdate {
                user_id,
                order_id: plan.order.id,
                status: plan.order.status,
                fills: plan.result.fills.clone(),
            },
        );

        Ok(plan.result)
    }

    async fn cancel_order(
        &mut self,
        order_id: Uuid,
        user_id: Uuid,
        admin_override: bool,
    ) -> Result<CancelAck, EngineError> {
        let order: Order = self
            .store
            .get_order(order_id)
            .await?
            .filter(|o| o.market_id == self.market.id)
            .ok_or(EngineError::OrderNotFound)?;
        if order.user_id != user_id && !admin_override {
            return Err(EngineError::Forbidden);
        }
        if order.status.is_terminal() {
            return Ok(CancelAck {
                already_terminal: true,
            });
        }

        let mut seq = Sequencer::starting_after(self.seq);
        let event_seq = seq.next();
        self.store
            .apply_cancel(&order, CancelReason::UserRequest, event_seq)
            .await?;
        self.seq = seq.current();

        self.book.remove(&order_id);
        self.publish_book();
        self.publisher.publish(
            self.market.id,
            &Notification::OrderUpdate {
                user_id: order.user_id,
                order_id,
                status: OrderStatus::Canceled,
                fills: Vec::new(),
            },
        );
        Ok(CancelAck {
            already_terminal: false,
        })
    }

    async fn resolve_market(
        &mut self,
        resolves_to: Outcome,
        admin_user_id: Uuid,
    ) -> Result<SettlementSummary, EngineError> {
        let open_orders = self.book.entries_in_seq_order();
        let positions = self.store.list_positions(self.market.id).await?;

        let mut seq = Sequencer::starting_after(self.seq);
        let plan = plan_settlement(
            self.market.id,
            resolves_to,
            admin_user_id,
            &open_orders,
            &positions,
            &mut seq,
        );
        match self.store.apply_settlement(&plan).await {
            Ok(()) => {}
            Err(StoreError::MarketNotOpen) => return Err(EngineError::MarketNotOpen),
            Err(err) => return Err(err.into()),
        }
        self.seq = seq.current();

        self.book = OrderBook::new();
        self.publish_book();
        self.publisher
            .publish(self.market.id, &Notification::MarketResolved { resolves_to });
        info!(
            "[engine] market {} resolved {}: {} positions, {} payout",
            self.market.id,
            resolves_to.as_str(),
            plan.summary.settled_positions,
            plan.summary.total_payout_cents
        );
        Ok(plan.summary)
    }

    fn publish_book(&self) {
        let snap = self.book.snapshot(SNAPSHOT_DEPTH);
        self.snapshot_tx.send_replace(snap.clone());
        self.publisher.publish(
            self.market.id,
            &Notification::BookSnapshot {
                bids: snap.bids,
                asks: snap.asks,
            },
        );
    }
}

pub(crate) fn spawn_engine(engine: MarketEngine, snapshot_rx: watch::Receiver<BookSnapshot>) -> EngineHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    tokio::spawn(engine.run(rx));
    EngineHandle { tx, snapshot_rx }
}

fn deadline_expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() > d)
}
