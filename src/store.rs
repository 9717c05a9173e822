//! Durable store.
//!
//! A thin Postgres layer: storage rows are the source of truth, the engine
//! plans effects in memory and this module applies them in single
//! transactions. Wallet rows are mutated under `FOR UPDATE` row locks and
//! every wallet touched by a command gets its lock recomputed
//! authoritatively (sum of open-order locks plus position locks) before any
//! balance debit, so the `balance >= locked` CHECK holds at every statement.
//! Each applier ends with a solvency re-read of every wallet it touched.

use crate::ledger::PositionState;
use crate::model::{
    DepositEvent, Event, EventLogEntry, EventRow, Market, MarketCreatedEvent, MarketStatus, Order,
    OrderCanceledEvent, OrderStatus, OrderType, Outcome, Position, Role, Side, Trade, User,
    Wallet, CancelReason,
};
use crate::plan::{PlacePlan, SettlementPlan};
use log::error;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("db: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migrate: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("wallet not found for user {0}")]
    WalletNotFound(Uuid),
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientFunds { required: i64, available: i64 },
    #[error("duplicate client order id")]
    DuplicateClientOrderId,
    #[error("market is not open")]
    MarketNotOpen,
    #[error("tick size must be 1..=10, got {0}")]
    InvalidTickSize(i64),
    #[error("wallet invariant violated for {user_id}: balance {balance_cents}, locked {locked_cents}")]
    InvariantViolation {
        user_id: Uuid,
        balance_cents: i64,
        locked_cents: i64,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ── Users & wallets ──────────────────────────────

    pub async fn create_user(&self, email: &str, role: Role) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO users (email, role) VALUES ($1, $2)
             RETURNING id, email, role, created_at",
        )
        .bind(email)
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let user = map_user(&row)?;
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1)")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn get_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, balance_cents, locked_cents FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_wallet).transpose()
    }

    /// Credits a wallet and appends the `Deposit` audit entry in one
    /// transaction.
    pub async fn deposit(&self, user_id: Uuid, amount_cents: i64) -> Result<Wallet, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE wallets SET balance_cents = balance_cents + $1
             WHERE user_id = $2
             RETURNING user_id, balance_cents, locked_cents",
        )
        .bind(amount_cents)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::WalletNotFound(user_id))?;
        append_event(
            &mut tx,
            &EventRow {
                market_id: None,
                seq: None,
                event: Event::Deposit(DepositEvent {
                    user_id,
                    amount_cents,
                }),
            },
        )
        .await?;
        tx.commit().await?;
        map_wallet(&row)
    }

    pub async fn platform_fees(&self) -> Result<i64, StoreError> {
        let cents = sqlx::query_scalar::<_, i64>(
            "SELECT balance_cents FROM platform_fee_wallet WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(cents)
    }

    // ── Markets ──────────────────────────────────────

    pub async fn create_market(
        &self,
        slug: &str,
        title: &str,
        description: &str,
        tick_size_cents: i64,
    ) -> Result<Market, StoreError> {
        if !(1..=10).contains(&tick_size_cents) {
            return Err(StoreError::InvalidTickSize(tick_size_cents));
        }
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO markets (slug, title, description, tick_size_cents)
             VALUES ($1, $2, $3, $4)
             RETURNING id, slug, title, description, status, resolves_to,
                       tick_size_cents, created_at, resolved_at",
        )
        .bind(slug)
        .bind(title)
        .bind(description)
        .bind(tick_size_cents)
        .fetch_one(&mut *tx)
        .await?;
        let market = map_market(&row)?;
        append_event(
            &mut tx,
            &EventRow {
                market_id: Some(market.id),
                seq: None,
                event: Event::MarketCreated(MarketCreatedEvent {
                    market_id: market.id,
                    slug: market.slug.clone(),
                    tick_size_cents,
                }),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(market)
    }

    pub async fn get_market(&self, id: Uuid) -> Result<Option<Market>, StoreError> {
        let row = sqlx::query(
            "SELECT id, slug, title, description, status, resolves_to,
                    tick_size_cents, created_at, resolved_at
             FROM markets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_market).transpose()
    }

    pub async fn list_open_markets(&self) -> Result<Vec<Market>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, slug, title, description, status, resolves_to,
                    tick_size_cents, created_at, resolved_at
             FROM markets WHERE status = 'OPEN' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_market).collect()
    }

    // ── Orders, trades, positions ────────────────────

    pub async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("{ORDER_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_order).transpose()
    }

    /// Durably OPEN/PARTIAL orders for a market in seq order, i.e. exactly
    /// the rebuild input for the in-memory book.
    pub async fn load_open_orders(&self, market_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "{ORDER_COLUMNS} WHERE market_id = $1 AND status IN ('OPEN','PARTIAL') ORDER BY seq"
        ))
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_order).collect()
    }

    pub async fn list_user_orders(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "{ORDER_COLUMNS} WHERE market_id = $1 AND user_id = $2
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(market_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_order).collect()
    }

    pub async fn client_order_id_exists(
        &self,
        user_id: Uuid,
        client_order_id: &str,
    ) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM orders WHERE user_id = $1 AND client_order_id = $2)",
        )
        .bind(user_id)
        .bind(client_order_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Highest seq this market has ever issued, across orders, trades and
    /// the event log. Cold-start value for the engine's counter.
    pub async fn max_seq(&self, market_id: Uuid) -> Result<i64, StoreError> {
        let seq = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(seq), 0) FROM (
                 SELECT seq FROM orders WHERE market_id = $1
                 UNION ALL SELECT seq FROM trades WHERE market_id = $1
                 UNION ALL SELECT seq FROM event_log WHERE market_id = $1 AND seq IS NOT NULL
             ) seqs",
        )
        .bind(market_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }

    pub async fn list_trades(&self, market_id: Uuid, limit: i64) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, market_id, maker_order_id, taker_order_id, maker_user_id,
                    taker_user_id, price_cents, qty, fee_cents, seq, created_at
             FROM trades WHERE market_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(market_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_trade).collect()
    }

    pub async fn list_positions(&self, market_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(
            "SELECT market_id, user_id, yes_shares, avg_cost_cents, locked_cents,
                    realized_pnl_cents
             FROM positions WHERE market_id = $1 ORDER BY user_id",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_position).collect()
    }

    /// Accounting state for a set of users in one market; absent rows mean
    /// a flat position.
    pub async fn positions_for_users(
        &self,
        market_id: Uuid,
        users: &[Uuid],
    ) -> Result<HashMap<Uuid, PositionState>, StoreError> {
        let rows = sqlx::query(
            "SELECT market_id, user_id, yes_shares, avg_cost_cents, locked_cents,
                    realized_pnl_cents
             FROM positions WHERE market_id = $1 AND user_id = ANY($2)",
        )
        .bind(market_id)
        .bind(users)
        .fetch_all(&self.pool)
        .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let pos = map_position(row)?;
            out.insert(
                pos.user_id,
                PositionState {
                    yes_shares: pos.yes_shares,
                    avg_cost_cents: pos.avg_cost_cents,
                    locked_cents: pos.locked_cents,
                    realized_pnl_cents: pos.realized_pnl_cents,
                },
            );
        }
        Ok(out)
    }

    pub async fn list_events(
        &self,
        market_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        let rows = match market_id {
            Some(market_id) => {
                sqlx::query(
                    "SELECT id, market_id, seq, type, payload_json, created_at
                     FROM event_log WHERE market_id = $1 ORDER BY id DESC LIMIT $2",
                )
                .bind(market_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, market_id, seq, type, payload_json, created_at
                     FROM event_log ORDER BY id DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(map_event).collect()
    }

    // ── Plan appliers ────────────────────────────────

    /// Applies a place plan in one transaction. The taker wallet is re-read
    /// under row lock and the required lock verified against its available
    /// balance; any failure rolls the whole command back.
    pub async fn apply_place(&self, plan: &PlacePlan) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row locks are taken in user-id order across every wallet the fill
        // touches, so concurrent fills cannot deadlock.
        let mut taker_available = None;
        for user_id in &plan.affected_users {
            let row = sqlx::query(
                "SELECT balance_cents, locked_cents FROM wallets WHERE user_id = $1 FOR UPDATE",
            )
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::WalletNotFound(*user_id))?;
            if *user_id == plan.order.user_id {
                let balance: i64 = row.try_get("balance_cents")?;
                let locked: i64 = row.try_get("locked_cents")?;
                taker_available = Some(balance - locked);
            }
        }
        let available =
            taker_available.ok_or(StoreError::WalletNotFound(plan.order.user_id))?;
        if available < plan.required_lock_cents {
            return Err(StoreError::InsufficientFunds {
                required: plan.required_lock_cents,
                available,
            });
        }

        let order = &plan.order;
        let inserted = sqlx::query(
            "INSERT INTO orders (id, market_id, user_id, side, order_type, price_cents,
                                 qty, remaining_qty, locked_cents, status, seq, client_order_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(order.id)
        .bind(order.market_id)
        .bind(order.user_id)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.price_cents)
        .bind(order.qty)
        .bind(order.remaining_qty)
        .bind(order.locked_cents)
        .bind(order.status.as_str())
        .bind(order.seq)
        .bind(order.client_order_id.as_deref())
        .execute(&mut *tx)
        .await;
        if let Err(err) = inserted {
            if is_unique_violation(&err, "orders_user_id_client_order_id_key") {
                return Err(StoreError::DuplicateClientOrderId);
            }
            return Err(err.into());
        }

        for maker in &plan.maker_updates {
            sqlx::query(
                "UPDATE orders SET remaining_qty = $1, locked_cents = $2, status = $3,
                                   updated_at = now()
                 WHERE id = $4",
            )
            .bind(maker.remaining_qty)
            .bind(maker.locked_cents)
            .bind(maker.status.as_str())
            .bind(maker.order_id)
            .execute(&mut *tx)
            .await?;
        }

        for write in &plan.positions {
            upsert_position(&mut tx, plan.market_id, write.user_id, &write.state).await?;
        }

        // Locks shrink or are funded before any balance debit lands, so the
        // wallet CHECK holds statement by statement.
        for user_id in &plan.affected_users {
            recalc_locked(&mut tx, *user_id).await?;
        }
        for delta in &plan.balance_deltas {
            sqlx::query("UPDATE wallets SET balance_cents = balance_cents + $1 WHERE user_id = $2")
                .bind(delta.delta_cents)
                .bind(delta.user_id)
                .execute(&mut *tx)
                .await?;
        }
        if plan.platform_fee_cents > 0 {
            sqlx::query(
                "UPDATE platform_fee_wallet SET balance_cents = balance_cents + $1 WHERE id = 1",
            )
            .bind(plan.platform_fee_cents)
            .execute(&mut *tx)
            .await?;
        }

        for trade in &plan.trades {
            sqlx::query(
                "INSERT INTO trades (id, market_id, maker_order_id, taker_order_id,
                                     maker_user_id, taker_user_id, price_cents, qty,
                                     fee_cents, seq)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(trade.id)
            .bind(plan.market_id)
            .bind(trade.maker_order_id)
            .bind(order.id)
            .bind(trade.maker_user_id)
            .bind(order.user_id)
            .bind(trade.price_cents)
            .bind(trade.qty)
            .bind(trade.fee_cents)
            .bind(trade.seq)
            .execute(&mut *tx)
            .await?;
        }

        for event in &plan.events {
            append_event(&mut tx, event).await?;
        }

        for user_id in &plan.affected_users {
            check_wallet_solvency(&mut tx, *user_id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Cancels one OPEN/PARTIAL order: terminal row state, authoritative
    /// lock release, audit entry.
    pub async fn apply_cancel(
        &self,
        order: &Order,
        reason: CancelReason,
        event_seq: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE orders SET status = 'CANCELED', remaining_qty = 0, locked_cents = 0,
                               updated_at = now()
             WHERE id = $1",
        )
        .bind(order.id)
        .execute(&mut *tx)
        .await?;
        recalc_locked(&mut tx, order.user_id).await?;
        append_event(
            &mut tx,
            &EventRow {
                market_id: Some(order.market_id),
                seq: Some(event_seq),
                event: Event::OrderCanceled(OrderCanceledEvent {
                    order_id: order.id,
                    user_id: order.user_id,
                    reason,
                }),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Applies a settlement plan all-or-nothing: no partial resolution is
    /// ever visible to readers.
    pub async fn apply_settlement(&self, plan: &SettlementPlan) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM markets WHERE id = $1 FOR UPDATE",
        )
        .bind(plan.market_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::MarketNotOpen)?;
        if MarketStatus::parse(&status) != Some(MarketStatus::Open) {
            return Err(StoreError::MarketNotOpen);
        }

        for canceled in &plan.canceled_orders {
            sqlx::query(
                "UPDATE orders SET status = 'CANCELED', remaining_qty = 0, locked_cents = 0,
                                   updated_at = now()
                 WHERE id = $1",
            )
            .bind(canceled.order_id)
            .execute(&mut *tx)
            .await?;
        }
        for write in &plan.positions {
            upsert_position(&mut tx, plan.market_id, write.user_id, &write.state).await?;
        }
        for user_id in &plan.affected_users {
            recalc_locked(&mut tx, *user_id).await?;
        }
        for delta in &plan.balance_deltas {
            sqlx::query("UPDATE wallets SET balance_cents = balance_cents + $1 WHERE user_id = $2")
                .bind(delta.delta_cents)
                .bind(delta.user_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "UPDATE markets SET status = 'RESOLVED', resolves_to = $1, resolved_at = now()
             WHERE id = $2",
        )
        .bind(plan.resolves_to.as_str())
        .bind(plan.market_id)
        .execute(&mut *tx)
        .await?;

        for event in &plan.events {
            append_event(&mut tx, event).await?;
        }

        for user_id in &plan.affected_users {
            check_wallet_solvency(&mut tx, *user_id).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

const ORDER_COLUMNS: &str = "SELECT id, market_id, user_id, side, order_type, price_cents, qty,
            remaining_qty, locked_cents, status, seq, client_order_id, created_at, updated_at
     FROM orders";

async fn upsert_position(
    tx: &mut Transaction<'_, Postgres>,
    market_id: Uuid,
    user_id: Uuid,
    state: &PositionState,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO positions (market_id, user_id, yes_shares, avg_cost_cents,
                                locked_cents, realized_pnl_cents)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (market_id, user_id) DO UPDATE SET
             yes_shares = EXCLUDED.yes_shares,
             avg_cost_cents = EXCLUDED.avg_cost_cents,
             locked_cents = EXCLUDED.locked_cents,
             realized_pnl_cents = EXCLUDED.realized_pnl_cents",
    )
    .bind(market_id)
    .bind(user_id)
    .bind(state.yes_shares)
    .bind(state.avg_cost_cents)
    .bind(state.locked_cents)
    .bind(state.realized_pnl_cents)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Rewrites a wallet's lock to exactly the sum of its open-order locks and
/// position locks. This is the single authoritative source for wallet lock.
async fn recalc_locked(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE wallets SET locked_cents =
             (SELECT COALESCE(SUM(locked_cents), 0) FROM orders
              WHERE user_id = $1 AND status IN ('OPEN','PARTIAL'))
           + (SELECT COALESCE(SUM(locked_cents), 0) FROM positions WHERE user_id = $1)
         WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Re-reads a wallet after all mutations in a transaction and aborts with a
/// typed, logged error if the recomputed lock disagrees with solvency. The
/// schema CHECK is the hard floor; this surfaces the violation to operators
/// instead of a bare constraint failure.
async fn check_wallet_solvency(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT balance_cents, locked_cents FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
    let balance_cents: i64 = row.try_get("balance_cents")?;
    let locked_cents: i64 = row.try_get("locked_cents")?;
    if balance_cents < locked_cents || locked_cents < 0 {
        error!(
            "[store] wallet invariant violated for {user_id}: balance {balance_cents}, locked {locked_cents}"
        );
        return Err(StoreError::InvariantViolation {
            user_id,
            balance_cents,
            locked_cents,
        });
    }
    Ok(())
}

async fn append_event(
    tx: &mut Transaction<'_, Postgres>,
    row: &EventRow,
) -> Result<(), StoreError> {
    let payload = row.event.payload_json()?;
    sqlx::query("INSERT INTO event_log (market_id, seq, type, payload_json) VALUES ($1, $2, $3, $4)")
        .bind(row.market_id)
        .bind(row.seq)
        .bind(row.event.kind())
        .bind(payload)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(constraint),
        _ => false,
    }
}

// ── Row mapping ──────────────────────────────────────

fn map_user(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        role: parse_enum(row, "role", Role::parse)?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_wallet(row: &PgRow) -> Result<Wallet, StoreError> {
    Ok(Wallet {
        user_id: row.try_get("user_id")?,
        balance_cents: row.try_get("balance_cents")?,
        locked_cents: row.try_get("locked_cents")?,
    })
}

fn map_market(row: &PgRow) -> Result<Market, StoreError> {
    let resolves_to: Option<String> = row.try_get("resolves_to")?;
    let resolves_to = resolves_to
        .map(|raw| {
            Outcome::parse(&raw).ok_or_else(|| StoreError::Corrupt(format!("outcome '{raw}'")))
        })
        .transpose()?;
    Ok(Market {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: parse_enum(row, "status", MarketStatus::parse)?,
        resolves_to,
        tick_size_cents: row.try_get("tick_size_cents")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn map_order(row: &PgRow) -> Result<Order, StoreError> {
    Ok(Order {
        id: row.try_get("id")?,
        market_id: row.try_get("market_id")?,
        user_id: row.try_get("user_id")?,
        side: parse_enum(row, "side", Side::parse)?,
        order_type: parse_enum(row, "order_type", OrderType::parse)?,
        price_cents: row.try_get("price_cents")?,
        qty: row.try_get("qty")?,
        remaining_qty: row.try_get("remaining_qty")?,
        locked_cents: row.try_get("locked_cents")?,
        status: parse_enum(row, "status", OrderStatus::parse)?,
        seq: row.try_get("seq")?,
        client_order_id: row.try_get("client_order_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_trade(row: &PgRow) -> Result<Trade, StoreError> {
    Ok(Trade {
        id: row.try_get("id")?,
        market_id: row.try_get("market_id")?,
        maker_order_id: row.try_get("maker_order_id")?,
        taker_order_id: row.try_get("taker_order_id")?,
        maker_user_id: row.try_get("maker_user_id")?,
        taker_user_id: row.try_get("taker_user_id")?,
        price_cents: row.try_get("price_cents")?,
        qty: row.try_get("qty")?,
        fee_cents: row.try_get("fee_cents")?,
        seq: row.try_get("seq")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_position(row: &PgRow) -> Result<Position, StoreError> {
    Ok(Position {
        market_id: row.try_get("market_id")?,
        user_id: row.try_get("user_id")?,
        yes_shares: row.try_get("yes_shares")?,
        avg_cost_cents: row.try_get("avg_cost_cents")?,
        locked_cents: row.try_get("locked_cents")?,
        realized_pnl_cents: row.try_get("realized_pnl_cents")?,
    })
}

fn map_event(row: &PgRow) -> Result<EventLogEntry, StoreError> {
    Ok(EventLogEntry {
        id: row.try_get("id")?,
        market_id: row.try_get("market_id")?,
        seq: row.try_get("seq")?,
        event_type: row.try_get("type")?,
        payload: row.try_get("payload_json")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_enum<T>(
    row: &PgRow,
    column: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    parse(&raw).ok_or_else(|| StoreError::Corrupt(format!("{column} '{raw}'")))
}
