use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound of the price range; a YES share pays [`SHARE_VALUE_CENTS`]
/// on a YES resolution, so prices live in `1..=99`.
pub const MAX_PRICE_CENTS: i64 = 99;
pub const MIN_PRICE_CENTS: i64 = 1;
pub const SHARE_VALUE_CENTS: i64 = 100;
pub const MAX_ORDER_QTY: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn parse(value: &str) -> Option<Side> {
        match value {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }

    pub fn parse(value: &str) -> Option<OrderType> {
        match value {
            "LIMIT" => Some(OrderType::Limit),
            "MARKET" => Some(OrderType::Market),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<OrderStatus> {
        match value {
            "OPEN" => Some(OrderStatus::Open),
            "PARTIAL" => Some(OrderStatus::Partial),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" => Some(OrderStatus::Canceled),
            "REJECTED" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    /// Terminal orders hold no lock and never re-enter the book.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Open,
    Resolved,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "OPEN",
            MarketStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(value: &str) -> Option<MarketStatus> {
        match value {
            "OPEN" => Some(MarketStatus::Open),
            "RESOLVED" => Some(MarketStatus::Resolved),
            _ => None,
        }
    }
}

/// Resolution outcome of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }

    pub fn parse(value: &str) -> Option<Outcome> {
        match value {
            "YES" => Some(Outcome::Yes),
            "NO" => Some(Outcome::No),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequest,
    NoLiquidity,
    MarketSettlement,
}

// ── Entities ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance_cents: i64,
    pub locked_cents: i64,
}

impl Wallet {
    pub fn available_cents(&self) -> i64 {
        self.balance_cents - self.locked_cents
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub status: MarketStatus,
    pub resolves_to: Option<Outcome>,
    pub tick_size_cents: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub market_id: Uuid,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_user_id: Uuid,
    pub taker_user_id: Uuid,
    pub price_cents: i64,
    pub qty: i64,
    pub fee_cents: i64,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: Uuid,
    pub user_id: Uuid,
    pub yes_shares: i64,
    pub avg_cost_cents: i64,
    pub locked_cents: i64,
    pub realized_pnl_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub market_id: Option<Uuid>,
    pub seq: Option<i64>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ── Commands and replies ─────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub side: Side,
    pub order_type: OrderType,
    pub price_cents: Option<i64>,
    pub qty: i64,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub maker_order_id: Uuid,
    pub price_cents: i64,
    pub qty: i64,
    pub fee_cents: i64,
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderResult {
    pub order_id: Option<Uuid>,
    pub status: OrderStatus,
    pub fills: Vec<Fill>,
    pub reason: Option<String>,
}

impl PlaceOrderResult {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            order_id: None,
            status: OrderStatus::Rejected,
            fills: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub already_terminal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub settled_positions: i64,
    pub total_payout_cents: i64,
}

// ── Event taxonomy ───────────────────────────────────
//
// Closed set of audit-stream entries. Each variant carries a typed payload
// that serializes to the `payload_json` column; consumers decode by the
// `kind()` tag.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAcceptedEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub side: Side,
    pub order_type: OrderType,
    pub price_cents: Option<i64>,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilledEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeExecutedEvent {
    pub trade_id: Uuid,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub price_cents: i64,
    pub qty: i64,
    pub fee_cents: i64,
    pub taker_side: Side,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market_id: Uuid,
    pub slug: String,
    pub tick_size_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketResolvedEvent {
    pub resolves_to: Outcome,
    pub admin_user_id: Uuid,
    pub settled_positions: i64,
    pub total_payout_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPromotedEvent {
    pub market_id: Uuid,
    pub source_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSettledEvent {
    pub user_id: Uuid,
    pub yes_shares: i64,
    pub payout_cents: i64,
    pub lock_released_cents: i64,
    pub realized_pnl_delta_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub user_id: Uuid,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderAccepted(OrderAcceptedEvent),
    OrderCanceled(OrderCanceledEvent),
    OrderFilled(OrderFilledEvent),
    TradeExecuted(TradeExecutedEvent),
    MarketCreated(MarketCreatedEvent),
    MarketResolved(MarketResolvedEvent),
    MarketPromoted(MarketPromotedEvent),
    PositionSettled(PositionSettledEvent),
    Deposit(DepositEvent),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::OrderAccepted(_) => "OrderAccepted",
            Event::OrderCanceled(_) => "OrderCanceled",
            Event::OrderFilled(_) => "OrderFilled",
            Event::TradeExecuted(_) => "TradeExecuted",
            Event::MarketCreated(_) => "MarketCreated",
            Event::MarketResolved(_) => "MarketResolved",
            Event::MarketPromoted(_) => "MarketPromoted",
            Event::PositionSettled(_) => "PositionSettled",
            Event::Deposit(_) => "Deposit",
        }
    }

    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Event::OrderAccepted(e) => serde_json::to_value(e),
            Event::OrderCanceled(e) => serde_json::to_value(e),
            Event::OrderFilled(e) => serde_json::to_value(e),
            Event::TradeExecuted(e) => serde_json::to_value(e),
            Event::MarketCreated(e) => serde_json::to_value(e),
            Event::MarketResolved(e) => serde_json::to_value(e),
            Event::MarketPromoted(e) => serde_json::to_value(e),
            Event::PositionSettled(e) => serde_json::to_value(e),
            Event::Deposit(e) => serde_json::to_value(e),
        }
    }
}

/// An event row staged for the append-only log. `seq` is None for entries
/// outside any per-market sequence (deposits, market creation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub market_id: Option<Uuid>,
    pub seq: Option<i64>,
    pub event: Event,
}
