//! Engine registry.
//!
//! One [`MarketEngine`] task per OPEN market. The manager routes commands to
//! the owning engine, serves book snapshots without serializing through the
//! writers, and retires handles when markets resolve.

use crate::book::BookSnapshot;
use crate::engine::{spawn_engine, EngineError, EngineHandle, MarketEngine};
use crate::model::{
    CancelAck, Market, MarketStatus, Outcome, PlaceOrderRequest, PlaceOrderResult,
    SettlementSummary,
};
use crate::notify::Publisher;
use crate::store::Store;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct EngineManager {
    store: Arc<Store>,
    publisher: Arc<dyn Publisher>,
    fee_bps: i64,
    engines: RwLock<HashMap<Uuid, EngineHandle>>,
}

impl EngineManager {
    pub fn new(store: Arc<Store>, publisher: Arc<dyn Publisher>, fee_bps: i64) -> Self {
        Self {
            store,
            publisher,
            fee_bps,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Starts one engine per OPEN market, rebuilding each book from the
    /// store. Returns the number of engines running.
    pub async fn boot(&self) -> Result<usize, EngineError> {
        let markets = self.store.list_open_markets().await?;
        let count = markets.len();
        for market in markets {
            self.start_engine(market).await?;
        }
        info!("[manager] booted {count} market engines");
        Ok(count)
    }

    /// Creates a market and spins up its engine.
    pub async fn create_market(
        &self,
        slug: &str,
        title: &str,
        description: &str,
        tick_size_cents: i64,
    ) -> Result<Market, EngineError> {
        let market = self
            .store
            .create_market(slug, title, description, tick_size_cents)
            .await?;
        self.start_engine(market.clone()).await?;
        Ok(market)
    }

    pub async fn start_market(&self, market_id: Uuid) -> Result<(), EngineError> {
        let market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or(EngineError::MarketNotFound)?;
        if market.status != MarketStatus::Open {
            return Err(EngineError::MarketNotOpen);
        }
        self.start_engine(market).await
    }

    pub async fn place_order(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        req: PlaceOrderRequest,
        deadline: Option<Instant>,
    ) -> Result<PlaceOrderResult, EngineError> {
        let handle = self.handle(market_id).await?;
        handle.place_order(user_id, req, deadline).await
    }

    pub async fn cancel_order(
        &self,
        market_id: Uuid,
        order_id: Uuid,
        user_id: Uuid,
        admin_override: bool,
        deadline: Option<Instant>,
    ) -> Result<CancelAck, EngineError> {
        let handle = self.handle(market_id).await?;
        handle
            .cancel_order(order_id, user_id, admin_override, deadline)
            .await
    }

    /// Resolves the market and retires its engine; the market accepts no
    /// further commands.
    pub async fn resolve_market(
        &self,
        market_id: Uuid,
        resolves_to: Outcome,
        admin_user_id: Uuid,
    ) -> Result<SettlementSummary, EngineError> {
        let handle = self.handle(market_id).await?;
        let summary = handle.resolve_market(resolves_to, admin_user_id).await?;
        self.engines.write().await.remove(&market_id);
        Ok(summary)
    }

    /// Point-in-time book snapshot, read from the engine's watch channel
    /// without going through the single writer.
    pub async fn book_snapshot(
        &self,
        market_id: Uuid,
        depth: usize,
    ) -> Result<BookSnapshot, EngineError> {
        let handle = self.handle(market_id).await?;
        Ok(handle.book_snapshot(depth))
    }

    pub async fn running_engines(&self) -> usize {
        self.engines.read().await.len()
    }

    async fn start_engine(&self, market: Market) -> Result<(), EngineError> {
        if self.engines.read().await.contains_key(&market.id) {
            return Ok(());
        }
        let market_id = market.id;
        let (engine, snapshot_rx) = MarketEngine::bootstrap(
            market,
            self.fee_bps,
            self.store.clone(),
            self.publisher.clone(),
        )
        .await?;
        let handle = spawn_engine(engine, snapshot_rx);
        self.engines.write().await.insert(market_id, handle);
        Ok(())
    }

    async fn handle(&self, market_id: Uuid) -> Result<EngineHandle, EngineError> {
        if let Some(handle) = self.engines.read().await.get(&market_id).cloned() {
            return Ok(handle);
        }
        // Distinguish an unknown market from a resolved one.
        match self.store.get_market(market_id).await? {
            Some(market) if market.status == MarketStatus::Open => {
                // Open but not running: raced with boot. Start it lazily.
                self.start_engine(market).await?;
                self.engines
                    .read()
                    .await
                    .get(&market_id)
                    .cloned()
                    .ok_or(EngineError::MarketNotOpen)
            }
            Some(_) => Err(EngineError::MarketNotOpen),
            None => Err(EngineError::MarketNotFound),
        }
    }
}
