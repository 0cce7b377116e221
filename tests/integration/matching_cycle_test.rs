// Matching cycle integration tests
// Drives OrderMatchingEngine against the in-memory store with side effects discarded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use energy_market_engine::database::repository::{OrderRepository, TradeRepository};
use energy_market_engine::database::schema::types::{OrderSide, OrderStatus, TradeStatus};
use energy_market_engine::database::InMemoryMarketStore;
use energy_market_engine::error::Result as StoreResult;
use energy_market_engine::models::EnergyOrder;
use energy_market_engine::services::settlement::SettlementConfig;
use energy_market_engine::services::task_queue::TaskHandler;
use energy_market_engine::services::{
    CommunityStateEstimator, MatchingConfig, OrderMatchingEngine, PricingConfig, PricingEngine,
    SettlementCoordinator, SideEffectTask, TaskQueue, TaskQueueConfig,
};

struct Discard;

#[async_trait]
impl TaskHandler<SideEffectTask> for Discard {
    async fn handle(&self, _task: &SideEffectTask) -> anyhow::Result<Option<SideEffectTask>> {
        Ok(None)
    }
}

fn build_engine(orders: Arc<dyn OrderRepository>, store: &InMemoryMarketStore, config: MatchingConfig) -> OrderMatchingEngine {
    let queue = TaskQueue::<SideEffectTask>::start(TaskQueueConfig::default(), Arc::new(Discard));
    let pricing = PricingEngine::new(
        PricingConfig::default(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    OrderMatchingEngine::new(
        orders,
        CommunityStateEstimator::new(Arc::new(store.clone())),
        pricing,
        SettlementCoordinator::new(Arc::new(store.clone()), queue, SettlementConfig::default()),
        config,
    )
}

fn engine(store: &InMemoryMarketStore) -> OrderMatchingEngine {
    build_engine(Arc::new(store.clone()), store, MatchingConfig::default())
}

async fn place(store: &InMemoryMarketStore, side: OrderSide, qty: &str, price: &str) -> Result<EnergyOrder> {
    let order = EnergyOrder::new(Uuid::new_v4(), side, qty.parse()?, price.parse()?);
    Ok(OrderRepository::create(store, &order).await?)
}

async fn status_of(store: &InMemoryMarketStore, id: Uuid) -> Result<OrderStatus> {
    let order = OrderRepository::find_by_id(store, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("order {} missing", id))?;
    Ok(order.status)
}

#[tokio::test]
async fn test_single_pair_settles_exactly_once() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let sell = place(&store, OrderSide::Sell, "10", "4.0").await?;
    let buy = place(&store, OrderSide::Buy, "10", "10.0").await?;
    let engine = engine(&store);

    let first = engine.run_cycle().await?;
    assert_eq!(first.matches, 1);
    assert_eq!(first.failed_settlements, 0);

    let trades = store.all_trades().await;
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade.kwh_amount, Decimal::from(10));
    assert_eq!(trade.donor_id, sell.user_id);
    assert_eq!(trade.recipient_id, buy.user_id);
    assert_eq!(trade.status, TradeStatus::Pending);
    assert!(trade.ledger_reference.starts_with("pending_txn_"));
    assert_eq!(trade.token_amount, trade.kwh_amount * trade.unit_price);
    assert!(trade.unit_price <= Decimal::from(10));

    assert_eq!(status_of(&store, sell.id).await?, OrderStatus::Matched);
    assert_eq!(status_of(&store, buy.id).await?, OrderStatus::Matched);

    let second = engine.run_cycle().await?;
    assert_eq!(second.matches, 0);
    assert_eq!(second.sell_orders, 0);
    assert_eq!(store.all_trades().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_differing_quantities_never_trade() -> Result<()> {
    let store = InMemoryMarketStore::new();
    place(&store, OrderSide::Sell, "10", "1.0").await?;
    place(&store, OrderSide::Buy, "10.00000001", "1000.0").await?;
    place(&store, OrderSide::Buy, "9.99", "1000.0").await?;

    let report = engine(&store).run_cycle().await?;
    assert_eq!(report.matches, 0);
    assert!(store.all_trades().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_each_sell_matches_at_most_one_buy_per_cycle() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let sell = place(&store, OrderSide::Sell, "5", "2.0").await?;
    let best_bid = place(&store, OrderSide::Buy, "5", "9.0").await?;
    let other_bid = place(&store, OrderSide::Buy, "5", "8.0").await?;

    let report = engine(&store).run_cycle().await?;
    assert_eq!(report.matches, 1);

    let trades = store.all_trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].sell_order_id, sell.id);
    assert_eq!(trades[0].buy_order_id, best_bid.id);
    assert_eq!(status_of(&store, other_bid.id).await?, OrderStatus::Created);
    Ok(())
}

#[tokio::test]
async fn test_each_buy_is_consumed_once_per_cycle() -> Result<()> {
    let store = InMemoryMarketStore::new();
    place(&store, OrderSide::Sell, "5", "2.0").await?;
    place(&store, OrderSide::Sell, "5", "2.5").await?;
    let only_bid = place(&store, OrderSide::Buy, "5", "9.0").await?;

    let report = engine(&store).run_cycle().await?;
    assert_eq!(report.matches, 1);
    assert_eq!(report.failed_settlements, 0);

    let by_buyer = store.all_trades().await.into_iter().filter(|t| t.buy_order_id == only_bid.id).count();
    assert_eq!(by_buyer, 1);
    Ok(())
}

#[tokio::test]
async fn test_non_created_orders_are_never_candidates() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let sell = place(&store, OrderSide::Sell, "10", "4.0").await?;
    let cancelled = place(&store, OrderSide::Buy, "10", "10.0").await?;
    let completed = place(&store, OrderSide::Buy, "10", "10.0").await?;
    store.transition(cancelled.id, OrderStatus::Created, OrderStatus::Cancelled).await?;
    store.transition(completed.id, OrderStatus::Created, OrderStatus::Matched).await?;
    store.transition(completed.id, OrderStatus::Matched, OrderStatus::Completed).await?;

    let report = engine(&store).run_cycle().await?;
    assert_eq!(report.buy_orders, 0);
    assert_eq!(report.matches, 0);
    assert_eq!(status_of(&store, sell.id).await?, OrderStatus::Created);
    assert_eq!(status_of(&store, cancelled.id).await?, OrderStatus::Cancelled);
    assert_eq!(status_of(&store, completed.id).await?, OrderStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_order_cannot_be_reopened() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let sell = place(&store, OrderSide::Sell, "10", "4.0").await?;
    place(&store, OrderSide::Buy, "10", "10.0").await?;
    assert!(store.transition(sell.id, OrderStatus::Created, OrderStatus::Cancelled).await?);

    assert!(!store.transition(sell.id, OrderStatus::Cancelled, OrderStatus::Created).await?);
    assert!(store.find_open(OrderSide::Sell).await?.is_empty());

    let report = engine(&store).run_cycle().await?;
    assert_eq!(report.sell_orders, 0);
    assert_eq!(report.matches, 0);
    assert_eq!(status_of(&store, sell.id).await?, OrderStatus::Cancelled);
    Ok(())
}

/// Returns the book as it was, then cancels the first bid behind the
/// matcher's back, like an owner cancelling mid-cycle.
struct CancelAfterSnapshot {
    inner: InMemoryMarketStore,
}

#[async_trait]
impl OrderRepository for CancelAfterSnapshot {
    async fn create(&self, order: &EnergyOrder) -> StoreResult<EnergyOrder> {
        OrderRepository::create(&self.inner, order).await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<EnergyOrder>> {
        OrderRepository::find_by_id(&self.inner, id).await
    }

    async fn find_open(&self, side: OrderSide) -> StoreResult<Vec<EnergyOrder>> {
        let snapshot = self.inner.find_open(side).await?;
        if side == OrderSide::Buy {
            if let Some(first) = snapshot.first() {
                self.inner
                    .transition(first.id, OrderStatus::Created, OrderStatus::Cancelled)
                    .await?;
            }
        }
        Ok(snapshot)
    }

    async fn count_open(&self, side: OrderSide) -> StoreResult<i64> {
        self.inner.count_open(side).await
    }

    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool> {
        self.inner.transition(id, from, to).await
    }
}

#[tokio::test]
async fn test_stale_snapshot_is_caught_by_guarded_settlement() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let sell = place(&store, OrderSide::Sell, "10", "4.0").await?;
    let raced = place(&store, OrderSide::Buy, "10", "10.0").await?;
    let fallback = place(&store, OrderSide::Buy, "10", "9.0").await?;

    let engine = build_engine(
        Arc::new(CancelAfterSnapshot { inner: store.clone() }),
        &store,
        MatchingConfig::default(),
    );
    let report = engine.run_cycle().await?;

    // The cancelled bid fails to settle, scanning continues to the next bid
    assert_eq!(report.failed_settlements, 1);
    assert_eq!(report.matches, 1);
    assert_eq!(status_of(&store, raced.id).await?, OrderStatus::Cancelled);
    assert_eq!(status_of(&store, fallback.id).await?, OrderStatus::Matched);
    assert_eq!(status_of(&store, sell.id).await?, OrderStatus::Matched);

    let trades = store.all_trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].buy_order_id, fallback.id);
    assert!(TradeRepository::find_by_id(&store, &format!("txn_{}", raced.id)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_background_loop_matches_and_stops() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let sell = place(&store, OrderSide::Sell, "3", "4.0").await?;
    place(&store, OrderSide::Buy, "3", "10.0").await?;

    let engine = build_engine(
        Arc::new(store.clone()),
        &store,
        MatchingConfig {
            interval: Duration::from_millis(20),
            ..MatchingConfig::default()
        },
    );
    engine.start().await;
    assert!(engine.is_running().await);

    let mut matched = false;
    for _ in 0..100 {
        if status_of(&store, sell.id).await? == OrderStatus::Matched {
            matched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    engine.stop().await;

    assert!(matched, "background loop never matched the pair");
    assert!(!engine.is_running().await);
    assert_eq!(store.all_trades().await.len(), 1);
    Ok(())
}

/// Slows every snapshot down and records how many are in flight at once.
struct SlowBook {
    inner: InMemoryMarketStore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    snapshots: AtomicUsize,
}

#[async_trait]
impl OrderRepository for SlowBook {
    async fn create(&self, order: &EnergyOrder) -> StoreResult<EnergyOrder> {
        OrderRepository::create(&self.inner, order).await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<EnergyOrder>> {
        OrderRepository::find_by_id(&self.inner, id).await
    }

    async fn find_open(&self, side: OrderSide) -> StoreResult<Vec<EnergyOrder>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let snapshot = self.inner.find_open(side).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        snapshot
    }

    async fn count_open(&self, side: OrderSide) -> StoreResult<i64> {
        self.inner.count_open(side).await
    }

    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool> {
        self.inner.transition(id, from, to).await
    }
}

#[tokio::test]
async fn test_restart_within_one_interval_keeps_cycles_serial() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let book = Arc::new(SlowBook {
        inner: store.clone(),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        snapshots: AtomicUsize::new(0),
    });
    let engine = build_engine(
        book.clone(),
        &store,
        MatchingConfig {
            interval: Duration::from_millis(200),
            ..MatchingConfig::default()
        },
    );

    // Restart while the first loop's opening cycle is still snapshotting
    engine.start().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.stop().await;
    engine.start().await;
    assert!(engine.is_running().await);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    engine.stop().await;

    assert_eq!(book.max_in_flight.load(Ordering::SeqCst), 1);
    // The restarted loop kept cycling after the old one wound down
    assert!(book.snapshots.load(Ordering::SeqCst) >= 6);
    Ok(())
}
