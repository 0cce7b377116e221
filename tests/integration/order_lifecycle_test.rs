// Order lifecycle integration tests
// Service-level status guards, then the same flows over the HTTP router.

use std::sync::Arc;

use energy_market_engine::database::repository::DeviceRepository;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;
use uuid::Uuid;

use energy_market_engine::config::Config;
use energy_market_engine::database::repository::OrderRepository;
use energy_market_engine::database::schema::types::{OrderSide, OrderStatus};
use energy_market_engine::database::{InMemoryMarketStore, MarketStores};
use energy_market_engine::error::ApiError;
use energy_market_engine::models::trading::CreateOrderRequest;
use energy_market_engine::models::DeviceTelemetry;
use energy_market_engine::router::build_router;
use energy_market_engine::services::reserve_proof::CommitmentProver;
use energy_market_engine::services::OrderService;
use energy_market_engine::startup;

fn service(store: &InMemoryMarketStore) -> OrderService {
    OrderService::new(Arc::new(store.clone()), Arc::new(store.clone()), "esp32")
}

fn request(user_id: Uuid, side: OrderSide, kwh: i64, price: i64) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        side,
        kwh_amount: Decimal::from(kwh),
        token_price: Decimal::from(price),
    }
}

#[tokio::test]
async fn test_owner_cancels_created_order() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let orders = service(&store);
    let owner = Uuid::new_v4();

    let order = orders.create_order(request(owner, OrderSide::Buy, 5, 3)).await?;
    assert_eq!(order.status, OrderStatus::Created);

    let cancelled = orders.cancel_order(owner, order.id).await?;
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(orders.get_order(order.id).await?.status, OrderStatus::Cancelled);

    // Cancelled is terminal
    let again = orders.cancel_order(owner, order.id).await;
    assert!(matches!(again, Err(ref e) if e.is_conflict()));
    Ok(())
}

#[tokio::test]
async fn test_matched_order_cannot_be_cancelled() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let orders = service(&store);
    let owner = Uuid::new_v4();
    let order = orders.create_order(request(owner, OrderSide::Sell, 5, 3)).await?;
    assert!(store.transition(order.id, OrderStatus::Created, OrderStatus::Matched).await?);

    let err = assert_err!(orders.cancel_order(owner, order.id).await);
    assert!(err.is_conflict());
    assert_eq!(orders.get_order(order.id).await?.status, OrderStatus::Matched);
    Ok(())
}

#[tokio::test]
async fn test_only_owner_may_cancel() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let orders = service(&store);
    let order = orders
        .create_order(request(Uuid::new_v4(), OrderSide::Buy, 5, 3))
        .await?;

    let err = assert_err!(orders.cancel_order(Uuid::new_v4(), order.id).await);
    assert!(matches!(err, ApiError::Forbidden(_)));
    assert_eq!(orders.get_order(order.id).await?.status, OrderStatus::Created);
    Ok(())
}

#[tokio::test]
async fn test_complete_requires_matched() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let orders = service(&store);
    let order = orders
        .create_order(request(Uuid::new_v4(), OrderSide::Buy, 5, 3))
        .await?;

    assert!(assert_err!(orders.complete_order(order.id).await).is_conflict());

    store.transition(order.id, OrderStatus::Created, OrderStatus::Matched).await?;
    assert_ok!(orders.complete_order(order.id).await);
    assert_eq!(orders.get_order(order.id).await?.status, OrderStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_non_positive_amounts_are_rejected() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let orders = service(&store);

    assert_err!(orders.create_order(request(Uuid::new_v4(), OrderSide::Buy, 0, 3)).await);
    assert_err!(orders.create_order(request(Uuid::new_v4(), OrderSide::Sell, 5, -1)).await);
    Ok(())
}

#[tokio::test]
async fn test_reserve_proof_gates_sell_orders() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let orders = service(&store).with_reserve_proofs(Arc::new(CommitmentProver::new()), 0.2);
    let (charged, drained, no_device) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    for (id, owner, level) in [("esp32_full", charged, 0.8), ("esp32_empty", drained, 0.1)] {
        store
            .upsert(&DeviceTelemetry {
                id: id.to_string(),
                owner_id: owner,
                device_type: "esp32".to_string(),
                battery_level: Some(level),
                status: "online".to_string(),
                last_ping: None,
            })
            .await?;
    }

    assert_ok!(orders.create_order(request(charged, OrderSide::Sell, 5, 3)).await);
    assert_err!(orders.create_order(request(drained, OrderSide::Sell, 5, 3)).await);
    assert_err!(orders.create_order(request(no_device, OrderSide::Sell, 5, 3)).await);
    // Buyers are never asked for a reserve
    assert_ok!(orders.create_order(request(no_device, OrderSide::Buy, 5, 3)).await);
    Ok(())
}

fn app(store: &InMemoryMarketStore) -> Result<Router> {
    let state = startup::build_state(
        &Config::default(),
        MarketStores::from_store(store.clone()),
        None,
    )?;
    Ok(build_router(state))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, value))
}

#[tokio::test]
async fn test_http_create_get_and_cancel() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let app = app(&store)?;
    let owner = Uuid::new_v4();

    let (status, created) = send(
        &app,
        Method::POST,
        "/api/v1/orders",
        Some(json!({ "user_id": owner, "side": "sell", "kwh_amount": 10, "token_price": 4.0 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "created");
    let id = created["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing order id"))?
        .to_string();

    let (status, fetched) = send(&app, Method::GET, &format!("/api/v1/orders/{}", id), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["side"], "sell");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/orders/{}/cancel", id),
        Some(json!({ "user_id": Uuid::new_v4() })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = send(
        &app,
        Method::POST,
        &format!("/api/v1/orders/{}/cancel", id),
        Some(json!({ "user_id": owner })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/orders/{}/cancel", id),
        Some(json!({ "user_id": owner })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn test_http_unknown_order_is_404() -> Result<()> {
    let app = app(&InMemoryMarketStore::new())?;
    let (status, body) = send(&app, Method::GET, &format!("/api/v1/orders/{}", Uuid::new_v4()), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["request_id"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_http_price_quote_on_empty_book() -> Result<()> {
    let app = app(&InMemoryMarketStore::new())?;
    let (status, quote) = send(&app, Method::GET, "/api/v1/market/price", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["supply"], 0);
    assert_eq!(quote["demand"], 0);
    assert_eq!(quote["community_soc"], 0.5);
    let price = quote["price"]
        .as_f64()
        .ok_or_else(|| anyhow::anyhow!("price missing"))?;
    assert!((2.5..=25.0).contains(&price));
    Ok(())
}

#[tokio::test]
async fn test_http_trade_history_rejects_inverted_range() -> Result<()> {
    let app = app(&InMemoryMarketStore::new())?;
    let uri = format!(
        "/api/v1/users/{}/trades?from=2024-05-02T00:00:00Z&to=2024-05-01T00:00:00Z",
        Uuid::new_v4()
    );
    let (status, _) = send(&app, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_http_yield_for_new_user_is_zero() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let app = app(&store)?;
    let user = Uuid::new_v4();

    let (status, body) = send(&app, Method::GET, &format!("/api/v1/users/{}/yield", user), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0.0);
    assert_eq!(body["records"].as_array().map(Vec::len), Some(0));
    assert!(OrderRepository::find_open(&store, OrderSide::Buy).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_http_health_reports_stopped_matcher() -> Result<()> {
    let app = app(&InMemoryMarketStore::new())?;
    let (status, body) = send(&app, Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["matching_engine"], "stopped");
    Ok(())
}
