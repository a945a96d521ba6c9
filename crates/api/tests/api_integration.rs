//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::config::Config;
use api::routes::orders::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    Collaborators, InMemoryPaymentGateway, InMemoryStockService, NotificationHub, Saga,
};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    let state = api::create_default_state(&Config::default());
    api::create_app(state, get_metrics_handle())
}

/// Builds an app whose gateway and stock service the test controls.
fn setup_with(gateway: InMemoryPaymentGateway, stock: InMemoryStockService) -> axum::Router {
    let config = Config::default();
    let saga_config = config.saga_config();
    let notifications = NotificationHub::new(saga_config.notification_capacity);

    let collaborators = Collaborators {
        gateway: Arc::new(gateway),
        stock: Arc::new(stock),
        ..Collaborators::in_memory(config.log_partitions, Arc::new(notifications.clone()))
    };
    let state = Arc::new(AppState::new(
        Saga::new(collaborators, saga_config),
        notifications,
    ));
    api::create_app(state, get_metrics_handle())
}

fn checkout_body(user_id: Option<&str>) -> Value {
    json!({
        "user_id": user_id,
        "items": [{
            "product_id": "SKU-001",
            "product_name": "Widget",
            "quantity": 2,
            "unit_price_cents": 2999
        }],
        "instrument": { "reference": "tok_visa", "last_four": "4242" },
        "shipping_address": {
            "street": "1 Main St",
            "city": "Springfield",
            "state": "IL",
            "zip_code": "62701",
            "country": "US"
        }
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn checkout(app: &axum::Router, body: &Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(post_json("/checkout", body))
        .await
        .unwrap();
    let status = response.status();
    (status, json_body(response).await)
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["log_partitions"], 4);
}

#[tokio::test]
async fn test_checkout_confirms_order() {
    let app = setup();

    let (status, json) = checkout(&app, &checkout_body(None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["state"], "Confirmed");
    assert_eq!(json["total_cents"], 5998);
    assert!(json["transaction_ref"].is_string());
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_order() {
    let app = setup();
    let (_, created) = checkout(&app, &checkout_body(None)).await;
    let order_id = created["id"].as_str().unwrap();

    let response = app
        .oneshot(get(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["id"], order_id);
    assert_eq!(json["state"], "Confirmed");
    assert_eq!(json["user_id"], created["user_id"]);
}

#[tokio::test]
async fn test_order_history() {
    let app = setup();
    let user_id = common::UserId::new().to_string();

    let (_, first) = checkout(&app, &checkout_body(Some(&user_id))).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (_, second) = checkout(&app, &checkout_body(Some(&user_id))).await;
    checkout(&app, &checkout_body(None)).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/users/{user_id}/orders")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["user_id"], user_id);
    assert_eq!(json["count"], 2);
    assert_eq!(json["orders"][0]["id"], second["id"]);
    assert_eq!(json["orders"][1]["id"], first["id"]);

    let response = app.oneshot(get("/users/nobody/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_order() {
    let app = setup();

    let response = app
        .clone()
        .oneshot(get("/orders/00000000-0000-0000-0000-000000000000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/orders/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_validation() {
    let app = setup();

    let mut body = checkout_body(None);
    body["items"] = json!([]);
    let (status, json) = checkout(&app, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");

    let mut body = checkout_body(None);
    body["instrument"]["reference"] = json!(" ");
    let (status, _) = checkout(&app, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = checkout(&app, &checkout_body(Some("nobody"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_rejects_total_overflow() {
    let app = setup();

    let mut body = checkout_body(None);
    body["items"][0]["quantity"] = json!(3);
    body["items"][0]["unit_price_cents"] = json!(i64::MAX / 2);
    let (status, json) = checkout(&app, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert!(json["error"].as_str().unwrap().contains("overflows"));
}

#[tokio::test]
async fn test_checkout_declined() {
    let gateway = InMemoryPaymentGateway::new();
    gateway.set_decline(Some("insufficient funds")).await;
    let app = setup_with(gateway, InMemoryStockService::new());

    let (status, json) = checkout(&app, &checkout_body(None)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["kind"], "payment_declined");
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("insufficient funds")
    );
}

#[tokio::test]
async fn test_checkout_out_of_stock() {
    let stock = InMemoryStockService::new();
    stock.set_stock("SKU-001", 1).await;
    let app = setup_with(InMemoryPaymentGateway::new(), stock);

    let (status, json) = checkout(&app, &checkout_body(None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "out_of_stock");
}

#[tokio::test]
async fn test_cancel_order() {
    let app = setup();
    let (_, created) = checkout(&app, &checkout_body(None)).await;
    let order_id = created["id"].as_str().unwrap();
    let uri = format!("/orders/{order_id}/cancel");

    let response = app
        .clone()
        .oneshot(post_json(&uri, &json!({ "reason": "customer request" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["state"], "Cancelled");
    assert_eq!(json["cancellation_reason"], "customer request");
    assert_eq!(json["total_cents"], 5998);

    // Cancelling again is a no-op.
    let response = app
        .clone()
        .oneshot(post_json(&uri, &json!({ "reason": "again" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["cancellation_reason"], "customer request");

    let response = app
        .oneshot(post_json(&uri, &json!({ "reason": "" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dead_letters_empty() {
    let app = setup();

    let response = app.clone().oneshot(get("/dead-letters/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["topic"], "orders");
    assert_eq!(json["dead_letter_topic"], "orders.dead-letter");
    assert_eq!(json["count"], 0);

    let response = app
        .oneshot(get("/dead-letters/orders.dead-letter"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notifications_stream() {
    let app = setup();
    let user_id = common::UserId::new().to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/notifications/{user_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );

    let (status, _) = checkout(&app, &checkout_body(Some(&user_id))).await;
    assert_eq!(status, StatusCode::CREATED);

    let mut frames = response.into_body().into_data_stream();
    let mut received = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !received.contains("event: OrderConfirmed") {
            let Some(Ok(chunk)) = frames.next().await else {
                break;
            };
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("no OrderConfirmed notification");

    let requested = received.find("event: CheckoutRequested").unwrap();
    let confirmed = received.find("event: OrderConfirmed").unwrap();
    assert!(requested < confirmed);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    checkout(&app, &checkout_body(None)).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("checkout_total"));
}
