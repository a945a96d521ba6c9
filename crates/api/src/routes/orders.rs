//! Checkout, order lookup, order history and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, UserId};
use domain::{
    Aggregate, CartSnapshot, LineItem, Money, Order, PaymentInstrument, PaymentMethod,
    ShippingAddress,
};
use saga::{CheckoutRequest, NotificationHub, Saga};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: Saga,
    pub notifications: NotificationHub,
}

impl AppState {
    /// `notifications` must be the transport `saga` was built with.
    pub fn new(saga: Saga, notifications: NotificationHub) -> Self {
        Self {
            saga,
            notifications,
        }
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CheckoutBody {
    pub user_id: Option<String>,
    pub items: Vec<LineItemRequest>,
    pub instrument: InstrumentRequest,
    pub shipping_address: ShippingAddress,
}

#[derive(Deserialize)]
pub struct LineItemRequest {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct InstrumentRequest {
    pub reference: String,
    pub method: Option<PaymentMethod>,
    pub last_four: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelBody {
    pub reason: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub state: String,
    pub items: Vec<LineItemResponse>,
    pub total_cents: i64,
    pub transaction_ref: Option<String>,
    pub failure_kind: Option<String>,
    pub failure_reason: Option<String>,
    pub cancellation_reason: Option<String>,
}

#[derive(Serialize)]
pub struct OrderHistoryResponse {
    pub user_id: String,
    pub count: usize,
    pub orders: Vec<OrderResponse>,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl OrderResponse {
    fn from_order(order_id: OrderId, order: &Order) -> Self {
        let items = order
            .items()
            .iter()
            .map(|item| LineItemResponse {
                product_id: item.product_id.to_string(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price.cents(),
            })
            .collect();

        Self {
            id: order_id.to_string(),
            user_id: order.user_id().map(|u| u.to_string()).unwrap_or_default(),
            state: order.state().to_string(),
            items,
            total_cents: order.total().cents(),
            transaction_ref: order.transaction_ref().map(String::from),
            failure_kind: order.failure().map(|(kind, _)| kind.as_str().to_string()),
            failure_reason: order.failure().map(|(_, reason)| reason.to_string()),
            cancellation_reason: order.cancellation_reason().map(String::from),
        }
    }
}

// -- Handlers --

/// POST /checkout: runs the saga and answers once the order is settled.
#[tracing::instrument(skip(state, body))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id = match body.user_id.as_deref() {
        Some(id) => id
            .parse::<UserId>()
            .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?,
        None => UserId::new(),
    };

    let items = body
        .items
        .into_iter()
        .map(|item| {
            LineItem::new(
                item.product_id,
                item.product_name,
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let request = CheckoutRequest {
        user_id,
        cart: CartSnapshot::new(items),
        instrument: PaymentInstrument {
            reference: body.instrument.reference,
            method: body.instrument.method.unwrap_or(PaymentMethod::CreditCard),
            last_four: body.instrument.last_four,
        },
        shipping_address: body.shipping_address,
    };

    let order_id = state.saga.controller.checkout(request).await?;
    let order = load_order(&state, order_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderResponse::from_order(order_id, &order)),
    ))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = load_order(&state, order_id).await?;
    Ok(Json(OrderResponse::from_order(order_id, &order)))
}

/// GET /users/{user_id}/orders: the user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<OrderHistoryResponse>, ApiError> {
    let user_id = user_id
        .parse::<UserId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?;

    let orders: Vec<OrderResponse> = state
        .saga
        .controller
        .orders_for_user(user_id)
        .await?
        .iter()
        .filter_map(|order| Some(OrderResponse::from_order(order.id()?, order)))
        .collect();

    Ok(Json(OrderHistoryResponse {
        user_id: user_id.to_string(),
        count: orders.len(),
        orders,
    }))
}

/// POST /orders/{id}/cancel: cancels a confirmed order.
#[tracing::instrument(skip(state, body))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    if body.reason.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "A cancellation reason is required".to_string(),
        ));
    }

    let order = state.saga.controller.cancel(order_id, &body.reason).await?;
    Ok(Json(OrderResponse::from_order(order_id, &order)))
}

async fn load_order(state: &AppState, order_id: OrderId) -> Result<Order, ApiError> {
    state
        .saga
        .controller
        .order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse::<OrderId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
