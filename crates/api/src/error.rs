//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use saga::{CheckoutError, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// A checkout that did not confirm.
    Checkout(CheckoutError),
    /// Saga execution error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, kind, "request failed");
        }

        let body = serde_json::json!({ "error": message, "kind": kind });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, &'static str, String) {
    let status = match &err {
        CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
        CheckoutError::OutOfStock(_) => StatusCode::CONFLICT,
        CheckoutError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
        CheckoutError::AuthorizerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.kind(), err.to_string())
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, &'static str, String) {
    let status = match &err {
        SagaError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::Order(order_err) | SagaError::Domain(DomainError::Order(order_err)) => {
            match order_err {
                OrderError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                OrderError::NotCreated => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            }
        }
        SagaError::InProgress { .. } => StatusCode::CONFLICT,
        err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.kind(), err.to_string())
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
