//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use settlement::SettlementError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
///
/// The body is always `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    /// No authenticated principal on the request.
    Unauthorized(String),
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout or settlement error.
    Settlement(SettlementError),
    /// Persistence error.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Settlement(err) => (settlement_status(&err), err.to_string()),
            ApiError::Store(err) => (store_status(&err), err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, %status, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

/// HTTP status for a settlement error.
pub fn settlement_status(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::EmptyCart
        | SettlementError::InsufficientStock { .. }
        | SettlementError::UnknownPaymentMethod(_)
        | SettlementError::GatewayRejected(_)
        | SettlementError::AlreadyFailed(_)
        | SettlementError::PaymentRejected(_)
        | SettlementError::InvalidLine(_)
        | SettlementError::InvalidCallbackSignature => StatusCode::BAD_REQUEST,
        SettlementError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
        SettlementError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::InvalidTransition { .. } => StatusCode::CONFLICT,
        SettlementError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
        SettlementError::Store(err) => store_status(err),
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::ProductNotFound(_)
        | StoreError::OrderNotFound(_)
        | StoreError::CartItemNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::DuplicatePaymentEvent(_) => StatusCode::CONFLICT,
        StoreError::CorruptRow(_) | StoreError::Database(_) | StoreError::Migration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        ApiError::Settlement(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

/// Error returned to payment providers on the notification routes.
///
/// Providers only ever see `{"status": "<message>"}`.
#[derive(Debug)]
pub struct NotificationError(pub SettlementError);

impl IntoResponse for NotificationError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SettlementError::UnknownPaymentMethod(_) => StatusCode::NOT_FOUND,
            err => settlement_status(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, %status, "payment notification failed");
        }

        let body = serde_json::json!({ "status": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<SettlementError> for NotificationError {
    fn from(err: SettlementError) -> Self {
        NotificationError(err)
    }
}
