//! Provider notification endpoints (IPN and webhooks).
//!
//! These routes are unauthenticated: every callback is verified by its
//! gateway before anything is read from it. Responses are always
//! `{"status": ...}` so providers can tell a delivery was handled.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use domain::PaymentMethod;
use serde::Serialize;
use settlement::gateway::stripe::SIGNATURE_HEADER;
use settlement::{Notification, NotificationOutcome, SettlementError};
use store::CommerceStore;

use crate::AppState;
use crate::error::NotificationError;

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub status: &'static str,
}

/// POST /payments/notify: dispatches on the provider's signature header.
pub async fn notify<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NotificationResponse>, NotificationError> {
    let method = if headers.contains_key(SIGNATURE_HEADER) {
        PaymentMethod::Stripe
    } else {
        PaymentMethod::Sslcommerz
    };
    handle(&state, method, headers, body).await
}

/// POST /payments/notify/{method}
pub async fn notify_method<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NotificationResponse>, NotificationError> {
    let method: PaymentMethod = method.parse().map_err(SettlementError::from)?;
    handle(&state, method, headers, body).await
}

/// POST /payments/ipn
pub async fn ipn<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NotificationResponse>, NotificationError> {
    handle(&state, PaymentMethod::Sslcommerz, headers, body).await
}

/// POST /payments/stripe-webhook
pub async fn stripe_webhook<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NotificationResponse>, NotificationError> {
    handle(&state, PaymentMethod::Stripe, headers, body).await
}

#[tracing::instrument(skip(state, headers, body), fields(bytes = body.len()))]
async fn handle<S: CommerceStore + 'static>(
    state: &AppState<S>,
    method: PaymentMethod,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NotificationResponse>, NotificationError> {
    metrics::counter!("payment_notification_received_total", "method" => method.as_str())
        .increment(1);

    let notification = Notification::new(headers, body.to_vec());
    match state.engine.handle_notification(method, &notification).await? {
        NotificationOutcome::Settled { order_id } => {
            tracing::info!(%order_id, "payment notification settled");
        }
        NotificationOutcome::Declined { order_id, reason } => {
            tracing::info!(%order_id, %reason, "payment notification declined");
        }
        NotificationOutcome::Ignored { event_type } => {
            tracing::debug!(%event_type, "payment notification ignored");
        }
    }

    Ok(Json(NotificationResponse { status: "ok" }))
}
