//! Checkout initiation.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use settlement::{Checkout, Initiation};
use store::CommerceStore;

use crate::AppState;
use crate::auth::Principal;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub payment_method: String,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub status: String,
    pub total: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
}

impl From<Checkout> for CheckoutResponse {
    fn from(checkout: Checkout) -> Self {
        let mut response = Self {
            order_id: checkout.order.id.to_string(),
            status: checkout.order.status.to_string(),
            total: checkout.order.total.to_string(),
            payment_url: None,
            client_secret: None,
            payment_intent_id: None,
        };

        match checkout.initiation {
            Initiation::Redirect { payment_url } => response.payment_url = Some(payment_url),
            Initiation::ClientConfirmation {
                client_secret,
                payment_intent_id,
            } => {
                response.client_secret = Some(client_secret);
                response.payment_intent_id = Some(payment_intent_id);
            }
            Initiation::Immediate => {}
        }
        response
    }
}

/// POST /checkout (alias POST /payments/init): start paying for the cart.
#[tracing::instrument(skip(state, req), fields(payment_method = %req.payment_method))]
pub async fn create<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let checkout = state
        .engine
        .initiate(
            principal.user_id,
            req.payment_method.trim(),
            req.currency.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(checkout))))
}
