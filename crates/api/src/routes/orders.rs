//! Order listing, lookup and cancellation for the authenticated user.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use domain::{Order, OrderLine};
use serde::Serialize;
use store::CommerceStore;

use crate::AppState;
use crate::auth::Principal;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub total_cents: i64,
    pub total: String,
    pub status: String,
    pub payment_method: String,
    pub created_at: String,
    pub items: Vec<OrderLineResponse>,
}

#[derive(Debug, Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price_cents: i64,
}

impl From<&OrderLine> for OrderLineResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            price_cents: line.unit_price.cents(),
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            total_cents: order.total.cents(),
            total: order.total.to_string(),
            status: order.status.to_string(),
            payment_method: order.payment_method.to_string(),
            created_at: order.created_at.to_rfc3339(),
            items: order.lines.iter().map(OrderLineResponse::from).collect(),
        }
    }
}

/// GET /orders: the principal's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.engine.orders_for_user(principal.user_id).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .engine
        .order_for_user(principal.user_id, order_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/cancel: cancel a pending order.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.engine.cancel(principal.user_id, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
