//! Cart endpoints. The cart is the input to checkout.
//!
//! Stock checks here are advisory: nothing is reserved, and settlement
//! re-validates against locked rows.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{CartItemId, ProductId};
use domain::{Cart, CartItem};
use serde::{Deserialize, Serialize};
use store::CommerceStore;

use crate::AppState;
use crate::auth::Principal;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub user_id: String,
    pub items: Vec<CartItemResponse>,
    pub total_cents: i64,
    pub total: String,
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price_cents: i64,
    pub stock: u32,
    pub subtotal_cents: i64,
}

impl From<&CartItem> for CartItemResponse {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id.to_string(),
            product_id: item.product.id.to_string(),
            product_name: item.product.name.clone(),
            quantity: item.quantity,
            price_cents: item.product.price.cents(),
            stock: item.product.stock,
            subtotal_cents: item.subtotal().cents(),
        }
    }
}

impl From<&Cart> for CartResponse {
    fn from(cart: &Cart) -> Self {
        let total = cart.total();
        Self {
            user_id: cart.user_id.to_string(),
            items: cart.items.iter().map(CartItemResponse::from).collect(),
            total_cents: total.cents(),
            total: total.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartItemUpdated {
    pub message: &'static str,
    pub item: CartItemResponse,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemRequest {
    pub product_id: ProductId,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

/// GET /cart: the principal's cart, created on first access.
#[tracing::instrument(skip(state))]
pub async fn get<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.engine.store().get_cart(principal.user_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// POST /cart/add: add units of a product, merging with any existing item.
#[tracing::instrument(skip(state))]
pub async fn add<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartItemUpdated>), ApiError> {
    let quantity = positive_quantity(req.quantity)?;
    let store = state.engine.store();

    let product = store
        .get_product(req.product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {} not found", req.product_id)))?;
    if !product.has_stock_for(quantity) {
        return Err(ApiError::BadRequest(format!(
            "Only {} units of {} available",
            product.stock, product.name
        )));
    }

    let cart = store.get_cart(principal.user_id).await?;
    let new_quantity = match cart.item_for(product.id) {
        Some(existing) => {
            let total = existing.quantity.saturating_add(quantity);
            if !product.has_stock_for(total) {
                return Err(ApiError::BadRequest(format!(
                    "Total quantity ({total}) exceeds available stock ({}) for {}",
                    product.stock, product.name
                )));
            }
            total
        }
        None => quantity,
    };

    let item = store
        .put_cart_item(principal.user_id, product.id, new_quantity)
        .await?;
    tracing::info!(product_id = %product.id, quantity = new_quantity, "cart item saved");

    Ok((
        StatusCode::CREATED,
        Json(CartItemUpdated {
            message: "Item added to cart",
            item: CartItemResponse::from(&item),
        }),
    ))
}

/// POST /cart/remove: remove a product from the cart.
#[tracing::instrument(skip(state))]
pub async fn remove<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
    Json(req): Json<RemoveItemRequest>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .engine
        .store()
        .remove_cart_product(principal.user_id, req.product_id)
        .await?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Item not found".to_string()))
    }
}

/// PATCH /cart/items/{id}: set an item's quantity; zero removes it.
#[tracing::instrument(skip(state))]
pub async fn update_quantity<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<UpdateQuantityRequest>,
) -> Result<Response, ApiError> {
    let item_id: CartItemId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid cart item id: {e}")))?;
    let quantity = u32::try_from(req.quantity)
        .map_err(|_| ApiError::BadRequest("Quantity cannot be negative".to_string()))?;
    let store = state.engine.store();

    if quantity > 0 {
        let cart = store.get_cart(principal.user_id).await?;
        let item = cart
            .items
            .iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| ApiError::NotFound("Cart item not found".to_string()))?;
        if !item.product.has_stock_for(quantity) {
            return Err(ApiError::BadRequest(format!(
                "Only {} units of {} available",
                item.product.stock, item.product.name
            )));
        }
    }

    match store
        .update_cart_item(principal.user_id, item_id, quantity)
        .await?
    {
        Some(item) => Ok(Json(CartItemUpdated {
            message: "Quantity updated",
            item: CartItemResponse::from(&item),
        })
        .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

fn positive_quantity(quantity: i64) -> Result<u32, ApiError> {
    match u32::try_from(quantity) {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(ApiError::BadRequest(
            "Quantity must be a positive integer".to_string(),
        )),
    }
}
