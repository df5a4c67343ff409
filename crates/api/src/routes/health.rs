//! Liveness endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use store::CommerceStore;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Payment methods with a configured gateway.
    pub payment_methods: Vec<&'static str>,
}

/// GET /health
pub async fn check<S: CommerceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let payment_methods = state
        .engine
        .gateways()
        .methods()
        .into_iter()
        .map(|m| m.as_str())
        .collect();

    Json(HealthResponse {
        status: "ok",
        payment_methods,
    })
}
