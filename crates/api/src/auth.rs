//! Authenticated principal supplied by the upstream identity layer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The user on whose behalf a request is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .ok_or_else(|| ApiError::Unauthorized("Invalid user id".to_string()))?;

        Ok(Principal { user_id })
    }
}
