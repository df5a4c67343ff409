//! Payment gateway trait and provider implementations.
//!
//! Every payment method is a [`PaymentGateway`]. A gateway starts a payment
//! for a pending order, authenticates the provider's asynchronous callback,
//! and validates the reported outcome against the provider before the engine
//! settles anything.

pub mod balance;
pub mod registry;
pub mod signature;
pub mod sslcommerz;
pub mod stripe;

use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{Cart, Customer, Order, PaymentMethod};
use http::HeaderMap;
use serde::Serialize;
use thiserror::Error;

pub use balance::BalanceGateway;
pub use registry::GatewayRegistry;
pub use sslcommerz::{HostedRedirectConfig, SslcommerzGateway};
pub use stripe::{PaymentIntentConfig, StripeGateway};

/// Errors raised by gateway implementations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure, timeout or provider back-off. Safe to retry.
    #[error("{0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("{0}")]
    Rejected(String),

    /// Callback signature did not match.
    #[error("invalid callback signature")]
    InvalidSignature,

    /// Callback body is missing required fields.
    #[error("malformed callback: {0}")]
    MalformedCallback(String),

    /// Internal balance does not cover the order total.
    #[error("insufficient balance")]
    InsufficientBalance,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Everything a gateway needs to start a payment.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutRequest<'a> {
    pub order: &'a Order,
    pub cart: &'a Cart,
    /// Profile of the paying user, if one exists.
    pub customer: Option<&'a Customer>,
    /// Currency requested by the client; gateways fall back to their default.
    pub currency: Option<&'a str>,
}

/// What the client must do next to complete a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Initiation {
    /// Send the customer to the provider's hosted page.
    Redirect { payment_url: String },

    /// Confirm the payment intent client-side with the provider.
    ClientConfirmation {
        client_secret: String,
        payment_intent_id: String,
    },

    /// Nothing to do: the payment settles synchronously.
    Immediate,
}

/// Provider verdict on a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub accepted: bool,
    pub reason: Option<String>,
    /// Provider event id recorded on the order for idempotency.
    pub event_id: Option<String>,
}

impl Validation {
    pub fn accepted(event_id: Option<String>) -> Self {
        Self {
            accepted: true,
            reason: None,
            event_id,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            event_id: None,
        }
    }
}

/// Raw callback as received over HTTP.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Notification {
    pub fn new(headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Returns a header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An authenticated callback concerning a specific order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub order_id: OrderId,
    /// Provider transaction reference used to look the payment up.
    pub reference: String,
    /// Unique id of this provider event.
    pub event_id: String,
}

/// Result of authenticating a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// A payment outcome to validate and settle.
    Payment(CallbackPayload),

    /// Authentic, but nothing to settle.
    Ignored { event_type: String },
}

/// Common contract of every payment method.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// The payment method this gateway serves.
    fn method(&self) -> PaymentMethod;

    /// Starts a payment for a pending order.
    async fn initiate(&self, request: CheckoutRequest<'_>) -> Result<Initiation, GatewayError>;

    /// Verifies a callback's signature and extracts the order it concerns.
    ///
    /// Must not touch any state: a callback that fails here is discarded.
    fn authenticate(&self, notification: &Notification) -> Result<CallbackEvent, GatewayError>;

    /// Asks the provider whether the payment behind a callback succeeded.
    async fn validate(&self, payload: &CallbackPayload) -> Result<Validation, GatewayError>;
}

/// Builds the outbound HTTP client shared by all gateways.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))
}

/// Maps a non-success provider response onto a gateway error.
///
/// 429 and 5xx are transient; any other status is a refusal.
pub(crate) async fn error_for_status(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return GatewayError::Unavailable("Too many requests, try again later".to_string());
    }
    if status.is_server_error() {
        return GatewayError::Unavailable(format!("provider returned {status}"));
    }

    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("provider returned {status}"));
    GatewayError::Rejected(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiation_serializes_flat() {
        let redirect = Initiation::Redirect {
            payment_url: "https://pay.example/abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&redirect).unwrap(),
            serde_json::json!({"payment_url": "https://pay.example/abc"})
        );

        let intent = Initiation::ClientConfirmation {
            client_secret: "pi_1_secret".to_string(),
            payment_intent_id: "pi_1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            serde_json::json!({"client_secret": "pi_1_secret", "payment_intent_id": "pi_1"})
        );
    }

    #[test]
    fn test_notification_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", "t=1,v1=abc".parse().unwrap());
        let notification = Notification::new(headers, b"{}".to_vec());
        assert_eq!(notification.header("Stripe-Signature"), Some("t=1,v1=abc"));
        assert_eq!(notification.header("X-Missing"), None);
    }
}
