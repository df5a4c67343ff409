//! Tokenized-intent gateway (Stripe).
//!
//! Checkout creates a payment intent and hands its client secret to the
//! client, which confirms the payment with the provider directly. The outcome
//! arrives as a signed webhook.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::PaymentMethod;
use serde::Deserialize;

use super::{
    CallbackEvent, CallbackPayload, CheckoutRequest, GatewayError, Initiation, Notification,
    PaymentGateway, Validation, error_for_status, signature,
};
use crate::exchange::ExchangeRates;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const SIGNATURE_HEADER: &str = "stripe-signature";

const SUCCEEDED: &str = "succeeded";
const SETTLEMENT_EVENTS: [&str; 2] = ["payment_intent.succeeded", "payment_intent.payment_failed"];

/// Credentials and endpoints for the tokenized-intent provider.
#[derive(Debug, Clone)]
pub struct PaymentIntentConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub currency: String,
    pub description: String,
    /// Maximum age of a webhook signature timestamp.
    pub tolerance_secs: i64,
}

impl PaymentIntentConfig {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            currency: "usd".to_string(),
            description: "GroceryMart Order".to_string(),
            tolerance_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

/// Tokenized-intent payment gateway.
pub struct StripeGateway {
    config: PaymentIntentConfig,
    client: reqwest::Client,
    exchange: Arc<ExchangeRates>,
}

impl StripeGateway {
    pub fn new(
        config: PaymentIntentConfig,
        client: reqwest::Client,
        exchange: Arc<ExchangeRates>,
    ) -> Self {
        Self {
            config,
            client,
            exchange,
        }
    }

    /// Builds a `Stripe-Signature` header value for `body` at `timestamp`.
    pub fn sign_webhook(&self, timestamp: i64, body: &[u8]) -> String {
        let signed = signed_payload(timestamp, body);
        let v1 = signature::sign_hex(self.config.webhook_secret.as_bytes(), &signed);
        format!("t={timestamp},v1={v1}")
    }

    fn intent_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/payment_intents{}",
            self.config.api_base.trim_end_matches('/'),
            suffix
        )
    }

    fn verify_signature(&self, header: &str, body: &[u8]) -> Result<(), GatewayError> {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(GatewayError::InvalidSignature)?;
        if (Utc::now().timestamp() - timestamp).abs() > self.config.tolerance_secs {
            return Err(GatewayError::InvalidSignature);
        }

        let signed = signed_payload(timestamp, body);
        let key = self.config.webhook_secret.as_bytes();
        if candidates
            .iter()
            .any(|candidate| signature::verify_hex(key, &signed, candidate))
        {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature)
        }
    }
}

fn signed_payload(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(body);
    signed
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    #[tracing::instrument(skip(self, request), fields(order_id = %request.order.id))]
    async fn initiate(&self, request: CheckoutRequest<'_>) -> Result<Initiation, GatewayError> {
        let currency = request
            .currency
            .unwrap_or(self.config.currency.as_str())
            .to_lowercase();
        let amount = self.exchange.convert(request.order.total, &currency).await?;

        let mut form: Vec<(&str, String)> = vec![
            ("amount", amount.cents().to_string()),
            ("currency", currency),
            ("metadata[order_id]", request.order.id.to_string()),
            ("description", self.config.description.clone()),
        ];
        if let Some(customer) = request.customer
            && !customer.email.is_empty()
        {
            form.push(("receipt_email", customer.email.clone()));
        }

        let response = self
            .client
            .post(self.intent_url(""))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            let err = error_for_status(response).await;
            tracing::warn!(error = %err, "payment intent creation failed");
            return Err(err);
        }

        let intent: PaymentIntent = response.json().await?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::Rejected("payment intent has no client secret".to_string())
        })?;

        tracing::info!(payment_intent_id = %intent.id, "payment intent created");
        Ok(Initiation::ClientConfirmation {
            client_secret,
            payment_intent_id: intent.id,
        })
    }

    fn authenticate(&self, notification: &Notification) -> Result<CallbackEvent, GatewayError> {
        let header = notification
            .header(SIGNATURE_HEADER)
            .ok_or(GatewayError::InvalidSignature)?;
        self.verify_signature(header, &notification.body)?;

        let event: WebhookEvent = serde_json::from_slice(&notification.body)
            .map_err(|e| GatewayError::MalformedCallback(e.to_string()))?;

        if !SETTLEMENT_EVENTS.contains(&event.event_type.as_str()) {
            return Ok(CallbackEvent::Ignored {
                event_type: event.event_type,
            });
        }

        let data: WebhookData = serde_json::from_value(event.data)
            .map_err(|e| GatewayError::MalformedCallback(e.to_string()))?;
        let order_id: OrderId = data
            .object
            .metadata
            .get("order_id")
            .ok_or_else(|| GatewayError::MalformedCallback("missing metadata.order_id".into()))?
            .parse()
            .map_err(|_| GatewayError::MalformedCallback("order_id is not an order id".into()))?;

        Ok(CallbackEvent::Payment(CallbackPayload {
            order_id,
            reference: data.object.id,
            event_id: event.id,
        }))
    }

    #[tracing::instrument(skip(self), fields(order_id = %payload.order_id))]
    async fn validate(&self, payload: &CallbackPayload) -> Result<Validation, GatewayError> {
        let response = self
            .client
            .get(self.intent_url(&format!("/{}", payload.reference)))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await?;
        if !response.status().is_success() {
            return match error_for_status(response).await {
                GatewayError::Rejected(reason) => Ok(Validation::rejected(reason)),
                err => Err(err),
            };
        }

        let intent: PaymentIntent = response.json().await?;
        if intent.status == SUCCEEDED {
            Ok(Validation::accepted(Some(payload.event_id.clone())))
        } else {
            Ok(Validation::rejected(format!(
                "Payment status: {}",
                intent.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use domain::{Cart, Customer, Money, Order, UserId};
    use http::HeaderMap;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::exchange::ExchangeRateConfig;

    fn gateway(server: &MockServer) -> StripeGateway {
        let mut config = PaymentIntentConfig::new("sk_test", "whsec_test");
        config.api_base = server.uri();
        let exchange = ExchangeRates::new(
            reqwest::Client::new(),
            ExchangeRateConfig::new(server.uri(), "USD"),
        );
        StripeGateway::new(config, reqwest::Client::new(), Arc::new(exchange))
    }

    fn webhook(gateway: &StripeGateway, event_type: &str, order_id: OrderId) -> Notification {
        let body = serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": event_type,
            "data": {"object": {"id": "pi_1", "metadata": {"order_id": order_id.to_string()}}}
        }))
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            gateway
                .sign_webhook(Utc::now().timestamp(), &body)
                .parse()
                .unwrap(),
        );
        Notification::new(headers, body)
    }

    #[tokio::test]
    async fn test_initiate_creates_intent_in_minor_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header_exists("authorization"))
            .and(body_string_contains("amount=2000"))
            .and(body_string_contains("currency=usd"))
            .and(body_string_contains("receipt_email=test%40example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1",
                "status": "requires_payment_method",
                "client_secret": "pi_1_secret_abc"
            })))
            .mount(&server)
            .await;

        let user = UserId::new();
        let order = Order::pending(user, Money::from_cents(2000), PaymentMethod::Stripe);
        let cart = Cart::empty(user);
        let customer = Customer::new(user, "Test User", "test@example.com");
        let result = gateway(&server)
            .initiate(CheckoutRequest {
                order: &order,
                cart: &cart,
                customer: Some(&customer),
                currency: None,
            })
            .await
            .unwrap();

        assert_eq!(
            result,
            Initiation::ClientConfirmation {
                client_secret: "pi_1_secret_abc".to_string(),
                payment_intent_id: "pi_1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let user = UserId::new();
        let order = Order::pending(user, Money::from_cents(2000), PaymentMethod::Stripe);
        let cart = Cart::empty(user);
        let result = gateway(&server)
            .initiate(CheckoutRequest {
                order: &order,
                cart: &cart,
                customer: None,
                currency: None,
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_card_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {"message": "Your card was declined."}
            })))
            .mount(&server)
            .await;

        let user = UserId::new();
        let order = Order::pending(user, Money::from_cents(2000), PaymentMethod::Stripe);
        let cart = Cart::empty(user);
        let result = gateway(&server)
            .initiate(CheckoutRequest {
                order: &order,
                cart: &cart,
                customer: None,
                currency: None,
            })
            .await;
        match result {
            Err(GatewayError::Rejected(reason)) => assert_eq!(reason, "Your card was declined."),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_authenticate_signed_webhook() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);
        let order_id = OrderId::new();

        let event = gateway
            .authenticate(&webhook(&gateway, "payment_intent.succeeded", order_id))
            .unwrap();
        assert_eq!(
            event,
            CallbackEvent::Payment(CallbackPayload {
                order_id,
                reference: "pi_1".to_string(),
                event_id: "evt_1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_authenticate_ignores_other_events() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);

        let event = gateway
            .authenticate(&webhook(&gateway, "charge.refunded", OrderId::new()))
            .unwrap();
        assert_eq!(
            event,
            CallbackEvent::Ignored {
                event_type: "charge.refunded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_authenticate_rejects_bad_signatures() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);

        let mut tampered = webhook(&gateway, "payment_intent.succeeded", OrderId::new());
        tampered.body.extend_from_slice(b" ");
        assert!(matches!(
            gateway.authenticate(&tampered),
            Err(GatewayError::InvalidSignature)
        ));

        let mut stale = webhook(&gateway, "payment_intent.succeeded", OrderId::new());
        let old = Utc::now().timestamp() - 3600;
        stale.headers.insert(
            SIGNATURE_HEADER,
            gateway.sign_webhook(old, &stale.body).parse().unwrap(),
        );
        assert!(matches!(
            gateway.authenticate(&stale),
            Err(GatewayError::InvalidSignature)
        ));

        let unsigned = Notification::new(HeaderMap::new(), b"{}".to_vec());
        assert!(matches!(
            gateway.authenticate(&unsigned),
            Err(GatewayError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_validate_requires_succeeded_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_ok", "status": "succeeded"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_bad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_bad", "status": "requires_payment_method"
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        let order_id = OrderId::new();
        let ok = gateway
            .validate(&CallbackPayload {
                order_id,
                reference: "pi_ok".to_string(),
                event_id: "evt_ok".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(ok, Validation::accepted(Some("evt_ok".to_string())));

        let bad = gateway
            .validate(&CallbackPayload {
                order_id,
                reference: "pi_bad".to_string(),
                event_id: "evt_bad".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            bad,
            Validation::rejected("Payment status: requires_payment_method")
        );
    }
}
