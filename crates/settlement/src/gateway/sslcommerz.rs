//! Hosted-redirect gateway (SSLCommerz).
//!
//! The customer pays on the provider's page. The provider then posts an IPN
//! whose authenticity is checked with an HMAC over the fields it lists in
//! `verify_key`, and the payment is confirmed through the validation API.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::PaymentMethod;
use serde::Deserialize;

use super::{
    CallbackEvent, CallbackPayload, CheckoutRequest, GatewayError, Initiation, Notification,
    PaymentGateway, Validation, error_for_status, signature,
};
use crate::exchange::ExchangeRates;

pub const SANDBOX_API_BASE: &str = "https://sandbox.sslcommerz.com";
pub const LIVE_API_BASE: &str = "https://securepay.sslcommerz.com";

const VALID_STATUSES: [&str; 2] = ["VALID", "VALIDATED"];
const UNKNOWN: &str = "Unknown";

/// Credentials and endpoints for the hosted-redirect provider.
#[derive(Debug, Clone)]
pub struct HostedRedirectConfig {
    pub store_id: String,
    pub store_pass: String,
    pub api_base: String,
    /// Public base URL of this service, used for the return and IPN URLs.
    pub base_url: String,
    pub currency: String,
}

impl HostedRedirectConfig {
    pub fn new(
        store_id: impl Into<String>,
        store_pass: impl Into<String>,
        is_sandbox: bool,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            store_pass: store_pass.into(),
            api_base: if is_sandbox {
                SANDBOX_API_BASE
            } else {
                LIVE_API_BASE
            }
            .to_string(),
            base_url: base_url.into(),
            currency: "BDT".to_string(),
        }
    }

    fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    status: String,
    #[serde(rename = "GatewayPageURL", default)]
    gateway_page_url: Option<String>,
    #[serde(default)]
    failedreason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    status: String,
    #[serde(default)]
    tran_id: Option<String>,
}

/// Hosted-redirect payment gateway.
pub struct SslcommerzGateway {
    config: HostedRedirectConfig,
    client: reqwest::Client,
    exchange: Arc<ExchangeRates>,
}

impl SslcommerzGateway {
    pub fn new(
        config: HostedRedirectConfig,
        client: reqwest::Client,
        exchange: Arc<ExchangeRates>,
    ) -> Self {
        Self {
            config,
            client,
            exchange,
        }
    }

    /// Signs IPN fields the way the provider does.
    ///
    /// The message is `key=value` pairs for every key listed in
    /// `verify_key`, sorted by key and joined with `&`.
    pub fn sign_ipn(&self, fields: &HashMap<String, String>) -> String {
        signature::sign_hex(self.config.store_pass.as_bytes(), &signed_message(fields))
    }
}

fn signed_message(fields: &HashMap<String, String>) -> Vec<u8> {
    let keys = fields.get("verify_key").map(String::as_str).unwrap_or("");
    let selected: BTreeMap<&str, &str> = keys
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| (k, fields.get(k).map(String::as_str).unwrap_or("")))
        .collect();

    selected
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
        .into_bytes()
}

/// Parses an IPN body, which arrives either form-encoded or as JSON.
fn parse_fields(body: &[u8]) -> Result<HashMap<String, String>, GatewayError> {
    let trimmed = body.trim_ascii_start();
    if trimmed.starts_with(b"{") {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(trimmed)
            .map_err(|e| GatewayError::MalformedCallback(e.to_string()))?;
        return Ok(object
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect());
    }

    Ok(url::form_urlencoded::parse(body).into_owned().collect())
}

fn required<'a>(fields: &'a HashMap<String, String>, key: &str) -> Result<&'a str, GatewayError> {
    fields
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::MalformedCallback(format!("missing {key}")))
}

fn or_unknown(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

#[async_trait]
impl PaymentGateway for SslcommerzGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Sslcommerz
    }

    #[tracing::instrument(skip(self, request), fields(order_id = %request.order.id))]
    async fn initiate(&self, request: CheckoutRequest<'_>) -> Result<Initiation, GatewayError> {
        let currency = request
            .currency
            .unwrap_or(self.config.currency.as_str())
            .to_uppercase();
        let amount = self.exchange.convert(request.order.total, &currency).await?;

        let customer = request.customer;
        let form: Vec<(&str, String)> = vec![
            ("store_id", self.config.store_id.clone()),
            ("store_passwd", self.config.store_pass.clone()),
            ("total_amount", amount.to_string()),
            ("currency", currency),
            ("tran_id", request.order.id.to_string()),
            ("success_url", self.config.callback_url("/payments/success/")),
            ("fail_url", self.config.callback_url("/payments/fail/")),
            ("cancel_url", self.config.callback_url("/payments/cancel/")),
            ("ipn_url", self.config.callback_url("/payments/ipn/")),
            ("cus_name", or_unknown(customer.map(|c| c.full_name.as_str()))),
            ("cus_email", or_unknown(customer.map(|c| c.email.as_str()))),
            ("cus_phone", or_unknown(customer.map(|c| c.phone.as_str()))),
            ("cus_add1", or_unknown(customer.map(|c| c.address.as_str()))),
            ("cus_city", or_unknown(customer.and_then(|c| c.city.as_deref()))),
            (
                "cus_postcode",
                or_unknown(customer.and_then(|c| c.postcode.as_deref())),
            ),
            (
                "cus_country",
                or_unknown(customer.and_then(|c| c.country.as_deref())),
            ),
            ("shipping_method", "NO".to_string()),
            ("num_of_item", request.cart.item_count().to_string()),
            ("product_name", "Cart Items".to_string()),
            ("product_category", "Grocery".to_string()),
            ("product_profile", "physical-goods".to_string()),
        ];

        let url = format!(
            "{}/gwprocess/v4/api.php",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self.client.post(&url).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let session: SessionResponse = response.json().await?;
        match session {
            SessionResponse {
                status,
                gateway_page_url: Some(payment_url),
                ..
            } if status == "SUCCESS" => Ok(Initiation::Redirect { payment_url }),
            SessionResponse { failedreason, .. } => Err(GatewayError::Rejected(
                failedreason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "Payment initiation failed".to_string()),
            )),
        }
    }

    fn authenticate(&self, notification: &Notification) -> Result<CallbackEvent, GatewayError> {
        let fields = parse_fields(&notification.body)?;

        let verify_sign = required(&fields, "verify_sign")?;
        required(&fields, "verify_key")?;
        if !signature::verify_hex(
            self.config.store_pass.as_bytes(),
            &signed_message(&fields),
            verify_sign,
        ) {
            return Err(GatewayError::InvalidSignature);
        }

        let order_id: OrderId = required(&fields, "tran_id")?
            .parse()
            .map_err(|_| GatewayError::MalformedCallback("tran_id is not an order id".into()))?;
        let val_id = required(&fields, "val_id")?;

        Ok(CallbackEvent::Payment(CallbackPayload {
            order_id,
            reference: val_id.to_string(),
            event_id: val_id.to_string(),
        }))
    }

    #[tracing::instrument(skip(self), fields(order_id = %payload.order_id))]
    async fn validate(&self, payload: &CallbackPayload) -> Result<Validation, GatewayError> {
        let url = format!(
            "{}/validator/api/validationserverAPI.php",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[
                ("val_id", payload.reference.as_str()),
                ("store_id", self.config.store_id.as_str()),
                ("store_passwd", self.config.store_pass.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let validation: ValidationResponse = response.json().await?;
        if !VALID_STATUSES.contains(&validation.status.as_str()) {
            return Ok(Validation::rejected("Invalid payment"));
        }
        if let Some(tran_id) = validation.tran_id.as_deref()
            && tran_id != payload.order_id.to_string()
        {
            return Ok(Validation::rejected("Transaction does not match order"));
        }

        Ok(Validation::accepted(Some(payload.event_id.clone())))
    }
}

#[cfg(test)]
mod tests {
    use domain::{Cart, Customer, Money, Order, UserId};
    use http::HeaderMap;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::exchange::ExchangeRateConfig;

    fn gateway(server: &MockServer) -> SslcommerzGateway {
        let mut config =
            HostedRedirectConfig::new("store", "secret", true, "https://shop.example");
        config.api_base = server.uri();
        let exchange = ExchangeRates::new(
            reqwest::Client::new(),
            ExchangeRateConfig::new(server.uri(), "BDT"),
        );
        SslcommerzGateway::new(config, reqwest::Client::new(), Arc::new(exchange))
    }

    fn ipn_fields(gateway: &SslcommerzGateway, order_id: OrderId) -> HashMap<String, String> {
        let mut fields: HashMap<String, String> = [
            ("tran_id", order_id.to_string()),
            ("val_id", "VAL123".to_string()),
            ("amount", "20.00".to_string()),
            ("status", "VALID".to_string()),
            ("verify_key", "amount,status,tran_id,val_id".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let sign = gateway.sign_ipn(&fields);
        fields.insert("verify_sign".to_string(), sign);
        fields
    }

    fn form_body(fields: &HashMap<String, String>) -> Vec<u8> {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_initiate_returns_gateway_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gwprocess/v4/api.php"))
            .and(body_string_contains("total_amount=20.00"))
            .and(body_string_contains("currency=BDT"))
            .and(body_string_contains("cus_city=Unknown"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "SUCCESS",
                "GatewayPageURL": "https://sandbox.sslcommerz.com/pay/abc"
            })))
            .mount(&server)
            .await;

        let user = UserId::new();
        let order = Order::pending(user, Money::from_cents(2000), PaymentMethod::Sslcommerz);
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
            Initiation::Redirect {
                payment_url: "https://sandbox.sslcommerz.com/pay/abc".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_initiate_surfaces_failed_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "FAILED",
                "failedreason": "Store Credential Error"
            })))
            .mount(&server)
            .await;

        let user = UserId::new();
        let order = Order::pending(user, Money::from_cents(2000), PaymentMethod::Sslcommerz);
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
            Err(GatewayError::Rejected(reason)) => assert_eq!(reason, "Store Credential Error"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_authenticate_accepts_signed_form_ipn() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);
        let order_id = OrderId::new();
        let fields = ipn_fields(&gateway, order_id);

        let event = gateway
            .authenticate(&Notification::new(HeaderMap::new(), form_body(&fields)))
            .unwrap();
        assert_eq!(
            event,
            CallbackEvent::Payment(CallbackPayload {
                order_id,
                reference: "VAL123".to_string(),
                event_id: "VAL123".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_authenticate_accepts_json_ipn() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);
        let fields = ipn_fields(&gateway, OrderId::new());
        let body = serde_json::to_vec(&fields).unwrap();

        assert!(
            gateway
                .authenticate(&Notification::new(HeaderMap::new(), body))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_authenticate_rejects_tampered_ipn() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);
        let mut fields = ipn_fields(&gateway, OrderId::new());
        fields.insert("amount".to_string(), "1.00".to_string());

        let result = gateway.authenticate(&Notification::new(HeaderMap::new(), form_body(&fields)));
        assert!(matches!(result, Err(GatewayError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_validate_checks_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/validator/api/validationserverAPI.php"))
            .and(query_param("val_id", "VAL123"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "VALID"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/validator/api/validationserverAPI.php"))
            .and(query_param("val_id", "VAL999"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "INVALID_TRANSACTION"
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        let order_id = OrderId::new();
        let valid = gateway
            .validate(&CallbackPayload {
                order_id,
                reference: "VAL123".to_string(),
                event_id: "VAL123".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(valid, Validation::accepted(Some("VAL123".to_string())));

        let invalid = gateway
            .validate(&CallbackPayload {
                order_id,
                reference: "VAL999".to_string(),
                event_id: "VAL999".to_string(),
            })
            .await
            .unwrap();
        assert!(!invalid.accepted);
    }
}
