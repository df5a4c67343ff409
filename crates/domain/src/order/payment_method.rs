use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an order is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Hosted redirect: the customer pays on the provider's page and the
    /// provider reports back through an IPN.
    Sslcommerz,

    /// Tokenized intent: the client confirms a payment intent with the
    /// provider and a signed webhook reports the outcome.
    Stripe,

    /// Internal balance held on the customer profile, settled synchronously.
    Balance,
}

/// Returned when a payment method name is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid payment method: {0}")]
pub struct UnknownPaymentMethod(pub String);

impl PaymentMethod {
    /// All methods, in the order they are listed to clients.
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::Sslcommerz,
        PaymentMethod::Stripe,
        PaymentMethod::Balance,
    ];

    /// Returns the method name as stored and sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Sslcommerz => "sslcommerz",
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Balance => "balance",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = UnknownPaymentMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownPaymentMethod(s.to_string()))
    }
}
