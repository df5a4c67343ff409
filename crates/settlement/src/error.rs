//! Settlement error types.

use common::OrderId;
use domain::{OrderError, OrderStatus, UnknownPaymentMethod};
use store::StoreError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur while initiating or settling a checkout.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The cart has no items.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line asks for more units than are on hand.
    #[error("Only {available} units of {product_name} available")]
    InsufficientStock {
        product_name: String,
        available: u32,
    },

    /// The customer's internal balance does not cover the total.
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// The payment method is unknown or not configured.
    #[error("Invalid payment method: {0}")]
    UnknownPaymentMethod(String),

    /// The provider could not be reached or asked us to back off.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The provider refused the request.
    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    /// A provider callback failed signature verification or could not be parsed.
    #[error("Invalid callback signature")]
    InvalidCallbackSignature,

    /// The order does not exist (or is not visible to the caller).
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A successful payment arrived for an order that already failed.
    #[error("Order {0} has already failed")]
    AlreadyFailed(OrderId),

    /// The provider reported that the payment did not go through.
    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    /// The order is not in a state that allows the requested change.
    #[error("Order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A cart line could not be turned into an order line.
    #[error("Invalid order line: {0}")]
    InvalidLine(String),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<UnknownPaymentMethod> for SettlementError {
    fn from(err: UnknownPaymentMethod) -> Self {
        SettlementError::UnknownPaymentMethod(err.0)
    }
}

impl From<GatewayError> for SettlementError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(reason) => SettlementError::GatewayUnavailable(reason),
            GatewayError::Rejected(reason) => SettlementError::GatewayRejected(reason),
            GatewayError::InvalidSignature | GatewayError::MalformedCallback(_) => {
                SettlementError::InvalidCallbackSignature
            }
            GatewayError::InsufficientBalance => SettlementError::InsufficientBalance,
        }
    }
}

impl From<OrderError> for SettlementError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { from, to } => {
                SettlementError::InvalidTransition { from, to }
            }
            OrderError::InvalidQuantity { .. } => SettlementError::InvalidLine(err.to_string()),
        }
    }
}

impl From<domain::StockShortage> for SettlementError {
    fn from(shortage: domain::StockShortage) -> Self {
        SettlementError::InsufficientStock {
            product_name: shortage.product_name,
            available: shortage.available,
        }
    }
}

impl SettlementError {
    /// Short label used for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            SettlementError::EmptyCart => "empty_cart",
            SettlementError::InsufficientStock { .. } => "insufficient_stock",
            SettlementError::InsufficientBalance => "insufficient_balance",
            SettlementError::UnknownPaymentMethod(_) => "unknown_payment_method",
            SettlementError::GatewayUnavailable(_) => "gateway_unavailable",
            SettlementError::GatewayRejected(_) => "gateway_rejected",
            SettlementError::InvalidCallbackSignature => "invalid_signature",
            SettlementError::OrderNotFound(_) => "order_not_found",
            SettlementError::AlreadyFailed(_) => "already_failed",
            SettlementError::PaymentRejected(_) => "payment_rejected",
            SettlementError::InvalidTransition { .. } => "invalid_transition",
            SettlementError::InvalidLine(_) => "invalid_line",
            SettlementError::Store(_) => "store",
        }
    }
}

/// Convenience type alias for settlement results.
pub type Result<T> = std::result::Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_message_names_product() {
        let err = SettlementError::InsufficientStock {
            product_name: "Rice".to_string(),
            available: 1,
        };
        assert_eq!(err.to_string(), "Only 1 units of Rice available");
        assert_eq!(err.reason(), "insufficient_stock");
    }

    #[test]
    fn test_gateway_errors_map_by_kind() {
        assert!(matches!(
            SettlementError::from(GatewayError::Unavailable("timeout".into())),
            SettlementError::GatewayUnavailable(_)
        ));
        assert!(matches!(
            SettlementError::from(GatewayError::MalformedCallback("no tran_id".into())),
            SettlementError::InvalidCallbackSignature
        ));
    }

    #[test]
    fn test_order_errors_map_by_kind() {
        let err = SettlementError::from(OrderError::InvalidQuantity { quantity: 0 });
        assert_eq!(err.reason(), "invalid_line");
        assert!(matches!(
            SettlementError::from(OrderError::InvalidTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Failed,
            }),
            SettlementError::InvalidTransition { .. }
        ));
    }
}
