//! Internal balance gateway.
//!
//! No provider is involved. Initiation only checks that the balance covers
//! the total; the debit itself happens inside the settlement transaction.

use async_trait::async_trait;
use domain::PaymentMethod;

use super::{
    CallbackEvent, CallbackPayload, CheckoutRequest, GatewayError, Initiation, Notification,
    PaymentGateway, Validation,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceGateway;

impl BalanceGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for BalanceGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Balance
    }

    async fn initiate(&self, request: CheckoutRequest<'_>) -> Result<Initiation, GatewayError> {
        match request.customer {
            Some(customer) if customer.can_afford(request.order.total) => Ok(Initiation::Immediate),
            _ => Err(GatewayError::InsufficientBalance),
        }
    }

    fn authenticate(&self, _notification: &Notification) -> Result<CallbackEvent, GatewayError> {
        Err(GatewayError::MalformedCallback(
            "balance payments have no callbacks".to_string(),
        ))
    }

    async fn validate(&self, _payload: &CallbackPayload) -> Result<Validation, GatewayError> {
        Ok(Validation::accepted(None))
    }
}
