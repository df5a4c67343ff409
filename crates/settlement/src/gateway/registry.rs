//! Maps payment method names to gateway implementations.

use std::collections::HashMap;
use std::sync::Arc;

use domain::PaymentMethod;

use super::PaymentGateway;
use crate::error::SettlementError;

/// Registered gateways, built once at startup and read-only afterwards.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a gateway under its own method, replacing any previous one.
    pub fn with(mut self, gateway: impl PaymentGateway + 'static) -> Self {
        self.register(Arc::new(gateway));
        self
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.method(), gateway);
    }

    /// Returns the gateway for a method, if one is configured.
    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, SettlementError> {
        self.gateways
            .get(&method)
            .cloned()
            .ok_or_else(|| SettlementError::UnknownPaymentMethod(method.to_string()))
    }

    /// Parses a method name and returns its gateway.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<(PaymentMethod, Arc<dyn PaymentGateway>), SettlementError> {
        let method: PaymentMethod = name.parse()?;
        Ok((method, self.get(method)?))
    }

    /// Configured methods, in listing order.
    pub fn methods(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|m| self.gateways.contains_key(m))
            .collect()
    }
}
