//! Checkout initiation and payment settlement.
//!
//! A checkout freezes the cart total into a pending order and hands off to a
//! payment gateway. When the gateway's callback is verified and the provider
//! confirms the payment, the engine settles the order in one transaction:
//! 1. Lock the order and every product in the cart, in ascending id order
//! 2. Re-validate stock against the locked rows
//! 3. Mark the order paid, write its lines and decrement stock
//! 4. Debit the internal balance when paying with it
//! 5. Empty the cart
//!
//! If any step fails the transaction is dropped and nothing is written.

pub mod engine;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod ledger;

pub use engine::{Checkout, NotificationOutcome, SettlementEngine};
pub use error::{Result, SettlementError};
pub use exchange::{ExchangeRateConfig, ExchangeRates};
pub use gateway::{
    BalanceGateway, CallbackEvent, CallbackPayload, CheckoutRequest, GatewayError,
    GatewayRegistry, HostedRedirectConfig, Initiation, Notification, PaymentGateway,
    PaymentIntentConfig, SslcommerzGateway, StripeGateway, Validation,
};
pub use ledger::{InventoryLedger, StockDecrement};
