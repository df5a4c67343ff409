//! Order aggregate and related types.

mod aggregate;
mod payment_method;
mod state;

pub use aggregate::{Order, OrderLine};
pub use payment_method::{PaymentMethod, UnknownPaymentMethod};
pub use state::OrderStatus;

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Order is not in a state that allows the requested transition.
    #[error("Invalid state transition: cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },
}
