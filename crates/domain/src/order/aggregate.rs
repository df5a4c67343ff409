//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus, PaymentMethod};
use crate::Money;

/// A purchased line, with the price frozen at settlement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The product identifier.
    pub product_id: ProductId,

    /// Human-readable product name.
    pub product_name: String,

    /// Quantity purchased.
    pub quantity: u32,

    /// Price per unit when the order was paid.
    pub unit_price: Money,
}

impl OrderLine {
    /// Creates a new order line.
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Self, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }

        Ok(Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
        })
    }

    /// Returns the total price for this line (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Order aggregate root.
///
/// Orders are created `Pending` at checkout and only ever move forward to one
/// terminal state. They are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// Provider idempotency token recorded when the order is paid.
    pub payment_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Empty until the order is paid.
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Creates a new pending order for a frozen cart total.
    pub fn pending(user_id: UserId, total: Money, payment_method: PaymentMethod) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            total,
            status: OrderStatus::Pending,
            payment_method,
            payment_event_id: None,
            created_at: Utc::now(),
            lines: Vec::new(),
        }
    }

    /// Returns true if the order belongs to `user_id`.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Returns the sum of the line totals.
    pub fn lines_total(&self) -> Money {
        self.lines.iter().map(OrderLine::total_price).sum()
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validates and applies a status transition.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        Ok(())
    }

    /// Marks the order paid, recording its lines and the provider event id.
    pub fn mark_paid(
        &mut self,
        lines: Vec<OrderLine>,
        payment_event_id: Option<String>,
    ) -> Result<(), OrderError> {
        self.transition(OrderStatus::Paid)?;
        self.lines = lines;
        self.payment_event_id = payment_event_id;
        Ok(())
    }

    /// Marks the order failed.
    pub fn mark_failed(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Failed)
    }

    /// Cancels the order.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Cancelled)
    }
}
