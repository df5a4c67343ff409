//! Records owned by the catalog and identity collaborators.
//!
//! Only the fields the checkout path reads are modelled here.

use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::Money;

/// Inventory-relevant view of a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    /// Units on hand. Only decremented by a confirmed settlement.
    pub stock: u32,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            stock,
        }
    }

    /// Returns true if `quantity` units can currently be supplied.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        quantity <= self.stock
    }
}

/// Customer profile, as far as payment providers and the balance ledger care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub user_id: UserId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    /// Spendable internal balance.
    pub balance: Money,
}

impl Customer {
    /// Creates a profile with only the mandatory fields set.
    pub fn new(user_id: UserId, full_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id,
            full_name: full_name.into(),
            email: email.into(),
            phone: String::new(),
            address: String::new(),
            city: None,
            postcode: None,
            country: None,
            balance: Money::zero(),
        }
    }

    pub fn with_balance(mut self, balance: Money) -> Self {
        self.balance = balance;
        self
    }

    /// Returns true if the balance covers `amount`.
    pub fn can_afford(&self, amount: Money) -> bool {
        self.balance >= amount
    }
}
