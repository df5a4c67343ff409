//! Domain layer for the checkout backend.
//!
//! This crate provides the core domain types including:
//! - `Money`, an integer minor-unit amount
//! - Order aggregate with its status state machine
//! - Cart snapshot with derived totals and advisory stock checks
//! - Product and customer records read from the catalog and identity layers

pub mod cart;
pub mod catalog;
pub mod money;
pub mod order;

pub use cart::{Cart, CartItem, StockShortage};
pub use catalog::{Customer, Product};
pub use common::{CartItemId, OrderId, ProductId, UserId};
pub use money::Money;
pub use order::{Order, OrderError, OrderLine, OrderStatus, PaymentMethod, UnknownPaymentMethod};
