use async_trait::async_trait;
use common::{CartItemId, OrderId, ProductId, UserId};
use domain::{Cart, CartItem, Customer, Money, Order, OrderLine, OrderStatus, Product};

use crate::Result;

/// A product and quantity held in a cart, as read inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartEntry {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Core trait for store implementations.
///
/// Methods on the store itself run in their own short transaction. Anything
/// that must be all-or-nothing goes through [`CommerceStore::begin`].
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CommerceStore: Send + Sync {
    /// Retrieves a product by id.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Retrieves the customer profile of a user.
    async fn get_customer(&self, user_id: UserId) -> Result<Option<Customer>>;

    /// Returns the user's cart joined with current product records.
    ///
    /// The cart is created on first access.
    async fn get_cart(&self, user_id: UserId) -> Result<Cart>;

    /// Sets the quantity of a product in the user's cart, inserting the item
    /// if it is not there yet. `quantity` must be positive.
    async fn put_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem>;

    /// Updates a cart item by id. A zero quantity deletes the item and
    /// returns `None`.
    ///
    /// Fails with `CartItemNotFound` if the item is not in the user's cart.
    async fn update_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>>;

    /// Removes a product from the user's cart. Returns false if it was not there.
    async fn remove_cart_product(&self, user_id: UserId, product_id: ProductId) -> Result<bool>;

    /// Persists a new order. Lines are written by the settlement transaction.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Retrieves an order with its lines.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Moves an order from `from` to `to` if and only if it is currently in `from`.
    ///
    /// Returns false if the order was not in `from` (or does not exist).
    async fn transition_order(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool>;

    /// Finds the order that recorded a provider event id, if any.
    async fn find_order_by_payment_event(&self, payment_event_id: &str)
    -> Result<Option<OrderId>>;

    /// Opens a transaction. Dropping it without calling `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A unit of work with row-level exclusive locks held until commit.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Loads an order and locks its row.
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    /// Reads the user's cart contents in insertion order.
    async fn cart_entries(&mut self, user_id: UserId) -> Result<Vec<CartEntry>>;

    /// Loads and locks the given products, returned in ascending id order.
    ///
    /// Locks are always taken in ascending id order so that two settlements
    /// touching the same products cannot deadlock. Missing ids are skipped.
    async fn lock_products(&mut self, product_ids: &[ProductId]) -> Result<Vec<Product>>;

    /// Decrements stock if at least `quantity` units are on hand.
    ///
    /// Returns false (and changes nothing) otherwise.
    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<bool>;

    /// Debits the user's balance if it covers `amount`.
    ///
    /// Returns false (and changes nothing) otherwise.
    async fn debit_balance(&mut self, user_id: UserId, amount: Money) -> Result<bool>;

    /// Marks a locked order paid and records the provider event id.
    ///
    /// Fails with `DuplicatePaymentEvent` if another order holds the id.
    async fn mark_paid(&mut self, order_id: OrderId, payment_event_id: Option<&str>) -> Result<()>;

    /// Appends a line to an order.
    async fn insert_order_line(&mut self, order_id: OrderId, line: &OrderLine) -> Result<()>;

    /// Deletes every item in the user's cart. The cart itself remains.
    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64>;

    /// Commits every change made through this transaction.
    async fn commit(self: Box<Self>) -> Result<()>;
}
