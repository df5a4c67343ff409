use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CartItemId, OrderId, ProductId, UserId};
use domain::{Cart, CartItem, Customer, Money, Order, OrderLine, OrderStatus, Product};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{CartEntry, CommerceStore, StoreTransaction},
};

#[derive(Debug, Clone)]
struct StoredCartItem {
    id: CartItemId,
    product_id: ProductId,
    quantity: u32,
}

#[derive(Debug, Clone, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    customers: HashMap<UserId, Customer>,
    carts: HashMap<UserId, Vec<StoredCartItem>>,
    orders: HashMap<OrderId, Order>,
}

impl State {
    fn cart_item(&self, item: &StoredCartItem) -> Result<CartItem> {
        let product = self
            .products
            .get(&item.product_id)
            .cloned()
            .ok_or(StoreError::ProductNotFound(item.product_id))?;

        Ok(CartItem {
            id: item.id,
            product,
            quantity: item.quantity,
        })
    }
}

/// In-memory store implementation for tests and local runs.
///
/// A transaction takes the whole state under a write lock and works on a
/// copy, so transactions are fully serialized and a dropped transaction
/// leaves no trace.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a product record.
    pub async fn put_product(&self, product: Product) {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product);
    }

    /// Inserts or replaces a customer profile.
    pub async fn put_customer(&self, customer: Customer) {
        self.state
            .write()
            .await
            .customers
            .insert(customer.user_id, customer);
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl CommerceStore for InMemoryStore {
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&product_id).cloned())
    }

    async fn get_customer(&self, user_id: UserId) -> Result<Option<Customer>> {
        Ok(self.state.read().await.customers.get(&user_id).cloned())
    }

    async fn get_cart(&self, user_id: UserId) -> Result<Cart> {
        let mut state = self.state.write().await;
        let stored = state.carts.entry(user_id).or_default().clone();

        let items = stored
            .iter()
            .map(|item| state.cart_item(item))
            .collect::<Result<Vec<_>>>()?;

        Ok(Cart { user_id, items })
    }

    async fn put_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&product_id) {
            return Err(StoreError::ProductNotFound(product_id));
        }

        let cart = state.carts.entry(user_id).or_default();
        let stored = match cart.iter_mut().find(|i| i.product_id == product_id) {
            Some(existing) => {
                existing.quantity = quantity;
                existing.clone()
            }
            None => {
                let item = StoredCartItem {
                    id: CartItemId::new(),
                    product_id,
                    quantity,
                };
                cart.push(item.clone());
                item
            }
        };

        state.cart_item(&stored)
    }

    async fn update_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>> {
        let mut state = self.state.write().await;
        let cart = state.carts.entry(user_id).or_default();
        let position = cart
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(StoreError::CartItemNotFound(item_id))?;

        if quantity == 0 {
            cart.remove(position);
            return Ok(None);
        }

        cart[position].quantity = quantity;
        let stored = cart[position].clone();
        state.cart_item(&stored).map(Some)
    }

    async fn remove_cart_product(&self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        let mut state = self.state.write().await;
        let cart = state.carts.entry(user_id).or_default();
        let before = cart.len();
        cart.retain(|i| i.product_id != product_id);
        Ok(cart.len() != before)
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.state
            .write()
            .await
            .orders
            .insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition_order(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&order_id) {
            Some(order) if order.status == from => Ok(order.transition(to).is_ok()),
            _ => Ok(false),
        }
    }

    async fn find_order_by_payment_event(
        &self,
        payment_event_id: &str,
    ) -> Result<Option<OrderId>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.payment_event_id.as_deref() == Some(payment_event_id))
            .map(|o| o.id))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().write_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedRwLockWriteGuard<State>,
    working: State,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn cart_entries(&mut self, user_id: UserId) -> Result<Vec<CartEntry>> {
        Ok(self
            .working
            .carts
            .get(&user_id)
            .map(|items| {
                items
                    .iter()
                    .map(|i| CartEntry {
                        product_id: i.product_id,
                        quantity: i.quantity,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn lock_products(&mut self, product_ids: &[ProductId]) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = product_ids
            .iter()
            .filter_map(|id| self.working.products.get(id).cloned())
            .collect();
        products.sort_by_key(|p| p.id);
        products.dedup_by_key(|p| p.id);
        Ok(products)
    }

    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<bool> {
        match self.working.products.get_mut(&product_id) {
            Some(product) if product.stock >= quantity => {
                product.stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn debit_balance(&mut self, user_id: UserId, amount: Money) -> Result<bool> {
        match self.working.customers.get_mut(&user_id) {
            Some(customer) if customer.can_afford(amount) => {
                customer.balance -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_paid(&mut self, order_id: OrderId, payment_event_id: Option<&str>) -> Result<()> {
        if let Some(event_id) = payment_event_id
            && self
                .working
                .orders
                .values()
                .any(|o| o.id != order_id && o.payment_event_id.as_deref() == Some(event_id))
        {
            return Err(StoreError::DuplicatePaymentEvent(event_id.to_string()));
        }

        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.status = OrderStatus::Paid;
        order.payment_event_id = payment_event_id.map(str::to_string);
        Ok(())
    }

    async fn insert_order_line(&mut self, order_id: OrderId, line: &OrderLine) -> Result<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.lines.push(line.clone());
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        let cart = self.working.carts.entry(user_id).or_default();
        let removed = cart.len() as u64;
        cart.clear();
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_product(stock: u32) -> (InMemoryStore, Product) {
        let store = InMemoryStore::new();
        let product = Product::new("Rice", Money::from_cents(1000), stock);
        store.put_product(product.clone()).await;
        (store, product)
    }

    #[tokio::test]
    async fn cart_is_created_lazily_and_empty() {
        let store = InMemoryStore::new();
        let cart = store.get_cart(UserId::new()).await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn put_cart_item_keeps_one_item_per_product() {
        let (store, product) = store_with_product(10).await;
        let user = UserId::new();

        let first = store.put_cart_item(user, product.id, 2).await.unwrap();
        let second = store.put_cart_item(user, product.id, 5).await.unwrap();

        assert_eq!(first.id, second.id);
        let cart = store.get_cart(user).await.unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].quantity, 5);
    }

    #[tokio::test]
    async fn put_cart_item_rejects_unknown_product() {
        let store = InMemoryStore::new();
        let result = store.put_cart_item(UserId::new(), ProductId::new(), 1).await;
        assert!(matches!(result, Err(StoreError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn update_cart_item_to_zero_deletes() {
        let (store, product) = store_with_product(10).await;
        let user = UserId::new();
        let item = store.put_cart_item(user, product.id, 2).await.unwrap();

        let updated = store.update_cart_item(user, item.id, 0).await.unwrap();
        assert!(updated.is_none());
        assert!(store.get_cart(user).await.unwrap().is_empty());

        let missing = store.update_cart_item(user, item.id, 1).await;
        assert!(matches!(missing, Err(StoreError::CartItemNotFound(_))));
    }

    #[tokio::test]
    async fn transition_order_is_conditional() {
        let store = InMemoryStore::new();
        let order = Order::pending(UserId::new(), Money::from_cents(100), domain::PaymentMethod::Stripe);
        store.insert_order(&order).await.unwrap();

        assert!(
            store
                .transition_order(order.id, OrderStatus::Pending, OrderStatus::Failed)
                .await
                .unwrap()
        );
        assert!(
            !store
                .transition_order(order.id, OrderStatus::Pending, OrderStatus::Paid)
                .await
                .unwrap()
        );
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let (store, product) = store_with_product(3).await;

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.decrement_stock(product.id, 2).await.unwrap());
        }

        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 3);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let (store, product) = store_with_product(3).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_stock(product.id, 2).await.unwrap());
        assert!(!tx.decrement_stock(product.id, 2).await.unwrap());
        tx.commit().await.unwrap();

        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 1);
    }

    #[tokio::test]
    async fn lock_products_returns_sorted() {
        let store = InMemoryStore::new();
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let product = Product::new(name, Money::from_cents(1), 1);
            ids.push(product.id);
            store.put_product(product).await;
        }
        ids.reverse();

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_products(&ids).await.unwrap();
        assert_eq!(locked.len(), 4);
        assert!(locked.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn mark_paid_rejects_duplicate_event() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let first = Order::pending(user, Money::from_cents(100), domain::PaymentMethod::Stripe);
        let second = Order::pending(user, Money::from_cents(100), domain::PaymentMethod::Stripe);
        store.insert_order(&first).await.unwrap();
        store.insert_order(&second).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.mark_paid(first.id, Some("evt_1")).await.unwrap();
        let result = tx.mark_paid(second.id, Some("evt_1")).await;
        assert!(matches!(result, Err(StoreError::DuplicatePaymentEvent(_))));
        tx.commit().await.unwrap();

        assert_eq!(
            store.find_order_by_payment_event("evt_1").await.unwrap(),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn debit_balance_is_conditional() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store
            .put_customer(
                Customer::new(user, "Test User", "test@example.com")
                    .with_balance(Money::from_cents(500)),
            )
            .await;

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.debit_balance(user, Money::from_cents(501)).await.unwrap());
        assert!(tx.debit_balance(user, Money::from_cents(500)).await.unwrap());
        tx.commit().await.unwrap();

        let customer = store.get_customer(user).await.unwrap().unwrap();
        assert!(customer.balance.is_zero());
    }
}
