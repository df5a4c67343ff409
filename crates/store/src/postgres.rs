use std::collections::HashMap;

use async_trait::async_trait;
use common::{CartItemId, OrderId, ProductId, UserId};
use domain::{
    Cart, CartItem, Customer, Money, Order, OrderLine, OrderStatus, PaymentMethod, Product,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{CartEntry, CommerceStore, StoreTransaction},
};

const ORDER_COLUMNS: &str =
    "id, user_id, total_cents, status, payment_method, payment_event_id, created_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a product record.
    pub async fn put_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, price_cents = EXCLUDED.price_cents, stock = EXCLUDED.stock
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(to_db_quantity(product.stock)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts or replaces a customer profile.
    pub async fn put_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers
                (user_id, full_name, email, phone, address, city, postcode, country, balance_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                address = EXCLUDED.address,
                city = EXCLUDED.city,
                postcode = EXCLUDED.postcode,
                country = EXCLUDED.country,
                balance_cents = EXCLUDED.balance_cents
            "#,
        )
        .bind(customer.user_id.as_uuid())
        .bind(&customer.full_name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.address)
        .bind(&customer.city)
        .bind(&customer.postcode)
        .bind(&customer.country)
        .bind(customer.balance.cents())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_cart(&self, user_id: UserId) -> Result<()> {
        sqlx::query("INSERT INTO carts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cart_item_by_id(&self, item_id: Uuid) -> Result<CartItem> {
        let row = sqlx::query(
            r#"
            SELECT ci.id AS item_id, ci.quantity, p.id, p.name, p.price_cents, p.stock
            FROM cart_items ci
            JOIN products p ON p.id = ci.product_id
            WHERE ci.id = $1
            "#,
        )
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;

        row_to_cart_item(&row)
    }

    async fn attach_lines(&self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, price_cents
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            lines.entry(order_id).or_default().push(row_to_line(row)?);
        }

        for order in orders.iter_mut() {
            order.lines = lines.remove(&order.id.as_uuid()).unwrap_or_default();
        }
        Ok(())
    }
}

fn to_db_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::CorruptRow(format!("quantity out of range: {quantity}")))
}

fn from_db_quantity(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::CorruptRow(format!("negative quantity: {value}")))
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock: from_db_quantity(row.try_get("stock")?)?,
    })
}

fn row_to_cart_item(row: &PgRow) -> Result<CartItem> {
    Ok(CartItem {
        id: CartItemId::from_uuid(row.try_get::<Uuid, _>("item_id")?),
        product: row_to_product(row)?,
        quantity: from_db_quantity(row.try_get("quantity")?)?,
    })
}

fn row_to_customer(row: &PgRow) -> Result<Customer> {
    Ok(Customer {
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        postcode: row.try_get("postcode")?,
        country: row.try_get("country")?,
        balance: Money::from_cents(row.try_get("balance_cents")?),
    })
}

fn row_to_line(row: &PgRow) -> Result<OrderLine> {
    OrderLine::new(
        ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        row.try_get::<String, _>("product_name")?,
        from_db_quantity(row.try_get("quantity")?)?,
        Money::from_cents(row.try_get("price_cents")?),
    )
    .map_err(|e| StoreError::CorruptRow(e.to_string()))
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let method: String = row.try_get("payment_method")?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        total: Money::from_cents(row.try_get("total_cents")?),
        status: status.parse::<OrderStatus>().map_err(StoreError::CorruptRow)?,
        payment_method: method
            .parse::<PaymentMethod>()
            .map_err(|e| StoreError::CorruptRow(e.to_string()))?,
        payment_event_id: row.try_get("payment_event_id")?,
        created_at: row.try_get("created_at")?,
        lines: Vec::new(),
    })
}

#[async_trait]
impl CommerceStore for PostgresStore {
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price_cents, stock FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn get_customer(&self, user_id: UserId) -> Result<Option<Customer>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, full_name, email, phone, address, city, postcode, country, balance_cents
            FROM customers
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_customer).transpose()
    }

    async fn get_cart(&self, user_id: UserId) -> Result<Cart> {
        self.ensure_cart(user_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT ci.id AS item_id, ci.quantity, p.id, p.name, p.price_cents, p.stock
            FROM cart_items ci
            JOIN products p ON p.id = ci.product_id
            WHERE ci.user_id = $1
            ORDER BY ci.added_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(row_to_cart_item)
            .collect::<Result<Vec<_>>>()?;

        Ok(Cart { user_id, items })
    }

    async fn put_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        if self.get_product(product_id).await?.is_none() {
            return Err(StoreError::ProductNotFound(product_id));
        }
        self.ensure_cart(user_id).await?;

        let item_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO cart_items (id, user_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT unique_cart_product
            DO UPDATE SET quantity = EXCLUDED.quantity
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(to_db_quantity(quantity)?)
        .fetch_one(&self.pool)
        .await?;

        self.cart_item_by_id(item_id).await
    }

    async fn update_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>> {
        if quantity == 0 {
            let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2")
                .bind(item_id.as_uuid())
                .bind(user_id.as_uuid())
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::CartItemNotFound(item_id));
            }
            return Ok(None);
        }

        let result =
            sqlx::query("UPDATE cart_items SET quantity = $3 WHERE id = $1 AND user_id = $2")
                .bind(item_id.as_uuid())
                .bind(user_id.as_uuid())
                .bind(to_db_quantity(quantity)?)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CartItemNotFound(item_id));
        }
        self.cart_item_by_id(item_id.as_uuid()).await.map(Some)
    }

    async fn remove_cart_product(&self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, status, payment_method, payment_event_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.total.cents())
        .bind(order.status.as_str())
        .bind(order.payment_method.as_str())
        .bind(&order.payment_event_id)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut orders = [row_to_order(&row)?];
        self.attach_lines(&mut orders).await?;
        let [order] = orders;
        Ok(Some(order))
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
        self.attach_lines(&mut orders).await?;
        Ok(orders)
    }

    async fn transition_order(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(order_id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_order_by_payment_event(
        &self,
        payment_event_id: &str,
    ) -> Result<Option<OrderId>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM orders WHERE payment_event_id = $1")
                .bind(payment_event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(id.map(OrderId::from_uuid))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn cart_entries(&mut self, user_id: UserId) -> Result<Vec<CartEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity
            FROM cart_items
            WHERE user_id = $1
            ORDER BY added_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> Result<CartEntry> {
                Ok(CartEntry {
                    product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                    quantity: from_db_quantity(row.try_get("quantity")?)?,
                })
            })
            .collect()
    }

    async fn lock_products(&mut self, product_ids: &[ProductId]) -> Result<Vec<Product>> {
        let mut ids: Vec<Uuid> = product_ids.iter().map(|id| id.as_uuid()).collect();
        ids.sort();
        ids.dedup();

        let rows = sqlx::query(
            r#"
            SELECT id, name, price_cents, stock
            FROM products
            WHERE id = ANY($1)
            ORDER BY id ASC
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<bool> {
        let result =
            sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
                .bind(product_id.as_uuid())
                .bind(to_db_quantity(quantity)?)
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn debit_balance(&mut self, user_id: UserId, amount: Money) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE customers SET balance_cents = balance_cents - $2
            WHERE user_id = $1 AND balance_cents >= $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.cents())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_paid(&mut self, order_id: OrderId, payment_event_id: Option<&str>) -> Result<()> {
        let result =
            sqlx::query("UPDATE orders SET status = 'paid', payment_event_id = $2 WHERE id = $1")
                .bind(order_id.as_uuid())
                .bind(payment_event_id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some("unique_payment_event_id")
                    {
                        return StoreError::DuplicatePaymentEvent(
                            payment_event_id.unwrap_or_default().to_string(),
                        );
                    }
                    StoreError::Database(e)
                })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn insert_order_line(&mut self, order_id: OrderId, line: &OrderLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (order_id, line_no, product_id, product_name, quantity, price_cents)
            VALUES (
                $1,
                (SELECT COALESCE(MAX(line_no), 0) + 1 FROM order_lines WHERE order_id = $1),
                $2, $3, $4, $5
            )
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(line.product_id.as_uuid())
        .bind(&line.product_name)
        .bind(to_db_quantity(line.quantity)?)
        .bind(line.unit_price.cents())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
