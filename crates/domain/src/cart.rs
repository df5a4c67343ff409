//! Point-in-time view of a user's cart.

use common::{CartItemId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Money, Product};

/// A line in the cart, joined with the current product record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub product: Product,
    /// Always positive; a zero quantity deletes the item instead.
    pub quantity: u32,
}

impl CartItem {
    /// Returns the line total at the product's current price.
    pub fn subtotal(&self) -> Money {
        self.product.price.multiply(self.quantity)
    }
}

/// The requested quantity of a product exceeds what is on hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockShortage {
    pub product_id: ProductId,
    pub product_name: String,
    pub requested: u32,
    pub available: u32,
}

impl std::fmt::Display for StockShortage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Only {} units of {} available",
            self.available, self.product_name
        )
    }
}

/// Cart snapshot. The total is derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct products in the cart.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total(&self) -> Money {
        self.items.iter().map(CartItem::subtotal).sum()
    }

    pub fn item_for(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product.id == product_id)
    }

    /// Advisory stock check against the product records held in this snapshot.
    ///
    /// Returns the first shortage found. Nothing is reserved.
    pub fn check_stock(&self) -> Result<(), StockShortage> {
        match self
            .items
            .iter()
            .find(|i| !i.product.has_stock_for(i.quantity))
        {
            Some(item) => Err(StockShortage {
                product_id: item.product.id,
                product_name: item.product.name.clone(),
                requested: item.quantity,
                available: item.product.stock,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, price_cents: i64, stock: u32, quantity: u32) -> CartItem {
        CartItem {
            id: CartItemId::new(),
            product: Product::new(name, Money::from_cents(price_cents), stock),
            quantity,
        }
    }

    #[test]
    fn test_total_is_sum_of_subtotals() {
        let cart = Cart {
            user_id: UserId::new(),
            items: vec![item("Rice", 1000, 100, 2), item("Eggs", 250, 10, 3)],
        };
        assert_eq!(cart.total(), Money::from_cents(2750));
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn test_empty_cart() {
        let cart = Cart::empty(UserId::new());
        assert!(cart.is_empty());
        assert_eq!(cart.total(), Money::zero());
        assert!(cart.check_stock().is_ok());
    }

    #[test]
    fn test_check_stock_reports_shortage() {
        let cart = Cart {
            user_id: UserId::new(),
            items: vec![item("Rice", 1000, 100, 2), item("Eggs", 250, 1, 3)],
        };
        let shortage = cart.check_stock().unwrap_err();
        assert_eq!(shortage.product_name, "Eggs");
        assert_eq!(shortage.available, 1);
        assert_eq!(shortage.to_string(), "Only 1 units of Eggs available");
    }
}
