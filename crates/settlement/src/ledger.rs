//! Inventory ledger used by the settlement transaction.
//!
//! Stock is only ever decremented here, after a payment has been confirmed,
//! and only while the product rows are locked by the enclosing transaction.

use std::collections::BTreeMap;

use common::ProductId;
use domain::{Product, StockShortage};
use store::{CartEntry, StoreTransaction};

/// Outcome of a single stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    Applied,
    Insufficient { available: u32 },
}

/// Products locked for one settlement, keyed (and therefore locked) in
/// ascending id order.
#[derive(Debug, Default)]
pub struct InventoryLedger {
    products: BTreeMap<ProductId, Product>,
}

impl InventoryLedger {
    /// Locks every product referenced by `entries`.
    pub async fn lock(
        tx: &mut dyn StoreTransaction,
        entries: &[CartEntry],
    ) -> store::Result<Self> {
        let mut ids: Vec<ProductId> = entries.iter().map(|e| e.product_id).collect();
        ids.sort();
        ids.dedup();

        let products = tx
            .lock_products(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(Self { products })
    }

    pub fn product(&self, product_id: ProductId) -> Option<&Product> {
        self.products.get(&product_id)
    }

    /// Re-validates every entry against the locked stock levels.
    ///
    /// A product that no longer exists counts as out of stock.
    pub fn check(&self, entries: &[CartEntry]) -> Result<(), StockShortage> {
        for entry in entries {
            match self.products.get(&entry.product_id) {
                Some(product) if product.has_stock_for(entry.quantity) => {}
                Some(product) => {
                    return Err(StockShortage {
                        product_id: product.id,
                        product_name: product.name.clone(),
                        requested: entry.quantity,
                        available: product.stock,
                    });
                }
                None => {
                    return Err(StockShortage {
                        product_id: entry.product_id,
                        product_name: entry.product_id.to_string(),
                        requested: entry.quantity,
                        available: 0,
                    });
                }
            }
        }
        Ok(())
    }

    /// Decrements stock for a locked product.
    pub async fn try_decrement(
        &mut self,
        tx: &mut dyn StoreTransaction,
        product_id: ProductId,
        quantity: u32,
    ) -> store::Result<StockDecrement> {
        let Some(product) = self.products.get_mut(&product_id) else {
            return Ok(StockDecrement::Insufficient { available: 0 });
        };

        if !product.has_stock_for(quantity) || !tx.decrement_stock(product_id, quantity).await? {
            return Ok(StockDecrement::Insufficient {
                available: product.stock,
            });
        }

        product.stock -= quantity;
        Ok(StockDecrement::Applied)
    }
}

#[cfg(test)]
mod tests {
    use domain::Money;
    use store::{CommerceStore, InMemoryStore};

    use super::*;

    #[tokio::test]
    async fn test_check_and_decrement() {
        let store = InMemoryStore::new();
        let rice = Product::new("Rice", Money::from_cents(1000), 3);
        let eggs = Product::new("Eggs", Money::from_cents(250), 1);
        store.put_product(rice.clone()).await;
        store.put_product(eggs.clone()).await;

        let entries = vec![
            CartEntry {
                product_id: rice.id,
                quantity: 2,
            },
            CartEntry {
                product_id: eggs.id,
                quantity: 2,
            },
        ];

        let mut tx = store.begin().await.unwrap();
        let mut ledger = InventoryLedger::lock(tx.as_mut(), &entries).await.unwrap();

        let shortage = ledger.check(&entries).unwrap_err();
        assert_eq!(shortage.product_name, "Eggs");
        assert_eq!(shortage.available, 1);

        assert_eq!(
            ledger.try_decrement(tx.as_mut(), rice.id, 2).await.unwrap(),
            StockDecrement::Applied
        );
        assert_eq!(
            ledger.try_decrement(tx.as_mut(), rice.id, 2).await.unwrap(),
            StockDecrement::Insufficient { available: 1 }
        );
        assert_eq!(ledger.product(rice.id).unwrap().stock, 1);
    }

    #[tokio::test]
    async fn test_missing_product_is_a_shortage() {
        let store = InMemoryStore::new();
        let entries = vec![CartEntry {
            product_id: ProductId::new(),
            quantity: 1,
        }];

        let mut tx = store.begin().await.unwrap();
        let ledger = InventoryLedger::lock(tx.as_mut(), &entries).await.unwrap();
        assert_eq!(ledger.check(&entries).unwrap_err().available, 0);
    }
}
