use common::UserId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Customer, Money, Product};
use settlement::{BalanceGateway, GatewayRegistry, SettlementEngine};
use store::{CommerceStore, InMemoryStore};

const STOCK: u32 = 1_000_000;

async fn seed(store: &InMemoryStore, products: usize) -> Vec<Product> {
    let mut seeded = Vec::with_capacity(products);
    for i in 0..products {
        let product = Product::new(format!("Product {i}"), Money::from_cents(250), STOCK);
        store.put_product(product.clone()).await;
        seeded.push(product);
    }
    seeded
}

async fn customer_with_cart(store: &InMemoryStore, products: &[Product]) -> UserId {
    let user = UserId::new();
    store
        .put_customer(
            Customer::new(user, "Bench User", "bench@example.com")
                .with_balance(Money::from_units(1_000_000)),
        )
        .await;
    for product in products {
        store.put_cart_item(user, product.id, 2).await.unwrap();
    }
    user
}

fn engine(store: &InMemoryStore) -> SettlementEngine<InMemoryStore> {
    SettlementEngine::new(
        store.clone(),
        GatewayRegistry::new().with(BalanceGateway::new()),
    )
}

fn bench_balance_checkout_single_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let engine = engine(&store);
    let products = rt.block_on(seed(&store, 1));

    c.bench_function("settlement/balance_checkout_1_item", |b| {
        b.iter(|| {
            rt.block_on(async {
                let user = customer_with_cart(&store, &products).await;
                engine.initiate(user, "balance", None).await.unwrap();
            });
        });
    });
}

fn bench_balance_checkout_ten_items(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let engine = engine(&store);
    let products = rt.block_on(seed(&store, 10));

    c.bench_function("settlement/balance_checkout_10_items", |b| {
        b.iter(|| {
            rt.block_on(async {
                let user = customer_with_cart(&store, &products).await;
                engine.initiate(user, "balance", None).await.unwrap();
            });
        });
    });
}

fn bench_duplicate_confirmation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let engine = engine(&store);

    let order_id = rt.block_on(async {
        let products = seed(&store, 5).await;
        let user = customer_with_cart(&store, &products).await;
        engine.initiate(user, "balance", None).await.unwrap().order.id
    });

    c.bench_function("settlement/confirm_already_paid", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .confirm(order_id, settlement::Validation::accepted(None))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_cart_read(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();

    let user = rt.block_on(async {
        let products = seed(&store, 20).await;
        customer_with_cart(&store, &products).await
    });

    c.bench_function("settlement/get_cart_20_items", |b| {
        b.iter(|| {
            rt.block_on(async {
                let cart = store.get_cart(user).await.unwrap();
                assert_eq!(cart.item_count(), 20);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_balance_checkout_single_item,
    bench_balance_checkout_ten_items,
    bench_duplicate_confirmation,
    bench_cart_read,
);
criterion_main!(benches);
