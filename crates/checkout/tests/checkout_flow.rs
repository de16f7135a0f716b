//! Integration tests for the full reservation lifecycle: cart mutation,
//! reconciliation, expiry sweep, and finalization, including the
//! conservation and at-most-one-winner properties.

use chrono::{Duration, Utc};

use checkout::{
    CheckoutError, ExpirySweeper, FinalizationHandler, PaymentConfirmation, PriceListPricing,
    Reconciler, SessionId, SkuCode,
};
use common::Money;
use stock_store::{InMemoryStockStore, Sku, StockStore, StockStoreExt};

const HOLD_TTL_MIN: i64 = 15;

fn reconciler(store: &InMemoryStockStore) -> Reconciler<InMemoryStockStore> {
    Reconciler::new(store.clone(), Duration::minutes(HOLD_TTL_MIN))
}

async fn seed(store: &InMemoryStockStore, code: &str, available: u32) {
    store.seed_sku(&Sku::new(code, "M", available)).await.unwrap();
}

fn confirmation(reference: common::CheckoutReference) -> PaymentConfirmation {
    PaymentConfirmation {
        reference,
        currency: "USD".to_string(),
        amount_cents: 0,
        metadata: Default::default(),
    }
}

/// available + pending holds + finalized sales for one SKU. `references`
/// are the checkout attempts whose order lines should be counted.
async fn accounted_units(
    store: &InMemoryStockStore,
    code: &str,
    references: &[common::CheckoutReference],
) -> u32 {
    let sku = SkuCode::new(code);
    let available = store.available(&sku).await.unwrap();

    // Every hold eventually expires, so listing the rows expired at the far
    // future enumerates all of them.
    let mut tx = store.begin().await.unwrap();
    let held: u32 = store
        .expired_reservations(&mut tx, Utc::now() + Duration::days(3650))
        .await
        .unwrap()
        .iter()
        .filter(|r| r.sku == sku)
        .map(|r| r.qty)
        .sum();
    store.commit(tx).await.unwrap();

    let mut sold = 0;
    for reference in references {
        sold += store
            .orders_for_reference(*reference)
            .await
            .unwrap()
            .iter()
            .filter(|l| l.sku == sku)
            .map(|l| l.qty)
            .sum::<u32>();
    }

    available + held + sold
}

#[tokio::test]
async fn conservation_holds_across_the_full_lifecycle() {
    let store = InMemoryStockStore::new();
    let now = Utc::now();
    seed(&store, "TSHIRT-M", 10).await;

    let alice = SessionId::new();
    let bob = SessionId::new();
    let mut references = Vec::new();

    // Alice holds 4.
    store
        .put_cart_line(alice, &SkuCode::new("TSHIRT-M"), 4)
        .await
        .unwrap();
    let alice_outcome = reconciler(&store).reconcile(alice, now).await.unwrap();
    references.push(alice_outcome.reference);
    assert_eq!(accounted_units(&store, "TSHIRT-M", &references).await, 10);

    // Bob holds 3.
    store
        .put_cart_line(bob, &SkuCode::new("TSHIRT-M"), 3)
        .await
        .unwrap();
    let bob_outcome = reconciler(&store).reconcile(bob, now).await.unwrap();
    references.push(bob_outcome.reference);
    assert_eq!(accounted_units(&store, "TSHIRT-M", &references).await, 10);

    // Alice pays; her holds become sales.
    let handler = FinalizationHandler::new(store.clone(), PriceListPricing::new());
    let report = handler
        .finalize(&confirmation(alice_outcome.reference), now)
        .await;
    assert_eq!(report.order_lines.len(), 1);
    assert_eq!(accounted_units(&store, "TSHIRT-M", &references).await, 10);

    // Bob walks away; the sweep returns his units.
    let later = now + Duration::minutes(20);
    let swept = ExpirySweeper::new(store.clone()).sweep_once(later).await;
    assert_eq!(swept.released, 1);
    assert_eq!(accounted_units(&store, "TSHIRT-M", &references).await, 10);

    // End state: 10 - 4 sold = 6 available, nothing held.
    assert_eq!(store.available(&SkuCode::new("TSHIRT-M")).await.unwrap(), 6);
    assert_eq!(store.reservation_count().await, 0);
}

#[tokio::test]
async fn exactly_one_winner_for_the_last_unit() {
    const CONTENDERS: usize = 8;

    let store = InMemoryStockStore::new();
    let now = Utc::now();
    seed(&store, "LAST-ONE", 1).await;

    let mut sessions = Vec::new();
    for _ in 0..CONTENDERS {
        let session_id = SessionId::new();
        store
            .put_cart_line(session_id, &SkuCode::new("LAST-ONE"), 1)
            .await
            .unwrap();
        sessions.push(session_id);
    }

    let mut handles = Vec::new();
    for session_id in sessions {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            Reconciler::new(store, Duration::minutes(HOLD_TTL_MIN))
                .reconcile(session_id, now)
                .await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.reservations.len(), 1);
                winners += 1;
            }
            Err(CheckoutError::OutOfStock { .. }) => losers += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(losers, CONTENDERS - 1);
    assert_eq!(store.available(&SkuCode::new("LAST-ONE")).await.unwrap(), 0);
    assert_eq!(store.reservation_count().await, 1);
}

#[tokio::test]
async fn full_checkout_to_finalization_flow() {
    let store = InMemoryStockStore::new();
    let now = Utc::now();
    let session_id = SessionId::new();
    let pricing = PriceListPricing::new();

    for (code, available, price) in [("A-SKU", 10, 1000), ("B-SKU", 5, 500), ("C-SKU", 4, 250)] {
        seed(&store, code, available).await;
        pricing.set_price(code, Money::from_cents(price));
    }
    for (code, qty) in [("A-SKU", 2), ("B-SKU", 1), ("C-SKU", 4)] {
        store
            .put_cart_line(session_id, &SkuCode::new(code), qty)
            .await
            .unwrap();
    }

    let outcome = reconciler(&store).reconcile(session_id, now).await.unwrap();
    assert_eq!(outcome.reservations.len(), 3);

    let availables_before = (
        store.available(&SkuCode::new("A-SKU")).await.unwrap(),
        store.available(&SkuCode::new("B-SKU")).await.unwrap(),
        store.available(&SkuCode::new("C-SKU")).await.unwrap(),
    );
    assert_eq!(availables_before, (8, 4, 0));

    // Payment confirmed: 3 order lines, carts and holds drained, available
    // untouched by the event itself.
    let handler = FinalizationHandler::new(store.clone(), pricing);
    let report = handler.finalize(&confirmation(outcome.reference), now).await;

    assert_eq!(report.order_lines.len(), 3);
    assert_eq!(
        (
            store.available(&SkuCode::new("A-SKU")).await.unwrap(),
            store.available(&SkuCode::new("B-SKU")).await.unwrap(),
            store.available(&SkuCode::new("C-SKU")).await.unwrap(),
        ),
        availables_before
    );
    assert!(store.list_cart(session_id).await.unwrap().is_empty());
    assert_eq!(store.reservation_count().await, 0);

    // A later sweep finds nothing to do.
    let swept = ExpirySweeper::new(store.clone())
        .sweep_once(now + Duration::minutes(20))
        .await;
    assert_eq!(swept.released, 0);
}

#[tokio::test]
async fn abandoned_checkout_frees_stock_for_the_next_shopper() {
    let store = InMemoryStockStore::new();
    let now = Utc::now();
    seed(&store, "LIMITED", 2).await;

    let first = SessionId::new();
    store
        .put_cart_line(first, &SkuCode::new("LIMITED"), 2)
        .await
        .unwrap();
    reconciler(&store).reconcile(first, now).await.unwrap();

    // Second shopper is out of luck while the hold lives.
    let second = SessionId::new();
    store
        .put_cart_line(second, &SkuCode::new("LIMITED"), 1)
        .await
        .unwrap();
    let err = reconciler(&store).reconcile(second, now).await.unwrap_err();
    assert!(matches!(err, CheckoutError::OutOfStock { .. }));

    // First shopper abandons; after the sweep the second succeeds.
    let later = now + Duration::minutes(HOLD_TTL_MIN + 5);
    ExpirySweeper::new(store.clone()).sweep_once(later).await;

    let outcome = reconciler(&store).reconcile(second, later).await.unwrap();
    assert_eq!(outcome.reservations.len(), 1);
    assert_eq!(store.available(&SkuCode::new("LIMITED")).await.unwrap(), 1);
}
