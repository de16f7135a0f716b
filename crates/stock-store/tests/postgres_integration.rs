//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and are ignored by default
//! because they need a local Docker daemon. Run with:
//!
//! ```bash
//! cargo test -p stock-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use serial_test::serial;
use sqlx::PgPool;
use stock_store::{
    CheckoutReference, PostgresStockStore, Reservation, Session, SessionId, Sku, SkuCode,
    StockStore, StockStoreExt, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_stock_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn store() -> PostgresStockStore {
    let info = get_container_info().await;
    let pool = PgPool::connect(&info.connection_string).await.unwrap();
    PostgresStockStore::new(pool)
}

fn unique_code(prefix: &str) -> SkuCode {
    SkuCode::new(format!("{prefix}-{}", uuid::Uuid::new_v4()))
}

#[tokio::test]
#[serial]
#[ignore = "requires a local Docker daemon"]
async fn conditional_decrement_guards_the_counter() {
    let store = store().await;
    let code = unique_code("GUARD");
    store.seed_sku(&Sku::new(code.clone(), "M", 2)).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    store.decrement(&mut tx, &code, 2).await.unwrap();
    let err = store.decrement(&mut tx, &code, 1).await.unwrap_err();
    assert!(matches!(err, StoreError::InsufficientStock { .. }));
    store.rollback(tx).await.unwrap();

    assert_eq!(store.available(&code).await.unwrap(), 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires a local Docker daemon"]
async fn transaction_rolls_back_partial_work() {
    let store = store().await;
    let code = unique_code("ROLLBACK");
    store.seed_sku(&Sku::new(code.clone(), "M", 5)).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    store.decrement(&mut tx, &code, 3).await.unwrap();
    store.rollback(tx).await.unwrap();

    assert_eq!(store.available(&code).await.unwrap(), 5);

    let mut tx = store.begin().await.unwrap();
    store.decrement(&mut tx, &code, 3).await.unwrap();
    store.commit(tx).await.unwrap();

    assert_eq!(store.available(&code).await.unwrap(), 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires a local Docker daemon"]
async fn reservation_lifecycle_round_trip() {
    let store = store().await;
    let code = unique_code("RES");
    let session_id = SessionId::new();
    let now = Utc::now();
    store.seed_sku(&Sku::new(code.clone(), "M", 5)).await.unwrap();

    let reservation = Reservation::new(
        CheckoutReference::new(),
        session_id,
        code.clone(),
        2,
        now + Duration::minutes(15),
    );

    let mut tx = store.begin().await.unwrap();
    store.create_reservation(&mut tx, &reservation).await.unwrap();
    store.commit(tx).await.unwrap();

    let pending = store.pending_for_session(session_id, now).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, reservation.id);
    assert_eq!(pending[0].qty, 2);

    // Replace rewrites qty, reference, and expiry.
    let new_reference = CheckoutReference::new();
    let mut tx = store.begin().await.unwrap();
    assert!(
        store
            .replace_reservation(
                &mut tx,
                reservation.id,
                4,
                new_reference,
                now + Duration::minutes(30)
            )
            .await
            .unwrap()
    );
    store.commit(tx).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let by_reference = store
        .reservations_by_reference(&mut tx, new_reference)
        .await
        .unwrap();
    store.commit(tx).await.unwrap();
    assert_eq!(by_reference.len(), 1);
    assert_eq!(by_reference[0].qty, 4);

    // Conditional delete only fires once the expiry has passed.
    let mut tx = store.begin().await.unwrap();
    assert!(
        !store
            .delete_reservation_if_expired(&mut tx, reservation.id, now)
            .await
            .unwrap()
    );
    assert!(
        store
            .delete_reservation_if_expired(&mut tx, reservation.id, now + Duration::hours(1))
            .await
            .unwrap()
    );
    store.commit(tx).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires a local Docker daemon"]
async fn duplicate_pending_hold_is_rejected() {
    let store = store().await;
    let code = unique_code("UNIQ");
    let session_id = SessionId::new();
    let now = Utc::now();
    store.seed_sku(&Sku::new(code.clone(), "M", 5)).await.unwrap();

    let first = Reservation::new(
        CheckoutReference::new(),
        session_id,
        code.clone(),
        1,
        now + Duration::minutes(15),
    );
    let second = Reservation::new(
        CheckoutReference::new(),
        session_id,
        code.clone(),
        2,
        now + Duration::minutes(15),
    );

    let mut tx = store.begin().await.unwrap();
    store.create_reservation(&mut tx, &first).await.unwrap();
    store.commit(tx).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = store.create_reservation(&mut tx, &second).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
}

#[tokio::test]
#[serial]
#[ignore = "requires a local Docker daemon"]
async fn session_and_cart_round_trip() {
    let store = store().await;
    let code = unique_code("CART");
    let now = Utc::now();
    store.seed_sku(&Sku::new(code.clone(), "M", 5)).await.unwrap();

    let session = Session::new(format!("tok-{}", uuid::Uuid::new_v4()), now, Duration::hours(24));
    store.add_session(&session).await.unwrap();

    let found = store.find_session(&session.token, now).await.unwrap().unwrap();
    assert_eq!(found.id, session.id);
    assert!(
        store
            .find_session(&session.token, now + Duration::hours(25))
            .await
            .unwrap()
            .is_none()
    );

    store.put_cart_line(session.id, &code, 3).await.unwrap();
    store.put_cart_line(session.id, &code, 4).await.unwrap();
    let lines = store.list_cart(session.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].qty, 4);

    // Deleting the session cascades the cart lines.
    let mut tx = store.begin().await.unwrap();
    assert!(store.delete_session(&mut tx, session.id).await.unwrap());
    store.commit(tx).await.unwrap();
    assert!(store.list_cart(session.id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires a local Docker daemon"]
async fn concurrent_decrements_have_one_winner() {
    let store = store().await;
    let code = unique_code("RACE");
    store.seed_sku(&Sku::new(code.clone(), "M", 1)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            let mut tx = store.begin().await?;
            store.decrement(&mut tx, &code, 1).await?;
            store.commit(tx).await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(StoreError::InsufficientStock { .. }) => losers += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(losers, 3);
    assert_eq!(store.available(&code).await.unwrap(), 0);
}
