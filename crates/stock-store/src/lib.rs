//! Storage layer for the stock reservation system.
//!
//! The [`StockStore`] trait exposes the authoritative per-SKU `available`
//! counter behind atomic, conditional decrement/increment operations, plus
//! the reservation, cart, session, and order-line tables that the checkout
//! engine reconciles against. Two implementations are provided: an in-memory
//! store for tests and a PostgreSQL store backed by sqlx.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{CheckoutReference, Money, ReservationId, SessionId, SkuCode};
pub use error::{Result, StoreError};
pub use memory::InMemoryStockStore;
pub use model::{CartLine, OrderLine, Reservation, ReservationStatus, Session, Sku};
pub use postgres::PostgresStockStore;
pub use store::{StockStore, StockStoreExt};
