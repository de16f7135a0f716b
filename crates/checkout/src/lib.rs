//! Reservation and oversell-prevention engine.
//!
//! Sits between a shopping cart and a payment provider and guarantees that
//! the quantity of a SKU sold never exceeds the quantity available, even
//! when shoppers race for the last units:
//!
//! - [`Reconciler`] makes a session's holds match its cart in one store
//!   transaction, delegating all write-write conflicts to the store's
//!   conditional decrement.
//! - [`ExpirySweeper`] periodically releases holds whose checkout was
//!   abandoned.
//! - [`FinalizationHandler`] turns a paid reference's holds into permanent
//!   order lines, idempotently under at-least-once webhook delivery.
//! - [`CheckoutSessionProvider`] and [`PricingService`] are the boundaries
//!   to the session and pricing collaborators.

pub mod error;
pub mod finalize;
pub mod pricing;
pub mod reconcile;
pub mod session;
pub mod sweeper;

pub use common::{CheckoutReference, Money, ReservationId, SessionId, SkuCode};
pub use error::{CheckoutError, Result};
pub use finalize::{FinalizationHandler, FinalizeReport, PaymentConfirmation};
pub use pricing::{PriceListPricing, PricingService};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use session::{CheckoutContext, CheckoutSessionProvider, StoreSessionProvider};
pub use sweeper::{ExpirySweeper, SweepReport};
