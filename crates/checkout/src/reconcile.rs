//! Cart/hold reconciliation — the core of the engine.
//!
//! Given a session's current cart and its pending holds, one reconciliation
//! call computes and applies the minimal set of inventory and reservation
//! mutations that makes them consistent: one pending hold per cart line,
//! hold quantity equal to cart quantity, no hold for a SKU the shopper
//! dropped. The whole call runs in a single store transaction, so a mid-loop
//! out-of-stock failure leaves no partial mutation visible.
//!
//! Correctness under concurrency is delegated entirely to the store's
//! conditional decrement: when two sessions race for the last unit, the
//! first decrement to commit wins and the other session observes the guard
//! failure as out-of-stock. First-committer-wins, not first-request-wins.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use common::{CheckoutReference, SessionId, SkuCode};
use stock_store::{CartLine, Reservation, StockStore, StoreError};

use crate::error::{CheckoutError, Result};

/// Result of a successful reconciliation: the reservation set now backing
/// the cart and the reference to quote and charge under.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Correlation reference shared by every reservation in this outcome.
    pub reference: CheckoutReference,
    /// Final reservation set, one per cart line, ordered by SKU code.
    pub reservations: Vec<Reservation>,
}

/// Reconciles cart state against held inventory for one session at a time.
pub struct Reconciler<S: StockStore> {
    store: S,
    hold_ttl: Duration,
}

impl<S: StockStore> Reconciler<S> {
    /// Creates a reconciler whose holds expire `hold_ttl` after creation.
    pub fn new(store: S, hold_ttl: Duration) -> Self {
        Self { store, hold_ttl }
    }

    /// How long a hold lives before the sweeper may release it.
    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    /// Brings the session's reservations in line with its cart.
    ///
    /// Callers are expected to serialize calls per session (a shopper does
    /// not issue two simultaneous checkouts); cross-session races are
    /// resolved by the store's conditional decrement.
    #[tracing::instrument(skip(self, now))]
    pub async fn reconcile(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        metrics::counter!("checkout_reconciliations_total").increment(1);

        let mut tx = self.store.begin().await.map_err(|e| fold(e, None))?;
        match self.run(&mut tx, session_id, now).await {
            Ok(outcome) => {
                self.store.commit(tx).await.map_err(|e| fold(e, None))?;
                Ok(outcome)
            }
            Err(err) => {
                metrics::counter!("checkout_out_of_stock_total").increment(1);
                if let Err(rb) = self.store.rollback(tx).await {
                    tracing::warn!(error = %rb, "rollback after failed reconciliation failed");
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        tx: &mut S::Tx,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let cart = self
            .store
            .cart_lines(tx, session_id)
            .await
            .map_err(|e| fold(e, None))?;
        let pending = self
            .store
            .pending_reservations(tx, session_id, now)
            .await
            .map_err(|e| fold(e, None))?;

        // Release this session's expired-but-unswept holds first: they no
        // longer count as held inventory but still occupy the one-hold-per-
        // (session, SKU) slot. The conditional delete keeps this safe
        // against a sweep running at the same moment.
        let stale = self
            .store
            .stale_reservations(tx, session_id, now)
            .await
            .map_err(|e| fold(e, None))?;
        for reservation in stale {
            let deleted = self
                .store
                .delete_reservation_if_expired(tx, reservation.id, now)
                .await
                .map_err(|e| fold(e, Some(&reservation.sku)))?;
            if deleted {
                self.store
                    .increment(tx, &reservation.sku, reservation.qty)
                    .await
                    .map_err(|e| fold(e, Some(&reservation.sku)))?;
            }
        }

        // Index existing holds by SKU; at most one pending hold per SKU.
        let mut held: HashMap<SkuCode, Reservation> = pending
            .iter()
            .map(|r| (r.sku.clone(), r.clone()))
            .collect();

        // A fully unchanged cart is the idempotent case: no store mutation
        // at all, and the holds keep the reference the shopper was last
        // quoted under so a payment already in flight still finalizes.
        if let Some(reference) = unchanged_reference(&cart, &held) {
            return Ok(ReconcileOutcome {
                reference,
                reservations: pending,
            });
        }

        // Something differs: mint a fresh reference and rewrite every hold
        // under it, so the reservation set of one checkout attempt is always
        // findable by a single reference.
        let reference = CheckoutReference::new();
        let expires_at = now + self.hold_ttl;

        let mut reservations = Vec::with_capacity(cart.len());
        for line in &cart {
            let hold = held.remove(&line.sku);
            reservations.push(self.reconcile_line(tx, line, hold, reference, expires_at).await?);
        }

        // Whatever is still indexed was removed from the cart since the last
        // attempt: credit the stock back and drop the hold. The delete
        // gates the increment so a hold another component already released
        // is not credited twice.
        for stale in held.into_values() {
            let deleted = self
                .store
                .delete_reservation(tx, stale.id)
                .await
                .map_err(|e| fold(e, Some(&stale.sku)))?;
            if deleted {
                self.store
                    .increment(tx, &stale.sku, stale.qty)
                    .await
                    .map_err(|e| fold(e, Some(&stale.sku)))?;
            }
        }

        Ok(ReconcileOutcome {
            reference,
            reservations,
        })
    }

    /// Settles one cart line against its (possible) existing hold.
    async fn reconcile_line(
        &self,
        tx: &mut S::Tx,
        line: &CartLine,
        hold: Option<Reservation>,
        reference: CheckoutReference,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let sku = self
            .store
            .sku(tx, &line.sku)
            .await
            .map_err(|e| fold(e, Some(&line.sku)))?;

        // `available` already excludes this session's own hold, so the
        // shopper's ceiling is the sum of both. The conditional decrement of
        // the delta below stays the authoritative guard; this check exists
        // to name the SKU before any mutation.
        let held_qty = hold.as_ref().map_or(0, |r| r.qty);
        if line.qty > sku.available + held_qty {
            return Err(CheckoutError::out_of_stock(line.sku.clone()));
        }

        let Some(prior) = hold else {
            return self.take_fresh_hold(tx, line, reference, expires_at).await;
        };

        // Rewrite the hold first; if the row vanished mid-flight (released
        // by a sweep that beat us to it), fall back to taking a fresh hold
        // for the full quantity.
        let replaced = self
            .store
            .replace_reservation(tx, prior.id, line.qty, reference, expires_at)
            .await
            .map_err(|e| fold(e, Some(&line.sku)))?;
        if !replaced {
            return self.take_fresh_hold(tx, line, reference, expires_at).await;
        }

        if line.qty > prior.qty {
            self.store
                .decrement(tx, &line.sku, line.qty - prior.qty)
                .await
                .map_err(|e| fold(e, Some(&line.sku)))?;
        } else if line.qty < prior.qty {
            self.store
                .increment(tx, &line.sku, prior.qty - line.qty)
                .await
                .map_err(|e| fold(e, Some(&line.sku)))?;
        }

        Ok(Reservation {
            qty: line.qty,
            reference,
            expires_at,
            ..prior
        })
    }

    async fn take_fresh_hold(
        &self,
        tx: &mut S::Tx,
        line: &CartLine,
        reference: CheckoutReference,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        self.store
            .decrement(tx, &line.sku, line.qty)
            .await
            .map_err(|e| fold(e, Some(&line.sku)))?;
        let reservation = Reservation::new(
            reference,
            line.session_id,
            line.sku.clone(),
            line.qty,
            expires_at,
        );
        self.store
            .create_reservation(tx, &reservation)
            .await
            .map_err(|e| fold(e, Some(&line.sku)))?;
        Ok(reservation)
    }
}

/// Returns the shared reference when the cart matches the holds exactly:
/// same SKUs, same quantities, and every hold carrying one reference.
fn unchanged_reference(
    cart: &[CartLine],
    held: &HashMap<SkuCode, Reservation>,
) -> Option<CheckoutReference> {
    if cart.len() != held.len() {
        return None;
    }
    if !cart
        .iter()
        .all(|line| held.get(&line.sku).is_some_and(|r| r.qty == line.qty))
    {
        return None;
    }
    let mut references = held.values().map(|r| r.reference);
    let first = references.next()?;
    references.all(|r| r == first).then_some(first)
}

/// Folds store failures into the out-of-stock signal: at the reconciliation
/// boundary a torn write must not leak an inconsistent counter to the
/// shopper. The underlying error is logged before masking.
fn fold(err: StoreError, sku: Option<&SkuCode>) -> CheckoutError {
    match err {
        StoreError::InsufficientStock { sku } => CheckoutError::out_of_stock(sku),
        StoreError::SkuNotFound(sku) => CheckoutError::out_of_stock(sku),
        other => {
            tracing::error!(error = %other, "storage failure during reconciliation");
            CheckoutError::OutOfStock {
                sku: sku.cloned(),
            }
        }
    }
}
