//! Conversion of paid-for holds into permanent sale records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{CheckoutReference, Money};
use stock_store::{OrderLine, Reservation, StockStore, StoreError};

use crate::pricing::PricingService;

/// Payment-confirmation event delivered by the payment provider's webhook.
///
/// Delivery is at-least-once; the handler below is idempotent under
/// duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Checkout reference the shopper was charged under.
    pub reference: CheckoutReference,
    /// ISO currency code of the charge.
    pub currency: String,
    /// Charged amount in cents.
    pub amount_cents: i64,
    /// Provider-specific extras, passed through untouched.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// What one payment confirmation accomplished.
#[derive(Debug, Clone, Default)]
pub struct FinalizeReport {
    /// Order lines written for this reference.
    pub order_lines: Vec<OrderLine>,
    /// Reservations that failed to finalize and were left in place.
    pub failed: usize,
}

impl FinalizeReport {
    /// True when nothing matched the reference — a duplicate delivery.
    pub fn is_noop(&self) -> bool {
        self.order_lines.is_empty() && self.failed == 0
    }
}

/// Converts a reference's reservations into permanent order lines.
///
/// No inventory is touched here: the held quantity was permanently taken
/// from `available` when the reservation was made, finalization only
/// reclassifies it from "held" to "sold". Each reservation finalizes in its
/// own transaction, log-and-continue, and an unknown reference is success —
/// the webhook redelivers, it must never error on the second attempt.
pub struct FinalizationHandler<S: StockStore, P: PricingService> {
    store: S,
    pricing: P,
}

impl<S: StockStore, P: PricingService> FinalizationHandler<S, P> {
    /// Creates a handler over the given store and price source.
    pub fn new(store: S, pricing: P) -> Self {
        Self { store, pricing }
    }

    /// Handles one payment confirmation.
    #[tracing::instrument(skip(self, event, now), fields(reference = %event.reference))]
    pub async fn finalize(&self, event: &PaymentConfirmation, now: DateTime<Utc>) -> FinalizeReport {
        let mut report = FinalizeReport::default();

        let reservations = match self.snapshot(event.reference).await {
            Ok(reservations) => reservations,
            Err(err) => {
                tracing::warn!(error = %err, "could not list reservations for reference");
                report.failed += 1;
                return report;
            }
        };

        if reservations.is_empty() {
            tracing::debug!("no reservations for reference; duplicate delivery treated as success");
            return report;
        }

        for reservation in reservations {
            match self.finalize_one(&reservation, now).await {
                Ok(Some(line)) => {
                    metrics::counter!("orders_finalized_total").increment(1);
                    report.order_lines.push(line);
                }
                // Another delivery of the same event drained it first.
                Ok(None) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        reservation = %reservation.id,
                        sku = %reservation.sku,
                        error = %err,
                        "failed to finalize reservation"
                    );
                }
            }
        }

        tracing::info!(
            order_lines = report.order_lines.len(),
            failed = report.failed,
            "payment confirmation processed"
        );
        report
    }

    async fn snapshot(&self, reference: CheckoutReference) -> Result<Vec<Reservation>, StoreError> {
        let mut tx = self.store.begin().await?;
        let reservations = self.store.reservations_by_reference(&mut tx, reference).await?;
        self.store.commit(tx).await?;
        Ok(reservations)
    }

    /// Finalizes one reservation. The delete gates the order line, so two
    /// concurrent deliveries can never record the same sale twice.
    async fn finalize_one(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<Option<OrderLine>, StoreError> {
        let mut tx = self.store.begin().await?;

        let deleted = self.store.delete_reservation(&mut tx, reservation.id).await?;
        if !deleted {
            self.store.commit(tx).await?;
            return Ok(None);
        }

        // Pricing is external; a SKU the price list forgot still finalizes,
        // at zero, rather than wedging the webhook.
        let unit_price = self
            .pricing
            .unit_price(&reservation.sku)
            .await
            .unwrap_or_else(Money::zero);
        let line = OrderLine::new(
            reservation.reference,
            reservation.sku.clone(),
            reservation.qty,
            unit_price,
            now,
        );
        self.store.insert_order_line(&mut tx, &line).await?;
        self.store
            .remove_cart_line(&mut tx, reservation.session_id, &reservation.sku)
            .await?;

        self.store.commit(tx).await?;
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{SessionId, SkuCode};
    use stock_store::{InMemoryStockStore, Sku, StockStoreExt};

    use crate::pricing::PriceListPricing;
    use crate::reconcile::Reconciler;

    async fn checked_out_session(
        store: &InMemoryStockStore,
        now: DateTime<Utc>,
    ) -> (SessionId, CheckoutReference) {
        let session_id = SessionId::new();
        for (code, available, qty) in [("A-SKU", 10, 2), ("B-SKU", 5, 1), ("C-SKU", 4, 4)] {
            store.seed_sku(&Sku::new(code, "M", available)).await.unwrap();
            store
                .put_cart_line(session_id, &SkuCode::new(code), qty)
                .await
                .unwrap();
        }
        let outcome = Reconciler::new(store.clone(), Duration::minutes(15))
            .reconcile(session_id, now)
            .await
            .unwrap();
        (session_id, outcome.reference)
    }

    fn confirmation(reference: CheckoutReference) -> PaymentConfirmation {
        PaymentConfirmation {
            reference,
            currency: "USD".to_string(),
            amount_cents: 9900,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn finalizes_every_reservation_of_the_reference() {
        let store = InMemoryStockStore::new();
        let now = Utc::now();
        let (session_id, reference) = checked_out_session(&store, now).await;
        let pricing = PriceListPricing::new();
        pricing.set_price("A-SKU", Money::from_cents(1000));
        pricing.set_price("B-SKU", Money::from_cents(500));
        pricing.set_price("C-SKU", Money::from_cents(250));

        let available_before = store.available(&SkuCode::new("A-SKU")).await.unwrap();
        let handler = FinalizationHandler::new(store.clone(), pricing);
        let report = handler.finalize(&confirmation(reference), now).await;

        assert_eq!(report.order_lines.len(), 3);
        assert_eq!(report.failed, 0);
        // The event itself leaves `available` untouched.
        assert_eq!(
            store.available(&SkuCode::new("A-SKU")).await.unwrap(),
            available_before
        );
        assert_eq!(store.reservation_count().await, 0);
        assert!(store.list_cart(session_id).await.unwrap().is_empty());

        let lines = store.orders_for_reference(reference).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].unit_price, Money::from_cents(1000));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_no_op() {
        let store = InMemoryStockStore::new();
        let now = Utc::now();
        let (_, reference) = checked_out_session(&store, now).await;
        let handler = FinalizationHandler::new(store.clone(), PriceListPricing::new());

        let first = handler.finalize(&confirmation(reference), now).await;
        assert_eq!(first.order_lines.len(), 3);

        let second = handler.finalize(&confirmation(reference), now).await;
        assert!(second.is_noop());
        // Still exactly three sale lines.
        assert_eq!(store.orders_for_reference(reference).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_reference_is_success() {
        let store = InMemoryStockStore::new();
        let handler = FinalizationHandler::new(store.clone(), PriceListPricing::new());

        let report = handler
            .finalize(&confirmation(CheckoutReference::new()), Utc::now())
            .await;

        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn unpriced_sku_finalizes_at_zero() {
        let store = InMemoryStockStore::new();
        let now = Utc::now();
        let (_, reference) = checked_out_session(&store, now).await;
        let handler = FinalizationHandler::new(store.clone(), PriceListPricing::new());

        let report = handler.finalize(&confirmation(reference), now).await;

        assert_eq!(report.order_lines.len(), 3);
        assert!(report.order_lines.iter().all(|l| l.unit_price.is_zero()));
    }
}
