//! Pricing collaborator boundary.
//!
//! Turning reconciled lines into an amount to charge is not part of this
//! core; the trait is the seam and the price-list implementation is the
//! test double the rest of the workspace runs against.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use common::{Money, SkuCode};
use stock_store::Reservation;

use crate::error::Result;

/// Trait for the external pricing collaborator.
#[async_trait]
pub trait PricingService: Send + Sync {
    /// Returns a total in `currency` for the reconciled lines: unit prices
    /// times held quantities, plus tax (basis points) and shipping.
    async fn quote(
        &self,
        lines: &[Reservation],
        currency: &str,
        shipping_cost: Money,
        tax_rate_bps: u32,
    ) -> Result<Money>;

    /// Unit price for a single SKU, if the price list knows it.
    async fn unit_price(&self, sku: &SkuCode) -> Option<Money>;
}

/// In-memory price-list pricing for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct PriceListPricing {
    prices: Arc<RwLock<HashMap<SkuCode, Money>>>,
}

impl PriceListPricing {
    /// Creates an empty price list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unit price for a SKU.
    pub fn set_price(&self, sku: impl Into<SkuCode>, price: Money) {
        self.prices.write().unwrap().insert(sku.into(), price);
    }
}

#[async_trait]
impl PricingService for PriceListPricing {
    async fn quote(
        &self,
        lines: &[Reservation],
        _currency: &str,
        shipping_cost: Money,
        tax_rate_bps: u32,
    ) -> Result<Money> {
        // The price list is single-currency; real pricing collaborators
        // convert per currency.
        let prices = self.prices.read().unwrap();
        let subtotal: Money = lines
            .iter()
            .map(|line| {
                prices
                    .get(&line.sku)
                    .copied()
                    .unwrap_or_else(Money::zero)
                    .multiply(line.qty)
            })
            .sum();

        let tax_cents = subtotal.cents() * i64::from(tax_rate_bps) / 10_000;
        Ok(subtotal + Money::from_cents(tax_cents) + shipping_cost)
    }

    async fn unit_price(&self, sku: &SkuCode) -> Option<Money> {
        self.prices.read().unwrap().get(sku).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{CheckoutReference, SessionId};

    fn line(sku: &str, qty: u32) -> Reservation {
        Reservation::new(
            CheckoutReference::new(),
            SessionId::new(),
            SkuCode::new(sku),
            qty,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn quote_sums_lines_tax_and_shipping() {
        let pricing = PriceListPricing::new();
        pricing.set_price("TSHIRT-M", Money::from_cents(1000));
        pricing.set_price("HAT-S", Money::from_cents(500));

        // Subtotal 2500, 8% tax = 200, shipping 399.
        let total = pricing
            .quote(
                &[line("TSHIRT-M", 2), line("HAT-S", 1)],
                "USD",
                Money::from_cents(399),
                800,
            )
            .await
            .unwrap();

        assert_eq!(total.cents(), 2500 + 200 + 399);
    }

    #[tokio::test]
    async fn unknown_sku_prices_at_zero() {
        let pricing = PriceListPricing::new();
        let total = pricing
            .quote(&[line("GONE", 3)], "USD", Money::zero(), 0)
            .await
            .unwrap();
        assert!(total.is_zero());
        assert!(pricing.unit_price(&SkuCode::new("GONE")).await.is_none());
    }
}
