//! Row types persisted by the stock store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{CheckoutReference, Money, ReservationId, SessionId, SkuCode};

/// A stock-keeping unit: one purchasable size/variant with its authoritative
/// available quantity.
///
/// `available` is mutated only through the store's conditional
/// decrement/increment operations and can never go negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub code: SkuCode,
    pub size: String,
    pub available: u32,
}

impl Sku {
    /// Creates a SKU row.
    pub fn new(code: impl Into<SkuCode>, size: impl Into<String>, available: u32) -> Self {
        Self {
            code: code.into(),
            size: size.into(),
            available,
        }
    }
}

/// A checkout session correlated to a client by an opaque token.
///
/// Created lazily on the first cart interaction; expires and is swept
/// independently of the reservations it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a new session with a fresh ID.
    pub fn new(token: impl Into<String>, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id: SessionId::new(),
            token: token.into(),
            created_at: now,
            expires_at: now + ttl,
        }
    }
}

/// One (session, SKU) entry of a shopper's cart: the desired quantity.
///
/// The only freely mutable input to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub session_id: SessionId,
    pub sku: SkuCode,
    pub qty: u32,
}

/// Status of a reservation. Every terminal transition deletes the row, so
/// only the pending state is ever persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReservationStatus {
    #[default]
    Pending,
}

impl ReservationStatus {
    /// Returns the status as its persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A temporary hold on inventory tied to one checkout attempt.
///
/// Invariant: at most one pending reservation per (session, SKU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub reference: CheckoutReference,
    pub session_id: SessionId,
    pub sku: SkuCode,
    pub qty: u32,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a pending reservation with a fresh ID.
    pub fn new(
        reference: CheckoutReference,
        session_id: SessionId,
        sku: SkuCode,
        qty: u32,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            reference,
            session_id,
            sku,
            qty,
            status: ReservationStatus::Pending,
            expires_at,
        }
    }

    /// Returns true if the hold has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A finalized sale line. Insert-only; the held quantity was permanently
/// committed when the reservation was taken, so creating an order line never
/// touches inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: uuid::Uuid,
    pub reference: CheckoutReference,
    pub sku: SkuCode,
    pub qty: u32,
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
}

impl OrderLine {
    /// Creates an order line with a fresh ID.
    pub fn new(
        reference: CheckoutReference,
        sku: SkuCode,
        qty: u32,
        unit_price: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            reference,
            sku,
            qty,
            unit_price,
            created_at,
        }
    }
}
