//! Checkout-session provider boundary.
//!
//! Resolves the request's opaque correlation token (the cookie value) into
//! a session and its cart. Cookie issuance itself lives outside this core;
//! the provider only answers "which session is this shopper".

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use common::Money;
use stock_store::{CartLine, Session, StockStore, StockStoreExt};

use crate::error::{CheckoutError, Result};

/// Everything checkout needs to know about the requesting shopper.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub session: Session,
    pub cart_lines: Vec<CartLine>,
    pub shipping_cost: Money,
    pub tax_rate_bps: u32,
}

/// Trait for the external checkout-session collaborator.
#[async_trait]
pub trait CheckoutSessionProvider: Send + Sync {
    /// Resolves a token into the session, its cart, and the rate inputs the
    /// pricing collaborator needs. Fails with
    /// [`CheckoutError::SessionNotFound`] when the token is absent, unknown,
    /// or expired.
    async fn context(&self, token: &str, now: DateTime<Utc>) -> Result<CheckoutContext>;

    /// Returns the live session for a token, creating it on first contact —
    /// sessions exist from the first cart interaction onward.
    async fn ensure_session(&self, token: &str, now: DateTime<Utc>) -> Result<Session>;
}

/// Session provider backed by the stock store's session table.
#[derive(Clone)]
pub struct StoreSessionProvider<S: StockStore> {
    store: S,
    session_ttl: Duration,
    shipping_cost: Money,
    tax_rate_bps: u32,
}

impl<S: StockStore> StoreSessionProvider<S> {
    /// Creates a provider with flat shipping and tax rates.
    pub fn new(
        store: S,
        session_ttl: Duration,
        shipping_cost: Money,
        tax_rate_bps: u32,
    ) -> Self {
        Self {
            store,
            session_ttl,
            shipping_cost,
            tax_rate_bps,
        }
    }
}

#[async_trait]
impl<S: StockStore> CheckoutSessionProvider for StoreSessionProvider<S> {
    async fn context(&self, token: &str, now: DateTime<Utc>) -> Result<CheckoutContext> {
        let session = self
            .store
            .find_session(token, now)
            .await?
            .ok_or(CheckoutError::SessionNotFound)?;
        let cart_lines = self.store.list_cart(session.id).await?;

        Ok(CheckoutContext {
            session,
            cart_lines,
            shipping_cost: self.shipping_cost,
            tax_rate_bps: self.tax_rate_bps,
        })
    }

    async fn ensure_session(&self, token: &str, now: DateTime<Utc>) -> Result<Session> {
        let mut tx = self.store.begin().await?;
        if let Some(session) = self.store.session_by_token(&mut tx, token, now).await? {
            self.store.commit(tx).await?;
            return Ok(session);
        }

        // An expired row may still be bound to this token; clear it so the
        // token can correlate a fresh session.
        self.store.purge_session_token(&mut tx, token).await?;
        let session = Session::new(token, now, self.session_ttl);
        self.store.insert_session(&mut tx, &session).await?;
        self.store.commit(tx).await?;

        tracing::debug!(session = %session.id, "created session on first cart interaction");
        Ok(session)
    }
}
