use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{CheckoutReference, ReservationId, SessionId, SkuCode};

use crate::Result;
use crate::model::{CartLine, OrderLine, Reservation, Session, Sku};

/// Core trait for stock store implementations.
///
/// All mutating operations run inside a transaction obtained from [`begin`]:
/// a reconciliation call wraps its whole cart in one transaction so a
/// mid-loop failure leaves no partial mutation visible, while the sweeper
/// and finalizer open one small transaction per reservation.
///
/// The oversell guard lives in [`decrement`]: a single conditional update
/// (`available = available - n` only where `available >= n`) that the
/// backing row serializes, so of two concurrent buyers of the last unit
/// exactly one succeeds. No in-process locks are involved.
///
/// Dropping a transaction without committing discards its work on both
/// implementations.
///
/// [`begin`]: StockStore::begin
/// [`decrement`]: StockStore::decrement
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Transaction handle. All reads and writes are scoped to one.
    type Tx: Send;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Commits a transaction, publishing its mutations atomically.
    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    /// Rolls a transaction back, discarding its mutations.
    async fn rollback(&self, tx: Self::Tx) -> Result<()>;

    // --- Inventory ---

    /// Reads a SKU row.
    async fn sku(&self, tx: &mut Self::Tx, code: &SkuCode) -> Result<Sku>;

    /// Inserts a SKU or replaces its size and available count (restock seam).
    async fn upsert_sku(&self, tx: &mut Self::Tx, sku: &Sku) -> Result<()>;

    /// Lists all SKUs ordered by code.
    async fn all_skus(&self, tx: &mut Self::Tx) -> Result<Vec<Sku>>;

    /// Atomically subtracts `qty` from the SKU's available count.
    ///
    /// Fails with [`StoreError::InsufficientStock`](crate::error::StoreError::InsufficientStock) when the conditional
    /// update affects zero rows — the guard failed or the SKU vanished.
    async fn decrement(&self, tx: &mut Self::Tx, code: &SkuCode, qty: u32) -> Result<()>;

    /// Atomically adds `qty` back to the SKU's available count.
    ///
    /// Fails with [`StoreError::SkuNotFound`](crate::error::StoreError::SkuNotFound) if the SKU row is gone.
    async fn increment(&self, tx: &mut Self::Tx, code: &SkuCode, qty: u32) -> Result<()>;

    // --- Reservations ---

    /// Persists a freshly minted pending reservation.
    async fn create_reservation(&self, tx: &mut Self::Tx, reservation: &Reservation)
    -> Result<()>;

    /// Rewrites a pending reservation's quantity, reference, and expiry.
    ///
    /// Changing quantity always means "delete the old hold's effect and
    /// record the new one" at the bookkeeping level even though only the
    /// delta touches inventory. Returns false if the row no longer exists.
    async fn replace_reservation(
        &self,
        tx: &mut Self::Tx,
        id: ReservationId,
        qty: u32,
        reference: CheckoutReference,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Deletes a reservation. A missing row is success (another component
    /// got there first); returns whether this call deleted it.
    async fn delete_reservation(&self, tx: &mut Self::Tx, id: ReservationId) -> Result<bool>;

    /// Deletes a reservation only if it is still expired at `now`.
    ///
    /// The sweeper credits held stock back only when this returns true, so
    /// concurrent sweeps (or a racing reconciliation that just renewed the
    /// hold) can never double-release a reservation.
    async fn delete_reservation_if_expired(
        &self,
        tx: &mut Self::Tx,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Pending, non-expired reservations for a session, ordered by SKU code.
    ///
    /// The ordering matches [`cart_lines`], so concurrent reconciliations
    /// touch SKU rows in one global order.
    ///
    /// [`cart_lines`]: StockStore::cart_lines
    async fn pending_reservations(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>>;

    /// Pending reservations for a session that are already expired at `now`.
    ///
    /// Reconciliation releases these in-line before taking fresh holds, so
    /// an expired-but-unswept row never blocks the one-pending-hold-per-
    /// (session, SKU) invariant.
    async fn stale_reservations(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>>;

    /// All reservations created under one checkout reference.
    async fn reservations_by_reference(
        &self,
        tx: &mut Self::Tx,
        reference: CheckoutReference,
    ) -> Result<Vec<Reservation>>;

    /// All pending reservations whose expiry has passed at `now`.
    async fn expired_reservations(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>>;

    // --- Cart ---

    /// Creates or replaces the (session, SKU) cart line.
    async fn upsert_cart_line(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        sku: &SkuCode,
        qty: u32,
    ) -> Result<()>;

    /// Removes a cart line; a missing line is success.
    async fn remove_cart_line(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        sku: &SkuCode,
    ) -> Result<bool>;

    /// Cart lines for a session, ordered by SKU code.
    async fn cart_lines(&self, tx: &mut Self::Tx, session_id: SessionId) -> Result<Vec<CartLine>>;

    // --- Sessions ---

    /// Persists a new session.
    async fn insert_session(&self, tx: &mut Self::Tx, session: &Session) -> Result<()>;

    /// Looks a session up by its correlation token; None when absent or
    /// already expired at `now`.
    async fn session_by_token(
        &self,
        tx: &mut Self::Tx,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    /// All sessions whose expiry has passed at `now`.
    async fn expired_sessions(&self, tx: &mut Self::Tx, now: DateTime<Utc>)
    -> Result<Vec<Session>>;

    /// Deletes a session and its cart lines. Reservations are untouched;
    /// they release through their own expiry.
    async fn delete_session(&self, tx: &mut Self::Tx, id: SessionId) -> Result<bool>;

    /// Deletes whatever session row holds this token, live or expired, so
    /// the token can be bound to a fresh session.
    async fn purge_session_token(&self, tx: &mut Self::Tx, token: &str) -> Result<bool>;

    // --- Order lines ---

    /// Persists a finalized sale line.
    async fn insert_order_line(&self, tx: &mut Self::Tx, line: &OrderLine) -> Result<()>;

    /// Order lines created under one checkout reference.
    async fn order_lines_by_reference(
        &self,
        tx: &mut Self::Tx,
        reference: CheckoutReference,
    ) -> Result<Vec<OrderLine>>;
}

/// Extension trait providing single-operation conveniences that open and
/// commit their own transaction.
#[async_trait]
pub trait StockStoreExt: StockStore {
    /// Inserts or restocks a SKU.
    async fn seed_sku(&self, sku: &Sku) -> Result<()> {
        let mut tx = self.begin().await?;
        self.upsert_sku(&mut tx, sku).await?;
        self.commit(tx).await
    }

    /// Reads a SKU's available count.
    async fn available(&self, code: &SkuCode) -> Result<u32> {
        let mut tx = self.begin().await?;
        let sku = self.sku(&mut tx, code).await?;
        self.commit(tx).await?;
        Ok(sku.available)
    }

    /// Lists the catalog.
    async fn list_skus(&self) -> Result<Vec<Sku>> {
        let mut tx = self.begin().await?;
        let skus = self.all_skus(&mut tx).await?;
        self.commit(tx).await?;
        Ok(skus)
    }

    /// Upserts one cart line for a session.
    async fn put_cart_line(&self, session_id: SessionId, sku: &SkuCode, qty: u32) -> Result<()> {
        let mut tx = self.begin().await?;
        // The SKU must exist before a shopper can want it.
        let _ = self.sku(&mut tx, sku).await?;
        self.upsert_cart_line(&mut tx, session_id, sku, qty).await?;
        self.commit(tx).await
    }

    /// Removes one cart line for a session.
    async fn drop_cart_line(&self, session_id: SessionId, sku: &SkuCode) -> Result<bool> {
        let mut tx = self.begin().await?;
        let removed = self.remove_cart_line(&mut tx, session_id, sku).await?;
        self.commit(tx).await?;
        Ok(removed)
    }

    /// Lists a session's cart.
    async fn list_cart(&self, session_id: SessionId) -> Result<Vec<CartLine>> {
        let mut tx = self.begin().await?;
        let lines = self.cart_lines(&mut tx, session_id).await?;
        self.commit(tx).await?;
        Ok(lines)
    }

    /// Looks a session up by token.
    async fn find_session(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let mut tx = self.begin().await?;
        let session = self.session_by_token(&mut tx, token, now).await?;
        self.commit(tx).await?;
        Ok(session)
    }

    /// Persists a new session.
    async fn add_session(&self, session: &Session) -> Result<()> {
        let mut tx = self.begin().await?;
        self.insert_session(&mut tx, session).await?;
        self.commit(tx).await
    }

    /// Pending, non-expired reservations for a session.
    async fn pending_for_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let mut tx = self.begin().await?;
        let reservations = self.pending_reservations(&mut tx, session_id, now).await?;
        self.commit(tx).await?;
        Ok(reservations)
    }

    /// Order lines for a checkout reference.
    async fn orders_for_reference(&self, reference: CheckoutReference) -> Result<Vec<OrderLine>> {
        let mut tx = self.begin().await?;
        let lines = self.order_lines_by_reference(&mut tx, reference).await?;
        self.commit(tx).await?;
        Ok(lines)
    }
}

// Blanket implementation for all StockStore implementations
impl<T: StockStore + ?Sized> StockStoreExt for T {}
