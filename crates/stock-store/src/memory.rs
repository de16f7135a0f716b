use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use common::{CheckoutReference, ReservationId, SessionId, SkuCode};

use crate::model::{CartLine, OrderLine, Reservation, Session, Sku};
use crate::store::StockStore;
use crate::{Result, StoreError};

/// Everything the in-memory store persists, in the flat keyed-row layout the
/// SQL schema uses.
#[derive(Clone, Default)]
struct StoreState {
    skus: HashMap<SkuCode, Sku>,
    sessions: HashMap<SessionId, Session>,
    cart_lines: HashMap<(SessionId, SkuCode), u32>,
    reservations: HashMap<ReservationId, Reservation>,
    order_lines: Vec<OrderLine>,
    /// Committed write-operation count, used by idempotence tests.
    mutations: u64,
}

/// In-memory stock store implementation for testing.
///
/// Provides the same transactional interface as the PostgreSQL
/// implementation: a transaction works on a scratch copy of the state under
/// an exclusive lock, commit publishes the copy, and dropping the
/// transaction discards it. Writers serialize on the lock, which is exactly
/// what a deterministic test double wants.
#[derive(Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<RwLock<StoreState>>,
    fail_commits: Arc<AtomicBool>,
}

/// Transaction handle for [`InMemoryStockStore`].
pub struct MemoryTx {
    guard: OwnedRwLockWriteGuard<StoreState>,
    scratch: StoreState,
}

impl InMemoryStockStore {
    /// Creates a new empty in-memory stock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every subsequent commit to fail with a database error,
    /// for exercising storage-failure paths.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of committed write operations so far.
    pub async fn mutation_count(&self) -> u64 {
        self.state.read().await.mutations
    }

    /// Number of reservations currently held.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    /// Number of finalized order lines.
    pub async fn order_line_count(&self) -> usize {
        self.state.read().await.order_lines.len()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = self.state.clone().write_owned().await;
        let scratch = guard.clone();
        Ok(MemoryTx { guard, scratch })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let MemoryTx { mut guard, scratch } = tx;
        *guard = scratch;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        drop(tx);
        Ok(())
    }

    async fn sku(&self, tx: &mut Self::Tx, code: &SkuCode) -> Result<Sku> {
        tx.scratch
            .skus
            .get(code)
            .cloned()
            .ok_or_else(|| StoreError::SkuNotFound(code.clone()))
    }

    async fn upsert_sku(&self, tx: &mut Self::Tx, sku: &Sku) -> Result<()> {
        tx.scratch.skus.insert(sku.code.clone(), sku.clone());
        tx.scratch.mutations += 1;
        Ok(())
    }

    async fn all_skus(&self, tx: &mut Self::Tx) -> Result<Vec<Sku>> {
        let mut skus: Vec<_> = tx.scratch.skus.values().cloned().collect();
        skus.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(skus)
    }

    async fn decrement(&self, tx: &mut Self::Tx, code: &SkuCode, qty: u32) -> Result<()> {
        match tx.scratch.skus.get_mut(code) {
            Some(sku) if sku.available >= qty => {
                sku.available -= qty;
                tx.scratch.mutations += 1;
                Ok(())
            }
            // Guard failed or the SKU vanished: same signal either way.
            _ => Err(StoreError::InsufficientStock { sku: code.clone() }),
        }
    }

    async fn increment(&self, tx: &mut Self::Tx, code: &SkuCode, qty: u32) -> Result<()> {
        match tx.scratch.skus.get_mut(code) {
            Some(sku) => {
                sku.available += qty;
                tx.scratch.mutations += 1;
                Ok(())
            }
            None => Err(StoreError::SkuNotFound(code.clone())),
        }
    }

    async fn create_reservation(
        &self,
        tx: &mut Self::Tx,
        reservation: &Reservation,
    ) -> Result<()> {
        tx.scratch
            .reservations
            .insert(reservation.id, reservation.clone());
        tx.scratch.mutations += 1;
        Ok(())
    }

    async fn replace_reservation(
        &self,
        tx: &mut Self::Tx,
        id: ReservationId,
        qty: u32,
        reference: CheckoutReference,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        match tx.scratch.reservations.get_mut(&id) {
            Some(r) => {
                r.qty = qty;
                r.reference = reference;
                r.expires_at = expires_at;
                tx.scratch.mutations += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_reservation(&self, tx: &mut Self::Tx, id: ReservationId) -> Result<bool> {
        let removed = tx.scratch.reservations.remove(&id).is_some();
        if removed {
            tx.scratch.mutations += 1;
        }
        Ok(removed)
    }

    async fn delete_reservation_if_expired(
        &self,
        tx: &mut Self::Tx,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expired = tx
            .scratch
            .reservations
            .get(&id)
            .is_some_and(|r| r.is_expired(now));
        if expired {
            tx.scratch.reservations.remove(&id);
            tx.scratch.mutations += 1;
        }
        Ok(expired)
    }

    async fn pending_reservations(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let mut reservations: Vec<_> = tx
            .scratch
            .reservations
            .values()
            .filter(|r| r.session_id == session_id && !r.is_expired(now))
            .cloned()
            .collect();
        reservations.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(reservations)
    }

    async fn stale_reservations(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let mut reservations: Vec<_> = tx
            .scratch
            .reservations
            .values()
            .filter(|r| r.session_id == session_id && r.is_expired(now))
            .cloned()
            .collect();
        reservations.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(reservations)
    }

    async fn reservations_by_reference(
        &self,
        tx: &mut Self::Tx,
        reference: CheckoutReference,
    ) -> Result<Vec<Reservation>> {
        let mut reservations: Vec<_> = tx
            .scratch
            .reservations
            .values()
            .filter(|r| r.reference == reference)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(reservations)
    }

    async fn expired_reservations(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let mut reservations: Vec<_> = tx
            .scratch
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.expires_at);
        Ok(reservations)
    }

    async fn upsert_cart_line(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        sku: &SkuCode,
        qty: u32,
    ) -> Result<()> {
        tx.scratch.cart_lines.insert((session_id, sku.clone()), qty);
        tx.scratch.mutations += 1;
        Ok(())
    }

    async fn remove_cart_line(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        sku: &SkuCode,
    ) -> Result<bool> {
        let removed = tx
            .scratch
            .cart_lines
            .remove(&(session_id, sku.clone()))
            .is_some();
        if removed {
            tx.scratch.mutations += 1;
        }
        Ok(removed)
    }

    async fn cart_lines(&self, tx: &mut Self::Tx, session_id: SessionId) -> Result<Vec<CartLine>> {
        let mut lines: Vec<_> = tx
            .scratch
            .cart_lines
            .iter()
            .filter(|((s, _), _)| *s == session_id)
            .map(|((_, sku), qty)| CartLine {
                session_id,
                sku: sku.clone(),
                qty: *qty,
            })
            .collect();
        lines.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(lines)
    }

    async fn insert_session(&self, tx: &mut Self::Tx, session: &Session) -> Result<()> {
        tx.scratch.sessions.insert(session.id, session.clone());
        tx.scratch.mutations += 1;
        Ok(())
    }

    async fn session_by_token(
        &self,
        tx: &mut Self::Tx,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        Ok(tx
            .scratch
            .sessions
            .values()
            .find(|s| s.token == token && s.expires_at > now)
            .cloned())
    }

    async fn expired_sessions(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let mut sessions: Vec<_> = tx
            .scratch
            .sessions
            .values()
            .filter(|s| s.expires_at <= now)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.expires_at);
        Ok(sessions)
    }

    async fn delete_session(&self, tx: &mut Self::Tx, id: SessionId) -> Result<bool> {
        let removed = tx.scratch.sessions.remove(&id).is_some();
        if removed {
            tx.scratch.cart_lines.retain(|(s, _), _| *s != id);
            tx.scratch.mutations += 1;
        }
        Ok(removed)
    }

    async fn purge_session_token(&self, tx: &mut Self::Tx, token: &str) -> Result<bool> {
        let id = tx
            .scratch
            .sessions
            .values()
            .find(|s| s.token == token)
            .map(|s| s.id);
        match id {
            Some(id) => self.delete_session(tx, id).await,
            None => Ok(false),
        }
    }

    async fn insert_order_line(&self, tx: &mut Self::Tx, line: &OrderLine) -> Result<()> {
        tx.scratch.order_lines.push(line.clone());
        tx.scratch.mutations += 1;
        Ok(())
    }

    async fn order_lines_by_reference(
        &self,
        tx: &mut Self::Tx,
        reference: CheckoutReference,
    ) -> Result<Vec<OrderLine>> {
        let mut lines: Vec<_> = tx
            .scratch
            .order_lines
            .iter()
            .filter(|l| l.reference == reference)
            .cloned()
            .collect();
        lines.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(lines)
    }
}
