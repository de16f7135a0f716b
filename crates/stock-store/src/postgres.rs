use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use common::{CheckoutReference, ReservationId, SessionId, SkuCode};

use crate::model::{CartLine, OrderLine, Reservation, ReservationStatus, Session, Sku};
use crate::store::StockStore;
use crate::{Result, StoreError};

/// PostgreSQL-backed stock store implementation.
///
/// The oversell guard is the conditional `UPDATE ... WHERE available >= $n`
/// in [`decrement`](StockStore::decrement): the database row serializes
/// concurrent writers, so no in-process locking is needed anywhere.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Creates a new PostgreSQL stock store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        tracing::debug!("running stock schema migrations");
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_sku(row: &PgRow) -> Result<Sku> {
        Ok(Sku {
            code: SkuCode::new(row.try_get::<String, _>("code")?),
            size: row.try_get("size")?,
            available: qty_from_db(row.try_get("available")?)?,
        })
    }

    fn row_to_reservation(row: &PgRow) -> Result<Reservation> {
        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            reference: CheckoutReference::from_uuid(row.try_get::<Uuid, _>("reference")?),
            session_id: SessionId::from_uuid(row.try_get::<Uuid, _>("session_id")?),
            sku: SkuCode::new(row.try_get::<String, _>("sku")?),
            qty: qty_from_db(row.try_get("qty")?)?,
            status: ReservationStatus::Pending,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn row_to_session(row: &PgRow) -> Result<Session> {
        Ok(Session {
            id: SessionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            token: row.try_get("token")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
        Ok(OrderLine {
            id: row.try_get::<Uuid, _>("id")?,
            reference: CheckoutReference::from_uuid(row.try_get::<Uuid, _>("reference")?),
            sku: SkuCode::new(row.try_get::<String, _>("sku")?),
            qty: qty_from_db(row.try_get("qty")?)?,
            unit_price: common::Money::from_cents(row.try_get("unit_price_cents")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Quantities are persisted as BIGINT with a non-negative check; anything
/// outside u32 range means the row was tampered with.
fn qty_from_db(raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| StoreError::CorruptRow("quantity out of range"))
}

#[async_trait]
impl StockStore for PostgresStockStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.rollback().await?)
    }

    async fn sku(&self, tx: &mut Self::Tx, code: &SkuCode) -> Result<Sku> {
        let row = sqlx::query("SELECT code, size, available FROM skus WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&mut **tx)
            .await?;

        match row {
            Some(row) => Self::row_to_sku(&row),
            None => Err(StoreError::SkuNotFound(code.clone())),
        }
    }

    async fn upsert_sku(&self, tx: &mut Self::Tx, sku: &Sku) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO skus (code, size, available)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE SET size = EXCLUDED.size, available = EXCLUDED.available
            "#,
        )
        .bind(sku.code.as_str())
        .bind(&sku.size)
        .bind(i64::from(sku.available))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn all_skus(&self, tx: &mut Self::Tx) -> Result<Vec<Sku>> {
        let rows = sqlx::query("SELECT code, size, available FROM skus ORDER BY code")
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(Self::row_to_sku).collect()
    }

    async fn decrement(&self, tx: &mut Self::Tx, code: &SkuCode, qty: u32) -> Result<()> {
        // Single conditional update: the row serializes concurrent writers
        // and zero rows affected covers both the failed guard and a vanished
        // SKU.
        let result =
            sqlx::query("UPDATE skus SET available = available - $2 WHERE code = $1 AND available >= $2")
                .bind(code.as_str())
                .bind(i64::from(qty))
                .execute(&mut **tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InsufficientStock { sku: code.clone() });
        }
        Ok(())
    }

    async fn increment(&self, tx: &mut Self::Tx, code: &SkuCode, qty: u32) -> Result<()> {
        let result = sqlx::query("UPDATE skus SET available = available + $2 WHERE code = $1")
            .bind(code.as_str())
            .bind(i64::from(qty))
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SkuNotFound(code.clone()));
        }
        Ok(())
    }

    async fn create_reservation(
        &self,
        tx: &mut Self::Tx,
        reservation: &Reservation,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, reference, session_id, sku, qty, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.reference.as_uuid())
        .bind(reservation.session_id.as_uuid())
        .bind(reservation.sku.as_str())
        .bind(i64::from(reservation.qty))
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .execute(&mut **tx)
        .await?;
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
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET qty = $2, reference = $3, expires_at = $4
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(i64::from(qty))
        .bind(reference.as_uuid())
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_reservation(&self, tx: &mut Self::Tx, id: ReservationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_reservation_if_expired(
        &self,
        tx: &mut Self::Tx,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM reservations WHERE id = $1 AND status = 'PENDING' AND expires_at <= $2",
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending_reservations(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reference, session_id, sku, qty, status, expires_at
            FROM reservations
            WHERE session_id = $1 AND status = 'PENDING' AND expires_at > $2
            ORDER BY sku
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_reservation).collect()
    }

    async fn stale_reservations(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reference, session_id, sku, qty, status, expires_at
            FROM reservations
            WHERE session_id = $1 AND status = 'PENDING' AND expires_at <= $2
            ORDER BY sku
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_reservation).collect()
    }

    async fn reservations_by_reference(
        &self,
        tx: &mut Self::Tx,
        reference: CheckoutReference,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reference, session_id, sku, qty, status, expires_at
            FROM reservations
            WHERE reference = $1
            ORDER BY sku
            "#,
        )
        .bind(reference.as_uuid())
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_reservation).collect()
    }

    async fn expired_reservations(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reference, session_id, sku, qty, status, expires_at
            FROM reservations
            WHERE status = 'PENDING' AND expires_at <= $1
            ORDER BY expires_at
            "#,
        )
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_reservation).collect()
    }

    async fn upsert_cart_line(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        sku: &SkuCode,
        qty: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_lines (session_id, sku, qty)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id, sku) DO UPDATE SET qty = EXCLUDED.qty
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(sku.as_str())
        .bind(i64::from(qty))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn remove_cart_line(
        &self,
        tx: &mut Self::Tx,
        session_id: SessionId,
        sku: &SkuCode,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE session_id = $1 AND sku = $2")
            .bind(session_id.as_uuid())
            .bind(sku.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cart_lines(&self, tx: &mut Self::Tx, session_id: SessionId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            "SELECT session_id, sku, qty FROM cart_lines WHERE session_id = $1 ORDER BY sku",
        )
        .bind(session_id.as_uuid())
        .fetch_all(&mut **tx)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CartLine {
                    session_id: SessionId::from_uuid(row.try_get::<Uuid, _>("session_id")?),
                    sku: SkuCode::new(row.try_get::<String, _>("sku")?),
                    qty: qty_from_db(row.try_get("qty")?)?,
                })
            })
            .collect()
    }

    async fn insert_session(&self, tx: &mut Self::Tx, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, token, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(&session.token)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn session_by_token(
        &self,
        tx: &mut Self::Tx,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT id, token, created_at, expires_at
            FROM sessions
            WHERE token = $1 AND expires_at > $2
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(|row| Self::row_to_session(&row)).transpose()
    }

    async fn expired_sessions(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT id, token, created_at, expires_at
            FROM sessions
            WHERE expires_at <= $1
            ORDER BY expires_at
            "#,
        )
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_session).collect()
    }

    async fn delete_session(&self, tx: &mut Self::Tx, id: SessionId) -> Result<bool> {
        // Cart lines go with the session via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_session_token(&self, tx: &mut Self::Tx, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_order_line(&self, tx: &mut Self::Tx, line: &OrderLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (id, reference, sku, qty, unit_price_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(line.id)
        .bind(line.reference.as_uuid())
        .bind(line.sku.as_str())
        .bind(i64::from(line.qty))
        .bind(line.unit_price.cents())
        .bind(line.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn order_lines_by_reference(
        &self,
        tx: &mut Self::Tx,
        reference: CheckoutReference,
    ) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reference, sku, qty, unit_price_cents, created_at
            FROM order_lines
            WHERE reference = $1
            ORDER BY sku
            "#,
        )
        .bind(reference.as_uuid())
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_order_line).collect()
    }
}
