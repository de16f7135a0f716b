//! Periodic release of expired holds and expired sessions.

use chrono::{DateTime, Utc};

use stock_store::{Reservation, Session, StockStore, StoreError};

/// What one sweep pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired holds whose stock was credited back.
    pub released: usize,
    /// Expired sessions (and their cart lines) deleted.
    pub sessions_deleted: usize,
    /// Rows that failed and will be retried on the next pass.
    pub failed: usize,
}

/// Finds reservations past their expiry and releases their held inventory.
///
/// Each reservation is processed in its own small transaction and failures
/// are logged and skipped: partial sweep progress is safe because a
/// released reservation is gone and the rest are picked up on the next
/// pass. Running two sweeps concurrently is equally safe — the conditional
/// per-row delete makes the release idempotent.
pub struct ExpirySweeper<S: StockStore> {
    store: S,
}

impl<S: StockStore> ExpirySweeper<S> {
    /// Creates a sweeper over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Runs one sweep pass at `now`.
    #[tracing::instrument(skip(self, now))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let expired = match self.snapshot_expired(now).await {
            Ok(expired) => expired,
            Err(err) => {
                tracing::warn!(error = %err, "could not list expired reservations");
                report.failed += 1;
                return report;
            }
        };

        for reservation in expired {
            match self.release(&reservation, now).await {
                Ok(true) => {
                    metrics::counter!("reservations_swept_total").increment(1);
                    report.released += 1;
                }
                // Already gone, or renewed by a reconciliation that beat us.
                Ok(false) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        reservation = %reservation.id,
                        sku = %reservation.sku,
                        error = %err,
                        "failed to release expired hold"
                    );
                }
            }
        }

        report.sessions_deleted = self.sweep_sessions(now, &mut report.failed).await;

        if report != SweepReport::default() {
            tracing::info!(
                released = report.released,
                sessions_deleted = report.sessions_deleted,
                failed = report.failed,
                "sweep pass complete"
            );
        }
        report
    }

    /// Explicit polling loop driving [`sweep_once`](Self::sweep_once) on a
    /// fixed period. Runs until the task is aborted.
    pub async fn run(self, period: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sweep_once(Utc::now()).await;
        }
    }

    async fn snapshot_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        let mut tx = self.store.begin().await?;
        let expired = self.store.expired_reservations(&mut tx, now).await?;
        self.store.commit(tx).await?;
        Ok(expired)
    }

    /// Releases one expired hold. The conditional delete gates the credit,
    /// so a row another sweep already drained (or a reconciliation just
    /// renewed) is skipped rather than double-credited.
    async fn release(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.store.begin().await?;
        let deleted = self
            .store
            .delete_reservation_if_expired(&mut tx, reservation.id, now)
            .await?;
        if deleted {
            self.store
                .increment(&mut tx, &reservation.sku, reservation.qty)
                .await?;
        }
        self.store.commit(tx).await?;
        Ok(deleted)
    }

    async fn sweep_sessions(&self, now: DateTime<Utc>, failed: &mut usize) -> usize {
        let expired: Vec<Session> = match self.snapshot_expired_sessions(now).await {
            Ok(expired) => expired,
            Err(err) => {
                tracing::warn!(error = %err, "could not list expired sessions");
                *failed += 1;
                return 0;
            }
        };

        let mut deleted = 0;
        for session in expired {
            match self.delete_session(&session).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    *failed += 1;
                    tracing::warn!(session = %session.id, error = %err, "failed to delete expired session");
                }
            }
        }
        deleted
    }

    async fn snapshot_expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let mut tx = self.store.begin().await?;
        let expired = self.store.expired_sessions(&mut tx, now).await?;
        self.store.commit(tx).await?;
        Ok(expired)
    }

    async fn delete_session(&self, session: &Session) -> Result<bool, StoreError> {
        let mut tx = self.store.begin().await?;
        let deleted = self.store.delete_session(&mut tx, session.id).await?;
        self.store.commit(tx).await?;
        Ok(deleted)
    }
}
