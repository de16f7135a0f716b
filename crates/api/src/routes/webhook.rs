//! Payment-provider webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use checkout::PaymentConfirmation;
use chrono::Utc;
use serde::Serialize;
use stock_store::StockStore;

use crate::routes::checkout::AppState;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub reference: String,
    pub order_lines: usize,
    pub failed: usize,
    pub duplicate: bool,
}

/// POST /webhooks/payment — converts the reference's holds into sale
/// records. Delivery is at-least-once: an unknown reference answers 200 so
/// the provider stops retrying, while partial failures answer 500 so it
/// redelivers — already-drained rows are skipped on the retry.
///
/// Signature validation happens upstream of this handler.
#[tracing::instrument(skip(state, event), fields(reference = %event.reference))]
pub async fn payment<S: StockStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(event): Json<PaymentConfirmation>,
) -> (StatusCode, Json<WebhookResponse>) {
    let report = state.finalizer.finalize(&event, Utc::now()).await;

    let status = if report.failed > 0 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(WebhookResponse {
            reference: event.reference.to_string(),
            order_lines: report.order_lines.len(),
            failed: report.failed,
            duplicate: report.is_noop(),
        }),
    )
}
