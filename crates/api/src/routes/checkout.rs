//! Checkout endpoint: reconcile the cart into holds and return a quote.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use checkout::{
    CheckoutError, CheckoutSessionProvider, FinalizationHandler, PriceListPricing, PricingService,
    Reconciler, StoreSessionProvider,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stock_store::StockStore;

use crate::error::ApiError;
use crate::routes::cart_token;

/// Shared application state accessible from all handlers.
pub struct AppState<S: StockStore> {
    pub store: S,
    pub sessions: StoreSessionProvider<S>,
    pub pricing: PriceListPricing,
    pub reconciler: Reconciler<S>,
    pub finalizer: FinalizationHandler<S, PriceListPricing>,
}

#[derive(Deserialize)]
pub struct CheckoutQuery {
    pub currency: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub reference: String,
    pub currency: String,
    pub total_cents: i64,
    pub lines: Vec<CheckoutLineResponse>,
}

#[derive(Serialize)]
pub struct CheckoutLineResponse {
    pub sku: String,
    pub qty: u32,
    pub expires_at: chrono::DateTime<Utc>,
}

/// POST /checkout — reconciles the session's cart against its holds and
/// quotes the result. 404 when the token has no live session, 409 when a
/// line cannot be covered (including losing a race for the last units).
#[tracing::instrument(skip(state, headers, query))]
pub async fn checkout<S: StockStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<CheckoutQuery>,
    headers: HeaderMap,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let now = Utc::now();
    // An absent token is indistinguishable from an unknown one.
    let token = cart_token(&headers).ok_or(CheckoutError::SessionNotFound)?;
    let context = state.sessions.context(token, now).await?;

    let outcome = state.reconciler.reconcile(context.session.id, now).await?;

    let currency = query.currency.unwrap_or_else(|| "USD".to_string());
    let total = state
        .pricing
        .quote(
            &outcome.reservations,
            &currency,
            context.shipping_cost,
            context.tax_rate_bps,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        reference: outcome.reference.to_string(),
        currency,
        total_cents: total.cents(),
        lines: outcome
            .reservations
            .iter()
            .map(|r| CheckoutLineResponse {
                sku: r.sku.to_string(),
                qty: r.qty,
                expires_at: r.expires_at,
            })
            .collect(),
    }))
}
