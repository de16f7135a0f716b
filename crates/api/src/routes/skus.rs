//! Catalog seed seam: create/restock SKUs and read the catalog back.
//!
//! Full catalog management lives elsewhere; checkout only needs rows with
//! an available count to decrement.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use stock_store::{Sku, StockStore, StockStoreExt};

use crate::error::ApiError;
use crate::routes::checkout::AppState;

#[derive(Deserialize)]
pub struct UpsertSkuRequest {
    pub code: String,
    pub size: String,
    pub available: u32,
    pub unit_price_cents: Option<i64>,
}

#[derive(Serialize)]
pub struct SkuResponse {
    pub code: String,
    pub size: String,
    pub available: u32,
}

/// POST /skus — creates or restocks a SKU, optionally pricing it.
#[tracing::instrument(skip(state, req))]
pub async fn upsert<S: StockStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<UpsertSkuRequest>,
) -> Result<(StatusCode, Json<SkuResponse>), ApiError> {
    let sku = Sku::new(req.code.as_str(), req.size.as_str(), req.available);
    state.store.seed_sku(&sku).await?;

    if let Some(cents) = req.unit_price_cents {
        state
            .pricing
            .set_price(req.code.as_str(), common::Money::from_cents(cents));
    }

    Ok((
        StatusCode::CREATED,
        Json(SkuResponse {
            code: sku.code.to_string(),
            size: sku.size,
            available: sku.available,
        }),
    ))
}

/// GET /skus — lists the catalog with live availability.
#[tracing::instrument(skip(state))]
pub async fn list<S: StockStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<SkuResponse>>, ApiError> {
    let skus = state.store.list_skus().await?;
    Ok(Json(
        skus.into_iter()
            .map(|sku| SkuResponse {
                code: sku.code.to_string(),
                size: sku.size,
                available: sku.available,
            })
            .collect(),
    ))
}
