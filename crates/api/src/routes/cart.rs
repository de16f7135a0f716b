//! Cart endpoints: the shopper's freely mutable desired quantities.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use checkout::CheckoutSessionProvider;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stock_store::{SkuCode, StockStore, StockStoreExt};

use crate::error::ApiError;
use crate::routes::{CART_TOKEN_HEADER, cart_token};
use crate::routes::checkout::AppState;

#[derive(Deserialize)]
pub struct PutLineRequest {
    pub qty: u32,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub session: String,
    pub lines: Vec<CartLineResponse>,
}

#[derive(Serialize)]
pub struct CartLineResponse {
    pub sku: String,
    pub qty: u32,
}

fn require_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    cart_token(headers)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {CART_TOKEN_HEADER} header")))
}

async fn cart_response<S: StockStore>(
    state: &AppState<S>,
    session: &stock_store::Session,
) -> Result<CartResponse, ApiError> {
    let lines = state.store.list_cart(session.id).await?;
    Ok(CartResponse {
        session: session.id.to_string(),
        lines: lines
            .into_iter()
            .map(|line| CartLineResponse {
                sku: line.sku.to_string(),
                qty: line.qty,
            })
            .collect(),
    })
}

/// GET /cart — the session's cart, creating the session on first contact.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: StockStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<CartResponse>, ApiError> {
    let token = require_token(&headers)?;
    let session = state.sessions.ensure_session(token, Utc::now()).await?;
    Ok(Json(cart_response(&state, &session).await?))
}

/// PUT /cart/items/{sku} — sets the desired quantity; zero removes the line.
#[tracing::instrument(skip(state, headers, req))]
pub async fn put_line<S: StockStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PutLineRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let token = require_token(&headers)?;
    let session = state.sessions.ensure_session(token, Utc::now()).await?;
    let sku = SkuCode::new(sku);

    if req.qty == 0 {
        state.store.drop_cart_line(session.id, &sku).await?;
    } else {
        state.store.put_cart_line(session.id, &sku, req.qty).await?;
    }

    Ok(Json(cart_response(&state, &session).await?))
}

/// DELETE /cart/items/{sku} — removes the line outright.
#[tracing::instrument(skip(state, headers))]
pub async fn delete_line<S: StockStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CartResponse>, ApiError> {
    let token = require_token(&headers)?;
    let session = state.sessions.ensure_session(token, Utc::now()).await?;

    state
        .store
        .drop_cart_line(session.id, &SkuCode::new(sku))
        .await?;

    Ok(Json(cart_response(&state, &session).await?))
}
