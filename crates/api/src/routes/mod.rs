//! HTTP route handlers.

pub mod cart;
pub mod checkout;
pub mod health;
pub mod metrics;
pub mod skus;
pub mod webhook;

use axum::http::HeaderMap;

/// Header carrying the opaque session-correlation token. Cookie issuance is
/// handled upstream; this service only correlates by the value.
pub const CART_TOKEN_HEADER: &str = "x-cart-token";

/// Extracts the correlation token from the request headers.
pub(crate) fn cart_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CART_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|token| !token.is_empty())
}
