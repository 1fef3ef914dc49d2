//! HTTP handlers. Each one is a thin adapter from request to service call.

pub mod account;
pub mod auth;
pub mod password;
pub mod two_factor;

pub use account::*;
pub use auth::*;
pub use password::*;
pub use two_factor::*;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use service_core::middleware::rate_limit::client_ip_from;
use std::convert::Infallible;

use crate::AppState;

/// Best-effort client address for session bookkeeping. Descriptive only.
pub struct ClientIp(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(
            client_ip_from(&parts.headers, &parts.extensions, state.client_ip_source)
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

pub(crate) fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
