pub mod auth;
pub use self::auth::{login, logout, me, refresh};

pub mod health;
pub use self::health::health;

use crate::auth::utils::extract_client_ip;
use axum::{extract::ConnectInfo, http::HeaderMap};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    error: String,
}

/// The peer address, or the proxy headers when `trust_proxy_headers` is set.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy_headers: bool,
) -> String {
    trust_proxy_headers
        .then(|| extract_client_ip(headers))
        .flatten()
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
