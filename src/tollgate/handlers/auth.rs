//! Login, refresh, logout and token introspection endpoints.

use super::{client_ip, ErrorResponse};
use crate::auth::{
    claims::EnrichedClaims, refresh::TokenPair, utils::extract_bearer_token, AuthError,
    AuthService,
};
use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Tokens {
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_in: u64,
}

impl From<TokenPair> for Tokens {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type.to_string(),
            expires_in: pair.expires_in,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Me {
    id: Uuid,
    email: String,
    display_name: String,
    role: String,
    authorities: Vec<String>,
    expires_at: i64,
}

impl From<EnrichedClaims> for Me {
    fn from(claims: EnrichedClaims) -> Self {
        Self {
            id: claims.subject_id,
            email: claims.email,
            display_name: claims.display_name,
            role: claims.role.to_string(),
            authorities: claims.authorities,
            expires_at: claims.expires_at,
        }
    }
}

#[utoipa::path(
    post,
    path= "/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Login successful", body = Tokens, content_type = "application/json"),
        (status = 400, description = "Missing payload", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "Backing store unavailable", body = ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<Tokens>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::InvalidRequest("missing payload"));
    };

    let ip = client_ip(&headers, peer.as_ref(), auth.config().trust_proxy_headers());
    let secret = SecretString::from(request.password);
    let pair = auth.login(&request.email, &secret, &ip).await?;

    Ok(Json(pair.into()))
}

#[utoipa::path(
    post,
    path= "/refresh",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "New token pair", body = Tokens, content_type = "application/json"),
        (status = 400, description = "Missing payload", body = ErrorResponse),
        (status = 401, description = "Invalid or reused refresh token", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "Backing store unavailable", body = ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<Tokens>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::InvalidRequest("missing payload"));
    };

    let ip = client_ip(&headers, peer.as_ref(), auth.config().trust_proxy_headers());
    let pair = auth.refresh(&request.refresh_token, &ip).await?;

    Ok(Json(pair.into()))
}

#[utoipa::path(
    post,
    path= "/logout",
    request_body(content = RefreshRequest, description = "Refresh token to revoke"),
    responses (
        (status = 204, description = "Logged out"),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let ip = client_ip(&headers, peer.as_ref(), auth.config().trust_proxy_headers());
    let access = extract_bearer_token(&headers);
    let refresh = payload.map(|Json(request)| request.refresh_token);

    auth.logout(access.as_deref(), refresh.as_deref(), &ip).await;

    StatusCode::NO_CONTENT
}

#[utoipa::path(
    get,
    path= "/me",
    responses (
        (status = 200, description = "Claims of the presented access token", body = Me),
        (status = 401, description = "Missing, invalid or revoked token", body = ErrorResponse),
        (status = 503, description = "Account directory unavailable", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn me(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
) -> Result<Json<Me>, AuthError> {
    let token = extract_bearer_token(&headers).ok_or(AuthError::InvalidToken)?;
    let claims = auth.verify_access(&token).await?;

    Ok(Json(claims.into()))
}
