//! Caller-facing error taxonomy for the auth subsystem.
//!
//! Messages are deliberately uniform: nothing here reveals whether an account
//! exists, which credential was wrong, or what the backing store reported.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Too many requests, retry in {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Token does not match account")]
    AccountMismatch,
    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("Verification code is invalid or expired")]
    InvalidVerificationCode,
    #[error("Service temporarily unavailable")]
    Unavailable,
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCredentials | Self::InvalidToken | Self::AccountMismatch => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidRequest(_) | Self::InvalidVerificationCode => StatusCode::BAD_REQUEST,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Token mismatches are reported as a plain invalid token to the caller.
        let message = match self {
            Self::AccountMismatch => Self::InvalidToken.to_string(),
            ref other => other.to_string(),
        };
        let mut response = (status, Json(json!({ "error": message }))).into_response();

        if let Self::RateLimitExceeded {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}
