//! # Tollgate
//!
//! Session, token and rate limiting service for account authentication.
//!
//! ## Tokens
//!
//! Access and refresh tokens are HS256 JWTs carrying the account email, the
//! account id, the token kind and a random `jti`. Refresh tokens are tracked
//! by hash in a shared key/value store and rotated on every use; each account
//! has at most one live refresh session.
//!
//! ## Revocation
//!
//! Logout and rotation blacklist token ids for the remainder of their
//! lifetime. A blacklist lookup that cannot reach the store treats the token
//! as revoked.
//!
//! ## Rate limiting
//!
//! Token buckets per feature and subject (client IP or email) live in the
//! same store. If it becomes unreachable, each instance keeps limiting with
//! in-process buckets.

pub mod auth;
pub mod cli;
pub mod tollgate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
