//! Session, token and rate limiting subsystem.
//!
//! [`AuthService`] is the entry point; the components behind it share one
//! [`KeyValueStore`] and one [`AccountDirectory`].

pub mod accounts;
pub mod blacklist;
pub mod bucket;
pub mod claims;
pub mod config;
pub mod credentials;
pub mod error;
pub mod federated;
pub mod kv;
pub mod rate_limit;
pub mod refresh;
pub mod service;
pub mod session;
pub mod token;
pub mod utils;
pub mod verification;

pub use accounts::{Account, AccountDirectory, MemoryAccounts, PgAccounts, Role, Subject};
pub use config::{AuthConfig, RateLimitConfig};
pub use error::AuthError;
pub use federated::{FederatedProfile, FederatedResolution};
pub use kv::{KeyValueStore, MemoryStore, RedisStore};
pub use refresh::TokenPair;
pub use service::{AuthService, LocalSignup};
pub use token::TokenCodec;
