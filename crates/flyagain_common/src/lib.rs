//! Infrastructure shared by every gateway service.
//!
//! ## Module Structure
//! - `config` - Configuration loading (toml file + environment overrides)
//! - `error` - The service error taxonomy and its wire mapping
//! - `gateway` - The shared accept/watchdog/framer/router pipeline
//! - `token` - Signed session tokens (HMAC-SHA256 JWT)
//! - `password` - Adaptive password verifier
//! - `store` - Shared in-memory store (sessions, caches, counters, sets)
//! - `limiter` - Process-wide connection limiter
//! - `data_client` - DataService RPC client
//! - `validation` - Account and character input validation

pub mod config;
pub mod data_client;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod password;
pub mod store;
pub mod token;
pub mod validation;
pub mod zones;

pub use config::Config;
pub use data_client::{DataApi, DataClient};
pub use error::ServiceError;
pub use limiter::{ConnectionGuard, ConnectionLimiter};
pub use password::PasswordVerifier;
pub use store::{SessionData, SharedStore};
pub use token::{TokenClaims, TokenService};

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Milliseconds since the Unix epoch.
pub fn unix_now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
