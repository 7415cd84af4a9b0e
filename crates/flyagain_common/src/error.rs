//! Error taxonomy shared by all services.
//!
//! Each variant carries its wire policy: the numeric code sent in an
//! ErrorResponse and whether the connection survives the failure.

use flyagain_protocol::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Frame too large, unknown opcode, malformed payload. 400, keep open.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Missing, invalid, or expired token. 401, close the connection.
    #[error("authentication failed")]
    Auth,

    /// Acting on a resource the caller does not own. 403, keep open.
    #[error("forbidden")]
    Forbidden,

    /// Fixed-window limit exceeded. 429 with a retry hint, keep open.
    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Domain failures surfaced inside the operation's normal response
    /// (duplicate username, name taken, channel full, ...).
    #[error("{0}")]
    Business(String),

    /// DataService or shared store unreachable. Generic message only;
    /// internals are never put on the wire.
    #[error("service temporarily unavailable")]
    Unavailable,

    /// Everything the caller cannot act on. Logged with context, surfaced
    /// like Unavailable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> u32 {
        match self {
            ServiceError::Protocol(_) => 400,
            ServiceError::Auth => 401,
            ServiceError::Forbidden => 403,
            ServiceError::RateLimited { .. } => 429,
            ServiceError::Business(_) => 409,
            ServiceError::Unavailable => 503,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Whether the router must drop the connection after replying.
    pub fn closes_connection(&self) -> bool {
        matches!(self, ServiceError::Auth)
    }

    /// The message put on the wire. Internal details are kept off it.
    pub fn wire_message(&self) -> String {
        match self {
            ServiceError::Unavailable | ServiceError::Internal(_) => {
                "Service temporarily unavailable. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!(error = %err, "shared store operation failed");
        ServiceError::Unavailable
    }
}

impl From<FrameError> for ServiceError {
    fn from(err: FrameError) -> Self {
        ServiceError::Protocol(err.to_string())
    }
}
