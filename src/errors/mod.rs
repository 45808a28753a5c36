use crate::limiter::LimitScope;
use crate::session::SessionState;
use thiserror::Error;

/// Typed error hierarchy for courier.
///
/// Use at module boundaries (admission, dispatch, session lifecycle, config validation).
/// Internal/leaf functions can keep using `anyhow::Result`; the `Internal` variant
/// converts through the `?` operator.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Invalid phone number: {raw:?}")]
    InvalidNumber { raw: String },

    #[error("Session is not ready (state: {state})")]
    SessionNotReady { state: SessionState },

    #[error("Rate limit reached: {scope}")]
    RateLimited { scope: LimitScope },

    #[error("Transport error for {recipient}: {message}")]
    Transport { recipient: String, message: String },

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Session failed: {0}")]
    Unrecoverable(String),

    #[error("Session is already authenticated")]
    AlreadyAuthenticated,

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CourierError {
    /// Whether the caller may retry the same operation later without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SessionNotReady { .. }
            | Self::RateLimited { .. }
            | Self::Transport { .. }
            | Self::Timeout(_)
            | Self::Internal(_) => true,
            Self::InvalidNumber { .. }
            | Self::AuthFailure(_)
            | Self::Unrecoverable(_)
            | Self::AlreadyAuthenticated
            | Self::UnknownTenant(_)
            | Self::Cancelled
            | Self::Config(_) => false,
        }
    }

    /// Stable reason code reported to operators and in bulk results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidNumber { .. } => "InvalidNumber",
            Self::SessionNotReady { .. } => "SessionNotReady",
            Self::RateLimited { scope } => scope.reason(),
            Self::Transport { .. } => "TransportError",
            Self::AuthFailure(_) => "AuthFailure",
            Self::Timeout(_) => "Timeout",
            Self::Unrecoverable(_) => "Unrecoverable",
            Self::AlreadyAuthenticated => "AlreadyAuthenticated",
            Self::UnknownTenant(_) => "UnknownTenant",
            Self::Cancelled => "Cancelled",
            Self::Config(_) => "ConfigError",
            Self::Internal(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests;
