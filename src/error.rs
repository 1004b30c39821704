//! Error types for the comet client.
//!
//! Misuse is reported synchronously at the call site. Protocol decode
//! failures and unknown correlation ids never surface here; the client logs
//! and drops them while processing transport events.

// =============================================================================
// CONFIG
// =============================================================================

/// Errors produced while building a [`crate::ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No server URL was provided.
    #[error("missing server URL: set COMET_SERVER_URL")]
    MissingServerUrl,

    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}

// =============================================================================
// CLIENT
// =============================================================================

/// Errors produced by [`crate::Client`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A channel name was empty or contained whitespace.
    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// A route was empty or contained whitespace.
    #[error("invalid route: {0:?}")]
    InvalidRoute(String),

    /// No response arrived within the caller's deadline.
    #[error("request {request_id} timed out")]
    RequestTimeout { request_id: String },

    /// The pending entry was cancelled or the client was dropped.
    #[error("request {request_id} was abandoned before a response arrived")]
    RequestAbandoned { request_id: String },

    /// The client configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
