//! Error types for the chatrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! carries a stable `kind()` so callers always receive a structured failure.

use thiserror::Error;

/// The top-level error type for all chatrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration ---
    #[error("Configuration not found: {name}")]
    ConfigNotFound { name: String },

    #[error("Configuration cycle detected: {}", chain.join(" -> "))]
    ConfigCycle { chain: Vec<String> },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Tools ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Model backend ---
    #[error("Model backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    // --- Orchestration ---
    #[error("Malformed assistant set: {0}")]
    MalformedAssistantSet(String),

    #[error("Conversation {token} already has a turn in flight")]
    ContextConflict { token: String },

    #[error("Turn timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    // --- Streaming ---
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    // --- Persistence ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable, kebab-case error kind reported at the request boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config-not-found",
            Self::ConfigCycle { .. } => "config-cycle",
            Self::Config { .. } => "config-invalid",
            Self::Tool(ToolError::UnknownTool(_)) => "unknown-tool",
            Self::Tool(ToolError::InvalidArgs { .. }) => "invalid-args",
            Self::Tool(ToolError::Unavailable { .. }) => "tool-unavailable",
            Self::BackendUnavailable(_) => "backend-unavailable",
            Self::MalformedAssistantSet(_) => "malformed-assistant-set",
            Self::ContextConflict { .. } => "context-conflict",
            Self::Timeout { .. } => "timeout",
            Self::Stream(_) => "stream-unavailable",
            Self::Store(_) => "store-unavailable",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Deployment not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl BackendError {
    /// Whether a second attempt has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::RateLimited { .. }
            | Self::StreamInterrupted(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArgs { tool_name: String, reason: String },

    #[error("Tool unavailable: {tool_name}: {reason}")]
    Unavailable { tool_name: String, reason: String },
}

impl ToolError {
    pub fn invalid(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store unreachable: {0}")]
    Unavailable(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("Stream transport not configured")]
    NotConfigured,

    #[error("Stream {0} has expired")]
    Expired(String),

    #[error("Stream transport unreachable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_correctly() {
        let err = Error::BackendUnavailable(BackendError::ApiError {
            status_code: 503,
            message: "Service unavailable".into(),
        });
        assert!(err.to_string().contains("503"));
        assert_eq!(err.kind(), "backend-unavailable");
    }

    #[test]
    fn cycle_lists_chain() {
        let err = Error::ConfigCycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.kind(), "config-cycle");
    }

    #[test]
    fn tool_errors_map_to_distinct_kinds() {
        assert_eq!(
            Error::from(ToolError::UnknownTool("x".into())).kind(),
            "unknown-tool"
        );
        assert_eq!(
            Error::from(ToolError::invalid("search", "missing query")).kind(),
            "invalid-args"
        );
        assert_eq!(
            Error::from(ToolError::unavailable("search", "timeout")).kind(),
            "tool-unavailable"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(BackendError::Network("reset".into()).is_retryable());
        assert!(BackendError::ApiError { status_code: 502, message: String::new() }.is_retryable());
        assert!(!BackendError::ApiError { status_code: 400, message: String::new() }.is_retryable());
        assert!(!BackendError::AuthenticationFailed("bad key".into()).is_retryable());
    }
}
