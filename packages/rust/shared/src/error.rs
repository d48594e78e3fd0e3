//! Error types for Photoblog.
//!
//! Library crates use [`PhotoblogError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Maximum number of characters of a raw provider payload kept in an error.
pub const EXCERPT_LIMIT: usize = 800;

/// Why a generation call was retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    /// HTTP 429 from the provider.
    RateLimited,
    /// The model stopped at its token limit without returning any text.
    Truncated,
}

impl std::fmt::Display for RetryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate limited"),
            Self::Truncated => f.write_str("truncated response"),
        }
    }
}

/// Top-level error type for all Photoblog operations.
#[derive(Debug, thiserror::Error)]
pub enum PhotoblogError {
    /// Configuration loading or validation error. Fatal, never retried.
    #[error("config error: {message}")]
    Config { message: String },

    /// The AI provider answered with a non-2xx status other than 429.
    #[error("provider error: HTTP {status}: {excerpt}")]
    Provider { status: u16, excerpt: String },

    /// The request could not be sent or the body could not be read.
    #[error("network error: {0}")]
    Network(String),

    /// Rate limiting or truncation persisted through every allowed attempt.
    #[error("generation failed after {attempts} attempts ({trigger})")]
    RetriesExhausted { attempts: u32, trigger: RetryTrigger },

    /// The provider answered, but not with the shape we expected.
    #[error("malformed response: {message}. Raw={excerpt}")]
    MalformedResponse { message: String, excerpt: String },

    /// Media source (Drive, local folder) error.
    #[error("source error: {0}")]
    Source(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// An image could not be decoded, transformed, or re-encoded.
    #[error("image error: {0}")]
    Image(String),

    /// Git publish error.
    #[error("publish error: {0}")]
    Publish(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (precondition violated, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PhotoblogError>;

impl PhotoblogError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a provider error, keeping only a bounded prefix of the body.
    pub fn provider(status: u16, body: &str) -> Self {
        Self::Provider {
            status,
            excerpt: excerpt(body),
        }
    }

    /// Create a malformed-response error, keeping only a bounded prefix of the raw text.
    pub fn malformed(msg: impl Into<String>, raw: &str) -> Self {
        Self::MalformedResponse {
            message: msg.into(),
            excerpt: excerpt(raw),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable label for the error class, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Provider { .. } => "ProviderError",
            Self::Network(_) => "NetworkError",
            Self::RetriesExhausted { .. } => "RetriesExhausted",
            Self::MalformedResponse { .. } => "MalformedResponse",
            Self::Source(_) => "SourceError",
            Self::Storage(_) => "StorageError",
            Self::Image(_) => "ImageError",
            Self::Publish(_) => "PublishError",
            Self::Io { .. } => "IoError",
            Self::Validation { .. } => "ValidationError",
        }
    }
}

/// First [`EXCERPT_LIMIT`] characters of `raw`, cut on a char boundary.
pub fn excerpt(raw: &str) -> String {
    match raw.char_indices().nth(EXCERPT_LIMIT) {
        Some((idx, _)) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}
