//! Error types for the stdio bridge.
//!
//! Errors fall into two scopes. Backend-scoped errors (`BackendClosed`) are
//! terminal and shared by every subscriber; connection-scoped errors (`Write`,
//! `Protocol`, `Schema`) belong to the single caller that hit them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the bridge library.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Backend lifecycle
    #[error("Failed to spawn backend '{command}': {message}")]
    Spawn {
        command: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Backend closed")]
    BackendClosed,

    #[error("Write to backend failed: {message}")]
    Write {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // JSON-RPC
    #[error("JSON-RPC error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    OversizedMessage { size: usize, limit: usize },

    // Tool schemas
    #[error("Unsupported JSON schema type '{type_name}' for field '{field}'")]
    Schema { field: String, type_name: String },

    #[error("Array field '{field}' lacks an items schema")]
    MissingItems { field: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // File system and socket errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a write error from the underlying IO failure.
    pub fn write(err: std::io::Error) -> Self {
        BridgeError::Write {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// True once the backend is gone for good; retrying cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeError::BackendClosed | BridgeError::Spawn { .. })
    }

    /// True for errors raised while mapping a tool's input schema.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Schema { .. } | BridgeError::MissingItems { .. }
        )
    }

    /// HTTP status code a front end should answer with.
    ///
    /// Backend failures are reported as gateway errors since the HTTP server
    /// itself is healthy and only the process behind it misbehaved.
    pub fn http_status(&self) -> u16 {
        match self {
            BridgeError::BackendClosed
            | BridgeError::Write { .. }
            | BridgeError::Spawn { .. }
            | BridgeError::Protocol { .. } => 502,
            BridgeError::Timeout(_) => 504,
            BridgeError::OversizedMessage { .. } => 413,
            BridgeError::Schema { .. }
            | BridgeError::MissingItems { .. }
            | BridgeError::Json { .. } => 422,
            _ => 500,
        }
    }
}
