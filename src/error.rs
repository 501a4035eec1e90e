//! Unified Error Handling System
//!
//! Every error produced anywhere in this crate funnels through `MeshError`,
//! built with `thiserror`. Variants map 1:1 onto the error-code taxonomy:
//! each carries a stable `code()` so a caller can match on behavior rather
//! than on the `Display` text.

use std::io;
use thiserror::Error;

use crate::schema::ValidationIssue;

/// Main error type for all meshline operations.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("schema validation failed: {issues:?}")]
    ValidationFailed { issues: Vec<ValidationIssue> },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("version gap on endpoint '{endpoint}': expected {expected}, got {got}")]
    VersionMismatch {
        endpoint: String,
        expected: u64,
        got: u64,
    },

    #[error("descriptor mismatch: local {local_hash}, remote {remote_hash}")]
    DescriptorMismatch {
        local_hash: String,
        remote_hash: String,
    },

    #[error("missing handler for RPC endpoint '{endpoint}'")]
    MissingHandler { endpoint: String },

    #[error("unknown endpoint '{endpoint}'")]
    UnknownEndpoint { endpoint: String },

    #[error("replica for '{endpoint}' is not ready")]
    NotReady { endpoint: String },

    #[error("endpoint name '{name}' is invalid: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("push queue for '{endpoint}' is full (cap {cap})")]
    QueueFull { endpoint: String, cap: usize },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handler '{endpoint}' failed: {message}")]
    Handler {
        endpoint: String,
        message: String,
        code: Option<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for meshline operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Stable wire-safe error code, see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    Timeout,
    ConnectionFailed,
    VersionMismatch,
    DescriptorMismatch,
    MissingHandler,
    UnknownEndpoint,
    NotReady,
    InvalidDescriptor,
    QueueFull,
    Cancelled,
    Protocol,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::VersionMismatch => "VERSION_MISMATCH",
            ErrorCode::DescriptorMismatch => "DESCRIPTOR_MISMATCH",
            ErrorCode::MissingHandler => "MISSING_HANDLER",
            ErrorCode::UnknownEndpoint => "UNKNOWN_ENDPOINT",
            ErrorCode::NotReady => "NOT_READY",
            ErrorCode::InvalidDescriptor => "INVALID_DESCRIPTOR",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl MeshError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            MeshError::Timeout { .. } => ErrorCode::Timeout,
            MeshError::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            MeshError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            MeshError::DescriptorMismatch { .. } => ErrorCode::DescriptorMismatch,
            MeshError::MissingHandler { .. } => ErrorCode::MissingHandler,
            MeshError::UnknownEndpoint { .. } => ErrorCode::UnknownEndpoint,
            MeshError::NotReady { .. } => ErrorCode::NotReady,
            MeshError::InvalidDescriptor { .. } => ErrorCode::InvalidDescriptor,
            MeshError::QueueFull { .. } => ErrorCode::QueueFull,
            MeshError::Cancelled => ErrorCode::Cancelled,
            MeshError::Protocol { .. } => ErrorCode::Protocol,
            MeshError::Json(_) | MeshError::Io(_) | MeshError::Handler { .. } => {
                ErrorCode::Internal
            }
            MeshError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Local recovery is attempted only for these;
    /// everything else surfaces to the caller.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(
            self,
            MeshError::ConnectionFailed { .. }
                | MeshError::VersionMismatch { .. }
                | MeshError::Timeout { .. }
        )
    }
}

/// Error context trait for adding additional context to errors, mirroring
/// the ergonomics of `anyhow::Context` but returning `MeshError`.
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> MeshResult<T>
    where
        F: FnOnce() -> String;

    fn context(self, msg: &str) -> MeshResult<T>;
}

impl<T, E: std::fmt::Display> ErrorContext<T> for Result<T, E> {
    fn with_context<F>(self, f: F) -> MeshResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| MeshError::Internal(format!("{}: {}", f(), e)))
    }

    fn context(self, msg: &str) -> MeshResult<T> {
        self.map_err(|e| MeshError::Internal(format!("{}: {}", msg, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ErrorCode::ValidationFailed.as_str(), "VALIDATION_FAILED");
        assert_eq!(ErrorCode::UnknownEndpoint.as_str(), "UNKNOWN_ENDPOINT");
    }

    #[test]
    fn recoverability_matches_policy() {
        assert!(MeshError::ConnectionFailed {
            reason: "x".into()
        }
        .is_locally_recoverable());
        assert!(!MeshError::MissingHandler {
            endpoint: "echo".into()
        }
        .is_locally_recoverable());
    }

    #[test]
    fn context_wraps_message() {
        let r: Result<(), io::Error> = Err(io::Error::new(io::ErrorKind::NotFound, "nope"));
        let wrapped = r.context("loading config");
        assert!(wrapped.unwrap_err().to_string().contains("loading config"));
    }
}
