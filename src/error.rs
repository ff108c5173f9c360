//! Error types for callsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Transient vs. terminal classification for the scheduler's retry policy
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for callsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string; shells on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    DatabaseError,

    // Not Found (exit 3)
    CallNotFound,
    PersonNotFound,

    // Validation (exit 4)
    InvalidArgument,
    InvalidTransition,

    // Remote (exit 5)
    TransientNetwork,
    ServerRejected,

    // Gating (exit 6)
    NotPaired,
    PermissionMissing,
    QuotaExceeded,
    PlanExpired,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,
    FileMissing,

    // Cancelled (exit 9)
    Cancelled,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::CallNotFound => "CALL_NOT_FOUND",
            Self::PersonNotFound => "PERSON_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::TransientNetwork => "TRANSIENT_NETWORK",
            Self::ServerRejected => "SERVER_REJECTED",
            Self::NotPaired => "NOT_PAIRED",
            Self::PermissionMissing => "PERMISSION_MISSING",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::PlanExpired => "PLAN_EXPIRED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::FileMissing => "FILE_MISSING",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::DatabaseError => 2,
            Self::CallNotFound | Self::PersonNotFound => 3,
            Self::InvalidArgument | Self::InvalidTransition => 4,
            Self::TransientNetwork | Self::ServerRejected => 5,
            Self::NotPaired | Self::PermissionMissing | Self::QuotaExceeded | Self::PlanExpired => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError | Self::FileMissing => 8,
            Self::Cancelled => 9,
        }
    }

    /// Whether the scheduler should retry the enclosing pass with backoff.
    ///
    /// Only transient network failures and database lock contention qualify.
    /// Server rejections are captured per record and retried manually.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork | Self::DatabaseError)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in callsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: database not found at {path}")]
    NotInitialized { path: PathBuf },

    #[error("Call not found: {id}")]
    CallNotFound { id: String },

    #[error("Person not found: {phone}")]
    PersonNotFound { phone: String },

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// Device has no org/user pairing; the engines run local-only.
    #[error("Device is not paired with an organization")]
    NotPaired,

    #[error("Permission missing: {0}")]
    PermissionMissing(String),

    /// Timeouts, connection resets, 5xx, 408 and 429 responses.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// The server understood the request and refused it.
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Storage quota exceeded ({used_bytes} of {allowed_bytes} bytes)")]
    QuotaExceeded { used_bytes: u64, allowed_bytes: u64 },

    #[error("Plan expired on {expiry}")]
    PlanExpired { expiry: String },

    #[error("Recording file missing: {path}")]
    FileMissing { path: PathBuf },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized { .. } => ErrorCode::NotInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::CallNotFound { .. } => ErrorCode::CallNotFound,
            Self::PersonNotFound { .. } => ErrorCode::PersonNotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::NotPaired => ErrorCode::NotPaired,
            Self::PermissionMissing(_) => ErrorCode::PermissionMissing,
            Self::Transient(_) => ErrorCode::TransientNetwork,
            Self::Rejected { .. } => ErrorCode::ServerRejected,
            Self::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            Self::PlanExpired { .. } => ErrorCode::PlanExpired,
            Self::FileMissing { .. } => ErrorCode::FileMissing,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// True when the failure should escalate to the scheduler's backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.error_code().is_retryable()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized { path } => Some(format!(
                "No database at {}. Run the capture importer first or pass --db.",
                path.display()
            )),
            Self::CallNotFound { id } => Some(format!(
                "No call with ID '{id}'. Use `callsync status --pending` to list unsynced calls."
            )),
            Self::NotPaired => Some(
                "Pair the device: callsync pair --org <org-id> --user <user-id>".to_string(),
            ),
            Self::Transient(_) => {
                Some("The pass will be retried automatically with backoff.".to_string())
            }
            Self::Rejected { .. } => {
                Some("Fix the record and run `callsync retry <id>`.".to_string())
            }
            Self::QuotaExceeded { .. } => {
                Some("Recording uploads are paused until storage is freed or the plan is upgraded.".to_string())
            }
            Self::PlanExpired { .. } => {
                Some("Recording uploads resume once the plan is renewed.".to_string())
            }
            Self::Config(msg) if msg.contains("api") => {
                Some("Set CALLSYNC_API_URL or pass --api-url.".to_string())
            }
            Self::Config(msg) if msg.contains("recordings") => {
                Some("Set CALLSYNC_RECORDINGS_DIR or pass --recordings.".to_string())
            }
            _ => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = Error::Transient("timed out".into());
        assert!(err.is_transient());
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_rejected_is_not_retryable() {
        let err = Error::Rejected {
            status: 422,
            message: "bad number".into(),
        };
        assert!(!err.is_transient());
        assert_eq!(err.error_code().as_str(), "SERVER_REJECTED");
    }

    #[test]
    fn test_gating_errors_share_exit_code() {
        assert_eq!(Error::NotPaired.exit_code(), 6);
        assert_eq!(
            Error::QuotaExceeded {
                used_bytes: 2,
                allowed_bytes: 1
            }
            .exit_code(),
            6
        );
    }

    #[test]
    fn test_structured_json_includes_hint() {
        let json = Error::NotPaired.to_structured_json();
        assert_eq!(json["error"]["code"], "NOT_PAIRED");
        assert_eq!(json["error"]["retryable"], false);
        assert!(json["error"]["hint"].as_str().unwrap().contains("pair"));
    }
}
