//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` that follows the failure
//! taxonomy of the mailbox client (connection, mailbox selection, command,
//! submission), and maps each variant to an MCP `ErrorData` for protocol
//! compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Every public mailbox operation either succeeds or returns exactly one of
/// these, describing which step failed.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed identifier)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Mailbox could not be opened (absent folder, rejected SELECT/EXAMINE)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad credentials, account disabled)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Connection establishment failure (TCP, TLS, greeting)
    #[error("connection failed: {0}")]
    Connection(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Server rejected a command (SEARCH, FETCH, STORE, MOVE, COPY, RENAME...)
    #[error("command failed: {0}")]
    Command(String),
    /// Outgoing mail could not be built or delivered
    #[error("mail submission failed: {0}")]
    Submission(String),
    /// Internal error (unexpected failure, panicked operation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether retrying against an alternate folder name can help
    ///
    /// Only mailbox-selection failures and command rejections qualify.
    /// Timeouts and connection-level failures never do.
    pub fn allows_folder_fallback(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Command(_))
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `AuthFailed` → `invalid_request`
    /// - `Connection`, `Timeout`, `Command`, `Submission`, `Internal` →
    ///   `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        let msg = self.to_string();
        match self {
            Self::InvalidInput(_) => {
                ErrorData::invalid_params(msg, Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(_) => {
                ErrorData::resource_not_found(msg, Some(json!({ "code": "not_found" })))
            }
            Self::AuthFailed(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "auth_failed" })))
            }
            Self::Connection(_) => {
                ErrorData::internal_error(msg, Some(json!({ "code": "connection" })))
            }
            Self::Timeout(_) => ErrorData::internal_error(msg, Some(json!({ "code": "timeout" }))),
            Self::Command(_) => ErrorData::internal_error(msg, Some(json!({ "code": "command" }))),
            Self::Submission(_) => {
                ErrorData::internal_error(msg, Some(json!({ "code": "submission" })))
            }
            Self::Internal(_) => {
                ErrorData::internal_error(msg, Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;
