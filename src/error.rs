use serde_json::Value;
use thiserror::Error;

/// Main error type for the campuslink session core
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct CoreError {
    /// Error code for categorization and identification
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional context for more detailed error information
    pub context: Option<String>,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Optional category for filtering and handling
    pub category: Option<ErrorCategory>,
}

/// Type alias for core results
pub type CoreResult<T> = Result<T, CoreError>;

/// Enumeration of error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // General errors
    Unknown,
    ConfigInvalid,

    // Storage errors
    StorageFailed,

    // Token and session errors
    TokenInvalid,
    Unauthorized,

    // Request errors
    PermissionDenied,
    NotFound,
    Validation,
    ServerError,
    RequestFailed,
    ResponseInvalid,

    // Channel errors
    ChannelSendFailed,

    // Event bus errors
    EventPublishFailed,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::StorageFailed => "STORAGE_FAILED",
            ErrorCode::TokenInvalid => "TOKEN_INVALID",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Validation => "VALIDATION_FAILED",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::RequestFailed => "REQUEST_FAILED",
            ErrorCode::ResponseInvalid => "RESPONSE_INVALID",
            ErrorCode::ChannelSendFailed => "CHANNEL_SEND_FAILED",
            ErrorCode::EventPublishFailed => "EVENT_PUBLISH_FAILED",
        };
        write!(f, "{}", code_str)
    }
}

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Informational only, not an actual error
    Info,
    /// Warning that doesn't prevent operation
    Warning,
    /// Error that affects functionality but allows continued operation
    Error,
    /// Severe error that prevents further operation
    Critical,
}

/// Error category for filtering and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (connection, timeout, etc.)
    Network,
    /// Authentication-related errors
    Authentication,
    /// Persistent storage errors
    Storage,
    /// Backend service errors
    Service,
    /// Internal errors
    Internal,
}

// Helper functions to create standard errors

/// Create a forced sign-out error for a 401 reply
pub fn unauthorized() -> CoreError {
    CoreError {
        code: ErrorCode::Unauthorized,
        message: "Your session has expired. Please sign in again".to_string(),
        context: None,
        severity: ErrorSeverity::Warning,
        category: Some(ErrorCategory::Authentication),
    }
}

/// Create a storage failure error
pub fn storage_failed(operation: &str, error: impl std::fmt::Display) -> CoreError {
    CoreError {
        code: ErrorCode::StorageFailed,
        message: format!("Failed to {} the session store", operation),
        context: Some(error.to_string()),
        severity: ErrorSeverity::Error,
        category: Some(ErrorCategory::Storage),
    }
}

/// Create an error for a request that never produced a response
pub fn request_failed(path: &str, error: &anyhow::Error) -> CoreError {
    CoreError {
        code: ErrorCode::RequestFailed,
        message: format!("Request to '{}' failed", path),
        context: Some(error.to_string()),
        severity: ErrorSeverity::Error,
        category: Some(ErrorCategory::Network),
    }
}

/// Create a validation error
pub fn validation(message: impl Into<String>) -> CoreError {
    CoreError {
        code: ErrorCode::Validation,
        message: message.into(),
        context: None,
        severity: ErrorSeverity::Warning,
        category: Some(ErrorCategory::Service),
    }
}

/// Create an error for an unusable token in a sign-in reply
pub fn token_invalid() -> CoreError {
    CoreError {
        code: ErrorCode::TokenInvalid,
        message: "The sign-in reply did not contain a usable token".to_string(),
        context: None,
        severity: ErrorSeverity::Error,
        category: Some(ErrorCategory::Authentication),
    }
}

/// Create an error for a reply body that could not be parsed
pub fn response_invalid(path: &str, error: impl std::fmt::Display) -> CoreError {
    CoreError {
        code: ErrorCode::ResponseInvalid,
        message: format!("The reply from '{}' could not be understood", path),
        context: Some(error.to_string()),
        severity: ErrorSeverity::Error,
        category: Some(ErrorCategory::Service),
    }
}

/// Create a channel send failure error
pub fn channel_send_failed(topic: &str, error: impl std::fmt::Display) -> CoreError {
    CoreError {
        code: ErrorCode::ChannelSendFailed,
        message: format!("Failed to publish to channel topic '{}'", topic),
        context: Some(error.to_string()),
        severity: ErrorSeverity::Warning,
        category: Some(ErrorCategory::Network),
    }
}

impl CoreError {
    /// Map a non-success HTTP status to the user-facing error for it.
    ///
    /// The raw reply body is preserved in the error context so callers
    /// receive the payload unchanged alongside the mapped message.
    pub fn from_status(status: u16, body: &str) -> CoreError {
        let (code, message, category) = match status {
            400 => (
                ErrorCode::Validation,
                validation_message(body),
                ErrorCategory::Service,
            ),
            401 => (
                ErrorCode::Unauthorized,
                "Your session has expired. Please sign in again".to_string(),
                ErrorCategory::Authentication,
            ),
            403 => (
                ErrorCode::PermissionDenied,
                "You do not have permission to perform this action".to_string(),
                ErrorCategory::Authentication,
            ),
            404 => (
                ErrorCode::NotFound,
                "The requested resource was not found".to_string(),
                ErrorCategory::Service,
            ),
            500 => (
                ErrorCode::ServerError,
                "Something went wrong. Please try again later".to_string(),
                ErrorCategory::Service,
            ),
            other => (
                ErrorCode::Unknown,
                format!("Error Code: {}", other),
                ErrorCategory::Service,
            ),
        };

        CoreError {
            code,
            message,
            context: if body.is_empty() {
                None
            } else {
                Some(body.to_string())
            },
            severity: ErrorSeverity::Warning,
            category: Some(category),
        }
    }
}

/// Pull the server-provided message out of a 400 reply body, if any
fn validation_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| "The submitted data failed validation".to_string())
}
