//! Final translation of call failures into user-facing errors
//!
//! Runs after the retry policy has given up. The kind decides how the tool
//! boundary reports the failure; the message is what the agent sees.

use std::fmt::{self, Display};

use crate::HasStatus;

/// User-facing error taxonomy for failed API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 401 / 403
    Authentication,
    /// 404
    NotFound,
    /// 429
    RateLimit,
    /// 400
    InvalidRequest,
    /// Everything else, including transport failures
    Internal,
}

impl ErrorKind {
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(401 | 403) => Self::Authentication,
            Some(404) => Self::NotFound,
            Some(429) => Self::RateLimit,
            Some(400) => Self::InvalidRequest,
            _ => Self::Internal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "AuthenticationError",
            Self::NotFound => "NotFoundError",
            Self::RateLimit => "RateLimitError",
            Self::InvalidRequest => "InvalidRequestError",
            Self::Internal => "InternalError",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, ready to cross the tool boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Classify a failure that the retry policy did not recover from.
pub fn classify<E: HasStatus + Display>(err: &E) -> ToolError {
    let kind = ErrorKind::from_status(err.status_code());
    let detail = err.to_string();
    let detail = detail.trim();
    let or_default = |fallback: &str| {
        if detail.is_empty() {
            fallback.to_string()
        } else {
            detail.to_string()
        }
    };

    let message = match kind {
        ErrorKind::Authentication => format!(
            "Authentication error: {}",
            or_default("Invalid or expired credentials")
        ),
        ErrorKind::NotFound => format!(
            "Resource not found: {}",
            or_default("The requested file or resource does not exist")
        ),
        ErrorKind::RateLimit => "Rate limit exceeded. Please try again later.".to_string(),
        ErrorKind::InvalidRequest => format!(
            "Invalid request: {}",
            or_default("The request parameters are invalid")
        ),
        ErrorKind::Internal => format!(
            "Google Drive API error: {}",
            or_default("Unknown error occurred")
        ),
    };

    ToolError { kind, message }
}
