//! Tool call error types
//!
//! Everything that can go wrong inside a tool once its arguments have been
//! deserialized. Each variant maps onto an MCP error code.

use call_executor::{ErrorKind, ToolError};
use rmcp::model::{ErrorCode, ErrorData};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A Drive API failure after retries, already classified.
    #[error(transparent)]
    Api(#[from] ToolError),
}

impl Error {
    pub fn invalid_arguments(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// Error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArguments { .. } => ErrorCode::INVALID_PARAMS,
            Error::Api(err) => match err.kind {
                ErrorKind::Internal => ErrorCode::INTERNAL_ERROR,
                ErrorKind::Authentication
                | ErrorKind::NotFound
                | ErrorKind::RateLimit
                | ErrorKind::InvalidRequest => ErrorCode::INVALID_REQUEST,
            },
        }
    }

    /// Short label for logs and the `outcome` metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Error::InvalidArguments { .. } => "invalid_arguments",
            Error::Api(err) => err.kind.as_str(),
        }
    }
}

impl From<Error> for ErrorData {
    fn from(err: Error) -> Self {
        let data = match &err {
            Error::Api(tool_error) => Some(json!({ "kind": tool_error.kind.as_str() })),
            Error::InvalidArguments { .. } => None,
        };
        ErrorData::new(err.code(), err.to_string(), data)
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
