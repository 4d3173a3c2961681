//! Retry and error classification for outbound Google API calls
//!
//! Every remote call made on behalf of a tool runs through
//! [`RetryPolicy::execute`]. The policy decides from the failure's HTTP status
//! whether another attempt is worthwhile; once it gives up, [`classify`]
//! translates the final failure into the user-facing [`ToolError`] taxonomy.
//!
//! Call flow:
//! 1. Tool builds a closure that performs one request and returns `Result<T, CallError>`
//! 2. `RetryPolicy::execute` runs it, sleeping `base_delay * attempt` between tries
//! 3. 4xx (except 429) stops immediately; 429, 5xx and transport errors are retried
//! 4. The last error is handed to `classify` for the tool boundary

pub mod classify;
pub mod retry;

pub use classify::{ErrorKind, ToolError, classify};
pub use retry::{ErrorClassification, RetryPolicy, classify_status};

use serde::Deserialize;

/// Anything that can report the HTTP status of a failed call.
///
/// `None` means the call never produced a response (DNS, connect, timeout,
/// decode failure). Those are treated as transient.
pub trait HasStatus {
    fn status_code(&self) -> Option<u16>;
}

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CallError {
    pub status: Option<u16>,
    pub message: String,
}

impl CallError {
    /// Failure with an HTTP status from upstream.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Failure before any response was received.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Build an error from a non-success response.
    ///
    /// Google APIs wrap failures as `{"error":{"code":404,"message":"..."}}`.
    /// The inner message is used when present, otherwise the raw body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        Self::status(status, extract_message(&body))
    }
}

impl HasStatus for CallError {
    fn status_code(&self) -> Option<u16> {
        self.status
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    message: String,
}

fn extract_message(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ => body.trim().to_string(),
    }
}
