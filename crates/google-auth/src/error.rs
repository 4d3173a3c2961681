//! Error types for credential and authorization operations

use std::time::Duration;

/// Errors from token exchange, refresh, storage and the session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("credential store I/O error: {0}")]
    Io(String),

    #[error("authorization failed: {0}")]
    Flow(#[from] FlowError),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),
}

/// Ways the interactive authorization flow can end without a credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Authentication timeout: no callback within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("OAuth error: {0}")]
    Denied(String),

    #[error("No authorization code received")]
    MissingCode,

    #[error("state parameter mismatch")]
    StateMismatch,

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("an authorization flow is already in progress")]
    AlreadyInProgress,

    #[error("callback listener failed: {0}")]
    Listener(String),

    #[error("callback handling failed: {0}")]
    Callback(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_errors_carry_reason() {
        let err: Error = FlowError::Denied("access_denied".into()).into();
        assert_eq!(err.to_string(), "authorization failed: OAuth error: access_denied");

        let timeout = FlowError::Timeout(Duration::from_secs(300));
        assert_eq!(
            timeout.to_string(),
            "Authentication timeout: no callback within 300s"
        );
    }

    #[test]
    fn error_debug_includes_variant_name() {
        let err = Error::Io("permission denied".into());
        assert!(format!("{err:?}").contains("Io"));
    }
}
