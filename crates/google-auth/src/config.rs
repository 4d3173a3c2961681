//! OAuth client registration

use common::Secret;

use crate::constants::{AUTHORIZE_ENDPOINT, CALLBACK_PATH, DEFAULT_REDIRECT_PORT, TOKEN_ENDPOINT};

/// A registered Google OAuth client (desktop application type).
///
/// Endpoints default to Google's and are overridable so a local identity
/// provider can stand in during tests.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_port: u16,
    pub auth_endpoint: String,
    pub token_endpoint: String,
}

impl OAuthClient {
    pub fn new(client_id: impl Into<String>, client_secret: Secret<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_port: DEFAULT_REDIRECT_PORT,
            auth_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Redirect URI on the configured port.
    pub fn redirect_uri(&self) -> String {
        self.redirect_uri_for(self.redirect_port)
    }

    pub fn redirect_uri_for(&self, port: u16) -> String {
        format!("http://localhost:{port}{CALLBACK_PATH}")
    }
}
