//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays in memory for the lifetime of one authorization
//! attempt and is sent with the code exchange; the S256 challenge goes into
//! the consent URL so Google can bind the returned code to this process.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::OAuthClient;
use crate::constants::SCOPES;
use crate::error::{Error, Result};

/// Verifier and challenge for a single authorization attempt. Never persisted.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// 32 random bytes, URL-safe base64 without padding (43 characters).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the consent URL.
///
/// `access_type=offline` asks for a refresh token and `prompt=consent`
/// makes Google issue one again for users who already granted access.
pub fn build_authorization_url(
    client: &OAuthClient,
    redirect_uri: &str,
    challenge: &str,
    state: &str,
) -> Result<Url> {
    let mut url = Url::parse(&client.auth_endpoint)
        .map_err(|e| Error::Http(format!("invalid authorization endpoint: {e}")))?;

    url.query_pairs_mut()
        .append_pair("client_id", &client.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state);

    Ok(url)
}
