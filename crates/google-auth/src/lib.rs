//! Google OAuth credential lifecycle
//!
//! Provides the interactive PKCE authorization flow, single-record credential
//! storage, and a session that hands out fresh access tokens to API callers.
//! No dependency on the tool server binary; usable and testable on its own.
//!
//! Credential flow:
//! 1. `CredentialSession::establish()` loads the stored credential, if usable
//! 2. Otherwise `AuthorizationFlow::run()` opens the consent page and waits
//!    on the local `/oauth2callback` listener (5 minute limit)
//! 3. The callback's code is exchanged via `token::exchange_code()` and the
//!    credential saved with `CredentialStore::save()`
//! 4. `CredentialSession::access_token()` refreshes expired tokens on demand
//!    and emits a `TokenRotation` for each renewal
//! 5. The persister task writes rotations carrying a refresh token back to disk

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod session;
pub mod token;

pub use config::OAuthClient;
pub use constants::*;
pub use credentials::{Credential, CredentialStore, default_token_dir, now_millis};
pub use error::{Error, FlowError, Result};
pub use flow::{AuthorizationFlow, FlowState, UrlPresenter};
pub use pkce::{PkcePair, build_authorization_url, compute_challenge, generate_verifier};
pub use session::{CredentialSession, TokenRotation, spawn_persister};
pub use token::{TokenResponse, exchange_code, refresh_token};
