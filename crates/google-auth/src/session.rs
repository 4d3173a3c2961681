//! Authenticated session over one credential
//!
//! Hands out access tokens, refreshing inline when the current one is within
//! a minute of expiry. Each successful refresh is announced as a
//! `TokenRotation` on a channel; the persister task on the other end writes
//! rotations that carry a new refresh token back to the store. Refreshes are
//! serialized by the credential Mutex, so concurrent callers share one
//! round-trip to the token endpoint.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OAuthClient;
use crate::constants::EXPIRY_SKEW_MILLIS;
use crate::credentials::{Credential, CredentialStore, now_millis};
use crate::error::{Error, Result};
use crate::flow::AuthorizationFlow;
use crate::token;

/// A renewed credential, emitted after every successful refresh.
#[derive(Debug, Clone)]
pub struct TokenRotation {
    pub credential: Credential,
    /// Whether the token endpoint issued a new refresh token.
    pub refresh_token_issued: bool,
}

/// Spawn the task that persists rotations.
///
/// Only rotations with a newly issued refresh token are written; an
/// access-token-only refresh leaves the stored record as is. The task ends
/// once every sender is dropped.
pub fn spawn_persister(
    store: Arc<CredentialStore>,
) -> (mpsc::UnboundedSender<TokenRotation>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<TokenRotation>();
    let handle = tokio::spawn(async move {
        while let Some(rotation) = rx.recv().await {
            if !rotation.refresh_token_issued {
                debug!("refresh kept the existing refresh token, nothing to persist");
                continue;
            }
            match store.save(&rotation.credential).await {
                Ok(()) => info!("persisted rotated credential"),
                Err(e) => warn!(error = %e, "failed to persist rotated credential"),
            }
        }
    });
    (tx, handle)
}

pub struct CredentialSession {
    client: OAuthClient,
    http: reqwest::Client,
    credential: Mutex<Credential>,
    rotations: mpsc::UnboundedSender<TokenRotation>,
    persister: Option<JoinHandle<()>>,
}

impl CredentialSession {
    /// Session whose rotations go to a caller-owned channel.
    pub fn new(
        credential: Credential,
        client: OAuthClient,
        http: reqwest::Client,
        rotations: mpsc::UnboundedSender<TokenRotation>,
    ) -> Self {
        Self {
            client,
            http,
            credential: Mutex::new(credential),
            rotations,
            persister: None,
        }
    }

    /// Session whose rotations are written back to `store`.
    pub fn persisted(
        credential: Credential,
        client: OAuthClient,
        http: reqwest::Client,
        store: Arc<CredentialStore>,
    ) -> Self {
        let (rotations, persister) = spawn_persister(store);
        Self {
            persister: Some(persister),
            ..Self::new(credential, client, http, rotations)
        }
    }

    /// Load the stored credential, or run the interactive flow when there is
    /// none or it can no longer be renewed.
    ///
    /// An unreadable or corrupt record is returned as an error; the operator
    /// has to repair or remove it before consent is requested again.
    pub async fn establish(flow: &AuthorizationFlow) -> Result<Self> {
        let store = flow.store().clone();
        let credential = match store.load().await? {
            Some(stored) if stored.is_usable(now_millis()) => {
                info!(path = %store.path().display(), "using stored credential");
                stored
            }
            Some(_) => {
                info!("stored credential expired without a refresh token, re-authorizing");
                flow.run().await?
            }
            None => {
                info!("no stored credential, starting authorization");
                flow.run().await?
            }
        };

        Ok(Self::persisted(
            credential,
            flow.client().clone(),
            flow.http().clone(),
            store,
        ))
    }

    /// A live access token, refreshing first if it is about to expire.
    pub async fn access_token(&self) -> Result<String> {
        let mut current = self.credential.lock().await;
        if !current.expires_within(now_millis(), EXPIRY_SKEW_MILLIS) {
            return Ok(current.access_token.clone());
        }

        let Some(refresh) = current.refresh_token.clone() else {
            return Err(Error::Unauthenticated(
                "access token expired and no refresh token is available".into(),
            ));
        };

        debug!("access token expiring, refreshing");
        let response = match token::refresh_token(&self.http, &self.client, &refresh).await {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!("drive_token_refresh_total", "outcome" => "error").increment(1);
                return Err(e);
            }
        };
        metrics::counter!("drive_token_refresh_total", "outcome" => "ok").increment(1);

        let mut renewed = response.into_credential(now_millis());
        let refresh_token_issued = renewed.refresh_token.is_some();
        if !refresh_token_issued {
            renewed.refresh_token = Some(refresh);
        }
        if renewed.scope.is_empty() {
            renewed.scope = current.scope.clone();
        }
        *current = renewed.clone();
        info!(refresh_token_issued, "access token refreshed");

        let token = renewed.access_token.clone();
        if self
            .rotations
            .send(TokenRotation {
                credential: renewed,
                refresh_token_issued,
            })
            .is_err()
        {
            warn!("rotation observer is gone, refreshed credential not persisted");
        }
        Ok(token)
    }

    /// Attach `Authorization: Bearer <token>` to an outgoing request.
    pub async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    /// Snapshot of the current credential.
    pub async fn credential(&self) -> Credential {
        self.credential.lock().await.clone()
    }

    /// Close the rotation channel and wait for pending writes.
    pub async fn shutdown(self) {
        let Self {
            rotations,
            persister,
            ..
        } = self;
        drop(rotations);
        if let Some(handle) = persister {
            if let Err(e) = handle.await {
                warn!(error = %e, "credential persister task failed");
            }
        }
    }
}
