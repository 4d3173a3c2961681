//! Interactive authorization-code flow with PKCE
//!
//! States: `Idle → AwaitingUserConsent → AwaitingCallback → Exchanging → Complete | Failed`.
//!
//! A short-lived axum listener serves `/oauth2callback` while a timer runs.
//! The callback handler and the timer race for a take-once `oneshot::Sender`;
//! whichever takes it resolves the flow and the other side observes that
//! outcome. A callback that wins the race still has `EXCHANGE_TIMEOUT` to
//! finish its token exchange. The listeners are shut down on every exit path
//! before `run` returns.
//!
//! The registered redirect names `localhost`, so `run` listens on both
//! `127.0.0.1` and `[::1]`. The IPv6 listener is best effort; hosts without
//! an IPv6 loopback get the IPv4 one only.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OAuthClient;
use crate::constants::{CALLBACK_PATH, CALLBACK_TIMEOUT, EXCHANGE_TIMEOUT};
use crate::credentials::{Credential, CredentialStore, now_millis};
use crate::error::{Error, FlowError, Result};
use crate::pkce::{PkcePair, build_authorization_url};
use crate::token;

const SUCCESS_PAGE: &str = "<h1>Authentication Successful!</h1><p>You can close this window and return to the terminal.</p>";
const DENIED_PAGE: &str = "<h1>Authentication Failed</h1><p>You can close this window.</p>";
const MISSING_CODE_PAGE: &str = "<h1>No authorization code received</h1>";
const ERROR_PAGE: &str = "<h1>Error</h1><p>An error occurred during authentication.</p>";
const CLOSED_PAGE: &str = "<h1>Authentication Closed</h1><p>This sign-in attempt has already finished. You can close this window.</p>";

/// Grace period for in-flight callback responses once the flow resolves.
const LISTENER_DRAIN: Duration = Duration::from_secs(5);

/// Where the flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingUserConsent,
    AwaitingCallback,
    Exchanging,
    Complete,
    Failed,
}

impl FlowState {
    fn in_progress(self) -> bool {
        matches!(
            self,
            Self::AwaitingUserConsent | Self::AwaitingCallback | Self::Exchanging
        )
    }
}

/// Shows the consent URL to the operator.
pub type UrlPresenter = Arc<dyn Fn(&str) + Send + Sync>;

type Resolver = Arc<Mutex<Option<oneshot::Sender<Result<Credential>>>>>;
type SharedState = Arc<std::sync::Mutex<FlowState>>;
type ListenerTask = JoinHandle<std::io::Result<()>>;

/// Drives one interactive consent at a time.
pub struct AuthorizationFlow {
    client: OAuthClient,
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    timeout: Duration,
    exchange_timeout: Duration,
    presenter: UrlPresenter,
    state: SharedState,
}

impl AuthorizationFlow {
    pub fn new(client: OAuthClient, http: reqwest::Client, store: Arc<CredentialStore>) -> Self {
        Self {
            client,
            http,
            store,
            timeout: CALLBACK_TIMEOUT,
            exchange_timeout: EXCHANGE_TIMEOUT,
            presenter: Arc::new(|url: &str| present_url(url, true)),
            state: Arc::new(std::sync::Mutex::new(FlowState::Idle)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Print the URL only, without launching a browser.
    pub fn without_browser(mut self) -> Self {
        self.presenter = Arc::new(|url: &str| present_url(url, false));
        self
    }

    pub fn with_presenter(mut self, presenter: UrlPresenter) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn client(&self) -> &OAuthClient {
        &self.client
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn state(&self) -> FlowState {
        *lock_state(&self.state)
    }

    /// Run the flow on the registered redirect port.
    pub async fn run(&self) -> Result<Credential> {
        self.begin()?;
        let outcome = match bind_loopback(self.client.redirect_port).await {
            Ok(listeners) => self.drive(listeners).await,
            Err(e) => Err(e),
        };
        self.finish(&outcome);
        outcome
    }

    /// Run the flow on a listener the caller already bound.
    ///
    /// The redirect URI is derived from the listener's port, so it must be
    /// one the OAuth client has registered.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<Credential> {
        self.begin()?;
        let outcome = self.drive(vec![listener]).await;
        self.finish(&outcome);
        outcome
    }

    fn begin(&self) -> Result<()> {
        let mut state = lock_state(&self.state);
        if state.in_progress() {
            return Err(FlowError::AlreadyInProgress.into());
        }
        *state = FlowState::AwaitingUserConsent;
        Ok(())
    }

    fn finish(&self, outcome: &Result<Credential>) {
        let next = match outcome {
            Ok(_) => FlowState::Complete,
            Err(e) => {
                warn!(error = %e, "authorization flow failed");
                FlowState::Failed
            }
        };
        *lock_state(&self.state) = next;
    }

    async fn drive(&self, listeners: Vec<TcpListener>) -> Result<Credential> {
        let port = listeners
            .first()
            .ok_or_else(|| FlowError::Listener("no callback listener".into()))?
            .local_addr()
            .map_err(|e| FlowError::Listener(format!("reading listener address: {e}")))?
            .port();
        let redirect_uri = self.client.redirect_uri_for(port);
        let pkce = PkcePair::generate();
        let csrf_state = uuid::Uuid::new_v4().simple().to_string();
        let url = build_authorization_url(&self.client, &redirect_uri, &pkce.challenge, &csrf_state)?;

        let (tx, mut rx) = oneshot::channel();
        let resolver: Resolver = Arc::new(Mutex::new(Some(tx)));
        let context = Arc::new(CallbackContext {
            client: self.client.clone(),
            http: self.http.clone(),
            store: self.store.clone(),
            verifier: pkce.verifier,
            csrf_state,
            redirect_uri,
            resolver: resolver.clone(),
            state: self.state.clone(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let servers: Vec<ListenerTask> = listeners
            .into_iter()
            .map(|listener| {
                let router = callback_router(context.clone());
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown.changed().await;
                        })
                        .await
                })
            })
            .collect();

        (self.presenter)(url.as_str());
        *lock_state(&self.state) = FlowState::AwaitingCallback;
        info!(port, timeout_secs = self.timeout.as_secs(), "waiting for authorization callback");

        let outcome = match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(FlowError::Callback("callback channel closed".into()).into()),
            Err(_) => {
                // Timer fired: resolve only if the callback has not claimed the flow
                let claimed = resolver.lock().await.take();
                if claimed.is_some() {
                    Err(FlowError::Timeout(self.timeout).into())
                } else {
                    match tokio::time::timeout(self.exchange_timeout, rx).await {
                        Ok(outcome) => outcome.unwrap_or_else(|_| {
                            Err(FlowError::Callback("callback channel closed".into()).into())
                        }),
                        Err(_) => Err(FlowError::Exchange(format!(
                            "token endpoint did not answer within {}s",
                            self.exchange_timeout.as_secs()
                        ))
                        .into()),
                    }
                }
            }
        };

        let _ = shutdown_tx.send(true);
        stop_listeners(servers).await;

        outcome
    }
}

/// Bind the callback port on the IPv4 loopback, and on the IPv6 loopback
/// where the host has one.
async fn bind_loopback(port: u16) -> Result<Vec<TcpListener>> {
    let v4 = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(v4)
        .await
        .map_err(|e| FlowError::Listener(format!("binding {v4}: {e}")))?;
    let mut listeners = vec![listener];

    let v6 = SocketAddr::from((Ipv6Addr::LOCALHOST, port));
    match TcpListener::bind(v6).await {
        Ok(listener) => listeners.push(listener),
        Err(e) => debug!(error = %e, "IPv6 loopback unavailable, listening on {v4} only"),
    }
    Ok(listeners)
}

/// Wait for each listener to drain; abort the ones that do not.
async fn stop_listeners(servers: Vec<ListenerTask>) {
    let mut stuck = Vec::new();
    for mut server in servers {
        match tokio::time::timeout(LISTENER_DRAIN, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "callback listener error"),
            Ok(Err(e)) => warn!(error = %e, "callback listener task failed"),
            Err(_) => {
                warn!("callback listener did not drain, aborting");
                server.abort();
                stuck.push(server);
            }
        }
    }
    for server in stuck {
        let _ = server.await;
    }
}

fn lock_state(state: &SharedState) -> std::sync::MutexGuard<'_, FlowState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Print the consent URL to stderr and optionally launch a browser.
fn present_url(url: &str, open_browser: bool) {
    eprintln!("\nAuthentication required");
    eprintln!("Open this URL in a browser to grant access to Google Drive:");
    eprintln!("{url}\n");

    if open_browser {
        if let Err(e) = open::that_detached(url) {
            warn!(error = %e, "failed to open browser automatically");
        }
    }
}

/// Everything the callback handler needs to finish the flow.
struct CallbackContext {
    client: OAuthClient,
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    verifier: String,
    csrf_state: String,
    redirect_uri: String,
    resolver: Resolver,
    state: SharedState,
}

impl CallbackContext {
    async fn complete(
        &self,
        params: &HashMap<String, String>,
    ) -> (StatusCode, &'static str, Result<Credential>) {
        if let Some(error) = params.get("error") {
            warn!(error, "authorization denied");
            return (
                StatusCode::BAD_REQUEST,
                DENIED_PAGE,
                Err(FlowError::Denied(error.clone()).into()),
            );
        }

        let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
            return (
                StatusCode::BAD_REQUEST,
                MISSING_CODE_PAGE,
                Err(FlowError::MissingCode.into()),
            );
        };

        if params.get("state") != Some(&self.csrf_state) {
            return (
                StatusCode::BAD_REQUEST,
                DENIED_PAGE,
                Err(FlowError::StateMismatch.into()),
            );
        }

        *lock_state(&self.state) = FlowState::Exchanging;

        let response = match token::exchange_code(
            &self.http,
            &self.client,
            code,
            &self.verifier,
            &self.redirect_uri,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERROR_PAGE,
                    Err(FlowError::Exchange(e.to_string()).into()),
                );
            }
        };

        let credential = response.into_credential(now_millis());
        if credential.refresh_token.is_some() {
            if let Err(e) = self.store.save(&credential).await {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERROR_PAGE,
                    Err(Error::from(FlowError::Callback(e.to_string()))),
                );
            }
        } else {
            warn!("no refresh token issued, credential kept in memory only");
        }

        info!("authorization complete");
        (StatusCode::OK, SUCCESS_PAGE, Ok(credential))
    }
}

fn callback_router(context: Arc<CallbackContext>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(context)
}

async fn handle_callback(
    State(context): State<Arc<CallbackContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    // Claiming the sender is what makes this callback the one that resolves the flow
    let Some(sender) = context.resolver.lock().await.take() else {
        return (StatusCode::GONE, Html(CLOSED_PAGE));
    };

    let (status, page, outcome) = context.complete(&params).await;
    if sender.send(outcome).is_err() {
        warn!("authorization flow stopped waiting before the callback finished");
    }
    (status, Html(page))
}
