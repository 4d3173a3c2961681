//! Google Drive MCP server
//!
//! Stdio tool server that:
//! 1. Loads configuration and the OAuth client from the environment
//! 2. Establishes a credential session (stored token or interactive consent)
//! 3. Serves Drive file tools as an MCP server on stdin/stdout
//! 4. Drains pending credential writes before exiting

mod config;
mod dispatch;
mod error;
mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use google_auth::{AuthorizationFlow, CredentialSession, CredentialStore};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ClientCredentials, Config};
use crate::dispatch::{Dispatcher, SERVER_NAME};
use crate::tools::DriveClient;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout is reserved for protocol frames
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting {}", SERVER_NAME);

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    let config = match &config_path {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            Config::load(Some(path.as_path()))
                .with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => Config::load(None).context("invalid default configuration")?,
    };

    let credentials = ClientCredentials::from_env().context(
        "OAuth client credentials missing; set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET",
    )?;
    let token_dir = config.token_dir().context("failed to resolve token directory")?;
    let store = Arc::new(CredentialStore::in_dir(&token_dir));

    info!(
        token_path = %store.path().display(),
        redirect_port = config.oauth.redirect_port,
        api_base = %config.drive.api_base,
        max_retries = config.retry.max_retries,
        request_timeout_secs = config.drive.request_timeout_secs,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let mut flow = AuthorizationFlow::new(config.oauth_client(credentials), http.clone(), store)
        .with_timeout(config.callback_timeout());
    if !config.oauth.open_browser {
        flow = flow.without_browser();
    }

    let session = Arc::new(
        CredentialSession::establish(&flow)
            .await
            .context("Google authorization failed")?,
    );
    info!("authenticated with Google");

    let dispatcher = Dispatcher::new(DriveClient::new(
        http,
        session.clone(),
        config.drive.api_base.clone(),
        config.retry_policy(),
    ));

    let service = dispatcher
        .serve(stdio())
        .await
        .context("MCP initialization over stdio failed")?;
    let cancel = service.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    // The service owns the dispatcher; once it ends the session is ours again
    match service.waiting().await {
        Ok(reason) => info!(?reason, "MCP session ended"),
        Err(e) => error!(error = %e, "MCP service task failed"),
    }

    match Arc::try_unwrap(session) {
        Ok(session) => session.shutdown().await,
        Err(_) => warn!("credential session still shared at exit, pending writes may be lost"),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
