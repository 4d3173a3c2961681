//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file is
//! optional; without one every section takes its defaults. The OAuth client
//! id and secret come from GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET only and
//! are never read from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use call_executor::RetryPolicy;
use common::Secret;
use google_auth::{AUTHORIZE_ENDPOINT, DEFAULT_REDIRECT_PORT, OAuthClient, TOKEN_DIR_ENV, TOKEN_ENDPOINT};
use serde::Deserialize;

pub const CLIENT_ID_ENV: &str = "GOOGLE_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "GOOGLE_CLIENT_SECRET";

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub drive: DriveConfig,
}

/// Interactive authorization settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub redirect_port: u16,
    pub callback_timeout_secs: u64,
    /// Launch the system browser on the consent URL
    pub open_browser: bool,
    pub auth_endpoint: String,
    pub token_endpoint: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            redirect_port: DEFAULT_REDIRECT_PORT,
            callback_timeout_secs: 300,
            open_browser: true,
            auth_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }
}

/// Retry budget for Drive API calls
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding tokens.json
    pub token_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub api_base: String,
    /// Per-request limit for Drive and token endpoint calls
    pub request_timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// OAuth client registration read from the environment.
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl ClientCredentials {
    pub fn from_env() -> common::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> common::Result<Self> {
        let read = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .ok_or(common::Error::MissingEnv(key))
        };
        Ok(Self {
            client_id: read(CLIENT_ID_ENV)?,
            client_secret: Secret::new(read(CLIENT_SECRET_ENV)?),
        })
    }
}

impl Config {
    /// Load configuration from an optional TOML file and validate it.
    ///
    /// `None` means no file was requested and defaults apply; a path that was
    /// requested explicitly must exist.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let config: Config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.oauth.redirect_port == 0 {
            return Err(common::Error::Config(
                "redirect_port must be greater than 0".into(),
            ));
        }

        if self.oauth.callback_timeout_secs == 0 {
            return Err(common::Error::Config(
                "callback_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.drive.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.retry.max_retries == 0 {
            return Err(common::Error::Config(
                "max_retries must be greater than 0".into(),
            ));
        }

        for (name, value) in [
            ("auth_endpoint", &self.oauth.auth_endpoint),
            ("token_endpoint", &self.oauth.token_endpoint),
            ("api_base", &self.drive.api_base),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {value}"
                )));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        std::env::var("CONFIG_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// Token directory: GOOGLE_DRIVE_MCP_TOKEN_DIR, then `[storage] token_dir`,
    /// then the XDG data directory.
    pub fn token_dir(&self) -> common::Result<PathBuf> {
        let env_override = std::env::var_os(TOKEN_DIR_ENV).is_some_and(|d| !d.is_empty());
        match &self.storage.token_dir {
            Some(dir) if !env_override => Ok(dir.clone()),
            _ => google_auth::default_token_dir()
                .map_err(|e| common::Error::Config(e.to_string())),
        }
    }

    pub fn oauth_client(&self, credentials: ClientCredentials) -> OAuthClient {
        let mut client = OAuthClient::new(credentials.client_id, credentials.client_secret);
        client.redirect_port = self.oauth.redirect_port;
        client.auth_endpoint = self.oauth.auth_endpoint.clone();
        client.token_endpoint = self.oauth.token_endpoint.clone();
        client
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth.callback_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.drive.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("google-drive-mcp.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.oauth.redirect_port, 3000);
        assert_eq!(config.callback_timeout(), Duration::from_secs(300));
        assert!(config.oauth.open_browser);
        assert_eq!(config.oauth.token_endpoint, TOKEN_ENDPOINT);
        assert_eq!(config.drive.api_base, "https://www.googleapis.com/drive/v3");
        assert_eq!(config.request_timeout(), Duration::from_secs(60));

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_config(
            r#"
[oauth]
redirect_port = 3100
open_browser = false

[retry]
base_delay_ms = 250
"#,
        );
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.oauth.redirect_port, 3100);
        assert!(!config.oauth.open_browser);
        assert_eq!(config.oauth.callback_timeout_secs, 300);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 250);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/path/config.toml")));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let (_dir, path) = write_config("not valid {{{{ toml");
        assert!(matches!(Config::load(Some(&path)), Err(common::Error::Toml(_))));
    }

    #[test]
    fn rejects_zero_values() {
        for contents in [
            "[oauth]\nredirect_port = 0\n",
            "[oauth]\ncallback_timeout_secs = 0\n",
            "[retry]\nmax_retries = 0\n",
            "[drive]\nrequest_timeout_secs = 0\n",
        ] {
            let (_dir, path) = write_config(contents);
            let err = Config::load(Some(&path)).unwrap_err();
            assert!(
                err.to_string().contains("must be greater than 0"),
                "{contents}: {err}"
            );
        }
    }

    #[test]
    fn rejects_non_http_endpoints() {
        let (_dir, path) = write_config("[drive]\napi_base = \"ftp://example.com\"\n");
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("api_base"), "got: {err}");
    }

    #[test]
    fn client_credentials_required() {
        let env: HashMap<&str, &str> = HashMap::from([(CLIENT_ID_ENV, "id.apps.googleusercontent.com")]);
        let err = ClientCredentials::from_lookup(|k| env.get(k).map(|v| v.to_string()))
            .err()
            .unwrap();
        assert!(matches!(err, common::Error::MissingEnv(CLIENT_SECRET_ENV)));

        let empty: HashMap<&str, &str> = HashMap::from([(CLIENT_ID_ENV, "  "), (CLIENT_SECRET_ENV, "s")]);
        let err = ClientCredentials::from_lookup(|k| empty.get(k).map(|v| v.to_string()))
            .err()
            .unwrap();
        assert!(matches!(err, common::Error::MissingEnv(CLIENT_ID_ENV)));
    }

    #[test]
    fn oauth_client_carries_config_and_credentials() {
        let (_dir, path) = write_config(
            "[oauth]\nredirect_port = 3100\ntoken_endpoint = \"http://127.0.0.1:9/token\"\n",
        );
        let config = Config::load(Some(&path)).unwrap();
        let env: HashMap<&str, &str> =
            HashMap::from([(CLIENT_ID_ENV, "id"), (CLIENT_SECRET_ENV, "GOCSPX-s")]);
        let credentials =
            ClientCredentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        let client = config.oauth_client(credentials);
        assert_eq!(client.client_id, "id");
        assert_eq!(client.client_secret.expose(), "GOCSPX-s");
        assert_eq!(client.redirect_uri(), "http://localhost:3100/oauth2callback");
        assert_eq!(client.token_endpoint, "http://127.0.0.1:9/token");
    }

    #[test]
    fn token_dir_env_overrides_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (_dir, path) = write_config("[storage]\ntoken_dir = \"/srv/drive-tokens\"\n");
        let config = Config::load(Some(&path)).unwrap();

        unsafe { remove_env(TOKEN_DIR_ENV) };
        assert_eq!(config.token_dir().unwrap(), PathBuf::from("/srv/drive-tokens"));

        unsafe { set_env(TOKEN_DIR_ENV, "/tmp/override-tokens") };
        assert_eq!(config.token_dir().unwrap(), PathBuf::from("/tmp/override-tokens"));

        unsafe { remove_env(TOKEN_DIR_ENV) };
    }

    #[test]
    fn resolve_path_prefers_cli() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/etc/google-drive-mcp.toml") };
        assert_eq!(
            Config::resolve_path(Some("/tmp/cli.toml")),
            Some(PathBuf::from("/tmp/cli.toml"))
        );
        assert_eq!(
            Config::resolve_path(None),
            Some(PathBuf::from("/etc/google-drive-mcp.toml"))
        );

        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), None);
    }
}
