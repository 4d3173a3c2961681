//! Credential storage for the OAuth token bundle
//!
//! A single JSON record at `<token dir>/tokens.json`. Writes go to a temp
//! file in the same directory and are renamed over the target, so readers
//! never see a partial record. The directory is created 0700 and the file
//! ends up 0600. A missing file is "no credential yet", not an error.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::{APP_DIR_NAME, TOKEN_DIR_ENV, TOKEN_FILE_NAME};
use crate::error::{Error, Result};

/// Access/refresh token bundle authorizing API calls for one user.
///
/// `expiry_date` is an absolute unix timestamp in milliseconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expiry_date: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expiry_date < now_millis
    }

    /// True when the access token expires within `skew_millis` of `now_millis`.
    pub fn expires_within(&self, now_millis: u64, skew_millis: u64) -> bool {
        self.expiry_date < now_millis.saturating_add(skew_millis)
    }

    /// Usable if the access token is live or can be renewed.
    pub fn is_usable(&self, now_millis: u64) -> bool {
        !self.is_expired(now_millis) || self.refresh_token.is_some()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expiry_date", &self.expiry_date)
            .finish()
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Resolve the token directory.
///
/// `GOOGLE_DRIVE_MCP_TOKEN_DIR` wins; otherwise `$XDG_DATA_HOME/google-drive-mcp`
/// (`~/.local/share/google-drive-mcp` when unset).
pub fn default_token_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(TOKEN_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::data_dir().ok_or_else(|| {
        Error::Io(format!(
            "cannot determine a data directory; set {TOKEN_DIR_ENV}"
        ))
    })?;
    Ok(base.join(APP_DIR_NAME))
}

/// Owner of the on-disk credential record.
///
/// The Mutex serializes writers (flow completion and rotation persistence)
/// so their temp files never collide.
pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Store at an explicit file path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `tokens.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(TOKEN_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored credential, or `None` if nothing has been saved.
    pub async fn load(&self) -> Result<Option<Credential>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored credential");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };

        let credential: Credential = serde_json::from_str(&contents)
            .map_err(|e| Error::CredentialParse(format!("parsing {}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), "loaded stored credential");
        Ok(Some(credential))
    }

    /// Replace the stored credential.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, credential).await
    }

    /// Remove the stored credential. Already absent is fine.
    pub async fn delete(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "deleted stored credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!(
                "removing {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// A record exists and is live or refreshable.
    pub async fn is_valid(&self) -> Result<bool> {
        Ok(self
            .load()
            .await?
            .is_some_and(|c| c.is_usable(now_millis())))
    }
}

/// Write the credential atomically: temp file in the same directory, 0600,
/// then rename over the target.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    ensure_private_dir(dir).await?;

    let tmp_path = dir.join(format!(".{TOKEN_FILE_NAME}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

async fn ensure_private_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|e| Error::Io(format!("creating token directory {}: {e}", dir.display())))?;

    info!(dir = %dir.display(), "created token directory");
    Ok(())
}
