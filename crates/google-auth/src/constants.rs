//! Google OAuth endpoints and local storage conventions
//!
//! The client id and secret are not here: every installation registers its
//! own OAuth client and supplies them through the environment.

use std::time::Duration;

/// Authorization endpoint (consent page)
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Full Drive access plus Docs and Sheets.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/documents",
    "https://www.googleapis.com/auth/spreadsheets",
];

/// Port of the registered redirect URI `http://localhost:3000/oauth2callback`.
pub const DEFAULT_REDIRECT_PORT: u16 = 3000;

/// Path the identity provider redirects the browser to.
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// How long the callback listener waits for the browser redirect.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Longest wait for the code exchange once a callback has claimed the flow
/// and the callback timer has already fired.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Access tokens this close to expiry are refreshed before use.
pub const EXPIRY_SKEW_MILLIS: u64 = 60_000;

/// Overrides the token directory entirely when set.
pub const TOKEN_DIR_ENV: &str = "GOOGLE_DRIVE_MCP_TOKEN_DIR";

/// Directory name under the XDG data home.
pub const APP_DIR_NAME: &str = "google-drive-mcp";

/// Credential file name inside the token directory.
pub const TOKEN_FILE_NAME: &str = "tokens.json";
