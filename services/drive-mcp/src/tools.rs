//! Drive file operations
//!
//! Every request goes through the session (bearer token, refresh on demand)
//! and the retry policy. Failures leave here as `CallError` and are
//! classified by the dispatcher.

use std::sync::Arc;

use call_executor::{CallError, RetryPolicy};
use google_auth::CredentialSession;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

const FILE_FIELDS: &str = "id, name, mimeType, createdTime, modifiedTime, size, webViewLink, owners";
const SEARCH_FIELDS: &str =
    "files(id, name, mimeType, createdTime, modifiedTime, size, webViewLink, owners, parents)";
const LIST_FIELDS: &str =
    "nextPageToken, files(id, name, mimeType, createdTime, modifiedTime, size, webViewLink, owners)";
const MOVE_FIELDS: &str = "id, name, mimeType, parents, webViewLink";
const CREATE_FIELDS: &str = "id, name, mimeType, createdTime, webViewLink";

/// Longest file content returned by `read_file`, in characters.
pub const MAX_CONTENT_CHARS: usize = 100_000;

const WORKSPACE_PREFIX: &str = "application/vnd.google-apps.";

/// Drive file metadata as returned to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owners: Option<Vec<Owner>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    #[serde(default = "unknown_owner")]
    pub display_name: String,
    #[serde(default)]
    pub email_address: String,
}

fn unknown_owner() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Search filters; all optional.
#[derive(Debug, Default)]
pub struct SearchFilter<'a> {
    pub query: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    pub folder_id: Option<&'a str>,
}

/// Quote a value for the Drive query language.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Build a Drive `q` expression. Trashed files are always excluded.
pub fn build_search_query(filter: &SearchFilter<'_>) -> String {
    let mut conditions = vec!["trashed = false".to_string()];
    if let Some(query) = filter.query.filter(|q| !q.is_empty()) {
        conditions.push(format!("name contains {}", quote(query)));
    }
    if let Some(mime_type) = filter.mime_type.filter(|m| !m.is_empty()) {
        conditions.push(format!("mimeType = {}", quote(mime_type)));
    }
    if let Some(folder_id) = filter.folder_id.filter(|f| !f.is_empty()) {
        conditions.push(format!("{} in parents", quote(folder_id)));
    }
    conditions.join(" and ")
}

/// Export format for Google Workspace documents; `None` for types that
/// cannot be exported as text.
pub fn export_mime_type(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "application/vnd.google-apps.document" => Some("text/plain"),
        "application/vnd.google-apps.spreadsheet" => Some("text/csv"),
        "application/vnd.google-apps.presentation" => Some("text/plain"),
        _ => None,
    }
}

/// `multipart/related` body for a Drive upload: JSON metadata, then media.
fn multipart_related(boundary: &str, metadata: &Value, mime_type: &str, content: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content.as_bytes());
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

fn truncate_chars(content: String) -> String {
    match content.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((end, _)) => content[..end].to_string(),
        None => content,
    }
}

/// Session failures look like 401s to the retry policy and classifier, so an
/// unrecoverable credential is reported as an authentication error.
fn session_error(err: google_auth::Error) -> CallError {
    match err {
        google_auth::Error::Unauthenticated(_) | google_auth::Error::InvalidCredentials(_) => {
            CallError::status(401, err.to_string())
        }
        other => CallError::transport(other.to_string()),
    }
}

/// Authenticated Drive v3 client.
pub struct DriveClient {
    http: reqwest::Client,
    session: Arc<CredentialSession>,
    api_base: String,
    retry: RetryPolicy,
}

impl DriveClient {
    pub fn new(
        http: reqwest::Client,
        session: Arc<CredentialSession>,
        api_base: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            session,
            api_base: api_base.into(),
            retry,
        }
    }

    /// `<api_base>/files[/<segment>...]` with each segment percent-encoded.
    fn files_url(&self, segments: &[&str]) -> Result<Url, CallError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| CallError::transport(format!("invalid Drive API base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CallError::transport("Drive API base URL cannot carry a path"))?
            .pop_if_empty()
            .push("files")
            .extend(segments);
        Ok(url)
    }

    /// Upload endpoint for `files`: the API base with `/upload` in front of
    /// its path.
    fn upload_url(&self) -> Result<Url, CallError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| CallError::transport(format!("invalid Drive API base URL: {e}")))?;
        let path = format!("/upload{}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.path_segments_mut()
            .map_err(|_| CallError::transport("Drive API base URL cannot carry a path"))?
            .push("files");
        Ok(url)
    }

    /// Send one logical request, retrying per policy. Non-success responses
    /// become `CallError`s carrying the upstream status.
    async fn send(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CallError> {
        let build = &build;
        let session = &self.session;
        self.retry
            .execute(move || async move {
                let request = session.authorize(build()).await.map_err(session_error)?;
                let response = request.send().await?;
                if response.status().is_success() {
                    Ok(response)
                } else {
                    Err(CallError::from_response(response).await)
                }
            })
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, CallError> {
        let response = self.send(|| self.http.get(url.clone()).query(query)).await?;
        Ok(response.json::<T>().await?)
    }

    async fn get_text(&self, url: Url, query: &[(&str, &str)]) -> Result<String, CallError> {
        let response = self.send(|| self.http.get(url.clone()).query(query)).await?;
        Ok(response.text().await?)
    }

    /// `gdrive_search`: newest first, at most `max_results` files.
    pub async fn search(&self, filter: &SearchFilter<'_>, max_results: u32) -> Result<Value, CallError> {
        let q = build_search_query(filter);
        let page_size = max_results.to_string();
        let list: FileList = self
            .get_json(
                self.files_url(&[])?,
                &[
                    ("q", q.as_str()),
                    ("pageSize", page_size.as_str()),
                    ("fields", SEARCH_FIELDS),
                    ("orderBy", "modifiedTime desc"),
                ],
            )
            .await?;

        Ok(json!({
            "count": list.files.len(),
            "files": list.files,
        }))
    }

    /// `gdrive_list_folder`: folders first, then by name.
    pub async fn list_folder(
        &self,
        folder_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<Value, CallError> {
        let q = format!("{} in parents and trashed = false", quote(folder_id));
        let page_size = page_size.to_string();
        let mut query = vec![
            ("q", q.as_str()),
            ("pageSize", page_size.as_str()),
            ("fields", LIST_FIELDS),
            ("orderBy", "folder,name"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let list: FileList = self.get_json(self.files_url(&[])?, &query).await?;
        let mut result = json!({ "files": list.files });
        if let Some(token) = list.next_page_token {
            result["nextPageToken"] = Value::String(token);
        }
        Ok(result)
    }

    /// `gdrive_read_file`: metadata plus text content.
    ///
    /// Workspace documents are exported; other Workspace types (folders,
    /// forms) have no content. Regular files are downloaded as-is.
    pub async fn read_file(&self, file_id: &str) -> Result<Value, CallError> {
        let metadata: DriveFile = self
            .get_json(self.files_url(&[file_id])?, &[("fields", FILE_FIELDS)])
            .await?;
        let mime_type = metadata.mime_type.as_deref().unwrap_or_default();

        let content = if mime_type.starts_with(WORKSPACE_PREFIX) {
            match export_mime_type(mime_type) {
                Some(export) => {
                    self.get_text(self.files_url(&[file_id, "export"])?, &[("mimeType", export)])
                        .await?
                }
                None => String::new(),
            }
        } else {
            self.get_text(self.files_url(&[file_id])?, &[("alt", "media")])
                .await?
        };

        Ok(json!({
            "metadata": metadata,
            "content": truncate_chars(content),
        }))
    }

    /// `gdrive_create_file`: new file, optionally inside `parent_id`.
    ///
    /// Non-empty `content` is uploaded in the same request. Workspace types
    /// are always created empty; Drive cannot store raw media for them.
    pub async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        content: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<Value, CallError> {
        let mut metadata = json!({ "name": name, "mimeType": mime_type });
        if let Some(parent) = parent_id.filter(|p| !p.is_empty()) {
            metadata["parents"] = json!([parent]);
        }

        let media = content.filter(|c| !c.is_empty() && !mime_type.starts_with(WORKSPACE_PREFIX));
        let response = match media {
            Some(content) => {
                let url = self.upload_url()?;
                let boundary = format!("drive_mcp_{}", uuid::Uuid::new_v4().as_simple());
                let content_type = format!("multipart/related; boundary={boundary}");
                let body = multipart_related(&boundary, &metadata, mime_type, content);
                self.send(|| {
                    self.http
                        .post(url.clone())
                        .query(&[("uploadType", "multipart"), ("fields", CREATE_FIELDS)])
                        .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                        .body(body.clone())
                })
                .await?
            }
            None => {
                let url = self.files_url(&[])?;
                self.send(|| {
                    self.http
                        .post(url.clone())
                        .query(&[("fields", CREATE_FIELDS)])
                        .json(&metadata)
                })
                .await?
            }
        };

        let created: DriveFile = response.json().await?;
        Ok(serde_json::to_value(created).unwrap_or(Value::Null))
    }

    /// `gdrive_delete_file`: permanent delete, bypassing trash.
    pub async fn delete_file(&self, file_id: &str) -> Result<Value, CallError> {
        let url = self.files_url(&[file_id])?;
        self.send(|| self.http.delete(url.clone())).await?;
        Ok(json!({ "success": true, "fileId": file_id }))
    }

    /// `gdrive_move_file`: replace all current parents with `new_parent_id`.
    pub async fn move_file(&self, file_id: &str, new_parent_id: &str) -> Result<Value, CallError> {
        let url = self.files_url(&[file_id])?;
        let current: DriveFile = self.get_json(url.clone(), &[("fields", "parents")]).await?;
        let previous = current.parents.unwrap_or_default().join(",");

        let query = [
            ("addParents", new_parent_id),
            ("removeParents", previous.as_str()),
            ("fields", MOVE_FIELDS),
        ];
        let response = self
            .send(|| self.http.patch(url.clone()).query(&query).json(&json!({})))
            .await?;
        let moved: DriveFile = response.json().await?;
        Ok(serde_json::to_value(moved).unwrap_or(Value::Null))
    }
}
