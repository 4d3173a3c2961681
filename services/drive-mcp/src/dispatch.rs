//! Tool registry and MCP server handler
//!
//! Each Drive operation is an rmcp tool; the router deserializes its
//! arguments into the typed schema below, and the handler range-checks them
//! before any remote call is made. API failures are classified here, after
//! the retry policy has given up.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use call_executor::{CallError, classify};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, ErrorData, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::schemars;
use rmcp::{ServerHandler, tool, tool_handler, tool_router};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{self, Error};
use crate::tools::{DriveClient, SearchFilter};

pub const SERVER_NAME: &str = "google-drive-mcp";

const PAGE_SIZE_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

fn default_page_size() -> u32 {
    100
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchArgs {
    /// Search query for file name
    pub query: Option<String>,
    /// Filter by MIME type (e.g., application/vnd.google-apps.document)
    pub mime_type: Option<String>,
    /// Search within specific folder ID
    pub folder_id: Option<String>,
    /// Maximum number of results (1-1000)
    #[serde(default = "default_page_size")]
    pub max_results: u32,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListFolderArgs {
    /// ID of the folder to list
    pub folder_id: String,
    /// Number of items per page (1-1000)
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Token for next page of results
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileArgs {
    /// ID of the file
    pub file_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateArgs {
    /// Name of the file
    pub name: String,
    /// MIME type of the file
    pub mime_type: String,
    /// Content of the file (optional for Google Workspace files)
    pub content: Option<String>,
    /// Parent folder ID
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveArgs {
    /// ID of the file to move
    pub file_id: String,
    /// ID of the destination folder
    pub new_parent_id: String,
}

fn check_page_size(tool: &str, field: &str, value: u32) -> error::Result<()> {
    if PAGE_SIZE_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid_arguments(
            tool,
            format!("{field} must be between 1 and 1000, got {value}"),
        ))
    }
}

/// Wrap a tool payload as pretty-printed text content.
fn text_content(payload: &Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    CallToolResult::success(vec![Content::text(text)])
}

fn api(result: std::result::Result<Value, CallError>) -> error::Result<Value> {
    result.map_err(|e| Error::Api(classify(&e)))
}

#[derive(Clone)]
pub struct Dispatcher {
    tool_router: ToolRouter<Self>,
    drive: Arc<DriveClient>,
}

#[tool_router]
impl Dispatcher {
    pub fn new(drive: DriveClient) -> Self {
        Self {
            tool_router: Self::tool_router(),
            drive: Arc::new(drive),
        }
    }

    /// Run one tool body with call logging and the `drive_tool_calls_total`
    /// metric, and shape its payload as an MCP result.
    async fn run(
        &self,
        tool: &'static str,
        call: impl Future<Output = error::Result<Value>>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        let call_id = format!("call_{}", uuid::Uuid::new_v4().as_simple());
        let started = Instant::now();

        let outcome = call.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => {
                metrics::counter!("drive_tool_calls_total", "tool" => tool, "outcome" => "ok").increment(1);
                info!(call_id = %call_id, tool, elapsed_ms, "tool call succeeded");
            }
            Err(e) => {
                metrics::counter!("drive_tool_calls_total", "tool" => tool, "outcome" => e.label())
                    .increment(1);
                warn!(call_id = %call_id, tool, elapsed_ms, kind = e.label(), error = %e, "tool call failed");
            }
        }

        outcome.map(|payload| text_content(&payload)).map_err(ErrorData::from)
    }

    #[tool(description = "Search for files in Google Drive with optional filters for name, mimeType, and folder")]
    async fn gdrive_search(
        &self,
        Parameters(args): Parameters<SearchArgs>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.run("gdrive_search", async {
            check_page_size("gdrive_search", "maxResults", args.max_results)?;
            let filter = SearchFilter {
                query: args.query.as_deref(),
                mime_type: args.mime_type.as_deref(),
                folder_id: args.folder_id.as_deref(),
            };
            api(self.drive.search(&filter, args.max_results).await)
        })
        .await
    }

    #[tool(description = "List contents of a specific folder with pagination support")]
    async fn gdrive_list_folder(
        &self,
        Parameters(args): Parameters<ListFolderArgs>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.run("gdrive_list_folder", async {
            check_page_size("gdrive_list_folder", "pageSize", args.page_size)?;
            api(self
                .drive
                .list_folder(&args.folder_id, args.page_size, args.page_token.as_deref())
                .await)
        })
        .await
    }

    #[tool(description = "Read file metadata and content. Supports Google Docs, Sheets, and regular files")]
    async fn gdrive_read_file(
        &self,
        Parameters(args): Parameters<FileArgs>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.run("gdrive_read_file", async {
            api(self.drive.read_file(&args.file_id).await)
        })
        .await
    }

    #[tool(description = "Create a new file in Google Drive")]
    async fn gdrive_create_file(
        &self,
        Parameters(args): Parameters<CreateArgs>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.run("gdrive_create_file", async {
            api(self
                .drive
                .create_file(
                    &args.name,
                    &args.mime_type,
                    args.content.as_deref(),
                    args.parent_id.as_deref(),
                )
                .await)
        })
        .await
    }

    #[tool(description = "Delete a file from Google Drive")]
    async fn gdrive_delete_file(
        &self,
        Parameters(args): Parameters<FileArgs>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.run("gdrive_delete_file", async {
            api(self.drive.delete_file(&args.file_id).await)
        })
        .await
    }

    #[tool(description = "Move a file to a different folder")]
    async fn gdrive_move_file(
        &self,
        Parameters(args): Parameters<MoveArgs>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.run("gdrive_move_file", async {
            api(self.drive.move_file(&args.file_id, &args.new_parent_id).await)
        })
        .await
    }
}

#[tool_handler]
impl ServerHandler for Dispatcher {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            protocol_version: ProtocolVersion::LATEST,
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Google Drive".to_string()),
                ..Default::default()
            },
            instructions: Some(
                "Google Drive file tools. Use gdrive_search or gdrive_list_folder to find file IDs, then read, create, move, or delete by ID.".to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::{Requests, fast_retry, live_session, start_drive_api};
    use rmcp::ServiceExt;
    use rmcp::model::ErrorCode;
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

    async fn dispatcher() -> (Dispatcher, Requests) {
        let (base, requests) = start_drive_api().await;
        let drive = DriveClient::new(reqwest::Client::new(), live_session(), base, fast_retry());
        (Dispatcher::new(drive), requests)
    }

    fn params<T: DeserializeOwned>(arguments: Value) -> Parameters<T> {
        Parameters(serde_json::from_value(arguments).unwrap())
    }

    /// Text content of a tool result, parsed back into JSON.
    fn payload(result: &CallToolResult) -> Value {
        let result = serde_json::to_value(result).unwrap();
        assert_eq!(result["content"][0]["type"], "text");
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn result_is_pretty_json_text_content() {
        let (dispatcher, _) = dispatcher().await;
        let result = dispatcher
            .gdrive_delete_file(params(json!({"fileId": "f2"})))
            .await
            .unwrap();

        let value = serde_json::to_value(&result).unwrap();
        let text = value["content"][0]["text"].as_str().unwrap();
        assert!(text.contains('\n'), "expected pretty-printed JSON: {text}");
        assert_eq!(payload(&result), json!({"success": true, "fileId": "f2"}));
    }

    #[tokio::test]
    async fn search_defaults_max_results() {
        let (dispatcher, requests) = dispatcher().await;
        let result = dispatcher.gdrive_search(params(json!({}))).await.unwrap();
        assert_eq!(payload(&result)["count"], 2);
        assert_eq!(requests.lock().unwrap()[0].2["pageSize"], "100");
    }

    #[tokio::test]
    async fn out_of_range_page_size_never_reaches_drive() {
        let (dispatcher, requests) = dispatcher().await;
        for args in [json!({"maxResults": 0}), json!({"maxResults": 1001})] {
            let err = dispatcher.gdrive_search(params(args)).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        }
        let err = dispatcher
            .gdrive_list_folder(params(json!({"folderId": "f", "pageSize": 5000})))
            .await
            .unwrap_err();
        assert!(err.message.contains("pageSize"), "got: {err:?}");
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_file_returns_new_metadata() {
        let (dispatcher, requests) = dispatcher().await;
        let result = dispatcher
            .gdrive_create_file(params(json!({
                "name": "notes.txt",
                "mimeType": "text/plain",
                "content": "hello",
            })))
            .await
            .unwrap();
        assert_eq!(payload(&result)["id"], "u1");
        assert_eq!(requests.lock().unwrap()[0].2["media"], "hello");
    }

    #[tokio::test]
    async fn api_failures_are_classified() {
        let (dispatcher, _) = dispatcher().await;
        let err = dispatcher
            .gdrive_read_file(params(json!({"fileId": "missing"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_REQUEST);
        assert_eq!(err.message, "Resource not found: File not found: missing.");
        assert_eq!(err.data, Some(json!({"kind": "NotFoundError"})));
    }

    /// Client end of an in-memory stdio pair, speaking raw JSON-RPC lines.
    struct Client {
        writer: WriteHalf<DuplexStream>,
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        next_id: u64,
    }

    impl Client {
        async fn send(&mut self, message: Value) {
            let mut frame = serde_json::to_vec(&message).unwrap();
            frame.push(b'\n');
            self.writer.write_all(&frame).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        /// Send a request and wait for the response carrying its id.
        async fn request(&mut self, method: &str, params: Option<Value>) -> Value {
            self.next_id += 1;
            let id = self.next_id;
            let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
            if let Some(params) = params {
                message["params"] = params;
            }
            self.send(message).await;

            while let Some(line) = self.lines.next_line().await.unwrap() {
                let response: Value = serde_json::from_str(&line).unwrap();
                if response["id"] == id {
                    return response;
                }
            }
            panic!("server closed before answering {method}");
        }

        async fn call(&mut self, name: &str, arguments: Value) -> Value {
            self.request("tools/call", Some(json!({"name": name, "arguments": arguments})))
                .await
        }
    }

    /// Serve a dispatcher over an in-memory pipe and complete the MCP
    /// handshake. Returns the client and the `initialize` response.
    async fn connect() -> (Client, Value, Requests) {
        let (dispatcher, requests) = dispatcher().await;
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        tokio::spawn(async move {
            if let Ok(service) = dispatcher.serve(server_io).await {
                let _ = service.waiting().await;
            }
        });

        let (reader, writer) = tokio::io::split(client_io);
        let mut client = Client {
            writer,
            lines: BufReader::new(reader).lines(),
            next_id: 0,
        };
        let initialized = client
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "drive-mcp-tests", "version": "0.0.0"},
                })),
            )
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        (client, initialized, requests)
    }

    #[tokio::test]
    async fn initialize_advertises_tools_capability() {
        let (_, initialized, _) = connect().await;
        let result = &initialized["result"];
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn ping_is_answered() {
        let (mut client, _, _) = connect().await;
        let response = client.request("ping", None).await;
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn tools_list_covers_every_tool() {
        let (mut client, _, _) = connect().await;
        let response = client.request("tools/list", Some(json!({}))).await;
        let tools = response["result"]["tools"].as_array().unwrap();

        let mut names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            [
                "gdrive_create_file",
                "gdrive_delete_file",
                "gdrive_list_folder",
                "gdrive_move_file",
                "gdrive_read_file",
                "gdrive_search",
            ]
        );
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));

        let move_tool = tools.iter().find(|t| t["name"] == "gdrive_move_file").unwrap();
        let required = move_tool["inputSchema"]["required"].as_array().unwrap();
        assert!(required.contains(&json!("fileId")));
        assert!(required.contains(&json!("newParentId")));
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() {
        let (mut client, _, requests) = connect().await;
        let response = client.call("gdrive_delete_file", json!({"fileId": "f2"})).await;
        let content = &response["result"]["content"][0];
        assert_eq!(content["type"], "text");
        let payload: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["success"], true);
        assert_eq!(requests.lock().unwrap()[0].0, "DELETE");
    }

    #[tokio::test]
    async fn classified_failure_is_error_response() {
        let (mut client, _, _) = connect().await;
        let response = client.call("gdrive_read_file", json!({"fileId": "missing"})).await;
        let error = &response["error"];
        assert_eq!(error["code"], ErrorCode::INVALID_REQUEST.0);
        assert_eq!(error["message"], "Resource not found: File not found: missing.");
        assert_eq!(error["data"]["kind"], "NotFoundError");
        assert!(response.get("result").is_none());
    }

    #[tokio::test]
    async fn missing_argument_never_reaches_drive() {
        let (mut client, _, requests) = connect().await;
        let response = client.call("gdrive_move_file", json!({"fileId": "f2"})).await;
        assert_eq!(response["error"]["code"], ErrorCode::INVALID_PARAMS.0);
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let (mut client, _, requests) = connect().await;
        let response = client.call("gdrive_update_file", json!({})).await;
        assert!(response["error"].is_object(), "got: {response}");
        assert!(response.get("result").is_none());
        assert!(requests.lock().unwrap().is_empty());
    }
}
