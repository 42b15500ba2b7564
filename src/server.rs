//! MCP server implementation.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::InvokerConfig;
use crate::error::{codes, Error, Result};
use crate::invoker::{EventInvoker, Invoker};
use crate::page::Page;
use crate::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcId, JsonRpcRequest, JsonRpcResponse,
    ListResourcesResult, ListToolsResult, McpMessage, PromptsCapability, ReadResourceParams,
    ReadResourceResult, ResourcesCapability, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolCallResult, ToolsCapability,
};
use crate::registry::Registry;

/// MCP protocol version.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name.
pub const SERVER_NAME: &str = "dom-mcp-server";

/// Server version.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Serving requests.
    Running,
    /// Server is shutting down.
    ShuttingDown,
}

/// MCP server for the tools and resources declared on one page.
pub struct McpServer {
    page: Arc<Page>,
    invoker: Arc<dyn Invoker>,
    registry: RwLock<Arc<Registry>>,
    state: RwLock<ServerState>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("page", &self.page.url())
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Create a server that executes tools through page events.
    pub fn new(page: Arc<Page>) -> Self {
        let invoker = EventInvoker::new(Arc::clone(&page));
        Self::with_invoker(page, Arc::new(invoker))
    }

    /// Create a server with custom invoker settings.
    pub fn with_config(page: Arc<Page>, config: &InvokerConfig) -> Self {
        let invoker = EventInvoker::with_timeout(Arc::clone(&page), config.call_timeout());
        Self::with_invoker(page, Arc::new(invoker))
    }

    /// Create a server with a custom invoker.
    pub fn with_invoker(page: Arc<Page>, invoker: Arc<dyn Invoker>) -> Self {
        Self {
            page,
            invoker,
            registry: RwLock::new(Arc::new(Registry::default())),
            state: RwLock::new(ServerState::Running),
        }
    }

    /// The page this server exposes.
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// Current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    // ------------------------------------------------------------------------
    // Protocol methods
    // ------------------------------------------------------------------------

    /// Announce protocol version, capabilities and server identity.
    pub async fn initialize(&self, client_info: ClientInfo) -> InitializeResult {
        tracing::info!(
            client = %client_info.name,
            version = %client_info.version,
            "client initialized"
        );

        InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
                resources: Some(ResourcesCapability {
                    subscribe: true,
                    list_changed: true,
                }),
                prompts: Some(PromptsCapability {}),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.into(),
                version: SERVER_VERSION.into(),
            },
        }
    }

    /// Rebuild the registry from the current document.
    pub async fn refresh(&self) -> Arc<Registry> {
        let document = self.page.snapshot().await;
        let registry = Arc::new(Registry::refresh(&document));
        *self.registry.write().await = Arc::clone(&registry);
        registry
    }

    /// Registry built by the most recent protocol call.
    pub async fn registry(&self) -> Arc<Registry> {
        Arc::clone(&*self.registry.read().await)
    }

    /// List the tools currently declared on the page.
    pub async fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.refresh().await.tool_definitions(),
        }
    }

    /// List the resources currently declared on the page.
    pub async fn list_resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: self.refresh().await.resource_definitions(),
        }
    }

    /// Read one resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let registry = self.refresh().await;
        let resource = registry
            .resource_by_uri(uri)
            .ok_or_else(|| Error::ResourceNotFound(uri.to_string()))?;

        Ok(ReadResourceResult {
            contents: vec![resource.contents(uri)],
        })
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let registry = self.refresh().await;
        let tool = registry
            .tool(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };

        tracing::info!(tool = %name, "calling tool");
        self.invoker.invoke(tool, arguments).await
    }

    /// Text context for the model: every resource as `name: content`, or the
    /// page URL and title when the page declares none.
    pub async fn page_context(&self) -> String {
        let registry = self.refresh().await;
        if registry.resources().is_empty() {
            return self.page.fallback_context().await;
        }

        registry
            .resources()
            .iter()
            .map(|resource| format!("{}: {}\n\n", resource.name, resource.content))
            .collect()
    }

    // ------------------------------------------------------------------------
    // JSON-RPC transport
    // ------------------------------------------------------------------------

    /// Run the server on stdio.
    #[cfg(feature = "stdio")]
    pub async fn run_stdio(&self) -> Result<()> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        tracing::info!(page = %self.page.url(), "MCP server starting on stdio");

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            tracing::debug!("Received: {}", line);

            if let Some(response) = self.handle_message(line).await {
                let json = McpMessage::Response(response).to_json()?;
                tracing::debug!("Sending: {}", json);
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }

            if self.state().await == ServerState::ShuttingDown {
                break;
            }
        }

        tracing::info!("MCP server shutting down");
        Ok(())
    }

    /// Handle an incoming message.
    pub async fn handle_message(&self, json: &str) -> Option<JsonRpcResponse> {
        match McpMessage::parse(json) {
            Ok(McpMessage::Request(request)) => Some(self.handle_request(request).await),
            Ok(McpMessage::Notification(notification)) => {
                self.handle_notification(notification).await;
                None
            }
            Ok(McpMessage::Response(_)) => {
                // We don't expect responses in this direction
                None
            }
            Err(e) => Some(JsonRpcResponse::error(
                None,
                codes::PARSE_ERROR,
                e.to_string(),
            )),
        }
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params).await,
            "tools/list" => JsonRpcResponse::success(id, self.list_tools().await),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => JsonRpcResponse::success(id, self.list_resources().await),
            "resources/read" => self.handle_resources_read(id, request.params).await,
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "shutdown" => {
                *self.state.write().await = ServerState::ShuttingDown;
                JsonRpcResponse::success(id, serde_json::json!({}))
            }
            _ => JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("method not found: {}", request.method),
            ),
        }
    }

    /// Handle a notification (no response expected).
    async fn handle_notification(&self, notification: JsonRpcRequest) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("Client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!("Request cancelled by client");
            }
            "exit" => {
                *self.state.write().await = ServerState::ShuttingDown;
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    /// Handle initialize request.
    async fn handle_initialize(
        &self,
        id: Option<JsonRpcId>,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params: InitializeParams = match parse_params(params, "initialize") {
            Ok(params) => params,
            Err(e) => return JsonRpcResponse::from_error(id, &e),
        };

        JsonRpcResponse::success(id, self.initialize(params.client_info).await)
    }

    /// Handle tools/call request.
    async fn handle_tools_call(
        &self,
        id: Option<JsonRpcId>,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params: ToolCallParams = match parse_params(params, "tool call") {
            Ok(params) => params,
            Err(e) => return JsonRpcResponse::from_error(id, &e),
        };

        match self.call_tool(&params.name, params.arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(Error::ToolExecution { tool, message }) => {
                tracing::warn!("Tool {} reported an error: {}", tool, message);
                JsonRpcResponse::success(id, ToolCallResult::error(message))
            }
            Err(e) => {
                tracing::error!("Tool {} failed: {}", params.name, e);
                JsonRpcResponse::from_error(id, &e)
            }
        }
    }

    /// Handle resources/read request.
    async fn handle_resources_read(
        &self,
        id: Option<JsonRpcId>,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params: ReadResourceParams = match parse_params(params, "resource read") {
            Ok(params) => params,
            Err(e) => return JsonRpcResponse::from_error(id, &e),
        };

        match self.read_resource(&params.uri).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::from_error(id, &e),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>, what: &str) -> Result<T> {
    let params = params.ok_or_else(|| Error::InvalidParams(format!("{} params required", what)))?;
    serde_json::from_value(params)
        .map_err(|e| Error::InvalidParams(format!("invalid {} params: {}", what, e)))
}
