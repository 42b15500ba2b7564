//! Multi-turn conversation loop.
//!
//! One turn: user text goes to the model together with the page's tools and
//! context. If the model asks for tools they run one after another, their
//! results are appended as `tool` messages and the model is asked once more
//! for a summary.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::config::ConversationConfig;
use crate::error::{Error, Result};
use crate::model::{
    parse_reply, ChatMessage, ModelClient, ModelReply, ModelRequest, Role, ToolCallRequest,
};
use crate::protocol::{ClientInfo, InitializeResult, ToolDefinition};
use crate::server::{McpServer, SERVER_VERSION};

/// Where a turn currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnState {
    /// No turn in flight.
    Idle,
    /// Waiting for the reply to the user message.
    AwaitingFirstModelResponse,
    /// Running the requested tools.
    ExecutingTools,
    /// Waiting for the summary after tool execution.
    AwaitingFollowUpModelResponse,
}

/// A logged message with the time it was appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// The message.
    #[serde(flatten)]
    pub message: ChatMessage,
    /// Append time.
    pub timestamp: DateTime<Utc>,
}

/// Append-only message log.
///
/// Every `tool` message must answer a call issued by an earlier assistant
/// message.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    entries: Vec<LogEntry>,
    issued_calls: HashSet<String>,
}

impl ConversationLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, rejecting uncorrelated tool results.
    pub fn append(&mut self, message: ChatMessage) -> Result<()> {
        if message.role == Role::Tool {
            let call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                Error::ConversationInvariant("tool message without tool_call_id".into())
            })?;
            if !self.issued_calls.contains(call_id) {
                return Err(Error::ConversationInvariant(format!(
                    "tool message answers unknown call {}",
                    call_id
                )));
            }
        }

        self.issued_calls
            .extend(message.calls().iter().map(|call| call.id.clone()));
        self.entries.push(LogEntry {
            message,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logged entries, oldest first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The last `limit` messages.
    ///
    /// A window never opens on a tool result: when the cut lands inside a
    /// batch of results it is widened back to the assistant message that
    /// issued those calls, so the window can exceed `limit`.
    pub fn window(&self, limit: usize) -> Vec<ChatMessage> {
        let is_tool = |index: usize| self.entries[index].message.role == Role::Tool;
        let mut start = self.entries.len().saturating_sub(limit);
        while start > 0 && start < self.entries.len() && is_tool(start) {
            start -= 1;
        }
        while start < self.entries.len() && is_tool(start) {
            start += 1;
        }
        self.entries[start..]
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.issued_calls.clear();
    }

    /// The log as a JSON array.
    pub fn export(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.entries)?)
    }
}

/// Drives conversations between the user, the model and the page's tools.
pub struct Orchestrator {
    server: Arc<McpServer>,
    model: Arc<dyn ModelClient>,
    config: ConversationConfig,
    log: Mutex<ConversationLog>,
    state: RwLock<TurnState>,
    initialized: OnceCell<InitializeResult>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("server", &self.server)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator with default settings.
    pub fn new(server: Arc<McpServer>, model: Arc<dyn ModelClient>) -> Self {
        Self::with_config(server, model, ConversationConfig::default())
    }

    /// Orchestrator with custom settings.
    pub fn with_config(
        server: Arc<McpServer>,
        model: Arc<dyn ModelClient>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            server,
            model,
            config,
            log: Mutex::new(ConversationLog::new()),
            state: RwLock::new(TurnState::Idle),
            initialized: OnceCell::new(),
        }
    }

    /// The server tools run through.
    pub fn server(&self) -> &Arc<McpServer> {
        &self.server
    }

    /// Current turn state.
    pub async fn state(&self) -> TurnState {
        *self.state.read().await
    }

    /// Whether the server handshake has happened.
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Copy of the logged messages.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.log
            .lock()
            .await
            .entries()
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Copy of the log with timestamps.
    pub async fn history(&self) -> Vec<LogEntry> {
        self.log.lock().await.entries().to_vec()
    }

    /// Clear the conversation. The server stays initialized.
    pub async fn reset(&self) {
        self.log.lock().await.clear();
        tracing::info!("conversation reset");
    }

    /// Send one user message and return the text to show.
    pub async fn send_message(&self, text: &str) -> Result<String> {
        self.ensure_initialized().await;
        self.append(ChatMessage::user(text)).await?;

        let result = self.run_turn().await;
        self.set_state(TurnState::Idle).await;
        if let Err(e) = &result {
            tracing::error!("turn failed: {}", e);
        }
        result
    }

    async fn ensure_initialized(&self) -> &InitializeResult {
        self.initialized
            .get_or_init(|| async {
                let client = ClientInfo {
                    name: self.config.client_name.clone(),
                    version: SERVER_VERSION.into(),
                };
                self.server.initialize(client).await
            })
            .await
    }

    async fn run_turn(&self) -> Result<String> {
        let tools = self.server.list_tools().await.tools;
        let context = self.server.page_context().await;

        self.set_state(TurnState::AwaitingFirstModelResponse).await;
        let request = self.request(&tools, &context, None).await;
        let reply = parse_reply(self.model.complete(request).await?)?;

        let (content, calls) = match reply {
            ModelReply::Message(content) => {
                self.append(ChatMessage::assistant(content.clone())).await?;
                return Ok(content);
            }
            ModelReply::ToolCalls { content, calls } => (content, calls),
        };

        self.append(ChatMessage::assistant_with_calls(content, calls.clone()))
            .await?;

        self.set_state(TurnState::ExecutingTools).await;
        for call in &calls {
            let output = self.execute(call).await;
            self.append(ChatMessage::tool(call.id.clone(), call.name(), output))
                .await?;
        }

        self.set_state(TurnState::AwaitingFollowUpModelResponse).await;
        let instruction = self.config.summary_instruction.clone();
        let request = self.request(&tools, &context, Some(instruction)).await;
        let summary = match self.model.complete(request).await.and_then(parse_reply) {
            Ok(ModelReply::Message(content)) if !content.trim().is_empty() => content,
            Ok(ModelReply::ToolCalls {
                content: Some(content),
                ..
            }) => content,
            Ok(_) => self.config.fallback_reply.clone(),
            Err(e) => {
                tracing::warn!("follow-up request failed: {}", e);
                self.config.fallback_reply.clone()
            }
        };

        self.append(ChatMessage::assistant(summary.clone())).await?;
        Ok(summary)
    }

    /// Run one call; failures become an embedded `{"error": ...}` payload.
    async fn execute(&self, call: &ToolCallRequest) -> String {
        let outcome = match call.parse_arguments() {
            Ok(arguments) => self.server.call_tool(call.name(), arguments).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) if result.is_error => {
                serde_json::json!({ "error": result.joined_text() }).to_string()
            }
            Ok(result) => result.joined_text(),
            Err(e) => {
                tracing::warn!(tool = %call.name(), "tool call failed: {}", e);
                let message = match e {
                    Error::ToolExecution { message, .. } => message,
                    other => other.to_string(),
                };
                serde_json::json!({ "error": message }).to_string()
            }
        }
    }

    async fn request(
        &self,
        tools: &[ToolDefinition],
        context: &str,
        instruction: Option<String>,
    ) -> ModelRequest {
        let mut messages = self.log.lock().await.window(self.config.history_limit);
        if let Some(instruction) = instruction {
            messages.push(ChatMessage::user(instruction));
        }
        ModelRequest {
            messages,
            tools: tools.to_vec(),
            context: context.to_string(),
        }
    }

    async fn append(&self, message: ChatMessage) -> Result<()> {
        self.log.lock().await.append(message)
    }

    async fn set_state(&self, state: TurnState) {
        *self.state.write().await = state;
    }
}
