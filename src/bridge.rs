//! Message bridge between the page and a background handler.
//!
//! Requests travel as `{"type": ..., "data": ...}` envelopes and each gets
//! exactly one JSON object back. The background side owns whatever talks to
//! the model provider; this module only carries the messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::model::{ModelClient, ModelRequest};
use crate::protocol::ToolDefinition;

/// Requests queued before senders wait.
const BRIDGE_QUEUE: usize = 32;

/// A bridge request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeRequest {
    /// Ask the model for a completion.
    LlmRequest(ModelRequest),
    /// Check provider settings.
    TestConnection(ConnectionSettings),
    /// Ask for example prompts for the current catalog.
    GetExamplePrompts(ExamplePromptsRequest),
}

/// Provider settings to test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Provider base URL.
    pub base_url: String,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Result of a connection test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the provider answered.
    pub success: bool,
    /// Model reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Catalog sent along with an example prompt request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplePromptsRequest {
    /// Tools on the page.
    pub tools: Vec<ToolDefinition>,
    /// Page context text.
    pub context: String,
}

/// Example prompts answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplePrompts {
    /// Suggested user instructions.
    pub prompts: Vec<String>,
}

/// The background side of the bridge.
#[async_trait::async_trait]
pub trait BackgroundHandler: Send + Sync {
    /// Complete a model request; the raw reply is passed through.
    async fn llm_request(&self, request: ModelRequest) -> Result<Value>;

    /// Test provider settings.
    async fn test_connection(&self, settings: ConnectionSettings) -> Result<ConnectionStatus>;

    /// Suggest example prompts.
    async fn example_prompts(&self, request: ExamplePromptsRequest) -> Result<ExamplePrompts> {
        Ok(ExamplePrompts {
            prompts: crate::prompts::fallback_prompts(&request.tools),
        })
    }
}

/// Answer one envelope. Handler failures become `{"error": ...}` objects.
pub async fn handle_request(handler: &dyn BackgroundHandler, request: BridgeRequest) -> Value {
    match request {
        BridgeRequest::LlmRequest(request) => match handler.llm_request(request).await {
            Ok(reply) => reply,
            Err(e) => json!({ "error": e.to_string() }),
        },
        BridgeRequest::TestConnection(settings) => {
            match handler.test_connection(settings).await.and_then(to_json) {
                Ok(status) => status,
                Err(e) => json!({ "success": false, "error": e.to_string() }),
            }
        }
        BridgeRequest::GetExamplePrompts(request) => {
            match handler.example_prompts(request).await.and_then(to_json) {
                Ok(prompts) => prompts,
                Err(e) => json!({ "error": e.to_string() }),
            }
        }
    }
}

/// Answer a raw JSON envelope.
pub async fn handle_json(handler: &dyn BackgroundHandler, envelope: Value) -> Value {
    match serde_json::from_value::<BridgeRequest>(envelope) {
        Ok(request) => handle_request(handler, request).await,
        Err(e) => json!({ "error": format!("unsupported message: {}", e) }),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

struct Envelope {
    request: BridgeRequest,
    reply: oneshot::Sender<Value>,
}

/// Run `handler` on a background task and return the page-side client.
///
/// Each request is answered on its own task, so a slow model call does not
/// hold up a connection test.
pub fn spawn_background(handler: Arc<dyn BackgroundHandler>) -> BridgeClient {
    let (sender, mut receiver) = mpsc::channel::<Envelope>(BRIDGE_QUEUE);

    tokio::spawn(async move {
        while let Some(Envelope { request, reply }) = receiver.recv().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let response = handle_request(handler.as_ref(), request).await;
                if reply.send(response).is_err() {
                    tracing::debug!("bridge caller went away before the reply");
                }
            });
        }
        tracing::debug!("bridge closed");
    });

    BridgeClient { sender }
}

/// Page-side handle to the background handler.
#[derive(Clone)]
pub struct BridgeClient {
    sender: mpsc::Sender<Envelope>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl BridgeClient {
    /// Send an envelope and wait for its reply.
    pub async fn request(&self, request: BridgeRequest) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Envelope { request, reply })
            .await
            .map_err(|_| Error::Transport("background handler is not running".into()))?;
        response
            .await
            .map_err(|_| Error::Transport("background handler dropped the request".into()))
    }

    /// Test provider settings.
    pub async fn test_connection(&self, settings: ConnectionSettings) -> Result<ConnectionStatus> {
        let reply = self.request(BridgeRequest::TestConnection(settings)).await?;
        serde_json::from_value(reply)
            .map_err(|e| Error::Transport(format!("malformed connection status: {}", e)))
    }

    /// Ask for example prompts.
    pub async fn example_prompts(&self, request: ExamplePromptsRequest) -> Result<Vec<String>> {
        let reply = self.request(BridgeRequest::GetExamplePrompts(request)).await?;
        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            return Err(Error::Transport(error.to_string()));
        }
        let prompts: ExamplePrompts = serde_json::from_value(reply)
            .map_err(|e| Error::Transport(format!("malformed example prompts: {}", e)))?;
        Ok(prompts.prompts)
    }
}

#[async_trait::async_trait]
impl ModelClient for BridgeClient {
    async fn complete(&self, request: ModelRequest) -> Result<Value> {
        self.request(BridgeRequest::LlmRequest(request)).await
    }
}
