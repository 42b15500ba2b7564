//! Tool invocation.
//!
//! [`Invoker`] is the seam between the protocol server and whatever executes
//! tools. [`EventInvoker`] executes them on a [`Page`] by dispatching a "call"
//! event on the tool element and waiting for the matching "response".

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::page::Page;
use crate::protocol::ToolCallResult;
use crate::registry::ToolDescriptor;

/// How long a call waits for a response before assuming fire-and-forget.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Text returned when a tool does not answer in time.
pub const NO_RESPONSE_TEXT: &str = "Tool executed (no response)";

/// Executes a tool call against its target.
///
/// Implementations resolve exactly once per call.
#[async_trait::async_trait]
pub trait Invoker: Send + Sync {
    /// Invoke `tool` with `arguments`.
    async fn invoke(&self, tool: &ToolDescriptor, arguments: Value) -> Result<ToolCallResult>;
}

/// Invoker that talks to page code through the page's event bus.
#[derive(Debug, Clone)]
pub struct EventInvoker {
    page: Arc<Page>,
    timeout: Duration,
}

impl EventInvoker {
    /// Invoker with the default 5 second timeout.
    pub fn new(page: Arc<Page>) -> Self {
        Self::with_timeout(page, DEFAULT_CALL_TIMEOUT)
    }

    /// Invoker with a custom timeout.
    pub fn with_timeout(page: Arc<Page>, timeout: Duration) -> Self {
        Self { page, timeout }
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl Invoker for EventInvoker {
    async fn invoke(&self, tool: &ToolDescriptor, arguments: Value) -> Result<ToolCallResult> {
        let document = self.page.snapshot().await;
        let path = document.bubbling_path(tool.element);
        if path.is_empty() {
            // The element left the page between listing and calling.
            return Err(Error::ToolNotFound(tool.name.clone()));
        }

        let events = self.page.events();
        let (listener, response) = events.once_response(tool.element);

        tracing::debug!(tool = %tool.name, arguments = %arguments, "dispatching call");
        let outcome = events.dispatch_call(&tool.name, &path, Arc::new(arguments));
        if outcome.default_prevented {
            tracing::debug!(tool = %tool.name, "call event cancelled by page");
        }

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(detail)) => interpret_response(&tool.name, detail),
            Ok(Err(_)) => Err(Error::ToolExecution {
                tool: tool.name.clone(),
                message: "tool element was removed before it responded".into(),
            }),
            Err(_) => {
                events.remove_response_listener(tool.element, listener);
                tracing::warn!(
                    tool = %tool.name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    delivered = outcome.delivered,
                    "no response from tool"
                );
                Ok(ToolCallResult::text(NO_RESPONSE_TEXT))
            }
        }
    }
}

/// Turn a response detail into a call result.
///
/// A truthy `error` field fails the call; anything else is echoed back as
/// JSON text.
pub fn interpret_response(tool: &str, detail: Value) -> Result<ToolCallResult> {
    if let Some(message) = reported_error(&detail) {
        return Err(Error::ToolExecution {
            tool: tool.to_string(),
            message,
        });
    }
    let payload = if detail.is_null() {
        serde_json::json!({ "success": true })
    } else {
        detail
    };
    Ok(ToolCallResult::text(serde_json::to_string(&payload)?))
}

fn reported_error(detail: &Value) -> Option<String> {
    match detail.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) if message.is_empty() => None,
        Value::String(message) => Some(message.clone()),
        Value::Bool(true) => Some("tool reported an error".into()),
        Value::Number(code) if code.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}
