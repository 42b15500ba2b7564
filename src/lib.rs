//! # dom-mcp
//!
//! MCP (Model Context Protocol) server for tools and resources declared in
//! page markup.
//!
//! A page describes what an agent may do with plain elements:
//!
//! ```html
//! <tool name="add" description="Add two numbers">
//!   <prop name="a" type="number" required/>
//!   <prop name="b" type="number" required/>
//! </tool>
//! <resource name="user" description="Signed-in user">Ada Lovelace</resource>
//! ```
//!
//! The server turns these into MCP tool and resource descriptors on every
//! request, executes tool calls by dispatching a "call" event on the tool
//! element and waiting for the page's "response", and drives a multi-turn
//! conversation between the user, a language model and the page.
//!
//! ## Features
//!
//! - **MCP-compliant**: `initialize`, `tools/list`, `tools/call`,
//!   `resources/list` and `resources/read` over JSON-RPC 2.0
//! - **Live catalog**: descriptors are rebuilt from the current document on
//!   every call, so pages can add and remove tools at will
//! - **Fire-and-forget friendly**: tools that never answer resolve with a
//!   placeholder after a timeout (5 s by default)
//! - **Conversation loop**: sequential tool execution with per-tool error
//!   reporting and a summarizing follow-up request
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dom_mcp::{McpServer, Page};
//!
//! # async fn demo() -> dom_mcp::Result<()> {
//! let page = Arc::new(Page::new(
//!     "https://example.test/",
//!     r#"<tool name="ping" description="Ping the page"></tool>"#,
//! ));
//! page.on_tool_call("ping", |event| {
//!     event.respond(serde_json::json!({ "pong": true }));
//! })
//! .await;
//!
//! let server = McpServer::new(Arc::clone(&page));
//! let result = server.call_tool("ping", serde_json::json!({})).await?;
//! assert_eq!(result.joined_text(), r#"{"pong":true}"#);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod conversation;
pub mod dom;
pub mod error;
pub mod events;
pub mod invoker;
pub mod model;
pub mod page;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;

pub use bridge::{spawn_background, BackgroundHandler, BridgeClient, BridgeRequest};
pub use config::Config;
pub use conversation::{ConversationLog, Orchestrator, TurnState};
pub use dom::{Document, ElementId};
pub use error::{Error, Result};
pub use events::{CallEvent, EventBus, EventTarget};
pub use invoker::{EventInvoker, Invoker};
pub use model::{ChatMessage, ModelClient, ModelRequest, Role};
pub use page::Page;
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpMessage, ToolCallResult};
pub use registry::Registry;
pub use server::McpServer;
