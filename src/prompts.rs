//! Example prompts for the current page.
//!
//! Prompts come from the background handler when it can produce them and
//! from a small name-based list otherwise. [`ExamplePromptTracker`] decides
//! when the catalog changed enough to ask again.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::bridge::{BridgeClient, ExamplePromptsRequest};
use crate::config::ChangeThresholds;
use crate::model::{parse_reply, ChatMessage, ModelClient, ModelReply, ModelRequest};
use crate::protocol::{ResourceDefinition, ToolDefinition};
use crate::server::McpServer;

/// Most prompts ever suggested at once.
pub const MAX_PROMPTS: usize = 3;

/// Prompts derived from tool names alone.
pub fn fallback_prompts(tools: &[ToolDefinition]) -> Vec<String> {
    let has = |fragment: &str| tools.iter().any(|tool| tool.name.contains(fragment));

    let mut prompts = Vec::new();
    if has("schedule") {
        prompts.push("Set my work schedule for today".to_string());
    }
    if has("date") {
        prompts.push("Switch to tomorrow's date".to_string());
    }
    if has("absence") {
        prompts.push("Plan my vacation next week".to_string());
    }
    if prompts.is_empty() {
        prompts.extend(
            ["What can you help me with?", "Show available tools", "Help me with this page"]
                .map(String::from),
        );
    }
    prompts.truncate(MAX_PROMPTS);
    prompts
}

/// Instruction asking a model for example prompts.
pub fn generation_instruction(tools: &[ToolDefinition], context: &str) -> String {
    let tools = tools
        .iter()
        .map(|tool| {
            let params = tool
                .input_schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|properties| {
                    properties
                        .iter()
                        .map(|(name, schema)| {
                            let kind = schema
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("string");
                            format!("{} ({})", name, kind)
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if params.is_empty() {
                format!("{}: {}", tool.name, tool.description)
            } else {
                format!("{}: {} [Parameters: {}]", tool.name, tool.description, params.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Generate {MAX_PROMPTS} example user instructions for an AI assistant with these tools \
         and context:\n\nTools:\n{tools}\n\nContext:\n{context}\n\nReturn only a JSON array of \
         {MAX_PROMPTS} short, natural user instructions that would use these tools. Each should \
         be 5-15 words."
    )
}

/// First JSON array of strings embedded in `text`.
pub fn extract_prompts(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = start + text[start..].find(']')?;
    serde_json::from_str(&text[start..=end]).ok()
}

/// Ask a model directly for example prompts, falling back to name-based ones.
pub async fn generate_example_prompts(
    model: &dyn ModelClient,
    tools: &[ToolDefinition],
    context: &str,
) -> Vec<String> {
    let request = ModelRequest {
        messages: vec![ChatMessage::user(generation_instruction(tools, context))],
        tools: Vec::new(),
        context: context.to_string(),
    };

    let text = match model.complete(request).await.and_then(parse_reply) {
        Ok(ModelReply::Message(text)) => text,
        Ok(ModelReply::ToolCalls { content, .. }) => content.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("example prompt generation failed: {}", e);
            String::new()
        }
    };

    match extract_prompts(&text) {
        Some(prompts) if !prompts.is_empty() => prompts,
        _ => fallback_prompts(tools),
    }
}

/// Example prompts for the server's page, via the bridge.
pub async fn request_example_prompts(server: &McpServer, bridge: &BridgeClient) -> Vec<String> {
    let tools = server.list_tools().await.tools;
    let context = server.page_context().await;

    let request = ExamplePromptsRequest {
        tools: tools.clone(),
        context,
    };
    match bridge.example_prompts(request).await {
        Ok(prompts) if !prompts.is_empty() => prompts,
        Ok(_) => fallback_prompts(&tools),
        Err(e) => {
            tracing::warn!("could not load example prompts: {}", e);
            fallback_prompts(&tools)
        }
    }
}

/// Names and counts of the catalog at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    /// Sorted tool names.
    pub tool_names: Vec<String>,
    /// Sorted resource names.
    pub resource_names: Vec<String>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    /// Snapshot of listed tools and resources.
    pub fn new(tools: &[ToolDefinition], resources: &[ResourceDefinition]) -> Self {
        let mut tool_names: Vec<String> = tools.iter().map(|tool| tool.name.clone()).collect();
        let mut resource_names: Vec<String> = resources
            .iter()
            .map(|resource| {
                if resource.name.is_empty() {
                    resource.uri.clone()
                } else {
                    resource.name.clone()
                }
            })
            .collect();
        tool_names.sort();
        resource_names.sort();

        Self {
            tool_names,
            resource_names,
            taken_at: Utc::now(),
        }
    }

    /// Snapshot of the server's current catalog.
    pub async fn capture(server: &McpServer) -> Self {
        let tools = server.list_tools().await.tools;
        let resources = server.list_resources().await.resources;
        Self::new(&tools, &resources)
    }

    /// Number of tools.
    pub fn tool_count(&self) -> usize {
        self.tool_names.len()
    }

    /// Number of resources.
    pub fn resource_count(&self) -> usize {
        self.resource_names.len()
    }

    /// Whether `self` differs enough from `previous` to refresh prompts.
    pub fn is_major_change(
        &self,
        previous: &CatalogSnapshot,
        thresholds: &ChangeThresholds,
    ) -> bool {
        self.tool_count().abs_diff(previous.tool_count()) >= thresholds.tool_count_delta
            || self.resource_count().abs_diff(previous.resource_count())
                >= thresholds.resource_count_delta
            || significantly_different(
                &self.tool_names,
                &previous.tool_names,
                thresholds.tool_name_change,
            )
            || significantly_different(
                &self.resource_names,
                &previous.resource_names,
                thresholds.resource_name_change,
            )
    }
}

/// Whether more than `threshold` of the distinct names are not shared.
pub fn significantly_different(a: &[String], b: &[String], threshold: f64) -> bool {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return false,
        (true, false) | (false, true) => return true,
        _ => {}
    }

    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    let shared = a.intersection(&b).count();
    let distinct = a.union(&b).count();
    let similarity = shared as f64 / distinct as f64;

    1.0 - similarity > threshold
}

/// Remembers the last catalog and reports major changes.
#[derive(Debug, Clone, Default)]
pub struct ExamplePromptTracker {
    thresholds: ChangeThresholds,
    last: Option<CatalogSnapshot>,
}

impl ExamplePromptTracker {
    /// Tracker with custom thresholds.
    pub fn new(thresholds: ChangeThresholds) -> Self {
        Self {
            thresholds,
            last: None,
        }
    }

    /// Record `snapshot`; true when it is a major change from the previous
    /// one. The first observation never is.
    pub fn observe(&mut self, snapshot: CatalogSnapshot) -> bool {
        let changed = self
            .last
            .as_ref()
            .is_some_and(|last| snapshot.is_major_change(last, &self.thresholds));
        if changed {
            tracing::info!(
                tools = snapshot.tool_count(),
                resources = snapshot.resource_count(),
                "catalog changed, example prompts are stale"
            );
        }
        self.last = Some(snapshot);
        changed
    }

    /// Last recorded snapshot.
    pub fn last(&self) -> Option<&CatalogSnapshot> {
        self.last.as_ref()
    }
}
