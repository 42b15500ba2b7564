//! Bridge envelope and example prompt tests.

use std::sync::Arc;

use serde_json::{json, Value};

use dom_mcp::bridge::{
    handle_json, spawn_background, BackgroundHandler, BridgeRequest, ConnectionSettings,
    ConnectionStatus, ExamplePrompts, ExamplePromptsRequest,
};
use dom_mcp::config::ChangeThresholds;
use dom_mcp::prompts::{
    extract_prompts, fallback_prompts, generate_example_prompts, request_example_prompts,
    significantly_different, CatalogSnapshot, ExamplePromptTracker,
};
use dom_mcp::protocol::{ResourceDefinition, ToolDefinition};
use dom_mcp::{ChatMessage, Error, McpServer, ModelClient, ModelRequest, Orchestrator, Page};

fn tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: format!("{name} tool"),
        input_schema: json!({ "type": "object", "properties": {}, "required": [] }),
    }
}

fn resource(name: &str) -> ResourceDefinition {
    ResourceDefinition {
        uri: format!("dom://{name}"),
        name: name.into(),
        description: String::new(),
        mime_type: "text/plain".into(),
    }
}

fn tools(names: &[&str]) -> Vec<ToolDefinition> {
    names.iter().map(|n| tool(n)).collect()
}

fn resources(names: &[&str]) -> Vec<ResourceDefinition> {
    names.iter().map(|n| resource(n)).collect()
}

/// Background handler backed by canned answers.
struct CannedBackground {
    reply: Value,
    prompts: Option<Vec<String>>,
}

#[async_trait::async_trait]
impl BackgroundHandler for CannedBackground {
    async fn llm_request(&self, request: ModelRequest) -> dom_mcp::Result<Value> {
        if request.messages.is_empty() {
            return Err(Error::Transport("API key not configured".into()));
        }
        Ok(self.reply.clone())
    }

    async fn test_connection(
        &self,
        settings: ConnectionSettings,
    ) -> dom_mcp::Result<ConnectionStatus> {
        if settings.api_key.is_empty() {
            return Err(Error::Config("missing API key".into()));
        }
        Ok(ConnectionStatus {
            success: true,
            model: settings.model,
            error: None,
        })
    }

    async fn example_prompts(
        &self,
        request: ExamplePromptsRequest,
    ) -> dom_mcp::Result<ExamplePrompts> {
        match &self.prompts {
            Some(prompts) => Ok(ExamplePrompts {
                prompts: prompts.clone(),
            }),
            None => Err(Error::Transport(format!("no model for {} tools", request.tools.len()))),
        }
    }
}

fn background(reply: Value, prompts: Option<Vec<String>>) -> Arc<dyn BackgroundHandler> {
    Arc::new(CannedBackground { reply, prompts })
}

// ============================================================================
// Envelopes
// ============================================================================

#[test]
fn test_envelope_wire_format() {
    let request = BridgeRequest::LlmRequest(ModelRequest {
        messages: vec![ChatMessage::user("hi")],
        tools: vec![],
        context: "ctx".into(),
    });
    let wire = serde_json::to_value(&request).unwrap();
    assert_eq!(wire["type"], "LLM_REQUEST");
    assert_eq!(wire["data"]["messages"][0], json!({ "role": "user", "content": "hi" }));
    assert_eq!(wire["data"]["context"], "ctx");

    let test: BridgeRequest = serde_json::from_value(json!({
        "type": "TEST_CONNECTION",
        "data": { "baseUrl": "https://api.example.test/v1", "apiKey": "k", "model": "m" }
    }))
    .unwrap();
    assert_eq!(
        test,
        BridgeRequest::TestConnection(ConnectionSettings {
            base_url: "https://api.example.test/v1".into(),
            api_key: "k".into(),
            model: Some("m".into()),
        })
    );

    let prompts = serde_json::to_value(BridgeRequest::GetExamplePrompts(ExamplePromptsRequest {
        tools: vec![],
        context: String::new(),
    }))
    .unwrap();
    assert_eq!(prompts["type"], "GET_EXAMPLE_PROMPTS");
}

#[tokio::test]
async fn test_handler_failures_become_error_objects() {
    let handler = background(json!({}), None);

    let llm = handle_json(
        handler.as_ref(),
        json!({ "type": "LLM_REQUEST", "data": { "messages": [], "tools": [], "context": "" } }),
    )
    .await;
    assert_eq!(llm, json!({ "error": "transport error: API key not configured" }));

    let test = handle_json(
        handler.as_ref(),
        json!({ "type": "TEST_CONNECTION", "data": { "baseUrl": "https://x.test" } }),
    )
    .await;
    assert_eq!(test["success"], false);
    assert!(test["error"].as_str().unwrap().contains("missing API key"));

    let prompts = handle_json(
        handler.as_ref(),
        json!({ "type": "GET_EXAMPLE_PROMPTS", "data": { "tools": [], "context": "" } }),
    )
    .await;
    assert!(prompts["error"].is_string());

    let unknown = handle_json(handler.as_ref(), json!({ "type": "TOGGLE_CHAT" })).await;
    assert!(unknown["error"].is_string());
}

#[tokio::test]
async fn test_bridge_client_round_trips() {
    let client = spawn_background(background(
        json!({ "role": "assistant", "content": "pong" }),
        Some(vec!["Plan my week".into()]),
    ));

    let reply = client
        .complete(ModelRequest {
            messages: vec![ChatMessage::user("ping")],
            tools: vec![],
            context: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(reply["content"], "pong");

    let ok = client
        .test_connection(ConnectionSettings {
            base_url: "https://x.test".into(),
            api_key: "secret".into(),
            model: Some("gpt-4".into()),
        })
        .await
        .unwrap();
    assert!(ok.success);
    assert_eq!(ok.model.as_deref(), Some("gpt-4"));

    let failed = client
        .test_connection(ConnectionSettings {
            base_url: "https://x.test".into(),
            api_key: String::new(),
            model: None,
        })
        .await
        .unwrap();
    assert!(!failed.success);
    assert!(failed.error.is_some());

    let prompts = client
        .example_prompts(ExamplePromptsRequest {
            tools: vec![],
            context: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(prompts, vec!["Plan my week"]);
}

#[tokio::test]
async fn test_orchestrator_over_bridge() {
    let page = Arc::new(Page::new("https://x.test/", "<title>Empty</title>"));
    let client = spawn_background(background(
        json!({ "type": "message", "content": "Nothing to do here." }),
        None,
    ));
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), Arc::new(client));

    let reply = orchestrator.send_message("hello").await.unwrap();
    assert_eq!(reply, "Nothing to do here.");
}

#[tokio::test]
async fn test_default_example_prompts_use_fallback() {
    struct Minimal;

    #[async_trait::async_trait]
    impl BackgroundHandler for Minimal {
        async fn llm_request(&self, _: ModelRequest) -> dom_mcp::Result<Value> {
            Ok(json!({}))
        }

        async fn test_connection(
            &self,
            _: ConnectionSettings,
        ) -> dom_mcp::Result<ConnectionStatus> {
            Ok(ConnectionStatus {
                success: true,
                model: None,
                error: None,
            })
        }
    }

    let client = spawn_background(Arc::new(Minimal));
    let prompts = client
        .example_prompts(ExamplePromptsRequest {
            tools: tools(&["set_schedule"]),
            context: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(prompts, vec!["Set my work schedule for today"]);
}

// ============================================================================
// Example prompts
// ============================================================================

#[test]
fn test_fallback_prompts() {
    assert_eq!(
        fallback_prompts(&tools(&["set_schedule", "switch_date", "plan_absence", "x"])),
        vec![
            "Set my work schedule for today",
            "Switch to tomorrow's date",
            "Plan my vacation next week"
        ]
    );
    assert_eq!(
        fallback_prompts(&tools(&["search"])),
        vec!["What can you help me with?", "Show available tools", "Help me with this page"]
    );
    assert_eq!(fallback_prompts(&[]).len(), 3);
}

#[test]
fn test_extract_prompts() {
    let text = "Sure! Here you go:\n[\"Add 2 and 3\",\n \"Open today's tasks\"]\nEnjoy.";
    assert_eq!(
        extract_prompts(text),
        Some(vec!["Add 2 and 3".to_string(), "Open today's tasks".to_string()])
    );
    assert_eq!(extract_prompts("no array here"), None);
    assert_eq!(extract_prompts("[1, 2]"), None);
}

struct FixedModel(dom_mcp::Result<Value>);

#[async_trait::async_trait]
impl ModelClient for FixedModel {
    async fn complete(&self, _: ModelRequest) -> dom_mcp::Result<Value> {
        match &self.0 {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(Error::Transport(e.to_string())),
        }
    }
}

#[tokio::test]
async fn test_generate_example_prompts() {
    let model = FixedModel(Ok(json!({
        "role": "assistant",
        "content": "[\"Add two numbers\", \"Show the sum\", \"Reset the calculator\"]"
    })));
    let prompts = generate_example_prompts(&model, &tools(&["add"]), "").await;
    assert_eq!(prompts, vec!["Add two numbers", "Show the sum", "Reset the calculator"]);

    let offline = FixedModel(Err(Error::Transport("offline".into())));
    let prompts = generate_example_prompts(&offline, &tools(&["switch_date"]), "").await;
    assert_eq!(prompts, vec!["Switch to tomorrow's date"]);
}

#[tokio::test]
async fn test_request_example_prompts_falls_back() {
    let page = Arc::new(Page::new(
        "https://x.test/",
        r#"<tool name="plan_absence"></tool>"#,
    ));
    let server = McpServer::new(page);

    let failing = spawn_background(background(json!({}), None));
    assert_eq!(
        request_example_prompts(&server, &failing).await,
        vec!["Plan my vacation next week"]
    );

    let working = spawn_background(background(json!({}), Some(vec!["Take Friday off".into()])));
    assert_eq!(request_example_prompts(&server, &working).await, vec!["Take Friday off"]);
}

// ============================================================================
// Change detection
// ============================================================================

#[test]
fn test_significantly_different() {
    let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    assert!(!significantly_different(&[], &[], 0.3));
    assert!(significantly_different(&names(&["a"]), &[], 0.3));
    assert!(!significantly_different(&names(&["a", "b"]), &names(&["b", "a"]), 0.3));
    // 3 of 4 distinct names shared: 25% change.
    assert!(!significantly_different(
        &names(&["a", "b", "c"]),
        &names(&["a", "b", "c", "d"]),
        0.3
    ));
    // 2 of 4 shared: 50% change.
    assert!(significantly_different(&names(&["a", "b", "c"]), &names(&["a", "b", "d"]), 0.3));
}

#[test]
fn test_tracker_thresholds() {
    let mut tracker = ExamplePromptTracker::default();
    let base = CatalogSnapshot::new(&tools(&["a", "b", "c", "d"]), &resources(&["r1", "r2"]));
    assert!(!tracker.observe(base.clone()), "first observation is never a change");

    // Same catalog in a different order.
    let same = CatalogSnapshot::new(&tools(&["d", "c", "b", "a"]), &resources(&["r2", "r1"]));
    assert!(!tracker.observe(same));

    // One extra tool: 20% name change, count delta 1.
    let one_more =
        CatalogSnapshot::new(&tools(&["a", "b", "c", "d", "e"]), &resources(&["r1", "r2"]));
    assert!(!tracker.observe(one_more));

    // Two tools removed: count delta 2.
    let two_fewer = CatalogSnapshot::new(&tools(&["a", "b", "c"]), &resources(&["r1", "r2"]));
    assert!(tracker.observe(two_fewer));

    // One of two resources renamed: 67% name change.
    let renamed = CatalogSnapshot::new(&tools(&["a", "b", "c"]), &resources(&["r1", "r3"]));
    assert!(tracker.observe(renamed));
    assert_eq!(tracker.last().unwrap().resource_names, vec!["r1", "r3"]);
}

#[test]
fn test_custom_thresholds() {
    let thresholds = ChangeThresholds {
        tool_count_delta: 10,
        resource_count_delta: 10,
        tool_name_change: 0.9,
        resource_name_change: 0.9,
    };
    let mut tracker = ExamplePromptTracker::new(thresholds);
    tracker.observe(CatalogSnapshot::new(&tools(&["a", "b"]), &[]));
    assert!(!tracker.observe(CatalogSnapshot::new(&tools(&["a", "c"]), &[])));
    assert!(tracker.observe(CatalogSnapshot::new(&tools(&["x"]), &resources(&["r"]))));
}

#[tokio::test]
async fn test_capture_from_server() {
    let page = Arc::new(Page::new(
        "https://x.test/",
        r#"<tool name="b"></tool><tool name="a"></tool><context name="c">1</context>"#,
    ));
    let server = McpServer::new(page);
    let snapshot = CatalogSnapshot::capture(&server).await;
    assert_eq!(snapshot.tool_names, vec!["a", "b"]);
    assert_eq!(snapshot.resource_count(), 1);
}
