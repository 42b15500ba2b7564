//! Conversation loop tests with a scripted model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio_test::assert_ok;

use dom_mcp::config::ConversationConfig;
use dom_mcp::conversation::ConversationLog;
use dom_mcp::model::{parse_reply, ModelReply, ToolCallRequest};
use dom_mcp::{
    ChatMessage, Error, McpServer, ModelClient, ModelRequest, Orchestrator, Page, Role, TurnState,
};

const PAGE: &str = r#"
<title>Planner</title>
<tool name="switch_date" description="Show another day"><prop name="date" required/></tool>
<tool name="plan_absence" description="Plan an absence">
  <prop name="from" required/><prop name="to" required/>
</tool>
<resource name="today">2025-06-05</resource>
"#;

/// Replays canned replies and records every request.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<dom_mcp::Result<Value>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(replies: Vec<dom_mcp::Result<Value>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> dom_mcp::Result<Value> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport("script exhausted".into())))
    }
}

fn tool_call(id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "id": id,
        "type": "function",
        "function": { "name": name, "arguments": arguments.to_string() }
    })
}

/// Page whose tools log their calls and answer immediately.
async fn planner_page(calls: Arc<Mutex<Vec<String>>>) -> Arc<Page> {
    let page = Arc::new(Page::new("https://planner.test/", PAGE));
    let log = Arc::clone(&calls);
    page.on_tool_call("switch_date", move |event| {
        let date = event.arguments()["date"].as_str().unwrap_or_default().to_string();
        log.lock().unwrap().push(format!("switch_date:{date}"));
        event.respond(json!({ "shown": date }));
    })
    .await
    .unwrap();
    let log = Arc::clone(&calls);
    page.on_tool_call("plan_absence", move |event| {
        log.lock().unwrap().push("plan_absence".into());
        event.respond(json!({ "error": "calendar is locked" }));
    })
    .await
    .unwrap();
    page
}

#[tokio::test]
async fn test_plain_reply() {
    let page = planner_page(Arc::default()).await;
    let model = ScriptedModel::new(vec![Ok(json!({ "role": "assistant", "content": "Hi there" }))]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model.clone());

    let reply = assert_ok!(orchestrator.send_message("hello").await);
    assert_eq!(reply, "Hi there");
    assert!(orchestrator.is_initialized());
    assert_eq!(orchestrator.state().await, TurnState::Idle);

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages, vec![ChatMessage::user("hello")]);
    assert_eq!(requests[0].tools.len(), 2);
    assert_eq!(requests[0].context, "today: 2025-06-05\n\n");

    let messages = orchestrator.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1], ChatMessage::assistant("Hi there"));
}

#[tokio::test]
async fn test_tool_calls_run_in_order_with_partial_failure() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let page = planner_page(Arc::clone(&calls)).await;
    let model = ScriptedModel::new(vec![
        Ok(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                tool_call("call_1", "switch_date", json!({ "date": "2025-06-06" })),
                tool_call("call_2", "plan_absence", json!({ "from": "a", "to": "b" })),
                tool_call("call_3", "missing_tool", json!({})),
                tool_call("call_4", "switch_date", json!({ "date": "2025-06-07" })),
            ]
        })),
        Ok(json!({ "role": "assistant", "content": "Moved to June 6th and 7th." })),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model.clone());

    let reply = orchestrator.send_message("show me the next days").await.unwrap();
    assert_eq!(reply, "Moved to June 6th and 7th.");
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["switch_date:2025-06-06", "plan_absence", "switch_date:2025-06-07"]
    );

    let messages = orchestrator.messages().await;
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Tool,
            Role::Tool,
            Role::Tool,
            Role::Assistant
        ]
    );
    assert_eq!(messages[1].calls().len(), 4);

    let tool_results: Vec<(&str, &str)> = messages[2..6]
        .iter()
        .map(|m| {
            (
                m.tool_call_id.as_deref().unwrap(),
                m.content.as_deref().unwrap(),
            )
        })
        .collect();
    assert_eq!(tool_results[0], ("call_1", r#"{"shown":"2025-06-06"}"#));
    assert_eq!(tool_results[1], ("call_2", r#"{"error":"calendar is locked"}"#));
    assert_eq!(tool_results[2].0, "call_3");
    let missing: Value = serde_json::from_str(tool_results[2].1).unwrap();
    assert!(missing["error"].as_str().unwrap().contains("missing_tool"));
    assert_eq!(tool_results[3], ("call_4", r#"{"shown":"2025-06-07"}"#));
    assert_eq!(messages[6].tool_calls, None);

    // The follow-up carries the tool results plus the summary instruction,
    // which is not stored.
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let follow_up = &requests[1].messages;
    assert_eq!(follow_up.len(), 7);
    assert_eq!(follow_up[..6], messages[..6]);
    assert_eq!(follow_up[6].role, Role::User);
    assert_eq!(
        follow_up[6].content.as_deref(),
        Some(ConversationConfig::default().summary_instruction.as_str())
    );
}

#[tokio::test]
async fn test_legacy_tool_call_shape() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let page = planner_page(Arc::clone(&calls)).await;
    let model = ScriptedModel::new(vec![
        Ok(json!({
            "type": "tool_call",
            "tool_name": "switch_date",
            "arguments": { "date": "2025-07-01" }
        })),
        Ok(json!({ "type": "message", "content": "Done." })),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model);

    assert_eq!(orchestrator.send_message("july").await.unwrap(), "Done.");
    assert_eq!(*calls.lock().unwrap(), vec!["switch_date:2025-07-01"]);

    let messages = orchestrator.messages().await;
    let call_id = messages[1].calls()[0].id.clone();
    assert!(call_id.starts_with("call_"));
    assert_eq!(messages[2].tool_call_id.as_deref(), Some(call_id.as_str()));
}

#[tokio::test]
async fn test_unusable_follow_up_falls_back() {
    let page = planner_page(Arc::default()).await;
    let model = ScriptedModel::new(vec![
        Ok(json!({
            "role": "assistant",
            "tool_calls": [tool_call("c1", "switch_date", json!({ "date": "x" }))]
        })),
        Ok(json!({ "unexpected": true })),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model);

    let reply = orchestrator.send_message("go").await.unwrap();
    assert_eq!(reply, "Tools executed successfully.");
    let last = orchestrator.messages().await.pop().unwrap();
    assert_eq!(last, ChatMessage::assistant("Tools executed successfully."));
}

#[tokio::test]
async fn test_follow_up_tool_calls_are_not_stored() {
    let page = planner_page(Arc::default()).await;
    let model = ScriptedModel::new(vec![
        Ok(json!({
            "role": "assistant",
            "tool_calls": [tool_call("c1", "switch_date", json!({ "date": "x" }))]
        })),
        Ok(json!({
            "role": "assistant",
            "content": "Switching again",
            "tool_calls": [tool_call("c2", "switch_date", json!({ "date": "y" }))]
        })),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model);

    assert_eq!(orchestrator.send_message("go").await.unwrap(), "Switching again");
    let messages = orchestrator.messages().await;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3], ChatMessage::assistant("Switching again"));
}

#[tokio::test]
async fn test_unparsable_arguments_are_reported_to_the_model() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let page = planner_page(Arc::clone(&calls)).await;
    let model = ScriptedModel::new(vec![
        Ok(json!({
            "role": "assistant",
            "tool_calls": [{
                "id": "bad",
                "type": "function",
                "function": { "name": "switch_date", "arguments": "{date: oops" }
            }]
        })),
        Ok(json!({ "role": "assistant", "content": "Sorry." })),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model);

    assert_eq!(orchestrator.send_message("go").await.unwrap(), "Sorry.");
    assert!(calls.lock().unwrap().is_empty());
    let messages = orchestrator.messages().await;
    let payload: Value = serde_json::from_str(messages[2].content.as_deref().unwrap()).unwrap();
    assert!(payload["error"].is_string());
}

#[tokio::test]
async fn test_transport_failures_propagate() {
    let page = planner_page(Arc::default()).await;
    let model = ScriptedModel::new(vec![
        Err(Error::Transport("offline".into())),
        Ok(json!({ "error": "API key not configured" })),
        Ok(json!("just a string")),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model);

    for _ in 0..3 {
        let err = orchestrator.send_message("hello").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "unexpected: {err}");
        assert_eq!(orchestrator.state().await, TurnState::Idle);
    }
}

#[tokio::test]
async fn test_history_window_and_reset() {
    let page = planner_page(Arc::default()).await;
    let replies = (0..4)
        .map(|i| Ok(json!({ "role": "assistant", "content": format!("reply {i}") })))
        .collect();
    let model = ScriptedModel::new(replies);
    let config = ConversationConfig {
        history_limit: 3,
        ..ConversationConfig::default()
    };
    let orchestrator =
        Orchestrator::with_config(Arc::new(McpServer::new(page)), model.clone(), config);

    for i in 0..3 {
        orchestrator.send_message(&format!("message {i}")).await.unwrap();
    }
    assert_eq!(orchestrator.messages().await.len(), 6);
    let last_request = model.requests().pop().unwrap();
    assert_eq!(
        last_request.messages,
        vec![
            ChatMessage::user("message 1"),
            ChatMessage::assistant("reply 1"),
            ChatMessage::user("message 2"),
        ]
    );

    orchestrator.reset().await;
    assert!(orchestrator.messages().await.is_empty());
    assert!(orchestrator.is_initialized());
    orchestrator.send_message("again").await.unwrap();
    assert_eq!(model.requests().pop().unwrap().messages, vec![ChatMessage::user("again")]);
}

#[tokio::test]
async fn test_large_tool_batch_reaches_the_follow_up() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let page = planner_page(Arc::clone(&calls)).await;
    let limit = ConversationConfig::default().history_limit;
    let batch: Vec<Value> = (0..=limit)
        .map(|i| {
            tool_call(
                &format!("call_{i}"),
                "switch_date",
                json!({ "date": format!("2025-06-{:02}", i % 28 + 1) }),
            )
        })
        .collect();
    let model = ScriptedModel::new(vec![
        Ok(json!({ "role": "assistant", "content": null, "tool_calls": batch })),
        Ok(json!({ "role": "assistant", "content": "Walked through the month." })),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model.clone());

    let reply = orchestrator.send_message("show every day").await.unwrap();
    assert_eq!(reply, "Walked through the month.");
    assert_eq!(calls.lock().unwrap().len(), limit + 1);

    let requests = model.requests();
    let follow_up = &requests[1].messages;
    assert_eq!(follow_up[0].role, Role::Assistant);
    assert_eq!(follow_up[0].calls().len(), limit + 1);

    let answered: Vec<&str> = follow_up
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.tool_call_id.as_deref().unwrap())
        .collect();
    let expected: Vec<String> = (0..=limit).map(|i| format!("call_{i}")).collect();
    assert_eq!(answered, expected);
    assert_eq!(follow_up.last().unwrap().role, Role::User);
    assert_eq!(follow_up.len(), limit + 3);
}

#[tokio::test]
async fn test_slow_first_tool_finishes_before_the_next_starts() {
    let page = Arc::new(Page::new(
        "https://planner.test/",
        r#"<tool name="sync_calendar"></tool><tool name="show_today"></tool>"#,
    ));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&calls);
    page.on_tool_call("sync_calendar", move |event| {
        log.lock().unwrap().push("sync_calendar:start".to_string());
        let responder = event.responder();
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            log.lock().unwrap().push("sync_calendar:end".to_string());
            responder.respond(json!({ "error": "server unreachable" }));
        });
    })
    .await
    .unwrap();
    let log = Arc::clone(&calls);
    page.on_tool_call("show_today", move |event| {
        log.lock().unwrap().push("show_today".to_string());
        event.respond(json!({ "shown": "today" }));
    })
    .await
    .unwrap();

    let model = ScriptedModel::new(vec![
        Ok(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                tool_call("call_sync", "sync_calendar", json!({})),
                tool_call("call_show", "show_today", json!({})),
            ]
        })),
        Ok(json!({ "role": "assistant", "content": "Sync failed, showing today." })),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(McpServer::new(page)), model);

    let reply = orchestrator.send_message("sync and show").await.unwrap();
    assert_eq!(reply, "Sync failed, showing today.");
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["sync_calendar:start", "sync_calendar:end", "show_today"]
    );

    let messages = orchestrator.messages().await;
    let results: Vec<(&str, &str)> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| {
            (
                m.tool_call_id.as_deref().unwrap(),
                m.content.as_deref().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        results,
        vec![
            ("call_sync", r#"{"error":"server unreachable"}"#),
            ("call_show", r#"{"shown":"today"}"#),
        ]
    );
}

// ============================================================================
// Log and reply parsing
// ============================================================================

#[test]
fn test_log_rejects_uncorrelated_tool_messages() {
    let mut log = ConversationLog::new();
    log.append(ChatMessage::user("hi")).unwrap();

    let err = log.append(ChatMessage::tool("ghost", "t", "{}")).unwrap_err();
    assert!(matches!(err, Error::ConversationInvariant(_)));

    let call = ToolCallRequest::new("c1", "t", &json!({}));
    log.append(ChatMessage::assistant_with_calls(None, vec![call])).unwrap();
    log.append(ChatMessage::tool("c1", "t", "{}")).unwrap();
    assert_eq!(log.len(), 3);

    let exported = log.export().unwrap();
    assert_eq!(exported[2]["role"], "tool");
    assert_eq!(exported[2]["tool_call_id"], "c1");
    assert!(exported[2]["timestamp"].is_string());
}

#[test]
fn test_window_keeps_tool_results_with_their_call() {
    let mut log = ConversationLog::new();
    let calls = vec![
        ToolCallRequest::new("a", "t", &json!({})),
        ToolCallRequest::new("b", "t", &json!({})),
    ];
    log.append(ChatMessage::user("go")).unwrap();
    log.append(ChatMessage::assistant_with_calls(None, calls.clone()))
        .unwrap();
    log.append(ChatMessage::tool("a", "t", "1")).unwrap();
    log.append(ChatMessage::tool("b", "t", "2")).unwrap();
    log.append(ChatMessage::assistant("done")).unwrap();

    let expected = vec![
        ChatMessage::assistant_with_calls(None, calls),
        ChatMessage::tool("a", "t", "1"),
        ChatMessage::tool("b", "t", "2"),
        ChatMessage::assistant("done"),
    ];
    assert_eq!(log.window(1), vec![ChatMessage::assistant("done")]);
    assert_eq!(log.window(2), expected);
    assert_eq!(log.window(3), expected);
    assert_eq!(log.window(4), expected);
    assert_eq!(log.window(100).len(), 5);
}

#[test]
fn test_parse_reply_shapes() {
    assert_eq!(
        parse_reply(json!({ "role": "assistant", "content": "ok" })).unwrap(),
        ModelReply::Message("ok".into())
    );
    assert_eq!(
        parse_reply(json!({ "type": "message", "content": "legacy" })).unwrap(),
        ModelReply::Message("legacy".into())
    );
    assert!(matches!(
        parse_reply(json!({ "type": "tool_call" })),
        Err(Error::Transport(_))
    ));
    assert!(matches!(
        parse_reply(json!({ "error": { "message": "rate limited" } })),
        Err(Error::Transport(ref m)) if m == "rate limited"
    ));

    let call = ToolCallRequest::new("x", "t", &json!({ "k": 1 }));
    assert_eq!(call.parse_arguments().unwrap(), json!({ "k": 1 }));
    let blank = ToolCallRequest {
        function: dom_mcp::model::FunctionCall {
            name: "t".into(),
            arguments: "  ".into(),
        },
        ..call
    };
    assert_eq!(blank.parse_arguments().unwrap(), json!({}));
}
