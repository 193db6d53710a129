//! End-to-end integration tests for chatrelay.
//!
//! These tests drive the gateway router with file- and store-tier configs,
//! a store-backed tool, a local progress stream and a scripted model backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use chatrelay_agent::AssistantOrchestrator;
use chatrelay_config::{ConfigResolver, ProcessDefaults, env_from_pairs};
use chatrelay_core::{
    BackendError, BackendRequest, BackendResponse, ConfigStore, Message, MessageToolCall, ModelBackend, Role,
};
use chatrelay_gateway::{GatewayState, build_router};
use chatrelay_providers::FixedBackend;
use chatrelay_store::{
    DocumentConfigStore, DocumentContextStore, DocumentStore, DocumentStoreCapability, InMemoryDocumentStore,
};
use chatrelay_stream::{LocalTransport, StreamPublisher};
use chatrelay_tools::{AzureSearchClient, ToolRegistry};

// ── Scripted backend ─────────────────────────────────────────────────────

/// Replies from a per-assistant script and records every request.
#[derive(Default)]
struct ScriptedBackend {
    scripts: Mutex<HashMap<Option<String>, VecDeque<Message>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    fn script(&self, assistant: Option<&str>, replies: Vec<Message>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(assistant.map(str::to_string), replies.into());
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.assistant)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| BackendError::Network("script exhausted".into()))?;
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        Ok(BackendResponse {
            message: reply,
            citations: vec![],
            intent: None,
            usage: None,
            model,
        })
    }
}

fn tool_call(id: &str, name: &str, args: Value) -> Message {
    Message::assistant_tool_calls(
        "",
        vec![MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.to_string(),
        }],
    )
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    app: axum::Router,
    backend: Arc<ScriptedBackend>,
    docs: Arc<dyn DocumentStore>,
    local: Arc<LocalTransport>,
    _configs: tempfile::TempDir,
}

async fn harness() -> Harness {
    let configs = tempfile::tempdir().unwrap();
    std::fs::write(
        configs.path().join("orders-assistant.json"),
        json!({
            "temperature": 0.2,
            "system-prompt": "You answer questions about orders.",
            "functions": [
                {"name": "get-order", "function": "get_item", "source": "orders",
                 "description": "Look up an order by number", "args": {"partition_key": "web"}}
            ]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        configs.path().join("orders.conf"),
        json!({"database": "shop", "container": "orders"}).to_string(),
    )
    .unwrap();

    let docs: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    docs.upsert(
        "shop/orders",
        json!({"id": "1001", "partitionKey": "web", "status": "shipped", "carrier": "AusPost"}),
    )
    .await
    .unwrap();
    docs.upsert("configs", json!({"id": "v1", "partitionKey": "store-only", "temperature": 0.9}))
        .await
        .unwrap();

    let config_store: Arc<dyn ConfigStore> = Arc::new(DocumentConfigStore::new(docs.clone()));
    let resolver = Arc::new(ConfigResolver::standard(
        Arc::new(ProcessDefaults::default()),
        env_from_pairs(&[]),
        vec![configs.path().to_path_buf()],
        Some((config_store, "configs".into())),
    ));
    let registry = Arc::new(ToolRegistry::new(
        resolver.clone(),
        Arc::new(AzureSearchClient::new(reqwest::Client::new())),
        Arc::new(DocumentStoreCapability::new(docs.clone())),
    ));
    let backend = Arc::new(ScriptedBackend::default());
    let local = Arc::new(LocalTransport::new("http://localhost:7071/api/streams"));
    let orchestrator = AssistantOrchestrator::new(
        resolver,
        Arc::new(FixedBackend(backend.clone())),
        registry,
        Arc::new(DocumentContextStore::new(docs.clone())),
        Arc::new(StreamPublisher::new(local.clone())),
    );

    Harness {
        app: build_router(Arc::new(GatewayState::new(Arc::new(orchestrator), Some(local.clone())))),
        backend,
        docs,
        local,
        _configs: configs,
    }
}

async fn call(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ── E2E: tool call through a file-tier config ────────────────────────────

#[tokio::test]
async fn e2e_store_tool_answers_from_seeded_order() {
    let h = harness().await;
    h.backend.script(
        None,
        vec![
            tool_call("call_1", "get-order", json!({"item_id": "1001"})),
            Message::assistant("Order 1001 has shipped with AusPost."),
        ],
    );

    let (status, body) = call(
        &h.app,
        "/api/completion",
        json!({"prompt": "where is order 1001?", "config": "orders-assistant"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"][0]["message"], "Order 1001 has shipped with AusPost.");
    assert_eq!(h.backend.calls(), 2);

    let requests = h.backend.requests.lock().unwrap().clone();
    assert!((requests[0].temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(requests[0].messages[0].content, "You answer questions about orders.");

    // The fixed partition key and bound source are hidden from the model
    let params = &requests[0].tools[0].parameters["properties"];
    assert!(params.get("item_id").is_some());
    assert!(params.get("partition_key").is_none());
    assert!(params.get("source").is_none());

    let tool_result = requests[1].messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_result.content.contains("shipped"));

    // The context document landed in the history collection
    let token = body["context"].as_str().unwrap();
    assert!(h.docs.get("history", "history", token).await.unwrap().is_some());
}

// ── E2E: progress stream mirrors the synchronous answer ──────────────────

#[tokio::test]
async fn e2e_stream_interim_text_matches_response() {
    let h = harness().await;
    h.backend
        .script(None, vec![Message::assistant("Everything on your order is in stock.")]);

    let (status, stream) = call(&h.app, "/api/create-stream", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let stream_id = stream["stream-id"].as_str().unwrap().to_string();
    let mut rx = h.local.subscribe(&stream_id).unwrap();

    let (status, body) = call(
        &h.app,
        "/api/completion",
        json!({"prompt": "is it in stock?", "stream-id": stream_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let answer = body["response"][0]["message"].as_str().unwrap().to_string();

    let mut interim = String::new();
    let mut progress = 0;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event["type"].as_str() {
            Some("interim") => interim.push_str(event["delta"].as_str().unwrap()),
            Some("progress") => {
                progress += 1;
                if event["message"] == "Documenting our conversation" {
                    break;
                }
            }
            _ => {}
        }
    }
    assert!(progress >= 2);
    assert_eq!(interim, answer);
}

// ── E2E: multi-assistant fan-out over HTTP ───────────────────────────────

#[tokio::test]
async fn e2e_multi_assistant_then_follow_up() {
    let h = harness().await;
    h.backend.script(Some("billing"), vec![Message::assistant("The invoice was paid.")]);
    h.backend.script(Some("shipping"), vec![Message::assistant("The parcel left on Monday.")]);
    h.backend.script(
        Some("lead"),
        vec![
            Message::assistant("Your order is paid for and left on Monday."),
            Message::assistant("You're welcome."),
        ],
    );

    let (status, body) = call(
        &h.app,
        "/api/assistant",
        json!({"prompt": "status of my order?", "assistants": ["billing", "shipping", "lead"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items = body["response"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["assistant-id"], "lead");
    assert_eq!(items[0]["message"], "Your order is paid for and left on Monday.");

    let interpreter_prompt = {
        let requests = h.backend.requests.lock().unwrap();
        let lead = requests
            .iter()
            .find(|r| r.assistant.as_deref() == Some("lead"))
            .unwrap();
        lead.messages.last().unwrap().content.clone()
    };
    assert!(interpreter_prompt.contains("The invoice was paid."));
    assert!(interpreter_prompt.contains("The parcel left on Monday."));

    // Follow up with the single interpreter on the same context
    let token = body["context"].as_str().unwrap().to_string();
    let (status, body) = call(
        &h.app,
        "/api/assistant",
        json!({"prompt": "thanks", "assistant": "lead", "context": token}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"], token.as_str());
    assert_eq!(body["response"][0]["message"], "You're welcome.");
}

// ── E2E: store tier and structured errors ────────────────────────────────

#[tokio::test]
async fn e2e_store_tier_config_is_used() {
    let h = harness().await;
    h.backend.script(None, vec![Message::assistant("Hi!")]);

    let (status, _) = call(&h.app, "/api/completion", json!({"prompt": "hi", "config": "store-only"})).await;
    assert_eq!(status, StatusCode::OK);
    let requests = h.backend.requests.lock().unwrap();
    assert!((requests[0].temperature - 0.9).abs() < f32::EPSILON);
}

#[tokio::test]
async fn e2e_failures_are_structured() {
    let h = harness().await;

    let (status, body) = call(&h.app, "/api/completion", json!({"prompt": "hi", "config": "missing"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "config-not-found");

    // Script exhausted: the backend is unreachable
    let (status, body) = call(&h.app, "/api/completion", json!({"prompt": "hi"})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "backend-unavailable");
    assert!(body.get("response").is_none());
}
