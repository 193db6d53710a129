//! Azure OpenAI chat-completions backend.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling with `tool_choice`
//! - The data-source extensions endpoint, including citations and intent
//!
//! Requests go to `{endpoint}/openai/deployments/{model}/chat/completions`
//! (or `.../extensions/chat/completions` when data sources are attached) and
//! authenticate with the `api-key` header.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

use chatrelay_config::TurnSettings;
use chatrelay_core::message::{Message, MessageToolCall, Role};
use chatrelay_core::provider::*;
use chatrelay_core::{BackendError, Citation, ToolDescriptor};

/// An Azure OpenAI deployment client.
pub struct AzureOpenAiBackend {
    endpoint: String,
    api_key: String,
    api_version: String,
    data_source_api_version: String,
    client: reqwest::Client,
}

impl AzureOpenAiBackend {
    /// Create a backend for an endpoint such as `https://aoai-eastus.openai.azure.com`.
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let api_version = api_version.into();
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            data_source_api_version: api_version.clone(),
            api_version,
            client,
        }
    }

    pub fn with_data_source_version(mut self, version: impl Into<String>) -> Self {
        self.data_source_api_version = version.into();
        self
    }

    /// Build a backend from effective turn settings.
    pub fn from_settings(client: reqwest::Client, settings: &TurnSettings) -> Result<Self, BackendError> {
        let key = settings.key.clone().ok_or_else(|| {
            BackendError::NotConfigured(format!(
                "no API key for {} (set oai-key in the config or AZURE_OAI_API_KEY)",
                settings.endpoint
            ))
        })?;
        Ok(Self::new(client, &settings.endpoint, key, &settings.version)
            .with_data_source_version(&settings.data_source_api_version))
    }

    fn url(&self, request: &BackendRequest) -> String {
        if request.data_sources.is_some() {
            format!(
                "{}/openai/deployments/{}/extensions/chat/completions?api-version={}",
                self.endpoint, request.model, self.data_source_api_version
            )
        } else {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint, request.model, self.api_version
            )
        }
    }

    fn body(request: &BackendRequest, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "top_p": request.top_p,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        match &request.data_sources {
            // The extensions endpoint does its own retrieval; tools are not sent.
            Some(sources) => body["dataSources"] = sources.clone(),
            None if !request.tools.is_empty() => {
                body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
                body["tool_choice"] = serde_json::json!(request.tool_choice);
            }
            None => {}
        }

        body
    }

    /// Convert our Message types to the chat-completions wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
                context: None,
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    async fn send(&self, request: &BackendRequest, stream: bool) -> Result<reqwest::Response, BackendError> {
        let mut builder = self
            .client
            .post(self.url(request))
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(request.timeout_secs.max(1)))
            .json(&Self::body(request, stream));
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(format!("{} after {}s", request.model, request.timeout_secs))
            } else {
                BackendError::Network(e.to_string())
            }
        })?;

        check_status(response).await
    }
}

/// Map non-success statuses onto backend errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status().as_u16();
    match status {
        200 => Ok(response),
        429 => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            Err(BackendError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(BackendError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        )),
        404 => Err(BackendError::ModelNotFound(
            response.text().await.unwrap_or_default(),
        )),
        _ => {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Backend returned error");
            Err(BackendError::ApiError {
                status_code: status,
                message: error_body,
            })
        }
    }
}

/// Pull citations and intent out of a data-source response.
///
/// Older API versions put them in a `tool` message inside `choice.messages`,
/// newer ones in `message.context`; the tool message content is itself JSON.
fn extract_context(context_messages: &[Value], context: Option<&Value>) -> (Vec<Citation>, Option<String>) {
    let mut citations = Vec::new();
    let mut intent = None;

    let mut absorb = |doc: &Value| {
        if let Some(list) = doc.get("citations").and_then(|c| c.as_array()) {
            citations.extend(list.iter().map(Citation::from_value));
        }
        if let Some(i) = doc.get("intent").and_then(|i| i.as_str()) {
            intent = Some(i.to_string());
        }
    };

    for msg in context_messages {
        if msg.get("role").and_then(|r| r.as_str()) != Some("tool") {
            continue;
        }
        if let Some(content) = msg.get("content").and_then(|c| c.as_str())
            && let Ok(doc) = serde_json::from_str::<Value>(content)
        {
            absorb(&doc);
        }
    }
    if let Some(ctx) = context {
        absorb(ctx);
        if let Some(msgs) = ctx.get("messages").and_then(|m| m.as_array()) {
            for msg in msgs {
                if let Some(content) = msg.get("content").and_then(|c| c.as_str())
                    && let Ok(doc) = serde_json::from_str::<Value>(content)
                {
                    absorb(&doc);
                }
            }
        }
    }

    (citations, intent)
}

#[async_trait]
impl ModelBackend for AzureOpenAiBackend {
    fn name(&self) -> &str {
        "azure-openai"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        debug!(
            model = %request.model,
            assistant = ?request.assistant,
            tools = request.tools.len(),
            data_sources = request.data_sources.is_some(),
            "Sending completion request"
        );

        let response = self.send(&request, false).await?;
        let api_response: ApiResponse = response.json().await.map_err(|e| BackendError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        // Data-source responses may carry the answer in `messages` instead of `message`.
        let (content, api_tool_calls, context) = match choice.message {
            Some(m) => (m.content.unwrap_or_default(), m.tool_calls.unwrap_or_default(), m.context),
            None => {
                let text = choice
                    .messages
                    .iter()
                    .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some("assistant"))
                    .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
                    .collect::<Vec<_>>()
                    .join("");
                (text, Vec::new(), None)
            }
        };
        let (citations, intent) = extract_context(&choice.messages, context.as_ref());

        let tool_calls: Vec<MessageToolCall> = api_tool_calls
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(BackendResponse {
            message: Message::assistant_tool_calls(content, tool_calls),
            citations,
            intent,
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn stream(&self, request: BackendRequest) -> Result<ChunkReceiver, BackendError> {
        debug!(model = %request.model, assistant = ?request.assistant, "Sending streaming request");

        let response = self.send(&request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut parser = SseState::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(BackendError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer.drain(..=line_end);

                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(parser.finish())).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(event) => {
                            if let Some(chunk) = parser.absorb(event)
                                && tx.send(Ok(chunk)).await.is_err()
                            {
                                return; // receiver dropped
                            }
                        }
                        Err(e) => {
                            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(parser.finish())).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        let url = format!("{}/openai/models?api-version={}", self.endpoint, self.api_version);
        let response = self
            .client
            .get(&url)
            .header("api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Accumulated state across SSE events of one response.
#[derive(Default)]
struct SseState {
    // Tool call deltas keyed by index; BTreeMap keeps request order.
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    context_messages: Vec<Value>,
    context: Option<Value>,
    usage: Option<Usage>,
}

impl SseState {
    /// Fold one event in; returns a content chunk when the event carried text.
    fn absorb(&mut self, event: StreamResponse) -> Option<StreamChunk> {
        if let Some(usage) = event.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }
        let choice = event.choices.into_iter().next()?;
        let mut content = String::new();

        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content {
                content.push_str(&text);
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let acc = self.tool_calls.entry(tc.index).or_default();
                if let Some(id) = tc.id {
                    acc.id = id;
                }
                if let Some(func) = tc.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }
            if let Some(ctx) = delta.context {
                self.context = Some(ctx);
            }
        }

        // Older data-source streams wrap deltas in `messages[]`.
        for msg in choice.messages {
            let Some(delta) = msg.get("delta") else { continue };
            match delta.get("role").and_then(|r| r.as_str()) {
                Some("tool") => self.context_messages.push(delta.clone()),
                _ => {
                    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                        content.push_str(text);
                    }
                }
            }
        }

        (!content.is_empty()).then(|| StreamChunk {
            content: Some(content),
            ..Default::default()
        })
    }

    fn finish(&mut self) -> StreamChunk {
        let (citations, intent) = extract_context(&self.context_messages, self.context.as_ref());
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls)
                .into_values()
                .map(ToolCallAccumulator::into_tool_call)
                .collect(),
            citations,
            intent,
            done: true,
            usage: self.usage.take(),
        }
    }
}

// --- Chat completions API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing)]
    context: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
    #[serde(default)]
    context: Option<Value>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::ToolChoice;

    fn backend() -> AzureOpenAiBackend {
        AzureOpenAiBackend::new(reqwest::Client::new(), "https://aoai-eastus.openai.azure.com/", "k", "2024-02-15-preview")
            .with_data_source_version("2024-05-01-preview")
    }

    fn request() -> BackendRequest {
        BackendRequest {
            model: "gpt-4".into(),
            messages: vec![Message::system("be brief"), Message::user("hi")],
            temperature: 0.4,
            top_p: 1.0,
            max_tokens: Some(1200),
            tools: vec![ToolDescriptor {
                name: "search-products".into(),
                description: "Find products".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            tool_choice: ToolChoice::None,
            data_sources: None,
            assistant: None,
            timeout_secs: 90,
        }
    }

    #[test]
    fn deployment_url() {
        assert_eq!(
            backend().url(&request()),
            "https://aoai-eastus.openai.azure.com/openai/deployments/gpt-4/chat/completions?api-version=2024-02-15-preview"
        );
    }

    #[test]
    fn extensions_url_when_data_sources_present() {
        let mut req = request();
        req.data_sources = Some(serde_json::json!([{"type": "AzureCognitiveSearch"}]));
        let url = backend().url(&req);
        assert!(url.contains("/extensions/chat/completions"));
        assert!(url.ends_with("api-version=2024-05-01-preview"));
    }

    #[test]
    fn body_carries_tools_and_choice() {
        let body = AzureOpenAiBackend::body(&request(), false);
        assert_eq!(body["tools"][0]["function"]["name"], "search-products");
        assert_eq!(body["tool_choice"], "none");
        assert_eq!(body["max_tokens"], 1200);
        assert!(body.get("dataSources").is_none());
    }

    #[test]
    fn body_with_data_sources_drops_tools() {
        let mut req = request();
        req.data_sources = Some(serde_json::json!([{"type": "AzureCognitiveSearch"}]));
        let body = AzureOpenAiBackend::body(&req, true);
        assert!(body.get("tools").is_none());
        assert_eq!(body["dataSources"][0]["type"], "AzureCognitiveSearch");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn tool_message_conversion() {
        let msg = Message::tool_result("call_1", "result data");
        let api = AzureOpenAiBackend::to_api_messages(&[msg]);
        assert_eq!(api[0].role, "tool");
        assert_eq!(api[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn citations_from_legacy_tool_message() {
        let messages = vec![
            serde_json::json!({
                "role": "tool",
                "content": "{\"citations\":[{\"content\":\"Shampoo A\",\"filepath\":\"a.md\"}],\"intent\":\"[\\\"shampoo\\\"]\"}"
            }),
            serde_json::json!({"role": "assistant", "content": "Try Shampoo A [doc1]"}),
        ];
        let (citations, intent) = extract_context(&messages, None);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].url.as_deref(), Some("a.md"));
        assert_eq!(intent.as_deref(), Some("[\"shampoo\"]"));
    }

    #[test]
    fn citations_from_message_context() {
        let ctx = serde_json::json!({"citations": [{"title": "Doc", "url": "https://x"}], "intent": "lookup"});
        let (citations, intent) = extract_context(&[], Some(&ctx));
        assert_eq!(citations[0].title.as_deref(), Some("Doc"));
        assert_eq!(intent.as_deref(), Some("lookup"));
    }

    #[test]
    fn parse_data_source_response_without_message() {
        let data = r#"{"choices":[{"messages":[{"role":"tool","content":"{}"},{"role":"assistant","content":"answer"}]}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.choices[0].message.is_none());
        assert_eq!(parsed.choices[0].messages.len(), 2);
    }

    #[test]
    fn sse_state_accumulates_tool_calls_in_index_order() {
        let mut state = SseState::default();
        let events = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"get-order","arguments":"{\"item_id\""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"search-products","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":":\"7\"}"}}]}}]}"#,
        ];
        for e in events {
            assert!(state.absorb(serde_json::from_str(e).unwrap()).is_none());
        }
        let done = state.finish();
        assert!(done.done);
        assert_eq!(done.tool_calls.len(), 2);
        assert_eq!(done.tool_calls[0].id, "call_a");
        assert_eq!(done.tool_calls[1].arguments, "{\"item_id\":\"7\"}");
    }

    #[test]
    fn sse_state_emits_content_deltas() {
        let mut state = SseState::default();
        let chunk = state
            .absorb(serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap())
            .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hel"));
        assert!(!chunk.done);
        let legacy = state
            .absorb(
                serde_json::from_str(r#"{"choices":[{"messages":[{"delta":{"role":"assistant","content":"lo"}}]}]}"#)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(legacy.content.as_deref(), Some("lo"));
    }

    #[test]
    fn from_settings_requires_key() {
        let settings = chatrelay_config::NamedConfig::builtin()
            .settings(&chatrelay_config::ProcessDefaults::default());
        let err = AzureOpenAiBackend::from_settings(reqwest::Client::new(), &settings)
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::NotConfigured(_)));
    }
}
