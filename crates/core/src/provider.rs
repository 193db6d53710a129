//! ModelBackend trait: the abstraction over chat-completion services.
//!
//! A backend knows how to send a conversation thread to a model and get a
//! response back, either as a complete message or as a stream of deltas.
//! The orchestrator never knows which concrete service it is talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::message::{Message, MessageToolCall};
use crate::response::Citation;
use crate::tool::ToolDescriptor;

/// Whether the model may request tools on this step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
}

/// A single chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Deployment / model name
    pub model: String,

    /// The conversation messages, system prompt first
    pub messages: Vec<Message>,

    pub temperature: f32,

    pub top_p: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Data-source extension descriptor, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<serde_json::Value>,

    /// Assistant identity the request is made on behalf of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// A complete (non-streaming) response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// The generated assistant message, possibly carrying tool calls
    pub message: Message,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Fully accumulated tool calls (only on the final chunk)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

pub type ChunkReceiver = tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, BackendError>>;

/// The core ModelBackend trait.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "azure-openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: BackendRequest) -> std::result::Result<BackendResponse, BackendError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(&self, request: BackendRequest) -> std::result::Result<ChunkReceiver, BackendError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                tool_calls: response.message.tool_calls,
                citations: response.citations,
                intent: response.intent,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, BackendError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ModelBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: BackendRequest) -> std::result::Result<BackendResponse, BackendError> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(BackendResponse {
                message: Message::assistant(last),
                citations: vec![],
                intent: Some("echo".into()),
                usage: None,
                model: request.model,
            })
        }
    }

    fn request(text: &str) -> BackendRequest {
        BackendRequest {
            model: "gpt-4".into(),
            messages: vec![Message::user(text)],
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: None,
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            data_sources: None,
            assistant: None,
            timeout_secs: 90,
        }
    }

    #[tokio::test]
    async fn default_stream_wraps_complete_as_single_chunk() {
        let mut rx = Echo.stream(request("ping")).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("ping"));
        assert_eq!(chunk.intent.as_deref(), Some("echo"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn tool_choice_serializes_lowercase() {
        let value = serde_json::to_value(ToolChoice::None).unwrap();
        assert_eq!(value, "none");
    }
}
