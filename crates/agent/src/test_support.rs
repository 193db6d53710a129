//! Scripted collaborators for orchestrator tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatrelay_core::{
    BackendError, BackendRequest, BackendResponse, ChunkReceiver, Message, MessageToolCall,
    ModelBackend, SearchCapability, SearchConfig, SearchQuery, SearchResults, StreamChunk, ToolError,
};

/// One scripted backend reply.
#[derive(Clone)]
pub enum Step {
    Say(&'static str),
    Call(&'static str, Vec<MessageToolCall>),
    Hang,
    Fail(BackendError),
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

/// Plays back a script per assistant id and records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<Option<String>, VecDeque<Step>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, assistant: Option<&str>, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(assistant.map(str::to_string), steps.into());
    }

    pub fn requests_for(&self, assistant: Option<&str>) -> Vec<BackendRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.assistant.as_deref() == assistant)
            .cloned()
            .collect()
    }

    fn next(&self, request: &BackendRequest) -> Step {
        self.requests.lock().unwrap().push(request.clone());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&request.assistant)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Step::Fail(BackendError::Network("script exhausted".into())))
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let (text, calls) = match self.next(&request) {
            Step::Say(text) => (text, vec![]),
            Step::Call(text, calls) => (text, calls),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(BackendError::Timeout("hung".into()));
            }
            Step::Fail(e) => return Err(e),
        };
        Ok(BackendResponse {
            message: Message::assistant_tool_calls(text, calls),
            citations: vec![],
            intent: None,
            usage: None,
            model: request.model,
        })
    }

    /// Streams the text a word at a time, tool calls on the final chunk.
    async fn stream(&self, request: BackendRequest) -> Result<ChunkReceiver, BackendError> {
        let (text, calls) = match self.next(&request) {
            Step::Say(text) => (text, vec![]),
            Step::Call(text, calls) => (text, calls),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(BackendError::Timeout("hung".into()));
            }
            Step::Fail(e) => return Err(e),
        };
        let pieces: Vec<&str> = text.split_inclusive(' ').collect();
        let (tx, rx) = tokio::sync::mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(piece.to_string()),
                    ..Default::default()
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                tool_calls: calls,
                done: true,
                ..Default::default()
            }))
            .await;
        Ok(rx)
    }
}

/// Search capability that records queries and answers from a fixed catalogue.
#[derive(Default)]
pub struct CatalogueSearch {
    pub queries: Mutex<Vec<(String, String)>>,
    pub offline: bool,
}

#[async_trait]
impl SearchCapability for CatalogueSearch {
    async fn search(&self, source: &SearchConfig, query: SearchQuery) -> Result<SearchResults, ToolError> {
        if self.offline {
            return Err(ToolError::unavailable(format!("search:{}", source.index), "connection refused"));
        }
        self.queries
            .lock()
            .unwrap()
            .push((source.index.clone(), query.query.clone()));
        Ok(SearchResults {
            count: Some(1),
            results: vec![json!({"name": "Shampoo A", "in_stock": true})],
            facets: None,
        })
    }

    async fn get_by_id(&self, _source: &SearchConfig, _id: &str) -> Result<Option<Value>, ToolError> {
        Ok(None)
    }
}
