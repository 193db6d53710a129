//! Conversation context: the persisted state linking turns together.
//!
//! The orchestrator owns a context exclusively for the duration of a turn.
//! Between turns it lives in a [`ContextStore`], keyed by an opaque token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::Message;
use crate::response::ResponseItem;

/// Opaque identifier for a persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextToken(pub String);

impl ContextToken {
    /// Mint a fresh token.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContextToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ContextToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ContextToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns kept on a context so the stored document stays bounded.
pub const MAX_RECORDED_TURNS: usize = 50;

/// A tool call issued during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub success: bool,
}

/// One prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assistants: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub responses: Vec<ResponseItem>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Private thread of one assistant in multi-assistant mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantThread {
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Absent until the first save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ContextToken>,

    /// Main thread used by single-assistant turns
    #[serde(default)]
    pub history: Vec<Message>,

    /// Per-assistant threads, keyed by assistant id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participants: BTreeMap<String, ParticipantThread>,

    #[serde(default)]
    pub turns: Vec<Turn>,

    /// Model and region the conversation was started against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            token: None,
            history: Vec::new(),
            participants: BTreeMap::new(),
            turns: Vec::new(),
            model: None,
            region: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The thread for an assistant, or the main thread when `None`.
    pub fn thread(&self, assistant_id: Option<&str>) -> Vec<Message> {
        match assistant_id {
            None => self.history.clone(),
            Some(id) => self
                .participants
                .get(id)
                .map(|p| p.history.clone())
                .unwrap_or_default(),
        }
    }

    pub fn set_thread(&mut self, assistant_id: Option<&str>, history: Vec<Message>) {
        match assistant_id {
            None => self.history = history,
            Some(id) => {
                self.participants.entry(id.to_string()).or_default().history = history;
            }
        }
        self.updated_at = Utc::now();
    }

    /// Append a turn, dropping the oldest once [`MAX_RECORDED_TURNS`] is
    /// exceeded. The threads carry the conversation itself; `turns` is the
    /// audit trail and only keeps the most recent ones.
    pub fn record_turn(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
        if self.turns.len() > MAX_RECORDED_TURNS {
            let excess = self.turns.len() - MAX_RECORDED_TURNS;
            self.turns.drain(..excess);
        }
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence for conversation contexts.
///
/// `load` returning `Ok(None)` means "start a new conversation", not a failure.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn load(&self, token: &ContextToken) -> Result<Option<ConversationContext>, StoreError>;

    /// Persist the context, minting a token on first save.
    async fn save(&self, context: &mut ConversationContext) -> Result<ContextToken, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_hex() {
        let a = ContextToken::new();
        let b = ContextToken::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn threads_are_independent() {
        let mut ctx = ConversationContext::new();
        ctx.set_thread(None, vec![Message::user("main")]);
        ctx.set_thread(Some("sales"), vec![Message::user("a"), Message::assistant("b")]);
        assert_eq!(ctx.thread(None).len(), 1);
        assert_eq!(ctx.thread(Some("sales")).len(), 2);
        assert!(ctx.thread(Some("support")).is_empty());
    }

    #[test]
    fn recorded_turns_are_capped() {
        let mut ctx = ConversationContext::new();
        for i in 0..MAX_RECORDED_TURNS + 3 {
            ctx.record_turn(Turn {
                prompt: format!("q{i}"),
                assistants: vec![],
                tool_calls: vec![],
                responses: vec![],
                started_at: Utc::now(),
                completed_at: Utc::now(),
            });
        }
        assert_eq!(ctx.turns.len(), MAX_RECORDED_TURNS);
        assert_eq!(ctx.turns[0].prompt, "q3");
        assert_eq!(ctx.turns.last().unwrap().prompt, format!("q{}", MAX_RECORDED_TURNS + 2));
    }

    #[test]
    fn new_context_serializes_without_token() {
        let value = serde_json::to_value(ConversationContext::new()).unwrap();
        assert!(value.get("token").is_none());
        assert!(value.get("participants").is_none());
    }
}
