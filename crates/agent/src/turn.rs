//! Request and response shapes of one conversational turn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use chatrelay_core::{ContextToken, Error, ResponseItem};

/// The assistants taking part in a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantSet {
    Single(String),
    /// Participants answer independently; the interpreter collapses their
    /// answers into the one response returned.
    Multi {
        participants: Vec<String>,
        interpreter: String,
    },
}

impl AssistantSet {
    pub fn single(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::MalformedAssistantSet("assistant id is empty".into()));
        }
        Ok(Self::Single(id))
    }

    /// An ordered list where the last entry is the interpreter.
    pub fn from_list(ids: Vec<String>) -> Result<Self, Error> {
        if ids.iter().any(|id| id.trim().is_empty()) {
            return Err(Error::MalformedAssistantSet("assistant ids must not be empty".into()));
        }
        if ids.len() < 2 {
            return Err(Error::MalformedAssistantSet(format!(
                "a multi-assistant turn needs at least one participant and an interpreter, got {} assistant(s)",
                ids.len()
            )));
        }
        let mut participants = ids;
        let interpreter = participants.pop().unwrap_or_default();
        Ok(Self::Multi {
            participants,
            interpreter,
        })
    }

    pub fn ids(&self) -> Vec<String> {
        match self {
            Self::Single(id) => vec![id.clone()],
            Self::Multi {
                participants,
                interpreter,
            } => participants.iter().chain(std::iter::once(interpreter)).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub prompt: String,
    /// Named config; `None` uses the built-in defaults
    pub config: Option<String>,
    /// Existing conversation; `None` starts a new one
    pub context: Option<ContextToken>,
    pub stream_id: Option<String>,
    /// `None` is a plain completion on the main thread
    pub assistants: Option<AssistantSet>,
    /// Overrides the orchestrator's request timeout
    pub timeout: Option<Duration>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            config: None,
            context: None,
            stream_id: None,
            assistants: None,
            timeout: None,
        }
    }

    pub fn with_config(mut self, name: impl Into<String>) -> Self {
        self.config = Some(name.into());
        self
    }

    pub fn with_context(mut self, token: ContextToken) -> Self {
        self.context = Some(token);
        self
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn with_assistants(mut self, set: AssistantSet) -> Self {
        self.assistants = Some(set);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub response: Vec<ResponseItem>,
    pub context: ContextToken,
}

/// Lifecycle of a turn, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Resolving,
    Dispatching,
    ToolPending,
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolving => "resolving",
            Self::Dispatching => "dispatching",
            Self::ToolPending => "tool-pending",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}
