//! One participant's exchange with its model backend.
//!
//! The prompt is appended to the participant's thread, the thread is
//! summarised when it has grown past `max_history`, then the backend is
//! called repeatedly while it asks for tools, up to `max_steps`. Answer text
//! is streamed to the turn's sink as interim events while it arrives.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use chatrelay_config::{NamedConfig, TurnSettings};
use chatrelay_core::{
    BackendRequest, Citation, Error, Message, MessageToolCall, ModelBackend, ResponseItem, Role,
    ToolCall, ToolCallRecord, ToolChoice, ToolError,
};
use chatrelay_stream::{InterimBuffer, StreamSink};
use chatrelay_tools::{ToolRegistry, failure_message};

use crate::turn::TurnPhase;

pub(crate) const RECALLING: &str = "Recalling our conversation so far";
pub(crate) const THINKING: &str = "Thinking about what you said";
pub(crate) const ANALYSING: &str = "Analysing the data I've collected so far";
pub(crate) const SUMMARISING: &str = "I'm just summarising the conversation so far";

const SUMMARY_REQUEST: &str = "Summarize the key points from this whole conversation, keeping track of \
important information that may be needed to continue the conversation at a later point. Be as concise \
as possible, but don't skimp on the details either.";
const SUMMARY_PREFIX: &str = "Here is a summary of the conversation up to this point: ";

/// Everything needed to run one participant, resolved up front.
pub(crate) struct Participant {
    /// `None` for a plain completion
    pub assistant_id: Option<String>,
    pub config: Arc<NamedConfig>,
    pub settings: TurnSettings,
    pub backend: Arc<dyn ModelBackend>,
}

/// What a finished exchange hands back to the orchestrator.
pub(crate) struct ExchangeOutcome {
    pub history: Vec<Message>,
    pub item: ResponseItem,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Owned so it can move into a participant task.
pub(crate) struct Exchange {
    participant: Participant,
    registry: Arc<ToolRegistry>,
    sink: StreamSink,
    interim_interval: Duration,
}

impl Exchange {
    pub fn new(participant: Participant, registry: Arc<ToolRegistry>, sink: StreamSink, interim_interval: Duration) -> Self {
        Self {
            participant,
            registry,
            sink,
            interim_interval,
        }
    }

    fn assistant_id(&self) -> Option<&str> {
        self.participant.assistant_id.as_deref()
    }

    fn request(&self, messages: Vec<Message>, tool_choice: ToolChoice) -> BackendRequest {
        let p = &self.participant;
        let data_sources = p.config.data_sources.clone();
        BackendRequest {
            model: p.settings.model.clone(),
            messages,
            temperature: p.settings.temperature,
            top_p: p.settings.top_p,
            max_tokens: Some(p.settings.max_tokens),
            tools: if data_sources.is_some() {
                Vec::new()
            } else {
                self.registry.describe(&p.config)
            },
            tool_choice,
            data_sources,
            assistant: p.assistant_id.clone(),
            timeout_secs: p.settings.timeout_secs,
        }
    }

    pub async fn run(self, mut history: Vec<Message>, prompt: &str) -> Result<ExchangeOutcome, Error> {
        let assistant = self.assistant_id();
        self.sink.progress(RECALLING, assistant);

        let system_prompt = &self.participant.settings.system_prompt;
        match history.first_mut() {
            Some(first) if first.role == Role::System => first.content = system_prompt.clone(),
            _ => history.insert(0, Message::system(system_prompt.clone())),
        }
        history.push(Message::user(prompt));

        if history.len() >= self.participant.settings.max_history {
            history = self.summarise(history).await;
        }

        let max_steps = self.participant.settings.max_steps;
        let mut answer = String::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut intent: Option<String> = None;
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut final_id: Option<String> = None;

        for step in 1..=max_steps {
            self.sink.progress(if step == 1 { THINKING } else { ANALYSING }, assistant);
            let tool_choice = if step == max_steps { ToolChoice::None } else { ToolChoice::Auto };
            debug!(assistant = ?assistant, step, max_steps, "Exchange step");

            let reply = self.step(history.clone(), tool_choice).await?;
            answer.push_str(&reply.text);
            citations.extend(reply.citations);
            if reply.intent.is_some() {
                intent = reply.intent;
            }

            if reply.tool_calls.is_empty() || tool_choice == ToolChoice::None {
                let message = Message::assistant(reply.text);
                final_id = Some(message.id.clone());
                history.push(message);
                break;
            }

            info!(
                assistant = ?assistant,
                phase = %TurnPhase::ToolPending,
                tools = reply.tool_calls.len(),
                "Backend requested tools"
            );
            history.push(Message::assistant_tool_calls(reply.text, reply.tool_calls.clone()));
            for outcome in self.run_tools(&reply.tool_calls).await? {
                records.push(ToolCallRecord {
                    assistant_id: self.participant.assistant_id.clone(),
                    call_id: outcome.call.id.clone(),
                    tool_name: outcome.call.name.clone(),
                    arguments: outcome.call.arguments.clone(),
                    success: outcome.success,
                });
                history.push(Message::tool_result(outcome.call.id, outcome.output));
            }
        }

        let item = ResponseItem {
            id: final_id,
            assistant_id: self.participant.assistant_id.clone(),
            message: Some(answer),
            citations: (!citations.is_empty()).then_some(citations),
            intent,
            metadata: Default::default(),
        };
        Ok(ExchangeOutcome {
            history,
            item,
            tool_calls: records,
        })
    }

    /// One streamed backend call. Deltas go to the sink as they arrive and
    /// whatever is still buffered is flushed before returning.
    async fn step(&self, messages: Vec<Message>, tool_choice: ToolChoice) -> Result<StepReply, Error> {
        let mut rx = self
            .participant
            .backend
            .stream(self.request(messages, tool_choice))
            .await?;
        let mut interim = InterimBuffer::new(self.sink.clone(), self.assistant_id(), self.interim_interval);
        let mut reply = StepReply::default();

        while let Some(chunk) = rx.recv().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    interim.flush();
                    return Err(e.into());
                }
            };
            if let Some(delta) = chunk.content.as_deref() {
                reply.text.push_str(delta);
                interim.push(delta);
            }
            if !chunk.tool_calls.is_empty() {
                reply.tool_calls = chunk.tool_calls;
            }
            reply.citations.extend(chunk.citations);
            if chunk.intent.is_some() {
                reply.intent = chunk.intent;
            }
            if chunk.done {
                break;
            }
        }
        interim.flush();
        Ok(reply)
    }

    /// Run the requested tools concurrently; results come back in request
    /// order. Unavailable tools become error text for the model, any other
    /// tool error fails the exchange.
    async fn run_tools(&self, calls: &[MessageToolCall]) -> Result<Vec<ToolOutcome>, Error> {
        let parsed: Vec<ToolCall> = calls
            .iter()
            .map(|c| {
                let arguments = if c.arguments.trim().is_empty() {
                    Ok(serde_json::Value::Object(Default::default()))
                } else {
                    serde_json::from_str(&c.arguments)
                        .map_err(|e| ToolError::invalid(&c.name, format!("arguments are not JSON: {e}")))
                };
                arguments.map(|arguments| ToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments,
                })
            })
            .collect::<Result<_, _>>()?;

        let config = &self.participant.config;
        let results = join_all(parsed.iter().map(|call| self.registry.invoke(config, call))).await;

        let mut out = Vec::with_capacity(parsed.len());
        for (call, result) in parsed.into_iter().zip(results) {
            let (success, output) = match result {
                Ok(result) => (true, result.output),
                Err(e @ ToolError::Unavailable { .. }) => {
                    warn!(tool = %call.name, error = %e, "Tool unavailable, reporting to model");
                    (false, failure_message(&e))
                }
                Err(e) => return Err(e.into()),
            };
            out.push(ToolOutcome { call, success, output });
        }
        Ok(out)
    }

    /// Rebuild the thread as system prompt + summary + the two most recent
    /// messages. A failed summary leaves the thread as it was.
    async fn summarise(&self, history: Vec<Message>) -> Vec<Message> {
        if history.len() < 3 {
            return history;
        }
        self.sink.progress(SUMMARISING, self.assistant_id());

        let mut messages = history.clone();
        messages.push(Message::user(SUMMARY_REQUEST));
        let mut request = self.request(messages, ToolChoice::None);
        request.data_sources = None;

        match self.participant.backend.complete(request).await {
            Ok(response) => {
                let recent = history[history.len() - 2..].to_vec();
                let mut rebuilt = Vec::with_capacity(4);
                rebuilt.push(Message::system(self.participant.settings.system_prompt.clone()));
                rebuilt.push(Message::assistant(format!("{SUMMARY_PREFIX}{}", response.message.content)));
                rebuilt.extend(recent);
                info!(
                    assistant = ?self.assistant_id(),
                    before = history.len(),
                    after = rebuilt.len(),
                    "Conversation summarised"
                );
                rebuilt
            }
            Err(e) => {
                warn!(assistant = ?self.assistant_id(), error = %e, "Summary failed, keeping full history");
                history
            }
        }
    }
}

struct ToolOutcome {
    call: ToolCall,
    success: bool,
    output: String,
}

#[derive(Default)]
struct StepReply {
    text: String,
    tool_calls: Vec<MessageToolCall>,
    citations: Vec<Citation>,
    intent: Option<String>,
}
