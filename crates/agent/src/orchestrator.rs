//! The assistant orchestrator: runs one turn end to end.
//!
//! ```text
//! Resolving ─► Dispatching ─► (ToolPending)* ─► [Aggregating] ─► Done
//!     │             │                 │                │
//!     └─────────────┴─────────────────┴────────────────┴──► Failed
//! ```
//!
//! Single turns run one participant on the conversation's main thread.
//! Multi-assistant turns run every participant concurrently on its own
//! thread, wait for all of them (each under its own deadline), then hand
//! their answers to the interpreter, whose answer is the only one returned.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use chatrelay_config::{ConfigResolver, NamedConfig, TurnSettings};
use chatrelay_core::{
    ContextStore, ContextToken, ConversationContext, Error, ResponseItem, ToolCallRecord, Turn,
};
use chatrelay_providers::BackendFactory;
use chatrelay_stream::{INTERIM_INTERVAL, StreamPublisher, StreamSink};
use chatrelay_tools::ToolRegistry;

use crate::aggregate::{ParticipantOutcome, interpreter_prompt};
use crate::exchange::{Exchange, ExchangeOutcome, Participant};
use crate::guard::TurnGuards;
use crate::turn::{AssistantSet, TurnPhase, TurnRequest, TurnResponse};

const DOCUMENTING: &str = "Documenting our conversation";

/// Timing knobs for turns.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Budget for a whole turn unless the request names its own
    pub request_timeout: Duration,
    /// Minimum time the interpreter gets, even when participants used up the budget
    pub interpreter_reserve: Duration,
    /// Minimum gap between interim stream events
    pub interim_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(90),
            interpreter_reserve: Duration::from_secs(20),
            interim_interval: INTERIM_INTERVAL,
        }
    }
}

pub struct AssistantOrchestrator {
    resolver: Arc<ConfigResolver>,
    backends: Arc<dyn BackendFactory>,
    registry: Arc<ToolRegistry>,
    contexts: Arc<dyn ContextStore>,
    publisher: Arc<StreamPublisher>,
    guards: TurnGuards,
    settings: OrchestratorSettings,
}

type Answered = (Vec<ResponseItem>, Vec<ToolCallRecord>);

impl AssistantOrchestrator {
    pub fn new(
        resolver: Arc<ConfigResolver>,
        backends: Arc<dyn BackendFactory>,
        registry: Arc<ToolRegistry>,
        contexts: Arc<dyn ContextStore>,
        publisher: Arc<StreamPublisher>,
    ) -> Self {
        Self {
            resolver,
            backends,
            registry,
            contexts,
            publisher,
            guards: TurnGuards::new(),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn publisher(&self) -> &Arc<StreamPublisher> {
        &self.publisher
    }

    pub fn guards(&self) -> &TurnGuards {
        &self.guards
    }

    /// Run one turn. Either every step succeeds and the context is saved,
    /// or a structured error comes back and nothing is persisted.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnResponse, Error> {
        let sink = self.publisher.sink(request.stream_id.as_deref());
        let result = self.execute(request, &sink).await;
        if let Err(e) = &result {
            warn!(phase = %TurnPhase::Failed, kind = e.kind(), error = %e, "Turn failed");
            sink.error(e.to_string());
        }
        result
    }

    async fn execute(&self, request: TurnRequest, sink: &StreamSink) -> Result<TurnResponse, Error> {
        let started_at = Utc::now();
        let timeout = request.timeout.unwrap_or(self.settings.request_timeout);
        let deadline = Instant::now() + timeout;

        info!(
            phase = %TurnPhase::Resolving,
            context = ?request.context.as_ref().map(ContextToken::as_str),
            config = ?request.config,
            "Turn started"
        );
        let _guard = request
            .context
            .as_ref()
            .map(|token| self.guards.acquire(token))
            .transpose()?;
        let mut context = self.load_context(request.context.as_ref()).await?;
        let base = match &request.config {
            Some(name) => self.resolver.resolve(name).await?,
            None => Arc::new(NamedConfig::builtin()),
        };

        let (responses, tool_calls) = match &request.assistants {
            None => self.single(&base, None, &request.prompt, &mut context, sink, timeout).await?,
            Some(AssistantSet::Single(id)) => {
                self.single(&base, Some(id), &request.prompt, &mut context, sink, timeout)
                    .await?
            }
            Some(AssistantSet::Multi {
                participants,
                interpreter,
            }) => {
                self.multi(&base, participants, interpreter, &request.prompt, &mut context, sink, deadline)
                    .await?
            }
        };

        sink.progress(DOCUMENTING, None);
        context.record_turn(Turn {
            prompt: request.prompt.clone(),
            assistants: request.assistants.as_ref().map(AssistantSet::ids).unwrap_or_default(),
            tool_calls,
            responses: responses.clone(),
            started_at,
            completed_at: Utc::now(),
        });
        let token = self.contexts.save(&mut context).await?;

        info!(
            phase = %TurnPhase::Done,
            context = %token,
            responses = responses.len(),
            elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
            "Turn complete"
        );
        Ok(TurnResponse {
            response: responses,
            context: token,
        })
    }

    async fn load_context(&self, token: Option<&ContextToken>) -> Result<ConversationContext, Error> {
        let Some(token) = token else {
            return Ok(ConversationContext::new());
        };
        match self.contexts.load(token).await? {
            Some(context) => Ok(context),
            None => {
                debug!(context = %token, "Unknown context token, starting a new conversation");
                let mut context = ConversationContext::new();
                context.token = Some(token.clone());
                Ok(context)
            }
        }
    }

    /// Resolve an assistant's config and backend. An assistant without a
    /// config of its own runs on the turn's config, with its id as the
    /// deployment.
    async fn participant(&self, base: &Arc<NamedConfig>, assistant_id: Option<&str>) -> Result<Participant, Error> {
        let defaults = self.resolver.defaults();
        let (config, settings) = match assistant_id {
            None => (base.clone(), base.settings(defaults)),
            Some(id) => match self.resolver.resolve_optional(id).await? {
                Some(config) => {
                    let settings = config.settings(defaults);
                    (config, settings)
                }
                None => {
                    let mut settings = base.settings(defaults);
                    settings.model = id.to_string();
                    (base.clone(), settings)
                }
            },
        };
        let backend = self.backends.backend(&settings)?;
        Ok(Participant {
            assistant_id: assistant_id.map(str::to_string),
            config,
            settings,
            backend,
        })
    }

    fn exchange(&self, participant: Participant, sink: &StreamSink) -> Exchange {
        Exchange::new(participant, self.registry.clone(), sink.clone(), self.settings.interim_interval)
    }

    async fn single(
        &self,
        base: &Arc<NamedConfig>,
        assistant_id: Option<&str>,
        prompt: &str,
        context: &mut ConversationContext,
        sink: &StreamSink,
        timeout: Duration,
    ) -> Result<Answered, Error> {
        let participant = self.participant(base, assistant_id).await?;
        remember_connection(context, &participant.settings);

        info!(phase = %TurnPhase::Dispatching, assistant = ?assistant_id, "Dispatching to backend");
        let exchange = self.exchange(participant, sink);
        let outcome = tokio::time::timeout(timeout, exchange.run(context.thread(None), prompt))
            .await
            .map_err(|_| Error::Timeout {
                after_secs: timeout.as_secs(),
            })??;

        context.set_thread(None, outcome.history);
        Ok((vec![outcome.item], outcome.tool_calls))
    }

    #[allow(clippy::too_many_arguments)]
    async fn multi(
        &self,
        base: &Arc<NamedConfig>,
        participants: &[String],
        interpreter: &str,
        prompt: &str,
        context: &mut ConversationContext,
        sink: &StreamSink,
        deadline: Instant,
    ) -> Result<Answered, Error> {
        info!(
            phase = %TurnPhase::Dispatching,
            participants = participants.len(),
            interpreter,
            "Dispatching to assistants"
        );
        sink.progress(format!("Consulting {} assistants", participants.len()), None);

        let mut tasks: JoinSet<(usize, Result<Result<ExchangeOutcome, Error>, tokio::time::error::Elapsed>)> =
            JoinSet::new();
        for (index, id) in participants.iter().enumerate() {
            let exchange = self.exchange(self.participant(base, Some(id)).await?, sink);
            let history = context.thread(Some(id));
            let budget = deadline.saturating_duration_since(Instant::now());
            let prompt = prompt.to_string();
            tasks.spawn(async move {
                let result = tokio::time::timeout(budget, exchange.run(history, &prompt)).await;
                (index, result)
            });
        }

        info!(phase = %TurnPhase::Aggregating, "Waiting for assistants");
        let mut outcomes: Vec<(String, ParticipantOutcome)> = participants
            .iter()
            .map(|id| (id.clone(), ParticipantOutcome::NoAnswer))
            .collect();
        let mut tool_calls = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Assistant task aborted");
                    continue;
                }
            };
            let id = &participants[index];
            outcomes[index].1 = match result {
                Ok(Ok(outcome)) => {
                    let answered = outcome.item.has_answer();
                    context.set_thread(Some(id), outcome.history);
                    tool_calls.extend(outcome.tool_calls);
                    match outcome.item.message {
                        Some(text) if answered => ParticipantOutcome::Answered(text),
                        _ => ParticipantOutcome::NoAnswer,
                    }
                }
                Ok(Err(e)) => {
                    warn!(assistant = %id, kind = e.kind(), error = %e, "Assistant failed");
                    ParticipantOutcome::Failed(e)
                }
                Err(_) => {
                    warn!(assistant = %id, "Assistant did not answer in time");
                    ParticipantOutcome::NoAnswer
                }
            };
        }

        let answered = outcomes.iter().filter(|(_, o)| o.answer().is_some()).count();
        debug!(answered, total = outcomes.len(), "Assistants finished");
        // Non-answers still reach the interpreter; only a set where every
        // participant failed ends the turn.
        if outcomes.iter().all(|(_, o)| matches!(o, ParticipantOutcome::Failed(_))) {
            let first_failure = outcomes.into_iter().find_map(|(_, o)| match o {
                ParticipantOutcome::Failed(e) => Some(e),
                _ => None,
            });
            return Err(first_failure.unwrap_or(Error::Internal("assistant set has no participants".into())));
        }

        let synthetic = interpreter_prompt(prompt, &outcomes);
        let participant = self.participant(base, Some(interpreter)).await?;
        remember_connection(context, &participant.settings);
        let budget = deadline
            .saturating_duration_since(Instant::now())
            .max(self.settings.interpreter_reserve);
        let exchange = self.exchange(participant, sink);
        let outcome = tokio::time::timeout(budget, exchange.run(context.thread(None), &synthetic))
            .await
            .map_err(|_| Error::Timeout {
                after_secs: budget.as_secs(),
            })??;

        context.set_thread(None, outcome.history);
        tool_calls.extend(outcome.tool_calls);
        Ok((vec![outcome.item], tool_calls))
    }
}

/// The first turn fixes the model and region recorded on the conversation.
fn remember_connection(context: &mut ConversationContext, settings: &TurnSettings) {
    context.model.get_or_insert_with(|| settings.model.clone());
    context.region.get_or_insert_with(|| settings.region.clone());
}
