//! # chatrelay Agent
//!
//! Turn orchestration. The [`AssistantOrchestrator`] resolves a turn's
//! config and conversation, runs one participant or fans out to several
//! assistants, executes the tools they ask for, and persists the result.

pub mod aggregate;
mod exchange;
pub mod guard;
pub mod orchestrator;
pub mod turn;

#[cfg(test)]
mod test_support;

pub use aggregate::{ParticipantOutcome, interpreter_prompt};
pub use guard::{TurnGuard, TurnGuards};
pub use orchestrator::{AssistantOrchestrator, OrchestratorSettings};
pub use turn::{AssistantSet, TurnPhase, TurnRequest, TurnResponse};
