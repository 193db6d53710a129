//! `chatrelay ask`: Run one turn without the gateway.

use chatrelay_agent::{AssistantSet, TurnRequest};
use chatrelay_config::{AppConfig, process_env};
use chatrelay_core::ContextToken;
use chatrelay_gateway::GatewayState;

/// No assistants is a plain completion; one is a single-assistant turn;
/// several make the last one the interpreter.
pub fn build_turn(
    prompt: String,
    config: Option<String>,
    context: Option<String>,
    assistants: Vec<String>,
) -> Result<TurnRequest, chatrelay_core::Error> {
    let mut turn = TurnRequest::new(prompt);
    if let Some(name) = config {
        turn = turn.with_config(name);
    }
    if let Some(token) = context {
        turn = turn.with_context(ContextToken(token));
    }
    match assistants.len() {
        0 => {}
        1 => turn = turn.with_assistants(AssistantSet::single(assistants[0].clone())?),
        _ => turn = turn.with_assistants(AssistantSet::from_list(assistants)?),
    }
    Ok(turn)
}

pub async fn run(
    prompt: String,
    config: Option<String>,
    context: Option<String>,
    assistants: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let state = GatewayState::from_config(&app, process_env())?;

    let turn = build_turn(prompt, config, context, assistants)?;
    match state.orchestrator.run_turn(turn).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("  [{}] {e}", e.kind());
            Err(e.into())
        }
    }
}
