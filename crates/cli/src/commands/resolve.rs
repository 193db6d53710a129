//! `chatrelay resolve`: Show how a named configuration resolves.

use serde_json::Value;

use chatrelay_config::{AppConfig, process_env};
use chatrelay_gateway::GatewayState;

pub async fn run(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let state = GatewayState::from_config(&app, process_env())?;
    let resolver = state.orchestrator.resolver();

    let (_, tier) = resolver.document(name).await?;
    let config = resolver.resolve(name).await?;

    let mut value = serde_json::to_value(config.as_ref())?;
    redact_secrets(&mut value);
    println!("# {name} (from {tier} tier)");
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Blank out anything that looks like a credential.
pub fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                if key_lower.contains("key") || key_lower.contains("secret") || key_lower.contains("token") {
                    if val.as_str().is_some_and(|s| !s.is_empty()) {
                        *val = Value::String("***REDACTED***".into());
                    }
                } else {
                    redact_secrets(val);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}
