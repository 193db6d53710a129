//! `chatrelay serve`: Start the HTTP gateway.

use chatrelay_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("chatrelay gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Store:     {}", config.store.backend);
    println!("   Streams:   {}", config.stream.transport);

    chatrelay_gateway::start(config).await?;

    Ok(())
}
