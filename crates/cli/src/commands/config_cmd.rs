//! `chatrelay config`: Configuration inspection commands.

use chatrelay_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let mut value = serde_json::to_value(&config)?;
    crate::commands::resolve::redact_secrets(&mut value);
    let toml_str = toml::to_string_pretty(&value)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
