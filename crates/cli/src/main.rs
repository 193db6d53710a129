//! chatrelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`   : Start the HTTP gateway
//! - `ask`     : Run one turn from the command line
//! - `resolve` : Show how a named configuration resolves
//! - `config`  : Show the service configuration or its path

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "chatrelay: conversation orchestration in front of AI chat backends",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one prompt and print the response document
    Ask {
        prompt: String,

        /// Named configuration
        #[arg(short, long)]
        config: Option<String>,

        /// Continue an existing conversation
        #[arg(long)]
        context: Option<String>,

        /// Assistant id; repeat for a multi-assistant turn (the last one interprets)
        #[arg(short, long = "assistant")]
        assistants: Vec<String>,
    },

    /// Resolve a named configuration and print the result
    Resolve { name: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective service configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            prompt,
            config,
            context,
            assistants,
        } => commands::ask::run(prompt, config, context, assistants).await?,
        Commands::Resolve { name } => commands::resolve::run(&name).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
