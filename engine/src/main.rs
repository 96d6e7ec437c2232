// Foreman planning and execution engine
// Main entry point for the foreman binary

use clap::Parser;
use foreman_engine::cli::{Cli, Command};
use foreman_engine::config::Config;
use foreman_engine::handlers::{handle_capabilities, handle_run, handle_validate, OutputFormat};
use foreman_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_or_create_at(config_path)?
    } else {
        Config::load_or_create()?
    };

    // RUST_LOG still wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::info!("Foreman v{}", env!("CARGO_PKG_VERSION"));

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Run { instruction, yes } => handle_run(instruction, yes, &config, format).await,
        Command::Capabilities { namespace } => handle_capabilities(namespace, &config, format).await,
        Command::Validate { file } => handle_validate(&file, &config, format).await,
    }
}
