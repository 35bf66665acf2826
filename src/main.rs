//! GenAI Gateway server
//!
//! Entry point: serves the HTTP gateway, or bootstraps the vector store with
//! `init-vector-store`.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};

use genai_gateway::AppState;
use genai_gateway::config::{AppConfig, Cli, Command};
use genai_gateway::{server, telemetry, vector_store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before anything reads the environment
    let _ = dotenv();

    telemetry::init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::from_cli(&cli)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let metrics = telemetry::install_metrics_recorder()
                .inspect_err(|e| warn!(error = %e, "Metrics recorder not installed"))
                .ok();

            info!(
                name: "gateway.config.loaded",
                agent_configured = config.agent.agent_id.is_some(),
                knowledge_base_configured = config.knowledge_base.knowledge_base_id.is_some(),
                default_model = %config.model.default_model_id,
                "Gateway configuration loaded"
            );

            server::start_server(AppState::from_config(config, metrics)).await
        }
        Command::InitVectorStore { request_type } => {
            let message = vector_store::run(request_type, &config.vector_store).await?;
            info!(%request_type, message, "Vector store lifecycle request handled");
            Ok(())
        }
    }
}
