use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

use crate::vector_store::LifecycleRequest;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Bearer token presented to the service gateway
    #[arg(long, env = "SERVICE_API_KEY")]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP gateway (default)
    Serve,
    /// Bootstrap the pgvector store backing the knowledge base
    InitVectorStore {
        #[arg(long, value_enum, default_value_t = LifecycleRequest::Create)]
        request_type: LifecycleRequest,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub cors: CorsConfig,
    pub service: ServiceConfig,
    pub agent: AgentConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    pub model: ModelConfig,
    pub ingestion: IngestionConfig,
    pub vector_store: VectorStoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub timeout_disabled: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    /// Comma-separated list of headers browsers may send.
    pub allowed_headers: String,
    /// Origin echoed when the request carries none.
    pub default_origin: String,
}

impl CorsConfig {
    pub fn header_names(&self) -> Vec<String> {
        self.allowed_headers
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Base URLs of the remote AI service planes.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Agent runtime: agent invocation and retrieve-and-generate.
    pub agent_runtime_url: String,
    /// Model runtime: direct model invocation.
    pub model_runtime_url: String,
    /// Agent control plane: agents and ingestion jobs.
    pub agent_url: String,
    /// Guardrail control plane.
    pub control_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub agent_id: Option<String>,
    pub agent_alias_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    pub knowledge_base_id: Option<String>,
    pub data_source_id: Option<String>,
    pub model_arn: String,
    pub number_of_results: u32,
    pub search_type: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub latency: String,
    pub guardrail_version: String,
    /// Message fragments that together identify a stale session reference.
    pub stale_session_fragments: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub default_model_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    pub max_wait_secs: u64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    pub database_url: Option<String>,
    pub user_password: Option<String>,
    pub schema: String,
    pub table: String,
    pub role: String,
    pub dimensions: u32,
    pub ef_construction: u32,
}

/// Variable names used by the original deployment, mapped onto config keys.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("AGENT_ID", "agent.agent_id"),
    ("KNOWLEDGE_BASE_ID", "knowledge_base.knowledge_base_id"),
    ("DATA_SOURCE_ID", "knowledge_base.data_source_id"),
    ("MODEL_ID", "model.default_model_id"),
    ("ALLOWED_HEADERS", "cors.allowed_headers"),
    ("DATABASE_URL", "vector_store.database_url"),
];

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Priority: CLI flag > legacy env > `GENAI_*` env > config file > defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.request_timeout_secs", 30)?
            .set_default(
                "cors.allowed_headers",
                "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token",
            )?
            .set_default("cors.default_origin", "http://localhost:8000")?
            .set_default("service.agent_runtime_url", "http://localhost:4566")?
            .set_default("service.model_runtime_url", "http://localhost:4566")?
            .set_default("service.agent_url", "http://localhost:4566")?
            .set_default("service.control_url", "http://localhost:4566")?
            .set_default("agent.agent_alias_id", "TSTALIASID")?
            .set_default(
                "knowledge_base.model_arn",
                "arn:aws:bedrock:us-east-1::foundation-model/amazon.nova-pro-v1:0",
            )?
            .set_default("knowledge_base.number_of_results", 5)?
            .set_default("knowledge_base.search_type", "HYBRID")?
            .set_default("knowledge_base.max_tokens", 1024)?
            .set_default("knowledge_base.temperature", 0.7)?
            .set_default("knowledge_base.top_p", 0.9)?
            .set_default("knowledge_base.latency", "standard")?
            .set_default("knowledge_base.guardrail_version", "DRAFT")?
            .set_default(
                "knowledge_base.stale_session_fragments",
                vec!["is not valid", "Session with Id"],
            )?
            .set_default("model.default_model_id", "amazon.nova-lite-v1:0")?
            .set_default("ingestion.max_wait_secs", 300)?
            .set_default("ingestion.poll_interval_secs", 10)?
            .set_default("vector_store.schema", "bedrock_integration")?
            .set_default("vector_store.table", "bedrock_kb")?
            .set_default("vector_store.role", "bedrock_user")?
            .set_default("vector_store.dimensions", 1024)?
            .set_default("vector_store.ef_construction", 256)?;

        // Explicit file must exist; ./config.* is picked up when present.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // E.g. GENAI_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("GENAI")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("knowledge_base.stale_session_fragments")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV_KEYS {
            if let Ok(val) = env::var(var) {
                if !val.trim().is_empty() {
                    builder = builder.set_override(*key, val)?;
                }
            }
        }

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }
        if let Some(key) = &cli.api_key {
            builder = builder.set_override("service.api_key", key.clone())?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_header_names_are_trimmed() {
        let cors = CorsConfig {
            allowed_headers: "Content-Type, Authorization,,X-Api-Key ".to_string(),
            default_origin: "http://localhost:8000".to_string(),
        };
        assert_eq!(
            cors.header_names(),
            vec!["Content-Type", "Authorization", "X-Api-Key"]
        );
    }

    #[test]
    fn test_subcommand_parsing() {
        let cli = Cli::try_parse_from(["genai-gateway", "init-vector-store", "--request-type", "delete"])
            .expect("cli parses");
        assert!(matches!(
            cli.command,
            Some(Command::InitVectorStore {
                request_type: LifecycleRequest::Delete
            })
        ));
    }
}
