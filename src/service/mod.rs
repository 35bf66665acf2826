//! Remote AI service interface.
//!
//! The gateway talks to the managed service only through the narrow traits
//! below. Each trait covers one service plane so callers (and their tests)
//! depend on just the calls they make.
//!
//! - [`AgentRuntime`]: agent invocation and knowledge-base retrieve-and-generate
//! - [`ModelRuntime`]: direct model invocation
//! - [`IngestionControl`]: knowledge-base ingestion jobs
//! - [`AgentControl`]: agent configuration and guardrails
//!
//! [`HttpServiceClient`] implements all four over HTTP.

pub mod http;
pub mod types;

pub use http::HttpServiceClient;
pub use types::*;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ServiceError;

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Open an agent invocation; the returned stream is consumed once.
    async fn invoke_agent(&self, request: InvokeAgentRequest) -> Result<AgentResponse, ServiceError>;

    async fn retrieve_and_generate(
        &self,
        request: &RetrieveAndGenerateRequest,
    ) -> Result<Value, ServiceError>;
}

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Invoke a model and return its decoded JSON body.
    async fn invoke_model(&self, request: InvokeModelRequest) -> Result<Value, ServiceError>;
}

#[async_trait]
pub trait IngestionControl: Send + Sync {
    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        description: &str,
    ) -> Result<IngestionJob, ServiceError>;

    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        job_id: &str,
    ) -> Result<IngestionJob, ServiceError>;
}

#[async_trait]
pub trait AgentControl: Send + Sync {
    async fn get_agent(&self, agent_id: &str) -> Result<AgentDetails, ServiceError>;

    async fn update_agent(&self, update: &AgentUpdate) -> Result<AgentDetails, ServiceError>;

    /// Rebuild the agent after a configuration change; returns the agent status.
    async fn prepare_agent(&self, agent_id: &str) -> Result<String, ServiceError>;

    /// List guardrails, or the versions of one guardrail when `identifier` is set.
    async fn list_guardrails(
        &self,
        identifier: Option<&str>,
    ) -> Result<Vec<GuardrailSummary>, ServiceError>;

    /// Fetch guardrail detail; `None` selects the DRAFT version.
    async fn get_guardrail(&self, id: &str, version: Option<&str>) -> Result<Value, ServiceError>;
}
