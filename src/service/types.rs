//! Request and response shapes exchanged with the remote AI service.

use std::fmt;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::events::RawAgentEvent;
use crate::error::ServiceError;

/// Producible-once stream of agent events.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<RawAgentEvent, ServiceError>> + Send>>;

/// Guardrail reference attached to a model or knowledge-base call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailRef {
    pub id: String,
    pub version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent runtime
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeAgentRequest {
    #[serde(skip)]
    pub agent_id: String,
    #[serde(skip)]
    pub agent_alias_id: String,
    #[serde(skip)]
    pub session_id: String,
    pub input_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_state: Option<SessionState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub knowledge_base_configurations: Vec<KnowledgeBaseConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfiguration {
    pub knowledge_base_id: String,
    pub retrieval_configuration: RetrievalConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfiguration {
    pub vector_search_configuration: VectorSearchConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchConfiguration {
    pub number_of_results: u32,
    /// `HYBRID` searches semantically and by text.
    pub override_search_type: String,
}

/// Envelope of an agent invocation: the event stream plus response metadata.
pub struct AgentResponse {
    pub completion: AgentEventStream,
    pub content_type: Option<String>,
    pub memory_id: Option<String>,
    pub session_id: Option<String>,
}

impl fmt::Debug for AgentResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentResponse")
            .field("content_type", &self.content_type)
            .field("memory_id", &self.memory_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl AgentResponse {
    pub fn new(completion: AgentEventStream) -> Self {
        Self {
            completion,
            content_type: None,
            memory_id: None,
            session_id: None,
        }
    }

    /// Wrap an already-received list of events.
    pub fn from_events(events: Vec<RawAgentEvent>) -> Self {
        Self::new(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn with_memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieve and generate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateRequest {
    pub input: TextInput,
    pub retrieve_and_generate_configuration: RetrieveAndGenerateConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextInput {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateConfiguration {
    /// Always `KNOWLEDGE_BASE`.
    #[serde(rename = "type")]
    pub kind: String,
    pub knowledge_base_configuration: KnowledgeBaseGenerationConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseGenerationConfiguration {
    pub knowledge_base_id: String,
    pub model_arn: String,
    pub retrieval_configuration: RetrievalConfiguration,
    pub generation_configuration: GenerationConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail_configuration: Option<GuardrailConfiguration>,
    pub inference_config: InferenceConfig,
    pub performance_config: PerformanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfiguration {
    pub guardrail_id: String,
    pub guardrail_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub text_inference_config: TextInferenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceConfig {
    pub latency: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Model runtime
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeModelRequest {
    pub model_id: String,
    /// JSON document sent verbatim as the request body.
    pub body: Value,
    pub guardrail: Option<GuardrailRef>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion jobs
// ─────────────────────────────────────────────────────────────────────────────

/// Status of an ingestion job as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    Starting,
    InProgress,
    Complete,
    Failed,
    Stopping,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl IngestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub knowledge_base_id: String,
    pub data_source_id: String,
    pub ingestion_job_id: String,
    pub status: IngestionStatus,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agents and guardrails
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentGuardrailConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDetails {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_resource_role_arn: Option<String>,
    #[serde(default)]
    pub foundation_model: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub guardrail_configuration: Option<AgentGuardrailConfiguration>,
}

/// Full replacement of an agent's mutable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
    #[serde(skip)]
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_resource_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foundation_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Omitted to detach the current guardrail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail_configuration: Option<AgentGuardrailConfiguration>,
}

/// Guardrail listing entry; unknown fields are kept for pass-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
