//! Flattening of an agent invocation stream into a stable result record.
//!
//! [`normalize`] folds the event stream in a single forward pass:
//! chunk text is concatenated in order, attribution blocks become
//! [`Citation`]s, trace blocks become [`TraceRecord`]s and the last error
//! variant seen wins. Malformed sub-fields are skipped with a warning.
//!
//! Two conditions abandon the fold: a stream item that is itself an error,
//! and chunk bytes that are not UTF-8. The caller then receives
//! [`NormalizedResponse::Fallback`], which carries only `text` and `error`.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::ServiceError;
use crate::service::AgentResponse;
use crate::telemetry::{self, names};

use super::events::{AgentErrorKind, ChunkBody, ChunkPayload, RawAgentEvent};

/// Text of the degraded record returned when normalization is abandoned.
pub const FALLBACK_TEXT: &str = "Error processing agent response";

const UNKNOWN_ERROR: &str = "Unknown error";

/// Source reference attached to a citation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A span of generated text and the references backing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Reference>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailTrace {
    pub action: Option<String>,
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_assessments: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_assessments: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationTrace {
    pub model_invocation_input: Option<Value>,
    pub model_invocation_output: Option<Value>,
}

/// Diagnostic record built from one trace event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_alias_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail: Option<GuardrailTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<OrchestrationTrace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentError {
    #[serde(rename = "type")]
    pub kind: AgentErrorKind,
    pub message: String,
}

/// Stable output of a fully consumed stream.
///
/// `text`, `citations`, `traces` and `error` are always serialized, even when
/// empty; `error` is `null` when no error variant was seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub text: String,
    pub citations: Vec<Citation>,
    pub traces: Vec<TraceRecord>,
    pub error: Option<AgentError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
}

/// Degraded record; citations and traces are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub text: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedResponse {
    Complete(NormalizedResult),
    Fallback(FallbackResult),
}

impl NormalizedResponse {
    pub fn text(&self) -> &str {
        match self {
            Self::Complete(result) => &result.text,
            Self::Fallback(fallback) => &fallback.text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn as_complete(&self) -> Option<&NormalizedResult> {
        match self {
            Self::Complete(result) => Some(result),
            Self::Fallback(_) => None,
        }
    }
}

/// Reasons the fold is abandoned.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("chunk bytes are not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Stream(#[from] ServiceError),
}

/// Consume an agent response and flatten it.
pub async fn normalize(response: AgentResponse) -> NormalizedResponse {
    match fold(response).await {
        Ok(result) => {
            if result.text.is_empty() {
                warn!("No text was extracted from the agent response");
            }
            if result.citations.is_empty() {
                warn!("No citations were extracted from the agent response");
            }
            NormalizedResponse::Complete(result)
        }
        Err(e) => {
            error!(error = %e, "Error processing agent response");
            telemetry::count(names::AGENT_RESPONSE_FALLBACK);
            NormalizedResponse::Fallback(FallbackResult {
                text: FALLBACK_TEXT.to_string(),
                error: e.to_string(),
            })
        }
    }
}

async fn fold(response: AgentResponse) -> Result<NormalizedResult, NormalizeError> {
    let AgentResponse {
        mut completion,
        content_type,
        memory_id,
        ..
    } = response;

    let mut result = NormalizedResult::default();
    while let Some(event) = completion.next().await {
        result.absorb(&event?)?;
    }

    result.content_type = content_type;
    result.memory_id = memory_id;
    Ok(result)
}

impl NormalizedResult {
    fn absorb(&mut self, event: &RawAgentEvent) -> Result<(), NormalizeError> {
        if let Some(chunk) = event.chunk() {
            self.absorb_chunk(chunk)?;
        }

        if let Some(trace) = event.trace() {
            self.traces.push(TraceRecord::from_raw(trace));
        }

        for (kind, payload) in event.errors() {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_ERROR)
                .to_string();
            error!(error_type = %kind, %message, "Agent stream reported an error");
            telemetry::count(names::AGENT_STREAM_ERROR);
            self.error = Some(AgentError { kind, message });
        }

        Ok(())
    }

    fn absorb_chunk(&mut self, chunk: &Value) -> Result<(), NormalizeError> {
        match ChunkPayload::decode(chunk) {
            ChunkPayload::Buffer(bytes) => self.text.push_str(&String::from_utf8(bytes)?),
            ChunkPayload::Mapping { body, attribution } => {
                match body {
                    ChunkBody::Bytes(bytes) => self.text.push_str(&String::from_utf8(bytes)?),
                    ChunkBody::Text(text) => self.text.push_str(&text),
                    ChunkBody::Malformed(field) => {
                        warn!(field, "Chunk field holds neither bytes nor text");
                    }
                    ChunkBody::Undecodable(e) => {
                        warn!(error = %e, "Dropping chunk bytes that do not decode");
                    }
                    ChunkBody::Empty => {}
                }
                if let Some(attribution) = attribution {
                    self.citations.extend(citations_from(attribution));
                }
            }
            ChunkPayload::Undecodable(e) => {
                warn!(error = %e, "Dropping chunk that does not decode");
            }
            ChunkPayload::Unrecognized => {
                warn!("Chunk is neither a byte buffer nor a mapping");
            }
        }
        Ok(())
    }
}

fn citations_from(attribution: &Value) -> Vec<Citation> {
    let Some(citations) = attribution.get("citations") else {
        warn!("Attribution found but no citations key in it");
        return Vec::new();
    };
    let Some(citations) = citations.as_array() else {
        warn!("Attribution citations is not a list");
        return Vec::new();
    };
    citations.iter().map(Citation::from_raw).collect()
}

impl Citation {
    fn from_raw(raw: &Value) -> Self {
        let text_part = raw.pointer("/generatedResponsePart/textResponsePart");
        Self {
            text: text_part
                .and_then(|part| part.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string),
            span: text_part.and_then(|part| part.get("span")).cloned(),
            references: raw
                .get("retrievedReferences")
                .and_then(Value::as_array)
                .map(|refs| refs.iter().map(Reference::from_raw).collect()),
        }
    }
}

impl Reference {
    fn from_raw(raw: &Value) -> Self {
        let content = match raw.get("content") {
            Some(Value::Object(content)) => content
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
            Some(other) => {
                warn!(kind = value_kind(other), "Reference content is not a mapping");
                None
            }
            None => None,
        };

        Self {
            content,
            location: raw.get("location").cloned(),
            metadata: raw.get("metadata").cloned(),
        }
    }
}

impl TraceRecord {
    fn from_raw(trace: &Value) -> Self {
        let field = |key: &str| trace.get(key).and_then(Value::as_str).map(str::to_string);
        let inner = trace.get("trace");

        Self {
            agent_id: field("agentId"),
            agent_alias_id: field("agentAliasId"),
            agent_version: field("agentVersion"),
            session_id: field("sessionId"),
            guardrail: inner
                .and_then(|t| t.get("guardrailTrace"))
                .map(GuardrailTrace::from_raw),
            orchestration: inner
                .and_then(|t| t.get("orchestrationTrace"))
                .map(OrchestrationTrace::from_raw),
        }
    }
}

impl GuardrailTrace {
    fn from_raw(raw: &Value) -> Self {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        let list = |key: &str| raw.get(key).and_then(Value::as_array).cloned();
        Self {
            action: text("action"),
            trace_id: text("traceId"),
            input_assessments: list("inputAssessments"),
            output_assessments: list("outputAssessments"),
        }
    }
}

impl OrchestrationTrace {
    fn from_raw(raw: &Value) -> Self {
        Self {
            model_invocation_input: raw.get("modelInvocationInput").cloned(),
            model_invocation_output: raw.get("modelInvocationOutput").cloned(),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
