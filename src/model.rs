//! Direct model invocation over a conversation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::error::ServiceError;
use crate::service::{GuardrailRef, InvokeModelRequest, ModelRuntime};
use crate::telemetry::{self, names};

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_GUARDRAIL_VERSION: &str = "DRAFT";
const GUARDRAIL_ACTION_KEY: &str = "amazon-bedrock-guardrailAction";

/// Body of `POST /llm/query`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelQueryRequest {
    #[serde(default)]
    pub messages: Vec<Value>,
    pub model_id: Option<String>,
    pub guardrail_id: Option<String>,
    pub guardrail_version: Option<String>,
    pub session_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
}

impl ModelQueryRequest {
    /// First text part of the last `user` message.
    pub fn last_user_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
    }

    fn guardrail(&self) -> Option<GuardrailRef> {
        let id = self.guardrail_id.as_deref().filter(|id| !id.is_empty())?;
        Some(GuardrailRef {
            id: id.to_string(),
            version: self
                .guardrail_version
                .clone()
                .unwrap_or_else(|| DEFAULT_GUARDRAIL_VERSION.to_string()),
        })
    }

    /// Model request body: messages, inference settings and stop sequences.
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("messages".to_string(), Value::Array(self.messages.clone()));
        body.insert(
            "inferenceConfig".to_string(),
            json!({
                "maxTokens": self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                "temperature": self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            }),
        );
        if let Some(stop) = self.stop_sequences.as_ref().filter(|s| !s.is_empty()) {
            body.insert("stop".to_string(), json!(stop));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelQueryResponse {
    pub query: Option<String>,
    pub results: ModelResults,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResults {
    pub citations: Vec<Value>,
    pub output: ModelOutput,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelOutput {
    pub text: String,
}

pub struct ModelQuery {
    runtime: Arc<dyn ModelRuntime>,
    default_model_id: String,
}

impl std::fmt::Debug for ModelQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelQuery")
            .field("default_model_id", &self.default_model_id)
            .finish_non_exhaustive()
    }
}

impl ModelQuery {
    pub fn new(runtime: Arc<dyn ModelRuntime>, default_model_id: impl Into<String>) -> Self {
        Self {
            runtime,
            default_model_id: default_model_id.into(),
        }
    }

    /// Callers reject an empty conversation before getting here.
    pub async fn query(&self, request: &ModelQueryRequest) -> Result<ModelQueryResponse, ServiceError> {
        let query = request.last_user_query().map(str::to_string);
        let model_id = request
            .model_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.default_model_id.clone());
        let guardrail = request.guardrail();

        info!(
            %model_id,
            query = query.as_deref().unwrap_or_default(),
            session_id = request.session_id.as_deref().unwrap_or("None"),
            guardrail_id = guardrail.as_ref().map_or("None", |g| g.id.as_str()),
            "Invoking model"
        );

        let body = self
            .runtime
            .invoke_model(InvokeModelRequest {
                model_id,
                body: request.to_body(),
                guardrail,
            })
            .await
            .inspect_err(|_| telemetry::count(names::MODEL_INVOCATION_ERROR))?;
        telemetry::count(names::SUCCESSFUL_QUERY);

        if let Some(action) = body.get(GUARDRAIL_ACTION_KEY) {
            info!(%action, "Guardrail intervened in model response");
            telemetry::count(names::GUARDRAIL_INTERVENTION);
        }

        Ok(ModelQueryResponse {
            query,
            results: ModelResults {
                citations: Vec::new(),
                output: ModelOutput {
                    text: generated_text(&body),
                },
                session_id: request.session_id.clone(),
            },
            session_id: request.session_id.clone(),
        })
    }
}

/// Text parts of `output.message.content`, one per line.
///
/// Any other content, an empty list included, is rendered as JSON.
pub fn generated_text(body: &Value) -> String {
    match body.pointer("/output/message/content") {
        Some(Value::Array(parts)) if !parts.is_empty() => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
