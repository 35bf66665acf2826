//! HTTP client for the remote AI service.
//!
//! Requests go to the REST paths of each service plane under the configured
//! base URLs. Deployments point those URLs at a signing gateway, which relays
//! agent event streams as newline-delimited JSON records.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::agent::events::RawAgentEvent;
use crate::config::ServiceConfig;
use crate::error::ServiceError;

use super::{
    AgentControl, AgentDetails, AgentEventStream, AgentResponse, AgentRuntime, AgentUpdate,
    GuardrailSummary, IngestionControl, IngestionJob, InvokeAgentRequest, InvokeModelRequest,
    ModelRuntime, RetrieveAndGenerateRequest,
};

const CONTENT_TYPE_HEADER: &str = "x-amzn-bedrock-agent-content-type";
const MEMORY_ID_HEADER: &str = "x-amz-bedrock-agent-memory-id";
const SESSION_ID_HEADER: &str = "x-amz-bedrock-agent-session-id";
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";
const GUARDRAIL_ID_HEADER: &str = "X-Amzn-Bedrock-GuardrailIdentifier";
const GUARDRAIL_VERSION_HEADER: &str = "X-Amzn-Bedrock-GuardrailVersion";

/// Client for every service plane the gateway uses.
#[derive(Clone)]
pub struct HttpServiceClient {
    http: reqwest::Client,
    settings: ServiceConfig,
}

impl std::fmt::Debug for HttpServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServiceClient")
            .field("agent_runtime_url", &self.settings.agent_runtime_url)
            .field("model_runtime_url", &self.settings.model_runtime_url)
            .field("agent_url", &self.settings.agent_url)
            .field("control_url", &self.settings.control_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionJobEnvelope {
    ingestion_job: IngestionJob,
}

#[derive(Deserialize)]
struct AgentEnvelope {
    agent: AgentDetails,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareAgentResponse {
    agent_status: String,
}

#[derive(Deserialize)]
struct GuardrailList {
    #[serde(default)]
    guardrails: Vec<GuardrailSummary>,
}

impl HttpServiceClient {
    #[must_use]
    pub fn new(settings: ServiceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.settings.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }

    async fn send(&self, rb: RequestBuilder) -> Result<Response, ServiceError> {
        let resp = self.authorize(rb).send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        Err(remote_error(status.as_u16(), &headers, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<T, ServiceError> {
        let resp = self.send(rb).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Append percent-encoded path segments to a base URL.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ServiceError> {
    let mut url = Url::parse(base).map_err(|e| ServiceError::Endpoint(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| ServiceError::Endpoint(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Build a tagged error from a non-success response.
///
/// The code comes from the `x-amzn-ErrorType` header, else the body's
/// `__type`/`code`; namespaces (`ns#Code`) and suffixes (`Code:uri`) are cut.
fn remote_error(status: u16, headers: &HeaderMap, body: &str) -> ServiceError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let raw_code = headers
        .get(ERROR_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            ["__type", "code", "Code"]
                .iter()
                .find_map(|k| parsed.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        });

    let code = raw_code
        .map(|c| {
            let c = c.split(':').next().unwrap_or_default();
            c.rsplit('#').next().unwrap_or_default().to_string()
        })
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| format!("Http{status}"));

    let message = ["message", "Message"]
        .iter()
        .find_map(|k| parsed.get(*k).and_then(Value::as_str))
        .map_or_else(|| body.trim().to_string(), str::to_string);

    ServiceError::remote(code, message)
}

/// Decode one NDJSON line; blank lines yield nothing.
fn decode_line(line: &[u8]) -> Option<Result<RawAgentEvent, ServiceError>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(trimmed).map_err(ServiceError::from))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl AgentRuntime for HttpServiceClient {
    async fn invoke_agent(&self, request: InvokeAgentRequest) -> Result<AgentResponse, ServiceError> {
        let url = endpoint(
            &self.settings.agent_runtime_url,
            &[
                "agents",
                &request.agent_id,
                "agentAliases",
                &request.agent_alias_id,
                "sessions",
                &request.session_id,
                "text",
            ],
        )?;

        let resp = self.send(self.http.post(url).json(&request)).await?;
        let headers = resp.headers().clone();
        let byte_stream = resp.bytes_stream();

        let completion = async_stream::stream! {
            let mut buf = Vec::<u8>::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => buf.extend_from_slice(&bytes),
                    Err(e) => {
                        yield Err(ServiceError::from(e));
                        return;
                    }
                }

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.drain(..=pos).collect::<Vec<_>>();
                    if let Some(item) = decode_line(&line) {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            return;
                        }
                    }
                }
            }

            // Final record may lack a trailing newline
            if let Some(item) = decode_line(&buf) {
                yield item;
            }
        };
        let completion: AgentEventStream = Box::pin(completion);

        Ok(AgentResponse {
            completion,
            content_type: header_value(&headers, CONTENT_TYPE_HEADER),
            memory_id: header_value(&headers, MEMORY_ID_HEADER),
            session_id: header_value(&headers, SESSION_ID_HEADER),
        })
    }

    async fn retrieve_and_generate(
        &self,
        request: &RetrieveAndGenerateRequest,
    ) -> Result<Value, ServiceError> {
        let url = endpoint(&self.settings.agent_runtime_url, &["retrieveAndGenerate"])?;
        self.send_json(self.http.post(url).json(request)).await
    }
}

#[async_trait]
impl ModelRuntime for HttpServiceClient {
    async fn invoke_model(&self, request: InvokeModelRequest) -> Result<Value, ServiceError> {
        let url = endpoint(
            &self.settings.model_runtime_url,
            &["model", &request.model_id, "invoke"],
        )?;

        let mut rb = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(serde_json::to_vec(&request.body)?);
        if let Some(guardrail) = &request.guardrail {
            rb = rb
                .header(GUARDRAIL_ID_HEADER, &guardrail.id)
                .header(GUARDRAIL_VERSION_HEADER, &guardrail.version);
        }

        self.send_json(rb).await
    }
}

#[async_trait]
impl IngestionControl for HttpServiceClient {
    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        description: &str,
    ) -> Result<IngestionJob, ServiceError> {
        let url = endpoint(
            &self.settings.agent_url,
            &[
                "knowledgebases",
                knowledge_base_id,
                "datasources",
                data_source_id,
                "ingestionjobs",
                "",
            ],
        )?;
        let envelope: IngestionJobEnvelope = self
            .send_json(self.http.put(url).json(&json!({ "description": description })))
            .await?;
        Ok(envelope.ingestion_job)
    }

    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        job_id: &str,
    ) -> Result<IngestionJob, ServiceError> {
        let url = endpoint(
            &self.settings.agent_url,
            &[
                "knowledgebases",
                knowledge_base_id,
                "datasources",
                data_source_id,
                "ingestionjobs",
                job_id,
            ],
        )?;
        let envelope: IngestionJobEnvelope = self.send_json(self.http.get(url)).await?;
        Ok(envelope.ingestion_job)
    }
}

#[async_trait]
impl AgentControl for HttpServiceClient {
    async fn get_agent(&self, agent_id: &str) -> Result<AgentDetails, ServiceError> {
        let url = endpoint(&self.settings.agent_url, &["agents", agent_id, ""])?;
        let envelope: AgentEnvelope = self.send_json(self.http.get(url)).await?;
        Ok(envelope.agent)
    }

    async fn update_agent(&self, update: &AgentUpdate) -> Result<AgentDetails, ServiceError> {
        let url = endpoint(&self.settings.agent_url, &["agents", &update.agent_id, ""])?;
        let envelope: AgentEnvelope = self.send_json(self.http.put(url).json(update)).await?;
        Ok(envelope.agent)
    }

    async fn prepare_agent(&self, agent_id: &str) -> Result<String, ServiceError> {
        let url = endpoint(&self.settings.agent_url, &["agents", agent_id, ""])?;
        let prepared: PrepareAgentResponse = self.send_json(self.http.post(url)).await?;
        Ok(prepared.agent_status)
    }

    async fn list_guardrails(
        &self,
        identifier: Option<&str>,
    ) -> Result<Vec<GuardrailSummary>, ServiceError> {
        let mut url = endpoint(&self.settings.control_url, &["guardrails"])?;
        if let Some(id) = identifier {
            url.query_pairs_mut().append_pair("guardrailIdentifier", id);
        }
        let list: GuardrailList = self.send_json(self.http.get(url)).await?;
        Ok(list.guardrails)
    }

    async fn get_guardrail(&self, id: &str, version: Option<&str>) -> Result<Value, ServiceError> {
        let mut url = endpoint(&self.settings.control_url, &["guardrails", id])?;
        if let Some(version) = version {
            url.query_pairs_mut().append_pair("guardrailVersion", version);
        }
        self.send_json(self.http.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = endpoint("http://gateway.local/v1/", &["model", "amazon.nova-lite-v1:0", "invoke"])
            .unwrap();
        assert_eq!(url.as_str(), "http://gateway.local/v1/model/amazon.nova-lite-v1:0/invoke");

        let url = endpoint("http://gateway.local", &["agents", "a b", ""]).unwrap();
        assert_eq!(url.as_str(), "http://gateway.local/agents/a%20b/");
    }

    #[test]
    fn test_endpoint_rejects_invalid_base() {
        assert!(matches!(endpoint("not a url", &["x"]), Err(ServiceError::Endpoint(_))));
    }

    #[test]
    fn test_remote_error_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            ERROR_TYPE_HEADER,
            HeaderValue::from_static("ValidationException:http://internal.amazon.com/"),
        );
        let err = remote_error(400, &headers, r#"{"message":"Session with Id x is not valid"}"#);
        assert_eq!(err.code(), Some("ValidationException"));
        assert_eq!(err.message(), "Session with Id x is not valid");
    }

    #[test]
    fn test_remote_error_from_body_type() {
        let err = remote_error(
            429,
            &HeaderMap::new(),
            r#"{"__type":"com.amazon.coral#ThrottlingException","Message":"slow down"}"#,
        );
        assert_eq!(err.code(), Some("ThrottlingException"));
        assert_eq!(err.message(), "slow down");
    }

    #[test]
    fn test_remote_error_without_details() {
        let err = remote_error(502, &HeaderMap::new(), "upstream unavailable");
        assert_eq!(err.code(), Some("Http502"));
        assert_eq!(err.message(), "upstream unavailable");
    }

    #[test]
    fn test_decode_line() {
        assert!(decode_line(b"   \n").is_none());
        let event = decode_line(br#"{"chunk":{"bytes":"SGk="}}"#).unwrap().unwrap();
        assert!(event.chunk().is_some());
        assert!(decode_line(b"[1,2]").unwrap().is_err());
    }
}
