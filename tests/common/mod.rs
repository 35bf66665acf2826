//! Scripted service doubles shared by the HTTP integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genai_gateway::AppState;
use genai_gateway::agent::events::RawAgentEvent;
use genai_gateway::config::AppConfig;
use genai_gateway::error::ServiceError;
use genai_gateway::knowledge::Clock;
use genai_gateway::service::{
    AgentControl, AgentDetails, AgentResponse, AgentRuntime, AgentUpdate, GuardrailSummary,
    IngestionControl, IngestionJob, IngestionStatus, InvokeAgentRequest, InvokeModelRequest,
    ModelRuntime, RetrieveAndGenerateRequest,
};
use serde_json::Value;
use tokio::time::Instant;

/// One double for every service plane; each call pops the next scripted result.
#[derive(Default)]
pub struct ScriptedService {
    pub agent_events: Mutex<Vec<Value>>,
    pub agent_requests: Mutex<Vec<InvokeAgentRequest>>,
    pub kb_results: Mutex<VecDeque<Result<Value, ServiceError>>>,
    pub kb_requests: Mutex<Vec<RetrieveAndGenerateRequest>>,
    pub model_results: Mutex<VecDeque<Result<Value, ServiceError>>>,
    pub model_requests: Mutex<Vec<InvokeModelRequest>>,
    pub job_statuses: Mutex<VecDeque<IngestionStatus>>,
    pub agents: Mutex<HashMap<String, AgentDetails>>,
    pub guardrails: Mutex<HashMap<(String, Option<String>), Value>>,
    pub guardrail_summaries: Mutex<Vec<GuardrailSummary>>,
    pub agent_updates: Mutex<Vec<AgentUpdate>>,
}

impl ScriptedService {
    pub fn push_kb(&self, result: Result<Value, ServiceError>) {
        self.kb_results.lock().unwrap().push_back(result);
    }

    pub fn push_model(&self, result: Result<Value, ServiceError>) {
        self.model_results.lock().unwrap().push_back(result);
    }
}

fn not_found() -> ServiceError {
    ServiceError::remote("ResourceNotFoundException", "not found")
}

#[async_trait]
impl AgentRuntime for ScriptedService {
    async fn invoke_agent(&self, request: InvokeAgentRequest) -> Result<AgentResponse, ServiceError> {
        self.agent_requests.lock().unwrap().push(request);
        let events = self
            .agent_events
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(RawAgentEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AgentResponse::from_events(events).with_content_type("application/json"))
    }

    async fn retrieve_and_generate(
        &self,
        request: &RetrieveAndGenerateRequest,
    ) -> Result<Value, ServiceError> {
        self.kb_requests.lock().unwrap().push(request.clone());
        self.kb_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Stream("no scripted result".to_string())))
    }
}

#[async_trait]
impl ModelRuntime for ScriptedService {
    async fn invoke_model(&self, request: InvokeModelRequest) -> Result<Value, ServiceError> {
        self.model_requests.lock().unwrap().push(request);
        self.model_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Stream("no scripted result".to_string())))
    }
}

fn job(status: IngestionStatus) -> IngestionJob {
    IngestionJob {
        knowledge_base_id: "kb-1".to_string(),
        data_source_id: "ds-1".to_string(),
        ingestion_job_id: "job-1".to_string(),
        status,
        failure_reasons: Vec::new(),
        started_at: None,
        updated_at: None,
    }
}

#[async_trait]
impl IngestionControl for ScriptedService {
    async fn start_ingestion_job(
        &self,
        _knowledge_base_id: &str,
        _data_source_id: &str,
        _description: &str,
    ) -> Result<IngestionJob, ServiceError> {
        Ok(job(IngestionStatus::Starting))
    }

    async fn get_ingestion_job(
        &self,
        _knowledge_base_id: &str,
        _data_source_id: &str,
        _job_id: &str,
    ) -> Result<IngestionJob, ServiceError> {
        let mut statuses = self.job_statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(job(status.unwrap_or(IngestionStatus::Starting)))
    }
}

#[async_trait]
impl AgentControl for ScriptedService {
    async fn get_agent(&self, agent_id: &str) -> Result<AgentDetails, ServiceError> {
        self.agents.lock().unwrap().get(agent_id).cloned().ok_or_else(not_found)
    }

    async fn update_agent(&self, update: &AgentUpdate) -> Result<AgentDetails, ServiceError> {
        self.agent_updates.lock().unwrap().push(update.clone());
        Ok(AgentDetails::default())
    }

    async fn prepare_agent(&self, _agent_id: &str) -> Result<String, ServiceError> {
        Ok("PREPARING".to_string())
    }

    async fn list_guardrails(
        &self,
        identifier: Option<&str>,
    ) -> Result<Vec<GuardrailSummary>, ServiceError> {
        let summaries = self.guardrail_summaries.lock().unwrap();
        Ok(match identifier {
            None => summaries.clone(),
            Some(id) => summaries.iter().filter(|s| s.id == id).cloned().collect(),
        })
    }

    async fn get_guardrail(&self, id: &str, version: Option<&str>) -> Result<Value, ServiceError> {
        self.guardrails
            .lock()
            .unwrap()
            .get(&(id.to_string(), version.map(str::to_string)))
            .cloned()
            .ok_or_else(not_found)
    }
}

/// Clock that advances only when slept on.
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }
}

/// Default configuration with agent, knowledge base and data source set.
pub fn test_config() -> AppConfig {
    let mut config =
        AppConfig::load_from_args(["genai-gateway"]).expect("default config should load");
    config.agent.agent_id = Some("agent-1".to_string());
    config.knowledge_base.knowledge_base_id = Some("kb-1".to_string());
    config.knowledge_base.data_source_id = Some("ds-1".to_string());
    config
}

pub fn state(config: AppConfig, service: &Arc<ScriptedService>) -> AppState {
    AppState {
        config: Arc::new(config),
        runtime: Arc::clone(service) as Arc<dyn AgentRuntime>,
        models: Arc::clone(service) as Arc<dyn ModelRuntime>,
        ingestion: Arc::clone(service) as Arc<dyn IngestionControl>,
        control: Arc::clone(service) as Arc<dyn AgentControl>,
        clock: Arc::new(ManualClock::new()),
        metrics: None,
    }
}
