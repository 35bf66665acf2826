//! Agent invocation.
//!
//! [`AgentInvoker`] prepares the invocation (session id, knowledge-base
//! session state), opens the event stream through an [`AgentRuntime`] and
//! hands it to [`normalizer::normalize`].

pub mod events;
pub mod normalizer;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, KnowledgeBaseConfig};
use crate::error::ServiceError;
use crate::service::{
    AgentRuntime, InvokeAgentRequest, KnowledgeBaseConfiguration, RetrievalConfiguration,
    SessionState, VectorSearchConfiguration,
};
use crate::telemetry::{self, names};

pub use normalizer::{NormalizedResponse, NormalizedResult, normalize};

/// Result of one agent turn.
#[derive(Debug)]
pub struct AgentTurn {
    pub response: NormalizedResponse,
    /// Session the turn ran in; generated when the caller supplied none.
    pub session_id: String,
}

pub struct AgentInvoker {
    runtime: Arc<dyn AgentRuntime>,
    agent_id: String,
    agent_alias_id: String,
    knowledge_base: Option<KnowledgeBaseConfiguration>,
}

impl std::fmt::Debug for AgentInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInvoker")
            .field("agent_id", &self.agent_id)
            .field("agent_alias_id", &self.agent_alias_id)
            .field("knowledge_base", &self.knowledge_base)
            .finish_non_exhaustive()
    }
}

impl AgentInvoker {
    /// Returns `None` when no agent is configured.
    pub fn from_config(
        runtime: Arc<dyn AgentRuntime>,
        agent: &AgentConfig,
        knowledge_base: &KnowledgeBaseConfig,
    ) -> Option<Self> {
        let agent_id = agent.agent_id.clone().filter(|id| !id.is_empty())?;
        if agent.agent_alias_id.is_empty() {
            return None;
        }

        let kb_config = knowledge_base
            .knowledge_base_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| KnowledgeBaseConfiguration {
                knowledge_base_id: id.to_string(),
                retrieval_configuration: RetrievalConfiguration {
                    vector_search_configuration: VectorSearchConfiguration {
                        number_of_results: knowledge_base.number_of_results,
                        override_search_type: knowledge_base.search_type.clone(),
                    },
                },
            });

        Some(Self {
            runtime,
            agent_id,
            agent_alias_id: agent.agent_alias_id.clone(),
            knowledge_base: kb_config,
        })
    }

    /// Run one turn. An empty or missing `session_id` starts a new session.
    pub async fn invoke(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<AgentTurn, ServiceError> {
        let session_id = session_id
            .filter(|id| !id.is_empty())
            .map_or_else(new_session_id, str::to_string);

        let session_state = match &self.knowledge_base {
            Some(kb) => {
                info!(
                    knowledge_base_id = %kb.knowledge_base_id,
                    search_type = %kb.retrieval_configuration.vector_search_configuration.override_search_type,
                    "Attaching knowledge base to agent session"
                );
                Some(SessionState {
                    knowledge_base_configurations: vec![kb.clone()],
                })
            }
            None => {
                warn!("No knowledge base configured; agent will answer without retrieval");
                None
            }
        };

        let request = InvokeAgentRequest {
            agent_id: self.agent_id.clone(),
            agent_alias_id: self.agent_alias_id.clone(),
            session_id: session_id.clone(),
            input_text: query.to_string(),
            session_state,
        };

        info!(agent_id = %self.agent_id, %session_id, "Invoking agent");
        let response = self.runtime.invoke_agent(request).await.inspect_err(|e| {
            telemetry::count(names::AGENT_INVOCATION_ERROR);
            warn!(agent_id = %self.agent_id, error = %e, "Agent invocation failed");
        })?;

        Ok(AgentTurn {
            response: normalize(response).await,
            session_id,
        })
    }
}

fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{AgentResponse, RetrieveAndGenerateRequest};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRuntime {
        requests: Mutex<Vec<InvokeAgentRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl AgentRuntime for RecordingRuntime {
        async fn invoke_agent(
            &self,
            request: InvokeAgentRequest,
        ) -> Result<AgentResponse, ServiceError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(ServiceError::remote("AccessDeniedException", "denied"));
            }
            let event = json!({ "chunk": { "text": "hello" } });
            Ok(AgentResponse::from_events(vec![event.try_into().unwrap()]))
        }

        async fn retrieve_and_generate(
            &self,
            _request: &RetrieveAndGenerateRequest,
        ) -> Result<Value, ServiceError> {
            unreachable!("not used by agent invocation")
        }
    }

    fn agent_config() -> AgentConfig {
        AgentConfig {
            agent_id: Some("agent-1".to_string()),
            agent_alias_id: "TSTALIASID".to_string(),
        }
    }

    fn kb_config(id: Option<&str>) -> KnowledgeBaseConfig {
        KnowledgeBaseConfig {
            knowledge_base_id: id.map(str::to_string),
            data_source_id: None,
            model_arn: "arn:model".to_string(),
            number_of_results: 5,
            search_type: "HYBRID".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 0.9,
            latency: "standard".to_string(),
            guardrail_version: "DRAFT".to_string(),
            stale_session_fragments: vec![],
        }
    }

    #[test]
    fn test_missing_agent_id_disables_invoker() {
        let runtime = Arc::new(RecordingRuntime::default());
        let agent = AgentConfig {
            agent_id: None,
            agent_alias_id: "TSTALIASID".to_string(),
        };
        assert!(AgentInvoker::from_config(runtime, &agent, &kb_config(None)).is_none());
    }

    #[tokio::test]
    async fn test_generates_session_and_attaches_knowledge_base() {
        let runtime = Arc::new(RecordingRuntime::default());
        let invoker = AgentInvoker::from_config(
            Arc::clone(&runtime) as Arc<dyn AgentRuntime>,
            &agent_config(),
            &kb_config(Some("kb-1")),
        )
        .unwrap();

        let turn = invoker.invoke("hi", Some("")).await.unwrap();
        assert!(turn.session_id.starts_with("session-"));
        assert_eq!(turn.response.text(), "hello");

        let requests = runtime.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.session_id, turn.session_id);
        let state = request.session_state.as_ref().unwrap();
        let kb = &state.knowledge_base_configurations[0];
        assert_eq!(kb.knowledge_base_id, "kb-1");
        assert_eq!(kb.retrieval_configuration.vector_search_configuration.number_of_results, 5);
        assert_eq!(
            kb.retrieval_configuration.vector_search_configuration.override_search_type,
            "HYBRID"
        );
    }

    #[tokio::test]
    async fn test_reuses_session_without_knowledge_base() {
        let runtime = Arc::new(RecordingRuntime::default());
        let invoker = AgentInvoker::from_config(
            Arc::clone(&runtime) as Arc<dyn AgentRuntime>,
            &agent_config(),
            &kb_config(None),
        )
        .unwrap();

        let turn = invoker.invoke("hi", Some("session-abc")).await.unwrap();
        assert_eq!(turn.session_id, "session-abc");
        assert!(runtime.requests.lock().unwrap()[0].session_state.is_none());
    }

    #[tokio::test]
    async fn test_invocation_failure_propagates() {
        let runtime = Arc::new(RecordingRuntime {
            fail: true,
            ..RecordingRuntime::default()
        });
        let invoker =
            AgentInvoker::from_config(runtime, &agent_config(), &kb_config(None)).unwrap();

        let err = invoker.invoke("hi", None).await.unwrap_err();
        assert_eq!(err.code(), Some("AccessDeniedException"));
    }
}
