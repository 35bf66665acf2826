//! Knowledge-base query parameters and their wire mapping.

use crate::config::KnowledgeBaseConfig;
use crate::service::{
    GenerationConfiguration, GuardrailConfiguration, GuardrailRef, InferenceConfig,
    KnowledgeBaseGenerationConfiguration, PerformanceConfig, RetrievalConfiguration,
    RetrieveAndGenerateConfiguration, RetrieveAndGenerateRequest, TextInferenceConfig, TextInput,
    VectorSearchConfiguration,
};

const KNOWLEDGE_BASE_TYPE: &str = "KNOWLEDGE_BASE";

/// Parameters of one retrieve-and-generate attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAttempt {
    pub query: String,
    pub session_id: Option<String>,
    pub guardrail: Option<GuardrailRef>,
    pub number_of_results: u32,
}

impl QueryAttempt {
    pub fn new(query: impl Into<String>, number_of_results: u32) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            guardrail: None,
            number_of_results,
        }
    }

    /// Empty session ids are treated as absent.
    #[must_use]
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|id| !id.is_empty());
        self
    }

    #[must_use]
    pub fn with_guardrail(mut self, guardrail: Option<GuardrailRef>) -> Self {
        self.guardrail = guardrail;
        self
    }

    /// The same attempt with the session reference dropped.
    #[must_use]
    pub fn without_session(&self) -> Self {
        Self {
            session_id: None,
            ..self.clone()
        }
    }

    pub fn has_session(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn to_request(
        &self,
        knowledge_base_id: &str,
        settings: &KnowledgeBaseConfig,
    ) -> RetrieveAndGenerateRequest {
        RetrieveAndGenerateRequest {
            input: TextInput {
                text: self.query.clone(),
            },
            retrieve_and_generate_configuration: RetrieveAndGenerateConfiguration {
                kind: KNOWLEDGE_BASE_TYPE.to_string(),
                knowledge_base_configuration: KnowledgeBaseGenerationConfiguration {
                    knowledge_base_id: knowledge_base_id.to_string(),
                    model_arn: settings.model_arn.clone(),
                    retrieval_configuration: RetrievalConfiguration {
                        vector_search_configuration: VectorSearchConfiguration {
                            number_of_results: self.number_of_results,
                            override_search_type: settings.search_type.clone(),
                        },
                    },
                    generation_configuration: GenerationConfiguration {
                        guardrail_configuration: self.guardrail.as_ref().map(|g| {
                            GuardrailConfiguration {
                                guardrail_id: g.id.clone(),
                                guardrail_version: g.version.clone(),
                            }
                        }),
                        inference_config: InferenceConfig {
                            text_inference_config: TextInferenceConfig {
                                max_tokens: settings.max_tokens,
                                temperature: settings.temperature,
                                top_p: settings.top_p,
                            },
                        },
                        performance_config: PerformanceConfig {
                            latency: settings.latency.clone(),
                        },
                    },
                },
            },
            session_id: self.session_id.clone(),
        }
    }
}
