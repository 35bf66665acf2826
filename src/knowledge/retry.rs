//! Single-shot recovery from a stale session reference.
//!
//! The remote service rejects a retrieve-and-generate call whose session id
//! it no longer knows with a validation error. [`RetryingQueryExecutor`]
//! recognises that failure through a [`StaleSessionMatcher`], drops the
//! session id and reissues the call exactly once. Every other failure is
//! returned untouched.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::config::KnowledgeBaseConfig;
use crate::error::ServiceError;
use crate::service::AgentRuntime;
use crate::telemetry::{self, names};

use super::query::QueryAttempt;

/// Message fragments the service uses when a session id is unknown.
pub const DEFAULT_STALE_SESSION_FRAGMENTS: [&str; 2] = ["is not valid", "Session with Id"];

/// Decides whether a failure means the supplied session id is stale.
pub trait StaleSessionMatcher: Send + Sync {
    fn is_stale_session(&self, error: &ServiceError) -> bool;
}

/// Matches validation errors whose message contains every fragment.
#[derive(Debug, Clone)]
pub struct FragmentMatcher {
    fragments: Vec<String>,
}

impl FragmentMatcher {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for FragmentMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_SESSION_FRAGMENTS)
    }
}

impl StaleSessionMatcher for FragmentMatcher {
    fn is_stale_session(&self, error: &ServiceError) -> bool {
        let ServiceError::Remote { message, .. } = error else {
            return false;
        };
        error.is_validation() && self.fragments.iter().all(|f| message.contains(f.as_str()))
    }
}

/// Outcome of [`RetryingQueryExecutor::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub response: Value,
    /// True when the call only succeeded after the session id was dropped.
    pub session_reference_changed: bool,
}

pub struct RetryingQueryExecutor {
    runtime: Arc<dyn AgentRuntime>,
    matcher: Arc<dyn StaleSessionMatcher>,
    knowledge_base_id: String,
    settings: KnowledgeBaseConfig,
}

impl std::fmt::Debug for RetryingQueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingQueryExecutor")
            .field("knowledge_base_id", &self.knowledge_base_id)
            .finish_non_exhaustive()
    }
}

impl RetryingQueryExecutor {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        knowledge_base_id: impl Into<String>,
        settings: KnowledgeBaseConfig,
    ) -> Self {
        let matcher = if settings.stale_session_fragments.is_empty() {
            FragmentMatcher::default()
        } else {
            FragmentMatcher::new(settings.stale_session_fragments.iter().cloned())
        };
        Self {
            runtime,
            matcher: Arc::new(matcher),
            knowledge_base_id: knowledge_base_id.into(),
            settings,
        }
    }

    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn StaleSessionMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub async fn execute(&self, attempt: &QueryAttempt) -> Result<QueryOutcome, ServiceError> {
        let request = attempt.to_request(&self.knowledge_base_id, &self.settings);
        match self.runtime.retrieve_and_generate(&request).await {
            Ok(response) => Ok(QueryOutcome {
                response,
                session_reference_changed: false,
            }),
            Err(e) if attempt.has_session() && self.matcher.is_stale_session(&e) => {
                warn!(
                    session_id = attempt.session_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "Stale session reference, retrying without session"
                );
                telemetry::count(names::STALE_SESSION_RETRY);

                let retry = attempt
                    .without_session()
                    .to_request(&self.knowledge_base_id, &self.settings);
                let response = self.runtime.retrieve_and_generate(&retry).await?;
                Ok(QueryOutcome {
                    response,
                    session_reference_changed: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}
