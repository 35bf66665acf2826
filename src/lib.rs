//! GenAI Gateway
//!
//! HTTP handlers in front of a managed generative-AI platform: agent
//! invocation, knowledge-base retrieval and sync, direct model queries,
//! guardrail management, and a one-time pgvector initializer.
//!
//! # Modules
//!
//! - [`agent`]: agent invocation and normalization of its event stream
//! - [`knowledge`]: knowledge-base queries with stale-session retry, ingestion polling
//! - [`model`]: direct model invocation over a conversation
//! - [`guardrails`]: guardrail listing and agent guardrail updates
//! - [`vector_store`]: pgvector bootstrap
//! - [`service`]: remote service traits and the HTTP client implementing them
//! - [`server`]: axum router and request dispatch

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod agent;
pub mod config;
pub mod error;
pub mod guardrails;
pub mod knowledge;
pub mod model;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod vector_store;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::knowledge::{Clock, TokioClock};
use crate::service::{AgentControl, AgentRuntime, HttpServiceClient, IngestionControl, ModelRuntime};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Global configuration
    pub config: Arc<AppConfig>,
    /// Agent invocation and retrieve-and-generate
    pub runtime: Arc<dyn AgentRuntime>,
    pub models: Arc<dyn ModelRuntime>,
    pub ingestion: Arc<dyn IngestionControl>,
    /// Agent configuration and guardrails
    pub control: Arc<dyn AgentControl>,
    /// Time source for ingestion polling
    pub clock: Arc<dyn Clock>,
    /// Prometheus handle backing `GET /metrics`, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State backed by one HTTP client for every service plane.
    pub fn from_config(config: Arc<AppConfig>, metrics: Option<PrometheusHandle>) -> Self {
        let client = Arc::new(HttpServiceClient::new(config.service.clone()));
        Self {
            runtime: Arc::clone(&client) as Arc<dyn AgentRuntime>,
            models: Arc::clone(&client) as Arc<dyn ModelRuntime>,
            ingestion: Arc::clone(&client) as Arc<dyn IngestionControl>,
            control: client,
            clock: Arc::new(TokioClock),
            config,
            metrics,
        }
    }
}
