use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging.
///
/// - `tracing-subscriber::fmt` for structured logging.
/// - `EnvFilter` for dynamic log levels (RUST_LOG).
pub fn init() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .compact();

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,genai_gateway=debug"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

/// Install the global Prometheus recorder backing `metrics::counter!`.
///
/// The returned handle renders the exposition served at `GET /metrics`.
pub fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Increment a branch-outcome counter by one.
pub fn count(name: &'static str) {
    metrics::counter!(name).increment(1);
}

/// Counter names, one per branch outcome.
pub mod names {
    pub const SUCCESSFUL_QUERY: &str = "gateway_successful_query_total";
    pub const MISSING_QUERY: &str = "gateway_missing_query_total";
    pub const MISSING_MESSAGES: &str = "gateway_missing_messages_total";
    pub const MISSING_KNOWLEDGE_BASE_ID: &str = "gateway_missing_knowledge_base_id_total";
    pub const KNOWLEDGE_BASE_QUERY_ERROR: &str = "gateway_knowledge_base_query_error_total";
    pub const STALE_SESSION_RETRY: &str = "gateway_stale_session_retry_total";

    pub const AGENT_INVOCATION_ERROR: &str = "gateway_agent_invocation_error_total";
    pub const AGENT_RESPONSE_FALLBACK: &str = "gateway_agent_response_fallback_total";
    pub const AGENT_STREAM_ERROR: &str = "gateway_agent_stream_error_total";

    pub const MODEL_INVOCATION_ERROR: &str = "gateway_model_invocation_error_total";
    pub const GUARDRAIL_INTERVENTION: &str = "gateway_guardrail_intervention_total";

    pub const INGESTION_JOB_STARTED: &str = "gateway_ingestion_job_started_total";
    pub const INGESTION_JOB_COMPLETED: &str = "gateway_ingestion_job_completed_total";
    pub const INGESTION_JOB_FAILED: &str = "gateway_ingestion_job_failed_total";
    pub const INGESTION_JOB_TIMEOUT: &str = "gateway_ingestion_job_timeout_total";
    pub const INGESTION_JOB_CLIENT_ERROR: &str = "gateway_ingestion_job_client_error_total";
    pub const MISSING_ENVIRONMENT: &str = "gateway_missing_environment_total";

    pub const GUARDRAILS_LIST_SUCCESS: &str = "gateway_guardrails_list_success_total";
    pub const GUARDRAILS_LIST_ERROR: &str = "gateway_guardrails_list_error_total";
    pub const AGENT_GUARDRAIL_GET_SUCCESS: &str = "gateway_agent_guardrail_get_success_total";
    pub const AGENT_GUARDRAIL_GET_ERROR: &str = "gateway_agent_guardrail_get_error_total";
    pub const GUARDRAIL_UPDATE_SUCCESS: &str = "gateway_guardrail_update_success_total";
    pub const GUARDRAIL_REMOVAL_SUCCESS: &str = "gateway_guardrail_removal_success_total";
    pub const GUARDRAIL_UPDATE_ERROR: &str = "gateway_guardrail_update_error_total";
    pub const PREPARE_AGENT_ERROR: &str = "gateway_prepare_agent_error_total";

    pub const VECTOR_INIT_ATTEMPT: &str = "gateway_vector_init_attempt_total";
    pub const VECTOR_INIT_SUCCESS: &str = "gateway_vector_init_success_total";
    pub const VECTOR_INIT_FAILURE: &str = "gateway_vector_init_failure_total";
}
