//! HTTP surface: request dispatch, body validation, CORS, timeouts.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;
use crate::agent::{AgentInvoker, NormalizedResponse};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::guardrails::{AgentGuardrail, GuardrailEntry, GuardrailManager, GuardrailUpdate};
use crate::knowledge::{IngestionOutcome, KnowledgeBaseSync, QueryAttempt, RetryingQueryExecutor};
use crate::model::{ModelQuery, ModelQueryRequest, ModelQueryResponse};
use crate::service::GuardrailRef;
use crate::telemetry::{self, names};

const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Build the gateway router over `state`.
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let (request_timeout, sync_timeout) = route_timeouts(&config);

    // Sync waits on the ingestion poller, so it gets its own budget.
    let sync = Router::new()
        .route("/knowledge-base/sync", post(sync_knowledge_base))
        .route_layer(axum::middleware::from_fn_with_state(sync_timeout, enforce_timeout));

    Router::new()
        .route("/agent", post(invoke_agent))
        .route("/knowledge-base/query", post(query_knowledge_base))
        .route("/llm/query", post(query_model))
        .route("/guardrails", get(list_guardrails).put(update_guardrail))
        .route("/guardrails/{agent_id}", get(get_agent_guardrail))
        .route("/metrics", get(render_metrics))
        .route_layer(axum::middleware::from_fn_with_state(request_timeout, enforce_timeout))
        .merge(sync)
        .fallback(unsupported)
        .method_not_allowed_fallback(unsupported)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(axum::middleware::from_fn_with_state(
            default_origin(&config),
            apply_default_origin,
        ))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Timeouts for ordinary routes and for the sync route.
///
/// The sync budget covers the whole polling window plus one overshooting
/// sleep and one ordinary request for starting the job.
fn route_timeouts(config: &AppConfig) -> (Duration, Duration) {
    if config.resilience.timeout_disabled {
        let unbounded = Duration::from_secs(365 * 24 * 60 * 60);
        return (unbounded, unbounded);
    }

    let request = Duration::from_secs(config.resilience.request_timeout_secs);
    let polling = Duration::from_secs(
        config
            .ingestion
            .max_wait_secs
            .saturating_add(config.ingestion.poll_interval_secs),
    );
    (request, polling.saturating_add(request))
}

async fn enforce_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(res) => res,
        Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
    }
}

/// Start the gateway and serve until the listener fails.
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let headers: Vec<HeaderName> = config
        .cors
        .header_names()
        .iter()
        .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::OPTIONS,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers(headers)
}

fn default_origin(config: &AppConfig) -> Option<HeaderValue> {
    HeaderValue::from_str(&config.cors.default_origin)
        .inspect_err(|e| warn!(error = %e, "Ignoring invalid default CORS origin"))
        .ok()
}

/// Requests without an `Origin` header get the configured default origin.
async fn apply_default_origin(
    State(origin): State<Option<HeaderValue>>,
    req: Request,
    next: Next,
) -> Response {
    let has_origin = req.headers().contains_key(header::ORIGIN);
    let mut res = next.run(req).await;
    if let Some(origin) = origin.filter(|_| !has_origin) {
        res.headers_mut()
            .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .or_insert(origin);
    }
    res
}

/// Decode a JSON request body, distinguishing an absent body from a bad one.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    if body.trim_ascii().is_empty() {
        warn!("Missing request body");
        return Err(ApiError::bad_request("Missing request body"));
    }
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Invalid JSON in request body");
        ApiError::bad_request("Invalid JSON in request body")
    })
}

async fn unsupported(method: Method, uri: axum::http::Uri) -> ApiError {
    warn!(%method, path = %uri.path(), "Unsupported path or method");
    ApiError::bad_request("Unsupported operation")
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest {
    query: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentReply {
    results: NormalizedResponse,
    session_id: String,
}

async fn invoke_agent(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AgentReply>, ApiError> {
    let request: AgentRequest = parse_body(&body)?;
    let Some(query) = request.query.filter(|q| !q.is_empty()) else {
        telemetry::count(names::MISSING_QUERY);
        return Err(ApiError::bad_request("Missing 'query' parameter in request body"));
    };

    let invoker = AgentInvoker::from_config(
        Arc::clone(&state.runtime),
        &state.config.agent,
        &state.config.knowledge_base,
    )
    .ok_or_else(|| ApiError::configuration("Agent ID or Agent Alias ID not configured"))?;

    let turn = invoker
        .invoke(&query, request.session_id.as_deref())
        .await
        .map_err(|e| ApiError::service("Error invoking agent", e))?;

    Ok(Json(AgentReply {
        results: turn.response,
        session_id: turn.session_id,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge base
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeBaseQueryRequest {
    query: Option<String>,
    session_id: Option<String>,
    guardrail_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeBaseQueryReply {
    query: String,
    results: Value,
    session_id: Option<Value>,
}

async fn query_knowledge_base(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<KnowledgeBaseQueryReply>, ApiError> {
    let request: KnowledgeBaseQueryRequest = parse_body(&body)?;
    let Some(query) = request.query.filter(|q| !q.is_empty()) else {
        telemetry::count(names::MISSING_QUERY);
        return Err(ApiError::bad_request("Query text is required"));
    };

    let settings = &state.config.knowledge_base;
    let Some(knowledge_base_id) = settings.knowledge_base_id.clone().filter(|id| !id.is_empty())
    else {
        telemetry::count(names::MISSING_KNOWLEDGE_BASE_ID);
        return Err(ApiError::configuration("Knowledge base ID not configured"));
    };

    let guardrail = request
        .guardrail_id
        .filter(|id| !id.is_empty())
        .map(|id| GuardrailRef {
            id,
            version: settings.guardrail_version.clone(),
        });
    let attempt = QueryAttempt::new(query.clone(), settings.number_of_results)
        .with_session(request.session_id)
        .with_guardrail(guardrail);

    info!(
        %knowledge_base_id,
        session_id = attempt.session_id.as_deref().unwrap_or("None"),
        "Querying knowledge base"
    );

    let executor =
        RetryingQueryExecutor::new(Arc::clone(&state.runtime), knowledge_base_id, settings.clone());
    let outcome = executor.execute(&attempt).await.map_err(|e| {
        telemetry::count(names::KNOWLEDGE_BASE_QUERY_ERROR);
        ApiError::service("Error querying knowledge base", e)
    })?;
    telemetry::count(names::SUCCESSFUL_QUERY);

    if outcome.session_reference_changed {
        info!("Knowledge base query succeeded with a new session");
    }

    let session_id = outcome.response.get("sessionId").cloned();
    Ok(Json(KnowledgeBaseQueryReply {
        query,
        results: outcome.response,
        session_id,
    }))
}

#[derive(Debug, Serialize)]
struct SyncReply {
    message: &'static str,
}

async fn sync_knowledge_base(State(state): State<AppState>) -> Result<Json<SyncReply>, ApiError> {
    let settings = &state.config.knowledge_base;
    let ids = settings
        .knowledge_base_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .zip(settings.data_source_id.as_deref().filter(|id| !id.is_empty()));
    let Some((knowledge_base_id, data_source_id)) = ids else {
        telemetry::count(names::MISSING_ENVIRONMENT);
        return Err(ApiError::bad_request(
            "Missing required environment variables: KNOWLEDGE_BASE_ID or DATA_SOURCE_ID",
        ));
    };

    let sync = KnowledgeBaseSync::new(
        Arc::clone(&state.ingestion),
        Arc::clone(&state.clock),
        &state.config.ingestion,
    );
    let outcome = sync
        .sync(knowledge_base_id, data_source_id)
        .await
        .map_err(|e| ApiError::service("Error syncing knowledge base", e))?;

    match outcome {
        IngestionOutcome::Completed => Ok(Json(SyncReply {
            message: "Knowledge base ingestion completed successfully",
        })),
        IngestionOutcome::Failed { status } => Err(ApiError::Internal(format!(
            "Knowledge base ingestion failed with status: {status}"
        ))),
        IngestionOutcome::TimedOut => Ok(Json(SyncReply {
            message: "Knowledge base ingestion started but did not complete within timeout",
        })),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

async fn query_model(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ModelQueryResponse>, ApiError> {
    let request: ModelQueryRequest = parse_body(&body)?;
    if request.messages.is_empty() {
        warn!("Missing messages in request");
        telemetry::count(names::MISSING_MESSAGES);
        return Err(ApiError::bad_request("Messages are required"));
    }

    let model = ModelQuery::new(
        Arc::clone(&state.models),
        state.config.model.default_model_id.clone(),
    );
    let response = model
        .query(&request)
        .await
        .map_err(|e| ApiError::service("Error invoking model", e))?;
    Ok(Json(response))
}

// ─────────────────────────────────────────────────────────────────────────────
// Guardrails
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GuardrailListReply {
    guardrails: Vec<GuardrailEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuardrailUpdateRequest {
    agent_id: Option<String>,
    guardrail_id: Option<String>,
    guardrail_version: Option<String>,
}

async fn list_guardrails(
    State(state): State<AppState>,
) -> Result<Json<GuardrailListReply>, ApiError> {
    let guardrails = GuardrailManager::new(Arc::clone(&state.control)).list().await?;
    Ok(Json(GuardrailListReply { guardrails }))
}

async fn get_agent_guardrail(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentGuardrail>, ApiError> {
    let guardrail = GuardrailManager::new(Arc::clone(&state.control))
        .agent_guardrail(&agent_id)
        .await?;
    Ok(Json(guardrail))
}

async fn update_guardrail(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<GuardrailUpdate>, ApiError> {
    let request: GuardrailUpdateRequest = parse_body(&body)?;
    let result = GuardrailManager::new(Arc::clone(&state.control))
        .update(
            request.agent_id.as_deref(),
            request.guardrail_id.as_deref(),
            request.guardrail_version.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

async fn render_metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or_else(|| ApiError::not_found("Metrics recorder not installed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_distinguishes_missing_and_invalid() {
        let missing = parse_body::<AgentRequest>(&Bytes::from_static(b"  ")).unwrap_err();
        assert_eq!(missing.to_string(), "Missing request body");

        let invalid = parse_body::<AgentRequest>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(invalid.to_string(), "Invalid JSON in request body");

        let parsed =
            parse_body::<AgentRequest>(&Bytes::from_static(br#"{"query":"hi","sessionId":"s"}"#))
                .unwrap();
        assert_eq!(parsed.query.as_deref(), Some("hi"));
        assert_eq!(parsed.session_id.as_deref(), Some("s"));
    }

    #[test]
    fn test_sync_timeout_outlasts_polling_window() {
        let mut config = AppConfig::load_from_args(["genai-gateway"]).unwrap();
        config.resilience.timeout_disabled = false;
        config.resilience.request_timeout_secs = 30;
        config.ingestion.max_wait_secs = 300;
        config.ingestion.poll_interval_secs = 10;

        let (request, sync) = route_timeouts(&config);
        assert_eq!(request, Duration::from_secs(30));
        assert_eq!(sync, Duration::from_secs(340));

        config.resilience.timeout_disabled = true;
        let (request, sync) = route_timeouts(&config);
        assert_eq!(request, sync);
        assert!(request > Duration::from_secs(300));
    }
}
