//! Guardrail management for the configured agents.
//!
//! Listing expands every guardrail into its DRAFT detail plus the detail of
//! each published version. Updating an agent's guardrail rewrites the agent
//! with its existing required fields and then prepares it again.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{ApiError, ServiceError};
use crate::service::{AgentControl, AgentGuardrailConfiguration, AgentUpdate, GuardrailRef, GuardrailSummary};
use crate::telemetry::{self, names};

pub const DRAFT_VERSION: &str = "DRAFT";

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("agentId is required")]
    MissingAgentId,

    #[error("Agent {0} not found")]
    AgentNotFound(String),

    #[error("Guardrail {0} not found")]
    GuardrailNotFound(String),

    #[error("{context}: {source}")]
    Service {
        context: &'static str,
        #[source]
        source: ServiceError,
    },
}

impl From<GuardrailError> for ApiError {
    fn from(err: GuardrailError) -> Self {
        match err {
            GuardrailError::MissingAgentId => ApiError::bad_request(err.to_string()),
            GuardrailError::AgentNotFound(_) | GuardrailError::GuardrailNotFound(_) => {
                ApiError::not_found(err.to_string())
            }
            GuardrailError::Service { context, source } => ApiError::service(context, source),
        }
    }
}

/// One entry of the guardrail listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GuardrailEntry {
    #[serde(rename_all = "camelCase")]
    Detailed {
        guardrail_id: String,
        name: Option<String>,
        /// DRAFT first, then every published version.
        versions: Vec<Value>,
    },
    /// Detail lookup failed; the listing summary is passed through.
    Summary(GuardrailSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentGuardrail {
    pub agent_id: String,
    pub guardrail: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailUpdate {
    pub message: &'static str,
    pub agent_id: String,
    pub current_guardrail: Option<GuardrailRef>,
}

pub struct GuardrailManager {
    control: Arc<dyn AgentControl>,
}

impl std::fmt::Debug for GuardrailManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailManager").finish_non_exhaustive()
    }
}

impl GuardrailManager {
    pub fn new(control: Arc<dyn AgentControl>) -> Self {
        Self { control }
    }

    pub async fn list(&self) -> Result<Vec<GuardrailEntry>, GuardrailError> {
        info!("Listing all guardrails");
        let summaries = self.control.list_guardrails(None).await.map_err(|source| {
            telemetry::count(names::GUARDRAILS_LIST_ERROR);
            GuardrailError::Service {
                context: "Error listing guardrails",
                source,
            }
        })?;

        let mut entries = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match self.versions_of(&summary.id).await {
                Ok(versions) => entries.push(GuardrailEntry::Detailed {
                    guardrail_id: summary.id,
                    name: summary.name,
                    versions,
                }),
                Err(e) => {
                    warn!(guardrail_id = %summary.id, error = %e, "Error getting guardrail details");
                    entries.push(GuardrailEntry::Summary(summary));
                }
            }
        }

        info!(count = entries.len(), "Retrieved guardrails with all versions");
        telemetry::count(names::GUARDRAILS_LIST_SUCCESS);
        Ok(entries)
    }

    async fn versions_of(&self, guardrail_id: &str) -> Result<Vec<Value>, ServiceError> {
        let draft = self.control.get_guardrail(guardrail_id, None).await?;
        let listed = self.control.list_guardrails(Some(guardrail_id)).await?;

        let mut versions = vec![draft];
        for summary in listed {
            let Some(version) = summary.version.as_deref().filter(|v| *v != DRAFT_VERSION) else {
                continue;
            };
            match self.control.get_guardrail(guardrail_id, Some(version)).await {
                Ok(detail) => versions.push(detail),
                Err(e) => {
                    warn!(guardrail_id, version, error = %e, "Error getting guardrail version");
                    versions.push(serde_json::to_value(&summary)?);
                }
            }
        }
        Ok(versions)
    }

    pub async fn agent_guardrail(&self, agent_id: &str) -> Result<AgentGuardrail, GuardrailError> {
        let agent = self.control.get_agent(agent_id).await.map_err(|source| {
            if source.is_not_found() {
                warn!(agent_id, "Agent not found");
                return GuardrailError::AgentNotFound(agent_id.to_string());
            }
            telemetry::count(names::AGENT_GUARDRAIL_GET_ERROR);
            GuardrailError::Service {
                context: "Error getting agent",
                source,
            }
        })?;

        let config = agent.guardrail_configuration.unwrap_or_default();
        let Some(guardrail_id) = config.guardrail_identifier.filter(|id| !id.is_empty()) else {
            info!(agent_id, "Agent has no guardrail configured");
            return Ok(AgentGuardrail {
                agent_id: agent_id.to_string(),
                guardrail: None,
            });
        };
        let version = config
            .guardrail_version
            .unwrap_or_else(|| DRAFT_VERSION.to_string());

        let guardrail = match self.control.get_guardrail(&guardrail_id, Some(&version)).await {
            Ok(detail) => {
                telemetry::count(names::AGENT_GUARDRAIL_GET_SUCCESS);
                detail
            }
            Err(e) => {
                warn!(%guardrail_id, error = %e, "Error getting guardrail details, returning reference only");
                serde_json::json!({ "id": guardrail_id, "version": version })
            }
        };

        Ok(AgentGuardrail {
            agent_id: agent_id.to_string(),
            guardrail: Some(guardrail),
        })
    }

    /// Attach `guardrail_id` to the agent, or detach the current guardrail
    /// when it is `None` or empty.
    pub async fn update(
        &self,
        agent_id: Option<&str>,
        guardrail_id: Option<&str>,
        version: Option<&str>,
    ) -> Result<GuardrailUpdate, GuardrailError> {
        let agent_id = agent_id.ok_or(GuardrailError::MissingAgentId)?;
        let guardrail_id = guardrail_id.filter(|id| !id.is_empty());
        let version = version.unwrap_or(DRAFT_VERSION);

        self.apply_update(agent_id, guardrail_id, version)
            .await
            .inspect_err(|e| {
                if let GuardrailError::Service { .. } = e {
                    telemetry::count(names::GUARDRAIL_UPDATE_ERROR);
                }
            })
    }

    async fn apply_update(
        &self,
        agent_id: &str,
        guardrail_id: Option<&str>,
        version: &str,
    ) -> Result<GuardrailUpdate, GuardrailError> {
        let agent = self.control.get_agent(agent_id).await.map_err(|source| {
            if source.is_not_found() {
                GuardrailError::AgentNotFound(agent_id.to_string())
            } else {
                GuardrailError::Service {
                    context: "Error updating guardrail",
                    source,
                }
            }
        })?;

        let guardrail_configuration = match guardrail_id {
            Some(id) => {
                self.control
                    .get_guardrail(id, Some(version))
                    .await
                    .map_err(|source| {
                        if source.is_not_found() {
                            GuardrailError::GuardrailNotFound(id.to_string())
                        } else {
                            GuardrailError::Service {
                                context: "Error updating guardrail",
                                source,
                            }
                        }
                    })?;
                info!(agent_id, guardrail_id = id, version, "Setting agent guardrail");
                Some(AgentGuardrailConfiguration {
                    guardrail_identifier: Some(id.to_string()),
                    guardrail_version: Some(version.to_string()),
                })
            }
            None => {
                if agent.guardrail_configuration.is_some() {
                    info!(agent_id, "Removing existing guardrail from agent");
                }
                None
            }
        };

        let update = AgentUpdate {
            agent_id: agent_id.to_string(),
            agent_name: agent.agent_name,
            agent_resource_role_arn: agent.agent_resource_role_arn,
            foundation_model: agent.foundation_model,
            instruction: agent.instruction,
            guardrail_configuration,
        };
        self.control
            .update_agent(&update)
            .await
            .map_err(|source| GuardrailError::Service {
                context: "Error updating guardrail",
                source,
            })?;

        let result = match guardrail_id {
            Some(id) => {
                telemetry::count(names::GUARDRAIL_UPDATE_SUCCESS);
                GuardrailUpdate {
                    message: "Guardrail updated successfully",
                    agent_id: agent_id.to_string(),
                    current_guardrail: Some(GuardrailRef {
                        id: id.to_string(),
                        version: version.to_string(),
                    }),
                }
            }
            None => {
                telemetry::count(names::GUARDRAIL_REMOVAL_SUCCESS);
                GuardrailUpdate {
                    message: "Guardrail removed successfully",
                    agent_id: agent_id.to_string(),
                    current_guardrail: None,
                }
            }
        };
        info!(agent_id, message = result.message, "Agent guardrail updated");

        self.prepare(agent_id).await;
        Ok(result)
    }

    async fn prepare(&self, agent_id: &str) {
        match self.control.prepare_agent(agent_id).await {
            Ok(status) => info!(agent_id, %status, "Agent prepared"),
            Err(e) => {
                error!(agent_id, error = %e, "Error preparing agent");
                telemetry::count(names::PREPARE_AGENT_ERROR);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AgentDetails;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeControl {
        agents: HashMap<String, AgentDetails>,
        /// Keyed by `(id, version)`; `None` is the DRAFT lookup.
        guardrails: HashMap<(String, Option<String>), Value>,
        summaries: Vec<GuardrailSummary>,
        versions: HashMap<String, Vec<GuardrailSummary>>,
        updates: Mutex<Vec<AgentUpdate>>,
        prepared: Mutex<Vec<String>>,
        fail_prepare: bool,
    }

    fn not_found() -> ServiceError {
        ServiceError::remote("ResourceNotFoundException", "no such resource")
    }

    #[async_trait]
    impl AgentControl for FakeControl {
        async fn get_agent(&self, agent_id: &str) -> Result<AgentDetails, ServiceError> {
            self.agents.get(agent_id).cloned().ok_or_else(not_found)
        }

        async fn update_agent(&self, update: &AgentUpdate) -> Result<AgentDetails, ServiceError> {
            self.updates.lock().unwrap().push(update.clone());
            Ok(AgentDetails::default())
        }

        async fn prepare_agent(&self, agent_id: &str) -> Result<String, ServiceError> {
            self.prepared.lock().unwrap().push(agent_id.to_string());
            if self.fail_prepare {
                return Err(ServiceError::remote("ConflictException", "busy"));
            }
            Ok("PREPARING".to_string())
        }

        async fn list_guardrails(
            &self,
            identifier: Option<&str>,
        ) -> Result<Vec<GuardrailSummary>, ServiceError> {
            Ok(match identifier {
                None => self.summaries.clone(),
                Some(id) => self.versions.get(id).cloned().unwrap_or_default(),
            })
        }

        async fn get_guardrail(&self, id: &str, version: Option<&str>) -> Result<Value, ServiceError> {
            self.guardrails
                .get(&(id.to_string(), version.map(str::to_string)))
                .cloned()
                .ok_or_else(not_found)
        }
    }

    fn summary(id: &str, version: Option<&str>) -> GuardrailSummary {
        GuardrailSummary {
            id: id.to_string(),
            name: Some(format!("{id}-name")),
            version: version.map(str::to_string),
            extra: Map::new(),
        }
    }

    fn agent(guardrail: Option<(&str, Option<&str>)>) -> AgentDetails {
        AgentDetails {
            agent_id: Some("agent-1".to_string()),
            agent_name: Some("helper".to_string()),
            agent_resource_role_arn: Some("arn:role".to_string()),
            foundation_model: Some("amazon.nova-pro-v1:0".to_string()),
            instruction: Some("be helpful".to_string()),
            guardrail_configuration: guardrail.map(|(id, version)| AgentGuardrailConfiguration {
                guardrail_identifier: Some(id.to_string()),
                guardrail_version: version.map(str::to_string),
            }),
        }
    }

    fn manager(control: FakeControl) -> (GuardrailManager, Arc<FakeControl>) {
        let control = Arc::new(control);
        (
            GuardrailManager::new(Arc::clone(&control) as Arc<dyn AgentControl>),
            control,
        )
    }

    #[tokio::test]
    async fn test_list_expands_versions_and_falls_back() {
        let mut control = FakeControl {
            summaries: vec![summary("gr-1", None), summary("gr-2", None)],
            ..FakeControl::default()
        };
        control
            .guardrails
            .insert(("gr-1".to_string(), None), json!({ "version": "DRAFT" }));
        control
            .guardrails
            .insert(("gr-1".to_string(), Some("1".to_string())), json!({ "version": "1" }));
        control.versions.insert(
            "gr-1".to_string(),
            vec![summary("gr-1", Some("DRAFT")), summary("gr-1", Some("1")), summary("gr-1", Some("2"))],
        );

        let (manager, _) = manager(control);
        let entries = manager.list().await.unwrap();
        assert_eq!(entries.len(), 2);

        let GuardrailEntry::Detailed { guardrail_id, versions, .. } = &entries[0] else {
            panic!("expected detailed entry");
        };
        assert_eq!(guardrail_id, "gr-1");
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0]["version"], "DRAFT");
        assert_eq!(versions[1]["version"], "1");
        assert_eq!(versions[2]["id"], "gr-1");
        assert_eq!(versions[2]["version"], "2");

        // gr-2 has no DRAFT detail, so its summary is passed through.
        assert_eq!(entries[1], GuardrailEntry::Summary(summary("gr-2", None)));
        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["guardrailId"], "gr-1");
        assert_eq!(json["name"], "gr-1-name");
    }

    #[tokio::test]
    async fn test_agent_guardrail_variants() {
        let mut control = FakeControl::default();
        control.agents.insert("bare".to_string(), agent(None));
        control.agents.insert("guarded".to_string(), agent(Some(("gr-1", None))));
        control.agents.insert("dangling".to_string(), agent(Some(("gr-9", Some("3")))));
        control.guardrails.insert(
            ("gr-1".to_string(), Some("DRAFT".to_string())),
            json!({ "guardrailId": "gr-1", "name": "strict" }),
        );
        let (manager, _) = manager(control);

        let bare = manager.agent_guardrail("bare").await.unwrap();
        assert_eq!(bare.guardrail, None);
        assert_eq!(serde_json::to_value(&bare).unwrap()["guardrail"], Value::Null);

        let guarded = manager.agent_guardrail("guarded").await.unwrap();
        assert_eq!(guarded.guardrail.unwrap()["name"], "strict");

        let dangling = manager.agent_guardrail("dangling").await.unwrap();
        assert_eq!(dangling.guardrail, Some(json!({ "id": "gr-9", "version": "3" })));

        let missing = manager.agent_guardrail("ghost").await.unwrap_err();
        assert_eq!(missing.to_string(), "Agent ghost not found");
        assert_eq!(ApiError::from(missing).status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_attaches_guardrail_and_prepares() {
        let mut control = FakeControl::default();
        control.agents.insert("agent-1".to_string(), agent(None));
        control
            .guardrails
            .insert(("gr-1".to_string(), Some("2".to_string())), json!({}));
        let (manager, control) = manager(control);

        let result = manager
            .update(Some("agent-1"), Some("gr-1"), Some("2"))
            .await
            .unwrap();
        assert_eq!(result.message, "Guardrail updated successfully");
        assert_eq!(
            result.current_guardrail,
            Some(GuardrailRef {
                id: "gr-1".to_string(),
                version: "2".to_string()
            })
        );

        let update = &control.updates.lock().unwrap()[0];
        assert_eq!(update.agent_name.as_deref(), Some("helper"));
        assert_eq!(update.instruction.as_deref(), Some("be helpful"));
        assert_eq!(
            update.guardrail_configuration.as_ref().unwrap().guardrail_version.as_deref(),
            Some("2")
        );
        assert_eq!(*control.prepared.lock().unwrap(), vec!["agent-1".to_string()]);
    }

    #[tokio::test]
    async fn test_update_removes_guardrail_despite_prepare_failure() {
        let mut control = FakeControl {
            fail_prepare: true,
            ..FakeControl::default()
        };
        control.agents.insert("agent-1".to_string(), agent(Some(("gr-1", None))));
        let (manager, control) = manager(control);

        let result = manager.update(Some("agent-1"), Some(""), None).await.unwrap();
        assert_eq!(result.message, "Guardrail removed successfully");
        assert!(result.current_guardrail.is_none());

        let update = &control.updates.lock().unwrap()[0];
        assert!(update.guardrail_configuration.is_none());
        let json = serde_json::to_value(update).unwrap();
        assert!(json.get("guardrailConfiguration").is_none());
    }

    #[tokio::test]
    async fn test_update_rejections() {
        let mut control = FakeControl::default();
        control.agents.insert("agent-1".to_string(), agent(None));
        let (manager, control) = manager(control);

        let err = manager.update(None, Some("gr-1"), None).await.unwrap_err();
        assert!(matches!(err, GuardrailError::MissingAgentId));
        assert_eq!(ApiError::from(err).status(), axum::http::StatusCode::BAD_REQUEST);

        let err = manager.update(Some("ghost"), None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Agent ghost not found");

        let err = manager.update(Some("agent-1"), Some("gr-x"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Guardrail gr-x not found");

        assert!(control.updates.lock().unwrap().is_empty());
    }
}
