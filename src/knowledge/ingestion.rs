//! Ingestion job tracking.
//!
//! [`IngestionPoller`] watches one job until it reaches a terminal status or
//! the wait budget runs out. Time is read and slept through a [`Clock`] so
//! the loop can be driven without real waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::IngestionConfig;
use crate::error::ServiceError;
use crate::service::{IngestionControl, IngestionJob, IngestionStatus};
use crate::telemetry::{self, names};

pub const SYNC_DESCRIPTION: &str = "Ingestion job triggered by deployment";

/// Source of elapsed time and sleeps for the poller.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Terminal result of waiting on a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    Completed,
    /// The job ended in `FAILED` or `STOPPED`.
    Failed { status: IngestionStatus },
    /// The job was still running when the wait budget ran out.
    TimedOut,
}

pub struct IngestionPoller {
    control: Arc<dyn IngestionControl>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl std::fmt::Debug for IngestionPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPoller")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl IngestionPoller {
    pub fn new(control: Arc<dyn IngestionControl>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            control,
            clock,
            interval,
        }
    }

    /// Poll until the job completes, fails, stops, or `max_wait` elapses.
    pub async fn await_completion(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        job_id: &str,
        max_wait: Duration,
    ) -> Result<IngestionOutcome, ServiceError> {
        let started = self.clock.now();

        while self.clock.now().duration_since(started) < max_wait {
            let job = self
                .control
                .get_ingestion_job(knowledge_base_id, data_source_id, job_id)
                .await?;
            info!(job_id, status = %job.status, "Ingestion job status");

            match job.status {
                IngestionStatus::Complete => return Ok(IngestionOutcome::Completed),
                status @ (IngestionStatus::Failed | IngestionStatus::Stopped) => {
                    if !job.failure_reasons.is_empty() {
                        warn!(job_id, reasons = ?job.failure_reasons, "Ingestion job failure reasons");
                    }
                    return Ok(IngestionOutcome::Failed { status });
                }
                _ => self.clock.sleep(self.interval).await,
            }
        }

        Ok(IngestionOutcome::TimedOut)
    }
}

/// Starts an ingestion job for a knowledge base and waits for it.
pub struct KnowledgeBaseSync {
    control: Arc<dyn IngestionControl>,
    poller: IngestionPoller,
    max_wait: Duration,
}

impl std::fmt::Debug for KnowledgeBaseSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBaseSync")
            .field("poller", &self.poller)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

impl KnowledgeBaseSync {
    pub fn new(
        control: Arc<dyn IngestionControl>,
        clock: Arc<dyn Clock>,
        settings: &IngestionConfig,
    ) -> Self {
        Self {
            poller: IngestionPoller::new(
                Arc::clone(&control),
                clock,
                Duration::from_secs(settings.poll_interval_secs),
            ),
            control,
            max_wait: Duration::from_secs(settings.max_wait_secs),
        }
    }

    pub async fn sync(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> Result<IngestionOutcome, ServiceError> {
        info!(knowledge_base_id, data_source_id, "Starting ingestion job");
        let job: IngestionJob = self
            .control
            .start_ingestion_job(knowledge_base_id, data_source_id, SYNC_DESCRIPTION)
            .await
            .inspect_err(|e| {
                telemetry::count(names::INGESTION_JOB_CLIENT_ERROR);
                warn!(error = %e, "Failed to start ingestion job");
            })?;
        telemetry::count(names::INGESTION_JOB_STARTED);
        info!(job_id = %job.ingestion_job_id, "Started ingestion job");

        let outcome = self
            .poller
            .await_completion(
                knowledge_base_id,
                data_source_id,
                &job.ingestion_job_id,
                self.max_wait,
            )
            .await
            .inspect_err(|e| {
                telemetry::count(names::INGESTION_JOB_CLIENT_ERROR);
                warn!(job_id = %job.ingestion_job_id, error = %e, "Failed to poll ingestion job");
            })?;

        match &outcome {
            IngestionOutcome::Completed => {
                telemetry::count(names::INGESTION_JOB_COMPLETED);
                info!(job_id = %job.ingestion_job_id, "Ingestion job completed");
            }
            IngestionOutcome::Failed { status } => {
                telemetry::count(names::INGESTION_JOB_FAILED);
                warn!(job_id = %job.ingestion_job_id, %status, "Ingestion job failed");
            }
            IngestionOutcome::TimedOut => {
                telemetry::count(names::INGESTION_JOB_TIMEOUT);
                warn!(
                    job_id = %job.ingestion_job_id,
                    max_wait_secs = self.max_wait.as_secs(),
                    "Ingestion job did not finish in time"
                );
            }
        }

        Ok(outcome)
    }
}
