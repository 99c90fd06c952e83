use std::sync::Arc;

use analyst_core::error::CoreError;
use analyst_core::job::JobStatus;
use analyst_core::types::JobId;

use crate::registry::JobRegistry;

/// Read-only view of job progress for callers.
#[derive(Clone)]
pub struct StatusReporter {
    registry: Arc<JobRegistry>,
}

impl StatusReporter {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Progress of one job.
    ///
    /// Fails with [`CoreError::NotFound`] for ids that were never submitted
    /// or have already been evicted.
    pub async fn status(&self, job_id: JobId) -> Result<JobStatus, CoreError> {
        self.registry
            .get(job_id)
            .await
            .map(|assembler| assembler.status())
            .ok_or_else(|| CoreError::NotFound {
                entity: "Regional analysis",
                id: job_id.to_string(),
            })
    }

    /// Progress of every registered job, oldest first.
    pub async fn list(&self) -> Vec<JobStatus> {
        self.registry.statuses().await
    }
}
