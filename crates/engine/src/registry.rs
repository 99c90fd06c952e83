//! Lookup of live job assemblers by job id.
//!
//! Holds every job that has been submitted and not yet evicted. Readers
//! (status polls, the listener) take the read lock only long enough to
//! clone an `Arc<JobAssembler>`; merging happens outside the registry lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use analyst_core::error::CoreError;
use analyst_core::job::{JobState, JobStatus};
use analyst_core::types::JobId;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::assembler::JobAssembler;

/// When the sweeper evicts or fails jobs.
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// Terminal jobs older than this are evicted.
    pub retention: Duration,
    /// Active jobs without progress for this long are failed.
    pub stall_timeout: Option<Duration>,
}

/// Jobs touched by one sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub evicted: Vec<JobId>,
    pub stalled: Vec<JobId>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobAssembler>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an assembler. Fails with [`CoreError::Conflict`] if its id is
    /// already registered.
    pub async fn register(&self, assembler: Arc<JobAssembler>) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let job_id = assembler.job_id();
        if jobs.contains_key(&job_id) {
            return Err(CoreError::Conflict(format!(
                "Regional analysis {job_id} is already registered"
            )));
        }
        jobs.insert(job_id, assembler);
        Ok(())
    }

    pub async fn get(&self, job_id: JobId) -> Option<Arc<JobAssembler>> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn remove(&self, job_id: JobId) -> Option<Arc<JobAssembler>> {
        self.jobs.write().await.remove(&job_id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Number of registered jobs still in the `Active` state.
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|a| a.state() == JobState::Active)
            .count()
    }

    /// Status snapshots of every registered job, oldest first.
    pub async fn statuses(&self) -> Vec<JobStatus> {
        let assemblers: Vec<Arc<JobAssembler>> =
            self.jobs.read().await.values().cloned().collect();
        let mut statuses: Vec<JobStatus> = assemblers.iter().map(|a| a.status()).collect();
        statuses.sort_by_key(|s| (s.created_at, s.job_id));
        statuses
    }

    /// Fail stalled jobs and evict expired ones as of `now`.
    ///
    /// A job failed by this sweep is only evicted by a later one, once its
    /// retention has also elapsed.
    pub async fn sweep(&self, now: Instant, policy: &SweepPolicy) -> SweepReport {
        let mut report = SweepReport::default();
        let mut jobs = self.jobs.write().await;

        if let Some(stall_timeout) = policy.stall_timeout {
            for (job_id, assembler) in jobs.iter() {
                if assembler.state() != JobState::Active {
                    continue;
                }
                let idle = now.saturating_duration_since(assembler.last_progress());
                if idle >= stall_timeout
                    && assembler.fail(format!("no progress for {}s", idle.as_secs()))
                {
                    report.stalled.push(*job_id);
                }
            }
        }

        jobs.retain(|job_id, assembler| {
            let expired = assembler
                .finished_at()
                .is_some_and(|at| now.saturating_duration_since(at) >= policy.retention);
            if expired && !report.stalled.contains(job_id) {
                report.evicted.push(*job_id);
                return false;
            }
            true
        });

        report
    }
}
