//! Entry point tying the engine together.
//!
//! [`RegionalAnalysisManager`] owns the registry, event bus and submitter
//! pool, and runs the result listener and retention sweeper as background
//! tasks. Create it once at startup with [`RegionalAnalysisManager::start`];
//! the returned `Arc` is cheap to clone into request handlers.

use std::sync::Arc;
use std::time::Duration;

use analyst_cluster::broker::BrokerClient;
use analyst_cluster::documents::DocumentStore;
use analyst_cluster::queue::ResultQueue;
use analyst_cluster::storage::BlobStorage;
use analyst_core::error::CoreError;
use analyst_core::job::JobStatus;
use analyst_core::regional::RegionalAnalysis;
use analyst_core::types::JobId;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::events::{JobEvent, JobEventBus};
use crate::listener::{ListenerConfig, ResultListener};
use crate::registry::{JobRegistry, SweepPolicy};
use crate::retention;
use crate::status::StatusReporter;
use crate::submitter::{JobSubmitter, SubmitError, SubmitterDeps};

/// How long shutdown waits for each background task.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// External services the engine runs against.
#[derive(Clone)]
pub struct ManagerDeps {
    pub broker: Arc<dyn BrokerClient>,
    pub queue: Arc<dyn ResultQueue>,
    /// Where scenarios are shared with the workers.
    pub bundle_storage: Arc<dyn BlobStorage>,
    /// Where finished output grids are written.
    pub result_storage: Arc<dyn BlobStorage>,
    pub documents: Arc<dyn DocumentStore>,
}

pub struct RegionalAnalysisManager {
    registry: Arc<JobRegistry>,
    events: Arc<JobEventBus>,
    submitter: JobSubmitter,
    status: StatusReporter,
    cancel: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl RegionalAnalysisManager {
    /// Start the submitter pool, the result listener and the retention
    /// sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: EngineConfig, deps: ManagerDeps) -> Arc<Self> {
        let registry = Arc::new(JobRegistry::new());
        let events = Arc::new(JobEventBus::default());
        let cancel = CancellationToken::new();

        let submitter = JobSubmitter::start(
            &config,
            SubmitterDeps {
                broker: deps.broker,
                storage: deps.bundle_storage,
                documents: deps.documents,
                output_queue: deps.queue.address().to_string(),
            },
            Arc::clone(&registry),
            Arc::clone(&events),
        );

        let listener = ResultListener::new(
            deps.queue,
            deps.result_storage,
            Arc::clone(&registry),
            Arc::clone(&events),
            ListenerConfig::from(&config),
        )
        .spawn(cancel.child_token());

        let sweeper = tokio::spawn(retention::run(
            Arc::clone(&registry),
            Arc::clone(&events),
            SweepPolicy {
                retention: config.retention,
                stall_timeout: config.stall_timeout,
            },
            config.sweep_interval,
            cancel.child_token(),
        ));

        tracing::info!(
            submit_workers = config.submit_workers,
            submit_queue_capacity = config.submit_queue_capacity,
            "Regional analysis manager started"
        );

        Arc::new(Self {
            status: StatusReporter::new(Arc::clone(&registry)),
            registry,
            events,
            submitter,
            cancel,
            tasks: Mutex::new(vec![("result listener", listener), ("retention sweeper", sweeper)]),
        })
    }

    /// Submit a regional analysis; see [`JobSubmitter::submit`].
    pub async fn submit(&self, analysis: RegionalAnalysis) -> Result<JobId, SubmitError> {
        self.submitter.submit(analysis).await
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatus, CoreError> {
        self.status.status(job_id).await
    }

    pub async fn list(&self) -> Vec<JobStatus> {
        self.status.list().await
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Stop accepting submissions, drain the submitter and stop the
    /// background tasks.
    ///
    /// Waits up to 5 seconds per background task for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down regional analysis manager");
        self.submitter.shutdown().await;
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        for (name, handle) in tasks.drain(..) {
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Background task panicked"),
                Err(_) => tracing::warn!(task = name, "Background task did not stop in time"),
            }
        }

        tracing::info!("Regional analysis manager shut down complete");
    }
}

#[cfg(test)]
mod tests {
    use analyst_cluster::queue::MemoryResultQueue;
    use analyst_cluster::storage::MemoryStorage;
    use analyst_core::access_grid;
    use analyst_core::job::JobState;
    use analyst_core::tile::TileResult;
    use assert_matches::assert_matches;

    use super::*;
    use crate::testing::{eventually, sample_analysis, sample_documents, RecordingBroker};

    struct Harness {
        manager: Arc<RegionalAnalysisManager>,
        broker: Arc<RecordingBroker>,
        queue: Arc<MemoryResultQueue>,
        storage: Arc<MemoryStorage>,
    }

    async fn harness() -> Harness {
        let broker = Arc::new(RecordingBroker::new());
        let queue = Arc::new(MemoryResultQueue::new("memory://results"));
        let storage = Arc::new(MemoryStorage::new());
        let config = EngineConfig {
            result_wait: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let manager = RegionalAnalysisManager::start(
            config,
            ManagerDeps {
                broker: Arc::clone(&broker) as Arc<dyn BrokerClient>,
                queue: Arc::clone(&queue) as Arc<dyn ResultQueue>,
                bundle_storage: Arc::clone(&storage) as Arc<dyn BlobStorage>,
                result_storage: Arc::clone(&storage) as Arc<dyn BlobStorage>,
                documents: sample_documents().await,
            },
        );
        Harness {
            manager,
            broker,
            queue,
            storage,
        }
    }

    #[tokio::test]
    async fn submitted_job_runs_to_completion() {
        let h = harness().await;
        let mut events = h.manager.subscribe();

        let job_id = h.manager.submit(sample_analysis(2, 2)).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            JobEvent::Registered { job_id, total: 4 }
        );
        eventually(|| async { h.broker.batches().len() == 1 }).await;

        // Workers answer out of order, one of them twice.
        let tiles = h.broker.batches().remove(0).1;
        assert_eq!(tiles[0].output_queue, "memory://results");
        for tile in tiles.iter().rev().chain(tiles.first()) {
            h.queue
                .push(&TileResult::values(job_id, tile.x, tile.y, vec![tile.x, tile.y]))
                .unwrap();
        }

        assert_matches!(events.recv().await.unwrap(), JobEvent::Completed { job_id: id, .. } if id == job_id);
        let status = h.manager.status(job_id).await.unwrap();
        assert_eq!((status.total, status.complete), (4, 4));
        assert_eq!(status.state, JobState::Complete);

        let grid = h
            .storage
            .get(status.output_key.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grid.len(), access_grid::HEADER_LEN + 4 * 2 * 4);

        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn status_of_unknown_job_is_not_found() {
        let h = harness().await;

        assert_matches!(
            h.manager.status(JobId::now_v7()).await,
            Err(CoreError::NotFound { .. })
        );
        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn list_reports_every_job() {
        let h = harness().await;
        let first = h.manager.submit(sample_analysis(1, 1)).await.unwrap();
        let second = h.manager.submit(sample_analysis(3, 1)).await.unwrap();

        let ids: Vec<JobId> = h.manager.list().await.iter().map(|s| s.job_id).collect();

        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first) && ids.contains(&second));
        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let h = harness().await;
        h.manager.shutdown().await;

        assert_matches!(
            h.manager.submit(sample_analysis(1, 1)).await,
            Err(SubmitError::ShuttingDown)
        );
        eventually(|| async { h.manager.registry().is_empty().await }).await;
    }
}
