//! Accepts regional analysis submissions and ships their tiles to the
//! broker.
//!
//! [`JobSubmitter::submit`] does everything that can fail fast on the
//! caller's task: validation, id generation, registration and a
//! non-blocking enqueue. Document lookups, scenario upload, partitioning
//! and the broker call run on a small pool of worker tasks draining a
//! bounded channel, so callers never wait on network I/O.

use std::sync::{Arc, Mutex};

use analyst_cluster::broker::{BrokerClient, BrokerError};
use analyst_cluster::documents::{DocumentError, DocumentStore};
use analyst_cluster::storage::BlobStorage;
use analyst_core::error::CoreError;
use analyst_core::job::scenario_key;
use analyst_core::partition::{grid_key, partition, TileContext};
use analyst_core::regional::{ProfileRequest, RegionalAnalysis};
use analyst_core::types::JobId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::assembler::JobAssembler;
use crate::config::EngineConfig;
use crate::events::{JobEvent, JobEventBus};
use crate::registry::JobRegistry;

/// Why a submission was refused.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Submission queue is full ({capacity} pending); retry later")]
    Backpressure { capacity: usize },

    #[error("Submitter is shutting down")]
    ShuttingDown,
}

/// External services the background workers talk to.
#[derive(Clone)]
pub struct SubmitterDeps {
    pub broker: Arc<dyn BrokerClient>,
    pub storage: Arc<dyn BlobStorage>,
    pub documents: Arc<dyn DocumentStore>,
    /// Result queue address embedded in every tile request.
    pub output_queue: String,
}

/// Failures of the background half of a submission. Each one fails the job.
#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("Bundle {0} not found")]
    BundleNotFound(String),

    #[error("Project {0} not found")]
    ProjectNotFound(String),

    #[error(transparent)]
    Documents(#[from] DocumentError),

    #[error(transparent)]
    Partition(#[from] CoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// A registered job waiting for a worker.
struct Submission {
    analysis: RegionalAnalysis,
    assembler: Arc<JobAssembler>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Submission>>>;

pub struct JobSubmitter {
    sender: Mutex<Option<mpsc::Sender<Submission>>>,
    capacity: usize,
    registry: Arc<JobRegistry>,
    events: Arc<JobEventBus>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl JobSubmitter {
    /// Spawn `config.submit_workers` worker tasks and return the submitter
    /// feeding them.
    pub fn start(
        config: &EngineConfig,
        deps: SubmitterDeps,
        registry: Arc<JobRegistry>,
        events: Arc<JobEventBus>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.submit_queue_capacity);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..config.submit_workers)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let deps = deps.clone();
                let events = Arc::clone(&events);
                tokio::spawn(async move {
                    tracing::debug!(worker, "Submission worker started");
                    run_worker(&receiver, &deps, &events).await;
                    tracing::debug!(worker, "Submission worker exited");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            capacity: config.submit_queue_capacity,
            registry,
            events,
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    /// Register a job for `analysis` and queue it for dispatch.
    ///
    /// On success the job is immediately visible to status polls with
    /// `complete = 0`. On any error nothing stays registered.
    pub async fn submit(&self, analysis: RegionalAnalysis) -> Result<JobId, SubmitError> {
        analysis.validate()?;

        let job_id = JobId::now_v7();
        let assembler = Arc::new(JobAssembler::new(job_id, &analysis)?);
        let total = assembler.total();
        self.registry.register(Arc::clone(&assembler)).await?;

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(sender) = sender else {
            self.registry.remove(job_id).await;
            return Err(SubmitError::ShuttingDown);
        };

        let name = analysis.name.clone().unwrap_or_default();
        // Reserve the slot first so `Registered` goes out before any worker
        // can see the job.
        let result = match sender.try_reserve() {
            Ok(permit) => {
                tracing::info!(job_id = %job_id, name = %name, total, "Regional analysis submitted");
                self.events.publish(JobEvent::Registered { job_id, total });
                permit.send(Submission {
                    analysis,
                    assembler,
                });
                Ok(job_id)
            }
            Err(TrySendError::Full(_)) => {
                self.registry.remove(job_id).await;
                tracing::warn!(
                    job_id = %job_id,
                    capacity = self.capacity,
                    "Submission queue full, rejecting regional analysis",
                );
                Err(SubmitError::Backpressure {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.registry.remove(job_id).await;
                Err(SubmitError::ShuttingDown)
            }
        };
        result
    }

    /// Stop accepting submissions, let the workers drain what is queued and
    /// wait for them to exit.
    pub async fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Submission worker panicked");
            }
        }
        tracing::info!("Job submitter shut down");
    }
}

// ---------------------------------------------------------------------------
// Background half
// ---------------------------------------------------------------------------

async fn run_worker(receiver: &SharedReceiver, deps: &SubmitterDeps, events: &JobEventBus) {
    loop {
        // Hold the receiver lock only while waiting, not while dispatching.
        let next = receiver.lock().await.recv().await;
        let Some(submission) = next else {
            return;
        };

        let job_id = submission.assembler.job_id();
        match dispatch(deps, &submission).await {
            Ok(0) => {}
            Ok(tiles) => {
                tracing::info!(job_id = %job_id, tiles, "Tiles dispatched to broker");
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(job_id = %job_id, error = %reason, "Failed to dispatch regional analysis");
                if submission.assembler.fail(reason.clone()) {
                    events.publish(JobEvent::Failed { job_id, reason });
                }
            }
        }
    }
}

/// Resolve, partition and hand one job to the broker. Returns the number of
/// tiles dispatched.
async fn dispatch(deps: &SubmitterDeps, submission: &Submission) -> Result<usize, DispatchError> {
    let analysis = &submission.analysis;
    let job_id = submission.assembler.job_id();

    let bundle = deps
        .documents
        .bundle(&analysis.bundle_id)
        .await?
        .ok_or_else(|| DispatchError::BundleNotFound(analysis.bundle_id.clone()))?;
    let project = deps
        .documents
        .project(&bundle.project_id)
        .await?
        .ok_or_else(|| DispatchError::ProjectNotFound(bundle.project_id.clone()))?;

    let request = share_scenario(deps.storage.as_ref(), job_id, analysis).await;
    let context = TileContext {
        job_id,
        output_queue: deps.output_queue.clone(),
        grid_key: grid_key(&project.id, &analysis.grid),
        request,
    };
    let tiles = partition(analysis, &context)?;

    if submission.assembler.state().is_terminal() {
        tracing::warn!(job_id = %job_id, "Job finished before dispatch, skipping broker");
        return Ok(0);
    }

    deps.broker.dispatch(job_id, &tiles).await?;
    Ok(tiles.len())
}

/// Upload the scenario so tiles can reference it by id.
///
/// Falls back to the inline request if the upload fails; workers accept
/// either form.
async fn share_scenario(
    storage: &dyn BlobStorage,
    job_id: JobId,
    analysis: &RegionalAnalysis,
) -> ProfileRequest {
    let Ok(scenario) = analysis.scenario() else {
        return analysis.request.clone();
    };
    let key = scenario_key(&analysis.bundle_id, &scenario.id);

    let bytes = match serde_json::to_vec(scenario) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to serialize scenario, sending inline");
            return analysis.request.clone();
        }
    };

    match storage.put(&key, bytes).await {
        Ok(()) => {
            tracing::debug!(job_id = %job_id, key = %key, "Scenario stored");
            analysis.request.with_scenario_reference()
        }
        Err(e) => {
            tracing::warn!(job_id = %job_id, key = %key, error = %e, "Failed to store scenario, sending inline");
            analysis.request.clone()
        }
    }
}
