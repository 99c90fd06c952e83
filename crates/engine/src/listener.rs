//! The single long-running consumer of the result queue.
//!
//! Each received message is decoded, routed to its job's assembler and
//! merged. A merge that completes the job triggers finalization (writing
//! the output grid to storage) before the message is acknowledged, so a
//! crash at any point leads to redelivery rather than a lost tile.

use std::sync::Arc;
use std::time::Duration;

use analyst_cluster::backoff::{Backoff, BackoffConfig};
use analyst_cluster::queue::{QueueMessage, ResultQueue};
use analyst_cluster::storage::BlobStorage;
use analyst_core::job::output_key;
use analyst_core::tile::TileResult;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assembler::{JobAssembler, MergeOutcome};
use crate::config::EngineConfig;
use crate::events::{JobEvent, JobEventBus};
use crate::registry::JobRegistry;

/// Queue polling and finalization settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub batch_size: usize,
    pub wait: Duration,
    pub finalize_attempts: u32,
    pub backoff: BackoffConfig,
}

impl From<&EngineConfig> for ListenerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.result_batch_size,
            wait: config.result_wait,
            finalize_attempts: config.finalize_attempts,
            backoff: config.backoff.clone(),
        }
    }
}

/// What happened to one queue message. Every outcome is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// The body was not a tile result.
    Malformed,
    /// No registered job has this id.
    UnknownJob,
    /// The tile was merged and the job is still running.
    Applied,
    /// Duplicate, out of bounds or for a finished job; nothing changed.
    Ignored,
    /// The tile failed the job.
    JobFailed,
    /// The tile completed the job and the output grid was stored.
    Finalized,
    /// The tile completed the job but the output grid could not be stored.
    FinalizeFailed,
}

pub struct ResultListener {
    queue: Arc<dyn ResultQueue>,
    storage: Arc<dyn BlobStorage>,
    registry: Arc<JobRegistry>,
    events: Arc<JobEventBus>,
    config: ListenerConfig,
}

impl ResultListener {
    pub fn new(
        queue: Arc<dyn ResultQueue>,
        storage: Arc<dyn BlobStorage>,
        registry: Arc<JobRegistry>,
        events: Arc<JobEventBus>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            queue,
            storage,
            registry,
            events,
            config,
        }
    }

    /// Run [`run`](Self::run) on a new task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Drain the result queue until `cancel` is triggered.
    ///
    /// Failed reads are retried with exponential backoff and never end the
    /// loop.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(queue = %self.queue.address(), "Result listener started");
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(self.config.batch_size, self.config.wait) => received,
            };

            match received {
                Ok(messages) => {
                    backoff.reset();
                    for message in messages {
                        self.handle_message(&message).await;
                        self.acknowledge(&message).await;
                    }
                }
                Err(e) => {
                    let delay = backoff.next_wait();
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to read result queue",
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!("Result listener stopped");
    }

    /// Decode, route and merge one message. Does not acknowledge it.
    pub async fn handle_message(&self, message: &QueueMessage) -> Handled {
        let result: TileResult = match serde_json::from_str(&message.body) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed tile result");
                return Handled::Malformed;
            }
        };

        let Some(assembler) = self.registry.get(result.job_id).await else {
            tracing::debug!(
                job_id = %result.job_id,
                x = result.x,
                y = result.y,
                "Dropping result for unknown job",
            );
            return Handled::UnknownJob;
        };

        match assembler.merge(&result) {
            MergeOutcome::Applied { complete, total } => {
                tracing::debug!(job_id = %result.job_id, complete, total, "Tile merged");
                Handled::Applied
            }
            MergeOutcome::Completed { output } => self.finalize(&assembler, output).await,
            MergeOutcome::Failed { reason } => {
                tracing::error!(job_id = %result.job_id, reason = %reason, "Regional analysis failed");
                self.events.publish(JobEvent::Failed {
                    job_id: result.job_id,
                    reason,
                });
                Handled::JobFailed
            }
            MergeOutcome::Duplicate => {
                tracing::debug!(job_id = %result.job_id, x = result.x, y = result.y, "Duplicate tile");
                Handled::Ignored
            }
            MergeOutcome::OutOfBounds | MergeOutcome::Misrouted => {
                tracing::warn!(
                    job_id = %result.job_id,
                    x = result.x,
                    y = result.y,
                    "Tile outside the job's grid",
                );
                Handled::Ignored
            }
            MergeOutcome::Closed(state) => {
                tracing::debug!(job_id = %result.job_id, state = ?state, "Result for finished job");
                Handled::Ignored
            }
        }
    }

    /// Write a completed job's output grid, retrying with backoff.
    async fn finalize(&self, assembler: &JobAssembler, output: Vec<u8>) -> Handled {
        let job_id = assembler.job_id();
        let key = output_key(job_id);
        let mut backoff = Backoff::new(self.config.backoff.clone());
        let mut attempt = 1;

        loop {
            match self.storage.put(&key, output.clone()).await {
                Ok(()) => {
                    assembler.record_output(key.clone());
                    tracing::info!(
                        job_id = %job_id,
                        key = %key,
                        bytes = output.len(),
                        "Regional analysis complete",
                    );
                    self.events.publish(JobEvent::Completed {
                        job_id,
                        output_key: key,
                    });
                    return Handled::Finalized;
                }
                Err(e) if attempt < self.config.finalize_attempts => {
                    let delay = backoff.next_wait();
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        error = %e,
                        "Failed to store output grid, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let reason = format!("failed to store output: {e}");
                    tracing::error!(job_id = %job_id, attempts = attempt, error = %e, "Giving up on output grid");
                    assembler.record_output_failure(reason.clone());
                    self.events.publish(JobEvent::Failed { job_id, reason });
                    return Handled::FinalizeFailed;
                }
            }
        }
    }

    async fn acknowledge(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.acknowledge(&message.receipt).await {
            tracing::warn!(error = %e, "Failed to acknowledge result; it may be redelivered");
        }
    }
}
