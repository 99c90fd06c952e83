//! Periodic eviction of finished jobs and failing of stalled ones.
//!
//! Spawns nothing itself; [`run`] is the body of a background task started
//! by the manager. Each tick calls [`JobRegistry::sweep`] and publishes an
//! event for every job it touched.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{JobEvent, JobEventBus};
use crate::registry::{JobRegistry, SweepPolicy, SweepReport};

/// Run the retention sweep every `interval` until `cancel` is triggered.
pub async fn run(
    registry: Arc<JobRegistry>,
    events: Arc<JobEventBus>,
    policy: SweepPolicy,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = policy.retention.as_secs(),
        stall_timeout_secs = policy.stall_timeout.map(|d| d.as_secs()),
        interval_secs = interval.as_secs(),
        "Retention sweeper started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                sweep_once(&registry, &events, &policy).await;
            }
        }
    }
}

/// Sweep once as of now and publish the resulting events.
pub async fn sweep_once(
    registry: &JobRegistry,
    events: &JobEventBus,
    policy: &SweepPolicy,
) -> SweepReport {
    let report = registry.sweep(Instant::now(), policy).await;

    for &job_id in &report.stalled {
        let reason = registry
            .get(job_id)
            .await
            .and_then(|assembler| assembler.status().error)
            .unwrap_or_else(|| "stalled".to_string());
        tracing::warn!(job_id = %job_id, reason = %reason, "Failed stalled regional analysis");
        events.publish(JobEvent::Failed { job_id, reason });
    }
    for &job_id in &report.evicted {
        events.publish(JobEvent::Evicted { job_id });
    }

    if report.evicted.is_empty() && report.stalled.is_empty() {
        tracing::debug!("Retention sweep: nothing to do");
    } else {
        tracing::info!(
            evicted = report.evicted.len(),
            stalled = report.stalled.len(),
            "Retention sweep finished"
        );
    }
    report
}
