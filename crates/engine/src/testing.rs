//! Shared fixtures for engine unit tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analyst_cluster::broker::{BrokerClient, BrokerError};
use analyst_cluster::documents::{Bundle, MemoryDocumentStore, Project};
use analyst_cluster::queue::{MemoryResultQueue, QueueError, QueueMessage, ResultQueue};
use analyst_cluster::storage::{BlobStorage, StorageError};
use analyst_core::regional::{ProfileRequest, RegionalAnalysis, Scenario};
use analyst_core::tile::TileRequest;
use analyst_core::types::JobId;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub(crate) const BUNDLE_ID: &str = "b1";
pub(crate) const PROJECT_ID: &str = "p1";

/// A valid definition over bundle [`BUNDLE_ID`].
pub(crate) fn sample_analysis(width: i32, height: i32) -> RegionalAnalysis {
    RegionalAnalysis {
        name: Some("test run".to_string()),
        bundle_id: BUNDLE_ID.to_string(),
        grid: "jobs".to_string(),
        worker_version: "v4.0.0".to_string(),
        north: 5_000,
        west: 3_000,
        width,
        height,
        zoom: 9,
        cutoff_minutes: 45,
        request: ProfileRequest {
            scenario: Some(Scenario {
                id: "s1".to_string(),
                modifications: vec![serde_json::json!({"type": "adjust-speed", "scale": 1.5})],
            }),
            scenario_id: None,
            extra: serde_json::Map::new(),
        },
    }
}

/// Documents holding bundle [`BUNDLE_ID`] in project [`PROJECT_ID`].
pub(crate) async fn sample_documents() -> Arc<MemoryDocumentStore> {
    let documents = MemoryDocumentStore::new();
    documents
        .insert_project(Project {
            id: PROJECT_ID.to_string(),
            name: "Test project".to_string(),
        })
        .await;
    documents
        .insert_bundle(Bundle {
            id: BUNDLE_ID.to_string(),
            project_id: PROJECT_ID.to_string(),
            name: "Test network".to_string(),
        })
        .await;
    Arc::new(documents)
}

/// Poll `check` until it returns true, panicking after two seconds.
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within 2s");
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Broker that records every batch it is handed.
#[derive(Default)]
pub(crate) struct RecordingBroker {
    batches: Mutex<Vec<(JobId, Vec<TileRequest>)>>,
    failure: Option<String>,
    gate: Option<Semaphore>,
    entered: AtomicUsize,
}

impl RecordingBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A broker that rejects every batch.
    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// A broker whose `dispatch` blocks until [`release`](Self::release)
    /// is called.
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub(crate) fn release(&self, batches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(batches);
        }
    }

    /// Number of `dispatch` calls started, including blocked ones.
    pub(crate) fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub(crate) fn batches(&self) -> Vec<(JobId, Vec<TileRequest>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    async fn dispatch(&self, job_id: JobId, tiles: &[TileRequest]) -> Result<(), BrokerError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| BrokerError::Unavailable(e.to_string()))?
                .forget();
        }
        if let Some(reason) = &self.failure {
            return Err(BrokerError::Unavailable(reason.clone()));
        }
        self.batches.lock().unwrap().push((job_id, tiles.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Result queue whose reads fail while failures are pending and otherwise
/// delegate to a [`MemoryResultQueue`]. Every read is timestamped.
pub(crate) struct FailingQueue {
    inner: MemoryResultQueue,
    remaining_failures: AtomicUsize,
    reads: Mutex<Vec<(Instant, bool)>>,
}

impl FailingQueue {
    pub(crate) fn new(failures: usize) -> Self {
        Self {
            inner: MemoryResultQueue::new("memory://results"),
            remaining_failures: AtomicUsize::new(failures),
            reads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn inner(&self) -> &MemoryResultQueue {
        &self.inner
    }

    /// Make the next `failures` reads fail.
    pub(crate) fn fail_next(&self, failures: usize) {
        self.remaining_failures.store(failures, Ordering::SeqCst);
    }

    /// Time between each failed read and the read that followed it.
    pub(crate) fn retry_delays(&self) -> Vec<Duration> {
        self.reads
            .lock()
            .unwrap()
            .windows(2)
            .filter(|pair| pair[0].1)
            .map(|pair| pair[1].0 - pair[0].0)
            .collect()
    }
}

#[async_trait]
impl ResultQueue for FailingQueue {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.reads.lock().unwrap().push((Instant::now(), failing));
        if failing {
            return Err(QueueError::Receive("connection reset".to_string()));
        }
        self.inner.receive(max, wait).await
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        self.inner.acknowledge(receipt).await
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Storage whose writes fail until `failures` writes have been attempted.
pub(crate) struct FlakyStorage {
    inner: analyst_cluster::storage::MemoryStorage,
    remaining_failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyStorage {
    pub(crate) fn new(failures: usize) -> Self {
        Self {
            inner: analyst_cluster::storage::MemoryStorage::new(),
            remaining_failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Storage where every write fails.
    pub(crate) fn broken() -> Self {
        Self::new(usize::MAX)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }
}

#[async_trait]
impl BlobStorage for FlakyStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.inner.put(key, bytes).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }
}
