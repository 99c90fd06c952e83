//! In-process result queue.
//!
//! Used in offline mode, where a locally-run worker posts results to the
//! HTTP result sink, and in tests. Delivered messages stay in flight until
//! acknowledged and can be put back with
//! [`MemoryResultQueue::redeliver_unacknowledged`] to simulate a consumer
//! crash.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use analyst_core::tile::TileResult;
use async_trait::async_trait;
use tokio::sync::Notify;

use super::{QueueError, QueueMessage, ResultQueue};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    in_flight: HashMap<String, String>,
    next_receipt: u64,
}

pub struct MemoryResultQueue {
    address: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryResultQueue {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a tile result as a worker would.
    pub fn push(&self, result: &TileResult) -> Result<(), serde_json::Error> {
        let body = serde_json::to_string(result)?;
        self.push_raw(body);
        Ok(())
    }

    /// Enqueue an arbitrary message body.
    pub fn push_raw(&self, body: impl Into<String>) {
        self.lock().pending.push_back(body.into());
        self.notify.notify_one();
    }

    /// Messages waiting to be received.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Messages received but not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Put every unacknowledged message back at the front of the queue.
    ///
    /// Returns how many messages were returned.
    pub fn redeliver_unacknowledged(&self) -> usize {
        let count = {
            let mut state = self.lock();
            let mut returned: Vec<(String, String)> = state.in_flight.drain().collect();
            returned.sort();
            let count = returned.len();
            for (_, body) in returned.into_iter().rev() {
                state.pending.push_front(body);
            }
            count
        };
        if count > 0 {
            self.notify.notify_one();
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_batch(&self, max: usize) -> Vec<QueueMessage> {
        let mut state = self.lock();
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(body) = state.pending.pop_front() else {
                break;
            };
            state.next_receipt += 1;
            let receipt = format!("{:020}", state.next_receipt);
            state.in_flight.insert(receipt.clone(), body.clone());
            batch.push(QueueMessage { receipt, body });
        }
        batch
    }
}

#[async_trait]
impl ResultQueue for MemoryResultQueue {
    fn address(&self) -> &str {
        &self.address
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let batch = self.take_batch(max.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }
            // notify_one stores a permit, so a push between the check above
            // and this await is not lost.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        match self.lock().in_flight.remove(receipt) {
            Some(_) => Ok(()),
            None => Err(QueueError::Acknowledge(format!(
                "unknown receipt {receipt}"
            ))),
        }
    }
}
