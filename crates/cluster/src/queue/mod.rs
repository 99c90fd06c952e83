//! Result queue the workers post finished tiles to.
//!
//! Delivery is at-least-once: a message stays on the queue until it is
//! acknowledged, and may be delivered again if the consumer dies before
//! acknowledging. Consumers must be idempotent per `(job id, x, y)`.

use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod sqs;

pub use memory::MemoryResultQueue;
pub use sqs::SqsResultQueue;

/// One undecoded message received from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Opaque handle used to acknowledge this delivery.
    pub receipt: String,
    /// Raw JSON body, expected to decode as a `TileResult`.
    pub body: String,
}

/// Errors from reading or acknowledging queue messages.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to receive messages: {0}")]
    Receive(String),

    #[error("Failed to acknowledge message: {0}")]
    Acknowledge(String),

    #[error("Failed to resolve queue: {0}")]
    Resolve(String),
}

#[async_trait]
pub trait ResultQueue: Send + Sync {
    /// Address embedded in tile requests so workers know where to post.
    fn address(&self) -> &str;

    /// Wait up to `wait` for at least one message and return at most `max`.
    ///
    /// An empty vector means the wait elapsed with nothing available.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a delivered message from the queue for good.
    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError>;
}
