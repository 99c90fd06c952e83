//! Result queue backed by Amazon SQS.
//!
//! Messages are received with long polling and deleted on acknowledge, so
//! a message that is never acknowledged reappears after the queue's
//! visibility timeout.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::Client;

use super::{QueueError, QueueMessage, ResultQueue};

/// SQS caps a single receive at ten messages.
const MAX_MESSAGES_PER_RECEIVE: usize = 10;

/// SQS caps long polling at twenty seconds.
const MAX_WAIT_SECS: u64 = 20;

pub struct SqsResultQueue {
    client: Client,
    queue_url: String,
}

impl SqsResultQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Look up the URL of the queue named `queue_name` and build a consumer
    /// for it.
    pub async fn from_name(client: Client, queue_name: &str) -> Result<Self, QueueError> {
        let output = client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| QueueError::Resolve(e.to_string()))?;

        let queue_url = output
            .queue_url()
            .ok_or_else(|| QueueError::Resolve(format!("no URL returned for {queue_name}")))?
            .to_string();

        tracing::info!(queue_name, queue_url = %queue_url, "Resolved results queue");
        Ok(Self::new(client, queue_url))
    }
}

#[async_trait]
impl ResultQueue for SqsResultQueue {
    fn address(&self) -> &str {
        &self.queue_url
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let max = max.clamp(1, MAX_MESSAGES_PER_RECEIVE) as i32;
        let wait_secs = wait.as_secs().min(MAX_WAIT_SECS) as i32;

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .wait_time_seconds(wait_secs)
            .send()
            .await
            .map_err(|e| QueueError::Receive(e.to_string()))?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|message| {
                let receipt = message.receipt_handle()?.to_string();
                let body = message.body().unwrap_or_default().to_string();
                Some(QueueMessage { receipt, body })
            })
            .collect();

        Ok(messages)
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::Acknowledge(e.to_string()))?;
        Ok(())
    }
}
