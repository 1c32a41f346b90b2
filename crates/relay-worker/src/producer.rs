//! Session producer loop.
//!
//! Pushes a fixed mixture of sends into a named session per iteration: one
//! single message, a small list of individual messages, and a greedily
//! packed size-bounded batch. With the shutdown flag set it instead sends
//! exactly one sentinel message and stops, which a session consumer
//! interprets as the end of the stream.
//!
//! Batch-capacity overflow while packing is expected and recoverable: the
//! packer stops and ships the partial batch. Broker-level send failures
//! propagate to the caller.

use relay_runtime::{Message, QueueClient, QueueError, QueueName, SessionId};
use tracing::{debug, info};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`SessionProducer`]
#[derive(Debug, Clone)]
pub struct SessionProducerConfig {
    /// Session every message is addressed to
    pub session_id: SessionId,
    /// Send one sentinel message and stop instead of producing work
    pub shutdown: bool,
    /// Messages sent as an individual list per iteration
    pub list_size: usize,
    /// Messages offered to the batch packer per iteration
    pub batch_fill: usize,
    /// Pause between iterations
    pub idle_delay: std::time::Duration,
    /// Iterations to run; `None` produces until cancelled
    pub iterations: Option<u32>,
    /// Payload carried by the shutdown sentinel
    pub sentinel: String,
    /// Payload for work messages
    pub payload: String,
}

impl SessionProducerConfig {
    /// Configuration producing work messages into `session_id`
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            shutdown: false,
            list_size: 10,
            batch_fill: 10,
            idle_delay: std::time::Duration::from_secs(10),
            iterations: None,
            sentinel: crate::DEFAULT_SENTINEL.to_string(),
            payload: "session work message".to_string(),
        }
    }

    /// Configuration sending only the shutdown sentinel
    pub fn shutdown_only(session_id: SessionId) -> Self {
        Self {
            shutdown: true,
            ..Self::new(session_id)
        }
    }
}

/// Outcome of a completed producer loop
#[derive(Debug, Clone, Default)]
pub struct ProducerReport {
    /// Iterations of the work-sending loop that ran
    pub iterations: u32,
    /// Messages sent through the single-send phase
    pub singles: u64,
    /// Messages sent through the list phase
    pub listed: u64,
    /// Messages sent through the batch phase
    pub batched: u64,
    /// Whether the sentinel was sent
    pub sentinel_sent: bool,
}

impl ProducerReport {
    /// Total messages the consumer side will observe
    pub fn total_sent(&self) -> u64 {
        let sentinel = if self.sentinel_sent { 1 } else { 0 };
        self.singles + self.listed + self.batched + sentinel
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Pushes work messages (or a one-shot sentinel) into a session
pub struct SessionProducer {
    config: SessionProducerConfig,
}

impl SessionProducer {
    /// Create a producer with the given configuration
    pub fn new(config: SessionProducerConfig) -> Self {
        Self { config }
    }

    /// Run the loop against a queue client.
    ///
    /// # Errors
    ///
    /// Broker-level send failures (throttling, connection loss) propagate
    /// unchanged; the loop performs no internal retries.
    pub async fn run(
        &self,
        client: &dyn QueueClient,
        queue: &QueueName,
    ) -> Result<ProducerReport, QueueError> {
        let mut report = ProducerReport::default();
        let session_id = &self.config.session_id;

        if self.config.shutdown {
            info!(
                session_id = %session_id,
                queue = %queue,
                sentinel = %self.config.sentinel,
                "sending shutdown sentinel"
            );
            client
                .send_message(queue, self.sentinel_message())
                .await?;
            report.sentinel_sent = true;
            return Ok(report);
        }

        loop {
            if let Some(limit) = self.config.iterations {
                if report.iterations >= limit {
                    break;
                }
            }
            report.iterations += 1;

            info!(
                session_id = %session_id,
                queue = %queue,
                iteration = report.iterations,
                "sending work messages"
            );

            // Phase 1: a single message.
            client.send_message(queue, self.work_message()).await?;
            report.singles += 1;

            // Phase 2: a list of individual messages.
            let list: Vec<Message> = (0..self.config.list_size)
                .map(|_| self.work_message())
                .collect();
            report.listed += list.len() as u64;
            client.send_messages(queue, list).await?;

            // Phase 3: a size-bounded batch, packed greedily.
            let mut batch = client.create_batch();
            for offered in 0..self.config.batch_fill {
                if let Err(overflow) = batch.try_add(self.work_message()) {
                    // Capacity reached; ship what fits.
                    debug!(
                        session_id = %session_id,
                        packed = batch.len(),
                        offered,
                        attempted_bytes = overflow.attempted,
                        "batch capacity reached"
                    );
                    break;
                }
            }
            report.batched += batch.len() as u64;
            client.send_batch(queue, batch).await?;

            let keep_going = self
                .config
                .iterations
                .map_or(true, |limit| report.iterations < limit);
            if keep_going {
                debug!(
                    session_id = %session_id,
                    delay = ?self.config.idle_delay,
                    "idling before next iteration"
                );
                tokio::time::sleep(self.config.idle_delay).await;
            }
        }

        Ok(report)
    }

    fn work_message(&self) -> Message {
        Message::from_text(&self.config.payload).with_session_id(self.config.session_id.clone())
    }

    fn sentinel_message(&self) -> Message {
        Message::from_text(&self.config.sentinel).with_session_id(self.config.session_id.clone())
    }
}
