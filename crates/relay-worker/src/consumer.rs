//! Session consumer loop.
//!
//! Drains a specific session as an explicit state machine: every received
//! message is settled through the configured [`SettlementPolicy`] and the
//! session lock is renewed before the next message is examined. A message
//! whose payload equals the shutdown sentinel terminates the loop after its
//! own settlement; session lifecycle is recorded in broker-persisted session
//! state markers.
//!
//! Broker failures are not retried here. Timeouts with zero messages are
//! ordinary idle iterations; everything else surfaces to the caller, and a
//! lost session lock is terminal for this loop instance.

use crate::settlement::SettlementPolicy;
use chrono::Duration;
use relay_runtime::{QueueError, SessionClient, SessionId};
use tracing::{debug, info};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// Session state markers written at lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMarkers {
    /// Written when the loop attaches to the session
    pub started: String,
    /// Written when the sentinel has been observed and settled
    pub closed: String,
    /// Written when the loop exits
    pub ended: String,
}

impl Default for SessionMarkers {
    fn default() -> Self {
        Self {
            started: "START".to_string(),
            closed: "CLOSED".to_string(),
            ended: "END".to_string(),
        }
    }
}

/// Configuration for a [`SessionConsumer`]
#[derive(Debug, Clone)]
pub struct SessionConsumerConfig {
    /// Messages requested per batch
    pub max_messages: u32,
    /// Wait budget per receive call
    pub max_wait: Duration,
    /// Consecutive empty receives after which the loop ends.
    ///
    /// `None` keeps the loop running until the sentinel arrives, which is
    /// the historical behavior of polling consumers against this broker.
    pub max_idle_batches: Option<u32>,
    /// Disposition applied to every received message
    pub settlement: SettlementPolicy,
    /// Payload that terminates the loop
    pub sentinel: String,
    /// Session state markers for lifecycle transitions
    pub markers: SessionMarkers,
}

impl Default for SessionConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            max_wait: Duration::seconds(300),
            max_idle_batches: None,
            settlement: SettlementPolicy::Complete,
            sentinel: crate::DEFAULT_SENTINEL.to_string(),
            markers: SessionMarkers::default(),
        }
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Phases of the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPhase {
    /// Attached to the session, start marker written
    Started,
    /// Receiving and settling batches
    Processing,
    /// Sentinel observed, its settlement finished
    SentinelSeen,
    /// Closed marker written, no further batches will be requested
    Closed,
    /// End marker written, loop complete
    Ended,
}

/// Outcome of a completed consumer loop
#[derive(Debug, Clone)]
pub struct ConsumerReport {
    /// Messages settled via the configured policy
    pub settled: u64,
    /// Whether the loop ended because of the sentinel
    pub sentinel_seen: bool,
    /// Empty receives observed over the loop's lifetime
    pub idle_batches: u32,
    /// Final phase, [`ConsumerPhase::Ended`] on every successful exit
    pub final_phase: ConsumerPhase,
}

// ============================================================================
// Consumer
// ============================================================================

/// Drains one session, settling every message and reacting to the sentinel
pub struct SessionConsumer {
    config: SessionConsumerConfig,
}

/// Record a phase transition, keeping the state machine observable
fn transition(phase: &mut ConsumerPhase, next: ConsumerPhase, session_id: &SessionId) {
    debug!(
        session_id = %session_id,
        from = ?phase,
        to = ?next,
        "consumer phase transition"
    );
    *phase = next;
}

impl SessionConsumer {
    /// Create a consumer with the given configuration
    pub fn new(config: SessionConsumerConfig) -> Self {
        Self { config }
    }

    /// Run the loop against an accepted session until the sentinel arrives,
    /// the idle bound is reached, or the broker fails.
    ///
    /// # Errors
    ///
    /// Broker communication failures propagate unchanged. In particular
    /// [`QueueError::SessionLockExpired`] means the session must be
    /// re-acquired before another loop instance can run.
    pub async fn run(&self, session: &dyn SessionClient) -> Result<ConsumerReport, QueueError> {
        let session_id = session.session_id().clone();
        let markers = &self.config.markers;

        session.set_state(markers.started.clone()).await?;
        let mut phase = ConsumerPhase::Started;
        info!(
            session_id = %session_id,
            marker = %markers.started,
            "session consumer started"
        );

        let mut settled: u64 = 0;
        let mut idle_batches: u32 = 0;
        let mut consecutive_idle: u32 = 0;

        transition(&mut phase, ConsumerPhase::Processing, &session_id);
        'receiving: loop {
            let state = session.get_state().await?;
            debug!(session_id = %session_id, session_state = ?state, "requesting batch");

            let batch = session
                .receive_messages(self.config.max_messages, self.config.max_wait)
                .await?;

            if batch.is_empty() {
                idle_batches += 1;
                consecutive_idle += 1;
                debug!(
                    session_id = %session_id,
                    consecutive_idle,
                    "no messages within wait budget"
                );
                if let Some(bound) = self.config.max_idle_batches {
                    if consecutive_idle >= bound {
                        info!(
                            session_id = %session_id,
                            idle_batches,
                            "idle bound reached, ending session consumer"
                        );
                        break 'receiving;
                    }
                }
                continue;
            }
            consecutive_idle = 0;

            for message in batch {
                info!(
                    session_id = %session_id,
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    body = message.body_text().unwrap_or("<binary>"),
                    "received message"
                );

                let is_sentinel = message.body_text() == Some(self.config.sentinel.as_str());

                self.config
                    .settlement
                    .settle(session, message.receipt_handle.clone())
                    .await?;
                settled += 1;
                debug!(
                    session_id = %session_id,
                    message_id = %message.message_id,
                    policy = self.config.settlement.name(),
                    "settled message"
                );

                session.renew_session_lock().await?;

                if is_sentinel {
                    transition(&mut phase, ConsumerPhase::SentinelSeen, &session_id);
                    info!(session_id = %session_id, "sentinel observed");

                    session.set_state(markers.closed.clone()).await?;
                    transition(&mut phase, ConsumerPhase::Closed, &session_id);
                    break 'receiving;
                }
            }
        }

        let sentinel_seen = matches!(phase, ConsumerPhase::Closed);
        session.set_state(markers.ended.clone()).await?;
        transition(&mut phase, ConsumerPhase::Ended, &session_id);
        info!(
            session_id = %session_id,
            settled,
            sentinel_seen,
            marker = %markers.ended,
            "session consumer ended"
        );

        Ok(ConsumerReport {
            settled,
            sentinel_seen,
            idle_batches,
            final_phase: phase,
        })
    }
}
