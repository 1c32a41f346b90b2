//! Settlement policy applied by session consumers.
//!
//! The broker offers four terminal dispositions for a received message.
//! A consumer picks exactly one policy and applies it uniformly, so the
//! disposition is configuration rather than four divergent code paths.

use relay_runtime::{QueueError, ReceiptHandle, SessionClient};
use std::fmt;

#[cfg(test)]
#[path = "settlement_tests.rs"]
mod tests;

/// Terminal disposition applied to every message a consumer receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementPolicy {
    /// Acknowledge and remove the message
    Complete,
    /// Release the message for redelivery
    Abandon,
    /// Set the message aside, retrievable only by sequence number
    Defer,
    /// Move the message to the dead-letter stream with a reason
    DeadLetter { reason: String },
}

impl SettlementPolicy {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Abandon => "abandon",
            Self::Defer => "defer",
            Self::DeadLetter { .. } => "dead-letter",
        }
    }

    /// Apply this policy to a received message's receipt
    pub async fn settle(
        &self,
        session: &dyn SessionClient,
        receipt: ReceiptHandle,
    ) -> Result<(), QueueError> {
        match self {
            Self::Complete => session.complete_message(receipt).await,
            Self::Abandon => session.abandon_message(receipt).await,
            Self::Defer => session.defer_message(receipt).await,
            Self::DeadLetter { reason } => {
                session.dead_letter_message(receipt, reason.clone()).await
            }
        }
    }
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self::Complete
    }
}

impl fmt::Display for SettlementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
