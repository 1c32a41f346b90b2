//! Client traits and implementations for queue operations.

use crate::error::QueueError;
use crate::message::{
    Message, MessageBatch, MessageId, PeekedMessage, QueueName, ReceiptHandle, ReceivedMessage,
    SessionId, Timestamp,
};
use crate::provider::{ProviderConfig, ProviderType, QueueConfig, SessionSupport, SubQueue};
use crate::providers::azure::AzureServiceBusProvider;
use crate::providers::InMemoryProvider;
use async_trait::async_trait;
use chrono::Duration;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for queue operations across all providers
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send single message to queue
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError>;

    /// Send multiple messages individually collected into one operation
    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Create an empty size-bounded batch for this provider
    fn create_batch(&self) -> MessageBatch;

    /// Send a packed batch in one operation
    async fn send_batch(
        &self,
        queue: &QueueName,
        batch: MessageBatch,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Schedule a message for future delivery, returning its sequence number
    async fn schedule_message(
        &self,
        queue: &QueueName,
        message: Message,
        enqueue_at: Timestamp,
    ) -> Result<u64, QueueError>;

    /// Cancel a scheduled message that has not yet been activated
    async fn cancel_scheduled_message(
        &self,
        queue: &QueueName,
        sequence_number: u64,
    ) -> Result<(), QueueError>;

    /// Receive single message from queue
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Receive up to `max_messages` within the wait budget.
    ///
    /// An empty result on a quiet queue is not an error.
    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Inspect messages without consuming or locking them
    async fn peek_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        from_sequence: Option<u64>,
    ) -> Result<Vec<PeekedMessage>, QueueError>;

    /// Receive from a secondary stream of the queue (e.g. dead-letter)
    async fn receive_sub_queue_messages(
        &self,
        queue: &QueueName,
        sub_queue: SubQueue,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Receive previously deferred messages by sequence number
    async fn receive_deferred_messages(
        &self,
        queue: &QueueName,
        sequence_numbers: &[u64],
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Mark message as successfully processed
    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Return message to queue for redelivery
    async fn abandon_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Set message aside; it can only be retrieved again by sequence number
    async fn defer_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Send message to dead letter queue
    async fn dead_letter_message(
        &self,
        receipt: ReceiptHandle,
        reason: String,
    ) -> Result<(), QueueError>;

    /// Extend the visibility lock on an in-flight message.
    ///
    /// Returns the new lock expiry.
    async fn renew_message_lock(&self, receipt: &ReceiptHandle) -> Result<Timestamp, QueueError>;

    /// Accept a session for exclusive ordered processing.
    ///
    /// With `session_id: None` the broker picks the next session that has
    /// messages available, failing with [`QueueError::Timeout`] when none do.
    async fn accept_session(
        &self,
        queue: &QueueName,
        session_id: Option<SessionId>,
    ) -> Result<Box<dyn SessionClient>, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Check if provider supports sessions
    fn supports_sessions(&self) -> bool;

    /// Check if provider supports batch operations
    fn supports_batching(&self) -> bool;
}

/// Interface for session-scoped ordered message processing.
///
/// A session client holds the exclusive session lock. The lock must be
/// renewed while processing is in flight or the broker hands the session to
/// another consumer and every outstanding receipt turns invalid.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Receive up to `max_messages` from this session within the wait budget.
    ///
    /// An empty result on a quiet session is not an error and does not
    /// affect the session lock.
    async fn receive_messages(
        &self,
        max_messages: u32,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Complete message in session
    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Abandon message in session
    async fn abandon_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Defer message in session
    async fn defer_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Send message to dead letter queue
    async fn dead_letter_message(
        &self,
        receipt: ReceiptHandle,
        reason: String,
    ) -> Result<(), QueueError>;

    /// Renew the exclusive session lock, returning the new expiry
    async fn renew_session_lock(&self) -> Result<Timestamp, QueueError>;

    /// Read the broker-persisted session state string
    async fn get_state(&self) -> Result<Option<String>, QueueError>;

    /// Replace the broker-persisted session state string
    async fn set_state(&self, state: String) -> Result<(), QueueError>;

    /// Close session and release lock
    async fn close_session(&self) -> Result<(), QueueError>;

    /// Get session ID
    fn session_id(&self) -> &SessionId;

    /// Get session lock expiry time
    fn session_expires_at(&self) -> Timestamp;
}

/// Interface implemented by specific queue providers (Azure, in-memory)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Send single message
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Send multiple messages
    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Schedule a message for future delivery
    async fn schedule_message(
        &self,
        queue: &QueueName,
        message: &Message,
        enqueue_at: Timestamp,
    ) -> Result<u64, QueueError>;

    /// Cancel a scheduled message
    async fn cancel_scheduled_message(
        &self,
        queue: &QueueName,
        sequence_number: u64,
    ) -> Result<(), QueueError>;

    /// Receive multiple messages
    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Peek without consuming
    async fn peek_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        from_sequence: Option<u64>,
    ) -> Result<Vec<PeekedMessage>, QueueError>;

    /// Receive from a secondary stream of the queue
    async fn receive_sub_queue_messages(
        &self,
        queue: &QueueName,
        sub_queue: SubQueue,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Receive deferred messages by sequence number
    async fn receive_deferred_messages(
        &self,
        queue: &QueueName,
        sequence_numbers: &[u64],
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Complete message processing
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Abandon message for redelivery
    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Defer message
    async fn defer_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Send to dead letter queue
    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Extend the visibility lock on an in-flight message
    async fn renew_message_lock(&self, receipt: &ReceiptHandle) -> Result<Timestamp, QueueError>;

    /// Create session client
    async fn create_session_client(
        &self,
        queue: &QueueName,
        session_id: Option<SessionId>,
    ) -> Result<Box<dyn SessionProvider>, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get session support level
    fn supports_sessions(&self) -> SessionSupport;

    /// Check batch operation support
    fn supports_batching(&self) -> bool;

    /// Byte budget for batches against this provider
    fn max_batch_size_bytes(&self) -> usize;
}

/// Interface implemented by provider-specific session implementations
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Receive messages from session
    async fn receive_messages(
        &self,
        max_messages: u32,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Complete message
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Abandon message
    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Defer message
    async fn defer_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Send to dead letter queue
    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Renew session lock
    async fn renew_session_lock(&self) -> Result<Timestamp, QueueError>;

    /// Read session state
    async fn get_state(&self) -> Result<Option<String>, QueueError>;

    /// Write session state
    async fn set_state(&self, state: String) -> Result<(), QueueError>;

    /// Close session
    async fn close_session(&self) -> Result<(), QueueError>;

    /// Get session ID
    fn session_id(&self) -> &SessionId;

    /// Get session lock expiry time
    fn session_expires_at(&self) -> Timestamp;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    pub async fn create_client(config: QueueConfig) -> Result<Box<dyn QueueClient>, QueueError> {
        let provider: Box<dyn QueueProvider> = match &config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryProvider::new(in_memory_config.clone()))
            }
            ProviderConfig::AzureServiceBus(azure_config) => Box::new(
                AzureServiceBusProvider::new(azure_config.clone())
                    .await
                    .map_err(|e| e.to_queue_error())?,
            ),
        };

        Ok(Box::new(StandardQueueClient::new(provider, config)))
    }

    /// Create test client with in-memory provider
    pub fn create_test_client() -> Box<dyn QueueClient> {
        let provider = InMemoryProvider::default();
        Box::new(StandardQueueClient::new(
            Box::new(provider),
            QueueConfig::default(),
        ))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    provider: Box<dyn QueueProvider>,
    #[allow(dead_code)] // Held for retry/timeout policy wiring
    config: QueueConfig,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Box<dyn QueueProvider>, config: QueueConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        self.provider.send_message(queue, &message).await
    }

    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError> {
        self.provider.send_messages(queue, &messages).await
    }

    fn create_batch(&self) -> MessageBatch {
        MessageBatch::new(self.provider.max_batch_size_bytes())
    }

    async fn send_batch(
        &self,
        queue: &QueueName,
        batch: MessageBatch,
    ) -> Result<Vec<MessageId>, QueueError> {
        let messages = batch.into_messages();
        self.provider.send_messages(queue, &messages).await
    }

    async fn schedule_message(
        &self,
        queue: &QueueName,
        message: Message,
        enqueue_at: Timestamp,
    ) -> Result<u64, QueueError> {
        self.provider
            .schedule_message(queue, &message, enqueue_at)
            .await
    }

    async fn cancel_scheduled_message(
        &self,
        queue: &QueueName,
        sequence_number: u64,
    ) -> Result<(), QueueError> {
        self.provider
            .cancel_scheduled_message(queue, sequence_number)
            .await
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut messages = self.provider.receive_messages(queue, 1, timeout).await?;
        Ok(messages.pop())
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.provider
            .receive_messages(queue, max_messages, timeout)
            .await
    }

    async fn peek_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        from_sequence: Option<u64>,
    ) -> Result<Vec<PeekedMessage>, QueueError> {
        self.provider
            .peek_messages(queue, max_messages, from_sequence)
            .await
    }

    async fn receive_sub_queue_messages(
        &self,
        queue: &QueueName,
        sub_queue: SubQueue,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.provider
            .receive_sub_queue_messages(queue, sub_queue, max_messages, timeout)
            .await
    }

    async fn receive_deferred_messages(
        &self,
        queue: &QueueName,
        sequence_numbers: &[u64],
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.provider
            .receive_deferred_messages(queue, sequence_numbers)
            .await
    }

    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.complete_message(&receipt).await
    }

    async fn abandon_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.abandon_message(&receipt).await
    }

    async fn defer_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.defer_message(&receipt).await
    }

    async fn dead_letter_message(
        &self,
        receipt: ReceiptHandle,
        reason: String,
    ) -> Result<(), QueueError> {
        self.provider.dead_letter_message(&receipt, &reason).await
    }

    async fn renew_message_lock(&self, receipt: &ReceiptHandle) -> Result<Timestamp, QueueError> {
        self.provider.renew_message_lock(receipt).await
    }

    async fn accept_session(
        &self,
        queue: &QueueName,
        session_id: Option<SessionId>,
    ) -> Result<Box<dyn SessionClient>, QueueError> {
        let session_provider = self
            .provider
            .create_session_client(queue, session_id)
            .await?;
        Ok(Box::new(StandardSessionClient::new(session_provider)))
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    fn supports_sessions(&self) -> bool {
        matches!(
            self.provider.supports_sessions(),
            SessionSupport::Native | SessionSupport::Emulated
        )
    }

    fn supports_batching(&self) -> bool {
        self.provider.supports_batching()
    }
}

/// Standard session client implementation
struct StandardSessionClient {
    provider: Box<dyn SessionProvider>,
}

impl StandardSessionClient {
    fn new(provider: Box<dyn SessionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SessionClient for StandardSessionClient {
    async fn receive_messages(
        &self,
        max_messages: u32,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.provider.receive_messages(max_messages, max_wait).await
    }

    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.complete_message(&receipt).await
    }

    async fn abandon_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.abandon_message(&receipt).await
    }

    async fn defer_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.defer_message(&receipt).await
    }

    async fn dead_letter_message(
        &self,
        receipt: ReceiptHandle,
        reason: String,
    ) -> Result<(), QueueError> {
        self.provider.dead_letter_message(&receipt, &reason).await
    }

    async fn renew_session_lock(&self) -> Result<Timestamp, QueueError> {
        self.provider.renew_session_lock().await
    }

    async fn get_state(&self) -> Result<Option<String>, QueueError> {
        self.provider.get_state().await
    }

    async fn set_state(&self, state: String) -> Result<(), QueueError> {
        self.provider.set_state(state).await
    }

    async fn close_session(&self) -> Result<(), QueueError> {
        self.provider.close_session().await
    }

    fn session_id(&self) -> &SessionId {
        self.provider.session_id()
    }

    fn session_expires_at(&self) -> Timestamp {
        self.provider.session_expires_at()
    }
}
