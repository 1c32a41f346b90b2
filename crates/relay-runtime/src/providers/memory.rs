//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue implementation
//! that:
//! - Supports session-partitioned ordered message processing with exclusive
//!   session locks and broker-persisted session state strings
//! - Implements visibility locks with expiry and automatic redelivery
//! - Dead-letters messages that exhaust their delivery count
//! - Supports deferred and scheduled messages addressed by sequence number
//! - Provides thread-safe concurrent access
//!
//! Queue-level receives only yield sessionless messages; messages carrying a
//! session id are delivered exclusively through a session receiver, matching
//! the behavior of session-enabled broker queues.
//!
//! This provider is intended for:
//! - Unit and integration testing of relay-runtime consumers
//! - Development and prototyping
//! - Reference semantics for cloud providers

use crate::client::{QueueProvider, SessionProvider};
use crate::error::QueueError;
use crate::message::{
    Message, MessageId, PeekedMessage, QueueName, ReceiptHandle, ReceivedMessage, SessionId,
    Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType, SessionSupport, SubQueue};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Attribute recording why a message was dead-lettered
pub const DEAD_LETTER_REASON_ATTRIBUTE: &str = "dead_letter_reason";

/// Sleep between scans while a receive call waits out its budget
const RECEIVE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    config: InMemoryConfig,
    next_sequence: u64,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
            next_sequence: 0,
        }
    }

    fn allocate_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Get or create a queue
    fn get_or_create_queue(&mut self, queue_name: &QueueName) -> &mut InMemoryQueue {
        self.queues
            .entry(queue_name.clone())
            .or_insert_with(InMemoryQueue::new)
    }

    fn queue_mut(&mut self, queue_name: &QueueName) -> Result<&mut InMemoryQueue, QueueError> {
        self.queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    /// Ready and scheduled messages, sorted by sequence number
    messages: VecDeque<StoredMessage>,
    /// Dead letter stream for failed or rejected messages
    dead_letter: VecDeque<StoredMessage>,
    /// Deferred messages, retrievable only by sequence number
    deferred: HashMap<u64, StoredMessage>,
    /// In-flight messages being processed, keyed by receipt
    in_flight: HashMap<String, InFlightMessage>,
    /// Session lock and state records
    sessions: HashMap<SessionId, SessionRecord>,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            dead_letter: VecDeque::new(),
            deferred: HashMap::new(),
            in_flight: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    /// Insert keeping the deque sorted by sequence number, so redelivered
    /// messages rejoin the stream in their original order.
    fn insert_by_sequence(&mut self, message: StoredMessage) {
        let position = self
            .messages
            .iter()
            .position(|m| m.sequence_number > message.sequence_number)
            .unwrap_or(self.messages.len());
        self.messages.insert(position, message);
    }

    /// Requeue or dead-letter a message whose lease ended without completion
    fn requeue(&mut self, entry: InFlightMessage, config: &InMemoryConfig) {
        let mut message = entry.message;

        if entry.origin == MessageOrigin::DeadLetter {
            self.dead_letter.push_back(message);
            return;
        }

        if message.delivery_count >= config.max_delivery_count {
            debug!(
                message_id = %message.message_id,
                delivery_count = message.delivery_count,
                "delivery count exhausted"
            );
            if config.enable_dead_letter_queue {
                message.attributes.insert(
                    DEAD_LETTER_REASON_ATTRIBUTE.to_string(),
                    "MaxDeliveryCountExceeded".to_string(),
                );
                self.dead_letter.push_back(message);
            }
            // Without a dead-letter queue the message is discarded.
            return;
        }

        self.insert_by_sequence(message);
    }

    /// Return expired in-flight messages to their source stream
    fn reactivate_expired(&mut self, config: &InMemoryConfig) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(entry) = self.in_flight.remove(&receipt) {
                self.requeue(entry, config);
            }
        }
    }

    /// Move up to `max` matching available messages into flight.
    ///
    /// `session` selects the delivery stream: `None` yields only sessionless
    /// messages, `Some(id)` yields only that session's messages.
    fn deliver_available(
        &mut self,
        max: usize,
        session: Option<&SessionId>,
        config: &InMemoryConfig,
    ) -> Vec<ReceivedMessage> {
        let now = Timestamp::now();
        let mut delivered = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.messages.len());

        while let Some(stored) = self.messages.pop_front() {
            if delivered.len() >= max || now < stored.available_at {
                remaining.push_back(stored);
                continue;
            }

            if stored.is_expired_at(&now) {
                if config.enable_dead_letter_queue {
                    let mut dead = stored;
                    dead.attributes.insert(
                        DEAD_LETTER_REASON_ATTRIBUTE.to_string(),
                        "TTLExpired".to_string(),
                    );
                    self.dead_letter.push_back(dead);
                }
                continue;
            }

            let matches = match session {
                None => stored.session_id.is_none(),
                Some(id) => stored.session_id.as_ref() == Some(id),
            };
            if !matches {
                remaining.push_back(stored);
                continue;
            }

            delivered.push(self.put_in_flight(stored, MessageOrigin::Queue, config));
        }

        self.messages = remaining;
        delivered
    }

    /// Move up to `max` dead-lettered messages into flight
    fn deliver_dead_letter(
        &mut self,
        max: usize,
        config: &InMemoryConfig,
    ) -> Vec<ReceivedMessage> {
        let mut delivered = Vec::new();
        while delivered.len() < max {
            match self.dead_letter.pop_front() {
                Some(stored) => {
                    delivered.push(self.put_in_flight(stored, MessageOrigin::DeadLetter, config))
                }
                None => break,
            }
        }
        delivered
    }

    fn put_in_flight(
        &mut self,
        mut stored: StoredMessage,
        origin: MessageOrigin,
        config: &InMemoryConfig,
    ) -> ReceivedMessage {
        stored.delivery_count += 1;

        let receipt = uuid::Uuid::new_v4().to_string();
        let lock_expires_at =
            Timestamp::from_datetime(Utc::now() + config.message_lock_duration());

        let received = stored.to_received(&receipt, &lock_expires_at);
        self.in_flight.insert(
            receipt,
            InFlightMessage {
                message: stored,
                lock_expires_at,
                origin,
            },
        );
        received
    }

    /// Apply a settlement disposition to an in-flight message.
    ///
    /// Returns `None` when the receipt does not belong to this queue.
    fn settle(
        &mut self,
        receipt: &str,
        disposition: Disposition,
        config: &InMemoryConfig,
    ) -> Option<Result<(), QueueError>> {
        let entry = self.in_flight.remove(receipt)?;

        if entry.is_expired() {
            // The lease lapsed; the message goes back for redelivery and the
            // settlement attempt fails.
            self.requeue(entry, config);
            return Some(Err(QueueError::LockLost {
                receipt: receipt.to_string(),
            }));
        }

        match disposition {
            Disposition::Complete => {}
            Disposition::Abandon => self.requeue(entry, config),
            Disposition::Defer => {
                self.deferred
                    .insert(entry.message.sequence_number, entry.message);
            }
            Disposition::DeadLetter(reason) => {
                let mut message = entry.message;
                message
                    .attributes
                    .insert(DEAD_LETTER_REASON_ATTRIBUTE.to_string(), reason);
                self.dead_letter.push_back(message);
            }
        }

        Some(Ok(()))
    }
}

/// Terminal disposition applied to an in-flight message
enum Disposition {
    Complete,
    Abandon,
    Defer,
    DeadLetter(String),
}

/// Which stream an in-flight message was delivered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOrigin {
    Queue,
    DeadLetter,
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    sequence_number: u64,
    body: Bytes,
    attributes: HashMap<String, String>,
    session_id: Option<SessionId>,
    correlation_id: Option<String>,
    enqueued_at: Timestamp,
    delivery_count: u32,
    available_at: Timestamp,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn from_message(message: &Message, sequence_number: u64, config: &InMemoryConfig) -> Self {
        let now = Timestamp::now();
        let ttl = message.time_to_live.or_else(|| config.default_message_ttl());
        let expires_at = ttl.map(|ttl| Timestamp::from_datetime(now.as_datetime() + ttl));

        Self {
            message_id: MessageId::new(),
            sequence_number,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            session_id: message.session_id.clone(),
            correlation_id: message.correlation_id.clone(),
            enqueued_at: now.clone(),
            delivery_count: 0,
            available_at: now,
            expires_at,
        }
    }

    fn is_expired_at(&self, now: &Timestamp) -> bool {
        match &self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    fn to_received(&self, receipt: &str, lock_expires_at: &Timestamp) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            sequence_number: self.sequence_number,
            body: self.body.clone(),
            attributes: self.attributes.clone(),
            session_id: self.session_id.clone(),
            correlation_id: self.correlation_id.clone(),
            receipt_handle: ReceiptHandle::new(
                receipt.to_string(),
                lock_expires_at.clone(),
                ProviderType::InMemory,
            ),
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at.clone(),
            delivered_at: Timestamp::now(),
        }
    }

    fn to_peeked(&self) -> PeekedMessage {
        PeekedMessage {
            message_id: self.message_id.clone(),
            sequence_number: self.sequence_number,
            body: self.body.clone(),
            session_id: self.session_id.clone(),
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at.clone(),
        }
    }
}

/// A message currently being processed
struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: Timestamp,
    origin: MessageOrigin,
}

impl InFlightMessage {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.lock_expires_at
    }
}

/// Lock and state record for a message session
struct SessionRecord {
    state: Option<String>,
    locked_by: Option<String>,
    lock_expires_at: Option<Timestamp>,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            state: None,
            locked_by: None,
            lock_expires_at: None,
        }
    }

    fn is_locked(&self) -> bool {
        if self.locked_by.is_none() {
            return false;
        }
        match &self.lock_expires_at {
            Some(expires_at) => Timestamp::now() < *expires_at,
            None => false,
        }
    }

    fn is_held_by(&self, client_id: &str) -> bool {
        self.is_locked() && self.locked_by.as_deref() == Some(client_id)
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
    config: InMemoryConfig,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config.clone()))),
            config,
        }
    }

    /// Run timed receive attempts until one yields messages or the wait
    /// budget is exhausted. A zero or negative budget scans exactly once.
    async fn receive_with_budget<F>(
        &self,
        timeout: Duration,
        mut attempt: F,
    ) -> Result<Vec<ReceivedMessage>, QueueError>
    where
        F: FnMut() -> Result<Vec<ReceivedMessage>, QueueError>,
    {
        let deadline = Utc::now() + timeout.max(Duration::zero());

        loop {
            let batch = attempt()?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if Utc::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL).await;
        }
    }

    fn write_storage(&self) -> std::sync::RwLockWriteGuard<'_, QueueStorage> {
        // Lock poisoning only occurs when another thread panicked while
        // holding the guard; propagating the panic is the correct response.
        self.storage.write().expect("queue storage lock poisoned")
    }

    fn read_storage(&self) -> std::sync::RwLockReadGuard<'_, QueueStorage> {
        self.storage.read().expect("queue storage lock poisoned")
    }

    fn enqueue(
        &self,
        queue: &QueueName,
        message: &Message,
        available_at: Option<Timestamp>,
    ) -> Result<(MessageId, u64), QueueError> {
        let max_message_size = ProviderType::InMemory.max_message_size();
        if message.body.len() > max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size: max_message_size,
            });
        }

        let mut storage = self.write_storage();
        let sequence = storage.allocate_sequence();
        let config = storage.config.clone();
        let max_queue_size = config.max_queue_size;

        let queue_state = storage.get_or_create_queue(queue);
        if queue_state.messages.len() >= max_queue_size {
            return Err(QueueError::ProviderError {
                provider: "InMemory".to_string(),
                code: "QueueCapacityExceeded".to_string(),
                message: format!("queue '{}' holds {} messages", queue, max_queue_size),
            });
        }

        let mut stored = StoredMessage::from_message(message, sequence, &config);
        if let Some(at) = available_at {
            stored.available_at = at;
        }
        let message_id = stored.message_id.clone();
        queue_state.messages.push_back(stored);

        Ok((message_id, sequence))
    }

    fn settle_receipt(
        &self,
        receipt: &ReceiptHandle,
        disposition: Disposition,
    ) -> Result<(), QueueError> {
        let mut storage = self.write_storage();
        let config = storage.config.clone();

        let owning_queue = storage
            .queues
            .values_mut()
            .find(|queue| queue.in_flight.contains_key(receipt.handle()));

        match owning_queue {
            Some(queue) => queue
                .settle(receipt.handle(), disposition, &config)
                .expect("in-flight entry checked above"),
            None => Err(QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            }),
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let (message_id, _) = self.enqueue(queue, message, None)?;
        Ok(message_id)
    }

    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError> {
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let (message_id, _) = self.enqueue(queue, message, None)?;
            ids.push(message_id);
        }
        Ok(ids)
    }

    async fn schedule_message(
        &self,
        queue: &QueueName,
        message: &Message,
        enqueue_at: Timestamp,
    ) -> Result<u64, QueueError> {
        let (_, sequence) = self.enqueue(queue, message, Some(enqueue_at))?;
        Ok(sequence)
    }

    async fn cancel_scheduled_message(
        &self,
        queue: &QueueName,
        sequence_number: u64,
    ) -> Result<(), QueueError> {
        let mut storage = self.write_storage();
        let queue_state = storage.queue_mut(queue)?;

        let now = Timestamp::now();
        let position = queue_state.messages.iter().position(|m| {
            m.sequence_number == sequence_number && now < m.available_at
        });

        match position {
            Some(index) => {
                let _ = queue_state.messages.remove(index);
                Ok(())
            }
            // Already activated or never scheduled; nothing left to cancel.
            None => Err(QueueError::MessageNotFound {
                receipt: sequence_number.to_string(),
            }),
        }
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receive_with_budget(timeout, || {
            let mut storage = self.write_storage();
            let config = storage.config.clone();
            let queue_state = storage.queue_mut(queue)?;
            queue_state.reactivate_expired(&config);
            Ok(queue_state.deliver_available(max_messages as usize, None, &config))
        })
        .await
    }

    async fn peek_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        from_sequence: Option<u64>,
    ) -> Result<Vec<PeekedMessage>, QueueError> {
        let storage = self.read_storage();
        let queue_state =
            storage
                .queues
                .get(queue)
                .ok_or_else(|| QueueError::QueueNotFound {
                    queue_name: queue.to_string(),
                })?;

        let from = from_sequence.unwrap_or(0);
        Ok(queue_state
            .messages
            .iter()
            .filter(|m| m.sequence_number >= from)
            .take(max_messages as usize)
            .map(StoredMessage::to_peeked)
            .collect())
    }

    async fn receive_sub_queue_messages(
        &self,
        queue: &QueueName,
        sub_queue: SubQueue,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        match sub_queue {
            SubQueue::DeadLetter => {
                self.receive_with_budget(timeout, || {
                    let mut storage = self.write_storage();
                    let config = storage.config.clone();
                    let queue_state = storage.queue_mut(queue)?;
                    queue_state.reactivate_expired(&config);
                    Ok(queue_state.deliver_dead_letter(max_messages as usize, &config))
                })
                .await
            }
        }
    }

    async fn receive_deferred_messages(
        &self,
        queue: &QueueName,
        sequence_numbers: &[u64],
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut storage = self.write_storage();
        let config = storage.config.clone();
        let queue_state = storage.queue_mut(queue)?;

        // Validate the full set first so a missing sequence number leaves
        // the deferred store untouched.
        for sequence in sequence_numbers {
            if !queue_state.deferred.contains_key(sequence) {
                return Err(QueueError::MessageNotFound {
                    receipt: sequence.to_string(),
                });
            }
        }

        let mut delivered = Vec::with_capacity(sequence_numbers.len());
        for sequence in sequence_numbers {
            let stored = queue_state
                .deferred
                .remove(sequence)
                .expect("presence checked above");
            delivered.push(queue_state.put_in_flight(stored, MessageOrigin::Queue, &config));
        }
        Ok(delivered)
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::Complete)
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::Abandon)
    }

    async fn defer_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::Defer)
    }

    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::DeadLetter(reason.to_string()))
    }

    async fn renew_message_lock(&self, receipt: &ReceiptHandle) -> Result<Timestamp, QueueError> {
        let mut storage = self.write_storage();
        let config = storage.config.clone();

        for queue in storage.queues.values_mut() {
            if let Some(entry) = queue.in_flight.get_mut(receipt.handle()) {
                if entry.is_expired() {
                    return Err(QueueError::LockLost {
                        receipt: receipt.handle().to_string(),
                    });
                }
                let new_expiry =
                    Timestamp::from_datetime(Utc::now() + config.message_lock_duration());
                entry.lock_expires_at = new_expiry.clone();
                return Ok(new_expiry);
            }
        }
        Err(QueueError::MessageNotFound {
            receipt: receipt.handle().to_string(),
        })
    }

    async fn create_session_client(
        &self,
        queue: &QueueName,
        session_id: Option<SessionId>,
    ) -> Result<Box<dyn SessionProvider>, QueueError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let mut storage = self.write_storage();
        let config = storage.config.clone();
        let queue_state = storage.get_or_create_queue(queue);

        let session_id = match session_id {
            Some(id) => id,
            None => {
                // Next-available acceptance: the first session with a ready
                // message whose lock nobody holds.
                let candidate = queue_state
                    .messages
                    .iter()
                    .filter_map(|m| m.session_id.as_ref())
                    .find(|id| {
                        queue_state
                            .sessions
                            .get(id)
                            .map_or(true, |record| !record.is_locked())
                    })
                    .cloned();

                candidate.ok_or(QueueError::Timeout {
                    duration: Duration::zero(),
                })?
            }
        };

        let record = queue_state
            .sessions
            .entry(session_id.clone())
            .or_insert_with(SessionRecord::new);

        if record.is_locked() {
            return Err(QueueError::SessionLocked {
                session_id: session_id.to_string(),
                locked_until: record
                    .lock_expires_at
                    .clone()
                    .unwrap_or_else(Timestamp::now),
            });
        }

        record.locked_by = Some(client_id.clone());
        record.lock_expires_at = Some(Timestamp::from_datetime(
            Utc::now() + config.session_lock_duration(),
        ));
        debug!(queue = %queue, session_id = %session_id, "session accepted");

        Ok(Box::new(InMemorySessionProvider {
            storage: Arc::clone(&self.storage),
            queue_name: queue.clone(),
            session_id,
            client_id,
        }))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn supports_sessions(&self) -> SessionSupport {
        SessionSupport::Native
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn max_batch_size_bytes(&self) -> usize {
        self.config.max_batch_size_bytes
    }
}

// ============================================================================
// InMemorySessionProvider
// ============================================================================

/// In-memory session provider holding an exclusive session lock
pub struct InMemorySessionProvider {
    storage: Arc<RwLock<QueueStorage>>,
    queue_name: QueueName,
    session_id: SessionId,
    client_id: String,
}

impl InMemorySessionProvider {
    fn write_storage(&self) -> std::sync::RwLockWriteGuard<'_, QueueStorage> {
        self.storage.write().expect("queue storage lock poisoned")
    }

    /// Validate that this client still holds the session lock
    fn check_lock(&self, storage: &mut QueueStorage) -> Result<(), QueueError> {
        let queue_state =
            storage
                .queues
                .get_mut(&self.queue_name)
                .ok_or_else(|| QueueError::QueueNotFound {
                    queue_name: self.queue_name.to_string(),
                })?;

        let record =
            queue_state
                .sessions
                .get(&self.session_id)
                .ok_or_else(|| QueueError::SessionNotFound {
                    session_id: self.session_id.to_string(),
                })?;

        if !record.is_held_by(&self.client_id) {
            return Err(QueueError::SessionLockExpired {
                session_id: self.session_id.to_string(),
            });
        }
        Ok(())
    }

    fn settle_receipt(
        &self,
        receipt: &ReceiptHandle,
        disposition: Disposition,
    ) -> Result<(), QueueError> {
        let mut storage = self.write_storage();
        self.check_lock(&mut storage)?;
        let config = storage.config.clone();

        let queue_state = storage.queue_mut(&self.queue_name)?;
        match queue_state.settle(receipt.handle(), disposition, &config) {
            Some(result) => result,
            None => Err(QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            }),
        }
    }
}

#[async_trait]
impl SessionProvider for InMemorySessionProvider {
    async fn receive_messages(
        &self,
        max_messages: u32,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Utc::now() + max_wait.max(Duration::zero());

        loop {
            let batch = {
                let mut storage = self.write_storage();
                self.check_lock(&mut storage)?;
                let config = storage.config.clone();
                let queue_state = storage.queue_mut(&self.queue_name)?;
                queue_state.reactivate_expired(&config);
                queue_state.deliver_available(
                    max_messages as usize,
                    Some(&self.session_id),
                    &config,
                )
            };

            if !batch.is_empty() {
                return Ok(batch);
            }
            if Utc::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL).await;
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::Complete)
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::Abandon)
    }

    async fn defer_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::Defer)
    }

    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.settle_receipt(receipt, Disposition::DeadLetter(reason.to_string()))
    }

    async fn renew_session_lock(&self) -> Result<Timestamp, QueueError> {
        let mut storage = self.write_storage();
        self.check_lock(&mut storage)?;
        let new_expiry = Timestamp::from_datetime(
            Utc::now() + storage.config.session_lock_duration(),
        );

        let queue_state = storage.queue_mut(&self.queue_name)?;
        let record = queue_state
            .sessions
            .get_mut(&self.session_id)
            .expect("session record verified by check_lock");
        record.lock_expires_at = Some(new_expiry.clone());

        Ok(new_expiry)
    }

    async fn get_state(&self) -> Result<Option<String>, QueueError> {
        let storage = self.storage.read().expect("queue storage lock poisoned");
        let queue_state =
            storage
                .queues
                .get(&self.queue_name)
                .ok_or_else(|| QueueError::QueueNotFound {
                    queue_name: self.queue_name.to_string(),
                })?;

        let record =
            queue_state
                .sessions
                .get(&self.session_id)
                .ok_or_else(|| QueueError::SessionNotFound {
                    session_id: self.session_id.to_string(),
                })?;

        Ok(record.state.clone())
    }

    async fn set_state(&self, state: String) -> Result<(), QueueError> {
        let mut storage = self.write_storage();
        self.check_lock(&mut storage)?;

        let queue_state = storage.queue_mut(&self.queue_name)?;
        let record = queue_state
            .sessions
            .get_mut(&self.session_id)
            .expect("session record verified by check_lock");
        record.state = Some(state);
        Ok(())
    }

    async fn close_session(&self) -> Result<(), QueueError> {
        let mut storage = self.write_storage();

        if let Some(queue_state) = storage.queues.get_mut(&self.queue_name) {
            if let Some(record) = queue_state.sessions.get_mut(&self.session_id) {
                if record.locked_by.as_deref() == Some(&self.client_id) {
                    record.locked_by = None;
                    record.lock_expires_at = None;
                }
            }
        }
        // Closing an already-released session is a no-op.
        Ok(())
    }

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn session_expires_at(&self) -> Timestamp {
        let storage = self.storage.read().expect("queue storage lock poisoned");
        storage
            .queues
            .get(&self.queue_name)
            .and_then(|q| q.sessions.get(&self.session_id))
            .and_then(|record| record.lock_expires_at.clone())
            .unwrap_or_else(Timestamp::now)
    }
}

impl Drop for InMemorySessionProvider {
    fn drop(&mut self) {
        // Scopes that exit without an explicit close still release the
        // session. Releasing twice is harmless.
        if let Ok(mut storage) = self.storage.write() {
            if let Some(queue_state) = storage.queues.get_mut(&self.queue_name) {
                if let Some(record) = queue_state.sessions.get_mut(&self.session_id) {
                    if record.locked_by.as_deref() == Some(&self.client_id) {
                        record.locked_by = None;
                        record.lock_expires_at = None;
                    }
                }
            }
        }
    }
}
