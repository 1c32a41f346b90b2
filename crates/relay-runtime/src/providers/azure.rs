//! Azure Service Bus provider surface.
//!
//! This module carries the Azure-facing half of the runtime:
//! - Authentication method selection (connection string, managed identity,
//!   client secret, default credential chain)
//! - Configuration validation before any connection is attempted
//! - Error classification mapping Azure failures onto [`QueueError`]
//! - Cached sender/receiver plumbing keyed by queue name
//!
//! The pinned `azure_messaging_servicebus` SDK does not yet expose
//! session-scoped receivers or settlement beyond completion, so data-path
//! operations report a provider error; the in-memory provider carries the
//! full semantics in the meantime. The configuration, auth, and error
//! surfaces here are what the rest of the workspace programs against.

use crate::client::{QueueProvider, SessionProvider};
use crate::error::{ConfigurationError, QueueError};
use crate::message::{
    Message, MessageId, PeekedMessage, QueueName, ReceiptHandle, ReceivedMessage, SessionId,
    Timestamp,
};
use crate::provider::{AzureServiceBusConfig, ProviderType, SessionSupport, SubQueue};
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

// ============================================================================
// Authentication Types
// ============================================================================

/// Authentication method for Azure Service Bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AzureAuthMethod {
    /// Connection string with embedded credentials
    ConnectionString,
    /// Azure Managed Identity (for serverless environments)
    ManagedIdentity,
    /// Service principal with client secret
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// Default Azure credential chain (for development)
    DefaultCredential,
}

impl fmt::Display for AzureAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionString => write!(f, "ConnectionString"),
            Self::ManagedIdentity => write!(f, "ManagedIdentity"),
            Self::ClientSecret { .. } => write!(f, "ClientSecret"),
            Self::DefaultCredential => write!(f, "DefaultCredential"),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Service Bus error: {0}")]
    ServiceBusError(String),

    #[error("Message lock lost: {0}")]
    MessageLockLost(String),

    #[error("Session lock lost: {0}")]
    SessionLockLost(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
}

impl AzureError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthenticationError(_) => false,
            Self::NetworkError(_) => true,
            Self::ServiceBusError(_) => true,
            Self::MessageLockLost(_) => false,
            Self::SessionLockLost(_) => false,
            Self::ConfigurationError(_) => false,
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::AuthenticationError(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::ServiceBusError(msg) => QueueError::ProviderError {
                provider: "AzureServiceBus".to_string(),
                code: "ServiceBusError".to_string(),
                message: msg,
            },
            Self::MessageLockLost(receipt) => QueueError::LockLost { receipt },
            Self::SessionLockLost(session_id) => QueueError::SessionLockExpired { session_id },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
        }
    }
}

fn not_implemented(operation: &str) -> QueueError {
    QueueError::ProviderError {
        provider: "AzureServiceBus".to_string(),
        code: "NotImplemented".to_string(),
        message: format!(
            "{} is not available with the pinned Service Bus SDK",
            operation
        ),
    }
}

// ============================================================================
// Azure Service Bus Provider
// ============================================================================

/// Azure Service Bus queue provider.
///
/// Validates authentication configuration up front and maintains per-queue
/// sender and receiver handles behind double-checked read/write locks so
/// concurrent loops share connections instead of racing to create them.
#[derive(Debug)]
pub struct AzureServiceBusProvider {
    config: AzureServiceBusConfig,
    senders: Arc<RwLock<HashMap<String, Arc<QueueHandle>>>>,
    receivers: Arc<RwLock<HashMap<String, Arc<QueueHandle>>>>,
}

impl AzureServiceBusProvider {
    /// Create new Azure Service Bus provider.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::ConfigurationError`] when the configuration is
    /// inconsistent with the selected auth method (missing connection
    /// string, missing namespace, or empty service-principal fields).
    pub async fn new(config: AzureServiceBusConfig) -> Result<Self, AzureError> {
        Self::validate_config(&config)?;

        Ok(Self {
            config,
            senders: Arc::new(RwLock::new(HashMap::new())),
            receivers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Validate Azure Service Bus configuration against its auth method
    fn validate_config(config: &AzureServiceBusConfig) -> Result<(), AzureError> {
        match &config.auth_method {
            AzureAuthMethod::ConnectionString => {
                if config.connection_string.is_none() {
                    return Err(AzureError::ConfigurationError(
                        "connection string required for ConnectionString auth method".to_string(),
                    ));
                }
            }
            AzureAuthMethod::ManagedIdentity | AzureAuthMethod::DefaultCredential => {
                if config.namespace.is_none() {
                    return Err(AzureError::ConfigurationError(format!(
                        "namespace required for {} auth method",
                        config.auth_method
                    )));
                }
            }
            AzureAuthMethod::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => {
                if config.namespace.is_none() {
                    return Err(AzureError::ConfigurationError(
                        "namespace required for ClientSecret auth method".to_string(),
                    ));
                }
                if tenant_id.is_empty() || client_id.is_empty() || client_secret.is_empty() {
                    return Err(AzureError::ConfigurationError(
                        "tenant id, client id, and client secret must all be set".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// The validated configuration this provider was built from
    pub fn config(&self) -> &AzureServiceBusConfig {
        &self.config
    }

    async fn get_or_create_sender(&self, queue: &QueueName) -> Arc<QueueHandle> {
        Self::get_or_create(&self.senders, queue).await
    }

    async fn get_or_create_receiver(&self, queue: &QueueName) -> Arc<QueueHandle> {
        Self::get_or_create(&self.receivers, queue).await
    }

    /// Double-checked cache lookup: read lock first, escalate to write lock
    /// only when the handle is missing.
    async fn get_or_create(
        cache: &RwLock<HashMap<String, Arc<QueueHandle>>>,
        queue: &QueueName,
    ) -> Arc<QueueHandle> {
        {
            let handles = cache.read().await;
            if let Some(handle) = handles.get(queue.as_str()) {
                return Arc::clone(handle);
            }
        }

        let mut handles = cache.write().await;
        if let Some(handle) = handles.get(queue.as_str()) {
            return Arc::clone(handle);
        }

        let handle = Arc::new(QueueHandle {
            queue_name: queue.clone(),
        });
        handles.insert(queue.as_str().to_string(), Arc::clone(&handle));
        handle
    }
}

#[async_trait]
impl QueueProvider for AzureServiceBusProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        _message: &Message,
    ) -> Result<MessageId, QueueError> {
        let _sender = self.get_or_create_sender(queue).await;
        Err(not_implemented("send"))
    }

    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError> {
        // Service Bus caps batch sends at 100 messages per operation.
        if messages.len() > 100 {
            return Err(QueueError::ProviderError {
                provider: "AzureServiceBus".to_string(),
                code: "BatchTooLarge".to_string(),
                message: format!("{} messages exceeds the 100-message batch cap", messages.len()),
            });
        }

        let _sender = self.get_or_create_sender(queue).await;
        Err(not_implemented("batch send"))
    }

    async fn schedule_message(
        &self,
        queue: &QueueName,
        _message: &Message,
        _enqueue_at: Timestamp,
    ) -> Result<u64, QueueError> {
        let _sender = self.get_or_create_sender(queue).await;
        Err(not_implemented("scheduled send"))
    }

    async fn cancel_scheduled_message(
        &self,
        queue: &QueueName,
        _sequence_number: u64,
    ) -> Result<(), QueueError> {
        let _sender = self.get_or_create_sender(queue).await;
        Err(not_implemented("scheduled-send cancellation"))
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        _timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        // Service Bus caps batch receives at 32 messages per operation.
        if max_messages > 32 {
            return Err(QueueError::ProviderError {
                provider: "AzureServiceBus".to_string(),
                code: "BatchTooLarge".to_string(),
                message: format!("{} exceeds the 32-message receive cap", max_messages),
            });
        }

        let _receiver = self.get_or_create_receiver(queue).await;
        Err(not_implemented("receive"))
    }

    async fn peek_messages(
        &self,
        queue: &QueueName,
        _max_messages: u32,
        _from_sequence: Option<u64>,
    ) -> Result<Vec<PeekedMessage>, QueueError> {
        let _receiver = self.get_or_create_receiver(queue).await;
        Err(not_implemented("peek"))
    }

    async fn receive_sub_queue_messages(
        &self,
        queue: &QueueName,
        _sub_queue: SubQueue,
        _max_messages: u32,
        _timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let _receiver = self.get_or_create_receiver(queue).await;
        Err(not_implemented("sub-queue receive"))
    }

    async fn receive_deferred_messages(
        &self,
        queue: &QueueName,
        _sequence_numbers: &[u64],
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let _receiver = self.get_or_create_receiver(queue).await;
        Err(not_implemented("deferred receive"))
    }

    async fn complete_message(&self, _receipt: &ReceiptHandle) -> Result<(), QueueError> {
        Err(not_implemented("complete"))
    }

    async fn abandon_message(&self, _receipt: &ReceiptHandle) -> Result<(), QueueError> {
        Err(not_implemented("abandon"))
    }

    async fn defer_message(&self, _receipt: &ReceiptHandle) -> Result<(), QueueError> {
        Err(not_implemented("defer"))
    }

    async fn dead_letter_message(
        &self,
        _receipt: &ReceiptHandle,
        _reason: &str,
    ) -> Result<(), QueueError> {
        Err(not_implemented("dead-letter"))
    }

    async fn renew_message_lock(&self, _receipt: &ReceiptHandle) -> Result<Timestamp, QueueError> {
        Err(not_implemented("message lock renewal"))
    }

    async fn create_session_client(
        &self,
        _queue: &QueueName,
        _session_id: Option<SessionId>,
    ) -> Result<Box<dyn SessionProvider>, QueueError> {
        Err(not_implemented("session acceptance"))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }

    fn supports_sessions(&self) -> SessionSupport {
        SessionSupport::Native
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn max_batch_size_bytes(&self) -> usize {
        // Standard-tier maximum message/batch size.
        256 * 1024
    }
}

/// Cached per-queue connection handle
#[derive(Debug)]
struct QueueHandle {
    #[allow(dead_code)] // Read once real senders/receivers are attached
    queue_name: QueueName,
}
