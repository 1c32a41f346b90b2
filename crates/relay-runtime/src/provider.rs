//! Provider types and configuration.

use crate::providers::azure::AzureAuthMethod;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AzureServiceBus,
    InMemory,
}

impl ProviderType {
    /// Get session support level for provider
    pub fn supports_sessions(&self) -> SessionSupport {
        match self {
            Self::AzureServiceBus => SessionSupport::Native,
            Self::InMemory => SessionSupport::Native,
        }
    }

    /// Check if provider supports batch operations
    pub fn supports_batching(&self) -> bool {
        match self {
            Self::AzureServiceBus => true,
            Self::InMemory => true,
        }
    }

    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AzureServiceBus => 1024 * 1024, // 1MB
            Self::InMemory => 10 * 1024 * 1024,   // 10MB
        }
    }
}

/// Level of session support provided by different providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSupport {
    /// Provider has built-in session support
    Native,
    /// Provider emulates sessions via other mechanisms
    Emulated,
    /// Provider cannot support session ordering
    Unsupported,
}

/// Secondary queue selector for receiving already-settled message streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubQueue {
    /// Messages that were dead-lettered from the main queue
    DeadLetter,
}

/// Configuration for queue client initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
    /// Default operation timeout, in seconds
    pub default_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub enable_dead_letter: bool,
}

impl QueueConfig {
    /// Default operation timeout as a duration
    pub fn default_timeout(&self) -> Duration {
        Duration::seconds(self.default_timeout_seconds as i64)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            default_timeout_seconds: 30,
            max_retry_attempts: 3,
            enable_dead_letter: true,
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    AzureServiceBus(AzureServiceBusConfig),
    InMemory(InMemoryConfig),
}

/// Azure Service Bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureServiceBusConfig {
    /// Connection string with embedded credentials (ConnectionString auth)
    pub connection_string: Option<String>,
    /// Fully qualified namespace, e.g. `myns.servicebus.windows.net`
    /// (credential-based auth methods)
    pub namespace: Option<String>,
    pub auth_method: AzureAuthMethod,
    pub use_sessions: bool,
    /// Session lock timeout, in seconds
    pub session_timeout_seconds: u64,
}

impl AzureServiceBusConfig {
    /// Session lock timeout as a duration
    pub fn session_timeout(&self) -> Duration {
        Duration::seconds(self.session_timeout_seconds as i64)
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    /// Deliveries after which a message is dead-lettered instead of requeued
    pub max_delivery_count: u32,
    /// Message TTL applied when the message itself carries none, in seconds
    pub default_message_ttl_seconds: Option<u64>,
    pub enable_dead_letter_queue: bool,
    /// Visibility lock held per received message, in seconds
    pub message_lock_duration_seconds: u64,
    /// Exclusive session lock duration, in seconds
    pub session_lock_duration_seconds: u64,
    /// Byte budget handed to batches created against this provider
    pub max_batch_size_bytes: usize,
}

impl InMemoryConfig {
    /// Visibility lock duration as a duration
    pub fn message_lock_duration(&self) -> Duration {
        Duration::seconds(self.message_lock_duration_seconds as i64)
    }

    /// Session lock duration as a duration
    pub fn session_lock_duration(&self) -> Duration {
        Duration::seconds(self.session_lock_duration_seconds as i64)
    }

    /// Default message TTL as a duration, if configured
    pub fn default_message_ttl(&self) -> Option<Duration> {
        self.default_message_ttl_seconds
            .map(|s| Duration::seconds(s as i64))
    }
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            max_delivery_count: 3,
            default_message_ttl_seconds: None,
            enable_dead_letter_queue: true,
            message_lock_duration_seconds: 60,
            session_lock_duration_seconds: 300,
            max_batch_size_bytes: 256 * 1024,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
