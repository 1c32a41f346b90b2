//! # Relay Runtime
//!
//! Session-partitioned queue runtime for reliable, ordered message
//! processing with Azure Service Bus and in-memory implementations.
//!
//! This library provides:
//! - Provider-agnostic queue operations (send, receive, settle)
//! - Session-scoped receivers with broker-persisted session state
//! - Message and session lock renewal
//! - Size-bounded batch packing
//! - Deferred, scheduled, and dead-lettered message handling
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message structures, receipt handles, and batch packing
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and implementations

// Module declarations
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{
    QueueClient, QueueClientFactory, QueueProvider, SessionClient, SessionProvider,
    StandardQueueClient,
};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    BatchCapacityError, Message, MessageBatch, MessageId, PeekedMessage, QueueName, ReceiptHandle,
    ReceivedMessage, SessionId, Timestamp,
};
pub use provider::{
    AzureServiceBusConfig, InMemoryConfig, ProviderConfig, ProviderType, QueueConfig,
    SessionSupport, SubQueue,
};
pub use providers::{AzureAuthMethod, AzureError, AzureServiceBusProvider, InMemoryProvider};
