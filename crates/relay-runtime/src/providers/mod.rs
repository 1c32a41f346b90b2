//! Queue provider implementations.
//!
//! - [`memory`] - Fully functional in-memory provider for tests and development
//! - [`azure`] - Azure Service Bus provider surface

pub mod azure;
pub mod memory;

pub use azure::{AzureAuthMethod, AzureError, AzureServiceBusProvider};
pub use memory::InMemoryProvider;
