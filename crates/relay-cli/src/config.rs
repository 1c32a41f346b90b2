//! Configuration loading and validation for the Session-Relay CLI.
//!
//! Sources (applied in order — later sources override earlier ones):
//!  1. `./config/relay.toml`              — deployment-local file
//!  2. Path given by `--config`           — operator-specified file
//!  3. Environment variables prefixed `RELAY__` (double-underscore
//!     separator), e.g. `RELAY__QUEUE=work-queue` sets `queue`.
//!
//! Every field carries a serde default, so an entirely unconfigured
//! environment yields a valid configuration running against the in-memory
//! provider. A malformed file or an environment variable that cannot be
//! coerced to the right type is a hard error: that is deliberate-but-broken
//! operator configuration.

use relay_runtime::{
    AzureAuthMethod, AzureServiceBusConfig, ConfigurationError, InMemoryConfig, ProviderConfig,
    QueueConfig, QueueName, SessionId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Which broker backs the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process broker, for demos and tests
    Memory,
    /// Azure Service Bus
    Azure,
}

/// Top-level CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub provider: ProviderKind,
    /// Azure connection string (ConnectionString auth)
    pub connection_string: Option<String>,
    /// Azure fully qualified namespace (credential auth)
    pub namespace: Option<String>,
    /// Session-enabled queue name
    pub queue: String,
    /// Session the producer and consumer operate on
    pub session: String,
    /// Payload that terminates the consumer loop
    pub sentinel: String,
    /// Messages requested per consumer batch
    pub max_messages: u32,
    /// Consumer wait budget per receive call, in seconds
    pub max_wait_seconds: u64,
    /// Consecutive empty receives after which the consumer ends
    pub max_idle_batches: Option<u32>,
    /// Producer pause between iterations, in seconds
    pub idle_delay_seconds: u64,
    /// Lock-renewal cadence, in seconds
    pub renewal_interval_seconds: u64,
    /// Upper bound on background renewal per lockable, in seconds
    pub renewal_window_seconds: u64,
    /// Azure session lock timeout, in seconds
    pub session_timeout_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Memory,
            connection_string: None,
            namespace: None,
            queue: "relay-work-queue".to_string(),
            session: "relay-session-1".to_string(),
            sentinel: relay_worker::DEFAULT_SENTINEL.to_string(),
            max_messages: 10,
            max_wait_seconds: 300,
            max_idle_batches: None,
            idle_delay_seconds: 10,
            renewal_interval_seconds: 20,
            renewal_window_seconds: 3600,
            session_timeout_seconds: 300,
        }
    }
}

impl RelayConfig {
    /// Load configuration from files and `RELAY__` environment variables
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder().add_source(
            config::File::with_name("config/relay")
                .required(false)
                .format(config::FileFormat::Toml),
        );

        if let Some(path) = explicit_path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: e.to_string(),
            })?;

        let config: RelayConfig =
            settings
                .try_deserialize()
                .map_err(|e| ConfigurationError::Invalid {
                    message: e.to_string(),
                })?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency beyond what serde can express
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        QueueName::new(self.queue.clone()).map_err(|e| ConfigurationError::Invalid {
            message: format!("queue: {e}"),
        })?;
        SessionId::new(self.session.clone()).map_err(|e| ConfigurationError::Invalid {
            message: format!("session: {e}"),
        })?;

        if self.sentinel.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "sentinel must not be empty".to_string(),
            });
        }
        if self.max_messages == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_messages must be at least 1".to_string(),
            });
        }
        if self.renewal_interval_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "renewal_interval_seconds must be at least 1".to_string(),
            });
        }

        if self.provider == ProviderKind::Azure
            && self.connection_string.is_none()
            && self.namespace.is_none()
        {
            return Err(ConfigurationError::Missing {
                key: "connection_string or namespace".to_string(),
            });
        }

        Ok(())
    }

    /// Validated queue name
    pub fn queue_name(&self) -> QueueName {
        QueueName::new(self.queue.clone()).expect("queue validated at load time")
    }

    /// Validated session id
    pub fn session_id(&self) -> SessionId {
        SessionId::new(self.session.clone()).expect("session validated at load time")
    }

    /// Build the runtime queue configuration for the selected provider
    pub fn to_queue_config(&self) -> QueueConfig {
        let provider = match self.provider {
            ProviderKind::Memory => ProviderConfig::InMemory(InMemoryConfig::default()),
            ProviderKind::Azure => {
                // Prefer the connection string when both are configured.
                let auth_method = if self.connection_string.is_some() {
                    AzureAuthMethod::ConnectionString
                } else {
                    AzureAuthMethod::DefaultCredential
                };
                ProviderConfig::AzureServiceBus(AzureServiceBusConfig {
                    connection_string: self.connection_string.clone(),
                    namespace: self.namespace.clone(),
                    auth_method,
                    use_sessions: true,
                    session_timeout_seconds: self.session_timeout_seconds,
                })
            }
        };

        QueueConfig {
            provider,
            default_timeout_seconds: self.max_wait_seconds,
            ..Default::default()
        }
    }
}
