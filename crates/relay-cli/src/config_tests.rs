//! Tests for CLI configuration loading and validation.

use super::*;
use serial_test::serial;
use std::io::Write;

#[test]
fn test_defaults_are_valid() {
    let config = RelayConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.provider, ProviderKind::Memory);
    assert_eq!(config.queue, "relay-work-queue");
    assert_eq!(config.sentinel, "shutdown");
    assert_eq!(config.max_idle_batches, None);
}

#[test]
fn test_validation_rejects_bad_fields() {
    let bad_queue = RelayConfig {
        queue: "has space".to_string(),
        ..Default::default()
    };
    assert!(bad_queue.validate().is_err());

    let empty_sentinel = RelayConfig {
        sentinel: String::new(),
        ..Default::default()
    };
    assert!(empty_sentinel.validate().is_err());

    let zero_batch = RelayConfig {
        max_messages: 0,
        ..Default::default()
    };
    assert!(zero_batch.validate().is_err());
}

#[test]
fn test_azure_provider_requires_endpoint_details() {
    let bare = RelayConfig {
        provider: ProviderKind::Azure,
        ..Default::default()
    };
    assert!(matches!(
        bare.validate(),
        Err(ConfigurationError::Missing { .. })
    ));

    let with_connection_string = RelayConfig {
        provider: ProviderKind::Azure,
        connection_string: Some("Endpoint=sb://example/".to_string()),
        ..Default::default()
    };
    assert!(with_connection_string.validate().is_ok());

    let with_namespace = RelayConfig {
        provider: ProviderKind::Azure,
        namespace: Some("example.servicebus.windows.net".to_string()),
        ..Default::default()
    };
    assert!(with_namespace.validate().is_ok());
}

#[test]
fn test_to_queue_config_maps_provider() {
    let memory = RelayConfig::default().to_queue_config();
    assert!(matches!(memory.provider, ProviderConfig::InMemory(_)));

    let azure = RelayConfig {
        provider: ProviderKind::Azure,
        connection_string: Some("Endpoint=sb://example/".to_string()),
        session_timeout_seconds: 120,
        ..Default::default()
    }
    .to_queue_config();

    match azure.provider {
        ProviderConfig::AzureServiceBus(config) => {
            assert!(matches!(
                config.auth_method,
                AzureAuthMethod::ConnectionString
            ));
            assert!(config.use_sessions);
            assert_eq!(config.session_timeout_seconds, 120);
        }
        other => panic!("expected Azure provider config, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_load_reads_file_and_environment() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    writeln!(
        file,
        "queue = \"file-queue\"\nsession = \"file-session\"\nmax_messages = 4"
    )
    .unwrap();

    std::env::set_var("RELAY__SESSION", "env-session");
    let config = RelayConfig::load(Some(file.path())).unwrap();
    std::env::remove_var("RELAY__SESSION");

    // File values apply; environment overrides the file.
    assert_eq!(config.queue, "file-queue");
    assert_eq!(config.session, "env-session");
    assert_eq!(config.max_messages, 4);
}

#[test]
#[serial]
fn test_load_rejects_invalid_file_values() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    writeln!(file, "queue = \"-bad-queue-name\"").unwrap();

    let result = RelayConfig::load(Some(file.path()));
    assert!(result.is_err());
}
