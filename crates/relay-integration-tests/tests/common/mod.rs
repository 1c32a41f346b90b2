//! Shared helpers for Session-Relay integration tests.

use relay_runtime::{
    InMemoryConfig, InMemoryProvider, Message, QueueClient, QueueConfig, QueueName, SessionId,
    StandardQueueClient,
};
use std::sync::Arc;

/// Client over a fresh in-memory broker with default locks
pub fn test_client() -> Arc<dyn QueueClient> {
    client_with_config(InMemoryConfig::default())
}

/// Client over a fresh in-memory broker with the given provider config
pub fn client_with_config(config: InMemoryConfig) -> Arc<dyn QueueClient> {
    let provider = InMemoryProvider::new(config);
    Arc::new(StandardQueueClient::new(
        Box::new(provider),
        QueueConfig::default(),
    ))
}

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).expect("valid queue name")
}

pub fn session(id: &str) -> SessionId {
    SessionId::new(id.to_string()).expect("valid session id")
}

/// Send plain-text work messages into a session
pub async fn seed_session(
    client: &Arc<dyn QueueClient>,
    queue: &QueueName,
    session_id: &SessionId,
    bodies: &[&str],
) {
    for body in bodies {
        client
            .send_message(
                queue,
                Message::from_text(body).with_session_id(session_id.clone()),
            )
            .await
            .expect("seed send should succeed");
    }
}
