//! End-to-end producer/consumer flows over the in-memory broker.

mod common;

use common::{queue, seed_session, session, test_client};
use relay_runtime::{QueueClient, QueueError, SessionClient};
use relay_worker::{
    ConsumerPhase, SessionConsumer, SessionConsumerConfig, SessionProducer, SessionProducerConfig,
};
use std::sync::Arc;

fn consumer_config() -> SessionConsumerConfig {
    SessionConsumerConfig {
        max_wait: chrono::Duration::milliseconds(200),
        ..Default::default()
    }
}

/// Producer output flows through the broker into the consumer; every work
/// message is settled via the complete path before the sentinel arrives.
#[tokio::test]
async fn produced_messages_are_settled_exactly_once() {
    let client = test_client();
    let queue = queue("e2e-roundtrip");
    let session_id = session("orders-1");

    let producer_config = SessionProducerConfig {
        iterations: Some(2),
        idle_delay: std::time::Duration::from_millis(5),
        ..SessionProducerConfig::new(session_id.clone())
    };
    let produced = SessionProducer::new(producer_config)
        .run(client.as_ref(), &queue)
        .await
        .unwrap();

    SessionProducer::new(SessionProducerConfig::shutdown_only(session_id.clone()))
        .run(client.as_ref(), &queue)
        .await
        .unwrap();

    let session_client = client
        .accept_session(&queue, Some(session_id))
        .await
        .unwrap();
    let report = SessionConsumer::new(consumer_config())
        .run(session_client.as_ref())
        .await
        .unwrap();

    // All work messages plus the sentinel, each settled exactly once.
    assert_eq!(report.settled, produced.total_sent() + 1);
    assert!(report.sentinel_seen);
    assert_eq!(report.final_phase, ConsumerPhase::Ended);

    // Nothing remains in the session afterwards.
    let leftovers = session_client
        .receive_messages(32, chrono::Duration::zero())
        .await
        .unwrap();
    assert!(leftovers.is_empty());
}

/// The sentinel terminates the loop in the iteration that observes it, and
/// the session state walks START -> CLOSED -> END.
#[tokio::test]
async fn sentinel_drives_state_transitions() {
    let client = test_client();
    let queue = queue("e2e-states");
    let session_id = session("orders-2");
    seed_session(&client, &queue, &session_id, &["a", "b", "shutdown"]).await;

    let session_client = client
        .accept_session(&queue, Some(session_id.clone()))
        .await
        .unwrap();

    // Observe the START marker from a second handle on the same broker
    // before the consumer finishes: run the consumer concurrently.
    let consumer_session: Arc<dyn SessionClient> = Arc::from(session_client);
    let runner = {
        let consumer_session = Arc::clone(&consumer_session);
        tokio::spawn(async move {
            SessionConsumer::new(consumer_config())
                .run(consumer_session.as_ref())
                .await
        })
    };

    let report = runner.await.unwrap().unwrap();
    assert!(report.sentinel_seen);

    // Final state is the END marker, written after CLOSED.
    assert_eq!(
        consumer_session.get_state().await.unwrap(),
        Some("END".to_string())
    );
}

/// An idle wait with zero messages is a scheduling iteration, not an error,
/// and leaves session state untouched until the loop actually ends.
#[tokio::test]
async fn timeout_does_not_terminate_or_change_state() {
    let client = test_client();
    let queue = queue("e2e-idle");
    let session_id = session("orders-3");
    seed_session(&client, &queue, &session_id, &["only-message"]).await;

    let session_client = client
        .accept_session(&queue, Some(session_id))
        .await
        .unwrap();
    let config = SessionConsumerConfig {
        max_idle_batches: Some(2),
        ..consumer_config()
    };
    let report = SessionConsumer::new(config)
        .run(session_client.as_ref())
        .await
        .unwrap();

    assert_eq!(report.settled, 1);
    assert_eq!(report.idle_batches, 2);
    assert!(!report.sentinel_seen);
    // The loop ended through the idle bound: state went START -> END with
    // no CLOSED in between.
    assert_eq!(
        session_client.get_state().await.unwrap(),
        Some("END".to_string())
    );
}

/// A second consumer cannot attach while the session is held, and can once
/// the first consumer is done.
#[tokio::test]
async fn session_is_exclusively_held() {
    let client = test_client();
    let queue = queue("e2e-exclusive");
    let session_id = session("orders-4");
    seed_session(&client, &queue, &session_id, &["shutdown"]).await;

    let holder = client
        .accept_session(&queue, Some(session_id.clone()))
        .await
        .unwrap();

    let contender = client.accept_session(&queue, Some(session_id.clone())).await;
    assert!(matches!(
        contender.map(|_| ()),
        Err(QueueError::SessionLocked { .. })
    ));

    SessionConsumer::new(consumer_config())
        .run(holder.as_ref())
        .await
        .unwrap();
    holder.close_session().await.unwrap();

    let successor = client.accept_session(&queue, Some(session_id)).await;
    assert!(successor.is_ok());
}
