//! Tests for the in-memory queue provider.

use super::*;
use crate::client::QueueProvider;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn session(id: &str) -> SessionId {
    SessionId::new(id.to_string()).unwrap()
}

fn provider() -> InMemoryProvider {
    InMemoryProvider::default()
}

/// Provider with second-granularity locks for expiry tests
fn provider_with_short_locks() -> InMemoryProvider {
    InMemoryProvider::new(InMemoryConfig {
        message_lock_duration_seconds: 1,
        session_lock_duration_seconds: 1,
        ..Default::default()
    })
}

// ============================================================================
// Queue-level send / receive / settle
// ============================================================================

#[tokio::test]
async fn test_send_receive_round_trip() {
    let provider = provider();
    let queue = queue("plain-queue");

    let sent_id = provider
        .send_message(&queue, &Message::from_text("work item"))
        .await
        .unwrap();

    let received = provider
        .receive_messages(&queue, 10, Duration::seconds(1))
        .await
        .unwrap();

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message_id, sent_id);
    assert_eq!(received[0].body_text(), Some("work item"));
    assert_eq!(received[0].delivery_count, 1);
}

#[tokio::test]
async fn test_receive_empty_queue_returns_empty_after_budget() {
    let provider = provider();
    let queue = queue("quiet-queue");
    provider
        .send_message(&queue, &Message::from_text("seed"))
        .await
        .unwrap();
    // Drain the queue so the next receive waits out its budget.
    let seed = provider
        .receive_messages(&queue, 10, Duration::zero())
        .await
        .unwrap();
    provider
        .complete_message(&seed[0].receipt_handle)
        .await
        .unwrap();

    let received = provider
        .receive_messages(&queue, 10, Duration::milliseconds(100))
        .await
        .unwrap();

    assert!(received.is_empty());
}

#[tokio::test]
async fn test_receive_unknown_queue_fails() {
    let provider = provider();

    let result = provider
        .receive_messages(&queue("never-created"), 1, Duration::zero())
        .await;

    assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
}

#[tokio::test]
async fn test_complete_settles_exactly_once() {
    let provider = provider();
    let queue = queue("complete-queue");
    provider
        .send_message(&queue, &Message::from_text("one"))
        .await
        .unwrap();

    let received = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    let receipt = received[0].receipt_handle.clone();

    provider.complete_message(&receipt).await.unwrap();

    // A second settlement of the same receipt fails.
    let second = provider.complete_message(&receipt).await;
    assert!(matches!(second, Err(QueueError::MessageNotFound { .. })));

    // And the message is gone.
    let recheck = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    assert!(recheck.is_empty());
}

#[tokio::test]
async fn test_abandon_redelivers_in_order() {
    let provider = provider();
    let queue = queue("abandon-queue");
    provider
        .send_message(&queue, &Message::from_text("first"))
        .await
        .unwrap();
    provider
        .send_message(&queue, &Message::from_text("second"))
        .await
        .unwrap();

    let batch = provider
        .receive_messages(&queue, 2, Duration::zero())
        .await
        .unwrap();
    provider
        .abandon_message(&batch[0].receipt_handle)
        .await
        .unwrap();
    provider
        .abandon_message(&batch[1].receipt_handle)
        .await
        .unwrap();

    let redelivered = provider
        .receive_messages(&queue, 2, Duration::zero())
        .await
        .unwrap();
    assert_eq!(redelivered[0].body_text(), Some("first"));
    assert_eq!(redelivered[1].body_text(), Some("second"));
    assert_eq!(redelivered[0].delivery_count, 2);
}

#[tokio::test]
async fn test_exhausted_deliveries_dead_letter() {
    let provider = InMemoryProvider::new(InMemoryConfig {
        max_delivery_count: 2,
        ..Default::default()
    });
    let queue = queue("dlq-queue");
    provider
        .send_message(&queue, &Message::from_text("poison"))
        .await
        .unwrap();

    // Two failed deliveries exhaust the budget.
    for _ in 0..2 {
        let batch = provider
            .receive_messages(&queue, 1, Duration::zero())
            .await
            .unwrap();
        provider
            .abandon_message(&batch[0].receipt_handle)
            .await
            .unwrap();
    }

    let main = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    assert!(main.is_empty(), "poison message should leave the main queue");

    let dead = provider
        .receive_sub_queue_messages(&queue, SubQueue::DeadLetter, 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body_text(), Some("poison"));
    assert_eq!(
        dead[0].attributes.get(DEAD_LETTER_REASON_ATTRIBUTE),
        Some(&"MaxDeliveryCountExceeded".to_string())
    );
}

#[tokio::test]
async fn test_explicit_dead_letter_carries_reason() {
    let provider = provider();
    let queue = queue("reason-queue");
    provider
        .send_message(&queue, &Message::from_text("bad payload"))
        .await
        .unwrap();

    let batch = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    provider
        .dead_letter_message(&batch[0].receipt_handle, "schema mismatch")
        .await
        .unwrap();

    let dead = provider
        .receive_sub_queue_messages(&queue, SubQueue::DeadLetter, 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(
        dead[0].attributes.get(DEAD_LETTER_REASON_ATTRIBUTE),
        Some(&"schema mismatch".to_string())
    );
}

#[tokio::test]
async fn test_defer_and_receive_deferred() {
    let provider = provider();
    let queue = queue("defer-queue");
    provider
        .send_message(&queue, &Message::from_text("later"))
        .await
        .unwrap();

    let batch = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    let sequence = batch[0].sequence_number;
    provider
        .defer_message(&batch[0].receipt_handle)
        .await
        .unwrap();

    // Deferred messages are invisible to normal receives.
    let invisible = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    assert!(invisible.is_empty());

    let deferred = provider
        .receive_deferred_messages(&queue, &[sequence])
        .await
        .unwrap();
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].body_text(), Some("later"));

    let missing = provider.receive_deferred_messages(&queue, &[sequence]).await;
    assert!(matches!(missing, Err(QueueError::MessageNotFound { .. })));
}

#[tokio::test]
async fn test_scheduled_message_activates_and_cancels() {
    let provider = provider();
    let queue = queue("schedule-queue");

    let soon = Timestamp::from_datetime(Utc::now() + Duration::milliseconds(150));
    let far = Timestamp::from_datetime(Utc::now() + Duration::hours(1));

    let _activating = provider
        .schedule_message(&queue, &Message::from_text("on time"), soon)
        .await
        .unwrap();
    let cancellable = provider
        .schedule_message(&queue, &Message::from_text("never"), far)
        .await
        .unwrap();

    // Neither is visible yet.
    let early = provider
        .receive_messages(&queue, 2, Duration::zero())
        .await
        .unwrap();
    assert!(early.is_empty());

    provider
        .cancel_scheduled_message(&queue, cancellable)
        .await
        .unwrap();

    let arrived = provider
        .receive_messages(&queue, 2, Duration::milliseconds(500))
        .await
        .unwrap();
    assert_eq!(arrived.len(), 1);
    assert_eq!(arrived[0].body_text(), Some("on time"));

    // The activated message can no longer be cancelled.
    let gone = provider
        .cancel_scheduled_message(&queue, arrived[0].sequence_number)
        .await;
    assert!(matches!(gone, Err(QueueError::MessageNotFound { .. })));
}

#[tokio::test]
async fn test_peek_does_not_consume() {
    let provider = provider();
    let queue = queue("peek-queue");
    provider
        .send_message(&queue, &Message::from_text("visible"))
        .await
        .unwrap();

    let peeked = provider.peek_messages(&queue, 10, None).await.unwrap();
    assert_eq!(peeked.len(), 1);
    assert_eq!(peeked[0].body_text(), Some("visible"));
    assert_eq!(peeked[0].delivery_count, 0);

    // Still receivable afterwards.
    let received = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn test_expired_message_lock_triggers_redelivery() {
    let provider = provider_with_short_locks();
    let queue = queue("expiry-queue");
    provider
        .send_message(&queue, &Message::from_text("slow consumer"))
        .await
        .unwrap();

    let first = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    let receipt = first[0].receipt_handle.clone();

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    // The lapsed lease means settlement fails and the message redelivers.
    let redelivered = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].delivery_count, 2);

    let stale = provider.complete_message(&receipt).await;
    assert!(matches!(stale, Err(QueueError::MessageNotFound { .. })));
}

#[tokio::test]
async fn test_renew_message_lock_extends_lease() {
    let provider = provider_with_short_locks();
    let queue = queue("renew-queue");
    provider
        .send_message(&queue, &Message::from_text("long job"))
        .await
        .unwrap();

    let batch = provider
        .receive_messages(&queue, 1, Duration::zero())
        .await
        .unwrap();
    let receipt = batch[0].receipt_handle.clone();

    // Renew twice across the original one-second lease.
    for _ in 0..2 {
        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        provider.renew_message_lock(&receipt).await.unwrap();
    }

    provider.complete_message(&receipt).await.unwrap();
}

// ============================================================================
// Session semantics
// ============================================================================

#[tokio::test]
async fn test_queue_receive_skips_session_messages() {
    let provider = provider();
    let queue = queue("mixed-queue");
    provider
        .send_message(
            &queue,
            &Message::from_text("sessioned").with_session_id(session("orders-1")),
        )
        .await
        .unwrap();
    provider
        .send_message(&queue, &Message::from_text("plain"))
        .await
        .unwrap();

    let received = provider
        .receive_messages(&queue, 10, Duration::zero())
        .await
        .unwrap();

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body_text(), Some("plain"));
}

#[tokio::test]
async fn test_session_receive_is_exclusive_and_ordered() {
    let provider = provider();
    let queue = queue("session-queue");
    for i in 0..3 {
        provider
            .send_message(
                &queue,
                &Message::from_text(&format!("item-{i}")).with_session_id(session("orders-1")),
            )
            .await
            .unwrap();
    }

    let client = provider
        .create_session_client(&queue, Some(session("orders-1")))
        .await
        .unwrap();

    // A second consumer cannot take the session while it is held.
    let contender = provider
        .create_session_client(&queue, Some(session("orders-1")))
        .await;
    assert!(matches!(contender, Err(QueueError::SessionLocked { .. })));

    let batch = client.receive_messages(10, Duration::zero()).await.unwrap();
    let bodies: Vec<_> = batch.iter().map(|m| m.body_text().unwrap()).collect();
    assert_eq!(bodies, vec!["item-0", "item-1", "item-2"]);

    for message in &batch {
        client
            .complete_message(&message.receipt_handle)
            .await
            .unwrap();
    }

    // Releasing the session lets the next consumer in.
    client.close_session().await.unwrap();
    let successor = provider
        .create_session_client(&queue, Some(session("orders-1")))
        .await;
    assert!(successor.is_ok());
}

#[tokio::test]
async fn test_session_state_persists_across_consumers() {
    let provider = provider();
    let queue = queue("state-queue");

    let first = provider
        .create_session_client(&queue, Some(session("orders-1")))
        .await
        .unwrap();
    assert_eq!(first.get_state().await.unwrap(), None);
    first.set_state("START".to_string()).await.unwrap();
    assert_eq!(first.get_state().await.unwrap(), Some("START".to_string()));
    first.close_session().await.unwrap();

    let second = provider
        .create_session_client(&queue, Some(session("orders-1")))
        .await
        .unwrap();
    assert_eq!(second.get_state().await.unwrap(), Some("START".to_string()));
}

#[tokio::test]
async fn test_session_lock_renewal_and_expiry() {
    let provider = provider_with_short_locks();
    let queue = queue("session-expiry-queue");
    provider
        .send_message(
            &queue,
            &Message::from_text("work").with_session_id(session("orders-1")),
        )
        .await
        .unwrap();

    let client = provider
        .create_session_client(&queue, Some(session("orders-1")))
        .await
        .unwrap();

    let before = client.session_expires_at();
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    let renewed = client.renew_session_lock().await.unwrap();
    assert!(renewed > before);

    // Let the renewed lock lapse entirely.
    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    let result = client.receive_messages(1, Duration::zero()).await;
    assert!(matches!(
        result,
        Err(QueueError::SessionLockExpired { .. })
    ));
    let renewal = client.renew_session_lock().await;
    assert!(matches!(
        renewal,
        Err(QueueError::SessionLockExpired { .. })
    ));
}

#[tokio::test]
async fn test_next_available_session_acceptance() {
    let provider = provider();
    let queue = queue("next-session-queue");

    // No sessions with messages yet.
    let none = provider.create_session_client(&queue, None).await;
    assert!(matches!(none.map(|_| ()), Err(QueueError::Timeout { .. })));

    provider
        .send_message(
            &queue,
            &Message::from_text("work").with_session_id(session("orders-7")),
        )
        .await
        .unwrap();

    let client = provider.create_session_client(&queue, None).await.unwrap();
    assert_eq!(client.session_id().as_str(), "orders-7");
}
