//! Lock-renewal behavior with slow consumers over the in-memory broker.

mod common;

use common::{client_with_config, queue, seed_session, session};
use relay_runtime::{InMemoryConfig, QueueClient, QueueError, SessionClient};
use relay_worker::{LockRenewer, RenewalError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn short_lock_config() -> InMemoryConfig {
    InMemoryConfig {
        message_lock_duration_seconds: 1,
        session_lock_duration_seconds: 1,
        ..Default::default()
    }
}

/// Without renewal a slow consumer loses its session; with the renewer the
/// same pause is survivable.
#[tokio::test]
async fn renewal_bridges_slow_processing() {
    let client = client_with_config(short_lock_config());
    let queue = queue("renewal-slow-consumer");
    let session_id = session("orders-1");
    seed_session(&client, &queue, &session_id, &["slow-work"]).await;

    let session_client: Arc<dyn SessionClient> = Arc::from(
        client
            .accept_session(&queue, Some(session_id))
            .await
            .unwrap(),
    );

    let renewer = LockRenewer::with_interval(Duration::from_millis(250));
    renewer
        .register_session(Arc::clone(&session_client), Duration::from_secs(10))
        .await
        .unwrap();

    // Simulated slow application-level processing, twice the lock duration.
    tokio::time::sleep(Duration::from_millis(2200)).await;

    let batch = session_client
        .receive_messages(1, chrono::Duration::zero())
        .await
        .expect("renewed session lock should still be valid");
    assert_eq!(batch.len(), 1);
    session_client
        .complete_message(batch[0].receipt_handle.clone())
        .await
        .unwrap();

    renewer.close().await;
}

/// Two lockables with different windows renew independently: the short one
/// expires on schedule while the long one keeps going.
#[tokio::test]
async fn lockables_renew_independently() {
    let client = client_with_config(short_lock_config());
    let queue = queue("renewal-independent");
    let short_session = session("orders-short");
    let long_session = session("orders-long");
    seed_session(&client, &queue, &short_session, &["a"]).await;
    seed_session(&client, &queue, &long_session, &["b"]).await;

    let short_client: Arc<dyn SessionClient> = Arc::from(
        client
            .accept_session(&queue, Some(short_session))
            .await
            .unwrap(),
    );
    let long_client: Arc<dyn SessionClient> = Arc::from(
        client
            .accept_session(&queue, Some(long_session))
            .await
            .unwrap(),
    );

    let renewer = LockRenewer::with_interval(Duration::from_millis(200));
    renewer
        .register_session(Arc::clone(&short_client), Duration::from_millis(400))
        .await
        .unwrap();
    renewer
        .register_session(Arc::clone(&long_client), Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(renewer.active_count().await, 2);

    // Past the short window but within the long one.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(renewer.active_count().await, 1);

    // The long session is still being renewed past its base lock duration.
    tokio::time::sleep(Duration::from_millis(600)).await;
    long_client
        .receive_messages(1, chrono::Duration::zero())
        .await
        .expect("long session lock should still be valid");

    renewer.close().await;
    assert_eq!(renewer.active_count().await, 0);
}

/// Closing the helper stops every renewal regardless of remaining window,
/// twice over without complaint.
#[tokio::test]
async fn close_is_prompt_and_idempotent() {
    let client = client_with_config(short_lock_config());
    let queue = queue("renewal-close");
    let session_id = session("orders-1");
    seed_session(&client, &queue, &session_id, &["work"]).await;

    let session_client: Arc<dyn SessionClient> = Arc::from(
        client
            .accept_session(&queue, Some(session_id))
            .await
            .unwrap(),
    );

    let renewer = LockRenewer::with_interval(Duration::from_millis(100));
    renewer
        .register_session(Arc::clone(&session_client), Duration::from_secs(3600))
        .await
        .unwrap();

    renewer.close().await;
    renewer.close().await;
    assert_eq!(renewer.active_count().await, 0);

    // With renewal stopped, the one-second session lock lapses.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let result = session_client.receive_messages(1, chrono::Duration::zero()).await;
    assert!(matches!(
        result,
        Err(QueueError::SessionLockExpired { .. })
    ));

    let late = renewer
        .register_session(session_client, Duration::from_secs(1))
        .await;
    assert!(matches!(late, Err(RenewalError::Closed)));
}

/// A renewal failure on one lockable is reported without stopping siblings.
#[tokio::test]
async fn renewal_failure_is_reported_and_isolated() {
    let client = client_with_config(short_lock_config());
    let queue = queue("renewal-failure");
    let healthy = session("orders-healthy");
    let doomed = session("orders-doomed");
    seed_session(&client, &queue, &healthy, &["a"]).await;
    seed_session(&client, &queue, &doomed, &["b"]).await;

    let healthy_client: Arc<dyn SessionClient> =
        Arc::from(client.accept_session(&queue, Some(healthy)).await.unwrap());
    let doomed_client: Arc<dyn SessionClient> =
        Arc::from(client.accept_session(&queue, Some(doomed)).await.unwrap());

    let failures = Arc::new(AtomicUsize::new(0));
    let renewer = {
        let failures = Arc::clone(&failures);
        LockRenewer::with_interval(Duration::from_millis(200))
            .on_failure(move |_| {
                failures.fetch_add(1, Ordering::SeqCst);
            })
    };

    renewer
        .register_session(Arc::clone(&healthy_client), Duration::from_secs(30))
        .await
        .unwrap();
    renewer
        .register_session(Arc::clone(&doomed_client), Duration::from_secs(30))
        .await
        .unwrap();

    // Releasing the doomed session makes its next renewal fail.
    doomed_client.close_session().await.unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(renewer.active_count().await, 1);

    healthy_client
        .receive_messages(1, chrono::Duration::zero())
        .await
        .expect("healthy session should survive the sibling failure");

    renewer.close().await;
}
