//! Background lock renewal for messages and sessions.
//!
//! A broker lease expires unless it is refreshed, but how long application
//! processing takes has nothing to do with how often the broker wants to
//! hear from us. [`LockRenewer`] decouples the two: each registered
//! lockable gets its own background task that renews on a fixed cadence
//! until a maximum duration elapses, renewal fails, or the helper is
//! closed.
//!
//! Renewal failure (the lock was already lost) terminates only that
//! lockable's task. Siblings keep renewing; the failure is reported through
//! the optional callback and a tracing warning rather than by interrupting
//! the caller's own processing.

use relay_runtime::{QueueClient, QueueError, ReceiptHandle, SessionClient, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;

/// Default pause between renewal attempts for one lockable
const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(20);

/// Error returned by [`LockRenewer::register_session`] and
/// [`LockRenewer::register_message`]
#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error("lock renewer is closed")]
    Closed,
}

/// A renewal attempt that failed, ending that lockable's renewal task
#[derive(Debug)]
pub struct RenewalFailure {
    /// Which lockable failed, e.g. `session:orders-17`
    pub label: String,
    /// The broker error that ended renewal
    pub error: QueueError,
}

type FailureCallback = Arc<dyn Fn(&RenewalFailure) + Send + Sync>;

// ============================================================================
// Lockables
// ============================================================================

/// A lease the renewer knows how to refresh
enum Lockable {
    Session(Arc<dyn SessionClient>),
    Message {
        client: Arc<dyn QueueClient>,
        receipt: ReceiptHandle,
    },
}

impl Lockable {
    fn label(&self) -> String {
        match self {
            Self::Session(session) => format!("session:{}", session.session_id()),
            Self::Message { receipt, .. } => format!("message:{}", receipt.handle()),
        }
    }

    async fn renew(&self) -> Result<Timestamp, QueueError> {
        match self {
            Self::Session(session) => session.renew_session_lock().await,
            Self::Message { client, receipt } => client.renew_message_lock(receipt).await,
        }
    }
}

// ============================================================================
// LockRenewer
// ============================================================================

struct RenewerState {
    tasks: Vec<RenewalTask>,
    closed: bool,
}

struct RenewalTask {
    label: String,
    handle: JoinHandle<()>,
}

/// Keeps registered message and session locks alive in the background.
///
/// Each registration spawns an independent task; registrations and
/// [`close`](Self::close) may race from multiple tasks, so the registry
/// sits behind a mutex. `close` is idempotent.
pub struct LockRenewer {
    interval: Duration,
    on_failure: Option<FailureCallback>,
    state: Mutex<RenewerState>,
    shutdown: watch::Sender<bool>,
}

impl LockRenewer {
    /// Create a renewer with the default renewal interval
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_RENEWAL_INTERVAL)
    }

    /// Create a renewer renewing each lockable every `interval`.
    ///
    /// The interval must be comfortably smaller than the broker's lock
    /// duration or leases will lapse between renewals.
    pub fn with_interval(interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            interval,
            on_failure: None,
            state: Mutex::new(RenewerState {
                tasks: Vec::new(),
                closed: false,
            }),
            shutdown,
        }
    }

    /// Install a callback invoked when a lockable's renewal fails
    pub fn on_failure(mut self, callback: impl Fn(&RenewalFailure) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    /// Keep a session lock alive for up to `max_duration`
    pub async fn register_session(
        &self,
        session: Arc<dyn SessionClient>,
        max_duration: Duration,
    ) -> Result<(), RenewalError> {
        self.register(Lockable::Session(session), max_duration).await
    }

    /// Keep a message lock alive for up to `max_duration`
    pub async fn register_message(
        &self,
        client: Arc<dyn QueueClient>,
        receipt: ReceiptHandle,
        max_duration: Duration,
    ) -> Result<(), RenewalError> {
        self.register(Lockable::Message { client, receipt }, max_duration)
            .await
    }

    async fn register(
        &self,
        lockable: Lockable,
        max_duration: Duration,
    ) -> Result<(), RenewalError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(RenewalError::Closed);
        }

        let label = lockable.label();
        let handle = tokio::spawn(renewal_task(
            lockable,
            label.clone(),
            max_duration,
            self.interval,
            self.shutdown.subscribe(),
            self.on_failure.clone(),
        ));

        debug!(label = %label, ?max_duration, "registered lockable for renewal");
        state.tasks.push(RenewalTask { label, handle });
        Ok(())
    }

    /// Number of renewal tasks still running
    pub async fn active_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .tasks
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Cancel all renewal tasks and wait for them to stop.
    ///
    /// Calling `close` again is a no-op; registrations after `close` fail
    /// with [`RenewalError::Closed`].
    pub async fn close(&self) {
        let tasks = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };

        // Receivers may all be gone when every task already finished.
        let _ = self.shutdown.send(true);

        for task in tasks {
            if let Err(join_error) = task.handle.await {
                warn!(label = %task.label, error = %join_error, "renewal task join failed");
            }
        }
        debug!("lock renewer closed");
    }
}

impl Default for LockRenewer {
    fn default() -> Self {
        Self::new()
    }
}

/// Renewal loop for one lockable: sleep, renew, repeat, until the maximum
/// duration elapses, renewal fails, or the renewer shuts down.
async fn renewal_task(
    lockable: Lockable,
    label: String,
    max_duration: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    on_failure: Option<FailureCallback>,
) {
    let deadline = Instant::now() + max_duration;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(label = %label, "renewal window elapsed");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval.min(remaining)) => {}
            changed = shutdown.changed() => {
                // A closed channel means the renewer itself was dropped.
                if changed.is_err() || *shutdown.borrow() {
                    debug!(label = %label, "renewal cancelled");
                    return;
                }
                continue;
            }
        }

        if Instant::now() >= deadline {
            debug!(label = %label, "renewal window elapsed");
            return;
        }

        match lockable.renew().await {
            Ok(expires_at) => {
                debug!(label = %label, %expires_at, "lock renewed");
            }
            Err(error) => {
                warn!(
                    label = %label,
                    error = %error,
                    "lock renewal failed, stopping renewal for this lockable"
                );
                if let Some(callback) = &on_failure {
                    callback(&RenewalFailure { label, error });
                }
                return;
            }
        }
    }
}
