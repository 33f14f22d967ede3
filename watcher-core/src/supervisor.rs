//! Monitor supervisor: watcher lifecycle with restart-on-failure.
//!
//! The supervisor owns the watcher from start to stop. A failed subscription
//! at start is fatal and surfaced to the caller; a subscription lost while
//! running is retried with bounded exponential backoff, escalating to fatal
//! only when retries are exhausted. Monitoring tools are worthless if they
//! die quietly, so every terminal transition is logged with its cause and
//! visible through [`Supervisor::state`].

use crate::backend::WatchBackend;
use crate::error::WatchError;
use crate::registry::RegistryHandle;
use crate::watcher::{FileWatcher, StopSignal, WatcherConfig};
use canaryd_lib::alerting::{AlertLog, Notifier};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Supervisor lifecycle states.
///
/// `Stopped` is terminal; a new monitoring session requires a fresh
/// supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed, not yet started.
    Idle,
    /// Establishing the OS subscription.
    Starting,
    /// Watcher running and consuming events.
    Running,
    /// Subscription lost; restarting with backoff.
    Recovering {
        /// Restart attempt currently underway (1-based).
        attempt: u32,
    },
    /// Cooperative stop in progress.
    Stopping,
    /// Terminal.
    Stopped,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Recovering { attempt } => write!(f, "recovering (attempt {attempt})"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Restart policy for lost subscriptions.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Maximum consecutive restart attempts before escalating to fatal.
    pub max_attempts: u32,
    /// Initial backoff; doubles per consecutive attempt.
    pub initial_backoff: Duration,
    /// A watcher that ran at least this long resets the attempt counter.
    pub healthy_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            healthy_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Backoff before the given 1-based attempt, doubling per attempt.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Produces a fresh backend per (re)start.
pub type BackendFactory = Box<dyn Fn() -> Box<dyn WatchBackend> + Send + Sync>;

struct Shared {
    state: RwLock<SupervisorState>,
    stop: StopSignal,
    watcher_config: WatcherConfig,
    policy: RestartPolicy,
    registry: RegistryHandle,
    sink: Arc<AlertLog>,
    notifier: Arc<dyn Notifier>,
    backends: BackendFactory,
}

impl Shared {
    fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = next;
    }

    fn state(&self) -> SupervisorState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the watcher lifecycle for one monitoring session.
pub struct Supervisor {
    shared: Arc<Shared>,
    handle: tokio::sync::Mutex<Option<JoinHandle<Result<(), WatchError>>>>,
}

impl Supervisor {
    /// Construct a supervisor with explicit collaborators: no ambient
    /// globals, lifecycle is explicit start/stop.
    #[must_use]
    pub fn new(
        watcher_config: WatcherConfig,
        policy: RestartPolicy,
        registry: RegistryHandle,
        sink: Arc<AlertLog>,
        notifier: Arc<dyn Notifier>,
        backends: BackendFactory,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(SupervisorState::Idle),
                stop: StopSignal::new(),
                watcher_config,
                policy,
                registry,
                sink,
                notifier,
                backends,
            }),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Current lifecycle state, for the status surface.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.shared.state()
    }

    /// Start monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Unavailable`] when the subscription cannot be
    /// established; the supervisor lands in `Stopped` and monitoring does
    /// not proceed.
    pub async fn start(&self) -> Result<(), WatchError> {
        self.shared.set_state(SupervisorState::Starting);

        let watcher = match self.start_watcher() {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(error = %e, "failed to establish filesystem watch");
                self.shared.set_state(SupervisorState::Stopped);
                return Err(e);
            }
        };

        self.shared.set_state(SupervisorState::Running);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(supervise(shared, watcher));
        *self.handle.lock().await = Some(task);
        Ok(())
    }

    /// Stop monitoring and wait for the watcher to wind down.
    ///
    /// Idempotent and safe from any state. After this returns no further
    /// alerts are recorded and all OS watch resources are released, even if
    /// the watcher was mid-recovery.
    pub async fn stop(&self) {
        if self.shared.state() != SupervisorState::Stopped {
            self.shared.set_state(SupervisorState::Stopping);
        }
        self.shared.stop.trigger();

        if let Some(task) = self.handle.lock().await.take() {
            if let Err(e) = task.await {
                error!(error = %e, "supervisor task panicked during stop");
            }
        }
        self.shared.set_state(SupervisorState::Stopped);
    }

    /// Wait for the supervisor to reach its terminal state without
    /// requesting a stop; surfaces the fatal error when there was one.
    ///
    /// Cancel-safe: dropping the returned future (e.g. when it loses a
    /// `select!` against a shutdown signal) leaves the supervision task
    /// attached, so a subsequent [`Supervisor::stop`] still awaits full
    /// teardown.
    ///
    /// # Errors
    ///
    /// Propagates the watcher's terminal error after recovery was exhausted
    /// or a non-recoverable failure occurred.
    pub async fn join(&self) -> Result<(), WatchError> {
        let mut guard = self.handle.lock().await;
        let Some(task) = guard.as_mut() else {
            return Ok(());
        };
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(WatchError::Lost(format!("supervisor task panicked: {e}"))),
        };
        *guard = None;
        result
    }

    fn start_watcher(&self) -> Result<FileWatcher, WatchError> {
        FileWatcher::start(
            (self.shared.backends)(),
            self.shared.watcher_config.clone(),
            self.shared.registry.clone(),
            Arc::clone(&self.shared.sink),
            Arc::clone(&self.shared.notifier),
        )
    }
}

/// The supervision loop: run the watcher, restart on lost subscriptions.
async fn supervise(shared: Arc<Shared>, mut watcher: FileWatcher) -> Result<(), WatchError> {
    let mut attempts = 0_u32;

    loop {
        let run_started = Instant::now();
        let result = watcher.run(&shared.stop).await;

        if shared.stop.is_triggered() {
            shared.set_state(SupervisorState::Stopped);
            return Ok(());
        }

        let error = match result {
            // run() only returns Ok on a stop request, handled above.
            Ok(()) => {
                shared.set_state(SupervisorState::Stopped);
                return Ok(());
            }
            Err(e) => e,
        };

        if !error.is_recoverable() {
            error!(error = %error, "watcher failed with non-recoverable error");
            shared.set_state(SupervisorState::Stopped);
            return Err(error);
        }

        if run_started.elapsed() >= shared.policy.healthy_after {
            attempts = 0;
        }
        warn!(error = %error, "watch subscription lost, entering recovery");

        // Bounded exponential backoff; a stop request interrupts the wait.
        watcher = loop {
            attempts = attempts.saturating_add(1);
            if attempts > shared.policy.max_attempts {
                error!(
                    attempts = shared.policy.max_attempts,
                    "watch recovery attempts exhausted, monitoring stopped"
                );
                shared.set_state(SupervisorState::Stopped);
                return Err(WatchError::Lost(format!(
                    "recovery exhausted after {} attempts",
                    shared.policy.max_attempts
                )));
            }
            shared.set_state(SupervisorState::Recovering { attempt: attempts });

            let backoff = shared.policy.backoff_for(attempts);
            tokio::select! {
                () = shared.stop.wait() => {
                    shared.set_state(SupervisorState::Stopped);
                    return Ok(());
                }
                () = tokio::time::sleep(backoff) => {}
            }

            match FileWatcher::start(
                (shared.backends)(),
                shared.watcher_config.clone(),
                shared.registry.clone(),
                Arc::clone(&shared.sink),
                Arc::clone(&shared.notifier),
            ) {
                Ok(watcher) => {
                    info!(attempt = attempts, "watch subscription re-established");
                    shared.set_state(SupervisorState::Running);
                    break watcher;
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "watch restart attempt failed");
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RestartPolicy {
            initial_backoff: Duration::from_millis(100),
            ..RestartPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(800));
    }

    #[test]
    fn state_displays_for_operators() {
        assert_eq!(SupervisorState::Running.to_string(), "running");
        assert_eq!(
            SupervisorState::Recovering { attempt: 3 }.to_string(),
            "recovering (attempt 3)"
        );
    }
}
