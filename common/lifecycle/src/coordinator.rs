//! Shutdown sequencing: `Running -> Draining -> ClosingStore -> Terminated`, with a
//! `ForcedExit` edge taken when the deadline started by the first signal runs out.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::LifecycleError;
use crate::metrics;
use crate::signals::ShutdownSignals;

/// Options for creating a shutdown coordinator.
#[derive(Clone, Debug)]
pub struct ShutdownOptions {
    pub name: String,
    /// Ceiling on the whole sequence, counted from the first signal.
    pub shutdown_timeout: Duration,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// Listener closed, in-flight requests finishing.
    Draining,
    ClosingStore,
    Terminated,
    ForcedExit,
}

/// Recorded on the first termination signal.
#[derive(Clone, Debug)]
pub struct ShutdownState {
    pub signal: String,
    pub received_at: Instant,
    pub drain_deadline: Instant,
    /// Set once the sequence has finished.
    pub exit_code: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Drained and closed the store before the deadline.
    Terminated,
    /// The server stopped without being asked to. The store was still closed.
    ServerExited,
    /// The deadline ran out, whatever was still running is abandoned.
    ForcedExit,
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Terminated => 0,
            ShutdownOutcome::ServerExited | ShutdownOutcome::ForcedExit => 1,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ShutdownOutcome::Terminated => "terminated",
            ShutdownOutcome::ServerExited => "server_exited",
            ShutdownOutcome::ForcedExit => "forced_exit",
        }
    }
}

struct Inner {
    name: String,
    shutdown_timeout: Duration,
    token: CancellationToken,
    phase: watch::Sender<ShutdownPhase>,
    state: Mutex<Option<ShutdownState>>,
}

/// Sequences an orderly exit so that no request is abandoned mid-flight and the store
/// connection is not severed abruptly, while never taking longer than the timeout.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new(options: ShutdownOptions) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            inner: Arc::new(Inner {
                name: options.name,
                shutdown_timeout: options.shutdown_timeout,
                token: CancellationToken::new(),
                phase,
                state: Mutex::new(None),
            }),
        }
    }

    /// Turn SIGTERM and SIGINT into [`trigger`](ShutdownCoordinator::trigger) calls.
    /// Must be called from within a tokio runtime.
    pub fn trap_signals(&self) -> Result<(), LifecycleError> {
        let mut signals = ShutdownSignals::install()?;
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                let signal = signals.recv().await;
                info!(signal, "received termination signal");
                coordinator.trigger(signal);
            }
        });
        Ok(())
    }

    /// Start the shutdown sequence. Only the first call counts: it records the
    /// [`ShutdownState`], starts the deadline and stops the listener. Later calls are
    /// ignored and return false.
    pub fn trigger(&self, reason: &str) -> bool {
        let mut state = self.lock_state();
        if let Some(existing) = state.as_ref() {
            info!(
                trigger = reason,
                first_trigger = %existing.signal,
                "Lifecycle: shutdown already in progress, ignoring"
            );
            return false;
        }

        let now = Instant::now();
        *state = Some(ShutdownState {
            signal: reason.to_string(),
            received_at: now,
            drain_deadline: now + self.inner.shutdown_timeout,
            exit_code: None,
        });
        drop(state);

        metrics::emit_shutdown_initiated(&self.inner.name, reason);
        info!(
            trigger = reason,
            timeout_secs = self.inner.shutdown_timeout.as_secs_f64(),
            "Lifecycle: shutdown initiated, draining in-flight requests"
        );
        self.inner.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Draining;
                true
            } else {
                false
            }
        });
        self.inner.token.cancel();
        true
    }

    /// Returns true once shutdown has been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Future that resolves when draining begins; pass to
    /// `axum::serve(..).with_graceful_shutdown(..)` so the listener stops accepting.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.inner.token.clone();
        async move {
            token.cancelled().await;
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.inner.phase.borrow()
    }

    /// Receive every phase transition from now on.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.inner.phase.subscribe()
    }

    /// `None` until the first trigger.
    pub fn state(&self) -> Option<ShutdownState> {
        self.lock_state().clone()
    }

    /// Drive the process to its exit.
    ///
    /// `server` must resolve once the listener has stopped accepting and every in-flight
    /// request has completed, typically an `axum::serve` future built with
    /// [`shutdown_signal`](ShutdownCoordinator::shutdown_signal). `close_store` runs after
    /// it. Both the server and the store closure may fail: the error is logged and the
    /// sequence moves on.
    ///
    /// The graceful path races a deadline timer started by the first trigger; whichever
    /// finishes first decides the outcome.
    pub async fn run<S, SE, C, CE>(&self, server: S, close_store: C) -> ShutdownOutcome
    where
        S: Future<Output = Result<(), SE>>,
        SE: fmt::Display,
        C: Future<Output = Result<(), CE>>,
        CE: fmt::Display,
    {
        let graceful = async {
            match server.await {
                Ok(()) => info!("Lifecycle: listener closed, in-flight requests drained"),
                Err(err) => error!(error = %err, "Lifecycle: server stopped with an error"),
            }

            let requested = self.is_shutting_down();
            if !requested {
                warn!("Lifecycle: server stopped without a shutdown signal");
                // Still bound the remaining steps by the deadline
                self.trigger("server_exited");
            }

            self.set_phase(ShutdownPhase::ClosingStore);
            match close_store.await {
                Ok(()) => info!("Lifecycle: store connection closed"),
                Err(err) => error!(error = %err, "Lifecycle: failed to close store connection"),
            }

            if requested {
                ShutdownOutcome::Terminated
            } else {
                ShutdownOutcome::ServerExited
            }
        };

        let deadline = async {
            self.inner.token.cancelled().await;
            let deadline = self
                .state()
                .map(|state| state.drain_deadline)
                .unwrap_or_else(|| Instant::now() + self.inner.shutdown_timeout);
            sleep_until(deadline).await;
        };

        tokio::pin!(graceful);
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            biased;

            outcome = &mut graceful => outcome,
            _ = &mut deadline => {
                error!(
                    timeout_secs = self.inner.shutdown_timeout.as_secs_f64(),
                    phase = ?self.phase(),
                    "Lifecycle: shutdown timed out, forcing exit"
                );
                ShutdownOutcome::ForcedExit
            }
        };

        self.finalize(outcome)
    }

    fn finalize(&self, outcome: ShutdownOutcome) -> ShutdownOutcome {
        let phase = match outcome {
            ShutdownOutcome::ForcedExit => ShutdownPhase::ForcedExit,
            ShutdownOutcome::Terminated | ShutdownOutcome::ServerExited => {
                ShutdownPhase::Terminated
            }
        };
        self.set_phase(phase);

        let mut state = self.lock_state();
        let elapsed = state.as_ref().map(|s| s.received_at.elapsed());
        if let Some(state) = state.as_mut() {
            state.exit_code = Some(outcome.exit_code());
        }
        drop(state);

        metrics::emit_shutdown_completed(&self.inner.name, outcome.as_str());
        info!(
            outcome = outcome.as_str(),
            exit_code = outcome.exit_code(),
            total_duration_secs = elapsed.map(|d| d.as_secs_f64()),
            "Lifecycle: shutdown complete"
        );
        outcome
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.inner.phase.send_replace(phase);
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<ShutdownState>> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
