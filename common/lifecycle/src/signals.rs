use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::LifecycleError;

/// SIGTERM (sent by process managers) and SIGINT (Ctrl+C).
pub(crate) struct ShutdownSignals {
    term: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    pub(crate) fn install() -> Result<Self, LifecycleError> {
        let term = signal(SignalKind::terminate()).map_err(|source| {
            LifecycleError::SignalHandler {
                signal: "SIGTERM",
                source,
            }
        })?;
        let interrupt = signal(SignalKind::interrupt()).map_err(|source| {
            LifecycleError::SignalHandler {
                signal: "SIGINT",
                source,
            }
        })?;
        Ok(Self { term, interrupt })
    }

    /// Wait for the next signal and return its name.
    pub(crate) async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.term.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_recv_waits_for_a_signal() {
        let mut signals = ShutdownSignals::install().expect("failed to install handlers");

        // We can't easily send signals in unit tests, but nothing should arrive on its own
        let result = timeout(Duration::from_millis(100), signals.recv()).await;
        assert!(result.is_err(), "recv should not complete without a signal");
    }
}
