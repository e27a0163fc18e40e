//! Lifecycle error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The OS refused to let us handle a termination signal.
    #[error("failed to install {signal} handler: {source}")]
    SignalHandler {
        signal: &'static str,
        source: std::io::Error,
    },
}
