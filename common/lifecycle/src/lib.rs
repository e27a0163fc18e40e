//! Orderly process exit: signal trapping, stop-accepting then drain, store closure,
//! and a forced exit when the whole sequence overruns its deadline.

mod coordinator;
mod error;
mod metrics;
mod signals;

pub use coordinator::{
    ShutdownCoordinator, ShutdownOptions, ShutdownOutcome, ShutdownPhase, ShutdownState,
};
pub use error::LifecycleError;
