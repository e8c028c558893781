//! Shared error types for the tracing and metrics halves of the runtime.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by provider, processor and collector control operations.
///
/// None of these surface on the instrumentation hot path: recording telemetry
/// from business code is infallible by design, and misuse there is clamped to
/// a no-op instead of raised.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TelemetryError {
    /// The component has already been shut down and accepts no further work.
    #[error("already shut down")]
    AlreadyShutdown,

    /// The operation did not complete within the allotted time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure, carried as a diagnostic string.
    #[error("{0}")]
    InternalFailure(String),
}

/// A specialized `Result` for telemetry control operations.
pub type TelemetryResult<T = ()> = Result<T, TelemetryError>;

impl<T> From<PoisonError<T>> for TelemetryError {
    fn from(err: PoisonError<T>) -> Self {
        TelemetryError::InternalFailure(err.to_string())
    }
}
