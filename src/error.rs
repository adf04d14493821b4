//! Custom error types for the acquisition engine.
//!
//! This module defines the primary error type, `AcqError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the two failure families the engine deals with:
//!
//! - **Caller errors** (`InvalidGeometry`, `InvalidArgument`): bad parameters
//!   supplied to the coordinate calculators. Never retried, surfaced
//!   immediately.
//! - **Execution errors** (`DeviceUnavailable`, `Timeout`,
//!   `VerificationMismatch`): raised by the instrument bridge at the level of
//!   an individual hardware call. Whether they end a run depends on where
//!   they occur — the sequencer skips a failed measurement point but aborts
//!   on scan-advance or feedback-loop failures.
//!
//! Io and serialization errors from the script store wrap via `#[from]` so
//! the `?` operator works throughout.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;

/// Unified error type for coordinate calculation and run execution.
#[derive(Error, Debug)]
pub enum AcqError {
    /// A scan frame or grid request that cannot describe a physical raster.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A structurally valid request with out-of-range or inconsistent values.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The instrument rejected or never answered a command channel call.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A suspending operation exceeded its deadline.
    #[error("operation '{operation}' timed out after {waited:?}")]
    Timeout {
        /// Name of the operation that was being awaited.
        operation: String,
        /// How long the sequencer waited before giving up.
        waited: Duration,
    },

    /// A parameter write could not be confirmed by reading it back.
    #[error(
        "parameter '{parameter}' failed verification: requested {requested}, instrument reports {actual}"
    )]
    VerificationMismatch {
        /// Parameter name as sent to the instrument.
        parameter: String,
        /// Value that was requested.
        requested: f64,
        /// Value the instrument reported on read-back.
        actual: f64,
    },

    /// The run was cancelled through its abort handle.
    #[error("run aborted: {0}")]
    Aborted(String),

    /// I/O error from the script store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error from the script store.
    #[error("script store format error: {0}")]
    ScriptFormat(#[from] serde_json::Error),
}

impl AcqError {
    /// True for errors caused by the caller's request rather than the
    /// instrument. These are never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AcqError::InvalidGeometry(_) | AcqError::InvalidArgument(_)
        )
    }
}
