//! Instrument bridge: the narrow async interface the engine drives.
//!
//! The bridge hides everything about the command channel — wire format,
//! protocol negotiation, register addressing — behind a handful of
//! parameter/scan/measurement primitives. The sequencer and the frame
//! snapshot reader are written purely against [`InstrumentBridge`]; the
//! in-crate [`SimulatedInstrument`](mock::SimulatedInstrument) and any real
//! transport implement it.
//!
//! Hardware notifications (scan started/stopped, spectrum file saved) are
//! delivered as a typed broadcast channel rather than callbacks, so the
//! sequencer can `select!` over them alongside its own timeouts.
//!
//! Parameter writes are verify-or-fail: implementations read the value back
//! and compare within a per-parameter-class tolerance, retrying a bounded
//! number of times before reporting `VerificationMismatch`. The sequencer
//! itself never retries.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::AcqResult;

/// Scan and feedback parameter names of the instrument's remote vocabulary.
pub mod params {
    /// Frame center X (nm).
    pub const X: &str = "X";
    /// Frame center Y (nm).
    pub const Y: &str = "Y";
    /// Fast-axis range (nm).
    pub const RANGE: &str = "Range";
    /// Frame rotation (degrees).
    pub const ANGLE: &str = "Angle";
    /// Raster line count.
    pub const PIXEL: &str = "Pixel";
    /// Pixel density in line over pixel density in column.
    pub const PIXEL_DENSITY: &str = "PixelDensity";
    /// Fast range over slow range.
    pub const ASPECT_RATIO: &str = "AspectRatio";
    /// Raster speed (lines per second scale).
    pub const SPEED: &str = "Speed";
    /// Scan run flag (1 scanning, 0 stopped).
    pub const SCAN: &str = "Scan";
    /// Current raster line number.
    pub const LINE_NR: &str = "LineNr";
    /// Feedback-loop enable flag.
    pub const FEEDBACK_ENABLE: &str = "Enable";
}

/// Typed value of one instrument parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Floating-point parameter (positions, ranges, angles).
    Float(f64),
    /// Integer parameter (counts).
    Int(i64),
    /// Boolean flag.
    Bool(bool),
}

impl ParamValue {
    /// Numeric view of the value; booleans map to 0/1.
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Float(v) => v,
            ParamValue::Int(v) => v as f64,
            ParamValue::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Boolean view, if the value is a flag.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(v),
            ParamValue::Int(v) => Some(v != 0),
            ParamValue::Float(_) => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Hardware notification delivered on the bridge's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentEvent {
    /// The raster started moving.
    ScanStarted,
    /// The raster stopped or paused.
    ScanStopped,
    /// A point measurement was written to disk by the instrument software.
    MeasurementSaved {
        /// File name reported by the instrument.
        file: String,
    },
}

/// Bounded retry and read-back verification for parameter writes.
///
/// Scan parameters verify within `scan_tolerance` (positions in nm),
/// feedback parameters within the much tighter `feedback_tolerance`;
/// integer and boolean values must read back exactly.
#[derive(Debug, Clone)]
pub struct SetVerifyPolicy {
    /// Write attempts before giving up.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Absolute tolerance for scan-parameter read-back.
    pub scan_tolerance: f64,
    /// Absolute tolerance for feedback-parameter read-back.
    pub feedback_tolerance: f64,
}

impl Default for SetVerifyPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
            scan_tolerance: 1e-3,
            feedback_tolerance: 1e-6,
        }
    }
}

impl SetVerifyPolicy {
    /// Read-back tolerance for the named parameter.
    pub fn tolerance_for(&self, name: &str) -> f64 {
        if name == params::FEEDBACK_ENABLE {
            self.feedback_tolerance
        } else {
            self.scan_tolerance
        }
    }

    /// Whether a read-back confirms the requested value.
    pub fn verified(&self, name: &str, requested: ParamValue, actual: ParamValue) -> bool {
        match (requested, actual) {
            (ParamValue::Float(want), got) => {
                (got.as_f64() - want).abs() < self.tolerance_for(name)
            }
            (ParamValue::Int(want), got) => got.as_f64() == want as f64,
            (ParamValue::Bool(want), got) => got.as_bool() == Some(want),
        }
    }
}

/// The instrument primitives the engine is built on.
///
/// One logical command channel in strict program order: implementations must
/// not reorder or batch mutating calls, because scan state and feedback state
/// are observed rather than versioned. Each call may fail with
/// `DeviceUnavailable`, `Timeout`, or `VerificationMismatch`.
#[async_trait]
pub trait InstrumentBridge: Send + Sync {
    /// Read one scan parameter.
    async fn get_scan_parameter(&self, name: &str) -> AcqResult<ParamValue>;

    /// Write one scan parameter, retrying and verifying the read-back within
    /// tolerance before reporting success.
    async fn set_scan_parameter(&self, name: &str, value: ParamValue) -> AcqResult<()>;

    /// Start scanning the next `lines` raster lines. The raster pauses again
    /// once they are consumed; completion is observed via [`Self::is_scanning`]
    /// and the event channel.
    async fn advance_scan_lines(&self, lines: u32) -> AcqResult<()>;

    /// Enable or suspend the feedback/servo loop.
    async fn set_feedback_enabled(&self, enabled: bool) -> AcqResult<()>;

    /// Move the probe to an absolute sample position (nm).
    async fn move_probe(&self, x: f64, y: f64) -> AcqResult<()>;

    /// Trigger a stationary point measurement and wait for it to complete.
    async fn trigger_point_measurement(&self) -> AcqResult<()>;

    /// Whether the raster is currently moving.
    async fn is_scanning(&self) -> AcqResult<bool>;

    /// Subscribe to hardware notifications.
    fn events(&self) -> broadcast::Receiver<InstrumentEvent>;
}
