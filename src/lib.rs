//! # Raster-Scan Point-Measurement Acquisition
//!
//! This crate turns scan-frame parameters into interleaved measurement
//! schedules for a scanning probe microscope and executes them safely: the
//! raster advances a computed number of lines, pauses, the probe visits a
//! group of measurement points with the feedback loop suspended, and the
//! raster resumes — repeated until the inserted lines sum exactly to the
//! frame's total line count.
//!
//! ## Crate Structure
//!
//! - **`geometry`**: rotation primitives and scan-axis vectors.
//! - **`scan`**: the `ScanFrame` snapshot and sweep direction.
//! - **`distribution`**: even allocation of raster lines between
//!   measurement rows.
//! - **`grid`**: the global measurement grid over a whole frame.
//! - **`local_area`**: independently placed sub-grids merged onto one sweep.
//! - **`schedule`**: the shared `ScanSegment` schedule model.
//! - **`sequencer`**: the state machine that drives a schedule against the
//!   instrument.
//! - **`bridge`**: the `InstrumentBridge` trait, parameter vocabulary, event
//!   channel, and a simulated instrument for tests.
//! - **`scripts`**: persistence for named measurement scripts.
//! - **`config`**: figment-based settings.
//! - **`controller`**: the composition root tying it all together.
//! - **`error`**: the crate-wide `AcqError` taxonomy.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod distribution;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod local_area;
pub mod scan;
pub mod schedule;
pub mod scripts;
pub mod sequencer;

pub use error::{AcqError, AcqResult};
