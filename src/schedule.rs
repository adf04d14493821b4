//! Shared output model of the coordinate calculators.
//!
//! Both the global grid and the local-area calculators produce the same
//! thing: an ordered list of [`ScanSegment`]s, each pairing a number of
//! raster lines to scan with the group of measurement points to visit once
//! those lines are done. The sequencer consumes a [`Schedule`] without caring
//! which calculator produced it.

use serde::{Deserialize, Serialize};

use crate::error::{AcqError, AcqResult};

/// One probe position to visit during a paused raster.
///
/// Immutable once produced; `group` is the index of the segment the point
/// belongs to and `index_in_group` its visit order within that segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// X position (nm).
    pub x: f64,
    /// Y position (nm).
    pub y: f64,
    /// Index of the segment this point belongs to.
    pub group: usize,
    /// Visit order within the group.
    pub index_in_group: usize,
}

/// A unit of the interleaved schedule: scan `lines_to_scan` raster lines,
/// then visit `points` while the raster is paused.
///
/// The final segment of a schedule carries an empty group — it only scans the
/// raster out to the frame's last line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSegment {
    /// Raster lines to advance before the measurement group.
    pub lines_to_scan: u32,
    /// Points measured after the advance, in visit order.
    pub points: Vec<MeasurementPoint>,
}

/// An ordered list of scan segments covering one full frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schedule {
    /// Segments in execution order.
    pub segments: Vec<ScanSegment>,
}

impl Schedule {
    /// Sum of `lines_to_scan` over all segments.
    pub fn total_lines(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| u64::from(s.lines_to_scan))
            .sum()
    }

    /// Total number of measurement points across all segments.
    pub fn total_points(&self) -> usize {
        self.segments.iter().map(|s| s.points.len()).sum()
    }

    /// Verify the schedule covers exactly `expected_lines` raster lines.
    ///
    /// The calculators guarantee this by construction; the check exists for
    /// callers assembling schedules by hand.
    pub fn check_line_total(&self, expected_lines: u32) -> AcqResult<()> {
        let total = self.total_lines();
        if total != u64::from(expected_lines) {
            return Err(AcqError::InvalidArgument(format!(
                "schedule covers {total} lines, frame has {expected_lines}"
            )));
        }
        Ok(())
    }

    /// All points of the schedule in visit order.
    pub fn points(&self) -> impl Iterator<Item = &MeasurementPoint> {
        self.segments.iter().flat_map(|s| s.points.iter())
    }
}
