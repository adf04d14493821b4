//! Local-area measurement grids merged onto one raster sweep.
//!
//! Each [`LocalAreaSpec`] describes a small, independently placed and spaced
//! sub-grid inside the scan frame. All areas' points are projected onto the
//! frame's slow axis, quantized to the raster line they fall on, and merged
//! into a single interleaved schedule: points sharing a raster line form one
//! measurement group, and the line deltas between consecutive groups (plus a
//! final run-out) sum exactly to the frame's total line count.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{AcqError, AcqResult};
use crate::geometry::{rotate, scan_axes, Point, Vec2};
use crate::scan::{ScanFrame, SweepDirection};
use crate::schedule::{MeasurementPoint, ScanSegment, Schedule};

/// Hardware buffer limit on measurement points per area.
pub const MAX_POINTS_PER_AREA: usize = 512;

/// Placement of a local area's first grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AreaOrigin {
    /// Absolute sample coordinates (nm).
    Absolute(Point),
    /// Offset from the frame center (nm, unrotated sample coordinates).
    Offset {
        /// X offset from the frame center.
        dx: f64,
        /// Y offset from the frame center.
        dy: f64,
    },
}

/// One independently parameterized measurement sub-grid.
///
/// The grid extends from its origin along the frame's fast axis in `nx`
/// steps of `dx`, and along the slow axis in `ny` steps of `dy` with the
/// sign given by `start_from` (`Up` grows toward higher slow positions,
/// `Down` toward lower ones). `sweep` orders the area's points within a
/// shared raster line: ascending fast-axis position for `Up`, descending for
/// `Down`. The visit order *between* groups always follows the frame's own
/// sweep direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalAreaSpec {
    /// Where the area's first grid point sits.
    pub origin: AreaOrigin,
    /// Fast-axis step (nm).
    pub dx: f64,
    /// Slow-axis step (nm).
    pub dy: f64,
    /// Points along the fast axis.
    pub nx: u32,
    /// Points along the slow axis.
    pub ny: u32,
    /// Within-line visit order for this area's points.
    pub sweep: SweepDirection,
    /// Which end of the area is generated first along the slow axis.
    pub start_from: SweepDirection,
}

/// Merged local-area schedule plus the frame axes used to order it.
#[derive(Debug, Clone)]
pub struct LocalAreaSchedule {
    /// Interleaved scan/measure schedule covering the whole frame.
    pub schedule: Schedule,
    /// Slow-axis unit vector of the frame.
    pub slow_axis: Vec2,
    /// Fast-axis unit vector of the frame.
    pub fast_axis: Vec2,
}

/// A generated point before grouping.
struct RawPoint {
    position: Point,
    line: u32,
    fast: f64,
    area: usize,
}

fn area_origin(frame: &ScanFrame, spec: &LocalAreaSpec) -> Point {
    match spec.origin {
        AreaOrigin::Absolute(p) => p,
        AreaOrigin::Offset { dx, dy } => Point::new(frame.center.x + dx, frame.center.y + dy),
    }
}

/// Merge all areas' grids into one interleaved schedule.
///
/// # Errors
///
/// `InvalidArgument` if `areas` is empty, any area's point count falls
/// outside `[1, 512]`, or the frame's slow-axis projection is degenerate
/// (non-positive slow range or zero line count).
pub fn compute_local_areas(
    frame: &ScanFrame,
    areas: &[LocalAreaSpec],
) -> AcqResult<LocalAreaSchedule> {
    if areas.is_empty() {
        return Err(AcqError::InvalidArgument(
            "local-area request contains no areas".into(),
        ));
    }
    let slow_range = frame.slow_range();
    if !(slow_range > 0.0) || !slow_range.is_finite() || frame.total_lines < 1 {
        return Err(AcqError::InvalidArgument(
            "slow-axis projection is degenerate: frame has no slow range".into(),
        ));
    }
    for (i, spec) in areas.iter().enumerate() {
        let count = spec.nx as usize * spec.ny as usize;
        if !(1..=MAX_POINTS_PER_AREA).contains(&count) {
            return Err(AcqError::InvalidArgument(format!(
                "area {i} has {count} points, allowed range is 1..={MAX_POINTS_PER_AREA}"
            )));
        }
    }

    let (slow_axis, fast_axis) = scan_axes(frame.angle_deg);
    let spacing = slow_range / f64::from(frame.total_lines);
    let half_slow = slow_range / 2.0;
    let last_line = frame.total_lines - 1;

    // Generate every area's grid and quantize it onto raster lines measured
    // from the edge the sweep starts at.
    let mut raw: Vec<RawPoint> = Vec::new();
    for (area_index, spec) in areas.iter().enumerate() {
        let origin = area_origin(frame, spec);
        let slow_sign = spec.start_from.sign();
        for j in 0..spec.ny {
            for i in 0..spec.nx {
                let local = Point::new(
                    f64::from(i) * spec.dx,
                    slow_sign * f64::from(j) * spec.dy,
                );
                let rotated = rotate(local, frame.angle_deg, Point::new(0.0, 0.0));
                let position = Point::new(origin.x + rotated.x, origin.y + rotated.y);

                let rel = position.offset_from(frame.center);
                let slow_coord = rel.dot(slow_axis);
                let edge_distance = match frame.direction {
                    SweepDirection::Up => slow_coord + half_slow,
                    SweepDirection::Down => half_slow - slow_coord,
                };
                let line = if edge_distance <= 0.0 {
                    0
                } else {
                    ((edge_distance / spacing).floor() as u32).min(last_line)
                };

                raw.push(RawPoint {
                    position,
                    line,
                    fast: rel.dot(fast_axis),
                    area: area_index,
                });
            }
        }
    }

    // Group by raster line; BTreeMap iteration already yields groups in the
    // order the sweep reaches them because line indices are edge-relative.
    let mut groups: BTreeMap<u32, Vec<RawPoint>> = BTreeMap::new();
    for point in raw {
        groups.entry(point.line).or_default().push(point);
    }

    let mut segments = Vec::with_capacity(groups.len() + 1);
    let mut previous_line = 0u32;
    for (group_index, (line, mut members)) in groups.into_iter().enumerate() {
        members.sort_by(|a, b| {
            a.area.cmp(&b.area).then_with(|| {
                let ordering = a.fast.partial_cmp(&b.fast).unwrap_or(std::cmp::Ordering::Equal);
                match areas[a.area].sweep {
                    SweepDirection::Up => ordering,
                    SweepDirection::Down => ordering.reverse(),
                }
            })
        });

        // Exact duplicates (overlapping areas) are measured once.
        let mut seen: HashSet<(i64, i64)> = HashSet::new();
        let mut points = Vec::with_capacity(members.len());
        for member in members {
            let key = (
                (member.position.x / 1e-9).round() as i64,
                (member.position.y / 1e-9).round() as i64,
            );
            if seen.insert(key) {
                points.push(MeasurementPoint {
                    x: member.position.x,
                    y: member.position.y,
                    group: group_index,
                    index_in_group: points.len(),
                });
            }
        }

        segments.push(ScanSegment {
            lines_to_scan: line - previous_line,
            points,
        });
        previous_line = line;
    }

    // Run the raster out to the frame's last line.
    segments.push(ScanSegment {
        lines_to_scan: frame.total_lines - previous_line,
        points: Vec::new(),
    });

    let schedule = Schedule { segments };
    debug_assert_eq!(schedule.total_lines(), u64::from(frame.total_lines));

    Ok(LocalAreaSchedule {
        schedule,
        slow_axis,
        fast_axis,
    })
}
