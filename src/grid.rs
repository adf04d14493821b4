//! Global measurement grid over the whole scan frame.
//!
//! The grid is built axis-aligned at the origin, shrunk by a safety fraction
//! so no measurement lands on the frame edge, flipped for downward sweeps,
//! then rotated by the frame angle and translated to the frame center. Row
//! spacing on the slow axis is matched by a raster-line allocation from the
//! distributor so the sequencer knows how many lines to scan before each row.

use crate::distribution::distribute_scan_lines;
use crate::error::{AcqError, AcqResult};
use crate::geometry::{rotate, Point};
use crate::scan::{ScanFrame, SweepDirection};
use crate::schedule::{MeasurementPoint, ScanSegment, Schedule};

/// A computed global grid: `ny` rows of `nx` points plus the raster-line
/// allocation around them.
#[derive(Debug, Clone)]
pub struct GridLayout {
    /// Measurement points, `rows[row][column]`, row 0 at the physical start
    /// of the sweep.
    pub rows: Vec<Vec<MeasurementPoint>>,
    /// Raster lines before the first row, between rows, and after the last
    /// row; length `ny + 1`, summing to the frame's total line count.
    pub scanline_counts: Vec<u32>,
}

impl GridLayout {
    /// Convert the layout into the shared segment schedule.
    ///
    /// Row `i` becomes a segment scanning `scanline_counts[i]` lines before
    /// visiting the row; the trailing margin becomes a final empty-group
    /// segment so the raster finishes the frame.
    pub fn into_schedule(self) -> Schedule {
        let trailing = *self.scanline_counts.last().unwrap_or(&0);
        let mut segments: Vec<ScanSegment> = self
            .rows
            .into_iter()
            .zip(self.scanline_counts.iter())
            .map(|(points, &lines_to_scan)| ScanSegment {
                lines_to_scan,
                points,
            })
            .collect();
        segments.push(ScanSegment {
            lines_to_scan: trailing,
            points: Vec::new(),
        });
        Schedule { segments }
    }
}

/// Evenly spaced samples over `[start, stop]`; a single sample sits at
/// `start`.
fn linspace(start: f64, stop: f64, n: u32) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (stop - start) / f64::from(n - 1);
    (0..n).map(|i| start + f64::from(i) * step).collect()
}

/// Compute an `nx` by `ny` measurement grid spread over `frame`.
///
/// The effective range is the frame range shrunk by `safety_fraction`
/// (typically [`crate::distribution::DEFAULT_SAFETY_FRACTION`]); the slow
/// axis additionally divides by the frame aspect ratio. Row 0 is the first
/// row reached by the sweep: the bottom row for an upward sweep, the top row
/// for a downward one. Within-row order is unaffected by the sweep
/// direction.
///
/// # Errors
///
/// `InvalidGeometry` if `nx < 1`, `ny < 1`, or the frame itself is
/// degenerate; `InvalidArgument` for an out-of-range safety fraction.
pub fn compute_grid(
    frame: &ScanFrame,
    nx: u32,
    ny: u32,
    safety_fraction: f64,
) -> AcqResult<GridLayout> {
    if nx < 1 || ny < 1 {
        return Err(AcqError::InvalidGeometry(format!(
            "grid must have at least one point per axis, got {nx}x{ny}"
        )));
    }
    frame.validate()?;

    let scanline_counts = distribute_scan_lines(frame.total_lines, ny, safety_fraction)?;

    let half_fast = frame.range * (1.0 - safety_fraction) / 2.0;
    let half_slow = frame.slow_range() * (1.0 - safety_fraction) / 2.0;

    let xs = linspace(-half_fast, half_fast, nx);
    let mut ys = linspace(-half_slow, half_slow, ny);
    if frame.direction == SweepDirection::Down {
        ys.reverse();
    }

    let origin = Point::new(0.0, 0.0);
    let rows = ys
        .iter()
        .enumerate()
        .map(|(row, &y)| {
            xs.iter()
                .enumerate()
                .map(|(col, &x)| {
                    let p = rotate(Point::new(x, y), frame.angle_deg, origin);
                    MeasurementPoint {
                        x: p.x + frame.center.x,
                        y: p.y + frame.center.y,
                        group: row,
                        index_in_group: col,
                    }
                })
                .collect()
        })
        .collect();

    Ok(GridLayout {
        rows,
        scanline_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::scan_axes;

    const TOL: f64 = 1e-9;

    fn frame(range: f64, angle_deg: f64, aspect_ratio: f64) -> ScanFrame {
        ScanFrame {
            center: Point::new(0.0, 0.0),
            range,
            angle_deg,
            aspect_ratio,
            pixel_density_ratio: 1.0,
            total_lines: 500,
            direction: SweepDirection::Up,
        }
    }

    #[test]
    fn three_by_three_center_point_is_frame_center() {
        let layout = compute_grid(&frame(500.0, 0.0, 1.0), 3, 3, 0.0).unwrap();
        let center = layout.rows[1][1];
        assert!(center.x.abs() < TOL && center.y.abs() < TOL);
    }

    #[test]
    fn grid_has_exactly_nx_by_ny_points_inside_frame() {
        let f = ScanFrame {
            center: Point::new(120.0, -40.0),
            angle_deg: 33.0,
            ..frame(400.0, 0.0, 1.25)
        };
        let layout = compute_grid(&f, 7, 5, 0.02).unwrap();
        assert_eq!(layout.rows.len(), 5);
        assert!(layout.rows.iter().all(|r| r.len() == 7));

        // Rotating back around the frame center must land every point inside
        // the (unshrunk) frame rectangle.
        let half_fast = f.range / 2.0;
        let half_slow = f.slow_range() / 2.0;
        for point in layout.rows.iter().flatten() {
            let local = rotate(
                Point::new(point.x, point.y),
                -f.angle_deg,
                f.center,
            );
            assert!((local.x - f.center.x).abs() <= half_fast + TOL);
            assert!((local.y - f.center.y).abs() <= half_slow + TOL);
        }
    }

    #[test]
    fn scanline_counts_cover_the_frame() {
        let layout = compute_grid(&frame(500.0, 0.0, 1.0), 4, 5, 0.02).unwrap();
        assert_eq!(layout.scanline_counts.len(), 6);
        assert_eq!(layout.scanline_counts.iter().sum::<u32>(), 500);
    }

    #[test]
    fn downward_sweep_reverses_rows_but_not_columns() {
        let up = compute_grid(&frame(500.0, 17.0, 1.0), 4, 3, 0.01).unwrap();
        let down_frame = ScanFrame {
            direction: SweepDirection::Down,
            ..frame(500.0, 17.0, 1.0)
        };
        let down = compute_grid(&down_frame, 4, 3, 0.01).unwrap();

        for row in 0..3 {
            for col in 0..4 {
                let a = up.rows[row][col];
                let b = down.rows[2 - row][col];
                assert!((a.x - b.x).abs() < TOL && (a.y - b.y).abs() < TOL);
            }
        }
    }

    #[test]
    fn aspect_ratio_shrinks_slow_axis_extent() {
        let layout = compute_grid(&frame(500.0, 0.0, 2.0), 3, 3, 0.0).unwrap();
        let (slow, _) = scan_axes(0.0);
        let first = layout.rows[0][0];
        let last = layout.rows[2][0];
        let extent = (last.x - first.x) * slow.x + (last.y - first.y) * slow.y;
        assert!((extent - 250.0).abs() < TOL);
    }

    #[test]
    fn single_column_sits_at_interval_start() {
        let layout = compute_grid(&frame(500.0, 0.0, 1.0), 1, 3, 0.0).unwrap();
        for row in &layout.rows {
            assert!((row[0].x - (-250.0)).abs() < TOL);
        }
    }

    #[test]
    fn degenerate_requests_are_rejected() {
        assert!(compute_grid(&frame(500.0, 0.0, 1.0), 0, 3, 0.0).is_err());
        assert!(compute_grid(&frame(500.0, 0.0, 1.0), 3, 0, 0.0).is_err());
        assert!(compute_grid(&frame(0.0, 0.0, 1.0), 3, 3, 0.0).is_err());
    }

    #[test]
    fn schedule_preserves_line_total_and_points() {
        let layout = compute_grid(&frame(500.0, 0.0, 1.0), 3, 4, 0.02).unwrap();
        let schedule = layout.into_schedule();
        assert_eq!(schedule.segments.len(), 5);
        assert_eq!(schedule.total_lines(), 500);
        assert_eq!(schedule.total_points(), 12);
        assert!(schedule.segments.last().unwrap().points.is_empty());
    }
}
