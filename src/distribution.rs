//! Even allocation of raster lines between measurement rows.
//!
//! A measurement pass inserts `num_points` stationary rows into a raster of
//! `total_lines` lines. The distributor decides how many lines to scan before
//! the first row, between consecutive rows, and after the last row, such that
//! the allocations sum to `total_lines` exactly — the raster must end on its
//! final line, never short of it and never past it.

use crate::error::{AcqError, AcqResult};

/// Fraction of the scan range kept clear of measurements at each frame edge.
pub const DEFAULT_SAFETY_FRACTION: f64 = 0.004;

/// Compute the per-gap line allocation for `num_points` measurement rows in a
/// raster of `total_lines` lines.
///
/// The result has length `num_points + 1`: a lead margin, `num_points - 1`
/// inter-row gaps, and a trailing margin. The lead and trailing margins each
/// take `floor(total_lines * safety_fraction / 2)` lines; the remaining
/// middle lines are spread over the gaps by cumulative rounding (round the
/// ideal running total at every gap and hand each gap the difference), which
/// bounds the per-gap error to one line while keeping the running sum exact.
///
/// With a single measurement row there are no inter-row gaps and the whole
/// middle is folded into the trailing margin, so the raster still finishes
/// the frame after its one measurement.
///
/// # Errors
///
/// `InvalidArgument` if `num_points < 1` or `safety_fraction` is not a finite
/// value in `[0, 1)`.
pub fn distribute_scan_lines(
    total_lines: u32,
    num_points: u32,
    safety_fraction: f64,
) -> AcqResult<Vec<u32>> {
    if num_points < 1 {
        return Err(AcqError::InvalidArgument(
            "scan line distribution needs at least one measurement row".into(),
        ));
    }
    if !safety_fraction.is_finite() || !(0.0..1.0).contains(&safety_fraction) {
        return Err(AcqError::InvalidArgument(format!(
            "safety fraction {safety_fraction} outside [0, 1)"
        )));
    }

    let lead = (f64::from(total_lines) * safety_fraction / 2.0).floor() as u32;
    let middle = total_lines - 2 * lead;
    let segments = num_points - 1;

    if segments == 0 {
        return Ok(vec![lead, total_lines - lead]);
    }

    let mut result = Vec::with_capacity(num_points as usize + 1);
    result.push(lead);

    let ideal_per_segment = f64::from(middle) / f64::from(segments);
    let mut accumulated: u32 = 0;
    for i in 0..segments {
        let ideal_accumulated = f64::from(i + 1) * ideal_per_segment;
        let actual_accumulated = ideal_accumulated.round() as u32;
        result.push(actual_accumulated - accumulated);
        accumulated = actual_accumulated;
    }

    result.push(lead);

    debug_assert_eq!(result.iter().sum::<u32>(), total_lines);
    Ok(result)
}
