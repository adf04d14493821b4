//! Scan-frame snapshot and sweep direction.
//!
//! A [`ScanFrame`] is a caller-owned, read-only snapshot of the raster
//! geometry: every calculation call receives the frame explicitly instead of
//! relying on state cached on a long-lived controller, so a frame changed on
//! the instrument between calls can never leak into a schedule computed
//! earlier.

use serde::{Deserialize, Serialize};

use crate::bridge::{params, InstrumentBridge};
use crate::error::{AcqError, AcqResult};
use crate::geometry::Point;

/// Direction the slow axis is traversed during the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepDirection {
    /// Slow axis traversed from low to high (bottom edge first).
    Up,
    /// Slow axis traversed from high to low (top edge first).
    Down,
}

impl SweepDirection {
    /// Signed representation: `+1.0` for `Up`, `-1.0` for `Down`.
    pub fn sign(self) -> f64 {
        match self {
            SweepDirection::Up => 1.0,
            SweepDirection::Down => -1.0,
        }
    }
}

impl std::fmt::Display for SweepDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepDirection::Up => write!(f, "up"),
            SweepDirection::Down => write!(f, "down"),
        }
    }
}

/// Read-only snapshot of the raster geometry for one calculation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanFrame {
    /// Frame center in sample coordinates (nm).
    pub center: Point,
    /// Fast-axis range (nm).
    pub range: f64,
    /// Frame rotation (degrees, CCW positive).
    pub angle_deg: f64,
    /// Fast range divided by slow range; the slow range is `range / aspect_ratio`.
    pub aspect_ratio: f64,
    /// Pixel density in line over pixel density in column.
    pub pixel_density_ratio: f64,
    /// Total raster line count of the frame.
    pub total_lines: u32,
    /// Slow-axis sweep direction.
    pub direction: SweepDirection,
}

impl ScanFrame {
    /// Slow-axis range (nm).
    pub fn slow_range(&self) -> f64 {
        self.range / self.aspect_ratio
    }

    /// Slow-axis distance covered by one raster line (nm).
    pub fn line_spacing(&self) -> f64 {
        self.slow_range() / f64::from(self.total_lines)
    }

    /// Check the frame describes a physical raster.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` if the range or aspect ratio is not positive, or the
    /// line count is zero.
    pub fn validate(&self) -> AcqResult<()> {
        if !(self.range > 0.0) || !self.range.is_finite() {
            return Err(AcqError::InvalidGeometry(format!(
                "scan range {} must be positive",
                self.range
            )));
        }
        if !(self.aspect_ratio > 0.0) || !self.aspect_ratio.is_finite() {
            return Err(AcqError::InvalidGeometry(format!(
                "aspect ratio {} must be positive",
                self.aspect_ratio
            )));
        }
        if self.total_lines < 1 {
            return Err(AcqError::InvalidGeometry(
                "frame must have at least one raster line".into(),
            ));
        }
        Ok(())
    }

    /// Read a frame snapshot from the instrument.
    ///
    /// Queries the scan-parameter channel for center, range, angle, line
    /// count, and density ratios; the sweep direction is not an instrument
    /// parameter and is supplied by the caller.
    pub async fn from_bridge(
        bridge: &dyn InstrumentBridge,
        direction: SweepDirection,
    ) -> AcqResult<Self> {
        let x = bridge.get_scan_parameter(params::X).await?.as_f64();
        let y = bridge.get_scan_parameter(params::Y).await?.as_f64();
        let range = bridge.get_scan_parameter(params::RANGE).await?.as_f64();
        let angle_deg = bridge.get_scan_parameter(params::ANGLE).await?.as_f64();
        let pixels = bridge.get_scan_parameter(params::PIXEL).await?.as_f64();
        let pixel_density_ratio = bridge
            .get_scan_parameter(params::PIXEL_DENSITY)
            .await?
            .as_f64();
        let aspect_ratio = bridge
            .get_scan_parameter(params::ASPECT_RATIO)
            .await?
            .as_f64();

        let frame = ScanFrame {
            center: Point::new(x, y),
            range,
            angle_deg,
            aspect_ratio,
            pixel_density_ratio,
            total_lines: pixels.round().max(0.0) as u32,
            direction,
        };
        frame.validate()?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ScanFrame {
        ScanFrame {
            center: Point::new(250.0, 250.0),
            range: 500.0,
            angle_deg: 0.0,
            aspect_ratio: 1.0,
            pixel_density_ratio: 1.0,
            total_lines: 500,
            direction: SweepDirection::Up,
        }
    }

    #[test]
    fn slow_range_scales_with_aspect_ratio() {
        let mut f = frame();
        assert_eq!(f.slow_range(), 500.0);
        f.aspect_ratio = 2.0;
        assert_eq!(f.slow_range(), 250.0);
        assert_eq!(f.line_spacing(), 0.5);
    }

    #[test]
    fn validation_rejects_degenerate_frames() {
        let mut f = frame();
        f.range = 0.0;
        assert!(f.validate().is_err());

        let mut f = frame();
        f.aspect_ratio = -1.0;
        assert!(f.validate().is_err());

        let mut f = frame();
        f.total_lines = 0;
        assert!(f.validate().is_err());

        assert!(frame().validate().is_ok());
    }

    #[test]
    fn direction_signs() {
        assert_eq!(SweepDirection::Up.sign(), 1.0);
        assert_eq!(SweepDirection::Down.sign(), -1.0);
    }
}
