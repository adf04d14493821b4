//! Planar geometry primitives for scan-frame coordinate work.
//!
//! Everything in here is pure math on finite floats: rotation about an
//! arbitrary center and the unit vectors of a rotated frame's scan axes.
//! Angles are in degrees, counter-clockwise positive, matching the
//! instrument's rotation convention.

use serde::{Deserialize, Serialize};

/// A position in sample coordinates (nm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate (nm).
    pub x: f64,
    /// Y coordinate (nm).
    pub y: f64,
}

impl Point {
    /// Construct a point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Component-wise difference `self - other`.
    pub fn offset_from(self, other: Point) -> Vec2 {
        Vec2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    /// Translate by a vector.
    pub fn translate(self, v: Vec2) -> Point {
        Point {
            x: self.x + v.x,
            y: self.y + v.y,
        }
    }
}

/// A direction or displacement in the sample plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
}

impl Vec2 {
    /// Construct a vector.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Dot product.
    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }
}

/// Rotate `point` by `angle_deg` (CCW positive) about `center`.
///
/// Total for any finite input; there are no failure modes.
pub fn rotate(point: Point, angle_deg: f64, center: Point) -> Point {
    let angle_rad = angle_deg.to_radians();
    let (sin, cos) = angle_rad.sin_cos();

    let dx = point.x - center.x;
    let dy = point.y - center.y;

    Point {
        x: dx * cos - dy * sin + center.x,
        y: dx * sin + dy * cos + center.y,
    }
}

/// Unit vectors of the slow and fast scan axes for a frame rotated by
/// `angle_deg`.
///
/// The fast axis is the direction scanned within one raster line,
/// `rotate((1,0), angle)`; the slow axis is perpendicular to it,
/// `rotate((0,1), angle)`, the direction the raster advances line by line.
pub fn scan_axes(angle_deg: f64) -> (Vec2, Vec2) {
    let angle_rad = angle_deg.to_radians();
    let (sin, cos) = angle_rad.sin_cos();

    let slow = Vec2::new(-sin, cos);
    let fast = Vec2::new(cos, sin);
    (slow, fast)
}
