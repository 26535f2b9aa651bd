//! Guiding geometry helpers
//!
//! Camera-space points and the angle math used by calibration: wrap-around
//! normalization and the projection of a camera displacement onto the
//! calibrated mount axes.

use std::f64::consts::PI;

/// A position or displacement in camera-pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both components are finite numbers.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Displacement from `self` to `other`.
    pub fn delta(&self, other: &Point) -> Point {
        Point::new(other.x - self.x, other.y - self.y)
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        self.delta(other).length()
    }

    /// Length of this point treated as a vector from the origin.
    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Direction of the vector from `self` to `other`, in radians.
    pub fn angle_to(&self, other: &Point) -> f64 {
        let d = self.delta(other);
        d.y.atan2(d.x)
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }
}

/// Wrap `value` into `[lo, hi)` using floor division.
pub fn normalize(value: f64, lo: f64, hi: f64) -> f64 {
    let span = hi - lo;
    value - span * ((value - lo) / span).floor()
}

/// Wrap an angle into `[-PI, PI)`.
pub fn normalize_angle(rad: f64) -> f64 {
    normalize(rad, -PI, PI)
}

/// Project a camera-space displacement onto the mount's RA/Dec axes.
///
/// `x_angle` and `y_angle` are the calibrated camera angles of the two axes.
/// The axes need not be exactly orthogonal; the Dec component is taken along
/// the measured Dec axis corrected for the angular error between the axes.
pub fn mount_coordinates(camera_vector: Point, x_angle: f64, y_angle: f64) -> Point {
    let hyp = camera_vector.length();
    let camera_theta = camera_vector.y.atan2(camera_vector.x);
    let y_angle_error = normalize_angle(x_angle - y_angle + PI / 2.0);
    let ra_theta = camera_theta - x_angle;
    let dec_theta = camera_theta - (x_angle + y_angle_error);
    Point::new(hyp * ra_theta.cos(), hyp * dec_theta.sin())
}
