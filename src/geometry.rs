use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// A 2D point, either in normalized image coordinates or in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn midpoint(a: Point2, b: Point2) -> Self {
        Self::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }

    pub fn dot(self, other: Point2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Point2) -> f64 {
        (self - other).norm()
    }
}

impl Sub for Point2 {
    type Output = Point2;

    fn sub(self, rhs: Point2) -> Point2 {
        Point2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl From<(f64, f64)> for Point2 {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Angle at `vertex` between the rays towards `a` and `b`, in degrees.
///
/// Always within [0, 180]. A zero-length ray yields 0 instead of an error.
pub fn calculate_angle(a: Point2, vertex: Point2, b: Point2) -> f64 {
    let ray_a = a - vertex;
    let ray_b = b - vertex;

    let magnitude_a = ray_a.norm();
    let magnitude_b = ray_b.norm();
    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    let cos_angle = (ray_a.dot(ray_b) / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0);
    if !cos_angle.is_finite() {
        return 0.0;
    }
    cos_angle.acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_right_angle() {
        let angle = calculate_angle(
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 1.0),
        );
        assert_close(angle, 90.0);
    }

    #[test]
    fn test_straight_and_folded() {
        let straight = calculate_angle(
            Point2::new(-2.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(3.0, 0.0),
        );
        assert_close(straight, 180.0);

        let folded = calculate_angle(
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 2.0),
        );
        assert!(folded.abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_rays_return_zero() {
        let vertex = Point2::new(0.4, 0.4);
        assert_eq!(calculate_angle(vertex, vertex, Point2::new(1.0, 0.0)), 0.0);
        assert_eq!(calculate_angle(Point2::new(1.0, 0.0), vertex, vertex), 0.0);
        assert_eq!(calculate_angle(vertex, vertex, vertex), 0.0);
    }

    #[test]
    fn test_range_over_grid() {
        let vertex = Point2::new(0.5, 0.5);
        for i in 0..20 {
            for j in 0..20 {
                let a = Point2::new(i as f64 * 0.05, 0.1 + j as f64 * 0.03);
                let b = Point2::new(1.0 - j as f64 * 0.05, i as f64 * 0.04);
                let angle = calculate_angle(a, vertex, b);
                assert!((0.0..=180.0).contains(&angle), "angle {angle} out of range");
            }
        }
    }

    #[test]
    fn test_nearly_collinear_is_clamped() {
        // Floating-point overshoot past cos = 1 must not produce NaN.
        let angle = calculate_angle(
            Point2::new(0.1 + 1e-17, 0.3),
            Point2::new(0.0, 0.0),
            Point2::new(0.1, 0.3),
        );
        assert!(angle.is_finite());
        assert!(angle < 1e-3);
    }

    #[test]
    fn test_distance() {
        assert_close(Point2::new(0.0, 0.0).distance(Point2::new(3.0, 4.0)), 5.0);
        assert_eq!(
            Point2::midpoint(Point2::new(0.0, 2.0), Point2::new(2.0, 0.0)),
            Point2::new(1.0, 1.0)
        );
    }
}
