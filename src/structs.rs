//! # Core Data Structures
//!
//! This module defines the geometric value types shared by every other module:
//!
//! - **Vector2**: 2D position/velocity vector with arithmetic operations
//! - **Line**: directed line in velocity space; the feasible side is to its left
//! - **Obstacle**: one vertex of an obstacle polygon, linked to its neighbours
//!   by index into the simulator's obstacle registry
//!
//! plus the scalar helpers (`det`, `left_of`, ...) and the shared `EPSILON`.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Tolerance used for parallel-line, discriminant and side-of-line tests.
pub const EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Vector2 { x, y }
    }

    pub fn dot(&self, other: &Vector2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Two-dimensional cross product (determinant of the 2x2 matrix `[self other]`).
    pub fn det(&self, other: &Vector2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length_sq(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(&self) -> f64 {
        self.length_sq().sqrt()
    }

    /// Unit vector in the same direction; vectors shorter than `EPSILON` map to zero.
    pub fn normalize(&self) -> Vector2 {
        let len = self.length();
        if len < EPSILON {
            Vector2::ZERO
        } else {
            Vector2 {
                x: self.x / len,
                y: self.y / len,
            }
        }
    }

    /// Counter-clockwise perpendicular.
    pub fn perpendicular(&self) -> Vector2 {
        Vector2 {
            x: -self.y,
            y: self.x,
        }
    }

    pub fn distance(&self, other: &Vector2) -> f64 {
        (*self - *other).length()
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, other: Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, other: Vector2) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, other: Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl SubAssign for Vector2 {
    fn sub_assign(&mut self, other: Vector2) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl Mul<f64> for Vector2 {
    type Output = Vector2;

    fn mul(self, scalar: f64) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }
}

impl Mul<Vector2> for f64 {
    type Output = Vector2;

    fn mul(self, v: Vector2) -> Vector2 {
        v * self
    }
}

impl Div<f64> for Vector2 {
    type Output = Vector2;

    fn div(self, scalar: f64) -> Vector2 {
        Vector2 {
            x: self.x / scalar,
            y: self.y / scalar,
        }
    }
}

impl Neg for Vector2 {
    type Output = Vector2;

    fn neg(self) -> Vector2 {
        Vector2 {
            x: -self.x,
            y: -self.y,
        }
    }
}

impl From<(f64, f64)> for Vector2 {
    fn from((x, y): (f64, f64)) -> Self {
        Vector2 { x, y }
    }
}

pub fn sqr(value: f64) -> f64 {
    value * value
}

/// Twice the signed area of triangle (a, b, c).
///
/// Positive when `c` lies to the left of the directed line `a -> b`,
/// negative when it lies to the right, zero when the points are collinear.
pub fn left_of(a: Vector2, b: Vector2, c: Vector2) -> f64 {
    (a - c).det(&(b - a))
}

/// Squared distance from `c` to the segment `a`-`b`.
pub fn dist_sq_point_line_segment(a: Vector2, b: Vector2, c: Vector2) -> f64 {
    let ab = b - a;
    let r = (c - a).dot(&ab) / ab.length_sq();

    if r < 0.0 {
        (c - a).length_sq()
    } else if r > 1.0 {
        (c - b).length_sq()
    } else {
        (c - (a + ab * r)).length_sq()
    }
}

/// A directed line in velocity space.
///
/// A velocity `v` satisfies the line when it lies on the left side,
/// i.e. when `direction.det(point - v) <= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Line {
    /// A point on the line
    pub point: Vector2,
    /// Unit direction of the line
    pub direction: Vector2,
}

impl Line {
    pub fn new(point: Vector2, direction: Vector2) -> Self {
        Line { point, direction }
    }

    /// Signed distance by which `v` lies on the wrong (right) side; `<= 0` when satisfied.
    pub fn violation(&self, v: Vector2) -> f64 {
        self.direction.det(&(self.point - v))
    }
}

/// One vertex of an obstacle polygon together with the edge leaving it.
///
/// `next` and `prev` are indices into the obstacle registry and always form a
/// closed cycle per polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    pub id: usize,
    pub point: Vector2,
    /// Unit direction towards `next`
    pub direction: Vector2,
    pub convex: bool,
    pub next: usize,
    pub prev: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // ==================== Vector2 Tests ====================

    #[test]
    fn test_vector_dot() {
        let a = Vector2::new(1.0, 2.0);
        let b = Vector2::new(3.0, -4.0);
        assert_eq!(a.dot(&b), -5.0);
    }

    #[test]
    fn test_vector_det_sign() {
        let x = Vector2::new(1.0, 0.0);
        let y = Vector2::new(0.0, 1.0);
        assert_eq!(x.det(&y), 1.0, "y is counter-clockwise from x");
        assert_eq!(y.det(&x), -1.0, "x is clockwise from y");
        assert_eq!(x.det(&x), 0.0, "parallel vectors have zero determinant");
    }

    #[test]
    fn test_vector_length() {
        let v = Vector2::new(3.0, 4.0);
        assert_eq!(v.length(), 5.0);
        assert_eq!(v.length_sq(), 25.0);
    }

    #[test]
    fn test_vector_normalize() {
        let v = Vector2::new(3.0, 4.0).normalize();
        assert_abs_diff_eq!(v.x, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(v.y, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_vector_normalize_near_zero() {
        let v = Vector2::new(1e-7, -1e-7).normalize();
        assert_eq!(v, Vector2::ZERO, "near-zero vectors normalize to zero");
    }

    #[test]
    fn test_vector_operators() {
        let a = Vector2::new(1.0, 2.0);
        let b = Vector2::new(0.5, -1.0);
        assert_eq!(a + b, Vector2::new(1.5, 1.0));
        assert_eq!(a - b, Vector2::new(0.5, 3.0));
        assert_eq!(a * 2.0, Vector2::new(2.0, 4.0));
        assert_eq!(2.0 * a, Vector2::new(2.0, 4.0));
        assert_eq!(a / 2.0, Vector2::new(0.5, 1.0));
        assert_eq!(-a, Vector2::new(-1.0, -2.0));

        let mut c = a;
        c += b;
        c -= a;
        assert_eq!(c, b);
    }

    #[test]
    fn test_vector_perpendicular() {
        let v = Vector2::new(2.0, 1.0);
        let p = v.perpendicular();
        assert_eq!(v.dot(&p), 0.0);
        assert!(v.det(&p) > 0.0, "perpendicular is counter-clockwise");
    }

    // ==================== left_of Tests ====================

    #[test]
    fn test_left_of_classification() {
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(1.0, 0.0);
        assert!(left_of(a, b, Vector2::new(0.5, 1.0)) > 0.0);
        assert!(left_of(a, b, Vector2::new(0.5, -1.0)) < 0.0);
        assert_eq!(left_of(a, b, Vector2::new(3.0, 0.0)), 0.0);
    }

    #[test]
    fn test_left_of_is_twice_triangle_area() {
        let area2 = left_of(
            Vector2::new(0.0, 0.0),
            Vector2::new(4.0, 0.0),
            Vector2::new(0.0, 3.0),
        );
        assert_eq!(area2, 12.0);
    }

    // ==================== Segment Distance Tests ====================

    #[test]
    fn test_dist_sq_point_segment_interior() {
        let d = dist_sq_point_line_segment(
            Vector2::new(-1.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.3, 2.0),
        );
        assert_abs_diff_eq!(d, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dist_sq_point_segment_endpoints() {
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(2.0, 0.0);
        assert_abs_diff_eq!(
            dist_sq_point_line_segment(a, b, Vector2::new(-3.0, 4.0)),
            25.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            dist_sq_point_line_segment(a, b, Vector2::new(5.0, 4.0)),
            25.0,
            epsilon = 1e-12
        );
    }

    // ==================== Line Tests ====================

    #[test]
    fn test_line_violation_sides() {
        // Upward line through the origin: feasible side is x <= 0.
        let line = Line::new(Vector2::ZERO, Vector2::new(0.0, 1.0));
        assert!(line.violation(Vector2::new(-1.0, 0.0)) < 0.0);
        assert!(line.violation(Vector2::new(1.0, 0.0)) > 0.0);
        assert_eq!(line.violation(Vector2::new(0.0, 5.0)), 0.0);
    }
}
