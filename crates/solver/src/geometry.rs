//! Small 3D value types used by the solver.
//!
//! `Point3` is a location, `Vec3` a displacement, `EulerAngles` the
//! orientation of a component. All three are plain `Copy` values compared by
//! value.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A point in 3D space (millimetres in furniture assemblies).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ORIGIN: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        (*other - *self).length()
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add<Vec3> for Point3 {
    type Output = Point3;
    fn add(self, rhs: Vec3) -> Self::Output {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Vec3;
    fn sub(self, rhs: Self) -> Self::Output {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Sub<Vec3> for Point3 {
    type Output = Point3;
    fn sub(self, rhs: Vec3) -> Self::Output {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// A displacement or direction in 3D space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const X: Self = Self {
        x: 1.0,
        y: 0.0,
        z: 0.0,
    };
    pub const Y: Self = Self {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };
    pub const Z: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    pub fn length_squared(&self) -> f64 {
        self.dot(self)
    }

    /// Unit vector in the same direction, or `None` for a near-zero vector.
    pub fn normalized(&self) -> Option<Self> {
        let len = self.length();
        if len < 1e-15 { None } else { Some(*self / len) }
    }

    /// Cosine of the angle between two vectors. Degenerate inputs give 1.0
    /// (treated as aligned) so callers never see NaN.
    pub fn cos_angle_to(&self, other: &Self) -> f64 {
        let len_product = self.length() * other.length();
        if len_product < 1e-15 {
            return 1.0;
        }
        (self.dot(other) / len_product).clamp(-1.0, 1.0)
    }

    /// Unsigned angle in radians, computed as `atan2(|a x b|, a . b)`.
    ///
    /// Unlike `acos` this stays well conditioned near 0 and pi.
    pub fn angle_to(&self, other: &Self) -> f64 {
        self.cross(other).length().atan2(self.dot(other))
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Mul<Vec3> for f64 {
    type Output = Vec3;
    fn mul(self, rhs: Vec3) -> Self::Output {
        Vec3::new(self * rhs.x, self * rhs.y, self * rhs.z)
    }
}

impl Div<f64> for Vec3 {
    type Output = Self;
    fn div(self, rhs: f64) -> Self::Output {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl From<Vec3> for Vector3<f64> {
    fn from(v: Vec3) -> Self {
        Vector3::new(v.x, v.y, v.z)
    }
}

impl From<Vector3<f64>> for Vec3 {
    fn from(v: Vector3<f64>) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

/// Orientation of a component as intrinsic Euler angles in radians.
///
/// The rotation is `Rz(yaw) * Ry(pitch) * Rx(roll)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    pub const IDENTITY: Self = Self {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
    };

    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    /// Rotation about Z only, given in degrees. Panels lying flat in a
    /// cabinet carcass are usually oriented this way.
    pub fn from_yaw_degrees(yaw: f64) -> Self {
        Self::new(0.0, 0.0, yaw.to_radians())
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_euler_angles(self.roll, self.pitch, self.yaw)
    }

    /// The component's direction vector: the local +X axis rotated into
    /// world space. Every direction-based constraint goes through here.
    pub fn direction(&self) -> Vec3 {
        (self.rotation() * Vector3::x()).into()
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.roll, self.pitch, self.yaw]
    }

    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_point_distance() {
        let a = Point3::new(1.0, 2.0, 3.0);
        let b = Point3::new(4.0, 6.0, 3.0);
        assert_abs_diff_eq!(a.distance_to(&b), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cross_product() {
        let result = Vec3::X.cross(&Vec3::Y);
        assert_eq!(result, Vec3::Z);
    }

    #[test]
    fn test_normalized_zero_is_none() {
        assert!(Vec3::ZERO.normalized().is_none());
        let n = Vec3::new(3.0, 0.0, 4.0).normalized().unwrap();
        assert_abs_diff_eq!(n.length(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(n.z, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_to() {
        assert_abs_diff_eq!(Vec3::X.angle_to(&Vec3::Y), FRAC_PI_2, epsilon = 1e-12);
        assert_abs_diff_eq!(Vec3::X.angle_to(&(-Vec3::X)), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(Vec3::X.angle_to(&(Vec3::X * 7.0)), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cos_angle_degenerate() {
        assert_eq!(Vec3::ZERO.cos_angle_to(&Vec3::X), 1.0);
    }

    #[test]
    fn test_identity_direction_is_x() {
        let d = EulerAngles::IDENTITY.direction();
        assert_abs_diff_eq!(d.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_yaw_90_maps_x_to_y() {
        let d = EulerAngles::from_yaw_degrees(90.0).direction();
        assert_abs_diff_eq!(d.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pitch_tilts_x_down() {
        // Positive pitch about Y takes +X towards -Z.
        let d = EulerAngles::new(0.0, FRAC_PI_2, 0.0).direction();
        assert_abs_diff_eq!(d.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.z, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_roll_leaves_direction_unchanged() {
        let d = EulerAngles::new(1.2, 0.0, 0.0).direction();
        assert_abs_diff_eq!(d.x, 1.0, epsilon = 1e-12);
    }
}
