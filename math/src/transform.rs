//! Rigid body transform for cameras and model placement.

use core::ops::Mul;

use glam::{Mat3, Vec3};

/// Rotation axes as matrix columns plus a translation.
///
/// Only rotation and translation are expected; `point_to_local` uses the
/// transpose as the inverse, which holds for orthonormal axes only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub axes: Mat3,
    pub position: Vec3,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform3D {
    pub const IDENTITY: Transform3D = Transform3D {
        axes: Mat3::IDENTITY,
        position: Vec3::ZERO,
    };

    pub const fn new(position: Vec3, axes: Mat3) -> Self {
        Self { axes, position }
    }

    pub const fn from_position(position: Vec3) -> Self {
        Self {
            axes: Mat3::IDENTITY,
            position,
        }
    }

    /// Rotation around the Y axis, the common case for placed models.
    pub fn from_position_yaw(position: Vec3, yaw: f32) -> Self {
        Self {
            axes: Mat3::from_rotation_y(yaw),
            position,
        }
    }

    #[inline]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.axes * point + self.position
    }

    #[inline]
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.axes * vector
    }

    /// Inverse transform of a point using the transposed axes.
    #[inline]
    pub fn point_to_local(&self, point: Vec3) -> Vec3 {
        self.axes.transpose() * (point - self.position)
    }

    /// Apply `inner` first, then `self`.
    pub fn then(&self, inner: &Transform3D) -> Transform3D {
        Transform3D {
            axes: self.axes * inner.axes,
            position: self.transform_point(inner.position),
        }
    }
}

/// `a * b` places `b` inside the space of `a`.
impl Mul for Transform3D {
    type Output = Transform3D;

    fn mul(self, other: Transform3D) -> Transform3D {
        self.then(&other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn point_to_local_inverts_transform_point() {
        let transform = Transform3D::from_position_yaw(Vec3::new(4.0, -2.0, 9.0), 0.8);
        let point = Vec3::new(1.5, 2.0, -3.0);
        assert!(close(transform.point_to_local(transform.transform_point(point)), point));
    }

    #[test]
    fn composition_applies_right_hand_side_first() {
        let rotate = Transform3D::from_position_yaw(Vec3::ZERO, core::f32::consts::FRAC_PI_2);
        let translate = Transform3D::from_position(Vec3::new(1.0, 0.0, 0.0));
        let combined = rotate * translate;
        let expected = rotate.transform_point(translate.transform_point(Vec3::ZERO));
        assert!(close(combined.transform_point(Vec3::ZERO), expected));
    }
}
