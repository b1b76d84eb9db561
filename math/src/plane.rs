//! A plane in 3D space, used for view frustum sides and clipping.

use glam::Vec3;

/// Plane with an outward facing normal, translated `offset` along it.
/// Points with a non-positive signed distance count as inside.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane3D {
    pub normal: Vec3,
    pub offset: f32,
}

impl Plane3D {
    /// The normal is normalized on construction.
    pub fn new(normal: Vec3, offset: f32) -> Self {
        Self {
            normal: normal.normalize(),
            offset,
        }
    }

    /// Closest distance from the point to the plane; negative inside.
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.offset
    }

    #[inline]
    pub fn inside(&self, point: Vec3) -> bool {
        self.signed_distance(point) <= 0.0
    }
}
