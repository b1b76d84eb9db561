//! Floating-point view frustum clipping.
//!
//! Triangles that reach outside the camera's clip frustum are split in
//! camera space before rasterization, so the integer edge arithmetic
//! never sees coordinates large enough to overflow. Each output vertex
//! carries its barycentric position inside the original triangle, letting
//! the shader interpolate the original three vertex attributes without
//! duplicating them per sub-triangle.

use glam::Vec3;

use crate::camera::{Camera, ProjectedPoint};

/// A camera-space vertex with barycentric weights of corners B and C.
#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    cs: Vec3,
    b: f32,
    c: f32,
}

impl ClipVertex {
    fn lerp(&self, other: &ClipVertex, t: f32) -> ClipVertex {
        ClipVertex {
            cs: self.cs + (other.cs - self.cs) * t,
            b: self.b + (other.b - self.b) * t,
            c: self.c + (other.c - self.c) * t,
        }
    }
}

/// One clipped sub-triangle, re-projected and re-parameterized.
#[derive(Debug, Clone, Copy)]
pub struct ClippedTriangle {
    pub points: [ProjectedPoint; 3],
    /// Lane `i` is the original B weight of corner `i`.
    pub sub_b: Vec3,
    /// Lane `i` is the original C weight of corner `i`.
    pub sub_c: Vec3,
}

/// Clip a triangle against every plane of the camera's clip frustum and
/// fan the surviving polygon into sub-triangles. Appends zero or more
/// triangles to `out`.
pub fn clip_triangle(
    camera: &Camera,
    a: &ProjectedPoint,
    b: &ProjectedPoint,
    c: &ProjectedPoint,
    out: &mut Vec<ClippedTriangle>,
) {
    let mut polygon: Vec<ClipVertex> = Vec::with_capacity(9);
    polygon.push(ClipVertex { cs: a.cs, b: 0.0, c: 0.0 });
    polygon.push(ClipVertex { cs: b.cs, b: 1.0, c: 0.0 });
    polygon.push(ClipVertex { cs: c.cs, b: 0.0, c: 1.0 });
    let mut clipped: Vec<ClipVertex> = Vec::with_capacity(9);

    for plane in camera.clip_frustum.planes() {
        if polygon.is_empty() {
            break;
        }
        if polygon.iter().all(|vertex| plane.inside(vertex.cs)) {
            continue;
        }
        clipped.clear();
        for index in 0..polygon.len() {
            let current = polygon[index];
            let next = polygon[(index + 1) % polygon.len()];
            let current_distance = plane.signed_distance(current.cs);
            let next_distance = plane.signed_distance(next.cs);
            let current_inside = current_distance <= 0.0;
            let next_inside = next_distance <= 0.0;
            if current_inside {
                clipped.push(current);
            }
            if current_inside != next_inside {
                // The edge crosses the plane; emit the intersection.
                let t = current_distance / (current_distance - next_distance);
                clipped.push(current.lerp(&next, t));
            }
        }
        core::mem::swap(&mut polygon, &mut clipped);
    }

    if polygon.len() < 3 {
        return;
    }
    let projected: Vec<ProjectedPoint> = polygon
        .iter()
        .map(|vertex| camera.camera_to_screen(vertex.cs))
        .collect();
    for index in 1..polygon.len() - 1 {
        let (v0, v1, v2) = (polygon[0], polygon[index], polygon[index + 1]);
        out.push(ClippedTriangle {
            points: [projected[0], projected[index], projected[index + 1]],
            sub_b: Vec3::new(v0.b, v1.b, v2.b),
            sub_c: Vec3::new(v0.c, v1.c, v2.c),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, DEFAULT_FAR_CLIP, DEFAULT_NEAR_CLIP};
    use karst_math::Transform3D;

    fn camera() -> Camera {
        Camera::create_perspective(
            Transform3D::IDENTITY,
            100,
            100,
            1.0,
            DEFAULT_NEAR_CLIP,
            DEFAULT_FAR_CLIP,
        )
    }

    fn project(camera: &Camera, world: Vec3) -> ProjectedPoint {
        camera.world_to_screen(world)
    }

    #[test]
    fn fully_inside_triangles_pass_through_unsplit() {
        let camera = camera();
        let a = project(&camera, Vec3::new(-1.0, -1.0, 5.0));
        let b = project(&camera, Vec3::new(1.0, -1.0, 5.0));
        let c = project(&camera, Vec3::new(0.0, 1.0, 5.0));
        let mut out = Vec::new();
        clip_triangle(&camera, &a, &b, &c, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sub_b, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(out[0].sub_c, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn near_plane_crossing_splits_and_keeps_depth_positive() {
        let camera = camera();
        let a = project(&camera, Vec3::new(0.0, 0.0, -1.0));
        let b = project(&camera, Vec3::new(-1.0, 0.5, 5.0));
        let c = project(&camera, Vec3::new(1.0, 0.5, 5.0));
        let mut out = Vec::new();
        clip_triangle(&camera, &a, &b, &c, &mut out);
        assert!(!out.is_empty());
        for triangle in &out {
            for point in &triangle.points {
                assert!(point.cs.z >= DEFAULT_NEAR_CLIP * 0.999);
            }
        }
    }

    #[test]
    fn clipped_vertices_interpolate_the_barycentrics() {
        let camera = camera();
        let a = project(&camera, Vec3::new(0.0, 0.0, -1.0));
        let b = project(&camera, Vec3::new(-1.0, 0.5, 5.0));
        let c = project(&camera, Vec3::new(1.0, 0.5, 5.0));
        let mut out = Vec::new();
        clip_triangle(&camera, &a, &b, &c, &mut out);
        for triangle in &out {
            for corner in 0..3 {
                let b_weight = triangle.sub_b[corner];
                let c_weight = triangle.sub_c[corner];
                let a_weight = 1.0 - b_weight - c_weight;
                assert!((-1e-4..=1.0001).contains(&a_weight));
                assert!((-1e-4..=1.0001).contains(&b_weight));
                assert!((-1e-4..=1.0001).contains(&c_weight));
            }
        }
    }

    #[test]
    fn triangles_fully_outside_vanish() {
        let camera = camera();
        let a = project(&camera, Vec3::new(0.0, 0.0, -5.0));
        let b = project(&camera, Vec3::new(1.0, 0.0, -5.0));
        let c = project(&camera, Vec3::new(0.0, 1.0, -5.0));
        let mut out = Vec::new();
        clip_triangle(&camera, &a, &b, &c, &mut out);
        assert!(out.is_empty());
    }
}
