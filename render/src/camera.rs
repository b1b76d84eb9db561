//! Cameras, view frustums and projection to sub-pixel coordinates.

use glam::{I64Vec2, Vec2, Vec3};
use karst_math::{fixed, Plane3D, Transform3D};

/// Result of a conservative visibility test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Everything tested lies outside one frustum plane.
    Hidden,
    /// Some of the tested points are outside, so it may be visible.
    Partial,
    /// Every tested point is inside the frustum.
    Full,
}

/// Up to six planes in camera space with inward facing half spaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewFrustum {
    planes: [Plane3D; 6],
    plane_count: usize,
}

impl ViewFrustum {
    /// Orthogonal frustum: only the four side planes exist.
    pub fn orthogonal(half_width: f32, half_height: f32) -> Self {
        let mut planes = [Plane3D::default(); 6];
        planes[0] = Plane3D::new(Vec3::new(-1.0, 0.0, 0.0), half_width);
        planes[1] = Plane3D::new(Vec3::new(1.0, 0.0, 0.0), half_width);
        planes[2] = Plane3D::new(Vec3::new(0.0, 1.0, 0.0), half_height);
        planes[3] = Plane3D::new(Vec3::new(0.0, -1.0, 0.0), half_height);
        Self {
            planes,
            plane_count: 4,
        }
    }

    /// Perspective frustum. An infinite far clip drops the far plane.
    pub fn perspective(near_clip: f32, far_clip: f32, width_slope: f32, height_slope: f32) -> Self {
        let mut planes = [Plane3D::default(); 6];
        planes[0] = Plane3D::new(Vec3::new(-1.0, 0.0, -width_slope), 0.0);
        planes[1] = Plane3D::new(Vec3::new(1.0, 0.0, -width_slope), 0.0);
        planes[2] = Plane3D::new(Vec3::new(0.0, 1.0, -height_slope), 0.0);
        planes[3] = Plane3D::new(Vec3::new(0.0, -1.0, -height_slope), 0.0);
        planes[4] = Plane3D::new(Vec3::new(0.0, 0.0, -1.0), -near_clip);
        planes[5] = Plane3D::new(Vec3::new(0.0, 0.0, 1.0), far_clip);
        Self {
            planes,
            plane_count: if far_clip == f32::INFINITY { 5 } else { 6 },
        }
    }

    #[inline]
    pub fn plane_count(&self) -> usize {
        self.plane_count
    }

    #[inline]
    pub fn plane(&self, index: usize) -> Plane3D {
        debug_assert!(index < self.plane_count);
        self.planes[index]
    }

    pub fn planes(&self) -> &[Plane3D] {
        &self.planes[..self.plane_count]
    }

    /// Quick estimate of whether a convex point cloud can be seen. The
    /// points are in camera space. `Hidden` is exact (all points beyond
    /// one plane means nothing between them is visible); `Partial` may
    /// still turn out to be invisible along an edge.
    pub fn convex_hull_visibility(&self, camera_space_points: &[Vec3]) -> Visibility {
        let mut any_outside = false;
        for plane in self.planes() {
            let mut any_inside = false;
            for point in camera_space_points {
                if plane.inside(*point) {
                    any_inside = true;
                } else {
                    any_outside = true;
                }
            }
            if !any_inside {
                return Visibility::Hidden;
            }
        }
        if any_outside {
            Visibility::Partial
        } else {
            Visibility::Full
        }
    }
}

/// Margin of the culling frustum, preventing pixels from being lost to
/// rounding along the borders of large images.
pub const CULL_RATIO: f32 = 1.0001;
/// Margin of the clipping frustum. Triangles inside it rasterize without
/// floating-point clipping; the margin keeps their integer coordinates
/// small enough to never overflow the edge arithmetic.
pub const CLIP_RATIO: f32 = 2.0;
pub const DEFAULT_NEAR_CLIP: f32 = 0.01;
pub const DEFAULT_FAR_CLIP: f32 = 1000.0;

/// One projected vertex in all three spaces the rasterizer needs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectedPoint {
    /// Camera space, kept for re-clipping sub-triangles.
    pub cs: Vec3,
    /// Floating image space from the upper left corner.
    pub is: Vec2,
    /// Rounded sub-pixel integer coordinate at 16 units per pixel.
    pub flat: I64Vec2,
}

impl ProjectedPoint {
    pub fn new(cs: Vec3, is: Vec2) -> Self {
        Self {
            cs,
            is,
            flat: fixed::point_from_image_space(is),
        }
    }
}

/// A camera is cheap to construct; make a new one whenever the view or
/// target size changes instead of mutating fields.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub perspective: bool,
    /// Rotation and translation only; scaling would break projection.
    pub location: Transform3D,
    pub width_slope: f32,
    pub height_slope: f32,
    inv_width_slope: f32,
    inv_height_slope: f32,
    pub image_width: f32,
    pub image_height: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub cull_frustum: ViewFrustum,
    pub clip_frustum: ViewFrustum,
}

impl Camera {
    /// Perspective camera. `width_slope` is the tangent of half the
    /// horizontal field of view; the vertical slope follows the aspect
    /// ratio. `far_clip` may be infinite.
    pub fn create_perspective(
        location: Transform3D,
        image_width: i32,
        image_height: i32,
        width_slope: f32,
        near_clip: f32,
        far_clip: f32,
    ) -> Camera {
        let height_slope = width_slope * image_height as f32 / image_width as f32;
        Camera {
            perspective: true,
            location,
            width_slope,
            height_slope,
            inv_width_slope: 0.5 / width_slope,
            inv_height_slope: 0.5 / height_slope,
            image_width: image_width as f32,
            image_height: image_height as f32,
            near_clip,
            far_clip,
            cull_frustum: ViewFrustum::perspective(
                near_clip,
                far_clip,
                width_slope * CULL_RATIO,
                height_slope * CULL_RATIO,
            ),
            clip_frustum: ViewFrustum::perspective(
                near_clip,
                far_clip,
                width_slope * CLIP_RATIO,
                height_slope * CLIP_RATIO,
            ),
        }
    }

    /// Orthogonal camera seeing `half_width` world units to each side.
    /// There are no near or far clip planes.
    pub fn create_orthogonal(
        location: Transform3D,
        image_width: i32,
        image_height: i32,
        half_width: f32,
    ) -> Camera {
        let half_height = half_width * image_height as f32 / image_width as f32;
        Camera {
            perspective: false,
            location,
            width_slope: half_width,
            height_slope: half_height,
            inv_width_slope: 0.5 / half_width,
            inv_height_slope: 0.5 / half_height,
            image_width: image_width as f32,
            image_height: image_height as f32,
            near_clip: f32::MIN,
            far_clip: f32::MAX,
            cull_frustum: ViewFrustum::orthogonal(half_width * CULL_RATIO, half_height * CULL_RATIO),
            clip_frustum: ViewFrustum::orthogonal(half_width * CLIP_RATIO, half_height * CLIP_RATIO),
        }
    }

    #[inline]
    pub fn world_to_camera(&self, world_space: Vec3) -> Vec3 {
        self.location.point_to_local(world_space)
    }

    /// Project a camera space point to image space. A perspective point
    /// at or behind the camera plane projects with inverse depth zero;
    /// clipping replaces such vertices before rasterization.
    pub fn camera_to_screen(&self, camera_space: Vec3) -> ProjectedPoint {
        if self.perspective {
            let inv_depth = if camera_space.z > 0.0 {
                1.0 / camera_space.z
            } else {
                0.0
            };
            let center_shear = camera_space.z * 0.5;
            let pre_projection = Vec2::new(
                (camera_space.x * self.inv_width_slope + center_shear) * self.image_width,
                (-camera_space.y * self.inv_height_slope + center_shear) * self.image_height,
            );
            ProjectedPoint::new(camera_space, pre_projection * inv_depth)
        } else {
            let image_space = Vec2::new(
                (camera_space.x * self.inv_width_slope + 0.5) * self.image_width,
                (-camera_space.y * self.inv_height_slope + 0.5) * self.image_height,
            );
            ProjectedPoint::new(camera_space, image_space)
        }
    }

    #[inline]
    pub fn world_to_screen(&self, world_space: Vec3) -> ProjectedPoint {
        self.camera_to_screen(self.world_to_camera(world_space))
    }

    #[inline]
    pub fn frustum(&self, clipping: bool) -> &ViewFrustum {
        if clipping {
            &self.clip_frustum
        } else {
            &self.cull_frustum
        }
    }

    /// Conservative test of a model space box against the cull frustum.
    /// `Hidden` means no part of the box can appear on screen.
    pub fn is_box_seen(
        &self,
        min_bound: Vec3,
        max_bound: Vec3,
        model_to_world: &Transform3D,
    ) -> Visibility {
        let corners = box_corners(min_bound, max_bound)
            .map(|corner| self.world_to_camera(model_to_world.transform_point(corner)));
        self.cull_frustum.convex_hull_visibility(&corners)
    }
}

/// The eight corners of a box, in the order used everywhere a hull is
/// projected.
pub fn box_corners(min_bound: Vec3, max_bound: Vec3) -> [Vec3; 8] {
    [
        Vec3::new(min_bound.x, min_bound.y, min_bound.z),
        Vec3::new(min_bound.x, min_bound.y, max_bound.z),
        Vec3::new(min_bound.x, max_bound.y, min_bound.z),
        Vec3::new(min_bound.x, max_bound.y, max_bound.z),
        Vec3::new(max_bound.x, min_bound.y, min_bound.z),
        Vec3::new(max_bound.x, min_bound.y, max_bound.z),
        Vec3::new(max_bound.x, max_bound.y, min_bound.z),
        Vec3::new(max_bound.x, max_bound.y, max_bound.z),
    ]
}
