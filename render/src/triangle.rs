//! Sub-pixel exact triangle shapes and interpolation bases.
//!
//! A [`ScreenTriangle`] carries three projected corners. Its visible
//! shape is computed per scanline as [`RowInterval`]s by cutting the
//! half plane of each edge with exact 64-bit integer arithmetic at 16
//! units per pixel. The tie-break threshold of every edge depends on the
//! edge's direction, so two triangles sharing an edge cover each pixel
//! along it exactly once.

use glam::{I64Vec2, Vec3};
use karst_math::fixed::{self, UNITS_PER_HALF_PIXEL, UNITS_PER_PIXEL};
use karst_math::rect::{round_down, round_up};
use karst_math::IRect;

use crate::camera::ProjectedPoint;

/// Pixel columns of one scanline: `left` inclusive, `right` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowInterval {
    pub left: i32,
    pub right: i32,
}

/// Per-pixel interpolation basis sampled at the image origin.
///
/// Each vector holds `(depth term, weight of corner B, weight of corner
/// C)`. For orthogonal projection the depth term is linear camera depth
/// and the weights are affine; for perspective everything is divided by
/// camera depth per corner and the shader divides back per pixel.
#[derive(Debug, Clone, Copy)]
pub struct WeightBasis {
    pub origin: Vec3,
    pub dx: Vec3,
    pub dy: Vec3,
}

impl WeightBasis {
    /// The interpolated vector at a pixel center.
    #[inline]
    pub fn at_pixel(&self, x: i32, y: i32) -> Vec3 {
        self.origin + self.dx * (x as f32 + 0.5) + self.dy * (y as f32 + 0.5)
    }
}

/// A projected triangle with its whole-pixel bounding rectangle.
#[derive(Debug, Clone, Copy)]
pub struct ScreenTriangle {
    pub position: [ProjectedPoint; 3],
    pub whole_bound: IRect,
}

impl ScreenTriangle {
    pub fn new(a: ProjectedPoint, b: ProjectedPoint, c: ProjectedPoint) -> Self {
        Self {
            position: [a, b, c],
            whole_bound: triangle_bound(a.flat, b.flat, c.flat),
        }
    }

    /// Winding test on the rounded coordinates. Not meaningful for
    /// triangles that still need clipping against the near plane.
    pub fn front_facing(&self) -> bool {
        let a = self.position[0].flat;
        let b = self.position[1].flat;
        let c = self.position[2].flat;
        ((c.x - a.x) * (b.y - a.y)) + ((c.y - a.y) * (a.x - b.x)) < 0
    }

    /// The raster bound inside `clip_bound`, with top and bottom aligned
    /// to pairs of rows so SIMD shaders can process two rows at a time.
    pub fn aligned_raster_bound(&self, clip_bound: IRect) -> IRect {
        let unaligned = IRect::cut(self.whole_bound, clip_bound);
        let top = round_down(unaligned.top(), 2);
        let bottom = round_up(unaligned.bottom(), 2);
        IRect::new(unaligned.left(), top, unaligned.width(), bottom - top)
    }

    /// Fill `rows` with one interval per scanline of `bound`.
    pub fn row_intervals(&self, rows: &mut Vec<RowInterval>, bound: IRect) {
        rows.clear();
        rows.resize(bound.height().max(0) as usize, RowInterval::default());
        rasterize_rows(
            self.position[0].flat,
            self.position[1].flat,
            self.position[2].flat,
            rows,
            bound,
        );
    }

    /// The interpolation basis for this triangle.
    ///
    /// `sub_b` and `sub_c` re-parameterize a clipped sub-triangle: lane
    /// `i` holds the barycentric B (respectively C) weight of this
    /// triangle's corner `i` inside the original triangle. An unclipped
    /// triangle passes `(0,1,0)` and `(0,0,1)`.
    pub fn projection(&self, sub_b: Vec3, sub_c: Vec3, perspective: bool) -> WeightBasis {
        // Edge normals in image space and their normalization against
        // the opposite corner.
        let mut offset_x = [0.0f32; 3];
        let mut offset_y = [0.0f32; 3];
        for i in 0..3 {
            let j = (i + 1) % 3;
            offset_x[i] = self.position[j].is.y - self.position[i].is.y;
            offset_y[i] = self.position[i].is.x - self.position[j].is.x;
        }
        let mut weight_multiplier = [0.0f32; 3];
        for i in 0..3 {
            let o = (i + 2) % 3;
            let other_side_value = (self.position[o].is.x - self.position[i].is.x) * offset_x[i]
                + (self.position[o].is.y - self.position[i].is.y) * offset_y[i];
            weight_multiplier[o] = if other_side_value == 0.0 {
                0.0
            } else {
                1.0 / other_side_value
            };
        }
        let mut normal_x = [0.0f32; 3];
        let mut normal_y = [0.0f32; 3];
        for i in 0..3 {
            normal_x[i] = offset_x[i] * weight_multiplier[i];
            normal_y[i] = offset_y[i] * weight_multiplier[i];
        }
        // Affine corner weights sampled at the image origin, and their
        // screen space derivatives, indexed per corner.
        let mut target_weight = Vec3::ZERO;
        for i in 0..3 {
            let o = (i + 2) % 3;
            target_weight[o] =
                self.position[i].is.x * -normal_x[i] + self.position[i].is.y * -normal_y[i];
        }
        let affine_dx = Vec3::new(normal_x[1], normal_x[2], normal_x[0]);
        let affine_dy = Vec3::new(normal_y[1], normal_y[2], normal_y[0]);

        if !perspective {
            // Linear depth interpolates directly in screen space.
            let depth = Vec3::new(
                self.position[0].cs.z,
                self.position[1].cs.z,
                self.position[2].cs.z,
            );
            WeightBasis {
                origin: combine_weights(target_weight, depth, sub_b, sub_c),
                dx: combine_weights(affine_dx, depth, sub_b, sub_c),
                dy: combine_weights(affine_dy, depth, sub_b, sub_c),
            }
        } else {
            // Divide every corner's weights by its depth; a linear walk
            // over (1/W, B/W, C/W) in screen space is then exact and the
            // shader recovers B and C by dividing with 1/W per pixel.
            let inv_depth = Vec3::new(
                1.0 / self.position[0].cs.z,
                1.0 / self.position[1].cs.z,
                1.0 / self.position[2].cs.z,
            );
            WeightBasis {
                origin: combine_weights_projected(target_weight, inv_depth, sub_b, sub_c),
                dx: combine_weights_projected(affine_dx, inv_depth, sub_b, sub_c),
                dy: combine_weights_projected(affine_dy, inv_depth, sub_b, sub_c),
            }
        }
    }
}

/// Orthogonal lanes: (interpolated depth, B weight, C weight).
fn combine_weights(affine: Vec3, depth: Vec3, sub_b: Vec3, sub_c: Vec3) -> Vec3 {
    Vec3::new(affine.dot(depth), affine.dot(sub_b), affine.dot(sub_c))
}

/// Perspective lanes: (1/W, B/W, C/W) with per-corner depth division.
fn combine_weights_projected(affine: Vec3, inv_depth: Vec3, sub_b: Vec3, sub_c: Vec3) -> Vec3 {
    let divided = affine * inv_depth;
    Vec3::new(
        divided.x + divided.y + divided.z,
        divided.dot(sub_b),
        divided.dot(sub_c),
    )
}

/// Whole-pixel bound of the rounded corners, padded by one pixel so the
/// raster walk never misses a partially covered border pixel.
pub fn triangle_bound(a: I64Vec2, b: I64Vec2, c: I64Vec2) -> IRect {
    let x1 = fixed::nearest_pixel(a.x);
    let y1 = fixed::nearest_pixel(a.y);
    let x2 = fixed::nearest_pixel(b.x);
    let y2 = fixed::nearest_pixel(b.y);
    let x3 = fixed::nearest_pixel(c.x);
    let y3 = fixed::nearest_pixel(c.y);
    let left = x1.min(x2).min(x3) - 1;
    let top = y1.min(y2).min(y3) - 1;
    let right = x1.max(x2).max(x3) + 1;
    let bottom = y1.max(y2).max(y3) + 1;
    IRect::new(left, top, right - left, bottom - top)
}

#[inline]
fn div_floor(a: i64, b: i64) -> i64 {
    let quotient = a / b;
    let remainder = a % b;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        quotient - 1
    } else {
        quotient
    }
}

/// Cut the pixels outside one directed edge out of the row intervals.
///
/// The tie-break threshold turns `value > 0` into `value >= 0` for edges
/// pointing one way, so a pixel center exactly on a shared edge belongs
/// to exactly one of the two adjacent triangles.
fn cut_convex_edge(start: I64Vec2, end: I64Vec2, rows: &mut [RowInterval], clip_bound: IRect) {
    let left_bound = clip_bound.left();
    let top_bound = clip_bound.top();
    let right_bound = clip_bound.right();

    // Pixel center of the clip bound's upper left corner, in units.
    let origin_x = UNITS_PER_HALF_PIXEL + clip_bound.left() as i64 * UNITS_PER_PIXEL;
    let origin_y = UNITS_PER_HALF_PIXEL + clip_bound.top() as i64 * UNITS_PER_PIXEL;

    // Comparing against -1 makes the test exclusive for integers.
    let threshold: i64 = if start.x > end.x || (start.x == end.x && start.y > end.y) {
        -1
    } else {
        0
    };
    // Outward normal of the edge.
    let normal_x = end.y - start.y;
    let normal_y = start.x - end.x;
    // The normal's step per whole pixel.
    let offset_x = normal_x * UNITS_PER_PIXEL;
    let offset_y = normal_y * UNITS_PER_PIXEL;
    // Unnormalized edge distance at the origin pixel center.
    let value_origin = (origin_x - start.x) * normal_x + (origin_y - start.y) * normal_y;

    if normal_x != 0 {
        // A pixel center at column x is outside the edge iff
        // offset_x * x > threshold - value_origin + offset_x * left_bound.
        let mut limit = threshold - value_origin + offset_x * left_bound as i64;
        if normal_x < 0 {
            // The edge cuts from the left: the first kept column is one
            // past the highest x still outside.
            for row in rows.iter_mut() {
                let left_side = (div_floor(limit + 1, offset_x) + 1) as i32;
                let left_side = left_side.clamp(left_bound, right_bound);
                row.left = row.left.max(left_side);
                limit -= offset_y;
            }
        } else {
            // The edge cuts from the right: the first excluded column is
            // one past the highest x still inside.
            for row in rows.iter_mut() {
                let right_side = (div_floor(limit, offset_x) + 1) as i32;
                let right_side = right_side.clamp(left_bound, right_bound);
                row.right = row.right.min(right_side);
                limit -= offset_y;
            }
        }
    } else if normal_y != 0 {
        // A fully horizontal edge removes whole rows.
        let mut value_row = value_origin;
        for row in rows.iter_mut() {
            if value_row > threshold {
                row.left = right_bound;
                row.right = left_bound;
            }
            value_row += offset_y;
        }
    }
    // A zero length edge leaves the rows untouched; the two remaining
    // edges are exact opposites and remove every pixel between them.
}

/// Compute the visible pixel interval of every row of `clip_bound`.
///
/// Intervals start as the full bound and each edge cuts its outside
/// away. Triangles with two identical corners come out empty.
pub fn rasterize_rows(a: I64Vec2, b: I64Vec2, c: I64Vec2, rows: &mut [RowInterval], clip_bound: IRect) {
    debug_assert!(rows.len() >= clip_bound.height().max(0) as usize);
    if a == b || b == c || c == a {
        for row in rows.iter_mut() {
            row.left = clip_bound.right();
            row.right = clip_bound.left();
        }
        return;
    }
    for row in rows.iter_mut() {
        row.left = clip_bound.left();
        row.right = clip_bound.right();
    }
    let corners = [a, b, c];
    for i in 0..3 {
        cut_convex_edge(corners[i], corners[(i + 1) % 3], rows, clip_bound);
    }
}
