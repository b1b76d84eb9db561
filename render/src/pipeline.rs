//! From projected corners to draw commands.
//!
//! Each triangle is backface culled on its rounded winding, rejected
//! against the cull frustum, split by the clipper when it reaches
//! outside the clip frustum, and finally appended to a command queue or
//! rasterized immediately when no queue is given.

use glam::{Vec3, Vec4};
use karst_image::{ImageF32, ImageRgbaU8, Texture};
use karst_math::IRect;

use crate::camera::{Camera, ProjectedPoint, Visibility};
use crate::clip::{clip_triangle, ClippedTriangle};
use crate::commands::{CommandQueue, TriangleDrawCommand};
use crate::shader::{select_draw_fn, Filter, TriangleInput};
use crate::triangle::ScreenTriangle;

/// Render one triangle, through the queue when one is given.
///
/// `tex_coords` carries diffuse UV in x,y and light map UV in z,w per
/// corner; `colors` are 0..1 vertex colors. The corners must come from
/// the same camera that is passed here, so clipping can reuse their
/// camera space positions.
#[allow(clippy::too_many_arguments)]
pub fn render_triangle(
    queue: Option<&mut CommandQueue>,
    color_target: Option<&ImageRgbaU8>,
    depth_target: Option<&ImageF32>,
    camera: &Camera,
    position_a: &ProjectedPoint,
    position_b: &ProjectedPoint,
    position_c: &ProjectedPoint,
    filter: Filter,
    diffuse: Option<&Texture>,
    light: Option<&Texture>,
    tex_coords: [Vec4; 3],
    colors: [Vec4; 3],
) {
    if let (Some(color), Some(depth)) = (color_target, depth_target) {
        debug_assert!(color.same_size(depth), "color and depth targets must agree on dimensions");
    }
    let target_bound = match target_bound(color_target, depth_target) {
        Some(bound) => bound,
        None => return,
    };

    let corners = [position_a.cs, position_b.cs, position_c.cs];
    if camera.cull_frustum.convex_hull_visibility(&corners) == Visibility::Hidden {
        return;
    }

    let input = TriangleInput {
        diffuse: diffuse.cloned(),
        light: light.cloned(),
        colors,
        tex_coords,
    };

    let mut queue = queue;
    let mut emit = |triangle: ScreenTriangle, sub_b: Vec3, sub_c: Vec3| {
        if !triangle.front_facing() {
            return;
        }
        if !IRect::overlaps(triangle.whole_bound, target_bound) {
            return;
        }
        let command = TriangleDrawCommand {
            color_target: color_target.cloned(),
            depth_target: depth_target.cloned(),
            perspective: camera.perspective,
            filter,
            triangle,
            sub_b,
            sub_c,
            clip_bound: target_bound,
            occluded: false,
            input: input.clone(),
            draw: select_draw_fn(camera.perspective, filter, input.diffuse.is_some()),
        };
        match queue.as_deref_mut() {
            Some(queue) => queue.add(command),
            None => (command.draw)(&command, target_bound),
        }
    };

    if camera.clip_frustum.convex_hull_visibility(&corners) == Visibility::Full {
        emit(
            ScreenTriangle::new(*position_a, *position_b, *position_c),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
    } else {
        let mut pieces: Vec<ClippedTriangle> = Vec::new();
        clip_triangle(camera, position_a, position_b, position_c, &mut pieces);
        for piece in pieces {
            emit(
                ScreenTriangle::new(piece.points[0], piece.points[1], piece.points[2]),
                piece.sub_b,
                piece.sub_c,
            );
        }
    }
}

/// Depth-only variant for ground passes feeding occlusion.
pub fn render_triangle_depth(
    depth_target: &ImageF32,
    camera: &Camera,
    position_a: &ProjectedPoint,
    position_b: &ProjectedPoint,
    position_c: &ProjectedPoint,
) {
    render_triangle(
        None,
        None,
        Some(depth_target),
        camera,
        position_a,
        position_b,
        position_c,
        Filter::Solid,
        None,
        None,
        [Vec4::ZERO; 3],
        [Vec4::ONE; 3],
    );
}

fn target_bound(color: Option<&ImageRgbaU8>, depth: Option<&ImageF32>) -> Option<IRect> {
    let bound = if let Some(image) = color {
        image.bound()
    } else if let Some(image) = depth {
        image.bound()
    } else {
        return None;
    };
    bound.has_area().then_some(bound)
}
