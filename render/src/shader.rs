//! Per-pixel shading loops.
//!
//! The shader variant is a closed set chosen when a command is created:
//! perspective or not, solid or alpha filtered, textured or vertex color
//! only. Each combination is a monomorphized loop selected into a plain
//! function pointer, so the per-pixel work never branches on the mode.

use glam::{Vec2, Vec4};
use karst_image::{Color, PackOrder, Texture};
use karst_math::IRect;

use crate::commands::TriangleDrawCommand;
use crate::triangle::ScreenTriangle;

/// Blending mode of a model or command.
///
/// `Solid` writes color and depth unconditionally after the depth test;
/// `Alpha` leaves the depth buffer untouched and blends the color by the
/// source alpha. Alpha geometry must be rendered after solid geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Solid,
    Alpha,
}

/// Vertex attributes shared by every sub-triangle of a source triangle.
#[derive(Clone)]
pub struct TriangleInput {
    pub diffuse: Option<Texture>,
    pub light: Option<Texture>,
    /// Vertex colors in 0..1 per channel.
    pub colors: [Vec4; 3],
    /// Two UV pairs per vertex: diffuse in x,y and light map in z,w.
    pub tex_coords: [Vec4; 3],
}

pub type DrawFn = fn(&TriangleDrawCommand, IRect);

/// Pick the shading loop for a command's closed set of modes.
pub fn select_draw_fn(perspective: bool, filter: Filter, textured: bool) -> DrawFn {
    match (perspective, filter, textured) {
        (false, Filter::Solid, false) => draw_triangle::<false, false, false>,
        (false, Filter::Solid, true) => draw_triangle::<false, false, true>,
        (false, Filter::Alpha, false) => draw_triangle::<false, true, false>,
        (false, Filter::Alpha, true) => draw_triangle::<false, true, true>,
        (true, Filter::Solid, false) => draw_triangle::<true, false, false>,
        (true, Filter::Solid, true) => draw_triangle::<true, false, true>,
        (true, Filter::Alpha, false) => draw_triangle::<true, true, false>,
        (true, Filter::Alpha, true) => draw_triangle::<true, true, true>,
    }
}

/// Rough mip level for a whole triangle: the worst texel-per-pixel
/// density along its edges.
fn estimate_mip_level(
    triangle: &ScreenTriangle,
    tex_coords: &[Vec4; 3],
    texture: &Texture,
    light_channel: bool,
) -> u32 {
    let size = Vec2::new(texture.width() as f32, texture.height() as f32);
    let mut worst_ratio = 0.0f32;
    for i in 0..3 {
        let j = (i + 1) % 3;
        let screen = (triangle.position[j].is - triangle.position[i].is).length();
        if screen <= 0.0 {
            continue;
        }
        let uv = |coordinate: Vec4| {
            if light_channel {
                Vec2::new(coordinate.z, coordinate.w)
            } else {
                Vec2::new(coordinate.x, coordinate.y)
            }
        };
        let texels = ((uv(tex_coords[j]) - uv(tex_coords[i])) * size).length();
        worst_ratio = worst_ratio.max(texels / screen);
    }
    if worst_ratio <= 1.0 {
        0
    } else {
        (worst_ratio.log2() as u32).min(texture.max_mip_level())
    }
}

fn blend(source: Vec4, destination: Color) -> Color {
    let alpha = source.w;
    let destination = destination.to_vec4();
    Color::from_vec4(source * alpha + destination * (1.0 - alpha))
}

/// The shading loop. Walks the row intervals of the triangle inside
/// `clip_bound`, steps the interpolation basis along x, depth tests and
/// writes pixels. `clip_bound` must stay inside the target's rows except
/// for the final odd row produced by pair alignment, which is skipped.
fn draw_triangle<const PERSPECTIVE: bool, const ALPHA: bool, const TEXTURED: bool>(
    command: &TriangleDrawCommand,
    clip_bound: IRect,
) {
    let bound = command.triangle.aligned_raster_bound(clip_bound);
    if !bound.has_area() {
        return;
    }
    let target_height = command.target_height();
    let mut rows = Vec::with_capacity(bound.height() as usize);
    command.triangle.row_intervals(&mut rows, bound);
    let basis = command.triangle.projection(command.sub_b, command.sub_c, PERSPECTIVE);

    let input = &command.input;
    let diffuse_level = match (&input.diffuse, TEXTURED) {
        (Some(texture), true) => {
            estimate_mip_level(&command.triangle, &input.tex_coords, texture, false)
        }
        _ => 0,
    };
    let light_level = match (&input.light, TEXTURED) {
        (Some(texture), true) => {
            estimate_mip_level(&command.triangle, &input.tex_coords, texture, true)
        }
        _ => 0,
    };

    for (row_index, row) in rows.iter().enumerate() {
        let y = bound.top() + row_index as i32;
        if y < 0 || y >= target_height || row.left >= row.right {
            continue;
        }
        let color_row = command
            .color_target
            .as_ref()
            .map(|image| image.row_ptr(y, "shader color row"));
        let depth_row = command
            .depth_target
            .as_ref()
            .map(|image| image.row_ptr(y, "shader depth row"));
        let pack_order = command
            .color_target
            .as_ref()
            .map(|image| image.pack_order())
            .unwrap_or(PackOrder::Rgba);

        let mut weight = basis.at_pixel(row.left, y);
        for x in row.left..row.right {
            let lanes = weight;
            weight += basis.dx;

            // Depth term and perspective corrected barycentric weights.
            let (depth_value, weight_b, weight_c) = if PERSPECTIVE {
                if lanes.x <= 0.0 {
                    continue;
                }
                let inv_depth = 1.0 / lanes.x;
                (lanes.x, lanes.y * inv_depth, lanes.z * inv_depth)
            } else {
                (lanes.x, lanes.y, lanes.z)
            };

            if let Some(depth_row) = &depth_row {
                let stored = depth_row.read(x as usize);
                // Orthogonal depth grows with distance, perspective
                // stores 1/z which shrinks with distance.
                let nearer = if PERSPECTIVE {
                    depth_value > stored
                } else {
                    depth_value < stored
                };
                if !nearer {
                    continue;
                }
                if !ALPHA {
                    depth_row.write(x as usize, depth_value);
                }
            }

            let Some(color_row) = &color_row else {
                continue;
            };
            let weight_a = 1.0 - weight_b - weight_c;
            let mut color = input.colors[0] * weight_a
                + input.colors[1] * weight_b
                + input.colors[2] * weight_c;
            if TEXTURED {
                let coordinate = input.tex_coords[0] * weight_a
                    + input.tex_coords[1] * weight_b
                    + input.tex_coords[2] * weight_c;
                if let Some(diffuse) = &input.diffuse {
                    color *= diffuse
                        .sample_nearest(coordinate.x, coordinate.y, diffuse_level)
                        .to_vec4();
                }
                if let Some(light) = &input.light {
                    let shade = light
                        .sample_nearest(coordinate.z, coordinate.w, light_level)
                        .to_vec4();
                    color.x *= shade.x;
                    color.y *= shade.y;
                    color.z *= shade.z;
                }
            }
            let packed = if ALPHA {
                let destination = pack_order.unpack(color_row.read(x as usize));
                pack_order.pack(blend(color, destination))
            } else {
                pack_order.pack(Color::from_vec4(color))
            };
            color_row.write(x as usize, packed);
        }
    }
}
