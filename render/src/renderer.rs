//! The renderer: frame lifecycle, occlusion grid and debug overlay.
//!
//! A frame runs `begin` -> any number of `give_task` / `occlude_*` /
//! `is_box_visible` calls -> `end`. Occluders accumulate into a coarse
//! depth grid of 16x16 pixel cells holding the closest depth behind
//! which everything is hidden; `end` marks fully hidden queued triangles
//! as occluded before executing the queue across worker tiles.

use glam::{I64Vec2, Vec3, Vec4};
use karst_heap::Handle;
use karst_image::draw::draw_line;
use karst_image::{Color, ImageF32, ImageRgbaU8, Texture};
use karst_math::fixed::UNITS_PER_PIXEL;
use karst_math::{IRect, Transform3D};

use crate::camera::{box_corners, Camera, ProjectedPoint, Visibility};
use crate::commands::{CommandQueue, DEFAULT_JOB_COUNT};
use crate::error::RenderError;
use crate::model::Model;
use crate::pipeline::render_triangle;
use crate::shader::Filter;

/// Occlusion grid cells cover this many pixels per axis.
pub const CELL_SIZE: i32 = 16;

/// Depth written behind a triangle must beat the grid by this much.
const OCCLUSION_TOLERANCE: f32 = 0.001;

struct DebugLine {
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
    color: Color,
}

struct RendererData {
    /// Calls are only allowed in the expected order.
    receiving: bool,
    color_buffer: Option<ImageRgbaU8>,
    /// Linear depth for orthogonal cameras, 1/depth for perspective.
    depth_buffer: Option<ImageF32>,
    /// Closest linear depth per cell behind which nothing is visible.
    depth_grid: Option<ImageF32>,
    queue: CommandQueue,
    debug_lines: Vec<DebugLine>,
    width: i32,
    height: i32,
    grid_width: i32,
    grid_height: i32,
    /// Whether any occluder has been given during this frame.
    occluded: bool,
}

fn counter_clockwise(p: &ProjectedPoint, q: &ProjectedPoint, r: &ProjectedPoint) -> bool {
    (q.flat.y - p.flat.y) * (r.flat.x - q.flat.x) - (q.flat.x - p.flat.x) * (r.flat.y - q.flat.y) < 0
}

/// Gift wrapping over the rounded screen positions. Fewer than three
/// input points pass through unchanged.
fn jarvis_convex_hull(input: &[ProjectedPoint], output: &mut Vec<ProjectedPoint>) {
    output.clear();
    if input.len() < 3 {
        output.extend_from_slice(input);
        return;
    }
    let mut leftmost = 0;
    for index in 1..input.len() {
        if input[index].flat.x < input[leftmost].flat.x {
            leftmost = index;
        }
    }
    let mut current = leftmost;
    loop {
        if output.len() >= input.len() {
            // Collinear degeneracies could loop forever otherwise.
            return;
        }
        output.push(input[current]);
        let mut next = (current + 1) % input.len();
        for index in 0..input.len() {
            if counter_clockwise(&input[current], &input[index], &input[next]) {
                next = index;
            }
        }
        current = next;
        if current == leftmost {
            break;
        }
    }
}

/// Project the corners of an occluder hull. Returns false when any
/// corner leaves the cull frustum after narrowing x and y by half, which
/// skips occluders that are only partially visible rather than clipping
/// them.
fn project_hull(
    output: &mut [ProjectedPoint; 8],
    corners: &[Vec3; 8],
    model_to_world: &Transform3D,
    camera: &Camera,
) -> bool {
    for (index, corner) in corners.iter().enumerate() {
        let world_point = model_to_world.transform_point(*corner);
        let camera_point = camera.world_to_camera(world_point);
        let narrow_point = camera_point * Vec3::new(0.5, 0.5, 1.0);
        for plane in camera.cull_frustum.planes() {
            if !plane.inside(narrow_point) {
                return false;
            }
        }
        output[index] = camera.camera_to_screen(camera_point);
    }
    true
}

fn pixel_bound_from_projection(points: &[ProjectedPoint]) -> IRect {
    let mut result = IRect::new(
        (points[0].flat.x / UNITS_PER_PIXEL) as i32,
        (points[0].flat.y / UNITS_PER_PIXEL) as i32,
        1,
        1,
    );
    for point in &points[1..] {
        result = IRect::merge(
            result,
            IRect::new(
                (point.flat.x / UNITS_PER_PIXEL) as i32,
                (point.flat.y / UNITS_PER_PIXEL) as i32,
                1,
                1,
            ),
        );
    }
    result
}

fn point_inside_of_edge(edge_a: I64Vec2, edge_b: I64Vec2, point: I64Vec2) -> bool {
    let edge_direction = I64Vec2::new(edge_b.y - edge_a.y, edge_a.x - edge_b.x);
    let relative_position = point - edge_a;
    edge_direction.x * relative_position.x + edge_direction.y * relative_position.y <= 0
}

/// The hull corners must be sorted clockwise and convex.
fn point_inside_of_hull(corners: &[ProjectedPoint], point: I64Vec2) -> bool {
    for index in 0..corners.len() {
        let next = (index + 1) % corners.len();
        if !point_inside_of_edge(corners[index].flat, corners[next].flat, point) {
            return false;
        }
    }
    true
}

fn rectangle_inside_of_hull(corners: &[ProjectedPoint], rectangle: IRect) -> bool {
    point_inside_of_hull(corners, I64Vec2::new(rectangle.left() as i64, rectangle.top() as i64))
        && point_inside_of_hull(corners, I64Vec2::new(rectangle.right() as i64, rectangle.top() as i64))
        && point_inside_of_hull(corners, I64Vec2::new(rectangle.left() as i64, rectangle.bottom() as i64))
        && point_inside_of_hull(corners, I64Vec2::new(rectangle.right() as i64, rectangle.bottom() as i64))
}

impl RendererData {
    fn new() -> Self {
        Self {
            receiving: false,
            color_buffer: None,
            depth_buffer: None,
            depth_grid: None,
            queue: CommandQueue::new(),
            debug_lines: Vec::new(),
            width: 0,
            height: 0,
            grid_width: 0,
            grid_height: 0,
            occluded: false,
        }
    }

    fn begin_frame(
        &mut self,
        color_buffer: Option<ImageRgbaU8>,
        depth_buffer: Option<ImageF32>,
    ) -> Result<(), RenderError> {
        if self.receiving {
            return Err(RenderError::WrongState);
        }
        if let (Some(color), Some(depth)) = (&color_buffer, &depth_buffer) {
            if !color.same_size(depth) {
                return Err(RenderError::SizeMismatch {
                    color_width: color.width(),
                    color_height: color.height(),
                    depth_width: depth.width(),
                    depth_height: depth.height(),
                });
            }
        }
        self.width = 0;
        self.height = 0;
        if let Some(color) = &color_buffer {
            self.width = color.width();
            self.height = color.height();
        } else if let Some(depth) = &depth_buffer {
            self.width = depth.width();
            self.height = depth.height();
        }
        self.grid_width = (self.width + CELL_SIZE - 1) / CELL_SIZE;
        self.grid_height = (self.height + CELL_SIZE - 1) / CELL_SIZE;
        self.color_buffer = color_buffer;
        self.depth_buffer = depth_buffer;
        self.occluded = false;
        self.receiving = true;
        log::debug!("renderer begin: {}x{} target", self.width, self.height);
        Ok(())
    }

    /// Cells overlapped by a pixel bound, clamped to the grid.
    fn outer_cell_bound(&self, pixel_bound: IRect) -> IRect {
        let min_cell_x = (pixel_bound.left() / CELL_SIZE).max(0);
        let min_cell_y = (pixel_bound.top() / CELL_SIZE).max(0);
        let max_cell_x = (pixel_bound.right() / CELL_SIZE + 1).min(self.grid_width);
        let max_cell_y = (pixel_bound.bottom() / CELL_SIZE + 1).min(self.grid_height);
        IRect::new(
            min_cell_x,
            min_cell_y,
            max_cell_x - min_cell_x,
            max_cell_y - min_cell_y,
        )
    }

    /// Allocate and clear the grid once per frame, on first use.
    fn prepare_for_occlusion(&mut self) -> Result<(), RenderError> {
        if !self.occluded {
            let too_small = match &self.depth_grid {
                Some(grid) => grid.width() < self.grid_width || grid.height() < self.grid_height,
                None => true,
            };
            if too_small {
                self.depth_grid = Some(ImageF32::new(self.grid_width, self.grid_height)?);
            }
            if let Some(grid) = self.depth_grid.as_mut() {
                grid.fill(f32::INFINITY);
            }
        }
        self.occluded = true;
        Ok(())
    }

    /// Write the hull's furthest corner depth into every grid cell whose
    /// sub-pixel rectangle lies fully inside the hull. Only hulls larger
    /// than one cell can cover any cell completely.
    fn occlude_from_sorted_hull(&mut self, corners: &[ProjectedPoint], pixel_bound: IRect) {
        if pixel_bound.width() <= CELL_SIZE || pixel_bound.height() <= CELL_SIZE {
            return;
        }
        let mut distance = 0.0f32;
        for corner in corners {
            distance = distance.max(corner.cs.z);
        }
        let outer_bound = self.outer_cell_bound(pixel_bound);
        let Some(grid) = self.depth_grid.as_mut() else {
            return;
        };
        for cell_y in outer_bound.top()..outer_bound.bottom() {
            for cell_x in outer_bound.left()..outer_bound.right() {
                let pixel_region = IRect::new(cell_x * CELL_SIZE, cell_y * CELL_SIZE, CELL_SIZE, CELL_SIZE);
                let sub_pixel_region = pixel_region * UNITS_PER_PIXEL as i32;
                if rectangle_inside_of_hull(corners, sub_pixel_region) {
                    let old_depth = grid.read_pixel_clamp(cell_x, cell_y);
                    if distance < old_depth {
                        grid.write_pixel(cell_x, cell_y, distance);
                    }
                }
            }
        }
    }

    fn occlude_from_box(
        &mut self,
        minimum: Vec3,
        maximum: Vec3,
        model_to_world: &Transform3D,
        camera: &Camera,
        debug_silhouette: bool,
    ) -> Result<(), RenderError> {
        if !self.receiving {
            return Err(RenderError::WrongState);
        }
        self.prepare_for_occlusion()?;
        let corners = box_corners(minimum, maximum);
        let mut projections = [ProjectedPoint::default(); 8];
        if project_hull(&mut projections, &corners, model_to_world, camera) {
            let mut hull = Vec::with_capacity(8);
            jarvis_convex_hull(&projections, &mut hull);
            let pixel_bound = pixel_bound_from_projection(&hull);
            self.occlude_from_sorted_hull(&hull, pixel_bound);
            if debug_silhouette {
                for index in 0..hull.len() {
                    let next = (index + 1) % hull.len();
                    if hull[index].cs.z > camera.near_clip {
                        self.debug_lines.push(DebugLine {
                            x1: hull[index].flat.x / UNITS_PER_PIXEL,
                            y1: hull[index].flat.y / UNITS_PER_PIXEL,
                            x2: hull[next].flat.x / UNITS_PER_PIXEL,
                            y2: hull[next].flat.y / UNITS_PER_PIXEL,
                            color: Color::rgb(0, 255, 255),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Use the already queued solid triangles as occluders. Removes many
    /// small triangles hiding behind larger ones, while leaving seams
    /// along triangle borders conservative.
    fn occlude_from_existing_triangles(&mut self) -> Result<(), RenderError> {
        if !self.receiving {
            return Err(RenderError::WrongState);
        }
        self.prepare_for_occlusion()?;
        for index in 0..self.queue.buffer.len() {
            let filter = self.queue.buffer[index].filter;
            if filter == Filter::Solid {
                let triangle = self.queue.buffer[index].triangle;
                self.occlude_from_sorted_hull(&triangle.position, triangle.whole_bound);
            }
        }
        Ok(())
    }

    /// Seed the grid from the top pixel row of every cell row of a
    /// previously rendered depth buffer. Only valid when lower rows are
    /// never further away than the scanned row. Perspective depth
    /// buffers hold 1/z, which is inverted into linear depth here.
    fn occlude_from_top_rows(&mut self, camera: &Camera) -> Result<(), RenderError> {
        if !self.receiving {
            return Err(RenderError::WrongState);
        }
        let Some(depth_buffer) = self.depth_buffer.clone() else {
            return Err(RenderError::MissingDepthBuffer);
        };
        self.prepare_for_occlusion()?;
        let width = self.width;
        let height = self.height;
        let grid_width = self.grid_width;
        let Some(grid) = self.depth_grid.as_mut() else {
            return Ok(());
        };
        let mut grid_y = 0;
        let mut y = 0;
        while y < height {
            let mut x = 0;
            let mut right = CELL_SIZE - 1;
            for grid_x in 0..grid_width {
                if right >= width {
                    right = width;
                }
                let max_distance = if camera.perspective {
                    let mut max_inv_distance = f32::INFINITY;
                    while x < right {
                        let new_inv_distance = depth_buffer.read_pixel_clamp(x, y);
                        if new_inv_distance < max_inv_distance {
                            max_inv_distance = new_inv_distance;
                        }
                        x += 1;
                    }
                    1.0 / max_inv_distance
                } else {
                    let mut max_distance = 0.0f32;
                    while x < right {
                        let new_distance = depth_buffer.read_pixel_clamp(x, y);
                        if new_distance > max_distance {
                            max_distance = new_distance;
                        }
                        x += 1;
                    }
                    max_distance
                };
                let old_distance = grid.read_pixel_clamp(grid_x, grid_y);
                if max_distance < old_distance {
                    grid.write_pixel(grid_x, grid_y, max_distance);
                }
                right += CELL_SIZE;
            }
            y += CELL_SIZE;
            grid_y += 1;
        }
        Ok(())
    }

    /// True when the hull cannot contribute any visible pixel, either by
    /// failing the culling test or by being behind the grid everywhere.
    fn is_box_occluded(
        &self,
        minimum: Vec3,
        maximum: Vec3,
        model_to_world: &Transform3D,
        camera: &Camera,
    ) -> Result<bool, RenderError> {
        if !self.receiving {
            return Err(RenderError::WrongState);
        }
        let corners = box_corners(minimum, maximum);
        let camera_points =
            corners.map(|corner| camera.world_to_camera(model_to_world.transform_point(corner)));
        if camera.cull_frustum.convex_hull_visibility(&camera_points) == Visibility::Hidden {
            return Ok(true);
        }
        let Some(grid) = &self.depth_grid else {
            // Nothing has occluded anything yet this frame.
            return Ok(false);
        };
        let projections = camera_points.map(|point| camera.camera_to_screen(point));
        let pixel_bound = pixel_bound_from_projection(&projections);
        let mut closest_distance = f32::INFINITY;
        for projection in &projections {
            closest_distance = closest_distance.min(projection.cs.z);
        }
        let outer_bound = self.outer_cell_bound(pixel_bound);
        for cell_y in outer_bound.top()..outer_bound.bottom() {
            for cell_x in outer_bound.left()..outer_bound.right() {
                if closest_distance < grid.read_pixel_clamp(cell_x, cell_y) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Flag every queued triangle whose closest corner cannot beat the
    /// grid depth in any overlapped cell.
    fn complete_occlusion(&mut self) {
        if !self.occluded {
            return;
        }
        let Some(grid) = self.depth_grid.clone() else {
            return;
        };
        for index in 0..self.queue.buffer.len() {
            let triangle = self.queue.buffer[index].triangle;
            let mut triangle_depth = triangle.position[0].cs.z;
            triangle_depth = triangle_depth.min(triangle.position[1].cs.z);
            triangle_depth = triangle_depth.min(triangle.position[2].cs.z);
            let outer_bound = self.outer_cell_bound(triangle.whole_bound);
            let mut any_visible = false;
            for cell_y in outer_bound.top()..outer_bound.bottom() {
                for cell_x in outer_bound.left()..outer_bound.right() {
                    if triangle_depth < grid.read_pixel_clamp(cell_x, cell_y) + OCCLUSION_TOLERANCE {
                        any_visible = true;
                    }
                }
            }
            if !any_visible {
                self.queue.buffer[index].occluded = true;
            }
        }
    }

    fn end_frame(&mut self, debug_wireframe: bool) -> Result<(), RenderError> {
        if !self.receiving {
            return Err(RenderError::WrongState);
        }
        self.receiving = false;
        self.complete_occlusion();
        self.queue
            .execute(IRect::from_size(self.width, self.height), DEFAULT_JOB_COUNT);
        log::debug!(
            "renderer end: {} commands, occlusion {}",
            self.queue.len(),
            if self.occluded { "on" } else { "off" }
        );
        if let Some(color) = self.color_buffer.as_mut() {
            if debug_wireframe {
                for command in &self.queue.buffer {
                    if command.occluded {
                        continue;
                    }
                    let corners = command.triangle.position;
                    for index in 0..3 {
                        let next = (index + 1) % 3;
                        draw_line(
                            color,
                            (corners[index].flat.x / UNITS_PER_PIXEL) as i32,
                            (corners[index].flat.y / UNITS_PER_PIXEL) as i32,
                            (corners[next].flat.x / UNITS_PER_PIXEL) as i32,
                            (corners[next].flat.y / UNITS_PER_PIXEL) as i32,
                            Color::WHITE,
                        );
                    }
                }
            }
            for line in &self.debug_lines {
                draw_line(
                    color,
                    line.x1 as i32,
                    line.y1 as i32,
                    line.x2 as i32,
                    line.y2 as i32,
                    line.color,
                );
            }
        }
        self.debug_lines.clear();
        self.queue.clear();
        self.color_buffer = None;
        self.depth_buffer = None;
        Ok(())
    }
}

/// Context for rendering multiple models into one frame with occlusion
/// culling and tile-parallel rasterization.
pub struct Renderer {
    inner: Handle<RendererData>,
}

impl Renderer {
    pub fn new() -> Result<Renderer, RenderError> {
        Ok(Renderer {
            inner: Handle::new(RendererData::new())?,
        })
    }

    /// Start receiving tasks. At least one buffer must be given; when
    /// both exist their dimensions must agree. The buffers are owned by
    /// the frame until `end` returns.
    pub fn begin(
        &mut self,
        color_buffer: Option<ImageRgbaU8>,
        depth_buffer: Option<ImageF32>,
    ) -> Result<(), RenderError> {
        self.inner.get_mut().begin_frame(color_buffer, depth_buffer)
    }

    /// Queue every triangle of a model instance.
    pub fn give_task(
        &mut self,
        model: &Model,
        model_to_world: &Transform3D,
        camera: &Camera,
    ) -> Result<(), RenderError> {
        let data = self.inner.get_mut();
        if !data.receiving {
            return Err(RenderError::WrongState);
        }
        model.render(
            Some(&mut data.queue),
            data.color_buffer.as_ref(),
            data.depth_buffer.as_ref(),
            model_to_world,
            camera,
        );
        Ok(())
    }

    /// Queue one already projected triangle.
    #[allow(clippy::too_many_arguments)]
    pub fn give_task_triangle(
        &mut self,
        position_a: &ProjectedPoint,
        position_b: &ProjectedPoint,
        position_c: &ProjectedPoint,
        colors: [Vec4; 3],
        tex_coords: [Vec4; 3],
        diffuse: Option<&Texture>,
        light: Option<&Texture>,
        filter: Filter,
        camera: &Camera,
    ) -> Result<(), RenderError> {
        let data = self.inner.get_mut();
        if !data.receiving {
            return Err(RenderError::WrongState);
        }
        render_triangle(
            Some(&mut data.queue),
            data.color_buffer.as_ref(),
            data.depth_buffer.as_ref(),
            camera,
            position_a,
            position_b,
            position_c,
            filter,
            diffuse,
            light,
            tex_coords,
            colors,
        );
        Ok(())
    }

    /// Fill the occlusion grid with a box shaped occluder, so models
    /// behind it can be skipped. With `debug_silhouette` the hull is
    /// drawn as cyan lines at `end`.
    pub fn occlude_from_box(
        &mut self,
        minimum: Vec3,
        maximum: Vec3,
        model_to_world: &Transform3D,
        camera: &Camera,
        debug_silhouette: bool,
    ) -> Result<(), RenderError> {
        self.inner
            .get_mut()
            .occlude_from_box(minimum, maximum, model_to_world, camera, debug_silhouette)
    }

    /// Use the solid triangles queued so far as occluders.
    pub fn occlude_from_existing_triangles(&mut self) -> Result<(), RenderError> {
        self.inner.get_mut().occlude_from_existing_triangles()
    }

    /// Seed occlusion from a depth buffer rendered by a ground pass.
    pub fn occlude_from_top_rows(&mut self, camera: &Camera) -> Result<(), RenderError> {
        self.inner.get_mut().occlude_from_top_rows(camera)
    }

    /// False when the box is certainly hidden behind the occlusion grid
    /// (or outside the view). Use the same camera as the occluders.
    pub fn is_box_visible(
        &self,
        minimum: Vec3,
        maximum: Vec3,
        model_to_world: &Transform3D,
        camera: &Camera,
    ) -> Result<bool, RenderError> {
        Ok(!self
            .inner
            .is_box_occluded(minimum, maximum, model_to_world, camera)?)
    }

    /// Run the occlusion completion pass, rasterize every remaining
    /// command and clear the queue.
    pub fn end(&mut self, debug_wireframe: bool) -> Result<(), RenderError> {
        self.inner.get_mut().end_frame(debug_wireframe)
    }

    pub fn is_receiving(&self) -> bool {
        self.inner.receiving
    }

    /// Whether any occluder has been given since `begin`.
    pub fn has_occluders(&self) -> bool {
        self.inner.occluded
    }

    pub fn command_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// The color buffer of the current frame, shared, while receiving.
    pub fn color_buffer(&self) -> Option<ImageRgbaU8> {
        if self.inner.receiving {
            self.inner.color_buffer.clone()
        } else {
            None
        }
    }

    pub fn depth_buffer(&self) -> Option<ImageF32> {
        if self.inner.receiving {
            self.inner.depth_buffer.clone()
        } else {
            None
        }
    }
}
