//! Polygon models: shared points, parts with textures, quads and
//! triangles.

use glam::{Vec3, Vec4};
use karst_heap::{Handle, HeapError};
use karst_image::{ImageF32, ImageRgbaU8, Texture};
use karst_math::Transform3D;

use crate::camera::{Camera, ProjectedPoint};
use crate::commands::CommandQueue;
use crate::pipeline::{render_triangle, render_triangle_depth};
use crate::resources::ResourcePool;
use crate::shader::Filter;

/// Attributes of one polygon corner while building models.
#[derive(Debug, Clone, Copy)]
pub struct VertexData {
    /// Diffuse UV in x,y and light map UV in z,w.
    pub tex_coord: Vec4,
    pub color: Vec4,
}

impl Default for VertexData {
    fn default() -> Self {
        Self {
            tex_coord: Vec4::ZERO,
            color: Vec4::ONE,
        }
    }
}

impl VertexData {
    pub fn new(tex_coord: Vec4, color: Vec4) -> Self {
        Self { tex_coord, color }
    }
}

/// Triangle or quad referencing the model's shared point array.
/// The fourth index is -1 for triangles.
#[derive(Debug, Clone, Copy)]
pub struct Polygon {
    pub point_indices: [i32; 4],
    pub tex_coords: [Vec4; 4],
    pub colors: [Vec4; 4],
}

impl Polygon {
    pub fn triangle(a: (i32, VertexData), b: (i32, VertexData), c: (i32, VertexData)) -> Self {
        Self {
            point_indices: [a.0, b.0, c.0, -1],
            tex_coords: [a.1.tex_coord, b.1.tex_coord, c.1.tex_coord, Vec4::ZERO],
            colors: [a.1.color, b.1.color, c.1.color, Vec4::ONE],
        }
    }

    pub fn quad(
        a: (i32, VertexData),
        b: (i32, VertexData),
        c: (i32, VertexData),
        d: (i32, VertexData),
    ) -> Self {
        Self {
            point_indices: [a.0, b.0, c.0, d.0],
            tex_coords: [a.1.tex_coord, b.1.tex_coord, c.1.tex_coord, d.1.tex_coord],
            colors: [a.1.color, b.1.color, c.1.color, d.1.color],
        }
    }

    pub fn vertex_count(&self) -> usize {
        if self.point_indices[3] < 0 {
            3
        } else {
            4
        }
    }
}

/// One part of a model: a texture pairing and its polygons.
#[derive(Clone, Default)]
pub struct Part {
    pub name: String,
    pub diffuse_map: Option<Texture>,
    pub light_map: Option<Texture>,
    /// Texture names recorded at import time for later pool lookups.
    pub diffuse_name: Option<String>,
    pub light_name: Option<String>,
    pub polygons: Vec<Polygon>,
}

/// The model payload stored behind a [`Model`] handle.
pub struct ModelData {
    pub filter: Filter,
    pub positions: Vec<Vec3>,
    pub parts: Vec<Part>,
    pub min_bound: Vec3,
    pub max_bound: Vec3,
}

impl ModelData {
    fn new() -> Self {
        Self {
            filter: Filter::Solid,
            positions: Vec::new(),
            parts: Vec::new(),
            min_bound: Vec3::splat(f32::INFINITY),
            max_bound: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    fn expand_bound(&mut self, point: Vec3) {
        self.min_bound = self.min_bound.min(point);
        self.max_bound = self.max_bound.max(point);
    }
}

/// Reference counted model handle. Clones share the model; mutation
/// requires the only owner.
#[derive(Clone)]
pub struct Model {
    inner: Handle<ModelData>,
}

impl Model {
    pub fn new() -> Result<Model, HeapError> {
        Ok(Model {
            inner: Handle::new(ModelData::new())?,
        })
    }

    #[inline]
    pub fn data(&self) -> &ModelData {
        &self.inner
    }

    pub fn filter(&self) -> Filter {
        self.inner.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.inner.get_mut().filter = filter;
    }

    /// Bounds grown monotonically by every added or moved point.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.inner.min_bound, self.inner.max_bound)
    }

    // Part interface.

    pub fn add_empty_part(&mut self, name: impl Into<String>) -> usize {
        let parts = &mut self.inner.get_mut().parts;
        parts.push(Part {
            name: name.into(),
            ..Part::default()
        });
        parts.len() - 1
    }

    pub fn part_count(&self) -> usize {
        self.inner.parts.len()
    }

    pub fn part(&self, part_index: usize) -> &Part {
        &self.inner.parts[part_index]
    }

    pub fn set_part_name(&mut self, part_index: usize, name: impl Into<String>) {
        self.inner.get_mut().parts[part_index].name = name.into();
    }

    pub fn set_diffuse_map(&mut self, part_index: usize, texture: Texture) {
        self.inner.get_mut().parts[part_index].diffuse_map = Some(texture);
    }

    pub fn set_light_map(&mut self, part_index: usize, texture: Texture) {
        self.inner.get_mut().parts[part_index].light_map = Some(texture);
    }

    /// Record the texture name and resolve it against the pool. Missing
    /// pool entries keep the name for a later lookup.
    pub fn set_diffuse_map_by_name(&mut self, pool: &ResourcePool, name: &str, part_index: usize) {
        let part = &mut self.inner.get_mut().parts[part_index];
        part.diffuse_name = Some(name.to_string());
        match pool.texture(name) {
            Some(texture) => part.diffuse_map = Some(texture),
            None => log::warn!("diffuse texture \"{name}\" is not in the resource pool"),
        }
    }

    pub fn set_light_map_by_name(&mut self, pool: &ResourcePool, name: &str, part_index: usize) {
        let part = &mut self.inner.get_mut().parts[part_index];
        part.light_name = Some(name.to_string());
        match pool.texture(name) {
            Some(texture) => part.light_map = Some(texture),
            None => log::warn!("light texture \"{name}\" is not in the resource pool"),
        }
    }

    // Point interface.

    pub fn point_count(&self) -> usize {
        self.inner.positions.len()
    }

    pub fn point(&self, point_index: usize) -> Vec3 {
        self.inner.positions[point_index]
    }

    /// Append a point without looking for duplicates. Models built this
    /// way may get seams where equal positions round differently; use
    /// [`Model::add_point_if_needed`] when neighbors must share corners.
    pub fn add_point(&mut self, position: Vec3) -> i32 {
        let data = self.inner.get_mut();
        data.positions.push(position);
        data.expand_bound(position);
        data.positions.len() as i32 - 1
    }

    /// Earliest existing point within `threshold` euclidean distance.
    pub fn find_point(&self, position: Vec3, threshold: f32) -> Option<i32> {
        self.inner
            .positions
            .iter()
            .position(|existing| existing.distance(position) <= threshold)
            .map(|index| index as i32)
    }

    pub fn add_point_if_needed(&mut self, position: Vec3, threshold: f32) -> i32 {
        match self.find_point(position, threshold) {
            Some(index) => index,
            None => self.add_point(position),
        }
    }

    pub fn set_point(&mut self, point_index: usize, position: Vec3) {
        let data = self.inner.get_mut();
        data.positions[point_index] = position;
        data.expand_bound(position);
    }

    // Polygon interface.

    /// Append a polygon to a part. The point indices must refer to
    /// existing points.
    pub fn add_polygon(&mut self, polygon: Polygon, part_index: usize) -> usize {
        let point_count = self.inner.positions.len() as i32;
        for corner in 0..polygon.vertex_count() {
            let index = polygon.point_indices[corner];
            assert!(
                index >= 0 && index < point_count,
                "polygon corner {corner} references point {index} of {point_count}"
            );
        }
        let polygons = &mut self.inner.get_mut().parts[part_index].polygons;
        polygons.push(polygon);
        polygons.len() - 1
    }

    pub fn polygon_count(&self, part_index: usize) -> usize {
        self.inner.parts[part_index].polygons.len()
    }

    pub fn polygon_vertex_count(&self, part_index: usize, polygon_index: usize) -> usize {
        self.inner.parts[part_index].polygons[polygon_index].vertex_count()
    }

    pub fn vertex_position(&self, part_index: usize, polygon_index: usize, vertex: usize) -> Vec3 {
        let index = self.inner.parts[part_index].polygons[polygon_index].point_indices[vertex];
        self.inner.positions[index as usize]
    }

    pub fn vertex_color(&self, part_index: usize, polygon_index: usize, vertex: usize) -> Vec4 {
        self.inner.parts[part_index].polygons[polygon_index].colors[vertex]
    }

    pub fn set_vertex_color(
        &mut self,
        part_index: usize,
        polygon_index: usize,
        vertex: usize,
        color: Vec4,
    ) {
        self.inner.get_mut().parts[part_index].polygons[polygon_index].colors[vertex] = color;
    }

    pub fn tex_coord(&self, part_index: usize, polygon_index: usize, vertex: usize) -> Vec4 {
        self.inner.parts[part_index].polygons[polygon_index].tex_coords[vertex]
    }

    pub fn set_tex_coord(
        &mut self,
        part_index: usize,
        polygon_index: usize,
        vertex: usize,
        tex_coord: Vec4,
    ) {
        self.inner.get_mut().parts[part_index].polygons[polygon_index].tex_coords[vertex] = tex_coord;
    }

    // Rendering.

    /// Project every point once, then emit the polygons of every part.
    /// Quads become two triangles sharing their diagonal. Passing a
    /// queue defers rasterization to the renderer's `end`.
    pub fn render(
        &self,
        mut queue: Option<&mut CommandQueue>,
        color_target: Option<&ImageRgbaU8>,
        depth_target: Option<&ImageF32>,
        model_to_world: &Transform3D,
        camera: &Camera,
    ) {
        let data = self.data();
        let projected = self.project_points(model_to_world, camera);
        for part in &data.parts {
            for polygon in &part.polygons {
                let corners = polygon.point_indices;
                let mut emit = |a: usize, b: usize, c: usize| {
                    render_triangle(
                        queue.as_deref_mut(),
                        color_target,
                        depth_target,
                        camera,
                        &projected[corners[a] as usize],
                        &projected[corners[b] as usize],
                        &projected[corners[c] as usize],
                        data.filter,
                        part.diffuse_map.as_ref(),
                        part.light_map.as_ref(),
                        [polygon.tex_coords[a], polygon.tex_coords[b], polygon.tex_coords[c]],
                        [polygon.colors[a], polygon.colors[b], polygon.colors[c]],
                    );
                };
                emit(0, 1, 2);
                if polygon.vertex_count() == 4 {
                    emit(0, 2, 3);
                }
            }
        }
    }

    /// Depth-only pass over the same polygons.
    pub fn render_depth(
        &self,
        depth_target: &ImageF32,
        model_to_world: &Transform3D,
        camera: &Camera,
    ) {
        let data = self.data();
        let projected = self.project_points(model_to_world, camera);
        for part in &data.parts {
            for polygon in &part.polygons {
                let corners = polygon.point_indices;
                render_triangle_depth(
                    depth_target,
                    camera,
                    &projected[corners[0] as usize],
                    &projected[corners[1] as usize],
                    &projected[corners[2] as usize],
                );
                if polygon.vertex_count() == 4 {
                    render_triangle_depth(
                        depth_target,
                        camera,
                        &projected[corners[0] as usize],
                        &projected[corners[2] as usize],
                        &projected[corners[3] as usize],
                    );
                }
            }
        }
    }

    fn project_points(&self, model_to_world: &Transform3D, camera: &Camera) -> Vec<ProjectedPoint> {
        self.data()
            .positions
            .iter()
            .map(|point| camera.world_to_screen(model_to_world.transform_point(*point)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bounds_grow_with_every_point() {
        let mut model = Model::new().unwrap();
        model.add_point(Vec3::new(1.0, 2.0, 3.0));
        model.add_point(Vec3::new(-1.0, 0.0, 5.0));
        let (min_bound, max_bound) = model.bounds();
        assert_eq!(min_bound, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(max_bound, Vec3::new(1.0, 2.0, 5.0));
        model.set_point(0, Vec3::new(0.0, 9.0, 4.0));
        let (_, max_bound) = model.bounds();
        assert_eq!(max_bound, Vec3::new(1.0, 9.0, 5.0));
    }

    #[test]
    fn point_deduplication_returns_the_earliest_match() {
        let mut model = Model::new().unwrap();
        let first = model.add_point(Vec3::ZERO);
        model.add_point(Vec3::new(5.0, 0.0, 0.0));
        let found = model.add_point_if_needed(Vec3::new(0.0000004, 0.0, 0.0), 0.00001);
        assert_eq!(found, first);
        assert_eq!(model.point_count(), 2);
        let added = model.add_point_if_needed(Vec3::new(1.0, 0.0, 0.0), 0.00001);
        assert_eq!(added, 2);
    }

    #[test]
    fn quads_report_four_corners() {
        let mut model = Model::new().unwrap();
        let part = model.add_empty_part("walls");
        let points: Vec<i32> = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
        .into_iter()
        .map(|p| model.add_point(p))
        .collect();
        let data = VertexData::default();
        model.add_polygon(
            Polygon::quad(
                (points[0], data),
                (points[1], data),
                (points[2], data),
                (points[3], data),
            ),
            part,
        );
        assert_eq!(model.polygon_count(part), 1);
        assert_eq!(model.polygon_vertex_count(part, 0), 4);
    }

    #[test]
    #[should_panic]
    fn polygons_must_reference_existing_points() {
        let mut model = Model::new().unwrap();
        let part = model.add_empty_part("broken");
        model.add_polygon(
            Polygon::triangle(
                (0, VertexData::default()),
                (1, VertexData::default()),
                (2, VertexData::default()),
            ),
            part,
        );
    }
}
