//! The 3D rendering core: camera projection, sub-pixel exact triangle
//! rasterization, perspective-correct interpolation, view frustum
//! clipping, an occlusion grid and a tile-parallel command queue.
//!
//! Everything renders on the CPU into [`karst_image`] pixel buffers. The
//! usual frame goes through a [`Renderer`]: `begin` with a color and
//! depth buffer, feed models with `give_task`, optionally seed the
//! occlusion grid, then `end` to rasterize the queued triangles across
//! worker tiles.

pub mod camera;
pub mod clip;
pub mod commands;
pub mod dmf;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod shader;
pub mod triangle;

pub use camera::{Camera, ProjectedPoint, ViewFrustum, Visibility};
pub use commands::{CommandQueue, TriangleDrawCommand, DEFAULT_JOB_COUNT};
pub use dmf::import_dmf1;
pub use error::RenderError;
pub use model::{Model, Part, Polygon, VertexData};
pub use pipeline::{render_triangle, render_triangle_depth};
pub use renderer::Renderer;
pub use resources::ResourcePool;
pub use shader::Filter;
pub use triangle::{RowInterval, ScreenTriangle};
