//! The per-frame command queue and its tile-parallel execution.

use core::sync::atomic::{AtomicUsize, Ordering};

use glam::Vec3;
use karst_image::{ImageF32, ImageRgbaU8};
use karst_math::rect::round_up;
use karst_math::IRect;

use crate::shader::{DrawFn, Filter, TriangleInput};
use crate::triangle::ScreenTriangle;

/// Worker count used by the renderer unless the caller chooses another.
pub const DEFAULT_JOB_COUNT: usize = 12;

/// Everything needed to rasterize one projected triangle later.
#[derive(Clone)]
pub struct TriangleDrawCommand {
    pub color_target: Option<ImageRgbaU8>,
    pub depth_target: Option<ImageF32>,
    /// 1/z depth convention and perspective corrected weights when set.
    pub perspective: bool,
    pub filter: Filter,
    pub triangle: ScreenTriangle,
    /// Barycentric re-parameterization from clipping; see
    /// [`ScreenTriangle::projection`].
    pub sub_b: Vec3,
    pub sub_c: Vec3,
    /// The target bound the command may touch, before tile clipping.
    pub clip_bound: IRect,
    /// Set by the occlusion completion pass; skipped when true.
    pub occluded: bool,
    pub input: TriangleInput,
    pub draw: DrawFn,
}

impl TriangleDrawCommand {
    /// Rows that exist in the targets; pair-aligned raster bounds may
    /// reach one row past this and that row is skipped.
    pub fn target_height(&self) -> i32 {
        if let Some(image) = &self.color_target {
            image.height()
        } else if let Some(image) = &self.depth_target {
            image.height()
        } else {
            0
        }
    }
}

/// Append-only buffer of draw commands produced during one frame.
#[derive(Default)]
pub struct CommandQueue {
    pub buffer: Vec<TriangleDrawCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, command: TriangleDrawCommand) {
        self.buffer.push(command);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Reset to length zero; the allocation is reused next frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Rasterize every non-occluded command into `clip_bound`.
    ///
    /// The bound is divided into horizontal tiles of whole row pairs,
    /// one worker per job walking the whole buffer and drawing the part
    /// of each command that overlaps its tile. Tiles are disjoint, so
    /// the workers never write the same pixel and the output equals the
    /// single threaded order. `job_count == 1` runs inline.
    pub fn execute(&self, clip_bound: IRect, job_count: usize) {
        if self.buffer.is_empty() || !clip_bound.has_area() {
            return;
        }
        let job_count = if cfg!(feature = "single-threaded") {
            1
        } else {
            job_count.max(1)
        };
        if job_count == 1 {
            self.run_tile(clip_bound);
            return;
        }

        let tile_height = round_up(
            (clip_bound.height() + job_count as i32 - 1) / job_count as i32,
            2,
        )
        .max(2);
        let mut tiles = Vec::new();
        let mut top = clip_bound.top();
        while top < clip_bound.bottom() {
            let height = tile_height.min(clip_bound.bottom() - top);
            tiles.push(IRect::new(clip_bound.left(), top, clip_bound.width(), height));
            top += height;
        }

        let next_tile = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..job_count.min(tiles.len()) {
                scope.spawn(|| loop {
                    let index = next_tile.fetch_add(1, Ordering::Relaxed);
                    match tiles.get(index) {
                        Some(tile) => self.run_tile(*tile),
                        None => break,
                    }
                });
            }
        });
    }

    fn run_tile(&self, tile: IRect) {
        for command in &self.buffer {
            if command.occluded {
                continue;
            }
            let bound = IRect::cut(command.clip_bound, tile);
            if !IRect::overlaps(bound, command.triangle.whole_bound) {
                continue;
            }
            (command.draw)(command, bound);
        }
    }
}
