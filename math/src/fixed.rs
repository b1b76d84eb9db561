//! Sub-pixel fixed-point units.
//!
//! Screen coordinates are rasterized as 64-bit integers at 16 units per
//! pixel, giving 4 bits of sub-pixel precision and exact edge tests.

use glam::{I64Vec2, Vec2};

pub const SUB_PIXEL_BITS: u32 = 4;
pub const UNITS_PER_PIXEL: i64 = 1 << SUB_PIXEL_BITS;
pub const UNITS_PER_HALF_PIXEL: i64 = UNITS_PER_PIXEL / 2;

/// Round a floating image-space coordinate to sub-pixel units.
#[inline]
pub fn from_image_space(coordinate: f32) -> i64 {
    (coordinate * UNITS_PER_PIXEL as f32).round() as i64
}

#[inline]
pub fn point_from_image_space(point: Vec2) -> I64Vec2 {
    I64Vec2::new(from_image_space(point.x), from_image_space(point.y))
}

/// The pixel whose center is closest to the sub-pixel coordinate,
/// truncated like the rasterizer's bound computations.
#[inline]
pub fn nearest_pixel(units: i64) -> i32 {
    ((units + UNITS_PER_HALF_PIXEL) / UNITS_PER_PIXEL) as i32
}

/// Whole pixels, dropping the sub-pixel fraction.
#[inline]
pub fn truncate_to_pixel(units: i64) -> i32 {
    (units / UNITS_PER_PIXEL) as i32
}
