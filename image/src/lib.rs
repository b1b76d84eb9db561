//! Pixel buffers, typed image views and mip-mapped textures.
//!
//! Images are views into reference counted arena allocations: rows start
//! on 16 byte boundaries, sub-images share memory with their parent, and
//! 32-bit RGBA pixels pack their channels through a display chosen byte
//! order.

pub mod buffer;
pub mod color;
pub mod draw;
pub mod image;
pub mod pack_order;
pub mod texture;

pub use buffer::Buffer;
pub use color::Color;
pub use image::{Image, ImageF32, ImageFlags, ImageRgbaU8, ImageU16, ImageU8, Pixel, IMAGE_ALIGNMENT};
pub use pack_order::PackOrder;
pub use texture::{Texture, MIP_LEVEL_COUNT};
