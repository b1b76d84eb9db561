//! Typed image views over shared arena allocations.

use core::marker::PhantomData;

use bitflags::bitflags;
use karst_heap::{Allocation, HeapError, SafePointer};
use karst_math::IRect;

use crate::color::Color;
use crate::pack_order::PackOrder;

/// Rows start on this many bytes so 128-bit stores never straddle rows.
pub const IMAGE_ALIGNMENT: usize = 16;

/// Element types an image can hold.
pub trait Pixel: bytemuck::Pod + Send + Sync + 'static {}

impl Pixel for u8 {}
impl Pixel for u16 {}
impl Pixel for f32 {}
impl Pixel for u32 {}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageFlags: u8 {
        /// The row padding belongs to this image alone, so writes may
        /// overshoot a row without becoming visible anywhere else.
        const ALIGNED = 1 << 0;
        /// The pack order matches the display's native color format.
        const ORDERED = 1 << 1;
    }
}

/// A 2D pixel view: a shared allocation plus offset, size and stride.
///
/// Sub-images share the allocation and only move `start_offset`; the
/// stride never changes. An image with zero width or height is empty and
/// all pixel access on it is a no-op.
pub struct Image<T: Pixel> {
    allocation: Allocation,
    start_offset: usize,
    width: i32,
    height: i32,
    stride: usize,
    flags: ImageFlags,
    pack_order: PackOrder,
    _marker: PhantomData<T>,
}

pub type ImageU8 = Image<u8>;
pub type ImageU16 = Image<u16>;
pub type ImageF32 = Image<f32>;
/// 32-bit RGBA pixels, packed through the image's [`PackOrder`].
pub type ImageRgbaU8 = Image<u32>;

impl<T: Pixel> Clone for Image<T> {
    fn clone(&self) -> Self {
        Self {
            allocation: self.allocation.clone(),
            start_offset: self.start_offset,
            width: self.width,
            height: self.height,
            stride: self.stride,
            flags: self.flags,
            pack_order: self.pack_order,
            _marker: PhantomData,
        }
    }
}

impl<T: Pixel> Image<T> {
    /// Create a zeroed image. A zero or negative dimension gives an empty
    /// image rather than an error, so degenerate sizes flow through.
    pub fn new(width: i32, height: i32) -> Result<Self, HeapError> {
        if width <= 0 || height <= 0 {
            return Ok(Self {
                allocation: Allocation::new(0, false)?,
                start_offset: 0,
                width: 0,
                height: 0,
                stride: 0,
                flags: ImageFlags::ALIGNED,
                pack_order: PackOrder::default(),
                _marker: PhantomData,
            });
        }
        let element_size = core::mem::size_of::<T>();
        let row_bytes = width as usize * element_size;
        let stride = (row_bytes + IMAGE_ALIGNMENT - 1) & !(IMAGE_ALIGNMENT - 1);
        let allocation = Allocation::new(stride * height as usize, true)?;
        Ok(Self {
            allocation,
            start_offset: 0,
            width,
            height,
            stride,
            flags: ImageFlags::ALIGNED,
            pack_order: PackOrder::default(),
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Bytes between row starts, including padding.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn bound(&self) -> IRect {
        IRect::from_size(self.width, self.height)
    }

    #[inline]
    pub fn flags(&self) -> ImageFlags {
        self.flags
    }

    #[inline]
    pub fn pack_order(&self) -> PackOrder {
        self.pack_order
    }

    pub fn same_size<U: Pixel>(&self, other: &Image<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// True when both views write into the same allocation.
    pub fn shares_memory_with<U: Pixel>(&self, other: &Image<U>) -> bool {
        self.allocation.shares_memory_with(&other.allocation)
    }

    /// Power-of-two dimensions, the requirement for texture upload.
    pub fn is_texture(&self) -> bool {
        self.width > 0
            && self.height > 0
            && (self.width as u32).is_power_of_two()
            && (self.height as u32).is_power_of_two()
    }

    /// A view of `rect` clipped against the image. No pixels are copied;
    /// the allocation is shared and the stride is inherited, so the view
    /// loses the right to overshoot rows.
    pub fn sub_image(&self, rect: IRect) -> Image<T> {
        let rect = IRect::cut(rect, self.bound());
        if !rect.has_area() {
            let mut empty = self.clone();
            empty.width = 0;
            empty.height = 0;
            empty.flags.remove(ImageFlags::ALIGNED);
            return empty;
        }
        let element_size = core::mem::size_of::<T>();
        let mut view = self.clone();
        view.start_offset =
            self.start_offset + rect.top() as usize * self.stride + rect.left() as usize * element_size;
        view.width = rect.width();
        view.height = rect.height();
        view.flags.remove(ImageFlags::ALIGNED);
        view
    }

    /// Checked pointer over one row. For aligned images the permitted
    /// region is the whole stride, so the row's own padding may be
    /// overshot; sub-images only get the visible pixels.
    #[inline]
    pub fn row_ptr(&self, y: i32, name: &'static str) -> SafePointer<T> {
        debug_assert!(y >= 0 && y < self.height);
        let row_bytes = if self.flags.contains(ImageFlags::ALIGNED) {
            self.stride
        } else {
            self.width as usize * core::mem::size_of::<T>()
        };
        self.allocation
            .safe_pointer::<T>(name)
            .slice(name, self.start_offset + y as usize * self.stride, row_bytes)
    }

    #[inline]
    pub fn read_pixel(&self, x: i32, y: i32) -> Option<T> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(self.row_ptr(y, "read_pixel").read(x as usize))
    }

    /// Read with coordinates clamped to the closest edge pixel; zero for
    /// empty images.
    #[inline]
    pub fn read_pixel_clamp(&self, x: i32, y: i32) -> T {
        if self.is_empty() {
            return T::zeroed();
        }
        let x = x.clamp(0, self.width - 1);
        let y = y.clamp(0, self.height - 1);
        self.row_ptr(y, "read_pixel_clamp").read(x as usize)
    }

    /// Write one pixel; writes outside the image are dropped.
    #[inline]
    pub fn write_pixel(&mut self, x: i32, y: i32, value: T) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        self.row_ptr(y, "write_pixel").write(x as usize, value);
    }

    /// Set every visible pixel to `value`.
    pub fn fill(&mut self, value: T) {
        for y in 0..self.height {
            let row = self.row_ptr(y, "fill");
            // Safety: the image is borrowed mutably, no concurrent writer.
            let row = unsafe { row.as_mut_slice(self.width as usize) };
            row.fill(value);
        }
    }
}

impl ImageRgbaU8 {
    /// Create an RGBA image whose 32-bit pixels use the display's byte
    /// order. Marks the image as ordered.
    pub fn with_pack_order(width: i32, height: i32, pack_order: PackOrder) -> Result<Self, HeapError> {
        let mut image = Self::new(width, height)?;
        image.pack_order = pack_order;
        image.flags.insert(ImageFlags::ORDERED);
        Ok(image)
    }

    #[inline]
    pub fn read_color(&self, x: i32, y: i32) -> Option<Color> {
        self.read_pixel(x, y).map(|pixel| self.pack_order.unpack(pixel))
    }

    #[inline]
    pub fn write_color(&mut self, x: i32, y: i32, color: Color) {
        self.write_pixel(x, y, self.pack_order.pack(color));
    }

    pub fn fill_color(&mut self, color: Color) {
        self.fill(self.pack_order.pack(color));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stride_is_simd_aligned() {
        let image = ImageU8::new(13, 3).unwrap();
        assert_eq!(image.stride() % IMAGE_ALIGNMENT, 0);
        assert!(image.stride() >= 13);
        let rgba = ImageRgbaU8::new(5, 2).unwrap();
        assert_eq!(rgba.stride(), 32);
    }

    #[test]
    fn empty_dimensions_give_an_empty_image_not_an_error() {
        let image = ImageRgbaU8::new(0, 7).unwrap();
        assert!(image.is_empty());
        assert_eq!(image.read_pixel(0, 0), None);
        let image = ImageRgbaU8::new(7, 0).unwrap();
        assert!(image.is_empty());
        assert_eq!(image.read_pixel_clamp(3, 0), 0);
    }

    #[test]
    fn pixels_read_back_what_was_written() {
        let mut image = ImageF32::new(20, 10).unwrap();
        image.write_pixel(19, 9, 2.5);
        image.write_pixel(0, 0, -1.0);
        image.write_pixel(20, 0, 99.0); // dropped
        assert_eq!(image.read_pixel(19, 9), Some(2.5));
        assert_eq!(image.read_pixel(0, 0), Some(-1.0));
        assert_eq!(image.read_pixel(20, 0), None);
        assert_eq!(image.read_pixel_clamp(25, 9), 2.5);
    }

    #[test]
    fn separate_images_never_alias_through_padding() {
        let mut first = ImageU8::new(13, 4).unwrap();
        let second = ImageU8::new(13, 4).unwrap();
        first.fill(7);
        for y in 0..4 {
            for x in 0..13 {
                assert_eq!(second.read_pixel(x, y), Some(0));
            }
        }
        assert!(!first.shares_memory_with(&second));
    }

    #[test]
    fn sub_images_share_pixels_with_their_parent() {
        let mut parent = ImageRgbaU8::new(16, 16).unwrap();
        parent.write_color(5, 6, Color::RED);
        let view = parent.sub_image(IRect::new(4, 4, 8, 8));
        assert!(view.shares_memory_with(&parent));
        assert_eq!(view.stride(), parent.stride());
        assert_eq!(view.read_color(1, 2), Some(Color::RED));
        let mut view = view;
        view.write_color(0, 0, Color::GREEN);
        assert_eq!(parent.read_color(4, 4), Some(Color::GREEN));
        assert!(!view.flags().contains(ImageFlags::ALIGNED));
    }

    #[test]
    fn sub_image_clips_against_the_parent() {
        let parent = ImageU16::new(10, 10).unwrap();
        let view = parent.sub_image(IRect::new(8, 8, 10, 10));
        assert_eq!(view.width(), 2);
        assert_eq!(view.height(), 2);
        let outside = parent.sub_image(IRect::new(20, 20, 5, 5));
        assert!(outside.is_empty());
    }

    #[test]
    fn texture_check_requires_powers_of_two() {
        assert!(ImageRgbaU8::new(64, 16).unwrap().is_texture());
        assert!(!ImageRgbaU8::new(48, 16).unwrap().is_texture());
        assert!(!ImageRgbaU8::new(0, 0).unwrap().is_texture());
    }

    #[test]
    fn pack_order_is_honored_on_io() {
        let mut image = ImageRgbaU8::with_pack_order(4, 4, PackOrder::Bgra).unwrap();
        image.write_color(1, 1, Color::rgba(0x10, 0x20, 0x30, 0x40));
        assert_eq!(image.read_pixel(1, 1), Some(0x4010_2030));
        assert_eq!(image.read_color(1, 1), Some(Color::rgba(0x10, 0x20, 0x30, 0x40)));
        assert!(image.flags().contains(ImageFlags::ORDERED));
    }
}
