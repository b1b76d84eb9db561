//! Mip-mapped RGBA textures for the pixel shader.
//!
//! A texture is one buffer holding every mip level back to back, packed
//! from the smallest level to the full resolution. Texel coordinates tile
//! by bit masks, so sampling never branches on wrap-around.

use glam::Vec4;
use karst_heap::SafePointer;

use crate::buffer::Buffer;
use crate::color::Color;
use crate::image::ImageRgbaU8;
use crate::pack_order::PackOrder;

/// Mip level indices go from 0 (full resolution) up to at most 15.
pub const MIP_LEVEL_COUNT: u32 = 16;

/// Pyramid of RGBA pixels with power-of-two dimensions.
///
/// Texels are stored in canonical RGBA byte order regardless of the byte
/// order of the image the texture was built from.
#[derive(Clone)]
pub struct Texture {
    buffer: Buffer,
    log2_width: u32,
    log2_height: u32,
    max_mip_level: u32,
    /// Pixels stored before the start of each level.
    level_offsets: [u32; MIP_LEVEL_COUNT as usize],
    /// Tiling masks for the full resolution level.
    max_width_and_mask: u32,
    max_height_and_mask: u32,
    /// Dimension masks of the smallest stored level, public so samplers
    /// written against raw texels can clamp coarse levels themselves.
    pub min_width_or_mask: u32,
    pub min_height_or_mask: u32,
    max_width_f: f32,
    max_height_f: f32,
}

impl Texture {
    /// Build a pyramid from a power-of-two RGBA image. Each smaller level
    /// is a 2x2 box filter of the previous one with alpha-weighted color
    /// averaging, so transparent texels do not darken their neighborhood.
    ///
    /// Returns `None` when the image is empty or not power-of-two sized.
    pub fn from_image(image: &ImageRgbaU8) -> Option<Texture> {
        Self::from_image_with_levels(image, MIP_LEVEL_COUNT - 1)
    }

    /// Like [`Texture::from_image`] with an upper bound on the number of
    /// mip levels below full resolution.
    pub fn from_image_with_levels(image: &ImageRgbaU8, max_mip_level: u32) -> Option<Texture> {
        if !image.is_texture() {
            return None;
        }
        let log2_width = (image.width() as u32).trailing_zeros();
        let log2_height = (image.height() as u32).trailing_zeros();
        let max_mip_level = max_mip_level
            .min(log2_width)
            .min(log2_height)
            .min(MIP_LEVEL_COUNT - 1);

        // Levels are packed smallest first, so every offset is the pixel
        // count of all levels below it.
        let mut level_offsets = [0u32; MIP_LEVEL_COUNT as usize];
        let mut pixel_count: u64 = 0;
        let mut level = max_mip_level as i64;
        while level >= 0 {
            level_offsets[level as usize] = pixel_count as u32;
            pixel_count += 1u64 << (log2_width + log2_height - 2 * level as u32);
            if pixel_count > u32::MAX as u64 {
                log::warn!("texture of {}x{} pixels cannot be indexed with 32 bits", image.width(), image.height());
                return None;
            }
            level -= 1;
        }

        let buffer = match Buffer::new(pixel_count as usize * 4) {
            Ok(buffer) => buffer,
            Err(error) => {
                log::warn!("failed to allocate texture pixels: {error}");
                return None;
            }
        };
        let mut texture = Texture {
            buffer,
            log2_width,
            log2_height,
            max_mip_level,
            level_offsets,
            max_width_and_mask: (1u32 << log2_width) - 1,
            max_height_and_mask: (1u32 << log2_height) - 1,
            min_width_or_mask: (1u32 << (log2_width - max_mip_level)) - 1,
            min_height_or_mask: (1u32 << (log2_height - max_mip_level)) - 1,
            max_width_f: (1u32 << log2_width) as f32,
            max_height_f: (1u32 << log2_height) as f32,
        };
        texture.upload(image);
        Some(texture)
    }

    fn upload(&mut self, image: &ImageRgbaU8) {
        let texels = self.texels("texture_upload");
        let order = image.pack_order();
        for y in 0..image.height() {
            for x in 0..image.width() {
                let color = order.unpack(image.read_pixel_clamp(x, y));
                texels.write(self.texel_index(x as u32, y as u32, 0), PackOrder::Rgba.pack(color));
            }
        }
        for level in 1..=self.max_mip_level {
            let width = self.level_width(level);
            let height = self.level_height(level);
            for y in 0..height {
                for x in 0..width {
                    let mut corners = [Color::TRANSPARENT; 4];
                    for (corner, value) in corners.iter_mut().enumerate() {
                        let source_x = x * 2 + (corner as u32 & 1);
                        let source_y = y * 2 + (corner as u32 >> 1);
                        let packed = texels.read(self.texel_index(source_x, source_y, level - 1));
                        *value = PackOrder::Rgba.unpack(packed);
                    }
                    let filtered = box_filter(corners);
                    texels.write(self.texel_index(x, y, level), PackOrder::Rgba.pack(filtered));
                }
            }
        }
    }

    #[inline]
    pub fn width(&self) -> i32 {
        1 << self.log2_width
    }

    #[inline]
    pub fn height(&self) -> i32 {
        1 << self.log2_height
    }

    #[inline]
    pub fn max_mip_level(&self) -> u32 {
        self.max_mip_level
    }

    #[inline]
    pub fn level_width(&self, level: u32) -> u32 {
        1 << (self.log2_width - level.min(self.max_mip_level))
    }

    #[inline]
    pub fn level_height(&self, level: u32) -> u32 {
        1 << (self.log2_height - level.min(self.max_mip_level))
    }

    /// Pixels stored before the given level.
    #[inline]
    pub fn level_offset(&self, level: u32) -> u32 {
        self.level_offsets[level.min(self.max_mip_level) as usize]
    }

    /// Pixels stored before the full resolution level, the sum of every
    /// smaller level.
    #[inline]
    pub fn start_offset(&self) -> u32 {
        self.level_offsets[0]
    }

    /// Checked pointer over every texel of every level.
    #[inline]
    pub fn texels(&self, name: &'static str) -> SafePointer<u32> {
        self.buffer.elements(name)
    }

    #[inline]
    fn texel_index(&self, x: u32, y: u32, level: u32) -> usize {
        (self.level_offsets[level as usize] + (y << (self.log2_width - level)) + x) as usize
    }

    /// Index of the texel under the tiled UV coordinate at a mip level.
    /// Levels above the smallest stored one clamp.
    #[inline]
    pub fn sample_index(&self, u: f32, v: f32, level: u32) -> usize {
        let level = level.min(self.max_mip_level);
        let x = ((u * self.max_width_f).floor() as i64 & self.max_width_and_mask as i64) as u32;
        let y = ((v * self.max_height_f).floor() as i64 & self.max_height_and_mask as i64) as u32;
        self.texel_index(x >> level, y >> level, level)
    }

    /// Nearest texel at the requested level, tiled outside 0..1.
    #[inline]
    pub fn sample_nearest(&self, u: f32, v: f32, level: u32) -> Color {
        let packed = self.texels("sample_nearest").read(self.sample_index(u, v, level));
        PackOrder::Rgba.unpack(packed)
    }

    /// Linear blend between the two mip levels nearest to `level`.
    pub fn sample_mip_lerp(&self, u: f32, v: f32, level: f32) -> Color {
        let level = level.clamp(0.0, self.max_mip_level as f32);
        let near = level as u32;
        let far = (near + 1).min(self.max_mip_level);
        let blend = level - near as f32;
        let a = self.sample_nearest(u, v, near).to_vec4();
        let b = self.sample_nearest(u, v, far).to_vec4();
        Color::from_vec4(a + (b - a) * Vec4::splat(blend))
    }
}

/// 2x2 box filter with alpha-weighted color averaging. The alpha output
/// is the rounded mean; colors average weighted by their alpha so fully
/// transparent texels cannot darken the level below.
fn box_filter(corners: [Color; 4]) -> Color {
    let alpha_sum: u32 = corners.iter().map(|c| c.a as u32).sum();
    let alpha = ((alpha_sum + 2) / 4) as u8;
    if alpha_sum == 0 {
        let mean = |select: fn(&Color) -> u8| {
            ((corners.iter().map(|c| select(c) as u32).sum::<u32>() + 2) / 4) as u8
        };
        Color::rgba(mean(|c| c.r), mean(|c| c.g), mean(|c| c.b), alpha)
    } else {
        let weighted = |select: fn(&Color) -> u8| {
            let sum: u32 = corners.iter().map(|c| select(c) as u32 * c.a as u32).sum();
            ((sum + alpha_sum / 2) / alpha_sum) as u8
        };
        Color::rgba(weighted(|c| c.r), weighted(|c| c.g), weighted(|c| c.b), alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn checker(size: i32, a: Color, b: Color) -> ImageRgbaU8 {
        let mut image = ImageRgbaU8::new(size, size).unwrap();
        for y in 0..size {
            for x in 0..size {
                image.write_color(x, y, if (x + y) % 2 == 0 { a } else { b });
            }
        }
        image
    }

    #[test]
    fn level_layout_packs_small_levels_first() {
        let image = ImageRgbaU8::new(8, 8).unwrap();
        let texture = Texture::from_image(&image).unwrap();
        assert_eq!(texture.max_mip_level(), 3);
        // 1 + 4 + 16 pixels before the full 64 pixel level.
        assert_eq!(texture.level_offset(3), 0);
        assert_eq!(texture.level_offset(2), 1);
        assert_eq!(texture.level_offset(1), 5);
        assert_eq!(texture.level_offset(0), 21);
        assert_eq!(texture.start_offset(), 21);
    }

    #[test]
    fn non_power_of_two_images_are_rejected() {
        assert!(Texture::from_image(&ImageRgbaU8::new(12, 8).unwrap()).is_none());
        assert!(Texture::from_image(&ImageRgbaU8::new(0, 0).unwrap()).is_none());
    }

    #[test]
    fn sampling_tiles_by_bitmask() {
        let mut image = ImageRgbaU8::new(4, 4).unwrap();
        image.write_color(1, 2, Color::RED);
        let texture = Texture::from_image(&image).unwrap();
        let u = 1.5 / 4.0;
        let v = 2.5 / 4.0;
        assert_eq!(texture.sample_nearest(u, v, 0), Color::RED);
        assert_eq!(texture.sample_nearest(u + 1.0, v - 2.0, 0), Color::RED);
        assert_eq!(texture.sample_nearest(u - 1.0, v + 7.0, 0), Color::RED);
    }

    #[test]
    fn mip_levels_average_their_parents() {
        let image = checker(4, Color::rgb(200, 0, 0), Color::rgb(0, 0, 200));
        let texture = Texture::from_image(&image).unwrap();
        let level1 = texture.sample_nearest(0.1, 0.1, 1);
        assert_eq!(level1, Color::rgb(100, 0, 100));
    }

    #[test]
    fn transparent_texels_do_not_darken_colors() {
        let mut image = ImageRgbaU8::new(2, 2).unwrap();
        image.write_color(0, 0, Color::rgba(240, 16, 0, 255));
        image.write_color(1, 0, Color::rgba(0, 0, 0, 0));
        image.write_color(0, 1, Color::rgba(0, 0, 0, 0));
        image.write_color(1, 1, Color::rgba(0, 0, 0, 0));
        let texture = Texture::from_image(&image).unwrap();
        let top = texture.sample_nearest(0.0, 0.0, 1);
        // Color keeps the visible texel's hue, alpha becomes the mean.
        assert_eq!(top.r, 240);
        assert_eq!(top.g, 16);
        assert_eq!(top.a, 64);
    }

    #[test]
    fn levels_above_the_smallest_clamp() {
        let image = checker(8, Color::WHITE, Color::BLACK);
        let texture = Texture::from_image(&image).unwrap();
        assert_eq!(texture.sample_nearest(0.2, 0.2, 3), texture.sample_nearest(0.2, 0.2, 99));
        let lerped = texture.sample_mip_lerp(0.2, 0.2, 98.5);
        assert_eq!(lerped, texture.sample_nearest(0.2, 0.2, 3));
    }

    #[test]
    fn smallest_level_masks_describe_its_dimensions() {
        let image = ImageRgbaU8::new(16, 4).unwrap();
        let texture = Texture::from_image(&image).unwrap();
        // Two levels only, limited by the short axis.
        assert_eq!(texture.max_mip_level(), 2);
        assert_eq!(texture.min_width_or_mask, 3);
        assert_eq!(texture.min_height_or_mask, 0);
        assert_eq!(texture.max_width_and_mask, 15);
        assert_eq!(texture.max_height_and_mask, 3);
    }
}
