//! Small 2D drawing helpers for overlays and clears.

use karst_math::IRect;

use crate::color::Color;
use crate::image::ImageRgbaU8;

/// Fill a rectangle, clipped against the image.
pub fn fill_rect(image: &mut ImageRgbaU8, rect: IRect, color: Color) {
    let rect = IRect::cut(rect, image.bound());
    if !rect.has_area() {
        return;
    }
    let packed = image.pack_order().pack(color);
    for y in rect.top()..rect.bottom() {
        for x in rect.left()..rect.right() {
            image.write_pixel(x, y, packed);
        }
    }
}

/// Draw a line between two pixels with Bresenham stepping. Pixels outside
/// the image are dropped, so the endpoints may be anywhere.
pub fn draw_line(image: &mut ImageRgbaU8, x1: i32, y1: i32, x2: i32, y2: i32, color: Color) {
    let packed = image.pack_order().pack(color);
    let dx = (x2 - x1).abs();
    let dy = -(y2 - y1).abs();
    let step_x = if x1 < x2 { 1 } else { -1 };
    let step_y = if y1 < y2 { 1 } else { -1 };
    let mut error = dx + dy;
    let mut x = x1;
    let mut y = y1;
    loop {
        image.write_pixel(x, y, packed);
        if x == x2 && y == y2 {
            break;
        }
        let doubled = error * 2;
        if doubled >= dy {
            error += dy;
            x += step_x;
        }
        if doubled <= dx {
            error += dx;
            y += step_y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_connect_their_endpoints() {
        let mut image = ImageRgbaU8::new(8, 8).unwrap();
        draw_line(&mut image, 0, 0, 7, 3, Color::WHITE);
        assert_eq!(image.read_color(0, 0), Some(Color::WHITE));
        assert_eq!(image.read_color(7, 3), Some(Color::WHITE));
    }

    #[test]
    fn drawing_outside_the_image_is_harmless() {
        let mut image = ImageRgbaU8::new(4, 4).unwrap();
        draw_line(&mut image, -5, -5, 10, 10, Color::RED);
        fill_rect(&mut image, IRect::new(-2, -2, 3, 3), Color::GREEN);
        assert_eq!(image.read_color(0, 0), Some(Color::GREEN));
        assert_eq!(image.read_color(3, 3), Some(Color::RED));
    }
}
