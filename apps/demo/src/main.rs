//! Renders a small scene with the CPU rasterizer and writes it to a PNG.
//!
//! Run with `RUST_LOG=debug` to watch the renderer lifecycle.

use glam::{Vec3, Vec4};
use karst_image::{Color, ImageF32, ImageRgbaU8, Texture};
use karst_math::Transform3D;
use karst_render::{Camera, Filter, Model, Polygon, Renderer, VertexData};

const WIDTH: i32 = 800;
const HEIGHT: i32 = 600;

/// Procedural checker texture, since file decoding lives outside the
/// rendering core.
fn checker_texture(size: i32, bright: Color, dark: Color) -> Texture {
    let mut image = ImageRgbaU8::new(size, size).unwrap();
    for y in 0..size {
        for x in 0..size {
            let cell = ((x / 8) + (y / 8)) % 2 == 0;
            image.write_color(x, y, if cell { bright } else { dark });
        }
    }
    Texture::from_image(&image).expect("checker dimensions are powers of two")
}

fn ground_model(texture: Texture) -> Model {
    let mut model = Model::new().unwrap();
    let part = model.add_empty_part("ground");
    model.set_diffuse_map(part, texture);
    let half = 40.0;
    let a = model.add_point(Vec3::new(-half, 0.0, -half));
    let b = model.add_point(Vec3::new(half, 0.0, -half));
    let c = model.add_point(Vec3::new(half, 0.0, half));
    let d = model.add_point(Vec3::new(-half, 0.0, half));
    let uv = |u: f32, v: f32| VertexData::new(Vec4::new(u * 8.0, v * 8.0, 0.0, 0.0), Vec4::ONE);
    model.add_polygon(
        Polygon::quad((a, uv(0.0, 0.0)), (d, uv(0.0, 1.0)), (c, uv(1.0, 1.0)), (b, uv(1.0, 0.0))),
        part,
    );
    model
}

fn cube_model(size: f32, color: Vec4) -> Model {
    let mut model = Model::new().unwrap();
    let part = model.add_empty_part("cube");
    let half = size / 2.0;
    let signs = [
        (-1.0, -1.0, -1.0),
        (1.0, -1.0, -1.0),
        (1.0, 1.0, -1.0),
        (-1.0, 1.0, -1.0),
        (-1.0, -1.0, 1.0),
        (1.0, -1.0, 1.0),
        (1.0, 1.0, 1.0),
        (-1.0, 1.0, 1.0),
    ];
    let mut corners = [0i32; 8];
    for (index, &(x, y, z)) in signs.iter().enumerate() {
        // The cube rests on the ground plane.
        corners[index] =
            model.add_point_if_needed(Vec3::new(x * half, y * half + half, z * half), 1e-5);
    }
    // Quads facing outward; a light touch of shading per face keeps the
    // cube readable without any lighting pass.
    let faces = [
        ([0, 3, 2, 1], 0.75), // front (-z)
        ([5, 6, 7, 4], 0.55), // back (+z)
        ([4, 7, 3, 0], 0.65), // left
        ([1, 2, 6, 5], 0.85), // right
        ([3, 7, 6, 2], 1.0),  // top
        ([4, 0, 1, 5], 0.4),  // bottom
    ];
    for (indices, shade) in faces {
        let tint = Vec4::new(color.x * shade, color.y * shade, color.z * shade, color.w);
        let data = VertexData::new(Vec4::ZERO, tint);
        model.add_polygon(
            Polygon::quad(
                (corners[indices[0]], data),
                (corners[indices[1]], data),
                (corners[indices[2]], data),
                (corners[indices[3]], data),
            ),
            part,
        );
    }
    model
}

fn save_png(image: &ImageRgbaU8, path: &str) {
    let mut output = image::RgbaImage::new(image.width() as u32, image.height() as u32);
    for y in 0..image.height() {
        for x in 0..image.width() {
            let color = image.read_color(x, y).unwrap();
            output.put_pixel(x as u32, y as u32, image::Rgba([color.r, color.g, color.b, 255]));
        }
    }
    output.save(path).expect("failed to write the output image");
}

fn main() {
    pretty_env_logger::init();

    let mut color_buffer = ImageRgbaU8::new(WIDTH, HEIGHT).unwrap();
    let mut depth_buffer = ImageF32::new(WIDTH, HEIGHT).unwrap();

    // Camera above the ground looking slightly down toward the cubes.
    let camera_space = Transform3D::from_position_yaw(Vec3::new(0.0, 4.0, -14.0), 0.0);
    let camera = Camera::create_perspective(camera_space, WIDTH, HEIGHT, 1.0, 0.01, 1000.0);

    // Perspective depth holds 1/z, so "nothing" is zero.
    depth_buffer.fill(0.0);
    color_buffer.fill_color(Color::rgb(96, 150, 210));

    let ground = ground_model(checker_texture(
        64,
        Color::rgb(150, 160, 150),
        Color::rgb(80, 100, 80),
    ));
    let cubes = [
        (cube_model(4.0, Vec4::new(0.9, 0.3, 0.2, 1.0)), Vec3::new(-5.0, 0.0, 4.0), 0.4),
        (cube_model(3.0, Vec4::new(0.2, 0.4, 0.9, 1.0)), Vec3::new(4.0, 0.0, 8.0), -0.2),
        (cube_model(2.0, Vec4::new(0.9, 0.8, 0.2, 1.0)), Vec3::new(0.0, 0.0, 14.0), 0.9),
    ];
    let mut veil = cube_model(5.0, Vec4::new(0.4, 0.9, 0.9, 0.35));
    veil.set_filter(Filter::Alpha);

    let mut renderer = Renderer::new().expect("renderer allocation");
    renderer
        .begin(Some(color_buffer.clone()), Some(depth_buffer.clone()))
        .expect("renderer begin");

    // Solid geometry first, with the nearest cube doubling as occluder.
    renderer
        .give_task(&ground, &Transform3D::IDENTITY, &camera)
        .expect("ground task");
    for (model, position, yaw) in &cubes {
        let placement = Transform3D::from_position_yaw(*position, *yaw);
        renderer.give_task(model, &placement, &camera).expect("cube task");
        let (min_bound, max_bound) = model.bounds();
        if renderer
            .is_box_visible(min_bound, max_bound, &placement, &camera)
            .expect("visibility query")
        {
            renderer
                .occlude_from_box(min_bound, max_bound, &placement, &camera, false)
                .expect("occluder");
        }
    }
    // Transparent geometry last, blending over everything solid.
    let veil_placement = Transform3D::from_position_yaw(Vec3::new(1.0, 0.0, 6.0), 0.2);
    renderer
        .give_task(&veil, &veil_placement, &camera)
        .expect("veil task");

    renderer.end(false).expect("renderer end");

    save_png(&color_buffer, "karst-demo.png");
    log::info!("wrote karst-demo.png");
    println!("wrote karst-demo.png");
}
