//! End to end rendering scenarios through the public API.

use glam::{Vec3, Vec4};
use karst_image::{Color, ImageF32, ImageRgbaU8, Texture};
use karst_math::Transform3D;
use karst_render::{
    CommandQueue, Camera, Filter, Model, Polygon, Renderer, RenderError, VertexData,
};
use pretty_assertions::assert_eq;

fn ortho_camera(size: i32, half_width: f32) -> Camera {
    Camera::create_orthogonal(Transform3D::IDENTITY, size, size, half_width)
}

fn cleared_targets(size: i32, depth_clear: f32) -> (ImageRgbaU8, ImageF32) {
    let color = ImageRgbaU8::new(size, size).unwrap();
    let mut depth = ImageF32::new(size, size).unwrap();
    depth.fill(depth_clear);
    (color, depth)
}

fn vertex(color: Vec4) -> VertexData {
    VertexData::new(Vec4::ZERO, color)
}

/// A single triangle model given in pixel coordinates of an orthogonal
/// camera with `half_width` matching half the image size.
fn pixel_triangle_model(
    size: f32,
    corners: [(f32, f32); 3],
    z: f32,
    color: Vec4,
    filter: Filter,
) -> Model {
    let half = size / 2.0;
    let mut model = Model::new().unwrap();
    model.set_filter(filter);
    let part = model.add_empty_part("triangle");
    let mut points = [0i32; 3];
    for (index, (x, y)) in corners.iter().enumerate() {
        points[index] = model.add_point(Vec3::new(x - half, half - y, z));
    }
    model.add_polygon(
        Polygon::triangle(
            (points[0], vertex(color)),
            (points[1], vertex(color)),
            (points[2], vertex(color)),
        ),
        part,
    );
    model
}

fn count_pixels(image: &ImageRgbaU8, color: Color) -> usize {
    let mut count = 0;
    for y in 0..image.height() {
        for x in 0..image.width() {
            if image.read_color(x, y) == Some(color) {
                count += 1;
            }
        }
    }
    count
}

#[test]
fn solid_triangle_fills_exactly_its_pixels() {
    let camera = ortho_camera(100, 50.0);
    let (color, depth) = cleared_targets(100, f32::INFINITY);
    let model = pixel_triangle_model(
        100.0,
        [(10.0, 10.0), (90.0, 10.0), (50.0, 90.0)],
        1.0,
        Vec4::new(1.0, 0.0, 0.0, 1.0),
        Filter::Solid,
    );

    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color.clone()), Some(depth.clone())).unwrap();
    renderer.give_task(&model, &Transform3D::IDENTITY, &camera).unwrap();
    assert!(renderer.is_receiving());
    assert_eq!(renderer.command_count(), 1);
    renderer.end(false).unwrap();
    assert!(!renderer.is_receiving());
    assert_eq!(renderer.command_count(), 0);

    let red = Color::RED;
    assert_eq!(color.read_color(50, 50), Some(red));
    assert_eq!(color.read_color(50, 15), Some(red));
    assert_eq!(color.read_color(50, 88), Some(red));
    // Outside stays at the clear color.
    assert_eq!(color.read_color(5, 5), Some(Color::TRANSPARENT));
    assert_eq!(color.read_color(10, 9), Some(Color::TRANSPARENT));
    assert_eq!(color.read_color(95, 95), Some(Color::TRANSPARENT));
    // Orthogonal depth stores the interpolated linear camera depth.
    assert!((depth.read_pixel(50, 50).unwrap() - 1.0).abs() < 1e-4);
    assert_eq!(depth.read_pixel(5, 5), Some(f32::INFINITY));
}

#[test]
fn adjacent_triangles_cover_the_square_without_seams() {
    let camera = ortho_camera(100, 50.0);
    let white = Vec4::ONE;
    let first = pixel_triangle_model(
        100.0,
        [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0)],
        1.0,
        white,
        Filter::Solid,
    );
    let second = pixel_triangle_model(
        100.0,
        [(100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
        1.0,
        white,
        Filter::Solid,
    );

    // Each triangle alone covers its own half, and the halves partition
    // the square: no pixel is dropped and none is drawn twice.
    let mut counts = [0usize; 2];
    for (index, model) in [&first, &second].into_iter().enumerate() {
        let (color, depth) = cleared_targets(100, f32::INFINITY);
        let mut renderer = Renderer::new().unwrap();
        renderer.begin(Some(color.clone()), Some(depth)).unwrap();
        renderer.give_task(model, &Transform3D::IDENTITY, &camera).unwrap();
        renderer.end(false).unwrap();
        counts[index] = count_pixels(&color, Color::WHITE);
    }
    assert_eq!(counts[0] + counts[1], 100 * 100);

    let (color, depth) = cleared_targets(100, f32::INFINITY);
    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color.clone()), Some(depth)).unwrap();
    renderer.give_task(&first, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.give_task(&second, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.end(false).unwrap();
    assert_eq!(count_pixels(&color, Color::WHITE), 100 * 100);
}

#[test]
fn occluded_triangles_are_skipped_at_end() {
    let size = 64;
    let camera = ortho_camera(size, 32.0);
    let (color, depth) = cleared_targets(size, f32::INFINITY);

    // A screen filling quad at depth 10.
    let mut occluder = Model::new().unwrap();
    let part = occluder.add_empty_part("wall");
    let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
    let corners = [
        Vec3::new(-32.0, 32.0, 10.0),
        Vec3::new(32.0, 32.0, 10.0),
        Vec3::new(32.0, -32.0, 10.0),
        Vec3::new(-32.0, -32.0, 10.0),
    ];
    let points: Vec<i32> = corners.iter().map(|p| occluder.add_point(*p)).collect();
    occluder.add_polygon(
        Polygon::quad(
            (points[0], vertex(red)),
            (points[1], vertex(red)),
            (points[2], vertex(red)),
            (points[3], vertex(red)),
        ),
        part,
    );

    // A smaller triangle behind it, in the upper right quarter where the
    // quad's first triangle fully covers every overlapped grid cell.
    let hidden = pixel_triangle_model(
        size as f32,
        [(40.0, 8.0), (56.0, 8.0), (48.0, 24.0)],
        20.0,
        Vec4::new(0.0, 0.0, 1.0, 1.0),
        Filter::Solid,
    );

    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color.clone()), Some(depth.clone())).unwrap();
    renderer.give_task(&occluder, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.occlude_from_existing_triangles().unwrap();
    assert!(renderer.has_occluders());
    renderer.give_task(&hidden, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.end(false).unwrap();

    // The hidden triangle must not appear anywhere; had it been drawn,
    // it would have lost the depth test anyway, so check by color.
    assert_eq!(count_pixels(&color, Color::BLUE), 0);
    assert_eq!(color.read_color(48, 12), Some(Color::RED));
    assert_eq!(color.read_color(5, 60), Some(Color::RED));
    // The occluder never wrote behind itself either.
    assert!((depth.read_pixel(48, 12).unwrap() - 10.0).abs() < 1e-3);
}

#[test]
fn boxes_behind_occluders_report_invisible() {
    let size = 64;
    let camera = ortho_camera(size, 32.0);
    let (color, depth) = cleared_targets(size, f32::INFINITY);
    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color), Some(depth)).unwrap();

    // Before any occluder everything is visible.
    let behind = Transform3D::from_position(Vec3::new(0.0, 0.0, 20.0));
    assert!(renderer
        .is_box_visible(Vec3::splat(-8.0), Vec3::splat(8.0), &behind, &camera)
        .unwrap());

    let occluder_space = Transform3D::from_position(Vec3::new(0.0, 0.0, 10.0));
    renderer
        .occlude_from_box(
            Vec3::new(-32.0, -32.0, -0.5),
            Vec3::new(32.0, 32.0, 0.5),
            &occluder_space,
            &camera,
            false,
        )
        .unwrap();

    assert!(!renderer
        .is_box_visible(Vec3::splat(-8.0), Vec3::splat(8.0), &behind, &camera)
        .unwrap());
    let in_front = Transform3D::from_position(Vec3::new(0.0, 0.0, 5.0));
    assert!(renderer
        .is_box_visible(Vec3::splat(-2.0), Vec3::splat(2.0), &in_front, &camera)
        .unwrap());
    // Fully outside the view also counts as invisible.
    let outside = Transform3D::from_position(Vec3::new(0.0, 0.0, -20.0));
    assert!(!renderer
        .is_box_visible(Vec3::splat(-1.0), Vec3::splat(1.0), &outside, &camera)
        .unwrap());
    renderer.end(false).unwrap();
}

#[test]
fn perspective_interpolation_does_not_bend_textures() {
    // A quad tilted away from the camera: near edge at z = 1, far edge
    // at z = 10. The texture encodes its own v coordinate in the red
    // channel, so affine interpolation would read ~125 at the screen
    // midpoint while the projective value is ~22.
    let camera = Camera::create_perspective(Transform3D::IDENTITY, 100, 100, 1.0, 0.01, 1000.0);
    let mut gradient = ImageRgbaU8::new(256, 256).unwrap();
    for y in 0..256 {
        for x in 0..256 {
            gradient.write_color(x, y, Color::rgb(y as u8, 0, 0));
        }
    }
    let texture = Texture::from_image(&gradient).unwrap();

    let mut model = Model::new().unwrap();
    let part = model.add_empty_part("ramp");
    model.set_diffuse_map(part, texture);
    let near_left = model.add_point(Vec3::new(-1.0, -0.5, 1.0));
    let near_right = model.add_point(Vec3::new(1.0, -0.5, 1.0));
    let far_right = model.add_point(Vec3::new(1.0, 0.5, 10.0));
    let far_left = model.add_point(Vec3::new(-1.0, 0.5, 10.0));
    let uv = |u: f32, v: f32| VertexData::new(Vec4::new(u, v, 0.0, 0.0), Vec4::ONE);
    model.add_polygon(
        Polygon::quad(
            (near_left, uv(0.0, 0.0)),
            (far_left, uv(0.0, 1.0)),
            (far_right, uv(1.0, 1.0)),
            (near_right, uv(1.0, 0.0)),
        ),
        part,
    );

    let (color, depth) = cleared_targets(100, 0.0);
    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color.clone()), Some(depth.clone())).unwrap();
    renderer.give_task(&model, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.end(false).unwrap();

    // Screen midpoint of the quad: near edge projects to row 75, far
    // edge to row 47.5. Sample the center column halfway between.
    let sampled = color.read_color(50, 61).unwrap();
    assert!(sampled.a == 255, "the quad must cover the probe pixel");
    assert!(
        sampled.r < 60,
        "expected projective v (~22), affine interpolation would give ~125, got {}",
        sampled.r
    );
    // The depth buffer stores 1/z for perspective cameras.
    let inv_depth = depth.read_pixel(50, 61).unwrap();
    assert!(
        (0.4..0.7).contains(&inv_depth),
        "1/z at the midpoint should be ~0.56, got {inv_depth}"
    );
    let near_inv_depth = depth.read_pixel(50, 73).unwrap();
    assert!(near_inv_depth > 0.85, "near edge is at z ~1, got {near_inv_depth}");
}

#[test]
fn alpha_filter_blends_over_solid_geometry() {
    let camera = ortho_camera(64, 32.0);
    let (color, depth) = cleared_targets(64, f32::INFINITY);
    let solid = pixel_triangle_model(
        64.0,
        [(0.0, 0.0), (64.0, 0.0), (0.0, 64.0)],
        5.0,
        Vec4::new(1.0, 0.0, 0.0, 1.0),
        Filter::Solid,
    );
    let veil = pixel_triangle_model(
        64.0,
        [(0.0, 0.0), (64.0, 0.0), (0.0, 64.0)],
        1.0,
        Vec4::new(1.0, 1.0, 1.0, 0.5),
        Filter::Alpha,
    );

    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color.clone()), Some(depth.clone())).unwrap();
    renderer.give_task(&solid, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.give_task(&veil, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.end(false).unwrap();

    let blended = color.read_color(10, 10).unwrap();
    assert_eq!(blended.r, 255);
    assert!((120..=135).contains(&blended.g));
    assert!((120..=135).contains(&blended.b));
    // Alpha geometry reads depth but never writes it.
    assert!((depth.read_pixel(10, 10).unwrap() - 5.0).abs() < 1e-3);
}

#[test]
fn lifecycle_misuse_is_rejected() {
    let camera = ortho_camera(16, 8.0);
    let model = pixel_triangle_model(
        16.0,
        [(2.0, 2.0), (14.0, 2.0), (2.0, 14.0)],
        1.0,
        Vec4::ONE,
        Filter::Solid,
    );
    let mut renderer = Renderer::new().unwrap();

    assert!(matches!(
        renderer.give_task(&model, &Transform3D::IDENTITY, &camera),
        Err(RenderError::WrongState)
    ));
    assert!(matches!(renderer.end(false), Err(RenderError::WrongState)));
    assert!(matches!(
        renderer.occlude_from_existing_triangles(),
        Err(RenderError::WrongState)
    ));

    let color = ImageRgbaU8::new(16, 16).unwrap();
    let depth = ImageF32::new(32, 32).unwrap();
    assert!(matches!(
        renderer.begin(Some(color.clone()), Some(depth)),
        Err(RenderError::SizeMismatch { .. })
    ));

    renderer.begin(Some(color), None).unwrap();
    let other = ImageRgbaU8::new(16, 16).unwrap();
    assert!(matches!(
        renderer.begin(Some(other), None),
        Err(RenderError::WrongState)
    ));
    renderer.end(false).unwrap();
}

#[test]
fn top_row_occlusion_reads_a_ground_pass() {
    let size = 64;
    let camera = ortho_camera(size, 32.0);
    // Depth-only ground pass: a screen filling floor at depth 10.
    let (_, depth) = cleared_targets(size, f32::INFINITY);
    let floor = pixel_triangle_model(
        size as f32,
        [(-40.0, -40.0), (200.0, -40.0), (-40.0, 200.0)],
        10.0,
        Vec4::ONE,
        Filter::Solid,
    );
    floor.render_depth(&depth, &Transform3D::IDENTITY, &camera);
    assert_eq!(depth.read_pixel(5, 5), Some(10.0));

    let (color, _) = cleared_targets(size, f32::INFINITY);
    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color.clone()), Some(depth)).unwrap();
    renderer.occlude_from_top_rows(&camera).unwrap();
    let hidden = pixel_triangle_model(
        size as f32,
        [(8.0, 8.0), (56.0, 8.0), (32.0, 56.0)],
        20.0,
        Vec4::new(0.0, 1.0, 0.0, 1.0),
        Filter::Solid,
    );
    renderer.give_task(&hidden, &Transform3D::IDENTITY, &camera).unwrap();
    renderer.end(false).unwrap();
    assert_eq!(count_pixels(&color, Color::GREEN), 0);
}

#[test]
fn execution_is_deterministic_across_job_counts() {
    let camera = ortho_camera(100, 50.0);
    let build = |queue: &mut CommandQueue, color: &ImageRgbaU8, depth: &ImageF32| {
        for layer in 0..6 {
            let offset = layer as f32 * 7.0;
            let z = 1.0 + layer as f32;
            let model = pixel_triangle_model(
                100.0,
                [
                    (5.0 + offset, 5.0 + offset),
                    (95.0 - offset, 10.0 + offset),
                    (30.0 + offset, 95.0 - offset),
                ],
                z,
                Vec4::new(0.2 + 0.1 * layer as f32, 0.9 - 0.1 * layer as f32, 0.3, 1.0),
                Filter::Solid,
            );
            model.render(
                Some(&mut *queue),
                Some(color),
                Some(depth),
                &Transform3D::IDENTITY,
                &camera,
            );
        }
    };

    let mut outputs = Vec::new();
    for job_count in [1usize, 5] {
        let (color, depth) = cleared_targets(100, f32::INFINITY);
        let mut queue = CommandQueue::new();
        build(&mut queue, &color, &depth);
        queue.execute(color.bound(), job_count);
        let mut pixels = Vec::new();
        for y in 0..100 {
            for x in 0..100 {
                pixels.push(color.read_pixel(x, y).unwrap());
                pixels.push(depth.read_pixel(x, y).unwrap().to_bits());
            }
        }
        outputs.push(pixels);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn empty_targets_are_ignored_gracefully() {
    let camera = ortho_camera(100, 50.0);
    let model = pixel_triangle_model(
        100.0,
        [(10.0, 10.0), (90.0, 10.0), (50.0, 90.0)],
        1.0,
        Vec4::ONE,
        Filter::Solid,
    );
    let color = ImageRgbaU8::new(0, 50).unwrap();
    let mut renderer = Renderer::new().unwrap();
    renderer.begin(Some(color), None).unwrap();
    renderer.give_task(&model, &Transform3D::IDENTITY, &camera).unwrap();
    assert_eq!(renderer.command_count(), 0);
    renderer.end(false).unwrap();
}
