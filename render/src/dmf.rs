//! Import of the DMF1 text model format.
//!
//! The format is a flat token stream after the `DMF1` magic:
//! `<Namespace>` enters a scope and creates a part or triangle,
//! `identifier` begins a property, `[index]` optionally selects an array
//! element and `(value)` assigns. Unknown namespaces and properties are
//! skipped with a warning, matching how permissively the format has
//! always been read.

use glam::{Vec3, Vec4};

use crate::error::RenderError;
use crate::model::{Model, Polygon, VertexData};
use crate::resources::ResourcePool;
use crate::shader::Filter;

const TEXTURE_SLOTS: usize = 16;
const POINT_MERGE_THRESHOLD: f32 = 0.00001;

#[derive(Clone, Copy, Default)]
struct RawVertex {
    position: Vec3,
    tex_coord: Vec4,
    color: [f32; 4],
}

impl RawVertex {
    fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            tex_coord: Vec4::ZERO,
            color: [1.0; 4],
        }
    }
}

#[derive(Clone, Copy)]
struct RawTriangle {
    vertices: [RawVertex; 3],
}

struct RawPart {
    name: String,
    textures: [String; TEXTURE_SLOTS],
    shader_zero: String,
    min_detail_level: i32,
    max_detail_level: i32,
    triangles: Vec<RawTriangle>,
}

impl RawPart {
    fn new() -> Self {
        Self {
            name: String::new(),
            textures: core::array::from_fn(|_| String::new()),
            shader_zero: String::new(),
            min_detail_level: 0,
            max_detail_level: 2,
            triangles: Vec::new(),
        }
    }
}

struct RawModel {
    filter: Filter,
    parts: Vec<RawPart>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ParserState {
    WaitForStatement,
    WaitForIndexOrProperty,
    WaitForProperty,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ParserSpace {
    Main,
    Part,
    Triangle,
    Bone,
    Shape,
    Point,
    Unhandled,
}

struct Parser {
    model: RawModel,
    state: ParserState,
    space: ParserSpace,
    property_index: i32,
    property_name: String,
}

fn matches_name(name: &str, expected: &str) -> bool {
    name.eq_ignore_ascii_case(expected)
}

fn parse_value(content: &str) -> f32 {
    match content.trim().parse::<f32>() {
        Ok(value) => value,
        Err(_) => {
            log::warn!("value \"{content}\" is not a number, using 0");
            0.0
        }
    }
}

impl Parser {
    fn new() -> Self {
        Self {
            model: RawModel {
                filter: Filter::Solid,
                parts: Vec::new(),
            },
            state: ParserState::WaitForStatement,
            space: ParserSpace::Main,
            property_index: 0,
            property_name: String::new(),
        }
    }

    fn change_namespace(&mut self, name: &str) {
        if matches_name(name, "Part") {
            self.model.parts.push(RawPart::new());
            self.space = ParserSpace::Part;
        } else if matches_name(name, "Triangle") {
            if self.space == ParserSpace::Part || self.space == ParserSpace::Triangle {
                let part = self.model.parts.last_mut().expect("part exists in part space");
                part.triangles.push(RawTriangle {
                    vertices: [RawVertex::new(); 3],
                });
                self.space = ParserSpace::Triangle;
            } else {
                log::warn!("triangles must be created as members of a part");
            }
        } else if matches_name(name, "Bone") {
            self.space = ParserSpace::Bone;
        } else if matches_name(name, "Shape") {
            self.space = ParserSpace::Shape;
        } else if matches_name(name, "Point") {
            self.space = ParserSpace::Point;
        } else {
            log::warn!("unhandled namespace <{name}>");
            self.space = ParserSpace::Unhandled;
        }
    }

    fn set_property(&mut self, content: &str) {
        let name = self.property_name.as_str();
        let index = self.property_index;
        let value = parse_value(content);
        match self.space {
            ParserSpace::Main => {
                if matches_name(name, "FilterType") {
                    self.model.filter = if matches_name(content.trim(), "Alpha") {
                        Filter::Alpha
                    } else {
                        Filter::Solid
                    };
                }
                // CullingType and BoundMultiplier are recognized by older
                // tools but have no effect here.
            }
            ParserSpace::Part => {
                let Some(part) = self.model.parts.last_mut() else {
                    log::warn!("part property \"{name}\" outside of any part");
                    return;
                };
                if matches_name(name, "Name") {
                    part.name = content.trim().to_string();
                } else if matches_name(name, "Texture") {
                    if (0..TEXTURE_SLOTS as i32).contains(&index) {
                        part.textures[index as usize] = content.trim().to_string();
                    } else {
                        log::warn!("texture index {index} is out of bound 0..15");
                    }
                } else if matches_name(name, "Shader") {
                    if index == 0 {
                        part.shader_zero = content.trim().to_string();
                    }
                } else if matches_name(name, "MinDetailLevel") {
                    part.min_detail_level = value.round() as i32;
                } else if matches_name(name, "MaxDetailLevel") {
                    part.max_detail_level = value.round() as i32;
                }
            }
            ParserSpace::Triangle => {
                let Some(triangle) = self
                    .model
                    .parts
                    .last_mut()
                    .and_then(|part| part.triangles.last_mut())
                else {
                    log::warn!("vertex data without a triangle");
                    return;
                };
                if !(0..3).contains(&index) {
                    log::warn!("triangle vertex index {index} is out of bound 0..2");
                    return;
                }
                let vertex = &mut triangle.vertices[index as usize];
                if matches_name(name, "X") {
                    vertex.position.x = value;
                } else if matches_name(name, "Y") {
                    vertex.position.y = value;
                } else if matches_name(name, "Z") {
                    vertex.position.z = value;
                } else if matches_name(name, "CR") {
                    vertex.color[0] = value;
                } else if matches_name(name, "CG") {
                    vertex.color[1] = value;
                } else if matches_name(name, "CB") {
                    vertex.color[2] = value;
                } else if matches_name(name, "CA") {
                    vertex.color[3] = value;
                } else if matches_name(name, "U1") {
                    vertex.tex_coord.x = value;
                } else if matches_name(name, "V1") {
                    vertex.tex_coord.y = value;
                } else if matches_name(name, "U2") {
                    vertex.tex_coord.z = value;
                } else if matches_name(name, "V2") {
                    vertex.tex_coord.w = value;
                }
            }
            // Bones, physics shapes and points are recognized so their
            // content can be skipped without warnings per property.
            ParserSpace::Bone | ParserSpace::Shape | ParserSpace::Point | ParserSpace::Unhandled => {}
        }
    }

    fn read_token(&mut self, token: &str) -> Result<(), RenderError> {
        if token.is_empty() {
            return Ok(());
        }
        let bytes = token.as_bytes();
        if bytes[0] == b'(' && bytes[bytes.len() - 1] == b')' {
            if self.state == ParserState::WaitForProperty
                || self.state == ParserState::WaitForIndexOrProperty
            {
                let content = &token[1..token.len() - 1];
                self.set_property(content);
                self.state = ParserState::WaitForStatement;
                self.property_index = 0;
            } else {
                return Err(RenderError::Parse(format!("unexpected value {token}")));
            }
        } else if bytes[0] == b'[' && bytes[bytes.len() - 1] == b']' {
            if self.state == ParserState::WaitForIndexOrProperty {
                self.property_index = parse_value(&token[1..token.len() - 1]).round() as i32;
                self.state = ParserState::WaitForProperty;
            } else {
                return Err(RenderError::Parse(format!("unexpected index {token}")));
            }
        } else if bytes[0] == b'<' && bytes[bytes.len() - 1] == b'>' {
            if self.state == ParserState::WaitForStatement {
                let name = token[1..token.len() - 1].to_string();
                self.change_namespace(&name);
            } else {
                return Err(RenderError::Parse(
                    "change of namespace before finishing the last statement".to_string(),
                ));
            }
        } else if self.state == ParserState::WaitForStatement {
            self.property_name = token.to_string();
            self.state = ParserState::WaitForIndexOrProperty;
        }
        Ok(())
    }
}

/// Scan the content into tokens. Tokens end at whitespace or at the
/// closing bracket matching how they started, so values may contain
/// spaces.
fn parse_raw(content: &str) -> Result<RawModel, RenderError> {
    if !content.as_bytes().starts_with(b"DMF1") {
        return Err(RenderError::Parse("the content does not start with \"DMF1\"".to_string()));
    }
    let mut parser = Parser::new();
    let bytes = content.as_bytes();
    let mut token_start = 4;
    let mut first_char = 0u8;
    let mut index = 4;
    while index < bytes.len() {
        let current = bytes[index];
        if first_char == 0 && matches!(current, b' ' | b'\t' | b'\n' | b'\r') {
            parser.read_token(&content[token_start..index])?;
            token_start = index + 1;
        } else if matches!(current, b'<' | b'(' | b'[') && first_char == 0 {
            parser.read_token(&content[token_start..index])?;
            token_start = index;
            first_char = current;
        } else if (first_char == b'<' && current == b'>')
            || (first_char == b'(' && current == b')')
            || (first_char == b'[' && current == b']')
        {
            parser.read_token(&content[token_start..=index])?;
            token_start = index + 1;
            first_char = 0;
        }
        index += 1;
    }
    parser.read_token(&content[token_start.min(bytes.len())..])?;
    if parser.state != ParserState::WaitForStatement {
        return Err(RenderError::Parse(
            "the last statement in the model was not finished".to_string(),
        ));
    }
    Ok(parser.model)
}

/// Convert the raw representation into a model, resolving textures
/// against the pool and merging equal vertex positions.
fn convert(raw: &RawModel, pool: &ResourcePool, detail_level: i32) -> Result<Model, RenderError> {
    let mut model = Model::new()?;
    model.set_filter(raw.filter);
    for raw_part in &raw.parts {
        if detail_level < raw_part.min_detail_level || detail_level > raw_part.max_detail_level {
            continue;
        }
        let part = model.add_empty_part(raw_part.name.clone());
        if matches_name(&raw_part.shader_zero, "M_Diffuse_0Tex") {
            // Vertex colors only.
        } else if matches_name(&raw_part.shader_zero, "M_Diffuse_1Tex") {
            model.set_diffuse_map_by_name(pool, &raw_part.textures[0], part);
        } else if matches_name(&raw_part.shader_zero, "M_Diffuse_2Tex") {
            model.set_diffuse_map_by_name(pool, &raw_part.textures[0], part);
            model.set_light_map_by_name(pool, &raw_part.textures[1], part);
        } else {
            log::warn!(
                "the shader \"{}\" is not supported, use M_Diffuse_0Tex, M_Diffuse_1Tex or M_Diffuse_2Tex",
                raw_part.shader_zero
            );
        }
        for triangle in &raw_part.triangles {
            let mut corners = [(0i32, VertexData::default()); 3];
            for (corner, vertex) in triangle.vertices.iter().enumerate() {
                let point = model.add_point_if_needed(vertex.position, POINT_MERGE_THRESHOLD);
                let color = Vec4::from_array(vertex.color);
                corners[corner] = (point, VertexData::new(vertex.tex_coord, color));
            }
            model.add_polygon(Polygon::triangle(corners[0], corners[1], corners[2]), part);
        }
    }
    Ok(model)
}

/// Parse DMF1 text into a model. Parts whose detail range excludes
/// `detail_level` are dropped; textures resolve by name from the pool.
pub fn import_dmf1(
    content: &str,
    pool: &ResourcePool,
    detail_level: i32,
) -> Result<Model, RenderError> {
    let raw = parse_raw(content)?;
    convert(&raw, pool, detail_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use karst_image::{ImageRgbaU8, Texture};
    use pretty_assertions::assert_eq;

    const SIMPLE_MODEL: &str = "DMF1\n\
        FilterType (Solid)\n\
        <Part>\n\
        Name (floor)\n\
        Shader [0] (M_Diffuse_1Tex)\n\
        Texture [0] (bricks)\n\
        <Triangle>\n\
        X [0] (0.0) Y [0] (0.0) Z [0] (0.0)\n\
        X [1] (1.0) Y [1] (0.0) Z [1] (0.0)\n\
        X [2] (0.0) Y [2] (1.0) Z [2] (0.0)\n\
        U1 [0] (0.0) V1 [0] (0.0)\n\
        U1 [1] (1.0) V1 [1] (0.0)\n\
        U1 [2] (0.0) V1 [2] (1.0)\n\
        CR [0] (0.5) CG [0] (0.25) CB [0] (1.0) CA [0] (1.0)\n";

    #[test]
    fn one_part_one_triangle_round_trip() {
        let mut pool = ResourcePool::new();
        let image = ImageRgbaU8::new(4, 4).unwrap();
        pool.insert_texture("bricks", Texture::from_image(&image).unwrap());

        let model = import_dmf1(SIMPLE_MODEL, &pool, 1).unwrap();
        assert_eq!(model.part_count(), 1);
        assert_eq!(model.part(0).name, "floor");
        assert_eq!(model.point_count(), 3);
        assert_eq!(model.polygon_count(0), 1);
        assert_eq!(model.polygon_vertex_count(0, 0), 3);
        assert_eq!(model.part(0).diffuse_name.as_deref(), Some("bricks"));
        assert!(model.part(0).diffuse_map.is_some());
        assert_eq!(model.tex_coord(0, 0, 1), Vec4::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(model.vertex_color(0, 0, 0), Vec4::new(0.5, 0.25, 1.0, 1.0));
        assert_eq!(model.filter(), Filter::Solid);
    }

    #[test]
    fn filter_type_alpha_is_recognized() {
        let content = "DMF1 FilterType (Alpha)";
        let model = import_dmf1(content, &ResourcePool::new(), 0).unwrap();
        assert_eq!(model.filter(), Filter::Alpha);
    }

    #[test]
    fn missing_magic_is_a_parse_error() {
        let result = import_dmf1("DMF2 FilterType (Solid)", &ResourcePool::new(), 0);
        assert!(matches!(result, Err(RenderError::Parse(_))));
    }

    #[test]
    fn unfinished_statement_is_a_parse_error() {
        let result = import_dmf1("DMF1 FilterType", &ResourcePool::new(), 0);
        assert!(matches!(result, Err(RenderError::Parse(_))));
    }

    #[test]
    fn detail_levels_filter_parts() {
        let content = "DMF1\n\
            <Part> Name (near) MinDetailLevel (0) MaxDetailLevel (1)\n\
            <Part> Name (far) MinDetailLevel (2) MaxDetailLevel (3)\n";
        let pool = ResourcePool::new();
        let near = import_dmf1(content, &pool, 0).unwrap();
        assert_eq!(near.part_count(), 1);
        assert_eq!(near.part(0).name, "near");
        let far = import_dmf1(content, &pool, 3).unwrap();
        assert_eq!(far.part_count(), 1);
        assert_eq!(far.part(0).name, "far");
    }

    #[test]
    fn shared_corners_merge_into_one_point() {
        let content = "DMF1 <Part> Name (quad)\n\
            <Triangle>\n\
            X [0] (0) Y [0] (0) Z [0] (0)\n\
            X [1] (1) Y [1] (0) Z [1] (0)\n\
            X [2] (0) Y [2] (1) Z [2] (0)\n\
            <Triangle>\n\
            X [0] (1) Y [0] (0) Z [0] (0)\n\
            X [1] (1) Y [1] (1) Z [1] (0)\n\
            X [2] (0) Y [2] (1) Z [2] (0)\n";
        let model = import_dmf1(content, &ResourcePool::new(), 0).unwrap();
        assert_eq!(model.point_count(), 4);
        assert_eq!(model.polygon_count(0), 2);
    }
}
