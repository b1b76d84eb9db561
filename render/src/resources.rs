//! Textures shared between models by name.

use std::collections::HashMap;

use karst_image::Texture;

/// Name to texture map used when importing models. Loading pixels from
/// disk is outside the rendering core, so entries are inserted by the
/// host application and looked up by the importers.
#[derive(Default)]
pub struct ResourcePool {
    textures: HashMap<String, Texture>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_texture(&mut self, name: impl Into<String>, texture: Texture) {
        self.textures.insert(name.into(), texture);
    }

    /// Shared handle to the named texture, if present.
    pub fn texture(&self, name: &str) -> Option<Texture> {
        self.textures.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}
