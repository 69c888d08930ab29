use std::path::Path;

/// Opaque handle to a loaded texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureKey(u32);

impl TextureKey {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Loads image files into GPU textures.
///
/// Loading the same path twice produces two textures with two keys.
pub trait TextureLoader {
    fn load_texture(&mut self, path: &Path) -> eyre::Result<TextureKey>;

    /// Width and height in pixels, `None` if nothing was loaded under `key`.
    fn texture_size(&self, key: TextureKey) -> Option<(u32, u32)>;
}
