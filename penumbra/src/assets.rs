use std::collections::HashMap;

use image::{Rgba, RgbaImage};

use crate::error::{LightingError, Result};
use crate::render::{RenderDevice, TextureHandle};

/// Texture bound to unused lightmap batch slots.
pub const EMPTY_SLOT_TEXTURE: &str = "black5x5";
/// Mask multiplied into the player's vision area.
pub const VISION_MASK_TEXTURE: &str = "whitemask";
/// Fill shown wherever the player cannot see.
pub const OUT_OF_VIEW_TEXTURE: &str = "outofview";

/// Textures the frame driver refuses to start without.
pub const REQUIRED_TEXTURES: [&str; 3] = [EMPTY_SLOT_TEXTURE, VISION_MASK_TEXTURE, OUT_OF_VIEW_TEXTURE];

/// Named texture cache over a render device.
pub struct AssetManager {
    textures: HashMap<String, TextureHandle>,
}

impl AssetManager {
    /// Create a new asset manager with no cached assets.
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
        }
    }

    /// Load a texture from a file path, caching it if already loaded.
    pub fn load_texture<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        path: &str,
    ) -> Result<TextureHandle> {
        if let Some(handle) = self.textures.get(path) {
            return Ok(*handle);
        }
        let image = image::open(path)?.to_rgba8();
        self.insert_image(device, path, &image)
    }

    /// Load a texture from encoded bytes, caching it by a given key.
    pub fn load_texture_from_bytes<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        key: &str,
        bytes: &[u8],
    ) -> Result<TextureHandle> {
        if let Some(handle) = self.textures.get(key) {
            return Ok(*handle);
        }
        let image = image::load_from_memory(bytes)?.to_rgba8();
        self.insert_image(device, key, &image)
    }

    /// Upload `image` under `key`, replacing any previous entry.
    pub fn insert_image<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        key: &str,
        image: &RgbaImage,
    ) -> Result<TextureHandle> {
        let handle = device.load_texture(key, image)?;
        self.textures.insert(key.to_string(), handle);
        Ok(handle)
    }

    /// Register generated versions of every required texture that is not
    /// already loaded.
    pub fn load_builtin<D: RenderDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        for key in REQUIRED_TEXTURES {
            if self.has_texture(key) {
                continue;
            }
            let image = match key {
                EMPTY_SLOT_TEXTURE => RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 255])),
                VISION_MASK_TEXTURE => RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255])),
                _ => out_of_view_pattern(),
            };
            self.insert_image(device, key, &image)?;
        }
        Ok(())
    }

    /// Get a cached texture handle by key, if it exists.
    pub fn get_texture(&self, key: &str) -> Option<TextureHandle> {
        self.textures.get(key).copied()
    }

    /// Like [`get_texture`](Self::get_texture) but a miss is an error.
    pub fn require(&self, key: &str) -> Result<TextureHandle> {
        self.get_texture(key)
            .ok_or_else(|| LightingError::MissingAsset(key.to_string()))
    }

    /// Check if a texture is already cached.
    pub fn has_texture(&self, key: &str) -> bool {
        self.textures.contains_key(key)
    }

    /// Remove a specific texture from the cache.
    pub fn unload_texture(&mut self, key: &str) {
        self.textures.remove(key);
    }

    /// Clear all cached textures (they will be reloaded on next access).
    pub fn clear(&mut self) {
        self.textures.clear();
    }
}

impl Default for AssetManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Dim diagonal hatching.
fn out_of_view_pattern() -> RgbaImage {
    RgbaImage::from_fn(16, 16, |x, y| {
        if (x + y) % 8 < 2 {
            Rgba([34, 34, 40, 255])
        } else {
            Rgba([12, 12, 16, 255])
        }
    })
}
