//! Render device seam and the shared types passed across it.
//!
//! The lighting pipeline only ever speaks to a [`RenderDevice`]. Two devices
//! ship with the crate: [`SoftwareDevice`], a deterministic CPU rasterizer, and
//! [`GpuDevice`], the wgpu implementation used when a window is available.

mod gpu;
mod software;

pub use gpu::GpuDevice;
pub use software::SoftwareDevice;

use image::RgbaImage;

use crate::error::Result;
use crate::math::Vec2;

/// Number of light inputs bound to every lightmap shader invocation.
pub const BATCH_SIZE: usize = 6;

/// Mask level at or above which a vision pixel counts as fully in view.
///
/// This is also the neutral gray that full-vision mode fills the mask with.
pub const VISION_PASS_LEVEL: f32 = 211.0 / 255.0;

/// Flat neutral gray used for the full-vision mask.
pub const FULL_VISION_GRAY: [f32; 4] = [VISION_PASS_LEVEL, VISION_PASS_LEVEL, VISION_PASS_LEVEL, 1.0];

pub const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const TRANSPARENT: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// Opaque handle to an off-screen render target owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub(crate) u32);

/// Opaque handle to a static texture owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u32);

/// Anything a shader can sample from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sampled {
    Surface(SurfaceId),
    Texture(TextureHandle),
}

/// Row order of a device's render targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceOrigin {
    /// Row 0 is the top of the screen.
    TopLeft,
    /// Row 0 is the bottom of the screen; results need a vertical flip.
    BottomLeft,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub origin: SurfaceOrigin,
    /// False when the host cannot run the shadow shaders; forces full vision.
    pub supports_shadows: bool,
}

/// Where a light texture lands on the accumulation surface.
///
/// A destination uv maps into the light texture as `(uv - offset) * scale`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub offset: [f32; 2],
    pub scale: [f32; 2],
}

impl Placement {
    pub const IDENTITY: Self = Self {
        offset: [0.0, 0.0],
        scale: [1.0, 1.0],
    };

    /// Placement of a `size`-pixel square whose top-left corner sits at
    /// `top_left` on a target of `target` pixels.
    pub fn for_area(top_left: Vec2, size: f32, target: (u32, u32)) -> Self {
        let (w, h) = (target.0 as f32, target.1 as f32);
        Self {
            offset: [top_left.x / w, top_left.y / h],
            scale: [w / size, h / size],
        }
    }

    /// Maps a destination uv into the placed texture's uv space.
    pub fn map(&self, uv: [f32; 2]) -> [f32; 2] {
        [
            (uv[0] - self.offset[0]) * self.scale[0],
            (uv[1] - self.offset[1]) * self.scale[1],
        ]
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.offset[0], self.offset[1], self.scale[0], self.scale[1]]
    }
}

/// One of the [`BATCH_SIZE`] inputs of a lightmap pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchSlot {
    pub texture: Sampled,
    pub color: [f32; 4],
    pub placement: Placement,
}

impl BatchSlot {
    /// Padding slot: the empty texture with zero color and identity placement.
    pub fn empty(texture: TextureHandle) -> Self {
        Self {
            texture: Sampled::Texture(texture),
            color: [0.0; 4],
            placement: Placement::IDENTITY,
        }
    }

    pub fn is_padding(&self) -> bool {
        self.color == [0.0; 4] && matches!(self.texture, Sampled::Texture(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveQuality {
    /// Per-frame lightmap path: one shadow tap per pixel.
    Fast,
    /// Player-vision path: denser rays and filtered shadow edges.
    High,
}

impl ResolveQuality {
    /// Number of angular buckets in the shadow map of a `size` pixel area.
    pub fn ray_count(self, size: u32) -> u32 {
        match self {
            ResolveQuality::Fast => size.max(8) * 2,
            ResolveQuality::High => size.max(8) * 4,
        }
    }

    /// March step along each ray, in pixels.
    pub fn march_step(self) -> f32 {
        match self {
            ResolveQuality::Fast => 1.0,
            ResolveQuality::High => 0.5,
        }
    }

    /// Neighbouring buckets averaged on each side of a pixel's own bucket.
    pub fn filter_taps(self) -> i32 {
        match self {
            ResolveQuality::Fast => 0,
            ResolveQuality::High => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolveOptions {
    pub quality: ResolveQuality,
    /// Fade light with distance from the center of the area.
    pub attenuate: bool,
    /// Multiplied into the lit region, stretched over the whole area.
    pub mask: Option<TextureHandle>,
}

/// Exponent of the radial fade applied by attenuated resolves.
pub const LIGHT_FALLOFF: f32 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Replace,
    Alpha,
    Additive,
}

/// Normalized one-sided Gaussian weights; `weights[0]` is the center tap.
#[derive(Clone, Debug, PartialEq)]
pub struct BlurKernel {
    weights: Vec<f32>,
}

impl BlurKernel {
    pub fn new(weights: Vec<f32>) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn radius(&self) -> usize {
        self.weights.len().saturating_sub(1)
    }
}

/// Inputs of the terminal blend shader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComposeInputs {
    pub scene: SurfaceId,
    pub lightmap: SurfaceId,
    pub vision: SurfaceId,
    /// Tiled across the target wherever the vision mask is dark.
    pub out_of_view: TextureHandle,
    pub ambient: [f32; 4],
}

/// The primitive operations the lighting pipeline needs from a renderer.
///
/// Coordinates given to drawing calls are pixels of the target surface with
/// the origin at its top-left corner.
pub trait RenderDevice {
    fn info(&self) -> DeviceInfo;

    fn create_surface(&mut self, label: &str, width: u32, height: u32) -> Result<SurfaceId>;

    fn destroy_surface(&mut self, surface: SurfaceId);

    /// Size of a live surface, or `None` once it has been destroyed.
    fn surface_size(&self, surface: SurfaceId) -> Option<(u32, u32)>;

    fn load_texture(&mut self, label: &str, image: &RgbaImage) -> Result<TextureHandle>;

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    fn clear(&mut self, surface: SurfaceId, color: [f32; 4]) -> Result<()>;

    /// Fill a convex polygon, alpha blended over the current contents.
    fn fill_polygon(&mut self, surface: SurfaceId, points: &[Vec2], color: [f32; 4]) -> Result<()>;

    /// Turn the occluder silhouette drawn into `surface` into a radial shadow map.
    fn resolve_shadows(&mut self, surface: SurfaceId, options: &ResolveOptions) -> Result<()>;

    /// Blend `source` plus every slot's contribution into `dest`.
    fn light_pass(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        slots: &[BatchSlot; BATCH_SIZE],
    ) -> Result<()>;

    /// Copy one surface into another of identical size.
    fn copy_surface(&mut self, source: SurfaceId, dest: SurfaceId) -> Result<()>;

    fn flip_vertical(&mut self, surface: SurfaceId) -> Result<()>;

    /// Draw `source` onto `dest` with its top-left corner at `origin`.
    fn blit(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        origin: (i32, i32),
        mode: BlendMode,
    ) -> Result<()>;

    /// Separable blur, horizontal then vertical, in place.
    fn blur(&mut self, surface: SurfaceId, kernel: &BlurKernel) -> Result<()>;

    fn compose(&mut self, target: SurfaceId, inputs: &ComposeInputs) -> Result<()>;

    fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage>;
}

/// Convert a linear `[0, 1]` color channel to a byte.
pub(crate) fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub(crate) fn to_rgba8(color: [f32; 4]) -> image::Rgba<u8> {
    image::Rgba([
        to_byte(color[0]),
        to_byte(color[1]),
        to_byte(color[2]),
        to_byte(color[3]),
    ])
}
