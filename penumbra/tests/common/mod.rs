#![allow(dead_code)]

use image::RgbaImage;
use penumbra::math::{Rect, Vec2};
use penumbra::render::{
    BatchSlot, BlendMode, BlurKernel, ComposeInputs, DeviceInfo, RenderDevice, ResolveOptions,
    SoftwareDevice, SurfaceId, TextureHandle, BATCH_SIZE,
};
use penumbra::{
    AssetManager, Camera2D, FrameDriver, LightId, LightingConfig, Result, TileDef, TileWorld,
    Tilemap,
};

pub const SCREEN: (u32, u32) = (192, 128);
pub const PLAYER: Vec2 = Vec2 { x: 320.0, y: 320.0 };
pub const FLOOR: u32 = 1;
pub const WALL: u32 = 2;
pub const LIGHT_COLOR: [f32; 4] = [1.0, 0.8, 0.6, 1.0];

/// Software device that records the expensive calls it forwards.
pub struct CountingDevice {
    pub inner: SoftwareDevice,
    pub resolves: usize,
    pub blurs: usize,
    pub passes: Vec<[BatchSlot; BATCH_SIZE]>,
}

impl CountingDevice {
    pub fn new(inner: SoftwareDevice) -> Self {
        Self {
            inner,
            resolves: 0,
            blurs: 0,
            passes: Vec::new(),
        }
    }

    pub fn reset_counts(&mut self) {
        self.resolves = 0;
        self.blurs = 0;
        self.passes.clear();
    }
}

impl RenderDevice for CountingDevice {
    fn info(&self) -> DeviceInfo {
        self.inner.info()
    }

    fn create_surface(&mut self, label: &str, width: u32, height: u32) -> Result<SurfaceId> {
        self.inner.create_surface(label, width, height)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.inner.destroy_surface(surface)
    }

    fn surface_size(&self, surface: SurfaceId) -> Option<(u32, u32)> {
        self.inner.surface_size(surface)
    }

    fn load_texture(&mut self, label: &str, image: &RgbaImage) -> Result<TextureHandle> {
        self.inner.load_texture(label, image)
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.inner.texture_size(texture)
    }

    fn clear(&mut self, surface: SurfaceId, color: [f32; 4]) -> Result<()> {
        self.inner.clear(surface, color)
    }

    fn fill_polygon(&mut self, surface: SurfaceId, points: &[Vec2], color: [f32; 4]) -> Result<()> {
        self.inner.fill_polygon(surface, points, color)
    }

    fn resolve_shadows(&mut self, surface: SurfaceId, options: &ResolveOptions) -> Result<()> {
        self.resolves += 1;
        self.inner.resolve_shadows(surface, options)
    }

    fn light_pass(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        slots: &[BatchSlot; BATCH_SIZE],
    ) -> Result<()> {
        self.passes.push(*slots);
        self.inner.light_pass(source, dest, slots)
    }

    fn copy_surface(&mut self, source: SurfaceId, dest: SurfaceId) -> Result<()> {
        self.inner.copy_surface(source, dest)
    }

    fn flip_vertical(&mut self, surface: SurfaceId) -> Result<()> {
        self.inner.flip_vertical(surface)
    }

    fn blit(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        origin: (i32, i32),
        mode: BlendMode,
    ) -> Result<()> {
        self.inner.blit(source, dest, origin, mode)
    }

    fn blur(&mut self, surface: SurfaceId, kernel: &BlurKernel) -> Result<()> {
        self.blurs += 1;
        self.inner.blur(surface, kernel)
    }

    fn compose(&mut self, target: SurfaceId, inputs: &ComposeInputs) -> Result<()> {
        self.inner.compose(target, inputs)
    }

    fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage> {
        self.inner.read_pixels(surface)
    }
}

/// 40x40 room of 16px floor tiles with a wall segment east of the player.
///
/// Wall tiles are column 24, rows 18 to 21 (world x 384..400, y 288..352).
pub fn room() -> TileWorld {
    let mut world = TileWorld::new(Tilemap::new(Vec2::splat(16.0), (40, 40), Vec2::ZERO));
    assert_eq!(world.define_tile(TileDef::floor("floor", [0.6, 0.55, 0.5, 1.0])), FLOOR);
    assert_eq!(world.define_tile(TileDef::wall("wall", [0.25, 0.25, 0.3, 1.0])), WALL);
    world.tilemap.fill_rect(0, 0, 40, 40, FLOOR);
    world.tilemap.fill_rect(24, 18, 1, 4, WALL);
    world.set_controlled(Some(PLAYER));
    world
}

/// Small vision tier, light blur, half zoom so a light area is 64px on screen.
pub fn config() -> LightingConfig {
    LightingConfig::default()
        .with_vision_radius(100.0)
        .with_blur(2, 1.0)
}

pub fn camera() -> Camera2D {
    Camera2D {
        position: PLAYER,
        zoom: 0.5,
    }
}

/// Floor positions west of the player, all on screen.
pub fn spread(i: usize) -> Vec2 {
    Vec2::new(200.0 + (i % 5) as f32 * 30.0, 220.0 + (i / 5) as f32 * 40.0)
}

pub fn spawn_lights(world: &mut TileWorld, n: usize) -> Vec<LightId> {
    (0..n)
        .map(|i| world.lights.spawn(spread(i), 100.0, LIGHT_COLOR))
        .collect()
}

pub fn assets_for(device: &mut CountingDevice) -> AssetManager {
    let mut assets = AssetManager::new();
    assets.load_builtin(device).expect("builtin textures");
    assets
}

pub fn make_driver_with(inner: SoftwareDevice, config: LightingConfig, size: (u32, u32)) -> FrameDriver<CountingDevice> {
    let mut device = CountingDevice::new(inner);
    let assets = assets_for(&mut device);
    FrameDriver::new(device, &assets, config, size).expect("driver")
}

pub fn make_driver(config: LightingConfig) -> FrameDriver<CountingDevice> {
    make_driver_with(SoftwareDevice::new(), config, SCREEN)
}

pub fn read(driver: &mut FrameDriver<CountingDevice>, surface: SurfaceId) -> RgbaImage {
    driver.device_mut().read_pixels(surface).expect("readback")
}

pub fn tile_rect(x: u32, y: u32) -> Rect {
    Rect::from_dimensions(Vec2::new(x as f32 * 16.0, y as f32 * 16.0), Vec2::splat(16.0))
}
