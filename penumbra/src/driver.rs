//! Per-frame orchestration of the lighting stages.

use image::RgbaImage;

use crate::assets::{AssetManager, EMPTY_SLOT_TEXTURE, OUT_OF_VIEW_TEXTURE, VISION_MASK_TEXTURE};
use crate::config::LightingConfig;
use crate::error::Result;
use crate::light::{Light, LightId};
use crate::lighting::vision::VisionCapture;
use crate::lighting::{
    BatchReport, GaussianBlur, InvalidationReason, LightAreaCache, LightBatcher, PlayerVision,
    SceneCompositor,
};
use crate::math::{Camera2D, Rect, Vec2};
use crate::render::{BatchSlot, Placement, RenderDevice, Sampled, SurfaceId};
use crate::world::{Canvas, WorldView};

/// Why a frame produced no image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The world has no player-controlled entity.
    NoControlledEntity,
    /// Surfaces are being recreated and no earlier frame exists.
    SurfacesUnavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A new frame was composited into this surface.
    Presented(SurfaceId),
    /// Surfaces were unavailable; this is the last composited frame.
    Reused(SurfaceId),
    Skipped(SkipReason),
}

/// Screen-sized surfaces, recreated together on resize.
#[derive(Clone, Copy, Debug)]
struct FrameSurfaces {
    size: (u32, u32),
    scene: SurfaceId,
    lightmap: SurfaceId,
    intermediate: SurfaceId,
    vision: SurfaceId,
    output: SurfaceId,
}

impl FrameSurfaces {
    fn create<D: RenderDevice + ?Sized>(device: &mut D, size: (u32, u32)) -> Result<Self> {
        let (w, h) = size;
        Ok(Self {
            size,
            scene: device.create_surface("scene", w, h)?,
            lightmap: device.create_surface("lightmap", w, h)?,
            intermediate: device.create_surface("lightmap-intermediate", w, h)?,
            vision: device.create_surface("vision", w, h)?,
            output: device.create_surface("final", w, h)?,
        })
    }

    fn all(&self) -> [SurfaceId; 5] {
        [self.scene, self.lightmap, self.intermediate, self.vision, self.output]
    }

    fn destroy<D: RenderDevice + ?Sized>(&self, device: &mut D) {
        for surface in self.all() {
            device.destroy_surface(surface);
        }
    }

    fn is_valid<D: RenderDevice + ?Sized>(&self, device: &D) -> bool {
        self.all()
            .iter()
            .all(|surface| device.surface_size(*surface) == Some(self.size))
    }
}

/// Runs the lighting pipeline once per frame.
///
/// Every collaborator is handed in: the device at construction, the world and
/// camera per frame. Frame order is fixed: recompute dirty lights, batch the
/// lightmap, draw the scene, cast vision, blur, blend.
pub struct FrameDriver<D: RenderDevice> {
    device: D,
    config: LightingConfig,
    full_vision: bool,
    size: (u32, u32),
    cache: LightAreaCache,
    batcher: LightBatcher,
    vision: PlayerVision,
    blur: GaussianBlur,
    compositor: SceneCompositor,
    surfaces: Option<FrameSurfaces>,
    debug: Option<SurfaceId>,
    last_frame: Option<SurfaceId>,
    last_batch: Option<BatchReport>,
}

impl<D: RenderDevice> FrameDriver<D> {
    /// Build the pipeline for a `size` screen.
    ///
    /// Fails with [`LightingError::MissingAsset`](crate::LightingError::MissingAsset)
    /// unless `assets` holds `black5x5`, `whitemask` and `outofview`.
    pub fn new(
        mut device: D,
        assets: &AssetManager,
        config: LightingConfig,
        size: (u32, u32),
    ) -> Result<Self> {
        let empty = assets.require(EMPTY_SLOT_TEXTURE)?;
        let mask = assets.require(VISION_MASK_TEXTURE)?;
        let out_of_view = assets.require(OUT_OF_VIEW_TEXTURE)?;

        let info = device.info();
        let full_vision = config.full_vision || !info.supports_shadows;
        if !info.supports_shadows && !config.full_vision {
            log::warn!("{} cannot render shadows, forcing full vision", info.name);
        }

        let vision = PlayerVision::new(config.vision_radius, mask);
        let surfaces = if size.0 > 0 && size.1 > 0 {
            Some(FrameSurfaces::create(&mut device, size)?)
        } else {
            None
        };
        let debug = Self::create_debug_surface(&mut device, &config, &vision)?;

        log::info!(
            "lighting pipeline on {} at {}x{} (full vision: {full_vision})",
            info.name,
            size.0,
            size.1
        );

        Ok(Self {
            device,
            blur: GaussianBlur::from_config(&config),
            compositor: SceneCompositor::new(out_of_view, config.ambient),
            batcher: LightBatcher::new(empty),
            config,
            full_vision,
            size,
            cache: LightAreaCache::new(),
            vision,
            surfaces,
            debug,
            last_frame: None,
            last_batch: None,
        })
    }

    fn create_debug_surface(
        device: &mut D,
        config: &LightingConfig,
        vision: &PlayerVision,
    ) -> Result<Option<SurfaceId>> {
        if !(config.debug.occluders || config.debug.player_shadow_map) {
            return Ok(None);
        }
        let size = vision.tier().size();
        Ok(Some(device.create_surface("vision-debug", size, size)?))
    }

    /// Render one frame of `world` as seen through `camera`.
    pub fn render_frame<W>(&mut self, world: &W, camera: &Camera2D) -> Result<FrameOutcome>
    where
        W: WorldView + ?Sized,
    {
        let Some(player) = world.controlled_entity_position() else {
            return Ok(FrameOutcome::Skipped(SkipReason::NoControlledEntity));
        };

        let surfaces = match self.surfaces {
            Some(surfaces) if surfaces.size == self.size && surfaces.is_valid(&self.device) => surfaces,
            _ => {
                return Ok(match self.last_frame {
                    Some(last) => {
                        log::debug!("surfaces unavailable, reusing last frame");
                        FrameOutcome::Reused(last)
                    }
                    None => {
                        log::debug!("surfaces unavailable, skipping frame");
                        FrameOutcome::Skipped(SkipReason::SurfacesUnavailable)
                    }
                });
            }
        };
        let (w, h) = surfaces.size;

        if self.full_vision {
            self.last_batch = None;
        } else {
            let lights = world.active_lights();
            self.cache.sync(&mut self.device, &lights)?;
            let recomputed = self.cache.recompute_dirty(&mut self.device, world, &lights)?;
            if recomputed > 0 {
                log::trace!("recomputed {recomputed} light areas");
            }
            let slots = self.visible_slots(&lights, camera, (w, h));
            let report = self.batcher.composite(
                &mut self.device,
                surfaces.lightmap,
                surfaces.intermediate,
                slots,
            )?;
            self.last_batch = Some(report);
        }

        {
            let mut canvas = Canvas::new(&mut self.device, surfaces.scene, *camera, (w, h));
            world.draw_scene(&mut canvas)?;
        }

        if self.full_vision {
            self.vision.fill_full(&mut self.device, surfaces.vision)?;
            self.compositor
                .present_unlit(&mut self.device, surfaces.scene, surfaces.output)?;
        } else {
            if self.config.player_vision {
                let capture = self.debug.map(|surface| VisionCapture {
                    flags: self.config.debug,
                    surface,
                });
                self.vision.compute(
                    &mut self.device,
                    &mut self.cache,
                    world,
                    camera,
                    player,
                    surfaces.vision,
                    capture,
                )?;
            } else {
                self.vision.fill_hidden(&mut self.device, surfaces.vision)?;
            }
            self.blur.apply(&mut self.device, surfaces.vision)?;
            self.blur.apply(&mut self.device, surfaces.lightmap)?;
            self.compositor.compose(
                &mut self.device,
                surfaces.output,
                surfaces.scene,
                surfaces.lightmap,
                surfaces.vision,
            )?;
        }

        self.last_frame = Some(surfaces.output);
        Ok(FrameOutcome::Presented(surfaces.output))
    }

    /// Batch inputs for every calculated, contributing light on screen.
    fn visible_slots(&self, lights: &[Light], camera: &Camera2D, size: (u32, u32)) -> Vec<BatchSlot> {
        let (w, h) = size;
        let viewport = camera.world_viewport(w, h);
        lights
            .iter()
            .filter(|light| light.is_on() && self.cache.is_calculated(light.id))
            .filter_map(|light| {
                let area = self.cache.area(light.id)?;
                if !area.contributes() || !area.bounds().intersects(&viewport) {
                    return None;
                }
                let extent = area.tier().size() as f32 * camera.zoom;
                let top_left = camera.world_to_screen(area.origin(), w, h) - Vec2::splat(extent * 0.5);
                Some(BatchSlot {
                    texture: Sampled::Surface(area.surface()),
                    color: light.color,
                    placement: Placement::for_area(top_left, extent, size),
                })
            })
            .collect()
    }

    /// Invalidate every light whose area overlaps `region`.
    pub fn on_geometry_changed(&mut self, region: Rect) -> usize {
        let hits = self.cache.invalidate_region(region);
        log::debug!("geometry changed, {hits} light areas invalidated");
        hits
    }

    /// Recreate every surface at the new size and mark every light dirty.
    ///
    /// A zero-sized dimension (a minimized window) keeps the old surfaces and
    /// frames reuse the last image until a real size arrives.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.size = (width, height);
        if width == 0 || height == 0 {
            log::debug!("resize to {width}x{height} deferred");
            return Ok(());
        }

        if let Some(old) = self.surfaces.take() {
            old.destroy(&mut self.device);
        }
        if let Some(debug) = self.debug.take() {
            self.device.destroy_surface(debug);
        }
        self.last_frame = None;

        self.cache.reset(&mut self.device)?;
        self.surfaces = Some(FrameSurfaces::create(&mut self.device, self.size)?);
        self.debug = Self::create_debug_surface(&mut self.device, &self.config, &self.vision)?;
        log::debug!("lighting surfaces recreated at {width}x{height}");
        Ok(())
    }

    /// Force one light to be recomputed next frame.
    pub fn invalidate(&mut self, id: LightId) -> bool {
        self.cache.invalidate(id, InvalidationReason::Explicit)
    }

    /// Pixels of the last composited frame.
    pub fn read_frame(&mut self) -> Result<Option<RgbaImage>> {
        match self.last_frame {
            Some(surface) => Ok(Some(self.device.read_pixels(surface)?)),
            None => Ok(None),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn cache(&self) -> &LightAreaCache {
        &self.cache
    }

    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    /// True when occlusion is disabled, by config or by the device.
    pub fn is_full_vision(&self) -> bool {
        self.full_vision
    }

    /// Requested screen size.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Surface receiving vision debug captures, if any capture is enabled.
    pub fn debug_surface(&self) -> Option<SurfaceId> {
        self.debug
    }

    pub fn scene_surface(&self) -> Option<SurfaceId> {
        self.surfaces.map(|s| s.scene)
    }

    pub fn lightmap_surface(&self) -> Option<SurfaceId> {
        self.surfaces.map(|s| s.lightmap)
    }

    pub fn vision_surface(&self) -> Option<SurfaceId> {
        self.surfaces.map(|s| s.vision)
    }

    /// Passes and lights of the most recent lightmap, `None` in full vision.
    pub fn last_batch(&self) -> Option<BatchReport> {
        self.last_batch
    }

    /// Tear down every surface the pipeline owns and hand back the device.
    pub fn into_device(mut self) -> D {
        if let Some(surfaces) = self.surfaces.take() {
            surfaces.destroy(&mut self.device);
        }
        if let Some(debug) = self.debug.take() {
            self.device.destroy_surface(debug);
        }
        self.cache.clear(&mut self.device);
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SoftwareDevice;
    use crate::LightingError;

    fn builtin_assets(device: &mut SoftwareDevice) -> AssetManager {
        let mut assets = AssetManager::new();
        assets.load_builtin(device).unwrap();
        assets
    }

    #[test]
    fn missing_assets_abort_construction() {
        let mut device = SoftwareDevice::new();
        let mut assets = builtin_assets(&mut device);
        assets.unload_texture(VISION_MASK_TEXTURE);
        match FrameDriver::new(device, &assets, LightingConfig::default(), (32, 32)) {
            Err(LightingError::MissingAsset(name)) => assert_eq!(name, VISION_MASK_TEXTURE),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("driver started without whitemask"),
        }
    }

    #[test]
    fn devices_without_shadows_force_full_vision() {
        let mut device = SoftwareDevice::new().without_shadow_support();
        let assets = builtin_assets(&mut device);
        let driver = FrameDriver::new(device, &assets, LightingConfig::default(), (32, 32)).unwrap();
        assert!(driver.is_full_vision());
        assert!(!driver.config().full_vision);
    }

    #[test]
    fn debug_surface_only_exists_when_a_capture_is_enabled() {
        let mut device = SoftwareDevice::new();
        let assets = builtin_assets(&mut device);
        let plain = FrameDriver::new(device, &assets, LightingConfig::default(), (32, 32)).unwrap();
        assert!(plain.debug_surface().is_none());

        let mut device = SoftwareDevice::new();
        let assets = builtin_assets(&mut device);
        let config = LightingConfig::default()
            .with_vision_radius(100.0)
            .with_debug(crate::config::DebugConfig {
                occluders: true,
                player_shadow_map: false,
            });
        let driver = FrameDriver::new(device, &assets, config, (32, 32)).unwrap();
        let debug = driver.debug_surface().unwrap();
        assert_eq!(driver.device().surface_size(debug), Some((128, 128)));
    }

    #[test]
    fn into_device_releases_every_surface() {
        let mut device = SoftwareDevice::new();
        let assets = builtin_assets(&mut device);
        let driver = FrameDriver::new(device, &assets, LightingConfig::default(), (32, 32)).unwrap();
        assert_eq!(driver.device().surface_count(), 5);
        assert_eq!(driver.into_device().surface_count(), 0);
    }
}
