//! The controlled entity's line of sight.
//!
//! Vision is cast exactly like a light, from the player's position into a
//! scratch area of a fixed tier, but it is never cached: the player moves
//! nearly every frame.

use crate::config::DebugConfig;
use crate::error::{LightingError, Result};
use crate::math::{Camera2D, Vec2};
use crate::render::{
    BlendMode, RenderDevice, ResolveOptions, ResolveQuality, SurfaceId, TextureHandle, BLACK,
    FULL_VISION_GRAY,
};
use crate::world::WorldView;

use super::area::{unembedded_position, LightAreaCache, ShadowTier};
use super::shadow::ShadowMapResolver;

/// Where debug copies of the vision area go.
#[derive(Clone, Copy, Debug)]
pub struct VisionCapture {
    pub flags: DebugConfig,
    /// Must be the size of the vision tier.
    pub surface: SurfaceId,
}

#[derive(Clone, Copy, Debug)]
pub struct PlayerVision {
    tier: ShadowTier,
    mask: TextureHandle,
    resolver: ShadowMapResolver,
}

impl PlayerVision {
    pub fn new(vision_radius: f32, mask: TextureHandle) -> Self {
        Self {
            tier: ShadowTier::for_radius(vision_radius),
            mask,
            resolver: ShadowMapResolver::new(),
        }
    }

    pub fn tier(&self) -> ShadowTier {
        self.tier
    }

    fn options(&self) -> ResolveOptions {
        ResolveOptions {
            quality: ResolveQuality::High,
            attenuate: false,
            mask: Some(self.mask),
        }
    }

    /// Everything is in view.
    pub fn fill_full<D: RenderDevice + ?Sized>(&self, device: &mut D, vision: SurfaceId) -> Result<()> {
        device.clear(vision, FULL_VISION_GRAY)
    }

    /// Nothing is in view.
    pub fn fill_hidden<D: RenderDevice + ?Sized>(&self, device: &mut D, vision: SurfaceId) -> Result<()> {
        device.clear(vision, BLACK)
    }

    /// Cast the player's sight and draw it into `vision`, centered on the
    /// casting position. Pixels outside the area stay black.
    ///
    /// A player inside an opaque tile sees from just below it; if that is
    /// solid too, nothing is in view.
    ///
    /// The area is resolved at `camera.zoom` pixels per world unit so it can be
    /// copied onto the screen-sized vision surface without scaling.
    #[allow(clippy::too_many_arguments)]
    pub fn compute<D, W>(
        &self,
        device: &mut D,
        cache: &mut LightAreaCache,
        world: &W,
        camera: &Camera2D,
        player: Vec2,
        vision: SurfaceId,
        capture: Option<VisionCapture>,
    ) -> Result<()>
    where
        D: RenderDevice + ?Sized,
        W: WorldView + ?Sized,
    {
        let (w, h) = device
            .surface_size(vision)
            .ok_or(LightingError::UnknownSurface(vision))?;
        let Some(origin) = unembedded_position(world, player) else {
            log::debug!("vision origin ({}, {}) is inside geometry", player.x, player.y);
            return self.fill_hidden(device, vision);
        };
        let area = cache.scratch_area(device, self.tier)?;
        let size = self.tier.size();
        let scale = camera.zoom;

        let coverage = ShadowMapResolver::coverage(origin, size, scale);
        let occluders = world.occluders_intersecting(coverage);
        self.resolver
            .draw_silhouette(device, area, origin, scale, &occluders)?;
        if let Some(capture) = capture.filter(|c| c.flags.occluders) {
            device.copy_surface(area, capture.surface)?;
        }

        device.resolve_shadows(area, &self.options())?;
        if let Some(capture) = capture.filter(|c| c.flags.player_shadow_map) {
            device.copy_surface(area, capture.surface)?;
        }

        let center = camera.world_to_screen(origin, w, h);
        let half = size as f32 * 0.5;
        let corner = (
            (center.x - half).round() as i32,
            (center.y - half).round() as i32,
        );
        device.clear(vision, BLACK)?;
        device.blit(area, vision, corner, BlendMode::Replace)?;
        log::trace!(
            "vision: {} occluders, {}px area at {corner:?}",
            occluders.len(),
            size
        );
        Ok(())
    }
}
