//! Per-light shadow areas and the dirty tracking that decides when they are
//! re-resolved.
//!
//! Resolving a light is the expensive part of a frame, so an area is only
//! recomputed while its light sits in the dirty map. Lights enter the map when
//! they spawn, move, toggle, change radius, when geometry under them changes,
//! and on a full reset. Leaving the map is the "calculated" state.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::light::{Light, LightId, LightState};
use crate::math::{Rect, Vec2};
use crate::render::{RenderDevice, ResolveOptions, ResolveQuality, SurfaceId};
use crate::world::WorldView;

use super::shadow::ShadowMapResolver;

/// Resolve settings for ordinary lights: fast path with radial fade.
pub const LIGHT_RESOLVE: ResolveOptions = ResolveOptions {
    quality: ResolveQuality::Fast,
    attenuate: true,
    mask: None,
};

/// Fixed light area resolutions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShadowTier {
    Tier128,
    Tier256,
    Tier512,
    Tier1024,
}

impl ShadowTier {
    pub const ALL: [ShadowTier; 4] = [
        ShadowTier::Tier128,
        ShadowTier::Tier256,
        ShadowTier::Tier512,
        ShadowTier::Tier1024,
    ];

    /// Smallest tier that holds `radius`; anything else gets the largest.
    pub fn for_radius(radius: f32) -> Self {
        if radius <= 128.0 {
            ShadowTier::Tier128
        } else if radius <= 256.0 {
            ShadowTier::Tier256
        } else if radius <= 512.0 {
            ShadowTier::Tier512
        } else {
            ShadowTier::Tier1024
        }
    }

    /// Edge length of the tier's square surface, in pixels.
    pub fn size(self) -> u32 {
        match self {
            ShadowTier::Tier128 => 128,
            ShadowTier::Tier256 => 256,
            ShadowTier::Tier512 => 512,
            ShadowTier::Tier1024 => 1024,
        }
    }
}

/// Why a light's area was marked for recomputation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidationReason {
    Spawned,
    Moved,
    Toggled,
    /// Radius changed, possibly into another tier.
    Retiered,
    GeometryChanged,
    Reset,
    Explicit,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct LightSnapshot {
    position: Vec2,
    radius: f32,
    state: LightState,
}

impl LightSnapshot {
    fn of(light: &Light) -> Self {
        Self {
            position: light.position,
            radius: light.radius,
            state: light.state,
        }
    }
}

/// A light's private shadow surface.
#[derive(Clone, Debug)]
pub struct LightArea {
    tier: ShadowTier,
    surface: SurfaceId,
    origin: Vec2,
    snapshot: LightSnapshot,
    contributes: bool,
}

impl LightArea {
    pub fn tier(&self) -> ShadowTier {
        self.tier
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Position shadows were cast from. Differs from the light's position
    /// when the light was nudged out of an opaque tile.
    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    /// World rectangle the area covers.
    pub fn bounds(&self) -> Rect {
        ShadowMapResolver::coverage(self.origin, self.tier.size(), 1.0)
    }

    /// False when the last computation found the light degenerate.
    pub fn contributes(&self) -> bool {
        self.contributes
    }
}

/// Owns every light area plus the per-tier scratch areas used for vision.
#[derive(Debug, Default)]
pub struct LightAreaCache {
    areas: HashMap<LightId, LightArea>,
    dirty: HashMap<LightId, InvalidationReason>,
    scratch: HashMap<ShadowTier, SurfaceId>,
    resolver: ShadowMapResolver,
}

impl LightAreaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn area(&self, id: LightId) -> Option<&LightArea> {
        self.areas.get(&id)
    }

    /// True when the light has an area whose contents are current.
    pub fn is_calculated(&self, id: LightId) -> bool {
        self.areas.contains_key(&id) && !self.dirty.contains_key(&id)
    }

    pub fn dirty_reason(&self, id: LightId) -> Option<InvalidationReason> {
        self.dirty.get(&id).copied()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Mark one light for recomputation. Returns `false` for unknown lights.
    pub fn invalidate(&mut self, id: LightId, reason: InvalidationReason) -> bool {
        if !self.areas.contains_key(&id) {
            return false;
        }
        self.mark(id, reason);
        true
    }

    /// Invalidate every light whose area overlaps `region`.
    pub fn invalidate_region(&mut self, region: Rect) -> usize {
        let hits: Vec<LightId> = self
            .areas
            .iter()
            .filter(|(_, area)| area.bounds().intersects(&region))
            .map(|(id, _)| *id)
            .collect();
        for id in &hits {
            self.mark(*id, InvalidationReason::GeometryChanged);
        }
        hits.len()
    }

    /// Invalidate every light, overriding any pending reason.
    pub fn invalidate_all(&mut self, reason: InvalidationReason) {
        for id in self.areas.keys() {
            self.dirty.insert(*id, reason);
        }
        log::debug!("invalidated {} light areas ({reason:?})", self.areas.len());
    }

    /// Reconcile areas with the current light set.
    ///
    /// New lights get an area, changed lights are invalidated, lights that are
    /// gone have their area torn down.
    pub fn sync<D: RenderDevice + ?Sized>(&mut self, device: &mut D, lights: &[Light]) -> Result<()> {
        let mut seen = HashSet::with_capacity(lights.len());
        for light in lights {
            if !seen.insert(light.id) {
                continue;
            }
            let tier = ShadowTier::for_radius(light.radius);
            let snapshot = LightSnapshot::of(light);

            let reason = match self.areas.get_mut(&light.id) {
                None => {
                    let size = tier.size();
                    let surface = device.create_surface("light-area", size, size)?;
                    self.areas.insert(
                        light.id,
                        LightArea {
                            tier,
                            surface,
                            origin: light.position,
                            snapshot,
                            contributes: false,
                        },
                    );
                    Some(InvalidationReason::Spawned)
                }
                Some(area) => {
                    let reason = if area.tier != tier {
                        device.destroy_surface(area.surface);
                        area.surface = device.create_surface("light-area", tier.size(), tier.size())?;
                        area.tier = tier;
                        Some(InvalidationReason::Retiered)
                    } else if area.snapshot.state != snapshot.state {
                        Some(InvalidationReason::Toggled)
                    } else if area.snapshot.position != snapshot.position {
                        Some(InvalidationReason::Moved)
                    } else if area.snapshot.radius != snapshot.radius {
                        Some(InvalidationReason::Retiered)
                    } else {
                        None
                    };
                    area.snapshot = snapshot;
                    reason
                }
            };
            if let Some(reason) = reason {
                self.mark(light.id, reason);
            }
        }

        let gone: Vec<LightId> = self
            .areas
            .keys()
            .filter(|id| !seen.contains(*id))
            .copied()
            .collect();
        for id in gone {
            if let Some(area) = self.areas.remove(&id) {
                device.destroy_surface(area.surface);
            }
            self.dirty.remove(&id);
            log::debug!("light {} removed, area released", id.to_u32());
        }
        Ok(())
    }

    /// Bring one light's area up to date. No-op when it already is.
    ///
    /// Returns whether the light contributes to the lightmap.
    pub fn ensure_calculated<D, W>(&mut self, device: &mut D, world: &W, light: &Light) -> Result<bool>
    where
        D: RenderDevice + ?Sized,
        W: WorldView + ?Sized,
    {
        let Some(area) = self.areas.get_mut(&light.id) else {
            return Ok(false);
        };
        let Some(reason) = self.dirty.get(&light.id).copied() else {
            return Ok(area.contributes);
        };

        match casting_origin(world, light) {
            Some(origin) => {
                let coverage = ShadowMapResolver::coverage(origin, area.tier.size(), 1.0);
                let occluders = world.occluders_intersecting(coverage);
                self.resolver
                    .resolve(device, area.surface, origin, 1.0, &occluders, &LIGHT_RESOLVE)?;
                area.origin = origin;
                area.contributes = true;
                log::trace!(
                    "resolved light {} ({reason:?}): {} occluders, {}px",
                    light.id.to_u32(),
                    occluders.len(),
                    area.tier.size()
                );
            }
            None => {
                area.origin = light.position;
                area.contributes = false;
                log::debug!("light {} is degenerate, skipping", light.id.to_u32());
            }
        }

        let contributes = area.contributes;
        self.dirty.remove(&light.id);
        Ok(contributes)
    }

    /// Recompute every dirty light that is switched on.
    pub fn recompute_dirty<D, W>(&mut self, device: &mut D, world: &W, lights: &[Light]) -> Result<usize>
    where
        D: RenderDevice + ?Sized,
        W: WorldView + ?Sized,
    {
        let mut recomputed = 0;
        for light in lights.iter().filter(|light| light.is_on()) {
            if self.dirty.contains_key(&light.id) {
                self.ensure_calculated(device, world, light)?;
                recomputed += 1;
            }
        }
        Ok(recomputed)
    }

    /// Shared, never cached area of `tier`.
    pub fn scratch_area<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tier: ShadowTier,
    ) -> Result<SurfaceId> {
        if let Some(surface) = self.scratch.get(&tier) {
            if device.surface_size(*surface).is_some() {
                return Ok(*surface);
            }
        }
        let surface = device.create_surface("scratch-area", tier.size(), tier.size())?;
        self.scratch.insert(tier, surface);
        Ok(surface)
    }

    /// Recreate every surface and mark every light dirty.
    pub fn reset<D: RenderDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        for area in self.areas.values_mut() {
            device.destroy_surface(area.surface);
            area.surface = device.create_surface("light-area", area.tier.size(), area.tier.size())?;
        }
        for (_, surface) in self.scratch.drain() {
            device.destroy_surface(surface);
        }
        self.invalidate_all(InvalidationReason::Reset);
        Ok(())
    }

    /// Release every surface the cache owns.
    pub fn clear<D: RenderDevice + ?Sized>(&mut self, device: &mut D) {
        for (_, area) in self.areas.drain() {
            device.destroy_surface(area.surface);
        }
        for (_, surface) in self.scratch.drain() {
            device.destroy_surface(surface);
        }
        self.dirty.clear();
    }

    fn mark(&mut self, id: LightId, reason: InvalidationReason) {
        log::trace!("light {} invalidated: {reason:?}", id.to_u32());
        // The first reason since the last computation is kept.
        self.dirty.entry(id).or_insert(reason);
    }
}

/// Where a light casts shadows from, or `None` if it is degenerate.
///
/// Lights with no radius are degenerate; otherwise see [`unembedded_position`].
pub fn casting_origin<W: WorldView + ?Sized>(world: &W, light: &Light) -> Option<Vec2> {
    if !(light.radius > 0.0) {
        return None;
    }
    unembedded_position(world, light.position)
}

/// `position`, moved just below its tile when that tile is opaque.
///
/// `None` when the position is off the map or still inside geometry after
/// the move.
pub fn unembedded_position<W: WorldView + ?Sized>(world: &W, position: Vec2) -> Option<Vec2> {
    let tile = world.tile_at(position)?;
    if !tile.opaque {
        return Some(position);
    }
    let nudged = Vec2::new(position.x, tile.bounds.max.y + 1.0);
    match world.tile_at(nudged) {
        Some(below) if !below.opaque => Some(nudged),
        _ => None,
    }
}
