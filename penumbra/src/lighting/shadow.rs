use crate::error::{LightingError, Result};
use crate::math::{Rect, Vec2};
use crate::render::{RenderDevice, ResolveOptions, SurfaceId, BLACK, TRANSPARENT};
use crate::world::Occluder;

/// Turns occluder geometry around an origin into a radial shadow map.
///
/// The area surface is a local projection plane centered on the origin:
/// world point `p` lands on pixel `(p - origin) * scale + size / 2`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShadowMapResolver;

impl ShadowMapResolver {
    pub fn new() -> Self {
        Self
    }

    /// World rectangle covered by a `size`-pixel area at `scale` pixels per unit.
    pub fn coverage(origin: Vec2, size: u32, scale: f32) -> Rect {
        Rect::from_center(origin, Vec2::splat(size as f32 / scale))
    }

    /// Silhouette then resolve, in one go.
    pub fn resolve<D: RenderDevice + ?Sized>(
        &self,
        device: &mut D,
        area: SurfaceId,
        origin: Vec2,
        scale: f32,
        occluders: &[Occluder],
        options: &ResolveOptions,
    ) -> Result<()> {
        self.draw_silhouette(device, area, origin, scale, occluders)?;
        device.resolve_shadows(area, options)
    }

    /// Clear the area and draw every occluder in solid black.
    pub fn draw_silhouette<D: RenderDevice + ?Sized>(
        &self,
        device: &mut D,
        area: SurfaceId,
        origin: Vec2,
        scale: f32,
        occluders: &[Occluder],
    ) -> Result<()> {
        let (w, h) = device
            .surface_size(area)
            .ok_or(LightingError::UnknownSurface(area))?;
        let half = Vec2::new(w as f32 * 0.5, h as f32 * 0.5);

        device.clear(area, TRANSPARENT)?;
        let mut points = Vec::new();
        for occluder in occluders {
            points.clear();
            points.extend(occluder.points().iter().map(|p| (*p - origin) * scale + half));
            device.fill_polygon(area, &points, BLACK)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ResolveQuality, SoftwareDevice};

    #[test]
    fn silhouette_is_drawn_relative_to_the_origin() {
        let mut device = SoftwareDevice::new();
        let area = device.create_surface("area", 32, 32).unwrap();
        let wall = Occluder::rect(Rect::from_dimensions(
            Vec2::new(108.0, 100.0),
            Vec2::new(4.0, 4.0),
        ));
        ShadowMapResolver::new()
            .draw_silhouette(&mut device, area, Vec2::new(100.0, 100.0), 1.0, &[wall])
            .unwrap();
        let image = device.surface_image(area).unwrap();
        assert_eq!(image.get_pixel(24, 16)[3], 255);
        assert_eq!(image.get_pixel(16, 16)[3], 0);
    }

    #[test]
    fn resolve_without_occluders_lights_the_center() {
        let mut device = SoftwareDevice::new();
        let area = device.create_surface("area", 32, 32).unwrap();
        let options = ResolveOptions {
            quality: ResolveQuality::Fast,
            attenuate: false,
            mask: None,
        };
        ShadowMapResolver::new()
            .resolve(&mut device, area, Vec2::ZERO, 1.0, &[], &options)
            .unwrap();
        assert_eq!(device.surface_image(area).unwrap().get_pixel(16, 16)[0], 255);
    }

    #[test]
    fn coverage_shrinks_with_scale() {
        let rect = ShadowMapResolver::coverage(Vec2::ZERO, 128, 2.0);
        assert_eq!(rect.width(), 64.0);
        assert_eq!(rect.center(), Vec2::ZERO);
    }
}
