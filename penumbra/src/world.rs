//! What the lighting pipeline needs from the game world.

use crate::error::Result;
use crate::light::Light;
use crate::math::{Camera2D, Rect, Vec2};
use crate::render::{RenderDevice, SurfaceId};

/// A light-blocking shape in world space.
#[derive(Clone, Debug, PartialEq)]
pub struct Occluder {
    points: Vec<Vec2>,
}

impl Occluder {
    /// Occluder covering an axis-aligned rectangle, e.g. a wall tile.
    pub fn rect(rect: Rect) -> Self {
        Self {
            points: rect.corners().to_vec(),
        }
    }

    /// Convex polygon occluder.
    pub fn polygon(points: Vec<Vec2>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn bounds(&self) -> Rect {
        let first = self.points.first().copied().unwrap_or_default();
        let (min, max) = self
            .points
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
        Rect::new(min, max)
    }
}

/// Result of a tile lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileRef {
    pub coords: (i32, i32),
    /// World-space extent of the tile
    pub bounds: Rect,
    pub opaque: bool,
}

/// Capabilities the lighting pipeline consumes from the game.
pub trait WorldView {
    /// Every light in the world, in any state.
    fn active_lights(&self) -> Vec<Light>;

    /// Occluders overlapping `region`.
    fn occluders_intersecting(&self, region: Rect) -> Vec<Occluder>;

    /// Tile under `position`, or `None` outside the map.
    fn tile_at(&self, position: Vec2) -> Option<TileRef>;

    /// Position of the player-controlled entity. Frames are skipped without one.
    fn controlled_entity_position(&self) -> Option<Vec2>;

    /// Paint the unlit scene.
    fn draw_scene(&self, canvas: &mut Canvas<'_>) -> Result<()>;
}

/// World-space drawing onto the scene surface.
pub struct Canvas<'a> {
    device: &'a mut dyn RenderDevice,
    surface: SurfaceId,
    camera: Camera2D,
    size: (u32, u32),
}

impl<'a> Canvas<'a> {
    pub(crate) fn new(
        device: &'a mut dyn RenderDevice,
        surface: SurfaceId,
        camera: Camera2D,
        size: (u32, u32),
    ) -> Self {
        Self {
            device,
            surface,
            camera,
            size,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn camera(&self) -> &Camera2D {
        &self.camera
    }

    /// World rectangle visible on this canvas.
    pub fn viewport(&self) -> Rect {
        self.camera.world_viewport(self.size.0, self.size.1)
    }

    pub fn clear(&mut self, color: [f32; 4]) -> Result<()> {
        self.device.clear(self.surface, color)
    }

    pub fn fill_rect(&mut self, rect: Rect, color: [f32; 4]) -> Result<()> {
        self.fill_polygon(&rect.corners(), color)
    }

    pub fn fill_polygon(&mut self, points: &[Vec2], color: [f32; 4]) -> Result<()> {
        let (w, h) = self.size;
        let screen: Vec<Vec2> = points
            .iter()
            .map(|p| self.camera.world_to_screen(*p, w, h))
            .collect();
        self.device.fill_polygon(self.surface, &screen, color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SoftwareDevice;

    #[test]
    fn canvas_draws_through_the_camera() {
        let mut device = SoftwareDevice::new();
        let surface = device.create_surface("scene", 8, 8).unwrap();
        {
            let camera = Camera2D::new(Vec2::new(100.0, 100.0));
            let mut canvas = Canvas::new(&mut device, surface, camera, (8, 8));
            canvas.clear([0.0, 0.0, 0.0, 1.0]).unwrap();
            canvas
                .fill_rect(
                    Rect::from_dimensions(Vec2::new(100.0, 100.0), Vec2::new(4.0, 4.0)),
                    [0.0, 1.0, 0.0, 1.0],
                )
                .unwrap();
        }
        let image = device.surface_image(surface).unwrap();
        assert_eq!(image.get_pixel(4, 4).0, [0, 255, 0, 255]);
        assert_eq!(image.get_pixel(3, 3).0, [0, 0, 0, 255]);
    }

    #[test]
    fn occluder_bounds_cover_all_points() {
        let occluder = Occluder::polygon(vec![
            Vec2::new(1.0, 5.0),
            Vec2::new(-2.0, 0.0),
            Vec2::new(4.0, 3.0),
        ]);
        let bounds = occluder.bounds();
        assert_eq!(bounds.min, Vec2::new(-2.0, 0.0));
        assert_eq!(bounds.max, Vec2::new(4.0, 5.0));
    }
}
