use crate::error::Result;
use crate::light::{Light, LightRegistry};
use crate::math::{Rect, Vec2};
use crate::world::{Canvas, Occluder, TileRef, WorldView};

/// A single tile in a tilemap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tile {
    /// Tile ID (index into the tile definitions, 0 = empty/no tile)
    pub id: u32,
}

impl Tile {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    pub fn empty() -> Self {
        Self { id: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.id == 0
    }
}

/// How a tile ID looks and whether it blocks light.
#[derive(Clone, Debug, PartialEq)]
pub struct TileDef {
    pub name: String,
    pub color: [f32; 4],
    pub opaque: bool,
}

impl TileDef {
    pub fn floor(name: &str, color: [f32; 4]) -> Self {
        Self {
            name: name.to_string(),
            color,
            opaque: false,
        }
    }

    pub fn wall(name: &str, color: [f32; 4]) -> Self {
        Self {
            name: name.to_string(),
            color,
            opaque: true,
        }
    }
}

/// Grid of tiles placed in world space.
#[derive(Clone, Debug)]
pub struct Tilemap {
    /// Size of each tile in world units
    pub tile_size: Vec2,
    /// Map dimensions (width, height) in tiles
    pub map_size: (u32, u32),
    /// Tile data (row-major: [y * width + x])
    pub tiles: Vec<Tile>,
    /// Position of the tilemap in world space (top-left corner)
    pub position: Vec2,
}

impl Tilemap {
    /// Create a new empty tilemap.
    pub fn new(tile_size: Vec2, map_size: (u32, u32), position: Vec2) -> Self {
        let (width, height) = map_size;
        Self {
            tile_size,
            map_size,
            tiles: vec![Tile::empty(); (width * height) as usize],
            position,
        }
    }

    /// Set a tile at the given coordinates.
    pub fn set_tile(&mut self, x: u32, y: u32, tile_id: u32) {
        let (width, height) = self.map_size;
        if x < width && y < height {
            let index = (y * width + x) as usize;
            self.tiles[index] = Tile::new(tile_id);
        }
    }

    /// Get a tile at the given coordinates.
    pub fn get_tile(&self, x: u32, y: u32) -> Option<Tile> {
        let (width, height) = self.map_size;
        if x < width && y < height {
            let index = (y * width + x) as usize;
            Some(self.tiles[index])
        } else {
            None
        }
    }

    /// Fill a rectangular area with a tile ID.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, tile_id: u32) {
        for dy in 0..height {
            for dx in 0..width {
                self.set_tile(x + dx, y + dy, tile_id);
            }
        }
    }

    /// Get the tile coordinates for a world position.
    pub fn world_to_tile(&self, world_pos: Vec2) -> (i32, i32) {
        let local_x = world_pos.x - self.position.x;
        let local_y = world_pos.y - self.position.y;
        (
            (local_x / self.tile_size.x).floor() as i32,
            (local_y / self.tile_size.y).floor() as i32,
        )
    }

    /// World-space extent of a tile.
    pub fn tile_bounds(&self, x: u32, y: u32) -> Rect {
        let origin = Vec2::new(
            self.position.x + x as f32 * self.tile_size.x,
            self.position.y + y as f32 * self.tile_size.y,
        );
        Rect::from_dimensions(origin, self.tile_size)
    }

    /// Tile coordinate range (inclusive min, exclusive max) overlapping `region`.
    fn tile_range(&self, region: Rect) -> ((u32, u32), (u32, u32)) {
        let (width, height) = self.map_size;
        let (x0, y0) = self.world_to_tile(region.min);
        let (x1, y1) = self.world_to_tile(region.max);
        let clamp = |v: i32, max: u32| v.clamp(0, max as i32) as u32;
        (
            (clamp(x0, width), clamp(y0, height)),
            (clamp(x1 + 1, width), clamp(y1 + 1, height)),
        )
    }
}

/// A tile map world: tiles, lights and the player's position.
pub struct TileWorld {
    pub tilemap: Tilemap,
    pub lights: LightRegistry,
    defs: Vec<TileDef>,
    controlled: Option<Vec2>,
    background: [f32; 4],
}

impl TileWorld {
    pub fn new(tilemap: Tilemap) -> Self {
        Self {
            tilemap,
            lights: LightRegistry::new(),
            defs: Vec::new(),
            controlled: None,
            background: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Register a tile definition and return its tile ID.
    pub fn define_tile(&mut self, def: TileDef) -> u32 {
        self.defs.push(def);
        self.defs.len() as u32
    }

    pub fn tile_def(&self, id: u32) -> Option<&TileDef> {
        if id == 0 {
            return None;
        }
        self.defs.get(id as usize - 1)
    }

    /// Change one tile. Returns its world bounds, for geometry invalidation.
    pub fn set_tile(&mut self, x: u32, y: u32, tile_id: u32) -> Option<Rect> {
        self.tilemap.get_tile(x, y)?;
        self.tilemap.set_tile(x, y, tile_id);
        Some(self.tilemap.tile_bounds(x, y))
    }

    pub fn set_controlled(&mut self, position: Option<Vec2>) {
        self.controlled = position;
    }

    pub fn set_background(&mut self, color: [f32; 4]) {
        self.background = color;
    }

    fn is_opaque(&self, tile: Tile) -> bool {
        self.tile_def(tile.id).is_some_and(|def| def.opaque)
    }
}

impl WorldView for TileWorld {
    fn active_lights(&self) -> Vec<Light> {
        self.lights.iter().copied().collect()
    }

    fn occluders_intersecting(&self, region: Rect) -> Vec<Occluder> {
        let ((x0, y0), (x1, y1)) = self.tilemap.tile_range(region);
        let mut occluders = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                let Some(tile) = self.tilemap.get_tile(x, y) else {
                    continue;
                };
                let bounds = self.tilemap.tile_bounds(x, y);
                if self.is_opaque(tile) && bounds.intersects(&region) {
                    occluders.push(Occluder::rect(bounds));
                }
            }
        }
        occluders
    }

    fn tile_at(&self, position: Vec2) -> Option<TileRef> {
        let (x, y) = self.tilemap.world_to_tile(position);
        if x < 0 || y < 0 {
            return None;
        }
        let tile = self.tilemap.get_tile(x as u32, y as u32)?;
        Some(TileRef {
            coords: (x, y),
            bounds: self.tilemap.tile_bounds(x as u32, y as u32),
            opaque: self.is_opaque(tile),
        })
    }

    fn controlled_entity_position(&self) -> Option<Vec2> {
        self.controlled
    }

    fn draw_scene(&self, canvas: &mut Canvas<'_>) -> Result<()> {
        canvas.clear(self.background)?;
        let ((x0, y0), (x1, y1)) = self.tilemap.tile_range(canvas.viewport());
        for y in y0..y1 {
            for x in x0..x1 {
                let Some(tile) = self.tilemap.get_tile(x, y) else {
                    continue;
                };
                if let Some(def) = self.tile_def(tile.id) {
                    canvas.fill_rect(self.tilemap.tile_bounds(x, y), def.color)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walled_room() -> TileWorld {
        let mut world = TileWorld::new(Tilemap::new(Vec2::splat(32.0), (10, 10), Vec2::ZERO));
        let floor = world.define_tile(TileDef::floor("floor", [0.5; 4]));
        let wall = world.define_tile(TileDef::wall("wall", [0.2; 4]));
        world.tilemap.fill_rect(0, 0, 10, 10, floor);
        world.tilemap.fill_rect(4, 0, 1, 10, wall);
        world
    }

    #[test]
    fn tile_lookup_reports_opacity() {
        let world = walled_room();
        let wall = world.tile_at(Vec2::new(4.0 * 32.0 + 5.0, 40.0)).unwrap();
        assert!(wall.opaque);
        assert_eq!(wall.coords, (4, 1));
        assert_eq!(wall.bounds.min, Vec2::new(128.0, 32.0));
        assert!(!world.tile_at(Vec2::new(10.0, 10.0)).unwrap().opaque);
        assert!(world.tile_at(Vec2::new(-1.0, 10.0)).is_none());
        assert!(world.tile_at(Vec2::new(10.0, 320.0)).is_none());
    }

    #[test]
    fn only_opaque_tiles_become_occluders() {
        let world = walled_room();
        let region = Rect::from_dimensions(Vec2::new(100.0, 0.0), Vec2::new(64.0, 64.0));
        let occluders = world.occluders_intersecting(region);
        assert_eq!(occluders.len(), 2);
        assert!(occluders.iter().all(|o| o.bounds().min.x == 128.0));
    }

    #[test]
    fn set_tile_returns_changed_bounds() {
        let mut world = walled_room();
        let bounds = world.set_tile(2, 3, 0).unwrap();
        assert_eq!(bounds, Rect::from_dimensions(Vec2::new(64.0, 96.0), Vec2::splat(32.0)));
        assert!(world.set_tile(20, 3, 0).is_none());
    }
}
