use glam::Mat4;
use serde::{Deserialize, Serialize};

/// 2D vector type used throughout Penumbra.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };
    pub const ONE: Self = Self { x: 1.0, y: 1.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn splat(v: f32) -> Self {
        Self { x: v, y: v }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Returns a vector with component-wise minimum values.
    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y))
    }

    /// Returns a vector with component-wise maximum values.
    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y))
    }
}

impl From<(f32, f32)> for Vec2 {
    fn from(value: (f32, f32)) -> Self {
        Self {
            x: value.0,
            y: value.1,
        }
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f32> for Vec2 {
    type Output = Self;

    fn div(self, rhs: f32) -> Self::Output {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle in world space (`min` is the top-left corner).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Rectangle from a top-left corner and a size.
    pub fn from_dimensions(origin: Vec2, size: Vec2) -> Self {
        Self::new(origin, origin + size)
    }

    /// Rectangle of `size` centered on `center`.
    pub fn from_center(center: Vec2, size: Vec2) -> Self {
        let half = size * 0.5;
        Self::new(center - half, center + half)
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// True when the point lies inside the rectangle (max edges exclusive).
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x < self.max.x && point.y >= self.min.y && point.y < self.max.y
    }

    /// True when the two rectangles overlap with a non-zero area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    /// The four corners in clockwise order starting at `min`.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ]
    }
}

/// Camera representing a simple 2D view centered on `position`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera2D {
    pub position: Vec2,
    pub zoom: f32,
}

impl Camera2D {
    pub fn new(position: Vec2) -> Self {
        Self {
            position,
            zoom: 1.0,
        }
    }

    /// Pixel-space orthographic projection for a target of the given size.
    pub fn pixel_projection(width: u32, height: u32) -> Mat4 {
        Mat4::orthographic_rh_gl(0.0, width as f32, height as f32, 0.0, -1.0, 1.0)
    }

    /// Converts screen coordinates to world coordinates using this camera.
    pub fn screen_to_world(&self, screen_pos: Vec2, screen_width: u32, screen_height: u32) -> Vec2 {
        let half = Vec2::new(screen_width as f32 * 0.5, screen_height as f32 * 0.5);
        (screen_pos - half) / self.zoom + self.position
    }

    /// Converts world coordinates to screen coordinates using this camera.
    pub fn world_to_screen(&self, world_pos: Vec2, screen_width: u32, screen_height: u32) -> Vec2 {
        let half = Vec2::new(screen_width as f32 * 0.5, screen_height as f32 * 0.5);
        (world_pos - self.position) * self.zoom + half
    }

    /// World-space rectangle covered by a screen of the given size.
    pub fn world_viewport(&self, screen_width: u32, screen_height: u32) -> Rect {
        let size = Vec2::new(screen_width as f32, screen_height as f32) / self.zoom;
        Rect::from_center(self.position, size)
    }
}

impl Default for Camera2D {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            zoom: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_and_screen_round_trip_through_camera() {
        let camera = Camera2D {
            position: Vec2::new(100.0, 50.0),
            zoom: 2.0,
        };
        let screen = camera.world_to_screen(Vec2::new(110.0, 40.0), 200, 100);
        assert_eq!(screen, Vec2::new(120.0, 30.0));
        assert_eq!(camera.screen_to_world(screen, 200, 100), Vec2::new(110.0, 40.0));
    }

    #[test]
    fn pixel_projection_maps_corners_to_clip_space() {
        let projection = Camera2D::pixel_projection(200, 100);
        let top_left = projection.project_point3(glam::Vec3::ZERO);
        let bottom_right = projection.project_point3(glam::Vec3::new(200.0, 100.0, 0.0));
        assert!((top_left.x + 1.0).abs() < 1e-6 && (top_left.y - 1.0).abs() < 1e-6);
        assert!((bottom_right.x - 1.0).abs() < 1e-6 && (bottom_right.y + 1.0).abs() < 1e-6);
    }

    #[test]
    fn camera_center_maps_to_screen_center() {
        let camera = Camera2D::new(Vec2::new(-32.0, 64.0));
        assert_eq!(camera.world_to_screen(camera.position, 640, 480), Vec2::new(320.0, 240.0));
    }

    #[test]
    fn touching_rects_do_not_intersect() {
        let a = Rect::from_dimensions(Vec2::ZERO, Vec2::new(32.0, 32.0));
        let b = Rect::from_dimensions(Vec2::new(32.0, 0.0), Vec2::new(32.0, 32.0));
        let c = Rect::from_dimensions(Vec2::new(31.0, 31.0), Vec2::new(4.0, 4.0));
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
    }

    #[test]
    fn rect_normalizes_inverted_corners() {
        let r = Rect::new(Vec2::new(10.0, 10.0), Vec2::new(-10.0, 0.0));
        assert_eq!(r.min, Vec2::new(-10.0, 0.0));
        assert_eq!(r.width(), 20.0);
        assert!(r.contains(Vec2::new(0.0, 5.0)));
        assert!(!r.contains(Vec2::new(10.0, 5.0)));
    }
}
