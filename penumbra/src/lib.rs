//! Penumbra - per-light shadow casting and player vision for top-down tile games.
//!
//! Lights cast shadows into cached areas, the areas are accumulated into a
//! lightmap six at a time, and the lit scene is blended with the player's
//! vision mask. [`FrameDriver`] runs the whole pipeline against any
//! [`RenderDevice`].

pub mod assets;
pub mod config;
pub mod driver;
pub mod error;
pub mod light;
pub mod lighting;
pub mod math;
pub mod render;
pub mod tilemap;
pub mod world;

pub use crate::assets::AssetManager;
pub use crate::config::{DebugConfig, LightingConfig};
pub use crate::driver::{FrameDriver, FrameOutcome, SkipReason};
pub use crate::error::{LightingError, Result};
pub use crate::light::{Light, LightId, LightRegistry, LightState};
pub use crate::lighting::{
    GaussianBlur, InvalidationReason, LightAreaCache, LightBatcher, PlayerVision, SceneCompositor,
    ShadowMapResolver, ShadowTier,
};
pub use crate::math::{Camera2D, Rect, Vec2};
pub use crate::render::{GpuDevice, RenderDevice, SoftwareDevice, SurfaceId, TextureHandle};
pub use crate::tilemap::{TileDef, TileWorld, Tilemap};
pub use crate::world::{Canvas, Occluder, TileRef, WorldView};
