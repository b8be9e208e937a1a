//! The stages of the lighting pipeline, leaf first.
//!
//! Each stage only talks to a [`RenderDevice`](crate::render::RenderDevice) and
//! can be driven on its own; [`FrameDriver`](crate::driver::FrameDriver) wires
//! them together in frame order.

pub mod area;
pub mod batch;
pub mod blur;
pub mod compose;
pub mod shadow;
pub mod vision;

pub use area::{InvalidationReason, LightArea, LightAreaCache, ShadowTier};
pub use batch::{BatchReport, LightBatcher};
pub use blur::GaussianBlur;
pub use compose::SceneCompositor;
pub use shadow::ShadowMapResolver;
pub use vision::PlayerVision;
