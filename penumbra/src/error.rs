//! Error types for Penumbra

use thiserror::Error;

use crate::render::{SurfaceId, TextureHandle};

/// The main error type for lighting pipeline operations
#[derive(Debug, Error)]
pub enum LightingError {
    #[error("Missing required asset: {0}")]
    MissingAsset(String),

    #[error("Unknown surface: {0:?}")]
    UnknownSurface(SurfaceId),

    #[error("Unknown texture: {0:?}")]
    UnknownTexture(TextureHandle),

    #[error("Invalid surface size: {width}x{height}")]
    InvalidSurfaceSize { width: u32, height: u32 },

    #[error("Render device error: {0}")]
    Device(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for lighting operations
pub type Result<T> = std::result::Result<T, LightingError>;
