use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Debug captures of the player-vision light area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Capture the occluder silhouette before the shadow resolve.
    pub occluders: bool,
    /// Capture the resolved player shadow map.
    pub player_shadow_map: bool,
}

/// Tunables for the lighting pipeline.
///
/// Every field has a default, so a JSON file only needs the keys it changes:
///
/// ```json
/// { "blur_radius": 7, "full_vision": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Gaussian kernel radius in pixels, shared by the vision and light blurs.
    pub blur_radius: u32,
    /// Gaussian spread. Zero disables the blur.
    pub blur_amount: f32,
    /// Ambient floor added to the lightmap in the final blend.
    pub ambient: [f32; 4],
    /// Radius of the player's sight; picks the vision area tier.
    pub vision_radius: f32,
    /// Disable occlusion entirely and present the unlit scene.
    pub full_vision: bool,
    /// Compute the radius vision mask. When off, nothing is in view.
    pub player_vision: bool,
    pub debug: DebugConfig,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            blur_radius: 11,
            blur_amount: 2.0,
            ambient: [0.05, 0.05, 0.05, 1.0],
            vision_radius: 1024.0,
            full_vision: false,
            player_vision: true,
            debug: DebugConfig::default(),
        }
    }
}

impl LightingConfig {
    /// Parse a config from JSON. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize this config to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[must_use]
    pub fn with_blur(mut self, radius: u32, amount: f32) -> Self {
        self.blur_radius = radius;
        self.blur_amount = amount;
        self
    }

    #[must_use]
    pub fn with_ambient(mut self, ambient: [f32; 4]) -> Self {
        self.ambient = ambient;
        self
    }

    #[must_use]
    pub fn with_vision_radius(mut self, radius: f32) -> Self {
        self.vision_radius = radius;
        self
    }

    #[must_use]
    pub fn with_full_vision(mut self, full_vision: bool) -> Self {
        self.full_vision = full_vision;
        self
    }

    #[must_use]
    pub fn with_player_vision(mut self, player_vision: bool) -> Self {
        self.player_vision = player_vision;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = LightingConfig::from_json(r#"{ "blur_radius": 3, "debug": { "occluders": true } }"#)
            .unwrap();
        assert_eq!(config.blur_radius, 3);
        assert_eq!(config.blur_amount, 2.0);
        assert!(config.player_vision);
        assert!(config.debug.occluders);
        assert!(!config.debug.player_shadow_map);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = LightingConfig::from_json("{ blur_radius: }").unwrap_err();
        assert!(matches!(err, crate::LightingError::Config(_)));
    }

    #[test]
    fn json_survives_a_save_and_load() {
        let config = LightingConfig::default()
            .with_blur(5, 1.5)
            .with_full_vision(true);
        let parsed = LightingConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
