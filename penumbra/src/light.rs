use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Stable identity of a light for as long as it exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(u32);

impl LightId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the underlying integer ID (useful for debugging or serialization).
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightState {
    #[default]
    On,
    Off,
    Broken,
}

/// A point light as the lighting pipeline sees it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub id: LightId,
    /// Position of the light in world coordinates
    pub position: Vec2,
    /// How far the light reaches; picks the light's area tier
    pub radius: f32,
    /// RGB tint with intensity in alpha
    pub color: [f32; 4],
    pub state: LightState,
}

impl Light {
    pub fn is_on(&self) -> bool {
        self.state == LightState::On
    }
}

/// Owns every light in a world.
///
/// Iteration is ordered by [`LightId`], so frames are reproducible.
#[derive(Debug)]
pub struct LightRegistry {
    next_id: u32,
    lights: BTreeMap<LightId, Light>,
}

impl LightRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            lights: BTreeMap::new(),
        }
    }

    /// Spawn a light that starts switched on.
    pub fn spawn(&mut self, position: Vec2, radius: f32, color: [f32; 4]) -> LightId {
        let id = LightId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.lights.insert(
            id,
            Light {
                id,
                position,
                radius,
                color,
                state: LightState::On,
            },
        );
        id
    }

    /// Remove a light. Returns `false` if it did not exist.
    pub fn despawn(&mut self, id: LightId) -> bool {
        self.lights.remove(&id).is_some()
    }

    pub fn get(&self, id: LightId) -> Option<&Light> {
        self.lights.get(&id)
    }

    pub fn move_to(&mut self, id: LightId, position: Vec2) -> bool {
        self.update(id, |light| light.position = position)
    }

    pub fn set_radius(&mut self, id: LightId, radius: f32) -> bool {
        self.update(id, |light| light.radius = radius)
    }

    pub fn set_color(&mut self, id: LightId, color: [f32; 4]) -> bool {
        self.update(id, |light| light.color = color)
    }

    pub fn set_state(&mut self, id: LightId, state: LightState) -> bool {
        self.update(id, |light| light.state = state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Light> {
        self.lights.values()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    fn update(&mut self, id: LightId, f: impl FnOnce(&mut Light)) -> bool {
        match self.lights.get_mut(&id) {
            Some(light) => {
                f(light);
                true
            }
            None => false,
        }
    }
}

impl Default for LightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_iteration_is_ordered() {
        let mut registry = LightRegistry::new();
        let a = registry.spawn(Vec2::ZERO, 100.0, [1.0; 4]);
        let b = registry.spawn(Vec2::ONE, 200.0, [1.0; 4]);
        assert_ne!(a, b);
        let ids: Vec<_> = registry.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn updates_only_touch_live_lights() {
        let mut registry = LightRegistry::new();
        let id = registry.spawn(Vec2::ZERO, 100.0, [1.0; 4]);
        assert!(registry.set_state(id, LightState::Broken));
        assert!(!registry.get(id).unwrap().is_on());
        assert!(registry.despawn(id));
        assert!(!registry.move_to(id, Vec2::ONE));
        assert!(registry.is_empty());
    }
}
