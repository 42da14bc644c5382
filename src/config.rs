use serde::{Deserialize, Serialize};

/// Tunables for a [`Character`](crate::Character).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    /// Lowest volume the device accepts.
    pub volume_floor: u8,
    /// Highest volume the device accepts.
    pub volume_ceiling: u8,
    /// Volume established at initialize.
    pub default_volume: u8,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            volume_floor: 0,
            volume_ceiling: 100,
            default_volume: 50,
        }
    }
}

impl CharacterConfig {
    /// Clamp a requested volume into the device range.
    pub fn clamp_volume(&self, requested: i32) -> u8 {
        requested.clamp(self.volume_floor as i32, self.volume_ceiling as i32) as u8
    }
}
