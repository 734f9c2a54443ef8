//! Game and player configuration.
//!
//! `GameOptions` holds rule toggles that differ between the classic game
//! and later balance changes. Options are plain serde data so hosts can
//! keep them in a JSON file next to their saves.

use serde::{Deserialize, Serialize};

/// Rule toggles and pacing for a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameOptions {
    /// Ticks advanced by each call to `Game::update`.
    pub game_speed: u32,
    /// Miners eat on 7 of 8 cycles instead of 1 of 8.
    pub high_miner_food_consumption: bool,
    /// Reject attack candidates whose walk to the target is a detour of more
    /// than `max_detour_ratio` times the straight-line distance.
    pub check_path_before_attack: bool,
    /// Detour ratio limit for walks off the road network. Applies to
    /// attack candidates (when `check_path_before_attack` is set), to the
    /// flag a lost serf heads for and the spots it wanders to, and to the
    /// trips workers and geologists plan to trees, stones, fields, fishing
    /// spots and mountains.
    pub max_detour_ratio: f64,
    /// Lost transporters and generics may retire into any finished
    /// friendly building instead of searching for a flag.
    pub lost_transporters_clear_faster: bool,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            game_speed: 2,
            high_miner_food_consumption: false,
            check_path_before_attack: true,
            max_detour_ratio: 3.0,
            lost_transporters_clear_faster: true,
        }
    }
}

impl GameOptions {
    /// Parse options from JSON; absent fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Food is consumed when the 3-bit roll lands on a consuming value.
    pub fn miner_eats(&self, roll: u16) -> bool {
        let r = roll & 7;
        if self.high_miner_food_consumption {
            r != 0
        } else {
            r == 0
        }
    }
}

/// Per-player starting setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// 0..=50 dial for the castle's starting stock.
    pub supplies: u32,
    /// 0..=60 dial for serf spawning speed.
    pub reproduction: u32,
    /// Display color index, kept for hosts.
    pub color: u8,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            supplies: 40,
            reproduction: 40,
            color: 0,
        }
    }
}

/// Map size and terrain seed for a new game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// 1..=10; size 3 is 64×64.
    pub size: u32,
    pub seed: u16,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self { size: 3, seed: 0x5a5a }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let opts = GameOptions::from_json(r#"{ "high_miner_food_consumption": true }"#)
            .expect("valid options");
        assert!(opts.high_miner_food_consumption);
        assert_eq!(opts.game_speed, 2);
        assert!((opts.max_detour_ratio - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_miner_food_probability() {
        let classic = GameOptions::default();
        let eats = (0..8u16).filter(|&r| classic.miner_eats(r)).count();
        assert_eq!(eats, 1);

        let hungry = GameOptions {
            high_miner_food_consumption: true,
            ..GameOptions::default()
        };
        let eats = (0..8u16).filter(|&r| hungry.miner_eats(r)).count();
        assert_eq!(eats, 7);
    }

    #[test]
    fn test_map_config_defaults() {
        let cfg: MapConfig = serde_json::from_str(r#"{ "seed": 7 }"#).expect("valid config");
        assert_eq!(cfg.size, 3);
        assert_eq!(cfg.seed, 7);
    }

    #[test]
    fn test_options_json_roundtrip() {
        let opts = GameOptions {
            game_speed: 4,
            ..GameOptions::default()
        };
        let text = opts.to_json().expect("serialize");
        assert_eq!(GameOptions::from_json(&text).expect("parse"), opts);
    }
}
