//! Freeserf Core - Settlement Game Simulation Engine
//!
//! A deterministic, tick-driven simulation of a settlement economy. Serfs
//! walk a road network between flags, carry resources from producing
//! buildings to consumers, staff workplaces, and as knights garrison the
//! border and fight over it.
//!
//! # Architecture
//!
//! The simulation is a set of index-stable arenas owned by one `Game`:
//! - **Map**: terrain, heights, objects, road segments and land ownership
//! - **Flags**: road junctions with resource slots and transporter demand
//! - **Buildings**: construction, production stock and garrisons
//! - **Inventories**: stock of the castle and storehouses, idle serfs
//! - **Serfs**: one state machine per serf, updated every tick
//!
//! Every random decision draws from the game's own `GameRng`, so two games
//! started from the same map and seed stay identical tick for tick.
//!
//! # Example
//!
//! ```rust,no_run
//! use freeserf_core::prelude::*;
//!
//! let mut rng = GameRng::new(42);
//! let map = Map::generate_flat(3, &mut rng);
//! let mut game = Game::new(map, 42, GameOptions::default());
//! let player = game.add_player(PlayerSettings::default()).unwrap();
//!
//! let center = game.map().pos(32, 32);
//! game.build_castle(center, player).unwrap();
//!
//! // Run simulation
//! game.run(1000).unwrap();
//! ```

pub mod building;
pub mod collection;
pub mod config;
pub mod error;
pub mod flag;
pub mod game;
pub mod inventory;
pub mod map;
pub mod notification;
pub mod pathfinder;
pub mod persistence;
pub mod player;
pub mod random;
pub mod resource;
pub mod serf;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::building::{Building, BuildingType};
    pub use crate::collection::{BuildingId, FlagId, InventoryId, SerfId};
    pub use crate::config::{GameOptions, MapConfig, PlayerSettings};
    pub use crate::error::{GameError, GameResult};
    pub use crate::game::Game;
    pub use crate::inventory::InventoryMode;
    pub use crate::map::{Direction, Map, MapObject, MapPos};
    pub use crate::notification::NotificationKind;
    pub use crate::random::GameRng;
    pub use crate::resource::Resource;
    pub use crate::serf::{Serf, SerfState, SerfType};
}
