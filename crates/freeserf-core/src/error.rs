//! Error types for the simulation.
//!
//! Conditions a serf can recover from (a destination flag demolished, a
//! building burnt down on approach) never surface here; the serf becomes
//! `Lost` instead. `GameError` is reserved for structural violations that
//! would desynchronise a deterministic game if ignored, and for rejected
//! player commands.

use thiserror::Error;

use crate::collection::{BuildingId, FlagId, InventoryId, SerfId};
use crate::map::MapPos;
use crate::resource::Resource;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GameError {
    #[error("building {building} received {resource:?} which it never requested")]
    UnexpectedResource {
        building: BuildingId,
        resource: Resource,
    },

    #[error("building {0} has no inventory")]
    MissingInventory(BuildingId),

    #[error("inventory {inventory} has no {resource:?} to queue")]
    EmptyQueueResource {
        inventory: InventoryId,
        resource: Resource,
    },

    #[error("building {building} cancelled more {resource:?} than it requested")]
    RequestUnderflow {
        building: BuildingId,
        resource: Resource,
    },

    #[error("flag {0} has no free slot for an outgoing resource")]
    FlagFull(FlagId),

    #[error("serf {0} does not exist")]
    NoSuchSerf(SerfId),

    #[error("flag {0} does not exist")]
    NoSuchFlag(FlagId),

    #[error("building {0} does not exist")]
    NoSuchBuilding(BuildingId),

    #[error("inventory {0} does not exist")]
    NoSuchInventory(InventoryId),

    #[error("player {0} does not exist")]
    NoSuchPlayer(usize),

    #[error("position {0} is outside the map")]
    InvalidPosition(MapPos),

    #[error("cannot build {what} at position {pos}")]
    CannotBuild { what: &'static str, pos: MapPos },

    #[error("cannot demolish {what} at position {pos}")]
    CannotDemolish { what: &'static str, pos: MapPos },

    #[error("invalid random state string {0:?}")]
    InvalidRandomState(String),
}

pub type GameResult<T> = Result<T, GameError>;
