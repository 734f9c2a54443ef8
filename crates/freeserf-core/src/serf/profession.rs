//! Serf professions and the tools each one is made from.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SerfType {
    Transporter = 0,
    Sailor,
    Digger,
    Builder,
    /// Transporter living in an inventory, moving goods out to its flag.
    TransporterInventory,
    Lumberjack,
    Sawmiller,
    Stonecutter,
    Forester,
    Miner,
    Smelter,
    Fisher,
    PigFarmer,
    Butcher,
    Farmer,
    Miller,
    Baker,
    BoatBuilder,
    Toolmaker,
    WeaponSmith,
    Geologist,
    Generic,
    Knight0,
    Knight1,
    Knight2,
    Knight3,
    Knight4,
    Dead,
}

/// Number of serf types tracked by inventories and players.
pub const SERF_TYPE_COUNT: usize = 27;

impl SerfType {
    pub const ALL: [SerfType; SERF_TYPE_COUNT] = [
        SerfType::Transporter,
        SerfType::Sailor,
        SerfType::Digger,
        SerfType::Builder,
        SerfType::TransporterInventory,
        SerfType::Lumberjack,
        SerfType::Sawmiller,
        SerfType::Stonecutter,
        SerfType::Forester,
        SerfType::Miner,
        SerfType::Smelter,
        SerfType::Fisher,
        SerfType::PigFarmer,
        SerfType::Butcher,
        SerfType::Farmer,
        SerfType::Miller,
        SerfType::Baker,
        SerfType::BoatBuilder,
        SerfType::Toolmaker,
        SerfType::WeaponSmith,
        SerfType::Geologist,
        SerfType::Generic,
        SerfType::Knight0,
        SerfType::Knight1,
        SerfType::Knight2,
        SerfType::Knight3,
        SerfType::Knight4,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<SerfType> {
        Self::ALL.get(i).copied()
    }

    pub fn is_knight(self) -> bool {
        (SerfType::Knight0..=SerfType::Knight4).contains(&self)
    }

    /// Knight rank 0..=4.
    pub fn knight_level(self) -> Option<u8> {
        self.is_knight()
            .then(|| self as u8 - SerfType::Knight0 as u8)
    }

    pub fn knight(level: u8) -> SerfType {
        match level {
            0 => SerfType::Knight0,
            1 => SerfType::Knight1,
            2 => SerfType::Knight2,
            3 => SerfType::Knight3,
            _ => SerfType::Knight4,
        }
    }

    /// Next knight rank; `Knight4` stays.
    pub fn promoted(self) -> SerfType {
        match self.knight_level() {
            Some(l) => SerfType::knight(l + 1),
            None => self,
        }
    }

    /// Tools or weapons consumed when a generic serf takes this profession.
    pub fn tools_needed(self) -> &'static [Resource] {
        use Resource::*;
        match self {
            SerfType::Sailor => &[Boat],
            SerfType::Digger => &[Shovel],
            SerfType::Builder | SerfType::BoatBuilder | SerfType::Geologist => &[Hammer],
            SerfType::Lumberjack => &[Axe],
            SerfType::Sawmiller => &[Saw],
            SerfType::Stonecutter | SerfType::Miner => &[Pick],
            SerfType::Fisher => &[Rod],
            SerfType::Butcher => &[Cleaver],
            SerfType::Farmer => &[Scythe],
            SerfType::Toolmaker => &[Hammer, Saw],
            SerfType::WeaponSmith => &[Hammer, Pincer],
            SerfType::Knight0 => &[Sword, Shield],
            _ => &[],
        }
    }

    /// Type counted in player statistics.
    pub fn counted_as(self) -> SerfType {
        match self {
            SerfType::TransporterInventory => SerfType::Transporter,
            t => t,
        }
    }
}

impl fmt::Display for SerfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knight_ranks() {
        assert_eq!(SerfType::Knight2.knight_level(), Some(2));
        assert_eq!(SerfType::Generic.knight_level(), None);
        assert_eq!(SerfType::Knight3.promoted(), SerfType::Knight4);
        assert_eq!(SerfType::Knight4.promoted(), SerfType::Knight4);
    }

    #[test]
    fn test_tools_needed() {
        assert_eq!(SerfType::Toolmaker.tools_needed(), &[Resource::Hammer, Resource::Saw]);
        assert!(SerfType::Forester.tools_needed().is_empty());
        assert_eq!(SerfType::ALL.len(), SERF_TYPE_COUNT);
    }
}
