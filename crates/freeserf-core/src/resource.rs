//! Resource types carried between flags, buildings and inventories.

use serde::{Deserialize, Serialize};

/// A transportable resource. `GroupFood` only ever appears as a building
/// stock type and is satisfied by fish, meat or bread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Resource {
    Fish = 0,
    Pig,
    Meat,
    Wheat,
    Flour,
    Bread,
    Lumber,
    Plank,
    Boat,
    Stone,
    IronOre,
    Steel,
    Coal,
    GoldOre,
    GoldBar,
    Shovel,
    Hammer,
    Rod,
    Cleaver,
    Scythe,
    Axe,
    Saw,
    Pick,
    Pincer,
    Sword,
    Shield,
    GroupFood,
}

/// Number of concrete resource types.
pub const RESOURCE_COUNT: usize = 26;

impl Resource {
    /// All concrete resources in index order.
    pub const ALL: [Resource; RESOURCE_COUNT] = [
        Resource::Fish,
        Resource::Pig,
        Resource::Meat,
        Resource::Wheat,
        Resource::Flour,
        Resource::Bread,
        Resource::Lumber,
        Resource::Plank,
        Resource::Boat,
        Resource::Stone,
        Resource::IronOre,
        Resource::Steel,
        Resource::Coal,
        Resource::GoldOre,
        Resource::GoldBar,
        Resource::Shovel,
        Resource::Hammer,
        Resource::Rod,
        Resource::Cleaver,
        Resource::Scythe,
        Resource::Axe,
        Resource::Saw,
        Resource::Pick,
        Resource::Pincer,
        Resource::Sword,
        Resource::Shield,
    ];

    pub fn from_index(i: usize) -> Option<Resource> {
        Self::ALL.get(i).copied()
    }

    /// Table index of a concrete resource; `None` for `GroupFood`.
    pub fn index(self) -> Option<usize> {
        match self {
            Resource::GroupFood => None,
            r => Some(r as usize),
        }
    }

    pub fn is_food(self) -> bool {
        matches!(self, Resource::Fish | Resource::Meat | Resource::Bread)
    }

    pub fn is_tool(self) -> bool {
        (Resource::Shovel..=Resource::Pincer).contains(&self)
    }

    pub fn is_weapon(self) -> bool {
        matches!(self, Resource::Sword | Resource::Shield)
    }

    /// Whether the resource accepts building slots typed `stock`.
    pub fn matches_stock(self, stock: Resource) -> bool {
        self == stock || (stock == Resource::GroupFood && self.is_food())
    }

    /// Collapse food to the food group, as building requests are made.
    pub fn requested_type(self) -> Resource {
        if self.is_food() {
            Resource::GroupFood
        } else {
            self
        }
    }
}

/// Per-resource counters indexed by `Resource`.
pub type ResourceTable = [u32; RESOURCE_COUNT];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_dense() {
        for (i, r) in Resource::ALL.iter().enumerate() {
            assert_eq!(r.index(), Some(i));
            assert_eq!(Resource::from_index(i), Some(*r));
        }
        assert_eq!(Resource::GroupFood.index(), None);
    }

    #[test]
    fn test_food_group_matching() {
        assert!(Resource::Meat.matches_stock(Resource::GroupFood));
        assert!(!Resource::Pig.matches_stock(Resource::GroupFood));
        assert!(Resource::Plank.matches_stock(Resource::Plank));
        assert_eq!(Resource::Bread.requested_type(), Resource::GroupFood);
    }

    #[test]
    fn test_tool_ranges() {
        assert!(Resource::Shovel.is_tool());
        assert!(Resource::Pincer.is_tool());
        assert!(!Resource::Sword.is_tool());
        assert!(Resource::Shield.is_weapon());
    }
}
