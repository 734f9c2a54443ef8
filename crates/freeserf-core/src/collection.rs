//! Typed entity ids and the index-stable arena that stores game objects.
//!
//! Every flag, building, inventory and serf lives in a `Collection` slot.
//! Slot 0 is never handed out so saved indices stay compatible with the
//! one-based numbering used on the map tiles. Iteration is always in
//! ascending index order, which is the order the tick loop updates
//! entities in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU32;

/// An id type usable as a `Collection` key.
pub trait EntityId: Copy + Eq + Ord + fmt::Debug {
    fn from_index(index: u32) -> Option<Self>;
    fn index(self) -> u32;
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub fn new(index: u32) -> Option<Self> {
                NonZeroU32::new(index).map(Self)
            }

            pub fn get(self) -> u32 {
                self.0.get()
            }
        }

        impl EntityId for $name {
            fn from_index(index: u32) -> Option<Self> {
                Self::new(index)
            }

            fn index(self) -> u32 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

entity_id!(
    /// Index of a serf.
    SerfId
);
entity_id!(
    /// Index of a flag.
    FlagId
);
entity_id!(
    /// Index of a building.
    BuildingId
);
entity_id!(
    /// Index of an inventory.
    InventoryId
);

/// Arena with stable indices, lowest-free allocation and ascending iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct Collection<I, T> {
    slots: Vec<Option<T>>,
    count: usize,
    #[serde(skip)]
    _marker: PhantomData<I>,
}

impl<I: EntityId, T> Default for Collection<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: EntityId, T> Collection<I, T> {
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            count: 0,
            _marker: PhantomData,
        }
    }

    /// Store a new object in the lowest unused slot. The builder gets the id
    /// the object will live under.
    pub fn allocate_with(&mut self, build: impl FnOnce(I) -> T) -> I {
        let index = self
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .unwrap_or(self.slots.len());
        if index == self.slots.len() {
            self.slots.push(None);
        }
        // Index 0 is skipped above, so this is never zero.
        let id = match I::from_index(index as u32) {
            Some(id) => id,
            None => unreachable!("collection slot 0 is reserved"),
        };
        self.slots[index] = Some(build(id));
        self.count += 1;
        id
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index() as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots
            .get_mut(id.index() as usize)
            .and_then(Option::as_mut)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Remove an object, returning it if it existed.
    pub fn erase(&mut self, id: I) -> Option<T> {
        let removed = self
            .slots
            .get_mut(id.index() as usize)
            .and_then(Option::take);
        if removed.is_some() {
            self.count -= 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Snapshot of live ids in ascending order. Callers that mutate the
    /// collection while walking it iterate over this list.
    pub fn ids(&self) -> Vec<I> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            let item = slot.as_ref()?;
            Some((I::from_index(i as u32)?, item))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let item = slot.as_mut()?;
            Some((I::from_index(i as u32)?, item))
        })
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_skips_zero_and_reuses_lowest_slot() {
        let mut c: Collection<FlagId, &str> = Collection::new();
        let a = c.allocate_with(|_| "a");
        let b = c.allocate_with(|_| "b");
        let d = c.allocate_with(|_| "d");
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(d.get(), 3);

        assert_eq!(c.erase(b), Some("b"));
        assert_eq!(c.len(), 2);
        let e = c.allocate_with(|id| if id.get() == 2 { "e" } else { "?" });
        assert_eq!(e.get(), 2);
        assert_eq!(c.get(e), Some(&"e"));
    }

    #[test]
    fn test_iteration_is_ascending() {
        let mut c: Collection<SerfId, u32> = Collection::new();
        for i in 0..5 {
            c.allocate_with(|_| i);
        }
        c.erase(SerfId::new(3).unwrap());
        let ids: Vec<u32> = c.ids().into_iter().map(|id| id.get()).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_zero_is_not_an_id() {
        assert!(BuildingId::new(0).is_none());
        assert!(InventoryId::new(7).is_some());
    }
}
