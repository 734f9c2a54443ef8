//! Player notifications posted by the simulation.
//!
//! The core only queues messages; presenting them is up to the host.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::map::MapPos;

/// Messages kept per player before the oldest is dropped.
pub const MAX_PENDING_NOTIFICATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// One of our buildings is being attacked by `data`.
    UnderAttack,
    /// Our knight lost a fight against `data`.
    LostFight,
    /// Our knight won a fight against `data`.
    VictoryFight,
    /// A mine ran out; `data` is the mine kind, 0 stone to 3 gold.
    MineEmpty,
    /// A timer set by the host expired.
    CallToLocation,
    /// A knight occupied a military building; `data` is 0 hut to 2 fortress.
    KnightOccupied,
    NewStock,
    LostLand,
    LostBuildings,
    FoundGold,
    FoundIron,
    FoundCoal,
    FoundStone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub pos: MapPos,
    pub data: u32,
}

/// Bounded FIFO of notifications for one player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationQueue {
    pending: VecDeque<Notification>,
}

impl NotificationQueue {
    pub fn push(&mut self, kind: NotificationKind, pos: MapPos, data: u32) {
        if self.pending.len() >= MAX_PENDING_NOTIFICATIONS {
            self.pending.pop_front();
        }
        self.pending.push_back(Notification { kind, pos, data });
    }

    pub fn pop(&mut self) -> Option<Notification> {
        self.pending.pop_front()
    }

    pub fn peek(&self) -> Option<&Notification> {
        self.pending.front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.pending.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let mut q = NotificationQueue::default();
        for i in 0..(MAX_PENDING_NOTIFICATIONS as u32 + 3) {
            q.push(NotificationKind::NewStock, i, 0);
        }
        assert_eq!(q.len(), MAX_PENDING_NOTIFICATIONS);
        assert_eq!(q.peek().map(|n| n.pos), Some(3));
        assert_eq!(q.pop().map(|n| n.kind), Some(NotificationKind::NewStock));
    }
}
