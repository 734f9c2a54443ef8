//! Recovery of serfs that lost their way: looking for a friendly flag,
//! wandering at random until one turns up, and escaping from buildings
//! that are torn down around them.

use super::{FreeWalk, Serf, SerfState, SerfType};
use crate::collection::SerfId;
use crate::error::GameResult;
use crate::game::Game;
use crate::map::{spiral_offset, MapObject, MapPos};

/// Spiral entries searched for a flag to head for.
const LOST_SEARCH_LEN: usize = 258;

/// Serfs that get out of a burning inventory alive.
const MAX_ESCAPING_SERFS: usize = 12;

/// Wandering radius and random picks tried at that radius.
const WANDER_TRIES: [(i32, u32); 3] = [(16, 10), (32, 19), (64, 19)];

/// Free walk from a lost serf toward an offset, ending with the search
/// for an inventory.
fn walk_home_from(dist_col: i32, dist_row: i32) -> FreeWalk {
    FreeWalk::new(dist_col, dist_row, FreeWalk::RETURNING, -1)
}

impl Game {
    fn lost_serf_walk(s: &mut Serf, walk: FreeWalk) {
        if s.is_knight() {
            s.set_state(SerfState::KnightFreeWalking(walk));
        } else {
            s.set_state(SerfState::FreeWalking(walk));
        }
        s.counter = 0;
    }

    /// An owned flag a lost serf can rejoin the road network at.
    fn is_rescue_flag(&self, pos: MapPos, owner: u8, sailing: bool) -> bool {
        if self.map.owner(pos) != Some(owner) {
            return false;
        }
        let Some(flag) = self.map.flag_at(pos).and_then(|id| self.flags.get(id)) else {
            return false;
        };
        flag.land_paths() != 0 || (!sailing && flag.has_inventory() && flag.accepts_serfs())
    }

    pub(super) fn handle_lost(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::Lost { search_far_first } = s.state else {
            return Ok(());
        };

        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }

        for i in 0..LOST_SEARCH_LEN {
            let index = if search_far_first { LOST_SEARCH_LEN - i } else { 1 + i };
            let dest = self.map.pos_add_spirally(s.pos, index);
            if self.is_rescue_flag(dest, s.owner, false) && self.free_walk_in_reach(s.pos, dest) {
                let (col, row) = spiral_offset(index);
                log::debug!("lost serf {} heads for the flag at {}", s.index, dest);
                s.was_lost = true;
                Self::lost_serf_walk(s, walk_home_from(col, row));
                return Ok(());
            }
        }

        // No flag nearby: wander off and look again from there.
        for &(size, tries) in &WANDER_TRIES {
            for _ in 0..tries {
                let r = self.random_int();
                let col = (r & (size - 1)) - size / 2;
                let row = ((r >> 8) & (size - 1)) - size / 2;
                let dest = self.map.pos_add(s.pos, col, row);
                let open = self.map.obj(dest) == MapObject::None && self.map.height(dest) > 0;
                let own_flag = self.map.has_flag(dest) && self.map.owner(dest) == Some(s.owner);
                if (open || own_flag) && self.free_walk_in_reach(s.pos, dest) {
                    s.was_lost = true;
                    Self::lost_serf_walk(s, walk_home_from(col, row));
                    return Ok(());
                }
            }
        }

        log::trace!("lost serf {} found nowhere to go", s.index);
        s.counter = 0;
        Ok(())
    }

    pub(super) fn handle_lost_sailor(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }

        for i in 0..LOST_SEARCH_LEN {
            let dest = self.map.pos_add_spirally(s.pos, i);
            if self.is_rescue_flag(dest, s.owner, true) {
                let (col, row) = spiral_offset(i);
                s.set_state(SerfState::FreeSailing(walk_home_from(col, row)));
                s.counter = 0;
                return Ok(());
            }
        }

        for _ in 0..64 {
            let r = self.random_int();
            let col = (r & 0x1f) - 16;
            let row = ((r >> 8) & 0x1f) - 16;
            let dest = self.map.pos_add(s.pos, col, row);
            if self.map.obj(dest) == MapObject::None {
                s.set_state(SerfState::FreeSailing(walk_home_from(col, row)));
                s.counter = 0;
                return Ok(());
            }
        }

        s.counter = 0;
        Ok(())
    }

    pub(super) fn handle_escape_building(&mut self, s: &mut Serf) -> GameResult<()> {
        if !self.map.has_serf(s.pos) {
            self.map.set_serf(s.pos, Some(s.index));
            s.animation = 82;
            s.counter = 0;
            s.tick = self.tick16();
            s.set_lost();
        }
        Ok(())
    }

    // ── Demolition hooks ────────────────────────────────────────────────

    /// A building at `pos` was removed. Up to twelve serfs resting inside
    /// escape onto the map, the rest die with it.
    pub(crate) fn serfs_building_deleted(&mut self, pos: MapPos, escape: bool) {
        let inside: Vec<_> = self
            .serfs
            .iter()
            .filter(|(_, s)| {
                s.pos == pos
                    && matches!(
                        s.state,
                        SerfState::IdleInStock { .. } | SerfState::ReadyToLeaveInventory { .. }
                    )
            })
            .map(|(id, _)| id)
            .collect();

        let mut escaped = 0;
        for id in inside {
            if escape && escaped < MAX_ESCAPING_SERFS {
                if let Some(s) = self.serfs.get_mut(id) {
                    s.set_state(SerfState::EscapeBuilding);
                    escaped += 1;
                }
            } else if let Some(mut s) = self.serfs.get(id).cloned() {
                self.set_serf_type(&mut s, SerfType::Dead);
                self.delete_serf(id);
            }
        }
    }

    /// The castle at `pos` fell. Its own transporters are sent off; the
    /// rest of the household follows through `serf_castle_deleted`.
    pub(crate) fn serfs_castle_deleted(&mut self, pos: MapPos) {
        let transporters: Vec<_> = self
            .serfs
            .iter()
            .filter(|(_, s)| s.pos == pos && s.serf_type == SerfType::TransporterInventory)
            .map(|(id, _)| id)
            .collect();
        for id in transporters {
            self.serf_castle_deleted(id, pos, true);
        }
    }

    /// A serf living in the building at `pos` loses its home. The one
    /// standing in the doorway is lost on the spot, others escape first.
    pub(crate) fn serf_castle_deleted(&mut self, id: SerfId, pos: MapPos, retype: bool) {
        let Some(mut s) = self.serfs.get(id).cloned() else {
            return;
        };
        if retype && s.serf_type == SerfType::TransporterInventory {
            self.set_serf_type(&mut s, SerfType::Transporter);
        }
        if self.map.serf_at(pos) == Some(id) {
            s.set_lost();
        } else {
            s.set_state(SerfState::EscapeBuilding);
        }
        if let Some(slot) = self.serfs.get_mut(id) {
            *slot = s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::game_with_castle;
    use crate::map::Direction;

    #[test]
    fn test_walk_home_from_marks_return() {
        let fw = walk_home_from(3, -2);
        assert_eq!((fw.dist_col, fw.dist_row), (3, -2));
        assert_eq!(fw.neg_dist_col, FreeWalk::RETURNING);
        assert!(fw.neg_dist_row < 0);
        assert_eq!(fw.flags, 0);
    }

    #[test]
    fn test_wander_radius_grows() {
        let sizes: Vec<i32> = WANDER_TRIES.iter().map(|&(size, _)| size).collect();
        assert!(sizes.windows(2).all(|w| w[1] == 2 * w[0]));
        assert!(sizes.iter().all(|size| size.count_ones() == 1));
    }

    fn lost_next_to_road(ty: SerfType) -> Serf {
        let (mut game, center) = game_with_castle();
        let castle_flag = game.map.move_down_right(center);
        let far_flag = game.map.pos_add(castle_flag, 4, 0);
        game.build_flag(far_flag, 0).expect("flag");
        game.build_road(castle_flag, &[Direction::Right; 4], 0).expect("road");

        let pos = game.map.move_pos(far_flag, Direction::Down);
        let id = game.create_serf(0, ty, pos);
        let mut s = game.serfs.get(id).cloned().expect("serf");
        s.set_lost();
        s.counter = -1;
        game.handle_lost(&mut s).expect("lost");
        s
    }

    #[test]
    fn test_lost_serf_heads_for_nearby_flag() {
        let s = lost_next_to_road(SerfType::Transporter);
        let SerfState::FreeWalking(walk) = s.state else {
            panic!("expected free walking, got {}", s.state.name());
        };
        assert!(s.was_lost);
        assert!(walk.dist_col.abs() <= 1 && walk.dist_row.abs() <= 1);
    }

    /// Where a lost serf east of a lake, with the castle flag on the far
    /// shore, decides to walk for the given detour limit.
    fn lost_target_across_lake(max_ratio: f64) -> (Option<MapPos>, MapPos) {
        let (mut game, center) = game_with_castle();
        game.options.max_detour_ratio = max_ratio;
        let castle_flag = game.map.move_down_right(center);
        game.map.add_lake(game.map.pos_add(castle_flag, 4, 0), 2, 0);

        let pos = game.map.pos_add(castle_flag, 8, 0);
        let id = game.create_serf(0, SerfType::Transporter, pos);
        let mut s = game.serfs.get(id).cloned().expect("serf");
        s.set_lost();
        s.counter = -1;
        game.handle_lost(&mut s).expect("lost");

        let target = match s.state {
            SerfState::FreeWalking(walk) => Some(game.map.pos_add(pos, walk.dist_col, walk.dist_row)),
            _ => None,
        };
        (target, castle_flag)
    }

    #[test]
    fn test_lost_serf_skips_flag_behind_lake() {
        let (target, castle_flag) = lost_target_across_lake(1.0);
        assert_ne!(target, Some(castle_flag));
    }

    #[test]
    fn test_lost_serf_walks_around_short_lake() {
        let (target, castle_flag) = lost_target_across_lake(3.0);
        assert_eq!(target, Some(castle_flag));
    }

    #[test]
    fn test_lost_knight_walks_as_knight() {
        let s = lost_next_to_road(SerfType::Knight2);
        assert!(matches!(s.state, SerfState::KnightFreeWalking(_)));
    }
}
