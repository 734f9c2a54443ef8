//! Off-road walking and the outdoor jobs done at the end of a walk.
//!
//! A free walk heads for a column/row offset. When the way ahead is
//! blocked the walker follows the edge of the obstacle, remembering in
//! `FreeWalk::flags` which edge it follows and how far it has turned.
//! Layout of `flags`: bits 0-2 the last edge direction plus one, bit 3
//! the left-hand edge (or "arrived" when bits 0-2 are clear), bits 4-7
//! the accumulated turn.

use super::{anim_counter, one_step_dir, walking_animation, Entry, FreeWalk, Serf, SerfState, SerfType};
use crate::error::{GameError, GameResult};
use crate::game::Game;
use crate::map::{Direction as D, MapObject, MapPos, Space};
use crate::resource::Resource;

/// Preference order when keeping an obstacle on the right hand, by the
/// edge direction taken last.
const RIGHT_EDGE: [[D; 6]; 6] = [
    [D::Down, D::DownRight, D::Right, D::Up, D::UpLeft, D::Left],
    [D::Left, D::Down, D::DownRight, D::Right, D::Up, D::UpLeft],
    [D::UpLeft, D::Left, D::Down, D::DownRight, D::Right, D::Up],
    [D::Up, D::UpLeft, D::Left, D::Down, D::DownRight, D::Right],
    [D::Right, D::Up, D::UpLeft, D::Left, D::Down, D::DownRight],
    [D::DownRight, D::Right, D::Up, D::UpLeft, D::Left, D::Down],
];

const LEFT_EDGE: [[D; 6]; 6] = [
    [D::UpLeft, D::Up, D::Right, D::DownRight, D::Down, D::Left],
    [D::Up, D::Right, D::DownRight, D::Down, D::Left, D::UpLeft],
    [D::Right, D::DownRight, D::Down, D::Left, D::UpLeft, D::Up],
    [D::DownRight, D::Down, D::Left, D::UpLeft, D::Up, D::Right],
    [D::Down, D::Left, D::UpLeft, D::Up, D::Right, D::DownRight],
    [D::Left, D::UpLeft, D::Up, D::Right, D::DownRight, D::Down],
];

/// Preference order for moving forward, for each of twelve sectors of
/// the remaining offset.
const FORWARD: [[D; 6]; 12] = [
    [D::Up, D::UpLeft, D::Right, D::Left, D::DownRight, D::Down],
    [D::UpLeft, D::Up, D::Left, D::Right, D::Down, D::DownRight],
    [D::UpLeft, D::Left, D::Up, D::Down, D::Right, D::DownRight],
    [D::Left, D::UpLeft, D::Down, D::Up, D::DownRight, D::Right],
    [D::Left, D::Down, D::UpLeft, D::DownRight, D::Up, D::Right],
    [D::Down, D::Left, D::DownRight, D::UpLeft, D::Right, D::Up],
    [D::Down, D::DownRight, D::Left, D::Right, D::UpLeft, D::Up],
    [D::DownRight, D::Down, D::Right, D::Left, D::Up, D::UpLeft],
    [D::DownRight, D::Right, D::Down, D::Up, D::Left, D::UpLeft],
    [D::Right, D::DownRight, D::Up, D::Down, D::UpLeft, D::Left],
    [D::Right, D::Up, D::DownRight, D::UpLeft, D::Down, D::Left],
    [D::Up, D::Right, D::UpLeft, D::DownRight, D::Left, D::Down],
];

/// Flag marking arrival at the walk destination.
const ARRIVED: i32 = 1 << 3;

/// Sector of the remaining offset, choosing a row of `FORWARD`.
fn forward_sector(d1: i32, d2: i32) -> usize {
    if d1 < 0 {
        if d2 < 0 {
            if -d2 < -d1 {
                if -2 * d2 < -d1 {
                    3
                } else {
                    2
                }
            } else if -d2 < -2 * d1 {
                1
            } else {
                0
            }
        } else if d2 >= -d1 {
            5
        } else {
            4
        }
    } else if d2 < 0 {
        if -d2 >= d1 {
            11
        } else {
            10
        }
    } else if d2 < d1 {
        if 2 * d2 < d1 {
            9
        } else {
            8
        }
    } else if d2 < 2 * d1 {
        7
    } else {
        6
    }
}

/// How a free walker moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walker {
    Land,
    Knight,
    Sailing,
}

impl SerfState {
    /// The off-road walk data of states that carry one.
    pub(crate) fn free_walk(&self) -> Option<FreeWalk> {
        use SerfState::*;
        match *self {
            FreeWalking(fw)
            | Logging(fw)
            | Planting(fw)
            | StoneCutterFreeWalking(fw)
            | StoneCutting(fw)
            | FreeSailing(fw)
            | Fishing(fw)
            | Farming(fw)
            | SamplingGeoSpot(fw)
            | KnightFreeWalking(fw)
            | KnightAttackingFreeWait(fw)
            | KnightLeaveForWalkToFight(fw) => Some(fw),
            _ => None,
        }
    }

    pub(crate) fn free_walk_mut(&mut self) -> Option<&mut FreeWalk> {
        use SerfState::*;
        match self {
            FreeWalking(fw)
            | Logging(fw)
            | Planting(fw)
            | StoneCutterFreeWalking(fw)
            | StoneCutting(fw)
            | FreeSailing(fw)
            | Fishing(fw)
            | Farming(fw)
            | SamplingGeoSpot(fw)
            | KnightFreeWalking(fw)
            | KnightAttackingFreeWait(fw)
            | KnightLeaveForWalkToFight(fw) => Some(fw),
            _ => None,
        }
    }
}

fn fw(s: &Serf) -> FreeWalk {
    s.state.free_walk().unwrap_or_default()
}

fn with_fw(s: &mut Serf, f: impl FnOnce(&mut FreeWalk)) {
    if let Some(fw) = s.state.free_walk_mut() {
        f(fw);
    }
}

/// Head back toward the start of the walk.
fn turn_back(s: &mut Serf, carrying: i32) {
    with_fw(s, |fw| {
        fw.neg_dist_col = FreeWalk::RETURNING;
        fw.neg_dist_row = carrying;
        fw.flags = 0;
    });
    s.counter = 0;
}

/// Swap the walk target with the way back.
fn target_reached(s: &mut Serf) {
    with_fw(s, |fw| {
        fw.dist_col = fw.neg_dist_col;
        fw.dist_row = fw.neg_dist_row;
    });
}

/// Walk back out of a worksite: `FreeWalking` toward the building.
fn walk_back(s: &mut Serf, carrying: i32) {
    let back = FreeWalk {
        neg_dist_col: FreeWalk::RETURNING,
        neg_dist_row: carrying,
        flags: 0,
        ..fw(s)
    };
    s.set_state(SerfState::FreeWalking(back));
    s.counter = 0;
}

impl Game {
    /// Objects that leave room to walk past.
    pub(crate) fn can_pass(&self, pos: MapPos) -> bool {
        self.map.obj(pos).space() <= Space::Semipassable
    }

    /// Whether a free walk from `from` can reach `dest` on land within
    /// the detour limit. Targets across water that would need a long walk
    /// around the shore are refused when the walk is planned.
    pub(crate) fn free_walk_in_reach(&self, from: MapPos, dest: MapPos) -> bool {
        crate::pathfinder::is_reachable_within_ratio(&self.map, from, dest, self.options.max_detour_ratio)
    }

    fn can_walk_to(&self, pos: MapPos, walker: Walker) -> bool {
        let free = match walker {
            Walker::Sailing => self.map.obj(pos) == MapObject::None,
            _ => !self.map.is_in_water(pos) && self.can_pass(pos),
        };
        free && !self.map.has_serf(pos)
    }

    fn walker_of(s: &Serf) -> Walker {
        match s.state {
            SerfState::FreeSailing(_) => Walker::Sailing,
            SerfState::KnightFreeWalking(_) => Walker::Knight,
            _ => Walker::Land,
        }
    }

    fn free_walk_step(&mut self, s: &mut Serf, dir: D) {
        let (dx, dy) = dir.offset();
        with_fw(s, |fw| {
            fw.dist_col -= dx;
            fw.dist_row -= dy;
        });
        self.start_walking(s, dir, 32, true);
        with_fw(s, |fw| {
            if fw.dist_col == 0 && fw.dist_row == 0 {
                fw.flags = ARRIVED;
            }
        });
    }

    /// Nowhere free to step: trade places with a neighbour waiting to
    /// come this way, or wait.
    fn free_walk_switch_with_other(&mut self, s: &mut Serf) {
        for dir in D::ALL {
            let new_pos = self.map.move_pos(s.pos, dir);
            let Some(other_id) = self.map.serf_at(new_pos) else {
                continue;
            };
            if other_id == s.index {
                continue;
            }
            let rev = dir.reverse();
            let h_back = self.map.height(s.pos) - self.map.height(new_pos);
            let switched = match self.serfs.get_mut(other_id) {
                Some(other) if other.is_waiting() == Some(Some(rev)) => {
                    if other.switch_waiting(rev) {
                        other.animation = walking_animation(h_back, rev, true);
                        other.counter = anim_counter(other.animation);
                        other.pos = s.pos;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };
            if !switched {
                continue;
            }

            let (dx, dy) = dir.offset();
            with_fw(s, |fw| {
                fw.dist_col -= dx;
                fw.dist_row -= dy;
                if fw.dist_col == 0 && fw.dist_row == 0 {
                    fw.flags = ARRIVED;
                }
            });
            self.map.set_serf(s.pos, Some(other_id));
            self.map.set_serf(new_pos, Some(s.index));
            s.animation = walking_animation(-h_back, dir, true);
            s.counter = anim_counter(s.animation);
            s.pos = new_pos;
            return;
        }

        s.animation = 82;
        s.counter = anim_counter(82);
    }

    /// Continue along an obstacle edge. Returns false when the walker
    /// should try heading straight again.
    fn free_walk_follow_edge(&mut self, s: &mut Serf, walker: Walker) -> bool {
        let walk = fw(s);
        let table = if walk.flags & ARRIVED != 0 { &LEFT_EDGE } else { &RIGHT_EDGE };
        let row = ((walk.flags & 7) - 1).clamp(0, 5) as usize;

        if walker != Walker::Sailing {
            if let Some(dir) = one_step_dir(walk.dist_col, walk.dist_row) {
                let new_pos = self.map.move_pos(s.pos, dir);
                if !self.can_pass(new_pos) {
                    if walker != Walker::Knight && walk.neg_dist_col != FreeWalk::RETURNING {
                        // The target is blocked; walk straight back.
                        with_fw(s, |fw| {
                            fw.dist_col += fw.neg_dist_col;
                            fw.dist_row += fw.neg_dist_row;
                            fw.neg_dist_col = 0;
                            fw.neg_dist_row = 0;
                            fw.flags = 0;
                        });
                        s.animation = 82;
                        s.counter = anim_counter(82);
                    } else {
                        s.set_lost();
                        s.counter = 0;
                    }
                    return true;
                }
                if walker == Walker::Knight
                    && walk.neg_dist_col != FreeWalk::RETURNING
                    && self.map.has_serf(new_pos)
                {
                    with_fw(s, |fw| fw.flags = 0);
                    s.animation = 82;
                    s.counter = anim_counter(82);
                    return true;
                }
            }
        }

        let found = table[row]
            .iter()
            .enumerate()
            .find(|&(_, &dir)| self.can_walk_to(self.map.move_pos(s.pos, dir), walker));

        match found {
            Some((i0, &dir)) => {
                let i0 = i0 as i32;
                let upper = ((walk.flags >> 4) & 0xf) + i0 - 2;
                if i0 < 2 && upper < 0 {
                    with_fw(s, |fw| fw.flags = 0);
                    self.free_walk_step(s, dir);
                    true
                } else if i0 > 2 && upper > 15 {
                    with_fw(s, |fw| fw.flags = 0);
                    false
                } else {
                    let edge = walk.flags & ARRIVED;
                    with_fw(s, |fw| fw.flags = (upper << 4) | edge | (dir.index() as i32 + 1));
                    self.free_walk_step(s, dir);
                    true
                }
            }
            None => {
                with_fw(s, |fw| fw.flags &= 0xf0);
                self.free_walk_switch_with_other(s);
                true
            }
        }
    }

    /// One movement decision of a free walker.
    fn free_walk_common(&mut self, s: &mut Serf) -> GameResult<()> {
        let walker = Self::walker_of(s);
        let walk = fw(s);

        if walk.flags & ARRIVED != 0 && walk.flags & 7 == 0 {
            return self.free_walk_dest_reached(s);
        }
        if walk.flags & 7 != 0 && self.free_walk_follow_edge(s, walker) {
            return Ok(());
        }

        let walk = fw(s);
        let (d1, d2) = (walk.dist_col, walk.dist_row);
        let sector = forward_sector(d1, d2);
        let prefs = FORWARD[sector];

        let ahead = prefs[0];
        if self.can_walk_to(self.map.move_pos(s.pos, ahead), walker) {
            self.free_walk_step(s, ahead);
            return Ok(());
        }

        if walker != Walker::Sailing {
            if let Some(dir) = one_step_dir(d1, d2) {
                let new_pos = self.map.move_pos(s.pos, dir);
                if !self.can_pass(new_pos) {
                    if walker != Walker::Knight && walk.neg_dist_col != FreeWalk::RETURNING {
                        with_fw(s, |fw| {
                            fw.dist_col += fw.neg_dist_col;
                            fw.dist_row += fw.neg_dist_row;
                            fw.neg_dist_col = 0;
                            fw.neg_dist_row = 0;
                            fw.flags = 0;
                        });
                    } else {
                        log::debug!("serf {}: free walk target {} blocked", s.index, new_pos);
                        s.set_lost();
                        s.counter = 0;
                    }
                    return Ok(());
                }

                if walker == Walker::Knight && walk.neg_dist_col != FreeWalk::RETURNING {
                    if let Some(other_id) = self.map.serf_at(new_pos).filter(|&o| o != s.index) {
                        return self.knight_push_through(s, other_id, dir);
                    }
                }
            }
        }

        let other = prefs[1..]
            .iter()
            .enumerate()
            .find(|&(_, &dir)| self.can_walk_to(self.map.move_pos(s.pos, dir), walker));
        let Some((i0, &dir)) = other else {
            self.free_walk_switch_with_other(s);
            return Ok(());
        };

        let edge = if (sector ^ i0) & 1 != 0 { ARRIVED } else { 0 };
        let upper = (i0 as i32 / 2) + 1;
        with_fw(s, |fw| fw.flags = (upper << 4) | edge | (dir.index() as i32 + 1));
        self.free_walk_step(s, dir);
        Ok(())
    }

    /// A knight one step from its target finds the tile taken. Swap with
    /// the occupant when it waits to come this way; road walkers that
    /// keep blocking for too long are sent off.
    fn knight_push_through(&mut self, s: &mut Serf, other_id: crate::collection::SerfId, dir: D) -> GameResult<()> {
        let new_pos = self.map.move_pos(s.pos, dir);
        let rev = dir.reverse();
        let h = self.map.height(new_pos) - self.map.height(s.pos);

        let mut other = self.serfs.get(other_id).cloned().ok_or(GameError::NoSuchSerf(other_id))?;
        let waiting = matches!(other.is_waiting(), Some(Some(d)) if d == rev) || other.is_waiting() == Some(None);
        if waiting && other.switch_waiting(rev) {
            other.pos = s.pos;
            other.animation = walking_animation(-h, rev, true);
            other.counter = anim_counter(other.animation);
            self.map.set_serf(s.pos, Some(other_id));
            if let Some(slot) = self.serfs.get_mut(other_id) {
                *slot = other;
            }
            s.animation = walking_animation(h, dir, true);
            s.counter = anim_counter(s.animation);
            s.pos = new_pos;
            self.map.set_serf(new_pos, Some(s.index));
            return Ok(());
        }

        let road_walker = matches!(other.state, SerfState::Walking(_) | SerfState::Transporting(_));
        if road_walker {
            let mut patience = 0;
            with_fw(s, |fw| {
                fw.neg_dist_row += 1;
                patience = fw.neg_dist_row;
                if fw.neg_dist_row >= 10 {
                    fw.neg_dist_row = 0;
                }
            });
            let transporting = matches!(other.state, SerfState::Transporting(_));
            if patience >= 10 && (!transporting || self.map.has_flag(new_pos)) {
                log::debug!("knight {} sends serf {} off its way", s.index, other_id);
                self.set_lost_state(&mut other)?;
                if let Some(slot) = self.serfs.get_mut(other_id) {
                    *slot = other;
                }
            }
        }

        s.animation = 82;
        s.counter = anim_counter(82);
        Ok(())
    }

    pub(super) fn handle_free_walking(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 && matches!(s.state, SerfState::FreeWalking(_)) {
            self.free_walk_common(s)?;
        }
        Ok(())
    }

    pub(super) fn handle_knight_free_walking_common(&mut self, s: &mut Serf) -> GameResult<()> {
        self.free_walk_common(s)
    }

    pub(super) fn handle_stonecutter_free_walking(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 && matches!(s.state, SerfState::StoneCutterFreeWalking(_)) {
            let stone_ahead = matches!(self.map.obj(self.map.move_up_left(s.pos)), MapObject::Stone(_));
            let outbound = fw(s).neg_dist_col != FreeWalk::RETURNING;
            if outbound && stone_ahead && !self.map.has_serf(s.pos) {
                // Passing a stone on the way: cut this one instead.
                with_fw(s, |fw| {
                    fw.neg_dist_col += fw.dist_col;
                    fw.neg_dist_row += fw.dist_row;
                    fw.dist_col = 0;
                    fw.dist_row = 0;
                    fw.flags = ARRIVED;
                });
            }
            self.free_walk_common(s)?;
        }
        Ok(())
    }

    pub(super) fn handle_free_sailing(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 && matches!(s.state, SerfState::FreeSailing(_)) {
            if !self.map.is_in_water(s.pos) {
                s.set_lost();
                return Ok(());
            }
            self.free_walk_common(s)?;
        }
        Ok(())
    }

    // ── Arrival ─────────────────────────────────────────────────────────

    fn free_walk_dest_reached(&mut self, s: &mut Serf) -> GameResult<()> {
        let walk = fw(s);
        let returning = walk.neg_dist_col == FreeWalk::RETURNING;
        if returning && walk.neg_dist_row < 0 {
            self.find_inventory(s);
            return Ok(());
        }

        match s.serf_type {
            SerfType::Lumberjack => {
                if returning {
                    return Ok(self.back_at_workplace(s, Resource::Lumber, walk.neg_dist_row));
                }
                target_reached(s);
                let obj = self.map.obj(s.pos);
                if obj.is_tree() {
                    let deciduous = matches!(obj, MapObject::Tree(_));
                    let logging = FreeWalk {
                        neg_dist_col: if deciduous { -1 } else { 0 },
                        neg_dist_row: 0,
                        ..fw(s)
                    };
                    s.set_state(SerfState::Logging(logging));
                    s.animation = 116;
                    s.counter = anim_counter(116);
                } else {
                    turn_back(s, 0);
                }
            }
            SerfType::Stonecutter => {
                if returning {
                    return Ok(self.back_at_workplace(s, Resource::Stone, walk.neg_dist_row));
                }
                target_reached(s);
                let stone_pos = self.map.move_up_left(s.pos);
                let stone = matches!(self.map.obj(stone_pos), MapObject::Stone(_));
                if stone && !self.map.has_serf(stone_pos) {
                    s.counter = 0;
                    self.start_walking(s, D::UpLeft, 32, true);
                    let cutting = FreeWalk {
                        neg_dist_col: 0,
                        neg_dist_row: s.counter >> 2,
                        ..fw(s)
                    };
                    s.set_state(SerfState::StoneCutting(cutting));
                } else {
                    turn_back(s, 0);
                }
            }
            SerfType::Forester => {
                if returning {
                    return Ok(self.back_at_workplace(s, Resource::Lumber, 0));
                }
                target_reached(s);
                if self.map.obj(s.pos) == MapObject::None {
                    let planting = FreeWalk {
                        neg_dist_row: 0,
                        ..fw(s)
                    };
                    s.set_state(SerfState::Planting(planting));
                    s.animation = 121;
                    s.counter = anim_counter(121);
                } else {
                    turn_back(s, 0);
                }
            }
            SerfType::Fisher => {
                if returning {
                    return Ok(self.back_at_workplace(s, Resource::Fish, walk.neg_dist_row));
                }
                target_reached(s);
                let spot = if self.map.paths(s.pos) == 0 {
                    self.fishing_animation(s.pos)
                } else {
                    None
                };
                match spot {
                    Some(animation) => {
                        let fishing = FreeWalk {
                            neg_dist_col: 0,
                            neg_dist_row: 0,
                            flags: 0,
                            ..fw(s)
                        };
                        s.set_state(SerfState::Fishing(fishing));
                        s.animation = animation;
                        s.counter = anim_counter(animation);
                    }
                    None => turn_back(s, 0),
                }
            }
            SerfType::Farmer => {
                if returning {
                    return Ok(self.back_at_workplace(s, Resource::Wheat, walk.neg_dist_row));
                }
                target_reached(s);
                let (animation, harvest) = match self.map.obj(s.pos) {
                    MapObject::Seeds(5) => (136, 1),
                    MapObject::Field(n) if n <= 5 => (136, 1),
                    MapObject::None if self.map.paths(s.pos) == 0 => (135, 0),
                    _ => {
                        turn_back(s, 0);
                        return Ok(());
                    }
                };
                let farming = FreeWalk {
                    neg_dist_col: harvest,
                    neg_dist_row: 0,
                    ..fw(s)
                };
                s.set_state(SerfState::Farming(farming));
                s.animation = animation;
                s.counter = anim_counter(animation);
            }
            SerfType::Geologist => {
                if returning {
                    if self.map.obj(s.pos) == MapObject::Flag && self.map.owner(s.pos) == Some(s.owner) {
                        s.set_state(SerfState::LookingForGeoSpot);
                    } else {
                        s.set_lost();
                    }
                    s.counter = 0;
                    return Ok(());
                }
                target_reached(s);
                if self.map.obj(s.pos) == MapObject::None {
                    let sampling = FreeWalk {
                        neg_dist_col: 0,
                        ..fw(s)
                    };
                    s.set_state(SerfState::SamplingGeoSpot(sampling));
                    s.animation = 141;
                    s.counter = anim_counter(141);
                } else {
                    turn_back(s, 0);
                }
            }
            ty if ty.is_knight() => {
                if returning {
                    self.find_inventory(s);
                } else {
                    s.set_state(SerfState::KnightOccupyEnemyBuilding);
                    s.counter = 0;
                }
            }
            _ => self.find_inventory(s),
        }
        Ok(())
    }

    /// A worker is back at its building's flag, dropping what it brought.
    /// Foresters bring nothing.
    fn back_at_workplace(&mut self, s: &mut Serf, res: Resource, carrying: i32) {
        if carrying > 0 && s.serf_type != SerfType::Forester {
            self.drop_resource(s, res);
        }
        s.set_state(SerfState::ReadyToEnter { entry: Entry::Returning });
        s.counter = 0;
    }

    // ── Outdoor jobs ────────────────────────────────────────────────────

    pub(super) fn handle_logging(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 {
            let mut walk = fw(s);
            walk.neg_dist_row += 1;
            let stage = u8::try_from(walk.neg_dist_row - 1).unwrap_or(0);
            let felled = if walk.neg_dist_col != 0 {
                MapObject::FelledTree(stage)
            } else {
                MapObject::FelledPine(stage)
            };
            self.map.set_object(s.pos, felled, None);
            with_fw(s, |fw| *fw = walk);

            if walk.neg_dist_row < 5 {
                s.animation = 116 + walk.neg_dist_row;
                s.counter += anim_counter(s.animation);
            } else {
                log::trace!("serf {} felled a tree at {}", s.index, s.pos);
                walk_back(s, 1);
                return Ok(());
            }
        }
        Ok(())
    }

    pub(super) fn handle_planting(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 {
            if fw(s).neg_dist_row != 0 {
                walk_back(s, 0);
                return Ok(());
            }

            s.animation = 122;
            let sapling = if self.random_int() & 1 == 0 {
                MapObject::NewPine
            } else {
                MapObject::NewTree
            };
            if self.map.paths(s.pos) == 0 && self.map.obj(s.pos) == MapObject::None {
                self.map.set_object(s.pos, sapling, None);
            }
            with_fw(s, |fw| fw.neg_dist_row = -fw.neg_dist_row - 1);
            s.counter += 128;
        }
        Ok(())
    }

    pub(super) fn handle_stonecutting(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);

        let walk = fw(s);
        if walk.neg_dist_col == 0 {
            if s.counter > walk.neg_dist_row {
                return Ok(());
            }
            s.counter -= walk.neg_dist_row + 1;
            with_fw(s, |fw| fw.neg_dist_col = 1);
            s.animation = 123;
            s.counter += 1536;
        }

        while s.counter < 0 {
            if fw(s).neg_dist_col != 1 {
                walk_back(s, 1);
                return Ok(());
            }
            if self.map.has_serf(self.map.move_down_right(s.pos)) {
                s.counter = 0;
                return Ok(());
            }

            let rest = match self.map.obj(s.pos) {
                MapObject::Stone(n) if n > 0 => MapObject::Stone(n - 1),
                _ => MapObject::None,
            };
            self.map.set_object(s.pos, rest, None);

            s.counter = 0;
            self.start_walking(s, D::DownRight, 24, true);
            s.tick = self.tick16();
            with_fw(s, |fw| fw.neg_dist_col = 2);
        }
        Ok(())
    }

    pub(super) fn handle_fishing(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 {
            let walk = fw(s);
            if walk.neg_dist_row != 0 || walk.flags == 10 {
                walk_back(s, walk.neg_dist_row);
                return Ok(());
            }

            with_fw(s, |fw| fw.neg_dist_col += 1);
            if (walk.neg_dist_col + 1) % 2 == 0 {
                s.animation -= 2;
                s.counter += 768;
                continue;
            }

            let dir = if s.animation == 131 {
                if self.map.is_in_water(self.map.move_left(s.pos)) {
                    D::Left
                } else {
                    D::Down
                }
            } else if self.map.is_in_water(self.map.move_right(s.pos)) {
                D::Right
            } else {
                D::DownRight
            };

            let water = self.map.move_pos(s.pos, dir);
            let fish = self.map.res_fish(water);
            if fish > 0 && (self.random_int() & 0x3f) + 4 < fish {
                self.map.remove_fish(water, 1);
                with_fw(s, |fw| fw.neg_dist_row = 1);
            }
            with_fw(s, |fw| fw.flags += 1);
            s.animation += 2;
            s.counter += 128;
        }
        Ok(())
    }

    pub(super) fn handle_farming(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }

        let mut carrying = 0;
        if fw(s).neg_dist_col == 0 {
            if self.map.obj(s.pos) == MapObject::None && self.map.paths(s.pos) == 0 {
                self.map.set_object(s.pos, MapObject::Seeds(0), None);
            }
        } else {
            carrying = 1;
            let next = match self.map.obj(s.pos) {
                MapObject::Seeds(5) => Some(MapObject::Field(0)),
                MapObject::Field(5) => Some(MapObject::FieldExpired),
                MapObject::Field(n) if n < 5 => Some(MapObject::Field(n + 1)),
                _ => None,
            };
            if let Some(obj) = next {
                self.map.set_object(s.pos, obj, None);
            }
        }

        walk_back(s, carrying);
        Ok(())
    }

    pub(super) fn handle_sampling_geo_spot(&mut self, s: &mut Serf) -> GameResult<()> {
        use crate::map::Minerals;
        use crate::notification::NotificationKind;

        self.elapse(s);
        while s.counter < 0 {
            if fw(s).neg_dist_col == 0 && self.map.obj(s.pos) == MapObject::None {
                let mineral = self.map.res_type(s.pos);
                let amount = self.map.res_amount(s.pos);
                if mineral == Minerals::None || amount == 0 {
                    self.map.set_object(s.pos, MapObject::SignEmpty, None);
                } else {
                    with_fw(s, |fw| fw.neg_dist_col = -1);
                    s.animation = 142;
                    let large = amount >= 12;
                    self.map.set_object(s.pos, MapObject::Sign { mineral, large }, None);

                    let seen = (1..=60).any(|i| {
                        let p = self.map.pos_add_spirally(s.pos, i);
                        matches!(self.map.obj(p), MapObject::Sign { mineral: m, .. } if m == mineral)
                    });
                    if !seen {
                        let kind = match mineral {
                            Minerals::Gold => NotificationKind::FoundGold,
                            Minerals::Iron => NotificationKind::FoundIron,
                            Minerals::Coal => NotificationKind::FoundCoal,
                            _ => NotificationKind::FoundStone,
                        };
                        let data = mineral as u32 - 1;
                        log::debug!("geologist {} found {:?} at {}", s.index, mineral, s.pos);
                        if let Some(player) = self.players.get_mut(usize::from(s.owner)) {
                            player.notify(kind, s.pos, data);
                        }
                    }
                    s.counter += 64;
                    continue;
                }
            }

            walk_back(s, 0);
            return Ok(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::game_with_castle;

    #[test]
    fn test_forward_sector_prefers_matching_direction() {
        for dir in D::ALL {
            let (dx, dy) = dir.offset();
            let sector = forward_sector(dx * 4, dy * 4);
            assert_eq!(FORWARD[sector][0], dir, "offset {:?}", (dx, dy));
        }
    }

    #[test]
    fn test_one_step_dir() {
        assert_eq!(one_step_dir(1, 1), Some(D::DownRight));
        assert_eq!(one_step_dir(1, -1), None);
        assert_eq!(one_step_dir(2, 0), None);
        assert_eq!(one_step_dir(0, -1), Some(D::Up));
    }

    #[test]
    fn test_edge_tables_are_permutations() {
        for row in RIGHT_EDGE.iter().chain(LEFT_EDGE.iter()).chain(FORWARD.iter()) {
            let mut seen = [false; 6];
            for d in row {
                seen[d.index()] = true;
            }
            assert!(seen.iter().all(|&b| b));
        }
    }

    #[test]
    fn test_knight_push_through_needs_live_occupant() {
        let (mut game, center) = game_with_castle();
        let from = game.map.pos_add(center, 0, 4);
        let to = game.map.move_right(from);
        let knight = game.create_serf(0, SerfType::Knight0, from);
        let ghost = game.create_serf(0, SerfType::Transporter, to);
        game.serfs.erase(ghost);

        let mut s = game.serfs.get(knight).cloned().expect("knight");
        assert_eq!(
            game.knight_push_through(&mut s, ghost, D::Right),
            Err(GameError::NoSuchSerf(ghost))
        );
    }
}
