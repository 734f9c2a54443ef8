//! Road travel: serfs walking the road network toward a flag, transporters
//! shuttling resources along their road, and transporters parked on a road
//! with nothing to carry.

use super::{anim_counter, walking_animation, Carry, Entry, IdlePath, Serf, SerfState, SerfType, Step, Walk, WalkTask};
use crate::collection::FlagId;
use crate::error::GameResult;
use crate::flag::FlagSearch;
use crate::game::Game;
use crate::map::{Direction, MapPos};
use crate::resource::Resource;

/// The only direction left in `paths`, if exactly one bit is set.
fn single_path(paths: u8) -> Option<Direction> {
    Direction::ALL.into_iter().find(|d| paths == d.bit())
}

/// Transport state with the given step, keeping the rest of the carry.
fn transporting(res: Option<Resource>, dest: Option<FlagId>, step: Step, wait_counter: i32) -> SerfState {
    SerfState::Transporting(Carry {
        res,
        dest,
        step,
        wait_counter,
    })
}

impl Game {
    // ── Stepping ────────────────────────────────────────────────────────

    /// Take one road step in `dir`. If the tile ahead is occupied by a serf
    /// waiting to come our way, the two swap places; otherwise the serf
    /// blocks and waits. With `alt_end` the wait counter is kept and a
    /// serf landing on a flag is not left with a negative counter.
    pub(crate) fn change_direction(&mut self, s: &mut Serf, dir: Direction, alt_end: bool) {
        let new_pos = self.map.move_pos(s.pos, dir);
        let h_pos = self.map.height(s.pos);
        let h_new = self.map.height(new_pos);
        let rev = dir.reverse();

        match self.map.serf_at(new_pos) {
            None => {
                self.map.set_serf(s.pos, None);
                s.animation = walking_animation(h_new - h_pos, dir, false);
                s.set_step(Step::From(rev));
            }
            Some(other_id) => {
                let swapped = match self.serfs.get_mut(other_id) {
                    Some(other) if other_id != s.index => {
                        let wants = matches!(other.is_waiting(), Some(None)) || other.is_waiting() == Some(Some(rev));
                        if wants && other.switch_waiting(rev) {
                            other.pos = s.pos;
                            other.animation = walking_animation(h_pos - h_new, rev, true);
                            other.counter = anim_counter(other.animation);
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                };
                if !swapped {
                    s.animation = 81 + dir.index() as i32;
                    s.counter = anim_counter(s.animation);
                    s.set_step(Step::Blocked(dir));
                    return;
                }
                self.map.set_serf(s.pos, Some(other_id));
                s.animation = walking_animation(h_new - h_pos, dir, true);
                s.set_step(Step::From(rev));
            }
        }

        if !alt_end {
            s.set_wait_counter(0);
        }
        s.pos = new_pos;
        self.map.set_serf(new_pos, Some(s.index));
        s.counter += anim_counter(s.animation);
        if alt_end && s.counter < 0 && self.map.has_flag(new_pos) {
            s.counter = 0;
        }
    }

    /// Arrive at `flag_id` as its transporter: swap or pick up whatever is
    /// scheduled for our road, else drop the carried resource, then turn
    /// back onto the road.
    pub(crate) fn transporter_move_to_flag(&mut self, s: &mut Serf, flag_id: FlagId) -> GameResult<()> {
        let SerfState::Transporting(mut carry) = s.state else {
            return Ok(());
        };
        let dir = carry.step.dir();
        let prio = self
            .players
            .get(usize::from(s.owner))
            .map(|p| p.flag_prio)
            .unwrap_or_default();

        let Some(flag) = self.flags.get_mut(flag_id) else {
            log::warn!("serf {}: transport flag {} vanished", s.index, flag_id);
            return self.set_lost_state(s);
        };
        if let Some(slot) = flag.scheduled_slot(dir) {
            carry.wait_counter = 0;
            if let Some((res, dest)) = flag.pick_up_resource(slot) {
                let old = carry.res.replace(res);
                let old_dest = std::mem::replace(&mut carry.dest, dest);
                if let Some(old) = old {
                    if !flag.drop_resource(old, old_dest) {
                        return Err(crate::error::GameError::FlagFull(flag_id));
                    }
                }
            }
            flag.prioritize_pickup(dir, &prio);
        } else if let Some(res) = carry.res {
            if flag.drop_resource(res, carry.dest) {
                carry.res = None;
                carry.dest = None;
            }
        }
        s.state = SerfState::Transporting(carry);
        self.change_direction(s, dir, true);
        Ok(())
    }

    // ── Walking ─────────────────────────────────────────────────────────

    pub(super) fn handle_walking(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);

        while s.counter < 0 {
            let SerfState::Walking(walk) = s.state else {
                return Ok(());
            };
            if let Step::Blocked(dir) = walk.step {
                self.walking_waiting(s, dir, walk.wait_counter);
                continue;
            }

            if let Some(src) = self.map.flag_at(s.pos) {
                let dest = match walk.dest {
                    Some(dest) => dest,
                    None => match self.find_nearest_inventory_for_serf(src) {
                        Some(dest) => {
                            s.state = SerfState::Walking(Walk { dest: Some(dest), ..walk });
                            dest
                        }
                        None => {
                            log::debug!("serf {}: no inventory reachable, lost", s.index);
                            s.set_state(SerfState::Lost { search_far_first: true });
                            s.counter = 0;
                            return Ok(());
                        }
                    },
                };

                if dest == src {
                    return self.walking_dest_reached(s);
                }

                let mut search = FlagSearch::new();
                search.exclude(src);
                if let Some(flag) = self.flags.get(src) {
                    for dir in Direction::ALL.into_iter().rev() {
                        if flag.is_water_path(dir) {
                            continue;
                        }
                        if let Some(other) = flag.other_flag(dir) {
                            search.add_source(other, dir.index());
                        }
                    }
                }
                let found = search.execute(&self.flags, true, false, |id, _, _| id == dest);
                if let Some(dir) = found.and_then(|(_, tag)| Direction::from_index(tag as i32)) {
                    self.change_direction(s, dir, false);
                    continue;
                }
            } else {
                let paths = self.map.paths(s.pos) & !walk.step.dir().bit();
                if let Some(dir) = single_path(paths) {
                    self.change_direction(s, dir, false);
                    continue;
                }
                s.counter = 0;
            }

            // Dead end, or the destination cannot be reached from this flag.
            match (walk.task, walk.dest) {
                (WalkTask::ReturnHome, _) => {
                    s.set_state(SerfState::Lost { search_far_first: true });
                    s.counter = 0;
                    return Ok(());
                }
                (WalkTask::Enter, Some(dest)) => {
                    if let Some(building) = self
                        .flags
                        .get(dest)
                        .and_then(|f| f.building())
                        .and_then(|b| self.buildings.get_mut(b))
                    {
                        building.requested_serf_lost();
                    }
                }
                (WalkTask::Road(dir), Some(dest)) => self.cancel_road_request(dest, dir),
                _ => {}
            }
            if let SerfState::Walking(w) = &mut s.state {
                w.task = WalkTask::ReturnHome;
                w.dest = None;
            }
            s.counter = 0;
        }
        Ok(())
    }

    /// A walking serf is blocked by another serf. Every so often follow
    /// the chain of serfs waiting on each other; on a loop, back off.
    fn walking_waiting(&mut self, s: &mut Serf, blocked: Direction, wait_counter: i32) {
        let wait_counter = wait_counter + 1;
        s.set_wait_counter(wait_counter);

        if (!self.map.has_flag(s.pos) && wait_counter >= 10) || wait_counter >= 50 {
            let mut dir = blocked;
            let mut pos = s.pos;
            for _ in 0..100 {
                pos = self.map.move_pos(pos, dir);
                let Some(id) = self.map.serf_at(pos) else {
                    break;
                };
                if id == s.index {
                    self.change_direction(s, dir.reverse(), false);
                    return;
                }
                let Some(other) = self.serfs.get(id) else {
                    break;
                };
                if !matches!(other.state, SerfState::Walking(_) | SerfState::Transporting(_)) {
                    break;
                }
                match other.step() {
                    Some(Step::Blocked(next)) if next != dir.reverse() => dir = next,
                    _ => break,
                }
            }
        }

        s.set_wait_counter(0);
        self.change_direction(s, blocked, false);
    }

    fn walking_dest_reached(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::Walking(walk) = s.state else {
            return Ok(());
        };
        match walk.task {
            WalkTask::Enter | WalkTask::ReturnHome => {
                let entrance = self.map.move_up_left(s.pos);
                let Some(building) = self.map.building_at(entrance).and_then(|b| self.buildings.get_mut(b)) else {
                    log::warn!("serf {}: destination building vanished", s.index);
                    s.set_lost();
                    s.counter = 0;
                    return Ok(());
                };
                building.requested_serf_reached(s.index);
                let entry = if walk.task == WalkTask::Enter {
                    Entry::Assigned
                } else {
                    Entry::Inventory
                };
                if self.map.has_serf(entrance) {
                    s.animation = 85;
                    s.counter = 0;
                    s.set_state(SerfState::ReadyToEnter { entry });
                } else {
                    self.enter_building(s, entry, false);
                }
            }
            WalkTask::Geologist => {
                s.set_state(SerfState::LookingForGeoSpot);
                s.counter = 0;
            }
            WalkTask::Road(dir) => {
                let Some(flag_id) = self.map.flag_at(s.pos) else {
                    return Ok(());
                };
                let other = self.flags.get_mut(flag_id).and_then(|flag| {
                    flag.complete_serf_request(dir);
                    flag.other_flag(dir).zip(flag.other_end_dir(dir))
                });
                let Some((other_flag, other_dir)) = other else {
                    s.set_lost();
                    s.counter = 0;
                    return Ok(());
                };
                if let Some(o) = self.flags.get_mut(other_flag) {
                    o.complete_serf_request(other_dir);
                }
                s.set_state(transporting(None, None, Step::From(dir), 0));
                self.transporter_move_to_flag(s, flag_id)?;
            }
        }
        Ok(())
    }

    // ── Transporting ────────────────────────────────────────────────────

    pub(super) fn handle_transporting(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }
        let SerfState::Transporting(carry) = s.state else {
            return Ok(());
        };

        let from = match carry.step {
            Step::Blocked(dir) => {
                self.change_direction(s, dir, true);
                return Ok(());
            }
            Step::From(dir) => dir,
        };

        if let Some(flag_id) = self.map.flag_at(s.pos) {
            if carry.wait_counter < 0 {
                // Told to leave the road; walk home.
                s.set_state(SerfState::Walking(Walk::new(WalkTask::ReturnHome, None)));
                s.counter = 0;
                return Ok(());
            }
            if carry.res.is_some() && carry.dest == Some(flag_id) {
                s.set_state(SerfState::Delivering(Carry {
                    wait_counter: 0,
                    ..carry
                }));
                let entrance = self.map.move_up_left(s.pos);
                s.animation = 3 + self.map.height(entrance) - self.map.height(s.pos) + 90;
                s.counter = anim_counter(s.animation);
                return Ok(());
            }
            return self.transporter_move_to_flag(s, flag_id);
        }

        let paths = self.map.paths(s.pos) & !from.bit();
        let Some(dir) = single_path(paths) else {
            log::warn!("serf {}: road under transporter vanished", s.index);
            s.set_lost();
            s.counter = 0;
            return Ok(());
        };

        let next = self.map.move_pos(s.pos, dir);
        let flag_ahead = self.map.flag_at(next);
        let flag_id = match flag_ahead {
            Some(id) if carry.res.is_none() && carry.wait_counter >= 0 => id,
            _ => {
                self.change_direction(s, dir, true);
                return Ok(());
            }
        };

        let rev = dir.reverse();
        let Some(flag) = self.flags.get(flag_id) else {
            self.change_direction(s, dir, true);
            return Ok(());
        };
        if flag.is_scheduled(rev) {
            self.change_direction(s, dir, true);
            return Ok(());
        }
        let other = flag.other_flag(rev).zip(flag.other_end_dir(rev));
        let crowded = flag.free_transporter_count(rev) > 1;
        let other_scheduled = other
            .and_then(|(o, d)| self.flags.get(o).map(|f| f.is_scheduled(d)))
            .unwrap_or(false);

        // Nothing to pick up ahead: pause, then turn around.
        s.animation = 110 + from.index() as i32;
        s.counter = anim_counter(s.animation);
        let mut wait_counter = carry.wait_counter;

        if crowded {
            wait_counter += 1;
            if wait_counter > 3 {
                if let Some(flag) = self.flags.get_mut(flag_id) {
                    flag.transporter_to_serve(rev);
                }
                if let Some((o, d)) = other {
                    if let Some(f) = self.flags.get_mut(o) {
                        f.transporter_to_serve(d);
                    }
                }
                wait_counter = -1;
            }
        } else if !other_scheduled {
            s.set_state(SerfState::IdleOnPath(IdlePath {
                flag: flag_id,
                rev_dir: rev,
                resume: from,
            }));
            self.map.set_idle_serf(s.pos, true);
            self.map.set_serf(s.pos, None);
            return Ok(());
        }

        s.state = transporting(carry.res, carry.dest, Step::Blocked(from), wait_counter);
        Ok(())
    }

    pub(super) fn handle_delivering(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);

        while s.counter < 0 {
            let SerfState::Delivering(mut carry) = s.state else {
                return Ok(());
            };
            if carry.wait_counter != 0 {
                s.set_state(SerfState::Transporting(Carry {
                    wait_counter: 0,
                    ..carry
                }));
                if let Some(flag_id) = self.map.flag_at(s.pos) {
                    self.transporter_move_to_flag(s, flag_id)?;
                }
                return Ok(());
            }

            if let Some(res) = carry.res.take() {
                carry.dest = None;
                self.deliver_to_building(self.map.move_up_left(s.pos), res)?;
            }

            s.animation = 4 + 9 - (s.animation - (3 + 90));
            carry.wait_counter = -carry.wait_counter - 1;
            s.state = SerfState::Delivering(carry);
            s.counter += anim_counter(s.animation) >> 1;
        }
        Ok(())
    }

    /// Hand a resource to the building at `pos`: into its inventory, or
    /// into the stock slot that requested it.
    fn deliver_to_building(&mut self, pos: MapPos, res: Resource) -> GameResult<()> {
        let Some(building) = self.map.building_at(pos).and_then(|b| self.buildings.get_mut(b)) else {
            self.lose_resource(res);
            return Ok(());
        };
        if building.is_burning() {
            self.lose_resource(res);
            return Ok(());
        }
        if let Some(inv) = building.inventory() {
            match self.inventories.get_mut(inv) {
                Some(inventory) => inventory.push_resource(res),
                None => return Err(crate::error::GameError::MissingInventory(building.index())),
            }
            return Ok(());
        }
        let res = if res.is_food() { Resource::GroupFood } else { res };
        building.requested_resource_delivered(res)
    }

    // ── Parked transporters ─────────────────────────────────────────────

    /// Leave the parking spot and carry on along the road.
    fn resume_transport(&mut self, s: &mut Serf, resume: Direction) {
        self.map.set_idle_serf(s.pos, false);
        self.map.set_serf(s.pos, Some(s.index));
        s.set_state(transporting(None, None, Step::From(resume), 0));
        s.tick = self.tick16();
        s.counter = 0;
    }

    pub(super) fn handle_idle_on_path(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::IdleOnPath(mut path) = s.state else {
            return Ok(());
        };
        let Some(flag) = self.flags.get(path.flag) else {
            s.set_state(SerfState::WakeAtFlag(path));
            return Ok(());
        };

        if flag.is_scheduled(path.rev_dir) {
            // Something waits at the near flag: walk back to it.
        } else {
            let other_scheduled = flag
                .other_flag(path.rev_dir)
                .zip(flag.other_end_dir(path.rev_dir))
                .and_then(|(o, d)| self.flags.get(o).map(|f| f.is_scheduled(d)))
                .unwrap_or(false);
            if !other_scheduled {
                return Ok(());
            }
            path.resume = path.rev_dir.reverse();
        }

        if self.map.has_serf(s.pos) {
            s.set_state(SerfState::WaitIdleOnPath(path));
        } else {
            self.resume_transport(s, path.resume);
        }
        Ok(())
    }

    pub(super) fn handle_wait_idle_on_path(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::WaitIdleOnPath(path) = s.state else {
            return Ok(());
        };
        if !self.map.has_serf(s.pos) {
            self.resume_transport(s, path.resume);
        }
        Ok(())
    }

    pub(super) fn handle_wake_at_flag(&mut self, s: &mut Serf) -> GameResult<()> {
        if self.map.has_serf(s.pos) {
            return Ok(());
        }
        self.map.set_idle_serf(s.pos, false);
        self.map.set_serf(s.pos, Some(s.index));
        s.tick = self.tick16();
        s.counter = 0;
        if s.serf_type == SerfType::Sailor {
            s.set_state(SerfState::LostSailor);
        } else {
            s.set_lost();
        }
        Ok(())
    }

    pub(super) fn handle_wake_on_path(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::WakeOnPath(mut path) = s.state else {
            return Ok(());
        };
        let paths = self.map.paths(s.pos);
        if let Some(dir) = Direction::ALL.into_iter().rev().find(|d| paths & d.bit() != 0) {
            path.resume = dir;
        }
        s.set_state(SerfState::WaitIdleOnPath(path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_path() {
        assert_eq!(single_path(0), None);
        assert_eq!(single_path(Direction::Left.bit()), Some(Direction::Left));
        assert_eq!(single_path(Direction::Left.bit() | Direction::Up.bit()), None);
    }

    #[test]
    fn test_transporting_helper_keeps_cargo() {
        let state = transporting(Some(Resource::Stone), None, Step::Blocked(Direction::Down), 2);
        match state {
            SerfState::Transporting(c) => {
                assert_eq!(c.res, Some(Resource::Stone));
                assert_eq!(c.step, Step::Blocked(Direction::Down));
                assert_eq!(c.wait_counter, 2);
            }
            _ => panic!("wrong state"),
        }
    }
}
