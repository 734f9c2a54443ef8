//! Flags and roads: placing them, splitting a road with a new flag,
//! merging two roads when the flag between them goes, and tearing roads
//! down while keeping the transporters on them consistent.

use super::Game;
use crate::collection::{FlagId, SerfId};
use crate::error::{GameError, GameResult};
use crate::flag::{road_length_value, Flag, FlagPath, MAX_TRANSPORTERS};
use crate::map::{cycle_ccw, cycle_cw, Direction, MapObject, MapPos, Space};
use crate::serf::{IdlePath, SerfState};

/// Transporters found on one road half, walking from a position on the
/// road to the flag at its end.
#[derive(Debug, Default)]
struct PathSerfs {
    len: usize,
    serfs: Vec<SerfId>,
    /// Flag at the far end and the direction the road leaves it in.
    end: Option<(FlagId, Direction)>,
}

fn idle_path(state: &SerfState) -> Option<IdlePath> {
    match *state {
        SerfState::IdleOnPath(p)
        | SerfState::WaitIdleOnPath(p)
        | SerfState::WakeAtFlag(p)
        | SerfState::WakeOnPath(p) => Some(p),
        _ => None,
    }
}

/// Still working its road: transporting and not told to leave it.
fn is_active_transporter(state: &SerfState) -> bool {
    matches!(state, SerfState::Transporting(c) if c.wait_counter != -1)
}

impl Game {
    // ── Flags ───────────────────────────────────────────────────────────

    /// Whether `player` may put a flag at `pos`.
    pub fn can_build_flag(&self, pos: MapPos, player: u8) -> bool {
        if self.map.owner(pos) != Some(player) {
            return false;
        }
        if self.map.space(pos) != Space::Open || self.map.is_in_water(pos) {
            return false;
        }
        !Direction::ALL
            .iter()
            .any(|&d| self.map.has_flag(self.map.move_pos(pos, d)))
    }

    /// Place a flag. A flag on an existing road splits it in two.
    pub fn build_flag(&mut self, pos: MapPos, player: u8) -> GameResult<FlagId> {
        self.check_pos(pos)?;
        if !self.can_build_flag(pos, player) {
            return Err(GameError::CannotBuild { what: "flag", pos });
        }
        let id = self.flags.allocate_with(|_| Flag::new(player, pos));
        self.map.set_object(pos, MapObject::Flag, Some(id.get()));
        if self.map.paths(pos) != 0 {
            self.split_path(pos, id)?;
        }
        log::debug!("player {} placed flag {} at {}", player, id, pos);
        Ok(id)
    }

    /// Whether `player` may remove the flag at `pos`.
    pub fn can_demolish_flag(&self, pos: MapPos, player: u8) -> bool {
        let Some(flag) = self.map.flag_at(pos).and_then(|id| self.flags.get(id)) else {
            return false;
        };
        if flag.owner() != player || flag.has_building() {
            return false;
        }
        if self.map.has_path(pos, Direction::UpLeft)
            && self.map.has_building(self.map.move_up_left(pos))
        {
            return false;
        }
        self.map.paths(pos) == 0 || flag.can_demolish()
    }

    /// Remove a flag. Its two roads become one.
    pub fn demolish_flag(&mut self, pos: MapPos, player: u8) -> GameResult<()> {
        self.check_pos(pos)?;
        if !self.can_demolish_flag(pos, player) {
            return Err(GameError::CannotDemolish { what: "flag", pos });
        }
        self.remove_flag(pos)
    }

    /// Take the flag at `pos` off the map without any ownership checks.
    pub(crate) fn remove_flag(&mut self, pos: MapPos) -> GameResult<()> {
        let Some(id) = self.map.flag_at(pos) else {
            return Ok(());
        };

        if let Some(serf) = self.map.serf_at(pos).and_then(|s| self.serfs.get_mut(s)) {
            serf.flag_deleted(self.map.paths(pos));
        }

        self.reset_transport(id);
        self.merge_paths(pos)?;
        for (_, serf) in self.serfs.iter_mut() {
            serf.path_merged(id);
        }

        self.map.set_object(pos, MapObject::None, Some(0));
        let waiting = self
            .flags
            .get_mut(id)
            .map(Flag::take_all_resources)
            .unwrap_or_default();
        for (res, dest) in waiting {
            self.cancel_transported_resource(res, dest)?;
            self.lose_resource(res);
        }
        self.flags.erase(id);
        log::debug!("flag {} at {} removed", id, pos);
        Ok(())
    }

    /// Detach road `dir` from a flag, sending home any transporter still
    /// on its way to serve it.
    pub(crate) fn flag_del_path(&mut self, id: FlagId, dir: Direction) {
        let Some(flag) = self.flags.get_mut(id) else {
            return;
        };
        if flag.serf_requested(dir) {
            flag.cancel_serf_request(dir);
            for (_, serf) in self.serfs.iter_mut() {
                if serf.is_related_to(id, dir) {
                    serf.path_deleted(id, dir);
                }
            }
        }
        if let Some(flag) = self.flags.get_mut(id) {
            flag.del_path(dir);
        }
    }

    // ── Roads ───────────────────────────────────────────────────────────

    /// Follow `dirs` from `source`. Returns the end position and whether
    /// the road runs over water, or None when the road cannot be laid.
    fn road_endpoint(&self, source: MapPos, dirs: &[Direction], player: u8) -> Option<(MapPos, bool)> {
        if self.map.owner(source) != Some(player) || !self.map.has_flag(source) {
            return None;
        }
        let (mut on_land, mut on_water) = (false, false);
        let mut pos = source;
        for (i, &dir) in dirs.iter().enumerate() {
            if !self.map.is_road_segment_valid(pos, dir) {
                return None;
            }
            if self.map.road_segment_in_water(pos, dir) {
                on_water = true;
            } else {
                on_land = true;
            }
            pos = self.map.move_pos(pos, dir);
            let last = i + 1 == dirs.len();
            if self.map.owner(pos) != Some(player) || (self.map.has_flag(pos) && !last) {
                return None;
            }
        }
        if (on_water && on_land) || pos == source {
            return None;
        }
        Some((pos, on_water))
    }

    /// Whether `player` may lay a road along `dirs` from the flag at
    /// `source`. The end need not hold a flag yet.
    pub fn can_build_road(&self, source: MapPos, dirs: &[Direction], player: u8) -> bool {
        !dirs.is_empty() && self.road_endpoint(source, dirs, player).is_some()
    }

    /// Lay a road between two flags.
    pub fn build_road(&mut self, source: MapPos, dirs: &[Direction], player: u8) -> GameResult<()> {
        self.check_pos(source)?;
        let cannot = GameError::CannotBuild { what: "road", pos: source };
        let (Some(&out_dir), Some(&last)) = (dirs.first(), dirs.last()) else {
            return Err(cannot);
        };
        let Some((dest, water)) = self.road_endpoint(source, dirs, player) else {
            return Err(cannot);
        };
        let (Some(src_flag), Some(dest_flag)) = (self.map.flag_at(source), self.map.flag_at(dest)) else {
            return Err(cannot);
        };
        if let Some(missing) = [src_flag, dest_flag].into_iter().find(|&id| self.flags.get(id).is_none()) {
            return Err(GameError::NoSuchFlag(missing));
        }
        if !self.map.place_road_segments(source, dirs) {
            return Err(cannot);
        }

        let in_dir = last.reverse();
        let length = road_length_value(dirs.len());
        if let Some(flag) = self.flags.get_mut(src_flag) {
            flag.link_path(out_dir, FlagPath::new(dest_flag, in_dir, water, length));
        }
        if let Some(flag) = self.flags.get_mut(dest_flag) {
            flag.link_path(in_dir, FlagPath::new(src_flag, out_dir, water, length));
        }
        log::debug!(
            "player {} built a road of {} from flag {} to flag {}",
            player,
            dirs.len(),
            src_flag,
            dest_flag
        );
        Ok(())
    }

    /// Whether `player` may remove the road passing through `pos`.
    pub fn can_demolish_road(&self, pos: MapPos, player: u8) -> bool {
        self.map.owner(pos) == Some(player)
            && self.map.paths(pos) != 0
            && !self.map.has_flag(pos)
            && !self.map.has_building(pos)
    }

    /// Remove the road passing through `pos`, between its two flags.
    pub fn demolish_road(&mut self, pos: MapPos, player: u8) -> GameResult<()> {
        self.check_pos(pos)?;
        if !self.can_demolish_road(pos, player) {
            return Err(GameError::CannotDemolish { what: "road", pos });
        }
        self.remove_road_at(pos)
    }

    pub(crate) fn remove_road_at(&mut self, pos: MapPos) -> GameResult<()> {
        self.map.remove_road_backrefs(pos);
        let (Some(dir_1), Some(dir_2)) = self.road_halves(pos) else {
            return Ok(());
        };
        self.remove_road_forwards(pos, dir_1, None)?;
        self.remove_road_forwards(pos, dir_2, None)
    }

    /// Remove road `dir` leaving the flag at `flag_pos`.
    pub(crate) fn remove_road_from_flag(&mut self, flag_pos: MapPos, dir: Direction) -> GameResult<()> {
        if let Some(id) = self.map.flag_at(flag_pos) {
            self.flag_del_path(id, dir);
        }
        self.remove_road_forwards(flag_pos, dir, None)
    }

    /// The two road directions at a road position. A road may touch a
    /// building entrance up-left, in which case `Up` is the real road.
    fn road_halves(&self, pos: MapPos) -> (Option<Direction>, Option<Direction>) {
        let mut dirs = cycle_cw(Direction::Right, 6).filter(|&d| self.map.has_path(pos, d));
        let first = dirs.next();
        let mut second = dirs.next();
        if second == Some(Direction::UpLeft) && self.map.has_path(pos, Direction::Up) {
            second = Some(Direction::Up);
        }
        (first, second)
    }

    /// Clear road segments from `pos` in `dir` up to the next flag. Serfs
    /// met on the way lose their road.
    fn remove_road_forwards(
        &mut self,
        mut pos: MapPos,
        mut dir: Direction,
        mut in_dir: Option<Direction>,
    ) -> GameResult<()> {
        loop {
            if self.map.idle_serf(pos) {
                for id in self.serfs_at_pos(pos) {
                    if self.serfs.get_mut(id).is_some_and(|s| s.idle_to_wait_state(pos)) {
                        break;
                    }
                }
            }

            let at_flag = self.map.flag_at(pos);
            if let Some(id) = self.map.serf_at(pos) {
                let stranded = match (at_flag, in_dir) {
                    (None, _) => true,
                    (Some(_), Some(in_dir)) => self
                        .serfs
                        .get(id)
                        .and_then(|s| s.step())
                        .is_some_and(|step| step.dir() == in_dir.reverse()),
                    (Some(_), None) => false,
                };
                if stranded {
                    if let Some(mut s) = self.serfs.get(id).cloned() {
                        self.set_lost_state(&mut s)?;
                        if let Some(slot) = self.serfs.get_mut(id) {
                            *slot = s;
                        }
                    }
                }
            }

            if let (Some(flag), Some(in_dir)) = (at_flag, in_dir) {
                self.flag_del_path(flag, in_dir.reverse());
                return Ok(());
            }

            in_dir = Some(dir);
            let (next, onward) = self.map.remove_road_segment(pos, dir);
            pos = next;
            match onward {
                Some(d) => dir = d,
                None if self.map.has_flag(pos) => {}
                None => return Ok(()),
            }
        }
    }

    // ── Split and merge ─────────────────────────────────────────────────

    /// Wake the transporter parked at `pos` into `wake`'s state.
    fn wake_parked_transporter(&mut self, pos: MapPos, wake: fn(IdlePath) -> SerfState) -> Option<SerfId> {
        if !self.map.idle_serf(pos) {
            return None;
        }
        for id in self.serfs_at_pos(pos) {
            let Some(serf) = self.serfs.get_mut(id) else { continue };
            let Some(path) = idle_path(&serf.state) else { continue };
            if serf.change_transporter_state_at_pos(pos, wake(path)) {
                return Some(id);
            }
        }
        None
    }

    /// Walk the road from `pos` in `dir` to the flag at its end, counting
    /// segments and collecting the transporters working it.
    fn fill_path_serf_info(&mut self, mut pos: MapPos, mut dir: Direction) -> PathSerfs {
        let mut info = PathSerfs::default();
        self.wake_parked_transporter(pos, SerfState::WakeAtFlag);

        if let Some(id) = self.map.serf_at(pos) {
            if let Some(serf) = self.serfs.get_mut(id) {
                let ours = serf.step().is_some_and(|step| step.dir() == dir);
                if is_active_transporter(&serf.state) && ours {
                    serf.set_wait_counter(0);
                    info.serfs.push(id);
                }
            }
        }

        loop {
            info.len += 1;
            pos = self.map.move_pos(pos, dir);
            if self.map.has_flag(pos) {
                break;
            }
            let paths = self.map.paths(pos) & !dir.reverse().bit();
            match cycle_cw(Direction::Right, 6).find(|d| paths & d.bit() != 0) {
                Some(d) => dir = d,
                None => return info,
            }

            if let Some(id) = self.wake_parked_transporter(pos, SerfState::WakeOnPath) {
                info.serfs.push(id);
            }
            if let Some(id) = self.map.serf_at(pos) {
                if let Some(serf) = self.serfs.get_mut(id) {
                    if is_active_transporter(&serf.state) {
                        serf.set_wait_counter(0);
                        info.serfs.push(id);
                    }
                }
            }
        }

        if let Some(id) = self.map.serf_at(pos) {
            if let Some(serf) = self.serfs.get_mut(id) {
                let arriving = is_active_transporter(&serf.state)
                    || matches!(serf.state, SerfState::Delivering(_));
                if arriving && serf.step().is_some_and(|step| step.dir() == dir.reverse()) {
                    serf.set_wait_counter(0);
                    info.serfs.push(id);
                }
            }
        }

        info.end = self.map.flag_at(pos).map(|flag| (flag, dir.reverse()));
        info
    }

    /// A new flag at `pos` cut a road in two. Each half is linked to the
    /// new flag and keeps the transporters found on it.
    fn split_path(&mut self, pos: MapPos, flag: FlagId) -> GameResult<()> {
        let (Some(dir_1), Some(dir_2)) = self.road_halves(pos) else {
            return Ok(());
        };
        let half_1 = self.fill_path_serf_info(pos, dir_1);
        let half_2 = self.fill_path_serf_info(pos, dir_2);
        let (Some(end_1), Some(end_2)) = (half_1.end, half_2.end) else {
            log::warn!("road through {} does not end in flags", pos);
            return Ok(());
        };

        if self.flags.get(end_2.0).is_some_and(|f| f.serf_requested(end_2.1)) {
            // The one requested transporter now serves only one half.
            let select = self
                .serfs
                .values()
                .find_map(|s| s.path_splited(end_1.0, end_1.1, end_2.0, end_2.1));
            let (other, other_dir) = if select == Some(0) { end_2 } else { end_1 };
            if let Some(f) = self.flags.get_mut(other) {
                f.cancel_serf_request(other_dir);
            }
        }

        self.restore_path_serf_info(flag, dir_1, end_1, &half_1)?;
        self.restore_path_serf_info(flag, dir_2, end_2, &half_2)
    }

    /// Link road `dir` of `flag` to the far end of a split half and
    /// hand it the transporters found there. Surplus transporters leave.
    fn restore_path_serf_info(
        &mut self,
        flag: FlagId,
        dir: Direction,
        (other, other_dir): (FlagId, Direction),
        half: &PathSerfs,
    ) -> GameResult<()> {
        let length = road_length_value(half.len);
        let far = self.flags.get_mut(other).ok_or(GameError::NoSuchFlag(other))?;
        let (water, requested) = match far.path_mut(other_dir) {
            Some(p) => {
                p.other = flag;
                p.other_dir = dir;
                p.length = length;
                p.has_transporter = false;
                p.free_transporters = 0;
                (p.water, p.serf_requested)
            }
            None => return Ok(()),
        };
        let mut path = FlagPath::new(other, other_dir, water, length);
        path.serf_requested = requested;
        if let Some(f) = self.flags.get_mut(flag) {
            f.link_path(dir, path);
        }

        let max = usize::from(MAX_TRANSPORTERS[usize::from(length)]) - usize::from(requested);
        let surplus = half.serfs.len().saturating_sub(max);
        for &id in &half.serfs[..surplus] {
            let Some(serf) = self.serfs.get_mut(id) else { continue };
            if let SerfState::WakeOnPath(p) = serf.state {
                serf.set_state(SerfState::WakeAtFlag(p));
                continue;
            }
            serf.set_wait_counter(-1);
            let dropped = match &mut serf.state {
                SerfState::Transporting(c) | SerfState::Delivering(c) => c.res.take().map(|r| (r, c.dest)),
                _ => None,
            };
            if let Some((res, dest)) = dropped {
                self.cancel_transported_resource(res, dest)?;
                self.lose_resource(res);
            }
        }

        let staffed = half.serfs.len().min(max);
        if staffed > 0 {
            let count = staffed as u8;
            for (id, d) in [(flag, dir), (other, other_dir)] {
                if let Some(p) = self.flags.get_mut(id).and_then(|f| f.path_mut(d)) {
                    p.has_transporter = true;
                    p.free_transporters = count;
                }
            }
        }
        Ok(())
    }

    /// The flag at `pos` is going: join the flags at the ends of its two
    /// roads directly.
    fn merge_paths(&mut self, pos: MapPos) -> GameResult<()> {
        if self.map.paths(pos) == 0 {
            return Ok(());
        }
        let dir_1 = cycle_cw(Direction::Right, 6).find(|&d| self.map.has_path(pos, d));
        let dir_2 = cycle_ccw().find(|&d| self.map.has_path(pos, d));
        let (Some(dir_1), Some(dir_2)) = (dir_1, dir_2) else {
            return Ok(());
        };
        let half_1 = self.fill_path_serf_info(pos, dir_1);
        let half_2 = self.fill_path_serf_info(pos, dir_2);
        let (Some((flag_1, end_1)), Some((flag_2, end_2))) = (half_1.end, half_2.end) else {
            return Err(GameError::CannotDemolish { what: "flag", pos });
        };

        let length = road_length_value(half_1.len + half_2.len);
        let serf_count = (half_1.serfs.len() + half_2.serfs.len()).min(usize::from(u8::MAX)) as u8;
        for (flag, dir, other, other_dir) in [(flag_1, end_1, flag_2, end_2), (flag_2, end_2, flag_1, end_1)] {
            if let Some(p) = self.flags.get_mut(flag).and_then(|f| f.path_mut(dir)) {
                p.other = other;
                p.other_dir = other_dir;
                p.length = length;
                p.serf_requested = false;
                p.has_transporter = serf_count > 0;
                p.free_transporters = serf_count;
            }
        }

        for (_, serf) in self.serfs.iter_mut() {
            serf.path_merged2(flag_1, end_1, flag_2, end_2);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::game_with_castle;

    fn castle_flag_pos(game: &Game) -> MapPos {
        let flag = game.player(0).and_then(|p| p.castle_flag()).expect("castle flag");
        game.flag(flag).map(Flag::pos).expect("flag")
    }

    fn steps_right(game: &Game, mut pos: MapPos, n: usize) -> MapPos {
        for _ in 0..n {
            pos = game.map.move_right(pos);
        }
        pos
    }

    /// A road of four segments to the right of the castle flag.
    fn long_road(game: &mut Game) -> (MapPos, MapPos) {
        let start = castle_flag_pos(game);
        let end = steps_right(game, start, 4);
        game.build_flag(end, 0).expect("flag fits");
        game.build_road(start, &[Direction::Right; 4], 0).expect("road fits");
        (start, end)
    }

    #[test]
    fn test_flags_keep_their_distance() {
        let (game, _) = game_with_castle();
        let start = castle_flag_pos(&game);
        assert!(!game.can_build_flag(steps_right(&game, start, 1), 0));
        assert!(game.can_build_flag(steps_right(&game, start, 2), 0));
        assert!(!game.can_build_flag(steps_right(&game, start, 2), 1));
    }

    #[test]
    fn test_road_links_both_flags() {
        let (mut game, _) = game_with_castle();
        let (start, end) = long_road(&mut game);
        let (a, b) = (game.flag_at(start).expect("a"), game.flag_at(end).expect("b"));

        let out = game.flag(a).and_then(|f| f.path(Direction::Right)).expect("out");
        assert_eq!((out.other, out.other_dir), (b, Direction::Left));
        assert_eq!(out.length, road_length_value(4));
        assert!(!out.water);
        let back = game.flag(b).and_then(|f| f.path(Direction::Left)).expect("back");
        assert_eq!((back.other, back.other_dir), (a, Direction::Right));

        let mid = steps_right(&game, start, 2);
        assert_eq!(game.map.paths(mid), Direction::Left.bit() | Direction::Right.bit());
    }

    #[test]
    fn test_road_needs_flag_at_both_ends() {
        let (mut game, _) = game_with_castle();
        let start = castle_flag_pos(&game);
        assert!(game.can_build_road(start, &[Direction::Right, Direction::Right], 0));
        assert!(game.build_road(start, &[Direction::Right, Direction::Right], 0).is_err());
        assert_eq!(game.map.paths(steps_right(&game, start, 1)), 0);
        assert!(!game.can_build_road(start, &[Direction::Right, Direction::Left], 0));
        assert!(!game.can_build_road(start, &[], 0));
    }

    #[test]
    fn test_flag_on_road_splits_it() {
        let (mut game, _) = game_with_castle();
        let (start, end) = long_road(&mut game);
        let mid = steps_right(&game, start, 2);
        let m = game.build_flag(mid, 0).expect("flag on road");
        let (a, b) = (game.flag_at(start).expect("a"), game.flag_at(end).expect("b"));

        let left = game.flag(m).and_then(|f| f.path(Direction::Left)).expect("left half");
        assert_eq!((left.other, left.other_dir), (a, Direction::Right));
        assert_eq!(left.length, road_length_value(2));
        let right = game.flag(m).and_then(|f| f.path(Direction::Right)).expect("right half");
        assert_eq!((right.other, right.other_dir), (b, Direction::Left));
        assert_eq!(game.flag(a).and_then(|f| f.other_flag(Direction::Right)), Some(m));
        assert_eq!(game.flag(b).and_then(|f| f.other_flag(Direction::Left)), Some(m));
    }

    #[test]
    fn test_demolish_flag_merges_roads() {
        let (mut game, _) = game_with_castle();
        let (start, end) = long_road(&mut game);
        let mid = steps_right(&game, start, 2);
        game.build_flag(mid, 0).expect("flag on road");
        let flags = game.flags().count();

        assert!(game.can_demolish_flag(mid, 0));
        game.demolish_flag(mid, 0).expect("demolish");
        assert_eq!(game.flags().count(), flags - 1);
        assert!(!game.map.has_flag(mid));

        let (a, b) = (game.flag_at(start).expect("a"), game.flag_at(end).expect("b"));
        let merged = game.flag(a).and_then(|f| f.path(Direction::Right)).expect("merged");
        assert_eq!((merged.other, merged.other_dir), (b, Direction::Left));
        assert_eq!(merged.length, road_length_value(4));
    }

    #[test]
    fn test_castle_flag_cannot_be_demolished() {
        let (game, _) = game_with_castle();
        assert!(!game.can_demolish_flag(castle_flag_pos(&game), 0));
    }

    #[test]
    fn test_demolish_road_unlinks_flags() {
        let (mut game, _) = game_with_castle();
        let (start, end) = long_road(&mut game);
        let mid = steps_right(&game, start, 2);
        assert!(!game.can_demolish_road(start, 0));
        game.demolish_road(mid, 0).expect("demolish");

        for i in 1..4 {
            assert_eq!(game.map.paths(steps_right(&game, start, i)), 0);
        }
        let (a, b) = (game.flag_at(start).expect("a"), game.flag_at(end).expect("b"));
        assert!(!game.flag(a).is_some_and(|f| f.has_path(Direction::Right)));
        assert!(!game.flag(b).is_some_and(|f| f.is_connected()));
        assert!(!game.map.has_path(end, Direction::Left));
    }

    #[test]
    fn test_commands_reject_positions_off_the_map() {
        let (mut game, _) = game_with_castle();
        let off = game.map.tile_count();
        assert_eq!(game.build_flag(off, 0), Err(GameError::InvalidPosition(off)));
        assert_eq!(game.demolish_flag(off, 0), Err(GameError::InvalidPosition(off)));
        assert_eq!(game.build_road(off, &[Direction::Right], 0), Err(GameError::InvalidPosition(off)));
        assert_eq!(game.demolish_road(off + 5, 0), Err(GameError::InvalidPosition(off + 5)));
        assert_eq!(game.demolish_building(off, 0), Err(GameError::InvalidPosition(off)));
    }

    #[test]
    fn test_road_to_vanished_flag_is_refused() {
        let (mut game, _) = game_with_castle();
        let start = castle_flag_pos(&game);
        let end = steps_right(&game, start, 4);
        let far = game.build_flag(end, 0).expect("flag fits");
        game.flags.erase(far);

        assert_eq!(game.build_road(start, &[Direction::Right; 4], 0), Err(GameError::NoSuchFlag(far)));
        assert_eq!(game.map.paths(steps_right(&game, start, 2)), 0);
    }
}
