//! Land ownership and military contact: influence of military buildings
//! on the land around them, threat levels of garrisons near the border,
//! capture of enemy buildings and the attack planner.

use super::Game;
use crate::building::{Building, BuildingType};
use crate::collection::BuildingId;
use crate::error::{GameError, GameResult};
use crate::map::{cycle_cw, Direction, MapObject, MapPos, SPIRAL_LEN};
use crate::notification::NotificationKind;
use crate::player::MAX_ATTACKING_BUILDINGS;
use crate::serf::SerfType;

/// Influence of a hut, tower and castle or fortress by closeness. A
/// negative entry blocks the tile for every other player.
const MILITARY_INFLUENCE: [[i32; 10]; 3] = [
    [0, 1, 2, 4, 7, 12, 18, 29, -1, -1],
    [0, 3, 5, 8, 11, 15, 22, 30, -1, -1],
    [0, 6, 10, 14, 19, 23, 27, 31, -1, -1],
];

/// Closeness of each cell of a 17x17 hexagonal influence window to its
/// centre, on the same row/column skew as the map.
const MAP_CLOSENESS: [[usize; 17]; 17] = [
    [1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 2, 2, 2, 2, 2, 2, 2, 2, 1, 0, 0, 0, 0, 0, 0, 0],
    [1, 2, 3, 3, 3, 3, 3, 3, 3, 2, 1, 0, 0, 0, 0, 0, 0],
    [1, 2, 3, 4, 4, 4, 4, 4, 4, 3, 2, 1, 0, 0, 0, 0, 0],
    [1, 2, 3, 4, 5, 5, 5, 5, 5, 4, 3, 2, 1, 0, 0, 0, 0],
    [1, 2, 3, 4, 5, 6, 6, 6, 6, 5, 4, 3, 2, 1, 0, 0, 0],
    [1, 2, 3, 4, 5, 6, 7, 7, 7, 6, 5, 4, 3, 2, 1, 0, 0],
    [1, 2, 3, 4, 5, 6, 7, 8, 8, 7, 6, 5, 4, 3, 2, 1, 0],
    [1, 2, 3, 4, 5, 6, 7, 8, 9, 8, 7, 6, 5, 4, 3, 2, 1],
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 8, 7, 6, 5, 4, 3, 2, 1],
    [0, 0, 1, 2, 3, 4, 5, 6, 7, 7, 7, 6, 5, 4, 3, 2, 1],
    [0, 0, 0, 1, 2, 3, 4, 5, 6, 6, 6, 6, 5, 4, 3, 2, 1],
    [0, 0, 0, 0, 1, 2, 3, 4, 5, 5, 5, 5, 5, 4, 3, 2, 1],
    [0, 0, 0, 0, 0, 1, 2, 3, 4, 4, 4, 4, 4, 4, 3, 2, 1],
    [0, 0, 0, 0, 0, 0, 1, 2, 3, 3, 3, 3, 3, 3, 3, 2, 1],
    [0, 0, 0, 0, 0, 0, 0, 1, 2, 2, 2, 2, 2, 2, 2, 2, 1],
    [0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1],
];

const WINDOW: usize = 17;
const WINDOW_RADIUS: i32 = 8;

/// Cell value that marks a tile as off limits to a player.
const BLOCKED: i32 = 128;

/// Spiral ranges checked for enemy land, nearest threat first.
const THREAT_RANGES: [(u8, &[(usize, usize)]); 3] = [
    (3, &[(31, 42), (100, 108), (259, 264), (241, 246), (217, 228), (247, 252)]),
    (2, &[(265, 276)]),
    (1, &[(277, 294)]),
];

/// Shells scanned around an attack target.
const ATTACK_SCAN_SHELLS: usize = 32;

impl Game {
    // ── Threat ──────────────────────────────────────────────────────────

    /// Set the threat level of a military building from the nearest enemy
    /// land around it.
    pub(crate) fn calculate_military_flag_state(&mut self, id: BuildingId) {
        let Some(b) = self.buildings.get(id) else {
            return;
        };
        let (pos, owner) = (b.pos(), b.owner());
        let enemy_at = |i: usize| {
            let p = self.map.pos_add_spirally(pos, i);
            self.map.owner(p).is_some_and(|o| o != owner)
        };

        let level = THREAT_RANGES
            .iter()
            .find(|(_, ranges)| {
                ranges
                    .iter()
                    .any(|&(from, to)| (from..=to.min(SPIRAL_LEN - 1)).any(&enemy_at))
            })
            .map_or(0, |&(level, _)| level);

        if let Some(b) = self.buildings.get_mut(id) {
            if b.threat_level() != level {
                log::debug!("building {} threat level {} -> {}", id, b.threat_level(), level);
            }
            b.set_threat_level(level);
        }
    }

    // ── Ownership ───────────────────────────────────────────────────────

    /// Recompute who owns the land within eight tiles of `init` from the
    /// influence of every active military building nearby. Land changing
    /// hands is surrendered by its old owner.
    pub(crate) fn update_land_ownership(&mut self, init: MapPos) -> GameResult<()> {
        let players = self.players.len();
        let mut influence = vec![[0i32; WINDOW * WINDOW]; players];

        let reach = 2 * WINDOW_RADIUS;
        for i in -reach..=reach {
            for j in -reach..=reach {
                let pos = self.map.pos_add(init, j, i);
                let Some(kind) = self.influence_kind(pos) else {
                    continue;
                };
                let Some(owner) = self.map.building_at(pos).and_then(|id| self.buildings.get(id)).map(Building::owner)
                else {
                    continue;
                };
                let Some(grid) = influence.get_mut(usize::from(owner)) else {
                    continue;
                };
                spread_influence(grid, kind, i, j);
            }
        }

        for i in -WINDOW_RADIUS..=WINDOW_RADIUS {
            for j in -WINDOW_RADIUS..=WINDOW_RADIUS {
                let cell = ((i + WINDOW_RADIUS) as usize) * WINDOW + (j + WINDOW_RADIUS) as usize;
                let mut new_owner = None;
                let mut max = 0;
                for (p, grid) in influence.iter().enumerate() {
                    if grid[cell] > max {
                        max = grid[cell];
                        new_owner = Some(p as u8);
                    }
                }

                let pos = self.map.pos_add(init, j, i);
                let old_owner = self.map.owner(pos);
                if old_owner == new_owner {
                    continue;
                }
                if let Some(old) = old_owner {
                    if let Some(p) = self.players.get_mut(usize::from(old)) {
                        p.decrease_land_area();
                    }
                    self.surrender_land(pos)?;
                }
                if let Some(new) = new_owner {
                    if let Some(p) = self.players.get_mut(usize::from(new)) {
                        p.increase_land_area();
                    }
                }
                self.map.set_owner(pos, new_owner);
            }
        }

        // Border changes move threat levels of garrisons further out too.
        let radius = 25;
        for i in -radius..=radius {
            for j in -radius..=radius {
                let pos = self.map.pos_add(init, j, i);
                if !self.map.obj(pos).is_building() {
                    continue;
                }
                let military = self
                    .map
                    .building_at(pos)
                    .filter(|&id| self.buildings.get(id).is_some_and(|b| b.is_done() && b.is_military()));
                if let Some(id) = military {
                    self.calculate_military_flag_state(id);
                }
            }
        }
        Ok(())
    }

    /// Influence table row of the building at `pos`, when it projects any.
    fn influence_kind(&self, pos: MapPos) -> Option<usize> {
        if !self.map.obj(pos).is_building() || !self.map.has_path(pos, Direction::DownRight) {
            return None;
        }
        let b = self.map.building_at(pos).and_then(|id| self.buildings.get(id))?;
        if b.is_burning() {
            return None;
        }
        match b.btype() {
            BuildingType::Castle => Some(2),
            _ if !b.is_done() || !b.is_active() => None,
            BuildingType::Hut => Some(0),
            BuildingType::Tower => Some(1),
            BuildingType::Fortress => Some(2),
            _ => None,
        }
    }

    /// Land at `pos` was lost: whatever the old owner had on it burns and
    /// roads through it are cut.
    fn surrender_land(&mut self, pos: MapPos) -> GameResult<()> {
        if self.map.obj(pos).is_building() {
            self.burn_building(pos)?;
        }

        if !self.map.has_flag(pos) && self.map.paths(pos) != 0 {
            self.remove_road_at(pos)?;
        }

        let remove_roads = self.map.has_flag(pos);
        for d in cycle_cw(Direction::Right, 6) {
            let p = self.map.move_pos(pos, d);
            if self.map.obj(p).is_building() {
                self.burn_building(p)?;
            }
            if remove_roads && self.map.has_path(p, d.reverse()) && !self.map.obj(p).is_building() {
                self.remove_road_at(p)?;
            }
        }

        if self.map.obj(pos) == MapObject::Flag {
            self.remove_flag(pos)?;
        }
        Ok(())
    }

    /// Clear a flag at `pos` together with its building and roads, or the
    /// road running through `pos`.
    fn demolish_flag_and_roads(&mut self, pos: MapPos) -> GameResult<()> {
        if !self.map.has_flag(pos) {
            if self.map.paths(pos) != 0 {
                self.remove_road_at(pos)?;
            }
            return Ok(());
        }

        let building_pos = self.map.move_up_left(pos);
        if self.map.has_path(pos, Direction::UpLeft) && self.map.obj(building_pos).is_building() {
            self.burn_building(building_pos)?;
        }
        for d in cycle_cw(Direction::Right, 6) {
            let p = self.map.move_pos(pos, d);
            if self.map.has_path(p, d.reverse()) && !self.map.obj(p).is_building() {
                self.remove_road_at(p)?;
            }
        }
        self.remove_flag(pos)
    }

    // ── Capture ─────────────────────────────────────────────────────────

    /// Recompute ownership after a building changed hands and tell its
    /// previous owner what was lost.
    pub(crate) fn building_captured(&mut self, id: BuildingId, previous_owner: u8) -> GameResult<()> {
        let Some(pos) = self.buildings.get(id).map(Building::pos) else {
            return Ok(());
        };
        let before: Vec<(u32, u32)> = self
            .players
            .iter()
            .map(|p| (p.land_area(), p.building_score()))
            .collect();

        self.update_land_ownership(pos)?;

        let Some(p) = self.players.get_mut(usize::from(previous_owner)) else {
            return Ok(());
        };
        let (_, score_before) = before
            .get(usize::from(previous_owner))
            .copied()
            .unwrap_or_default();
        let kind = if p.building_score() < score_before {
            NotificationKind::LostBuildings
        } else {
            NotificationKind::LostLand
        };
        p.notify(kind, pos, u32::from(previous_owner));
        Ok(())
    }

    /// A victorious attacker takes over an enemy building for `player`. A
    /// castle cannot be taken and burns instead.
    pub(crate) fn occupy_enemy_building(&mut self, id: BuildingId, player: u8) -> GameResult<()> {
        let Some(b) = self.buildings.get(id) else {
            return Err(GameError::NoSuchBuilding(id));
        };
        let (btype, pos, flag, old_owner) = (b.btype(), b.pos(), b.flag(), b.owner());

        if btype == BuildingType::Castle {
            if let Some(p) = self.players.get_mut(usize::from(old_owner)) {
                p.castle_defeated();
            }
            log::info!("castle of player {} falls to player {}", old_owner, player);
            return self.burn_building(pos);
        }

        if let Some(p) = self.players.get_mut(usize::from(old_owner)) {
            p.building_lost(btype);
        }
        if let Some(p) = self.players.get_mut(usize::from(player)) {
            p.building_taken(btype);
        }
        if let Some(b) = self.buildings.get_mut(id) {
            b.set_owner(player);
        }
        self.reset_transport(flag);

        for i in 7..19 {
            let p = self.map.pos_add_spirally(pos, i);
            if self.map.obj(p).is_building() {
                self.burn_building(p)?;
            }
        }

        let flag_pos = self.map.move_down_right(pos);
        self.map.set_owner(pos, Some(player));
        for d in cycle_cw(Direction::Right, 6) {
            let p = self.map.move_pos(pos, d);
            self.map.set_owner(p, Some(player));
            if p != flag_pos {
                self.demolish_flag_and_roads(p)?;
            }
        }

        let stranded = match self.flags.get_mut(flag) {
            Some(f) => {
                f.set_owner(player);
                f.clear_destinations()
            }
            None => Vec::new(),
        };
        for (res, dest) in stranded {
            self.cancel_transported_resource(res, dest)?;
        }

        let roads: Vec<Direction> = self
            .flags
            .get(flag)
            .map(|f| f.path_dirs().collect())
            .unwrap_or_default();
        for d in roads {
            self.remove_road_from_flag(flag_pos, d)?;
        }

        log::info!("player {} captured {} {} from player {}", player, btype, id, old_owner);
        self.building_captured(id, old_owner)
    }

    // ── Attack ──────────────────────────────────────────────────────────

    /// Scan the military buildings of `player` around `target_pos` and
    /// record which of them can send knights. Returns the knights free to
    /// attack.
    pub fn knights_available_for_attack(&mut self, player: u8, target_pos: MapPos) -> GameResult<u32> {
        let Some(owner) = self.players.get(usize::from(player)) else {
            return Err(GameError::NoSuchPlayer(usize::from(player)));
        };

        let mut plan = crate::player::AttackPlan {
            target: self.map.building_at(target_pos),
            ..Default::default()
        };
        let check_path = self.options.check_path_before_attack;
        let max_ratio = self.options.max_detour_ratio;

        let mut pos = target_pos;
        for shell in 1..=ATTACK_SCAN_SHELLS {
            pos = self.map.move_right(pos);
            for d in [
                Direction::Down,
                Direction::Left,
                Direction::UpLeft,
                Direction::Up,
                Direction::Right,
                Direction::DownRight,
            ] {
                for _ in 0..shell {
                    if let Some((id, free)) = self.attack_candidate(pos, player, owner, &plan, target_pos, check_path, max_ratio) {
                        plan.buildings.push(id);
                        plan.knights_by_distance[(shell - 1) / 8] += free;
                    }
                    pos = self.map.move_pos(pos, d);
                }
            }
        }

        let total = plan.total();
        log::debug!(
            "player {} can attack {} with {} knights from {} buildings",
            player,
            target_pos,
            total,
            plan.buildings.len()
        );
        if let Some(p) = self.players.get_mut(usize::from(player)) {
            p.attack = plan;
        }
        Ok(total)
    }

    /// The building at `pos` when it may send knights against `target`,
    /// with the number it can spare.
    #[allow(clippy::too_many_arguments)]
    fn attack_candidate(
        &self,
        pos: MapPos,
        player: u8,
        owner: &crate::player::Player,
        plan: &crate::player::AttackPlan,
        target: MapPos,
        check_path: bool,
        max_ratio: f64,
    ) -> Option<(BuildingId, u32)> {
        if self.map.owner(pos) != Some(player) || self.map.is_in_water(pos) || !self.map.obj(pos).is_building() {
            return None;
        }
        let id = self.map.building_at(pos)?;
        if plan.buildings.contains(&id) || plan.buildings.len() >= MAX_ATTACKING_BUILDINGS {
            return None;
        }
        let b = self.buildings.get(id)?;
        if !b.is_done() || b.is_burning() || !b.is_active() {
            return None;
        }
        let kept = owner.knights_kept_home(b.btype(), b.threat_level())?;
        if check_path && !crate::pathfinder::is_reachable_within_ratio(&self.map, pos, target, max_ratio) {
            return None;
        }
        Some((id, b.knights_present().saturating_sub(kept)))
    }

    /// Send up to `knights` knights from the last attack scan against its
    /// target. Returns the knights actually sent.
    pub fn start_attack(&mut self, player: u8, knights: u32) -> GameResult<u32> {
        let Some(p) = self.players.get(usize::from(player)) else {
            return Err(GameError::NoSuchPlayer(usize::from(player)));
        };
        let plan = p.attack.clone();
        let strongest = p.send_strongest;
        let Some(target) = plan.target else {
            return Ok(0);
        };
        let Some(t) = self.buildings.get(target) else {
            return Ok(0);
        };
        if !t.is_done() || !t.is_military() || !t.is_active() || t.threat_level() != 3 {
            return Ok(0);
        }
        let target_pos = t.pos();

        let mut left = knights.min(plan.total());
        let mut sent = 0;
        for &id in &plan.buildings {
            if left == 0 {
                break;
            }
            let Some(b) = self.buildings.get(id) else {
                continue;
            };
            let pos = b.pos();
            if b.is_burning() || self.map.owner(pos) != Some(player) {
                continue;
            }
            let flag_pos = self.map.move_down_right(pos);
            let blocked = self
                .map
                .serf_at(flag_pos)
                .and_then(|s| self.serfs.get(s))
                .is_some_and(|s| s.owner() != player);
            if blocked {
                continue;
            }
            let Some(kept) = self
                .players
                .get(usize::from(player))
                .and_then(|p| p.knights_kept_home(b.btype(), b.threat_level()))
            else {
                continue;
            };
            let spare = b.knights_present().saturating_sub(kept);

            for _ in 0..spare {
                if left == 0 {
                    break;
                }
                let Some(knight) = self.pick_attacker(id, strongest) else {
                    break;
                };
                if !self.call_attacker_out(id, knight) {
                    break;
                }
                let dist_col = self.map.dist_x(pos, target_pos);
                let dist_row = self.map.dist_y(pos, target_pos);
                if let Some(s) = self.serfs.get_mut(knight) {
                    s.send_off_to_fight(dist_col, dist_row);
                }
                if let Some(t) = self.buildings.get_mut(target) {
                    t.set_under_attack(true);
                }
                left -= 1;
                sent += 1;
            }
        }

        if let Some(p) = self.players.get_mut(usize::from(player)) {
            p.attack.knights_attacking = sent;
        }
        if sent > 0 {
            log::info!("player {} attacks {} with {} knights", player, target_pos, sent);
        }
        Ok(sent)
    }

    /// The garrison knight to send out: the strongest or the weakest,
    /// ties going to the one furthest down the chain.
    fn pick_attacker(&self, building: BuildingId, strongest: bool) -> Option<crate::collection::SerfId> {
        let first = self.buildings.get(building)?.first_knight();
        let chain = self.knight_chain(first);
        let mut best: Option<(crate::collection::SerfId, SerfType)> = None;
        for id in chain {
            let Some(ty) = self.serfs.get(id).map(|s| s.serf_type) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((_, b)) if strongest => ty >= b,
                Some((_, b)) => ty <= b,
            };
            if better {
                best = Some((id, ty));
            }
        }
        best.map(|(id, _)| id)
    }
}

/// Add the influence of a building at row `i`, column `j` relative to the
/// window centre.
fn spread_influence(grid: &mut [i32; WINDOW * WINDOW], kind: usize, i: i32, j: i32) {
    let size = WINDOW as i32;
    for r in 0..size {
        let cr = r - i;
        if !(0..size).contains(&cr) {
            continue;
        }
        for c in 0..size {
            let cc = c - j;
            if !(0..size).contains(&cc) {
                continue;
            }
            let closeness = MAP_CLOSENESS[cr as usize][cc as usize];
            let inf = MILITARY_INFLUENCE[kind][closeness];
            let cell = &mut grid[(r as usize) * WINDOW + c as usize];
            if inf < 0 {
                *cell = BLOCKED;
            } else if *cell < BLOCKED {
                *cell = (*cell + inf).min(BLOCKED - 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameOptions, PlayerSettings};
    use crate::game::tests::{game_with_castle, staffed_hut};
    use crate::map::Map;
    use crate::random::GameRng;
    use crate::serf::SerfState;

    /// Open flat land with an attacker (player 0) and a defender (player 1)
    /// and no castles.
    fn open_field() -> Game {
        let mut rng = GameRng::new(9);
        let map = Map::generate_flat(4, &mut rng);
        let mut game = Game::new(map, 9, GameOptions::default());
        game.add_player(PlayerSettings::default()).expect("attacker");
        game.add_player(PlayerSettings::default()).expect("defender");
        game
    }

    /// A defending hut of player 1 at `pos`, ready to be attacked.
    fn enemy_hut(game: &mut Game, pos: MapPos) -> BuildingId {
        let id = staffed_hut(game, pos, 1, &[SerfType::Knight0]);
        if let Some(b) = game.buildings.get_mut(id) {
            b.set_threat_level(3);
        }
        id
    }

    #[test]
    fn test_closeness_is_symmetric_about_centre() {
        let centre = WINDOW / 2;
        assert_eq!(MAP_CLOSENESS[centre][centre], 9);
        for r in 0..WINDOW {
            for c in 0..WINDOW {
                assert_eq!(MAP_CLOSENESS[r][c], MAP_CLOSENESS[WINDOW - 1 - r][WINDOW - 1 - c]);
            }
        }
    }

    #[test]
    fn test_influence_grows_toward_centre() {
        for row in MILITARY_INFLUENCE {
            assert!(row[..8].windows(2).all(|w| w[0] < w[1]));
            assert_eq!(row[9], -1);
        }
    }

    #[test]
    fn test_spread_influence_blocks_core() {
        let mut grid = [0; WINDOW * WINDOW];
        spread_influence(&mut grid, 0, 0, 0);
        let centre = (WINDOW / 2) * WINDOW + WINDOW / 2;
        assert_eq!(grid[centre], BLOCKED);
        assert_eq!(grid[0], 1);
        assert_eq!(grid[WINDOW - 1], 0);
    }

    #[test]
    fn test_castle_owns_its_window() {
        let (game, center) = game_with_castle();
        for i in 0..19 {
            assert_eq!(game.map.owner(game.map.pos_add_spirally(center, i)), Some(0));
        }
        let land = game.player(0).map_or(0, |p| p.land_area());
        let owned = game.map.positions().filter(|&p| game.map.owner(p) == Some(0)).count();
        assert_eq!(land as usize, owned);
    }

    #[test]
    fn test_threat_follows_nearest_enemy_land() {
        let (mut game, center) = game_with_castle();
        game.add_player(PlayerSettings::default()).expect("second player");
        let castle = game.building_at(center).expect("castle");
        assert_eq!(game.building(castle).map(Building::threat_level), Some(0));

        for (index, level) in [(280, 1), (265, 2), (31, 3)] {
            let pos = game.map.pos_add_spirally(center, index);
            game.map.set_owner(pos, Some(1));
            game.calculate_military_flag_state(castle);
            assert_eq!(game.building(castle).map(Building::threat_level), Some(level));
        }
    }

    #[test]
    fn test_rival_castle_keeps_its_distance() {
        let (mut game, center) = game_with_castle();
        game.add_player(PlayerSettings::default()).expect("second player");
        let rival = game.map.pos_add(center, 20, 0);
        game.build_castle(rival, 1).expect("rival castle");
        assert_eq!(game.map.owner(game.map.pos_add(center, 4, 0)), Some(0));
        assert_eq!(game.map.owner(rival), Some(1));
        let land_0 = game.player(0).map_or(0, |p| p.land_area());
        let land_1 = game.player(1).map_or(0, |p| p.land_area());
        assert_eq!(land_0, land_1);
    }

    #[test]
    fn test_no_attack_without_garrisons() {
        let (mut game, center) = game_with_castle();
        game.add_player(PlayerSettings::default()).expect("second player");
        let rival = game.map.pos_add(center, 20, 0);
        game.build_castle(rival, 1).expect("rival castle");

        // Castles never join an attack.
        assert_eq!(game.knights_available_for_attack(0, rival), Ok(0));
        assert!(game.player(0).is_some_and(|p| p.attack.buildings.is_empty()));
        assert_eq!(game.start_attack(0, 5), Ok(0));
        assert!(game.knights_available_for_attack(7, rival).is_err());
    }

    #[test]
    fn test_attack_scan_reaches_outer_shell() {
        let mut game = open_field();
        let target = game.map.pos(40, 20);
        let near_pos = game.map.pos_add(target, 8, 0);
        let far_pos = game.map.pos_add(target, 32, 0);
        let near = staffed_hut(&mut game, near_pos, 0, &[SerfType::Knight0; 3]);
        let far = staffed_hut(&mut game, far_pos, 0, &[SerfType::Knight0; 2]);

        // Each hut keeps one knight at home.
        assert_eq!(game.knights_available_for_attack(0, target), Ok(3));
        let plan = &game.player(0).expect("attacker").attack;
        assert_eq!(plan.buildings, vec![near, far]);
        assert_eq!(plan.knights_by_distance, [2, 0, 0, 1]);
    }

    #[test]
    fn test_attack_sends_nearest_spare_knights() {
        let mut game = open_field();
        let target_pos = game.map.pos(40, 20);
        let target = enemy_hut(&mut game, target_pos);
        let near_pos = game.map.pos_add(target_pos, 4, 0);
        let far_pos = game.map.pos_add(target_pos, 12, 0);
        let knights = [SerfType::Knight0, SerfType::Knight1, SerfType::Knight2];
        let near = staffed_hut(&mut game, near_pos, 0, &knights);
        let far = staffed_hut(&mut game, far_pos, 0, &knights);

        assert_eq!(game.knights_available_for_attack(0, target_pos), Ok(4));
        assert_eq!(game.start_attack(0, 3), Ok(3));

        // The near hut gives up all it can spare before the far one.
        assert_eq!(game.building(near).map(Building::knights_present), Some(1));
        assert_eq!(game.building(far).map(Building::knights_present), Some(2));
        assert_eq!(game.knight_chain(game.building(near).and_then(Building::first_knight)).len(), 1);
        assert_eq!(game.knight_chain(game.building(far).and_then(Building::first_knight)).len(), 2);

        let marching = game
            .serfs
            .values()
            .filter(|s| matches!(s.state, SerfState::KnightLeaveForWalkToFight(_)))
            .count();
        assert_eq!(marching, 3);
        assert!(game.building(target).is_some_and(Building::is_under_attack));
        assert_eq!(game.player(0).map(|p| p.attack.knights_attacking), Some(3));
    }

    #[test]
    fn test_attack_skips_garrison_behind_lake() {
        let mut game = open_field();
        let target = game.map.pos(40, 20);
        let hut_pos = game.map.pos_add(target, 8, 0);
        staffed_hut(&mut game, hut_pos, 0, &[SerfType::Knight0; 3]);
        game.map.add_lake(game.map.pos_add(target, 4, 0), 2, 0);

        game.options.max_detour_ratio = 1.0;
        assert_eq!(game.knights_available_for_attack(0, target), Ok(0));

        game.options.check_path_before_attack = false;
        assert_eq!(game.knights_available_for_attack(0, target), Ok(2));

        game.options.check_path_before_attack = true;
        game.options.max_detour_ratio = 3.0;
        assert_eq!(game.knights_available_for_attack(0, target), Ok(2));
    }

    #[test]
    fn test_castle_capture_burns_it() {
        let (mut game, center) = game_with_castle();
        game.add_player(PlayerSettings::default()).expect("second player");
        let castle = game.building_at(center).expect("castle");
        game.occupy_enemy_building(castle, 1).expect("capture");
        assert!(game.building(castle).is_some_and(Building::is_burning));
        assert!(game.player(0).is_some_and(|p| !p.has_castle()));
        assert_eq!(game.map.owner(center), None);
    }
}
