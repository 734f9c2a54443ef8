//! Knight combat: engaging enemy buildings, fights at the flag and in
//! the open, and occupying buildings left without defenders.
//!
//! A fight is decided when it starts. Both sides get a morale value from
//! their rank and the land they stand on; one random draw weighted by the
//! two values picks the winner. The exchange of blows that follows is
//! only played out for the animation.

use super::{
    anim_counter, defending_state, DefendFree, Entry, Exit, Fight, FreeWalk, Serf, SerfState, SerfType, VictoryFree,
};
use crate::building::BuildingType;
use crate::collection::{BuildingId, SerfId};
use crate::error::GameResult;
use crate::game::Game;
use crate::map::Direction;
use crate::notification::NotificationKind;

/// Fight move sequences, read from a random start offset until a negative
/// entry. Moves range over the five rows of `FIGHT_ANIM`.
const MOVES: [i32; 125] = [
    1, 2, 4, 2, 0, 2, 4, 2, 1, 0, 2, 2, 3, 0, 0, -1,
    3, 2, 2, 3, 0, 4, 1, 3, 2, 4, 2, 2, 3, 0, 0, -1,
    2, 1, 4, 3, 2, 2, 2, 3, 0, 3, 1, 2, 0, 2, 0, -1,
    2, 1, 3, 2, 4, 2, 3, 0, 0, 4, 2, 0, 2, 1, 0, -1,
    3, 1, 0, 2, 2, 1, 0, 2, 4, 2, 2, 3, 0, 0, -1,
    0, 3, 1, 2, 3, 4, 2, 1, 2, 0, 2, 4, 0, 2, 0, -1,
    0, 2, 1, 2, 4, 2, 3, 0, 2, 4, 3, 2, 0, 0, -1,
    0, 0, 1, 4, 3, 2, 2, 1, 2, 0, 0, 4, 3, 0, -1,
];

/// Paired attacker/defender animation offsets per move, high nibble for
/// the attacker.
const FIGHT_ANIM: [[i32; 16]; 5] = [
    [24, 35, 41, 56, 67, 72, 83, 89, 100, 121, 0, 0, 0, 0, 0, 0],
    [26, 40, 42, 57, 73, 74, 88, 104, 106, 120, 122, 0, 0, 0, 0, 0],
    [17, 18, 23, 33, 34, 38, 39, 98, 102, 103, 113, 114, 118, 119, 0, 0],
    [130, 133, 134, 135, 147, 148, 161, 162, 164, 166, 167, 0, 0, 0, 0, 0],
    [50, 52, 53, 70, 129, 131, 132, 146, 149, 151, 0, 0, 0, 0, 0, 0],
];

const FIGHT_ANIM_LEN: [i32; 5] = [10, 11, 14, 11, 10];

/// Territory factor of a knight standing on its own land.
pub const HOME_LAND_FACTOR: u32 = 0x1000;

/// Fighting strength of a knight of rank `level` with the given territory
/// factor: `HOME_LAND_FACTOR` at home, the player's knight morale abroad.
pub fn fight_morale(level: u8, land_factor: u32) -> i32 {
    let exp_factor = 1i64 << level;
    ((0x400 * exp_factor * i64::from(land_factor)) >> 16) as i32
}

/// Whether the attacker wins against the defender for a 16-bit random
/// `roll`. The attacker wins with probability `morale / (morale + def_morale)`.
pub fn attacker_wins(morale: i32, def_morale: i32, roll: u16) -> bool {
    let r = ((i64::from(morale) + i64::from(def_morale)) * i64::from(roll)) >> 16;
    r < i64::from(morale)
}

fn move_at(index: usize) -> i32 {
    MOVES.get(index).copied().unwrap_or(-1)
}

/// Shift a free-walk offset by one step taken in `dir`.
fn step_toward(dist_col: &mut i32, dist_row: &mut i32, dir: Direction) {
    let (dx, dy) = dir.offset();
    *dist_col -= dx;
    *dist_row -= dy;
}

impl Game {
    fn knight_land_factor(&self, s: &Serf) -> u32 {
        if self.map.owner(s.pos) == Some(s.owner) {
            HOME_LAND_FACTOR
        } else {
            self.players
                .get(usize::from(s.owner))
                .map_or(HOME_LAND_FACTOR, |p| p.knight_morale())
        }
    }

    /// Decide the fight between `attacker` and `defender` and pick the
    /// start of the move sequence.
    fn set_fight_outcome(&mut self, attacker: &Serf, defender: &Serf) -> (bool, usize) {
        let level = attacker.serf_type.knight_level().unwrap_or(0);
        let def_level = defender.serf_type.knight_level().unwrap_or(0);
        let morale = fight_morale(level, self.knight_land_factor(attacker));
        let def_morale = fight_morale(def_level, self.knight_land_factor(defender));

        let roll = self.random_int() as u16;
        let won = attacker_wins(morale, def_morale, roll);
        log::debug!(
            "fight: knight {} ({}) vs knight {} ({}), {} wins",
            attacker.index,
            morale,
            defender.index,
            def_morale,
            if won { "attacker" } else { "defender" }
        );
        let start = (self.random_int() & 0x70) as usize;
        (won, start)
    }

    fn notify_fight(&mut self, winner: &Serf, loser: &Serf) {
        if let Some(p) = self.players.get_mut(usize::from(winner.owner)) {
            p.notify(NotificationKind::VictoryFight, winner.pos, u32::from(loser.owner));
        }
        if let Some(p) = self.players.get_mut(usize::from(loser.owner)) {
            p.notify(NotificationKind::LostFight, loser.pos, u32::from(winner.owner));
        }
    }

    fn store_serf(&mut self, serf: Serf) {
        if let Some(slot) = self.serfs.get_mut(serf.index) {
            *slot = serf;
        }
    }

    /// The enemy military building in front of the knight, if any.
    fn building_ahead(&self, s: &Serf) -> Option<BuildingId> {
        let pos = self.map.move_up_left(s.pos);
        if !self.map.obj(pos).is_building() {
            return None;
        }
        self.map.building_at(pos)
    }

    /// Take the last knight of a garrison out to defend the building.
    pub(crate) fn call_defender_out(&mut self, building: BuildingId) -> Option<SerfId> {
        let b = self.buildings.get_mut(building)?;
        let first = b.first_knight()?;
        if b.has_inventory() {
            let owner = usize::from(b.owner());
            if let Some(p) = self.players.get_mut(owner) {
                p.decrease_castle_knights();
            }
        } else {
            b.defender_called_out();
        }

        let (last, _) = self.extract_last_knight(first);
        if last == first {
            if let Some(b) = self.buildings.get_mut(building) {
                b.set_first_knight(None);
            }
        }
        Some(last)
    }

    /// Unlink `knight` from the garrison of `building` so it can leave
    /// to attack. Returns false when the knight is not in the chain.
    pub(crate) fn call_attacker_out(&mut self, building: BuildingId, knight: SerfId) -> bool {
        let Some(first) = self.buildings.get(building).and_then(|b| b.first_knight()) else {
            return false;
        };
        let next = self.serfs.get(knight).and_then(|k| k.state.next_knight());

        if first == knight {
            if let Some(b) = self.buildings.get_mut(building) {
                b.set_first_knight(next);
            }
        } else {
            let mut prev = first;
            let mut guard = 0;
            loop {
                let Some(current_next) = self.serfs.get(prev).and_then(|k| k.state.next_knight()) else {
                    return false;
                };
                if current_next == knight {
                    break;
                }
                prev = current_next;
                guard += 1;
                if guard > 1024 {
                    return false;
                }
            }
            if let Some(p) = self.serfs.get_mut(prev) {
                p.insert_before(next);
            }
        }

        if let Some(k) = self.serfs.get_mut(knight) {
            k.insert_before(None);
        }
        if let Some(b) = self.buildings.get_mut(building) {
            b.knight_left();
        }
        true
    }

    // ── At the enemy flag ───────────────────────────────────────────────

    pub(super) fn handle_knight_engaging_building(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }

        if let Some(id) = self.building_ahead(s) {
            let target = self.buildings.get(id).map(|b| {
                let defended = b.is_done() && b.is_military() && b.owner() != s.owner && b.has_knight();
                (defended, b.owner(), b.pos())
            });
            if let Some((true, owner, pos)) = target {
                if let Some(b) = self.buildings.get_mut(id) {
                    b.set_under_attack(true);
                }
                if let Some(p) = self.players.get_mut(usize::from(owner)) {
                    p.notify(NotificationKind::UnderAttack, pos, u32::from(s.owner));
                }

                if let Some(def_id) = self.call_defender_out(id) {
                    s.counter = 0;
                    s.animation = 168;
                    s.set_state(SerfState::KnightPrepareAttacking(Fight {
                        defender: Some(def_id),
                        ..Fight::default()
                    }));
                    if let Some(def) = self.serfs.get_mut(def_id) {
                        def.set_state(SerfState::KnightLeaveForFight {
                            exit: Exit::KnightPrepareDefending,
                        });
                        def.counter = 0;
                    }
                    return Ok(());
                }
            }
        }

        // Nobody defends the building: take it.
        s.set_state(SerfState::KnightOccupyEnemyBuilding);
        s.animation = 179;
        s.counter = anim_counter(179);
        s.tick = self.tick16();
        Ok(())
    }

    pub(super) fn handle_knight_prepare_attacking(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightPrepareAttacking(fight) = s.state else {
            return Ok(());
        };
        let Some(def_id) = fight.defender else {
            s.set_lost();
            return Ok(());
        };
        let Some(mut def) = self.serfs.get(def_id).cloned() else {
            s.set_lost();
            return Ok(());
        };
        if def.state != SerfState::KnightPrepareDefending {
            return Ok(());
        }

        let (attacker_won, move_index) = self.set_fight_outcome(s, &def);
        s.set_state(SerfState::KnightAttacking(Fight {
            attacker_won,
            move_index,
            ..fight
        }));
        s.counter = 0;
        s.tick = self.tick16();

        def.set_state(SerfState::KnightDefending);
        def.counter = 0;
        self.store_serf(def);
        Ok(())
    }

    pub(super) fn handle_knight_leave_for_fight(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightLeaveForFight { exit } = s.state else {
            return Ok(());
        };
        s.tick = self.tick16();
        s.counter = 0;

        let here = self.map.serf_at(s.pos);
        if here.is_none() || here == Some(s.index) {
            self.leave_building(s, exit, true);
        }
        Ok(())
    }

    /// Play out a fight, at a flag or in the open. The defender's timing
    /// follows the attacker's.
    pub(super) fn handle_knight_attacking(&mut self, s: &mut Serf) -> GameResult<()> {
        let (fight, free) = match s.state {
            SerfState::KnightAttacking(f) => (f, false),
            SerfState::KnightAttackingFree(f) => (f, true),
            _ => return Ok(()),
        };
        let Some(mut def) = fight.defender.and_then(|id| self.serfs.get(id).cloned()) else {
            log::warn!("knight {}: defender vanished mid-fight", s.index);
            s.set_lost();
            return Ok(());
        };

        self.elapse(s);
        def.tick = s.tick;
        def.counter = s.counter;

        let mut fight = fight;
        while s.counter < 0 {
            let mv = move_at(fight.move_index);
            if mv >= 0 {
                fight.move_index += 1;
                let mv = (if fight.attacker_won { mv } else { 4 - mv }) as usize;
                let off = (self.random_int() * FIGHT_ANIM_LEN[mv]) >> 16;
                let a = FIGHT_ANIM[mv][off as usize];
                s.animation = 146 + ((a >> 4) & 0xf);
                def.animation = 156 + (a & 0xf);
                s.counter = 72 + (self.random_int() & 0x18);
                def.counter = s.counter;
                continue;
            }

            if fight.attacker_won {
                self.notify_fight(s, &def);
                if free {
                    let DefendFree {
                        attacker_was_free_walking,
                        other_dist_col,
                        other_dist_row,
                        ..
                    } = match def.state {
                        SerfState::KnightDefendingFree(d) => d,
                        _ => DefendFree::default(),
                    };
                    s.set_state(SerfState::KnightAttackingVictoryFree(VictoryFree {
                        resume: attacker_was_free_walking,
                        dist_col: other_dist_col,
                        dist_row: other_dist_row,
                        defender: fight.defender,
                    }));
                } else {
                    s.set_state(SerfState::KnightAttackingVictory(fight));
                    let home = self.map.move_up_left(def.pos);
                    if let Some(b) = self.map.building_at(home).and_then(|b| self.buildings.get_mut(b)) {
                        if !b.has_inventory() {
                            b.requested_knight_lost();
                        }
                    }
                }
                s.animation = 168;
                s.counter = 0;

                // The defender falls.
                def.tick = self.tick16();
                def.animation = 147 + def.serf_type as i32;
                def.counter = 255;
                self.set_serf_type(&mut def, SerfType::Dead);
            } else {
                self.notify_fight(&def, s);
                if free {
                    def.set_state(SerfState::KnightDefendingVictoryFree(match def.state {
                        SerfState::KnightDefendingFree(d) => d,
                        _ => DefendFree::default(),
                    }));
                    def.animation = 180;
                    def.counter = 0;
                    s.set_state(SerfState::KnightAttackingDefeatFree(fight));
                } else {
                    self.enter_building(&mut def, Entry::Returning, true);
                    s.set_state(SerfState::KnightAttackingDefeat);
                }
                s.animation = 152 + s.serf_type as i32;
                s.counter = 255;
                self.set_serf_type(s, SerfType::Dead);
            }
            break;
        }

        if let SerfState::KnightAttacking(f) | SerfState::KnightAttackingFree(f) = &mut s.state {
            *f = fight;
        }
        self.store_serf(def);
        Ok(())
    }

    pub(super) fn handle_knight_attacking_victory(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightAttackingVictory(fight) = s.state else {
            return Ok(());
        };
        let now = self.tick16();
        let fallen = match fight.defender.and_then(|id| self.serfs.get_mut(id)) {
            Some(def) => {
                let delta = now.wrapping_sub(def.tick);
                def.tick = now;
                def.counter -= i32::from(delta);
                def.counter < 0
            }
            None => true,
        };
        if !fallen {
            return Ok(());
        }

        if let Some(def_id) = fight.defender {
            self.delete_serf(def_id);
        }
        s.set_state(SerfState::KnightEngagingBuilding(Fight::default()));
        s.tick = now;
        s.counter = 0;
        Ok(())
    }

    pub(super) fn handle_knight_attacking_defeat(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        if s.counter < 0 {
            self.map.set_serf(s.pos, None);
            self.delete_serf(s.index);
        }
        Ok(())
    }

    pub(super) fn handle_knight_occupy_enemy_building(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 {
            let target = self.building_ahead(s).and_then(|id| {
                let b = self.buildings.get(id)?;
                (!b.is_burning() && b.is_military()).then(|| (id, b.owner(), b.btype(), b.has_knight()))
            });

            let Some((id, owner, btype, defended)) = target else {
                log::debug!("knight {} found no building to occupy at {}", s.index, s.pos);
                s.set_lost();
                s.counter = 0;
                return Ok(());
            };

            if owner == s.owner {
                if btype == BuildingType::Castle {
                    self.enter_building(s, Entry::Inventory, false);
                    return Ok(());
                }
                let room = self.buildings.get(id).map_or(false, |b| b.is_enough_place_for_knight());
                if room {
                    self.enter_building(s, Entry::Assigned, false);
                    if let Some(b) = self.buildings.get_mut(id) {
                        b.knight_occupy();
                    }
                    return Ok(());
                }
                s.set_lost();
                s.counter = 0;
                return Ok(());
            }

            if defended {
                s.set_state(SerfState::KnightEngagingBuilding(Fight::default()));
                s.animation = 167;
                s.counter = 191;
                return Ok(());
            }

            log::info!("player {} takes {} from player {}", s.owner, btype, owner);
            let player = s.owner;
            self.with_serf_stored(s, |game| game.occupy_enemy_building(id, player))?;
            if btype == BuildingType::Castle {
                s.counter = 0;
            } else {
                self.enter_building(s, Entry::Assigned, false);
                if let Some(b) = self.buildings.get_mut(id) {
                    b.knight_occupy();
                }
            }
            return Ok(());
        }
        Ok(())
    }

    // ── In the open ─────────────────────────────────────────────────────

    pub(super) fn handle_knight_free_walking(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);
        while s.counter < 0 && matches!(s.state, SerfState::KnightFreeWalking(_)) {
            if self.knight_meets_enemy(s) {
                return Ok(());
            }
            self.handle_knight_free_walking_common(s)?;
        }
        Ok(())
    }

    /// Look for an enemy knight next to a free-walking knight and start a
    /// fight in the open. The other knight attacks.
    fn knight_meets_enemy(&mut self, s: &mut Serf) -> bool {
        let SerfState::KnightFreeWalking(walk) = s.state else {
            return false;
        };

        for dir in Direction::ALL {
            let pos = self.map.move_pos(s.pos, dir);
            let Some(other_id) = self.map.serf_at(pos).filter(|&id| id != s.index) else {
                continue;
            };
            let Some(mut other) = self.serfs.get(other_id).cloned() else {
                continue;
            };
            if other.owner == s.owner || !other.is_knight() {
                continue;
            }

            let defend = match other.state {
                SerfState::KnightFreeWalking(ow) => DefendFree {
                    dist_col: walk.dist_col,
                    dist_row: walk.dist_row,
                    attacker_was_free_walking: true,
                    other_dist_col: ow.dist_col,
                    other_dist_row: ow.dist_row,
                },
                SerfState::Walking(w) => {
                    // Knights on their way to a garrison are missed there.
                    let building = w
                        .dest
                        .and_then(|f| self.flags.get(f))
                        .and_then(|f| f.building());
                    if let Some(b) = building.and_then(|b| self.buildings.get_mut(b)) {
                        if !b.has_inventory() {
                            b.requested_knight_lost();
                        }
                    }
                    DefendFree {
                        dist_col: walk.dist_col,
                        dist_row: walk.dist_row,
                        ..DefendFree::default()
                    }
                }
                _ => continue,
            };
            if !self.can_pass(self.map.move_left(pos)) {
                continue;
            }

            log::debug!("knight {} engages knight {} in the open", other_id, s.index);
            s.set_state(SerfState::KnightEngageDefendingFree(defend));
            s.animation = 99;
            s.counter = 255;

            other.set_state(SerfState::KnightEngageAttackingFree(Fight {
                defender: Some(s.index),
                approach: Some(dir),
                ..Fight::default()
            }));
            self.store_serf(other);
            return true;
        }
        false
    }

    pub(super) fn handle_knight_engage_attacking_free(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightEngageAttackingFree(fight) = s.state else {
            return Ok(());
        };
        self.elapse(s);
        if s.counter < 0 {
            s.set_state(SerfState::KnightEngageAttackingFreeJoin(fight));
            s.animation = 167;
            s.counter += 191;
        }
        Ok(())
    }

    pub(super) fn handle_knight_engage_attacking_free_join(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightEngageAttackingFreeJoin(fight) = s.state else {
            return Ok(());
        };
        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }

        s.set_state(SerfState::KnightPrepareAttackingFree(fight));
        s.animation = 168;
        s.counter = 0;

        let Some(mut other) = fight.defender.and_then(|id| self.serfs.get(id).cloned()) else {
            s.set_lost();
            return Ok(());
        };
        let other_pos = other.pos;
        let mut defend = match other.state {
            SerfState::KnightEngageDefendingFree(d) => d,
            _ => DefendFree::default(),
        };

        // The defender steps over to the attacker.
        let dir = fight.approach.unwrap_or(Direction::Right);
        step_toward(&mut defend.dist_col, &mut defend.dist_row, dir);
        other.set_state(SerfState::KnightPrepareDefendingFree(defend));
        other.counter = 0;
        self.start_walking(&mut other, dir, 32, false);
        self.map.set_serf(other_pos, None);
        self.store_serf(other);
        Ok(())
    }

    pub(super) fn handle_knight_prepare_attacking_free(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightPrepareAttackingFree(fight) = s.state else {
            return Ok(());
        };
        let Some(mut other) = fight.defender.and_then(|id| self.serfs.get(id).cloned()) else {
            s.set_lost();
            return Ok(());
        };
        let SerfState::KnightPrepareDefendingFreeWait(defend) = other.state else {
            return Ok(());
        };

        let (attacker_won, move_index) = self.set_fight_outcome(s, &other);
        s.set_state(SerfState::KnightAttackingFree(Fight {
            attacker_won,
            move_index,
            ..fight
        }));
        s.counter = 0;

        other.set_state(SerfState::KnightDefendingFree(defend));
        other.counter = 0;
        self.store_serf(other);
        Ok(())
    }

    pub(super) fn handle_knight_prepare_defending_free(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightPrepareDefendingFree(defend) = s.state else {
            return Ok(());
        };
        self.elapse(s);
        if s.counter < 0 {
            s.set_state(SerfState::KnightPrepareDefendingFreeWait(defend));
            s.counter = 0;
        }
        Ok(())
    }

    pub(super) fn handle_knight_attacking_victory_free(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightAttackingVictoryFree(victory) = s.state else {
            return Ok(());
        };
        let now = self.tick16();
        let fallen = match victory.defender.and_then(|id| self.serfs.get_mut(id)) {
            Some(other) => {
                let delta = now.wrapping_sub(other.tick);
                other.tick = now;
                other.counter -= i32::from(delta);
                other.counter < 0
            }
            None => true,
        };
        if !fallen {
            return Ok(());
        }

        if let Some(id) = victory.defender {
            self.delete_serf(id);
        }
        let mut wait = FreeWalk::new(victory.dist_col, victory.dist_row, 0, 0);
        wait.flags = i32::from(victory.resume);
        s.set_state(SerfState::KnightAttackingFreeWait(wait));
        s.animation = 179;
        s.counter = 127;
        s.tick = now;
        Ok(())
    }

    pub(super) fn handle_knight_attacking_defeat_free(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightAttackingDefeatFree(fight) = s.state else {
            return Ok(());
        };
        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }

        let now = self.tick16();
        if let Some(other) = fight.defender.and_then(|id| self.serfs.get_mut(id)) {
            let defend = match other.state {
                SerfState::KnightDefendingVictoryFree(d) | SerfState::KnightDefendingFree(d) => d,
                _ => DefendFree::default(),
            };
            other.set_state(SerfState::KnightFreeWalking(FreeWalk::new(defend.dist_col, defend.dist_row, 0, 0)));
            other.animation = 179;
            other.counter = 0;
            other.tick = now;
        }

        self.map.set_serf(s.pos, fight.defender);
        self.delete_serf(s.index);
        Ok(())
    }

    pub(super) fn handle_knight_attacking_free_wait(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightAttackingFreeWait(wait) = s.state else {
            return Ok(());
        };
        self.elapse(s);
        if s.counter < 0 {
            if wait.flags != 0 {
                s.set_state(SerfState::KnightFreeWalking(FreeWalk { flags: 0, ..wait }));
            } else {
                s.set_lost();
            }
            s.counter = 0;
        }
        Ok(())
    }

    pub(super) fn handle_knight_leave_for_walk_to_fight(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::KnightLeaveForWalkToFight(walk) = s.state else {
            return Ok(());
        };
        s.tick = self.tick16();
        s.counter = 0;

        let here = self.map.serf_at(s.pos);
        if here.is_some() && here != Some(s.index) {
            s.animation = 82;
            return Ok(());
        }

        let flag_pos = self.map.move_down_right(s.pos);
        let blocker = self.map.serf_at(flag_pos).and_then(|id| self.serfs.get(id)).map(|o| o.owner);
        match blocker {
            None => {
                self.leave_building(s, Exit::KnightFreeWalking(walk), false);
            }
            Some(owner) if owner == s.owner => {
                s.animation = 82;
            }
            Some(_) => {
                // An enemy waits at the flag: stay home and defend.
                let Some(id) = self.map.building_at(s.pos) else {
                    s.set_lost();
                    return Ok(());
                };
                let (btype, first, room) = match self.buildings.get(id) {
                    Some(b) => (b.btype(), b.first_knight(), b.is_enough_place_for_knight()),
                    None => return Ok(()),
                };
                if room {
                    s.set_state(defending_state(btype, first));
                    if let Some(b) = self.buildings.get_mut(id) {
                        b.knight_come_back();
                        b.set_first_knight(Some(s.index));
                    }
                } else {
                    s.animation = 82;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fight_morale_scales_with_rank() {
        assert_eq!(fight_morale(0, HOME_LAND_FACTOR), 64);
        assert_eq!(fight_morale(2, HOME_LAND_FACTOR), 256);
        assert_eq!(fight_morale(4, HOME_LAND_FACTOR), 1024);
        assert!(fight_morale(1, 0x2000) > fight_morale(1, HOME_LAND_FACTOR));
    }

    #[test]
    fn test_attacker_wins_by_weight() {
        let (m, d) = (100, 300);
        let wins = (0..=u16::MAX).filter(|&r| attacker_wins(m, d, r)).count();
        let rate = wins as f64 / 65536.0;
        assert!((rate - 0.25).abs() < 0.001, "rate {}", rate);
    }

    #[test]
    fn test_move_sequences_terminate() {
        for start in (0..0x80).step_by(0x10) {
            let len = (start..MOVES.len()).take_while(|&i| MOVES[i] >= 0).count();
            assert!(start + len < MOVES.len());
            for i in start..start + len {
                let mv = MOVES[i] as usize;
                assert!(mv < FIGHT_ANIM.len());
                assert!(FIGHT_ANIM_LEN[mv] as usize <= FIGHT_ANIM[mv].len());
            }
        }
    }

    #[test]
    fn test_fight_animations_exist() {
        for (row, &len) in FIGHT_ANIM.iter().zip(FIGHT_ANIM_LEN.iter()) {
            for &a in &row[..len as usize] {
                assert!(146 + ((a >> 4) & 0xf) <= 180);
                assert!(156 + (a & 0xf) <= 180);
            }
        }
    }
}
