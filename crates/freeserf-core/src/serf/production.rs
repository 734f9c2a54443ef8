//! Workers inside their workplaces: mines, smelters, food chain, crafts,
//! and the planning step of workers that go out into the landscape.

use super::{anim_counter, FreeWalk, Serf, SerfState};
use crate::building::Building;
use crate::collection::BuildingId;
use crate::error::GameResult;
use crate::game::Game;
use crate::map::{spiral_offset, MapObject, MapPos, Minerals, Terrain};
use crate::notification::NotificationKind;
use crate::player::TOOLS;
use crate::resource::Resource;

/// Chance out of 65536 that a pig is born, by pigs already in the farm.
const BREEDING_PROB: [i32; 8] = [6000, 8000, 10000, 11000, 12000, 13000, 14000, 0];

fn ore_of(deposit: Minerals) -> Option<Resource> {
    match deposit {
        Minerals::Gold => Some(Resource::GoldOre),
        Minerals::Iron => Some(Resource::IronOre),
        Minerals::Coal => Some(Resource::Coal),
        Minerals::Stone => Some(Resource::Stone),
        Minerals::None => None,
    }
}

/// Pick a tool weighted by the player's tool priorities. `roll` is a
/// 16-bit random value; with all priorities at zero `fallback` (another
/// roll) picks uniformly.
pub(crate) fn choose_tool(prios: &[u16; 9], roll: i32, fallback: i32) -> Resource {
    let total: i32 = prios.iter().map(|&p| i32::from(p)).sum::<i32>() >> 4;
    if total > 0 {
        let mut offset = (total * roll) >> 16;
        for (i, &p) in prios.iter().enumerate() {
            offset -= i32::from(p >> 4);
            if offset < 0 {
                return TOOLS[i];
            }
        }
    }
    let i = usize::try_from((9 * fallback) >> 16).unwrap_or(0);
    TOOLS[i.min(TOOLS.len() - 1)]
}

/// Free walk out to spiral entry `index` from the building door. The
/// walk starts at the flag, one step down-right of the door.
fn walk_out_to(index: usize) -> FreeWalk {
    let (col, row) = spiral_offset(index);
    FreeWalk::new(col - 1, row - 1, 1 - col, 1 - row)
}

fn is_large_or_castle(obj: MapObject) -> bool {
    matches!(obj, MapObject::LargeBuilding | MapObject::Castle)
}

impl Game {
    /// Building the worker stands in.
    fn workplace(&self, s: &Serf) -> Option<BuildingId> {
        self.map.building_at(s.pos).filter(|&b| self.buildings.contains(b))
    }

    fn workplace_mut(&mut self, s: &Serf) -> Option<&mut Building> {
        let id = self.workplace(s)?;
        self.buildings.get_mut(id)
    }

    /// Carry a finished product out to the flag.
    fn carry_out(&mut self, s: &mut Serf, res: Resource) {
        log::trace!("serf {} produced {:?}", s.index, res);
        s.set_state(SerfState::MoveResourceOut { res, dest: None });
        if let Some(player) = self.players.get_mut(usize::from(s.owner)) {
            player.increase_res_count(res);
        }
    }

    /// Begin a work cycle in the building: show the worker and start
    /// the animation.
    fn begin_cycle(&mut self, s: &mut Serf, state: SerfState, animation: i32) {
        s.set_state(state);
        s.animation = animation;
        s.counter = anim_counter(animation);
        s.tick = self.tick16();
        self.map.set_serf(s.pos, Some(s.index));
    }

    fn lost_workplace(&mut self, s: &mut Serf) -> GameResult<()> {
        log::warn!("serf {}: workplace at {} vanished", s.index, s.pos);
        self.map.set_serf(s.pos, None);
        s.set_lost();
        s.counter = 0;
        Ok(())
    }

    // ── Raw materials ───────────────────────────────────────────────────

    pub(super) fn handle_mining(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);

        while s.counter < 0 {
            let SerfState::Mining(mut mine) = s.state else {
                return Ok(());
            };
            let Some(id) = self.workplace(s) else {
                return self.lost_workplace(s);
            };

            match mine.substate {
                0 => {
                    let r = self.random_int();
                    mine.substate = if self.options.miner_eats((r & 7) as u16) { 1 } else { 2 };
                    s.counter += 100 + (r & 0x1ff);
                }
                1 => {
                    self.map.set_serf(s.pos, Some(s.index));
                    let ate = self.buildings.get_mut(id).map_or(false, |b| b.use_resource_in_stock(0));
                    if ate {
                        mine.substate = 3;
                        s.animation = 125;
                        s.counter = anim_counter(125);
                    } else {
                        s.animation = 98;
                        s.counter += 256;
                        if s.counter < 0 {
                            s.counter = 255;
                        }
                    }
                }
                2 => {
                    mine.substate = 3;
                    self.map.set_serf(s.pos, Some(s.index));
                    s.animation = 125;
                    s.counter = anim_counter(125);
                }
                3 => {
                    mine.substate = 4;
                    if let Some(b) = self.buildings.get_mut(id) {
                        b.set_active(false);
                    }
                    s.animation = 126;
                    s.counter = 304;
                }
                4..=7 => {
                    if mine.substate == 4 {
                        self.map.set_serf(s.pos, None);
                    }
                    mine.substate += 1;
                    let spot = ((self.random_int() >> 2) & 0x1f) as usize;
                    let dest = self.map.pos_add_spirally(s.pos, spot);
                    let obj = self.map.obj(dest);
                    let diggable = obj != MapObject::Flag && !obj.is_building();
                    if diggable
                        && self.map.res_type(dest) == mine.deposit
                        && self.map.res_amount(dest) > 0
                    {
                        self.map.remove_ground_deposit(dest, 1);
                        mine.res = ore_of(mine.deposit);
                        mine.substate = 8;
                    }
                    s.counter += 1000;
                }
                8 => {
                    self.map.set_serf(s.pos, Some(s.index));
                    mine.substate = 9;
                    s.animation = 127;
                    s.counter = anim_counter(127);
                }
                9 => {
                    mine.substate = 10;
                    if let Some(b) = self.buildings.get_mut(id) {
                        if b.increase_mining(mine.res.is_some()) {
                            let (owner, pos) = (usize::from(b.owner()), b.pos());
                            let kind = b.btype().mine_kind().unwrap_or(0);
                            log::debug!("mine {} ran empty", id);
                            if let Some(player) = self.players.get_mut(owner) {
                                player.notify(NotificationKind::MineEmpty, pos, kind);
                            }
                        }
                    }
                    s.animation = 128;
                    s.counter = 384;
                }
                _ => {
                    self.map.set_serf(s.pos, None);
                    match mine.res {
                        None => {
                            mine.substate = 0;
                            s.counter = 0;
                        }
                        Some(res) => {
                            self.carry_out(s, res);
                            return Ok(());
                        }
                    }
                }
            }
            s.state = SerfState::Mining(mine);
        }
        Ok(())
    }

    pub(super) fn handle_smelting(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::Smelting(mut smelt) = s.state else {
            return Ok(());
        };
        let Some(id) = self.workplace(s) else {
            return self.lost_workplace(s);
        };

        if smelt.mode == 0 {
            let Some(b) = self.buildings.get_mut(id) else {
                return Ok(());
            };
            if b.use_resources_in_stocks() {
                b.set_active(true);
                smelt.mode = 1;
                smelt.counter = 20;
                let animation = if smelt.gold { 129 } else { 130 };
                self.begin_cycle(s, SerfState::Smelting(smelt), animation);
            }
            return Ok(());
        }

        self.elapse(s);
        while s.counter < 0 {
            smelt.counter -= 1;
            if smelt.counter < 0 {
                if let Some(b) = self.buildings.get_mut(id) {
                    b.set_active(false);
                }
                let res = if smelt.gold { Resource::GoldBar } else { Resource::Steel };
                self.carry_out(s, res);
                return Ok(());
            } else if smelt.counter == 0 {
                self.map.set_serf(s.pos, None);
            }
            s.counter += 384;
        }
        s.state = SerfState::Smelting(smelt);
        Ok(())
    }

    pub(super) fn handle_sawing(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::Sawing { mode } = s.state else {
            return Ok(());
        };
        if mode == 0 {
            let Some(b) = self.workplace_mut(s) else {
                return self.lost_workplace(s);
            };
            if b.use_resource_in_stock(1) {
                self.begin_cycle(s, SerfState::Sawing { mode: 1 }, 124);
            }
            return Ok(());
        }

        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }
        self.map.set_serf(s.pos, None);
        self.carry_out(s, Resource::Plank);
        Ok(())
    }

    // ── Food ────────────────────────────────────────────────────────────

    pub(super) fn handle_milling(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::Milling { mut mode } = s.state else {
            return Ok(());
        };
        let Some(id) = self.workplace(s) else {
            return self.lost_workplace(s);
        };
        if mode == 0 {
            let Some(b) = self.buildings.get_mut(id) else {
                return Ok(());
            };
            if b.use_resource_in_stock(0) {
                b.set_active(true);
                self.begin_cycle(s, SerfState::Milling { mode: 1 }, 137);
            }
            return Ok(());
        }

        self.elapse(s);
        while s.counter < 0 {
            mode += 1;
            s.state = SerfState::Milling { mode };
            match mode {
                5 => {
                    if let Some(b) = self.buildings.get_mut(id) {
                        b.set_active(false);
                    }
                    self.carry_out(s, Resource::Flour);
                    return Ok(());
                }
                3 => {
                    self.map.set_serf(s.pos, Some(s.index));
                    s.animation = 137;
                    s.counter = anim_counter(137);
                }
                _ => {
                    self.map.set_serf(s.pos, None);
                    s.counter += 1500;
                }
            }
        }
        Ok(())
    }

    pub(super) fn handle_baking(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::Baking { mut mode } = s.state else {
            return Ok(());
        };
        let Some(id) = self.workplace(s) else {
            return self.lost_workplace(s);
        };
        if mode == 0 {
            let used = self.buildings.get_mut(id).map_or(false, |b| b.use_resource_in_stock(0));
            if used {
                self.begin_cycle(s, SerfState::Baking { mode: 1 }, 138);
            }
            return Ok(());
        }

        self.elapse(s);
        while s.counter < 0 {
            mode += 1;
            s.state = SerfState::Baking { mode };
            if mode == 3 {
                if let Some(b) = self.buildings.get_mut(id) {
                    b.set_active(false);
                }
                self.carry_out(s, Resource::Bread);
                return Ok(());
            }
            if let Some(b) = self.buildings.get_mut(id) {
                b.set_active(true);
            }
            self.map.set_serf(s.pos, None);
            s.counter += 1500;
        }
        Ok(())
    }

    pub(super) fn handle_pigfarming(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::PigFarming { mut mode } = s.state else {
            return Ok(());
        };
        let Some(id) = self.workplace(s) else {
            return self.lost_workplace(s);
        };
        if mode == 0 {
            let fed = self.buildings.get_mut(id).map_or(false, |b| b.use_resource_in_stock(0));
            if fed {
                self.begin_cycle(s, SerfState::PigFarming { mode: 1 }, 139);
            }
            return Ok(());
        }

        self.elapse(s);
        while s.counter < 0 {
            mode += 1;
            s.state = SerfState::PigFarming { mode };
            let pigs = self.buildings.get(id).map_or(0, |b| b.pigs_count());

            if mode & 1 == 0 {
                self.map.set_serf(s.pos, None);
                if pigs > 0 && pigs < 8 {
                    let chance = BREEDING_PROB[pigs as usize - 1];
                    if self.random_int() < chance {
                        if let Some(b) = self.buildings.get_mut(id) {
                            b.place_new_pig();
                        }
                    }
                }
                s.counter += 2048;
                continue;
            }

            if mode != 7 {
                self.map.set_serf(s.pos, Some(s.index));
                s.animation = 139;
                s.counter = anim_counter(139);
            } else if pigs == 8 || (pigs > 3 && ((20 * self.random_int()) >> 16) < pigs as i32) {
                if let Some(b) = self.buildings.get_mut(id) {
                    b.send_pig_to_butcher();
                }
                self.carry_out(s, Resource::Pig);
            } else if self.random_int() & 0xf != 0 {
                self.begin_cycle(s, SerfState::PigFarming { mode: 1 }, 139);
            } else {
                s.state = SerfState::PigFarming { mode: 0 };
            }
            return Ok(());
        }
        Ok(())
    }

    pub(super) fn handle_butchering(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::Butchering { mode } = s.state else {
            return Ok(());
        };
        if mode == 0 {
            let Some(b) = self.workplace_mut(s) else {
                return self.lost_workplace(s);
            };
            if b.use_resource_in_stock(0) {
                self.begin_cycle(s, SerfState::Butchering { mode: 1 }, 140);
            }
            return Ok(());
        }

        self.elapse(s);
        if s.counter < 0 {
            self.map.set_serf(s.pos, None);
            self.carry_out(s, Resource::Meat);
        }
        Ok(())
    }

    // ── Crafts ──────────────────────────────────────────────────────────

    pub(super) fn handle_making_weapon(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::MakingWeapon { mut mode } = s.state else {
            return Ok(());
        };
        let Some(id) = self.workplace(s) else {
            return self.lost_workplace(s);
        };
        if mode == 0 {
            let Some(b) = self.buildings.get_mut(id) else {
                return Ok(());
            };
            // Materials for a sword also make the shield after it.
            if !b.shield_pending() && !b.use_resources_in_stocks() {
                return Ok(());
            }
            b.set_active(true);
            self.begin_cycle(s, SerfState::MakingWeapon { mode: 1 }, 143);
            return Ok(());
        }

        self.elapse(s);
        while s.counter < 0 {
            mode += 1;
            s.state = SerfState::MakingWeapon { mode };
            if mode == 7 {
                self.map.set_serf(s.pos, None);
                let shield = match self.buildings.get_mut(id) {
                    Some(b) => {
                        b.set_active(false);
                        let shield = b.shield_pending();
                        b.set_shield_pending(!shield);
                        shield
                    }
                    None => false,
                };
                self.carry_out(s, if shield { Resource::Shield } else { Resource::Sword });
                return Ok(());
            }
            s.counter += 576;
        }
        Ok(())
    }

    pub(super) fn handle_making_tool(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::MakingTool { mut mode } = s.state else {
            return Ok(());
        };
        if mode == 0 {
            let Some(b) = self.workplace_mut(s) else {
                return self.lost_workplace(s);
            };
            if b.use_resources_in_stocks() {
                self.begin_cycle(s, SerfState::MakingTool { mode: 1 }, 144);
            }
            return Ok(());
        }

        self.elapse(s);
        while s.counter < 0 {
            mode += 1;
            s.state = SerfState::MakingTool { mode };
            if mode == 4 {
                self.map.set_serf(s.pos, None);
                let prios = match self.players.get(usize::from(s.owner)) {
                    Some(player) => TOOLS.map(|tool| player.tool_prio_of(tool)),
                    None => [0; 9],
                };
                let roll = self.random_int();
                let total: u32 = prios.iter().map(|&p| u32::from(p)).sum();
                let fallback = if total >> 4 == 0 { self.random_int() } else { 0 };
                let tool = choose_tool(&prios, roll, fallback);
                self.carry_out(s, tool);
                return Ok(());
            }
            s.counter += 1536;
        }
        Ok(())
    }

    pub(super) fn handle_building_boat(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::BuildingBoat { mut mode } = s.state else {
            return Ok(());
        };
        let Some(id) = self.workplace(s) else {
            return self.lost_workplace(s);
        };
        if mode == 0 {
            let Some(b) = self.buildings.get_mut(id) else {
                return Ok(());
            };
            if !b.use_resource_in_stock(0) {
                return Ok(());
            }
            b.boat_clear();
            self.begin_cycle(s, SerfState::BuildingBoat { mode: 1 }, 146);
            return Ok(());
        }

        self.elapse(s);
        while s.counter < 0 {
            mode += 1;
            if mode == 9 {
                if self.map.has_serf(self.map.move_down_right(s.pos)) {
                    // Wait for the flag to clear.
                    mode -= 1;
                    s.counter = 0;
                    s.state = SerfState::BuildingBoat { mode };
                } else {
                    if let Some(b) = self.buildings.get_mut(id) {
                        b.boat_clear();
                    }
                    self.map.set_serf(s.pos, None);
                    self.carry_out(s, Resource::Boat);
                }
                break;
            }
            if let Some(b) = self.buildings.get_mut(id) {
                b.boat_do();
            }
            s.state = SerfState::BuildingBoat { mode };
            s.animation = 145;
            s.counter += 1408;
        }
        Ok(())
    }

    // ── Planning trips outside ──────────────────────────────────────────

    /// Roll spiral entries until `accept` takes one, then head out of the
    /// building toward it. Each miss waits `retry` ticks.
    fn plan_trip(
        &mut self,
        s: &mut Serf,
        retry: i32,
        mut roll: impl FnMut(i32) -> usize,
        accept: impl Fn(&Game, MapPos) -> bool,
        exit: impl Fn(FreeWalk) -> super::Exit,
    ) {
        self.elapse(s);
        let start = self.map.move_down_right(s.pos);
        while s.counter < 0 {
            let index = roll(self.random_int());
            let dest = self.map.pos_add_spirally(s.pos, index);
            if accept(self, dest) && self.free_walk_in_reach(start, dest) {
                let walk = walk_out_to(index);
                log::trace!(
                    "serf {}: found work at {}, {}",
                    s.index,
                    walk.dist_col,
                    walk.dist_row
                );
                s.set_state(SerfState::ReadyToLeave { exit: exit(walk) });
                return;
            }
            s.counter += retry;
        }
    }

    pub(super) fn handle_planning_logging(&mut self, s: &mut Serf) -> GameResult<()> {
        self.plan_trip(
            s,
            400,
            |r| (r & 0x7f) as usize + 1,
            |game, dest| game.map.obj(dest).is_tree(),
            super::Exit::FreeWalking,
        );
        Ok(())
    }

    pub(super) fn handle_planning_planting(&mut self, s: &mut Serf) -> GameResult<()> {
        self.plan_trip(
            s,
            700,
            |r| (r & 0x7f) as usize + 1,
            |game, dest| {
                let map = &game.map;
                let up_left = map.move_up_left(dest);
                map.paths(dest) == 0
                    && map.obj(dest) == MapObject::None
                    && map.type_up(dest) == Terrain::Grass1
                    && map.type_down(dest) == Terrain::Grass1
                    && map.type_up(up_left) == Terrain::Grass1
                    && map.type_down(up_left) == Terrain::Grass1
            },
            super::Exit::FreeWalking,
        );
        Ok(())
    }

    pub(super) fn handle_planning_stonecutting(&mut self, s: &mut Serf) -> GameResult<()> {
        self.plan_trip(
            s,
            100,
            |r| (r & 0x7f) as usize + 1,
            |game, dest| {
                matches!(game.map.obj(game.map.move_up_left(dest)), MapObject::Stone(_))
                    && game.can_pass(dest)
            },
            super::Exit::StoneCutterFreeWalking,
        );
        Ok(())
    }

    pub(super) fn handle_planning_fishing(&mut self, s: &mut Serf) -> GameResult<()> {
        self.plan_trip(
            s,
            100,
            |r| ((r >> 2) & 0x3f) as usize + 1,
            |game, dest| {
                game.map.obj(dest) == MapObject::None
                    && game.map.paths(dest) == 0
                    && game.fishing_animation(dest).is_some()
            },
            super::Exit::FreeWalking,
        );
        Ok(())
    }

    pub(super) fn handle_planning_farming(&mut self, s: &mut Serf) -> GameResult<()> {
        self.plan_trip(
            s,
            500,
            |r| ((r >> 2) & 0x1f) as usize + 7,
            |game, dest| game.is_farmable(dest),
            super::Exit::FreeWalking,
        );
        Ok(())
    }

    /// Whether a farmer can sow or harvest at `pos`.
    fn is_farmable(&self, pos: MapPos) -> bool {
        let map = &self.map;
        match map.obj(pos) {
            MapObject::Seeds(5) => true,
            MapObject::Field(stage) => stage <= 5,
            MapObject::None => {
                let grass = |t: Terrain| t == Terrain::Grass1;
                let right = map.move_right(pos);
                let down_right = map.move_down_right(pos);
                let down = map.move_down(pos);
                let left = map.move_left(pos);
                let up_left = map.move_up_left(pos);
                let up = map.move_up(pos);
                grass(map.type_up(pos))
                    && grass(map.type_down(pos))
                    && map.paths(pos) == 0
                    && grass(map.type_down(left))
                    && grass(map.type_up(up_left))
                    && grass(map.type_down(up_left))
                    && grass(map.type_up(up))
                    && [right, down_right, down, left, up_left, up]
                        .iter()
                        .all(|&p| !is_large_or_castle(map.obj(p)))
            }
            _ => false,
        }
    }

    /// Animation a fisher uses at `pos`, if there is water to fish in.
    pub(super) fn fishing_animation(&self, pos: MapPos) -> Option<i32> {
        let map = &self.map;
        if map.type_down(pos).is_water() && !map.type_up(map.move_up_left(pos)).is_water() {
            Some(132)
        } else if map.type_down(map.move_left(pos)).is_water() && !map.type_up(map.move_up(pos)).is_water() {
            Some(131)
        } else {
            None
        }
    }

    pub(super) fn handle_looking_for_geo_spot(&mut self, s: &mut Serf) -> GameResult<()> {
        let mut tries = 2;
        for _ in 0..8 {
            let index = ((self.random_int() >> 2) & 0x3f) as usize + 1;
            let dest = self.map.pos_add_spirally(s.pos, index);
            match self.map.obj(dest) {
                MapObject::None => {
                    let up_left = self.map.move_up_left(dest);
                    let mountain = |t: Terrain| (Terrain::Tundra0..=Terrain::Snow0).contains(&t);
                    let found = [
                        self.map.type_down(dest),
                        self.map.type_up(dest),
                        self.map.type_down(up_left),
                        self.map.type_up(up_left),
                    ]
                    .into_iter()
                    .any(mountain);
                    if found && self.free_walk_in_reach(s.pos, dest) {
                        let (col, row) = spiral_offset(index);
                        s.set_state(SerfState::FreeWalking(FreeWalk::new(col, row, -col, -row)));
                        s.tick = self.tick16();
                        return Ok(());
                    }
                }
                MapObject::Sign { .. } | MapObject::SignEmpty => {
                    tries -= 1;
                    if tries == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }

        s.set_state(SerfState::Walking(super::Walk::new(super::WalkTask::ReturnHome, None)));
        s.counter = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_tool_by_priority() {
        let mut prios = [0u16; 9];
        prios[3] = 0xffff;
        for roll in [0, 1000, 40000, 65535] {
            assert_eq!(choose_tool(&prios, roll, 0), TOOLS[3]);
        }
    }

    #[test]
    fn test_choose_tool_uniform_without_priorities() {
        let prios = [0u16; 9];
        assert_eq!(choose_tool(&prios, 0, 0), TOOLS[0]);
        assert_eq!(choose_tool(&prios, 0, 65535), TOOLS[8]);
    }

    #[test]
    fn test_walk_out_starts_at_flag() {
        let walk = walk_out_to(1);
        let (col, row) = spiral_offset(1);
        assert_eq!(walk.dist_col, col - 1);
        assert_eq!(walk.dist_row, row - 1);
        assert_eq!(walk.dist_col, -walk.neg_dist_col);
        assert_eq!(walk.dist_row, -walk.neg_dist_row);
    }

    #[test]
    fn test_ore_of_deposit() {
        assert_eq!(ore_of(Minerals::Coal), Some(Resource::Coal));
        assert_eq!(ore_of(Minerals::None), None);
    }
}
