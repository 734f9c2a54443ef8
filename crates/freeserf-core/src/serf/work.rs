//! Serfs going in and out of buildings: inventories, construction sites,
//! the castle, and the door of every workplace.

use super::{anim_counter, defending_state, walking_animation, Construct, Dig, Entry, Exit, FreeWalk, Mine, Serf, SerfState, SerfType, Smelt, Walk, WalkTask};
use crate::building::BuildingType;
use crate::collection::BuildingId;
use crate::error::{GameError, GameResult};
use crate::game::Game;
use crate::inventory::InventoryMode;
use crate::map::Direction;
use crate::notification::NotificationKind;
use crate::resource::Resource;

/// Height offsets a digger works through, from the far ones inward.
const DIG_HEIGHT_DIFF: [i32; 16] = [-1, 1, -2, 2, -3, 3, -4, 4, -5, 5, -6, 6, -7, 7, -8, 8];

/// Bit `n` set: the `n`th construction step uses stone, else a plank.
const MATERIAL_ORDER: [u32; 32] = [
    0, 0, 0, 0, 0, 4, 0, 0, //
    0, 0, 0x38, 2, 8, 2, 8, 4, //
    4, 0xc, 0x14, 0x2c, 2, 0x1c, 0x1f0, 4, //
    0, 0, 0, 0, 0, 0, 0, 0,
];

/// Builders of these use the large scaffolding.
fn uses_large_scaffold(btype: BuildingType) -> bool {
    matches!(
        btype,
        BuildingType::Stock | BuildingType::Sawmill | BuildingType::ToolMaker | BuildingType::Fortress
    )
}

/// Chance per 6000 ticks of a knight in stock rising a rank.
fn stock_training(ty: SerfType) -> Option<i32> {
    match ty {
        SerfType::Knight0 => Some(4000),
        SerfType::Knight1 => Some(2000),
        SerfType::Knight2 => Some(1000),
        SerfType::Knight3 => Some(500),
        _ => None,
    }
}

impl Game {
    // ── Inventories ─────────────────────────────────────────────────────

    pub(super) fn handle_idle_in_stock(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::IdleInStock { inventory } = s.state else {
            return Ok(());
        };
        let Some(inv) = self.inventories.get(inventory) else {
            log::warn!("serf {}: inventory {} vanished", s.index, inventory);
            s.set_lost();
            s.counter = 0;
            return Ok(());
        };

        if inv.serf_mode() != InventoryMode::Out || inv.serfs_out() >= 3 {
            let ty = s.serf_type;
            if let Some(p) = stock_training(ty) {
                if self.train_knight(s, p) {
                    if let Some(inv) = self.inventories.get_mut(inventory) {
                        inv.clear_serf_slot(s.index, ty);
                    }
                }
            }
            if let Some(inv) = self.inventories.get_mut(inventory) {
                inv.serf_idle_in_stock(s.index, s.serf_type);
            }
        } else if let Some(inv) = self.inventories.get_mut(inventory) {
            inv.serf_idle_in_stock(s.index, s.serf_type);
            inv.call_out_serf(s.index, s.serf_type);
            s.set_state(SerfState::ReadyToLeaveInventory {
                exit: Exit::Scatter,
                inventory,
            });
        }
        Ok(())
    }

    /// Settle into the inventory of the building the serf stands in.
    fn enter_inventory(&mut self, s: &mut Serf, building: BuildingId) -> GameResult<()> {
        self.map.set_serf(s.pos, None);
        let inventory = self
            .buildings
            .get(building)
            .and_then(|b| b.inventory())
            .ok_or(GameError::MissingInventory(building))?;
        if s.serf_type == SerfType::Generic {
            if let Some(inv) = self.inventories.get_mut(inventory) {
                inv.add_generic(s.index);
            }
        }
        s.set_state(SerfState::IdleInStock { inventory });
        Ok(())
    }

    /// A formerly lost serf ends its walk in a friendly building. Into an
    /// inventory it goes back to stock; anywhere else it leaves the game.
    fn retire(&mut self, s: &mut Serf, building: BuildingId) -> GameResult<()> {
        let has_inventory = self.buildings.get(building).map_or(false, |b| b.has_inventory());
        if has_inventory {
            s.was_lost = false;
            return self.enter_inventory(s, building);
        }
        log::debug!("serf {} retired into building {}", s.index, building);
        self.map.set_serf(s.pos, None);
        self.set_serf_type(s, SerfType::Dead);
        self.delete_serf(s.index);
        Ok(())
    }

    /// Set up the input slots of a workplace on its worker's first arrival.
    fn init_workplace(&mut self, building: BuildingId) {
        let Some(b) = self.buildings.get_mut(building) else {
            return;
        };
        b.init_production_stocks();
        let flag = b.flag();
        if let Some(f) = self.flags.get_mut(flag) {
            f.clear_flags();
        }
    }

    // ── Doors ───────────────────────────────────────────────────────────

    pub(super) fn handle_entering_building(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::EnteringBuilding { entry, slope_len } = s.state else {
            return Ok(());
        };
        self.elapse(s);
        if s.counter >= 0 && s.counter > slope_len {
            return Ok(());
        }

        let building = self
            .map
            .building_at(s.pos)
            .filter(|&b| self.buildings.get(b).map_or(false, |b| !b.is_burning()));
        let Some(building) = building else {
            log::warn!("serf {}: building at {} gone while entering", s.index, s.pos);
            s.set_state(SerfState::Lost { search_far_first: false });
            s.counter = 0;
            return Ok(());
        };

        s.counter = slope_len;
        match entry {
            Entry::Inventory => return self.enter_inventory(s, building),
            Entry::Retire => return self.retire(s, building),
            Entry::Assigned | Entry::Returning => {}
        }
        let assigned = entry == Entry::Assigned;
        let btype = match self.buildings.get(building) {
            Some(b) => b.btype(),
            None => return Ok(()),
        };

        match s.serf_type {
            SerfType::Transporter => {
                self.map.set_serf(s.pos, None);
                let flag_pos = self.map.move_down_right(s.pos);
                if let Some(flag) = self.map.flag_at(flag_pos).and_then(|f| self.flags.get_mut(f)) {
                    flag.set_has_inventory();
                    flag.set_accepts_resources(true);
                    flag.set_accepts_serfs(true);
                }
                s.set_state(SerfState::WaitForResourceOut);
                s.counter = 63;
                self.set_serf_type(s, SerfType::TransporterInventory);
            }
            SerfType::TransporterInventory => {
                self.map.set_serf(s.pos, None);
                s.set_state(SerfState::WaitForResourceOut);
                s.counter = 63;
            }
            SerfType::Sailor | SerfType::Generic => return self.enter_inventory(s, building),
            SerfType::Digger => {
                let target_h = self.buildings.get(building).map_or(0, |b| b.level());
                s.set_state(SerfState::Digging(Dig {
                    h_index: 15,
                    target_h,
                    dig_pos: 6,
                    substate: 1,
                }));
            }
            SerfType::Builder => {
                let large = uses_large_scaffold(btype);
                s.animation = if large { 100 } else { 98 };
                s.counter = 127;
                s.set_state(SerfState::Building(Construct {
                    mode: 1,
                    building,
                    material_step: if large { 1 << 7 } else { 0 },
                    counter: 0,
                }));
            }
            SerfType::Geologist => {
                s.set_state(SerfState::LookingForGeoSpot);
                s.counter = 0;
            }
            SerfType::Lumberjack => self.start_work(s, SerfState::PlanningLogging),
            SerfType::Stonecutter => self.start_work(s, SerfState::PlanningStoneCutting),
            SerfType::Forester => self.start_work(s, SerfState::PlanningPlanting),
            SerfType::Fisher => self.start_work(s, SerfState::PlanningFishing),
            SerfType::Farmer => self.start_work(s, SerfState::PlanningFarming),
            SerfType::Sawmiller => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(s, SerfState::Sawing { mode: 0 });
            }
            SerfType::Miner => {
                if assigned {
                    self.init_workplace(building);
                    if let Some(b) = self.buildings.get_mut(building) {
                        b.set_active(true);
                    }
                }
                let deposit = btype.mine_mineral().unwrap_or(crate::map::Minerals::Stone);
                self.start_work(
                    s,
                    SerfState::Mining(Mine {
                        substate: 0,
                        res: None,
                        deposit,
                    }),
                );
            }
            SerfType::Smelter => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(
                    s,
                    SerfState::Smelting(Smelt {
                        mode: 0,
                        counter: 0,
                        gold: btype == BuildingType::GoldSmelter,
                    }),
                );
            }
            SerfType::PigFarmer => {
                if assigned {
                    self.init_workplace(building);
                    if let Some(b) = self.buildings.get_mut(building) {
                        b.set_work_count(1);
                    }
                    self.start_work(s, SerfState::PigFarming { mode: 0 });
                } else {
                    self.start_work(s, SerfState::PigFarming { mode: 6 });
                    s.counter = 0;
                }
            }
            SerfType::Butcher => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(s, SerfState::Butchering { mode: 0 });
            }
            SerfType::Miller => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(s, SerfState::Milling { mode: 0 });
            }
            SerfType::Baker => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(s, SerfState::Baking { mode: 0 });
            }
            SerfType::BoatBuilder => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(s, SerfState::BuildingBoat { mode: 0 });
            }
            SerfType::Toolmaker => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(s, SerfState::MakingTool { mode: 0 });
            }
            SerfType::WeaponSmith => {
                if assigned {
                    self.init_workplace(building);
                }
                self.start_work(s, SerfState::MakingWeapon { mode: 0 });
            }
            SerfType::Knight0 | SerfType::Knight1 | SerfType::Knight2 | SerfType::Knight3 | SerfType::Knight4 => {
                self.knight_enter_building(s, building)?;
            }
            SerfType::Dead => {}
        }
        Ok(())
    }

    /// Step off the map into the workplace and begin working.
    fn start_work(&mut self, s: &mut Serf, state: SerfState) {
        self.map.set_serf(s.pos, None);
        s.set_state(state);
    }

    /// A knight moves into a military building and joins its garrison.
    fn knight_enter_building(&mut self, s: &mut Serf, building: BuildingId) -> GameResult<()> {
        self.map.set_serf(s.pos, None);
        let Some(b) = self.buildings.get_mut(building) else {
            return Ok(());
        };

        if b.has_inventory() {
            let next = b.first_knight();
            b.set_first_knight(Some(s.index));
            let owner = usize::from(b.owner());
            s.set_state(SerfState::DefendingCastle { next_knight: next });
            s.counter = 6000;
            if let Some(player) = self.players.get_mut(owner) {
                player.increase_castle_knights();
            }
            return Ok(());
        }

        b.requested_knight_arrived();
        let next = b.first_knight();
        s.set_state(defending_state(b.btype(), next));
        s.counter = 6000;

        if !b.occupy_with_first_knight(s.index) {
            return Ok(());
        }
        let (owner, pos, flag) = (usize::from(b.owner()), b.pos(), b.flag());
        let kind = b.btype().garrison_kind().unwrap_or(0);
        log::debug!("knight {} occupied building {}", s.index, building);
        if let Some(player) = self.players.get_mut(owner) {
            player.notify(NotificationKind::KnightOccupied, pos, kind);
        }
        if let Some(f) = self.flags.get_mut(flag) {
            f.clear_flags();
        }
        self.with_serf_stored(s, |game| game.building_captured(building))
    }

    pub(super) fn handle_leaving_building(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::LeavingBuilding { exit } = s.state else {
            return Ok(());
        };
        self.elapse(s);
        if s.counter >= 0 {
            return Ok(());
        }
        s.counter = 0;
        let reset = |fw: FreeWalk| FreeWalk { flags: 0, ..fw };
        let next = match exit {
            Exit::Walking { task, dest } => SerfState::Walking(Walk::new(task, dest)),
            Exit::DropResourceOut { res, dest } => SerfState::DropResourceOut { res, dest },
            Exit::FreeWalking(fw) => SerfState::FreeWalking(reset(fw)),
            Exit::StoneCutterFreeWalking(fw) => SerfState::StoneCutterFreeWalking(reset(fw)),
            Exit::KnightFreeWalking(fw) => SerfState::KnightFreeWalking(reset(fw)),
            Exit::KnightPrepareDefending => SerfState::KnightPrepareDefending,
            Exit::Scatter => SerfState::Scatter,
            Exit::Lost => SerfState::Lost { search_far_first: false },
        };
        s.set_state(next);
        Ok(())
    }

    pub(super) fn handle_ready_to_enter(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::ReadyToEnter { entry } = s.state else {
            return Ok(());
        };
        if self.map.has_serf(self.map.move_up_left(s.pos)) {
            s.animation = 85;
            s.counter = 0;
            return Ok(());
        }
        self.enter_building(s, entry, false);
        Ok(())
    }

    /// The door or the flag in front of it is taken by someone else.
    fn door_blocked(&self, s: &Serf) -> bool {
        let here = self.map.serf_at(s.pos);
        (here.is_some() && here != Some(s.index)) || self.map.has_serf(self.map.move_down_right(s.pos))
    }

    pub(super) fn handle_ready_to_leave(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::ReadyToLeave { exit } = s.state else {
            return Ok(());
        };
        s.tick = self.tick16();
        s.counter = 0;
        if self.door_blocked(s) {
            s.animation = 82;
            return Ok(());
        }
        self.leave_building(s, exit, false);
        Ok(())
    }

    pub(super) fn handle_ready_to_leave_inventory(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::ReadyToLeaveInventory { exit, inventory } = s.state else {
            return Ok(());
        };
        s.tick = self.tick16();
        s.counter = 0;

        if self.map.has_serf(s.pos) || self.map.has_serf(self.map.move_down_right(s.pos)) {
            s.animation = 82;
            return Ok(());
        }
        if let Exit::Walking {
            task: WalkTask::Enter,
            dest: Some(dest),
        } = exit
        {
            let target = self
                .flags
                .get(dest)
                .and_then(|f| f.building())
                .and_then(|b| self.buildings.get(b))
                .map(|b| b.pos());
            if target.map_or(false, |pos| self.map.has_serf(pos)) {
                s.animation = 82;
                return Ok(());
            }
        }

        if let Some(inv) = self.inventories.get_mut(inventory) {
            inv.serf_away();
        }
        self.leave_building(s, exit, false);
        Ok(())
    }

    pub(super) fn handle_finished_building(&mut self, s: &mut Serf) -> GameResult<()> {
        if self.map.has_serf(self.map.move_down_right(s.pos)) {
            return Ok(());
        }
        s.set_state(SerfState::ReadyToLeave {
            exit: Exit::Walking {
                task: WalkTask::ReturnHome,
                dest: None,
            },
        });
        if self.map.serf_at(s.pos).map_or(false, |other| other != s.index) {
            s.animation = 82;
        }
        Ok(())
    }

    // ── Construction ────────────────────────────────────────────────────

    pub(super) fn handle_digging(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);

        while s.counter < 0 {
            let SerfState::Digging(mut dig) = s.state else {
                return Ok(());
            };
            dig.substate -= 1;

            if dig.substate < 0 {
                // Step onto the spot once the serf standing there moves.
                let d = dig.dig_pos;
                let dir = if d == 0 {
                    Direction::Up
                } else {
                    Direction::from_index(6 - d).unwrap_or(Direction::Up)
                };
                let new_pos = self.map.move_pos(s.pos, dir);
                let h_step = self.map.height(new_pos) - self.map.height(s.pos);

                if let Some(other_id) = self.map.serf_at(new_pos) {
                    let rev = dir.reverse();
                    let swapped = match self.serfs.get_mut(other_id) {
                        Some(other) if other_id != s.index => {
                            if other.is_waiting() == Some(Some(rev)) && other.switch_waiting(rev) {
                                other.pos = s.pos;
                                other.animation = walking_animation(-h_step, rev, true);
                                other.counter = anim_counter(other.animation);
                                true
                            } else {
                                false
                            }
                        }
                        _ => false,
                    };
                    if !swapped {
                        dig.substate = 0;
                        s.state = SerfState::Digging(dig);
                        s.counter = 127;
                        return Ok(());
                    }
                    self.map.set_serf(s.pos, Some(other_id));
                    s.animation = if d != 0 { walking_animation(h_step, dir, true) } else { h_step };
                } else {
                    self.map.set_serf(s.pos, None);
                    s.animation = if d != 0 { walking_animation(h_step, dir, false) } else { h_step };
                }

                self.map.set_serf(new_pos, Some(s.index));
                s.pos = new_pos;
                dig.substate = 3;
                s.state = SerfState::Digging(dig);
                s.counter += anim_counter(s.animation);
            } else if dig.substate == 1 {
                // Shift the height one step, then head back to the center.
                let h = self.map.height(s.pos) + if dig.h_index & 1 != 0 { -1 } else { 1 };
                self.map.set_height(s.pos, h);
                s.state = SerfState::Digging(dig);
                if dig.dig_pos != 0 {
                    if let Some(dir) = Direction::from_index(6 - dig.dig_pos) {
                        self.start_walking(s, dir.reverse(), 32, true);
                    }
                }
            } else if dig.substate > 1 {
                s.animation = 88 - (dig.h_index & 1);
                s.counter += 383;
                s.state = SerfState::Digging(dig);
            } else {
                // Look for the next tile off the target height.
                loop {
                    let Some(&diff) = usize::try_from(dig.h_index).ok().and_then(|i| DIG_HEIGHT_DIFF.get(i)) else {
                        dig.h_index = -1;
                        break;
                    };
                    let h = diff + dig.target_h;
                    if dig.dig_pos >= 0 && (0..32).contains(&h) {
                        if dig.dig_pos == 0 {
                            if self.map.height(s.pos) != h {
                                dig.dig_pos -= 1;
                                continue;
                            }
                            dig.substate = 2;
                            s.animation = if dig.h_index & 1 != 0 { 87 } else { 88 };
                            s.counter += 383;
                            s.state = SerfState::Digging(dig);
                        } else {
                            let dir = Direction::from_index(6 - dig.dig_pos).unwrap_or(Direction::Up);
                            let new_pos = self.map.move_pos(s.pos, dir);
                            if self.map.height(new_pos) != h {
                                dig.dig_pos -= 1;
                                continue;
                            }
                            if self.map.has_serf(new_pos) {
                                dig.substate = 0;
                                s.animation = 87 - dig.dig_pos;
                                s.counter = anim_counter(s.animation);
                                s.state = SerfState::Digging(dig);
                                return Ok(());
                            }
                            dig.substate = 3;
                            s.state = SerfState::Digging(dig);
                            self.start_walking(s, dir, 32, true);
                        }
                        break;
                    }

                    dig.dig_pos = 6;
                    dig.h_index -= 1;
                    if dig.h_index < 0 {
                        break;
                    }
                }

                if dig.h_index < 0 {
                    if let Some(b) = self.map.building_at(s.pos).and_then(|b| self.buildings.get_mut(b)) {
                        b.done_leveling();
                    }
                    log::debug!("serf {}: leveling at {} done", s.index, s.pos);
                    s.set_state(SerfState::ReadyToLeave {
                        exit: Exit::Walking {
                            task: WalkTask::ReturnHome,
                            dest: None,
                        },
                    });
                    return self.handle_ready_to_leave(s);
                }
            }
        }
        Ok(())
    }

    pub(super) fn handle_building(&mut self, s: &mut Serf) -> GameResult<()> {
        self.elapse(s);

        while s.counter < 0 {
            let SerfState::Building(mut site) = s.state else {
                return Ok(());
            };
            let Some(building) = self.buildings.get_mut(site.building) else {
                log::warn!("serf {}: construction site {} vanished", s.index, site.building);
                s.set_lost();
                s.counter = 0;
                return Ok(());
            };
            let btype = building.btype();

            let take_material = if site.mode < 0 {
                if building.build_progress() {
                    let flag = building.flag();
                    if btype.is_garrison() {
                        self.calculate_military_flag_state(site.building);
                    }
                    if let Some(f) = self.flags.get_mut(flag) {
                        f.clear_flags();
                    }
                    if let Some(player) = self.players.get_mut(usize::from(s.owner)) {
                        player.building_built(btype);
                    }
                    log::info!("{} {} finished", btype, site.building);
                    s.counter = 0;
                    s.set_state(SerfState::FinishedBuilding);
                    return Ok(());
                }
                site.counter -= 1;
                site.counter == 0
            } else {
                true
            };

            if take_material {
                if site.mode <= 0 {
                    site.mode = 1;
                    s.animation = if site.material_step & (1 << 7) != 0 { 100 } else { 98 };
                }
                let step = site.material_step & 0xf;
                let stone = MATERIAL_ORDER[btype.index()] & (1 << step) != 0;
                let used = self
                    .buildings
                    .get_mut(site.building)
                    .map_or(false, |b| b.use_construction_material(usize::from(stone)));
                if !used {
                    s.state = SerfState::Building(site);
                    s.counter += 256;
                    if s.counter < 0 {
                        s.counter = 255;
                    }
                    return Ok(());
                }
                site.material_step += 1;
                site.counter = 8;
                site.mode = -1;
            }

            s.state = SerfState::Building(site);
            let mut anim = (self.random_int() & 3) + 102;
            if site.material_step & (1 << 7) != 0 {
                anim += 4;
            }
            s.animation = anim;
            s.counter += anim_counter(anim);
        }
        Ok(())
    }

    pub(super) fn handle_building_castle(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::BuildingCastle { inventory } = s.state else {
            return Ok(());
        };
        let now = self.tick16();
        let delta = now.wrapping_sub(s.tick);
        s.tick = now;

        let building = self.inventories.get(inventory).map(|inv| inv.building());
        let Some(castle) = building.and_then(|b| self.buildings.get_mut(b)) else {
            return Ok(());
        };
        if castle.advance_castle(u32::from(delta) << 7) {
            log::info!("castle of player {} finished", castle.owner());
            s.set_state(SerfState::WaitForResourceOut);
            self.map.set_serf(s.pos, None);
        }
        Ok(())
    }

    // ── Resources leaving a building ────────────────────────────────────

    pub(super) fn handle_move_resource_out(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::MoveResourceOut { res, dest } = s.state else {
            return Ok(());
        };
        s.tick = self.tick16();
        s.counter = 0;
        if self.door_blocked(s) {
            s.animation = 82;
            return Ok(());
        }
        let flag_pos = self.map.move_down_right(s.pos);
        let Some(flag) = self.map.flag_at(flag_pos).and_then(|f| self.flags.get(f)) else {
            log::warn!("serf {}: no flag in front of {}", s.index, s.pos);
            self.cancel_transported_resource(res, dest)?;
            self.lose_resource(res);
            s.set_lost();
            return Ok(());
        };
        if !flag.has_empty_slot() {
            s.animation = 82;
            return Ok(());
        }
        self.leave_building(s, Exit::DropResourceOut { res, dest }, false);
        Ok(())
    }

    pub(super) fn handle_wait_for_resource_out(&mut self, s: &mut Serf) -> GameResult<()> {
        if s.counter != 0 {
            self.elapse(s);
            if s.counter >= 0 {
                return Ok(());
            }
            s.counter = 0;
        }

        let Some(building) = self.map.building_at(s.pos).and_then(|b| self.buildings.get(b)) else {
            return Ok(());
        };
        let inventory = building
            .inventory()
            .ok_or(GameError::MissingInventory(building.index()))?;
        let Some(inv) = self.inventories.get_mut(inventory) else {
            return Err(GameError::NoSuchInventory(inventory));
        };
        if inv.serfs_out() > 0 || !inv.has_queued() {
            return Ok(());
        }
        if let Some(queued) = inv.get_resource_from_queue() {
            s.set_state(SerfState::MoveResourceOut {
                res: queued.res,
                dest: queued.dest,
            });
        }
        Ok(())
    }

    pub(super) fn handle_drop_resource_out(&mut self, s: &mut Serf) -> GameResult<()> {
        let SerfState::DropResourceOut { res, dest } = s.state else {
            return Ok(());
        };
        let Some(flag_id) = self.map.flag_at(s.pos) else {
            log::warn!("serf {}: flag to drop {:?} at is gone", s.index, res);
            self.cancel_transported_resource(res, dest)?;
            self.lose_resource(res);
            s.set_lost();
            return Ok(());
        };
        let dropped = self
            .flags
            .get_mut(flag_id)
            .map_or(false, |f| f.drop_resource(res, dest));
        if !dropped {
            return Err(GameError::FlagFull(flag_id));
        }
        s.set_state(SerfState::ReadyToEnter { entry: Entry::Returning });
        Ok(())
    }

    /// Put a freshly made resource down at the flag the serf stands on.
    /// Without a free slot the resource is lost.
    pub(super) fn drop_resource(&mut self, s: &Serf, res: Resource) {
        let dropped = self
            .map
            .flag_at(s.pos)
            .and_then(|f| self.flags.get_mut(f))
            .map_or(false, |f| f.drop_resource(res, None));
        if dropped {
            if let Some(player) = self.players.get_mut(usize::from(s.owner)) {
                player.increase_res_count(res);
            }
        }
    }

    /// Head for the nearest inventory: along the roads when standing on a
    /// usable friendly flag, else by searching for one.
    pub(super) fn find_inventory(&mut self, s: &mut Serf) {
        if let Some(flag) = self.map.flag_at(s.pos).and_then(|f| self.flags.get(f)) {
            let usable = flag.land_paths() != 0 || (flag.has_inventory() && flag.accepts_serfs());
            if usable && self.map.owner(s.pos) == Some(s.owner) {
                if s.was_lost && self.retire_target(s).is_some() {
                    self.enter_building(s, Entry::Retire, false);
                    return;
                }
                s.set_state(SerfState::Walking(Walk::new(WalkTask::ReturnHome, None)));
                s.counter = 0;
                return;
            }
        }
        if s.was_lost && self.map.has_flag(s.pos) && self.retire_target(s).is_some() {
            self.enter_building(s, Entry::Retire, false);
            return;
        }
        s.set_state(SerfState::Lost { search_far_first: false });
        s.counter = 0;
    }

    /// A friendly finished building behind the flag the serf stands on,
    /// fit for a lost serf to retire into.
    fn retire_target(&self, s: &Serf) -> Option<BuildingId> {
        if !self.options.lost_transporters_clear_faster
            || !matches!(s.serf_type, SerfType::Generic | SerfType::Transporter)
        {
            return None;
        }
        let entrance = self.map.move_up_left(s.pos);
        if self.map.has_serf(entrance) {
            return None;
        }
        let id = self.map.building_at(entrance)?;
        let b = self.buildings.get(id)?;
        let fit = b.is_done() && b.owner() == s.owner && !b.btype().is_mine() && !b.is_burning();
        fit.then_some(id)
    }

    // ── Knights at home ─────────────────────────────────────────────────

    pub(super) fn handle_defending(&mut self, s: &mut Serf) -> GameResult<()> {
        let params: [i32; 4] = match s.state {
            SerfState::DefendingHut { .. } => [250, 125, 62, 31],
            SerfState::DefendingTower { .. } => [1000, 500, 250, 125],
            SerfState::DefendingFortress { .. } => [2000, 1000, 500, 250],
            _ => [4000, 2000, 1000, 500],
        };
        if let Some(level) = s.serf_type.knight_level() {
            if let Some(&p) = params.get(usize::from(level)) {
                self.train_knight(s, p);
            }
        }
        Ok(())
    }

    pub(super) fn handle_scatter(&mut self, s: &mut Serf) -> GameResult<()> {
        for _ in 0..100 {
            let r = self.random_int();
            let mut col = r & 0xf;
            if col < 8 {
                col -= 16;
            }
            let mut row = (r >> 8) & 0xf;
            if row < 8 {
                row -= 16;
            }
            let dest = self.map.pos_add(s.pos, col, row);
            if self.map.obj(dest) == crate::map::MapObject::None && self.map.height(dest) > 0 {
                let fw = FreeWalk::new(col, row, FreeWalk::RETURNING, -1);
                s.set_state(if s.is_knight() {
                    SerfState::KnightFreeWalking(fw)
                } else {
                    SerfState::FreeWalking(fw)
                });
                s.counter = 0;
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_order_matches_construction_needs() {
        for btype in BuildingType::ALL {
            if btype == BuildingType::Castle {
                continue;
            }
            let info = btype.construction();
            let total = info.planks + info.stones;
            let stones = (0..total).filter(|&i| MATERIAL_ORDER[btype.index()] & (1 << i) != 0).count();
            assert_eq!(stones as u32, info.stones, "{}", btype);
        }
    }

    #[test]
    fn test_stock_training_rates() {
        assert_eq!(stock_training(SerfType::Knight0), Some(4000));
        assert_eq!(stock_training(SerfType::Knight3), Some(500));
        assert_eq!(stock_training(SerfType::Knight4), None);
        assert_eq!(stock_training(SerfType::Generic), None);
    }

    #[test]
    fn test_large_scaffold_types() {
        assert!(uses_large_scaffold(BuildingType::Fortress));
        assert!(!uses_large_scaffold(BuildingType::Hut));
    }
}
