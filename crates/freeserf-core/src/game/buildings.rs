//! Buildings on the map: where they fit, founding them and the castle,
//! tearing them down, and the once-per-tick policy each building runs to
//! staff itself and pull in materials.

use super::Game;
use crate::building::{Building, BuildingType, CASTLE_BURNING_TICKS};
use crate::collection::{BuildingId, InventoryId, SerfId};
use crate::error::{GameError, GameResult};
use crate::flag::Flag;
use crate::inventory::Inventory;
use crate::map::{Direction, MapObject, MapPos, Space, Terrain};
use crate::notification::NotificationKind;
use crate::resource::Resource;
use crate::serf::{defending_state, SerfState, SerfType, WalkTask};

/// Specialists a new castle starts with, besides its generic serfs.
const INITIAL_CASTLE_SERFS: [SerfType; 14] = [
    SerfType::Knight0,
    SerfType::Knight0,
    SerfType::Knight0,
    SerfType::Toolmaker,
    SerfType::Lumberjack,
    SerfType::Sawmiller,
    SerfType::Stonecutter,
    SerfType::Digger,
    SerfType::Builder,
    SerfType::Fisher,
    SerfType::Geologist,
    SerfType::Geologist,
    SerfType::Miner,
    SerfType::Miner,
];

const INITIAL_GENERIC_SERFS: usize = 5;

/// Longest garrison chain followed before giving up on a corrupt link.
const MAX_CHAIN_LEN: usize = 1024;

impl Game {
    // ── Placement ───────────────────────────────────────────────────────

    /// Height the ground under a large building at `pos` is leveled to,
    /// or `None` when the surroundings are too steep.
    pub fn leveling_height(&self, pos: MapPos) -> Option<i32> {
        let mut h_min = 31;
        let mut h_max = 0;
        for i in 7..19 {
            let h = self.map.height(self.map.pos_add_spirally(pos, i));
            h_min = h_min.min(h);
            h_max = h_max.max(h);
        }

        // Neighbours still being leveled count with their target height.
        for i in 19..37 {
            let p = self.map.pos_add_spirally(pos, i);
            if self.map.obj(p) != MapObject::LargeBuilding {
                continue;
            }
            let leveling = self
                .map
                .building_at(p)
                .and_then(|id| self.buildings.get(id))
                .filter(|b| b.is_leveling());
            if let Some(b) = leveling {
                h_min = h_min.min(b.level());
                h_max = h_max.max(b.level());
            }
        }

        if h_max - h_min >= 9 {
            return None;
        }

        // The centre counts twice.
        let mut h_mean = self.map.height(pos);
        for i in 0..7 {
            h_mean += self.map.height(self.map.pos_add_spirally(pos, i));
        }
        h_mean >>= 3;

        let h_new_min = (if h_max > 4 { h_max - 4 } else { 1 }).max(1);
        let h_new_max = h_min + 4;
        Some(h_mean.min(h_new_max).max(h_new_min))
    }

    fn can_build_small(&self, pos: MapPos) -> bool {
        self.map.types_within(pos, Terrain::Grass0, Terrain::Grass3)
    }

    /// Mines sit on mountain terrain, with grass allowed around them.
    fn can_build_mine(&self, pos: MapPos) -> bool {
        let ul = self.map.move_up_left(pos);
        let types = [
            self.map.type_down(pos),
            self.map.type_up(pos),
            self.map.type_down(self.map.move_left(pos)),
            self.map.type_up(ul),
            self.map.type_down(ul),
            self.map.type_up(self.map.move_up(pos)),
        ];
        let mut mountain = false;
        for t in types {
            if (Terrain::Tundra0..=Terrain::Snow0).contains(&t) {
                mountain = true;
            } else if !(Terrain::Grass0..=Terrain::Grass3).contains(&t) {
                return false;
            }
        }
        mountain
    }

    fn can_build_large(&self, pos: MapPos) -> bool {
        let passable = (1..7).all(|i| {
            self.map.obj(self.map.pos_add_spirally(pos, i)).space() < Space::Semipassable
        });
        if !passable {
            return false;
        }
        let crowded = (7..19).any(|i| {
            matches!(
                self.map.obj(self.map.pos_add_spirally(pos, i)),
                MapObject::LargeBuilding | MapObject::Castle
            )
        });
        if crowded {
            return false;
        }
        if !self.map.types_within(pos, Terrain::Grass1, Terrain::Grass1) {
            return false;
        }
        self.leveling_height(pos).is_some()
    }

    /// No other military building within two rings.
    fn can_build_military(&self, pos: MapPos) -> bool {
        !(0..19).any(|i| {
            let p = self.map.pos_add_spirally(pos, i);
            self.map.obj(p).is_building()
                && self
                    .map
                    .building_at(p)
                    .and_then(|id| self.buildings.get(id))
                    .is_some_and(Building::is_military)
        })
    }

    /// Whether `player` may found its castle at `pos`.
    pub fn can_build_castle(&self, pos: MapPos, player: u8) -> bool {
        match self.players.get(usize::from(player)) {
            Some(p) if !p.has_castle() => {}
            _ => return false,
        }
        if (0..7).any(|i| self.map.has_owner(self.map.pos_add_spirally(pos, i))) {
            return false;
        }
        let flag_pos = self.map.move_down_right(pos);
        for p in [pos, flag_pos] {
            if self.map.space(p) != Space::Open || self.map.paths(p) != 0 {
                return false;
            }
        }
        self.can_build_large(pos)
    }

    /// Whether `player` owns the land at `pos` well enough to build there.
    pub fn can_player_build(&self, pos: MapPos, player: u8) -> bool {
        if !self
            .players
            .get(usize::from(player))
            .is_some_and(|p| p.has_castle())
        {
            return false;
        }
        if (0..7).any(|i| self.map.owner(self.map.pos_add_spirally(pos, i)) != Some(player)) {
            return false;
        }
        if self.map.types_within(pos, Terrain::Water0, Terrain::Water3) {
            return false;
        }
        self.map.paths(pos) == 0
    }

    /// Whether a building of `btype` fits at `pos` for `player`. The
    /// castle is founded with `build_castle` instead.
    pub fn can_build_building(&self, pos: MapPos, btype: BuildingType, player: u8) -> bool {
        if btype == BuildingType::Castle || !self.can_player_build(pos, player) {
            return false;
        }
        if self.map.space(pos) != Space::Open {
            return false;
        }
        let flag_pos = self.map.move_down_right(pos);
        if !self.map.has_flag(flag_pos) && !self.can_build_flag(flag_pos, player) {
            return false;
        }

        let fits = if btype.is_mine() {
            self.can_build_mine(pos)
        } else if btype.is_large() {
            self.can_build_large(pos)
        } else {
            self.can_build_small(pos)
        };
        fits && (!btype.is_garrison() || self.can_build_military(pos))
    }

    // ── Founding ────────────────────────────────────────────────────────

    /// Start construction of a building. A flag is placed in front of it
    /// when none is there yet.
    pub fn build_building(&mut self, pos: MapPos, btype: BuildingType, player: u8) -> GameResult<BuildingId> {
        self.check_pos(pos)?;
        if !self.can_build_building(pos, btype, player) {
            return Err(GameError::CannotBuild { what: "building", pos });
        }

        let flag_pos = self.map.move_down_right(pos);
        let flag = match self.map.flag_at(flag_pos) {
            Some(flag) => flag,
            None => self.build_flag(flag_pos, player)?,
        };
        let level = self.leveling_height(pos).unwrap_or_else(|| self.map.height(pos));

        let id = self.buildings.allocate_with(|id| {
            let mut b = Building::new(id, btype, player, pos, flag);
            b.set_level(level);
            b
        });
        if let Some(p) = self.players.get_mut(usize::from(player)) {
            p.building_founded(btype);
        }
        let f = self.flags.get_mut(flag).ok_or(GameError::NoSuchFlag(flag))?;
        f.link_building(id);
        f.clear_flags();

        self.map.set_idle_serf(pos, false);
        self.map.set_object(pos, btype.map_object(), Some(id.get()));
        self.map.add_path(pos, Direction::DownRight);
        self.map.add_path(flag_pos, Direction::UpLeft);
        log::debug!("player {} founded {} {} at {}", player, btype, id, pos);
        Ok(id)
    }

    /// Found the player's castle with its starting stock and household,
    /// and claim the land around it.
    pub fn build_castle(&mut self, pos: MapPos, player: u8) -> GameResult<BuildingId> {
        self.check_pos(pos)?;
        let supplies = self
            .players
            .get(usize::from(player))
            .map(|p| p.settings().supplies)
            .ok_or(GameError::NoSuchPlayer(usize::from(player)))?;
        if !self.can_build_castle(pos, player) {
            return Err(GameError::CannotBuild { what: "castle", pos });
        }
        let level = self
            .leveling_height(pos)
            .ok_or(GameError::CannotBuild { what: "castle", pos })?;

        let flag_pos = self.map.move_down_right(pos);
        let flag = self.flags.allocate_with(|_| Flag::new(player, flag_pos));
        let castle = self
            .buildings
            .allocate_with(|id| Building::new(id, BuildingType::Castle, player, pos, flag));
        let inventory = self
            .inventories
            .allocate_with(|id| Inventory::new(id, player, flag, castle));

        let gold = match self.inventories.get_mut(inventory) {
            Some(inv) => {
                inv.apply_supplies_preset(supplies);
                inv.count_of(Resource::GoldBar) + inv.count_of(Resource::GoldOre)
            }
            None => return Err(GameError::NoSuchInventory(inventory)),
        };
        self.add_gold_total(i64::from(gold));

        if let Some(b) = self.buildings.get_mut(castle) {
            b.set_inventory(Some(inventory));
            b.set_level(level);
        }
        if let Some(f) = self.flags.get_mut(flag) {
            f.set_accepts_serfs(true);
            f.set_has_inventory();
            f.set_accepts_resources(true);
            f.link_building(castle);
        }

        self.map.set_object(pos, MapObject::Castle, Some(castle.get()));
        self.map.add_path(pos, Direction::DownRight);
        self.map.set_object(flag_pos, MapObject::Flag, Some(flag.get()));
        self.map.add_path(flag_pos, Direction::UpLeft);

        self.map.set_height(pos, level);
        for d in Direction::ALL {
            let p = self.map.move_pos(pos, d);
            self.map.set_height(p, level);
        }

        self.update_land_ownership(pos)?;
        let tick = self.tick;
        if let Some(p) = self.players.get_mut(usize::from(player)) {
            p.castle_founded(castle, flag, inventory, tick);
        }
        self.calculate_military_flag_state(castle);
        self.create_initial_castle_serfs(castle, inventory);
        log::info!("player {} founded its castle at {}", player, pos);
        Ok(castle)
    }

    /// The castle builder, five generic serfs and the starting specialists.
    fn create_initial_castle_serfs(&mut self, castle: BuildingId, inventory: InventoryId) {
        let Some((owner, pos)) = self.buildings.get(castle).map(|b| (b.owner(), b.pos())) else {
            return;
        };

        let keeper = self.create_serf(owner, SerfType::TransporterInventory, pos);
        if let Some(s) = self.serfs.get_mut(keeper) {
            s.set_state(SerfState::BuildingCastle { inventory });
        }
        self.map.set_serf(pos, Some(keeper));
        if let Some(b) = self.buildings.get_mut(castle) {
            b.set_main_serf(Some(keeper));
        }

        for _ in 0..INITIAL_GENERIC_SERFS {
            self.spawn_generic_in(inventory);
        }
        for ty in INITIAL_CASTLE_SERFS {
            let id = self.create_serf(owner, ty, pos);
            if let Some(s) = self.serfs.get_mut(id) {
                s.stay_idle_in_stock(inventory);
            }
            if let Some(inv) = self.inventories.get_mut(inventory) {
                inv.serf_idle_in_stock(id, ty);
            }
        }

        if let Some(p) = self.players.get_mut(usize::from(owner)) {
            p.set_can_spawn(true);
        }
    }

    // ── Demolition ──────────────────────────────────────────────────────

    pub fn can_demolish_building(&self, pos: MapPos, player: u8) -> bool {
        self.map
            .building_at(pos)
            .and_then(|id| self.buildings.get(id))
            .is_some_and(|b| b.owner() == player && !b.is_burning())
    }

    /// Set a building of `player` on fire.
    pub fn demolish_building(&mut self, pos: MapPos, player: u8) -> GameResult<()> {
        self.check_pos(pos)?;
        if !self.can_demolish_building(pos, player) {
            return Err(GameError::CannotDemolish { what: "building", pos });
        }
        self.burn_building(pos)
    }

    /// Burn the building at `pos` down, whoever owns it. Its stock is
    /// lost, an inventory's queue is cancelled and the serfs living in it
    /// are put out on the map.
    pub(crate) fn burn_building(&mut self, pos: MapPos) -> GameResult<()> {
        let Some(id) = self.map.building_at(pos) else {
            return Ok(());
        };
        let Some(b) = self.buildings.get(id) else {
            return Ok(());
        };
        if b.is_burning() {
            return Ok(());
        }
        let btype = b.btype();
        let owner = b.owner();
        let flag = b.flag();
        let done = b.is_done();
        let active = b.is_active();
        let holder = b.has_holder();
        let inventory = b.inventory();
        let main_serf = b.main_serf();
        let first_knight = b.first_knight();
        let stocked_gold = b.stock_count(1);

        for p in self.players.iter_mut() {
            if p.attack.target == Some(id) {
                p.attack.target = None;
            }
        }

        let flag_pos = self.map.move_down_right(pos);
        self.map.del_path(pos, Direction::DownRight);
        self.map.del_path(flag_pos, Direction::UpLeft);
        if let Some(f) = self.flags.get_mut(flag) {
            f.unlink_building();
        }
        self.reset_transport(flag);

        if done
            && matches!(
                btype,
                BuildingType::Hut | BuildingType::Tower | BuildingType::Fortress | BuildingType::GoldSmelter
            )
        {
            self.add_gold_total(-i64::from(stocked_gold));
        }

        let tick = self.tick;
        if let Some(b) = self.buildings.get_mut(id) {
            b.start_burning(tick);
        }
        if btype == BuildingType::Castle || (done && active && btype.is_military()) {
            self.update_land_ownership(pos)?;
        }

        let keeps_inventory = btype == BuildingType::Castle || (done && btype == BuildingType::Stock);
        if keeps_inventory {
            if let Some(mut inv) = inventory.and_then(|i| self.inventories.erase(i)) {
                for queued in inv.take_queue() {
                    self.cancel_transported_resource(queued.res, queued.dest)?;
                    self.lose_resource(queued.res);
                }
                let gold = inv.count_of(Resource::GoldBar) + inv.count_of(Resource::GoldOre);
                self.add_gold_total(-i64::from(gold));
                if let Some(b) = self.buildings.get_mut(id) {
                    b.set_inventory(None);
                }
            }
            self.serfs_building_deleted(pos, true);
        }

        if let Some(p) = self.players.get_mut(usize::from(owner)) {
            p.building_demolished(btype, done || btype == BuildingType::Castle);
        }

        if holder {
            if btype == BuildingType::Castle {
                if let Some(b) = self.buildings.get_mut(id) {
                    b.set_burning_counter(CASTLE_BURNING_TICKS);
                }
                self.serfs_castle_deleted(pos);
                for knight in self.knight_chain(first_knight) {
                    self.serf_castle_deleted(knight, pos, false);
                }
            } else if done && btype.is_garrison() {
                for knight in self.knight_chain(first_knight) {
                    self.serf_castle_deleted(knight, pos, false);
                }
            } else if let Some(serf) = main_serf {
                self.serf_castle_deleted(serf, pos, true);
            }
        }
        if let Some(b) = self.buildings.get_mut(id) {
            b.set_main_serf(None);
            b.set_first_knight(None);
        }

        log::info!("{} {} of player {} burns", btype, id, owner);
        if self.map.paths(flag_pos) == 0 && self.map.obj(flag_pos) == MapObject::Flag {
            self.remove_flag(flag_pos)?;
        }
        Ok(())
    }

    /// The fire went out; clear the ruin.
    fn remove_burnt_building(&mut self, id: BuildingId) {
        let Some(pos) = self.buildings.get(id).map(Building::pos) else {
            return;
        };
        if self.map.building_at(pos) == Some(id) {
            self.map.set_object(pos, MapObject::None, Some(0));
        }
        self.buildings.erase(id);
        log::debug!("ruin of building {} at {} cleared", id, pos);
    }

    /// Knights linked from `first`, head first.
    pub(crate) fn knight_chain(&self, first: Option<SerfId>) -> Vec<SerfId> {
        let mut chain = Vec::new();
        let mut next = first;
        while let Some(id) = next {
            if chain.len() >= MAX_CHAIN_LEN || chain.contains(&id) {
                log::warn!("garrison chain through serf {} does not end", id);
                break;
            }
            chain.push(id);
            next = self.serfs.get(id).and_then(|s| s.state.next_knight());
        }
        chain
    }

    // ── Per-tick policy ─────────────────────────────────────────────────

    pub(crate) fn update_building(&mut self, id: BuildingId) -> GameResult<()> {
        let Some(b) = self.buildings.get(id) else {
            return Ok(());
        };
        if b.is_burning() {
            let tick = self.tick;
            let burnt = self.buildings.get_mut(id).is_some_and(|b| b.update_burning(tick));
            if burnt {
                self.remove_burnt_building(id);
            }
            return Ok(());
        }

        let (btype, owner) = (b.btype(), b.owner());
        if !b.is_done() {
            self.update_unfinished(id);
            return Ok(());
        }

        self.request_worker(id);
        let distribution = self.players.get(usize::from(owner)).map(|p| p.distribution);
        if let (Some(prio), Some(b)) = (distribution, self.buildings.get_mut(id)) {
            b.update_production_priorities(&prio);
        }

        match btype {
            BuildingType::Stock => self.update_stock(id),
            BuildingType::Hut | BuildingType::Tower | BuildingType::Fortress => self.update_military(id),
            BuildingType::Castle => self.update_castle(id),
            _ => {}
        }
        Ok(())
    }

    /// Ask for the worker a finished building is missing.
    fn request_worker(&mut self, id: BuildingId) {
        let Some(b) = self.buildings.get(id) else {
            return;
        };
        if !b.wants_worker() {
            return;
        }
        let Some(request) = b.btype().worker() else {
            return;
        };
        let flag = b.flag();
        let sent = self.send_serf_to_flag(flag, Some(request.serf));
        if let Some(b) = self.buildings.get_mut(id) {
            b.set_serf_request_failed(!sent);
        }
    }

    /// Request a builder, or a digger first when a large site still needs
    /// leveling, and keep the material priorities current.
    fn update_unfinished(&mut self, id: BuildingId) {
        let Some(b) = self.buildings.get(id) else {
            return;
        };
        let btype = b.btype();
        if btype == BuildingType::Castle {
            return;
        }

        if btype.is_large() && b.progress() == 0 {
            if b.has_holder() || b.serf_requested() {
                return;
            }
            let (pos, level) = (b.pos(), b.level());
            let leveled = (0..7).all(|i| self.map.height(self.map.pos_add_spirally(pos, i)) == level);
            if !leveled {
                if !b.serf_request_failed() {
                    let flag = b.flag();
                    let sent = self.send_serf_to_flag(flag, Some(SerfType::Digger));
                    if let Some(b) = self.buildings.get_mut(id) {
                        b.set_serf_request_failed(!sent);
                    }
                }
                return;
            }
            if let Some(b) = self.buildings.get_mut(id) {
                b.set_progress(1);
            }
        }

        let Some(b) = self.buildings.get(id) else {
            return;
        };
        if b.wants_worker() {
            let flag = b.flag();
            if let Some(b) = self.buildings.get_mut(id) {
                b.set_progress(1);
            }
            let sent = self.send_serf_to_flag(flag, Some(SerfType::Builder));
            if let Some(b) = self.buildings.get_mut(id) {
                b.set_serf_request_failed(!sent);
            }
        }

        let Some(owner) = self.buildings.get(id).map(Building::owner) else {
            return;
        };
        let planks = self
            .players
            .get(usize::from(owner))
            .map_or(0, |p| p.distribution.planks_construction);
        if let Some(b) = self.buildings.get_mut(id) {
            b.update_construction_priorities(planks);
        }
    }

    /// A finished stock opens its inventory on the first update, then
    /// asks for the transporter that runs it.
    fn update_stock(&mut self, id: BuildingId) {
        let Some(b) = self.buildings.get(id) else {
            return;
        };
        let (owner, flag, pos) = (b.owner(), b.flag(), b.pos());

        if !b.is_active() {
            let inventory = self
                .inventories
                .allocate_with(|inv| Inventory::new(inv, owner, flag, id));
            if let Some(b) = self.buildings.get_mut(id) {
                b.set_inventory(Some(inventory));
                b.set_active(true);
            }
            if let Some(p) = self.players.get_mut(usize::from(owner)) {
                p.notify(NotificationKind::NewStock, pos, 0);
            }
            log::info!("stock {} of player {} opened {}", id, owner, inventory);
            return;
        }

        if b.wants_worker() {
            self.send_serf_to_flag(flag, Some(SerfType::Transporter));
        }
        self.request_generic_if_empty(id);
    }

    /// An inventory that ran out of generic serfs asks for one, no more
    /// often than the player's send delay allows.
    fn request_generic_if_empty(&mut self, id: BuildingId) {
        let Some(b) = self.buildings.get(id) else {
            return;
        };
        if !b.has_holder() {
            return;
        }
        let (owner, flag) = (b.owner(), b.flag());
        let empty = b
            .inventory()
            .and_then(|i| self.inventories.get(i))
            .is_some_and(|inv| !inv.have_any_out_mode() && inv.free_serf_count() == 0);
        if !empty {
            return;
        }
        let due = self
            .players
            .get_mut(usize::from(owner))
            .is_some_and(|p| p.tick_send_generic_delay());
        if due {
            self.send_serf_to_flag(flag, Some(SerfType::Generic));
        }
    }

    /// Keep the garrison at the size the player's occupation setting asks
    /// for at the building's threat level, and keep gold coming.
    fn update_military(&mut self, id: BuildingId) {
        let Some(b) = self.buildings.get(id) else {
            return;
        };
        let (owner, btype, pos, flag) = (b.owner(), b.btype(), b.pos(), b.flag());
        let Some(level) = self
            .players
            .get(usize::from(owner))
            .map(|p| p.garrison_level(b.threat_level()))
        else {
            return;
        };
        let needed = btype.occupants_for_level(level);

        if b.knight_total() < needed {
            if !b.serf_request_failed() {
                let sent = self.send_serf_to_flag(flag, None);
                if let Some(b) = self.buildings.get_mut(id) {
                    b.set_serf_request_failed(!sent);
                }
            }
        } else if needed < b.knights_present() && !self.map.has_serf(self.map.move_down_right(pos)) {
            self.evict_weakest_knight(id);
        }

        let holder = self.buildings.get(id).is_some_and(Building::has_holder);
        if holder {
            if let Some(p) = self.players.get_mut(usize::from(owner)) {
                p.increase_military_max_gold(btype.max_gold());
            }
            if let Some(b) = self.buildings.get_mut(id) {
                b.update_gold_priority();
            }
        }
    }

    /// Send the least trained knight of an overstaffed garrison home.
    fn evict_weakest_knight(&mut self, id: BuildingId) {
        let Some(first) = self.buildings.get(id).and_then(Building::first_knight) else {
            return;
        };
        let chain = self.knight_chain(Some(first));
        let Some(&leaving) = chain
            .iter()
            .min_by_key(|&&k| self.serfs.get(k).map(|s| s.serf_type))
        else {
            return;
        };
        let next = self.serfs.get(leaving).and_then(|s| s.state.next_knight());

        if leaving == first {
            if let Some(b) = self.buildings.get_mut(id) {
                b.set_first_knight(next);
            }
        } else if let Some(&prev) = chain
            .iter()
            .find(|&&k| self.serfs.get(k).and_then(|s| s.state.next_knight()) == Some(leaving))
        {
            if let Some(p) = self.serfs.get_mut(prev) {
                p.insert_before(next);
            }
        }

        if let Some(s) = self.serfs.get_mut(leaving) {
            s.go_out_from_building(None, WalkTask::ReturnHome);
        }
        if let Some(b) = self.buildings.get_mut(id) {
            b.knight_left();
        }
        log::debug!("knight {} leaves overstaffed building {}", leaving, id);
    }

    /// Move knights between the castle's stock and its garrison until the
    /// garrison matches the player's wanted size.
    fn update_castle(&mut self, id: BuildingId) {
        let Some(b) = self.buildings.get(id) else {
            return;
        };
        let (owner, flag, first) = (b.owner(), b.flag(), b.first_knight());
        let Some(inventory) = b.inventory() else {
            return;
        };
        let Some((have, wanted)) = self
            .players
            .get(usize::from(owner))
            .map(|p| (p.castle_knights(), p.castle_knights_wanted()))
        else {
            return;
        };

        if have == wanted {
            self.rotate_castle_knights(first);
        } else if have < wanted {
            let ready = self.inventories.get(inventory).and_then(|inv| {
                (0..=4u8)
                    .rev()
                    .map(SerfType::knight)
                    .find(|&t| inv.has_serf(t))
            });
            let recruit = match ready {
                Some(ty) => self
                    .inventories
                    .get_mut(inventory)
                    .and_then(|inv| inv.call_internal(ty)),
                None => self.arm_castle_recruit(inventory),
            };
            match recruit {
                Some(knight) => self.prepend_castle_knight(id, knight),
                None => {
                    let due = self
                        .players
                        .get_mut(usize::from(owner))
                        .is_some_and(|p| p.tick_send_knight_delay());
                    if due {
                        self.send_serf_to_flag(flag, None);
                    }
                }
            }
        } else if let Some(first) = first {
            let next = self.serfs.get(first).and_then(|s| s.state.next_knight());
            if let Some(b) = self.buildings.get_mut(id) {
                b.set_first_knight(next);
            }
            if let Some(s) = self.serfs.get_mut(first) {
                s.stay_idle_in_stock(inventory);
            }
            if let Some(p) = self.players.get_mut(usize::from(owner)) {
                p.decrease_castle_knights();
            }
        }

        self.request_generic_if_empty(id);
    }

    /// Swap the ranks of the weakest castle knight and the last one, so
    /// the weakest ends up at the back of the chain.
    fn rotate_castle_knights(&mut self, first: Option<SerfId>) {
        let chain = self.knight_chain(first);
        let Some(&last) = chain.last() else {
            return;
        };
        let Some(&weakest) = chain
            .iter()
            .min_by_key(|&&k| self.serfs.get(k).map(|s| s.serf_type))
        else {
            return;
        };
        if weakest == last {
            return;
        }
        let weakest_type = self.serfs.get(weakest).map(|s| s.serf_type);
        let last_type = self.serfs.get(last).map(|s| s.serf_type);
        if let (Some(w), Some(l)) = (weakest_type, last_type) {
            if let Some(s) = self.serfs.get_mut(weakest) {
                s.serf_type = l;
            }
            if let Some(s) = self.serfs.get_mut(last) {
                s.serf_type = w;
            }
        }
    }

    /// Arm an idle generic serf of the castle as a knight.
    fn arm_castle_recruit(&mut self, inventory: InventoryId) -> Option<SerfId> {
        let inv = self.inventories.get(inventory)?;
        if inv.count_of(Resource::Sword) == 0 || inv.count_of(Resource::Shield) == 0 {
            return None;
        }
        let serf = inv.serf_at(SerfType::Generic)?;
        if !self.promote_to_knight(serf, inventory) {
            return None;
        }
        self.inventories.get_mut(inventory)?.call_internal(SerfType::Knight0)
    }

    fn prepend_castle_knight(&mut self, castle: BuildingId, knight: SerfId) {
        let Some(b) = self.buildings.get_mut(castle) else {
            return;
        };
        let (owner, next) = (b.owner(), b.first_knight());
        b.set_first_knight(Some(knight));
        if let Some(s) = self.serfs.get_mut(knight) {
            s.set_state(defending_state(BuildingType::Castle, next));
        }
        if let Some(p) = self.players.get_mut(usize::from(owner)) {
            p.increase_castle_knights();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::game_with_castle;

    fn finish_castle(game: &mut Game, center: MapPos) -> BuildingId {
        let castle = game.building_at(center).expect("castle");
        if let Some(b) = game.buildings.get_mut(castle) {
            b.advance_castle(0x10000);
        }
        castle
    }

    /// First position right of the castle where a hut fits.
    fn hut_site(game: &Game, center: MapPos) -> MapPos {
        (0..crate::map::SPIRAL_LEN)
            .map(|i| game.map.pos_add_spirally(center, i))
            .find(|&p| game.can_build_building(p, BuildingType::Hut, 0) && game.map.step_distance(center, p) >= 4)
            .expect("room for a hut")
    }

    #[test]
    fn test_castle_claims_land() {
        let (game, center) = game_with_castle();
        assert_eq!(game.map.owner(center), Some(0));
        assert!(game.player(0).map_or(0, |p| p.land_area()) > 100);
        let corner = game.map.pos_add(center, 20, 20);
        assert_eq!(game.map.owner(corner), None);
    }

    #[test]
    fn test_castle_only_once() {
        let (mut game, center) = game_with_castle();
        let elsewhere = game.map.pos_add(center, 16, 0);
        assert!(!game.can_build_castle(elsewhere, 0));
        assert!(game.build_castle(elsewhere, 0).is_err());
    }

    #[test]
    fn test_castle_levels_its_site() {
        let (game, center) = game_with_castle();
        let h = game.map.height(center);
        for d in Direction::ALL {
            assert_eq!(game.map.height(game.map.move_pos(center, d)), h);
        }
    }

    #[test]
    fn test_build_hut_places_flag() {
        let (mut game, center) = game_with_castle();
        let site = hut_site(&game, center);
        let id = game.build_building(site, BuildingType::Hut, 0).expect("hut");
        let flag_pos = game.map.move_down_right(site);
        let flag = game.flag_at(flag_pos).expect("flag in front");
        assert_eq!(game.flag(flag).and_then(Flag::building), Some(id));
        assert!(game.map.has_path(site, Direction::DownRight));
        assert!(game.map.has_path(flag_pos, Direction::UpLeft));
        assert_eq!(game.player(0).map(|p| p.incomplete_building_count(BuildingType::Hut)), Some(1));
    }

    #[test]
    fn test_military_buildings_keep_apart() {
        let (mut game, center) = game_with_castle();
        let site = hut_site(&game, center);
        game.build_building(site, BuildingType::Hut, 0).expect("hut");
        let near = game.map.pos_add(site, 2, 0);
        assert!(!game.can_build_building(near, BuildingType::Hut, 0));
    }

    #[test]
    fn test_cannot_build_on_foreign_land() {
        let (game, center) = game_with_castle();
        let far = game.map.pos_add(center, 24, 0);
        assert!(!game.can_build_building(far, BuildingType::Lumberjack, 0));
        assert!(!game.can_build_building(center, BuildingType::Castle, 0));
    }

    #[test]
    fn test_unfinished_building_requests_builder() {
        let (mut game, center) = game_with_castle();
        let site = hut_site(&game, center);
        let id = game.build_building(site, BuildingType::Hut, 0).expect("hut");
        let flag_pos = game.map.move_down_right(site);
        let castle_flag = game.map.move_down_right(center);
        let path = crate::pathfinder::find_path(&game.map, castle_flag, flag_pos, 2000);
        if let Some(dirs) = path.filter(|d| game.can_build_road(castle_flag, d, 0)) {
            game.build_road(castle_flag, &dirs, 0).expect("road to site");
            game.update_building(id).expect("update");
            let b = game.building(id).expect("site");
            assert!(b.serf_requested());
            assert!(!b.serf_request_failed());
        }
    }

    #[test]
    fn test_unconnected_site_records_failed_request() {
        let (mut game, center) = game_with_castle();
        let site = hut_site(&game, center);
        let id = game.build_building(site, BuildingType::Hut, 0).expect("hut");
        game.update_building(id).expect("update");
        let b = game.building(id).expect("site");
        assert!(b.serf_request_failed());
        assert!(!b.serf_requested());
    }

    #[test]
    fn test_demolish_burns_and_clears() {
        let (mut game, center) = game_with_castle();
        let site = hut_site(&game, center);
        let id = game.build_building(site, BuildingType::Hut, 0).expect("hut");
        assert!(game.demolish_building(site, 1).is_err());
        game.demolish_building(site, 0).expect("demolish");
        assert!(game.building(id).is_some_and(Building::is_burning));
        assert!(!game.map.has_path(site, Direction::DownRight));
        // The lone flag goes with the building.
        assert!(!game.map.has_flag(game.map.move_down_right(site)));
        assert!(game.demolish_building(site, 0).is_err());

        for _ in 0..2100 {
            game.update_building(id).expect("update");
            game.tick += 1;
        }
        assert!(game.building(id).is_none());
        assert_eq!(game.map.obj(site), MapObject::None);
    }

    #[test]
    fn test_castle_fills_its_garrison() {
        let (mut game, center) = game_with_castle();
        let castle = finish_castle(&mut game, center);
        for _ in 0..3 {
            game.update_serfs().expect("serfs");
            game.update_building(castle).expect("update");
        }
        let player = game.player(0).expect("player");
        assert_eq!(player.castle_knights(), 3);
        let first = game.building(castle).and_then(Building::first_knight);
        let chain = game.knight_chain(first);
        assert_eq!(chain.len(), 3);
        assert!(chain.iter().all(|&k| game.serf(k).is_some_and(|s| s.is_knight())));
    }

    #[test]
    fn test_castle_releases_extra_knights() {
        let (mut game, center) = game_with_castle();
        let castle = finish_castle(&mut game, center);
        for _ in 0..3 {
            game.update_serfs().expect("serfs");
            game.update_building(castle).expect("update");
        }
        if let Some(p) = game.player_mut(0) {
            p.decrease_castle_knights_wanted();
        }
        game.update_building(castle).expect("update");
        assert_eq!(game.player(0).map(|p| p.castle_knights()), Some(2));
        let first = game.building(castle).and_then(Building::first_knight);
        assert_eq!(game.knight_chain(first).len(), 2);
    }

    #[test]
    fn test_hut_garrison_follows_occupation() {
        let (mut game, center) = game_with_castle();
        let castle_flag = game.map.move_down_right(center);
        let hut_flag = game.map.pos_add(castle_flag, 4, 0);
        let site = game.map.move_up_left(hut_flag);
        let hut = game.build_building(site, BuildingType::Hut, 0).expect("hut");
        game.build_road(castle_flag, &[Direction::Right; 4], 0).expect("road");
        if let Some(b) = game.buildings.get_mut(hut) {
            while !b.build_progress() {}
        }
        if let Some(p) = game.player_mut(0) {
            p.change_knight_occupation(0, true, -4);
        }
        assert_eq!(game.player(0).map(|p| p.occupation_max(0)), Some(0));

        // Lowest setting: one knight, and no more while it walks over.
        game.update_building(hut).expect("update");
        assert_eq!(game.building(hut).map(Building::knights_requested), Some(1));
        for _ in 0..3 {
            game.clear_serf_request_failure();
            game.update_serfs().expect("serfs");
            game.update_building(hut).expect("update");
        }
        assert_eq!(game.building(hut).map(Building::knight_total), Some(1));

        if let Some(p) = game.player_mut(0) {
            p.change_knight_occupation(0, true, 4);
        }
        for _ in 0..6 {
            game.clear_serf_request_failure();
            game.update_serfs().expect("serfs");
            game.update_building(hut).expect("update");
        }
        let b = game.building(hut).expect("hut");
        assert_eq!(b.knight_total(), 3);
        assert!(b.knight_total() <= BuildingType::Hut.knight_capacity());
    }

    #[test]
    fn test_leveling_height_within_bounds() {
        let (game, center) = game_with_castle();
        let site = game.map.pos_add(center, 6, 3);
        let h = game.leveling_height(site).expect("flat land levels");
        assert!((1..=31).contains(&h));
        assert!((10..=11).contains(&h));
    }
}
