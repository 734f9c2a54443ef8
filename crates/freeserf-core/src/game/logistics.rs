//! Moving resources and serfs over the road network: scheduling waiting
//! resources at flags, staffing roads, dispatching workers and knights,
//! and handing inventory stock to buildings that ask for it.

use crate::building::Building;
use crate::collection::{FlagId, InventoryId, SerfId};
use crate::error::GameResult;
use crate::flag::{Flag, FlagPath, FlagSearch, FLAG_MAX_RES_COUNT};
use crate::inventory::{Inventory, InventoryMode};
use crate::map::{cycle_ccw, Direction};
use crate::resource::Resource;
use crate::serf::{SerfType, WalkTask};

use super::Game;

/// Building priority above which the search for a destination stops early.
const GOOD_ENOUGH_PRIORITY: u8 = 204;

/// Lowest slot priority a building must have to be served.
const MIN_REQUEST_PRIORITY: u8 = 16;

/// Waiting resources at which a flag stops accepting routed traffic.
const CONGESTED_WAITING: usize = 7;

/// Generic serfs an inventory keeps for itself before sending one out.
const GENERIC_RESERVE: u32 = 4;

/// Dispatch orders, picked at random each round.
const DISPATCH_ORDER_1: [Resource; 12] = [
    Resource::Plank,
    Resource::Stone,
    Resource::Steel,
    Resource::Coal,
    Resource::Lumber,
    Resource::IronOre,
    Resource::GroupFood,
    Resource::Pig,
    Resource::Flour,
    Resource::Wheat,
    Resource::GoldBar,
    Resource::GoldOre,
];
const DISPATCH_ORDER_2: [Resource; 12] = [
    Resource::Stone,
    Resource::IronOre,
    Resource::GoldOre,
    Resource::Coal,
    Resource::Steel,
    Resource::GoldBar,
    Resource::GroupFood,
    Resource::Pig,
    Resource::Flour,
    Resource::Wheat,
    Resource::Lumber,
    Resource::Plank,
];
const DISPATCH_ORDER_3: [Resource; 12] = [
    Resource::GroupFood,
    Resource::Wheat,
    Resource::Pig,
    Resource::Flour,
    Resource::GoldBar,
    Resource::Stone,
    Resource::Plank,
    Resource::Steel,
    Resource::Coal,
    Resource::Lumber,
    Resource::GoldOre,
    Resource::IronOre,
];

/// Resources that go straight to a requesting building. Everything else
/// is returned to an inventory.
fn is_routable(res: Resource) -> bool {
    !(res == Resource::Boat || res.is_tool() || res.is_weapon())
}

/// Where a serf request is served from.
enum Dispatch {
    /// An inventory has a serf of the requested type idle.
    Ready(InventoryId, SerfType),
    /// An inventory can equip a generic serf for the job.
    Equip(InventoryId),
}

impl Game {
    // ── Flags ───────────────────────────────────────────────────────────

    /// Route newly waiting resources and keep the roads staffed.
    pub(crate) fn update_flag(&mut self, id: FlagId) -> GameResult<()> {
        let Some(flag) = self.flags.get(id) else {
            return Ok(());
        };
        let waiting = flag.res_waiting();
        let mut waiting_count = 0;

        if flag.has_resources() {
            if let Some(f) = self.flags.get_mut(id) {
                f.set_has_resources(false);
            }
            for slot in 0..FLAG_MAX_RES_COUNT {
                let Some(entry) = self.flags.get(id).and_then(|f| f.slot(slot)).copied() else {
                    continue;
                };
                if entry.res.is_none() {
                    continue;
                }
                waiting_count += 1;
                if entry.dir.is_some() {
                    continue;
                }
                match entry.dest {
                    Some(dest) => self.schedule_slot_to_known_dest(id, slot, dest, &waiting)?,
                    None => self.schedule_slot_to_unknown_dest(id, slot),
                }
            }
        }

        self.staff_flag_roads(id, &waiting, waiting_count)
    }

    fn staff_flag_roads(&mut self, id: FlagId, waiting: &[u8; 4], waiting_count: usize) -> GameResult<()> {
        for dir in cycle_ccw() {
            let Some(flag) = self.flags.get(id) else {
                return Ok(());
            };
            let Some(path) = flag.path(dir) else {
                continue;
            };
            let congested = waiting[2] & dir.bit() != 0;
            let free = path.free_transporters;

            if path.serf_requested {
                if congested {
                    if waiting_count >= CONGESTED_WAITING {
                        self.set_flag_transporter(id, dir, false);
                    }
                } else if free != 0 {
                    self.set_flag_transporter(id, dir, true);
                }
            } else if free == 0 || congested {
                if free < path.max_transporters() && !flag.serf_request_fail() && !self.call_transporter(id, dir) {
                    if let Some(f) = self.flags.get_mut(id) {
                        f.set_serf_request_failed();
                    }
                }
                if waiting_count >= CONGESTED_WAITING {
                    self.set_flag_transporter(id, dir, false);
                }
            } else {
                self.set_flag_transporter(id, dir, true);
            }
        }
        Ok(())
    }

    fn set_flag_transporter(&mut self, id: FlagId, dir: Direction, value: bool) {
        if let Some(f) = self.flags.get_mut(id) {
            f.set_has_transporter(dir, value);
        }
    }

    /// Pick a destination for a resource nobody asked for: the building
    /// wanting it most, else the nearest inventory.
    fn schedule_slot_to_unknown_dest(&mut self, id: FlagId, slot: usize) {
        let Some(res) = self.flags.get(id).and_then(|f| f.resource_at_slot(slot)) else {
            return;
        };

        if is_routable(res) {
            let wanted = res.requested_type();
            let buildings = &self.buildings;
            let mut best: Option<(FlagId, u8)> = None;
            FlagSearch::single(&self.flags, id, false, true, |fid, flag, _| {
                let Some(building) = flag.building().and_then(|b| buildings.get(b)) else {
                    return false;
                };
                if let Some(prio) = building.max_priority_for_resource(wanted, MIN_REQUEST_PRIORITY) {
                    if best.map_or(true, |(_, p)| prio > p) {
                        best = Some((fid, prio));
                    }
                }
                best.map_or(false, |(_, p)| p > GOOD_ENOUGH_PRIORITY)
            });

            if let Some((dest, _)) = best {
                let requested = self
                    .flags
                    .get(dest)
                    .and_then(Flag::building)
                    .and_then(|b| self.buildings.get_mut(b))
                    .map_or(false, |b| b.add_requested_resource(wanted, true));
                if requested {
                    log::trace!("flag {}: {:?} in slot {} goes to flag {}", id, res, slot, dest);
                    if let Some(f) = self.flags.get_mut(id) {
                        if let Some(s) = f.slot_mut(slot) {
                            s.dest = Some(dest);
                        }
                        f.set_has_resources(true);
                    }
                    return;
                }
            }
        }

        let inventory = FlagSearch::single(&self.flags, id, false, true, |_, flag, _| flag.accepts_resources());
        let Some(f) = self.flags.get_mut(id) else {
            return;
        };
        match inventory {
            Some(dest) if dest != id => {
                if let Some(s) = f.slot_mut(slot) {
                    s.dest = Some(dest);
                }
                f.set_has_resources(true);
            }
            _ => {
                // Nowhere to go, or already home: carry it out and back.
                let staffed = cycle_ccw().find(|&d| f.has_transporter(d));
                match staffed {
                    Some(dir) => {
                        if !f.is_scheduled(dir) {
                            f.schedule(dir, slot);
                        }
                        if let Some(s) = f.slot_mut(slot) {
                            s.dir = Some(dir);
                        }
                    }
                    None => f.set_has_resources(true),
                }
            }
        }
    }

    /// Pick the road a resource with a known destination leaves by. Roads
    /// with idle transporters are tried first, then roads with the fewest
    /// resources already waiting.
    fn schedule_slot_to_known_dest(
        &mut self,
        id: FlagId,
        slot: usize,
        dest: FlagId,
        waiting: &[u8; 4],
    ) -> GameResult<()> {
        let Some(flag) = self.flags.get(id) else {
            return Ok(());
        };

        let mut search = FlagSearch::new();
        search.exclude(id);
        let mut sources = 0;
        let mut remaining: u8 = cycle_ccw()
            .filter(|&d| flag.has_transporter(d))
            .fold(0, |acc, d| acc | d.bit());

        let mut add_band = |search: &mut FlagSearch, remaining: &mut u8, band: u8| {
            for dir in cycle_ccw() {
                if band & dir.bit() == 0 {
                    continue;
                }
                *remaining &= !dir.bit();
                if let Some(other) = flag.other_flag(dir) {
                    if search.add_source(other, dir.index()) {
                        sources += 1;
                    }
                }
            }
        };

        let idle = (waiting[0] ^ 0x3f) & remaining;
        add_band(&mut search, &mut remaining, idle);
        if remaining != 0 {
            for j in 0..3 {
                add_band(&mut search, &mut remaining, waiting[j] ^ waiting[j + 1]);
            }
            if remaining != 0 {
                if waiting[3] == 0 {
                    return Ok(());
                }
                add_band(&mut search, &mut remaining, waiting[3]);
            }
        }

        if sources == 0 {
            if let Some(f) = self.flags.get_mut(id) {
                f.set_has_resources(true);
            }
            return Ok(());
        }

        let found = if dest == id {
            None
        } else {
            search.execute(&self.flags, false, true, |fid, _, _| fid == dest)
        };

        let Some((_, tag)) = found else {
            let res = self.flags.get(id).and_then(|f| f.resource_at_slot(slot));
            if let Some(res) = res {
                log::debug!("flag {}: {:?} cannot reach flag {}", id, res, dest);
                self.cancel_transported_resource(res, Some(dest))?;
            }
            if let Some(f) = self.flags.get_mut(id) {
                if let Some(s) = f.slot_mut(slot) {
                    s.dest = None;
                }
                f.set_has_resources(true);
            }
            return Ok(());
        };

        let Some(dir) = Direction::from_index(tag as i32) else {
            return Ok(());
        };
        let Some(owner) = self.flags.get(id).map(Flag::owner) else {
            return Ok(());
        };
        let prio_of = |res: Option<Resource>| -> u8 {
            res.and_then(|r| self.players.get(usize::from(owner)).map(|p| p.flag_prio_of(r)))
                .unwrap_or(0)
        };
        let Some(f) = self.flags.get(id) else {
            return Ok(());
        };
        let new_prio = prio_of(f.resource_at_slot(slot));
        let replace = match f.scheduled_slot(dir) {
            None => true,
            Some(old) => new_prio > prio_of(f.resource_at_slot(old)),
        };
        if let Some(f) = self.flags.get_mut(id) {
            if replace {
                f.schedule(dir, slot);
            }
            if let Some(s) = f.slot_mut(slot) {
                s.dir = Some(dir);
            }
        }
        Ok(())
    }

    /// Send a transporter from the closest inventory to the road leaving
    /// `id` in `dir`. Returns false when no inventory can supply one.
    fn call_transporter(&mut self, id: FlagId, dir: Direction) -> bool {
        let Some(path) = self.flags.get(id).and_then(|f| f.path(dir)).copied() else {
            return false;
        };
        let FlagPath {
            other, other_dir, water, ..
        } = path;
        let trained = if water { SerfType::Sailor } else { SerfType::Transporter };

        let mut search = FlagSearch::new();
        search.add_source(id, 0);
        search.add_source(other, 1);

        let (buildings, inventories) = (&self.buildings, &self.inventories);
        let mut chosen: Option<(InventoryId, usize)> = None;
        let mut fallback: Option<(InventoryId, usize)> = None;
        search.execute(&self.flags, true, false, |_, flag, tag| {
            if !flag.has_inventory() {
                return false;
            }
            let Some(inv) = flag
                .building()
                .and_then(|b| buildings.get(b))
                .and_then(Building::inventory)
                .and_then(|i| inventories.get(i))
            else {
                return false;
            };
            if inv.has_serf(trained) {
                chosen = Some((inv.index(), tag));
                return true;
            }
            if fallback.is_none()
                && inv.has_serf(SerfType::Generic)
                && (!water || inv.count_of(Resource::Boat) > 0)
            {
                fallback = Some((inv.index(), tag));
            }
            false
        });

        let Some((inventory, tag)) = chosen.or(fallback) else {
            return false;
        };
        let Some((serf, retype)) = self.inventories.get_mut(inventory).and_then(|inv| inv.call_transporter(water)) else {
            return false;
        };
        if retype {
            self.retype_serf(serf, trained);
        }

        if let Some(f) = self.flags.get_mut(id) {
            f.set_serf_requested(dir);
        }
        if let Some(f) = self.flags.get_mut(other) {
            f.set_serf_requested(other_dir);
        }

        let (start, road) = if tag == 1 { (other, other_dir) } else { (id, dir) };
        log::debug!("serf {} leaves {} to carry on road {:?} at flag {}", serf, inventory, road, start);
        if let Some(s) = self.serfs.get_mut(serf) {
            s.go_out_from_inventory(inventory, Some(start), WalkTask::Road(road));
        }
        true
    }

    /// Flag of the inventory closest to `src` over land roads that takes
    /// serfs in.
    pub(crate) fn find_nearest_inventory_for_serf(&self, src: FlagId) -> Option<FlagId> {
        FlagSearch::single(&self.flags, src, true, false, |_, flag, _| {
            flag.has_inventory() && flag.accepts_serfs()
        })
    }

    // ── Serf dispatch ───────────────────────────────────────────────────

    /// Send a serf to the building or flag at `dest`. `None` asks for a
    /// knight, the strongest available. Returns false when no inventory
    /// can supply the serf.
    pub(crate) fn send_serf_to_flag(&mut self, dest: FlagId, ty: Option<SerfType>) -> bool {
        let building = self.flags.get(dest).and_then(Flag::building);
        let owner = self.flags.get(dest).map_or(0, Flag::owner);
        let min_level = match ty {
            None => self
                .players
                .get(usize::from(owner))
                .and_then(|p| p.cycling_knight_rank())
                .unwrap_or(0),
            Some(_) => 0,
        };

        let (buildings, inventories) = (&self.buildings, &self.inventories);
        let mut found: Option<Dispatch> = None;
        let mut equip: Option<InventoryId> = None;
        FlagSearch::single(&self.flags, dest, true, false, |_, flag, _| {
            if !flag.has_inventory() {
                return false;
            }
            let Some(inv) = flag
                .building()
                .and_then(|b| buildings.get(b))
                .and_then(Building::inventory)
                .and_then(|i| inventories.get(i))
            else {
                return false;
            };
            match ty {
                None => {
                    if let Some(level) = (min_level..=4).rev().find(|&l| inv.has_serf(SerfType::knight(l))) {
                        found = Some(Dispatch::Ready(inv.index(), SerfType::knight(level)));
                        return true;
                    }
                    if equip.is_none() && inv.has_serf(SerfType::Generic) && can_equip(inv, SerfType::Knight0) {
                        equip = Some(inv.index());
                    }
                }
                Some(t) => {
                    if inv.has_serf(t) && (t != SerfType::Generic || inv.free_serf_count() > GENERIC_RESERVE) {
                        found = Some(Dispatch::Ready(inv.index(), t));
                        return true;
                    }
                    if equip.is_none() && inv.has_serf(SerfType::Generic) && can_equip(inv, t) {
                        equip = Some(inv.index());
                    }
                }
            }
            false
        });

        let dispatch = found.or(equip.map(Dispatch::Equip));
        let (inventory, serf, sent_type) = match dispatch {
            Some(Dispatch::Ready(inventory, t)) => {
                let Some(serf) = self.inventories.get_mut(inventory).and_then(|inv| inv.call_out_serf_type(t)) else {
                    return false;
                };
                (inventory, serf, t)
            }
            Some(Dispatch::Equip(inventory)) => match self.equip_serf(inventory, ty.unwrap_or(SerfType::Knight0)) {
                Some(serf) => (inventory, serf, ty.unwrap_or(SerfType::Knight0)),
                None => return false,
            },
            None => return false,
        };

        let task = match ty {
            None => {
                if let Some(b) = building.and_then(|b| self.buildings.get_mut(b)) {
                    b.knight_request_granted();
                }
                WalkTask::Enter
            }
            Some(SerfType::Geologist) => WalkTask::Geologist,
            Some(SerfType::Generic) => WalkTask::Enter,
            Some(_) => {
                if let Some(b) = building.and_then(|b| self.buildings.get_mut(b)) {
                    b.set_serf_requested(true);
                }
                WalkTask::Enter
            }
        };
        log::debug!("{} {} sent from {} to flag {}", sent_type, serf, inventory, dest);
        if let Some(s) = self.serfs.get_mut(serf) {
            s.go_out_from_inventory(inventory, Some(dest), task);
        }
        true
    }

    /// Turn the idle generic serf of `inventory` into `target` and call it
    /// out.
    fn equip_serf(&mut self, inventory: InventoryId, target: SerfType) -> Option<SerfId> {
        let serf = self.inventories.get(inventory)?.serf_at(SerfType::Generic)?;
        let ready = match target {
            SerfType::Generic => true,
            SerfType::Knight0 => self.promote_to_knight(serf, inventory),
            t => self.specialize_in(serf, inventory, t),
        };
        if !ready {
            return None;
        }
        let called = self.inventories.get_mut(inventory)?.call_out_serf(serf, target);
        if !called {
            log::warn!("{} could not call out equipped serf {}", inventory, serf);
            return None;
        }
        Some(serf)
    }

    // ── Inventories ─────────────────────────────────────────────────────

    /// Hand stock to the buildings asking for it most, for each resource
    /// in a randomly picked order. Inventories set to push resources out
    /// queue their highest priority stock instead.
    pub(crate) fn update_inventories(&mut self) -> GameResult<()> {
        let order = match self.random_int() & 7 {
            0 => &DISPATCH_ORDER_2,
            1 => &DISPATCH_ORDER_3,
            _ => &DISPATCH_ORDER_1,
        };

        for &res in order {
            for player in 0..self.players.len() {
                self.dispatch_resource(player as u8, res)?;
            }
        }
        Ok(())
    }

    fn dispatch_resource(&mut self, player: u8, res: Resource) -> GameResult<()> {
        let mut sources: Vec<(InventoryId, FlagId)> = Vec::new();
        let mut pushes: Vec<(InventoryId, Resource)> = Vec::new();
        let Some(prio) = self.players.get(usize::from(player)).map(|p| p.inventory_prio) else {
            return Ok(());
        };

        for inv in self.inventories.values() {
            if inv.owner() != player || inv.is_queue_full() {
                continue;
            }
            match inv.res_mode() {
                InventoryMode::In | InventoryMode::Stop => {
                    if inv.can_supply(res) {
                        sources.push((inv.index(), inv.flag()));
                    }
                }
                InventoryMode::Out => {
                    let mut best: Option<(Resource, u8)> = None;
                    for (i, &r) in Resource::ALL.iter().enumerate() {
                        if inv.count_of(r) != 0 && best.map_or(true, |(_, p)| prio[i] >= p) {
                            best = Some((r, prio[i]));
                        }
                    }
                    if let Some((r, _)) = best {
                        pushes.push((inv.index(), r));
                    }
                }
            }
        }

        for (inventory, r) in pushes {
            if let Some(inv) = self.inventories.get_mut(inventory) {
                inv.add_to_queue(r, None)?;
            }
        }
        if sources.is_empty() {
            return Ok(());
        }

        let mut search = FlagSearch::new();
        for (tag, &(_, flag)) in sources.iter().enumerate() {
            search.add_source(flag, tag);
        }
        let buildings = &self.buildings;
        let mut best: Vec<Option<(FlagId, u8)>> = vec![None; sources.len()];
        search.execute(&self.flags, false, true, |fid, flag, tag| {
            let current = best[tag].map_or(0, |(_, p)| p);
            if current == u8::MAX {
                return false;
            }
            let prio = flag
                .building()
                .and_then(|b| buildings.get(b))
                .and_then(|b| b.max_priority_for_resource(res, MIN_REQUEST_PRIORITY));
            if let Some(prio) = prio {
                if prio > current {
                    best[tag] = Some((fid, prio));
                }
            }
            false
        });

        for (tag, target) in best.into_iter().enumerate() {
            let Some((dest, prio)) = target else { continue };
            if prio == 0 {
                continue;
            }
            let requested = self
                .flags
                .get(dest)
                .and_then(Flag::building)
                .and_then(|b| self.buildings.get_mut(b))
                .map_or(false, |b| b.add_requested_resource(res, false));
            if !requested {
                continue;
            }
            let (inventory, _) = sources[tag];
            if let Some(inv) = self.inventories.get_mut(inventory) {
                let queued = inv.add_to_queue(res, Some(dest))?;
                log::trace!("{} sends {:?} to flag {}", inventory, queued, dest);
            }
        }
        Ok(())
    }

    // ── Destinations ────────────────────────────────────────────────────

    /// `flag` stopped being a destination: forget it everywhere.
    pub(crate) fn reset_transport(&mut self, flag: FlagId) {
        for (_, serf) in self.serfs.iter_mut() {
            serf.reset_transport(flag);
        }

        for id in self.flags.ids() {
            let Some(other) = self.flags.get_mut(id) else { continue };
            let dirs = other.reset_transport_to(flag);
            if dirs.is_empty() {
                continue;
            }
            let owner = other.owner();
            let Some(prio) = self.players.get(usize::from(owner)).map(|p| p.flag_prio) else {
                continue;
            };
            if let Some(other) = self.flags.get_mut(id) {
                for dir in dirs {
                    other.prioritize_pickup(dir, &prio);
                }
            }
        }

        for (_, inv) in self.inventories.iter_mut() {
            inv.reset_queue_for_dest(flag);
        }
    }

    /// Set whether an inventory takes resources in, keeps them or pushes
    /// them out.
    pub fn set_inventory_resource_mode(&mut self, inventory: InventoryId, mode: InventoryMode) -> GameResult<()> {
        let inv = self
            .inventories
            .get_mut(inventory)
            .ok_or(crate::error::GameError::NoSuchInventory(inventory))?;
        inv.set_res_mode(mode);
        let flag = inv.flag();
        let accepts = mode == InventoryMode::In;
        if let Some(f) = self.flags.get_mut(flag) {
            f.set_accepts_resources(accepts);
        }
        if !accepts {
            for (_, serf) in self.serfs.iter_mut() {
                serf.clear_destination2(flag);
            }
        }
        Ok(())
    }

    /// Set whether an inventory takes serfs in, keeps them or sends them
    /// out.
    pub fn set_inventory_serf_mode(&mut self, inventory: InventoryId, mode: InventoryMode) -> GameResult<()> {
        let inv = self
            .inventories
            .get_mut(inventory)
            .ok_or(crate::error::GameError::NoSuchInventory(inventory))?;
        inv.set_serf_mode(mode);
        let flag = inv.flag();
        let accepts = mode == InventoryMode::In;
        if let Some(f) = self.flags.get_mut(flag) {
            f.set_accepts_serfs(accepts);
        }
        if !accepts {
            for (_, serf) in self.serfs.iter_mut() {
                serf.clear_destination(flag);
            }
        }
        Ok(())
    }
}

/// The inventory holds the tools or weapons `target` needs.
fn can_equip(inv: &Inventory, target: SerfType) -> bool {
    target.tools_needed().iter().all(|&t| inv.count_of(t) > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::game_with_castle;
    use crate::map::MapPos;
    use crate::serf::SerfState;

    fn castle_flag(game: &Game) -> FlagId {
        game.player(0).and_then(|p| p.castle_flag()).expect("castle flag")
    }

    /// A flag a few steps right of the castle flag, joined by a road.
    fn connected_flag(game: &mut Game) -> (FlagId, MapPos) {
        let start = game.flag(castle_flag(game)).map(Flag::pos).expect("flag");
        let end = game.map.move_right(game.map.move_right(start));
        game.build_flag(end, 0).expect("flag fits");
        game.build_road(start, &[Direction::Right, Direction::Right], 0)
            .expect("road fits");
        (game.flag_at(end).expect("new flag"), end)
    }

    #[test]
    fn test_routable_resources() {
        assert!(is_routable(Resource::Plank));
        assert!(is_routable(Resource::GoldBar));
        assert!(!is_routable(Resource::Boat));
        assert!(!is_routable(Resource::Pick));
        assert!(!is_routable(Resource::Sword));
    }

    #[test]
    fn test_new_road_calls_transporter() {
        let (mut game, _) = game_with_castle();
        let (far, _) = connected_flag(&mut game);
        game.update_flag(far).expect("update");
        let castle = castle_flag(&game);
        let requested = game.flag(far).map_or(false, |f| f.serf_requested(Direction::Left))
            || game.flag(castle).map_or(false, |f| f.serf_requested(Direction::Right));
        assert!(requested);
        let leaving = game.serfs().any(|(_, s)| {
            matches!(
                s.state(),
                SerfState::ReadyToLeaveInventory {
                    exit: crate::serf::Exit::Walking { task: WalkTask::Road(_), .. },
                    ..
                }
            )
        });
        assert!(leaving);
    }

    #[test]
    fn test_unrouted_resource_goes_to_inventory() {
        let (mut game, _) = game_with_castle();
        let (far, _) = connected_flag(&mut game);
        let castle = castle_flag(&game);
        for dir in [Direction::Left] {
            if let Some(f) = game.flags.get_mut(far) {
                f.set_has_transporter(dir, true);
            }
        }
        if let Some(f) = game.flags.get_mut(castle) {
            f.set_has_transporter(Direction::Right, true);
        }
        if let Some(f) = game.flags.get_mut(far) {
            assert!(f.drop_resource(Resource::Sword, None));
        }
        game.schedule_slot_to_unknown_dest(far, 0);
        assert_eq!(game.flag(far).and_then(|f| f.slot(0)).and_then(|s| s.dest), Some(castle));
    }

    #[test]
    fn test_send_serf_to_flag_specializes_generic() {
        let (mut game, _) = game_with_castle();
        let castle = castle_flag(&game);
        let inv = game.player(0).and_then(|p| p.castle_inventory()).expect("inventory");
        let before = game.player(0).map_or(0, |p| p.serf_count(SerfType::Butcher));
        if let Some(i) = game.inventories.get_mut(inv) {
            i.set_count(Resource::Cleaver, 1);
        }
        assert!(game.send_serf_to_flag(castle, Some(SerfType::Butcher)));
        assert_eq!(game.player(0).map_or(0, |p| p.serf_count(SerfType::Butcher)), before + 1);
        assert_eq!(game.inventory(inv).map(|i| i.count_of(Resource::Cleaver)), Some(0));
    }

    #[test]
    fn test_send_serf_fails_without_tools() {
        let (mut game, _) = game_with_castle();
        let castle = castle_flag(&game);
        let inv = game.player(0).and_then(|p| p.castle_inventory()).expect("inventory");
        if let Some(i) = game.inventories.get_mut(inv) {
            i.set_count(Resource::Cleaver, 0);
        }
        assert!(!game.send_serf_to_flag(castle, Some(SerfType::Butcher)));
    }

    #[test]
    fn test_send_knight_takes_strongest() {
        let (mut game, _) = game_with_castle();
        let castle = castle_flag(&game);
        let inv = game.player(0).and_then(|p| p.castle_inventory()).expect("inventory");
        let weak = game.inventory(inv).and_then(|i| i.serf_at(SerfType::Knight0));
        if let Some(id) = weak {
            game.retype_serf(id, SerfType::Knight3);
            if let Some(i) = game.inventories.get_mut(inv) {
                i.clear_serf_slot(id, SerfType::Knight0);
                i.serf_idle_in_stock(id, SerfType::Knight3);
            }
        }
        assert!(game.send_serf_to_flag(castle, None));
        let sent = game.serfs().find(|(_, s)| matches!(s.state(), SerfState::ReadyToLeaveInventory { .. }));
        assert_eq!(sent.map(|(_, s)| s.serf_type()), Some(SerfType::Knight3));
    }

    #[test]
    fn test_out_mode_closes_flag() {
        let (mut game, _) = game_with_castle();
        let inv = game.player(0).and_then(|p| p.castle_inventory()).expect("inventory");
        let flag = castle_flag(&game);
        game.set_inventory_resource_mode(inv, InventoryMode::Out).expect("mode");
        assert!(!game.flag(flag).map_or(true, Flag::accepts_resources));
        game.set_inventory_resource_mode(inv, InventoryMode::In).expect("mode");
        assert!(game.flag(flag).map_or(false, Flag::accepts_resources));
        game.set_inventory_serf_mode(inv, InventoryMode::Stop).expect("mode");
        assert!(!game.flag(flag).map_or(true, Flag::accepts_serfs));
    }

    #[test]
    fn test_out_mode_queues_top_priority_stock() {
        let (mut game, _) = game_with_castle();
        let inv = game.player(0).and_then(|p| p.castle_inventory()).expect("inventory");
        game.set_inventory_resource_mode(inv, InventoryMode::Out).expect("mode");
        let gold = game.inventory(inv).map_or(0, |i| i.count_of(Resource::GoldBar));
        game.dispatch_resource(0, Resource::Plank).expect("dispatch");
        let head = game.inventory(inv).and_then(|i| i.queue()[0]);
        if gold > 0 {
            assert_eq!(head.map(|q| q.res), Some(Resource::GoldBar));
            assert_eq!(head.and_then(|q| q.dest), None);
        }
    }
}
