//! Inventories: the stockpile and serf pool of a stock or castle.
//!
//! An inventory keeps resource counts, a two-entry queue of resources
//! waiting to be carried out to its flag and, per serf type, the one idle
//! serf that will be called out next. Changing a serf's type touches the
//! owning player's statistics, so the methods here only report which serf
//! should change and leave the change itself to `Game`.

use serde::{Deserialize, Serialize};

use crate::collection::{BuildingId, FlagId, InventoryId, SerfId};
use crate::error::{GameError, GameResult};
use crate::resource::{Resource, ResourceTable, RESOURCE_COUNT};
use crate::serf::{SerfType, SERF_TYPE_COUNT};

/// Per-resource count cap.
pub const MAX_STOCK: u32 = 50000;

/// Flow setting for resources or serfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InventoryMode {
    /// Accept incoming.
    #[default]
    In,
    /// Refuse incoming.
    Stop,
    /// Refuse incoming and push stock out to other inventories.
    Out,
}

/// A resource leaving through the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedResource {
    pub res: Resource,
    pub dest: Option<FlagId>,
}

/// Resource counts for the supply dial breakpoints 0, 10, 20, 30 and 40.
const SUPPLY_TEMPLATES: [[u32; RESOURCE_COUNT]; 5] = [
    [0, 0, 0, 0, 0, 0, 0, 7, 0, 2, 0, 0, 0, 0, 0, 1, 6, 1, 0, 0, 1, 2, 3, 0, 10, 10],
    [2, 1, 1, 3, 2, 1, 0, 25, 1, 8, 4, 3, 8, 2, 1, 3, 12, 2, 1, 1, 2, 3, 4, 1, 30, 30],
    [3, 2, 2, 10, 3, 1, 0, 40, 2, 20, 12, 8, 20, 4, 2, 5, 20, 3, 1, 2, 3, 4, 6, 2, 60, 60],
    [8, 4, 6, 20, 7, 5, 3, 80, 5, 40, 20, 40, 50, 8, 4, 10, 30, 5, 2, 4, 6, 6, 12, 4, 100, 100],
    [
        30, 10, 30, 50, 10, 30, 10, 200, 10, 100, 30, 150, 100, 10, 5, 20, 50, 10, 5, 10, 20, 20,
        50, 10, 200, 200,
    ],
];

/// Starting stock for a supply dial value.
///
/// The dial picks two neighbouring templates and the count is interpolated
/// in 16.16 fixed point, rounding up when the fraction reaches one half.
pub fn supplies_preset(supplies: u32) -> ResourceTable {
    let (lower, upper, s) = match supplies {
        s if s < 10 => (0, 1, s),
        s if s < 20 => (1, 2, s - 10),
        s if s < 30 => (2, 3, s - 20),
        s if s < 40 => (3, 4, s - 30),
        s => (4, 4, s - 40),
    };
    let mut table = [0u32; RESOURCE_COUNT];
    for (i, count) in table.iter_mut().enumerate() {
        let t1 = i64::from(SUPPLY_TEMPLATES[lower][i]);
        let t2 = i64::from(SUPPLY_TEMPLATES[upper][i]);
        let n = (t2 - t1) * (i64::from(s) * 6554);
        let base = if n >= 0x8000 { t1 + 1 } else { t1 };
        *count = (base + (n >> 16)).max(0) as u32;
    }
    table
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    index: InventoryId,
    owner: u8,
    res_mode: InventoryMode,
    serf_mode: InventoryMode,
    flag: FlagId,
    building: BuildingId,
    resources: ResourceTable,
    out_queue: [Option<QueuedResource>; 2],
    /// Idle serf ready to be called out, per type.
    serfs: [Option<SerfId>; SERF_TYPE_COUNT],
    generic_count: u32,
    serfs_out: u32,
}

impl Inventory {
    pub fn new(index: InventoryId, owner: u8, flag: FlagId, building: BuildingId) -> Self {
        Self {
            index,
            owner,
            res_mode: InventoryMode::In,
            serf_mode: InventoryMode::In,
            flag,
            building,
            resources: [0; RESOURCE_COUNT],
            out_queue: [None; 2],
            serfs: [None; SERF_TYPE_COUNT],
            generic_count: 0,
            serfs_out: 0,
        }
    }

    pub fn index(&self) -> InventoryId {
        self.index
    }

    pub fn owner(&self) -> u8 {
        self.owner
    }

    pub fn flag(&self) -> FlagId {
        self.flag
    }

    pub fn building(&self) -> BuildingId {
        self.building
    }

    pub fn res_mode(&self) -> InventoryMode {
        self.res_mode
    }

    pub fn set_res_mode(&mut self, mode: InventoryMode) {
        self.res_mode = mode;
    }

    pub fn serf_mode(&self) -> InventoryMode {
        self.serf_mode
    }

    pub fn set_serf_mode(&mut self, mode: InventoryMode) {
        self.serf_mode = mode;
    }

    pub fn have_any_out_mode(&self) -> bool {
        self.res_mode == InventoryMode::Out || self.serf_mode == InventoryMode::Out
    }

    // ── Resources ───────────────────────────────────────────────────────

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn count_of(&self, res: Resource) -> u32 {
        res.index().map_or(0, |i| self.resources[i])
    }

    pub fn set_count(&mut self, res: Resource, count: u32) {
        if let Some(i) = res.index() {
            self.resources[i] = count.min(MAX_STOCK);
        }
    }

    pub fn push_resource(&mut self, res: Resource) {
        if let Some(i) = res.index() {
            if self.resources[i] < MAX_STOCK {
                self.resources[i] += 1;
            }
        }
    }

    /// Take one unit out of stock. Returns false if there was none.
    pub fn pop_resource(&mut self, res: Resource) -> bool {
        match res.index() {
            Some(i) if self.resources[i] > 0 => {
                self.resources[i] -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn has_food(&self) -> bool {
        self.count_of(Resource::Fish) != 0
            || self.count_of(Resource::Meat) != 0
            || self.count_of(Resource::Bread) != 0
    }

    /// Whether the inventory can supply `res`, food group included.
    pub fn can_supply(&self, res: Resource) -> bool {
        match res {
            Resource::GroupFood => self.has_food(),
            r => self.count_of(r) != 0,
        }
    }

    pub fn apply_supplies_preset(&mut self, supplies: u32) {
        self.resources = supplies_preset(supplies);
    }

    // ── Out queue ───────────────────────────────────────────────────────

    pub fn is_queue_full(&self) -> bool {
        self.out_queue[1].is_some()
    }

    pub fn has_queued(&self) -> bool {
        self.out_queue[0].is_some()
    }

    pub fn queue(&self) -> &[Option<QueuedResource>; 2] {
        &self.out_queue
    }

    pub fn get_resource_from_queue(&mut self) -> Option<QueuedResource> {
        let head = self.out_queue[0].take();
        self.out_queue[0] = self.out_queue[1].take();
        head
    }

    /// Pick food group members by what is most plentiful.
    fn resolve_food(&self) -> Resource {
        let meat = self.count_of(Resource::Meat);
        let bread = self.count_of(Resource::Bread);
        let fish = self.count_of(Resource::Fish);
        if meat > bread {
            if meat > fish {
                Resource::Meat
            } else {
                Resource::Fish
            }
        } else if bread > fish {
            Resource::Bread
        } else {
            Resource::Fish
        }
    }

    /// Move one unit from stock to the out queue. Returns the concrete
    /// resource queued.
    pub fn add_to_queue(&mut self, res: Resource, dest: Option<FlagId>) -> GameResult<Resource> {
        let res = if res == Resource::GroupFood {
            self.resolve_food()
        } else {
            res
        };
        if !self.pop_resource(res) {
            return Err(GameError::EmptyQueueResource {
                inventory: self.index,
                resource: res,
            });
        }
        let entry = Some(QueuedResource { res, dest });
        if self.out_queue[0].is_none() {
            self.out_queue[0] = entry;
        } else {
            self.out_queue[1] = entry;
        }
        Ok(res)
    }

    /// Return queued resources headed for `dest` to stock.
    pub fn reset_queue_for_dest(&mut self, dest: FlagId) {
        if let Some(q) = self.out_queue[1] {
            if q.dest == Some(dest) {
                self.push_resource(q.res);
                self.out_queue[1] = None;
            }
        }
        if let Some(q) = self.out_queue[0] {
            if q.dest == Some(dest) {
                self.push_resource(q.res);
                self.out_queue[0] = self.out_queue[1].take();
            }
        }
    }

    /// Empty the out queue, returning what was in it.
    pub fn take_queue(&mut self) -> Vec<QueuedResource> {
        self.out_queue.iter_mut().filter_map(Option::take).collect()
    }

    // ── Serfs ───────────────────────────────────────────────────────────

    pub fn free_serf_count(&self) -> u32 {
        self.generic_count
    }

    pub fn serfs_out(&self) -> u32 {
        self.serfs_out
    }

    /// A serf that was called out has left the building.
    pub fn serf_away(&mut self) {
        self.serfs_out = self.serfs_out.saturating_sub(1);
    }

    pub fn serf_at(&self, ty: SerfType) -> Option<SerfId> {
        self.serfs.get(ty.index()).copied().flatten()
    }

    pub fn has_serf(&self, ty: SerfType) -> bool {
        self.serf_at(ty).is_some()
    }

    /// A serf of `ty` has settled in stock.
    pub fn serf_idle_in_stock(&mut self, serf: SerfId, ty: SerfType) {
        if let Some(slot) = self.serfs.get_mut(ty.index()) {
            *slot = Some(serf);
        }
    }

    /// Forget `serf` as the idle serf of its type.
    pub fn clear_serf_slot(&mut self, serf: SerfId, ty: SerfType) {
        if let Some(slot) = self.serfs.get_mut(ty.index()) {
            if *slot == Some(serf) {
                *slot = None;
            }
        }
    }

    /// A new generic serf was created here.
    pub fn add_generic(&mut self, serf: SerfId) {
        self.generic_count += 1;
        let slot = &mut self.serfs[SerfType::Generic.index()];
        if slot.is_none() {
            *slot = Some(serf);
        }
    }

    /// Release the idle serf of `ty` for leaving the building.
    pub fn call_out_serf_type(&mut self, ty: SerfType) -> Option<SerfId> {
        let serf = self.serf_at(ty)?;
        self.call_out_serf(serf, ty).then_some(serf)
    }

    /// Release a specific serf for leaving the building.
    pub fn call_out_serf(&mut self, serf: SerfId, ty: SerfType) -> bool {
        if self.serf_at(ty) != Some(serf) {
            return false;
        }
        self.serfs[ty.index()] = None;
        if ty == SerfType::Generic {
            self.generic_count = self.generic_count.saturating_sub(1);
        }
        self.serfs_out += 1;
        true
    }

    /// Take the idle serf of `ty` for use inside the building.
    pub fn call_internal(&mut self, ty: SerfType) -> Option<SerfId> {
        self.serfs.get_mut(ty.index()).and_then(Option::take)
    }

    /// Pick the serf to staff a road. A generic serf is used when no
    /// trained one is idle; the second value tells whether it must be
    /// retyped as a sailor or transporter.
    pub fn call_transporter(&mut self, water: bool) -> Option<(SerfId, bool)> {
        let trained = if water {
            SerfType::Sailor
        } else {
            SerfType::Transporter
        };
        let picked = if let Some(serf) = self.call_internal(trained) {
            (serf, false)
        } else {
            let generic = self.serf_at(SerfType::Generic)?;
            if water && !self.pop_resource(Resource::Boat) {
                return None;
            }
            self.serfs[SerfType::Generic.index()] = None;
            self.generic_count = self.generic_count.saturating_sub(1);
            (generic, true)
        };
        self.serfs_out += 1;
        Some(picked)
    }

    /// Equip a generic serf as a knight.
    pub fn promote_serf_to_knight(&mut self, serf: SerfId, ty: SerfType) -> bool {
        if ty != SerfType::Generic
            || self.count_of(Resource::Sword) == 0
            || self.count_of(Resource::Shield) == 0
        {
            return false;
        }
        self.pop_resource(Resource::Sword);
        self.pop_resource(Resource::Shield);
        self.generic_count = self.generic_count.saturating_sub(1);
        self.clear_serf_slot(serf, SerfType::Generic);
        true
    }

    /// Turn a generic serf into `target`, consuming its tools. The caller
    /// retypes the serf when this returns true.
    pub fn specialize_serf(&mut self, serf: SerfId, ty: SerfType, target: SerfType) -> bool {
        if ty != SerfType::Generic {
            return false;
        }
        let tools = target.tools_needed();
        if tools.iter().any(|&t| self.count_of(t) == 0) {
            return false;
        }
        self.clear_serf_slot(serf, SerfType::Generic);
        self.generic_count = self.generic_count.saturating_sub(1);
        for &t in tools {
            self.pop_resource(t);
        }
        let slot = &mut self.serfs[target.index()];
        if slot.is_none() {
            *slot = Some(serf);
        }
        true
    }

    /// Specialize the idle generic serf, if any.
    pub fn specialize_free_serf(&mut self, target: SerfType) -> Option<SerfId> {
        let serf = self.serf_at(SerfType::Generic)?;
        self.specialize_serf(serf, SerfType::Generic, target)
            .then_some(serf)
    }

    /// How many serfs of `ty` could be made from generics and tools.
    pub fn serf_potential_count(&self, ty: SerfType) -> u32 {
        ty.tools_needed()
            .iter()
            .map(|&t| self.count_of(t))
            .fold(self.generic_count, u32::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        Inventory::new(
            InventoryId::new(1).expect("id"),
            0,
            FlagId::new(1).expect("id"),
            BuildingId::new(1).expect("id"),
        )
    }

    fn serf(i: u32) -> SerfId {
        SerfId::new(i).expect("id")
    }

    #[test]
    fn test_supplies_preset_interpolates() {
        let table = supplies_preset(15);
        // Planks: 25 at tier 1, 40 at tier 2; 15*6554*5 = 491550 → 7 + carry.
        let n = (40 - 25) * (5 * 6554);
        let expected = 25 + (n >> 16) + if n >= 0x8000 { 1 } else { 0 };
        assert_eq!(table[Resource::Plank as usize], expected as u32);
        // Lumber is 0 in both tiers.
        assert_eq!(table[Resource::Lumber as usize], 0);
        for (i, &count) in table.iter().enumerate() {
            assert!(count >= SUPPLY_TEMPLATES[1][i]);
            assert!(count <= SUPPLY_TEMPLATES[2][i] + 1);
        }
    }

    #[test]
    fn test_supplies_preset_breakpoints() {
        assert_eq!(supplies_preset(0), SUPPLY_TEMPLATES[0]);
        assert_eq!(supplies_preset(40), SUPPLY_TEMPLATES[4]);
        assert_eq!(supplies_preset(50), SUPPLY_TEMPLATES[4]);
    }

    #[test]
    fn test_food_group_prefers_most_plentiful() {
        let mut inv = inventory();
        inv.set_count(Resource::Fish, 2);
        inv.set_count(Resource::Meat, 5);
        inv.set_count(Resource::Bread, 3);
        assert_eq!(inv.add_to_queue(Resource::GroupFood, None), Ok(Resource::Meat));
        inv.set_count(Resource::Meat, 0);
        assert_eq!(inv.add_to_queue(Resource::GroupFood, None), Ok(Resource::Bread));
        assert!(inv.is_queue_full());
    }

    #[test]
    fn test_queue_shifts_and_errors_on_empty_stock() {
        let mut inv = inventory();
        inv.set_count(Resource::Coal, 1);
        let dest = FlagId::new(4);
        assert!(inv.add_to_queue(Resource::Coal, dest).is_ok());
        assert!(inv.add_to_queue(Resource::Coal, dest).is_err());
        let head = inv.get_resource_from_queue();
        assert_eq!(head, Some(QueuedResource { res: Resource::Coal, dest }));
        assert!(!inv.has_queued());
    }

    #[test]
    fn test_reset_queue_returns_stock() {
        let mut inv = inventory();
        inv.set_count(Resource::Stone, 2);
        let a = FlagId::new(5).expect("id");
        let b = FlagId::new(6).expect("id");
        inv.add_to_queue(Resource::Stone, Some(a)).expect("queued");
        inv.add_to_queue(Resource::Stone, Some(b)).expect("queued");
        inv.reset_queue_for_dest(a);
        assert_eq!(inv.count_of(Resource::Stone), 1);
        assert_eq!(inv.queue()[0].map(|q| q.dest), Some(Some(b)));
        assert_eq!(inv.queue()[1], None);
    }

    #[test]
    fn test_specialize_consumes_tools() {
        let mut inv = inventory();
        inv.add_generic(serf(3));
        inv.add_generic(serf(4));
        assert_eq!(inv.free_serf_count(), 2);
        assert_eq!(inv.specialize_free_serf(SerfType::Toolmaker), None);
        inv.set_count(Resource::Hammer, 1);
        inv.set_count(Resource::Saw, 1);
        assert_eq!(inv.serf_potential_count(SerfType::Toolmaker), 1);
        assert_eq!(inv.specialize_free_serf(SerfType::Toolmaker), Some(serf(3)));
        assert_eq!(inv.free_serf_count(), 1);
        assert_eq!(inv.count_of(Resource::Hammer), 0);
        assert_eq!(inv.serf_at(SerfType::Toolmaker), Some(serf(3)));
    }

    #[test]
    fn test_water_transporter_needs_boat() {
        let mut inv = inventory();
        inv.add_generic(serf(2));
        assert_eq!(inv.call_transporter(true), None);
        inv.set_count(Resource::Boat, 1);
        assert_eq!(inv.call_transporter(true), Some((serf(2), true)));
        assert_eq!(inv.count_of(Resource::Boat), 0);
        assert_eq!(inv.serfs_out(), 1);
    }
}
