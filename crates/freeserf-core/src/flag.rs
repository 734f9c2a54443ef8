//! Flags: the nodes of the road graph.
//!
//! A flag holds up to eight resources waiting for a carrier and one road
//! link per direction. Each link tracks its length class, the transporters
//! serving it and which waiting slot the next transporter should pick up.
//! Operations that need buildings, inventories or serfs (scheduling,
//! calling transporters, splitting and merging roads) live on `Game`;
//! this module keeps the flag-local bookkeeping and the breadth-first
//! `FlagSearch` over the road graph.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::collection::{BuildingId, Collection, EntityId, FlagId};
use crate::map::{cycle_ccw, cycle_cw, Direction, MapPos};
use crate::resource::{Resource, RESOURCE_COUNT};

/// Resource slots at a flag.
pub const FLAG_MAX_RES_COUNT: usize = 8;

/// Transporters allowed on a road, by length class.
pub const MAX_TRANSPORTERS: [u8; 8] = [1, 2, 3, 4, 6, 8, 11, 15];

/// Queue bound for one flag search.
const SEARCH_MAX_DEPTH: usize = 0x10000;

/// Length class of a road of `length` segments.
pub fn road_length_value(length: usize) -> u8 {
    match length {
        l if l >= 24 => 7,
        l if l >= 18 => 6,
        l if l >= 13 => 5,
        l if l >= 10 => 4,
        l if l >= 7 => 3,
        l if l >= 6 => 2,
        l if l >= 4 => 1,
        _ => 0,
    }
}

/// A resource waiting at a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceSlot {
    pub res: Option<Resource>,
    /// Road the resource will leave by, once scheduled.
    pub dir: Option<Direction>,
    /// Flag of the destination building or inventory.
    pub dest: Option<FlagId>,
}

/// One road leaving a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagPath {
    /// Flag at the far end.
    pub other: FlagId,
    /// Direction the road leaves the far flag in.
    pub other_dir: Direction,
    pub water: bool,
    /// Length class 0..=7.
    pub length: u8,
    /// A transporter has been called out for this road.
    pub serf_requested: bool,
    /// Transporters assigned to the road and not yet released.
    pub free_transporters: u8,
    /// The road is staffed and may be used for routing resources.
    pub has_transporter: bool,
    /// Slot the next transporter in this direction picks up.
    pub scheduled: Option<usize>,
}

impl FlagPath {
    pub fn new(other: FlagId, other_dir: Direction, water: bool, length: u8) -> Self {
        Self {
            other,
            other_dir,
            water,
            length,
            serf_requested: false,
            free_transporters: 0,
            has_transporter: false,
            scheduled: None,
        }
    }

    /// Maximum number of transporters this road should carry.
    pub fn max_transporters(&self) -> u8 {
        MAX_TRANSPORTERS[usize::from(self.length.min(7))]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pos: MapPos,
    owner: u8,
    paths: [Option<FlagPath>; 6],
    building: Option<BuildingId>,
    slots: [ResourceSlot; FLAG_MAX_RES_COUNT],
    /// Some slot needs (re)scheduling.
    has_resources: bool,
    serf_request_failed: bool,
    accepts_serfs: bool,
    accepts_resources: bool,
    has_inventory: bool,
}

impl Flag {
    pub fn new(owner: u8, pos: MapPos) -> Self {
        Self {
            pos,
            owner,
            paths: [None; 6],
            building: None,
            slots: [ResourceSlot::default(); FLAG_MAX_RES_COUNT],
            has_resources: false,
            serf_request_failed: false,
            accepts_serfs: false,
            accepts_resources: false,
            has_inventory: false,
        }
    }

    pub fn pos(&self) -> MapPos {
        self.pos
    }

    pub fn owner(&self) -> u8 {
        self.owner
    }

    pub fn set_owner(&mut self, owner: u8) {
        self.owner = owner;
    }

    // ── Roads ───────────────────────────────────────────────────────────

    pub fn has_path(&self, dir: Direction) -> bool {
        self.paths[dir.index()].is_some()
    }

    pub fn path(&self, dir: Direction) -> Option<&FlagPath> {
        self.paths[dir.index()].as_ref()
    }

    pub fn path_mut(&mut self, dir: Direction) -> Option<&mut FlagPath> {
        self.paths[dir.index()].as_mut()
    }

    /// Directions with a road, clockwise from `Right`.
    pub fn path_dirs(&self) -> impl Iterator<Item = Direction> + '_ {
        cycle_cw(Direction::Right, 6).filter(move |&d| self.has_path(d))
    }

    pub fn is_water_path(&self, dir: Direction) -> bool {
        self.path(dir).map_or(false, |p| p.water)
    }

    /// Bit mask of the roads that are not water roads.
    pub fn land_paths(&self) -> u8 {
        self.path_dirs()
            .filter(|&d| !self.is_water_path(d))
            .fold(0, |mask, d| mask | d.bit())
    }

    pub fn other_flag(&self, dir: Direction) -> Option<FlagId> {
        self.path(dir).map(|p| p.other)
    }

    pub fn other_end_dir(&self, dir: Direction) -> Option<Direction> {
        self.path(dir).map(|p| p.other_dir)
    }

    /// Attach a road. An existing link in that direction is replaced and
    /// starts out unstaffed.
    pub fn link_path(&mut self, dir: Direction, path: FlagPath) {
        self.paths[dir.index()] = Some(FlagPath {
            has_transporter: false,
            ..path
        });
    }

    /// Detach a road. Returns the removed link; slots routed along it are
    /// marked for rescheduling.
    pub fn del_path(&mut self, dir: Direction) -> Option<FlagPath> {
        let removed = self.paths[dir.index()].take();
        self.invalidate_resource_path(dir);
        removed
    }

    pub fn length_category(&self, dir: Direction) -> u8 {
        self.path(dir).map_or(0, |p| p.length)
    }

    pub fn has_transporter(&self, dir: Direction) -> bool {
        self.path(dir).map_or(false, |p| p.has_transporter)
    }

    pub fn set_has_transporter(&mut self, dir: Direction, value: bool) {
        if let Some(p) = self.path_mut(dir) {
            p.has_transporter = value;
        }
    }

    /// Number of staffed roads.
    pub fn transporters(&self) -> usize {
        self.paths.iter().flatten().filter(|p| p.has_transporter).count()
    }

    pub fn serf_requested(&self, dir: Direction) -> bool {
        self.path(dir).map_or(false, |p| p.serf_requested)
    }

    pub fn set_serf_requested(&mut self, dir: Direction) {
        if let Some(p) = self.path_mut(dir) {
            p.serf_requested = true;
        }
    }

    pub fn cancel_serf_request(&mut self, dir: Direction) {
        if let Some(p) = self.path_mut(dir) {
            p.serf_requested = false;
        }
    }

    /// The called transporter reached its road.
    pub fn complete_serf_request(&mut self, dir: Direction) {
        if let Some(p) = self.path_mut(dir) {
            p.serf_requested = false;
            p.free_transporters = p.free_transporters.saturating_add(1);
        }
    }

    pub fn free_transporter_count(&self, dir: Direction) -> u8 {
        self.path(dir).map_or(0, |p| p.free_transporters)
    }

    /// A surplus transporter leaves its road.
    pub fn transporter_to_serve(&mut self, dir: Direction) {
        if let Some(p) = self.path_mut(dir) {
            p.free_transporters = p.free_transporters.saturating_sub(1);
        }
    }

    pub fn serf_request_fail(&self) -> bool {
        self.serf_request_failed
    }

    pub fn set_serf_request_failed(&mut self) {
        self.serf_request_failed = true;
    }

    pub fn serf_request_clear(&mut self) {
        self.serf_request_failed = false;
    }

    pub fn is_scheduled(&self, dir: Direction) -> bool {
        self.scheduled_slot(dir).is_some()
    }

    pub fn scheduled_slot(&self, dir: Direction) -> Option<usize> {
        self.path(dir).and_then(|p| p.scheduled)
    }

    pub fn schedule(&mut self, dir: Direction, slot: usize) {
        if let Some(p) = self.path_mut(dir) {
            p.scheduled = Some(slot);
        }
    }

    /// A flag can be removed when it joins exactly two land roads that do
    /// not lead to the same flag.
    pub fn can_demolish(&self) -> bool {
        let mut connected = 0;
        let mut other_end = None;
        for dir in cycle_cw(Direction::Right, 6) {
            let Some(p) = self.path(dir) else { continue };
            if p.water {
                return false;
            }
            connected += 1;
            match other_end {
                Some(o) if o == p.other => return false,
                Some(_) => {}
                None => other_end = Some(p.other),
            }
        }
        connected == 2
    }

    pub fn is_connected(&self) -> bool {
        self.paths.iter().any(Option::is_some)
    }

    // ── Building link ───────────────────────────────────────────────────

    pub fn building(&self) -> Option<BuildingId> {
        self.building
    }

    pub fn has_building(&self) -> bool {
        self.building.is_some()
    }

    pub fn link_building(&mut self, building: BuildingId) {
        self.building = Some(building);
    }

    pub fn unlink_building(&mut self) {
        self.building = None;
        self.clear_flags();
    }

    pub fn accepts_serfs(&self) -> bool {
        self.accepts_serfs
    }

    pub fn set_accepts_serfs(&mut self, value: bool) {
        self.accepts_serfs = value;
    }

    pub fn accepts_resources(&self) -> bool {
        self.accepts_resources
    }

    pub fn set_accepts_resources(&mut self, value: bool) {
        self.accepts_resources = value;
    }

    pub fn has_inventory(&self) -> bool {
        self.has_inventory
    }

    pub fn set_has_inventory(&mut self) {
        self.has_inventory = true;
    }

    pub fn clear_flags(&mut self) {
        self.accepts_serfs = false;
        self.accepts_resources = false;
        self.has_inventory = false;
    }

    // ── Resource slots ──────────────────────────────────────────────────

    pub fn slots(&self) -> &[ResourceSlot; FLAG_MAX_RES_COUNT] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&ResourceSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut ResourceSlot> {
        self.slots.get_mut(index)
    }

    pub fn resource_at_slot(&self, index: usize) -> Option<Resource> {
        self.slots.get(index).and_then(|s| s.res)
    }

    pub fn has_resources(&self) -> bool {
        self.has_resources
    }

    pub fn set_has_resources(&mut self, value: bool) {
        self.has_resources = value;
    }

    pub fn has_empty_slot(&self) -> bool {
        self.slots.iter().any(|s| s.res.is_none())
    }

    pub fn waiting_count(&self) -> usize {
        self.slots.iter().filter(|s| s.res.is_some()).count()
    }

    /// Put a resource in the first free slot.
    pub fn drop_resource(&mut self, res: Resource, dest: Option<FlagId>) -> bool {
        match self.slots.iter_mut().find(|s| s.res.is_none()) {
            Some(slot) => {
                *slot = ResourceSlot {
                    res: Some(res),
                    dir: None,
                    dest,
                };
                self.has_resources = true;
                true
            }
            None => false,
        }
    }

    /// Take the resource out of a slot.
    pub fn pick_up_resource(&mut self, index: usize) -> Option<(Resource, Option<FlagId>)> {
        let slot = self.slots.get_mut(index)?;
        let res = slot.res.take()?;
        let dest = slot.dest;
        slot.dir = None;
        self.fix_scheduled();
        Some((res, dest))
    }

    fn fix_scheduled(&mut self) {
        self.has_resources = self.slots.iter().any(|s| s.res.is_some());
    }

    /// Empty every slot, returning what was there.
    pub fn take_all_resources(&mut self) -> Vec<(Resource, Option<FlagId>)> {
        let mut out = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(res) = slot.res.take() {
                out.push((res, slot.dest));
                *slot = ResourceSlot::default();
            }
        }
        self.has_resources = false;
        out
    }

    /// Forget the destinations of every waiting resource, returning the
    /// resources and the destinations they were headed for.
    pub fn clear_destinations(&mut self) -> Vec<(Resource, Option<FlagId>)> {
        let mut out = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(res) = slot.res {
                out.push((res, slot.dest.take()));
            }
        }
        out
    }

    /// Bitmasks of directions with strictly more than 0, 1, 2 and 3
    /// scheduled resources waiting.
    pub fn res_waiting(&self) -> [u8; 4] {
        let mut waiting = [0u8; 4];
        for slot in self.slots.iter() {
            if let (Some(_), Some(dir)) = (slot.res, slot.dir) {
                if let Some(level) = waiting.iter_mut().find(|w| **w & dir.bit() == 0) {
                    *level |= dir.bit();
                }
            }
        }
        waiting
    }

    /// Choose which waiting resource the next transporter leaving in `dir`
    /// picks up: highest flag priority, first slot on ties.
    pub fn prioritize_pickup(&mut self, dir: Direction, flag_prio: &[u8; RESOURCE_COUNT]) {
        let mut best: Option<(usize, u8)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let (Some(res), Some(res_dir)) = (slot.res, slot.dir) else {
                continue;
            };
            let prio = res.index().map_or(0, |r| flag_prio[r]);
            if res_dir == dir && best.map_or(true, |(_, p)| prio > p) {
                best = Some((i, prio));
            }
        }
        if let Some(p) = self.path_mut(dir) {
            p.scheduled = best.map(|(i, _)| i);
        }
    }

    /// Slots that would have left by `dir` must be routed again.
    pub fn invalidate_resource_path(&mut self, dir: Direction) {
        for slot in self.slots.iter_mut() {
            if slot.res.is_some() && slot.dir == Some(dir) {
                slot.dir = None;
                self.has_resources = true;
            }
        }
    }

    /// Drop the destination of resources headed to `dest`. Returns the
    /// directions whose pickup choice must be recomputed.
    pub fn reset_transport_to(&mut self, dest: FlagId) -> Vec<Direction> {
        let mut dirs = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.res.is_some() && slot.dest == Some(dest) {
                slot.dest = None;
                self.has_resources = true;
                if let Some(dir) = slot.dir {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }
}

// ── Flag search ─────────────────────────────────────────────────────────

/// Breadth-first search over the road graph.
///
/// Each source carries a tag that is inherited by every flag reached
/// through it, so a visitor can tell which source a flag was found from.
#[derive(Debug, Default)]
pub struct FlagSearch {
    queue: VecDeque<(FlagId, usize)>,
    visited: Vec<bool>,
}

impl FlagSearch {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(&mut self, flag: FlagId) -> bool {
        let i = flag.index() as usize;
        if self.visited.len() <= i {
            self.visited.resize(i + 1, false);
        }
        !std::mem::replace(&mut self.visited[i], true)
    }

    pub fn is_visited(&self, flag: FlagId) -> bool {
        self.visited.get(flag.index() as usize).copied().unwrap_or(false)
    }

    /// Exclude a flag from the search without visiting it.
    pub fn exclude(&mut self, flag: FlagId) {
        self.mark(flag);
    }

    /// Queue a flag with the tag its descendants will carry. Flags already
    /// queued or excluded are skipped.
    pub fn add_source(&mut self, flag: FlagId, tag: usize) -> bool {
        if self.mark(flag) {
            self.queue.push_back((flag, tag));
            true
        } else {
            false
        }
    }

    /// Visit flags in breadth-first order until `visit` returns true.
    /// With `land` only land roads are followed, with `transporter` only
    /// staffed ones. Returns the accepting flag and its tag.
    pub fn execute<F>(
        mut self,
        flags: &Collection<FlagId, Flag>,
        land: bool,
        transporter: bool,
        mut visit: F,
    ) -> Option<(FlagId, usize)>
    where
        F: FnMut(FlagId, &Flag, usize) -> bool,
    {
        let mut steps = 0;
        while let Some((id, tag)) = self.queue.pop_front() {
            if steps >= SEARCH_MAX_DEPTH {
                break;
            }
            steps += 1;
            let Some(flag) = flags.get(id) else { continue };
            if visit(id, flag, tag) {
                return Some((id, tag));
            }
            for dir in cycle_ccw() {
                let Some(path) = flag.path(dir) else { continue };
                if (land && path.water) || (transporter && !path.has_transporter) {
                    continue;
                }
                if self.mark(path.other) {
                    self.queue.push_back((path.other, tag));
                }
            }
        }
        None
    }

    /// Search from a single flag.
    pub fn single<F>(
        flags: &Collection<FlagId, Flag>,
        src: FlagId,
        land: bool,
        transporter: bool,
        visit: F,
    ) -> Option<FlagId>
    where
        F: FnMut(FlagId, &Flag, usize) -> bool,
    {
        let mut search = Self::new();
        search.add_source(src, 0);
        search.execute(flags, land, transporter, visit).map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> (Collection<FlagId, Flag>, Vec<FlagId>) {
        let mut flags = Collection::new();
        let ids: Vec<FlagId> = (0..n)
            .map(|i| flags.allocate_with(|_| Flag::new(0, i as MapPos * 4)))
            .collect();
        for w in ids.windows(2) {
            let (a, b) = (w[0], w[1]);
            if let Some(f) = flags.get_mut(a) {
                f.link_path(Direction::Right, FlagPath::new(b, Direction::Left, false, 0));
                f.set_has_transporter(Direction::Right, true);
            }
            if let Some(f) = flags.get_mut(b) {
                f.link_path(Direction::Left, FlagPath::new(a, Direction::Right, false, 0));
                f.set_has_transporter(Direction::Left, true);
            }
        }
        (flags, ids)
    }

    #[test]
    fn test_road_length_classes() {
        assert_eq!(road_length_value(1), 0);
        assert_eq!(road_length_value(4), 1);
        assert_eq!(road_length_value(6), 2);
        assert_eq!(road_length_value(12), 4);
        assert_eq!(road_length_value(40), 7);
    }

    #[test]
    fn test_drop_and_pick_up() {
        let mut flag = Flag::new(0, 0);
        for _ in 0..FLAG_MAX_RES_COUNT {
            assert!(flag.drop_resource(Resource::Plank, None));
        }
        assert!(!flag.has_empty_slot());
        assert!(!flag.drop_resource(Resource::Stone, None));
        assert!(flag.has_resources());

        for i in 0..FLAG_MAX_RES_COUNT {
            assert_eq!(flag.pick_up_resource(i), Some((Resource::Plank, None)));
        }
        assert!(!flag.has_resources());
        assert_eq!(flag.pick_up_resource(0), None);
    }

    #[test]
    fn test_prioritize_pickup_prefers_priority_then_slot_order() {
        let mut flag = Flag::new(0, 0);
        let other = FlagId::new(2).expect("nonzero");
        flag.link_path(Direction::Right, FlagPath::new(other, Direction::Left, false, 0));
        let mut prio = [0u8; RESOURCE_COUNT];
        prio[Resource::Stone as usize] = 5;
        prio[Resource::Plank as usize] = 9;

        flag.drop_resource(Resource::Stone, None);
        flag.drop_resource(Resource::Plank, None);
        flag.drop_resource(Resource::Plank, None);
        for i in 0..3 {
            if let Some(s) = flag.slot_mut(i) {
                s.dir = Some(Direction::Right);
            }
        }
        flag.prioritize_pickup(Direction::Right, &prio);
        assert_eq!(flag.scheduled_slot(Direction::Right), Some(1));

        flag.pick_up_resource(1);
        flag.pick_up_resource(2);
        flag.prioritize_pickup(Direction::Right, &prio);
        assert_eq!(flag.scheduled_slot(Direction::Right), Some(0));
    }

    #[test]
    fn test_res_waiting_levels() {
        let mut flag = Flag::new(0, 0);
        for _ in 0..3 {
            flag.drop_resource(Resource::Fish, None);
        }
        for i in 0..3 {
            if let Some(s) = flag.slot_mut(i) {
                s.dir = Some(Direction::Down);
            }
        }
        let w = flag.res_waiting();
        let bit = Direction::Down.bit();
        assert_eq!(w[0] & bit, bit);
        assert_eq!(w[2] & bit, bit);
        assert_eq!(w[3] & bit, 0);
    }

    #[test]
    fn test_search_visits_breadth_first() {
        let (flags, ids) = chain(5);
        let mut order = Vec::new();
        let found = FlagSearch::single(&flags, ids[0], true, false, |id, _, _| {
            order.push(id);
            false
        });
        assert_eq!(found, None);
        assert_eq!(order, ids);
    }

    #[test]
    fn test_search_respects_transporter_filter() {
        let (mut flags, ids) = chain(3);
        if let Some(f) = flags.get_mut(ids[1]) {
            f.set_has_transporter(Direction::Right, false);
        }
        let found = FlagSearch::single(&flags, ids[0], false, true, |id, _, _| id == ids[2]);
        assert_eq!(found, None);
        let found = FlagSearch::single(&flags, ids[0], false, false, |id, _, _| id == ids[2]);
        assert_eq!(found, Some(ids[2]));
    }

    #[test]
    fn test_search_tags_follow_sources() {
        let (flags, ids) = chain(5);
        let mut search = FlagSearch::new();
        search.add_source(ids[0], 7);
        search.add_source(ids[4], 9);
        let found = search.execute(&flags, true, false, |id, _, _| id == ids[3]);
        assert_eq!(found, Some((ids[3], 9)));
    }

    #[test]
    fn test_can_demolish_needs_two_distinct_roads() {
        let (mut flags, ids) = chain(3);
        assert!(flags.get(ids[1]).map_or(false, Flag::can_demolish));
        assert!(!flags.get(ids[0]).map_or(true, Flag::can_demolish));
        if let Some(f) = flags.get_mut(ids[1]) {
            f.link_path(Direction::Left, FlagPath::new(ids[2], Direction::Up, false, 0));
        }
        assert!(!flags.get(ids[1]).map_or(true, Flag::can_demolish));
    }

    #[test]
    fn test_del_path_invalidates_routed_slots() {
        let (mut flags, ids) = chain(2);
        let flag = flags.get_mut(ids[0]).expect("flag");
        flag.drop_resource(Resource::Coal, None);
        flag.set_has_resources(false);
        if let Some(s) = flag.slot_mut(0) {
            s.dir = Some(Direction::Right);
        }
        assert!(flag.del_path(Direction::Right).is_some());
        assert!(flag.has_resources());
        assert_eq!(flag.slot(0).and_then(|s| s.dir), None);
    }
}
