//! Per-player policy: priority tables, garrison sliders, statistics,
//! reproduction and knight morale.
//!
//! Everything here is owned data. Operations that walk the world on the
//! player's behalf (spawning serfs into inventories, scanning for attack
//! candidates, sending knights out) are on `Game`.

use serde::{Deserialize, Serialize};

use crate::building::{BuildingType, DistributionPriorities};
use crate::collection::{BuildingId, FlagId, InventoryId};
use crate::config::PlayerSettings;
use crate::map::MapPos;
use crate::notification::{NotificationKind, NotificationQueue};
use crate::resource::{Resource, RESOURCE_COUNT};
use crate::serf::{SerfType, SERF_TYPE_COUNT};

/// Samples kept per statistic before the history wraps.
pub const STAT_HISTORY_LEN: usize = 112;

/// Statistics sampled into the player history: aspect in the high two
/// bits of a mode, time scale in the low two.
pub const STAT_MODES: usize = 16;

/// Samples kept per resource production history.
pub const RESOURCE_HISTORY_LEN: usize = 120;

/// Tools in production priority order, matching `tool_prio`.
pub const TOOLS: [Resource; 9] = [
    Resource::Shovel,
    Resource::Hammer,
    Resource::Rod,
    Resource::Cleaver,
    Resource::Scythe,
    Resource::Axe,
    Resource::Saw,
    Resource::Pick,
    Resource::Pincer,
];

/// Knights kept at home in a garrison, by minimum occupation level.
const HUT_MIN_LEVEL: [u32; 5] = [1, 1, 2, 2, 3];
const TOWER_MIN_LEVEL: [u32; 5] = [1, 2, 3, 4, 6];
const FORTRESS_MIN_LEVEL: [u32; 5] = [1, 3, 6, 9, 12];

/// Buildings remembered during one attack scan.
pub const MAX_ATTACKING_BUILDINGS: usize = 64;

const DEFAULT_FLAG_PRIO: [(Resource, u8); RESOURCE_COUNT] = [
    (Resource::GoldOre, 1),
    (Resource::GoldBar, 2),
    (Resource::Wheat, 3),
    (Resource::Flour, 4),
    (Resource::Pig, 5),
    (Resource::Boat, 6),
    (Resource::Pincer, 7),
    (Resource::Scythe, 8),
    (Resource::Rod, 9),
    (Resource::Cleaver, 10),
    (Resource::Saw, 11),
    (Resource::Axe, 12),
    (Resource::Pick, 13),
    (Resource::Shovel, 14),
    (Resource::Hammer, 15),
    (Resource::Shield, 16),
    (Resource::Sword, 17),
    (Resource::Bread, 18),
    (Resource::Meat, 19),
    (Resource::Fish, 20),
    (Resource::IronOre, 21),
    (Resource::Lumber, 22),
    (Resource::Coal, 23),
    (Resource::Steel, 24),
    (Resource::Stone, 25),
    (Resource::Plank, 26),
];

const DEFAULT_INVENTORY_PRIO: [(Resource, u8); RESOURCE_COUNT] = [
    (Resource::Wheat, 1),
    (Resource::Flour, 2),
    (Resource::Pig, 3),
    (Resource::Bread, 4),
    (Resource::Fish, 5),
    (Resource::Meat, 6),
    (Resource::Lumber, 7),
    (Resource::Plank, 8),
    (Resource::Boat, 9),
    (Resource::Stone, 10),
    (Resource::Coal, 11),
    (Resource::IronOre, 12),
    (Resource::Steel, 13),
    (Resource::Shovel, 14),
    (Resource::Hammer, 15),
    (Resource::Rod, 16),
    (Resource::Cleaver, 17),
    (Resource::Scythe, 18),
    (Resource::Axe, 19),
    (Resource::Saw, 20),
    (Resource::Pick, 21),
    (Resource::Pincer, 22),
    (Resource::Shield, 23),
    (Resource::Sword, 24),
    (Resource::GoldOre, 25),
    (Resource::GoldBar, 26),
];

fn prio_table(entries: &[(Resource, u8); RESOURCE_COUNT]) -> [u8; RESOURCE_COUNT] {
    let mut table = [0; RESOURCE_COUNT];
    for &(res, prio) in entries {
        if let Some(i) = res.index() {
            table[i] = prio;
        }
    }
    table
}

/// A countdown that posts a `CallToLocation` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosTimer {
    pub timeout: i32,
    pub pos: MapPos,
}

/// Knights free to attack, gathered by the last attack scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackPlan {
    pub target: Option<BuildingId>,
    /// Knights the player chose to send.
    pub knights_attacking: u32,
    /// Candidate buildings in scan order.
    pub buildings: Vec<BuildingId>,
    /// Free knights by distance class (8 shells each).
    pub knights_by_distance: [u32; 4],
}

impl AttackPlan {
    pub fn total(&self) -> u32 {
        self.knights_by_distance.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    index: u8,
    settings: PlayerSettings,

    // ── Priorities ──
    pub flag_prio: [u8; RESOURCE_COUNT],
    pub inventory_prio: [u8; RESOURCE_COUNT],
    pub tool_prio: [u16; 9],
    pub distribution: DistributionPriorities,
    /// Per threat level: desired maximum in the high nibble, minimum kept
    /// at home in the low nibble.
    knight_occupation: [u8; 4],
    pub send_strongest: bool,
    pub serf_to_knight_rate: u16,

    // ── Castle ──
    castle: Option<BuildingId>,
    castle_flag: Option<FlagId>,
    castle_inventory: Option<InventoryId>,
    castle_knights: u32,
    castle_knights_wanted: u32,
    can_spawn: bool,

    // ── Knight cycling ──
    cycling_knight: bool,
    reduced_knight_level: bool,
    cycling_second: bool,
    knight_cycle_counter: i32,

    // ── Statistics ──
    serf_count: [u32; SERF_TYPE_COUNT],
    resource_count: [u32; RESOURCE_COUNT],
    completed_building_count: [u32; 25],
    incomplete_building_count: [u32; 25],
    total_land_area: u32,
    total_building_score: u32,
    total_military_score: u32,
    castle_score: i32,
    knight_morale: u32,
    gold_deposited: u32,
    military_max_gold: u32,
    /// Share in percent of each sampled statistic, per mode.
    stat_history: Vec<Vec<u32>>,
    /// Produced resources per sampling period.
    resource_history: Vec<Vec<u32>>,

    // ── Reproduction ──
    reproduction_counter: i32,
    reproduction_reset: i32,
    serf_to_knight_counter: u16,
    knights_to_spawn: u32,
    send_generic_delay: i32,
    send_knight_delay: i32,
    last_tick: u16,

    pub attack: AttackPlan,
    notifications: NotificationQueue,
    timers: Vec<PosTimer>,
}

impl Player {
    pub fn new(index: u8, settings: PlayerSettings) -> Self {
        let reproduction_reset = (60 - settings.reproduction.min(60) as i32) * 50;
        Self {
            index,
            settings,
            flag_prio: prio_table(&DEFAULT_FLAG_PRIO),
            inventory_prio: prio_table(&DEFAULT_INVENTORY_PRIO),
            tool_prio: [9825, 65500, 13100, 6550, 13100, 26200, 32750, 45850, 6550],
            distribution: DistributionPriorities::default(),
            knight_occupation: [0x10, 0x21, 0x32, 0x43],
            send_strongest: false,
            serf_to_knight_rate: 20000,
            castle: None,
            castle_flag: None,
            castle_inventory: None,
            castle_knights: 0,
            castle_knights_wanted: 3,
            can_spawn: false,
            cycling_knight: false,
            reduced_knight_level: false,
            cycling_second: false,
            knight_cycle_counter: 0,
            serf_count: [0; SERF_TYPE_COUNT],
            resource_count: [0; RESOURCE_COUNT],
            completed_building_count: [0; 25],
            incomplete_building_count: [0; 25],
            total_land_area: 0,
            total_building_score: 0,
            total_military_score: 0,
            castle_score: 0,
            knight_morale: 0,
            gold_deposited: 0,
            military_max_gold: 0,
            stat_history: vec![vec![0; STAT_HISTORY_LEN]; STAT_MODES],
            resource_history: vec![vec![0; RESOURCE_HISTORY_LEN]; RESOURCE_COUNT],
            reproduction_counter: reproduction_reset,
            reproduction_reset,
            serf_to_knight_counter: 0x8000,
            knights_to_spawn: 0,
            send_generic_delay: 0,
            send_knight_delay: 0,
            last_tick: 0,
            attack: AttackPlan::default(),
            notifications: NotificationQueue::default(),
            timers: Vec::new(),
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    // ── Priority tables ─────────────────────────────────────────────────

    pub fn flag_prio_of(&self, res: Resource) -> u8 {
        res.index().map_or(0, |i| self.flag_prio[i])
    }

    pub fn inventory_prio_of(&self, res: Resource) -> u8 {
        res.index().map_or(0, |i| self.inventory_prio[i])
    }

    pub fn tool_prio_of(&self, tool: Resource) -> u16 {
        TOOLS
            .iter()
            .position(|&t| t == tool)
            .map_or(0, |i| self.tool_prio[i])
    }

    pub fn reset_distribution_priorities(&mut self) {
        self.distribution = DistributionPriorities::default();
    }

    pub fn reset_flag_priority(&mut self) {
        self.flag_prio = prio_table(&DEFAULT_FLAG_PRIO);
    }

    pub fn reset_inventory_priority(&mut self) {
        self.inventory_prio = prio_table(&DEFAULT_INVENTORY_PRIO);
    }

    // ── Garrison sliders ────────────────────────────────────────────────

    pub fn knight_occupation(&self, threat_level: u8) -> u8 {
        self.knight_occupation[usize::from(threat_level.min(3))]
    }

    /// Desired garrison level for a threat level, 0..=4.
    pub fn occupation_max(&self, threat_level: u8) -> usize {
        usize::from(self.knight_occupation(threat_level) >> 4)
    }

    /// Minimum knights kept home when attacking, 0..=4.
    pub fn occupation_min(&self, threat_level: u8) -> usize {
        usize::from(self.knight_occupation(threat_level) & 0xf)
    }

    /// Move one slider; the maximum stays within min..=4 and the minimum
    /// within 0..=max.
    pub fn change_knight_occupation(&mut self, threat_level: u8, adjust_max: bool, delta: i32) {
        let i = usize::from(threat_level.min(3));
        let mut max = i32::from(self.knight_occupation[i] >> 4);
        let mut min = i32::from(self.knight_occupation[i] & 0xf);
        if adjust_max {
            max = (max + delta).clamp(min, 4);
        } else {
            min = (min + delta).clamp(0, max);
        }
        self.knight_occupation[i] = ((max << 4) | min) as u8;
    }

    /// Garrison level the building policy uses, including the reduced
    /// levels during knight cycling.
    pub fn garrison_level(&self, threat_level: u8) -> usize {
        let level = self.occupation_max(threat_level);
        let level = if self.reduced_knight_level { level + 5 } else { level };
        level.min(9)
    }

    /// Knights a garrison keeps when sending the rest to attack.
    pub fn knights_kept_home(&self, btype: BuildingType, threat_level: u8) -> Option<u32> {
        let level = self.occupation_min(threat_level).min(4);
        match btype {
            BuildingType::Hut => Some(HUT_MIN_LEVEL[level]),
            BuildingType::Tower => Some(TOWER_MIN_LEVEL[level]),
            BuildingType::Fortress => Some(FORTRESS_MIN_LEVEL[level]),
            _ => None,
        }
    }

    // ── Castle ──────────────────────────────────────────────────────────

    pub fn has_castle(&self) -> bool {
        self.castle.is_some()
    }

    pub fn castle(&self) -> Option<BuildingId> {
        self.castle
    }

    pub fn castle_flag(&self) -> Option<FlagId> {
        self.castle_flag
    }

    pub fn castle_inventory(&self) -> Option<InventoryId> {
        self.castle_inventory
    }

    pub fn can_spawn(&self) -> bool {
        self.can_spawn
    }

    pub fn set_can_spawn(&mut self, value: bool) {
        self.can_spawn = value;
    }

    /// The castle was built. Its score counts immediately.
    pub fn castle_founded(&mut self, castle: BuildingId, flag: FlagId, inventory: InventoryId, tick: u32) {
        self.castle = Some(castle);
        self.castle_flag = Some(flag);
        self.castle_inventory = Some(inventory);
        self.total_building_score += BuildingType::Castle.score();
        self.last_tick = tick as u16;
    }

    pub fn castle_knights(&self) -> u32 {
        self.castle_knights
    }

    pub fn castle_knights_wanted(&self) -> u32 {
        self.castle_knights_wanted
    }

    pub fn increase_castle_knights(&mut self) {
        self.castle_knights += 1;
    }

    pub fn decrease_castle_knights(&mut self) {
        self.castle_knights = self.castle_knights.saturating_sub(1);
    }

    pub fn increase_castle_knights_wanted(&mut self) {
        self.castle_knights_wanted = (self.castle_knights_wanted + 1).min(99);
    }

    pub fn decrease_castle_knights_wanted(&mut self) {
        self.castle_knights_wanted = self.castle_knights_wanted.saturating_sub(1).max(1);
    }

    /// Counts down and fires every sixth call.
    pub fn tick_send_generic_delay(&mut self) -> bool {
        self.send_generic_delay -= 1;
        if self.send_generic_delay < 0 {
            self.send_generic_delay = 5;
            true
        } else {
            false
        }
    }

    pub fn tick_send_knight_delay(&mut self) -> bool {
        self.send_knight_delay -= 1;
        if self.send_knight_delay < 0 {
            self.send_knight_delay = 5;
            true
        } else {
            false
        }
    }

    // ── Knight cycling ──────────────────────────────────────────────────

    /// Send weak knights home so stronger ones take their place: garrison
    /// levels are lowered for a while, then restored.
    pub fn cycle_knights(&mut self) {
        self.cycling_knight = true;
        self.reduced_knight_level = true;
        self.knight_cycle_counter = 2400;
    }

    pub fn is_cycling_knights(&self) -> bool {
        self.cycling_knight
    }

    pub fn reduced_knight_level(&self) -> bool {
        self.reduced_knight_level
    }

    pub fn cycling_second(&self) -> bool {
        self.cycling_second
    }

    /// Weakest knight rank still being sent home in the second phase.
    pub fn cycling_knight_rank(&self) -> Option<u8> {
        self.cycling_second
            .then(|| (self.knight_cycle_counter >> 8).clamp(0, 4) as u8)
    }

    fn update_cycling(&mut self, delta: u16) {
        if !self.cycling_knight {
            return;
        }
        self.knight_cycle_counter -= i32::from(delta);
        if self.knight_cycle_counter < 1 {
            self.cycling_second = false;
            self.cycling_knight = false;
        } else if self.knight_cycle_counter < 2048 && self.reduced_knight_level {
            self.cycling_second = true;
            self.reduced_knight_level = false;
        }
    }

    // ── Per-tick update ─────────────────────────────────────────────────

    /// Advance timers, knight cycling and the reproduction counter.
    /// Returns how many serfs are due to spawn this tick.
    pub fn update(&mut self, tick: u32) -> u32 {
        let delta = (tick as u16).wrapping_sub(self.last_tick);
        self.last_tick = tick as u16;

        self.update_cycling(delta);

        let mut spawns = 0;
        if self.has_castle() {
            self.reproduction_counter -= i32::from(delta);
            while self.reproduction_counter < 0 {
                spawns += 1;
                self.reproduction_counter += self.reproduction_reset.max(1);
            }
        }

        let mut expired = Vec::new();
        self.timers.retain_mut(|t| {
            t.timeout -= i32::from(delta);
            if t.timeout < 0 {
                expired.push(t.pos);
                false
            } else {
                true
            }
        });
        for pos in expired {
            self.notify(NotificationKind::CallToLocation, pos, 0);
        }
        spawns
    }

    /// Decide what the next spawned serf becomes. The knight counter
    /// wraps at 16 bits; every wrap owes one knight, at most two pending.
    pub fn next_spawn_is_knight(&mut self) -> bool {
        let (counter, wrapped) = self
            .serf_to_knight_counter
            .overflowing_add(self.serf_to_knight_rate);
        self.serf_to_knight_counter = counter;
        if wrapped {
            self.knights_to_spawn = (self.knights_to_spawn + 1).min(2);
        }
        self.knights_to_spawn > 0
    }

    pub fn knight_spawned(&mut self) {
        self.knights_to_spawn = self.knights_to_spawn.saturating_sub(1);
    }

    pub fn add_timer(&mut self, timeout: i32, pos: MapPos) {
        self.timers.push(PosTimer { timeout, pos });
    }

    // ── Notifications ───────────────────────────────────────────────────

    pub fn notify(&mut self, kind: NotificationKind, pos: MapPos, data: u32) {
        self.notifications.push(kind, pos, data);
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationQueue {
        &mut self.notifications
    }

    // ── Statistics ──────────────────────────────────────────────────────

    pub fn serf_count(&self, ty: SerfType) -> u32 {
        self.serf_count.get(ty.index()).copied().unwrap_or(0)
    }

    pub fn serf_counts(&self) -> &[u32; SERF_TYPE_COUNT] {
        &self.serf_count
    }

    pub fn increase_serf_count(&mut self, ty: SerfType) {
        if let Some(c) = self.serf_count.get_mut(ty.counted_as().index()) {
            *c += 1;
        }
    }

    pub fn decrease_serf_count(&mut self, ty: SerfType) {
        if let Some(c) = self.serf_count.get_mut(ty.counted_as().index()) {
            *c = c.saturating_sub(1);
        }
    }

    /// Count a produced resource.
    pub fn increase_res_count(&mut self, res: Resource) {
        if let Some(i) = res.index() {
            self.resource_count[i] += 1;
        }
    }

    pub fn resource_count(&self, res: Resource) -> u32 {
        res.index().map_or(0, |i| self.resource_count[i])
    }

    /// Move the production counters into slot `index` of the resource
    /// history and start counting afresh.
    pub fn sample_resource_counts(&mut self, index: usize) {
        for (history, count) in self.resource_history.iter_mut().zip(self.resource_count.iter_mut()) {
            if let Some(slot) = history.get_mut(index) {
                *slot = *count;
            }
            *count = 0;
        }
    }

    pub fn resource_history(&self, res: Resource) -> &[u32] {
        res.index().map(|i| self.resource_history[i].as_slice()).unwrap_or_default()
    }

    pub fn set_stat_history(&mut self, mode: usize, index: usize, value: u32) {
        if let Some(slot) = self.stat_history.get_mut(mode).and_then(|h| h.get_mut(index)) {
            *slot = value;
        }
    }

    pub fn stat_history(&self, mode: usize) -> &[u32] {
        self.stat_history.get(mode).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn completed_building_count(&self, btype: BuildingType) -> u32 {
        self.completed_building_count[btype.index()]
    }

    pub fn incomplete_building_count(&self, btype: BuildingType) -> u32 {
        self.incomplete_building_count[btype.index()]
    }

    pub fn building_founded(&mut self, btype: BuildingType) {
        self.incomplete_building_count[btype.index()] += 1;
    }

    pub fn building_built(&mut self, btype: BuildingType) {
        let i = btype.index();
        self.total_building_score += btype.score();
        self.completed_building_count[i] += 1;
        self.incomplete_building_count[i] = self.incomplete_building_count[i].saturating_sub(1);
    }

    pub fn building_demolished(&mut self, btype: BuildingType, done: bool) {
        let i = btype.index();
        if done {
            self.total_building_score = self.total_building_score.saturating_sub(btype.score());
            if btype == BuildingType::Castle {
                self.castle_score -= 1;
                self.castle = None;
                self.castle_inventory = None;
                self.castle_flag = None;
                self.can_spawn = false;
            } else {
                self.completed_building_count[i] = self.completed_building_count[i].saturating_sub(1);
            }
        } else {
            self.incomplete_building_count[i] = self.incomplete_building_count[i].saturating_sub(1);
        }
    }

    /// A building of ours was taken by an enemy.
    pub fn building_lost(&mut self, btype: BuildingType) {
        let i = btype.index();
        self.total_building_score = self.total_building_score.saturating_sub(btype.score());
        self.total_land_area = self.total_land_area.saturating_sub(7);
        self.completed_building_count[i] = self.completed_building_count[i].saturating_sub(1);
    }

    /// We took an enemy building.
    pub fn building_taken(&mut self, btype: BuildingType) {
        self.total_building_score += btype.score();
        self.total_land_area += 7;
        self.completed_building_count[btype.index()] += 1;
    }

    /// We defeated an enemy castle.
    pub fn castle_defeated(&mut self) {
        self.castle_score += 1;
    }

    pub fn land_area(&self) -> u32 {
        self.total_land_area
    }

    pub fn increase_land_area(&mut self) {
        self.total_land_area += 1;
    }

    pub fn decrease_land_area(&mut self) {
        self.total_land_area = self.total_land_area.saturating_sub(1);
    }

    pub fn building_score(&self) -> u32 {
        self.total_building_score
    }

    pub fn total_military_score(&self) -> u32 {
        self.total_military_score
    }

    pub fn increase_military_score(&mut self, value: u32) {
        self.total_military_score += value;
    }

    pub fn decrease_military_score(&mut self, value: u32) {
        self.total_military_score = self.total_military_score.saturating_sub(value);
    }

    pub fn increase_military_max_gold(&mut self, value: u32) {
        self.military_max_gold += value;
    }

    pub fn military_max_gold(&self) -> u32 {
        self.military_max_gold
    }

    pub fn castle_score(&self) -> i32 {
        self.castle_score
    }

    pub fn knight_morale(&self) -> u32 {
        self.knight_morale
    }

    pub fn gold_deposited(&self) -> u32 {
        self.gold_deposited
    }

    /// Military strength condensed from score and morale.
    pub fn military_score(&self) -> u64 {
        (2048 + u64::from(self.knight_morale >> 1)) * (u64::from(self.total_military_score) << 6)
    }

    pub fn score(&self) -> u64 {
        u64::from(self.total_building_score)
            + ((u64::from(self.total_land_area) + self.military_score()) >> 4)
    }

    /// Recompute morale from the gold this player holds relative to all
    /// gold in the world, adjusted by castles won or lost.
    pub fn update_knight_morale(&mut self, held_gold: u32, total_gold: u32, morale_factor: u32) {
        self.gold_deposited = held_gold;
        let mut depot = u64::from(held_gold);
        let mut total = u64::from(total_gold);
        let mut morale = if total != 0 {
            while total > 0xffff {
                total >>= 1;
                depot >>= 1;
            }
            let depot = depot.min(total - 1);
            1024 + (u64::from(morale_factor) * depot / total) as i64
        } else {
            4096
        };

        if self.castle_score < 0 {
            morale = (morale - 1023).max(1);
        } else if self.castle_score > 0 {
            morale = (morale + 1024 * i64::from(self.castle_score)).min(0xffff);
        }
        self.knight_morale = morale as u32;
        self.military_max_gold = 0;
    }

    /// Clamp counters that wrapped below zero in long games.
    pub fn sanitize_scores(&mut self) {
        for v in [
            &mut self.total_land_area,
            &mut self.total_military_score,
            &mut self.total_building_score,
        ] {
            if *v > 0xffff_0000 {
                *v = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Player {
        Player::new(0, PlayerSettings::default())
    }

    #[test]
    fn test_default_priority_tables() {
        let p = player();
        assert_eq!(p.flag_prio_of(Resource::Plank), 26);
        assert_eq!(p.flag_prio_of(Resource::GoldOre), 1);
        assert_eq!(p.inventory_prio_of(Resource::GoldBar), 26);
        assert_eq!(p.tool_prio_of(Resource::Hammer), 65500);
        assert!(p.flag_prio.iter().all(|&v| v > 0));
    }

    #[test]
    fn test_knight_occupation_clamps() {
        let mut p = player();
        assert_eq!((p.occupation_max(0), p.occupation_min(0)), (1, 0));
        p.change_knight_occupation(0, true, 10);
        assert_eq!(p.occupation_max(0), 4);
        p.change_knight_occupation(0, false, 10);
        assert_eq!(p.occupation_min(0), 4);
        p.change_knight_occupation(0, true, -10);
        assert_eq!(p.occupation_max(0), 4);
        p.change_knight_occupation(0, false, -10);
        p.change_knight_occupation(0, true, -10);
        assert_eq!((p.occupation_max(0), p.occupation_min(0)), (0, 0));
    }

    #[test]
    fn test_send_delays_fire_every_sixth_call() {
        let mut p = player();
        let fired: Vec<bool> = (0..12).map(|_| p.tick_send_generic_delay()).collect();
        assert_eq!(fired.iter().filter(|&&f| f).count(), 2);
        assert!(fired[0]);
        assert!(fired[6]);
    }

    #[test]
    fn test_knight_spawn_counter_wraps() {
        let mut p = player();
        p.serf_to_knight_rate = 0x4000;
        // 0x8000 + 0x4000 stays below the wrap, the second add wraps.
        assert!(!p.next_spawn_is_knight());
        assert!(p.next_spawn_is_knight());
        p.knight_spawned();
        assert!(!p.next_spawn_is_knight());
    }

    #[test]
    fn test_reproduction_needs_castle() {
        let mut p = player();
        assert_eq!(p.update(5000), 0);
        p.castle_founded(
            BuildingId::new(1).expect("id"),
            FlagId::new(1).expect("id"),
            InventoryId::new(1).expect("id"),
            5000,
        );
        // reset is (60 - 40) * 50 = 1000 ticks per serf.
        assert_eq!(p.update(7500), 2);
    }

    #[test]
    fn test_morale_from_gold_share() {
        let mut p = player();
        p.update_knight_morale(0, 0, 10 * 1024);
        assert_eq!(p.knight_morale(), 4096);
        p.update_knight_morale(50, 100, 10 * 1024);
        assert_eq!(p.knight_morale(), 1024 + 10 * 1024 / 2);
        p.castle_defeated();
        p.update_knight_morale(50, 100, 10 * 1024);
        assert_eq!(p.knight_morale(), 1024 + 10 * 1024 / 2 + 1024);
    }

    #[test]
    fn test_timers_post_notifications() {
        let mut p = player();
        p.add_timer(10, 77);
        p.update(5);
        assert!(p.notifications().is_empty());
        p.update(20);
        assert_eq!(p.notifications().peek().map(|n| n.pos), Some(77));
    }

    #[test]
    fn test_cycling_phases() {
        let mut p = player();
        p.cycle_knights();
        assert!(p.reduced_knight_level());
        assert_eq!(p.garrison_level(0), 6);
        p.update(400);
        assert!(p.cycling_second());
        assert!(!p.reduced_knight_level());
        p.update(2500);
        assert!(!p.is_cycling_knights());
    }

    #[test]
    fn test_building_counts_follow_ownership() {
        let mut p = player();
        p.building_founded(BuildingType::Sawmill);
        p.building_built(BuildingType::Sawmill);
        p.building_taken(BuildingType::Hut);
        assert_eq!(p.completed_building_count(BuildingType::Sawmill), 1);
        assert_eq!(p.incomplete_building_count(BuildingType::Sawmill), 0);
        assert_eq!(p.building_score(), BuildingType::Sawmill.score() + BuildingType::Hut.score());

        p.building_lost(BuildingType::Hut);
        p.building_demolished(BuildingType::Sawmill, true);
        assert_eq!(p.completed_building_count(BuildingType::Hut), 0);
        assert_eq!(p.completed_building_count(BuildingType::Sawmill), 0);
        assert_eq!(p.building_score(), 0);
    }

    #[test]
    fn test_resource_sample_resets_counter() {
        let mut p = player();
        p.increase_res_count(Resource::Stone);
        p.sample_resource_counts(5);
        p.increase_res_count(Resource::Stone);
        assert_eq!(p.resource_history(Resource::Stone)[5], 1);
        assert_eq!(p.resource_count(Resource::Stone), 1);
        p.sample_resource_counts(RESOURCE_HISTORY_LEN);
        assert_eq!(p.resource_count(Resource::Stone), 0);
    }
}
