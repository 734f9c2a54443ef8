//! Buildings: construction progress, stock slots and garrison counters.
//!
//! A building keeps two stock slots. While constructing they hold planks
//! and stone; once done they hold the production inputs of its type, or
//! gold for military buildings. Stock and castle buildings own an
//! inventory instead of using their slots. Serf dispatch, garrison
//! policy and land ownership need the rest of the world and live on
//! `Game`; this module is the building-local bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::collection::{BuildingId, FlagId, InventoryId, SerfId};
use crate::error::{GameError, GameResult};
use crate::map::{MapObject, MapPos, Minerals};
use crate::resource::Resource;
use crate::serf::SerfType;

/// Number of stock slots per building.
pub const MAX_STOCK: usize = 2;

/// Ticks a building burns before it is removed.
pub const BURNING_TICKS: u16 = 2047;
/// Ticks a castle burns.
pub const CASTLE_BURNING_TICKS: u16 = 8191;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BuildingType {
    Fisher = 1,
    Lumberjack,
    Boatbuilder,
    Stonecutter,
    StoneMine,
    CoalMine,
    IronMine,
    GoldMine,
    Forester,
    Stock,
    Hut,
    Farm,
    Butcher,
    PigFarm,
    Mill,
    Baker,
    Sawmill,
    SteelSmelter,
    ToolMaker,
    WeaponSmith,
    Tower,
    Fortress,
    GoldSmelter,
    Castle,
}

/// Material needs and build speed of a building type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstructionInfo {
    pub object: MapObject,
    pub planks: u32,
    pub stones: u32,
    /// Progress per builder step before the frame is up.
    pub phase_1: u32,
    /// Progress per builder step after the frame is up.
    pub phase_2: u32,
}

/// A serf a finished building asks for, with the tools a generic serf
/// must be given to become one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRequest {
    pub serf: SerfType,
    pub tool_1: Option<Resource>,
    pub tool_2: Option<Resource>,
}

const HUT_OCCUPANTS: [u32; 10] = [1, 1, 2, 2, 3, 1, 1, 1, 1, 2];
const TOWER_OCCUPANTS: [u32; 10] = [1, 2, 3, 4, 6, 1, 1, 2, 3, 4];
const FORTRESS_OCCUPANTS: [u32; 10] = [1, 3, 6, 9, 12, 1, 2, 4, 6, 8];

/// Slope of the walk from the flag into the building, in 1/32 steps.
const ENTRANCE_SLOPE: [i32; 25] = [
    5, 18, 18, 15, 18, 22, 22, 22, 22, 18, 16, 18, 1, 10, 1, 15, 15, 16, 15, 15, 10, 15, 20, 15,
    18,
];

impl BuildingType {
    pub const ALL: [BuildingType; 24] = [
        BuildingType::Fisher,
        BuildingType::Lumberjack,
        BuildingType::Boatbuilder,
        BuildingType::Stonecutter,
        BuildingType::StoneMine,
        BuildingType::CoalMine,
        BuildingType::IronMine,
        BuildingType::GoldMine,
        BuildingType::Forester,
        BuildingType::Stock,
        BuildingType::Hut,
        BuildingType::Farm,
        BuildingType::Butcher,
        BuildingType::PigFarm,
        BuildingType::Mill,
        BuildingType::Baker,
        BuildingType::Sawmill,
        BuildingType::SteelSmelter,
        BuildingType::ToolMaker,
        BuildingType::WeaponSmith,
        BuildingType::Tower,
        BuildingType::Fortress,
        BuildingType::GoldSmelter,
        BuildingType::Castle,
    ];

    /// One-based type number.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<BuildingType> {
        i.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn construction(self) -> ConstructionInfo {
        use BuildingType::*;
        let (object, planks, stones, phase_1, phase_2) = match self {
            Fisher | Lumberjack | Stonecutter | Forester => {
                (MapObject::SmallBuilding, 2, 0, 4096, 4096)
            }
            Boatbuilder => (MapObject::SmallBuilding, 3, 0, 4096, 2048),
            StoneMine => (MapObject::SmallBuilding, 4, 1, 2048, 1366),
            CoalMine | IronMine | GoldMine => (MapObject::SmallBuilding, 5, 0, 2048, 1366),
            Stock => (MapObject::LargeBuilding, 4, 3, 1366, 1024),
            Hut => (MapObject::SmallBuilding, 1, 1, 4096, 4096),
            Farm | PigFarm | GoldSmelter => (MapObject::LargeBuilding, 4, 1, 2048, 1366),
            Butcher | Baker | WeaponSmith => (MapObject::LargeBuilding, 2, 1, 4096, 2048),
            Mill => (MapObject::SmallBuilding, 3, 1, 2048, 2048),
            Sawmill | SteelSmelter => (MapObject::LargeBuilding, 3, 2, 2048, 1366),
            ToolMaker => (MapObject::LargeBuilding, 3, 3, 2048, 1024),
            Tower => (MapObject::LargeBuilding, 2, 3, 2048, 1366),
            Fortress => (MapObject::LargeBuilding, 5, 5, 1024, 683),
            Castle => (MapObject::Castle, 0, 0, 256, 256),
        };
        ConstructionInfo {
            object,
            planks,
            stones,
            phase_1,
            phase_2,
        }
    }

    pub fn map_object(self) -> MapObject {
        self.construction().object
    }

    /// Large buildings need their ground leveled before construction.
    pub fn is_large(self) -> bool {
        self.map_object() == MapObject::LargeBuilding
    }

    pub fn is_mine(self) -> bool {
        matches!(
            self,
            BuildingType::StoneMine
                | BuildingType::CoalMine
                | BuildingType::IronMine
                | BuildingType::GoldMine
        )
    }

    /// 0 for a stone mine up to 3 for a gold mine.
    pub fn mine_kind(self) -> Option<u32> {
        self.is_mine()
            .then(|| self as u32 - BuildingType::StoneMine as u32)
    }

    /// Mineral a mine digs for.
    pub fn mine_mineral(self) -> Option<Minerals> {
        match self {
            BuildingType::StoneMine => Some(Minerals::Stone),
            BuildingType::CoalMine => Some(Minerals::Coal),
            BuildingType::IronMine => Some(Minerals::Iron),
            BuildingType::GoldMine => Some(Minerals::Gold),
            _ => None,
        }
    }

    pub fn is_military(self) -> bool {
        matches!(
            self,
            BuildingType::Hut | BuildingType::Tower | BuildingType::Fortress | BuildingType::Castle
        )
    }

    /// Military buildings other than the castle.
    pub fn is_garrison(self) -> bool {
        matches!(self, BuildingType::Hut | BuildingType::Tower | BuildingType::Fortress)
    }

    /// 0 hut, 1 tower, 2 fortress.
    pub fn garrison_kind(self) -> Option<u32> {
        match self {
            BuildingType::Hut => Some(0),
            BuildingType::Tower => Some(1),
            BuildingType::Fortress => Some(2),
            _ => None,
        }
    }

    pub fn knight_capacity(self) -> u32 {
        match self {
            BuildingType::Hut => 3,
            BuildingType::Tower => 6,
            BuildingType::Fortress => 12,
            _ => 0,
        }
    }

    /// Gold bars a military building stores.
    pub fn max_gold(self) -> u32 {
        match self {
            BuildingType::Hut => 2,
            BuildingType::Tower => 4,
            BuildingType::Fortress => 8,
            _ => 0,
        }
    }

    /// Knights wanted at occupation `level`. Levels 5..=9 are the reduced
    /// levels used while knights are being cycled.
    pub fn occupants_for_level(self, level: usize) -> u32 {
        let level = level.min(9);
        match self {
            BuildingType::Hut => HUT_OCCUPANTS[level],
            BuildingType::Tower => TOWER_OCCUPANTS[level],
            BuildingType::Fortress => FORTRESS_OCCUPANTS[level],
            _ => 0,
        }
    }

    pub fn score(self) -> u32 {
        use BuildingType::*;
        match self {
            Fisher | Lumberjack | Boatbuilder | Stonecutter | Forester => 2,
            StoneMine | CoalMine | IronMine | GoldMine => 5,
            Stock => 10,
            Hut => 3,
            Farm => 6,
            Butcher => 4,
            PigFarm => 6,
            Mill => 5,
            Baker => 4,
            Sawmill | SteelSmelter => 7,
            ToolMaker => 9,
            WeaponSmith => 4,
            Tower => 8,
            Fortress => 15,
            GoldSmelter => 6,
            Castle => 20,
        }
    }

    /// Worker a finished building requests while it has none.
    pub fn worker(self) -> Option<WorkerRequest> {
        use BuildingType::*;
        use Resource::*;
        let (serf, tool_1, tool_2) = match self {
            Fisher => (SerfType::Fisher, Some(Rod), None),
            Lumberjack => (SerfType::Lumberjack, Some(Axe), None),
            Boatbuilder => (SerfType::BoatBuilder, Some(Hammer), None),
            Stonecutter => (SerfType::Stonecutter, Some(Pick), None),
            StoneMine | CoalMine | IronMine | GoldMine => (SerfType::Miner, Some(Pick), None),
            Forester => (SerfType::Forester, None, None),
            Farm => (SerfType::Farmer, Some(Scythe), None),
            Butcher => (SerfType::Butcher, Some(Cleaver), None),
            PigFarm => (SerfType::PigFarmer, None, None),
            Mill => (SerfType::Miller, None, None),
            Baker => (SerfType::Baker, None, None),
            Sawmill => (SerfType::Sawmiller, Some(Saw), None),
            SteelSmelter | GoldSmelter => (SerfType::Smelter, None, None),
            ToolMaker => (SerfType::Toolmaker, Some(Hammer), Some(Saw)),
            WeaponSmith => (SerfType::WeaponSmith, Some(Hammer), Some(Pincer)),
            Stock | Hut | Tower | Fortress | Castle => return None,
        };
        Some(WorkerRequest {
            serf,
            tool_1,
            tool_2,
        })
    }

    /// Input slots a finished building fills once its worker arrived.
    pub fn production_stocks(self) -> [Option<(Resource, u32)>; MAX_STOCK] {
        use BuildingType::*;
        use Resource::*;
        match self {
            Boatbuilder => [Some((Plank, 8)), None],
            StoneMine | CoalMine | IronMine | GoldMine => [Some((GroupFood, 8)), None],
            Butcher => [Some((Pig, 8)), None],
            PigFarm | Mill => [Some((Wheat, 8)), None],
            Baker => [Some((Flour, 8)), None],
            Sawmill => [None, Some((Lumber, 8))],
            SteelSmelter => [Some((Coal, 8)), Some((IronOre, 8))],
            ToolMaker => [Some((Plank, 8)), Some((Steel, 8))],
            WeaponSmith => [Some((Coal, 8)), Some((Steel, 8))],
            GoldSmelter => [Some((Coal, 8)), Some((GoldOre, 8))],
            Hut | Tower | Fortress => [None, Some((GoldBar, self.max_gold()))],
            _ => [None, None],
        }
    }

    /// Slope of the walk between flag and door, in 1/32 steps.
    pub fn entrance_slope(self) -> i32 {
        ENTRANCE_SLOPE[self.index()]
    }
}

impl fmt::Display for BuildingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Slope used for unfinished buildings, which have no proper door.
pub const UNFINISHED_ENTRANCE_SLOPE: i32 = 1;

/// One stock slot of a building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stock {
    pub res: Option<Resource>,
    /// Pull priority used when inventories dispatch resources.
    pub prio: u8,
    pub available: u32,
    pub requested: u32,
    pub maximum: u32,
}

impl Stock {
    pub fn new(res: Resource, maximum: u32) -> Self {
        Self {
            res: Some(res),
            prio: 0,
            available: 0,
            requested: 0,
            maximum,
        }
    }

    /// Resources present or on their way.
    pub fn total(&self) -> u32 {
        self.available + self.requested
    }

    pub fn is_full(&self) -> bool {
        self.total() >= self.maximum
    }

    pub fn accepts(&self, res: Resource) -> bool {
        self.res.map_or(false, |s| res.matches_stock(s))
    }

    /// `slider >> (8 + fill)` while below the maximum, zero when full.
    fn prio_from_slider(&self, slider: u32) -> u8 {
        if self.is_full() {
            0
        } else {
            shift_right(slider, 8 + self.total()) as u8
        }
    }

    /// `0xff >> fill` while below the maximum, zero when full.
    fn prio_from_fill(&self) -> u8 {
        if self.is_full() {
            0
        } else {
            shift_right(0xff, self.total()) as u8
        }
    }
}

fn shift_right(value: u32, by: u32) -> u32 {
    value.checked_shr(by).unwrap_or(0)
}

/// Distribution sliders a building reads when refreshing its priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPriorities {
    pub food_stonemine: u32,
    pub food_coalmine: u32,
    pub food_ironmine: u32,
    pub food_goldmine: u32,
    pub planks_construction: u32,
    pub planks_boatbuilder: u32,
    pub planks_toolmaker: u32,
    pub steel_toolmaker: u32,
    pub steel_weaponsmith: u32,
    pub coal_steelsmelter: u32,
    pub coal_goldsmelter: u32,
    pub coal_weaponsmith: u32,
    pub wheat_pigfarm: u32,
    pub wheat_mill: u32,
}

impl Default for DistributionPriorities {
    fn default() -> Self {
        Self {
            food_stonemine: 13100,
            food_coalmine: 45850,
            food_ironmine: 45850,
            food_goldmine: 65500,
            planks_construction: 65500,
            planks_boatbuilder: 3275,
            planks_toolmaker: 19650,
            steel_toolmaker: 45850,
            steel_weaponsmith: 65500,
            coal_steelsmelter: 32750,
            coal_goldsmelter: 65500,
            coal_weaponsmith: 52400,
            wheat_pigfarm: 65500,
            wheat_mill: 32750,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    index: BuildingId,
    btype: BuildingType,
    owner: u8,
    pos: MapPos,
    flag: FlagId,
    constructing: bool,
    /// Construction progress; for mines the recent success history.
    progress: u32,
    /// Target height while leveling.
    level: i32,
    /// Distance class to enemy land: 0 far, 3 at the border.
    threat_level: u8,
    serf_requested: bool,
    serf_request_failed: bool,
    active: bool,
    holder: bool,
    burning: bool,
    burning_counter: u16,
    burning_tick: u16,
    /// Worker, builder or digger inside; the inventory transporter of a
    /// castle.
    main_serf: Option<SerfId>,
    /// Head of the garrison chain of a military building or castle.
    first_knight: Option<SerfId>,
    stock: [Stock; MAX_STOCK],
    inventory: Option<InventoryId>,
    knights_present: u32,
    knights_requested: u32,
    /// Pigs on a pig farm, or the hull stage of a boat under construction.
    work_count: u32,
    under_attack: bool,
    /// Weapon smith made a sword and owes a shield from the same inputs.
    shield_pending: bool,
}

impl Building {
    /// Start construction. A castle is active from the start and is raised
    /// by its builder serf rather than from materials.
    pub fn new(index: BuildingId, btype: BuildingType, owner: u8, pos: MapPos, flag: FlagId) -> Self {
        let info = btype.construction();
        let mut building = Self {
            index,
            btype,
            owner,
            pos,
            flag,
            constructing: true,
            progress: if btype.is_large() { 0 } else { 1 },
            level: 0,
            threat_level: 0,
            serf_requested: false,
            serf_request_failed: false,
            active: false,
            holder: false,
            burning: false,
            burning_counter: 0,
            burning_tick: 0,
            main_serf: None,
            first_knight: None,
            stock: [Stock::default(); MAX_STOCK],
            inventory: None,
            knights_present: 0,
            knights_requested: 0,
            work_count: 0,
            under_attack: false,
            shield_pending: false,
        };
        if btype == BuildingType::Castle {
            building.active = true;
            building.holder = true;
        } else {
            building.stock = [
                Stock::new(Resource::Plank, info.planks),
                Stock::new(Resource::Stone, info.stones),
            ];
        }
        building
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn index(&self) -> BuildingId {
        self.index
    }

    pub fn btype(&self) -> BuildingType {
        self.btype
    }

    pub fn owner(&self) -> u8 {
        self.owner
    }

    pub fn set_owner(&mut self, owner: u8) {
        self.owner = owner;
    }

    pub fn pos(&self) -> MapPos {
        self.pos
    }

    pub fn flag(&self) -> FlagId {
        self.flag
    }

    pub fn is_done(&self) -> bool {
        !self.constructing
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn set_progress(&mut self, progress: u32) {
        self.progress = progress;
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn set_level(&mut self, level: i32) {
        self.level = level;
    }

    /// Ground still has to be leveled.
    pub fn is_leveling(&self) -> bool {
        self.constructing && self.progress == 0
    }

    pub fn threat_level(&self) -> u8 {
        self.threat_level
    }

    pub fn set_threat_level(&mut self, level: u8) {
        self.threat_level = level.min(3);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn has_holder(&self) -> bool {
        self.holder
    }

    pub fn set_holder(&mut self, holder: bool) {
        self.holder = holder;
    }

    pub fn is_burning(&self) -> bool {
        self.burning
    }

    pub fn burning_counter(&self) -> u16 {
        self.burning_counter
    }

    pub fn is_military(&self) -> bool {
        self.btype.is_military()
    }

    pub fn has_inventory(&self) -> bool {
        self.inventory.is_some()
    }

    pub fn inventory(&self) -> Option<InventoryId> {
        self.inventory
    }

    pub fn set_inventory(&mut self, inventory: Option<InventoryId>) {
        self.inventory = inventory;
    }

    pub fn main_serf(&self) -> Option<SerfId> {
        self.main_serf
    }

    pub fn set_main_serf(&mut self, serf: Option<SerfId>) {
        self.main_serf = serf;
    }

    pub fn first_knight(&self) -> Option<SerfId> {
        self.first_knight
    }

    pub fn is_under_attack(&self) -> bool {
        self.under_attack
    }

    pub fn set_under_attack(&mut self, value: bool) {
        self.under_attack = value;
    }

    pub fn work_count(&self) -> u32 {
        self.work_count
    }

    pub fn set_work_count(&mut self, count: u32) {
        self.work_count = count;
    }

    pub fn pigs_count(&self) -> u32 {
        self.work_count
    }

    pub fn place_new_pig(&mut self) {
        self.work_count += 1;
    }

    pub fn send_pig_to_butcher(&mut self) {
        self.work_count = self.work_count.saturating_sub(1);
    }

    /// Restart the boat hull.
    pub fn boat_clear(&mut self) {
        self.work_count = 0;
    }

    pub fn boat_do(&mut self) {
        self.work_count += 1;
    }

    pub fn shield_pending(&self) -> bool {
        self.shield_pending
    }

    pub fn set_shield_pending(&mut self, value: bool) {
        self.shield_pending = value;
    }

    // ── Serf requests ───────────────────────────────────────────────────

    pub fn serf_requested(&self) -> bool {
        self.serf_requested
    }

    pub fn set_serf_requested(&mut self, value: bool) {
        self.serf_requested = value;
    }

    pub fn serf_request_failed(&self) -> bool {
        self.serf_request_failed
    }

    pub fn set_serf_request_failed(&mut self, value: bool) {
        self.serf_request_failed = value;
    }

    /// A worker is neither present nor on its way.
    pub fn wants_worker(&self) -> bool {
        !self.serf_request_failed && !self.holder && !self.serf_requested
    }

    /// The serf walking here for this building was lost.
    pub fn requested_serf_lost(&mut self) {
        if self.serf_requested {
            self.serf_requested = false;
        } else if self.inventory.is_none() {
            self.knights_requested = self.knights_requested.saturating_sub(1);
        }
    }

    /// The requested serf arrived at the door.
    pub fn requested_serf_reached(&mut self, serf: SerfId) {
        self.holder = true;
        if self.serf_requested {
            self.main_serf = Some(serf);
        }
        self.serf_requested = false;
    }

    // ── Construction ────────────────────────────────────────────────────

    pub fn done_leveling(&mut self) {
        self.progress = 1;
        self.holder = false;
        self.main_serf = None;
    }

    /// Advance construction by one builder step. Returns true when the
    /// building is finished; the caller updates flag and player state.
    pub fn build_progress(&mut self) -> bool {
        let info = self.btype.construction();
        let frame_finished = self.progress & (1 << 15) != 0;
        self.progress += if frame_finished { info.phase_2 } else { info.phase_1 };
        if self.progress <= 0xffff {
            return false;
        }

        self.progress = 0;
        self.constructing = false;
        self.main_serf = None;
        if self.btype == BuildingType::Castle {
            return true;
        }
        self.holder = false;
        self.stock = [Stock::default(); MAX_STOCK];
        true
    }

    /// The castle is raised by its builder over time rather than from
    /// materials. Returns true when it is finished.
    pub fn advance_castle(&mut self, delta: u32) -> bool {
        self.progress += delta;
        if self.progress < 0x10000 {
            return false;
        }
        self.progress = 0;
        self.constructing = false;
        self.main_serf = None;
        true
    }

    /// Construction material delivered and consumed by the builder.
    pub fn use_construction_material(&mut self, slot: usize) -> bool {
        let Some(stock) = self.stock.get_mut(slot) else {
            return false;
        };
        if stock.available == 0 {
            return false;
        }
        stock.available -= 1;
        stock.maximum = stock.maximum.saturating_sub(1);
        true
    }

    /// Planks and stone still missing from the site.
    pub fn materials_missing(&self) -> (u32, u32) {
        (self.stock[0].maximum, self.stock[1].maximum)
    }

    /// Shift the mining history. Returns true when the history just ran
    /// out of successes, meaning the mine came up empty eight times.
    pub fn increase_mining(&mut self, found: bool) -> bool {
        self.active = true;
        let empty = self.progress == 0x8000;
        self.progress = (self.progress << 1) & 0xffff;
        if found {
            self.progress += 1;
        }
        empty
    }

    // ── Stock slots ─────────────────────────────────────────────────────

    pub fn stock(&self, slot: usize) -> Option<&Stock> {
        self.stock.get(slot)
    }

    pub fn stocks(&self) -> &[Stock; MAX_STOCK] {
        &self.stock
    }

    pub fn stock_init(&mut self, slot: usize, res: Option<Resource>, maximum: u32) {
        if let Some(stock) = self.stock.get_mut(slot) {
            stock.res = res;
            stock.prio = 0;
            stock.maximum = maximum;
            stock.available = stock.available.min(maximum);
            stock.requested = stock.requested.min(maximum - stock.available);
        }
    }

    /// Set up the input slots once the worker has moved in.
    pub fn init_production_stocks(&mut self) {
        for (slot, def) in self.btype.production_stocks().into_iter().enumerate() {
            if let Some((res, max)) = def {
                self.stock_init(slot, Some(res), max);
            }
        }
    }

    pub fn stock_count(&self, slot: usize) -> u32 {
        self.stock.get(slot).map_or(0, |s| s.available)
    }

    /// Clear available and requested counts, keeping the slot types.
    pub fn remove_stock(&mut self) {
        for stock in self.stock.iter_mut() {
            stock.available = 0;
            stock.requested = 0;
        }
    }

    /// Whether a slot would accept `res` now.
    pub fn wants_resource(&self, res: Resource) -> bool {
        self.stock.iter().any(|s| s.accepts(res) && !s.is_full())
    }

    /// Highest slot priority for `res` at or above `minimum`.
    pub fn max_priority_for_resource(&self, res: Resource, minimum: u8) -> Option<u8> {
        self.stock
            .iter()
            .filter(|s| s.res == Some(res) && s.prio >= minimum)
            .map(|s| s.prio)
            .max()
    }

    /// Note a resource dispatched toward this building. With
    /// `fix_priority` the slot keeps half of an odd priority so the same
    /// round may pick it again.
    pub fn add_requested_resource(&mut self, res: Resource, fix_priority: bool) -> bool {
        let Some(stock) = self.stock.iter_mut().find(|s| s.res == Some(res)) else {
            return false;
        };
        stock.prio = if fix_priority && stock.prio & 1 == 1 {
            stock.prio >> 1
        } else {
            0
        };
        stock.requested += 1;
        true
    }

    /// A resource headed here was lost or redirected.
    pub fn cancel_transported_resource(&mut self, res: Resource) -> GameResult<()> {
        let slot = self.stock.iter().position(|s| s.accepts(res));
        match slot {
            Some(i) if self.stock[i].requested > 0 => {
                self.stock[i].requested -= 1;
                Ok(())
            }
            Some(_) => Err(GameError::RequestUnderflow {
                building: self.index,
                resource: res,
            }),
            None => Ok(()),
        }
    }

    /// A requested resource arrived at a building without an inventory.
    /// Food is taken by a food slot; a surplus delivery is dropped.
    pub fn requested_resource_delivered(&mut self, res: Resource) -> GameResult<()> {
        if self.burning {
            return Ok(());
        }
        for stock in self.stock.iter_mut() {
            if stock.res == Some(Resource::GroupFood) && res.is_food() {
                stock.requested = stock.requested.saturating_sub(1);
                if stock.total() < stock.maximum {
                    stock.available += 1;
                }
                return Ok(());
            }
            if stock.res == Some(res) {
                if stock.requested > 0 {
                    stock.available += 1;
                    stock.requested -= 1;
                } else {
                    log::debug!("{} got more {:?} than it requested", self.index, res);
                }
                return Ok(());
            }
        }
        Err(GameError::UnexpectedResource {
            building: self.index,
            resource: res,
        })
    }

    pub fn decrease_requested_for_stock(&mut self, slot: usize) {
        if let Some(stock) = self.stock.get_mut(slot) {
            stock.requested = stock.requested.saturating_sub(1);
        }
    }

    pub fn use_resource_in_stock(&mut self, slot: usize) -> bool {
        match self.stock.get_mut(slot) {
            Some(stock) if stock.available > 0 => {
                stock.available -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn use_resources_in_stocks(&mut self) -> bool {
        if self.stock[0].available > 0 && self.stock[1].available > 0 {
            self.stock[0].available -= 1;
            self.stock[1].available -= 1;
            true
        } else {
            false
        }
    }

    /// Gold bars stored in a military building.
    pub fn military_gold_count(&self) -> u32 {
        if !self.btype.is_garrison() {
            return 0;
        }
        self.stock
            .iter()
            .filter(|s| s.res == Some(Resource::GoldBar))
            .map(|s| s.available)
            .sum()
    }

    // ── Priorities ──────────────────────────────────────────────────────

    /// Recompute pull priorities of an unfinished building. Material for
    /// a site without a builder is requested at a quarter priority.
    pub fn update_construction_priorities(&mut self, planks_construction: u32) {
        let holder = self.holder;
        let scale = |prio: u8| -> u8 {
            let prio = if holder { prio } else { prio >> 2 };
            prio & !1
        };
        let planks = &mut self.stock[0];
        planks.prio = if planks.is_full() {
            0
        } else {
            scale(planks.prio_from_slider(planks_construction))
        };
        let stone = &mut self.stock[1];
        stone.prio = if stone.is_full() {
            0
        } else {
            scale(stone.prio_from_fill())
        };
    }

    /// Recompute pull priorities of a finished production building.
    pub fn update_production_priorities(&mut self, prio: &DistributionPriorities) {
        if !self.holder {
            return;
        }
        use BuildingType::*;
        let [s0, s1] = &mut self.stock;
        match self.btype {
            Boatbuilder => s0.prio = s0.prio_from_slider(prio.planks_boatbuilder),
            StoneMine => s0.prio = s0.prio_from_slider(prio.food_stonemine),
            CoalMine => s0.prio = s0.prio_from_slider(prio.food_coalmine),
            IronMine => s0.prio = s0.prio_from_slider(prio.food_ironmine),
            GoldMine => s0.prio = s0.prio_from_slider(prio.food_goldmine),
            Butcher | Baker => s0.prio = s0.prio_from_fill(),
            PigFarm => s0.prio = s0.prio_from_slider(prio.wheat_pigfarm),
            Mill => s0.prio = s0.prio_from_slider(prio.wheat_mill),
            Sawmill => s1.prio = s1.prio_from_fill(),
            SteelSmelter => {
                s0.prio = s0.prio_from_slider(prio.coal_steelsmelter);
                s1.prio = s1.prio_from_fill();
            }
            ToolMaker => {
                s0.prio = s0.prio_from_slider(prio.planks_toolmaker);
                s1.prio = s1.prio_from_slider(prio.steel_toolmaker);
            }
            WeaponSmith => {
                s0.prio = s0.prio_from_slider(prio.coal_weaponsmith);
                s1.prio = s1.prio_from_slider(prio.steel_weaponsmith);
            }
            GoldSmelter => {
                s0.prio = s0.prio_from_slider(prio.coal_goldsmelter);
                s1.prio = s1.prio_from_fill();
            }
            _ => {}
        }
    }

    /// Gold priority of a military building, capped by its type maximum.
    pub fn update_gold_priority(&mut self) {
        if !self.holder {
            return;
        }
        let max_gold = self.btype.max_gold();
        let gold = &mut self.stock[1];
        gold.prio = if gold.total() < max_gold {
            ((shift_right(0xfe, gold.total()) + 1) & 0xfe) as u8
        } else {
            0
        };
    }

    // ── Garrison ────────────────────────────────────────────────────────

    pub fn knights_present(&self) -> u32 {
        self.knights_present
    }

    pub fn knights_requested(&self) -> u32 {
        self.knights_requested
    }

    pub fn has_knight(&self) -> bool {
        self.first_knight.is_some()
    }

    pub fn knight_total(&self) -> u32 {
        self.knights_present + self.knights_requested
    }

    pub fn is_enough_place_for_knight(&self) -> bool {
        self.knight_total() < self.btype.knight_capacity()
    }

    /// A knight was assigned and is walking here.
    pub fn knight_request_granted(&mut self) {
        self.knights_requested += 1;
        self.serf_requested = false;
    }

    pub fn requested_knight_arrived(&mut self) {
        self.knights_present += 1;
        self.knights_requested = self.knights_requested.saturating_sub(1);
    }

    /// A knight walking here was turned away or defeated on the way.
    pub fn requested_knight_lost(&mut self) {
        self.knights_requested = self.knights_requested.saturating_sub(1);
    }

    /// Head of the knight chain changes; the chain itself lives on serfs.
    pub fn set_first_knight(&mut self, serf: Option<SerfId>) {
        self.first_knight = serf;
    }

    /// A knight left the building to defend its flag. It will come back
    /// and is counted as requested meanwhile.
    pub fn defender_called_out(&mut self) {
        self.knights_present = self.knights_present.saturating_sub(1);
        self.knights_requested += 1;
    }

    /// A knight left the building to attack or was sent away.
    pub fn knight_left(&mut self) {
        self.knights_present = self.knights_present.saturating_sub(1);
    }

    /// A knight came back from a fight; false when there is no room.
    pub fn knight_come_back(&mut self) -> bool {
        if self.is_enough_place_for_knight() {
            self.knights_present += 1;
            true
        } else {
            false
        }
    }

    /// An attacker took over the building and walks in.
    pub fn knight_occupy(&mut self) {
        if self.has_knight() {
            self.knights_requested += 1;
        } else {
            self.knights_present = 0;
            self.knights_requested = 1;
        }
    }

    /// First knight moves in. Returns true when the building was not
    /// yet active and now starts guarding land.
    pub fn occupy_with_first_knight(&mut self, serf: SerfId) -> bool {
        self.first_knight = Some(serf);
        if self.active {
            return false;
        }
        self.active = true;
        self.stock_init(1, Some(Resource::GoldBar), self.btype.max_gold());
        true
    }

    // ── Burning ─────────────────────────────────────────────────────────

    /// Set the building on fire. Returns false when it already burns.
    pub fn start_burning(&mut self, tick: u32) -> bool {
        if self.burning {
            return false;
        }
        self.burning = true;
        self.burning_counter = BURNING_TICKS;
        self.burning_tick = tick as u16;
        self.remove_stock();
        if !self.is_done() || !matches!(self.btype, BuildingType::Castle | BuildingType::Stock) {
            self.active = false;
        }
        true
    }

    pub fn set_burning_counter(&mut self, counter: u16) {
        self.burning_counter = counter;
    }

    /// Count down the fire. Returns true when the ruin should be removed.
    pub fn update_burning(&mut self, tick: u32) -> bool {
        let delta = (tick as u16).wrapping_sub(self.burning_tick);
        self.burning_tick = tick as u16;
        if self.burning_counter >= delta {
            self.burning_counter -= delta;
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn building(btype: BuildingType) -> Building {
        Building::new(
            BuildingId::new(1).expect("non-zero"),
            btype,
            0,
            100,
            FlagId::new(1).expect("non-zero"),
        )
    }

    fn assert_slots_bounded(b: &Building) {
        for s in b.stocks() {
            assert!(s.available + s.requested <= s.maximum, "slot {:?}", s);
        }
    }

    #[test]
    fn test_type_numbering() {
        assert_eq!(BuildingType::Fisher.index(), 1);
        assert_eq!(BuildingType::Castle.index(), 24);
        assert_eq!(BuildingType::from_index(11), Some(BuildingType::Hut));
        assert_eq!(BuildingType::from_index(0), None);
        assert_eq!(BuildingType::GoldMine.mine_kind(), Some(3));
    }

    #[test]
    fn test_construction_slots() {
        let b = building(BuildingType::Fortress);
        assert_eq!(b.stock(0).map(|s| (s.res, s.maximum)), Some((Some(Resource::Plank), 5)));
        assert_eq!(b.stock(1).map(|s| (s.res, s.maximum)), Some((Some(Resource::Stone), 5)));
        assert!(b.is_leveling());
        assert!(!building(BuildingType::Hut).is_leveling());
    }

    #[test]
    fn test_build_progress_phases() {
        let mut b = building(BuildingType::Hut);
        let mut steps = 0;
        while !b.build_progress() {
            steps += 1;
        }
        // 4096 per step from 1: the 16th step passes 0xffff.
        assert_eq!(steps, 15);
        assert!(b.is_done());
        assert_eq!(b.stocks()[0].res, None);
    }

    #[test]
    fn test_requested_resource_delivery() {
        let mut b = building(BuildingType::Hut);
        assert!(b.add_requested_resource(Resource::Plank, false));
        b.requested_resource_delivered(Resource::Plank).expect("requested");
        assert_eq!(b.stock_count(0), 1);
        assert!(matches!(
            b.requested_resource_delivered(Resource::Fish),
            Err(GameError::UnexpectedResource { .. })
        ));
        assert_slots_bounded(&b);
    }

    #[test]
    fn test_food_slot_takes_any_food() {
        let mut b = building(BuildingType::CoalMine);
        while !b.build_progress() {}
        b.set_holder(true);
        b.init_production_stocks();
        assert!(b.add_requested_resource(Resource::GroupFood, false));
        b.requested_resource_delivered(Resource::Bread).expect("food");
        assert_eq!(b.stock_count(0), 1);
        assert_eq!(b.stocks()[0].requested, 0);
        assert!(matches!(
            b.cancel_transported_resource(Resource::Meat),
            Err(GameError::RequestUnderflow { .. })
        ));
        assert_slots_bounded(&b);
    }

    #[test]
    fn test_cancel_underflow_is_reported() {
        let mut b = building(BuildingType::Hut);
        assert!(matches!(
            b.cancel_transported_resource(Resource::Plank),
            Err(GameError::RequestUnderflow { .. })
        ));
    }

    #[test]
    fn test_priority_decays_with_fill() {
        let mut b = building(BuildingType::Mill);
        while !b.build_progress() {}
        b.set_holder(true);
        b.init_production_stocks();
        let prio = DistributionPriorities::default();
        b.update_production_priorities(&prio);
        assert_eq!(u32::from(b.stocks()[0].prio), prio.wheat_mill >> 8);
        for _ in 0..8 {
            assert!(b.add_requested_resource(Resource::Wheat, false));
        }
        b.update_production_priorities(&prio);
        assert_eq!(b.stocks()[0].prio, 0);
        assert_slots_bounded(&b);
    }

    #[test]
    fn test_unstaffed_site_quarter_priority() {
        let mut b = building(BuildingType::Hut);
        b.update_construction_priorities(65500);
        let without = b.stocks()[0].prio;
        b.set_holder(true);
        b.update_construction_priorities(65500);
        assert_eq!(b.stocks()[0].prio, ((65500u32 >> 8) as u8) & !1);
        assert_eq!(without, (((65500u32 >> 8) as u8) >> 2) & !1);
    }

    #[test]
    fn test_gold_priority_capped() {
        let mut b = building(BuildingType::Hut);
        while !b.build_progress() {}
        b.set_holder(true);
        assert!(b.occupy_with_first_knight(SerfId::new(9).expect("non-zero")));
        b.update_gold_priority();
        assert_eq!(b.stocks()[1].prio, 0xfe);
        assert!(b.add_requested_resource(Resource::GoldBar, false));
        assert!(b.add_requested_resource(Resource::GoldBar, false));
        b.update_gold_priority();
        assert_eq!(b.stocks()[1].prio, 0);
        assert_slots_bounded(&b);
    }

    #[test]
    fn test_knight_capacity() {
        let mut b = building(BuildingType::Hut);
        for _ in 0..3 {
            assert!(b.is_enough_place_for_knight());
            b.knight_request_granted();
        }
        assert!(!b.is_enough_place_for_knight());
        b.requested_knight_arrived();
        assert_eq!((b.knights_present(), b.knights_requested()), (1, 2));
        assert!(!b.knight_come_back());
    }

    #[test]
    fn test_occupation_tables() {
        assert_eq!(BuildingType::Hut.occupants_for_level(0), 1);
        assert_eq!(BuildingType::Hut.occupants_for_level(4), 3);
        assert_eq!(BuildingType::Fortress.occupants_for_level(9), 8);
        assert_eq!(BuildingType::Tower.occupants_for_level(42), 4);
    }

    #[test]
    fn test_mining_history() {
        let mut b = building(BuildingType::GoldMine);
        b.set_progress(0x8000);
        assert!(b.increase_mining(false));
        assert_eq!(b.progress(), 0);
        assert!(!b.increase_mining(true));
        assert_eq!(b.progress(), 1);
    }

    #[test]
    fn test_castle_raised_over_time() {
        let mut b = building(BuildingType::Castle);
        assert!(!b.advance_castle(0x8000));
        assert!(!b.is_done());
        assert!(b.advance_castle(0x8000));
        assert!(b.is_done());
        assert_eq!(b.main_serf(), None);
    }

    #[test]
    fn test_pig_count() {
        let mut b = building(BuildingType::PigFarm);
        b.set_work_count(1);
        b.place_new_pig();
        assert_eq!(b.pigs_count(), 2);
        b.send_pig_to_butcher();
        b.send_pig_to_butcher();
        b.send_pig_to_butcher();
        assert_eq!(b.pigs_count(), 0);
    }

    #[test]
    fn test_burning_countdown() {
        let mut b = building(BuildingType::Lumberjack);
        assert!(b.start_burning(100));
        assert!(!b.start_burning(101));
        assert!(!b.update_burning(100 + u32::from(BURNING_TICKS)));
        assert!(b.update_burning(101 + u32::from(BURNING_TICKS)));
    }
}
