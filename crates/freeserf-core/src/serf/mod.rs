//! Serfs: the per-unit state machine driving the whole economy.
//!
//! Every serf carries exactly one `SerfState`. Each variant owns the data
//! that is meaningful while the serf is in that state, so switching state
//! always replaces the payload as a whole. The handlers live in the
//! submodules and are `impl Game` blocks: a serf update reads and writes
//! flags, buildings, inventories and the map.
//!
//! During its update a serf is cloned out of the arena and written back
//! afterwards. Handlers that trigger world-wide hooks (which iterate over
//! every serf) store the working copy first with `with_serf_stored`.

mod free_walk;
mod knight;
mod lost;
mod production;
mod profession;
mod transport;
mod work;

pub use knight::{attacker_wins, fight_morale, HOME_LAND_FACTOR};
pub use profession::{SerfType, SERF_TYPE_COUNT};

use serde::{Deserialize, Serialize};

use crate::collection::{BuildingId, FlagId, InventoryId, SerfId};
use crate::error::GameResult;
use crate::game::Game;
use crate::map::{Direction, MapPos, Minerals};
use crate::resource::Resource;

// ── Animation timing ────────────────────────────────────────────────────

/// Ticks each animation takes to play. Indexed by animation number.
const COUNTER_FROM_ANIMATION: [i32; 181] = [
    // Walking, nine slopes per direction.
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    511, 447, 383, 319, 255, 319, 511, 767, 1023,
    // Waiting.
    127, 127, 127, 127, 127, 127,
    // Digging.
    383, 383,
    // Delivering.
    255, 223, 191, 159, 127, 159, 255, 383, 511,
    // Building.
    255, 255, 255, 0,
    767, 511, 511, 767,
    1023, 639, 639, 1023,
    // Idle on path.
    63, 63, 63, 63, 63, 63,
    // Production.
    1023, 31, 767, 767, 255,
    191, 127,
    1535,
    2367,
    383, 303, 303, 383,
    383, 383,
    767, 767, 127, 127,
    1471, 1983,
    383, 767, 383, 1535,
    783, 63,
    575, 1535,
    1407, 159,
    // Fighting.
    127, 127, 127, 127, 127, 127, 127, 127, 127, 127,
    127, 127, 127, 127, 127, 127, 127, 127, 127, 127,
    191, 7,
    255, 255, 255, 255, 255, 255, 255, 255, 255, 255,
    127, 7,
];

/// Ticks animation `anim` takes; unknown animations take none.
pub(crate) fn anim_counter(anim: i32) -> i32 {
    usize::try_from(anim)
        .ok()
        .and_then(|i| COUNTER_FROM_ANIMATION.get(i))
        .copied()
        .unwrap_or(0)
}

/// Walking animation for a step with the given height difference. Serfs
/// swapping places with a waiting serf use the side-stepping set.
pub(crate) fn walking_animation(h_diff: i32, dir: Direction, switch_pos: bool) -> i32 {
    let mut d = dir.index() as i32;
    if switch_pos && d < 3 {
        d += 6;
    }
    4 + h_diff.clamp(-4, 4) + 9 * d
}

/// Direction of a one-step column/row offset, if there is one.
pub(crate) fn one_step_dir(dist_col: i32, dist_row: i32) -> Option<Direction> {
    const DIR_FROM_OFFSET: [Option<Direction>; 9] = [
        Some(Direction::UpLeft),
        Some(Direction::Up),
        None,
        Some(Direction::Left),
        None,
        Some(Direction::Right),
        None,
        Some(Direction::Down),
        Some(Direction::DownRight),
    ];

    if dist_col.abs() > 1 || dist_row.abs() > 1 {
        return None;
    }
    DIR_FROM_OFFSET[((dist_col + 1) + 3 * (dist_row + 1)) as usize]
}

// ── State payloads ──────────────────────────────────────────────────────

/// What a serf walking along roads does once it reaches its flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalkTask {
    /// Enter the building at the destination flag as its worker.
    Enter,
    /// Walk back to the nearest inventory and enter it.
    ReturnHome,
    /// Take up transport on the road leaving the destination flag.
    Road(Direction),
    /// Start looking for mineral deposits around the destination.
    Geologist,
}

impl WalkTask {
    /// The walk ends by entering a building.
    pub fn is_building_bound(self) -> bool {
        matches!(self, WalkTask::Enter | WalkTask::ReturnHome)
    }
}

/// Last road step of a serf on the road network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// Arrived from this direction (pointing back along the road).
    From(Direction),
    /// Waiting to move in this direction.
    Blocked(Direction),
}

impl Step {
    pub fn dir(self) -> Direction {
        match self {
            Step::From(d) | Step::Blocked(d) => d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walk {
    pub task: WalkTask,
    pub dest: Option<FlagId>,
    pub step: Step,
    pub wait_counter: i32,
}

impl Walk {
    pub fn new(task: WalkTask, dest: Option<FlagId>) -> Self {
        Self {
            task,
            dest,
            step: Step::From(Direction::Right),
            wait_counter: 0,
        }
    }
}

/// A transporter on its road, possibly carrying a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carry {
    pub res: Option<Resource>,
    pub dest: Option<FlagId>,
    pub step: Step,
    /// Counts how long the transporter waited for a flag. Negative once
    /// the transporter was told to leave the road.
    pub wait_counter: i32,
}

/// Why a serf walks into a building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    /// Return into an inventory.
    Inventory,
    /// First arrival of the assigned worker or knight.
    Assigned,
    /// Back from outside work.
    Returning,
    /// A formerly lost serf retiring into any friendly building.
    Retire,
}

/// Off-road walk toward a column/row offset, with the edge-following
/// bookkeeping used to get around obstacles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FreeWalk {
    pub dist_col: i32,
    pub dist_row: i32,
    pub neg_dist_col: i32,
    pub neg_dist_row: i32,
    pub flags: i32,
}

impl FreeWalk {
    /// Marks a walk heading back to the building it started from.
    pub const RETURNING: i32 = -128;

    pub fn new(dist_col: i32, dist_row: i32, neg_dist_col: i32, neg_dist_row: i32) -> Self {
        Self {
            dist_col,
            dist_row,
            neg_dist_col,
            neg_dist_row,
            flags: 0,
        }
    }
}

/// Where a serf goes after stepping out of a building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exit {
    Walking { task: WalkTask, dest: Option<FlagId> },
    DropResourceOut { res: Resource, dest: Option<FlagId> },
    FreeWalking(FreeWalk),
    StoneCutterFreeWalking(FreeWalk),
    KnightFreeWalking(FreeWalk),
    KnightPrepareDefending,
    Scatter,
    Lost,
}

/// Attacker side of a fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fight {
    pub defender: Option<SerfId>,
    /// Position in the fight move sequence.
    pub move_index: usize,
    pub attacker_won: bool,
    /// Direction the attacker engaged a free-walking defender from.
    pub approach: Option<Direction>,
}

/// Defender side of a fight in the open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DefendFree {
    pub dist_col: i32,
    pub dist_row: i32,
    /// The attacker was itself free-walking when the fight started.
    pub attacker_was_free_walking: bool,
    pub other_dist_col: i32,
    pub other_dist_row: i32,
}

/// A knight that won a fight in the open, waiting for the loser to fall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictoryFree {
    /// Continue walking afterwards instead of looking for a flag.
    pub resume: bool,
    pub dist_col: i32,
    pub dist_row: i32,
    pub defender: Option<SerfId>,
}

/// A transporter parked on its road without work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlePath {
    /// Flag the transporter was walking toward.
    pub flag: FlagId,
    /// Direction of the road as seen from `flag`.
    pub rev_dir: Direction,
    /// Road step to resume with when woken.
    pub resume: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dig {
    pub h_index: i32,
    pub target_h: i32,
    pub dig_pos: i32,
    pub substate: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Construct {
    pub mode: i32,
    pub building: BuildingId,
    pub material_step: u32,
    pub counter: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mine {
    pub substate: i32,
    pub res: Option<Resource>,
    pub deposit: Minerals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Smelt {
    pub mode: i32,
    pub counter: i32,
    /// Smelting gold ore instead of iron ore.
    pub gold: bool,
}

/// The current state of a serf with its state-specific data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SerfState {
    Null,
    IdleInStock { inventory: InventoryId },
    Walking(Walk),
    Transporting(Carry),
    EnteringBuilding { entry: Entry, slope_len: i32 },
    LeavingBuilding { exit: Exit },
    ReadyToEnter { entry: Entry },
    ReadyToLeave { exit: Exit },
    Digging(Dig),
    Building(Construct),
    BuildingCastle { inventory: InventoryId },
    MoveResourceOut { res: Resource, dest: Option<FlagId> },
    WaitForResourceOut,
    DropResourceOut { res: Resource, dest: Option<FlagId> },
    Delivering(Carry),
    ReadyToLeaveInventory { exit: Exit, inventory: InventoryId },
    FreeWalking(FreeWalk),
    Logging(FreeWalk),
    PlanningLogging,
    PlanningPlanting,
    Planting(FreeWalk),
    PlanningStoneCutting,
    StoneCutterFreeWalking(FreeWalk),
    StoneCutting(FreeWalk),
    Sawing { mode: i32 },
    Lost { search_far_first: bool },
    LostSailor,
    FreeSailing(FreeWalk),
    EscapeBuilding,
    Mining(Mine),
    Smelting(Smelt),
    PlanningFishing,
    Fishing(FreeWalk),
    PlanningFarming,
    Farming(FreeWalk),
    Milling { mode: i32 },
    Baking { mode: i32 },
    PigFarming { mode: i32 },
    Butchering { mode: i32 },
    MakingWeapon { mode: i32 },
    MakingTool { mode: i32 },
    BuildingBoat { mode: i32 },
    LookingForGeoSpot,
    SamplingGeoSpot(FreeWalk),
    KnightEngagingBuilding(Fight),
    KnightPrepareAttacking(Fight),
    KnightLeaveForFight { exit: Exit },
    KnightPrepareDefending,
    KnightAttacking(Fight),
    KnightDefending,
    KnightAttackingVictory(Fight),
    KnightAttackingDefeat,
    KnightOccupyEnemyBuilding,
    KnightFreeWalking(FreeWalk),
    KnightEngageDefendingFree(DefendFree),
    KnightEngageAttackingFree(Fight),
    KnightEngageAttackingFreeJoin(Fight),
    KnightPrepareAttackingFree(Fight),
    KnightPrepareDefendingFree(DefendFree),
    KnightPrepareDefendingFreeWait(DefendFree),
    KnightAttackingFree(Fight),
    KnightDefendingFree(DefendFree),
    KnightAttackingVictoryFree(VictoryFree),
    KnightDefendingVictoryFree(DefendFree),
    KnightAttackingDefeatFree(Fight),
    KnightAttackingFreeWait(FreeWalk),
    KnightLeaveForWalkToFight(FreeWalk),
    IdleOnPath(IdlePath),
    WaitIdleOnPath(IdlePath),
    WakeAtFlag(IdlePath),
    WakeOnPath(IdlePath),
    DefendingHut { next_knight: Option<SerfId> },
    DefendingTower { next_knight: Option<SerfId> },
    DefendingFortress { next_knight: Option<SerfId> },
    DefendingCastle { next_knight: Option<SerfId> },
    Scatter,
    FinishedBuilding,
}

impl SerfState {
    pub fn name(&self) -> &'static str {
        use SerfState::*;
        match self {
            Null => "null",
            IdleInStock { .. } => "idle in stock",
            Walking(_) => "walking",
            Transporting(_) => "transporting",
            EnteringBuilding { .. } => "entering building",
            LeavingBuilding { .. } => "leaving building",
            ReadyToEnter { .. } => "ready to enter",
            ReadyToLeave { .. } => "ready to leave",
            Digging(_) => "digging",
            Building(_) => "building",
            BuildingCastle { .. } => "building castle",
            MoveResourceOut { .. } => "move resource out",
            WaitForResourceOut => "wait for resource out",
            DropResourceOut { .. } => "drop resource out",
            Delivering(_) => "delivering",
            ReadyToLeaveInventory { .. } => "ready to leave inventory",
            FreeWalking(_) => "free walking",
            Logging(_) => "logging",
            PlanningLogging => "planning logging",
            PlanningPlanting => "planning planting",
            Planting(_) => "planting",
            PlanningStoneCutting => "planning stonecutting",
            StoneCutterFreeWalking(_) => "stonecutter free walking",
            StoneCutting(_) => "stonecutting",
            Sawing { .. } => "sawing",
            Lost { .. } => "lost",
            LostSailor => "lost sailor",
            FreeSailing(_) => "free sailing",
            EscapeBuilding => "escape building",
            Mining(_) => "mining",
            Smelting(_) => "smelting",
            PlanningFishing => "planning fishing",
            Fishing(_) => "fishing",
            PlanningFarming => "planning farming",
            Farming(_) => "farming",
            Milling { .. } => "milling",
            Baking { .. } => "baking",
            PigFarming { .. } => "pigfarming",
            Butchering { .. } => "butchering",
            MakingWeapon { .. } => "making weapon",
            MakingTool { .. } => "making tool",
            BuildingBoat { .. } => "building boat",
            LookingForGeoSpot => "looking for geo spot",
            SamplingGeoSpot(_) => "sampling geo spot",
            KnightEngagingBuilding(_) => "knight engaging building",
            KnightPrepareAttacking(_) => "knight prepare attacking",
            KnightLeaveForFight { .. } => "knight leave for fight",
            KnightPrepareDefending => "knight prepare defending",
            KnightAttacking(_) => "knight attacking",
            KnightDefending => "knight defending",
            KnightAttackingVictory(_) => "knight attacking victory",
            KnightAttackingDefeat => "knight attacking defeat",
            KnightOccupyEnemyBuilding => "knight occupy enemy building",
            KnightFreeWalking(_) => "knight free walking",
            KnightEngageDefendingFree(_) => "knight engage defending free",
            KnightEngageAttackingFree(_) => "knight engage attacking free",
            KnightEngageAttackingFreeJoin(_) => "knight engage attacking free join",
            KnightPrepareAttackingFree(_) => "knight prepare attacking free",
            KnightPrepareDefendingFree(_) => "knight prepare defending free",
            KnightPrepareDefendingFreeWait(_) => "knight prepare defending free wait",
            KnightAttackingFree(_) => "knight attacking free",
            KnightDefendingFree(_) => "knight defending free",
            KnightAttackingVictoryFree(_) => "knight attacking victory free",
            KnightDefendingVictoryFree(_) => "knight defending victory free",
            KnightAttackingDefeatFree(_) => "knight attacking defeat free",
            KnightAttackingFreeWait(_) => "knight attacking free wait",
            KnightLeaveForWalkToFight(_) => "knight leave for walk to fight",
            IdleOnPath(_) => "idle on path",
            WaitIdleOnPath(_) => "wait idle on path",
            WakeAtFlag(_) => "wake at flag",
            WakeOnPath(_) => "wake on path",
            DefendingHut { .. } => "defending hut",
            DefendingTower { .. } => "defending tower",
            DefendingFortress { .. } => "defending fortress",
            DefendingCastle { .. } => "defending castle",
            Scatter => "scatter",
            FinishedBuilding => "finished building",
        }
    }

    /// Next knight in a building's garrison chain.
    pub fn next_knight(&self) -> Option<SerfId> {
        match *self {
            SerfState::DefendingHut { next_knight }
            | SerfState::DefendingTower { next_knight }
            | SerfState::DefendingFortress { next_knight }
            | SerfState::DefendingCastle { next_knight } => next_knight,
            _ => None,
        }
    }

    fn set_next_knight(&mut self, next: Option<SerfId>) -> bool {
        match self {
            SerfState::DefendingHut { next_knight }
            | SerfState::DefendingTower { next_knight }
            | SerfState::DefendingFortress { next_knight }
            | SerfState::DefendingCastle { next_knight } => {
                *next_knight = next;
                true
            }
            _ => false,
        }
    }

    /// Free-walk data of the states that walk off-road and can be asked
    /// to swap places.
    fn swappable_free_walk(&mut self) -> Option<&mut FreeWalk> {
        match self {
            SerfState::FreeWalking(fw)
            | SerfState::KnightFreeWalking(fw)
            | SerfState::StoneCutterFreeWalking(fw) => Some(fw),
            _ => None,
        }
    }
}

/// Garrison state for a knight living in a military building.
pub(crate) fn defending_state(btype: crate::building::BuildingType, next_knight: Option<SerfId>) -> SerfState {
    use crate::building::BuildingType;
    match btype {
        BuildingType::Hut => SerfState::DefendingHut { next_knight },
        BuildingType::Tower => SerfState::DefendingTower { next_knight },
        BuildingType::Fortress => SerfState::DefendingFortress { next_knight },
        _ => SerfState::DefendingCastle { next_knight },
    }
}

/// Whether `exit` sends the serf walking to `dest` with the road task `dir`.
fn exit_walks_road(exit: &Exit, dest: FlagId, dir: Direction) -> bool {
    matches!(exit, Exit::Walking { task: WalkTask::Road(d), dest: Some(f) } if *f == dest && *d == dir)
}

/// Turn a walk bound for a vanished destination into a walk home.
fn send_home(task: &mut WalkTask, dest: &mut Option<FlagId>) {
    *task = WalkTask::ReturnHome;
    *dest = None;
}

// ── Serf ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Serf {
    pub(crate) index: SerfId,
    pub(crate) owner: u8,
    pub(crate) serf_type: SerfType,
    pub(crate) pos: MapPos,
    pub(crate) animation: i32,
    pub(crate) counter: i32,
    pub(crate) tick: u16,
    /// Set once the serf has been lost; such generics may retire into
    /// any friendly building.
    pub(crate) was_lost: bool,
    pub(crate) state: SerfState,
}

impl Serf {
    /// A serf of no particular type yet; the caller sets the type so that
    /// player statistics are kept.
    pub fn new(index: SerfId, owner: u8, pos: MapPos, tick: u16) -> Self {
        Self {
            index,
            owner,
            serf_type: SerfType::Dead,
            pos,
            animation: 0,
            counter: 0,
            tick,
            was_lost: false,
            state: SerfState::Null,
        }
    }

    pub fn index(&self) -> SerfId {
        self.index
    }

    pub fn owner(&self) -> u8 {
        self.owner
    }

    pub fn serf_type(&self) -> SerfType {
        self.serf_type
    }

    pub fn pos(&self) -> MapPos {
        self.pos
    }

    pub fn state(&self) -> &SerfState {
        &self.state
    }

    pub fn animation(&self) -> i32 {
        self.animation
    }

    pub fn counter(&self) -> i32 {
        self.counter
    }

    pub fn was_lost(&self) -> bool {
        self.was_lost
    }

    pub fn is_knight(&self) -> bool {
        self.serf_type.is_knight()
    }

    pub(crate) fn set_state(&mut self, state: SerfState) {
        log::trace!(
            "serf {} ({}): state {} -> {}",
            self.index,
            self.serf_type,
            self.state.name(),
            state.name()
        );
        self.state = state;
    }

    pub(crate) fn set_lost(&mut self) {
        self.set_state(SerfState::Lost {
            search_far_first: false,
        });
    }

    // ── Road step bookkeeping ───────────────────────────────────────────

    pub(crate) fn step(&self) -> Option<Step> {
        match &self.state {
            SerfState::Walking(w) => Some(w.step),
            SerfState::Transporting(c) | SerfState::Delivering(c) => Some(c.step),
            _ => None,
        }
    }

    pub(crate) fn set_step(&mut self, step: Step) {
        match &mut self.state {
            SerfState::Walking(w) => w.step = step,
            SerfState::Transporting(c) | SerfState::Delivering(c) => c.step = step,
            _ => {}
        }
    }

    pub(crate) fn set_wait_counter(&mut self, value: i32) {
        match &mut self.state {
            SerfState::Walking(w) => w.wait_counter = value,
            SerfState::Transporting(c) | SerfState::Delivering(c) => c.wait_counter = value,
            _ => {}
        }
    }

    /// Resource in the serf's hands, if any.
    pub fn carried_resource(&self) -> Option<Resource> {
        match &self.state {
            SerfState::Transporting(c) | SerfState::Delivering(c) => c.res,
            SerfState::MoveResourceOut { res, .. } | SerfState::DropResourceOut { res, .. } => Some(*res),
            SerfState::LeavingBuilding {
                exit: Exit::DropResourceOut { res, .. },
            } => Some(*res),
            _ => None,
        }
    }

    /// Whether the serf waits for a tile to clear. The inner value is the
    /// direction it wants to move in, when known.
    pub(crate) fn is_waiting(&self) -> Option<Option<Direction>> {
        match &self.state {
            SerfState::Walking(Walk {
                step: Step::Blocked(d), ..
            })
            | SerfState::Transporting(Carry {
                step: Step::Blocked(d), ..
            })
            | SerfState::Delivering(Carry {
                step: Step::Blocked(d), ..
            }) => Some(Some(*d)),
            SerfState::FreeWalking(fw)
            | SerfState::KnightFreeWalking(fw)
            | SerfState::StoneCutterFreeWalking(fw)
                if self.animation == 82 =>
            {
                Some(one_step_dir(fw.dist_col, fw.dist_row))
            }
            SerfState::Digging(dig) if dig.substate < 0 => {
                let dir = if dig.dig_pos == 0 {
                    Direction::Up
                } else {
                    Direction::from_index(6 - dig.dig_pos).unwrap_or(Direction::Up)
                };
                Some(Some(dir))
            }
            _ => None,
        }
    }

    /// Ask a waiting serf to move `dir` by swapping places with the serf
    /// standing there. Returns false when the serf refuses.
    pub(crate) fn switch_waiting(&mut self, dir: Direction) -> bool {
        if matches!(self.step(), Some(Step::Blocked(_))) {
            self.set_step(Step::From(dir.reverse()));
            return true;
        }
        if self.animation != 82 {
            return false;
        }
        let Some(fw) = self.state.swappable_free_walk() else {
            return false;
        };
        let (dx, dy) = dir.offset();
        fw.dist_col -= dx;
        fw.dist_row -= dy;
        if fw.dist_col == 0 && fw.dist_row == 0 {
            fw.flags = 1 << 3;
        }
        true
    }

    // ── Hooks called when the road network changes ──────────────────────

    /// The flag `flag` stopped being a transport destination.
    pub(crate) fn reset_transport(&mut self, flag: FlagId) {
        match &mut self.state {
            SerfState::Walking(w) if w.dest == Some(flag) && w.task.is_building_bound() => {
                send_home(&mut w.task, &mut w.dest);
            }
            SerfState::ReadyToLeaveInventory {
                exit: Exit::Walking { task, dest },
                ..
            } if *dest == Some(flag) && task.is_building_bound() => {
                send_home(task, dest);
            }
            SerfState::LeavingBuilding {
                exit: Exit::Walking { task, dest },
            }
            | SerfState::ReadyToLeave {
                exit: Exit::Walking { task, dest },
            } if *dest == Some(flag) && task.is_building_bound() => {
                send_home(task, dest);
            }
            SerfState::Transporting(c) if c.dest == Some(flag) => c.dest = None,
            SerfState::MoveResourceOut { dest, .. }
            | SerfState::DropResourceOut { dest, .. }
            | SerfState::LeavingBuilding {
                exit: Exit::DropResourceOut { dest, .. },
            } if *dest == Some(flag) => {
                *dest = None;
            }
            _ => {}
        }
    }

    /// A road was split by a new flag. Returns which half (0 or 1) the
    /// serf was assigned to, if it was heading for one of them.
    pub(crate) fn path_splited(
        &self,
        flag_1: FlagId,
        dir_1: Direction,
        flag_2: FlagId,
        dir_2: Direction,
    ) -> Option<usize> {
        let (task, dest) = match &self.state {
            SerfState::Walking(w) => (w.task, w.dest),
            SerfState::ReadyToLeaveInventory {
                exit: Exit::Walking { task, dest },
                ..
            }
            | SerfState::ReadyToLeave {
                exit: Exit::Walking { task, dest },
            }
            | SerfState::LeavingBuilding {
                exit: Exit::Walking { task, dest },
            } => (*task, *dest),
            _ => return None,
        };
        if dest == Some(flag_1) && task == WalkTask::Road(dir_1) {
            Some(0)
        } else if dest == Some(flag_2) && task == WalkTask::Road(dir_2) {
            Some(1)
        } else {
            None
        }
    }

    /// Whether the serf is on its way to serve the road `dir` at `dest`.
    pub(crate) fn is_related_to(&self, dest: FlagId, dir: Direction) -> bool {
        match &self.state {
            SerfState::Walking(w) => w.dest == Some(dest) && w.task == WalkTask::Road(dir),
            SerfState::ReadyToLeaveInventory { exit, .. }
            | SerfState::LeavingBuilding { exit }
            | SerfState::ReadyToLeave { exit } => exit_walks_road(exit, dest, dir),
            _ => false,
        }
    }

    /// The road the serf was heading for was removed.
    pub(crate) fn path_deleted(&mut self, dest: FlagId, dir: Direction) {
        match &mut self.state {
            SerfState::Walking(w) if w.dest == Some(dest) && w.task == WalkTask::Road(dir) => {
                send_home(&mut w.task, &mut w.dest);
            }
            SerfState::ReadyToLeaveInventory {
                exit: Exit::Walking { task, dest: d },
                ..
            }
            | SerfState::LeavingBuilding {
                exit: Exit::Walking { task, dest: d },
            }
            | SerfState::ReadyToLeave {
                exit: Exit::Walking { task, dest: d },
            } if *d == Some(dest) && *task == WalkTask::Road(dir) => {
                send_home(task, d);
            }
            _ => {}
        }
    }

    /// Two roads at `flag` were merged into one.
    pub(crate) fn path_merged(&mut self, flag: FlagId) {
        match &mut self.state {
            SerfState::Walking(w) if w.dest == Some(flag) => send_home(&mut w.task, &mut w.dest),
            SerfState::ReadyToLeaveInventory {
                exit: Exit::Walking { task, dest },
                ..
            }
            | SerfState::LeavingBuilding {
                exit: Exit::Walking { task, dest },
            }
            | SerfState::ReadyToLeave {
                exit: Exit::Walking { task, dest },
            } if *dest == Some(flag) => send_home(task, dest),
            _ => {}
        }
    }

    /// Roads `dir_1` at `flag_1` and `dir_2` at `flag_2` became one road.
    pub(crate) fn path_merged2(&mut self, flag_1: FlagId, dir_1: Direction, flag_2: FlagId, dir_2: Direction) {
        let related = self.is_related_to(flag_1, dir_1) || self.is_related_to(flag_2, dir_2);
        if !related {
            return;
        }
        match &mut self.state {
            SerfState::Walking(w) => send_home(&mut w.task, &mut w.dest),
            SerfState::ReadyToLeaveInventory {
                exit: Exit::Walking { task, dest },
                ..
            }
            | SerfState::LeavingBuilding {
                exit: Exit::Walking { task, dest },
            }
            | SerfState::ReadyToLeave {
                exit: Exit::Walking { task, dest },
            } => send_home(task, dest),
            _ => {}
        }
    }

    /// A building-bound destination flag is gone.
    pub(crate) fn clear_destination(&mut self, dest: FlagId) {
        self.reset_building_bound(dest);
    }

    fn reset_building_bound(&mut self, flag: FlagId) {
        match &mut self.state {
            SerfState::Walking(w) if w.dest == Some(flag) && w.task.is_building_bound() => {
                send_home(&mut w.task, &mut w.dest);
            }
            SerfState::ReadyToLeaveInventory {
                exit: Exit::Walking { task, dest },
                ..
            }
            | SerfState::LeavingBuilding {
                exit: Exit::Walking { task, dest },
            }
            | SerfState::ReadyToLeave {
                exit: Exit::Walking { task, dest },
            } if *dest == Some(flag) && task.is_building_bound() => {
                send_home(task, dest);
            }
            _ => {}
        }
    }

    /// A resource destination flag is gone.
    pub(crate) fn clear_destination2(&mut self, flag: FlagId) {
        match &mut self.state {
            SerfState::Transporting(c) if c.dest == Some(flag) => c.dest = None,
            SerfState::DropResourceOut { dest, .. }
            | SerfState::MoveResourceOut { dest, .. }
            | SerfState::LeavingBuilding {
                exit: Exit::DropResourceOut { dest, .. },
            } if *dest == Some(flag) => {
                *dest = None;
            }
            _ => {}
        }
    }

    /// A flag was demolished; `flag_pos_paths` are the roads left at its
    /// position.
    pub(crate) fn flag_deleted(&mut self, flag_pos_paths: u8) {
        match &mut self.state {
            SerfState::ReadyToLeave { exit } | SerfState::LeavingBuilding { exit } => {
                *exit = Exit::Lost;
            }
            _ => {
                let stranded = matches!(self.state, SerfState::FinishedBuilding | SerfState::Walking(_));
                if stranded && flag_pos_paths == 0 {
                    self.set_lost();
                }
            }
        }
    }

    /// Force a parked transporter at `pos` into another idle state.
    /// Returns true when the serf was parked there.
    pub(crate) fn change_transporter_state_at_pos(&mut self, pos: MapPos, state: SerfState) -> bool {
        let idle = matches!(
            self.state,
            SerfState::WakeAtFlag(_)
                | SerfState::WakeOnPath(_)
                | SerfState::WaitIdleOnPath(_)
                | SerfState::IdleOnPath(_)
        );
        if self.pos == pos && idle {
            self.set_state(state);
            true
        } else {
            false
        }
    }

    /// A parked transporter at `pos` is told to wake at the flag.
    pub(crate) fn idle_to_wait_state(&mut self, pos: MapPos) -> bool {
        if self.pos != pos {
            return false;
        }
        let path = match self.state {
            SerfState::IdleOnPath(p)
            | SerfState::WaitIdleOnPath(p)
            | SerfState::WakeAtFlag(p)
            | SerfState::WakeOnPath(p) => p,
            _ => return false,
        };
        self.set_state(SerfState::WakeAtFlag(path));
        true
    }

    /// Send the serf out of an inventory toward `dest`.
    pub(crate) fn go_out_from_inventory(&mut self, inventory: InventoryId, dest: Option<FlagId>, task: WalkTask) {
        self.set_state(SerfState::ReadyToLeaveInventory {
            exit: Exit::Walking { task, dest },
            inventory,
        });
    }

    /// Send a knight in a building out toward an enemy at the given offset.
    pub(crate) fn send_off_to_fight(&mut self, dist_col: i32, dist_row: i32) {
        self.set_state(SerfState::KnightLeaveForWalkToFight(FreeWalk::new(dist_col, dist_row, 0, 0)));
    }

    pub(crate) fn stay_idle_in_stock(&mut self, inventory: InventoryId) {
        self.set_state(SerfState::IdleInStock { inventory });
    }

    /// Leave the current building and walk along the roads.
    pub(crate) fn go_out_from_building(&mut self, dest: Option<FlagId>, task: WalkTask) {
        self.set_state(SerfState::ReadyToLeave {
            exit: Exit::Walking { task, dest },
        });
    }

    /// Point this knight's chain at `next`.
    pub(crate) fn insert_before(&mut self, next: Option<SerfId>) {
        self.state.set_next_knight(next);
    }
}

// ── Game-side serf helpers ──────────────────────────────────────────────

impl Game {
    /// Store the working copy of a serf in the arena while `op` runs, then
    /// reload it. Used around operations that iterate over all serfs.
    pub(crate) fn with_serf_stored<R>(&mut self, s: &mut Serf, op: impl FnOnce(&mut Self) -> R) -> R {
        if let Some(slot) = self.serfs.get_mut(s.index) {
            *slot = s.clone();
        }
        let result = op(self);
        if let Some(slot) = self.serfs.get(s.index) {
            *s = slot.clone();
        }
        result
    }

    /// Consume the ticks elapsed since the serf last counted.
    pub(crate) fn elapse(&self, s: &mut Serf) {
        let now = self.tick16();
        let delta = now.wrapping_sub(s.tick);
        s.tick = now;
        s.counter -= i32::from(delta);
    }

    /// Change the type of a serf, keeping player statistics in step.
    pub(crate) fn set_serf_type(&mut self, s: &mut Serf, ty: SerfType) {
        let old = s.serf_type;
        if old == ty {
            return;
        }
        s.serf_type = ty;
        if let Some(player) = self.players.get_mut(usize::from(s.owner)) {
            if old != SerfType::Dead {
                player.decrease_serf_count(old);
            }
            if ty != SerfType::Dead {
                player.increase_serf_count(ty);
            }
            if let Some(level) = old.knight_level() {
                player.decrease_military_score(1 << level);
            }
            if let Some(level) = ty.knight_level() {
                player.increase_military_score(1 << level);
            }
        }
        if ty == SerfType::Transporter {
            s.counter = 0;
        }
    }

    /// Create a serf standing at `pos`. The serf is not placed on the map.
    pub(crate) fn create_serf(&mut self, owner: u8, ty: SerfType, pos: MapPos) -> SerfId {
        let tick = self.tick16();
        let id = self.serfs.allocate_with(|id| Serf::new(id, owner, pos, tick));
        if let Some(mut serf) = self.serfs.get(id).cloned() {
            self.set_serf_type(&mut serf, ty);
            if let Some(slot) = self.serfs.get_mut(id) {
                *slot = serf;
            }
        }
        id
    }

    pub(crate) fn delete_serf(&mut self, id: SerfId) {
        if self.serfs.erase(id).is_some() {
            log::trace!("serf {} deleted", id);
        }
    }

    /// Move one step, playing the walking animation scaled by `slope`.
    /// With `change_pos` the map occupancy follows the serf.
    pub(crate) fn start_walking(&mut self, s: &mut Serf, dir: Direction, slope: i32, change_pos: bool) {
        let new_pos = self.map.move_pos(s.pos, dir);
        s.animation = walking_animation(self.map.height(new_pos) - self.map.height(s.pos), dir, false);
        s.counter += (slope * anim_counter(s.animation)) >> 5;
        if change_pos {
            self.map.set_serf(s.pos, None);
            self.map.set_serf(new_pos, Some(s.index));
        }
        s.pos = new_pos;
    }

    fn entrance_slope_at(&self, building_pos: MapPos) -> Option<(i32, bool)> {
        let id = self.map.building_at(building_pos)?;
        let building = self.buildings.get(id)?;
        Some((building.btype().entrance_slope(), building.is_done()))
    }

    /// Walk up-left into the building in front of the serf. With
    /// `join_pos` the serf comes from a shared position and the tile it
    /// leaves keeps its occupant.
    pub(crate) fn enter_building(&mut self, s: &mut Serf, entry: Entry, join_pos: bool) {
        s.set_state(SerfState::EnteringBuilding { entry, slope_len: 0 });
        self.start_walking(s, Direction::UpLeft, 32, !join_pos);
        if join_pos {
            self.map.set_serf(s.pos, Some(s.index));
        }
        let slope = match self.entrance_slope_at(s.pos) {
            Some((slope, true)) => slope,
            _ => crate::building::UNFINISHED_ENTRANCE_SLOPE,
        };
        s.state = SerfState::EnteringBuilding {
            entry,
            slope_len: (slope * s.counter) >> 5,
        };
    }

    /// Walk down-right out of the current building toward its flag. The
    /// caller sets the exit in the new state.
    pub(crate) fn leave_building(&mut self, s: &mut Serf, exit: Exit, join_pos: bool) {
        let slope = match self.entrance_slope_at(s.pos) {
            Some((slope, true)) => 31 - slope,
            _ => 30,
        };
        if join_pos {
            self.map.set_serf(s.pos, None);
        }
        self.start_walking(s, Direction::DownRight, slope, !join_pos);
        s.set_state(SerfState::LeavingBuilding { exit });
    }

    /// Put a serf into the lost state, undoing any pending request it was
    /// fulfilling.
    pub(crate) fn set_lost_state(&mut self, s: &mut Serf) -> GameResult<()> {
        match s.state {
            SerfState::Walking(w) => {
                match (w.task, w.dest) {
                    (WalkTask::Road(dir), Some(dest)) => self.cancel_road_request(dest, dir),
                    (WalkTask::Enter, Some(dest)) => {
                        if let Some(building) = self
                            .flags
                            .get(dest)
                            .and_then(|f| f.building())
                            .and_then(|b| self.buildings.get_mut(b))
                        {
                            building.requested_serf_lost();
                        }
                    }
                    _ => {}
                }
                s.set_lost();
            }
            SerfState::Transporting(c) | SerfState::Delivering(c) => {
                if let Some(res) = c.res {
                    self.cancel_transported_resource(res, c.dest)?;
                    self.lose_resource(res);
                }
                if s.serf_type == SerfType::Sailor {
                    s.set_state(SerfState::LostSailor);
                } else {
                    s.set_lost();
                }
            }
            _ => s.set_lost(),
        }
        Ok(())
    }

    /// Withdraw the transporter request for road `dir` at `flag` on both ends.
    pub(crate) fn cancel_road_request(&mut self, flag: FlagId, dir: Direction) {
        let Some(f) = self.flags.get_mut(flag) else {
            return;
        };
        f.cancel_serf_request(dir);
        let other = f.other_flag(dir).zip(f.other_end_dir(dir));
        if let Some((other, other_dir)) = other {
            if let Some(o) = self.flags.get_mut(other) {
                o.cancel_serf_request(other_dir);
            }
        }
    }

    /// Train a knight idling in an inventory. Returns true when it rose a
    /// rank.
    pub(crate) fn train_knight(&mut self, s: &mut Serf, p: i32) -> bool {
        self.elapse(s);
        while s.counter < 0 {
            if self.random_int() < p {
                let promoted = s.serf_type.promoted();
                self.set_serf_type(s, promoted);
                s.counter = 6000;
                return true;
            }
            s.counter += 6000;
        }
        false
    }

    /// Follow the garrison chain starting at `first` and unlink its last
    /// knight. Returns the last knight and the new chain head.
    pub(crate) fn extract_last_knight(&mut self, first: SerfId) -> (SerfId, Option<SerfId>) {
        let mut prev: Option<SerfId> = None;
        let mut current = first;
        let mut guard = 0;
        while let Some(next) = self.serfs.get(current).and_then(|k| k.state.next_knight()) {
            prev = Some(current);
            current = next;
            guard += 1;
            if guard > 1024 {
                break;
            }
        }
        match prev {
            Some(p) => {
                if let Some(k) = self.serfs.get_mut(p) {
                    k.state.set_next_knight(None);
                }
                (current, Some(first))
            }
            None => (current, None),
        }
    }

    /// Run one serf update.
    pub(crate) fn update_serf(&mut self, id: SerfId) -> GameResult<()> {
        let Some(mut serf) = self.serfs.get(id).cloned() else {
            return Ok(());
        };
        self.dispatch_serf(&mut serf)?;
        if let Some(slot) = self.serfs.get_mut(id) {
            *slot = serf;
        }
        Ok(())
    }

    fn dispatch_serf(&mut self, s: &mut Serf) -> GameResult<()> {
        use SerfState::*;
        match s.state {
            Null => Ok(()),
            IdleInStock { .. } => self.handle_idle_in_stock(s),
            Walking(_) => self.handle_walking(s),
            Transporting(_) => self.handle_transporting(s),
            EnteringBuilding { .. } => self.handle_entering_building(s),
            LeavingBuilding { .. } => self.handle_leaving_building(s),
            ReadyToEnter { .. } => self.handle_ready_to_enter(s),
            ReadyToLeave { .. } => self.handle_ready_to_leave(s),
            Digging(_) => self.handle_digging(s),
            Building(_) => self.handle_building(s),
            BuildingCastle { .. } => self.handle_building_castle(s),
            MoveResourceOut { .. } => self.handle_move_resource_out(s),
            WaitForResourceOut => self.handle_wait_for_resource_out(s),
            DropResourceOut { .. } => self.handle_drop_resource_out(s),
            Delivering(_) => self.handle_delivering(s),
            ReadyToLeaveInventory { .. } => self.handle_ready_to_leave_inventory(s),
            FreeWalking(_) => self.handle_free_walking(s),
            Logging(_) => self.handle_logging(s),
            PlanningLogging => self.handle_planning_logging(s),
            PlanningPlanting => self.handle_planning_planting(s),
            Planting(_) => self.handle_planting(s),
            PlanningStoneCutting => self.handle_planning_stonecutting(s),
            StoneCutterFreeWalking(_) => self.handle_stonecutter_free_walking(s),
            StoneCutting(_) => self.handle_stonecutting(s),
            Sawing { .. } => self.handle_sawing(s),
            Lost { .. } => self.handle_lost(s),
            LostSailor => self.handle_lost_sailor(s),
            FreeSailing(_) => self.handle_free_sailing(s),
            EscapeBuilding => self.handle_escape_building(s),
            Mining(_) => self.handle_mining(s),
            Smelting(_) => self.handle_smelting(s),
            PlanningFishing => self.handle_planning_fishing(s),
            Fishing(_) => self.handle_fishing(s),
            PlanningFarming => self.handle_planning_farming(s),
            Farming(_) => self.handle_farming(s),
            Milling { .. } => self.handle_milling(s),
            Baking { .. } => self.handle_baking(s),
            PigFarming { .. } => self.handle_pigfarming(s),
            Butchering { .. } => self.handle_butchering(s),
            MakingWeapon { .. } => self.handle_making_weapon(s),
            MakingTool { .. } => self.handle_making_tool(s),
            BuildingBoat { .. } => self.handle_building_boat(s),
            LookingForGeoSpot => self.handle_looking_for_geo_spot(s),
            SamplingGeoSpot(_) => self.handle_sampling_geo_spot(s),
            KnightEngagingBuilding(_) => self.handle_knight_engaging_building(s),
            KnightPrepareAttacking(_) => self.handle_knight_prepare_attacking(s),
            KnightLeaveForFight { .. } => self.handle_knight_leave_for_fight(s),
            KnightPrepareDefending => {
                s.counter = 0;
                s.animation = 84;
                Ok(())
            }
            KnightAttacking(_) | KnightAttackingFree(_) => self.handle_knight_attacking(s),
            KnightDefending | KnightDefendingFree(_) => Ok(()),
            KnightAttackingVictory(_) => self.handle_knight_attacking_victory(s),
            KnightAttackingDefeat => self.handle_knight_attacking_defeat(s),
            KnightOccupyEnemyBuilding => self.handle_knight_occupy_enemy_building(s),
            KnightFreeWalking(_) => self.handle_knight_free_walking(s),
            KnightEngageDefendingFree(_) => {
                self.elapse(s);
                while s.counter < 0 {
                    s.counter += 256;
                }
                Ok(())
            }
            KnightEngageAttackingFree(_) => self.handle_knight_engage_attacking_free(s),
            KnightEngageAttackingFreeJoin(_) => self.handle_knight_engage_attacking_free_join(s),
            KnightPrepareAttackingFree(_) => self.handle_knight_prepare_attacking_free(s),
            KnightPrepareDefendingFree(_) => self.handle_knight_prepare_defending_free(s),
            KnightPrepareDefendingFreeWait(_) => Ok(()),
            KnightAttackingVictoryFree(_) => self.handle_knight_attacking_victory_free(s),
            KnightDefendingVictoryFree(_) => {
                s.animation = 180;
                s.counter = 0;
                Ok(())
            }
            KnightAttackingDefeatFree(_) => self.handle_knight_attacking_defeat_free(s),
            KnightAttackingFreeWait(_) => self.handle_knight_attacking_free_wait(s),
            KnightLeaveForWalkToFight(_) => self.handle_knight_leave_for_walk_to_fight(s),
            IdleOnPath(_) => self.handle_idle_on_path(s),
            WaitIdleOnPath(_) => self.handle_wait_idle_on_path(s),
            WakeAtFlag(_) => self.handle_wake_at_flag(s),
            WakeOnPath(_) => self.handle_wake_on_path(s),
            DefendingHut { .. } | DefendingTower { .. } | DefendingFortress { .. } | DefendingCastle { .. } => {
                self.handle_defending(s)
            }
            Scatter => self.handle_scatter(s),
            FinishedBuilding => self.handle_finished_building(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serf(state: SerfState) -> Serf {
        let mut s = Serf::new(SerfId::new(1).unwrap(), 0, 0, 0);
        s.state = state;
        s
    }

    fn flag(i: u32) -> FlagId {
        FlagId::new(i).unwrap()
    }

    #[test]
    fn test_animation_table() {
        assert_eq!(COUNTER_FROM_ANIMATION.len(), 181);
        assert_eq!(anim_counter(4), 255);
        assert_eq!(anim_counter(81), 127);
        assert_eq!(anim_counter(101), 0);
        assert_eq!(anim_counter(124), 2367);
        assert_eq!(anim_counter(180), 7);
        assert_eq!(anim_counter(-1), 0);
        assert_eq!(anim_counter(500), 0);
    }

    #[test]
    fn test_walking_animation() {
        assert_eq!(walking_animation(0, Direction::Right, false), 4);
        assert_eq!(walking_animation(2, Direction::Up, false), 4 + 2 + 45);
        assert_eq!(walking_animation(0, Direction::Right, true), 4 + 54);
        assert_eq!(walking_animation(0, Direction::Left, true), 4 + 27);
        assert_eq!(walking_animation(-9, Direction::Right, false), 0);
    }

    #[test]
    fn test_blocked_walker_switches() {
        let mut walk = Walk::new(WalkTask::ReturnHome, None);
        walk.step = Step::Blocked(Direction::Left);
        let mut s = serf(SerfState::Walking(walk));
        assert_eq!(s.is_waiting(), Some(Some(Direction::Left)));
        assert!(s.switch_waiting(Direction::Left));
        assert_eq!(s.step(), Some(Step::From(Direction::Right)));
        assert_eq!(s.is_waiting(), None);
    }

    #[test]
    fn test_free_walker_switch_reaches_destination() {
        let mut s = serf(SerfState::FreeWalking(FreeWalk::new(1, 0, 0, 0)));
        assert_eq!(s.is_waiting(), None);
        s.animation = 82;
        assert_eq!(s.is_waiting(), Some(Some(Direction::Right)));
        assert!(s.switch_waiting(Direction::Right));
        match s.state {
            SerfState::FreeWalking(fw) => {
                assert_eq!((fw.dist_col, fw.dist_row), (0, 0));
                assert_eq!(fw.flags, 8);
            }
            _ => panic!("state changed"),
        }
    }

    #[test]
    fn test_digger_refuses_switch() {
        let mut s = serf(SerfState::Digging(Dig {
            h_index: 3,
            target_h: 10,
            dig_pos: 2,
            substate: -1,
        }));
        assert_eq!(s.is_waiting(), Some(Some(Direction::Left)));
        assert!(!s.switch_waiting(Direction::Right));
    }

    #[test]
    fn test_path_deleted_sends_walker_home() {
        let mut s = serf(SerfState::Walking(Walk::new(WalkTask::Road(Direction::Right), Some(flag(3)))));
        assert!(s.is_related_to(flag(3), Direction::Right));
        s.path_deleted(flag(3), Direction::Left);
        assert!(s.is_related_to(flag(3), Direction::Right));
        s.path_deleted(flag(3), Direction::Right);
        match s.state {
            SerfState::Walking(w) => {
                assert_eq!(w.task, WalkTask::ReturnHome);
                assert_eq!(w.dest, None);
            }
            _ => panic!("state changed"),
        }
    }

    #[test]
    fn test_path_splited_picks_matching_half() {
        let s = serf(SerfState::ReadyToLeave {
            exit: Exit::Walking {
                task: WalkTask::Road(Direction::Down),
                dest: Some(flag(7)),
            },
        });
        assert_eq!(s.path_splited(flag(2), Direction::Up, flag(7), Direction::Down), Some(1));
        assert_eq!(s.path_splited(flag(7), Direction::Down, flag(2), Direction::Up), Some(0));
        assert_eq!(s.path_splited(flag(2), Direction::Up, flag(5), Direction::Down), None);
    }

    #[test]
    fn test_reset_transport_clears_resource_destination() {
        let mut s = serf(SerfState::Transporting(Carry {
            res: Some(Resource::Plank),
            dest: Some(flag(4)),
            step: Step::From(Direction::Left),
            wait_counter: 0,
        }));
        s.reset_transport(flag(4));
        assert!(matches!(s.state, SerfState::Transporting(Carry { dest: None, .. })));
        assert_eq!(s.carried_resource(), Some(Resource::Plank));
    }

    #[test]
    fn test_flag_deleted_redirects_leaving_serf() {
        let mut s = serf(SerfState::LeavingBuilding {
            exit: Exit::Walking {
                task: WalkTask::ReturnHome,
                dest: None,
            },
        });
        s.flag_deleted(0);
        assert_eq!(s.state, SerfState::LeavingBuilding { exit: Exit::Lost });

        let mut walker = serf(SerfState::Walking(Walk::new(WalkTask::ReturnHome, None)));
        walker.flag_deleted(2);
        assert!(matches!(walker.state, SerfState::Walking(_)));
        walker.flag_deleted(0);
        assert!(matches!(walker.state, SerfState::Lost { .. }));
    }

    #[test]
    fn test_idle_transporter_state_change_only_at_position() {
        let path = IdlePath {
            flag: flag(1),
            rev_dir: Direction::Left,
            resume: Direction::Right,
        };
        let mut s = serf(SerfState::IdleOnPath(path));
        s.pos = 12;
        assert!(!s.idle_to_wait_state(13));
        assert!(s.idle_to_wait_state(12));
        assert_eq!(s.state, SerfState::WakeAtFlag(path));
        assert!(s.change_transporter_state_at_pos(12, SerfState::WakeOnPath(path)));
        assert_eq!(s.state, SerfState::WakeOnPath(path));
    }
}
