//! Map substrate: wrapping hex-grid geometry, tile data and the
//! incremental growth pass that ages trees, fields and signs.
//!
//! Positions are packed `(row << row_shift) | col` values so they can be
//! used directly as tile indices. Every movement wraps at the map edges.

use serde::{Deserialize, Serialize};

use crate::collection::{BuildingId, EntityId, FlagId, SerfId};
use crate::random::GameRng;

/// Packed map position.
pub type MapPos = u32;

/// The six standard directions of the hex grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Right = 0,
    DownRight = 1,
    Down = 2,
    Left = 3,
    UpLeft = 4,
    Up = 5,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Right,
        Direction::DownRight,
        Direction::Down,
        Direction::Left,
        Direction::UpLeft,
        Direction::Up,
    ];

    pub fn from_index(i: i32) -> Option<Direction> {
        if (0..6).contains(&i) {
            Some(Self::ALL[i as usize])
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Turn clockwise `times` steps of 60 degrees (negative turns ccw).
    pub fn turn(self, times: i32) -> Direction {
        let td = (self as i32 + times).rem_euclid(6);
        Self::ALL[td as usize]
    }

    pub fn reverse(self) -> Direction {
        self.turn(3)
    }

    /// Unit column/row offset of one step in this direction.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Right => (1, 0),
            Direction::DownRight => (1, 1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::UpLeft => (-1, -1),
            Direction::Up => (0, -1),
        }
    }
}

/// Clockwise cycle of `len` directions starting at `start`.
pub fn cycle_cw(start: Direction, len: usize) -> impl Iterator<Item = Direction> {
    (0..len as i32).map(move |i| start.turn(i))
}

/// Counter-clockwise cycle of all six directions, starting at `Up`.
pub fn cycle_ccw() -> impl Iterator<Item = Direction> {
    (0..6).map(|i| Direction::Up.turn(-i))
}

/// Terrain triangle type. Order matters: water < grass < desert < tundra < snow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Terrain {
    Water0 = 0,
    Water1,
    Water2,
    Water3,
    Grass0,
    Grass1,
    Grass2,
    Grass3,
    Desert0,
    Desert1,
    Desert2,
    Tundra0,
    Tundra1,
    Tundra2,
    Snow0,
    Snow1,
}

impl Terrain {
    pub fn is_water(self) -> bool {
        self <= Terrain::Water3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Minerals {
    None,
    Gold,
    Iron,
    Coal,
    Stone,
}

/// How a map space can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Space {
    /// Buildable.
    Open,
    /// Passable and roads allowed, nothing built.
    Filled,
    /// Passable, no roads.
    Semipassable,
    Impassable,
}

/// Object standing on a map vertex. Staged objects carry their stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapObject {
    None,
    Flag,
    SmallBuilding,
    LargeBuilding,
    Castle,
    /// Deciduous tree, 8 growth/animation stages.
    Tree(u8),
    Pine(u8),
    Palm(u8),
    WaterTree(u8),
    /// Stone pile; stage 7 is the largest, 0 is nearly cut.
    Stone(u8),
    Sandstone(u8),
    Cross,
    Stub,
    /// Single loose stone.
    Pebble,
    SandstoneRubble,
    Cadaver(u8),
    WaterStone(u8),
    Cactus(u8),
    DeadTree,
    FelledPine(u8),
    FelledTree(u8),
    NewPine,
    NewTree,
    Seeds(u8),
    FieldExpired,
    /// Geologist sign; `large` marks a rich deposit.
    Sign { mineral: Minerals, large: bool },
    SignEmpty,
    Field(u8),
}

impl MapObject {
    pub fn space(self) -> Space {
        use MapObject::*;
        match self {
            None => Space::Open,
            Flag => Space::Filled,
            SmallBuilding | LargeBuilding | Castle => Space::Impassable,
            Tree(_) | Pine(_) | Palm(_) => Space::Filled,
            WaterTree(_) => Space::Impassable,
            Stone(_) | Sandstone(_) => Space::Impassable,
            Cross => Space::Filled,
            Stub | Pebble | SandstoneRubble | Cadaver(_) => Space::Open,
            WaterStone(_) => Space::Impassable,
            Cactus(_) | DeadTree => Space::Filled,
            FelledPine(s) | FelledTree(s) => {
                if s < 4 {
                    Space::Filled
                } else {
                    Space::Open
                }
            }
            NewPine | NewTree => Space::Filled,
            Seeds(_) => Space::Semipassable,
            FieldExpired | Sign { .. } | SignEmpty => Space::Open,
            Field(_) => Space::Semipassable,
        }
    }

    pub fn is_building(self) -> bool {
        matches!(
            self,
            MapObject::SmallBuilding | MapObject::LargeBuilding | MapObject::Castle
        )
    }

    pub fn is_tree(self) -> bool {
        matches!(self, MapObject::Tree(_) | MapObject::Pine(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub height: u8,
    pub type_up: Terrain,
    pub type_down: Terrain,
    pub mineral: Minerals,
    /// Mineral amount on land, fish count on water.
    pub resource_amount: i32,
    pub obj: MapObject,
    pub paths: u8,
    /// Owning player index.
    pub owner: Option<u8>,
    pub serf: Option<SerfId>,
    pub idle_serf: bool,
    /// Flag or building index for flag/building objects.
    pub obj_index: u32,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            height: 0,
            type_up: Terrain::Grass1,
            type_down: Terrain::Grass1,
            mineral: Minerals::None,
            resource_amount: 0,
            obj: MapObject::None,
            paths: 0,
            owner: None,
            serf: None,
            idle_serf: false,
            obj_index: 0,
        }
    }
}

/// Bookkeeping for the incremental map growth pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateState {
    pub remove_signs_counter: i32,
    pub last_tick: u16,
    pub counter: i32,
    pub initial_pos: MapPos,
}

/// Base coordinate of each spiral ring entry; every entry expands to six
/// rotated positions.
const SPIRAL_BASE: [(i32, i32); 49] = [
    (1, 0), (2, 1), (2, 0), (3, 1), (3, 2), (3, 0), (4, 2), (4, 1), (4, 3), (4, 0),
    (5, 2), (5, 3), (5, 1), (5, 4), (5, 0), (6, 3), (6, 2), (6, 4), (6, 1), (6, 5),
    (6, 0), (7, 3), (7, 4), (7, 2), (7, 5), (7, 1), (7, 6), (7, 0), (8, 4), (8, 3),
    (8, 5), (8, 2), (8, 6), (8, 1), (8, 7), (8, 0), (9, 4), (9, 5), (9, 3), (9, 6),
    (9, 2), (9, 7), (9, 1), (9, 0), (16, 0), (16, 8), (24, 0), (24, 8), (24, 16),
];

const SPIRAL_MATRIX: [[i32; 4]; 6] = [
    [1, 0, 0, 1],
    [1, 1, -1, 0],
    [0, 1, -1, -1],
    [-1, 0, 0, -1],
    [-1, -1, 1, 0],
    [0, -1, 1, 1],
];

/// Number of entries in the spiral pattern.
pub const SPIRAL_LEN: usize = 295;

/// Relative (col, row) offsets of the spiral pattern, center first.
pub fn spiral_offsets() -> Vec<(i32, i32)> {
    let mut out = Vec::with_capacity(SPIRAL_LEN);
    out.push((0, 0));
    for &(x, y) in SPIRAL_BASE.iter() {
        for m in SPIRAL_MATRIX.iter() {
            out.push((x * m[0] + y * m[2], x * m[1] + y * m[3]));
        }
    }
    out
}

/// Column/row offset of spiral entry `i`; out-of-range entries map to the center.
pub fn spiral_offset(i: usize) -> (i32, i32) {
    if i == 0 || i >= SPIRAL_LEN {
        return (0, 0);
    }
    let (x, y) = SPIRAL_BASE[(i - 1) / 6];
    let m = SPIRAL_MATRIX[(i - 1) % 6];
    (x * m[0] + y * m[2], x * m[1] + y * m[3])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    size: u32,
    cols: u32,
    rows: u32,
    col_mask: u32,
    row_mask: u32,
    row_shift: u32,
    regions: u32,
    tiles: Vec<Tile>,
    spiral: Vec<MapPos>,
    update_state: UpdateState,
}

impl Map {
    /// Create a flat grass map. `size` ranges over 1..=10; size 3 is 64×64.
    pub fn new(size: u32) -> Self {
        let size = size.clamp(1, 10);
        let col_size = 5 + size / 2;
        let row_size = 5 + (size - 1) / 2;
        let cols = 1u32 << col_size;
        let rows = 1u32 << row_size;
        let mut map = Self {
            size,
            cols,
            rows,
            col_mask: cols - 1,
            row_mask: rows - 1,
            row_shift: col_size,
            regions: (cols >> 5) * (rows >> 5),
            tiles: vec![Tile::default(); (cols * rows) as usize],
            spiral: Vec::new(),
            update_state: UpdateState::default(),
        };
        map.spiral = spiral_offsets()
            .into_iter()
            .map(|(x, y)| map.pos((x as u32) & map.col_mask, (y as u32) & map.row_mask))
            .collect();
        map
    }

    // ── Geometry ────────────────────────────────────────────────────────

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn col_mask(&self) -> u32 {
        self.col_mask
    }

    pub fn row_mask(&self) -> u32 {
        self.row_mask
    }

    pub fn tile_count(&self) -> u32 {
        self.cols * self.rows
    }

    pub fn contains(&self, pos: MapPos) -> bool {
        pos < self.tile_count()
    }

    pub fn regions(&self) -> u32 {
        self.regions
    }

    pub fn pos(&self, col: u32, row: u32) -> MapPos {
        (row << self.row_shift) | col
    }

    pub fn pos_col(&self, pos: MapPos) -> i32 {
        (pos & self.col_mask) as i32
    }

    pub fn pos_row(&self, pos: MapPos) -> i32 {
        ((pos >> self.row_shift) & self.row_mask) as i32
    }

    /// Offset a position by a signed column/row delta, wrapping.
    pub fn pos_add(&self, pos: MapPos, dx: i32, dy: i32) -> MapPos {
        let col = (self.pos_col(pos) + dx) as u32 & self.col_mask;
        let row = (self.pos_row(pos) + dy) as u32 & self.row_mask;
        self.pos(col, row)
    }

    fn pos_add_packed(&self, pos: MapPos, off: MapPos) -> MapPos {
        let col = (self.pos_col(pos) + self.pos_col(off)) as u32 & self.col_mask;
        let row = (self.pos_row(pos) + self.pos_row(off)) as u32 & self.row_mask;
        self.pos(col, row)
    }

    /// Position of spiral entry `i` around `pos`.
    pub fn pos_add_spirally(&self, pos: MapPos, i: usize) -> MapPos {
        self.pos_add_packed(pos, self.spiral[i])
    }

    pub fn move_pos(&self, pos: MapPos, dir: Direction) -> MapPos {
        let (dx, dy) = dir.offset();
        self.pos_add(pos, dx, dy)
    }

    pub fn move_right(&self, pos: MapPos) -> MapPos {
        self.move_pos(pos, Direction::Right)
    }

    pub fn move_down_right(&self, pos: MapPos) -> MapPos {
        self.move_pos(pos, Direction::DownRight)
    }

    pub fn move_down(&self, pos: MapPos) -> MapPos {
        self.move_pos(pos, Direction::Down)
    }

    pub fn move_left(&self, pos: MapPos) -> MapPos {
        self.move_pos(pos, Direction::Left)
    }

    pub fn move_up_left(&self, pos: MapPos) -> MapPos {
        self.move_pos(pos, Direction::UpLeft)
    }

    pub fn move_up(&self, pos: MapPos) -> MapPos {
        self.move_pos(pos, Direction::Up)
    }

    pub fn move_up_right(&self, pos: MapPos) -> MapPos {
        self.pos_add(pos, 1, -1)
    }

    pub fn move_down_left(&self, pos: MapPos) -> MapPos {
        self.pos_add(pos, -1, 1)
    }

    /// Shortest signed column offset that leads from `a` to `b`.
    pub fn dist_x(&self, a: MapPos, b: MapPos) -> i32 {
        let half = (self.cols / 2) as i32;
        half - ((half + self.pos_col(a) - self.pos_col(b)) & self.col_mask as i32)
    }

    /// Shortest signed row offset that leads from `a` to `b`.
    pub fn dist_y(&self, a: MapPos, b: MapPos) -> i32 {
        let half = (self.rows / 2) as i32;
        half - ((half + self.pos_row(a) - self.pos_row(b)) & self.row_mask as i32)
    }

    /// Number of single steps between two positions on the hex grid.
    pub fn step_distance(&self, from: MapPos, to: MapPos) -> u32 {
        let dx = self.dist_x(to, from);
        let dy = self.dist_y(to, from);
        if (dx > 0 && dy > 0) || (dx < 0 && dy < 0) {
            dx.abs().max(dy.abs()) as u32
        } else {
            (dx.abs() + dy.abs()) as u32
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = MapPos> {
        0..self.tile_count()
    }

    // ── Tile access ─────────────────────────────────────────────────────

    pub fn tile(&self, pos: MapPos) -> &Tile {
        &self.tiles[pos as usize]
    }

    pub fn tile_mut(&mut self, pos: MapPos) -> &mut Tile {
        &mut self.tiles[pos as usize]
    }

    pub fn paths(&self, pos: MapPos) -> u8 {
        self.tile(pos).paths & 0x3f
    }

    pub fn has_path(&self, pos: MapPos, dir: Direction) -> bool {
        self.tile(pos).paths & dir.bit() != 0
    }

    pub fn add_path(&mut self, pos: MapPos, dir: Direction) {
        self.tile_mut(pos).paths |= dir.bit();
    }

    pub fn del_path(&mut self, pos: MapPos, dir: Direction) {
        self.tile_mut(pos).paths &= !dir.bit();
    }

    pub fn has_owner(&self, pos: MapPos) -> bool {
        self.tile(pos).owner.is_some()
    }

    pub fn owner(&self, pos: MapPos) -> Option<u8> {
        self.tile(pos).owner
    }

    pub fn set_owner(&mut self, pos: MapPos, owner: Option<u8>) {
        self.tile_mut(pos).owner = owner;
    }

    pub fn height(&self, pos: MapPos) -> i32 {
        i32::from(self.tile(pos).height)
    }

    pub fn set_height(&mut self, pos: MapPos, height: i32) {
        self.tile_mut(pos).height = height.clamp(0, 31) as u8;
    }

    pub fn type_up(&self, pos: MapPos) -> Terrain {
        self.tile(pos).type_up
    }

    pub fn type_down(&self, pos: MapPos) -> Terrain {
        self.tile(pos).type_down
    }

    pub fn set_terrain(&mut self, pos: MapPos, up: Terrain, down: Terrain) {
        let tile = self.tile_mut(pos);
        tile.type_up = up;
        tile.type_down = down;
    }

    pub fn obj(&self, pos: MapPos) -> MapObject {
        self.tile(pos).obj
    }

    pub fn obj_index(&self, pos: MapPos) -> u32 {
        self.tile(pos).obj_index
    }

    /// Change the object at a position. The index is replaced when given;
    /// pass `Some(0)` when removing a flag or building.
    pub fn set_object(&mut self, pos: MapPos, obj: MapObject, index: Option<u32>) {
        let tile = self.tile_mut(pos);
        tile.obj = obj;
        if let Some(index) = index {
            tile.obj_index = index;
        }
    }

    pub fn space(&self, pos: MapPos) -> Space {
        self.obj(pos).space()
    }

    pub fn has_flag(&self, pos: MapPos) -> bool {
        self.obj(pos) == MapObject::Flag
    }

    pub fn has_building(&self, pos: MapPos) -> bool {
        self.obj(pos).is_building()
    }

    /// Flag id when the position holds a flag.
    pub fn flag_at(&self, pos: MapPos) -> Option<FlagId> {
        if self.has_flag(pos) {
            FlagId::from_index(self.obj_index(pos))
        } else {
            None
        }
    }

    /// Building id when the position holds a building.
    pub fn building_at(&self, pos: MapPos) -> Option<BuildingId> {
        if self.has_building(pos) {
            BuildingId::from_index(self.obj_index(pos))
        } else {
            None
        }
    }

    pub fn serf_at(&self, pos: MapPos) -> Option<SerfId> {
        self.tile(pos).serf
    }

    pub fn has_serf(&self, pos: MapPos) -> bool {
        self.tile(pos).serf.is_some()
    }

    pub fn set_serf(&mut self, pos: MapPos, serf: Option<SerfId>) {
        self.tile_mut(pos).serf = serf;
    }

    pub fn idle_serf(&self, pos: MapPos) -> bool {
        self.tile(pos).idle_serf
    }

    pub fn set_idle_serf(&mut self, pos: MapPos, idle: bool) {
        self.tile_mut(pos).idle_serf = idle;
    }

    pub fn res_type(&self, pos: MapPos) -> Minerals {
        self.tile(pos).mineral
    }

    pub fn res_amount(&self, pos: MapPos) -> i32 {
        self.tile(pos).resource_amount
    }

    pub fn res_fish(&self, pos: MapPos) -> i32 {
        self.tile(pos).resource_amount
    }

    pub fn set_deposit(&mut self, pos: MapPos, mineral: Minerals, amount: i32) {
        let tile = self.tile_mut(pos);
        tile.mineral = mineral;
        tile.resource_amount = amount;
    }

    /// Take minerals from the ground; the deposit type clears when empty.
    pub fn remove_ground_deposit(&mut self, pos: MapPos, amount: i32) {
        let tile = self.tile_mut(pos);
        tile.resource_amount -= amount;
        if tile.resource_amount <= 0 {
            tile.mineral = Minerals::None;
        }
    }

    pub fn remove_fish(&mut self, pos: MapPos, amount: i32) {
        self.tile_mut(pos).resource_amount -= amount;
    }

    /// Total gold left in the ground.
    pub fn gold_deposit(&self) -> u32 {
        self.tiles
            .iter()
            .filter(|t| t.mineral == Minerals::Gold)
            .map(|t| t.resource_amount.max(0) as u32)
            .sum()
    }

    /// Both triangles at this vertex are water.
    pub fn is_water_tile(&self, pos: MapPos) -> bool {
        self.type_down(pos).is_water() && self.type_up(pos).is_water()
    }

    /// The vertex is surrounded by water on all six triangles.
    pub fn is_in_water(&self, pos: MapPos) -> bool {
        self.is_water_tile(pos)
            && self.is_water_tile(self.move_up_left(pos))
            && self.type_down(self.move_left(pos)).is_water()
            && self.type_up(self.move_up(pos)).is_water()
    }

    /// All six triangles around the vertex lie within `low..=high`.
    pub fn types_within(&self, pos: MapPos, low: Terrain, high: Terrain) -> bool {
        let within = |t: Terrain| t >= low && t <= high;
        let ul = self.move_up_left(pos);
        within(self.type_up(pos))
            && within(self.type_down(pos))
            && within(self.type_down(self.move_left(pos)))
            && within(self.type_up(ul))
            && within(self.type_down(ul))
            && within(self.type_up(self.move_up(pos)))
    }

    // ── Roads ───────────────────────────────────────────────────────────

    /// Whether a road segment from `pos` in `dir` could be built now.
    pub fn is_road_segment_valid(&self, pos: MapPos, dir: Direction) -> bool {
        let other = self.move_pos(pos, dir);
        let obj = self.obj(other);
        if (self.paths(other) != 0 && obj != MapObject::Flag) || obj.space() >= Space::Semipassable
        {
            return false;
        }
        match (self.owner(other), self.owner(pos)) {
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
        if self.is_in_water(pos) != self.is_in_water(other)
            && !(self.has_flag(pos) || self.has_flag(other))
        {
            return false;
        }
        true
    }

    /// Lay path bits for a road. On an invalid segment the already placed
    /// part is rolled back and false is returned.
    pub fn place_road_segments(&mut self, source: MapPos, dirs: &[Direction]) -> bool {
        let mut pos = source;
        for (i, &dir) in dirs.iter().enumerate() {
            if !self.is_road_segment_valid(pos, dir) {
                for &placed in dirs[..i].iter().rev() {
                    let back = placed.reverse();
                    self.del_path(pos, back);
                    let prev = self.move_pos(pos, back);
                    self.del_path(prev, placed);
                    pos = prev;
                }
                return false;
            }
            self.add_path(pos, dir);
            let next = self.move_pos(pos, dir);
            self.add_path(next, dir.reverse());
            pos = next;
        }
        true
    }

    /// Remove one segment starting at `pos`, returning the new position
    /// and the onward direction of the road, if any.
    pub fn remove_road_segment(&mut self, pos: MapPos, dir: Direction) -> (MapPos, Option<Direction>) {
        self.del_path(pos, dir);
        let next = self.move_pos(pos, dir);
        self.del_path(next, dir.reverse());
        let onward = cycle_cw(Direction::Right, 6).find(|&d| self.has_path(next, d));
        (next, onward)
    }

    /// Follow a road from `pos` and clear the back references until a flag.
    pub fn remove_road_backref_until_flag(&mut self, mut pos: MapPos, mut dir: Direction) -> bool {
        loop {
            pos = self.move_pos(pos, dir);
            self.del_path(pos, dir.reverse());
            if self.has_flag(pos) {
                return true;
            }
            match cycle_cw(Direction::Right, 6).find(|&d| self.has_path(pos, d)) {
                Some(d) => dir = d,
                None => return false,
            }
        }
    }

    /// Clear back references of both road halves passing through `pos`.
    pub fn remove_road_backrefs(&mut self, pos: MapPos) -> bool {
        let mut dirs = cycle_cw(Direction::Right, 6).filter(|&d| self.has_path(pos, d));
        let (Some(first), Some(second)) = (dirs.next(), dirs.next()) else {
            return false;
        };
        self.remove_road_backref_until_flag(pos, first)
            && self.remove_road_backref_until_flag(pos, second)
    }

    /// Whether the segment from `pos` in `dir` runs over water.
    pub fn road_segment_in_water(&self, pos: MapPos, dir: Direction) -> bool {
        let (pos, dir) = if dir > Direction::Down {
            (self.move_pos(pos, dir), dir.reverse())
        } else {
            (pos, dir)
        };
        match dir {
            Direction::Right => {
                self.type_down(pos).is_water() && self.type_up(self.move_up(pos)).is_water()
            }
            Direction::DownRight => self.type_up(pos).is_water() && self.type_down(pos).is_water(),
            _ => self.type_up(pos).is_water() && self.type_down(self.move_left(pos)).is_water(),
        }
    }

    // ── Growth pass ─────────────────────────────────────────────────────

    pub fn update_state(&self) -> &UpdateState {
        &self.update_state
    }

    /// Age map objects: `regions` positions per 20 elapsed ticks, stepping
    /// 23 columns at a time across the map.
    pub fn update(&mut self, tick: u32, rng: &mut GameRng) {
        let delta = (tick as u16).wrapping_sub(self.update_state.last_tick);
        self.update_state.last_tick = tick as u16;
        self.update_state.counter -= i32::from(delta);

        let mut iters = 0;
        while self.update_state.counter < 0 {
            iters += self.regions;
            self.update_state.counter += 20;
        }

        let mut pos = self.update_state.initial_pos;
        for _ in 0..iters {
            self.update_state.remove_signs_counter -= 1;
            if self.update_state.remove_signs_counter < 0 {
                self.update_state.remove_signs_counter = 16;
            }

            let wraps = self.pos_col(pos) + 23 >= self.cols as i32;
            pos = self.pos_add(pos, 23, 0);
            if wraps {
                pos = self.move_down(pos);
            }

            self.update_hidden(pos, rng);
            self.update_public(pos, rng);
        }
        self.update_state.initial_pos = pos;
    }

    fn update_public(&mut self, pos: MapPos, rng: &mut GameRng) {
        use MapObject::*;
        let next = match self.obj(pos) {
            Stub => {
                if rng.random() & 3 == 0 {
                    Some(None)
                } else {
                    Option::None
                }
            }
            FelledPine(_) | FelledTree(_) => Some(Stub),
            NewPine => {
                let r = rng.random();
                (r & 0x300 == 0).then_some(Pine((r & 7) as u8))
            }
            NewTree => {
                let r = rng.random();
                (r & 0x300 == 0).then_some(Tree((r & 7) as u8))
            }
            Seeds(s) if s < 5 => Some(Seeds(s + 1)),
            Seeds(_) => Some(Field(0)),
            Field(s) if s < 5 => Some(Field(s + 1)),
            Field(_) => Some(FieldExpired),
            FieldExpired => Some(None),
            Sign { .. } | SignEmpty => (self.update_state.remove_signs_counter == 0).then_some(None),
            _ => Option::None,
        };
        if let Some(obj) = next {
            self.set_object(pos, obj, Option::None);
        }
    }

    fn update_hidden(&mut self, pos: MapPos, rng: &mut GameRng) {
        if !self.is_in_water(pos) || self.res_fish(pos) <= 0 {
            return;
        }
        let r = rng.random();
        if self.res_fish(pos) < 10 && r & 0x3f00 != 0 {
            self.tile_mut(pos).resource_amount += 1;
        }
        let adj = match (r >> 2) & 3 {
            0 => self.move_right(pos),
            1 => self.move_down_right(pos),
            2 => self.move_left(pos),
            _ => self.move_up_left(pos),
        };
        if self.is_in_water(adj) {
            self.tile_mut(pos).resource_amount -= 1;
            self.tile_mut(adj).resource_amount += 1;
        }
    }

    // ── Terrain setup ───────────────────────────────────────────────────

    /// Flat land with a gentle random height field. Used by hosts without a
    /// terrain generator and by the test harness.
    pub fn generate_flat(size: u32, rng: &mut GameRng) -> Self {
        let mut map = Self::new(size);
        for pos in map.positions() {
            let h = 10 + i32::from(rng.random() & 1);
            map.set_height(pos, h);
        }
        map
    }

    /// A grass island surrounded by sea. A ridge of tundra east of the
    /// centre carries mineral deposits; trees and stones are scattered
    /// over the remaining land.
    pub fn generate_island(size: u32, rng: &mut GameRng) -> Self {
        let mut map = Self::generate_flat(size, rng);
        let center = map.pos(map.cols / 2, map.rows / 2);
        let radius = (map.cols.min(map.rows) / 2).saturating_sub(4);

        for pos in map.positions() {
            if map.step_distance(center, pos) > radius {
                map.set_terrain(pos, Terrain::Water1, Terrain::Water1);
                map.set_height(pos, 8);
            }
        }
        for pos in map.positions() {
            if map.is_in_water(pos) {
                map.tile_mut(pos).resource_amount = 2;
            }
        }

        let ridge = map.pos_add(center, (radius / 2) as i32, 0);
        let minerals = [Minerals::Coal, Minerals::Iron, Minerals::Gold, Minerals::Stone];
        for pos in map.positions() {
            let d = map.step_distance(ridge, pos);
            if d > 4 {
                continue;
            }
            map.set_terrain(pos, Terrain::Tundra0, Terrain::Tundra0);
            map.set_height(pos, 14 + 4 - d as i32);
            let r = rng.random();
            let mineral = minerals[usize::from(r & 3)];
            map.set_deposit(pos, mineral, 4 + i32::from((r >> 2) & 7));
        }

        for pos in map.positions() {
            let r = rng.random();
            let free = map.obj(pos) == MapObject::None
                && map.types_within(pos, Terrain::Grass0, Terrain::Grass3)
                && map.step_distance(center, pos) > 6;
            if !free {
                continue;
            }
            match r & 0x3f {
                0..=2 => map.set_object(pos, MapObject::Tree(((r >> 8) & 7) as u8), None),
                3 => map.set_object(pos, MapObject::Pine(((r >> 8) & 7) as u8), None),
                4 => map.set_object(pos, MapObject::Stone(((r >> 8) & 7) as u8), None),
                _ => {}
            }
        }
        map
    }

    /// Paint a round lake of the given radius around `center`.
    pub fn add_lake(&mut self, center: MapPos, radius: u32, fish: i32) {
        for pos in self.positions() {
            if self.step_distance(center, pos) <= radius {
                self.set_terrain(pos, Terrain::Water1, Terrain::Water1);
                self.set_height(pos, 8);
            }
        }
        for pos in self.positions() {
            if self.is_in_water(pos) {
                self.tile_mut(pos).resource_amount = fish;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_dimensions() {
        let map = Map::new(3);
        assert_eq!(map.cols(), 64);
        assert_eq!(map.rows(), 64);
        assert_eq!(map.regions(), 4);
        let map = Map::new(4);
        assert_eq!(map.cols(), 128);
        assert_eq!(map.rows(), 64);
    }

    #[test]
    fn test_moves_wrap_and_reverse() {
        let map = Map::new(3);
        let origin = map.pos(0, 0);
        for dir in Direction::ALL {
            let there = map.move_pos(origin, dir);
            assert_eq!(map.move_pos(there, dir.reverse()), origin);
        }
        assert_eq!(map.move_left(origin), map.pos(63, 0));
        assert_eq!(map.move_up(origin), map.pos(0, 63));
    }

    #[test]
    fn test_signed_distance() {
        let map = Map::new(3);
        let a = map.pos(2, 2);
        let b = map.pos(62, 60);
        assert_eq!(map.dist_x(a, b), -4);
        assert_eq!(map.dist_y(a, b), -6);
        assert_eq!(map.dist_x(b, a), 4);
    }

    #[test]
    fn test_spiral_pattern_shape() {
        let offsets = spiral_offsets();
        assert_eq!(offsets.len(), SPIRAL_LEN);
        assert_eq!(offsets[0], (0, 0));
        // First ring is the six neighbours, clockwise from right.
        let ring: Vec<(i32, i32)> = Direction::ALL.iter().map(|d| d.offset()).collect();
        assert_eq!(&offsets[1..7], &ring[..]);
        assert_eq!(offsets[7], (2, 1));
    }

    #[test]
    fn test_direction_cycles() {
        let cw: Vec<Direction> = cycle_cw(Direction::Right, 6).collect();
        assert_eq!(cw, Direction::ALL.to_vec());
        let ccw: Vec<Direction> = cycle_ccw().collect();
        assert_eq!(ccw[0], Direction::Up);
        assert_eq!(ccw[5], Direction::Right);
    }

    #[test]
    fn test_field_growth_cycle() {
        let mut map = Map::new(3);
        let mut rng = GameRng::new(7);
        let pos = map.pos(23, 0);
        map.set_object(pos, MapObject::Seeds(5), None);
        map.update_public(pos, &mut rng);
        assert_eq!(map.obj(pos), MapObject::Field(0));
        map.set_object(pos, MapObject::Field(5), None);
        map.update_public(pos, &mut rng);
        assert_eq!(map.obj(pos), MapObject::FieldExpired);
        map.update_public(pos, &mut rng);
        assert_eq!(map.obj(pos), MapObject::None);
    }

    #[test]
    fn test_road_segment_requires_ownership() {
        let mut map = Map::new(3);
        let a = map.pos(10, 10);
        let b = map.move_right(a);
        assert!(!map.is_road_segment_valid(a, Direction::Right));
        map.set_owner(a, Some(0));
        map.set_owner(b, Some(0));
        assert!(map.is_road_segment_valid(a, Direction::Right));
        map.set_owner(b, Some(1));
        assert!(!map.is_road_segment_valid(a, Direction::Right));
    }

    #[test]
    fn test_place_road_rolls_back_on_failure() {
        let mut map = Map::new(3);
        let start = map.pos(10, 10);
        for pos in map.positions().collect::<Vec<_>>() {
            map.set_owner(pos, Some(0));
        }
        let blocked = map.pos(12, 10);
        map.set_object(blocked, MapObject::Stone(3), None);
        let ok = map.place_road_segments(start, &[Direction::Right, Direction::Right]);
        assert!(!ok);
        assert_eq!(map.paths(start), 0);
        assert_eq!(map.paths(map.pos(11, 10)), 0);
    }

    #[test]
    fn test_update_visits_regions_per_twenty_ticks() {
        let mut map = Map::new(3);
        let mut rng = GameRng::new(1);
        map.update(20, &mut rng);
        // counter went from 0 to -20, one batch of `regions` iterations.
        assert_eq!(map.update_state().counter, 0);
        let expected = map.pos(23 * 4 % 64, 1);
        assert_eq!(map.update_state().initial_pos, expected);
    }
}
