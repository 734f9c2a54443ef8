//! Game - the world container and its tick driver.
//!
//! `Game` owns the map, the random streams, the players and the arenas of
//! serfs, flags, buildings and inventories. `update` advances the world by
//! one step; the player commands (`build_*`, `demolish_*`, inventory modes)
//! live in the submodules next to the logistics they feed. Statistics
//! history is sampled last in each update.

mod buildings;
mod logistics;
mod roads;
mod stats;
mod territory;

pub use stats::StatsClock;

use serde::{Deserialize, Serialize};

use crate::building::Building;
use crate::collection::{BuildingId, Collection, FlagId, InventoryId, SerfId};
use crate::config::{GameOptions, MapConfig, PlayerSettings};
use crate::error::{GameError, GameResult};
use crate::flag::Flag;
use crate::inventory::{Inventory, InventoryMode};
use crate::map::{Map, MapPos};
use crate::player::Player;
use crate::random::GameRng;
use crate::resource::Resource;
use crate::serf::{Serf, SerfType};

/// Most players a game can hold.
pub const MAX_PLAYERS: usize = 4;

/// Ticks between knight morale updates.
const KNIGHT_MORALE_INTERVAL: i32 = 256;

/// Ticks between dispatch rounds of inventory stock.
const INVENTORY_SCHEDULE_INTERVAL: i32 = 64;

/// Main simulation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub(crate) map: Map,
    /// Stream every serf, building and player decision draws from.
    pub(crate) rng: GameRng,
    /// Stream of the map growth pass.
    pub(crate) map_rng: GameRng,
    pub(crate) tick: u32,
    const_tick: u32,
    knight_morale_counter: i32,
    inventory_schedule_counter: i32,
    /// Gold ore and bars left in the world, counted for knight morale.
    pub(crate) gold_total: u32,
    gold_morale_factor: u32,
    pub(crate) options: GameOptions,
    pub(crate) players: Vec<Player>,
    pub(crate) serfs: Collection<SerfId, Serf>,
    pub(crate) flags: Collection<FlagId, Flag>,
    pub(crate) buildings: Collection<BuildingId, Building>,
    pub(crate) inventories: Collection<InventoryId, Inventory>,
    stats: StatsClock,
}

impl Game {
    /// Create a game on an existing map. No players are present yet.
    pub fn new(map: Map, seed: u16, options: GameOptions) -> Self {
        let rng = GameRng::new(seed);
        let mut map_rng = GameRng::new(seed.rotate_left(8));
        map_rng.mix(&rng);
        let gold_total = map.gold_deposit();
        Self {
            map,
            rng,
            map_rng,
            tick: 0,
            const_tick: 0,
            knight_morale_counter: KNIGHT_MORALE_INTERVAL,
            inventory_schedule_counter: INVENTORY_SCHEDULE_INTERVAL,
            gold_total,
            gold_morale_factor: 0,
            options,
            players: Vec::new(),
            serfs: Collection::new(),
            flags: Collection::new(),
            buildings: Collection::new(),
            inventories: Collection::new(),
            stats: StatsClock::default(),
        }
    }

    /// Generate an island map from the configuration and start a game on it.
    pub fn from_config(config: &MapConfig, options: GameOptions) -> Self {
        let mut rng = GameRng::new(config.seed);
        let map = Map::generate_island(config.size, &mut rng);
        Self::new(map, config.seed, options)
    }

    /// Add a player and return its index.
    pub fn add_player(&mut self, settings: PlayerSettings) -> GameResult<u8> {
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::NoSuchPlayer(self.players.len()));
        }
        let index = self.players.len() as u8;
        self.players.push(Player::new(index, settings));
        self.gold_morale_factor = 10 * 1024 * self.players.len() as u32;
        log::info!("player {} joined", index);
        Ok(index)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut Map {
        &mut self.map
    }

    pub fn options(&self) -> &GameOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: GameOptions) {
        self.options = options;
    }

    /// Game time, advanced by `game_speed` on every update.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Number of updates run so far.
    pub fn const_tick(&self) -> u32 {
        self.const_tick
    }

    pub(crate) fn tick16(&self) -> u16 {
        self.tick as u16
    }

    pub(crate) fn random_int(&mut self) -> i32 {
        self.rng.random_int()
    }

    pub fn rng(&self) -> &GameRng {
        &self.rng
    }

    pub fn gold_total(&self) -> u32 {
        self.gold_total
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, index: u8) -> Option<&Player> {
        self.players.get(usize::from(index))
    }

    pub fn player_mut(&mut self, index: u8) -> Option<&mut Player> {
        self.players.get_mut(usize::from(index))
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn serf(&self, id: SerfId) -> Option<&Serf> {
        self.serfs.get(id)
    }

    pub fn serfs(&self) -> impl Iterator<Item = (SerfId, &Serf)> + '_ {
        self.serfs.iter()
    }

    pub fn serf_count(&self) -> usize {
        self.serfs.len()
    }

    pub fn flag(&self, id: FlagId) -> Option<&Flag> {
        self.flags.get(id)
    }

    pub fn flags(&self) -> impl Iterator<Item = (FlagId, &Flag)> + '_ {
        self.flags.iter()
    }

    pub fn flag_at(&self, pos: MapPos) -> Option<FlagId> {
        self.map.flag_at(pos)
    }

    pub fn building(&self, id: BuildingId) -> Option<&Building> {
        self.buildings.get(id)
    }

    pub fn buildings(&self) -> impl Iterator<Item = (BuildingId, &Building)> + '_ {
        self.buildings.iter()
    }

    pub fn building_at(&self, pos: MapPos) -> Option<BuildingId> {
        self.map.building_at(pos)
    }

    pub fn inventory(&self, id: InventoryId) -> Option<&Inventory> {
        self.inventories.get(id)
    }

    pub fn inventories(&self) -> impl Iterator<Item = (InventoryId, &Inventory)> + '_ {
        self.inventories.iter()
    }

    /// Serfs of a player, in index order.
    pub fn player_serfs(&self, player: u8) -> impl Iterator<Item = &Serf> + '_ {
        self.serfs.values().filter(move |s| s.owner() == player)
    }

    /// Serfs standing at or living in the building at `pos`.
    pub fn serfs_at_pos(&self, pos: MapPos) -> Vec<SerfId> {
        self.serfs
            .iter()
            .filter(|(_, s)| s.pos() == pos)
            .map(|(id, _)| id)
            .collect()
    }

    // ── Tick ────────────────────────────────────────────────────────────

    /// Advance the world by one update of `game_speed` ticks.
    pub fn update(&mut self) -> GameResult<()> {
        let delta = self.options.game_speed;
        self.const_tick = self.const_tick.wrapping_add(1);
        self.tick = self.tick.wrapping_add(delta);

        self.clear_serf_request_failure();
        self.map.update(self.tick, &mut self.map_rng);

        self.update_players();

        self.knight_morale_counter -= delta as i32;
        if self.knight_morale_counter < 0 {
            self.update_knight_morale();
            self.knight_morale_counter += KNIGHT_MORALE_INTERVAL;
        }

        self.inventory_schedule_counter -= delta as i32;
        if self.inventory_schedule_counter < 0 {
            self.update_inventories()?;
            self.inventory_schedule_counter += INVENTORY_SCHEDULE_INTERVAL;
        }

        self.update_flags()?;
        self.update_buildings()?;
        self.update_serfs()?;
        self.update_game_stats();
        Ok(())
    }

    /// Reject positions off the map before a command touches any tile.
    pub(crate) fn check_pos(&self, pos: MapPos) -> GameResult<()> {
        if self.map.contains(pos) {
            Ok(())
        } else {
            Err(GameError::InvalidPosition(pos))
        }
    }

    /// Run `count` updates.
    pub fn run(&mut self, count: u32) -> GameResult<()> {
        for _ in 0..count {
            self.update()?;
        }
        Ok(())
    }

    /// Flags and buildings may request serfs again.
    fn clear_serf_request_failure(&mut self) {
        for (_, building) in self.buildings.iter_mut() {
            building.set_serf_request_failed(false);
        }
        for (_, flag) in self.flags.iter_mut() {
            flag.serf_request_clear();
        }
    }

    fn update_players(&mut self) {
        let tick = self.tick;
        for index in 0..self.players.len() {
            let spawns = self.players[index].update(tick);
            for _ in 0..spawns {
                self.spawn_for_player(index as u8);
            }
            self.players[index].sanitize_scores();
        }
    }

    /// One reproduction event: a generic serf, or a knight when one is due
    /// and an inventory holds sword and shield.
    fn spawn_for_player(&mut self, player: u8) {
        let want_knight = self.players[usize::from(player)].next_spawn_is_knight();
        if !want_knight {
            self.spawn_serf(player, false);
            return;
        }
        let Some((serf, inventory)) = self.spawn_serf(player, true) else {
            return;
        };
        let armed = self.inventories.get(inventory).is_some_and(|inv| {
            inv.count_of(Resource::Sword) != 0 && inv.count_of(Resource::Shield) != 0
        });
        if armed && self.promote_to_knight(serf, inventory) {
            self.players[usize::from(player)].knight_spawned();
        }
    }

    /// Create a generic serf in the player's best suited inventory.
    pub(crate) fn spawn_serf(&mut self, player: u8, want_knight: bool) -> Option<(SerfId, InventoryId)> {
        if !self.players.get(usize::from(player))?.can_spawn() {
            return None;
        }

        let mut best: Option<&Inventory> = None;
        for inv in self.inventories.values() {
            if inv.owner() != player || inv.serf_mode() != InventoryMode::In {
                continue;
            }
            if want_knight && (inv.count_of(Resource::Sword) == 0 || inv.count_of(Resource::Shield) == 0) {
                continue;
            }
            if inv.free_serf_count() == 0 {
                best = Some(inv);
                break;
            }
            if best.map_or(true, |b| inv.free_serf_count() < b.free_serf_count()) {
                best = Some(inv);
            }
        }

        match best.map(Inventory::index) {
            Some(inventory) => self.spawn_generic_in(inventory).map(|serf| (serf, inventory)),
            None if want_knight => self.spawn_serf(player, false),
            None => None,
        }
    }

    /// A new generic serf idling in `inventory`.
    pub(crate) fn spawn_generic_in(&mut self, inventory: InventoryId) -> Option<SerfId> {
        let inv = self.inventories.get(inventory)?;
        let owner = inv.owner();
        let pos = self.buildings.get(inv.building())?.pos();
        let id = self.create_serf(owner, SerfType::Generic, pos);
        if let Some(serf) = self.serfs.get_mut(id) {
            serf.stay_idle_in_stock(inventory);
        }
        if let Some(inv) = self.inventories.get_mut(inventory) {
            inv.add_generic(id);
        }
        Some(id)
    }

    /// Equip a generic serf idling in `inventory` as a knight.
    pub(crate) fn promote_to_knight(&mut self, serf: SerfId, inventory: InventoryId) -> bool {
        let Some(inv) = self.inventories.get_mut(inventory) else {
            return false;
        };
        if !inv.promote_serf_to_knight(serf, SerfType::Generic) {
            return false;
        }
        inv.serf_idle_in_stock(serf, SerfType::Knight0);
        self.retype_serf(serf, SerfType::Knight0);
        true
    }

    /// Turn a generic serf idling in `inventory` into `target`, consuming
    /// its tools.
    pub(crate) fn specialize_in(&mut self, serf: SerfId, inventory: InventoryId, target: SerfType) -> bool {
        let Some(inv) = self.inventories.get_mut(inventory) else {
            return false;
        };
        if !inv.specialize_serf(serf, SerfType::Generic, target) {
            return false;
        }
        self.retype_serf(serf, target);
        true
    }

    /// Change the type of a stored serf.
    pub(crate) fn retype_serf(&mut self, id: SerfId, ty: SerfType) {
        if let Some(mut s) = self.serfs.get(id).cloned() {
            self.set_serf_type(&mut s, ty);
            if let Some(slot) = self.serfs.get_mut(id) {
                *slot = s;
            }
        }
    }

    fn update_knight_morale(&mut self) {
        let (gold_total, factor) = (self.gold_total, self.gold_morale_factor);
        for index in 0..self.players.len() {
            let owner = index as u8;
            let inventory_gold: u32 = self
                .inventories
                .values()
                .filter(|inv| inv.owner() == owner)
                .map(|inv| inv.count_of(Resource::GoldBar))
                .sum();
            let military_gold: u32 = self
                .buildings
                .values()
                .filter(|b| b.owner() == owner)
                .map(Building::military_gold_count)
                .sum();
            self.players[index].update_knight_morale(inventory_gold + military_gold, gold_total, factor);
        }
    }

    fn update_flags(&mut self) -> GameResult<()> {
        for id in self.flags.ids() {
            self.update_flag(id)?;
        }
        Ok(())
    }

    fn update_buildings(&mut self) -> GameResult<()> {
        for id in self.buildings.ids() {
            self.update_building(id)?;
        }
        Ok(())
    }

    fn update_serfs(&mut self) -> GameResult<()> {
        for id in self.serfs.ids() {
            self.update_serf(id)?;
        }
        Ok(())
    }

    // ── Resource bookkeeping ────────────────────────────────────────────

    /// A resource left the game for good.
    pub(crate) fn lose_resource(&mut self, res: Resource) {
        if matches!(res, Resource::GoldOre | Resource::GoldBar) {
            self.gold_total = self.gold_total.saturating_sub(1);
        }
    }

    pub(crate) fn add_gold_total(&mut self, delta: i64) {
        self.gold_total = (i64::from(self.gold_total) + delta).max(0) as u32;
    }

    /// A resource on its way to the building behind `dest` will not
    /// arrive.
    pub(crate) fn cancel_transported_resource(&mut self, res: Resource, dest: Option<FlagId>) -> GameResult<()> {
        let Some(dest) = dest else {
            return Ok(());
        };
        let building = self.flags.get(dest).and_then(Flag::building);
        match building.and_then(|b| self.buildings.get_mut(b)) {
            Some(building) => building.cancel_transported_resource(res),
            None => {
                log::warn!("resource {:?} for flag {} lost its destination", res, dest);
                Ok(())
            }
        }
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Save the game in binary form.
    pub fn save<W: std::io::Write>(&self, writer: W) -> Result<(), crate::persistence::SaveError> {
        crate::persistence::save_binary(writer, self)
    }

    /// Load a game saved with `save`.
    pub fn load<R: std::io::Read>(reader: R) -> Result<Self, crate::persistence::SaveError> {
        crate::persistence::load_binary(reader)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::building::BuildingType;
    use crate::map::{Direction, MapObject};
    use crate::serf::SerfState;

    /// A started game for player 0 with its castle near the map centre.
    pub(crate) fn game_with_castle() -> (Game, MapPos) {
        let mut rng = GameRng::new(7);
        let map = Map::generate_flat(3, &mut rng);
        let mut game = Game::new(map, 7, GameOptions::default());
        game.add_player(PlayerSettings::default()).expect("first player");
        let center = game.map.pos(32, 32);
        game.build_castle(center, 0).expect("castle fits on flat land");
        (game, center)
    }

    /// A finished hut of `player` at `pos` on a patch of the player's land,
    /// garrisoned by `knights`. The first knight heads the chain.
    pub(crate) fn staffed_hut(game: &mut Game, pos: MapPos, player: u8, knights: &[SerfType]) -> BuildingId {
        for i in 0..7 {
            let p = game.map.pos_add_spirally(pos, i);
            game.map.set_owner(p, Some(player));
        }
        let flag_pos = game.map.move_down_right(pos);
        let flag = game.flags.allocate_with(|_| Flag::new(player, flag_pos));
        game.map.set_object(flag_pos, MapObject::Flag, Some(flag.get()));
        let id = game
            .buildings
            .allocate_with(|id| Building::new(id, BuildingType::Hut, player, pos, flag));
        game.map.set_object(pos, BuildingType::Hut.map_object(), Some(id.get()));
        game.map.add_path(pos, Direction::DownRight);
        game.map.add_path(flag_pos, Direction::UpLeft);
        if let Some(f) = game.flags.get_mut(flag) {
            f.link_building(id);
        }

        let mut next = None;
        for &ty in knights.iter().rev() {
            let knight = game.create_serf(player, ty, pos);
            if let Some(s) = game.serfs.get_mut(knight) {
                s.set_state(SerfState::DefendingHut { next_knight: next });
            }
            next = Some(knight);
        }
        let b = game.buildings.get_mut(id).expect("hut just placed");
        while !b.build_progress() {}
        for _ in knights {
            b.requested_knight_arrived();
        }
        if let Some(first) = next {
            b.occupy_with_first_knight(first);
        }
        id
    }

    #[test]
    fn test_new_game_is_empty() {
        let game = Game::new(Map::new(1), 1, GameOptions::default());
        assert_eq!(game.player_count(), 0);
        assert_eq!(game.serf_count(), 0);
        assert_eq!(game.tick(), 0);
    }

    #[test]
    fn test_player_limit() {
        let mut game = Game::new(Map::new(1), 1, GameOptions::default());
        for i in 0..MAX_PLAYERS {
            assert_eq!(game.add_player(PlayerSettings::default()), Ok(i as u8));
        }
        assert!(game.add_player(PlayerSettings::default()).is_err());
        assert_eq!(game.gold_morale_factor, 10 * 1024 * 4);
    }

    #[test]
    fn test_update_advances_by_game_speed() {
        let (mut game, _) = game_with_castle();
        game.run(5).expect("update");
        assert_eq!(game.const_tick(), 5);
        assert_eq!(game.tick(), 5 * game.options.game_speed);
    }

    #[test]
    fn test_castle_household() {
        let (game, center) = game_with_castle();
        let player = game.player(0).expect("player");
        assert!(player.has_castle());
        assert_eq!(player.serf_count(SerfType::Knight0), 3);
        assert_eq!(player.serf_count(SerfType::TransporterInventory), 1);
        let castle = game.building_at(center).expect("castle on the map");
        assert_eq!(game.building(castle).and_then(Building::main_serf).is_some(), true);
        let flag_pos = game.map.move_pos(center, Direction::DownRight);
        let flag = game.flag_at(flag_pos).and_then(|f| game.flag(f)).expect("castle flag");
        assert!(flag.has_inventory());
        assert!(flag.accepts_serfs());
    }

    #[test]
    fn test_spawn_serf_prefers_empty_inventory() {
        let (mut game, _) = game_with_castle();
        let inv = game.player(0).and_then(Player::castle_inventory).expect("inventory");
        let before = game.inventory(inv).map(Inventory::free_serf_count).unwrap_or(0);
        let (_, used) = game.spawn_serf(0, false).expect("spawn");
        assert_eq!(used, inv);
        assert_eq!(game.inventory(inv).map(Inventory::free_serf_count), Some(before + 1));
    }

    #[test]
    fn test_lose_gold_lowers_world_total() {
        let (mut game, _) = game_with_castle();
        let total = game.gold_total();
        game.lose_resource(Resource::GoldBar);
        game.lose_resource(Resource::Plank);
        assert_eq!(game.gold_total(), total - 1);
    }

    #[test]
    fn test_same_seed_same_world() {
        let (mut a, _) = game_with_castle();
        let (mut b, _) = game_with_castle();
        a.run(200).expect("update");
        b.run(200).expect("update");
        assert_eq!(a, b);
    }
}
