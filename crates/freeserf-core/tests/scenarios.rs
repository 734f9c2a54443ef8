//! Scenario tests for the economy and military rules.
//!
//! All tests drive the public API only; no rendering, no host.

use freeserf_core::inventory::{supplies_preset, Inventory};
use freeserf_core::player::Player;
use freeserf_core::prelude::*;
use freeserf_core::serf::{attacker_wins, fight_morale, HOME_LAND_FACTOR};

// ── Helpers ────────────────────────────────────────────────────────────

fn started_game(seed: u16) -> (Game, MapPos) {
    let mut rng = GameRng::new(seed);
    let map = Map::generate_flat(3, &mut rng);
    let mut game = Game::new(map, seed, GameOptions::default());
    game.add_player(PlayerSettings::default()).expect("first player");
    let center = game.map().pos(32, 32);
    game.build_castle(center, 0).expect("castle fits on flat land");
    (game, center)
}

fn id<T: freeserf_core::collection::EntityId>(index: u32) -> T {
    T::from_index(index).expect("non-zero index")
}

// ── Garrison policy ────────────────────────────────────────────────────

#[test]
fn hut_occupation_never_exceeds_capacity() {
    let mut player = Player::new(0, PlayerSettings::default());
    let hut = BuildingType::Hut;

    player.change_knight_occupation(0, true, -4);
    assert_eq!(hut.occupants_for_level(player.garrison_level(0)), 1);

    player.change_knight_occupation(0, true, 4);
    assert_eq!(player.occupation_max(0), 4);
    assert_eq!(hut.occupants_for_level(player.garrison_level(0)), 3);

    for level in 0..=9 {
        assert!(hut.occupants_for_level(level) <= hut.knight_capacity());
    }
}

// ── Supplies ───────────────────────────────────────────────────────────

#[test]
fn supplies_between_tiers_interpolate() {
    let low = supplies_preset(10);
    let high = supplies_preset(20);
    let mid = supplies_preset(15);

    for (i, &count) in mid.iter().enumerate() {
        let t1 = i64::from(low[i]);
        let t2 = i64::from(high[i]);
        let n = (t2 - t1) * (5 * 6554);
        let base = if n >= 0x8000 { t1 + 1 } else { t1 };
        assert_eq!(i64::from(count), base + (n >> 16), "resource slot {}", i);
        assert!(count >= low[i].min(high[i]));
    }

    let mut inv = Inventory::new(id(1), 0, id(1), id(1));
    inv.apply_supplies_preset(15);
    assert_eq!(inv.resources(), &mid);
}

#[test]
fn castle_starts_with_preset_stock() {
    let (game, center) = started_game(5);
    let supplies = PlayerSettings::default().supplies;
    let castle = game.building_at(center).expect("castle");
    let inv = game
        .building(castle)
        .and_then(|b| b.inventory())
        .and_then(|i| game.inventory(i))
        .expect("castle inventory");
    assert_eq!(inv.resources(), &supplies_preset(supplies));
}

// ── Fights ─────────────────────────────────────────────────────────────

#[test]
fn stronger_knight_wins_at_morale_ratio() {
    // Experience factors 1 and 4 are ranks 0 and 2.
    let weak = fight_morale(0, HOME_LAND_FACTOR);
    let strong = fight_morale(2, HOME_LAND_FACTOR);
    assert_eq!(strong, 4 * weak);

    let mut rng = GameRng::new(0x1234);
    let trials = 10_000;
    let wins = (0..trials)
        .filter(|_| attacker_wins(strong, weak, rng.random()))
        .count();

    let expected = f64::from(strong) / f64::from(strong + weak);
    let rate = wins as f64 / f64::from(trials);
    assert!((rate - expected).abs() < 0.02, "win rate {rate:.3}, expected {expected:.3}");
}

#[test]
fn equal_knights_split_evenly() {
    let morale = fight_morale(1, HOME_LAND_FACTOR);
    let mut rng = GameRng::new(77);
    let wins = (0..10_000).filter(|_| attacker_wins(morale, morale, rng.random())).count();
    assert!((4_700..=5_300).contains(&wins), "{wins} wins of 10000");
}

// ── Building placement ─────────────────────────────────────────────────

#[test]
fn buildings_need_own_land() {
    let (mut game, center) = started_game(3);
    let far = game.map().pos_add(center, 24, 10);
    assert!(!game.can_build_building(far, BuildingType::Lumberjack, 0));
    assert!(game.build_building(far, BuildingType::Lumberjack, 0).is_err());
    assert!(game.build_flag(far, 0).is_err());
}

#[test]
fn demolished_site_leaves_no_road() {
    let (mut game, center) = started_game(3);
    let castle_flag = game.map().move_down_right(center);
    let flag_pos = game.map().pos_add(castle_flag, 4, 0);
    let site = game.map().move_up_left(flag_pos);

    game.build_building(site, BuildingType::Lumberjack, 0).expect("lumberjack");
    game.build_road(castle_flag, &[Direction::Right; 4], 0).expect("road");
    assert!(game.map().has_path(castle_flag, Direction::Right));

    game.demolish_building(site, 0).expect("demolish");
    // The flag keeps its road; only the building goes.
    assert!(game.map().has_flag(flag_pos));
    assert!(!game.map().has_path(site, Direction::DownRight));
    assert!(game.map().has_path(castle_flag, Direction::Right));
}

#[test]
fn no_stock_notice_without_a_stock() {
    let (mut game, _) = started_game(11);
    game.run(50).expect("run");
    let player = game.player(0).expect("player");
    assert!(player.notifications().iter().all(|n| n.kind != NotificationKind::NewStock));
}
