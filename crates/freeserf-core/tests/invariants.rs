//! Whole-world properties of running games.
//!
//! Exercises: castle founding → tick loop → save/load, across seeds.
//!
//! Run with: PROPTEST_CASES=256 cargo test --release --test invariants

use proptest::prelude::*;

use freeserf_core::persistence::{load_binary, load_text, save_binary, save_text};
use freeserf_core::prelude::*;

// ── Helpers ────────────────────────────────────────────────────────────

/// A one-player game on flat land with the castle placed at the centre.
fn started_game(seed: u16) -> Game {
    let mut rng = GameRng::new(seed);
    let map = Map::generate_flat(3, &mut rng);
    let mut game = Game::new(map, seed, GameOptions::default());
    let player = game.add_player(PlayerSettings::default()).expect("first player");
    let center = game.map().pos(32, 32);
    game.build_castle(center, player).expect("castle fits on flat land");
    game
}

fn check_world(game: &Game) -> Result<(), TestCaseError> {
    for (id, b) in game.buildings() {
        for stock in b.stocks() {
            prop_assert!(
                stock.total() <= stock.maximum || stock.res.is_none(),
                "{}: stock {:?} over its maximum",
                id,
                stock
            );
        }
    }
    for (id, inv) in game.inventories() {
        prop_assert!(inv.queue().iter().flatten().count() <= 2, "{} queue overflow", id);
    }
    for (id, serf) in game.serfs() {
        prop_assert!(serf.pos() < game.map().tile_count(), "{} is off the map", id);
        prop_assert!(usize::from(serf.owner()) < game.player_count());
    }
    for player in game.players() {
        let owned = game
            .map()
            .positions()
            .filter(|&p| game.map().owner(p) == Some(player.index()))
            .count();
        prop_assert_eq!(player.land_area() as usize, owned);
    }
    Ok(())
}

// ── Properties ─────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Stocks, queues and land accounting stay consistent while running.
    #[test]
    fn world_stays_consistent(seed in 1u16.., ticks in 1u32..400) {
        let mut game = started_game(seed);
        check_world(&game)?;
        game.run(ticks).expect("run");
        check_world(&game)?;
    }

    /// Two games from the same seed are identical after the same updates.
    #[test]
    fn same_seed_same_world(seed in 1u16.., ticks in 1u32..300) {
        let mut a = started_game(seed);
        let mut b = started_game(seed);
        a.run(ticks).expect("run a");
        b.run(ticks).expect("run b");
        prop_assert_eq!(a.rng(), b.rng());
        prop_assert!(a == b, "games diverged after {} updates", ticks);
    }

    /// A loaded game continues exactly like the one it was saved from.
    #[test]
    fn saved_game_resumes_identically(seed in 1u16.., before in 1u32..200, after in 1u32..200) {
        let mut game = started_game(seed);
        game.run(before).expect("run");

        let mut buf = Vec::new();
        save_binary(&mut buf, &game).expect("save");
        let mut loaded = load_binary(buf.as_slice()).expect("load");
        prop_assert!(loaded == game);

        game.run(after).expect("run original");
        loaded.run(after).expect("run loaded");
        prop_assert!(loaded == game);
    }
}

#[test]
fn text_save_matches_binary() {
    let mut game = started_game(99);
    game.run(150).expect("run");

    let mut bin = Vec::new();
    save_binary(&mut bin, &game).expect("binary save");
    let mut text = Vec::new();
    save_text(&mut text, &game).expect("text save");

    let from_bin = load_binary(bin.as_slice()).expect("binary load");
    let from_text = load_text(text.as_slice()).expect("text load");
    assert_eq!(from_bin, from_text);
}

#[test]
fn different_seeds_diverge() {
    let mut a = started_game(1);
    let mut b = started_game(2);
    a.run(200).expect("run a");
    b.run(200).expect("run b");
    assert_ne!(a.rng(), b.rng());
}
