//! Benchmarks for the tick loop.
//!
//! The per-update cost of a settled economy is the hot path for hosts
//! running many games side by side.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use freeserf_core::persistence::{load_binary, save_binary};
use freeserf_core::prelude::*;

fn started_game(seed: u16) -> Game {
    let mut rng = GameRng::new(seed);
    let map = Map::generate_flat(3, &mut rng);
    let mut game = Game::new(map, seed, GameOptions::default());
    let player = game.add_player(PlayerSettings::default()).expect("first player");
    let center = game.map().pos(32, 32);
    game.build_castle(center, player).expect("castle fits on flat land");
    game
}

fn bench_update(c: &mut Criterion) {
    let mut game = started_game(42);
    game.run(500).expect("warm up");

    c.bench_function("update_one_castle", |b| {
        b.iter(|| {
            game.update().expect("update");
            black_box(game.tick())
        });
    });
}

fn bench_run_fresh(c: &mut Criterion) {
    c.bench_function("run_1000_from_start", |b| {
        b.iter(|| {
            let mut game = started_game(black_box(7));
            game.run(1000).expect("run");
            black_box(game.serf_count())
        });
    });
}

fn bench_save_load(c: &mut Criterion) {
    let mut game = started_game(3);
    game.run(500).expect("warm up");

    c.bench_function("save_load_binary", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            save_binary(&mut buf, black_box(&game)).expect("save");
            black_box(load_binary(buf.as_slice()).expect("load"))
        });
    });
}

criterion_group!(benches, bench_update, bench_run_fresh, bench_save_load);
criterion_main!(benches);
