//! Freeserf Headless Simulation Harness
//!
//! Runs whole games of the simulation core in-process and validates the
//! world after each sweep. No rendering, no input, no host.
//!
//! Usage:
//!   cargo run -p freeserf-simtest
//!   cargo run -p freeserf-simtest -- --verbose

use freeserf_core::inventory::supplies_preset;
use freeserf_core::persistence::{load_binary, load_text, save_binary, save_text};
use freeserf_core::prelude::*;
use freeserf_core::serf::{attacker_wins, fight_morale, HOME_LAND_FACTOR};
use serde::Deserialize;

// ── Sweep definition ────────────────────────────────────────────────────

const SWEEP_JSON: &str = r#"[
    { "name": "small_flat",   "terrain": "flat",   "size": 3, "seed": 7,     "players": 1, "ticks": 2000 },
    { "name": "flat_duel",    "terrain": "flat",   "size": 4, "seed": 99,    "players": 2, "ticks": 1500 },
    { "name": "island",       "terrain": "island", "size": 3, "seed": 23130, "players": 1, "ticks": 2000 },
    { "name": "island_fast",  "terrain": "island", "size": 4, "seed": 4242,  "players": 2, "ticks": 1000,
      "options": { "game_speed": 4, "high_miner_food_consumption": true } }
]"#;

#[derive(Debug, Deserialize)]
struct Sweep {
    name: String,
    terrain: String,
    size: u32,
    seed: u16,
    players: u8,
    ticks: u32,
    #[serde(default)]
    options: Option<serde_json::Value>,
}

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

fn main() {
    let verbose = std::env::args().any(|a| a == "--verbose");
    println!("=== Freeserf Simulation Harness ===\n");

    let mut results = Vec::new();

    // 1. Sweep definitions
    let sweeps = match serde_json::from_str::<Vec<Sweep>>(SWEEP_JSON) {
        Ok(s) => s,
        Err(e) => {
            results.push(TestResult {
                name: "sweep_parse".into(),
                passed: false,
                detail: format!("JSON parse error: {}", e),
            });
            Vec::new()
        }
    };

    // 2. Whole games per sweep
    for sweep in &sweeps {
        results.extend(validate_sweep(sweep, verbose));
    }

    // 3. Persistence
    results.extend(validate_persistence(verbose));

    // 4. Fight odds
    results.extend(validate_fight_odds(verbose));

    // 5. Supplies presets
    results.extend(validate_supplies(verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!("\n=== RESULT: {}/{} passed, {} failed ===", passed, total, failed);

    if failed > 0 {
        std::process::exit(1);
    }
}

// ── Setup ───────────────────────────────────────────────────────────────

fn options_for(sweep: &Sweep) -> Result<GameOptions, String> {
    match &sweep.options {
        Some(value) => GameOptions::from_json(&value.to_string()).map_err(|e| e.to_string()),
        None => Ok(GameOptions::default()),
    }
}

/// Found a castle for each player on the first free spots of a coarse
/// grid over the map.
fn start_game(sweep: &Sweep) -> Result<Game, String> {
    let options = options_for(sweep)?;
    let mut game = match sweep.terrain.as_str() {
        "flat" => {
            let mut rng = GameRng::new(sweep.seed);
            Game::new(Map::generate_flat(sweep.size, &mut rng), sweep.seed, options)
        }
        "island" => Game::from_config(
            &MapConfig {
                size: sweep.size,
                seed: sweep.seed,
            },
            options,
        ),
        other => return Err(format!("unknown terrain {:?}", other)),
    };

    for _ in 0..sweep.players {
        let player = game.add_player(PlayerSettings::default()).map_err(|e| e.to_string())?;
        let (cols, rows) = (game.map().cols(), game.map().rows());
        let site = (4..rows.saturating_sub(4))
            .step_by(3)
            .flat_map(|r| (4..cols.saturating_sub(4)).step_by(3).map(move |c| (c, r)))
            .map(|(c, r)| game.map().pos(c, r))
            .find(|&pos| game.can_build_castle(pos, player))
            .ok_or_else(|| format!("no castle site for player {}", player))?;
        game.build_castle(site, player).map_err(|e| e.to_string())?;
    }
    Ok(game)
}

// ── 2. Sweeps ───────────────────────────────────────────────────────────

fn validate_sweep(sweep: &Sweep, verbose: bool) -> Vec<TestResult> {
    println!("--- Sweep {} ---", sweep.name);
    let mut results = Vec::new();

    let mut game = match start_game(sweep) {
        Ok(g) => g,
        Err(e) => {
            results.push(TestResult {
                name: format!("{}_setup", sweep.name),
                passed: false,
                detail: e,
            });
            return results;
        }
    };
    let serfs_at_start = game.serf_count();

    if let Err(e) = game.run(sweep.ticks) {
        results.push(TestResult {
            name: format!("{}_run", sweep.name),
            passed: false,
            detail: format!("tick {} failed: {}", game.tick(), e),
        });
        return results;
    }
    results.push(TestResult {
        name: format!("{}_run", sweep.name),
        passed: true,
        detail: format!(
            "{} updates to tick {}, serfs {} -> {}",
            sweep.ticks,
            game.tick(),
            serfs_at_start,
            game.serf_count()
        ),
    });

    // Every player still holds its castle
    let castles = game.players().iter().filter(|p| p.has_castle()).count();
    results.push(TestResult {
        name: format!("{}_castles", sweep.name),
        passed: castles == usize::from(sweep.players),
        detail: format!("{}/{} castles standing", castles, sweep.players),
    });

    // Building stocks within bounds
    let over: Vec<_> = game
        .buildings()
        .filter(|(_, b)| b.stocks().iter().any(|s| s.res.is_some() && s.total() > s.maximum))
        .map(|(id, _)| id)
        .collect();
    results.push(TestResult {
        name: format!("{}_stock_bounds", sweep.name),
        passed: over.is_empty(),
        detail: if over.is_empty() {
            format!("{} buildings within bounds", game.buildings().count())
        } else {
            format!("{} buildings over their stock maximum", over.len())
        },
    });

    // Land accounting matches the map
    let mut land_ok = true;
    for p in game.players() {
        let owned = game
            .map()
            .positions()
            .filter(|&pos| game.map().owner(pos) == Some(p.index()))
            .count();
        if owned != p.land_area() as usize {
            land_ok = false;
            if verbose {
                println!("    player {} owns {} tiles, counts {}", p.index(), owned, p.land_area());
            }
        }
    }
    results.push(TestResult {
        name: format!("{}_land_area", sweep.name),
        passed: land_ok,
        detail: "player land counters match map ownership".into(),
    });

    // Serf counters match the serfs stored
    let mut counts_ok = true;
    for p in game.players() {
        let stored = game.player_serfs(p.index()).filter(|s| s.serf_type() != SerfType::Dead).count();
        let counted: u32 = p.serf_counts().iter().sum();
        if stored != counted as usize {
            counts_ok = false;
        }
    }
    results.push(TestResult {
        name: format!("{}_serf_counts", sweep.name),
        passed: counts_ok,
        detail: "per-type serf counters match the serf arena".into(),
    });

    // Land shares of the latest history sample add up to the whole map
    let slot = game.stats_clock().history_index(0);
    let shares: u32 = game.players().iter().map(|p| p.stat_history(1 << 2)[slot]).sum();
    let floor = 100 - u32::from(sweep.players);
    results.push(TestResult {
        name: format!("{}_stats_history", sweep.name),
        passed: slot > 0 && (floor..=100).contains(&shares),
        detail: format!("land shares sum to {}% in slot {}", shares, slot),
    });

    // Same seed, same world
    match start_game(sweep).and_then(|mut replay| {
        replay.run(sweep.ticks).map_err(|e| e.to_string())?;
        Ok(replay)
    }) {
        Ok(replay) => results.push(TestResult {
            name: format!("{}_deterministic", sweep.name),
            passed: replay == game,
            detail: format!("replay rng {:?} vs {:?}", replay.rng().words(), game.rng().words()),
        }),
        Err(e) => results.push(TestResult {
            name: format!("{}_deterministic", sweep.name),
            passed: false,
            detail: e,
        }),
    }

    results
}

// ── 3. Persistence ──────────────────────────────────────────────────────

fn validate_persistence(verbose: bool) -> Vec<TestResult> {
    println!("--- Persistence ---");
    let mut results = Vec::new();

    let sweep = Sweep {
        name: "persistence".into(),
        terrain: "flat".into(),
        size: 3,
        seed: 1234,
        players: 1,
        ticks: 600,
        options: None,
    };
    let mut game = match start_game(&sweep).and_then(|mut g| {
        g.run(sweep.ticks).map_err(|e| e.to_string())?;
        Ok(g)
    }) {
        Ok(g) => g,
        Err(e) => {
            results.push(TestResult {
                name: "persistence_setup".into(),
                passed: false,
                detail: e,
            });
            return results;
        }
    };

    let mut bin = Vec::new();
    let binary = save_binary(&mut bin, &game).map_err(|e| e.to_string()).and_then(|_| {
        load_binary(bin.as_slice()).map_err(|e| e.to_string())
    });
    let mut text = Vec::new();
    let json = save_text(&mut text, &game)
        .map_err(|e| e.to_string())
        .and_then(|_| load_text(text.as_slice()).map_err(|e| e.to_string()));
    if verbose {
        println!("    binary {} bytes, text {} bytes", bin.len(), text.len());
    }

    match binary {
        Ok(mut loaded) => {
            let same = loaded == game;
            let resumed = loaded.run(200).is_ok() && game.run(200).is_ok() && loaded == game;
            results.push(TestResult {
                name: "persistence_binary".into(),
                passed: same && resumed,
                detail: format!("round trip {}, resumed in step {}", same, resumed),
            });
        }
        Err(e) => results.push(TestResult {
            name: "persistence_binary".into(),
            passed: false,
            detail: e,
        }),
    }

    results.push(TestResult {
        name: "persistence_text".into(),
        passed: json.is_ok(),
        detail: match json {
            Ok(_) => "text save loads".into(),
            Err(e) => e,
        },
    });

    results
}

// ── 4. Fight odds ───────────────────────────────────────────────────────

fn validate_fight_odds(verbose: bool) -> Vec<TestResult> {
    println!("--- Fight Odds ---");
    let mut results = Vec::new();
    let mut rng = GameRng::new(0x5eed);
    let trials = 10_000u32;

    for (attacker, defender) in [(0u8, 0u8), (2, 0), (0, 2), (4, 1)] {
        let a = fight_morale(attacker, HOME_LAND_FACTOR);
        let d = fight_morale(defender, HOME_LAND_FACTOR);
        let wins = (0..trials).filter(|_| attacker_wins(a, d, rng.random())).count();
        let rate = wins as f64 / f64::from(trials);
        let expected = f64::from(a) / f64::from(a + d);
        if verbose {
            println!("    rank {} vs {}: {:.3} (expected {:.3})", attacker, defender, rate, expected);
        }
        results.push(TestResult {
            name: format!("fight_rank_{}_vs_{}", attacker, defender),
            passed: (rate - expected).abs() < 0.02,
            detail: format!("win rate {:.3}, expected {:.3}", rate, expected),
        });
    }

    results
}

// ── 5. Supplies ─────────────────────────────────────────────────────────

fn validate_supplies(_verbose: bool) -> Vec<TestResult> {
    println!("--- Supplies ---");
    let mut results = Vec::new();

    let totals: Vec<u32> = (0..=50).map(|s| supplies_preset(s).iter().sum::<u32>()).collect();
    let monotonic = totals.windows(2).all(|w| w[0] <= w[1]);
    results.push(TestResult {
        name: "supplies_monotonic".into(),
        passed: monotonic,
        detail: format!("total stock {} at dial 0, {} at dial 50", totals[0], totals[50]),
    });

    let capped = supplies_preset(40) == supplies_preset(50);
    results.push(TestResult {
        name: "supplies_top_tier".into(),
        passed: capped,
        detail: "dial values past 40 keep the top template".into(),
    });

    results
}
