//! Periodic player statistics: shares of land, buildings, military and
//! overall score sampled into each player's history on four time scales,
//! and the produced resources per period.

use serde::{Deserialize, Serialize};

use super::Game;
use crate::player::{RESOURCE_HISTORY_LEN, STAT_HISTORY_LEN};

/// Ticks between player history samples.
const PLAYER_STATS_INTERVAL: i32 = 1500;

/// Ticks between resource history samples.
const RESOURCE_STATS_INTERVAL: i32 = 6000;

/// Samples of one scale that make up one sample of the next.
const SCALE_RESET: [i32; 3] = [3, 4, 4];

/// Aspects of the history mode.
const ASPECT_SCORE: usize = 0;
const ASPECT_LAND: usize = 1;
const ASPECT_BUILDINGS: usize = 2;
const ASPECT_MILITARY: usize = 3;

/// Share in percent a player needs to lead an aspect outright.
const CLEAR_WINNER_SHARE: u64 = 75;

/// Sampling clocks and write positions of the statistics history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsClock {
    player_counter: i32,
    resource_counter: i32,
    /// Slot last written per time scale.
    history_index: [usize; 4],
    /// Samples left before the next coarser scale is written.
    scale_counter: [i32; 3],
    resource_index: usize,
    /// Bit per player leading land (low nibble) or military (high nibble).
    score_leader: u8,
}

impl StatsClock {
    /// Slot most recently written on time scale `level`.
    pub fn history_index(&self, level: usize) -> usize {
        self.history_index.get(level).copied().unwrap_or(0)
    }

    pub fn resource_index(&self) -> usize {
        self.resource_index
    }

    pub fn score_leader(&self) -> u8 {
        self.score_leader
    }

    /// Advance the scale indices and return the coarsest scale due.
    fn advance(&mut self) -> usize {
        let mut level = 0;
        self.history_index[0] = (self.history_index[0] + 1) % STAT_HISTORY_LEN;
        while level < SCALE_RESET.len() {
            self.scale_counter[level] -= 1;
            if self.scale_counter[level] >= 0 {
                break;
            }
            self.scale_counter[level] = SCALE_RESET[level];
            level += 1;
            self.history_index[level] = (self.history_index[level] + 1) % STAT_HISTORY_LEN;
        }
        level
    }
}

/// Each value as a percentage of the sum.
fn shares(values: &[u64]) -> impl Iterator<Item = u32> + '_ {
    let total = values.iter().sum::<u64>().max(1);
    values.iter().map(move |&v| ((100 * v) / total) as u32)
}

/// Player holding a clear majority of the values.
fn clear_winner(values: &[u64]) -> Option<usize> {
    shares(values).position(|share| u64::from(share) >= CLEAR_WINNER_SHARE)
}

impl Game {
    pub fn stats_clock(&self) -> &StatsClock {
        &self.stats
    }

    /// Sample the statistics when their period is over. Runs once per
    /// update after every serf has moved.
    pub(crate) fn update_game_stats(&mut self) {
        let delta = self.options.game_speed as i32;

        if self.stats.player_counter > delta {
            self.stats.player_counter -= delta;
        } else {
            self.stats.player_counter += PLAYER_STATS_INTERVAL - delta;
            self.stats.score_leader = 0;
            let level = self.stats.advance();

            let land: Vec<u64> = self.players.iter().map(|p| u64::from(p.land_area())).collect();
            self.record_player_history(level, ASPECT_LAND, &land);
            if let Some(winner) = clear_winner(&land) {
                self.stats.score_leader |= 1 << winner;
            }

            let buildings: Vec<u64> = self.players.iter().map(|p| u64::from(p.building_score())).collect();
            self.record_player_history(level, ASPECT_BUILDINGS, &buildings);

            let military: Vec<u64> = self.players.iter().map(|p| p.military_score()).collect();
            self.record_player_history(level, ASPECT_MILITARY, &military);
            if let Some(winner) = clear_winner(&military) {
                self.stats.score_leader |= 1 << (winner + 4);
            }

            let score: Vec<u64> = self.players.iter().map(|p| p.score()).collect();
            self.record_player_history(level, ASPECT_SCORE, &score);

            log::trace!("tick {}: player stats sampled up to scale {}, leaders {:#04x}", self.tick, level, self.stats.score_leader);
        }

        if self.stats.resource_counter > delta {
            self.stats.resource_counter -= delta;
        } else {
            self.stats.resource_counter += RESOURCE_STATS_INTERVAL - delta;
            let index = self.stats.resource_index;
            for player in &mut self.players {
                player.sample_resource_counts(index);
            }
            self.stats.resource_index = (index + 1) % RESOURCE_HISTORY_LEN;
        }
    }

    /// Write each player's share of `values` on every scale up to `level`.
    fn record_player_history(&mut self, level: usize, aspect: usize, values: &[u64]) {
        let shares: Vec<u32> = shares(values).collect();
        for scale in 0..=level {
            let mode = (aspect << 2) | scale;
            let index = self.stats.history_index[scale];
            for (player, &share) in self.players.iter_mut().zip(&shares) {
                player.set_stat_history(mode, index, share);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameOptions, PlayerSettings};
    use crate::game::tests::game_with_castle;
    use crate::map::Map;
    use crate::random::GameRng;
    use crate::resource::Resource;

    #[test]
    fn test_scale_indices_roll_over() {
        let mut clock = StatsClock::default();
        // The first sample lands on every scale.
        assert_eq!(clock.advance(), 3);
        assert_eq!(clock.history_index, [1, 1, 1, 1]);
        for _ in 0..3 {
            assert_eq!(clock.advance(), 0);
        }
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.history_index, [5, 2, 1, 1]);
    }

    #[test]
    fn test_first_scale_wraps_at_history_len() {
        let mut clock = StatsClock::default();
        for _ in 0..STAT_HISTORY_LEN {
            clock.advance();
        }
        assert_eq!(clock.history_index(0), 0);
    }

    #[test]
    fn test_shares_and_clear_winner() {
        assert_eq!(shares(&[30, 10]).collect::<Vec<_>>(), vec![75, 25]);
        assert_eq!(shares(&[0, 0]).collect::<Vec<_>>(), vec![0, 0]);
        assert_eq!(clear_winner(&[30, 10]), Some(0));
        assert_eq!(clear_winner(&[20, 10]), None);
    }

    #[test]
    fn test_sole_player_holds_all_land() {
        let (mut game, _) = game_with_castle();
        game.update().expect("update");
        let index = game.stats_clock().history_index(0);
        assert_eq!(index, 1);
        for aspect in [ASPECT_LAND, ASPECT_BUILDINGS, ASPECT_SCORE] {
            assert_eq!(game.players[0].stat_history(aspect << 2)[index], 100);
        }
        assert_eq!(game.stats_clock().score_leader() & 1, 1);
    }

    #[test]
    fn test_player_stats_sampled_each_period() {
        let (mut game, _) = game_with_castle();
        let per_period = PLAYER_STATS_INTERVAL as u32 / game.options.game_speed;
        game.run(per_period + 1).expect("run");
        assert_eq!(game.stats_clock().history_index(0), 2);
    }

    #[test]
    fn test_land_leader_takes_three_quarters() {
        let mut rng = GameRng::new(9);
        let map = Map::generate_flat(3, &mut rng);
        let mut game = Game::new(map, 9, GameOptions::default());
        for _ in 0..2 {
            game.add_player(PlayerSettings::default()).expect("player");
        }
        for _ in 0..30 {
            game.players[0].increase_land_area();
        }
        for _ in 0..10 {
            game.players[1].increase_land_area();
        }
        game.update_game_stats();

        let mode = ASPECT_LAND << 2;
        assert_eq!(game.players[0].stat_history(mode)[1], 75);
        assert_eq!(game.players[1].stat_history(mode)[1], 25);
        // The first sample reaches the coarsest scale too.
        assert_eq!(game.players[1].stat_history(mode | 3)[1], 25);
        assert_eq!(game.stats_clock().score_leader(), 1);
    }

    #[test]
    fn test_resource_counts_move_into_history() {
        let (mut game, _) = game_with_castle();
        game.players[0].increase_res_count(Resource::Plank);
        game.players[0].increase_res_count(Resource::Plank);
        game.update_game_stats();
        assert_eq!(game.players[0].resource_history(Resource::Plank)[0], 2);
        assert_eq!(game.players[0].resource_count(Resource::Plank), 0);
        assert_eq!(game.stats_clock().resource_index(), 1);
    }
}
