//! Deterministic game PRNG.
//!
//! Three 16-bit words of state, stepped with add/xor/rotate. Every random
//! decision in the simulation draws from one `GameRng`, so a seed plus the
//! input schedule reproduces a game exactly.

use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameRng {
    state: [u16; 3],
}

impl GameRng {
    /// Seed all three state words with the same value.
    pub fn new(seed: u16) -> Self {
        Self {
            state: [seed, seed, seed],
        }
    }

    pub fn from_words(s0: u16, s1: u16, s2: u16) -> Self {
        Self { state: [s0, s1, s2] }
    }

    pub fn words(&self) -> [u16; 3] {
        self.state
    }

    /// Draw the next 16-bit value.
    pub fn random(&mut self) -> u16 {
        let [s0, s1, s2] = &mut self.state;
        let r = s0.wrapping_add(*s1) ^ *s2;
        *s2 = s2.wrapping_add(*s1);
        *s1 ^= *s2;
        *s1 = s1.rotate_right(1);
        *s2 = s2.rotate_right(1);
        *s0 = r;
        r
    }

    /// Draw as a non-negative `i32`, the form most game formulas use.
    pub fn random_int(&mut self) -> i32 {
        i32::from(self.random())
    }

    /// Mix another state into this one, word by word.
    pub fn mix(&mut self, other: &GameRng) {
        for (a, b) in self.state.iter_mut().zip(other.state.iter()) {
            *a ^= *b;
        }
    }

    fn packed(&self) -> u64 {
        u64::from(self.state[0]) | u64::from(self.state[1]) << 16 | u64::from(self.state[2]) << 32
    }
}

impl Default for GameRng {
    fn default() -> Self {
        Self::new(0x5a5a)
    }
}

/// Text form: 16 digits `1`..`8`, each carrying three bits of state,
/// lowest bits first.
impl fmt::Display for GameRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tmp = self.packed();
        for _ in 0..16 {
            let c = b'1' + (tmp & 0x07) as u8;
            write!(f, "{}", c as char)?;
            tmp >>= 3;
        }
        Ok(())
    }
}

impl FromStr for GameRng {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 16 {
            return Err(GameError::InvalidRandomState(s.to_string()));
        }
        let mut tmp: u64 = 0;
        for &c in bytes.iter().rev() {
            if !(b'1'..=b'8').contains(&c) {
                return Err(GameError::InvalidRandomState(s.to_string()));
            }
            tmp = (tmp << 3) | u64::from(c - b'1');
        }
        Ok(Self::from_words(
            (tmp & 0xffff) as u16,
            ((tmp >> 16) & 0xffff) as u16,
            ((tmp >> 32) & 0xffff) as u16,
        ))
    }
}

impl RngCore for GameRng {
    fn next_u32(&mut self) -> u32 {
        u32::from(self.random()) << 16 | u32::from(self.random())
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(self.next_u32()) << 32 | u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(2) {
            let bytes = self.random().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for GameRng {
    type Seed = [u8; 6];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::from_words(
            u16::from_le_bytes([seed[0], seed[1]]),
            u16::from_le_bytes([seed[2], seed[3]]),
            u16::from_le_bytes([seed[4], seed[5]]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_draws_from_known_seed() {
        let mut rng = GameRng::new(0x1234);
        // r = (s0 + s1) ^ s2 with all words equal.
        assert_eq!(rng.random(), (0x1234u16.wrapping_add(0x1234)) ^ 0x1234);
        let words = rng.words();
        let s2 = 0x1234u16.wrapping_add(0x1234);
        let s1 = 0x1234u16 ^ s2;
        assert_eq!(words[1], s1.rotate_right(1));
        assert_eq!(words[2], s2.rotate_right(1));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = GameRng::new(42);
        let mut b = GameRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.random(), b.random());
        }
    }

    #[test]
    fn test_string_form_roundtrip() {
        let mut rng = GameRng::from_words(0xdead, 0xbeef, 0x0123);
        rng.random();
        let text = rng.to_string();
        assert_eq!(text.len(), 16);
        let parsed: GameRng = text.parse().expect("valid state string");
        assert_eq!(parsed, rng);
    }

    #[test]
    fn test_bad_state_string_rejected() {
        assert!("123".parse::<GameRng>().is_err());
        assert!("9999999999999999".parse::<GameRng>().is_err());
    }

    #[test]
    fn test_rand_traits_are_deterministic() {
        use rand::Rng;
        let mut a = GameRng::from_seed([1, 2, 3, 4, 5, 6]);
        let mut b = GameRng::from_seed([1, 2, 3, 4, 5, 6]);
        let xs: Vec<u8> = (0..32).map(|_| a.gen_range(0..10)).collect();
        let ys: Vec<u8> = (0..32).map(|_| b.gen_range(0..10)).collect();
        assert_eq!(xs, ys);
    }
}
