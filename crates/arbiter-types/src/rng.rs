//! Seeded session RNG — Mulberry32.
//!
//! All server-side dice go through `RngState` so a session is reproducible
//! under a fixed seed: the state is two `u32`s and survives persistence.
//! Client-supplied rolls bypass this entirely (they arrive pre-rolled with
//! integrity fields).

use serde::{Deserialize, Serialize};

/// RNG state owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: u32,
    pub counter: u32,
}

impl RngState {
    /// Create RNG with the given seed (counter starts at 0).
    pub fn new(seed: u32) -> Self {
        Self { seed, counter: 0 }
    }

    /// Next random f64 in [0, 1). Advances counter by 1.
    pub fn next_f64(&mut self) -> f64 {
        self.counter = self.counter.wrapping_add(1);
        mulberry32(self.seed.wrapping_add(self.counter))
    }

    /// Random i64 in `[min, max]` inclusive.
    pub fn next_int(&mut self, min: i64, max: i64) -> i64 {
        let value = self.next_f64();
        min + (value * (max - min + 1) as f64) as i64
    }

    /// One percentile die: uniform in [1, 100].
    pub fn d100(&mut self) -> i64 {
        self.next_int(1, 100)
    }

    /// Roll a pool of `count` percentile dice (at least one).
    pub fn d100_pool(&mut self, count: u32) -> Vec<i64> {
        (0..count.max(1)).map(|_| self.d100()).collect()
    }
}

/// Mulberry32 PRNG — fast, good distribution, seedable.
///
/// 32-bit wrapping arithmetic throughout; returns a value in [0, 1).
fn mulberry32(input: u32) -> f64 {
    let mut t: i32 = input.wrapping_add(0x6D2B79F5) as i32;

    let lhs = ((t as u32) ^ ((t as u32) >> 15)) as i32;
    let rhs = t | 1;
    t = lhs.wrapping_mul(rhs);

    let lhs2 = ((t as u32) ^ ((t as u32) >> 7)) as i32;
    let rhs2 = t | 61;
    let mul = lhs2.wrapping_mul(rhs2);
    t ^= t.wrapping_add(mul);

    let result = (t as u32) ^ ((t as u32) >> 14);
    result as f64 / 4294967296.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Golden d100 sequence for seed 42, pinned so persistence-era replays
    // stay stable if the generator is ever touched.
    const SEED_42_D100: [i64; 10] = [100, 84, 4, 7, 63, 85, 38, 55, 15, 22];

    #[test]
    fn d100_golden_sequence_seed_42() {
        let mut rng = RngState::new(42);
        for (i, &expected) in SEED_42_D100.iter().enumerate() {
            assert_eq!(rng.d100(), expected, "seed=42, roll index {i}");
        }
        assert_eq!(rng.counter, 10);
    }

    #[test]
    fn deterministic_same_seed() {
        let mut a = RngState::new(7);
        let mut b = RngState::new(7);
        for _ in 0..100 {
            assert_eq!(a.d100(), b.d100());
        }
    }

    #[test]
    fn pool_of_zero_still_rolls_one_die() {
        let mut rng = RngState::new(1);
        assert_eq!(rng.d100_pool(0).len(), 1);
        assert_eq!(rng.d100_pool(4).len(), 4);
    }

    proptest! {
        #[test]
        fn d100_always_in_range(seed in any::<u32>()) {
            let mut rng = RngState::new(seed);
            for _ in 0..50 {
                let v = rng.d100();
                prop_assert!((1..=100).contains(&v));
            }
        }

        #[test]
        fn next_int_respects_bounds(seed in any::<u32>(), lo in -50i64..50, span in 0i64..100) {
            let mut rng = RngState::new(seed);
            let hi = lo + span;
            let v = rng.next_int(lo, hi);
            prop_assert!((lo..=hi).contains(&v));
        }
    }
}
