// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Random numbers generator for the simulated environment

use core::num::ParseIntError;

use rand_chacha::ChaCha8Rng;
use rand_core::RngCore;
use rand_core::SeedableRng;

/// Seed used when `LP_SIM_SEED` is not set
const DEFAULT_SEED: u64 = 0x0003_2620;

/// Read the simulation seed
///
/// To change the seed set the environment variable `LP_SIM_SEED` before
/// running `cargo run`.
///
/// # Errors
///
/// Returns an error if the variable is not a number.
pub fn seed() -> Result<u64, ParseIntError> {
    /// Seed
    const SEED: Option<&'static str> = option_env!("LP_SIM_SEED");

    SEED.map_or(Ok(DEFAULT_SEED), str::parse)
}

/// A reproducible source of jitter for simulated events
pub struct Jitter {
    /// Inner generator
    rng: ChaCha8Rng,
}

impl Jitter {
    /// Create a generator from a seed
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Return a number in `low..high`, or `low` if the range is empty
    pub fn between(&mut self, low: u32, high: u32) -> u32 {
        match high.checked_sub(low) {
            Some(0) | None => low,
            Some(span) => low + self.rng.next_u32() % span,
        }
    }
}

impl RngCore for Jitter {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_stays_in_range() {
        let mut jitter = Jitter::from_seed(1);
        for _ in 0..100 {
            let value = jitter.between(10, 20);
            assert!((10..20).contains(&value));
        }
    }

    #[test]
    fn empty_range() {
        let mut jitter = Jitter::from_seed(1);
        assert_eq!(jitter.between(7, 7), 7);
        assert_eq!(jitter.between(7, 3), 7);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut first = Jitter::from_seed(42);
        let mut second = Jitter::from_seed(42);
        for _ in 0..10 {
            assert_eq!(first.next_u32(), second.next_u32());
        }
    }
}
