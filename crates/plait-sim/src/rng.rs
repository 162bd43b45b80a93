//! Tiny deterministic RNG for the simulator.
//!
//! SplitMix64: reproducible across platforms, no dependencies, and good
//! enough to drive edit scripts. Not for anything security-adjacent.

use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seeded deterministic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a generator from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(GOLDEN_GAMMA),
        }
    }

    /// Next pseudo-random `u64`.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Next value in `[0, upper)`; 0 when `upper` is 0.
    pub fn below(&mut self, upper: u64) -> u64 {
        if upper == 0 {
            return 0;
        }
        self.next_u64() % upper
    }

    /// Bernoulli trial with integer percent.
    pub fn percent(&mut self, p: u8) -> bool {
        if p == 0 {
            return false;
        }
        if p >= 100 {
            return true;
        }
        self.below(100) < u64::from(p)
    }

    /// A random lowercase word with length in `[min, max]`.
    pub fn word(&mut self, min: u64, max: u64) -> String {
        let len = min + self.below(max.saturating_sub(min) + 1);
        (0..len)
            .map(|_| char::from(b'a' + u8::try_from(self.below(26)).unwrap_or(0)))
            .collect()
    }
}
