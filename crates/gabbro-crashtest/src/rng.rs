//! Seedable random number generation for configuration sampling.
//!
//! Every stochastic draw the orchestrator makes goes through [`StressRng`]
//! so a whole test run can be reproduced from a single seed.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Deterministic RNG used for all configuration sampling.
pub struct StressRng {
    inner: SmallRng,
}

impl StressRng {
    /// Creates a new RNG from the given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// Creates a new RNG from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            inner: SmallRng::from_entropy(),
        }
    }

    /// Uniform integer in `[lo, hi]` (inclusive on both ends).
    pub fn int_in(&mut self, lo: i64, hi: i64) -> i64 {
        debug_assert!(lo <= hi);
        self.inner.gen_range(lo..=hi)
    }

    /// Picks one element of `values` uniformly. Weighting is expressed by
    /// repeating elements, matching how the catalog tables are written.
    pub fn pick<T: Copy>(&mut self, values: &[T]) -> T {
        debug_assert!(!values.is_empty());
        values[self.inner.gen_range(0..values.len())]
    }

    /// Returns `true` with probability `1/n`.
    pub fn one_in(&mut self, n: u32) -> bool {
        debug_assert!(n > 0);
        self.inner.gen_range(0..n) == 0
    }

    /// Uniform float in `[0, 1)`.
    pub fn unit_f64(&mut self) -> f64 {
        self.inner.r#gen::<f64>()
    }

    /// Sample from a log-normal distribution with the given parameters of
    /// the underlying normal. Uses a Box-Muller transform, so no extra
    /// distribution crate is needed for this one draw.
    pub fn lognormal(&mut self, mu: f64, sigma: f64) -> f64 {
        let z = self.standard_normal();
        sigma.mul_add(z, mu).exp()
    }

    fn standard_normal(&mut self) -> f64 {
        // Box-Muller; u1 must stay away from 0 for the log.
        let u1 = self.unit_f64().max(f64::MIN_POSITIVE);
        let u2 = self.unit_f64();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}
