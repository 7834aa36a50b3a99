//! Deterministic linear congruential stream with stride-based skip-ahead.
//!
//! Every history owns a fixed-length window of the stream: history `i` starts at
//! `seed_base + i * stride` draws, so results are reproducible independent of how
//! work indices are partitioned across ranks.

use crate::SimulationError;

/// Default multiplier of the congruential recurrence
pub const DEFAULT_MULTIPLIER: u64 = 2806196910506780709;
/// Default additive increment
pub const DEFAULT_INCREMENT: u64 = 1;
/// Default power-of-two modulus
pub const DEFAULT_MODULUS: u64 = 1 << 63;
/// Default number of draws reserved per history
pub const DEFAULT_STRIDE: u64 = 152917;

/// Parameters of the congruential stream
#[derive(Clone, Debug)]
pub struct RngSettings {
    /// Initial seed shared by all ranks
    pub seed: u64,
    /// Multiplier g of the recurrence seed = (g * seed + c) mod M
    pub multiplier: u64,
    /// Increment c of the recurrence
    pub increment: u64,
    /// Modulus M, required to be a power of two
    pub modulus: u64,
    /// Draws reserved per history
    pub stride: u64,
}

impl Default for RngSettings {
    fn default() -> Self {
        Self {
            seed: 1,
            multiplier: DEFAULT_MULTIPLIER,
            increment: DEFAULT_INCREMENT,
            modulus: DEFAULT_MODULUS,
            stride: DEFAULT_STRIDE,
        }
    }
}

/// A congruential stream positioned at some number of draws past its seed base
#[derive(Clone, Debug)]
pub struct RngStream {
    seed: u64,
    seed_base: u64,
    multiplier: u64,
    increment: u64,
    mask: u64,
    norm: f64,
    stride: u64,
}

impl RngStream {
    /// Builds a stream from the given parameters.
    ///
    /// Fails if the modulus is not a power of two; all modular arithmetic in the
    /// stream relies on masking.
    pub fn new(settings: &RngSettings) -> Result<Self, SimulationError> {
        if !settings.modulus.is_power_of_two() {
            return Err(SimulationError::InvalidRngModulus {
                modulus: settings.modulus,
            });
        }
        let mask = settings.modulus.wrapping_sub(1);
        Ok(Self {
            seed: settings.seed & mask,
            seed_base: settings.seed & mask,
            multiplier: settings.multiplier,
            increment: settings.increment,
            mask,
            norm: 1.0 / settings.modulus as f64,
            stride: settings.stride,
        })
    }

    /// Current seed
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draws reserved per history
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Returns the next variate in [0, 1)
    pub fn next(&mut self) -> f64 {
        self.seed = self
            .multiplier
            .wrapping_mul(self.seed)
            .wrapping_add(self.increment)
            & self.mask;
        self.seed as f64 * self.norm
    }

    /// Advances the stream by `n` draws from its current position in O(log n)
    pub fn skip_ahead(&mut self, n: u64) {
        self.seed = self.advance(self.seed, n);
    }

    /// Positions the stream `k` whole strides past the seed base
    pub fn skip_ahead_strides(&mut self, k: u64) {
        self.seed = self.advance(self.seed_base, k.wrapping_mul(self.stride));
    }

    /// Makes the current position the new seed base, so subsequent stride skips
    /// are measured from here
    pub fn rebase(&mut self) {
        self.seed_base = self.seed;
    }

    /// Jumps `n` draws past `from` by repeated squaring of the recurrence
    /// coefficients: (g, c) composed n times is (g^n, c * (g^n - 1) / (g - 1)),
    /// both reduced bit by bit modulo M.
    fn advance(&self, from: u64, n: u64) -> u64 {
        let mask = self.mask;
        let mut g_total: u64 = 1;
        let mut c_total: u64 = 0;
        let mut g = self.multiplier;
        let mut c = self.increment;
        let mut n = n;
        while n > 0 {
            if n & 1 == 1 {
                g_total = g_total.wrapping_mul(g) & mask;
                c_total = c_total.wrapping_mul(g).wrapping_add(c) & mask;
            }
            c = g.wrapping_add(1).wrapping_mul(c) & mask;
            g = g.wrapping_mul(g) & mask;
            n >>= 1;
        }
        g_total.wrapping_mul(from).wrapping_add(c_total) & mask
    }
}
