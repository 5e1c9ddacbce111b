//! Fault Injection Module
//!
//! Per-socket pseudo-random gate used to emulate packet loss on top of a
//! reliable stream. Every socket owns its own generator so drop decisions
//! never interfere across sockets.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DEFAULT_DROP_RATE;

/// Packet drop gate
#[derive(Debug, Clone)]
pub struct PacketDropper {
    /// Drop probability in percent
    drop_rate: u8,
    rng: StdRng,
}

impl PacketDropper {
    /// Create a gate with the default drop rate, seeded from OS entropy
    pub fn new() -> Self {
        Self {
            drop_rate: DEFAULT_DROP_RATE,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a gate with the default drop rate and a fixed seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            drop_rate: DEFAULT_DROP_RATE,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Restart the generator from `seed`
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Drop probability in percent
    pub fn drop_rate(&self) -> u8 {
        self.drop_rate
    }

    /// Draw once and decide whether the next packet is dropped
    ///
    /// Draws uniformly from 1..=100 and drops when the draw does not exceed
    /// the drop rate.
    pub fn should_drop(&mut self) -> bool {
        self.rng.gen_range(1..=100u8) <= self.drop_rate
    }
}

impl Default for PacketDropper {
    fn default() -> Self {
        Self::new()
    }
}
