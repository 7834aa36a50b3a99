//! Preallocated particle buffers.
//!
//! Banks never grow during a cycle: pushing into a full bank and popping from an
//! empty one are hard errors of the run, not of the particle.

use std::fmt;
use std::fmt::Debug;

use crate::parallel::Communicator;
use crate::particle::Particle;
use crate::SimulationError;

/// A fixed-capacity LIFO buffer of particles
pub struct ParticleBank {
    label: &'static str,
    particles: Vec<Particle>,
    capacity: usize,
}

impl ParticleBank {
    /// Allocates an empty bank that can hold up to `capacity` particles
    pub fn with_capacity(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            particles: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Name used in diagnostics
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of particles currently stored
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True if no particles are stored
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Capacity the bank was allocated with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a particle, failing when the preallocated storage is exhausted
    pub fn push(&mut self, particle: Particle) -> Result<(), SimulationError> {
        if self.particles.len() == self.capacity {
            return Err(SimulationError::BankFull {
                bank: self.label,
                capacity: self.capacity,
            });
        }
        self.particles.push(particle);
        Ok(())
    }

    /// Removes and returns the most recently pushed particle
    pub fn pop(&mut self) -> Result<Particle, SimulationError> {
        self.particles
            .pop()
            .ok_or(SimulationError::BankEmpty { bank: self.label })
    }

    /// Particle at position `index` in push order
    pub fn get(&self, index: usize) -> &Particle {
        &self.particles[index]
    }

    /// Iterates over the stored particles in push order
    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    /// Removes all particles, keeping the allocation
    pub fn clear(&mut self) {
        self.particles.clear();
    }

    /// Sum of the stored particle weights
    pub fn total_weight(&self) -> f64 {
        self.particles.iter().map(|p| p.weight).sum()
    }

    /// Multiplies every stored particle weight by `factor`
    pub fn scale_weights(&mut self, factor: f64) {
        for particle in &mut self.particles {
            particle.weight *= factor;
        }
    }
}

impl Debug for ParticleBank {
    /// Prints the occupancy instead of the bulk storage
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticleBank")
            .field("label", &self.label)
            .field("len", &self.particles.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// The four banks a rank owns during a run
#[derive(Debug)]
pub struct BankSet {
    /// Input particles of the current cycle
    pub source: ParticleBank,
    /// In-flight particles of the current history
    pub active: ParticleBank,
    /// Secondaries produced by the current particle, drained into `active`
    pub history: ParticleBank,
    /// Fission neutrons held for the next eigenvalue cycle
    pub census: ParticleBank,
}

impl BankSet {
    const ACTIVE_CAPACITY: usize = 16_384;
    const CENSUS_HEADROOM: usize = 5;

    /// Allocates banks sized for the configured target history count
    pub fn for_histories(n_histories: usize) -> Self {
        Self {
            source: ParticleBank::with_capacity("source", n_histories + 1024),
            active: ParticleBank::with_capacity("active", Self::ACTIVE_CAPACITY),
            history: ParticleBank::with_capacity("history", Self::ACTIVE_CAPACITY),
            census: ParticleBank::with_capacity(
                "census",
                Self::CENSUS_HEADROOM * n_histories + 1024,
            ),
        }
    }
}

/// Global indexing of a distributed bank: returns `(idx_start, n_local, n_global)`
/// where `idx_start` is the exclusive prefix sum of the local sizes in rank order
/// and `n_global` the total, broadcast from the last rank
pub fn bank_scanning(bank: &ParticleBank, comm: &dyn Communicator) -> (u64, u64, u64) {
    let n_local = bank.len() as u64;
    let idx_start = comm.exscan_sum(n_local);
    let n_global = comm.bcast_from_last(idx_start + n_local);
    (idx_start, n_local, n_global)
}

/// Scales every particle weight so the bank's global weight sum equals `target`.
///
/// A globally empty (or zero-weight) bank is left untouched.
pub fn normalize_weight(bank: &mut ParticleBank, target: f64, comm: &dyn Communicator) {
    let total = comm.allreduce_sum(bank.total_weight());
    if total > 0.0 {
        bank.scale_weights(target / total);
    }
}
