//!
//! Event-driven multigroup Monte Carlo neutron transport kernel. Entry point is the
//! [run_simulation] function; multi-rank runs go through [run_simulation_threaded].
//!

/// Re-export the version of nalgebra used by this crate
pub use nalgebra;

/// Particle banks with scan-based global indexing
pub mod bank;
/// Quadric surface evaluation, boundary conditions and cell membership
pub mod geometry;
/// Configuration record consumed by the simulation (materials, cells, sources, settings)
pub mod input;
/// Rectilinear space-time grids: bin lookup and distance to the next grid plane
pub mod mesh;
/// Particle record and event/reaction tags
pub mod particle;
/// Communicator contract with a serial stub and an in-process threaded implementation
pub mod parallel;
/// Reaction sampling: scattering, fission, capture and the time reaction
pub mod physics;
/// Population control between eigenvalue cycles
pub mod population;
/// Deterministic linear congruential stream with stride-based skip-ahead
pub mod rng;
/// The simulation context object and the outer cycle driver
pub mod simulation;
/// Per-bin score accumulators with history and cycle statistics
pub mod tally;
/// The per-particle event dispatcher
pub mod transport;

use std::time::Duration;

use thiserror::Error as ThisError;

pub use crate::bank::{BankSet, ParticleBank};
pub use crate::geometry::{BoundaryCondition, Cell, Surface};
pub use crate::input::{
    Input, Material, PopulationControl, Settings, Source, TallyRequest, Techniques, WeightWindow,
};
pub use crate::mesh::Mesh;
pub use crate::parallel::{Communicator, SerialComm, ThreadComm};
pub use crate::particle::{Event, Particle, Reaction};
pub use crate::rng::{RngSettings, RngStream};
pub use crate::simulation::Simulation;
pub use crate::tally::{ScoreArray, ScoreFlags, Tally};

// TODO: lattice geometry (the dispatcher hook and event tags are in place)
// TODO: distinct error types for the individual input validation failures

/// Positional nudge applied after a boundary or grid crossing so the particle
/// ends up strictly on the far side (in problem length units).
pub const PRECISION: f64 = 1e-9;

/// Sentinel for impossible distances.
pub const INF: f64 = f64::INFINITY;

/// Error type returned when a simulation cannot be set up or aborts
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum SimulationError {
    /// The configuration record failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The random stream modulus must be a power of two for mask arithmetic
    #[error("random stream modulus {modulus:#x} is not a power of two")]
    InvalidRngModulus {
        /// The offending modulus
        modulus: u64,
    },
    /// A particle bank ran out of preallocated storage
    #[error("{bank} bank overflow at capacity {capacity}")]
    BankFull {
        /// Name of the bank
        bank: &'static str,
        /// Capacity the bank was created with
        capacity: usize,
    },
    /// A particle was requested from a bank that holds none
    #[error("pop from empty {bank} bank")]
    BankEmpty {
        /// Name of the bank
        bank: &'static str,
    },
    /// Any error that is not represented by some other explicit variant
    #[error("unknown error")]
    Unknown(#[from] anyhow::Error),
}

/// Result data returned when a simulation completes
#[derive(Clone, Debug)]
pub struct SimulationOutput {
    pub(crate) tally: Tally,
    pub(crate) k_cycle: Vec<f64>,
    pub(crate) alpha_cycle: Vec<f64>,
    pub(crate) n_inactive: usize,
    pub(crate) runtime: Duration,
}

impl SimulationOutput {
    /// Returns the tally with its per-cycle mean and standard deviation arrays.
    ///
    /// Reduced statistics are only populated on the master rank.
    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Per-cycle multiplication factor iterates (empty for fixed-source runs)
    pub fn k_cycle(&self) -> &[f64] {
        &self.k_cycle
    }

    /// Per-cycle time eigenvalue iterates (empty unless alpha mode is enabled)
    pub fn alpha_cycle(&self) -> &[f64] {
        &self.alpha_cycle
    }

    /// Mean multiplication factor over the active cycles, if any were run
    pub fn k_eff(&self) -> Option<f64> {
        let active = self.k_cycle.get(self.n_inactive..)?;
        if active.is_empty() {
            return None;
        }
        Some(active.iter().sum::<f64>() / active.len() as f64)
    }

    /// Wall-clock time spent inside the cycle driver
    pub fn runtime(&self) -> Duration {
        self.runtime
    }
}

/// Runs the configured simulation on a single rank
pub fn run_simulation(input: &Input) -> Result<SimulationOutput, SimulationError> {
    let comm = SerialComm::default();
    Simulation::new(input, &comm)?.run()
}

/// Runs the configured simulation as `n_ranks` SPMD ranks, one OS thread per rank,
/// synchronizing through an in-process [ThreadComm].
///
/// Work indices and random streams are partitioned exactly as they would be under
/// MPI, so the reduced results agree with a single-rank run of the same input.
/// Returns the master rank's output.
pub fn run_simulation_threaded(
    input: &Input,
    n_ranks: usize,
) -> Result<SimulationOutput, SimulationError> {
    if n_ranks <= 1 {
        return run_simulation(input);
    }
    let comms = ThreadComm::create(n_ranks);
    let mut outputs: Vec<Result<SimulationOutput, SimulationError>> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| s.spawn(move || Simulation::new(input, &comm)?.run()))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    });
    // Surface the first rank failure before extracting the master output
    if let Some(pos) = outputs.iter().position(|o| o.is_err()) {
        return outputs.swap_remove(pos);
    }
    outputs.swap_remove(0)
}
