//! Particle record and the event/reaction tags attached to it during transport

use nalgebra::Vector3;

/// Transport event selected by the dispatcher.
///
/// Coincident surface and grid crossings are represented by an explicit
/// `coincident_mesh` field instead of a compound tag, so handlers can match on
/// the crossing kind and still see the coincidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The particle collides inside its current cell
    Collision,
    /// The particle reaches a bounding surface of its current cell
    SurfaceCrossing {
        /// Index of the surface that is hit first
        surface: usize,
        /// The surface lies exactly on a tally grid plane
        coincident_mesh: bool,
    },
    /// The particle reaches a tally grid plane
    MeshCrossing,
    /// Reserved for repeated-geometry crossings; no lattice geometry produces it yet
    LatticeCrossing {
        /// The lattice boundary lies exactly on a tally grid plane
        coincident_mesh: bool,
    },
    /// The particle reaches the configured end of the simulated time window
    TimeBoundary,
}

/// Collision outcome sampled against the local material
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reaction {
    /// Absorption without secondaries
    Capture,
    /// Outgoing neutrons drawn from the scattering matrix
    Scattering,
    /// Prompt and delayed fission neutrons
    Fission,
    /// Time absorption (or production for negative alpha) in alpha mode
    TimeReaction,
}

/// A weighted particle in flight.
///
/// Invariants while `alive`: the direction is a unit vector within numerical
/// tolerance and `cell` satisfies the cell membership predicate.
#[derive(Clone, Debug)]
pub struct Particle {
    /// Position in problem units
    pub position: Vector3<f64>,
    /// Unit direction of flight
    pub direction: Vector3<f64>,
    /// Energy group index
    pub group: usize,
    /// Elapsed time
    pub time: f64,
    /// Group speed of the current material
    pub speed: f64,
    /// Statistical weight
    pub weight: f64,
    /// Cleared on absorption, boundary kill or loss
    pub alive: bool,
    /// Index of the containing cell
    pub cell: usize,
    /// Surface crossed most recently, if any
    pub surface: Option<usize>,
    /// Event selected by the most recent dispatch, if any
    pub event: Option<Event>,
}

impl Particle {
    /// Returns a particle at the origin heading along +z with unit weight and speed
    pub fn new() -> Self {
        Self {
            position: Vector3::zeros(),
            direction: Vector3::new(0.0, 0.0, 1.0),
            group: 0,
            time: 0.0,
            speed: 1.0,
            weight: 1.0,
            alive: true,
            cell: 0,
            surface: None,
            event: None,
        }
    }

    /// Advances the particle by [PRECISION](crate::PRECISION) along its direction,
    /// keeping time consistent with the distance travelled
    pub fn nudge(&mut self) {
        self.position += self.direction * crate::PRECISION;
        self.time += crate::PRECISION / self.speed;
    }
}

impl Default for Particle {
    fn default() -> Self {
        Self::new()
    }
}
