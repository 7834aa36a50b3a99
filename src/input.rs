//! The in-memory configuration record consumed by a simulation.
//!
//! These are plain data types filled in by the caller (or a front end outside
//! this crate). [Input::validate] runs once before transport starts; the
//! transport kernel itself assumes a validated record.

use log::info;
use nalgebra::Vector3;

use crate::geometry::{Cell, Surface};
use crate::mesh::Mesh;
use crate::rng::RngSettings;
use crate::tally::ScoreFlags;
use crate::{SimulationError, INF};

/// Multigroup material data, all arrays indexed by energy group
#[derive(Clone, Debug)]
pub struct Material {
    /// Group speeds
    pub speed: Vec<f64>,
    /// Total cross-section
    pub total: Vec<f64>,
    /// Capture cross-section
    pub capture: Vec<f64>,
    /// Scattering cross-section
    pub scatter: Vec<f64>,
    /// Fission cross-section
    pub fission: Vec<f64>,
    /// Scattering multiplicity per group
    pub nu_s: Vec<f64>,
    /// Prompt fission multiplicity per group
    pub nu_p: Vec<f64>,
    /// Delayed fission multiplicity, `[group][delayed group]`
    pub nu_d: Vec<Vec<f64>>,
    /// Outgoing-group distribution of scattering, `[group][outgoing group]`
    pub chi_s: Vec<Vec<f64>>,
    /// Outgoing-group spectrum of prompt fission, `[group][outgoing group]`
    pub chi_p: Vec<Vec<f64>>,
    /// Outgoing-group spectrum per delayed group, `[delayed group][outgoing group]`
    pub chi_d: Vec<Vec<f64>>,
    /// Decay constant per delayed group
    pub decay: Vec<f64>,
}

impl Material {
    /// Number of energy groups
    pub fn n_groups(&self) -> usize {
        self.total.len()
    }

    /// Number of delayed neutron groups
    pub fn n_delayed_groups(&self) -> usize {
        self.decay.len()
    }

    /// Total fission multiplicity, prompt plus delayed, for group `g`
    pub fn nu_total(&self, g: usize) -> f64 {
        self.nu_p[g] + self.nu_d[g].iter().sum::<f64>()
    }

    /// One-group material without delayed neutrons, handy for analytic problems
    pub fn one_group(total: f64, capture: f64, scatter: f64, fission: f64, nu_p: f64, speed: f64) -> Self {
        Self {
            speed: vec![speed],
            total: vec![total],
            capture: vec![capture],
            scatter: vec![scatter],
            fission: vec![fission],
            nu_s: vec![1.0],
            nu_p: vec![nu_p],
            nu_d: vec![vec![]],
            chi_s: vec![vec![1.0]],
            chi_p: vec![vec![1.0]],
            chi_d: vec![],
            decay: vec![],
        }
    }

    fn validate(&self, index: usize, n_groups: usize) -> Result<(), SimulationError> {
        let bad = |what: &str| {
            Err(SimulationError::InvalidInput(format!(
                "material {}: {}",
                index, what
            )))
        };
        let j = self.n_delayed_groups();
        for (name, array) in [
            ("speed", &self.speed),
            ("total", &self.total),
            ("capture", &self.capture),
            ("scatter", &self.scatter),
            ("fission", &self.fission),
            ("nu_s", &self.nu_s),
            ("nu_p", &self.nu_p),
        ] {
            if array.len() != n_groups {
                return bad(&format!("{} must have one entry per group", name));
            }
        }
        if self.nu_d.len() != n_groups
            || self.nu_d.iter().any(|per_group| per_group.len() != j)
        {
            return bad("nu_d must be shaped [group][delayed group]");
        }
        if self.chi_s.len() != n_groups
            || self.chi_s.iter().any(|row| row.len() != n_groups)
        {
            return bad("chi_s must be a square per-group matrix");
        }
        if self.chi_p.len() != n_groups
            || self.chi_p.iter().any(|row| row.len() != n_groups)
        {
            return bad("chi_p must be a square per-group matrix");
        }
        if self.chi_d.len() != j || self.chi_d.iter().any(|row| row.len() != n_groups) {
            return bad("chi_d must be shaped [delayed group][group]");
        }
        if self.decay.iter().any(|&lambda| lambda <= 0.0) {
            return bad("delayed decay constants must be positive");
        }
        if self.speed.iter().any(|&v| v <= 0.0) {
            return bad("group speeds must be positive");
        }
        Ok(())
    }
}

/// One external particle source
#[derive(Clone, Debug)]
pub struct Source {
    /// Emission point; ignored when `extent` is given
    pub point: Vector3<f64>,
    /// Axis-aligned emission box as [min, max] per axis
    pub extent: Option<[[f64; 2]; 3]>,
    /// Fixed emission direction; isotropic when absent
    pub direction: Option<Vector3<f64>>,
    /// Relative emission probability per energy group
    pub group_pdf: Vec<f64>,
    /// Emission time window
    pub time_window: [f64; 2],
    /// Relative probability of this source among all sources
    pub probability: f64,
}

impl Default for Source {
    /// An isotropic unit-probability point source at the origin emitting in
    /// group 0 at time zero
    fn default() -> Self {
        Self {
            point: Vector3::zeros(),
            extent: None,
            direction: None,
            group_pdf: vec![1.0],
            time_window: [0.0, 0.0],
            probability: 1.0,
        }
    }
}

/// Requested tally mesh and score kinds
#[derive(Clone, Debug)]
pub struct TallyRequest {
    /// Space-time grid the scores are binned on
    pub mesh: Mesh,
    /// Enabled score kinds
    pub scores: ScoreFlags,
}

impl Default for TallyRequest {
    /// No scores on a mesh that never produces grid crossings
    fn default() -> Self {
        Self {
            mesh: Mesh::unbounded(),
            scores: ScoreFlags::empty(),
        }
    }
}

/// Run control settings
#[derive(Clone, Debug)]
pub struct Settings {
    /// Target number of histories per cycle
    pub n_histories: u64,
    /// Number of outer cycles (fixed-source runs always use one)
    pub n_cycles: usize,
    /// Leading eigenvalue cycles whose tallies are discarded
    pub n_inactive: usize,
    /// End of the simulated time window
    pub time_boundary: f64,
    /// Eigenvalue iteration instead of a fixed-source run
    pub eigenvalue_mode: bool,
    /// Track the time eigenvalue alongside k
    pub alpha_mode: bool,
    /// Evaluate cycle statistics on the rayon thread pool
    pub enable_multi_threading: bool,
    /// Random stream parameters
    pub rng: RngSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            n_histories: 1000,
            n_cycles: 1,
            n_inactive: 0,
            time_boundary: INF,
            eigenvalue_mode: false,
            alpha_mode: false,
            enable_multi_threading: false,
            rng: RngSettings::default(),
        }
    }
}

/// Population control technique applied between eigenvalue cycles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopulationControl {
    /// Deterministic stratified resampling preserving total weight
    Combing,
}

/// A weight window on its own space-time mesh
#[derive(Clone, Debug)]
pub struct WeightWindow {
    /// Grid the window is defined on
    pub mesh: Mesh,
    /// Window center weight per bin, flattened `[t][x][y][z]`; zero disables
    /// the window in a bin
    pub center: Vec<f64>,
    /// Half-width ratio: split above `width * center`, roulette below
    /// `center / width`
    pub width: f64,
}

impl WeightWindow {
    /// Window center at the given space-time point, if inside the grid and set
    pub fn target(&self, position: &Vector3<f64>, time: f64) -> Option<f64> {
        let index = self.mesh.index_of(position, time);
        let (nt, nx, ny, nz) = self.mesh.n_bins();
        let inside = (0..nt as isize).contains(&index.t)
            && (0..nx as isize).contains(&index.x)
            && (0..ny as isize).contains(&index.y)
            && (0..nz as isize).contains(&index.z);
        if !inside {
            return None;
        }
        let flat = ((index.t as usize * nx + index.x as usize) * ny + index.y as usize) * nz
            + index.z as usize;
        let center = self.center[flat];
        (center > 0.0).then(|| center)
    }
}

/// Variance reduction and population techniques
#[derive(Clone, Debug)]
pub struct Techniques {
    /// Rebalancing of the census bank between eigenvalue cycles
    pub population_control: Option<PopulationControl>,
    /// Absorb capture into the particle weight instead of sampling it
    pub implicit_capture: bool,
    /// Secondaries carry unit weight; the parent weight scales their count
    pub weighted_emission: bool,
    /// Splitting and roulette against a per-bin weight target
    pub weight_window: Option<WeightWindow>,
    /// Reserved: single-outcome collision sampling (hook only)
    pub branchless_collision: bool,
    /// Reserved: initial-condition generation at collisions (hook only)
    pub ic_generator: bool,
}

impl Default for Techniques {
    fn default() -> Self {
        Self {
            population_control: None,
            implicit_capture: false,
            weighted_emission: true,
            weight_window: None,
            branchless_collision: false,
            ic_generator: false,
        }
    }
}

/// Everything a simulation needs, assembled by the caller
#[derive(Clone, Debug, Default)]
pub struct Input {
    /// Multigroup materials referenced by the cells
    pub materials: Vec<Material>,
    /// Quadric surfaces referenced by the cells
    pub surfaces: Vec<Surface>,
    /// Cells covering the problem domain
    pub cells: Vec<Cell>,
    /// External sources (required for fixed-source runs and the first
    /// eigenvalue cycle)
    pub sources: Vec<Source>,
    /// Tally mesh and enabled scores
    pub tally: TallyRequest,
    /// Run control
    pub settings: Settings,
    /// Variance reduction and population techniques
    pub techniques: Techniques,
}

impl Input {
    /// Number of energy groups, taken from the first material
    pub fn n_groups(&self) -> usize {
        self.materials.first().map_or(0, Material::n_groups)
    }

    /// Checks the record for internal consistency
    pub fn validate(&self) -> Result<(), SimulationError> {
        let bad = |what: String| Err(SimulationError::InvalidInput(what));

        if self.materials.is_empty() {
            return bad("at least one material is required".into());
        }
        if self.cells.is_empty() {
            return bad("at least one cell is required".into());
        }
        if self.sources.is_empty() {
            return bad("at least one source is required".into());
        }
        let n_groups = self.n_groups();
        for (index, material) in self.materials.iter().enumerate() {
            material.validate(index, n_groups)?;
        }
        for (index, cell) in self.cells.iter().enumerate() {
            if cell.material >= self.materials.len() {
                return bad(format!("cell {} names an unknown material", index));
            }
            if cell
                .surfaces
                .iter()
                .any(|&(surface, _)| surface >= self.surfaces.len())
            {
                return bad(format!("cell {} names an unknown surface", index));
            }
        }
        for (index, source) in self.sources.iter().enumerate() {
            if source.group_pdf.len() != n_groups {
                return bad(format!(
                    "source {} group distribution must have one entry per group",
                    index
                ));
            }
            if source.group_pdf.iter().sum::<f64>() <= 0.0 {
                return bad(format!("source {} group distribution sums to zero", index));
            }
            if source.probability <= 0.0 {
                return bad(format!("source {} probability must be positive", index));
            }
            if source.time_window[1] < source.time_window[0] {
                return bad(format!("source {} time window is reversed", index));
            }
            if let Some(direction) = &source.direction {
                if direction.norm() == 0.0 {
                    return bad(format!("source {} direction has zero length", index));
                }
            }
            if let Some(extent) = &source.extent {
                if extent.iter().any(|[low, high]| high < low) {
                    return bad(format!("source {} box extent is reversed", index));
                }
            }
        }
        let settings = &self.settings;
        if settings.n_histories == 0 {
            return bad("the target history count must be positive".into());
        }
        if settings.n_cycles == 0 {
            return bad("at least one cycle is required".into());
        }
        if settings.eigenvalue_mode && settings.n_inactive >= settings.n_cycles {
            return bad("inactive cycles must leave at least one active cycle".into());
        }
        if settings.alpha_mode && !settings.eigenvalue_mode {
            return bad("alpha mode requires eigenvalue mode".into());
        }
        if let Some(window) = &self.techniques.weight_window {
            let (nt, nx, ny, nz) = window.mesh.n_bins();
            if window.center.len() != nt * nx * ny * nz {
                return bad("weight window center array does not match its mesh".into());
            }
            if window.width <= 1.0 {
                return bad("weight window width must exceed one".into());
            }
        }
        Ok(())
    }

    /// Logs a one-line description of the configured run
    pub(crate) fn log_summary(&self) {
        let settings = &self.settings;
        info!(
            "{} run: {} groups, {} cells, {} histories, {} cycle(s) ({} inactive)",
            if settings.eigenvalue_mode {
                if settings.alpha_mode {
                    "alpha eigenvalue"
                } else {
                    "k eigenvalue"
                }
            } else {
                "fixed source"
            },
            self.n_groups(),
            self.cells.len(),
            settings.n_histories,
            settings.n_cycles,
            settings.n_inactive,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundaryCondition;

    fn minimal_input() -> Input {
        Input {
            materials: vec![Material::one_group(1.0, 1.0, 0.0, 0.0, 0.0, 1.0)],
            surfaces: vec![Surface::sphere(
                Vector3::zeros(),
                100.0,
                BoundaryCondition::Vacuum,
            )],
            cells: vec![Cell::new([(0, false)], 0)],
            sources: vec![Source::default()],
            ..Input::default()
        }
    }

    #[test]
    fn minimal_input_validates() {
        minimal_input().validate().unwrap();
    }

    #[test]
    fn mismatched_group_distribution_is_rejected() {
        let mut input = minimal_input();
        input.sources[0].group_pdf = vec![0.5, 0.5];
        assert!(matches!(
            input.validate(),
            Err(SimulationError::InvalidInput(_))
        ));
    }

    #[test]
    fn unknown_material_reference_is_rejected() {
        let mut input = minimal_input();
        input.cells[0].material = 3;
        assert!(input.validate().is_err());
    }

    #[test]
    fn alpha_mode_requires_eigenvalue_mode() {
        let mut input = minimal_input();
        input.settings.alpha_mode = true;
        assert!(input.validate().is_err());
    }

    #[test]
    fn weight_window_target_respects_its_grid() {
        let window = WeightWindow {
            mesh: Mesh::new(
                vec![0.0, 10.0],
                vec![0.0, 1.0, 2.0],
                vec![-1.0, 1.0],
                vec![-1.0, 1.0],
            )
            .unwrap(),
            center: vec![0.5, 2.0],
            width: 2.5,
        };
        assert_eq!(window.target(&Vector3::new(0.5, 0.0, 0.0), 1.0), Some(0.5));
        assert_eq!(window.target(&Vector3::new(1.5, 0.0, 0.0), 1.0), Some(2.0));
        assert_eq!(window.target(&Vector3::new(5.0, 0.0, 0.0), 1.0), None);
        assert_eq!(window.target(&Vector3::new(0.5, 0.0, 0.0), 11.0), None);
    }
}
