//! Per-bin score accumulators with history and cycle statistics.
//!
//! Each enabled score keeps four arrays over the flattened
//! (group, t, x, y, z, component) index space: the current history's partial
//! (`bin`), the running `sum` and `sum_sq` over closed histories, and per-cycle
//! `mean`/`sdev`. Bins fill locally on every rank; cycle closeout reduces to the
//! master rank before statistics are evaluated.

use bitflags::bitflags;
use itertools::izip;
use rayon::prelude::*;

use crate::input::TallyRequest;
use crate::mesh::{Mesh, MeshIndex};
use crate::parallel::Communicator;
use crate::particle::Particle;
use crate::PRECISION;

bitflags! {
    /// Score kinds a tally can accumulate
    pub struct ScoreFlags: u32 {
        /// Flux estimated from tracklengths
        const TRACKLENGTH = 1 << 0;
        /// Flux estimated from x grid plane crossings
        const CROSSING_X = 1 << 1;
        /// Flux estimated from time grid plane crossings
        const CROSSING_T = 1 << 2;
        /// Net current, three components
        const CURRENT = 1 << 3;
        /// Eddington tensor, six independent components
        const EDDINGTON = 1 << 4;
    }
}

/// Accumulator arrays of a single score kind
#[derive(Clone, Debug)]
pub struct ScoreArray {
    name: &'static str,
    /// Extents of (group, t, x, y, z, component)
    shape: [usize; 6],
    n_bins: usize,
    bin: Vec<f64>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    mean: Vec<f64>,
    sdev: Vec<f64>,
}

impl ScoreArray {
    fn new(
        name: &'static str,
        n_groups: usize,
        mesh_bins: (usize, usize, usize, usize),
        components: usize,
        n_cycles: usize,
    ) -> Self {
        let (nt, nx, ny, nz) = mesh_bins;
        let shape = [n_groups, nt, nx, ny, nz, components];
        let n_bins = shape.iter().product();
        Self {
            name,
            shape,
            n_bins,
            bin: vec![0.0; n_bins],
            sum: vec![0.0; n_bins],
            sum_sq: vec![0.0; n_bins],
            mean: vec![0.0; n_bins * n_cycles],
            sdev: vec![0.0; n_bins * n_cycles],
        }
    }

    /// Name of the score kind
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Extents of (group, t, x, y, z, component)
    pub fn shape(&self) -> [usize; 6] {
        self.shape
    }

    /// Number of flattened bins per cycle
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Flat offset of a (group, t, x, y, z, component) tuple
    pub fn flat_index(&self, g: usize, t: usize, x: usize, y: usize, z: usize, c: usize) -> usize {
        let [_, nt, nx, ny, nz, nc] = self.shape;
        ((((g * nt + t) * nx + x) * ny + y) * nz + z) * nc + c
    }

    /// The current history's partial contributions
    pub fn bin(&self) -> &[f64] {
        &self.bin
    }

    /// Running sum over closed histories of the current cycle
    pub fn sum(&self) -> &[f64] {
        &self.sum
    }

    /// Per-bin mean of the given cycle (populated on the master rank)
    pub fn mean(&self, cycle: usize) -> &[f64] {
        &self.mean[cycle * self.n_bins..(cycle + 1) * self.n_bins]
    }

    /// Per-bin standard deviation of the given cycle (populated on the master rank)
    pub fn sdev(&self, cycle: usize) -> &[f64] {
        &self.sdev[cycle * self.n_bins..(cycle + 1) * self.n_bins]
    }

    /// Sum of the current history's partial contributions over all bins
    pub fn bin_total(&self) -> f64 {
        self.bin.iter().sum()
    }

    /// Adds `value` at the given indices; contributions outside the grid are
    /// dropped
    fn score(&mut self, g: usize, index: MeshIndex, component: usize, value: f64) {
        let [n_groups, nt, nx, ny, nz, _] = self.shape;
        if g >= n_groups
            || !(0..nt as isize).contains(&index.t)
            || !(0..nx as isize).contains(&index.x)
            || !(0..ny as isize).contains(&index.y)
            || !(0..nz as isize).contains(&index.z)
        {
            return;
        }
        let flat = self.flat_index(
            g,
            index.t as usize,
            index.x as usize,
            index.y as usize,
            index.z as usize,
            component,
        );
        self.bin[flat] += value;
    }

    fn closeout_history(&mut self) {
        for (sum, sum_sq, bin) in izip!(&mut self.sum, &mut self.sum_sq, &mut self.bin) {
            *sum += *bin;
            *sum_sq += *bin * *bin;
            *bin = 0.0;
        }
    }

    fn closeout_cycle(
        &mut self,
        i_cycle: usize,
        n_samples: f64,
        parallel: bool,
        comm: &dyn Communicator,
    ) {
        let mut reduced_sum = vec![0.0; self.n_bins];
        let mut reduced_sum_sq = vec![0.0; self.n_bins];
        comm.reduce_sum_master(&self.sum, &mut reduced_sum);
        comm.reduce_sum_master(&self.sum_sq, &mut reduced_sum_sq);
        if comm.is_master() {
            let offset = i_cycle * self.n_bins;
            let mean = &mut self.mean[offset..offset + self.n_bins];
            let sdev = &mut self.sdev[offset..offset + self.n_bins];
            cycle_statistics(&reduced_sum, &reduced_sum_sq, n_samples, mean, sdev, parallel);
        }
        self.sum.fill(0.0);
        self.sum_sq.fill(0.0);
    }
}

/// Per-bin mean and standard deviation of `n_samples` closed histories
fn cycle_statistics(
    sum: &[f64],
    sum_sq: &[f64],
    n_samples: f64,
    mean: &mut [f64],
    sdev: &mut [f64],
    parallel: bool,
) {
    let evaluate = |(m, s, &sum, &sum_sq): (&mut f64, &mut f64, &f64, &f64)| {
        *m = sum / n_samples;
        *s = if n_samples > 1.0 {
            ((sum_sq / n_samples - *m * *m) / (n_samples - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };
    };
    if parallel {
        mean.par_iter_mut()
            .zip(sdev.par_iter_mut())
            .zip(sum.par_iter().zip(sum_sq.par_iter()))
            .for_each(|((m, s), (sum, sum_sq))| evaluate((m, s, sum, sum_sq)));
    } else {
        for (m, s, sum, sum_sq) in izip!(mean, sdev, sum, sum_sq) {
            evaluate((m, s, sum, sum_sq));
        }
    }
}

/// All enabled score accumulators on one space-time mesh
#[derive(Clone, Debug)]
pub struct Tally {
    /// Grid the scores are binned on
    pub mesh: Mesh,
    scores: ScoreFlags,
    flux: Option<ScoreArray>,
    flux_x: Option<ScoreArray>,
    flux_t: Option<ScoreArray>,
    current: Option<ScoreArray>,
    eddington: Option<ScoreArray>,
}

impl Tally {
    /// Allocates accumulators for the requested scores
    pub fn new(request: &TallyRequest, n_groups: usize, n_cycles: usize) -> Self {
        let bins = request.mesh.n_bins();
        let build = |flag: ScoreFlags, name: &'static str, components: usize| {
            request
                .scores
                .contains(flag)
                .then(|| ScoreArray::new(name, n_groups, bins, components, n_cycles))
        };
        Self {
            mesh: request.mesh.clone(),
            scores: request.scores,
            flux: build(ScoreFlags::TRACKLENGTH, "flux", 1),
            flux_x: build(ScoreFlags::CROSSING_X, "flux_x", 1),
            flux_t: build(ScoreFlags::CROSSING_T, "flux_t", 1),
            current: build(ScoreFlags::CURRENT, "current", 3),
            eddington: build(ScoreFlags::EDDINGTON, "eddington", 6),
        }
    }

    /// Enabled score kinds
    pub fn scores(&self) -> ScoreFlags {
        self.scores
    }

    /// Tracklength flux accumulator, if enabled
    pub fn flux(&self) -> Option<&ScoreArray> {
        self.flux.as_ref()
    }

    /// X crossing flux accumulator, if enabled
    pub fn flux_x(&self) -> Option<&ScoreArray> {
        self.flux_x.as_ref()
    }

    /// Time crossing flux accumulator, if enabled
    pub fn flux_t(&self) -> Option<&ScoreArray> {
        self.flux_t.as_ref()
    }

    /// Current accumulator, if enabled
    pub fn current(&self) -> Option<&ScoreArray> {
        self.current.as_ref()
    }

    /// Eddington tensor accumulator, if enabled
    pub fn eddington(&self) -> Option<&ScoreArray> {
        self.eddington.as_ref()
    }

    /// Scores a path segment of the given length starting at the particle's
    /// current position; the segment never spans a grid plane because grid
    /// crossings are transport events
    pub fn score_tracklength(&mut self, p: &Particle, distance: f64) {
        let index = self.mesh.index_of(&p.position, p.time);
        let flux = distance * p.weight;
        if let Some(score) = &mut self.flux {
            score.score(p.group, index, 0, flux);
        }
        if let Some(score) = &mut self.current {
            for (component, u) in [p.direction.x, p.direction.y, p.direction.z]
                .into_iter()
                .enumerate()
            {
                score.score(p.group, index, component, flux * u);
            }
        }
        if let Some(score) = &mut self.eddington {
            let u = &p.direction;
            let moments = [
                u.x * u.x,
                u.x * u.y,
                u.x * u.z,
                u.y * u.y,
                u.y * u.z,
                u.z * u.z,
            ];
            for (component, moment) in moments.into_iter().enumerate() {
                score.score(p.group, index, component, flux * moment);
            }
        }
    }

    /// Scores grid plane crossings for a particle sitting on a plane.
    ///
    /// `before` are the bin indices at the start of the segment that brought the
    /// particle here; a crossing is scored on an axis only when the bin index
    /// past the plane differs, which also rules out zero direction components.
    pub fn score_crossings(&mut self, p: &Particle, before: MeshIndex) {
        let probe = p.position + p.direction * PRECISION;
        let after = self.mesh.index_of(&probe, p.time + PRECISION / p.speed);
        if let Some(score) = &mut self.flux_t {
            if after.t != before.t {
                let index = MeshIndex {
                    t: before.t + 1,
                    ..before
                };
                score.score(p.group, index, 0, p.weight * p.speed);
            }
        }
        if let Some(score) = &mut self.flux_x {
            if after.x != before.x {
                let index = MeshIndex {
                    x: before.x + if p.direction.x > 0.0 { 1 } else { 0 },
                    ..before
                };
                score.score(p.group, index, 0, p.weight / p.direction.x.abs());
            }
        }
    }

    /// Folds the current history's partials into the running sums
    pub fn closeout_history(&mut self) {
        for score in self.arrays_mut() {
            score.closeout_history();
        }
    }

    /// Reduces the running sums to the master rank and fills the given cycle's
    /// mean and standard deviation slots, then clears the sums everywhere
    pub fn closeout_cycle(
        &mut self,
        i_cycle: usize,
        n_samples: u64,
        parallel: bool,
        comm: &dyn Communicator,
    ) {
        for score in self.arrays_mut() {
            score.closeout_cycle(i_cycle, n_samples as f64, parallel, comm);
        }
    }

    fn arrays_mut(&mut self) -> impl Iterator<Item = &mut ScoreArray> {
        [
            self.flux.as_mut(),
            self.flux_x.as_mut(),
            self.flux_t.as_mut(),
            self.current.as_mut(),
            self.eddington.as_mut(),
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;
    use nalgebra::Vector3;

    fn request(scores: ScoreFlags) -> TallyRequest {
        TallyRequest {
            mesh: Mesh::new(
                vec![0.0, 1.0, 2.0],
                vec![0.0, 1.0, 2.0],
                vec![-1.0, 1.0],
                vec![-1.0, 1.0],
            )
            .unwrap(),
            scores,
        }
    }

    fn particle_at(x: f64, time: f64) -> Particle {
        let mut p = Particle::new();
        p.position = Vector3::new(x, 0.0, 0.0);
        p.direction = Vector3::new(1.0, 0.0, 0.0);
        p.time = time;
        p.weight = 2.0;
        p
    }

    #[test]
    fn tracklength_scores_land_in_the_starting_bin() {
        let mut tally = Tally::new(
            &request(ScoreFlags::TRACKLENGTH | ScoreFlags::CURRENT | ScoreFlags::EDDINGTON),
            1,
            1,
        );
        let p = particle_at(0.5, 0.25);
        tally.score_tracklength(&p, 0.4);

        let flux = tally.flux().unwrap();
        let expected_index = flux.flat_index(0, 0, 0, 0, 0, 0);
        assert!((flux.bin()[expected_index] - 0.8).abs() < 1e-12);
        assert!((flux.bin_total() - 0.8).abs() < 1e-12);

        // Current picks up the direction components, Eddington their products
        let current = tally.current().unwrap();
        assert!((current.bin()[current.flat_index(0, 0, 0, 0, 0, 0)] - 0.8).abs() < 1e-12);
        assert_eq!(current.bin()[current.flat_index(0, 0, 0, 0, 0, 1)], 0.0);
        let eddington = tally.eddington().unwrap();
        assert!((eddington.bin()[eddington.flat_index(0, 0, 0, 0, 0, 0)] - 0.8).abs() < 1e-12);
        assert_eq!(eddington.bin()[eddington.flat_index(0, 0, 0, 0, 0, 3)], 0.0);
    }

    #[test]
    fn out_of_grid_contributions_are_dropped() {
        let mut tally = Tally::new(&request(ScoreFlags::TRACKLENGTH), 1, 1);
        let p = particle_at(7.0, 0.25);
        tally.score_tracklength(&p, 1.0);
        assert_eq!(tally.flux().unwrap().bin_total(), 0.0);
    }

    #[test]
    fn crossing_scores_fire_only_when_the_bin_changes() {
        let mut tally = Tally::new(&request(ScoreFlags::CROSSING_X | ScoreFlags::CROSSING_T), 1, 1);

        // Sitting on the x = 1 plane after a segment that started in bin 0
        let p = particle_at(1.0, 0.25);
        let before = MeshIndex { t: 0, x: 0, y: 0, z: 0 };
        tally.score_crossings(&p, before);
        let flux_x = tally.flux_x().unwrap();
        assert!((flux_x.bin()[flux_x.flat_index(0, 0, 1, 0, 0, 0)] - 2.0).abs() < 1e-12);
        // No time plane was reached
        assert_eq!(tally.flux_t().unwrap().bin_total(), 0.0);

        // Sitting on the t = 1 plane moving forward in time
        let p = particle_at(0.5, 1.0);
        tally.score_crossings(&p, before);
        let flux_t = tally.flux_t().unwrap();
        assert!((flux_t.bin()[flux_t.flat_index(0, 1, 0, 0, 0, 0)] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn history_and_cycle_closeout_produce_statistics() {
        let mut tally = Tally::new(&request(ScoreFlags::TRACKLENGTH), 1, 1);
        let comm = SerialComm::default();
        let p = particle_at(0.5, 0.25);

        // Two histories scoring 0.8 and 0.4 in the same bin
        tally.score_tracklength(&p, 0.4);
        tally.closeout_history();
        tally.score_tracklength(&p, 0.2);
        tally.closeout_history();
        tally.closeout_cycle(0, 2, false, &comm);

        let flux = tally.flux().unwrap();
        let index = flux.flat_index(0, 0, 0, 0, 0, 0);
        assert!((flux.mean(0)[index] - 0.6).abs() < 1e-12);
        // Sample standard deviation of {0.8, 0.4} around the mean estimate
        let expected = ((0.8f64 * 0.8 + 0.4 * 0.4) / 2.0 - 0.36).max(0.0);
        assert!((flux.sdev(0)[index] - (expected).sqrt()).abs() < 1e-12);
        // Sums are cleared for the next cycle
        assert_eq!(flux.sum()[index], 0.0);
    }

    #[test]
    fn parallel_and_serial_statistics_agree() {
        let sum: Vec<f64> = (0..100).map(|i| i as f64 * 0.37).collect();
        let sum_sq: Vec<f64> = (0..100).map(|i| i as f64 * 0.91).collect();
        let mut mean_serial = vec![0.0; 100];
        let mut sdev_serial = vec![0.0; 100];
        let mut mean_parallel = vec![0.0; 100];
        let mut sdev_parallel = vec![0.0; 100];
        cycle_statistics(&sum, &sum_sq, 50.0, &mut mean_serial, &mut sdev_serial, false);
        cycle_statistics(&sum, &sum_sq, 50.0, &mut mean_parallel, &mut sdev_parallel, true);
        assert_eq!(mean_serial, mean_parallel);
        assert_eq!(sdev_serial, sdev_parallel);
    }
}
