//! The simulation context object and the outer cycle driver.
//!
//! A [Simulation] owns every mutable structure of one rank: the random stream,
//! the particle banks, the tally accumulators and the cycle bookkeeping. The
//! immutable configuration record and the communicator are borrowed. Histories
//! are driven to completion one at a time; ranks synchronize only through the
//! communicator calls in the closeout and bank-management steps.

use std::time::Instant;

use log::{info, warn};
use nalgebra::Vector3;

use crate::bank::{self, BankSet};
use crate::input::{Input, PopulationControl};
use crate::parallel::Communicator;
use crate::particle::{Event, Particle, Reaction};
use crate::physics;
use crate::population;
use crate::rng::RngStream;
use crate::tally::Tally;
use crate::transport::{self, EventContext};
use crate::{SimulationError, SimulationOutput};

/// Cycle bookkeeping shared by all histories of a rank
#[derive(Clone, Debug)]
pub struct RunState {
    /// Multiplication factor used by fission sampling, updated per cycle
    pub k_eff: f64,
    /// Time eigenvalue, updated per cycle in alpha mode
    pub alpha_eff: f64,
    /// Running tracklength estimate of fission production this cycle
    pub nu_sigma_f_sum: f64,
    /// Running tracklength estimate of the inverse speed this cycle
    pub inverse_speed_sum: f64,
    /// k iterate per completed cycle
    pub k_cycle: Vec<f64>,
    /// Alpha iterate per completed cycle
    pub alpha_cycle: Vec<f64>,
    /// Completed cycles
    pub i_cycle: usize,
    /// Tallies accumulate only while active
    pub cycle_active: bool,
    /// First global work index owned by this rank
    pub work_start: u64,
    /// Number of work indices owned by this rank
    pub work_size: u64,
    /// Global number of work indices this cycle
    pub work_total: u64,
}

/// One rank's transport state, ready to run the configured cycles
pub struct Simulation<'a> {
    input: &'a Input,
    comm: &'a dyn Communicator,
    /// The rank's random stream
    pub rng: RngStream,
    /// The rank's particle banks
    pub banks: BankSet,
    /// The rank's tally accumulators
    pub tally: Tally,
    /// Cycle bookkeeping
    pub state: RunState,
}

impl<'a> Simulation<'a> {
    /// Validates the input and prepares banks, tallies, the random stream and
    /// the initial work partition for this rank
    pub fn new(input: &'a Input, comm: &'a dyn Communicator) -> Result<Self, SimulationError> {
        input.validate()?;
        let settings = &input.settings;
        let rng = RngStream::new(&settings.rng)?;

        let n_histories = settings.n_histories;
        let n_ranks = comm.n_ranks() as u64;
        let rank = comm.rank() as u64;
        let base = n_histories / n_ranks;
        let remainder = n_histories % n_ranks;
        let work_size = base + u64::from(rank < remainder);
        let work_start = rank * base + rank.min(remainder);

        let recorded_cycles = if settings.eigenvalue_mode {
            settings.n_cycles
        } else {
            1
        };
        let tally = Tally::new(&input.tally, input.n_groups(), recorded_cycles);

        if comm.is_master() {
            input.log_summary();
        }

        Ok(Self {
            input,
            comm,
            rng,
            banks: BankSet::for_histories(n_histories as usize),
            tally,
            state: RunState {
                k_eff: 1.0,
                alpha_eff: 0.0,
                nu_sigma_f_sum: 0.0,
                inverse_speed_sum: 0.0,
                k_cycle: Vec::new(),
                alpha_cycle: Vec::new(),
                i_cycle: 0,
                cycle_active: !settings.eigenvalue_mode || settings.n_inactive == 0,
                work_start,
                work_size,
                work_total: n_histories,
            },
        })
    }

    /// Runs the configured cycles and returns the assembled output
    pub fn run(mut self) -> Result<SimulationOutput, SimulationError> {
        let settings = &self.input.settings;
        let start = Instant::now();
        loop {
            self.loop_source()?;
            if settings.eigenvalue_mode {
                self.eigenvalue_cycle_closeout();
                if self.state.cycle_active {
                    self.tally.closeout_history();
                    self.tally.closeout_cycle(
                        self.state.i_cycle,
                        settings.n_histories,
                        settings.enable_multi_threading,
                        self.comm,
                    );
                }
                self.manage_particle_banks()?;
                self.state.i_cycle += 1;
                if self.state.i_cycle == settings.n_cycles {
                    break;
                }
                if self.state.i_cycle >= settings.n_inactive {
                    self.state.cycle_active = true;
                }
            } else {
                break;
            }
        }
        if !settings.eigenvalue_mode {
            self.tally.closeout_cycle(
                0,
                settings.n_histories,
                settings.enable_multi_threading,
                self.comm,
            );
        }
        Ok(SimulationOutput {
            tally: self.tally,
            k_cycle: self.state.k_cycle,
            alpha_cycle: self.state.alpha_cycle,
            n_inactive: settings.n_inactive,
            runtime: start.elapsed(),
        })
    }

    /// Runs every work index owned by this rank through the event loop.
    ///
    /// History `i` always starts `work_start + i` strides past the cycle's seed
    /// base, which makes histories bitwise reproducible for any rank count.
    pub fn loop_source(&mut self) -> Result<(), SimulationError> {
        let input = self.input;
        self.rng.skip_ahead_strides(self.state.work_start);
        self.rng.rebase();
        for i in 0..self.state.work_size {
            self.rng.skip_ahead_strides(i);
            let primary = if self.banks.source.is_empty() {
                self.sample_source_particle()
            } else {
                self.banks.source.get(i as usize).clone()
            };
            self.banks.active.push(primary)?;
            while !self.banks.active.is_empty() {
                let mut particle = self.banks.active.pop()?;
                if let Some(window) = &input.techniques.weight_window {
                    transport::apply_weight_window(
                        &mut particle,
                        window,
                        &mut self.rng,
                        &mut self.banks.active,
                    )?;
                }
                if particle.alive {
                    self.loop_particle(particle)?;
                }
            }
            if !input.settings.eigenvalue_mode {
                self.tally.closeout_history();
            }
        }
        Ok(())
    }

    /// Drives one particle to completion, then drains its secondaries into the
    /// active bank (most recent first)
    fn loop_particle(&mut self, mut particle: Particle) -> Result<(), SimulationError> {
        while particle.alive {
            self.step(&mut particle)?;
        }
        while !self.banks.history.is_empty() {
            let secondary = self.banks.history.pop()?;
            self.banks.active.push(secondary)?;
        }
        Ok(())
    }

    /// Advances the particle by one event and applies the event's consequences
    pub fn step(&mut self, particle: &mut Particle) -> Result<Event, SimulationError> {
        let event = {
            let mut ctx = EventContext {
                input: self.input,
                rng: &mut self.rng,
                tally: &mut self.tally,
                state: &mut self.state,
            };
            transport::move_to_event(particle, &mut ctx)
        };
        if !particle.alive {
            return Ok(event);
        }
        match event {
            Event::Collision => self.collision(particle)?,
            Event::SurfaceCrossing { surface, .. } => {
                transport::surface_crossing(particle, self.input, surface)
            }
            Event::MeshCrossing | Event::LatticeCrossing { .. } => {
                transport::mesh_crossing(particle)
            }
            Event::TimeBoundary => particle.alive = false,
        }
        Ok(event)
    }

    /// Kills the particle and samples its reaction; secondaries go to the
    /// history bank, fission neutrons to the census bank in eigenvalue mode
    fn collision(&mut self, particle: &mut Particle) -> Result<(), SimulationError> {
        let input = self.input;
        particle.alive = false;
        let material = &input.materials[input.cells[particle.cell].material];
        let reaction = physics::sample_reaction(
            particle,
            material,
            &input.settings,
            &input.techniques,
            self.state.alpha_eff,
            &mut self.rng,
        );
        // Extension point: branchless collision and IC generation plug in here,
        // after the reaction type is known
        match reaction {
            Reaction::Capture => {}
            Reaction::Scattering => physics::scattering(
                particle,
                material,
                input.techniques.weighted_emission,
                &mut self.rng,
                &mut self.banks.history,
            )?,
            Reaction::Fission => {
                let bank = if input.settings.eigenvalue_mode {
                    &mut self.banks.census
                } else {
                    &mut self.banks.history
                };
                physics::fission(
                    particle,
                    material,
                    input.techniques.weighted_emission,
                    self.state.k_eff,
                    input.settings.time_boundary,
                    &mut self.rng,
                    bank,
                )?;
            }
            Reaction::TimeReaction => physics::time_reaction(
                particle,
                self.state.alpha_eff,
                &mut self.banks.history,
            )?,
        }
        Ok(())
    }

    /// Draws a fresh particle from the registered sources
    fn sample_source_particle(&mut self) -> Particle {
        let input = self.input;
        let total: f64 = input.sources.iter().map(|s| s.probability).sum();
        let xi = self.rng.next() * total;
        let mut cumulative = 0.0;
        let mut chosen = &input.sources[input.sources.len() - 1];
        for source in &input.sources {
            cumulative += source.probability;
            if xi < cumulative {
                chosen = source;
                break;
            }
        }

        let mut particle = Particle::new();
        particle.position = match &chosen.extent {
            Some(extent) => Vector3::new(
                extent[0][0] + self.rng.next() * (extent[0][1] - extent[0][0]),
                extent[1][0] + self.rng.next() * (extent[1][1] - extent[1][0]),
                extent[2][0] + self.rng.next() * (extent[2][1] - extent[2][0]),
            ),
            None => chosen.point,
        };
        let [t0, t1] = chosen.time_window;
        particle.time = t0 + self.rng.next() * (t1 - t0);
        particle.group = physics::sample_discrete(&chosen.group_pdf, &mut self.rng);
        particle.direction = match &chosen.direction {
            Some(direction) => direction.normalize(),
            None => physics::sample_isotropic_direction(&mut self.rng),
        };
        transport::set_cell(&mut particle, input);
        particle
    }

    /// Reduces the cycle's production estimates and updates the eigenvalues
    fn eigenvalue_cycle_closeout(&mut self) {
        let settings = &self.input.settings;
        let n = settings.n_histories as f64;
        let production = self.comm.allreduce_sum(self.state.nu_sigma_f_sum);
        self.state.k_eff = production / n;
        self.state.k_cycle.push(self.state.k_eff);
        if settings.alpha_mode {
            let inverse_speed = self.comm.allreduce_sum(self.state.inverse_speed_sum) / n;
            if inverse_speed > 0.0 {
                self.state.alpha_eff += (self.state.k_eff - 1.0) / inverse_speed;
            }
            self.state.alpha_cycle.push(self.state.alpha_eff);
        }
        if self.comm.is_master() {
            if settings.alpha_mode {
                info!(
                    "cycle {}: k_eff = {:.5}, alpha_eff = {:.5e}",
                    self.state.i_cycle, self.state.k_eff, self.state.alpha_eff
                );
            } else {
                info!("cycle {}: k_eff = {:.5}", self.state.i_cycle, self.state.k_eff);
            }
        }
        self.state.nu_sigma_f_sum = 0.0;
        self.state.inverse_speed_sum = 0.0;
    }

    /// Normalizes the census population, applies population control and
    /// repartitions the next cycle's work from the surviving source bank
    fn manage_particle_banks(&mut self) -> Result<(), SimulationError> {
        let input = self.input;
        // Align every rank's stream at the end of the global work window so the
        // draws below agree across ranks
        self.rng
            .skip_ahead_strides(self.state.work_total - self.state.work_start);
        self.rng.rebase();

        let target = input.settings.n_histories;
        bank::normalize_weight(&mut self.banks.census, target as f64, self.comm);
        self.banks.source.clear();
        match input.techniques.population_control {
            Some(PopulationControl::Combing) => population::combing(
                &mut self.banks.census,
                &mut self.banks.source,
                target,
                &mut self.rng,
                self.comm,
            )?,
            None => {
                for i in 0..self.banks.census.len() {
                    self.banks.source.push(self.banks.census.get(i).clone())?;
                }
                self.banks.census.clear();
            }
        }

        let (work_start, work_size, work_total) =
            bank::bank_scanning(&self.banks.source, self.comm);
        if work_total == 0 && self.comm.is_master() {
            warn!(
                "fission source died out after cycle {}",
                self.state.i_cycle
            );
        }
        self.state.work_start = work_start;
        self.state.work_size = work_size;
        self.state.work_total = work_total;
        Ok(())
    }
}
