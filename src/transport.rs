//! The per-particle event dispatcher.
//!
//! [move_to_event] computes the candidate distances to a collision, the nearest
//! cell surface, the nearest tally grid plane and the time boundary, advances
//! the particle to the closest one and scores the traversed segment. The
//! handlers in this module apply the geometric consequences; collision physics
//! lives in [physics](crate::physics) and is dispatched by the simulation loop.

use log::warn;

use crate::bank::ParticleBank;
use crate::geometry::{self, BoundaryCondition};
use crate::input::{Input, WeightWindow};
use crate::particle::{Event, Particle};
use crate::rng::RngStream;
use crate::simulation::RunState;
use crate::tally::Tally;
use crate::{SimulationError, INF};

/// Mutable pieces of the simulation an event dispatch works on
pub struct EventContext<'a> {
    /// The validated configuration record
    pub input: &'a Input,
    /// The rank's random stream
    pub rng: &'a mut RngStream,
    /// The rank's tally accumulators
    pub tally: &'a mut Tally,
    /// Cycle bookkeeping shared by all histories of the rank
    pub state: &'a mut RunState,
}

/// Distance to the nearest bounding surface of the particle's cell, together
/// with that surface's index
pub fn nearest_surface(p: &Particle, input: &Input) -> Option<(f64, usize)> {
    let cell = &input.cells[p.cell];
    let mut nearest: Option<(f64, usize)> = None;
    for &(surface_index, _) in &cell.surfaces {
        let distance = input.surfaces[surface_index].distance(&p.position, &p.direction);
        if distance < nearest.map_or(INF, |(d, _)| d) {
            nearest = Some((distance, surface_index));
        }
    }
    nearest
}

/// Advances the particle to its next event and returns the event.
///
/// Candidates are considered in the order collision, surface, grid plane,
/// time boundary; a later candidate replaces the selection only when strictly
/// closer, and a selected surface coinciding with a grid plane is relabeled
/// with the coincidence unless the surface reflects. The traversed segment is
/// scored before the move, so bin indices refer to the segment start.
pub fn move_to_event(p: &mut Particle, ctx: &mut EventContext) -> Event {
    let settings = &ctx.input.settings;
    let material = &ctx.input.materials[ctx.input.cells[p.cell].material];
    let g = p.group;

    let mut sigma_t = material.total[g];
    if settings.alpha_mode {
        sigma_t += ctx.state.alpha_eff.abs() / p.speed;
    }
    let d_collision = if sigma_t == 0.0 {
        INF
    } else {
        -ctx.rng.next().ln() / sigma_t
    };
    let surface_candidate = nearest_surface(p, ctx.input);
    let d_mesh = ctx
        .tally
        .mesh
        .next_crossing(&p.position, &p.direction, p.time, p.speed);
    // Clamped at zero so a particle nudged just past the boundary still
    // terminates on its next dispatch
    let d_time = (p.speed * (settings.time_boundary - p.time)).max(0.0);

    let mut event = Event::Collision;
    let mut distance = d_collision;
    if let Some((d_surface, surface)) = surface_candidate {
        if d_surface < distance {
            event = Event::SurfaceCrossing {
                surface,
                coincident_mesh: false,
            };
            distance = d_surface;
        }
    }
    if d_mesh < distance {
        event = Event::MeshCrossing;
        distance = d_mesh;
    }
    if d_time < distance {
        event = Event::TimeBoundary;
        distance = d_time;
    }
    if let Event::SurfaceCrossing { surface, .. } = event {
        let reflective =
            ctx.input.surfaces[surface].boundary == BoundaryCondition::Reflective;
        if distance == d_mesh && !reflective {
            event = Event::SurfaceCrossing {
                surface,
                coincident_mesh: true,
            };
        }
    }

    if !distance.is_finite() {
        warn!(
            "particle at ({:.6e}, {:.6e}, {:.6e}) has no reachable event, killing it",
            p.position.x, p.position.y, p.position.z
        );
        p.alive = false;
        p.event = Some(event);
        return event;
    }

    if settings.eigenvalue_mode {
        let production = material.nu_total(g) * material.fission[g];
        ctx.state.nu_sigma_f_sum += p.weight * distance * production;
        if settings.alpha_mode {
            ctx.state.inverse_speed_sum += p.weight * distance / p.speed;
        }
    }

    let before = ctx.tally.mesh.index_of(&p.position, p.time);
    if ctx.state.cycle_active {
        ctx.tally.score_tracklength(p, distance);
    }

    p.position += p.direction * distance;
    p.time += distance / p.speed;
    if event == Event::TimeBoundary {
        // Pin the landing time so the boundary is reached exactly
        p.time = settings.time_boundary;
    }

    if ctx.state.cycle_active {
        match event {
            Event::MeshCrossing
            | Event::LatticeCrossing { .. }
            | Event::TimeBoundary
            | Event::SurfaceCrossing {
                coincident_mesh: true,
                ..
            } => ctx.tally.score_crossings(p, before),
            _ => {}
        }
    }

    p.event = Some(event);
    event
}

/// Applies the boundary condition of the crossed surface and, for a
/// transmission, relocates the particle into its new cell
pub fn surface_crossing(p: &mut Particle, input: &Input, surface_index: usize) {
    p.surface = Some(surface_index);
    let surface = &input.surfaces[surface_index];
    match surface.boundary {
        BoundaryCondition::Vacuum => {
            p.alive = false;
        }
        BoundaryCondition::Reflective => {
            p.direction = surface.reflect(&p.position, &p.direction);
            p.nudge();
        }
        BoundaryCondition::Interface => {
            p.nudge();
            set_cell(p, input);
        }
    }
}

/// Pushes the particle off the grid plane it landed on
pub fn mesh_crossing(p: &mut Particle) {
    p.nudge();
}

/// Assigns the first cell containing the particle, or kills it as lost.
///
/// A lost particle is a per-particle diagnostic, not a run failure.
pub fn set_cell(p: &mut Particle, input: &Input) {
    match geometry::locate_cell(&input.cells, &input.surfaces, &p.position) {
        Some(cell) => {
            p.cell = cell;
            p.speed = input.materials[input.cells[cell].material].speed[p.group];
        }
        None => {
            warn!(
                "lost particle at ({:.6e}, {:.6e}, {:.6e}), killing it",
                p.position.x, p.position.y, p.position.z
            );
            p.alive = false;
        }
    }
}

/// Splits or roulettes the particle against its weight window bin, pushing
/// split copies onto the active bank
pub fn apply_weight_window(
    p: &mut Particle,
    window: &WeightWindow,
    rng: &mut RngStream,
    active: &mut ParticleBank,
) -> Result<(), SimulationError> {
    if !p.alive {
        return Ok(());
    }
    let target = match window.target(&p.position, p.time) {
        Some(target) => target,
        None => return Ok(()),
    };
    let ratio = p.weight / target;
    if ratio > window.width {
        let copies = ratio.ceil() as usize;
        p.weight /= copies as f64;
        for _ in 1..copies {
            active.push(p.clone())?;
        }
    } else if ratio < 1.0 / window.width {
        if rng.next() < ratio {
            p.weight = target;
        } else {
            p.alive = false;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::rng::RngSettings;

    fn rng() -> RngStream {
        RngStream::new(&RngSettings::default()).unwrap()
    }

    fn window() -> WeightWindow {
        WeightWindow {
            mesh: Mesh::unbounded(),
            center: vec![1.0],
            width: 2.5,
        }
    }

    #[test]
    fn heavy_particles_split_and_conserve_weight() {
        let mut p = Particle::new();
        p.weight = 10.0;
        let mut active = ParticleBank::with_capacity("active", 64);
        apply_weight_window(&mut p, &window(), &mut rng(), &mut active).unwrap();
        assert_eq!(active.len(), 9);
        let total = p.weight + active.total_weight();
        assert!((total - 10.0).abs() < 1e-12);
        assert!((p.weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn light_particles_roulette_to_the_window_center() {
        let window = window();
        let mut rng = rng();
        let mut active = ParticleBank::with_capacity("active", 64);
        let n = 100_000;
        let mut surviving_weight = 0.0;
        for _ in 0..n {
            let mut p = Particle::new();
            p.weight = 0.1;
            apply_weight_window(&mut p, &window, &mut rng, &mut active).unwrap();
            if p.alive {
                assert_eq!(p.weight, 1.0);
                surviving_weight += p.weight;
            }
        }
        assert!(active.is_empty());
        // Expectation is preserved: surviving weight tracks the input weight
        let expected = 0.1 * n as f64;
        assert!((surviving_weight - expected).abs() < 0.05 * expected);
    }

    #[test]
    fn particles_inside_the_window_band_are_untouched() {
        let mut p = Particle::new();
        p.weight = 1.5;
        let mut active = ParticleBank::with_capacity("active", 4);
        apply_weight_window(&mut p, &window(), &mut rng(), &mut active).unwrap();
        assert!(p.alive);
        assert_eq!(p.weight, 1.5);
        assert!(active.is_empty());
    }
}
