//! Reaction sampling at collision sites.
//!
//! A colliding particle is killed on entry; reactions revive it through
//! secondaries. Emission counts use Russian-roulette rounding
//! `floor(w_eff * nu + xi)`, with the weighted-emission convention deciding
//! whether the parent weight scales the count (secondaries at unit weight) or
//! is inherited by each secondary.

use std::f64::consts::PI;

use nalgebra::Vector3;

use crate::bank::ParticleBank;
use crate::input::{Material, Settings, Techniques};
use crate::particle::{Particle, Reaction};
use crate::rng::RngStream;
use crate::SimulationError;

/// Samples the reaction type for a collision of `p` in `material`.
///
/// With implicit capture the absorbing share of the total cross-section is
/// moved into the particle weight and only scattering and fission remain
/// sampleable; otherwise the cumulative order is scattering, fission, capture
/// and, in alpha mode, the time reaction.
pub fn sample_reaction(
    p: &mut Particle,
    material: &Material,
    settings: &Settings,
    techniques: &Techniques,
    alpha_eff: f64,
    rng: &mut RngStream,
) -> Reaction {
    let g = p.group;
    let scatter = material.scatter[g];
    let fission = material.fission[g];
    let capture = material.capture[g];
    let time_absorption = if settings.alpha_mode {
        alpha_eff.abs() / p.speed
    } else {
        0.0
    };
    let total = material.total[g] + time_absorption;

    if techniques.implicit_capture {
        let absorption = capture + time_absorption;
        let remaining = total - absorption;
        p.weight *= remaining / total;
        let xi = rng.next() * remaining;
        return if xi < scatter {
            Reaction::Scattering
        } else {
            Reaction::Fission
        };
    }

    let xi = rng.next() * total;
    let mut cumulative = scatter;
    if xi < cumulative {
        return Reaction::Scattering;
    }
    cumulative += fission;
    if xi < cumulative {
        return Reaction::Fission;
    }
    if settings.alpha_mode {
        cumulative += capture;
        if xi < cumulative {
            return Reaction::Capture;
        }
        return Reaction::TimeReaction;
    }
    Reaction::Capture
}

/// Emits scattered neutrons into `out`
pub fn scattering(
    p: &Particle,
    material: &Material,
    weighted_emission: bool,
    rng: &mut RngStream,
    out: &mut ParticleBank,
) -> Result<(), SimulationError> {
    let g = p.group;
    let (w_eff, w_new) = emission_weights(p.weight, weighted_emission);
    let count = emission_count(w_eff * material.nu_s[g], rng);
    for _ in 0..count {
        let mut secondary = p.clone();
        secondary.alive = true;
        secondary.weight = w_new;
        secondary.group = sample_discrete(&material.chi_s[g], rng);
        secondary.speed = material.speed[secondary.group];
        let mu = 2.0 * rng.next() - 1.0;
        let azimuth = 2.0 * PI * rng.next();
        secondary.direction = rotate_direction(&p.direction, mu, azimuth);
        out.push(secondary)?;
    }
    Ok(())
}

/// Emits prompt and delayed fission neutrons into `out`.
///
/// Delayed neutrons draw their emission delay from the delayed group's decay
/// constant and are dropped when that pushes them past the time boundary.
pub fn fission(
    p: &Particle,
    material: &Material,
    weighted_emission: bool,
    k_eff: f64,
    time_boundary: f64,
    rng: &mut RngStream,
    out: &mut ParticleBank,
) -> Result<(), SimulationError> {
    let g = p.group;
    let nu = material.nu_total(g);
    let (w_eff, w_new) = emission_weights(p.weight, weighted_emission);
    let count = emission_count(w_eff * nu / k_eff, rng);
    for _ in 0..count {
        let mut secondary = p.clone();
        secondary.alive = true;
        secondary.weight = w_new;

        // Classify prompt versus delayed by cumulative multiplicity
        let xi = rng.next() * nu;
        let mut cumulative = material.nu_p[g];
        let mut spectrum = &material.chi_p[g];
        let mut delayed_past_boundary = false;
        if xi >= cumulative {
            for (j, &nu_d) in material.nu_d[g].iter().enumerate() {
                cumulative += nu_d;
                if xi < cumulative || j + 1 == material.n_delayed_groups() {
                    spectrum = &material.chi_d[j];
                    let delay = -rng.next().ln() / material.decay[j];
                    secondary.time = p.time + delay;
                    delayed_past_boundary = secondary.time > time_boundary;
                    break;
                }
            }
        }
        if delayed_past_boundary {
            continue;
        }
        secondary.group = sample_discrete(spectrum, rng);
        secondary.speed = material.speed[secondary.group];
        secondary.direction = sample_isotropic_direction(rng);
        out.push(secondary)?;
    }
    Ok(())
}

/// Time reaction in alpha mode: pure absorption for positive alpha, one extra
/// copy of the particle for negative alpha
pub fn time_reaction(
    p: &Particle,
    alpha_eff: f64,
    out: &mut ParticleBank,
) -> Result<(), SimulationError> {
    if alpha_eff < 0.0 {
        let mut copy = p.clone();
        copy.alive = true;
        out.push(copy)?;
    }
    Ok(())
}

/// Russian-roulette rounding of an expected emission count
pub fn emission_count(expected: f64, rng: &mut RngStream) -> usize {
    let count = (expected + rng.next()).floor();
    if count <= 0.0 {
        0
    } else {
        count as usize
    }
}

fn emission_weights(weight: f64, weighted_emission: bool) -> (f64, f64) {
    if weighted_emission {
        (weight, 1.0)
    } else {
        (1.0, weight)
    }
}

/// Index drawn from an unnormalized discrete distribution
pub fn sample_discrete(pdf: &[f64], rng: &mut RngStream) -> usize {
    let total: f64 = pdf.iter().sum();
    let xi = rng.next() * total;
    let mut cumulative = 0.0;
    for (index, &p) in pdf.iter().enumerate() {
        cumulative += p;
        if xi < cumulative {
            return index;
        }
    }
    pdf.len() - 1
}

/// Direction drawn uniformly from the unit sphere
pub fn sample_isotropic_direction(rng: &mut RngStream) -> Vector3<f64> {
    let azimuth = 2.0 * PI * rng.next();
    let mu = 2.0 * rng.next() - 1.0;
    let sine = (1.0 - mu * mu).sqrt();
    Vector3::new(sine * azimuth.cos(), sine * azimuth.sin(), mu)
}

/// Rotates `u` by polar cosine `mu` and the given azimuth around itself.
///
/// The usual frame construction degenerates when `u` is close to the z axis;
/// there the roles of y and z swap, which keeps the arithmetic well away from
/// a vanishing denominator.
pub fn rotate_direction(u: &Vector3<f64>, mu: f64, azimuth: f64) -> Vector3<f64> {
    let cos_azimuth = azimuth.cos();
    let sin_azimuth = azimuth.sin();
    let sine = (1.0 - mu * mu).max(0.0).sqrt();

    if 1.0 - u.z * u.z > 1e-12 {
        let b = (1.0 - u.z * u.z).sqrt();
        let c = sine / b;
        Vector3::new(
            u.x * mu + (u.x * u.z * cos_azimuth - u.y * sin_azimuth) * c,
            u.y * mu + (u.y * u.z * cos_azimuth + u.x * sin_azimuth) * c,
            u.z * mu - cos_azimuth * sine * b,
        )
    } else {
        let b = (1.0 - u.y * u.y).sqrt();
        let c = sine / b;
        Vector3::new(
            u.x * mu + (u.x * u.y * cos_azimuth - u.z * sin_azimuth) * c,
            u.y * mu - cos_azimuth * sine * b,
            u.z * mu + (u.z * u.y * cos_azimuth + u.x * sin_azimuth) * c,
        )
    }
}
