//! Population control between eigenvalue cycles.
//!
//! Combing maps the N census particles onto M evenly spaced teeth over the
//! global bank index space. Every rank draws the same tooth offset, so each
//! tooth is picked up by exactly the rank that owns the underlying census
//! index, and the result is independent of the rank count.

use crate::bank::{bank_scanning, ParticleBank};
use crate::parallel::Communicator;
use crate::rng::RngStream;
use crate::SimulationError;

/// Combs the census bank down (or up) to `target` particles, appending the
/// survivors to `source` with their weight scaled by the tooth spacing, then
/// clears the census.
///
/// The caller must have aligned the random streams of all ranks beforehand;
/// the single offset draw taken here has to agree globally.
pub fn combing(
    census: &mut ParticleBank,
    source: &mut ParticleBank,
    target: u64,
    rng: &mut RngStream,
    comm: &dyn Communicator,
) -> Result<(), SimulationError> {
    let (idx_start, n_local, n_global) = bank_scanning(census, comm);
    if n_global == 0 {
        return Ok(());
    }
    let tooth_spacing = n_global as f64 / target as f64;
    let offset = rng.next() * tooth_spacing;

    let low = idx_start as f64;
    let high = (idx_start + n_local) as f64;
    let tooth_start = ((low - offset) / tooth_spacing).ceil() as i64;
    let tooth_end = ((high - offset) / tooth_spacing).floor() as i64 + 1;

    for tooth in tooth_start..tooth_end {
        let position = tooth as f64 * tooth_spacing + offset;
        let index = position.floor() as i64 - idx_start as i64;
        // A tooth landing exactly on the upper bound belongs to the next rank
        if index < 0 || index >= n_local as i64 {
            continue;
        }
        let mut survivor = census.get(index as usize).clone();
        survivor.weight *= tooth_spacing;
        source.push(survivor)?;
    }
    census.clear();
    Ok(())
}
