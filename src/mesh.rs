//! Rectilinear space-time grids.
//!
//! A grid with `n` points defines `n - 1` bins numbered `0..n-2`; bin index `-1`
//! means below the grid and `n - 1` means at or above its last point.

use itertools::Itertools;
use nalgebra::Vector3;

use crate::{SimulationError, INF};

/// Bin indices of a space-time point, one per axis, with out-of-grid sentinels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshIndex {
    /// Time bin
    pub t: isize,
    /// X bin
    pub x: isize,
    /// Y bin
    pub y: isize,
    /// Z bin
    pub z: isize,
}

/// A rectilinear grid over time and the three spatial axes
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Time grid points
    pub t: Vec<f64>,
    /// X grid points
    pub x: Vec<f64>,
    /// Y grid points
    pub y: Vec<f64>,
    /// Z grid points
    pub z: Vec<f64>,
}

impl Mesh {
    /// Builds a mesh after checking that every grid has at least two strictly
    /// increasing points
    pub fn new(
        t: Vec<f64>,
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
    ) -> Result<Self, SimulationError> {
        for (name, grid) in [("t", &t), ("x", &x), ("y", &y), ("z", &z)] {
            if grid.len() < 2 {
                return Err(SimulationError::InvalidInput(format!(
                    "mesh grid {} needs at least two points",
                    name
                )));
            }
            if !grid.iter().tuple_windows().all(|(a, b)| a < b) {
                return Err(SimulationError::InvalidInput(format!(
                    "mesh grid {} must be strictly increasing",
                    name
                )));
            }
        }
        Ok(Self { t, x, y, z })
    }

    /// A mesh whose single bin covers all of space and time; grid crossings
    /// never fire on it
    pub fn unbounded() -> Self {
        Self {
            t: vec![0.0, INF],
            x: vec![-INF, INF],
            y: vec![-INF, INF],
            z: vec![-INF, INF],
        }
    }

    /// Bin counts per axis as (t, x, y, z)
    pub fn n_bins(&self) -> (usize, usize, usize, usize) {
        (
            self.t.len() - 1,
            self.x.len() - 1,
            self.y.len() - 1,
            self.z.len() - 1,
        )
    }

    /// Bin indices of a position at a given time
    pub fn index_of(&self, position: &Vector3<f64>, time: f64) -> MeshIndex {
        MeshIndex {
            t: grid_index(&self.t, time),
            x: grid_index(&self.x, position.x),
            y: grid_index(&self.y, position.y),
            z: grid_index(&self.z, position.z),
        }
    }

    /// Flight distance to the nearest grid plane over all four axes.
    ///
    /// The time axis is folded in through the inverse speed, so the returned
    /// value is a spatial distance like the others.
    pub fn next_crossing(
        &self,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        time: f64,
        speed: f64,
    ) -> f64 {
        let mut distance = grid_distance(&self.x, position.x, direction.x);
        distance = distance.min(grid_distance(&self.y, position.y, direction.y));
        distance = distance.min(grid_distance(&self.z, position.z, direction.z));
        distance.min(grid_distance(&self.t, time, 1.0 / speed))
    }
}

/// Bin index of `v`: the `i` with `grid[i] <= v < grid[i + 1]`, or `-1` below
/// the grid, or `len - 1` at or past its last point
pub fn grid_index(grid: &[f64], v: f64) -> isize {
    if v < grid[0] {
        return -1;
    }
    if v >= grid[grid.len() - 1] {
        return grid.len() as isize - 1;
    }
    grid.partition_point(|&g| g <= v) as isize - 1
}

/// Distance along a ray with direction component `dir` from `v` to the next
/// grid plane, or [INF] when moving parallel or out of the grid
pub fn grid_distance(grid: &[f64], v: f64, dir: f64) -> f64 {
    if dir == 0.0 {
        return INF;
    }
    let mut target = grid_index(grid, v);
    if dir > 0.0 {
        target += 1;
    }
    if target < 0 || target as usize > grid.len() - 1 {
        return INF;
    }
    (grid[target as usize] - v) / dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_lookup_covers_interior_and_sentinels() {
        let grid = [0.0, 1.0, 2.0, 4.0];
        assert_eq!(grid_index(&grid, -0.5), -1);
        assert_eq!(grid_index(&grid, 0.0), 0);
        assert_eq!(grid_index(&grid, 0.9), 0);
        assert_eq!(grid_index(&grid, 1.0), 1);
        assert_eq!(grid_index(&grid, 3.999), 2);
        assert_eq!(grid_index(&grid, 4.0), 3);
        assert_eq!(grid_index(&grid, 17.0), 3);
    }

    #[test]
    fn plane_distance_follows_the_direction_sign() {
        let grid = [0.0, 1.0, 2.0];
        assert!((grid_distance(&grid, 0.25, 1.0) - 0.75).abs() < 1e-12);
        assert!((grid_distance(&grid, 0.25, -0.5) - 0.5).abs() < 1e-12);
        assert_eq!(grid_distance(&grid, 0.25, 0.0), INF);
        // Below the grid and moving up: the first plane counts as a crossing
        assert!((grid_distance(&grid, -1.0, 1.0) - 1.0).abs() < 1e-12);
        // Below the grid and moving down: nothing left to cross
        assert_eq!(grid_distance(&grid, -1.0, -1.0), INF);
        // Past the grid and moving up likewise
        assert_eq!(grid_distance(&grid, 3.0, 1.0), INF);
    }

    #[test]
    fn next_crossing_takes_the_nearest_axis() {
        let mesh = Mesh::new(
            vec![0.0, 10.0],
            vec![0.0, 1.0, 2.0],
            vec![0.0, 5.0],
            vec![0.0, 5.0],
        )
        .unwrap();
        let position = Vector3::new(0.5, 2.5, 2.5);
        let direction = Vector3::new(1.0, 0.0, 0.0);
        let d = mesh.next_crossing(&position, &direction, 0.0, 1.0);
        assert!((d - 0.5).abs() < 1e-12);

        // A slow particle hits the time plane before any spatial one
        let d = mesh.next_crossing(&position, &Vector3::new(0.0, 1.0, 0.0), 9.9, 0.01);
        assert!((d - 0.001).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_monotonic_grids() {
        let result = Mesh::new(
            vec![0.0, 1.0],
            vec![0.0, 2.0, 1.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        );
        assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
    }

    #[test]
    fn unbounded_mesh_never_produces_a_crossing() {
        let mesh = Mesh::unbounded();
        let d = mesh.next_crossing(
            &Vector3::new(1.0, 2.0, 3.0),
            &Vector3::new(0.0, 0.0, 1.0),
            5.0,
            2.0,
        );
        assert_eq!(d, INF);
    }
}
