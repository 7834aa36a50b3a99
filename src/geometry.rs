//! Quadric surface evaluation, boundary conditions and cell membership.
//!
//! A surface is the zero set of
//! `A x^2 + B y^2 + C z^2 + D xy + E xz + F yz + G x + H y + I z + J`.
//! Cells are intersections of signed half-spaces of such surfaces; a particle
//! belongs to a cell iff every listed surface evaluates to the side recorded in
//! the cell's positive flag.

use nalgebra::Vector3;
use smallvec::SmallVec;

use crate::INF;

/// Behavior of a particle reaching a surface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryCondition {
    /// Transmission into the neighboring cell
    Interface,
    /// The particle is killed
    Vacuum,
    /// Specular reflection, the particle stays in its cell
    Reflective,
}

/// A quadric surface with an attached boundary condition.
///
/// Linear surfaces (all second-order coefficients zero) cache their unit normal
/// and take the cheaper evaluation and distance paths.
#[derive(Clone, Debug)]
pub struct Surface {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
    i: f64,
    j: f64,
    linear: bool,
    normal: Vector3<f64>,
    /// What happens to a particle crossing this surface
    pub boundary: BoundaryCondition,
}

impl Surface {
    /// Builds a general quadric from its ten coefficients in the order A..J
    pub fn quadric(coefficients: [f64; 10], boundary: BoundaryCondition) -> Self {
        let [a, b, c, d, e, f, g, h, i, j] = coefficients;
        let linear =
            a == 0.0 && b == 0.0 && c == 0.0 && d == 0.0 && e == 0.0 && f == 0.0;
        let normal = if linear {
            let gradient = Vector3::new(g, h, i);
            let length = gradient.norm();
            if length > 0.0 {
                gradient / length
            } else {
                Vector3::zeros()
            }
        } else {
            Vector3::zeros()
        };
        Self {
            a,
            b,
            c,
            d,
            e,
            f,
            g,
            h,
            i,
            j,
            linear,
            normal,
            boundary,
        }
    }

    /// Builds the plane G x + H y + I z + J = 0
    pub fn plane(g: f64, h: f64, i: f64, j: f64, boundary: BoundaryCondition) -> Self {
        Self::quadric([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, g, h, i, j], boundary)
    }

    /// Builds the plane x = x0
    pub fn plane_x(x0: f64, boundary: BoundaryCondition) -> Self {
        Self::plane(1.0, 0.0, 0.0, -x0, boundary)
    }

    /// Builds the plane y = y0
    pub fn plane_y(y0: f64, boundary: BoundaryCondition) -> Self {
        Self::plane(0.0, 1.0, 0.0, -y0, boundary)
    }

    /// Builds the plane z = z0
    pub fn plane_z(z0: f64, boundary: BoundaryCondition) -> Self {
        Self::plane(0.0, 0.0, 1.0, -z0, boundary)
    }

    /// Builds a sphere around `center` with the given radius
    pub fn sphere(center: Vector3<f64>, radius: f64, boundary: BoundaryCondition) -> Self {
        Self::quadric(
            [
                1.0,
                1.0,
                1.0,
                0.0,
                0.0,
                0.0,
                -2.0 * center.x,
                -2.0 * center.y,
                -2.0 * center.z,
                center.norm_squared() - radius * radius,
            ],
            boundary,
        )
    }

    /// True if all second-order coefficients vanish
    pub fn is_linear(&self) -> bool {
        self.linear
    }

    /// Evaluates the surface function at `p`; the sign tells which side `p` is on
    pub fn evaluate(&self, p: &Vector3<f64>) -> f64 {
        let linear_part = self.g * p.x + self.h * p.y + self.i * p.z + self.j;
        if self.linear {
            return linear_part;
        }
        self.a * p.x * p.x
            + self.b * p.y * p.y
            + self.c * p.z * p.z
            + self.d * p.x * p.y
            + self.e * p.x * p.z
            + self.f * p.y * p.z
            + linear_part
    }

    /// Unit normal at `p`: cached for linear surfaces, the normalized analytic
    /// gradient otherwise
    pub fn normal_at(&self, p: &Vector3<f64>) -> Vector3<f64> {
        if self.linear {
            return self.normal;
        }
        let gradient = Vector3::new(
            2.0 * self.a * p.x + self.d * p.y + self.e * p.z + self.g,
            2.0 * self.b * p.y + self.d * p.x + self.f * p.z + self.h,
            2.0 * self.c * p.z + self.e * p.x + self.f * p.y + self.i,
        );
        let length = gradient.norm();
        if length > 0.0 {
            gradient / length
        } else {
            gradient
        }
    }

    /// Distance along `u` from `p` to this surface, or [INF] if the ray never
    /// reaches it
    pub fn distance(&self, p: &Vector3<f64>, u: &Vector3<f64>) -> f64 {
        if self.linear {
            let denominator = self.g * u.x + self.h * u.y + self.i * u.z;
            if denominator == 0.0 {
                return INF;
            }
            let distance = -self.evaluate(p) / denominator;
            return if distance < 0.0 { INF } else { distance };
        }

        // Quadratic in the travel distance: a d^2 + b d + c = 0
        let a = self.a * u.x * u.x
            + self.b * u.y * u.y
            + self.c * u.z * u.z
            + self.d * u.x * u.y
            + self.e * u.x * u.z
            + self.f * u.y * u.z;
        let b = 2.0 * (self.a * p.x * u.x + self.b * p.y * u.y + self.c * p.z * u.z)
            + self.d * (p.x * u.y + p.y * u.x)
            + self.e * (p.x * u.z + p.z * u.x)
            + self.f * (p.y * u.z + p.z * u.y)
            + self.g * u.x
            + self.h * u.y
            + self.i * u.z;
        let c = self.evaluate(p);

        if a == 0.0 {
            // The ray direction is degenerate for this quadric
            if b == 0.0 {
                return INF;
            }
            let distance = -c / b;
            return if distance < 0.0 { INF } else { distance };
        }

        let discriminant = b * b - 4.0 * a * c;
        if discriminant <= 0.0 {
            return INF;
        }
        let sqrt_discriminant = discriminant.sqrt();
        let keep_non_negative = |d: f64| if d < 0.0 { INF } else { d };
        let d1 = keep_non_negative((-b + sqrt_discriminant) / (2.0 * a));
        let d2 = keep_non_negative((-b - sqrt_discriminant) / (2.0 * a));
        d1.min(d2)
    }

    /// Specular reflection of `u` at the point `p`: u - 2 (u . n) n
    pub fn reflect(&self, p: &Vector3<f64>, u: &Vector3<f64>) -> Vector3<f64> {
        let n = self.normal_at(p);
        u - n * (2.0 * u.dot(&n))
    }
}

/// A cell: an intersection of signed surface half-spaces naming one material
#[derive(Clone, Debug)]
pub struct Cell {
    /// (surface index, particle lies on the positive side) pairs
    pub surfaces: SmallVec<[(usize, bool); 8]>,
    /// Index of the material filling the cell
    pub material: usize,
}

impl Cell {
    /// Builds a cell from (surface index, positive side) pairs and a material index
    pub fn new(surfaces: impl IntoIterator<Item = (usize, bool)>, material: usize) -> Self {
        Self {
            surfaces: surfaces.into_iter().collect(),
            material,
        }
    }
}

/// True iff `p` satisfies every signed surface test of `cell`
pub fn cell_contains(cell: &Cell, surfaces: &[Surface], p: &Vector3<f64>) -> bool {
    cell.surfaces
        .iter()
        .all(|&(index, positive)| (surfaces[index].evaluate(p) > 0.0) == positive)
}

/// Finds the first cell containing `p` by linear scan, if any
pub fn locate_cell(cells: &[Cell], surfaces: &[Surface], p: &Vector3<f64>) -> Option<usize> {
    cells
        .iter()
        .position(|cell| cell_contains(cell, surfaces, p))
}
