use crate::error::{HydroError, HydroResult};
use nalgebra::{Matrix2, Matrix3};

/// Spatial dimension of a mesh, resolved once from a runtime integer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    One,
    Two,
    Three,
}

impl Dim {
    pub const fn size(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Number of entries in a `dim x dim` matrix
    pub const fn matrix_size(self) -> usize {
        self.size() * self.size()
    }
}

impl TryFrom<usize> for Dim {
    type Error = HydroError;

    fn try_from(dim: usize) -> HydroResult<Self> {
        match dim {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            _ => Err(HydroError::UnsupportedDimension(dim)),
        }
    }
}

/// Reference zone shapes
///
/// Tensor shapes live on the unit box `[0, 1]^d`; simplices on the unit simplex spanned by the
/// origin and the coordinate unit vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Geometry {
    Segment,
    Square,
    Triangle,
    Cube,
    Tetrahedron,
}

impl Geometry {
    pub const fn dim(self) -> Dim {
        match self {
            Self::Segment => Dim::One,
            Self::Square | Self::Triangle => Dim::Two,
            Self::Cube | Self::Tetrahedron => Dim::Three,
        }
    }

    /// Segments, squares and cubes are tensor products of 1D intervals
    pub const fn is_tensor(self) -> bool {
        matches!(self, Self::Segment | Self::Square | Self::Cube)
    }

    /// Measure of the reference shape
    pub fn reference_volume(self) -> f64 {
        match self {
            Self::Segment | Self::Square | Self::Cube => 1.0,
            Self::Triangle => 0.5,
            Self::Tetrahedron => 1.0 / 6.0,
        }
    }

    /// Characteristic length of a mesh of `num_zones` zones of this shape with `total_volume`
    ///
    /// ```
    /// use lagrangian_hydro::discretization::Geometry;
    ///
    /// assert!((Geometry::Square.characteristic_size(4.0, 16) - 0.5).abs() < 1e-14);
    /// assert!((Geometry::Triangle.characteristic_size(1.0, 2) - 1.0).abs() < 1e-14);
    /// assert!((Geometry::Cube.characteristic_size(8.0, 1) - 2.0).abs() < 1e-14);
    /// ```
    pub fn characteristic_size(self, total_volume: f64, num_zones: usize) -> f64 {
        let zone_volume = total_volume / num_zones as f64;
        match self {
            Self::Segment => zone_volume,
            Self::Square => zone_volume.sqrt(),
            Self::Triangle => (2.0 * zone_volume).sqrt(),
            Self::Cube => zone_volume.cbrt(),
            Self::Tetrahedron => (6.0 * zone_volume).cbrt(),
        }
    }
}

/// Compute the Jacobian, its inverse and its determinant at every quadrature point of one zone.
///
/// * `grads`: reference gradients of the position basis, `[(g * num_quad + q) * num_dofs + d]`
/// * `nodes`: zone-local nodal positions, component-major `[c * num_dofs + d]`
/// * `jac`, `inv_jac`: `[q * dim * dim + a * dim + b]` with `jac = d x_a / d xi_b`
/// * `det_j`: `[q]`
pub fn element_jacobians(
    dim: Dim,
    num_dofs: usize,
    num_quad: usize,
    grads: &[f64],
    nodes: &[f64],
    jac: &mut [f64],
    inv_jac: &mut [f64],
    det_j: &mut [f64],
) {
    let d = dim.size();
    let dd = dim.matrix_size();
    assert_eq!(grads.len(), d * num_quad * num_dofs, "gradient table has the wrong size!");
    assert_eq!(nodes.len(), d * num_dofs, "nodal position vector has the wrong size!");
    assert!(jac.len() >= num_quad * dd && inv_jac.len() >= num_quad * dd && det_j.len() >= num_quad);

    for q in 0..num_quad {
        let j = &mut jac[q * dd..(q + 1) * dd];
        for a in 0..d {
            let x_a = &nodes[a * num_dofs..(a + 1) * num_dofs];
            for b in 0..d {
                let g_b = &grads[(b * num_quad + q) * num_dofs..(b * num_quad + q + 1) * num_dofs];
                j[a * d + b] = x_a.iter().zip(g_b).map(|(x, g)| x * g).sum();
            }
        }
        det_j[q] = invert(dim, j, &mut inv_jac[q * dd..(q + 1) * dd]);
    }
}

/// Closed-form inverse of a small row-major matrix. Returns the determinant.
///
/// A singular matrix produces non-finite inverse entries; callers detect degeneracy through the
/// returned determinant.
pub fn invert(dim: Dim, j: &[f64], inv: &mut [f64]) -> f64 {
    match dim {
        Dim::One => invert_1d(j, inv),
        Dim::Two => invert_2d(j, inv),
        Dim::Three => invert_3d(j, inv),
    }
}

fn invert_1d(j: &[f64], inv: &mut [f64]) -> f64 {
    inv[0] = 1.0 / j[0];
    j[0]
}

fn invert_2d(j: &[f64], inv: &mut [f64]) -> f64 {
    let det = j[0] * j[3] - j[1] * j[2];
    let r_det = 1.0 / det;
    inv[0] = j[3] * r_det;
    inv[1] = -j[1] * r_det;
    inv[2] = -j[2] * r_det;
    inv[3] = j[0] * r_det;
    det
}

fn invert_3d(j: &[f64], inv: &mut [f64]) -> f64 {
    let [j11, j12, j13, j21, j22, j23, j31, j32, j33] =
        [j[0], j[1], j[2], j[3], j[4], j[5], j[6], j[7], j[8]];

    // cofactors of the first column
    let c11 = j22 * j33 - j23 * j32;
    let c21 = j13 * j32 - j12 * j33;
    let c31 = j12 * j23 - j13 * j22;

    let det = j11 * c11 + j21 * c21 + j31 * c31;
    let r_det = 1.0 / det;

    inv[0] = c11 * r_det;
    inv[1] = c21 * r_det;
    inv[2] = c31 * r_det;
    inv[3] = (j23 * j31 - j21 * j33) * r_det;
    inv[4] = (j11 * j33 - j13 * j31) * r_det;
    inv[5] = (j13 * j21 - j11 * j23) * r_det;
    inv[6] = (j21 * j32 - j22 * j31) * r_det;
    inv[7] = (j12 * j31 - j11 * j32) * r_det;
    inv[8] = (j11 * j22 - j12 * j21) * r_det;
    det
}

/// Smallest singular value of a small row-major matrix
pub fn min_singular_value(dim: Dim, j: &[f64]) -> f64 {
    if j[..dim.matrix_size()].iter().any(|v| !v.is_finite()) {
        return f64::NAN;
    }
    match dim {
        Dim::One => j[0].abs(),
        Dim::Two => Matrix2::from_row_slice(&j[..4])
            .singular_values()
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min),
        Dim::Three => Matrix3::from_row_slice(&j[..9])
            .singular_values()
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min),
    }
}
