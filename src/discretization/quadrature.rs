use super::Geometry;
use nalgebra::{DMatrix, SymmetricEigen};

/// Get a set of n Gauss-Legendre-Quadrature points and weights over `(-1, 1)`
///
/// ```
/// use lagrangian_hydro::discretization::quadrature::*;
///
/// let (points, weights) = gauss_quadrature_points(10);
/// assert_eq!(points.len(), 10);
/// assert!(points.iter().sum::<f64>().abs() < 1e-12);
/// assert!((weights.iter().sum::<f64>() - 2.0).abs() < 1e-12);
/// ```
// Golub-Welsch: eigenvalues of the Jacobi matrix of the Legendre recurrence
pub fn gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    let betas: Vec<f64> = (1..n)
        .map(|i| 0.5 / (1.0 - (2.0 * i as f64).powi(-2)).sqrt())
        .collect();

    let polymat: DMatrix<f64> = DMatrix::from_fn(n, n, |r, c| {
        if r == c + 1 {
            betas[r - 1]
        } else if c == r + 1 {
            betas[c - 1]
        } else {
            0.0
        }
    });

    let eigen_decomp = SymmetricEigen::new(polymat);

    let mut xw: Vec<(f64, f64)> = eigen_decomp
        .eigenvalues
        .iter()
        .cloned()
        .zip(
            eigen_decomp
                .eigenvectors
                .row(0)
                .iter()
                .map(|weight| (*weight).powi(2) * 2.0),
        )
        .collect();

    xw.sort_by(|a, b| a.0.total_cmp(&b.0));
    xw.into_iter().unzip()
}

/// Scale a set of quadrature points from `(-1, 1)` to `(min, max)`
///
/// Returns the Jacobian of the map alongside the scaled points.
pub fn scale_gauss_quad_points(points: &[f64], min: f64, max: f64) -> (f64, Vec<f64>) {
    let scale_factor = (max - min) / 2.0;
    let offset = (max + min) / 2.0;

    (
        scale_factor,
        points
            .iter()
            .map(|x| x * scale_factor + offset)
            .collect::<Vec<f64>>(),
    )
}

/// Gauss-Legendre points and weights on the unit interval `(0, 1)`
pub fn unit_gauss_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    let (points, weights) = gauss_quadrature_points(n);
    let (scale, points) = scale_gauss_quad_points(&points, 0.0, 1.0);
    (points, weights.iter().map(|w| w * scale).collect())
}

/// Quadrature order needed by the hydro force and mass integrands
pub const fn hydro_rule_order(h1_order: usize, l2_order: usize) -> usize {
    3 * h1_order + l2_order - 1
}

/// A quadrature rule on a reference zone
#[derive(Clone, Debug)]
pub struct IntegrationRule {
    pub geometry: Geometry,
    /// Polynomial degree integrated exactly
    pub order: usize,
    /// Reference coordinates (unused components are zero)
    pub points: Vec<[f64; 3]>,
    pub weights: Vec<f64>,
    /// Generating 1D rule for tensor shapes; empty for simplices
    pub points_1d: Vec<f64>,
    pub weights_1d: Vec<f64>,
}

impl IntegrationRule {
    /// Build a rule exact for polynomials of degree `order` on `geometry`.
    ///
    /// Tensor rules are ordered `q = qx + qy * Q + qz * Q^2`.
    ///
    /// ```
    /// use lagrangian_hydro::discretization::{Geometry, IntegrationRule};
    ///
    /// let rule = IntegrationRule::for_geometry(Geometry::Square, 2);
    /// assert_eq!(rule.num_points_1d(), 2);
    /// assert_eq!(rule.num_points(), 4);
    /// assert!((rule.weights.iter().sum::<f64>() - 1.0).abs() < 1e-14);
    /// ```
    pub fn for_geometry(geometry: Geometry, order: usize) -> Self {
        if geometry.is_tensor() {
            Self::tensor(geometry, order)
        } else {
            Self::collapsed(geometry, order)
        }
    }

    fn tensor(geometry: Geometry, order: usize) -> Self {
        let n = order / 2 + 1;
        let (points_1d, weights_1d) = unit_gauss_points(n);
        let dim = geometry.dim().size();

        let (nz, ny) = match dim {
            1 => (1, 1),
            2 => (1, n),
            _ => (n, n),
        };

        let mut points = Vec::with_capacity(n * ny * nz);
        let mut weights = Vec::with_capacity(n * ny * nz);
        for qz in 0..nz {
            for qy in 0..ny {
                for qx in 0..n {
                    let mut point = [points_1d[qx], 0.0, 0.0];
                    let mut weight = weights_1d[qx];
                    if dim > 1 {
                        point[1] = points_1d[qy];
                        weight *= weights_1d[qy];
                    }
                    if dim > 2 {
                        point[2] = points_1d[qz];
                        weight *= weights_1d[qz];
                    }
                    points.push(point);
                    weights.push(weight);
                }
            }
        }

        Self {
            geometry,
            order,
            points,
            weights,
            points_1d,
            weights_1d,
        }
    }

    // Gauss rules on the unit box pulled back onto the simplex through the Duffy map
    fn collapsed(geometry: Geometry, order: usize) -> Self {
        let n = order / 2 + 2;
        let (u, wu) = unit_gauss_points(n);

        let mut points = Vec::new();
        let mut weights = Vec::new();
        match geometry {
            Geometry::Triangle => {
                for i in 0..n {
                    for j in 0..n {
                        points.push([u[i], u[j] * (1.0 - u[i]), 0.0]);
                        weights.push(wu[i] * wu[j] * (1.0 - u[i]));
                    }
                }
            }
            Geometry::Tetrahedron => {
                for i in 0..n {
                    for j in 0..n {
                        for k in 0..n {
                            let s = 1.0 - u[i];
                            points.push([u[i], u[j] * s, u[k] * s * (1.0 - u[j])]);
                            weights.push(wu[i] * wu[j] * wu[k] * s * s * (1.0 - u[j]));
                        }
                    }
                }
            }
            _ => unreachable!("tensor shapes use tensor rules"),
        }

        Self {
            geometry,
            order,
            points,
            weights,
            points_1d: Vec::new(),
            weights_1d: Vec::new(),
        }
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Points per axis of a tensor rule (0 for simplex rules)
    pub fn num_points_1d(&self) -> usize {
        self.points_1d.len()
    }
}
