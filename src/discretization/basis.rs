use super::quadrature::gauss_quadrature_points;
use super::Geometry;
use crate::error::{HydroError, HydroResult};
use nalgebra::DMatrix;

/// Function space a basis spans
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BasisKind {
    /// Continuous nodal basis at Gauss-Lobatto points (kinematic fields)
    H1,
    /// Discontinuous nodal basis at Gauss-Legendre points (thermodynamic fields)
    L2,
}

/// Legendre polynomial `P_n` and its derivative at `x` in `[-1, 1]`
fn legendre_and_derivative(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let (mut p_prev, mut p) = (1.0, x);
    let (mut dp_prev, mut dp) = (0.0, 1.0);
    for k in 2..=n {
        let kf = k as f64;
        let p_next = ((2.0 * kf - 1.0) * x * p - (kf - 1.0) * p_prev) / kf;
        let dp_next = dp_prev + (2.0 * kf - 1.0) * p;
        p_prev = p;
        p = p_next;
        dp_prev = dp;
        dp = dp_next;
    }
    (p, dp)
}

/// Gauss-Lobatto nodes on `[0, 1]`: the endpoints plus the roots of `P'_order`
///
/// ```
/// use lagrangian_hydro::discretization::basis::gauss_lobatto_nodes;
///
/// let nodes = gauss_lobatto_nodes(2);
/// assert_eq!(nodes, vec![0.0, 0.5, 1.0]);
/// ```
pub fn gauss_lobatto_nodes(order: usize) -> Vec<f64> {
    assert!(order >= 1, "Gauss-Lobatto nodes need at least two points!");
    let n = order;
    let mut nodes: Vec<f64> = (0..=n)
        .map(|i| -(std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect();

    // Newton iterations on (1 - x^2) P'_n(x), started from Chebyshev-Gauss-Lobatto points
    for x in nodes.iter_mut().take(n).skip(1) {
        for _ in 0..100 {
            let (p, dp) = legendre_and_derivative(n, *x);
            let ddp = (2.0 * *x * dp - (n * (n + 1)) as f64 * p) / (1.0 - *x * *x);
            let dx = dp / ddp;
            *x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
    }

    nodes[0] = -1.0;
    nodes[n] = 1.0;
    nodes
        .iter()
        .map(|x| if x.abs() < 1e-15 { 0.5 } else { 0.5 * (x + 1.0) })
        .collect()
}

/// 1D nodal Lagrange basis
#[derive(Clone, Debug)]
pub struct Basis1D {
    nodes: Vec<f64>,
}

impl Basis1D {
    pub fn new(kind: BasisKind, order: usize) -> Self {
        let nodes = match kind {
            BasisKind::H1 => gauss_lobatto_nodes(order),
            BasisKind::L2 => {
                let (points, _) = gauss_quadrature_points(order + 1);
                points.iter().map(|x| 0.5 * (x + 1.0)).collect()
            }
        };
        Self { nodes }
    }

    pub fn num_dofs(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// Values and derivatives of every basis function at `x`
    pub fn eval(&self, x: f64, values: &mut [f64], derivatives: &mut [f64]) {
        let n = self.nodes.len();
        for i in 0..n {
            let xi = self.nodes[i];
            let mut value = 1.0;
            let mut derivative = 0.0;
            for j in (0..n).filter(|j| *j != i) {
                let factor = 1.0 / (xi - self.nodes[j]);
                derivative = derivative * (x - self.nodes[j]) * factor + value * factor;
                value *= (x - self.nodes[j]) * factor;
            }
            values[i] = value;
            derivatives[i] = derivative;
        }
    }
}

/// Nodal basis on a simplex: monomials made interpolatory through an inverted Vandermonde matrix
#[derive(Clone, Debug)]
struct SimplexBasis {
    exponents: Vec<[i32; 3]>,
    /// `coefficients[(m, i)]`: weight of monomial m in basis function i
    coefficients: DMatrix<f64>,
    nodes: Vec<[f64; 3]>,
}

impl SimplexBasis {
    fn new(geometry: Geometry, kind: BasisKind, order: usize) -> HydroResult<Self> {
        let dim = geometry.dim().size();
        let p = order as i32;

        let mut exponents = Vec::new();
        for k in 0..=(if dim == 3 { p } else { 0 }) {
            for j in 0..=(p - k) {
                for i in 0..=(p - k - j) {
                    exponents.push([i, j, k]);
                }
            }
        }

        let nodes: Vec<[f64; 3]> = if order == 0 {
            let c = 1.0 / (dim + 1) as f64;
            vec![[c, c, if dim == 3 { c } else { 0.0 }]]
        } else {
            exponents
                .iter()
                .map(|[i, j, k]| [*i as f64 / order as f64, *j as f64 / order as f64, *k as f64 / order as f64])
                .collect()
        };

        let n = exponents.len();
        let vandermonde = DMatrix::from_fn(n, n, |r, c| monomial(&exponents[c], &nodes[r]));
        let coefficients = vandermonde.try_inverse().ok_or(HydroError::UnsupportedOrder {
            geometry,
            kind,
            order,
        })?;

        Ok(Self {
            exponents,
            coefficients,
            nodes,
        })
    }

    fn calc_shape(&self, x: &[f64; 3], shape: &mut [f64]) {
        let n = self.exponents.len();
        shape[..n].fill(0.0);
        for (m, e) in self.exponents.iter().enumerate() {
            let mono = monomial(e, x);
            for (i, s) in shape.iter_mut().take(n).enumerate() {
                *s += mono * self.coefficients[(m, i)];
            }
        }
    }

    fn calc_dshape(&self, dim: usize, x: &[f64; 3], dshape: &mut [f64]) {
        let n = self.exponents.len();
        dshape[..dim * n].fill(0.0);
        for (m, e) in self.exponents.iter().enumerate() {
            for g in 0..dim {
                let d_mono = monomial_derivative(e, x, g);
                if d_mono == 0.0 {
                    continue;
                }
                for i in 0..n {
                    dshape[g * n + i] += d_mono * self.coefficients[(m, i)];
                }
            }
        }
    }
}

fn monomial(e: &[i32; 3], x: &[f64; 3]) -> f64 {
    x[0].powi(e[0]) * x[1].powi(e[1]) * x[2].powi(e[2])
}

fn monomial_derivative(e: &[i32; 3], x: &[f64; 3], dir: usize) -> f64 {
    if e[dir] == 0 {
        return 0.0;
    }
    let mut value = e[dir] as f64;
    for k in 0..3 {
        let power = if k == dir { e[k] - 1 } else { e[k] };
        value *= x[k].powi(power);
    }
    value
}

#[derive(Clone, Debug)]
enum ElementBasis {
    Tensor(Basis1D),
    Simplex(SimplexBasis),
}

/// A reference finite element: a nodal basis of some kind and order on a reference shape
///
/// Tensor elements number their dofs lexicographically: `d = dx + dy * n + dz * n^2`.
#[derive(Clone, Debug)]
pub struct FiniteElement {
    pub geometry: Geometry,
    pub kind: BasisKind,
    pub order: usize,
    num_dofs: usize,
    basis: ElementBasis,
}

impl FiniteElement {
    pub fn new(geometry: Geometry, kind: BasisKind, order: usize) -> HydroResult<Self> {
        if kind == BasisKind::H1 && order == 0 {
            return Err(HydroError::UnsupportedOrder {
                geometry,
                kind,
                order,
            });
        }

        let dim = geometry.dim().size();
        let basis = if geometry.is_tensor() {
            ElementBasis::Tensor(Basis1D::new(kind, order))
        } else {
            ElementBasis::Simplex(SimplexBasis::new(geometry, kind, order)?)
        };
        let num_dofs = match &basis {
            ElementBasis::Tensor(b) => b.num_dofs().pow(dim as u32),
            ElementBasis::Simplex(s) => s.exponents.len(),
        };

        Ok(Self {
            geometry,
            kind,
            order,
            num_dofs,
            basis,
        })
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn dim(&self) -> usize {
        self.geometry.dim().size()
    }

    /// The generating 1D basis of a tensor element
    pub fn basis_1d(&self) -> Option<&Basis1D> {
        match &self.basis {
            ElementBasis::Tensor(b) => Some(b),
            ElementBasis::Simplex(_) => None,
        }
    }

    /// Reference coordinates of dof `d`
    pub fn node(&self, d: usize) -> [f64; 3] {
        match &self.basis {
            ElementBasis::Tensor(b) => {
                let n = b.num_dofs();
                let idx = [d % n, (d / n) % n, d / (n * n)];
                let mut node = [0.0; 3];
                for k in 0..self.dim() {
                    node[k] = b.nodes()[idx[k]];
                }
                node
            }
            ElementBasis::Simplex(s) => s.nodes[d],
        }
    }

    /// Basis function values at `x`
    pub fn calc_shape(&self, x: &[f64; 3], shape: &mut [f64]) {
        match &self.basis {
            ElementBasis::Tensor(b) => {
                let (vals, _) = self.tensor_factors(b, x);
                let n = b.num_dofs();
                for (d, s) in shape.iter_mut().take(self.num_dofs).enumerate() {
                    let idx = [d % n, (d / n) % n, d / (n * n)];
                    *s = (0..self.dim()).map(|k| vals[k][idx[k]]).product();
                }
            }
            ElementBasis::Simplex(s) => s.calc_shape(x, shape),
        }
    }

    /// Reference gradients at `x`, laid out `[g * num_dofs + d]`
    pub fn calc_dshape(&self, x: &[f64; 3], dshape: &mut [f64]) {
        let dim = self.dim();
        match &self.basis {
            ElementBasis::Tensor(b) => {
                let (vals, ders) = self.tensor_factors(b, x);
                let n = b.num_dofs();
                for d in 0..self.num_dofs {
                    let idx = [d % n, (d / n) % n, d / (n * n)];
                    for g in 0..dim {
                        dshape[g * self.num_dofs + d] = (0..dim)
                            .map(|k| if k == g { ders[k][idx[k]] } else { vals[k][idx[k]] })
                            .product();
                    }
                }
            }
            ElementBasis::Simplex(s) => s.calc_dshape(dim, x, dshape),
        }
    }

    fn tensor_factors(&self, b: &Basis1D, x: &[f64; 3]) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let n = b.num_dofs();
        let mut vals = vec![vec![0.0; n]; self.dim()];
        let mut ders = vec![vec![0.0; n]; self.dim()];
        for k in 0..self.dim() {
            b.eval(x[k], &mut vals[k], &mut ders[k]);
        }
        (vals, ders)
    }
}
