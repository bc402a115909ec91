mod dim2;
mod dim3;

use crate::discretization::{BasisMap, Dim, Geometry, MapLayout};
use crate::error::{HydroError, HydroResult};
use std::sync::Arc;

/// 1D tables of the kinematic (H1) and thermodynamic (L2) spaces on a tensor rule
#[derive(Clone, Debug)]
pub struct TensorBasis {
    pub h1: Arc<BasisMap>,
    pub l2: Arc<BasisMap>,
}

impl TensorBasis {
    fn h1_dofs_1d(&self) -> usize {
        self.h1.num_trial_dofs
    }

    fn l2_dofs_1d(&self) -> usize {
        self.l2.num_trial_dofs
    }

    fn quad_1d(&self) -> usize {
        self.h1.num_quad
    }
}

/// Sum-factorized kernels, with the spatial dimension resolved once at construction
#[derive(Clone, Debug)]
pub enum TensorKernels {
    Two(TensorBasis),
    Three(TensorBasis),
}

impl TensorKernels {
    pub fn new(dim: Dim, h1: Arc<BasisMap>, l2: Arc<BasisMap>) -> HydroResult<Self> {
        for map in [&h1, &l2] {
            if map.signature.layout != MapLayout::Tensor {
                return Err(HydroError::UnsupportedTensorPath {
                    geometry: map.signature.geometry,
                });
            }
        }
        assert_eq!(h1.num_quad, l2.num_quad, "H1 and L2 maps use different rules!");

        let basis = TensorBasis { h1, l2 };
        match dim {
            Dim::Two => Ok(Self::Two(basis)),
            Dim::Three => Ok(Self::Three(basis)),
            Dim::One => Err(HydroError::UnsupportedTensorPath {
                geometry: Geometry::Segment,
            }),
        }
    }

    pub fn dim(&self) -> Dim {
        match self {
            Self::Two(_) => Dim::Two,
            Self::Three(_) => Dim::Three,
        }
    }

    fn basis(&self) -> &TensorBasis {
        match self {
            Self::Two(basis) | Self::Three(basis) => basis,
        }
    }

    /// Quadrature points per zone
    pub fn num_quad(&self) -> usize {
        self.basis().quad_1d().pow(self.dim().size() as u32)
    }

    /// Scalar H1 dofs per zone
    pub fn num_h1_dofs(&self) -> usize {
        self.basis().h1_dofs_1d().pow(self.dim().size() as u32)
    }

    /// L2 dofs per zone
    pub fn num_l2_dofs(&self) -> usize {
        self.basis().l2_dofs_1d().pow(self.dim().size() as u32)
    }

    /// L2 field values at the quadrature points of one zone
    pub fn l2_values(&self, e: &[f64], out: &mut [f64]) {
        let basis = self.basis();
        let (nl, nq) = (basis.l2_dofs_1d(), basis.quad_1d());
        match self {
            Self::Two(_) => dim2::values(&basis.l2.dof_to_quad, nl, nq, e, out),
            Self::Three(_) => dim3::values(&basis.l2.dof_to_quad, nl, nq, e, out),
        }
    }

    /// Transpose of [TensorKernels::l2_values]
    pub fn l2_values_transpose(&self, s: &[f64], out: &mut [f64]) {
        let basis = self.basis();
        let (nl, nq) = (basis.l2_dofs_1d(), basis.quad_1d());
        match self {
            Self::Two(_) => dim2::values_transpose(&basis.l2.quad_to_dof, nl, nq, s, out),
            Self::Three(_) => dim3::values_transpose(&basis.l2.quad_to_dof, nl, nq, s, out),
        }
    }

    /// Reference gradient `d u_c / d xi_k` of a component-major H1 vector field, laid out
    /// `[(q * dim + c) * dim + k]`
    pub fn h1_vector_grad(&self, u: &[f64], out: &mut [f64]) {
        let basis = self.basis();
        let (nd, nq) = (basis.h1_dofs_1d(), basis.quad_1d());
        let (b, g) = (&basis.h1.dof_to_quad, &basis.h1.dof_to_quad_d);
        match self {
            Self::Two(_) => dim2::vector_grad(b, g, nd, nq, u, out),
            Self::Three(_) => dim3::vector_grad(b, g, nd, nq, u, out),
        }
    }

    /// Transpose of [TensorKernels::h1_vector_grad]
    pub fn h1_grad_transpose(&self, w: &[f64], out: &mut [f64]) {
        let basis = self.basis();
        let (nd, nq) = (basis.h1_dofs_1d(), basis.quad_1d());
        let (bt, gt) = (&basis.h1.quad_to_dof, &basis.h1.quad_to_dof_d);
        match self {
            Self::Two(_) => dim2::grad_transpose(bt, gt, nd, nq, w, out),
            Self::Three(_) => dim3::grad_transpose(bt, gt, nd, nq, w, out),
        }
    }

    /// Zone-local force action `v_{i,c} = sum_q sum_k S[q,c,k] dphi_i/dxi_k(q) e(q)`
    ///
    /// `stress` holds the zone's `stressJinvT` values `[(q * dim + c) * dim + k]`.
    pub fn force_mult(&self, stress: &[f64], e: &[f64], v: &mut [f64]) {
        let nq = self.num_quad();
        let dd = self.dim().matrix_size();
        let mut e_q = vec![0.0; nq];
        self.l2_values(e, &mut e_q);

        let weighted: Vec<f64> = stress[..nq * dd]
            .iter()
            .enumerate()
            .map(|(i, s)| s * e_q[i / dd])
            .collect();
        self.h1_grad_transpose(&weighted, v);
    }

    /// Zone-local transposed force action `e_j = sum_q psi_j(q) sum_{c,k} S[q,c,k] grad(v)[q,c,k]`
    pub fn force_mult_transpose(&self, stress: &[f64], v: &[f64], e: &mut [f64]) {
        let nq = self.num_quad();
        let dd = self.dim().matrix_size();
        let mut grad = vec![0.0; nq * dd];
        self.h1_vector_grad(v, &mut grad);

        let s_q: Vec<f64> = (0..nq)
            .map(|q| {
                stress[q * dd..(q + 1) * dd]
                    .iter()
                    .zip(&grad[q * dd..(q + 1) * dd])
                    .map(|(s, g)| s * g)
                    .sum()
            })
            .collect();
        self.l2_values_transpose(&s_q, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::{BasisKind, BasisMapCache, FiniteElement, IntegrationRule};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn kernels(
        geometry: Geometry,
        h1_order: usize,
        l2_order: usize,
    ) -> (TensorKernels, FiniteElement, FiniteElement, IntegrationRule) {
        let cache = BasisMapCache::new();
        let h1 = FiniteElement::new(geometry, BasisKind::H1, h1_order).unwrap();
        let l2 = FiniteElement::new(geometry, BasisKind::L2, l2_order).unwrap();
        let rule = IntegrationRule::for_geometry(geometry, 3 * h1_order + l2_order - 1);
        let h1_map = cache.for_space(&h1, &rule, MapLayout::Tensor, true).unwrap();
        let l2_map = cache.for_space(&l2, &rule, MapLayout::Tensor, true).unwrap();
        (TensorKernels::new(geometry.dim(), h1_map, l2_map).unwrap(), h1, l2, rule)
    }

    fn random(rng: &mut StdRng, n: usize) -> Vec<f64> {
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(a, b)| a * b).sum()
    }

    fn check_adjoint(geometry: Geometry) {
        let (k, _, _, _) = kernels(geometry, 2, 1);
        let d = k.dim().size();
        let mut rng = StdRng::seed_from_u64(7);

        let stress = random(&mut rng, k.num_quad() * d * d);
        let e = random(&mut rng, k.num_l2_dofs());
        let v = random(&mut rng, d * k.num_h1_dofs());

        let mut fe = vec![0.0; d * k.num_h1_dofs()];
        k.force_mult(&stress, &e, &mut fe);
        let mut ftv = vec![0.0; k.num_l2_dofs()];
        k.force_mult_transpose(&stress, &v, &mut ftv);

        let lhs = dot(&fe, &v);
        let rhs = dot(&e, &ftv);
        assert_relative_eq!(lhs, rhs, max_relative = 1e-12);
    }

    #[test]
    fn force_kernels_are_adjoint_2d() {
        check_adjoint(Geometry::Square);
    }

    #[test]
    fn force_kernels_are_adjoint_3d() {
        check_adjoint(Geometry::Cube);
    }

    fn check_against_direct(geometry: Geometry) {
        let (k, h1, l2, rule) = kernels(geometry, 2, 1);
        let d = k.dim().size();
        let (nh, nl, nq) = (h1.num_dofs(), l2.num_dofs(), rule.num_points());
        let mut rng = StdRng::seed_from_u64(11);

        let e = random(&mut rng, nl);
        let x = random(&mut rng, d * nh);
        let mut e_q = vec![0.0; nq];
        k.l2_values(&e, &mut e_q);
        let mut grad = vec![0.0; nq * d * d];
        k.h1_vector_grad(&x, &mut grad);

        let (mut shape, mut dshape) = (vec![0.0; nl], vec![0.0; d * nh]);
        for (q, point) in rule.points.iter().enumerate() {
            l2.calc_shape(point, &mut shape);
            assert_relative_eq!(e_q[q], dot(&shape, &e), epsilon = 1e-12);

            h1.calc_dshape(point, &mut dshape);
            for c in 0..d {
                for g in 0..d {
                    let direct = dot(&dshape[g * nh..(g + 1) * nh], &x[c * nh..(c + 1) * nh]);
                    assert_relative_eq!(grad[(q * d + c) * d + g], direct, epsilon = 1e-11);
                }
            }
        }
    }

    #[test]
    fn sum_factorization_matches_direct_evaluation() {
        check_against_direct(Geometry::Square);
        check_against_direct(Geometry::Cube);
    }

    #[test]
    fn segments_have_no_tensor_kernels() {
        let cache = BasisMapCache::new();
        let h1 = FiniteElement::new(Geometry::Segment, BasisKind::H1, 1).unwrap();
        let rule = IntegrationRule::for_geometry(Geometry::Segment, 2);
        let map = cache.for_space(&h1, &rule, MapLayout::Tensor, false).unwrap();
        assert!(matches!(
            TensorKernels::new(Dim::One, Arc::clone(&map), map),
            Err(HydroError::UnsupportedTensorPath { .. })
        ));
    }
}
