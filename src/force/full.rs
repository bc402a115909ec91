use super::{ElementRestriction, ForceOperator, ZoneBuffers};
use crate::backend::Engine;
use crate::discretization::{BasisKind, BasisMap, MapLayout};
use crate::hydro::QuadratureData;
use nalgebra::{DMatrix, DVectorSlice};
use std::sync::Arc;

/// Force operator stored as one dense `(dim * h1_dofs) x l2_dofs` matrix per zone
///
/// Works on every zone shape. The local matrices are rebuilt from the host copy of the stress
/// values in [ForceOperator::setup].
pub struct FullAssemblyForce {
    map: Arc<BasisMap>,
    buffers: ZoneBuffers,
    dim: usize,
    local: Vec<DMatrix<f64>>,
}

impl FullAssemblyForce {
    /// `map` must use the full layout with H1 trial and L2 test spaces
    pub fn new(engine: Engine, map: Arc<BasisMap>, restriction: Arc<ElementRestriction>) -> Self {
        let sig = map.signature;
        assert_eq!(sig.layout, MapLayout::Full, "full assembly needs a full-layout map!");
        assert!(
            sig.trial.kind == BasisKind::H1 && sig.test.kind == BasisKind::L2,
            "full assembly maps H1 gradients against L2 values!"
        );
        assert_eq!(map.num_trial_dofs, restriction.h1_per_zone());
        assert_eq!(map.num_test_dofs, restriction.l2_per_zone());

        let dim = sig.dim.size();
        let (rows, cols) = (dim * map.num_trial_dofs, map.num_test_dofs);
        Self {
            local: vec![DMatrix::zeros(rows, cols); restriction.num_zones()],
            map,
            buffers: ZoneBuffers::new(engine, restriction),
            dim,
        }
    }

    fn assemble_zone(&self, stress: &[f64]) -> DMatrix<f64> {
        let (d, nh, nl, nq) = (
            self.dim,
            self.map.num_trial_dofs,
            self.map.num_test_dofs,
            self.map.num_quad,
        );
        let dshape = &self.map.dof_to_quad_d;
        let shape = &self.map.quad_to_dof;

        let mut f = DMatrix::zeros(d * nh, nl);
        for q in 0..nq {
            for c in 0..d {
                for i in 0..nh {
                    let grad_dot_stress: f64 = (0..d)
                        .map(|g| stress[(q * d + c) * d + g] * dshape[(g * nq + q) * nh + i])
                        .sum();
                    for j in 0..nl {
                        f[(c * nh + i, j)] += grad_dot_stress * shape[j * nq + q];
                    }
                }
            }
        }
        f
    }
}

impl ForceOperator for FullAssemblyForce {
    fn setup(&mut self, qdata: &QuadratureData) {
        let host = qdata.stress_jinv_t().host();
        let stress: &[f64] = &host;
        let len = self.map.num_quad * self.dim * self.dim;
        let this = &*self;
        let local = self.buffers.engine().map_collect(self.buffers.restriction().num_zones(), |zone| {
            this.assemble_zone(&stress[zone * len..(zone + 1) * len])
        });
        self.local = local;
    }

    fn mult(&self, _qdata: &QuadratureData, l2: &[f64], h1: &mut [f64]) {
        self.buffers.l2_to_h1(l2, h1, |zone, e, f| {
            let f_zone = &self.local[zone] * DVectorSlice::from_slice(e, e.len());
            f.copy_from_slice(f_zone.as_slice());
        });
    }

    fn mult_transpose(&self, _qdata: &QuadratureData, h1: &[f64], l2: &mut [f64]) {
        self.buffers.h1_to_l2(h1, l2, |zone, v, e| {
            let e_zone = self.local[zone].tr_mul(&DVectorSlice::from_slice(v, v.len()));
            e.copy_from_slice(e_zone.as_slice());
        });
    }
}
