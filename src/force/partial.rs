use super::{ElementRestriction, ForceOperator, ZoneBuffers};
use crate::backend::Engine;
use crate::hydro::QuadratureData;
use crate::tensor::TensorKernels;
use std::sync::Arc;

/// Force operator applied zone by zone with sum-factorized kernels; nothing is assembled
pub struct PartialAssemblyForce {
    kernels: TensorKernels,
    buffers: ZoneBuffers,
}

impl PartialAssemblyForce {
    pub fn new(engine: Engine, kernels: TensorKernels, restriction: Arc<ElementRestriction>) -> Self {
        assert_eq!(
            kernels.num_h1_dofs(),
            restriction.h1_per_zone(),
            "tensor kernels do not match the H1 space!"
        );
        assert_eq!(
            kernels.num_l2_dofs(),
            restriction.l2_per_zone(),
            "tensor kernels do not match the L2 space!"
        );

        Self {
            kernels,
            buffers: ZoneBuffers::new(engine, restriction),
        }
    }

    fn zone_stress<'a>(&self, stress: &'a [f64], zone: usize) -> &'a [f64] {
        let len = self.kernels.num_quad() * self.kernels.dim().matrix_size();
        &stress[zone * len..(zone + 1) * len]
    }
}

impl ForceOperator for PartialAssemblyForce {
    fn setup(&mut self, _qdata: &QuadratureData) {}

    fn mult(&self, qdata: &QuadratureData, l2: &[f64], h1: &mut [f64]) {
        let view = self.buffers.engine().kernel_view(qdata.stress_jinv_t());
        let stress: &[f64] = &view;
        self.buffers.l2_to_h1(l2, h1, |zone, e, f| {
            self.kernels.force_mult(self.zone_stress(stress, zone), e, f)
        });
    }

    fn mult_transpose(&self, qdata: &QuadratureData, h1: &[f64], l2: &mut [f64]) {
        let view = self.buffers.engine().kernel_view(qdata.stress_jinv_t());
        let stress: &[f64] = &view;
        self.buffers.h1_to_l2(h1, l2, |zone, v, e| {
            self.kernels.force_mult_transpose(self.zone_stress(stress, zone), v, e)
        });
    }
}
