/// Dense per-zone force matrices
pub mod full;
/// Matrix-free tensor-product force kernels
pub mod partial;

pub use full::FullAssemblyForce;
pub use partial::PartialAssemblyForce;

use crate::backend::{Buffer, Engine, Residency};
use crate::hydro::QuadratureData;
use crate::mesh::MeshProvider;
use std::sync::Arc;

/// The force operator `F`, mapping thermodynamic (L2) vectors to kinematic (H1) vectors
///
/// `F` is assembled from the `stress_jinv_t` values of a [QuadratureData] store. `mult` and
/// `mult_transpose` are exact algebraic adjoints for the same store.
pub trait ForceOperator: Send + Sync {
    /// Refresh anything derived from the quadrature data; called once after every update
    fn setup(&mut self, qdata: &QuadratureData);

    /// `h1 = F l2`
    fn mult(&self, qdata: &QuadratureData, l2: &[f64], h1: &mut [f64]);

    /// `l2 = F^T h1`
    fn mult_transpose(&self, qdata: &QuadratureData, h1: &[f64], l2: &mut [f64]);
}

/// Gather and scatter between global vectors and zone-local vectors
///
/// H1 vectors are component-major both globally (`c * num_h1_dofs + dof`) and locally
/// (`c * h1_per_zone + i`).
#[derive(Clone, Debug)]
pub struct ElementRestriction {
    dim: usize,
    num_zones: usize,
    num_h1_dofs: usize,
    num_l2_dofs: usize,
    h1_per_zone: usize,
    l2_per_zone: usize,
    h1_dofs: Vec<usize>,
    l2_dofs: Vec<usize>,
}

impl ElementRestriction {
    pub fn new<M: MeshProvider + ?Sized>(mesh: &M) -> Self {
        let num_zones = mesh.num_zones();
        let h1_per_zone = if num_zones > 0 { mesh.h1_zone_dofs(0).len() } else { 0 };
        let l2_per_zone = if num_zones > 0 { mesh.l2_zone_dofs(0).len() } else { 0 };

        let mut h1_dofs = Vec::with_capacity(num_zones * h1_per_zone);
        let mut l2_dofs = Vec::with_capacity(num_zones * l2_per_zone);
        for zone in 0..num_zones {
            let (h1, l2) = (mesh.h1_zone_dofs(zone), mesh.l2_zone_dofs(zone));
            assert_eq!(h1.len(), h1_per_zone, "zones carry different numbers of H1 dofs!");
            assert_eq!(l2.len(), l2_per_zone, "zones carry different numbers of L2 dofs!");
            h1_dofs.extend_from_slice(h1);
            l2_dofs.extend_from_slice(l2);
        }

        Self {
            dim: mesh.dim().size(),
            num_zones,
            num_h1_dofs: mesh.num_h1_dofs(),
            num_l2_dofs: mesh.num_l2_dofs(),
            h1_per_zone,
            l2_per_zone,
            h1_dofs,
            l2_dofs,
        }
    }

    pub fn num_zones(&self) -> usize {
        self.num_zones
    }

    /// Spatial dimension, i.e. the number of components of an H1 vector
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Scalar H1 dofs
    pub fn num_h1_dofs(&self) -> usize {
        self.num_h1_dofs
    }

    /// Length of a global H1 vector (all components)
    pub fn h1_size(&self) -> usize {
        self.dim * self.num_h1_dofs
    }

    pub fn l2_size(&self) -> usize {
        self.num_l2_dofs
    }

    /// Scalar H1 dofs per zone
    pub fn h1_per_zone(&self) -> usize {
        self.h1_per_zone
    }

    pub fn l2_per_zone(&self) -> usize {
        self.l2_per_zone
    }

    pub fn h1_zone_dofs(&self, zone: usize) -> &[usize] {
        &self.h1_dofs[zone * self.h1_per_zone..(zone + 1) * self.h1_per_zone]
    }

    pub fn l2_zone_dofs(&self, zone: usize) -> &[usize] {
        &self.l2_dofs[zone * self.l2_per_zone..(zone + 1) * self.l2_per_zone]
    }

    /// Copy the values of `zone` out of a global H1 vector
    pub fn gather_h1(&self, zone: usize, global: &[f64], local: &mut [f64]) {
        let n = self.h1_per_zone;
        for (i, dof) in self.h1_zone_dofs(zone).iter().enumerate() {
            for c in 0..self.dim {
                local[c * n + i] = global[c * self.num_h1_dofs + dof];
            }
        }
    }

    /// Add zone-local H1 values into a global vector
    pub fn scatter_add_h1(&self, zone: usize, local: &[f64], global: &mut [f64]) {
        let n = self.h1_per_zone;
        for (i, dof) in self.h1_zone_dofs(zone).iter().enumerate() {
            for c in 0..self.dim {
                global[c * self.num_h1_dofs + dof] += local[c * n + i];
            }
        }
    }

    pub fn gather_l2(&self, zone: usize, global: &[f64], local: &mut [f64]) {
        for (l, dof) in local.iter_mut().zip(self.l2_zone_dofs(zone)) {
            *l = global[*dof];
        }
    }

    /// Write zone-local L2 values into a global vector; L2 dofs belong to a single zone
    pub fn scatter_l2(&self, zone: usize, local: &[f64], global: &mut [f64]) {
        for (l, dof) in local.iter().zip(self.l2_zone_dofs(zone)) {
            global[*dof] = *l;
        }
    }
}

/// Device-resident global and zone-local vectors shared by the force operators
///
/// Inputs are copied into a device buffer, zone kernels write zone-local results on the device,
/// and the host assembles the global output from the pulled zone-local values.
pub(crate) struct ZoneBuffers {
    engine: Engine,
    restriction: Arc<ElementRestriction>,
    h1: Buffer,
    l2: Buffer,
    h1_local: Buffer,
    l2_local: Buffer,
}

impl ZoneBuffers {
    pub(crate) fn new(engine: Engine, restriction: Arc<ElementRestriction>) -> Self {
        let r = restriction.as_ref();
        let zones = r.num_zones();
        Self {
            h1: engine.alloc(r.h1_size(), Residency::Device),
            l2: engine.alloc(r.l2_size(), Residency::Device),
            h1_local: engine.alloc(zones * r.dim() * r.h1_per_zone(), Residency::Device),
            l2_local: engine.alloc(zones * r.l2_per_zone(), Residency::Device),
            engine,
            restriction,
        }
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn restriction(&self) -> &ElementRestriction {
        &self.restriction
    }

    /// `h1 = sum_z P_z^T kernel(z, R_z l2)` with `kernel(zone, e_local, f_local)`
    pub(crate) fn l2_to_h1<F>(&self, l2: &[f64], h1: &mut [f64], kernel: F)
    where
        F: Fn(usize, &[f64], &mut [f64]) + Send + Sync,
    {
        let r = self.restriction.as_ref();
        let (nl, nh) = (r.l2_per_zone(), r.dim() * r.h1_per_zone());
        self.l2.host_mut().copy_from_slice(l2);
        {
            let input = self.engine.kernel_view(&self.l2);
            let input: &[f64] = &input;
            let mut output = self.engine.kernel_view_mut(&self.h1_local);
            self.engine.for_each_chunk_mut(&mut output[..], nh, |zone, f| {
                let mut e = vec![0.0; nl];
                r.gather_l2(zone, input, &mut e);
                kernel(zone, &e, f);
            });
        }

        let local = self.h1_local.host();
        h1.fill(0.0);
        for zone in 0..r.num_zones() {
            r.scatter_add_h1(zone, &local[zone * nh..(zone + 1) * nh], h1);
        }
    }

    /// `l2 = P_z^T kernel(z, R_z h1)` on every zone, with `kernel(zone, v_local, e_local)`
    pub(crate) fn h1_to_l2<F>(&self, h1: &[f64], l2: &mut [f64], kernel: F)
    where
        F: Fn(usize, &[f64], &mut [f64]) + Send + Sync,
    {
        let r = self.restriction.as_ref();
        let (nl, nh) = (r.l2_per_zone(), r.dim() * r.h1_per_zone());
        self.h1.host_mut().copy_from_slice(h1);
        {
            let input = self.engine.kernel_view(&self.h1);
            let input: &[f64] = &input;
            let mut output = self.engine.kernel_view_mut(&self.l2_local);
            self.engine.for_each_chunk_mut(&mut output[..], nl, |zone, e| {
                let mut v = vec![0.0; nh];
                r.gather_h1(zone, input, &mut v);
                kernel(zone, &v, e);
            });
        }

        let local = self.l2_local.host();
        for zone in 0..r.num_zones() {
            r.scatter_l2(zone, &local[zone * nl..(zone + 1) * nl], l2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExecutionMode;
    use crate::linalg::dot;
    use crate::mesh::CartesianMesh;
    use crate::{AssemblyMode, BasisMapCache, HydroConfig, LagrangianHydroOperator};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// `<F x, y> == <x, F^T y>` for random global vectors on a moving, compressing state
    pub(super) fn assert_adjoint<M: MeshProvider>(mesh: M, assembly: AssemblyMode, seed: u64) {
        let rho0 = vec![1.0; mesh.num_l2_dofs()];
        let config = HydroConfig {
            assembly,
            execution: ExecutionMode::Serial,
            ..Default::default()
        };
        let mut hydro = LagrangianHydroOperator::new(mesh, &rho0, config, Arc::new(BasisMapCache::new())).unwrap();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut state = hydro.initial_state();
        let (_, v, e) = state.parts_mut();
        v.iter_mut().for_each(|v| *v = rng.gen_range(-0.2..0.2));
        e.iter_mut().for_each(|e| *e = rng.gen_range(0.5..1.5));
        // refreshes the quadrature data and the force operator
        let mut rate = state.zeros_like();
        hydro.mult(&state, &mut rate);

        let (h1_len, l2_len) = (state.x().len(), state.e().len());
        let x: Vec<f64> = (0..l2_len).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let y: Vec<f64> = (0..h1_len).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let force = hydro.force_operator();
        let qdata = hydro.quadrature_data();
        let mut fx = vec![0.0; h1_len];
        force.mult(qdata, &x, &mut fx);
        let mut fty = vec![0.0; l2_len];
        force.mult_transpose(qdata, &y, &mut fty);

        assert!(fx.iter().any(|f| f.abs() > 0.0));
        assert_relative_eq!(dot(&fx, &y), dot(&x, &fty), max_relative = 1e-12);
    }

    #[test]
    fn partial_assembly_is_adjoint() {
        assert_adjoint(CartesianMesh::unit_square(3, 2, 1).unwrap(), AssemblyMode::Partial, 11);
        let cube = CartesianMesh::new(&[2, 2, 2], &[0.0; 3], &[1.0; 3], 2, 1).unwrap();
        assert_adjoint(cube, AssemblyMode::Partial, 12);
    }

    #[test]
    fn full_assembly_is_adjoint_on_tensor_zones() {
        assert_adjoint(CartesianMesh::unit_square(3, 2, 1).unwrap(), AssemblyMode::Full, 13);
        let cube = CartesianMesh::new(&[2, 1, 2], &[0.0; 3], &[1.0, 0.5, 1.0], 1, 0).unwrap();
        assert_adjoint(cube, AssemblyMode::Full, 14);
    }

    #[test]
    fn gather_scatter_h1() {
        let mesh = CartesianMesh::unit_square(2, 1, 0).unwrap();
        let restriction = ElementRestriction::new(&mesh);
        assert_eq!(restriction.h1_size(), 2 * 9);
        assert_eq!(restriction.h1_per_zone(), 4);

        let global: Vec<f64> = (0..18).map(|i| i as f64).collect();
        let mut local = vec![0.0; 8];
        // zone 3 is the upper right zone: nodes 4, 5, 7, 8
        restriction.gather_h1(3, &global, &mut local);
        assert_eq!(local, vec![4.0, 5.0, 7.0, 8.0, 13.0, 14.0, 16.0, 17.0]);

        let mut counts = vec![0.0; 18];
        for zone in 0..4 {
            restriction.scatter_add_h1(zone, &[1.0; 8], &mut counts);
        }
        // the center node is shared by all four zones
        assert_eq!(counts[4], 4.0);
        assert_eq!(counts[9 + 4], 4.0);
        assert_eq!(counts[0], 1.0);
        assert_eq!(counts[1], 2.0);
    }

    #[test]
    fn gather_scatter_l2() {
        let mesh = CartesianMesh::unit_square(2, 2, 1).unwrap();
        let restriction = ElementRestriction::new(&mesh);
        assert_eq!(restriction.l2_size(), 16);

        let mut global = vec![0.0; 16];
        restriction.scatter_l2(2, &[1.0, 2.0, 3.0, 4.0], &mut global);
        let mut local = vec![0.0; 4];
        restriction.gather_l2(2, &global, &mut local);
        assert_eq!(local, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(global.iter().sum::<f64>(), 10.0);
    }
}
