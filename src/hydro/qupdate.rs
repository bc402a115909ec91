use super::{HydroState, QuadratureData};
use crate::backend::{Buffer, Engine, Residency};
use crate::discretization::{element_jacobians, invert, min_singular_value, BasisMap, Dim};
use crate::force::ElementRestriction;
use crate::material::{EquationOfState, GammaField};
use crate::tensor::TensorKernels;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::sync::Arc;

/// Kinematic and thermodynamic evaluation at the quadrature points of one zone
pub(crate) enum ZoneEvaluator {
    /// Sum factorization on 1D tables
    Tensor(TensorKernels),
    /// Full-layout tables of the H1 and L2 spaces
    Full {
        dim: Dim,
        h1: Arc<BasisMap>,
        l2: Arc<BasisMap>,
    },
}

impl ZoneEvaluator {
    fn dim(&self) -> Dim {
        match self {
            Self::Tensor(kernels) => kernels.dim(),
            Self::Full { dim, .. } => *dim,
        }
    }

    pub(crate) fn num_quad(&self) -> usize {
        match self {
            Self::Tensor(kernels) => kernels.num_quad(),
            Self::Full { h1, .. } => h1.num_quad,
        }
    }

    /// Reference gradient `[(q * dim + c) * dim + k]` of a zone-local H1 vector field
    fn vector_grad(&self, u: &[f64], out: &mut [f64]) {
        match self {
            Self::Tensor(kernels) => kernels.h1_vector_grad(u, out),
            Self::Full { dim, h1, .. } => {
                let (d, nh, nq) = (dim.size(), h1.num_trial_dofs, h1.num_quad);
                for q in 0..nq {
                    for c in 0..d {
                        let u_c = &u[c * nh..(c + 1) * nh];
                        for k in 0..d {
                            let g = &h1.dof_to_quad_d[(k * nq + q) * nh..(k * nq + q + 1) * nh];
                            out[(q * d + c) * d + k] = u_c.iter().zip(g).map(|(u, g)| u * g).sum();
                        }
                    }
                }
            }
        }
    }

    /// L2 field values at the quadrature points
    pub(crate) fn l2_values(&self, e: &[f64], out: &mut [f64]) {
        match self {
            Self::Tensor(kernels) => kernels.l2_values(e, out),
            Self::Full { l2, .. } => {
                let nl = l2.num_trial_dofs;
                for (q, out_q) in out[..l2.num_quad].iter_mut().enumerate() {
                    *out_q = e.iter().zip(&l2.dof_to_quad[q * nl..(q + 1) * nl]).map(|(e, b)| e * b).sum();
                }
            }
        }
    }

    /// Jacobians, inverse Jacobians and determinants from zone-local nodal positions
    pub(crate) fn jacobians(&self, x: &[f64], jac: &mut [f64], inv_jac: &mut [f64], det_j: &mut [f64]) {
        match self {
            Self::Tensor(kernels) => {
                let dd = kernels.dim().matrix_size();
                kernels.h1_vector_grad(x, jac);
                for q in 0..kernels.num_quad() {
                    det_j[q] = invert(kernels.dim(), &jac[q * dd..(q + 1) * dd], &mut inv_jac[q * dd..(q + 1) * dd]);
                }
            }
            Self::Full { dim, h1, .. } => element_jacobians(
                *dim,
                h1.num_trial_dofs,
                h1.num_quad,
                &h1.dof_to_quad_d,
                x,
                jac,
                inv_jac,
                det_j,
            ),
        }
    }
}

/// Summary of one batch of zones, handed to update observers
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchReport {
    pub batch: usize,
    pub first_zone: usize,
    pub num_zones: usize,
    /// Smallest Jacobian determinant over the points of the batch
    pub min_det_j: f64,
    /// Running time-step estimate after the batch
    pub dt_est: f64,
}

struct ZonePoints {
    jac: Vec<f64>,
    inv_jac: Vec<f64>,
    det_j: Vec<f64>,
    grad_v: Vec<f64>,
    e: Vec<f64>,
}

/// Device copies of the state vectors read by the zone kernels
struct StateBuffers {
    x: Buffer,
    v: Buffer,
    e: Buffer,
}

// kernel-side views of a StateBuffers
struct StateFields<'a> {
    x: &'a [f64],
    v: &'a [f64],
    e: &'a [f64],
}

/// Recomputes `stress_jinv_t` and the time-step estimate from a state
pub struct QuadratureUpdater {
    engine: Engine,
    evaluator: ZoneEvaluator,
    restriction: Arc<ElementRestriction>,
    eos: Arc<dyn EquationOfState>,
    gamma: GammaField,
    weights: Vec<f64>,
    h1_order: usize,
    cfl: f64,
    use_viscosity: bool,
    batch_size: usize,
    state: StateBuffers,
}

impl QuadratureUpdater {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine: Engine,
        evaluator: ZoneEvaluator,
        restriction: Arc<ElementRestriction>,
        eos: Arc<dyn EquationOfState>,
        gamma: GammaField,
        weights: Vec<f64>,
        h1_order: usize,
        cfl: f64,
        use_viscosity: bool,
        batch_size: usize,
    ) -> Self {
        assert_eq!(weights.len(), evaluator.num_quad(), "rule weights do not match the evaluator!");
        let state = StateBuffers {
            x: engine.alloc(restriction.h1_size(), Residency::Device),
            v: engine.alloc(restriction.h1_size(), Residency::Device),
            e: engine.alloc(restriction.l2_size(), Residency::Device),
        };
        Self {
            engine,
            evaluator,
            restriction,
            eos,
            gamma,
            weights,
            h1_order,
            cfl,
            use_viscosity,
            batch_size,
            state,
        }
    }

    pub(crate) fn evaluator(&self) -> &ZoneEvaluator {
        &self.evaluator
    }

    pub(crate) fn set_eos(&mut self, eos: Arc<dyn EquationOfState>) {
        self.eos = eos;
    }

    pub(crate) fn set_gamma(&mut self, gamma: GammaField) {
        self.gamma = gamma;
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        assert!(batch_size > 0, "batches must hold at least one zone!");
        self.batch_size = batch_size;
    }

    /// Recompute the quadrature data for `state`
    pub fn update(&self, state: &HydroState, qdata: &mut QuadratureData) {
        self.run(state, qdata, None)
    }

    /// Like [QuadratureUpdater::update], reporting every batch to `observer`
    pub fn update_observed(
        &self,
        state: &HydroState,
        qdata: &mut QuadratureData,
        observer: &mut dyn FnMut(&BatchReport),
    ) {
        self.run(state, qdata, Some(observer))
    }

    fn run(
        &self,
        state: &HydroState,
        qdata: &mut QuadratureData,
        mut observer: Option<&mut dyn FnMut(&BatchReport)>,
    ) {
        let num_zones = self.restriction.num_zones();
        assert_eq!(qdata.num_zones(), num_zones, "quadrature data belongs to another mesh!");
        assert_eq!(qdata.num_quad(), self.evaluator.num_quad());

        self.state.x.host_mut().copy_from_slice(state.x());
        self.state.v.host_mut().copy_from_slice(state.v());
        self.state.e.host_mut().copy_from_slice(state.e());
        let (x, v, e) = (
            self.engine.kernel_view(&self.state.x),
            self.engine.kernel_view(&self.state.v),
            self.engine.kernel_view(&self.state.e),
        );
        let fields = StateFields { x: &x, v: &v, e: &e };

        for (batch, first_zone) in (0..num_zones).step_by(self.batch_size).enumerate() {
            let last_zone = (first_zone + self.batch_size).min(num_zones);
            let (min_det_j, batch_dt) = self.update_batch(&fields, qdata, first_zone, last_zone);

            if !(min_det_j > 0.0) {
                log::warn!(
                    "inverted zone in batch {} (zones {}..{}, min detJ = {:e})",
                    batch,
                    first_zone,
                    last_zone,
                    min_det_j
                );
                qdata.collapse_time_step_estimate();
            } else {
                qdata.lower_time_step_estimate(batch_dt);
            }

            let report = BatchReport {
                batch,
                first_zone,
                num_zones: last_zone - first_zone,
                min_det_j,
                dt_est: qdata.dt_est(),
            };
            log::trace!("{:?}", report);
            if let Some(observer) = observer.as_deref_mut() {
                observer(&report);
            }
        }

        qdata.mark_fresh(state.generation());
    }

    // returns the smallest determinant and the smallest local time step of the batch
    fn update_batch(
        &self,
        fields: &StateFields,
        qdata: &QuadratureData,
        first_zone: usize,
        last_zone: usize,
    ) -> (f64, f64) {
        let nq = self.evaluator.num_quad();
        let dd = self.evaluator.dim().matrix_size();
        let num_points = (last_zone - first_zone) * nq;

        let points = self
            .engine
            .map_collect(last_zone - first_zone, |i| self.zone_points(fields, first_zone + i));
        // NaN determinants count as degenerate
        let min_det_j = points
            .iter()
            .flat_map(|zone| zone.det_j.iter())
            .fold(f64::INFINITY, |min, det| if det.is_nan() || *det < min { *det } else { min });

        let rho0_view = self.engine.kernel_view(qdata.rho0_det_j0_w());
        let jac0inv_view = self.engine.kernel_view(qdata.jac0inv());
        let rho0_det_j0_w = &rho0_view[first_zone * nq..last_zone * nq];
        let jac0inv: &[f64] = &jac0inv_view;

        let mut gamma = Vec::with_capacity(num_points);
        let mut rho = Vec::with_capacity(num_points);
        let mut e = Vec::with_capacity(num_points);
        for (i, zone) in points.iter().enumerate() {
            let gamma_z = self.gamma.value(first_zone + i);
            for q in 0..nq {
                gamma.push(gamma_z);
                rho.push(rho0_det_j0_w[i * nq + q] / (zone.det_j[q] * self.weights[q]));
                e.push(zone.e[q].max(0.0));
            }
        }

        let mut p = vec![0.0; num_points];
        let mut cs = vec![0.0; num_points];
        self.eos.evaluate(&gamma, &rho, &e, &mut p, &mut cs);

        let h0 = qdata.h0();
        let mut stress_view = self.engine.kernel_view_mut(qdata.stress_jinv_t());
        let stress = &mut stress_view[first_zone * nq * dd..last_zone * nq * dd];
        let batch_dt = self.engine.reduce_min_chunks_mut(stress, nq * dd, |i, zone_stress| {
            let zone = first_zone + i;
            let thermo = PointThermo {
                rho: &rho[i * nq..(i + 1) * nq],
                p: &p[i * nq..(i + 1) * nq],
                cs: &cs[i * nq..(i + 1) * nq],
            };
            let jac0inv = &jac0inv[zone * nq * dd..(zone + 1) * nq * dd];
            self.zone_stress(&points[i], &thermo, jac0inv, h0, zone_stress)
        });

        (min_det_j, batch_dt)
    }

    fn zone_points(&self, fields: &StateFields, zone: usize) -> ZonePoints {
        let r = self.restriction.as_ref();
        let dim = self.evaluator.dim();
        let (nq, dd) = (self.evaluator.num_quad(), dim.matrix_size());
        let nh = dim.size() * r.h1_per_zone();

        let mut x = vec![0.0; nh];
        let mut v = vec![0.0; nh];
        let mut e_loc = vec![0.0; r.l2_per_zone()];
        r.gather_h1(zone, fields.x, &mut x);
        r.gather_h1(zone, fields.v, &mut v);
        r.gather_l2(zone, fields.e, &mut e_loc);

        let mut points = ZonePoints {
            jac: vec![0.0; nq * dd],
            inv_jac: vec![0.0; nq * dd],
            det_j: vec![0.0; nq],
            grad_v: vec![0.0; nq * dd],
            e: vec![0.0; nq],
        };
        self.evaluator
            .jacobians(&x, &mut points.jac, &mut points.inv_jac, &mut points.det_j);
        self.evaluator.vector_grad(&v, &mut points.grad_v);
        self.evaluator.l2_values(&e_loc, &mut points.e);
        points
    }

    // writes stress * Jinv^T * w * detJ for every point of the zone; returns the zone's time step
    fn zone_stress(
        &self,
        points: &ZonePoints,
        thermo: &PointThermo,
        jac0inv: &[f64],
        h0: f64,
        out: &mut [f64],
    ) -> f64 {
        let dim = self.evaluator.dim();
        let d = dim.size();
        let dd = dim.matrix_size();
        let mut min_dt = f64::INFINITY;

        for (q, w) in self.weights.iter().enumerate() {
            let jac = &points.jac[q * dd..(q + 1) * dd];
            let inv_jac = &points.inv_jac[q * dd..(q + 1) * dd];
            let det_j = points.det_j[q];
            let (rho, p, cs) = (thermo.rho[q], thermo.p[q], thermo.cs[q]);

            let mut stress = [0.0; 9];
            for c in 0..d {
                stress[c * d + c] = -p;
            }

            let mut visc = 0.0;
            if self.use_viscosity {
                let sgrad_v = symmetric_velocity_gradient(d, &points.grad_v[q * dd..(q + 1) * dd], inv_jac);
                let (mu, dir) = compression_direction(d, &sgrad_v);

                // J * J0^-1 maps initial to current lengths
                let jac0inv_q = &jac0inv[q * dd..(q + 1) * dd];
                let mut ph_dir_sq = 0.0;
                for a in 0..d {
                    let mut ph_dir_a = 0.0;
                    for b in 0..d {
                        let jpi_ab: f64 = (0..d).map(|m| jac[a * d + m] * jac0inv_q[m * d + b]).sum();
                        ph_dir_a += jpi_ab * dir[b];
                    }
                    ph_dir_sq += ph_dir_a * ph_dir_a;
                }
                let h = h0 * ph_dir_sq.sqrt() / dir.norm();

                visc = 2.0 * rho * h * h * mu.abs();
                if mu < 0.0 {
                    visc += 0.5 * rho * h * cs;
                }
                for (s, g) in stress.iter_mut().zip(&sgrad_v) {
                    *s += visc * g;
                }
            }

            let h_min = min_singular_value(dim, jac) / self.h1_order as f64;
            let inv_dt = cs / h_min + 2.5 * visc / (rho * h_min * h_min);
            if inv_dt > 0.0 {
                min_dt = min_dt.min(self.cfl / inv_dt);
            }

            let out_q = &mut out[q * dd..(q + 1) * dd];
            for c in 0..d {
                for g in 0..d {
                    let s_jit: f64 = (0..d).map(|k| stress[c * d + k] * inv_jac[g * d + k]).sum();
                    out_q[c * d + g] = s_jit * w * det_j;
                }
            }
        }

        min_dt
    }
}

struct PointThermo<'a> {
    rho: &'a [f64],
    p: &'a [f64],
    cs: &'a [f64],
}

/// Symmetric part of the physical velocity gradient `grad_v_ref * Jinv`
fn symmetric_velocity_gradient(d: usize, grad_v_ref: &[f64], inv_jac: &[f64]) -> [f64; 9] {
    let mut grad_v = [0.0; 9];
    for c in 0..d {
        for k in 0..d {
            grad_v[c * d + k] = (0..d).map(|m| grad_v_ref[c * d + m] * inv_jac[m * d + k]).sum();
        }
    }

    let mut sym = [0.0; 9];
    for c in 0..d {
        for k in 0..d {
            sym[c * d + k] = 0.5 * (grad_v[c * d + k] + grad_v[k * d + c]);
        }
    }
    sym
}

/// Most negative eigenvalue of the symmetric strain rate and its eigenvector
///
/// Non-finite strain rates (inverted zones) give no compression.
fn compression_direction(d: usize, sgrad_v: &[f64; 9]) -> (f64, DVector<f64>) {
    let matrix = DMatrix::from_row_slice(d, d, &sgrad_v[..d * d]);
    let eigen = match SymmetricEigen::try_new(matrix, f64::EPSILON, 1000) {
        Some(eigen) if eigen.eigenvalues.iter().all(|l| l.is_finite()) => eigen,
        _ => return (0.0, DVector::from_element(d, 1.0)),
    };
    let (idx, mu) = eigen
        .eigenvalues
        .iter()
        .cloned()
        .enumerate()
        .fold((0, f64::INFINITY), |min, (i, val)| if val < min.1 { (i, val) } else { min });
    (mu, eigen.eigenvectors.column(idx).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn compression_is_most_negative_eigenpair() {
        let mut sgrad = [0.0; 9];
        sgrad[0] = 1.0;
        sgrad[4] = -3.0;
        sgrad[8] = 0.5;
        let (mu, dir) = compression_direction(3, &sgrad);
        assert_relative_eq!(mu, -3.0, epsilon = 1e-12);
        assert_relative_eq!(dir[1].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn strain_rate_is_symmetrized() {
        // pure rotation in reference coordinates on a stretched zone
        let grad_v_ref = [0.0, 1.0, -1.0, 0.0];
        let inv_jac = [2.0, 0.0, 0.0, 2.0];
        let sym = symmetric_velocity_gradient(2, &grad_v_ref, &inv_jac);
        assert_eq!(&sym[..4], &[0.0, 0.0, 0.0, 0.0]);

        let grad_v_ref = [1.0, 2.0, 0.0, 1.0];
        let sym = symmetric_velocity_gradient(2, &grad_v_ref, &inv_jac);
        assert_eq!(&sym[..4], &[2.0, 2.0, 2.0, 2.0]);
    }
}
