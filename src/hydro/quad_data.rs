use crate::backend::{Buffer, Engine, Residency};
use crate::discretization::Dim;

/// Whether the stored stress values describe a given state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Stale,
    /// Computed from the state with this generation id
    Fresh { generation: u64 },
}

/// Per (zone, quadrature point) data of the hydro operator
///
/// Points are numbered `zone * num_quad + q`. Matrix valued entries are stored row-major in
/// blocks of `dim * dim`; the stress block of a point is `[component][reference direction]`.
///
/// `jac0inv`, `rho0_det_j0_w` and `h0` describe the initial configuration and never change
/// after construction. `stress_jinv_t` and `dt_est` are rewritten by the update engine.
#[derive(Debug)]
pub struct QuadratureData {
    dim: Dim,
    num_zones: usize,
    num_quad: usize,
    jac0inv: Buffer,
    rho0_det_j0_w: Buffer,
    stress_jinv_t: Buffer,
    h0: f64,
    dt_est: f64,
    freshness: Freshness,
}

impl QuadratureData {
    /// Allocate the store; the initial-configuration entries are filled by the caller
    pub(crate) fn new(
        engine: &Engine,
        dim: Dim,
        num_zones: usize,
        num_quad: usize,
        jac0inv: Vec<f64>,
        rho0_det_j0_w: Vec<f64>,
        h0: f64,
    ) -> Self {
        let num_points = num_zones * num_quad;
        let dd = dim.matrix_size();
        assert_eq!(jac0inv.len(), num_points * dd, "jac0inv has the wrong size!");
        assert_eq!(rho0_det_j0_w.len(), num_points, "rho0DetJ0w has the wrong size!");

        Self {
            dim,
            num_zones,
            num_quad,
            jac0inv: engine.alloc_from(jac0inv, Residency::Device),
            rho0_det_j0_w: engine.alloc_from(rho0_det_j0_w, Residency::Device),
            stress_jinv_t: engine.alloc(num_points * dd, Residency::Device),
            h0,
            dt_est: f64::INFINITY,
            freshness: Freshness::Stale,
        }
    }

    pub fn dim(&self) -> Dim {
        self.dim
    }

    pub fn num_zones(&self) -> usize {
        self.num_zones
    }

    /// Quadrature points per zone
    pub fn num_quad(&self) -> usize {
        self.num_quad
    }

    /// Inverse of the initial Jacobian at every point
    pub fn jac0inv(&self) -> &Buffer {
        &self.jac0inv
    }

    /// Initial density times initial Jacobian determinant times quadrature weight
    pub fn rho0_det_j0_w(&self) -> &Buffer {
        &self.rho0_det_j0_w
    }

    /// Stress times the transposed inverse Jacobian, weighted by `detJ * w`
    pub fn stress_jinv_t(&self) -> &Buffer {
        &self.stress_jinv_t
    }

    /// Initial characteristic zone size divided by the H1 order
    pub fn h0(&self) -> f64 {
        self.h0
    }

    /// Smallest stable time step seen since the last reset
    pub fn dt_est(&self) -> f64 {
        self.dt_est
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn is_fresh_for(&self, generation: u64) -> bool {
        self.freshness == Freshness::Fresh { generation }
    }

    /// Force the next update to recompute everything
    pub fn invalidate(&mut self) {
        self.freshness = Freshness::Stale;
    }

    /// Start a new running minimum. Also invalidates the store, so the next update recomputes
    /// the estimate even when the state did not change.
    pub fn reset_time_step_estimate(&mut self) {
        self.dt_est = f64::INFINITY;
        self.invalidate();
    }

    pub(crate) fn lower_time_step_estimate(&mut self, dt: f64) {
        self.dt_est = self.dt_est.min(dt);
    }

    pub(crate) fn collapse_time_step_estimate(&mut self) {
        self.dt_est = 0.0;
    }

    pub(crate) fn mark_fresh(&mut self, generation: u64) {
        self.freshness = Freshness::Fresh { generation };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> QuadratureData {
        QuadratureData::new(&Engine::serial(), Dim::Two, 2, 4, vec![0.0; 32], vec![0.25; 8], 0.5)
    }

    #[test]
    fn freshness_state_machine() {
        let mut qd = store();
        assert_eq!(qd.freshness(), Freshness::Stale);

        qd.mark_fresh(7);
        assert!(qd.is_fresh_for(7));
        assert!(!qd.is_fresh_for(8));

        qd.invalidate();
        assert!(!qd.is_fresh_for(7));

        qd.mark_fresh(9);
        qd.reset_time_step_estimate();
        assert_eq!(qd.freshness(), Freshness::Stale);
    }

    #[test]
    fn running_minimum() {
        let mut qd = store();
        assert_eq!(qd.dt_est(), f64::INFINITY);

        qd.lower_time_step_estimate(0.3);
        qd.lower_time_step_estimate(0.5);
        assert_eq!(qd.dt_est(), 0.3);

        qd.collapse_time_step_estimate();
        qd.lower_time_step_estimate(0.1);
        assert_eq!(qd.dt_est(), 0.0);

        qd.reset_time_step_estimate();
        assert_eq!(qd.dt_est(), f64::INFINITY);
    }

    #[test]
    fn buffer_sizes() {
        let qd = store();
        assert_eq!(qd.stress_jinv_t().len(), 2 * 4 * 4);
        assert_eq!(qd.rho0_det_j0_w().len(), 8);
        assert_eq!(qd.h0(), 0.5);
    }
}
