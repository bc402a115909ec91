/// Velocity and energy mass matrices
pub mod mass;
/// Per quadrature point storage
pub mod quad_data;
/// Batched stress, viscosity and time-step update
pub mod qupdate;

pub use quad_data::{Freshness, QuadratureData};
pub use qupdate::{BatchReport, QuadratureUpdater};

use crate::backend::Engine;
use crate::config::{AssemblyMode, HydroConfig};
use crate::discretization::{
    hydro_rule_order, BasisKind, BasisMap, BasisMapCache, FiniteElement, IntegrationRule, MapLayout,
};
use crate::error::{HydroError, HydroResult};
use crate::force::{ElementRestriction, ForceOperator, FullAssemblyForce, PartialAssemblyForce};
use crate::linalg::{CgSolver, ConstrainedOperator, SparseMatrix};
use crate::material::{EnergySource, EquationOfState, GammaField, IdealGas};
use crate::mesh::MeshProvider;
use crate::tensor::TensorKernels;
#[cfg(feature = "json_export")]
use json::{object, JsonValue};
use nalgebra::{DMatrix, DVector};
use qupdate::ZoneEvaluator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Positions, velocity and specific internal energy
///
/// `x` and `v` are component-major H1 vectors, `e` is an L2 vector. Every mutable access gives
/// the state a new generation id, which marks derived quadrature data as out of date.
#[derive(Clone, Debug)]
pub struct HydroState {
    x: Vec<f64>,
    v: Vec<f64>,
    e: Vec<f64>,
    generation: u64,
}

impl HydroState {
    pub fn new(x: Vec<f64>, v: Vec<f64>, e: Vec<f64>) -> Self {
        assert_eq!(x.len(), v.len(), "positions and velocities live in the same space!");
        Self {
            x,
            v,
            e,
            generation: next_generation(),
        }
    }

    /// A state of the same shape filled with zeros
    pub fn zeros_like(&self) -> Self {
        Self::new(
            vec![0.0; self.x.len()],
            vec![0.0; self.v.len()],
            vec![0.0; self.e.len()],
        )
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn v(&self) -> &[f64] {
        &self.v
    }

    pub fn e(&self) -> &[f64] {
        &self.e
    }

    pub fn x_mut(&mut self) -> &mut [f64] {
        self.generation = next_generation();
        &mut self.x
    }

    pub fn v_mut(&mut self) -> &mut [f64] {
        self.generation = next_generation();
        &mut self.v
    }

    pub fn e_mut(&mut self) -> &mut [f64] {
        self.generation = next_generation();
        &mut self.e
    }

    /// Mutable access to `(x, v, e)` at once
    pub fn parts_mut(&mut self) -> (&mut [f64], &mut [f64], &mut [f64]) {
        self.generation = next_generation();
        (&mut self.x, &mut self.v, &mut self.e)
    }

    /// `self += alpha * other`
    pub fn add_scaled(&mut self, alpha: f64, other: &HydroState) {
        let (x, v, e) = self.parts_mut();
        for (dst, src) in [(x, other.x()), (v, other.v()), (e, other.e())] {
            dst.iter_mut().zip(src).for_each(|(d, s)| *d += alpha * s);
        }
    }

    pub fn scale(&mut self, alpha: f64) {
        let (x, v, e) = self.parts_mut();
        for part in [x, v, e] {
            part.iter_mut().for_each(|value| *value *= alpha);
        }
    }
}

/// Accumulated cost of the operator's phases
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimingData {
    pub force: Duration,
    pub cg_h1: Duration,
    pub cg_l2: Duration,
    pub quad_data: Duration,
    /// CG iterations summed over every velocity solve
    pub h1_cg_iterations: usize,
    /// L2 dofs times energy solves
    pub l2_dof_iterations: usize,
    /// Quadrature points processed by the update engine
    pub quad_tstep: usize,
    /// Force operator applications
    pub force_applications: usize,
}

/// Throughput derived from [TimingData], in millions per second
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimingSummary {
    /// H1 dofs times CG iterations
    pub cg_h1_rate: f64,
    /// L2 dofs times energy solves
    pub cg_l2_rate: f64,
    /// H1 dofs times force applications
    pub force_rate: f64,
    /// Quadrature points updated
    pub quad_data_rate: f64,
    pub total_seconds: f64,
}

fn rate(count: f64, time: Duration) -> f64 {
    let seconds = time.as_secs_f64();
    if seconds > 0.0 {
        1e-6 * count / seconds
    } else {
        0.0
    }
}

impl TimingData {
    pub fn summary(&self, num_h1_dofs: usize) -> TimingSummary {
        TimingSummary {
            cg_h1_rate: rate((num_h1_dofs * self.h1_cg_iterations) as f64, self.cg_h1),
            cg_l2_rate: rate(self.l2_dof_iterations as f64, self.cg_l2),
            force_rate: rate((num_h1_dofs * self.force_applications) as f64, self.force),
            quad_data_rate: rate(self.quad_tstep as f64, self.quad_data),
            total_seconds: (self.force + self.cg_h1 + self.cg_l2 + self.quad_data).as_secs_f64(),
        }
    }
}

#[cfg(feature = "json_export")]
impl From<&TimingSummary> for JsonValue {
    fn from(summary: &TimingSummary) -> Self {
        object! {
            "cg_h1_rate": summary.cg_h1_rate,
            "cg_l2_rate": summary.cg_l2_rate,
            "force_rate": summary.force_rate,
            "quad_data_rate": summary.quad_data_rate,
            "total_seconds": summary.total_seconds,
        }
    }
}

/// Right-hand side of the semi-discrete Lagrangian hydrodynamics equations
///
/// ```text
/// dx/dt = v
/// M_v dv/dt = -F 1
/// M_e de/dt = F^T v (+ source)
/// ```
///
/// The operator owns the quadrature data and refreshes it lazily: an update runs only when the
/// state's generation differs from the one the data were computed for.
pub struct LagrangianHydroOperator<M: MeshProvider> {
    mesh: M,
    config: HydroConfig,
    engine: Engine,
    cache: Arc<BasisMapCache>,
    restriction: Arc<ElementRestriction>,
    rule: IntegrationRule,
    h1_map: Arc<BasisMap>,
    l2_map: Arc<BasisMap>,
    qdata: QuadratureData,
    updater: QuadratureUpdater,
    force: Box<dyn ForceOperator>,
    velocity_mass: SparseMatrix,
    essential: Vec<Vec<usize>>,
    inverse_diagonal: Vec<Vec<f64>>,
    energy_mass_inv: Vec<DMatrix<f64>>,
    source: Option<Arc<dyn EnergySource>>,
    timing: TimingData,
}

impl<M: MeshProvider> LagrangianHydroOperator<M> {
    /// Build the operator for `mesh` with initial density `rho0` (an L2 vector)
    ///
    /// ```
    /// use lagrangian_hydro::mesh::{CartesianMesh, MeshProvider};
    /// use lagrangian_hydro::{BasisMapCache, HydroConfig, LagrangianHydroOperator};
    /// use std::sync::Arc;
    ///
    /// let mesh = CartesianMesh::unit_square(2, 2, 1).unwrap();
    /// let rho0 = vec![1.0; mesh.num_l2_dofs()];
    /// let cache = Arc::new(BasisMapCache::new());
    /// let mut hydro = LagrangianHydroOperator::new(mesh, &rho0, HydroConfig::default(), cache).unwrap();
    ///
    /// let mut state = hydro.initial_state();
    /// state.e_mut().fill(1.0);
    /// assert!(hydro.time_step_estimate(&state) > 0.0);
    /// ```
    pub fn new(mesh: M, rho0: &[f64], config: HydroConfig, cache: Arc<BasisMapCache>) -> HydroResult<Self> {
        config.validate()?;
        if rho0.len() != mesh.num_l2_dofs() {
            return Err(HydroError::SizeMismatch {
                what: "initial density",
                expected: mesh.num_l2_dofs(),
                actual: rho0.len(),
            });
        }

        let engine = Engine::new(config.execution)?;
        let geometry = mesh.geometry();
        let dim = mesh.dim();
        let h1_fe = FiniteElement::new(geometry, BasisKind::H1, mesh.h1_order())?;
        let l2_fe = FiniteElement::new(geometry, BasisKind::L2, mesh.l2_order())?;
        let rule = IntegrationRule::for_geometry(geometry, hydro_rule_order(mesh.h1_order(), mesh.l2_order()));
        let nq = rule.num_points();
        let restriction = Arc::new(ElementRestriction::new(&mesh));

        let h1_map = cache.for_space(&h1_fe, &rule, MapLayout::Full, true)?;
        let l2_map = cache.for_space(&l2_fe, &rule, MapLayout::Full, true)?;

        let (evaluator, force): (ZoneEvaluator, Box<dyn ForceOperator>) = match config.assembly {
            AssemblyMode::Partial => {
                if !geometry.is_tensor() {
                    return Err(HydroError::UnsupportedTensorPath { geometry });
                }
                let kernels = TensorKernels::new(
                    dim,
                    cache.for_space(&h1_fe, &rule, MapLayout::Tensor, true)?,
                    cache.for_space(&l2_fe, &rule, MapLayout::Tensor, true)?,
                )?;
                let force = PartialAssemblyForce::new(engine.clone(), kernels.clone(), Arc::clone(&restriction));
                (ZoneEvaluator::Tensor(kernels), Box::new(force))
            }
            AssemblyMode::Full => {
                let force_map = cache.for_spaces(&h1_fe, &l2_fe, &rule, MapLayout::Full, true)?;
                let force = FullAssemblyForce::new(engine.clone(), force_map, Arc::clone(&restriction));
                let evaluator = ZoneEvaluator::Full {
                    dim,
                    h1: Arc::clone(&h1_map),
                    l2: Arc::clone(&l2_map),
                };
                (evaluator, Box::new(force))
            }
        };

        // initial configuration
        let x0 = mesh.initial_positions();
        let dd = dim.matrix_size();
        let nh = dim.size() * restriction.h1_per_zone();
        let zones = engine.map_collect(mesh.num_zones(), |zone| {
            let mut x = vec![0.0; nh];
            restriction.gather_h1(zone, &x0, &mut x);
            let (mut jac, mut inv_jac, mut det_j) = (vec![0.0; nq * dd], vec![0.0; nq * dd], vec![0.0; nq]);
            evaluator.jacobians(&x, &mut jac, &mut inv_jac, &mut det_j);

            let mut rho = vec![0.0; restriction.l2_per_zone()];
            restriction.gather_l2(zone, rho0, &mut rho);
            let mut rho_q = vec![0.0; nq];
            evaluator.l2_values(&rho, &mut rho_q);
            let rho0w: Vec<f64> = (0..nq).map(|q| rho_q[q] * det_j[q] * rule.weights[q]).collect();
            let min_det = det_j.iter().cloned().fold(f64::INFINITY, f64::min);
            (inv_jac, rho0w, min_det)
        });

        if let Some(zone) = zones.iter().position(|(_, _, min_det)| *min_det <= 0.0) {
            return Err(HydroError::InvalidConfig(format!("zone {} of the initial mesh is inverted", zone)));
        }
        let mut jac0inv = Vec::with_capacity(mesh.num_zones() * nq * dd);
        let mut rho0_det_j0_w = Vec::with_capacity(mesh.num_zones() * nq);
        for (inv_jac, rho0w, _) in zones {
            jac0inv.extend(inv_jac);
            rho0_det_j0_w.extend(rho0w);
        }

        let total_volume: f64 = (0..mesh.num_zones()).map(|zone| mesh.zone_volume(zone)).sum();
        let h0 = geometry.characteristic_size(total_volume, mesh.num_zones()) / mesh.h1_order() as f64;

        let velocity_mass = mass::velocity_mass(&restriction, &h1_map, &rho0_det_j0_w);
        let energy_mass_inv = mass::energy_mass_inverses(&restriction, &l2_map, &rho0_det_j0_w)?;

        let n = mesh.num_h1_dofs();
        let mut essential = vec![Vec::new(); dim.size()];
        for dof in mesh.essential_velocity_dofs() {
            essential[dof / n].push(dof % n);
        }
        let diagonal = velocity_mass.diagonal();
        let inverse_diagonal = essential
            .iter()
            .map(|constrained| {
                let mut inv: Vec<f64> = diagonal.iter().map(|d| 1.0 / d).collect();
                constrained.iter().for_each(|dof| inv[*dof] = 1.0);
                inv
            })
            .collect();

        let updater = QuadratureUpdater::new(
            engine.clone(),
            evaluator,
            Arc::clone(&restriction),
            Arc::new(IdealGas),
            GammaField::Uniform(config.gamma),
            rule.weights.clone(),
            mesh.h1_order(),
            config.cfl,
            config.use_viscosity,
            config.batch_size,
        );
        let qdata = QuadratureData::new(&engine, dim, mesh.num_zones(), nq, jac0inv, rho0_det_j0_w, h0);

        log::debug!(
            "hydro operator: {:?} mesh with {} zones, {} points per zone, h0 = {:e}, {} assembly on the {} engine",
            geometry,
            mesh.num_zones(),
            nq,
            h0,
            config.assembly,
            engine.mode()
        );

        Ok(Self {
            mesh,
            config,
            engine,
            cache,
            restriction,
            rule,
            h1_map,
            l2_map,
            qdata,
            updater,
            force,
            velocity_mass,
            essential,
            inverse_diagonal,
            energy_mass_inv,
            source: None,
            timing: TimingData::default(),
        })
    }

    /// Replace the ideal gas equation of state
    pub fn with_material(mut self, eos: Arc<dyn EquationOfState>) -> Self {
        self.updater.set_eos(eos);
        self.qdata.invalidate();
        self
    }

    /// Replace the adiabatic index; a per-zone field needs one value per zone
    pub fn with_gamma(mut self, gamma: GammaField) -> HydroResult<Self> {
        if let GammaField::PerZone(values) = &gamma {
            if values.len() != self.mesh.num_zones() {
                return Err(HydroError::SizeMismatch {
                    what: "per-zone gamma",
                    expected: self.mesh.num_zones(),
                    actual: values.len(),
                });
            }
        }
        self.updater.set_gamma(gamma);
        self.qdata.invalidate();
        Ok(self)
    }

    /// Add a volumetric energy source to the energy equation
    pub fn with_energy_source(mut self, source: Arc<dyn EnergySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Zones per quadrature-data batch. Results do not depend on it.
    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.updater.set_batch_size(batch_size);
        self.config.batch_size = batch_size;
        self.qdata.invalidate();
    }

    /// Initial mesh positions with zero velocity and energy
    pub fn initial_state(&self) -> HydroState {
        let x = self.mesh.initial_positions();
        let v = vec![0.0; x.len()];
        HydroState::new(x, v, vec![0.0; self.mesh.num_l2_dofs()])
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn config(&self) -> &HydroConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn basis_cache(&self) -> &Arc<BasisMapCache> {
        &self.cache
    }

    pub fn quadrature_data(&self) -> &QuadratureData {
        &self.qdata
    }

    pub fn force_operator(&self) -> &dyn ForceOperator {
        self.force.as_ref()
    }

    /// Scalar velocity mass matrix
    pub fn velocity_mass(&self) -> &SparseMatrix {
        &self.velocity_mass
    }

    pub fn timing(&self) -> &TimingData {
        &self.timing
    }

    fn check_state(&self, state: &HydroState) {
        assert_eq!(state.x().len(), self.restriction.h1_size(), "state does not match the H1 space!");
        assert_eq!(state.e().len(), self.restriction.l2_size(), "state does not match the L2 space!");
    }

    /// Refresh the quadrature data for `state` unless it is already current
    pub fn update_quadrature_data(&mut self, state: &HydroState) {
        self.check_state(state);
        if self.qdata.is_fresh_for(state.generation()) {
            return;
        }
        let start = Instant::now();
        self.updater.update(state, &mut self.qdata);
        self.timing.quad_data += start.elapsed();
        self.timing.quad_tstep += self.qdata.num_zones() * self.qdata.num_quad();
    }

    /// Refresh the quadrature data, reporting every batch to `observer`. Always recomputes.
    pub fn update_quadrature_data_observed(&mut self, state: &HydroState, observer: &mut dyn FnMut(&BatchReport)) {
        self.check_state(state);
        let start = Instant::now();
        self.updater.update_observed(state, &mut self.qdata, observer);
        self.timing.quad_data += start.elapsed();
        self.timing.quad_tstep += self.qdata.num_zones() * self.qdata.num_quad();
    }

    /// Smallest stable time step since the last reset, including `state`
    pub fn time_step_estimate(&mut self, state: &HydroState) -> f64 {
        self.update_quadrature_data(state);
        self.qdata.dt_est()
    }

    pub fn reset_time_step_estimate(&mut self) {
        self.qdata.reset_time_step_estimate();
    }

    /// Evaluate the time derivative of `state` into `rate`
    pub fn mult(&mut self, state: &HydroState, rate: &mut HydroState) {
        self.update_quadrature_data(state);
        self.check_state(rate);

        let start = Instant::now();
        self.force.setup(&self.qdata);
        let ones = vec![1.0; self.restriction.l2_size()];
        let mut rhs = vec![0.0; self.restriction.h1_size()];
        self.force.mult(&self.qdata, &ones, &mut rhs);
        rhs.iter_mut().for_each(|r| *r = -*r);
        self.timing.force += start.elapsed();
        self.timing.force_applications += 1;

        let (dx, dv, de) = rate.parts_mut();
        dx.copy_from_slice(state.v());

        let start = Instant::now();
        let solver = CgSolver {
            rel_tol: self.config.cg_rel_tol,
            abs_tol: self.config.cg_abs_tol,
            max_iter: self.config.cg_max_iter,
        };
        let n = self.restriction.num_h1_dofs();
        for c in 0..self.restriction.dim() {
            let op = ConstrainedOperator::new(&self.velocity_mass, &self.essential[c]);
            let b = &mut rhs[c * n..(c + 1) * n];
            op.eliminate_rhs(b);
            let report = solver.solve(&op, Some(self.inverse_diagonal[c].as_slice()), b, &mut dv[c * n..(c + 1) * n]);
            self.timing.h1_cg_iterations += report.iterations;
        }
        self.timing.cg_h1 += start.elapsed();

        let start = Instant::now();
        let mut e_rhs = vec![0.0; self.restriction.l2_size()];
        self.force.mult_transpose(&self.qdata, state.v(), &mut e_rhs);
        self.timing.force += start.elapsed();
        self.timing.force_applications += 1;
        if let Some(source) = &self.source {
            self.add_energy_source(source.as_ref(), state, &mut e_rhs);
        }

        let start = Instant::now();
        let r = self.restriction.as_ref();
        let zone_rates = self.engine.map_collect(r.num_zones(), |zone| {
            let mut b = DVector::zeros(r.l2_per_zone());
            r.gather_l2(zone, &e_rhs, b.as_mut_slice());
            &self.energy_mass_inv[zone] * b
        });
        for (zone, de_z) in zone_rates.iter().enumerate() {
            r.scatter_l2(zone, de_z.as_slice(), de);
        }
        self.timing.cg_l2 += start.elapsed();
        self.timing.l2_dof_iterations += r.l2_size();
    }

    // e_rhs_j += sum_q s(x_q) psi_j(q) detJ(q) w_q on the current mesh
    fn add_energy_source(&self, source: &dyn EnergySource, state: &HydroState, e_rhs: &mut [f64]) {
        let r = self.restriction.as_ref();
        let (d, nh, nl, nq) = (r.dim(), r.h1_per_zone(), r.l2_per_zone(), self.rule.num_points());
        let dd = d * d;
        let evaluator = self.updater.evaluator();

        let zone_sources = self.engine.map_collect(r.num_zones(), |zone| {
            let mut x = vec![0.0; d * nh];
            r.gather_h1(zone, state.x(), &mut x);
            let (mut jac, mut inv_jac, mut det_j) = (vec![0.0; nq * dd], vec![0.0; nq * dd], vec![0.0; nq]);
            evaluator.jacobians(&x, &mut jac, &mut inv_jac, &mut det_j);

            let mut b = vec![0.0; nl];
            for q in 0..nq {
                let phi = &self.h1_map.dof_to_quad[q * nh..(q + 1) * nh];
                let mut point = [0.0; 3];
                for (c, p) in point.iter_mut().enumerate().take(d) {
                    *p = x[c * nh..(c + 1) * nh].iter().zip(phi).map(|(x, phi)| x * phi).sum();
                }
                let s = source.eval(&point) * det_j[q] * self.rule.weights[q];
                let psi = &self.l2_map.dof_to_quad[q * nl..(q + 1) * nl];
                b.iter_mut().zip(psi).for_each(|(b, psi)| *b += s * psi);
            }
            b
        });

        for (zone, b) in zone_sources.iter().enumerate() {
            for (value, dof) in b.iter().zip(r.l2_zone_dofs(zone)) {
                e_rhs[*dof] += value;
            }
        }
    }

    /// L2 projection of the current density `rho0DetJ0w / detJ` onto the energy space
    pub fn compute_density(&self, state: &HydroState) -> HydroResult<Vec<f64>> {
        self.check_state(state);
        let r = self.restriction.as_ref();
        let (d, nh, nq) = (r.dim(), r.h1_per_zone(), self.rule.num_points());
        let dd = d * d;
        let evaluator = self.updater.evaluator();
        let rho0_view = self.qdata.rho0_det_j0_w().host();
        let rho0_det_j0_w: &[f64] = &rho0_view;

        let zone_densities = self.engine.map_collect(r.num_zones(), |zone| {
            let mut x = vec![0.0; d * nh];
            r.gather_h1(zone, state.x(), &mut x);
            let (mut jac, mut inv_jac, mut det_j) = (vec![0.0; nq * dd], vec![0.0; nq * dd], vec![0.0; nq]);
            evaluator.jacobians(&x, &mut jac, &mut inv_jac, &mut det_j);

            let rho0w = &rho0_det_j0_w[zone * nq..(zone + 1) * nq];
            let volume_weights: Vec<f64> = det_j.iter().zip(&self.rule.weights).map(|(det, w)| det * w).collect();
            let mass = mass::local_mass(&self.l2_map, &volume_weights);
            let nl = self.l2_map.num_trial_dofs;
            let rhs = DVector::from_fn(nl, |j, _| {
                (0..nq).map(|q| rho0w[q] * self.l2_map.dof_to_quad[q * nl + j]).sum()
            });
            mass.cholesky().map(|cholesky| cholesky.solve(&rhs))
        });

        let mut rho = vec![0.0; r.l2_size()];
        for (zone, rho_z) in zone_densities.into_iter().enumerate() {
            let rho_z = rho_z.ok_or(HydroError::SingularMassMatrix(zone))?;
            r.scatter_l2(zone, rho_z.as_slice(), &mut rho);
        }
        Ok(rho)
    }

    /// Log the accumulated timing rates
    pub fn log_timing(&self) -> TimingSummary {
        let summary = self.timing.summary(self.restriction.h1_size());
        log::info!("CG (H1) rate (megadofs x cg_iterations / second): {:.4}", summary.cg_h1_rate);
        log::info!("CG (L2) rate (megadofs x cg_iterations / second): {:.4}", summary.cg_l2_rate);
        log::info!("Forces rate (megadofs x timesteps / second): {:.4}", summary.force_rate);
        log::info!("UpdateQuadData rate (megaquads x timesteps / second): {:.4}", summary.quad_data_rate);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExecutionMode;
    use crate::linalg::Operator;
    use crate::material::TaylorGreenSource;
    use crate::mesh::{CartesianMesh, SimplexMesh};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config(assembly: AssemblyMode, execution: ExecutionMode) -> HydroConfig {
        HydroConfig {
            assembly,
            execution,
            cg_rel_tol: 1e-12,
            ..Default::default()
        }
    }

    fn operator<M: MeshProvider>(mesh: M, rho0: f64, config: HydroConfig) -> LagrangianHydroOperator<M> {
        let rho0 = vec![rho0; mesh.num_l2_dofs()];
        LagrangianHydroOperator::new(mesh, &rho0, config, Arc::new(BasisMapCache::new())).unwrap()
    }

    // a smooth compressive velocity field and a positive energy
    fn perturbed_state<M: MeshProvider>(hydro: &LagrangianHydroOperator<M>, seed: u64) -> HydroState {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut state = hydro.initial_state();
        let d = hydro.mesh().dim().size();
        let n = hydro.mesh().num_h1_dofs();
        let (x, v, e) = state.parts_mut();
        for c in 0..d {
            for i in 0..n {
                let xc = x[c * n + i];
                v[c * n + i] = -(xc - 0.5) * (1.0 + 0.2 * xc) + 0.05 * (3.0 * x[i]).sin();
            }
        }
        e.iter_mut().for_each(|e| *e = 1.0 + rng.gen_range(0.0..0.5));
        state
    }

    #[test]
    fn single_zone_without_viscosity() {
        let mesh = CartesianMesh::unit_square(1, 1, 0).unwrap();
        let mut hydro = operator(
            mesh,
            1.0,
            HydroConfig {
                use_viscosity: false,
                execution: ExecutionMode::Serial,
                ..Default::default()
            },
        );
        assert_eq!(hydro.quadrature_data().num_quad(), 4);

        let mut state = hydro.initial_state();
        state.e_mut().fill(1.0);
        let dt = hydro.time_step_estimate(&state);

        let gamma: f64 = 5.0 / 3.0;
        let p = gamma - 1.0;
        let cs: f64 = (gamma * (gamma - 1.0)).sqrt();
        assert_relative_eq!(dt, 0.5 / cs, max_relative = 1e-14);

        let stress = hydro.quadrature_data().stress_jinv_t().to_vec();
        for q in 0..4 {
            let s = &stress[q * 4..(q + 1) * 4];
            assert_relative_eq!(s[0], -p * 0.25, max_relative = 1e-14);
            assert_relative_eq!(s[3], -p * 0.25, max_relative = 1e-14);
            assert!(s[1].abs() < 1e-16 && s[2].abs() < 1e-16);
        }
    }

    #[test]
    fn inverted_zone_collapses_time_step() {
        let mesh = CartesianMesh::unit_square(2, 1, 0).unwrap();
        let mut hydro = operator(mesh, 1.0, HydroConfig::default());
        let mut state = hydro.initial_state();
        state.e_mut().fill(1.0);
        assert!(hydro.time_step_estimate(&state) > 0.0);

        // drag the center node outside of the box
        let x = state.x_mut();
        x[4] = -0.5;
        x[9 + 4] = -0.5;
        hydro.reset_time_step_estimate();
        assert_eq!(hydro.time_step_estimate(&state), 0.0);
    }

    #[test]
    fn batch_size_does_not_change_results() {
        let mesh = CartesianMesh::unit_square(3, 2, 1).unwrap();
        let mut hydro = operator(mesh, 1.0, HydroConfig::default());
        let state = perturbed_state(&hydro, 3);

        let mut results = Vec::new();
        for batch_size in [1, 3, 4, 100] {
            hydro.set_batch_size(batch_size);
            hydro.reset_time_step_estimate();
            let dt = hydro.time_step_estimate(&state);
            results.push((dt, hydro.quadrature_data().stress_jinv_t().to_vec()));
        }
        for result in &results[1..] {
            assert_eq!(result.0, results[0].0);
            assert_eq!(result.1, results[0].1);
        }
    }

    #[test]
    fn time_step_estimate_decreases_across_batches() {
        let mesh = CartesianMesh::unit_square(4, 2, 1).unwrap();
        let mut hydro = operator(mesh, 1.0, HydroConfig::default());
        let state = perturbed_state(&hydro, 5);

        let mut reports = Vec::new();
        hydro.update_quadrature_data_observed(&state, &mut |report: &BatchReport| reports.push(*report));
        assert_eq!(reports.len(), 6);
        assert_eq!(reports.iter().map(|r| r.num_zones).sum::<usize>(), 16);
        for pair in reports.windows(2) {
            assert!(pair[1].dt_est <= pair[0].dt_est);
        }
        assert_eq!(reports[5].dt_est, hydro.quadrature_data().dt_est());
        assert!(hydro.quadrature_data().is_fresh_for(state.generation()));
    }

    #[test]
    fn mass_is_conserved() {
        let mesh = CartesianMesh::new(&[3, 2], &[0.0, 0.0], &[1.5, 1.0], 2, 0).unwrap();
        let rho0: Vec<f64> = (0..6).map(|z| 1.0 + z as f64).collect();
        let mut hydro =
            LagrangianHydroOperator::new(mesh, &rho0, HydroConfig::default(), Arc::new(BasisMapCache::new())).unwrap();

        let nq = hydro.quadrature_data().num_quad();
        let before = hydro.quadrature_data().rho0_det_j0_w().to_vec();
        for zone in 0..6 {
            let zone_mass: f64 = before[zone * nq..(zone + 1) * nq].iter().sum();
            assert_relative_eq!(zone_mass / hydro.mesh().zone_volume(zone), rho0[zone], max_relative = 1e-13);
        }

        let state = perturbed_state(&hydro, 9);
        let mut rate = state.zeros_like();
        hydro.mult(&state, &mut rate);
        let mut moved = state.clone();
        moved.add_scaled(0.01, &rate);
        hydro.update_quadrature_data(&moved);
        assert_eq!(hydro.quadrature_data().rho0_det_j0_w().to_vec(), before);
    }

    #[test]
    fn partial_and_full_assembly_agree() {
        for mesh in [
            CartesianMesh::unit_square(2, 2, 1).unwrap(),
            CartesianMesh::unit_cube(1, 2, 1).unwrap(),
        ] {
            let mut pa = operator(mesh.clone(), 1.0, config(AssemblyMode::Partial, ExecutionMode::Serial));
            let mut fa = operator(mesh, 1.0, config(AssemblyMode::Full, ExecutionMode::Serial));
            let state = perturbed_state(&pa, 1);

            let (mut rate_pa, mut rate_fa) = (state.zeros_like(), state.zeros_like());
            pa.mult(&state, &mut rate_pa);
            fa.mult(&state, &mut rate_fa);

            assert_relative_eq!(pa.time_step_estimate(&state), fa.time_step_estimate(&state), max_relative = 1e-12);
            for (a, b) in rate_pa.v().iter().zip(rate_fa.v()) {
                assert_relative_eq!(a, b, epsilon = 1e-9);
            }
            for (a, b) in rate_pa.e().iter().zip(rate_fa.e()) {
                assert_relative_eq!(a, b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn gas_at_rest_stays_at_rest() {
        let mesh = CartesianMesh::unit_square(3, 2, 1).unwrap().with_reflecting_walls();
        let mut hydro = operator(mesh, 1.0, HydroConfig::default());
        let mut state = hydro.initial_state();
        state.e_mut().fill(2.0);

        let mut rate = state.zeros_like();
        hydro.mult(&state, &mut rate);
        assert!(rate.v().iter().all(|dv| dv.abs() < 1e-10));
        assert!(rate.e().iter().all(|de| de.abs() < 1e-12));
        assert_eq!(rate.x(), state.v());
    }

    #[test]
    fn total_energy_is_conserved() {
        let mesh = CartesianMesh::unit_square(2, 2, 1).unwrap();
        let mut hydro = operator(mesh, 1.0, config(AssemblyMode::Partial, ExecutionMode::Parallel));
        let state = perturbed_state(&hydro, 2);

        let mut rate = state.zeros_like();
        hydro.mult(&state, &mut rate);

        let n = hydro.mesh().num_h1_dofs();
        let mut kinetic = 0.0;
        for c in 0..2 {
            let mut m_dv = vec![0.0; n];
            hydro.velocity_mass().mult(&rate.v()[c * n..(c + 1) * n], &mut m_dv);
            kinetic += crate::linalg::dot(&state.v()[c * n..(c + 1) * n], &m_dv);
        }
        let mut e_rhs = vec![0.0; hydro.mesh().num_l2_dofs()];
        hydro
            .force_operator()
            .mult_transpose(hydro.quadrature_data(), state.v(), &mut e_rhs);
        let internal: f64 = e_rhs.iter().sum();

        assert!(kinetic.abs() > 1e-3);
        assert_relative_eq!(kinetic + internal, 0.0, epsilon = 1e-8 * kinetic.abs());
    }

    #[test]
    fn accelerator_matches_serial() {
        let mesh = CartesianMesh::unit_square(3, 2, 1).unwrap();
        let mut serial = operator(mesh.clone(), 1.0, config(AssemblyMode::Partial, ExecutionMode::Serial));
        let mut device = operator(mesh, 1.0, config(AssemblyMode::Partial, ExecutionMode::Accelerator));
        let state = perturbed_state(&serial, 4);

        let (mut rate_s, mut rate_d) = (state.zeros_like(), state.zeros_like());
        serial.mult(&state, &mut rate_s);
        device.mult(&state, &mut rate_d);

        assert_eq!(serial.time_step_estimate(&state), device.time_step_estimate(&state));
        for (a, b) in rate_s.v().iter().zip(rate_d.v()) {
            assert_relative_eq!(a, b, epsilon = 1e-14);
        }
        assert_eq!(
            serial.quadrature_data().stress_jinv_t().to_vec(),
            device.quadrature_data().stress_jinv_t().to_vec()
        );

        assert_eq!(serial.engine().transfer_stats().transfers, 0);
        let stats = device.engine().transfer_stats();
        assert!(stats.host_to_device_bytes > 0);
        assert!(stats.device_to_host_bytes > 0);

        // a new state is pushed to the device, force inputs follow it and zone-local force
        // results come back
        let mut moved = state.clone();
        moved.v_mut()[0] += 1e-3;
        let before = device.engine().transfer_stats();
        device.mult(&moved, &mut rate_d);
        let after = device.engine().transfer_stats();

        let mesh = device.mesh();
        let (h1, l2, zones) = (2 * mesh.num_h1_dofs(), mesh.num_l2_dofs(), mesh.num_zones());
        let h1_local = zones * 2 * mesh.h1_zone_dofs(0).len();
        let bytes = std::mem::size_of::<f64>();
        // x, v, e for the update; ones for F; v for F^T
        assert_eq!(
            after.host_to_device_bytes - before.host_to_device_bytes,
            (2 * h1 + l2 + l2 + h1) * bytes
        );
        assert_eq!(after.device_to_host_bytes - before.device_to_host_bytes, (h1_local + l2) * bytes);
        assert_eq!(after.transfers - before.transfers, 7);
    }

    #[test]
    fn simplex_and_segment_meshes_use_full_assembly() {
        let serial_fa = config(AssemblyMode::Full, ExecutionMode::Serial);

        let triangles = SimplexMesh::new(&[2, 2], &[1.0, 1.0], 1).unwrap();
        let mut hydro = operator(triangles, 2.0, serial_fa.clone());
        let state = perturbed_state(&hydro, 6);
        let mut rate = state.zeros_like();
        hydro.mult(&state, &mut rate);
        assert!(hydro.time_step_estimate(&state) > 0.0);
        assert!(rate.v().iter().any(|dv| dv.abs() > 0.0));

        let tets = SimplexMesh::new(&[1, 1, 1], &[1.0, 1.0, 1.0], 0).unwrap();
        let mut hydro = operator(tets, 1.0, serial_fa.clone());
        let state = perturbed_state(&hydro, 7);
        assert!(hydro.time_step_estimate(&state) > 0.0);

        let segments = CartesianMesh::new(&[4], &[0.0], &[1.0], 2, 1).unwrap();
        let mut hydro = operator(segments, 1.0, serial_fa);
        let state = perturbed_state(&hydro, 8);
        let mut rate = state.zeros_like();
        hydro.mult(&state, &mut rate);
        assert!(hydro.time_step_estimate(&state) > 0.0);
    }

    #[test]
    fn partial_assembly_needs_tensor_zones() {
        let pa = config(AssemblyMode::Partial, ExecutionMode::Serial);
        let cache = Arc::new(BasisMapCache::new());

        let triangles = SimplexMesh::new(&[1, 1], &[1.0, 1.0], 0).unwrap();
        let rho0 = vec![1.0; triangles.num_l2_dofs()];
        assert!(matches!(
            LagrangianHydroOperator::new(triangles, &rho0, pa.clone(), Arc::clone(&cache)),
            Err(HydroError::UnsupportedTensorPath {
                geometry: crate::discretization::Geometry::Triangle
            })
        ));

        let segments = CartesianMesh::new(&[2], &[0.0], &[1.0], 1, 0).unwrap();
        let rho0 = vec![1.0; segments.num_l2_dofs()];
        assert!(matches!(
            LagrangianHydroOperator::new(segments, &rho0, pa, cache),
            Err(HydroError::UnsupportedTensorPath { .. })
        ));
    }

    #[test]
    fn quadrature_data_is_updated_lazily() {
        let mesh = CartesianMesh::unit_square(2, 1, 0).unwrap();
        let mut hydro = operator(mesh, 1.0, HydroConfig::default());
        let mut state = hydro.initial_state();
        state.e_mut().fill(1.0);
        let mut rate = state.zeros_like();

        hydro.mult(&state, &mut rate);
        let updates = hydro.timing().quad_tstep;
        hydro.mult(&state, &mut rate);
        assert_eq!(hydro.timing().quad_tstep, updates);

        state.e_mut()[0] = 2.0;
        hydro.mult(&state, &mut rate);
        assert_eq!(hydro.timing().quad_tstep, 2 * updates);

        hydro.reset_time_step_estimate();
        assert_eq!(hydro.quadrature_data().freshness(), Freshness::Stale);
        assert!(hydro.time_step_estimate(&state).is_finite());
        assert!(hydro.log_timing().total_seconds >= 0.0);
    }

    #[test]
    fn density_follows_the_mesh() {
        let mesh = CartesianMesh::unit_square(2, 2, 1).unwrap();
        let hydro = operator(mesh, 2.0, HydroConfig::default());
        let mut state = hydro.initial_state();

        for rho in hydro.compute_density(&state).unwrap() {
            assert_relative_eq!(rho, 2.0, max_relative = 1e-12);
        }

        state.x_mut().iter_mut().for_each(|x| *x *= 2.0);
        for rho in hydro.compute_density(&state).unwrap() {
            assert_relative_eq!(rho, 0.5, max_relative = 1e-12);
        }
    }

    #[test]
    fn energy_source_heats_a_gas_at_rest() {
        let mesh = CartesianMesh::unit_square(2, 2, 1).unwrap();
        let mut hydro = operator(mesh, 1.0, HydroConfig::default()).with_energy_source(Arc::new(TaylorGreenSource));
        let mut state = hydro.initial_state();
        state.e_mut().fill(1.0);

        let mut rate = state.zeros_like();
        hydro.mult(&state, &mut rate);
        assert!(rate.e().iter().any(|de| de.abs() > 1e-3));
    }

    #[test]
    fn per_zone_gamma_is_checked_and_used() {
        let mesh = CartesianMesh::unit_square(2, 1, 0).unwrap();
        let hydro = operator(mesh.clone(), 1.0, config(AssemblyMode::Partial, ExecutionMode::Serial));
        assert!(matches!(
            hydro.with_gamma(GammaField::PerZone(vec![1.4; 3])),
            Err(HydroError::SizeMismatch { expected: 4, actual: 3, .. })
        ));

        let mut uniform = operator(mesh.clone(), 1.0, config(AssemblyMode::Partial, ExecutionMode::Serial))
            .with_gamma(GammaField::Uniform(1.4))
            .unwrap();
        let mut per_zone = operator(mesh, 1.0, config(AssemblyMode::Partial, ExecutionMode::Serial))
            .with_gamma(GammaField::PerZone(vec![1.4; 4]))
            .unwrap();
        let mut state = uniform.initial_state();
        state.e_mut().fill(1.0);
        assert_eq!(uniform.time_step_estimate(&state), per_zone.time_step_estimate(&state));
    }

    #[test]
    fn rejects_mismatched_density() {
        let mesh = CartesianMesh::unit_square(2, 1, 0).unwrap();
        assert!(matches!(
            LagrangianHydroOperator::new(mesh, &[1.0], HydroConfig::default(), Arc::new(BasisMapCache::new())),
            Err(HydroError::SizeMismatch { expected: 4, actual: 1, .. })
        ));
    }
}
