use crate::error::{HydroError, HydroResult};
use crate::hydro::{HydroState, LagrangianHydroOperator};
use crate::mesh::MeshProvider;

/// Two-stage, second order, strong stability preserving Runge-Kutta method (Heun)
#[derive(Debug, Default)]
pub struct Rk2Stepper {
    rate: Option<HydroState>,
}

impl Rk2Stepper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance `state` by `dt`
    pub fn step<M: MeshProvider>(&mut self, hydro: &mut LagrangianHydroOperator<M>, state: &mut HydroState, dt: f64) {
        let rate = self.rate.get_or_insert_with(|| state.zeros_like());

        hydro.mult(state, rate);
        let mut stage = state.clone();
        stage.add_scaled(dt, rate);

        hydro.mult(&stage, rate);
        stage.add_scaled(dt, rate);

        state.scale(0.5);
        state.add_scaled(0.5, &stage);
    }
}

/// Adaptive time stepping driven by the operator's stable time-step estimate
///
/// A step whose estimate falls below the step size is rejected: the state is restored and the
/// step retried with `dt * 0.85`. Steps whose estimate exceeds `1.25 * dt` grow the next step by
/// `2%`.
#[derive(Debug)]
pub struct TimeController {
    dt: f64,
    dt_floor: f64,
    time: f64,
    steps: usize,
    rejected: usize,
    stepper: Rk2Stepper,
}

const SHRINK: f64 = 0.85;
const GROW: f64 = 1.02;
const GROW_THRESHOLD: f64 = 1.25;

impl TimeController {
    pub fn new(dt: f64, dt_floor: f64) -> HydroResult<Self> {
        if !(dt_floor > 0.0) || !(dt > dt_floor) || !dt.is_finite() {
            return Err(HydroError::InvalidConfig(format!(
                "need 0 < dt_floor < dt, got dt = {}, dt_floor = {}",
                dt, dt_floor
            )));
        }
        Ok(Self {
            dt,
            dt_floor,
            time: 0.0,
            steps: 0,
            rejected: 0,
            stepper: Rk2Stepper::new(),
        })
    }

    /// Step size of the next step
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Accepted steps
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn rejected_steps(&self) -> usize {
        self.rejected
    }

    /// Take one accepted step, retrying as needed. Returns the size of the accepted step.
    pub fn advance<M: MeshProvider>(
        &mut self,
        hydro: &mut LagrangianHydroOperator<M>,
        state: &mut HydroState,
    ) -> HydroResult<f64> {
        loop {
            let saved = state.clone();
            let dt = self.dt;

            hydro.reset_time_step_estimate();
            self.stepper.step(hydro, state, dt);
            let dt_est = hydro.time_step_estimate(state);

            if !(dt_est >= dt) {
                self.dt *= SHRINK;
                self.rejected += 1;
                *state = saved;
                // shrinking stalls at the smallest subnormal
                if self.dt <= self.dt_floor || !(self.dt < dt) {
                    return Err(HydroError::TimeStepCollapse {
                        time: self.time,
                        floor: self.dt_floor,
                    });
                }
                log::info!(
                    "repeating step at t = {:e}: dt = {:e} exceeds the estimate {:e}, retrying with {:e}",
                    self.time,
                    dt,
                    dt_est,
                    self.dt
                );
                continue;
            }

            if dt_est > GROW_THRESHOLD * dt {
                self.dt *= GROW;
            }
            self.time += dt;
            self.steps += 1;
            log::debug!("step {}: t = {:e}, dt = {:e}, dt_est = {:e}", self.steps, self.time, dt, dt_est);
            return Ok(dt);
        }
    }

    /// Advance until `t_final`, shortening the last step to land on it
    pub fn run_until<M: MeshProvider>(
        &mut self,
        hydro: &mut LagrangianHydroOperator<M>,
        state: &mut HydroState,
        t_final: f64,
    ) -> HydroResult<()> {
        let tolerance = 1e-12 * t_final.abs().max(1.0);
        while t_final - self.time > tolerance {
            let remaining = t_final - self.time;
            let regular = self.dt;
            let last = remaining < self.dt;
            if last {
                self.dt = remaining;
            }

            let taken = self.advance(hydro, state)?;
            if last {
                if taken == remaining {
                    self.time = t_final;
                }
                // carry the shrink or growth of the shortened step over to the regular one
                self.dt = regular * (self.dt / remaining);
            }
        }
        log::info!("reached t = {:e} after {} steps ({} rejected)", self.time, self.steps, self.rejected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::CartesianMesh;
    use crate::{BasisMapCache, HydroConfig};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn sedov_like() -> (LagrangianHydroOperator<CartesianMesh>, HydroState) {
        let mesh = CartesianMesh::unit_square(4, 2, 1).unwrap().with_reflecting_walls();
        let rho0 = vec![1.0; mesh.num_l2_dofs()];
        let hydro = LagrangianHydroOperator::new(mesh, &rho0, HydroConfig::default(), Arc::new(BasisMapCache::new()))
            .unwrap();
        let mut state = hydro.initial_state();
        let e = state.e_mut();
        e.fill(1e-2);
        // hot corner zone
        e[..4].fill(5.0);
        (hydro, state)
    }

    #[test]
    fn oversized_steps_are_rejected() {
        let (mut hydro, mut state) = sedov_like();
        let mut controller = TimeController::new(1.0, 1e-8).unwrap();

        let dt = controller.advance(&mut hydro, &mut state).unwrap();
        assert!(controller.rejected_steps() > 0);
        assert!(dt < 1.0);
        assert_eq!(controller.steps(), 1);
        assert_relative_eq!(controller.time(), dt);
        assert!(state.e().iter().all(|e| e.is_finite()));
    }

    #[test]
    fn collapse_below_floor() {
        let (mut hydro, mut state) = sedov_like();
        let mut controller = TimeController::new(1.0, 0.9).unwrap();
        let initial = state.clone();

        assert!(matches!(
            controller.advance(&mut hydro, &mut state),
            Err(HydroError::TimeStepCollapse { .. })
        ));
        assert_eq!(state.x(), initial.x());
        assert_eq!(state.e(), initial.e());
    }

    #[test]
    fn small_steps_grow() {
        let (mut hydro, mut state) = sedov_like();
        let mut controller = TimeController::new(1e-5, 1e-9).unwrap();
        controller.advance(&mut hydro, &mut state).unwrap();
        assert_relative_eq!(controller.dt(), 1.02e-5);
    }

    #[test]
    fn run_lands_on_final_time() {
        let (mut hydro, mut state) = sedov_like();
        let mut controller = TimeController::new(1e-3, 1e-9).unwrap();
        controller.run_until(&mut hydro, &mut state, 5e-3).unwrap();
        assert_relative_eq!(controller.time(), 5e-3, max_relative = 1e-12);

        // the hot zone pushes mass out; nodes move, the mass measure does not
        let moved = state
            .x()
            .iter()
            .zip(hydro.initial_state().x())
            .any(|(x, x0)| (x - x0).abs() > 0.0);
        assert!(moved);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(TimeController::new(0.0, 0.0).is_err());
        assert!(TimeController::new(1e-3, 1e-2).is_err());
        assert!(TimeController::new(1e-3, 0.0).is_err());
        assert!(TimeController::new(f64::INFINITY, 1e-9).is_err());
    }

    #[test]
    fn folded_mesh_collapses_instead_of_spinning() {
        let mesh = CartesianMesh::unit_square(2, 1, 0).unwrap();
        let rho0 = vec![1.0; mesh.num_l2_dofs()];
        let mut hydro = LagrangianHydroOperator::new(mesh, &rho0, HydroConfig::default(), Arc::new(BasisMapCache::new()))
            .unwrap();
        let mut state = hydro.initial_state();
        state.e_mut().fill(1.0);
        // center node dragged outside of the box
        let x = state.x_mut();
        x[4] = -0.5;
        x[9 + 4] = -0.5;

        let mut controller = TimeController::new(1e-3, f64::MIN_POSITIVE).unwrap();
        assert!(matches!(
            controller.advance(&mut hydro, &mut state),
            Err(HydroError::TimeStepCollapse { .. })
        ));
        assert_eq!(controller.steps(), 0);
        assert!(controller.dt() <= f64::MIN_POSITIVE);
    }

    #[test]
    fn rejected_last_step_keeps_the_regular_step_size() {
        let (mut hydro, mut state) = sedov_like();
        let mut controller = TimeController::new(1.0, 1e-9).unwrap();

        // the shortened step 0.05 is unstable for the hot zone and gets repeated
        controller.run_until(&mut hydro, &mut state, 0.05).unwrap();
        assert_relative_eq!(controller.time(), 0.05, max_relative = 1e-12);
        assert!(controller.rejected_steps() > 0);
        assert!(controller.dt() > 0.1);
    }
}
