use std::f64::consts::PI;

/// Batched equation of state: pressure and sound speed from `(gamma, rho, e)`
///
/// Implementations are pure and are called once per batch of zones with all point values of the
/// batch packed together.
pub trait EquationOfState: Send + Sync {
    fn evaluate(&self, gamma: &[f64], rho: &[f64], e: &[f64], p: &mut [f64], cs: &mut [f64]);
}

/// Gamma-law gas
#[derive(Clone, Copy, Debug, Default)]
pub struct IdealGas;

impl EquationOfState for IdealGas {
    fn evaluate(&self, gamma: &[f64], rho: &[f64], e: &[f64], p: &mut [f64], cs: &mut [f64]) {
        for i in 0..p.len() {
            p[i] = (gamma[i] - 1.0) * rho[i] * e[i];
            cs[i] = (gamma[i] * (gamma[i] - 1.0) * e[i]).sqrt();
        }
    }
}

/// Adiabatic index of the material in each zone
#[derive(Clone, Debug, PartialEq)]
pub enum GammaField {
    Uniform(f64),
    PerZone(Vec<f64>),
}

impl GammaField {
    pub fn value(&self, zone: usize) -> f64 {
        match self {
            Self::Uniform(gamma) => *gamma,
            Self::PerZone(gammas) => gammas[zone],
        }
    }
}

impl Default for GammaField {
    fn default() -> Self {
        Self::Uniform(5.0 / 3.0)
    }
}

/// Volumetric source of specific internal energy
pub trait EnergySource: Send + Sync {
    /// Source density at physical point `x`
    fn eval(&self, x: &[f64; 3]) -> f64;
}

/// Energy source that keeps the 2D Taylor-Green vortex in steady state
#[derive(Clone, Copy, Debug, Default)]
pub struct TaylorGreenSource;

impl EnergySource for TaylorGreenSource {
    fn eval(&self, x: &[f64; 3]) -> f64 {
        3.0 / 8.0
            * PI
            * ((3.0 * PI * x[0]).cos() * (PI * x[1]).cos() - (PI * x[0]).cos() * (3.0 * PI * x[1]).cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ideal_gas_state() {
        let gamma = [5.0 / 3.0, 1.4];
        let (mut p, mut cs) = ([0.0; 2], [0.0; 2]);
        IdealGas.evaluate(&gamma, &[1.0, 2.0], &[1.0, 0.5], &mut p, &mut cs);

        assert_relative_eq!(p[0], 2.0 / 3.0, epsilon = 1e-15);
        assert_relative_eq!(cs[0], (10.0_f64 / 9.0).sqrt(), epsilon = 1e-15);
        assert_relative_eq!(p[1], 0.4, epsilon = 1e-15);
    }

    #[test]
    fn taylor_green_source_vanishes_on_diagonal() {
        assert_relative_eq!(TaylorGreenSource.eval(&[0.3, 0.3, 0.0]), 0.0, epsilon = 1e-15);
        assert!(TaylorGreenSource.eval(&[0.0, 0.25, 0.0]) > 0.0);
    }

    #[test]
    fn gamma_lookup() {
        assert_relative_eq!(GammaField::default().value(12), 5.0 / 3.0);
        assert_eq!(GammaField::PerZone(vec![1.4, 2.0]).value(1), 2.0);
    }
}
