use crate::discretization::{BasisKind, Geometry};
use thiserror::Error;

pub type HydroResult<T> = Result<T, HydroError>;

/// Errors raised while configuring or driving the hydro operator
///
/// Every variant except [`HydroError::TimeStepCollapse`] is a configuration error: it is produced
/// during construction, before any state is touched. Numerical degeneracy of the mesh is not an
/// error; it is reported through a zero time-step estimate.
#[derive(Debug, Error)]
pub enum HydroError {
    #[error("Spatial dimension {0} is not supported; only 1, 2 or 3 dimensions can be used!")]
    UnsupportedDimension(usize),
    #[error("{geometry:?} zones have no tensor-product kernels; cannot use partial assembly!")]
    UnsupportedTensorPath { geometry: Geometry },
    #[error("Order {order} {kind:?} basis is not available on {geometry:?} zones!")]
    UnsupportedOrder {
        geometry: Geometry,
        kind: BasisKind,
        order: usize,
    },
    #[error("{what} has length {actual}, expected {expected}!")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Energy mass matrix of zone {0} is singular; cannot invert!")]
    SingularMassMatrix(usize),
    #[error("Time step fell below {floor:e} at t = {time}; cannot advance!")]
    TimeStepCollapse { time: f64, floor: f64 },
    #[error("Failed to start the accelerator queue: {0}")]
    Backend(String),
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Json(#[from] json::Error),
}
