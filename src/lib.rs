//! High-order Lagrangian hydrodynamics: the force core of a staggered finite element scheme
//!
//! Kinematic quantities (positions, velocities) live in a continuous H1 space, thermodynamic
//! quantities (specific internal energy) in a discontinuous L2 space. The [LagrangianHydroOperator]
//! evaluates the semi-discrete rates `(dx, dv, de)` of a [HydroState]:
//!
//! * per-point stress, artificial viscosity and a stable time-step estimate are stored in
//!   [QuadratureData] and refreshed lazily whenever the state changes
//! * the force operator `F` is applied either matrix-free with sum factorization
//!   ([AssemblyMode::Partial]) or from dense per-zone matrices ([AssemblyMode::Full])
//! * basis evaluations at quadrature points are shared through a [BasisMapCache]
//!
//! The [TimeController] advances a state with a second order Runge-Kutta method, repeating
//! steps that violate the time-step estimate.
//!
//! ```
//! use std::sync::Arc;
//! use lagrangian_hydro::mesh::{CartesianMesh, MeshProvider};
//! use lagrangian_hydro::{BasisMapCache, HydroConfig, LagrangianHydroOperator, TimeController};
//!
//! let mesh = CartesianMesh::unit_square(2, 2, 1).unwrap().with_reflecting_walls();
//! let rho0 = vec![1.0; mesh.num_l2_dofs()];
//! let mut hydro =
//!     LagrangianHydroOperator::new(mesh, &rho0, HydroConfig::default(), Arc::new(BasisMapCache::new())).unwrap();
//!
//! let mut state = hydro.initial_state();
//! state.e_mut().fill(1.0);
//!
//! let mut controller = TimeController::new(1e-3, 1e-9).unwrap();
//! controller.run_until(&mut hydro, &mut state, 5e-3).unwrap();
//! assert!((controller.time() - 5e-3).abs() < 1e-12);
//! ```

/// Execution engines and device-mirrored buffers
pub mod backend;
/// Operator options
pub mod config;
/// Reference geometries, quadrature rules and basis maps
pub mod discretization;
pub mod error;
/// Force operators and the zone restriction they share
pub mod force;
/// The Lagrangian hydrodynamics operator and its quadrature data
pub mod hydro;
/// Sparse matrices and the conjugate gradient solver
pub mod linalg;
/// Equations of state and energy sources
pub mod material;
/// Meshes providing zone geometry and dof numbering
pub mod mesh;
/// Sum-factorized kernels for quadrilateral and hexahedral zones
pub mod tensor;
pub mod time_integration;

pub use backend::{Engine, ExecutionMode};
pub use config::{AssemblyMode, HydroConfig};
pub use discretization::{BasisMap, BasisMapCache, Geometry};
pub use error::{HydroError, HydroResult};
pub use force::ForceOperator;
pub use hydro::{HydroState, LagrangianHydroOperator, QuadratureData, TimingSummary};
pub use material::{EquationOfState, IdealGas};
pub use time_integration::{Rk2Stepper, TimeController};
