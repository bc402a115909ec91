/// Nodal Lagrange bases on reference zones
pub mod basis;
/// Cached basis values and gradients at quadrature points
pub mod dof_quad;
/// Reference shapes and closed-form Jacobian kernels
pub mod geometry;
/// Gauss-Legendre-Quadrature rules on reference zones
pub mod quadrature;

pub use basis::{Basis1D, BasisKind, FiniteElement};
pub use dof_quad::{tensor_weight, BasisMap, BasisMapCache, MapLayout, MapSignature, SpaceKey};
pub use geometry::{element_jacobians, invert, min_singular_value, Dim, Geometry};
pub use quadrature::{hydro_rule_order, IntegrationRule};
