/// Structured segment, quadrilateral and hexahedral meshes of any H1 order
pub mod cartesian;
/// Triangle and tetrahedron meshes obtained by splitting boxes
pub mod simplex;

pub use cartesian::CartesianMesh;
pub use simplex::SimplexMesh;

use crate::discretization::{Dim, Geometry};

/// Topology and dof numbering consumed by the hydro core
///
/// Vectors of the kinematic (H1) space are component-major: component `c` of scalar dof `i` lives
/// at `c * num_h1_dofs() + i`. Thermodynamic (L2) vectors hold one value per L2 dof.
pub trait MeshProvider: Send + Sync {
    /// Shape shared by every zone
    fn geometry(&self) -> Geometry;

    fn dim(&self) -> Dim {
        self.geometry().dim()
    }

    fn num_zones(&self) -> usize;

    /// Polynomial order of the position and velocity fields
    fn h1_order(&self) -> usize;

    /// Polynomial order of the energy and density fields
    fn l2_order(&self) -> usize;

    /// Number of scalar H1 dofs
    fn num_h1_dofs(&self) -> usize;

    fn num_l2_dofs(&self) -> usize;

    /// Global scalar H1 dofs of `zone`, in the local order of the reference element
    fn h1_zone_dofs(&self, zone: usize) -> &[usize];

    /// Global L2 dofs of `zone`, in the local order of the reference element
    fn l2_zone_dofs(&self, zone: usize) -> &[usize];

    /// Initial nodal positions (component-major)
    fn initial_positions(&self) -> Vec<f64>;

    /// Measure of `zone` in the initial configuration
    fn zone_volume(&self, zone: usize) -> f64;

    /// Component-major velocity dofs held fixed at zero
    fn essential_velocity_dofs(&self) -> Vec<usize> {
        Vec::new()
    }
}
