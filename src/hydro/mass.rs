use crate::discretization::BasisMap;
use crate::error::{HydroError, HydroResult};
use crate::force::ElementRestriction;
use crate::linalg::{spd_inverse, SparseMatrix};
use nalgebra::DMatrix;

/// `M_jk = sum_q point_weights[q] phi_j(q) phi_k(q)` for the trial space of a full-layout map
pub fn local_mass(map: &BasisMap, point_weights: &[f64]) -> DMatrix<f64> {
    let (n, nq) = (map.num_trial_dofs, map.num_quad);
    assert_eq!(point_weights.len(), nq, "one weight per quadrature point is needed!");

    let mut mass = DMatrix::zeros(n, n);
    for (q, w) in point_weights.iter().enumerate() {
        let phi = &map.dof_to_quad[q * n..(q + 1) * n];
        for j in 0..n {
            let w_phi_j = w * phi[j];
            for k in j..n {
                mass[(j, k)] += w_phi_j * phi[k];
            }
        }
    }
    mass.fill_lower_triangle_with_upper_triangle();
    mass
}

/// Scalar velocity mass matrix weighted by `rho0DetJ0w`; shared by every velocity component
pub fn velocity_mass(restriction: &ElementRestriction, h1: &BasisMap, rho0_det_j0_w: &[f64]) -> SparseMatrix {
    let nq = h1.num_quad;
    let mut mass = SparseMatrix::new(restriction.num_h1_dofs());
    for zone in 0..restriction.num_zones() {
        let local = local_mass(h1, &rho0_det_j0_w[zone * nq..(zone + 1) * nq]);
        mass.insert_block(restriction.h1_zone_dofs(zone), &local);
    }
    mass.finalize();
    mass
}

/// Inverse energy mass matrix of every zone
pub fn energy_mass_inverses(
    restriction: &ElementRestriction,
    l2: &BasisMap,
    rho0_det_j0_w: &[f64],
) -> HydroResult<Vec<DMatrix<f64>>> {
    let nq = l2.num_quad;
    (0..restriction.num_zones())
        .map(|zone| {
            let mass = local_mass(l2, &rho0_det_j0_w[zone * nq..(zone + 1) * nq]);
            spd_inverse(mass).ok_or(HydroError::SingularMassMatrix(zone))
        })
        .collect()
}
