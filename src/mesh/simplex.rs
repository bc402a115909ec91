use super::cartesian::ZoneDofs;
use super::MeshProvider;
use crate::discretization::{BasisKind, Dim, FiniteElement, Geometry};
use crate::error::{HydroError, HydroResult};

// Kuhn subdivision of the unit cube: one tetrahedron per axis permutation
const KUHN_PERMUTATIONS: [([usize; 3], bool); 6] = [
    ([0, 1, 2], true),
    ([1, 2, 0], true),
    ([2, 0, 1], true),
    ([0, 2, 1], false),
    ([2, 1, 0], false),
    ([1, 0, 2], false),
];

/// Linear triangles (two per box) or tetrahedra (six per box) covering a box
///
/// Only first order positions are supported; the L2 space may have any order.
#[derive(Clone, Debug)]
pub struct SimplexMesh {
    geometry: Geometry,
    l2_order: usize,
    vertices: Vec<[f64; 3]>,
    h1_dofs: Vec<ZoneDofs>,
    l2_dofs: Vec<ZoneDofs>,
    volumes: Vec<f64>,
}

impl SimplexMesh {
    /// ```
    /// use lagrangian_hydro::mesh::{MeshProvider, SimplexMesh};
    ///
    /// let mesh = SimplexMesh::new(&[2, 2], &[1.0, 1.0], 0).unwrap();
    /// assert_eq!(mesh.num_zones(), 8);
    /// let area: f64 = (0..8).map(|z| mesh.zone_volume(z)).sum();
    /// assert!((area - 1.0).abs() < 1e-14);
    /// ```
    pub fn new(boxes: &[usize], extent: &[f64], l2_order: usize) -> HydroResult<Self> {
        let dim = Dim::try_from(boxes.len())?;
        let geometry = match dim {
            Dim::Two => Geometry::Triangle,
            Dim::Three => Geometry::Tetrahedron,
            Dim::One => {
                return Err(HydroError::InvalidConfig(
                    "simplex meshes need 2 or 3 dimensions".to_owned(),
                ))
            }
        };
        if extent.len() != boxes.len() || boxes.iter().any(|n| *n == 0) || extent.iter().any(|e| *e <= 0.0) {
            return Err(HydroError::InvalidConfig("the box must be non-empty".to_owned()));
        }
        let n_l2 = FiniteElement::new(geometry, BasisKind::L2, l2_order)?.num_dofs();

        let d = dim.size();
        let mut counts = [1; 3];
        let mut h = [0.0; 3];
        for a in 0..d {
            counts[a] = boxes[a] + 1;
            h[a] = extent[a] / boxes[a] as f64;
        }

        let mut vertices = Vec::with_capacity(counts.iter().product());
        for k in 0..counts[2] {
            for j in 0..counts[1] {
                for i in 0..counts[0] {
                    vertices.push([i as f64 * h[0], j as f64 * h[1], k as f64 * h[2]]);
                }
            }
        }
        let vertex = |i: usize, j: usize, k: usize| i + j * counts[0] + k * counts[0] * counts[1];

        let mut h1_dofs: Vec<ZoneDofs> = Vec::new();
        for bk in 0..boxes.get(2).copied().unwrap_or(1) {
            for bj in 0..boxes[1] {
                for bi in 0..boxes[0] {
                    match dim {
                        Dim::Two => {
                            let a = vertex(bi, bj, 0);
                            let b = vertex(bi + 1, bj, 0);
                            let c = vertex(bi, bj + 1, 0);
                            let dd = vertex(bi + 1, bj + 1, 0);
                            h1_dofs.push([a, b, dd].into_iter().collect());
                            h1_dofs.push([a, dd, c].into_iter().collect());
                        }
                        _ => {
                            for (perm, even) in KUHN_PERMUTATIONS.iter() {
                                let mut corner = [bi, bj, bk];
                                let mut path = [vertex(bi, bj, bk), 0, 0, 0];
                                for (step, axis) in perm.iter().enumerate() {
                                    corner[*axis] += 1;
                                    path[step + 1] = vertex(corner[0], corner[1], corner[2]);
                                }
                                if !even {
                                    path.swap(1, 2);
                                }
                                h1_dofs.push(path.into_iter().collect());
                            }
                        }
                    }
                }
            }
        }

        let volumes = h1_dofs
            .iter()
            .map(|dofs| simplex_volume(dim, &vertices, dofs))
            .collect();
        let l2_dofs = (0..h1_dofs.len())
            .map(|z| (z * n_l2..(z + 1) * n_l2).collect())
            .collect();

        Ok(Self {
            geometry,
            l2_order,
            vertices,
            h1_dofs,
            l2_dofs,
            volumes,
        })
    }
}

fn simplex_volume(dim: Dim, vertices: &[[f64; 3]], dofs: &[usize]) -> f64 {
    let v0 = vertices[dofs[0]];
    let edge = |k: usize, a: usize| vertices[dofs[k]][a] - v0[a];
    match dim {
        Dim::Two => 0.5 * (edge(1, 0) * edge(2, 1) - edge(1, 1) * edge(2, 0)),
        _ => {
            let det = edge(1, 0) * (edge(2, 1) * edge(3, 2) - edge(2, 2) * edge(3, 1))
                - edge(2, 0) * (edge(1, 1) * edge(3, 2) - edge(1, 2) * edge(3, 1))
                + edge(3, 0) * (edge(1, 1) * edge(2, 2) - edge(1, 2) * edge(2, 1));
            det / 6.0
        }
    }
}

impl MeshProvider for SimplexMesh {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn num_zones(&self) -> usize {
        self.h1_dofs.len()
    }

    fn h1_order(&self) -> usize {
        1
    }

    fn l2_order(&self) -> usize {
        self.l2_order
    }

    fn num_h1_dofs(&self) -> usize {
        self.vertices.len()
    }

    fn num_l2_dofs(&self) -> usize {
        self.l2_dofs.iter().map(|dofs| dofs.len()).sum()
    }

    fn h1_zone_dofs(&self, zone: usize) -> &[usize] {
        &self.h1_dofs[zone]
    }

    fn l2_zone_dofs(&self, zone: usize) -> &[usize] {
        &self.l2_dofs[zone]
    }

    fn initial_positions(&self) -> Vec<f64> {
        let d = self.dim().size();
        let n = self.vertices.len();
        let mut positions = vec![0.0; d * n];
        for (g, v) in self.vertices.iter().enumerate() {
            for a in 0..d {
                positions[a * n + g] = v[a];
            }
        }
        positions
    }

    fn zone_volume(&self, zone: usize) -> f64 {
        self.volumes[zone]
    }
}
