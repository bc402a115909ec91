use super::MeshProvider;
use crate::discretization::basis::gauss_lobatto_nodes;
use crate::discretization::{Dim, Geometry};
use crate::error::{HydroError, HydroResult};
use smallvec::SmallVec;

pub(crate) type ZoneDofs = SmallVec<[usize; 16]>;

/// A box `[lower, upper]` cut into `zones[a]` equal zones along each axis
///
/// H1 dofs sit at the Gauss-Lobatto lattice of every zone and are shared across zone faces; L2
/// dofs are numbered zone by zone.
#[derive(Clone, Debug)]
pub struct CartesianMesh {
    geometry: Geometry,
    zones: [usize; 3],
    lower: [f64; 3],
    spacing: [f64; 3],
    h1_order: usize,
    l2_order: usize,
    nodes_per_axis: [usize; 3],
    h1_dofs: Vec<ZoneDofs>,
    l2_dofs: Vec<ZoneDofs>,
    reflecting_walls: bool,
}

impl CartesianMesh {
    /// ```
    /// use lagrangian_hydro::mesh::{CartesianMesh, MeshProvider};
    ///
    /// let mesh = CartesianMesh::new(&[2, 3], &[0.0, 0.0], &[1.0, 1.5], 2, 1).unwrap();
    /// assert_eq!(mesh.num_zones(), 6);
    /// assert_eq!(mesh.num_h1_dofs(), 5 * 7);
    /// assert_eq!(mesh.num_l2_dofs(), 6 * 4);
    /// ```
    pub fn new(
        zones: &[usize],
        lower: &[f64],
        upper: &[f64],
        h1_order: usize,
        l2_order: usize,
    ) -> HydroResult<Self> {
        let dim = Dim::try_from(zones.len())?;
        let d = dim.size();
        if lower.len() != d || upper.len() != d {
            return Err(HydroError::InvalidConfig(format!(
                "a {}D box needs {} lower and upper coordinates",
                d, d
            )));
        }
        if zones.iter().any(|n| *n == 0) || lower.iter().zip(upper).any(|(lo, up)| up <= lo) {
            return Err(HydroError::InvalidConfig("the box must be non-empty".to_owned()));
        }
        let geometry = match dim {
            Dim::One => Geometry::Segment,
            Dim::Two => Geometry::Square,
            Dim::Three => Geometry::Cube,
        };
        if h1_order == 0 {
            return Err(HydroError::UnsupportedOrder {
                geometry,
                kind: crate::discretization::BasisKind::H1,
                order: h1_order,
            });
        }

        let mut zone_counts = [1; 3];
        let mut lo = [0.0; 3];
        let mut spacing = [1.0; 3];
        let mut nodes_per_axis = [1; 3];
        for a in 0..d {
            zone_counts[a] = zones[a];
            lo[a] = lower[a];
            spacing[a] = (upper[a] - lower[a]) / zones[a] as f64;
            nodes_per_axis[a] = zones[a] * h1_order + 1;
        }

        let n1 = h1_order + 1;
        let n_l2 = (l2_order + 1).pow(d as u32);
        let local_h1: Vec<[usize; 3]> = (0..n1.pow(d as u32))
            .map(|l| [l % n1, (l / n1) % n1, l / (n1 * n1)])
            .collect();

        let mut h1_dofs = Vec::with_capacity(zones.iter().product());
        let mut l2_dofs = Vec::with_capacity(zones.iter().product());
        for zz in 0..zone_counts[2] {
            for zy in 0..zone_counts[1] {
                for zx in 0..zone_counts[0] {
                    let zone = zx + zy * zone_counts[0] + zz * zone_counts[0] * zone_counts[1];
                    h1_dofs.push(
                        local_h1
                            .iter()
                            .map(|[lx, ly, lz]| {
                                let (gx, gy, gz) = (zx * h1_order + lx, zy * h1_order + ly, zz * h1_order + lz);
                                gx + gy * nodes_per_axis[0] + gz * nodes_per_axis[0] * nodes_per_axis[1]
                            })
                            .collect(),
                    );
                    l2_dofs.push((zone * n_l2..(zone + 1) * n_l2).collect());
                }
            }
        }

        Ok(Self {
            geometry,
            zones: zone_counts,
            lower: lo,
            spacing,
            h1_order,
            l2_order,
            nodes_per_axis,
            h1_dofs,
            l2_dofs,
            reflecting_walls: false,
        })
    }

    /// Unit square with `n x n` zones
    pub fn unit_square(n: usize, h1_order: usize, l2_order: usize) -> HydroResult<Self> {
        Self::new(&[n, n], &[0.0, 0.0], &[1.0, 1.0], h1_order, l2_order)
    }

    /// Unit cube with `n x n x n` zones
    pub fn unit_cube(n: usize, h1_order: usize, l2_order: usize) -> HydroResult<Self> {
        Self::new(&[n, n, n], &[0.0; 3], &[1.0; 3], h1_order, l2_order)
    }

    /// Hold the wall-normal velocity component at zero on every face of the box
    pub fn with_reflecting_walls(mut self) -> Self {
        self.reflecting_walls = true;
        self
    }

    fn node_index(&self, g: usize) -> [usize; 3] {
        let [nx, ny, _] = self.nodes_per_axis;
        [g % nx, (g / nx) % ny, g / (nx * ny)]
    }
}

impl MeshProvider for CartesianMesh {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn num_zones(&self) -> usize {
        self.h1_dofs.len()
    }

    fn h1_order(&self) -> usize {
        self.h1_order
    }

    fn l2_order(&self) -> usize {
        self.l2_order
    }

    fn num_h1_dofs(&self) -> usize {
        self.nodes_per_axis.iter().product()
    }

    fn num_l2_dofs(&self) -> usize {
        self.l2_dofs.len() * (self.l2_order + 1).pow(self.dim().size() as u32)
    }

    fn h1_zone_dofs(&self, zone: usize) -> &[usize] {
        &self.h1_dofs[zone]
    }

    fn l2_zone_dofs(&self, zone: usize) -> &[usize] {
        &self.l2_dofs[zone]
    }

    fn initial_positions(&self) -> Vec<f64> {
        let d = self.dim().size();
        let p = self.h1_order;
        let gll = gauss_lobatto_nodes(p);
        let n = self.num_h1_dofs();

        let mut positions = vec![0.0; d * n];
        for g in 0..n {
            let idx = self.node_index(g);
            for a in 0..d {
                let zone = (idx[a] / p).min(self.zones[a] - 1);
                let local = idx[a] - zone * p;
                positions[a * n + g] = self.lower[a] + self.spacing[a] * (zone as f64 + gll[local]);
            }
        }
        positions
    }

    fn zone_volume(&self, _zone: usize) -> f64 {
        self.spacing[..self.dim().size()].iter().product()
    }

    fn essential_velocity_dofs(&self) -> Vec<usize> {
        if !self.reflecting_walls {
            return Vec::new();
        }
        let n = self.num_h1_dofs();
        let mut dofs = Vec::new();
        for c in 0..self.dim().size() {
            for g in 0..n {
                let i = self.node_index(g)[c];
                if i == 0 || i == self.nodes_per_axis[c] - 1 {
                    dofs.push(c * n + g);
                }
            }
        }
        dofs
    }
}
