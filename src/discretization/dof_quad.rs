use super::{BasisKind, Dim, FiniteElement, Geometry, IntegrationRule};
use crate::error::HydroResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Layout of the tables stored in a [BasisMap]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapLayout {
    /// 1D tables of the generating basis at the 1D rule (tensor shapes only)
    Tensor,
    /// Multi-dimensional tables at every point of the full rule
    Full,
}

/// Identifies one function space on a reference shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpaceKey {
    pub kind: BasisKind,
    pub order: usize,
}

/// Immutable cache key of a [BasisMap]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MapSignature {
    pub geometry: Geometry,
    pub dim: Dim,
    pub trial: SpaceKey,
    pub test: SpaceKey,
    pub quad_order: usize,
    pub layout: MapLayout,
    /// Also store the quadrature weights
    pub transpose: bool,
}

impl MapSignature {
    pub fn new(
        geometry: Geometry,
        trial: SpaceKey,
        test: SpaceKey,
        quad_order: usize,
        layout: MapLayout,
        transpose: bool,
    ) -> Self {
        Self {
            geometry,
            dim: geometry.dim(),
            trial,
            test,
            quad_order,
            layout,
            transpose,
        }
    }
}

/// Precomputed basis values and gradients at quadrature points
///
/// Tensor layout (`n` = 1D dofs, `Q` = 1D points):
/// * `dof_to_quad`, `dof_to_quad_d`: `[q * n + d]`
/// * `quad_to_dof`, `quad_to_dof_d`: `[d * Q + q]`
///
/// Full layout (`n` dofs, `Q` points, `g` reference direction):
/// * `dof_to_quad`: `[q * n + d]`, `dof_to_quad_d`: `[(g * Q + q) * n + d]`
/// * `quad_to_dof`: `[d * Q + q]`, `quad_to_dof_d`: `[(g * n + d) * Q + q]`
///
/// The `dof_to_quad` tables belong to the trial space, the `quad_to_dof` tables to the test space.
#[derive(Debug)]
pub struct BasisMap {
    pub signature: MapSignature,
    pub num_trial_dofs: usize,
    pub num_test_dofs: usize,
    pub num_quad: usize,
    pub dof_to_quad: Vec<f64>,
    pub dof_to_quad_d: Vec<f64>,
    pub quad_to_dof: Vec<f64>,
    pub quad_to_dof_d: Vec<f64>,
    /// Weights of the full-dimensional rule; empty unless `signature.transpose`
    pub quad_weights: Vec<f64>,
}

impl BasisMap {
    fn build(signature: MapSignature) -> HydroResult<Self> {
        let trial = FiniteElement::new(signature.geometry, signature.trial.kind, signature.trial.order)?;
        let test = FiniteElement::new(signature.geometry, signature.test.kind, signature.test.order)?;
        let rule = IntegrationRule::for_geometry(signature.geometry, signature.quad_order);

        let (num_trial_dofs, num_test_dofs, num_quad, tables) = match signature.layout {
            MapLayout::Tensor => {
                assert!(signature.geometry.is_tensor(), "tensor maps need a tensor-product shape!");
                let (trial_1d, test_1d) = match (trial.basis_1d(), test.basis_1d()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => unreachable!("tensor shapes always carry a 1D basis"),
                };
                let points = &rule.points_1d;
                let nq = points.len();
                let (nt, ns) = (trial_1d.num_dofs(), test_1d.num_dofs());

                let mut tables = [vec![0.0; nq * nt], vec![0.0; nq * nt], vec![0.0; ns * nq], vec![0.0; ns * nq]];
                let (mut vals, mut ders) = (vec![0.0; nt.max(ns)], vec![0.0; nt.max(ns)]);
                for (q, x) in points.iter().enumerate() {
                    trial_1d.eval(*x, &mut vals, &mut ders);
                    for d in 0..nt {
                        tables[0][q * nt + d] = vals[d];
                        tables[1][q * nt + d] = ders[d];
                    }
                    test_1d.eval(*x, &mut vals, &mut ders);
                    for d in 0..ns {
                        tables[2][d * nq + q] = vals[d];
                        tables[3][d * nq + q] = ders[d];
                    }
                }
                (nt, ns, nq, tables)
            }
            MapLayout::Full => {
                let dim = signature.dim.size();
                let nq = rule.num_points();
                let (nt, ns) = (trial.num_dofs(), test.num_dofs());

                let mut tables = [
                    vec![0.0; nq * nt],
                    vec![0.0; dim * nq * nt],
                    vec![0.0; ns * nq],
                    vec![0.0; dim * ns * nq],
                ];
                let (mut shape, mut dshape) = (vec![0.0; nt.max(ns)], vec![0.0; dim * nt.max(ns)]);
                for (q, x) in rule.points.iter().enumerate() {
                    trial.calc_shape(x, &mut shape);
                    trial.calc_dshape(x, &mut dshape);
                    for d in 0..nt {
                        tables[0][q * nt + d] = shape[d];
                        for g in 0..dim {
                            tables[1][(g * nq + q) * nt + d] = dshape[g * nt + d];
                        }
                    }
                    test.calc_shape(x, &mut shape);
                    test.calc_dshape(x, &mut dshape);
                    for d in 0..ns {
                        tables[2][d * nq + q] = shape[d];
                        for g in 0..dim {
                            tables[3][(g * ns + d) * nq + q] = dshape[g * ns + d];
                        }
                    }
                }
                (nt, ns, nq, tables)
            }
        };

        let [dof_to_quad, dof_to_quad_d, quad_to_dof, quad_to_dof_d] = tables;
        let mut map = Self {
            signature,
            num_trial_dofs,
            num_test_dofs,
            num_quad,
            dof_to_quad,
            dof_to_quad_d,
            quad_to_dof,
            quad_to_dof_d,
            quad_weights: Vec::new(),
        };
        if signature.transpose {
            map.quad_weights = match signature.layout {
                MapLayout::Tensor => (0..map.num_quad_full())
                    .map(|q| tensor_weight(signature.dim, &rule.weights_1d, q))
                    .collect(),
                MapLayout::Full => rule.weights,
            };
        }
        Ok(map)
    }

    /// Number of points of the full-dimensional rule
    pub fn num_quad_full(&self) -> usize {
        match self.signature.layout {
            MapLayout::Tensor => self.num_quad.pow(self.signature.dim.size() as u32),
            MapLayout::Full => self.num_quad,
        }
    }
}

/// Weight of full-dimensional point `q` of a tensor rule built from `weights_1d`
///
/// Points are numbered `q = qx + qy * Q + qz * Q^2`.
pub fn tensor_weight(dim: Dim, weights_1d: &[f64], q: usize) -> f64 {
    let n = weights_1d.len();
    match dim {
        Dim::One => weights_1d[q],
        Dim::Two => weights_1d[q % n] * weights_1d[q / n],
        Dim::Three => {
            let qz = q / (n * n);
            let qy = (q - qz * n * n) / n;
            weights_1d[q % n] * weights_1d[qy] * weights_1d[qz]
        }
    }
}

/// Process-lifetime registry of [BasisMap]s, keyed by [MapSignature]
///
/// Entries are built on first request and shared afterwards; concurrent first requests for the
/// same signature observe a single entry.
#[derive(Default)]
pub struct BasisMapCache {
    maps: RwLock<HashMap<MapSignature, Arc<BasisMap>>>,
}

impl BasisMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the map for `signature`, building it if no equivalent map exists yet
    ///
    /// ```
    /// use lagrangian_hydro::discretization::*;
    ///
    /// let cache = BasisMapCache::new();
    /// let h1 = SpaceKey { kind: BasisKind::H1, order: 2 };
    /// let sig = MapSignature::new(Geometry::Square, h1, h1, 6, MapLayout::Tensor, true);
    ///
    /// let a = cache.get(sig).unwrap();
    /// let b = cache.get(sig).unwrap();
    /// assert!(std::sync::Arc::ptr_eq(&a, &b));
    /// assert_eq!(a.num_trial_dofs, 3);
    /// assert_eq!(cache.len(), 1);
    /// ```
    pub fn get(&self, signature: MapSignature) -> HydroResult<Arc<BasisMap>> {
        if let Some(map) = self.maps.read().get(&signature) {
            return Ok(Arc::clone(map));
        }

        let mut maps = self.maps.write();
        if let Some(map) = maps.get(&signature) {
            return Ok(Arc::clone(map));
        }

        let map = Arc::new(BasisMap::build(signature)?);
        assert_eq!(map.signature, signature, "basis map was built for another signature!");
        log::trace!("built basis map {:?}", signature);
        maps.insert(signature, Arc::clone(&map));
        Ok(map)
    }

    /// Map between one element's space and itself on `rule`
    pub fn for_space(
        &self,
        fe: &FiniteElement,
        rule: &IntegrationRule,
        layout: MapLayout,
        transpose: bool,
    ) -> HydroResult<Arc<BasisMap>> {
        self.for_spaces(fe, fe, rule, layout, transpose)
    }

    /// Map with a trial space and a distinct test space on `rule`
    pub fn for_spaces(
        &self,
        trial: &FiniteElement,
        test: &FiniteElement,
        rule: &IntegrationRule,
        layout: MapLayout,
        transpose: bool,
    ) -> HydroResult<Arc<BasisMap>> {
        assert_eq!(trial.geometry, rule.geometry, "trial space and rule live on different shapes!");
        assert_eq!(test.geometry, rule.geometry, "test space and rule live on different shapes!");
        self.get(MapSignature::new(
            rule.geometry,
            SpaceKey {
                kind: trial.kind,
                order: trial.order,
            },
            SpaceKey {
                kind: test.kind,
                order: test.order,
            },
            rule.order,
            layout,
            transpose,
        ))
    }

    pub fn len(&self) -> usize {
        self.maps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.read().is_empty()
    }

    /// Drop every cached map. Maps still held by callers stay alive until released.
    pub fn release_all(&self) {
        let mut maps = self.maps.write();
        log::debug!("releasing {} basis maps", maps.len());
        maps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn h1(order: usize) -> SpaceKey {
        SpaceKey {
            kind: BasisKind::H1,
            order,
        }
    }

    fn l2(order: usize) -> SpaceKey {
        SpaceKey {
            kind: BasisKind::L2,
            order,
        }
    }

    #[test]
    fn tensor_weights_follow_index_rule() {
        let sig = MapSignature::new(Geometry::Cube, h1(1), h1(1), 4, MapLayout::Tensor, true);
        let map = BasisMap::build(sig).unwrap();
        let rule = IntegrationRule::for_geometry(Geometry::Cube, 4);

        assert_eq!(map.quad_weights.len(), rule.num_points());
        for q in 0..rule.num_points() {
            assert_relative_eq!(
                map.quad_weights[q],
                rule.weights[q],
                epsilon = 1e-15
            );
        }
    }

    #[test]
    fn weights_only_with_transpose() {
        let sig = MapSignature::new(Geometry::Square, h1(2), h1(2), 6, MapLayout::Tensor, false);
        assert!(BasisMap::build(sig).unwrap().quad_weights.is_empty());
    }

    #[test]
    fn tensor_and_full_tables_agree() {
        let rule_order = 5;
        let tensor = BasisMap::build(MapSignature::new(Geometry::Square, h1(2), l2(1), rule_order, MapLayout::Tensor, false)).unwrap();
        let full = BasisMap::build(MapSignature::new(Geometry::Square, h1(2), l2(1), rule_order, MapLayout::Full, false)).unwrap();

        let (n, nq) = (tensor.num_trial_dofs, tensor.num_quad);
        let (nf, nqf) = (full.num_trial_dofs, full.num_quad);
        assert_eq!(nf, n * n);
        assert_eq!(nqf, nq * nq);

        for qy in 0..nq {
            for qx in 0..nq {
                let q = qx + qy * nq;
                for dy in 0..n {
                    for dx in 0..n {
                        let d = dx + dy * n;
                        let b = |t: &[f64], q1: usize, d1: usize| t[q1 * n + d1];
                        assert_relative_eq!(
                            full.dof_to_quad[q * nf + d],
                            b(&tensor.dof_to_quad, qx, dx) * b(&tensor.dof_to_quad, qy, dy),
                            epsilon = 1e-14
                        );
                        assert_relative_eq!(
                            full.dof_to_quad_d[q * nf + d],
                            b(&tensor.dof_to_quad_d, qx, dx) * b(&tensor.dof_to_quad, qy, dy),
                            epsilon = 1e-13
                        );
                        assert_relative_eq!(
                            full.dof_to_quad_d[(nqf + q) * nf + d],
                            b(&tensor.dof_to_quad, qx, dx) * b(&tensor.dof_to_quad_d, qy, dy),
                            epsilon = 1e-13
                        );
                    }
                }
            }
        }

        // the test space is stored transposed
        let ns = tensor.num_test_dofs;
        assert_eq!(ns, 2);
        assert_eq!(tensor.quad_to_dof.len(), ns * nq);
    }

    #[test]
    fn cache_is_idempotent() {
        let cache = BasisMapCache::new();
        let sig = MapSignature::new(Geometry::Triangle, h1(1), l2(0), 2, MapLayout::Full, true);
        let a = cache.get(sig).unwrap();
        let b = cache.get(sig).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = MapSignature { transpose: false, ..sig };
        let c = cache.get(other).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);

        cache.release_all();
        assert!(cache.is_empty());
        // callers keep their maps after release
        assert_eq!(a.num_trial_dofs, 3);
    }

    #[test]
    fn concurrent_first_use_yields_one_entry() {
        let cache = BasisMapCache::new();
        let sig = MapSignature::new(Geometry::Cube, h1(3), h1(3), 10, MapLayout::Tensor, true);

        let maps: Vec<Arc<BasisMap>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| cache.get(sig).unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.len(), 1);
        for map in maps.iter() {
            assert!(Arc::ptr_eq(map, &maps[0]));
        }
    }
}
