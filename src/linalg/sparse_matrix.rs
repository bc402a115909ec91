use super::Operator;
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Wrapper around a BTreeMap to store square-symmetric matrices in a sparse data structure
///
/// Only the upper triangle is stored; call [SparseMatrix::finalize] after assembly to build the
/// row-compressed copy used for products.
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    /// Size of the square matrix
    pub dimension: usize,
    /// Matrix Entries
    entries: BTreeMap<[u32; 2], f64>,
    compressed: Option<Compressed>,
}

// full (both triangles) row-compressed storage
#[derive(Clone, Debug)]
struct Compressed {
    row_offsets: Vec<usize>,
    columns: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    pub fn new(dimension: usize) -> Self {
        assert!(
            dimension <= (u32::MAX as usize),
            "Matrix Dimension cannot exceed the size of a u32!"
        );

        Self {
            dimension,
            entries: BTreeMap::new(),
            compressed: None,
        }
    }

    pub fn num_entries(&self) -> usize {
        let num_diag = self.entries.keys().filter(|[i, j]| i == j).count();
        2 * self.entries.len() - num_diag
    }

    fn coordinates(&self, row_idx: usize, col_idx: usize) -> [u32; 2] {
        assert!(
            row_idx < self.dimension,
            "row_idx exceeded matrix dimension; cannot insert value!"
        );
        assert!(
            col_idx < self.dimension,
            "col_idx exceeded matrix dimension; cannot insert value!"
        );

        // dimension fits in a u32, so both casts are lossless
        if row_idx <= col_idx {
            [row_idx as u32, col_idx as u32]
        } else {
            [col_idx as u32, row_idx as u32]
        }
    }

    /// Add a value to the matrix. Assumes symmetry: row/col order does not matter.
    pub fn insert(&mut self, [row_idx, col_idx]: [usize; 2], value: f64) {
        let coordinates = self.coordinates(row_idx, col_idx);
        *self.entries.entry(coordinates).or_insert(0.0) += value;
        self.compressed = None;
    }

    /// Add a dense symmetric block whose rows and columns map to `dofs`
    pub fn insert_block(&mut self, dofs: &[usize], block: &DMatrix<f64>) {
        assert_eq!(block.nrows(), dofs.len(), "block does not match its dof list!");
        for (i, row_dof) in dofs.iter().enumerate() {
            for (j, col_dof) in dofs.iter().enumerate().skip(i) {
                self.insert([*row_dof, *col_dof], block[(i, j)]);
            }
        }
    }

    /// Iterate over the upper triangle of the matrix.
    pub fn iter_upper_tri(&self) -> impl Iterator<Item = ([usize; 2], f64)> + '_ {
        self.entries
            .iter()
            .map(|([r, c], v)| ([*r as usize, *c as usize], *v))
    }

    /// Diagonal entries
    pub fn diagonal(&self) -> Vec<f64> {
        let mut diag = vec![0.0; self.dimension];
        for ([r, c], v) in self.iter_upper_tri() {
            if r == c {
                diag[r] = v;
            }
        }
        diag
    }

    /// Build the row-compressed copy used by [Operator::mult]
    pub fn finalize(&mut self) {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.dimension];
        for ([r, c], v) in self.iter_upper_tri() {
            rows[r].push((c, v));
            if r != c {
                rows[c].push((r, v));
            }
        }

        let mut row_offsets = Vec::with_capacity(self.dimension + 1);
        let mut columns = Vec::with_capacity(self.num_entries());
        let mut values = Vec::with_capacity(self.num_entries());
        row_offsets.push(0);
        for mut row in rows {
            row.sort_by_key(|(c, _)| *c);
            for (c, v) in row {
                columns.push(c);
                values.push(v);
            }
            row_offsets.push(columns.len());
        }

        self.compressed = Some(Compressed {
            row_offsets,
            columns,
            values,
        });
    }
}

impl Operator for SparseMatrix {
    fn size(&self) -> usize {
        self.dimension
    }

    fn mult(&self, x: &[f64], y: &mut [f64]) {
        match &self.compressed {
            Some(csr) => {
                for (r, y_r) in y.iter_mut().enumerate() {
                    *y_r = (csr.row_offsets[r]..csr.row_offsets[r + 1])
                        .map(|k| csr.values[k] * x[csr.columns[k]])
                        .sum();
                }
            }
            None => {
                y.fill(0.0);
                for ([r, c], v) in self.iter_upper_tri() {
                    y[r] += v * x[c];
                    if r != c {
                        y[c] += v * x[r];
                    }
                }
            }
        }
    }
}

impl From<&SparseMatrix> for DMatrix<f64> {
    fn from(sm: &SparseMatrix) -> Self {
        let mut dense = DMatrix::zeros(sm.dimension, sm.dimension);
        for ([r, c], v) in sm.iter_upper_tri() {
            dense[(r, c)] = v;
            dense[(c, r)] = v;
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_insertion() {
        let mut sm = SparseMatrix::new(10);

        sm.insert([0, 0], 1.0);
        sm.insert([0, 0], 1.0);
        sm.insert([9, 9], 10.0);
        sm.insert([4, 3], 0.25);
        sm.insert([0, 8], 0.125);
        sm.insert([8, 0], 0.125);

        let entries: Vec<([usize; 2], f64)> = sm.iter_upper_tri().collect();
        assert_eq!(entries, vec![([0, 0], 2.0), ([0, 8], 0.25), ([3, 4], 0.25), ([9, 9], 10.0)]);
        assert_eq!(sm.num_entries(), 6);

        let dense = DMatrix::from(&sm);
        assert_eq!(dense[(8, 0)], 0.25);
        assert_eq!(dense[(4, 3)], dense[(3, 4)]);
    }

    #[test]
    fn products_match_dense() {
        let mut sm = SparseMatrix::new(4);
        let block = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
        sm.insert_block(&[0, 1], &block);
        sm.insert_block(&[1, 3], &block);
        sm.insert([2, 2], 1.0);

        let x = [1.0, 2.0, 3.0, 4.0];
        let mut y_map = [0.0; 4];
        sm.mult(&x, &mut y_map);

        sm.finalize();
        let mut y_csr = [0.0; 4];
        sm.mult(&x, &mut y_csr);

        assert_eq!(y_map, [0.0, 3.0, 3.0, 6.0]);
        assert_eq!(y_map, y_csr);
        assert_eq!(sm.diagonal(), vec![2.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_insertion() {
        let mut sm = SparseMatrix::new(10);
        sm.insert([10, 2], 1.0);
    }
}
