//! Sparse matrix helpers shared by the assembler and the linear solvers.
//!
//! Vertex quantities are stored as `n x 3` arrays. System matrices act on vertices, so the same
//! `n x n` matrix is applied to each of the three columns, while constraint terms are coupled
//! across axes and act on the interleaved `3n` degrees of freedom (`3 * vertex + axis`).

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use sprs::CsMat;

/// Coordinate format accumulator. Duplicate entries are summed on conversion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Triplets {
    num_rows: usize,
    num_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl Triplets {
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Triplets {
            num_rows,
            num_cols,
            ..Default::default()
        }
    }

    pub fn push(&mut self, row: usize, col: usize, val: f64) {
        self.rows.push(row);
        self.cols.push(col);
        self.vals.push(val);
    }

    /// Sets the number of rows, which is useful when rows are appended incrementally.
    pub fn set_rows(&mut self, num_rows: usize) {
        self.num_rows = num_rows;
    }

    pub fn to_csr(&self) -> CsMat<f64> {
        sprs::TriMat::from_triplets(
            (self.num_rows, self.num_cols),
            self.rows.clone(),
            self.cols.clone(),
            self.vals.clone(),
        )
        .to_csr()
    }
}

/// Row and column structure of a sparse matrix. Used to detect sparsity changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SparsityPattern {
    pub shape: (usize, usize),
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
}

impl SparsityPattern {
    pub fn of(mat: &CsMat<f64>) -> Self {
        let mut indptr = Vec::with_capacity(mat.outer_dims() + 1);
        let mut indices = Vec::with_capacity(mat.nnz());
        indptr.push(0);
        for row in mat.outer_iterator() {
            indices.extend(row.indices().iter().cloned());
            indptr.push(indices.len());
        }
        SparsityPattern {
            shape: mat.shape(),
            indptr,
            indices,
        }
    }

    /// Checks whether `mat` has this pattern without building a new one.
    pub fn matches(&self, mat: &CsMat<f64>) -> bool {
        if self.shape != mat.shape() || self.indices.len() != mat.nnz() {
            return false;
        }
        let mut start = 0;
        for (row, &end) in mat.outer_iterator().zip(self.indptr[1..].iter()) {
            let indices = row.indices();
            if start + indices.len() != end || indices != &self.indices[start..end] {
                return false;
            }
            start = end;
        }
        true
    }
}

/// Computes `a * x` for an `n x 3` (or any width) dense array in parallel over rows.
pub fn mul_dense(a: &CsMat<f64>, x: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((a.rows(), x.ncols()));
    mul_dense_into(a, x, &mut out);
    out
}

pub fn mul_dense_into(a: &CsMat<f64>, x: ArrayView2<f64>, out: &mut Array2<f64>) {
    debug_assert_eq!(a.cols(), x.nrows());
    debug_assert_eq!(out.nrows(), a.rows());
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut out_row)| {
            out_row.fill(0.0);
            if let Some(row) = a.outer_view(i) {
                for (j, &v) in row.iter() {
                    out_row.scaled_add(v, &x.row(j));
                }
            }
        });
}

/// Diagonal entries of a square matrix.
pub fn diagonal(a: &CsMat<f64>) -> Vec<f64> {
    (0..a.rows())
        .map(|i| a.get(i, i).cloned().unwrap_or(0.0))
        .collect()
}

/// Expands an `n x n` vertex matrix to the interleaved `3n x 3n` degrees of freedom.
pub fn kron_identity3(a: &CsMat<f64>, out: &mut Triplets) {
    for (i, row) in a.outer_iterator().enumerate() {
        for (j, &v) in row.iter() {
            for k in 0..3 {
                out.push(3 * i + k, 3 * j + k, v);
            }
        }
    }
}

/// Frobenius norm of a dense array.
pub fn frobenius_norm(a: ArrayView2<f64>) -> f64 {
    a.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Flattens an `n x 3` array into interleaved degrees of freedom.
pub fn flatten(a: ArrayView2<f64>) -> Vec<f64> {
    a.iter().cloned().collect()
}

/// Writes interleaved degrees of freedom back into an `n x 3` array.
pub fn unflatten_into(v: &[f64], a: &mut Array2<f64>) {
    debug_assert_eq!(v.len(), a.len());
    for (dst, &src) in a.iter_mut().zip(v.iter()) {
        *dst = src;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn small_matrix() -> CsMat<f64> {
        let mut t = Triplets::new(3, 3);
        t.push(0, 0, 2.0);
        t.push(0, 1, -1.0);
        t.push(1, 0, -1.0);
        t.push(1, 1, 1.0);
        t.push(1, 1, 1.0); // duplicate entries are summed
        t.push(2, 2, 3.0);
        t.to_csr()
    }

    #[test]
    fn dense_product() {
        let a = small_matrix();
        let x = arr2(&[[1.0, 0.0, 2.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0]]);
        let ax = mul_dense(&a, x.view());
        assert_eq!(ax, arr2(&[[2.0, -1.0, 3.0], [-1.0, 2.0, 0.0], [3.0, 3.0, 3.0]]));
        assert_eq!(diagonal(&a), vec![2.0, 2.0, 3.0]);
    }

    #[test]
    fn expanded_product_matches_columnwise_product() {
        let a = small_matrix();
        let mut t = Triplets::new(9, 9);
        kron_identity3(&a, &mut t);
        let a3 = t.to_csr();

        let x = arr2(&[[1.0, 0.5, 2.0], [0.0, 1.0, -1.0], [1.0, 3.0, 1.0]]);
        let x3 = Array2::from_shape_vec((9, 1), flatten(x.view())).unwrap();
        let out = mul_dense(&a3, x3.view());
        assert_eq!(flatten(out.view()), flatten(mul_dense(&a, x.view()).view()));
    }

    #[test]
    fn pattern_ignores_values() {
        let a = small_matrix();
        let b = a.map(|&v| 2.0 * v);
        assert_eq!(SparsityPattern::of(&a), SparsityPattern::of(&b));
        assert!(SparsityPattern::of(&a).matches(&b));
        let mut t = Triplets::new(3, 3);
        t.push(0, 2, 1.0);
        assert_ne!(SparsityPattern::of(&a), SparsityPattern::of(&t.to_csr()));
        assert!(!SparsityPattern::of(&a).matches(&t.to_csr()));
    }
}
