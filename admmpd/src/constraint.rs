//! Linear constraints `Kx = l` supplied by the host every timestep.
//!
//! The Jacobian is split per spatial axis: `K[a]` is a `c x n` matrix acting on the `a`-th
//! coordinate of every vertex, so that constraint `r` reads `Σₐ (K[a] xₐ)ᵣ = lᵣ`. Pins and
//! collision planes are typical producers. Constraints are enforced softly with stiffness `k`
//! by adding `k KᵗK` to the system matrix and `k Kᵗl` to the right-hand side.

use ndarray::Array2;
use sprs::CsMat;

use crate::matrix::{SparsityPattern, Triplets};
use crate::Error;

#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintSet {
    /// Constraint Jacobian, one `c x n` matrix per axis.
    k: [CsMat<f64>; 3],
    /// Constraint right-hand side, one entry per row.
    l: Vec<f64>,
}

impl ConstraintSet {
    pub fn new(k: [CsMat<f64>; 3], l: Vec<f64>) -> Result<Self, Error> {
        let num_cols = k[0].cols();
        if k.iter().any(|ka| ka.rows() != l.len() || ka.cols() != num_cols) {
            return Err(Error::SizeMismatch);
        }
        if l.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "l".to_string(),
            });
        }
        Ok(ConstraintSet { k, l })
    }

    /// An empty constraint set over `num_vertices` vertices.
    pub fn empty(num_vertices: usize) -> Self {
        let empty = || CsMat::zero((0, num_vertices));
        ConstraintSet {
            k: [empty(), empty(), empty()],
            l: Vec::new(),
        }
    }

    pub fn builder(num_vertices: usize) -> ConstraintBuilder {
        ConstraintBuilder::new(num_vertices)
    }

    /// Constraint Jacobian, one `c x n` matrix per axis.
    pub fn k(&self) -> &[CsMat<f64>; 3] {
        &self.k
    }

    pub fn l(&self) -> &[f64] {
        &self.l
    }

    pub fn num_constraints(&self) -> usize {
        self.l.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.k[0].cols()
    }

    pub fn is_empty(&self) -> bool {
        self.l.is_empty()
    }

    /// Structure of all three Jacobians. Changes in this pattern require recoloring and symbolic
    /// refactorization, changes in values do not.
    pub fn pattern(&self) -> [SparsityPattern; 3] {
        [
            SparsityPattern::of(&self.k[0]),
            SparsityPattern::of(&self.k[1]),
            SparsityPattern::of(&self.k[2]),
        ]
    }

    /// Nonzero entries of constraint row `r` as `(dof, value)` with `dof = 3 * vertex + axis`.
    fn row_entries(&self, r: usize) -> Vec<(usize, f64)> {
        let mut entries = Vec::new();
        for (axis, ka) in self.k.iter().enumerate() {
            if let Some(row) = ka.outer_view(r) {
                entries.extend(row.iter().map(|(j, &v)| (3 * j + axis, v)));
            }
        }
        entries
    }

    /// Assembles `stiffness * KᵗK` over interleaved degrees of freedom.
    pub fn normal_matrix(&self, stiffness: f64) -> CsMat<f64> {
        let n = 3 * self.num_vertices();
        let mut ktk = Triplets::new(n, n);
        for r in 0..self.num_constraints() {
            let entries = self.row_entries(r);
            for &(p, vp) in &entries {
                for &(q, vq) in &entries {
                    ktk.push(p, q, stiffness * vp * vq);
                }
            }
        }
        ktk.to_csr()
    }

    /// Computes `stiffness * Kᵗl` as an `n x 3` array.
    pub fn rhs(&self, stiffness: f64) -> Array2<f64> {
        let mut ktl = Array2::zeros((self.num_vertices(), 3));
        for (axis, ka) in self.k.iter().enumerate() {
            for (r, row) in ka.outer_iterator().enumerate() {
                for (j, &v) in row.iter() {
                    ktl[[j, axis]] += stiffness * v * self.l[r];
                }
            }
        }
        ktl
    }

    /// Constraint violation `Kx - l` for the given vertex positions.
    pub fn residual(&self, x: ndarray::ArrayView2<f64>) -> Vec<f64> {
        (0..self.num_constraints())
            .map(|r| {
                self.row_entries(r)
                    .into_iter()
                    .map(|(dof, v)| v * x[[dof / 3, dof % 3]])
                    .sum::<f64>()
                    - self.l[r]
            })
            .collect()
    }
}

/// Incrementally builds a [`ConstraintSet`].
#[derive(Debug)]
pub struct ConstraintBuilder {
    num_vertices: usize,
    k: [Triplets; 3],
    l: Vec<f64>,
    invalid: Option<Error>,
}

impl ConstraintBuilder {
    pub fn new(num_vertices: usize) -> Self {
        let k = || Triplets::new(0, num_vertices);
        ConstraintBuilder {
            num_vertices,
            k: [k(), k(), k()],
            l: Vec::new(),
            invalid: None,
        }
    }

    fn mark_invalid(&mut self, vertex: usize) {
        if self.invalid.is_none() {
            self.invalid = Some(Error::InvalidIndex {
                element: self.l.len(),
                index: vertex,
            });
        }
    }

    /// Pins a vertex to a target position. Adds one constraint row per axis.
    pub fn pin(mut self, vertex: usize, target: [f64; 3]) -> Self {
        if vertex >= self.num_vertices {
            self.mark_invalid(vertex);
            return self;
        }
        for (axis, &t) in target.iter().enumerate() {
            let row = self.l.len();
            self.k[axis].push(row, vertex, 1.0);
            self.l.push(t);
        }
        self
    }

    /// Adds a single row `Σ wᵥ · xᵥ = rhs` over the given `(vertex, weights)` terms.
    pub fn linear(mut self, terms: &[(usize, [f64; 3])], rhs: f64) -> Self {
        if let Some(&(vertex, _)) = terms.iter().find(|&&(v, _)| v >= self.num_vertices) {
            self.mark_invalid(vertex);
            return self;
        }
        let row = self.l.len();
        for &(vertex, w) in terms {
            for (axis, &wa) in w.iter().enumerate() {
                if wa != 0.0 {
                    self.k[axis].push(row, vertex, wa);
                }
            }
        }
        self.l.push(rhs);
        self
    }

    pub fn build(self) -> Result<ConstraintSet, Error> {
        if let Some(err) = self.invalid {
            return Err(err);
        }
        let num_rows = self.l.len();
        let [mut k0, mut k1, mut k2] = self.k;
        k0.set_rows(num_rows);
        k1.set_rows(num_rows);
        k2.set_rows(num_rows);
        ConstraintSet::new([k0.to_csr(), k1.to_csr(), k2.to_csr()], self.l)
    }
}
