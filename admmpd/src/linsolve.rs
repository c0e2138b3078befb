//! Linear solvers for the global step.
//!
//! All solvers act on the system `(A ⊗ I₃ + KᵗK) x = rhs` where `A` is an `n x n` vertex matrix
//! applied to each coordinate, and the optional `KᵗK` couples the interleaved `3n` degrees of
//! freedom. Unknowns and right-hand sides are `n x 3` arrays.

mod direct;
mod gauss_seidel;
mod pcg;

pub use direct::*;
pub use gauss_seidel::*;
pub use pcg::*;

use ndarray::{Array2, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use sprs::CsMat;

use crate::matrix::{frobenius_norm, mul_dense_into};
use crate::{Error, LinearSolverKind, Options};

#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum Status {
    #[error("Success")]
    Success,
    #[error("Maximum number of linear solver iterations exceeded")]
    MaximumIterationsExceeded,
    #[error("NaN detected")]
    NanDetected,
}

impl Default for Status {
    fn default() -> Self {
        Status::Success
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct SolveResult {
    /// Number of iterations of an iterative solver. Zero for direct solves.
    pub iterations: u32,
    /// Absolute residual Frobenius norm.
    pub residual: f64,
    /// Final status of the linear solve.
    pub status: Status,
}

/// A borrowed view of the global system.
#[derive(Copy, Clone, Debug)]
pub struct System<'a> {
    pub a: &'a CsMat<f64>,
    /// Constraint coupling over interleaved degrees of freedom, already scaled by its stiffness.
    pub ktk: Option<&'a CsMat<f64>>,
    /// Prebuilt `A ⊗ I₃ + KᵗK` for the direct solver. Built on demand when missing.
    pub expanded: Option<&'a CsMat<f64>>,
    pub rhs: ArrayView2<'a, f64>,
}

impl<'a> System<'a> {
    pub fn num_vertices(&self) -> usize {
        self.a.rows()
    }

    /// Computes `out = (A ⊗ I₃ + KᵗK) x`.
    pub fn apply(&self, x: ArrayView2<f64>, out: &mut Array2<f64>) {
        mul_dense_into(self.a, x, out);
        if let Some(ktk) = self.ktk {
            add_coupling(ktk, x, out);
        }
    }

    /// Frobenius norm of `rhs - system * x`, using `scratch` for the product.
    pub fn residual_norm(&self, x: ArrayView2<f64>, scratch: &mut Array2<f64>) -> f64 {
        self.apply(x, scratch);
        Zip::from(&mut *scratch)
            .and(&self.rhs)
            .for_each(|s, &b| *s = b - *s);
        frobenius_norm(scratch.view())
    }

    /// Absolute tolerance derived from a relative one.
    pub(crate) fn absolute_tolerance(&self, tol: f64) -> f64 {
        tol * frobenius_norm(self.rhs).max(1.0)
    }
}

/// Adds `ktk * x` to `out`, where both are `n x 3` arrays viewed as interleaved vectors.
pub(crate) fn add_coupling(ktk: &CsMat<f64>, x: ArrayView2<f64>, out: &mut Array2<f64>) {
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut out_row)| {
            for a in 0..3 {
                if let Some(row) = ktk.outer_view(3 * i + a) {
                    out_row[a] += row
                        .iter()
                        .map(|(q, &v)| v * x[[q / 3, q % 3]])
                        .sum::<f64>();
                }
            }
        });
}

/// Owns every linear solver together with its workspace and dispatches on the selected kind.
#[derive(Debug)]
pub struct GlobalSolver {
    direct: DirectSolver,
    pcg: Pcg,
    gauss_seidel: GaussSeidel,
}

impl GlobalSolver {
    pub fn new(options: &Options) -> Self {
        GlobalSolver {
            direct: DirectSolver::new(),
            pcg: Pcg::new(options.max_cg_iters, options.min_res),
            gauss_seidel: GaussSeidel::new(options.max_gs_iters, options.min_res),
        }
    }

    /// Updates iteration limits and tolerances.
    pub fn set_options(&mut self, options: &Options) {
        self.pcg = Pcg::new(options.max_cg_iters, options.min_res);
        self.gauss_seidel
            .set_limits(options.max_gs_iters, options.min_res);
    }

    /// Solves the system using `x` as the initial guess for iterative solvers.
    ///
    /// Only the direct solver can fail, in which case `x` is left untouched.
    pub fn solve(
        &mut self,
        kind: LinearSolverKind,
        system: &System,
        x: &mut Array2<f64>,
    ) -> Result<SolveResult, Error> {
        match kind {
            LinearSolverKind::Direct => self.direct.solve(system, x),
            LinearSolverKind::ConjugateGradient => Ok(self.pcg.solve(system, x)),
            LinearSolverKind::GaussSeidel => Ok(self.gauss_seidel.solve(system, x)),
        }
    }

    pub fn num_colors(&self) -> usize {
        self.gauss_seidel.coloring().num_colors()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::matrix::Triplets;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    /// A small SPD tridiagonal vertex matrix.
    pub(crate) fn tridiagonal(n: usize) -> CsMat<f64> {
        let mut t = Triplets::new(n, n);
        for i in 0..n {
            t.push(i, i, 4.0);
            if i + 1 < n {
                t.push(i, i + 1, -1.0);
                t.push(i + 1, i, -1.0);
            }
        }
        t.to_csr()
    }

    /// Couples the x coordinate of vertex 0 with the z coordinate of the last vertex.
    pub(crate) fn coupling(n: usize) -> CsMat<f64> {
        let mut t = Triplets::new(3 * n, 3 * n);
        let (p, q) = (0, 3 * (n - 1) + 2);
        t.push(p, p, 2.0);
        t.push(q, q, 2.0);
        t.push(p, q, -2.0);
        t.push(q, p, -2.0);
        t.to_csr()
    }

    pub(crate) fn rhs(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 3), |(i, k)| (i as f64 + 1.0) * (k as f64 - 1.0) + 0.5)
    }

    #[test]
    fn apply_with_coupling() {
        let a = tridiagonal(2);
        let ktk = coupling(2);
        let b = Array2::zeros((2, 3));
        let system = System {
            a: &a,
            ktk: Some(&ktk),
            expanded: None,
            rhs: b.view(),
        };
        let x = arr2(&[[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        let mut out = Array2::zeros((2, 3));
        system.apply(x.view(), &mut out);
        assert_eq!(out, arr2(&[[4.0 + 0.0, 0.0, -1.0], [-1.0, 0.0, 4.0 + 0.0]]));
    }

    #[test]
    fn all_solvers_agree() {
        let n = 6;
        let a = tridiagonal(n);
        let ktk = coupling(n);
        let b = rhs(n);
        let options = Options {
            max_cg_iters: 200,
            max_gs_iters: 2000,
            min_res: 1e-12,
            ..Default::default()
        };
        for ktk in [None, Some(&ktk)] {
            let system = System {
                a: &a,
                ktk,
                expanded: None,
                rhs: b.view(),
            };
            let mut solver = GlobalSolver::new(&options);
            let mut solutions = Vec::new();
            for kind in [
                LinearSolverKind::Direct,
                LinearSolverKind::ConjugateGradient,
                LinearSolverKind::GaussSeidel,
            ] {
                let mut x = Array2::zeros((n, 3));
                let result = solver.solve(kind, &system, &mut x).unwrap();
                assert_eq!(result.status, Status::Success, "{:?}", kind);
                solutions.push(x);
            }
            for x in &solutions[1..] {
                for (&actual, &expected) in x.iter().zip(solutions[0].iter()) {
                    assert_relative_eq!(actual, expected, epsilon = 1e-8);
                }
            }
        }
    }
}
