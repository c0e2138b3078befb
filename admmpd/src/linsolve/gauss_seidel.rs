use na::{Matrix3, Vector3};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use super::{SolveResult, Status, System};
use crate::coloring::Coloring;
use crate::inf_norm;
use crate::matrix::SparsityPattern;

/// Block Gauss-Seidel over vertices with a graph coloring for parallelism.
///
/// Each sweep visits the colors in order. Within a color all vertices are independent, so their
/// 3x3 block updates are computed in parallel and written back before moving to the next color.
#[derive(Clone, Debug)]
pub struct GaussSeidel {
    max_iter: u32,
    tol: f64,
    coloring: Coloring,
    /// Patterns of `A` and `KᵗK` the coloring was computed for.
    pattern: Option<(SparsityPattern, Option<SparsityPattern>)>,
    scratch: Array2<f64>,
}

impl GaussSeidel {
    pub fn new(max_iter: u32, tol: f64) -> Self {
        GaussSeidel {
            max_iter,
            tol,
            coloring: Coloring::default(),
            pattern: None,
            scratch: Array2::zeros((0, 3)),
        }
    }

    pub fn set_limits(&mut self, max_iter: u32, tol: f64) {
        self.max_iter = max_iter;
        self.tol = tol;
    }

    pub fn coloring(&self) -> &Coloring {
        &self.coloring
    }

    /// Recolors the vertex graph if the sparsity of the system changed.
    fn update_coloring(&mut self, system: &System) {
        let unchanged = match (&self.pattern, system.ktk) {
            (Some((a, None)), None) => a.matches(system.a),
            (Some((a, Some(ktk_pattern))), Some(ktk)) => {
                a.matches(system.a) && ktk_pattern.matches(ktk)
            }
            _ => false,
        };
        if !unchanged {
            let pattern = (
                SparsityPattern::of(system.a),
                system.ktk.map(SparsityPattern::of),
            );
            self.coloring = Coloring::of_system(system.a, system.ktk);
            log::debug!(
                "Colored {} vertices with {} colors",
                system.num_vertices(),
                self.coloring.num_colors()
            );
            self.pattern = Some(pattern);
        }
    }

    /// Relaxes `x` until the largest vertex update falls below the tolerance or the iteration
    /// limit is reached.
    pub fn solve(&mut self, system: &System, x: &mut Array2<f64>) -> SolveResult {
        self.update_coloring(system);
        let n = system.num_vertices();
        if self.scratch.nrows() != n {
            self.scratch = Array2::zeros((n, 3));
        }

        let mut iterations = 0;
        let mut converged = false;
        // Vertices with an indefinite diagonal block in the last sweep. These are never updated.
        let mut num_skipped = 0;
        while iterations < self.max_iter {
            let mut max_change: f64 = 0.0;
            num_skipped = 0;
            for color in &self.coloring.colors {
                let x_view = x.view();
                let updates: Vec<(usize, Option<Vector3<f64>>)> = color
                    .par_iter()
                    .map(|&v| (v, relax_vertex(system, x_view, v)))
                    .collect();
                for (v, xv) in updates {
                    let xv = match xv {
                        Some(xv) => xv,
                        None => {
                            num_skipped += 1;
                            continue;
                        }
                    };
                    if xv.iter().any(|c| !c.is_finite()) {
                        return SolveResult {
                            iterations: iterations + 1,
                            residual: f64::NAN,
                            status: Status::NanDetected,
                        };
                    }
                    let change = inf_norm((0..3).map(|k| xv[k] - x[[v, k]]));
                    max_change = max_change.max(change);
                    for k in 0..3 {
                        x[[v, k]] = xv[k];
                    }
                }
            }
            iterations += 1;
            log::trace!("GS iteration {}: max change {:.3e}", iterations, max_change);
            if max_change < self.tol {
                converged = true;
                break;
            }
        }

        let residual = system.residual_norm(x.view(), &mut self.scratch);
        if num_skipped > 0 {
            log::warn!(
                "Gauss-Seidel skipped {} vertices with indefinite diagonal blocks",
                num_skipped
            );
            return SolveResult {
                iterations,
                residual,
                status: Status::MaximumIterationsExceeded,
            };
        }
        let status = if converged || residual <= system.absolute_tolerance(self.tol) {
            Status::Success
        } else {
            Status::MaximumIterationsExceeded
        };
        SolveResult {
            iterations,
            residual,
            status,
        }
    }
}

/// Solves the 3x3 diagonal block of vertex `v` against the current values of its neighbours.
///
/// Returns `None` if the block is not positive definite.
fn relax_vertex(system: &System, x: ArrayView2<f64>, v: usize) -> Option<Vector3<f64>> {
    let mut block = Matrix3::zeros();
    let mut rhs = Vector3::new(system.rhs[[v, 0]], system.rhs[[v, 1]], system.rhs[[v, 2]]);

    let row = system.a.outer_view(v)?;
    for (j, &a_vj) in row.iter() {
        if j == v {
            for k in 0..3 {
                block[(k, k)] += a_vj;
            }
        } else {
            for k in 0..3 {
                rhs[k] -= a_vj * x[[j, k]];
            }
        }
    }

    if let Some(ktk) = system.ktk {
        for k in 0..3 {
            if let Some(row) = ktk.outer_view(3 * v + k) {
                for (q, &val) in row.iter() {
                    if q / 3 == v {
                        block[(k, q % 3)] += val;
                    } else {
                        rhs[k] -= val * x[[q / 3, q % 3]];
                    }
                }
            }
        }
    }

    block.cholesky().map(|chol| chol.solve(&rhs))
}
