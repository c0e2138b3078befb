use std::borrow::Cow;

use ndarray::{Array2, Axis};
use sprs::{CsMat, FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};

use super::{SolveResult, Status, System};
use crate::matrix::{flatten, kron_identity3, unflatten_into, SparsityPattern, Triplets};
use crate::Error;

/// Numeric factorization along with the matrix it was computed from.
struct CachedFactor {
    ldl: LdlNumeric<f64, usize>,
    pattern: SparsityPattern,
    values: Vec<f64>,
}

/// Sparse LDLᵀ solver.
///
/// Without constraints the `n x n` vertex matrix is factored and reused for all three columns.
/// With constraints the expanded `3n x 3n` system is factored instead. The factorization is
/// kept between solves and only recomputed when the matrix changes.
#[derive(Default)]
pub struct DirectSolver {
    factor: Option<CachedFactor>,
    /// Number of numeric factorizations performed, symbolic or not.
    num_factorizations: usize,
}

impl std::fmt::Debug for DirectSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSolver")
            .field("factored", &self.factor.is_some())
            .field("num_factorizations", &self.num_factorizations)
            .finish()
    }
}

impl DirectSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_factored(&self) -> bool {
        self.factor.is_some()
    }

    pub fn num_factorizations(&self) -> usize {
        self.num_factorizations
    }

    /// Solves the system, refactoring if the system matrix changed since the last call.
    ///
    /// On failure the cache is cleared and `x` is left untouched.
    pub fn solve(&mut self, system: &System, x: &mut Array2<f64>) -> Result<SolveResult, Error> {
        let mat = match (system.ktk, system.expanded) {
            (None, _) => Cow::Borrowed(system.a),
            (Some(_), Some(expanded)) => Cow::Borrowed(expanded),
            (Some(ktk), None) => Cow::Owned(expand(system.a, ktk)),
        };

        if let Err(err) = self.factor(&mat) {
            self.factor = None;
            return Err(err);
        }
        let ldl = match self.factor.as_ref() {
            Some(cached) => &cached.ldl,
            None => {
                return Err(Error::FactorizationFailed {
                    reason: "missing factorization".to_string(),
                })
            }
        };

        if system.ktk.is_none() {
            for (mut x_col, b_col) in x
                .axis_iter_mut(Axis(1))
                .zip(system.rhs.axis_iter(Axis(1)))
            {
                let sol = ldl.solve(&b_col.to_vec()[..]);
                for (dst, src) in x_col.iter_mut().zip(sol) {
                    *dst = src;
                }
            }
        } else {
            let sol = ldl.solve(&flatten(system.rhs)[..]);
            unflatten_into(&sol, x);
        }

        let mut scratch = Array2::zeros(x.raw_dim());
        let residual = system.residual_norm(x.view(), &mut scratch);
        let status = if residual.is_finite() {
            Status::Success
        } else {
            Status::NanDetected
        };
        Ok(SolveResult {
            iterations: 0,
            residual,
            status,
        })
    }

    /// Brings the cached factorization up to date with `mat`.
    fn factor(&mut self, mat: &CsMat<f64>) -> Result<(), Error> {
        let same_pattern = matches!(&self.factor, Some(cached) if cached.pattern.matches(mat));
        if !same_pattern {
            log::debug!(
                "Symbolic and numeric factorization of a {:?} system with {} nonzeros",
                mat.shape(),
                mat.nnz()
            );
            let ldl = Ldl::new()
                .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
                .check_symmetry(SymmetryCheck::DontCheckSymmetry)
                .numeric(mat.view())?;
            check_pivots(&ldl)?;
            self.factor = Some(CachedFactor {
                ldl,
                pattern: SparsityPattern::of(mat),
                values: mat.data().to_vec(),
            });
        } else if let Some(cached) = self.factor.as_mut() {
            if cached.values.as_slice() == mat.data() {
                return Ok(());
            }
            log::debug!("Numeric refactorization of a {:?} system", mat.shape());
            cached.ldl.update(mat.view())?;
            check_pivots(&cached.ldl)?;
            cached.values = mat.data().to_vec();
        }
        self.num_factorizations += 1;
        Ok(())
    }
}

/// The system is symmetric positive definite iff all pivots are positive.
fn check_pivots(ldl: &LdlNumeric<f64, usize>) -> Result<(), Error> {
    match ldl.d().iter().position(|&d| !(d > 0.0)) {
        Some(pivot) => Err(Error::NotPositiveDefinite { pivot }),
        None => Ok(()),
    }
}

/// Builds `A ⊗ I₃ + KᵗK`.
pub fn expand(a: &CsMat<f64>, ktk: &CsMat<f64>) -> CsMat<f64> {
    let n = 3 * a.rows();
    let mut t = Triplets::new(n, n);
    kron_identity3(a, &mut t);
    for (p, row) in ktk.outer_iterator().enumerate() {
        for (q, &v) in row.iter() {
            t.push(p, q, v);
        }
    }
    t.to_csr()
}

#[cfg(test)]
mod tests {
    use super::super::tests::{coupling, rhs, tridiagonal};
    use super::*;

    #[test]
    fn factorization_is_cached() {
        let a = tridiagonal(4);
        let b = rhs(4);
        let mut solver = DirectSolver::new();
        let mut x = Array2::zeros((4, 3));
        let system = System {
            a: &a,
            ktk: None,
            expanded: None,
            rhs: b.view(),
        };
        solver.solve(&system, &mut x).unwrap();
        assert!(solver.is_factored());
        solver.solve(&system, &mut x).unwrap();
        assert_eq!(solver.num_factorizations(), 1);

        // Same pattern, new values.
        let a2 = a.map(|&v| 2.0 * v);
        let system = System {
            a: &a2,
            ktk: None,
            expanded: None,
            rhs: b.view(),
        };
        let mut x2 = Array2::zeros((4, 3));
        let result = solver.solve(&system, &mut x2).unwrap();
        assert_eq!(solver.num_factorizations(), 2);
        assert!(result.residual < 1e-10);
        for (&x2, &x) in x2.iter().zip(x.iter()) {
            approx::assert_relative_eq!(2.0 * x2, x, epsilon = 1e-12);
        }

        // New pattern.
        let ktk = coupling(4);
        let system = System {
            a: &a2,
            ktk: Some(&ktk),
            expanded: None,
            rhs: b.view(),
        };
        let result = solver.solve(&system, &mut x2).unwrap();
        assert_eq!(solver.num_factorizations(), 3);
        assert!(result.residual < 1e-10);

        // A prebuilt expanded matrix reuses the factorization.
        let expanded = expand(&a2, &ktk);
        let system = System {
            expanded: Some(&expanded),
            ..system
        };
        let mut x3 = Array2::zeros((4, 3));
        solver.solve(&system, &mut x3).unwrap();
        assert_eq!(solver.num_factorizations(), 3);
        assert_eq!(x3, x2);
    }

    #[test]
    fn indefinite_matrix_is_rejected() {
        let mut t = Triplets::new(2, 2);
        t.push(0, 0, 1.0);
        t.push(0, 1, 2.0);
        t.push(1, 0, 2.0);
        t.push(1, 1, 1.0);
        let a = t.to_csr();
        let b = Array2::ones((2, 3));
        let system = System {
            a: &a,
            ktk: None,
            expanded: None,
            rhs: b.view(),
        };
        let mut x = Array2::zeros((2, 3));
        let mut solver = DirectSolver::new();
        let result = solver.solve(&system, &mut x);
        assert!(matches!(result, Err(Error::NotPositiveDefinite { .. })));
        assert!(!solver.is_factored());
        assert!(x.iter().all(|&v| v == 0.0));
    }
}
