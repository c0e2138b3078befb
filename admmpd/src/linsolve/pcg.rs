use ndarray::{Array2, Zip};

use super::{SolveResult, Status, System};
use crate::matrix::frobenius_norm;

/// Jacobi preconditioned conjugate gradient.
///
/// Works directly on `n x 3` arrays with the Frobenius inner product, so the unconstrained
/// system is solved for all three coordinates at once.
/// https://en.wikipedia.org/wiki/Conjugate_gradient_method#The_preconditioned_conjugate_gradient_method
#[derive(Clone, Debug)]
pub struct Pcg {
    max_iter: u32,
    tol: f64,
    r: Array2<f64>,
    z: Array2<f64>,
    p: Array2<f64>,
    ap: Array2<f64>,
    inv_diag: Array2<f64>,
}

impl Pcg {
    pub fn new(max_iter: u32, tol: f64) -> Self {
        let empty = || Array2::zeros((0, 3));
        Pcg {
            max_iter,
            tol: f64::EPSILON.max(tol),
            r: empty(),
            z: empty(),
            p: empty(),
            ap: empty(),
            inv_diag: empty(),
        }
    }

    fn resize(&mut self, n: usize) {
        if self.r.nrows() != n {
            self.r = Array2::zeros((n, 3));
            self.z = Array2::zeros((n, 3));
            self.p = Array2::zeros((n, 3));
            self.ap = Array2::zeros((n, 3));
            self.inv_diag = Array2::zeros((n, 3));
        }
    }

    /// Inverse of the diagonal of `A ⊗ I₃ + KᵗK`.
    fn update_preconditioner(&mut self, system: &System) {
        for (i, mut row) in self.inv_diag.outer_iter_mut().enumerate() {
            let a_ii = system.a.get(i, i).cloned().unwrap_or(0.0);
            for k in 0..3 {
                let ktk_ii = system
                    .ktk
                    .and_then(|ktk| ktk.get(3 * i + k, 3 * i + k).cloned())
                    .unwrap_or(0.0);
                let d = a_ii + ktk_ii;
                row[k] = if d > 0.0 { 1.0 / d } else { 1.0 };
            }
        }
    }

    /// Solves the system starting from the initial guess in `x`.
    ///
    /// Stops when the residual norm drops below `tol * max(|rhs|, 1)` or after `max_iter`
    /// iterations, in which case the last iterate is kept in `x`.
    pub fn solve(&mut self, system: &System, x: &mut Array2<f64>) -> SolveResult {
        self.resize(system.num_vertices());
        self.update_preconditioner(system);

        let Pcg {
            max_iter,
            tol,
            ref mut r,
            ref mut z,
            ref mut p,
            ref mut ap,
            ref inv_diag,
        } = *self;

        let tol = system.absolute_tolerance(tol);

        // r0 = b - A x0
        let mut r_norm = system.residual_norm(x.view(), r);
        if r_norm <= tol {
            return SolveResult {
                iterations: 0,
                residual: r_norm,
                status: Status::Success,
            };
        }
        if max_iter == 0 {
            return SolveResult {
                iterations: 0,
                residual: r_norm,
                status: Status::MaximumIterationsExceeded,
            };
        }

        // p0 = z0 = M⁻¹ r0
        Zip::from(&mut *z)
            .and(&*inv_diag)
            .and(&*r)
            .for_each(|z, &d, &r| *z = d * r);
        p.assign(&*z);
        let mut rz = dot(r, z);

        let mut iterations = 0;
        loop {
            system.apply(p.view(), ap);
            let pap = dot(p, ap);
            if !pap.is_finite() {
                return SolveResult {
                    iterations,
                    residual: r_norm,
                    status: Status::NanDetected,
                };
            }
            if pap <= 0.0 {
                // Search direction vanished; nothing more can be gained.
                break;
            }

            let alpha = rz / pap;
            x.scaled_add(alpha, &*p);
            r.scaled_add(-alpha, &*ap);
            iterations += 1;

            r_norm = frobenius_norm(r.view());
            log::trace!("CG iteration {}: residual {:.3e}", iterations, r_norm);
            if r_norm.is_nan() {
                return SolveResult {
                    iterations,
                    residual: r_norm,
                    status: Status::NanDetected,
                };
            }
            if r_norm <= tol {
                return SolveResult {
                    iterations,
                    residual: r_norm,
                    status: Status::Success,
                };
            }
            if iterations >= max_iter {
                break;
            }

            Zip::from(&mut *z)
                .and(&*inv_diag)
                .and(&*r)
                .for_each(|z, &d, &r| *z = d * r);
            let rz_new = dot(r, z);
            let beta = rz_new / rz;
            rz = rz_new;

            // p = z + βp
            Zip::from(&mut *p)
                .and(&*z)
                .for_each(|p, &z| *p = z + beta * *p);
        }

        SolveResult {
            iterations,
            residual: r_norm,
            status: if r_norm <= tol {
                Status::Success
            } else {
                Status::MaximumIterationsExceeded
            },
        }
    }
}

fn dot(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(a, b)| a * b).sum()
}

#[cfg(test)]
mod tests {
    use super::super::tests::{coupling, rhs, tridiagonal};
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pcg_simple() {
        // A symmetric positive definite 2x2 system with solution (1, 2) in every column.
        let mut t = crate::matrix::Triplets::new(2, 2);
        t.push(0, 0, 4.0);
        t.push(0, 1, 1.0);
        t.push(1, 0, 1.0);
        t.push(1, 1, 3.0);
        let a = t.to_csr();
        let b = ndarray::arr2(&[[6.0, 6.0, 6.0], [7.0, 7.0, 7.0]]);
        let system = System {
            a: &a,
            ktk: None,
            expanded: None,
            rhs: b.view(),
        };
        let mut x = Array2::zeros((2, 3));
        let result = Pcg::new(10, 1e-12).solve(&system, &mut x);
        assert_eq!(result.status, Status::Success);
        assert!(result.iterations <= 2);
        for k in 0..3 {
            assert_relative_eq!(x[[0, k]], 1.0, epsilon = 1e-10);
            assert_relative_eq!(x[[1, k]], 2.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn zero_iterations_keep_the_initial_guess() {
        let a = tridiagonal(5);
        let b = rhs(5);
        let system = System {
            a: &a,
            ktk: None,
            expanded: None,
            rhs: b.view(),
        };
        let mut x = Array2::from_elem((5, 3), 0.25);
        let result = Pcg::new(0, 1e-10).solve(&system, &mut x);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.status, Status::MaximumIterationsExceeded);
        assert!(x.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn iteration_cap_is_reported() {
        let a = tridiagonal(8);
        let ktk = coupling(8);
        let b = rhs(8);
        let system = System {
            a: &a,
            ktk: Some(&ktk),
            expanded: None,
            rhs: b.view(),
        };
        let mut x = Array2::zeros((8, 3));
        let result = Pcg::new(1, 1e-14).solve(&system, &mut x);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.status, Status::MaximumIterationsExceeded);
        assert!(x.iter().any(|&v| v != 0.0));
    }
}
