//! The ADMM time stepper.
//!
//! Each step alternates a global linear solve for the vertex positions with a local,
//! per-element projection of the reduced coordinates onto the admissible set of each energy,
//! followed by a dual update. The loop stops once both primal and dual residuals fall below
//! `min_res` or after `max_admm_iters` iterations.

use na::Matrix3;
use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;

use crate::assembly::inertial_rhs;
use crate::constraint::ConstraintSet;
use crate::energy::EnergyTerms;
use crate::energy_models::{ElementEnergy, Projection};
use crate::linsolve::{self, GlobalSolver, System};
use crate::matrix::{frobenius_norm, mul_dense_into};
use crate::mesh::{Embedding, SimMesh};
use crate::state::SolverData;
use crate::{ElasticityParameters, Error, LinearSolverKind, Options};

/// Diagnostics of a single timestep.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SolveResult {
    /// Number of ADMM iterations performed.
    pub iterations: u32,
    /// Larger of the final primal and dual residuals.
    pub residual: f64,
    /// `‖Dx - z‖` after the last iteration.
    pub primal_residual: f64,
    /// `‖A (xₖ - xₖ₋₁)‖ / max(‖b‖, 1)` after the last iteration.
    pub dual_residual: f64,
    pub converged: bool,
    /// Elements found inverted during the last local step.
    pub inverted_elements: usize,
    /// Total linear solver iterations over all ADMM iterations.
    pub linear_iterations: u32,
    /// Status of the last linear solve.
    pub linear_status: linsolve::Status,
    /// The direct solver failed and conjugate gradient was used instead.
    pub direct_fallback: bool,
    /// Primal and dual residuals of every iteration.
    pub residual_history: Vec<(f64, f64)>,
}

impl std::fmt::Display for SolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Iterations: {}\nResidual: {:.3e} (primal: {:.3e}, dual: {:.3e})\nConverged: {}\n\
             Inverted elements: {}\nLinear iterations: {}\nLinear status: {}",
            self.iterations,
            self.residual,
            self.primal_residual,
            self.dual_residual,
            self.converged,
            self.inverted_elements,
            self.linear_iterations,
            self.linear_status
        )?;
        if self.direct_fallback {
            write!(f, "\nDirect solver failed, used conjugate gradient")?;
        }
        Ok(())
    }
}

/// Owned copy of a barycentric embedding.
#[derive(Clone, Debug)]
struct EmbeddingBuf {
    x_rest: Vec<[f64; 3]>,
    vtx_to_tet: Vec<usize>,
    barys: Vec<[f64; 4]>,
}

impl EmbeddingBuf {
    fn view(&self) -> Embedding<'_> {
        Embedding {
            x_rest: &self.x_rest,
            vtx_to_tet: &self.vtx_to_tet,
            barys: &self.barys,
        }
    }
}

/// Simulates a single tetrahedral mesh, possibly driving an embedded mesh.
#[derive(Debug)]
pub struct Solver {
    options: Options,
    data: SolverData,
    global: GlobalSolver,
    embedding: Option<EmbeddingBuf>,
    /// Scratch for `x - x_prev` and its product with `A`.
    dx_iter: Array2<f64>,
    a_dx_iter: Array2<f64>,
}

impl Solver {
    /// Validates the inputs and assembles all matrices.
    pub fn new<M: SimMesh + ?Sized>(mesh: &M, options: Options) -> Result<Solver, Error> {
        let data = SolverData::new(mesh, &options)?;
        let embedding = mesh.embedding().map(|e| EmbeddingBuf {
            x_rest: e.x_rest.to_vec(),
            vtx_to_tet: e.vtx_to_tet.to_vec(),
            barys: e.barys.to_vec(),
        });

        log::info!(
            "Created solver with {} vertices, {} tets ({} rows in D, {} nonzeros in A), {:?} linear solver",
            data.num_vertices(),
            data.tets.len(),
            data.d.rows(),
            data.a.nnz(),
            options.linear_solver
        );
        if let Some(embedding) = embedding.as_ref() {
            log::info!("Driving {} embedded vertices", embedding.vtx_to_tet.len());
        }

        let n = data.num_vertices();
        Ok(Solver {
            global: GlobalSolver::new(&options),
            options,
            data,
            embedding,
            dx_iter: Array2::zeros((n, 3)),
            a_dx_iter: Array2::zeros((n, 3)),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn data(&self) -> &SolverData {
        &self.data
    }

    /// Current vertex positions.
    pub fn positions(&self) -> ArrayView2<f64> {
        self.data.x.view()
    }

    /// Current vertex velocities.
    pub fn velocities(&self) -> ArrayView2<f64> {
        self.data.v.view()
    }

    pub fn masses(&self) -> &[f64] {
        &self.data.m
    }

    /// Positions of the embedded vertices, if this solver drives an embedded mesh.
    pub fn embedded_positions(&self) -> Option<Vec<[f64; 3]>> {
        self.embedding
            .as_ref()
            .map(|e| e.view().positions(&self.data.tets, self.data.x.view()))
    }

    /// Number of colors used by the Gauss-Seidel solver in its last solve.
    pub fn num_colors(&self) -> usize {
        self.global.num_colors()
    }

    pub fn set_linear_solver(&mut self, kind: LinearSolverKind) {
        self.options.linear_solver = kind;
    }

    /// Changes the iteration caps of the ADMM loop and the iterative linear solvers.
    pub fn set_iteration_limits(
        &mut self,
        max_admm_iters: u32,
        max_cg_iters: u32,
        max_gs_iters: u32,
    ) {
        self.options.max_admm_iters = max_admm_iters;
        self.options.max_cg_iters = max_cg_iters;
        self.options.max_gs_iters = max_gs_iters;
        self.global.set_options(&self.options);
    }

    pub fn set_velocities(&mut self, v: ArrayView2<f64>) -> Result<(), Error> {
        if v.dim() != self.data.v.dim() {
            return Err(Error::SizeMismatch);
        }
        self.data.v.assign(&v);
        Ok(())
    }

    /// Sets the constraints used by subsequent steps.
    pub fn set_constraints(&mut self, constraints: ConstraintSet) -> Result<(), Error> {
        log::debug!(
            "Updating constraint set with {} constraints",
            constraints.num_constraints()
        );
        self.data.set_constraints(constraints)
    }

    pub fn clear_constraints(&mut self) {
        self.data.constraints = ConstraintSet::empty(self.data.num_vertices());
    }

    /// Sets the constraint stiffness. The effective stiffness is further scaled by `mult_k`.
    pub fn set_constraint_stiffness(&mut self, spring_k: f64) -> Result<(), Error> {
        if !(spring_k >= 0.0 && spring_k.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "spring_k".to_string(),
            });
        }
        self.data.spring_k = spring_k;
        Ok(())
    }

    /// Changes the material, rebuilding the system matrix but keeping the ADMM state.
    pub fn set_material(&mut self, youngs: f64, poisson: f64) -> Result<(), Error> {
        let options = Options {
            youngs,
            poisson,
            ..self.options
        };
        options.validate()?;
        let params = ElasticityParameters::from_young_poisson(youngs, poisson);
        self.data.set_material(params, options.timestep)?;
        self.options = options;
        Ok(())
    }

    /// Resets `z` and `u` to match the current positions.
    pub fn reset_admm_state(&mut self) {
        self.data.reset_dual_variables();
    }

    /// Restores the rest configuration with zero velocity.
    pub fn reset_to_rest(&mut self) {
        self.data.reset_to_rest();
    }

    /// Advances the simulation by one timestep.
    ///
    /// Running out of iterations is not an error; it is reported in the result.
    pub fn step(&mut self) -> Result<SolveResult, Error> {
        let Solver {
            options,
            ref mut data,
            ref mut global,
            ref mut dx_iter,
            ref mut a_dx_iter,
            ..
        } = *self;

        if data.constraints.num_vertices() != data.num_vertices() {
            return Err(Error::SizeMismatch);
        }

        let dt = options.timestep;
        data.x_start.assign(&data.x);
        data.m_xbar = inertial_rhs(&data.m, dt, data.x.view(), data.v.view(), options.grav);
        let constraint_terms = data.constraint_terms(options.mult_k);

        let mut result = SolveResult::default();
        if options.max_admm_iters == 0 {
            return Ok(result);
        }

        // Factored by the direct solver when constraints couple the axes.
        let expanded = match (&constraint_terms, options.linear_solver) {
            (Some((ktk, _)), LinearSolverKind::Direct) => Some(linsolve::expand(&data.a, ktk)),
            _ => None,
        };

        for iter in 0..options.max_admm_iters {
            // b = M x̄ / h² + DᵗW²(z - u) [+ k Kᵗl]
            let z_minus_u = &data.z - &data.u;
            mul_dense_into(&data.dtw2, z_minus_u.view(), &mut data.b);
            data.b += &data.m_xbar;
            if let Some((_, ktl)) = constraint_terms.as_ref() {
                data.b += ktl;
            }

            // Global step.
            dx_iter.assign(&data.x);
            let system = System {
                a: &data.a,
                ktk: constraint_terms.as_ref().map(|(ktk, _)| ktk),
                expanded: expanded.as_ref(),
                rhs: data.b.view(),
            };
            let kind = options.linear_solver;
            let linear = match global.solve(kind, &system, &mut data.x) {
                Ok(linear) => linear,
                Err(err) if kind == LinearSolverKind::Direct => {
                    log::warn!(
                        "Direct solve failed ({}); using conjugate gradient for this iteration",
                        err
                    );
                    result.direct_fallback = true;
                    global.solve(LinearSolverKind::ConjugateGradient, &system, &mut data.x)?
                }
                Err(err) => return Err(err),
            };
            result.linear_iterations += linear.iterations;
            result.linear_status = linear.status;
            if linear.status == linsolve::Status::NanDetected {
                log::warn!("NaN detected in the global step; keeping the previous iterate");
                data.x.assign(&*dx_iter);
                result.iterations = iter + 1;
                break;
            }

            // Dual residual: ‖A (xₖ - xₖ₋₁)‖ / max(‖b‖, 1)
            Zip::from(&mut *dx_iter)
                .and(&data.x)
                .for_each(|d, &x| *d = x - *d);
            mul_dense_into(&data.a, dx_iter.view(), a_dx_iter);
            let dual = frobenius_norm(a_dx_iter.view()) / frobenius_norm(data.b.view()).max(1.0);

            // Local step.
            mul_dense_into(&data.d, data.x.view(), &mut data.dx);
            let inverted = project(&data.energies, &data.dx, &data.u, &mut data.z);

            // Dual update, u += Dx - z.
            let mut primal_sq = 0.0;
            Zip::from(&mut data.u)
                .and(&data.dx)
                .and(&data.z)
                .for_each(|u, &dx, &z| {
                    let r = dx - z;
                    primal_sq += r * r;
                    *u += r;
                });
            let primal = f64::sqrt(primal_sq);

            result.iterations = iter + 1;
            result.primal_residual = primal;
            result.dual_residual = dual;
            result.residual = primal.max(dual);
            result.inverted_elements = inverted;
            result.residual_history.push((primal, dual));

            log::debug!(
                "ADMM iteration {}: primal {:.3e}, dual {:.3e}, {} linear iterations ({})",
                iter + 1,
                primal,
                dual,
                linear.iterations,
                linear.status
            );

            if primal < options.min_res && dual < options.min_res {
                result.converged = true;
                break;
            }
        }

        if result.inverted_elements > 0 {
            log::warn!("{} inverted elements", result.inverted_elements);
        }
        if !result.converged {
            log::warn!(
                "ADMM did not converge in {} iterations (residual {:.3e})",
                result.iterations,
                result.residual
            );
        }

        // v = (x - x_start) / h
        Zip::from(&mut data.v)
            .and(&data.x)
            .and(&data.x_start)
            .for_each(|v, &x, &x0| *v = (x - x0) / dt);

        Ok(result)
    }
}

/// Projects `Dx + u` of every energy onto its admissible set, writing the result into `z`.
///
/// Returns the number of inverted elements.
fn project(
    energies: &EnergyTerms,
    dx: &Array2<f64>,
    u: &Array2<f64>,
    z: &mut Array2<f64>,
) -> usize {
    let projections: Vec<Projection> = energies
        .indices
        .par_iter()
        .zip(energies.models.par_iter())
        .map(|(&[row, _], model)| {
            let f = Matrix3::from_fn(|r, c| dx[[row + r, c]] + u[[row + r, c]]);
            model.project(&f)
        })
        .collect();

    let mut inverted = 0;
    for (&[row, num_rows], p) in energies.indices.iter().zip(projections.iter()) {
        for r in 0..num_rows {
            for c in 0..3 {
                z[[row + r, c]] = p.z[(r, c)];
            }
        }
        inverted += p.inverted as usize;
    }
    inverted
}
