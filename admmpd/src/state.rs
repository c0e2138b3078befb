//! Mutable state of a simulation.

use ndarray::Array2;
use sprs::CsMat;

use crate::assembly::{compute_masses, system_matrix, weighted_transpose};
use crate::constraint::ConstraintSet;
use crate::energy::EnergyTerms;
use crate::matrix::{diagonal, mul_dense, Triplets};
use crate::mesh::SimMesh;
use crate::{ElasticityParameters, Error, Options};

/// Positions, ADMM variables and assembled matrices of one simulated mesh.
///
/// Vertex quantities are `n x 3` arrays and reduced quantities (`z`, `u`, `dx`) are `r x 3`
/// where `r` is the number of rows in `D`.
#[derive(Clone, Debug)]
pub struct SolverData {
    pub tets: Vec<[usize; 4]>,
    /// Current vertex positions.
    pub x: Array2<f64>,
    /// Current vertex velocities.
    pub v: Array2<f64>,
    /// Positions at the beginning of the current timestep.
    pub x_start: Array2<f64>,
    /// Lumped vertex masses.
    pub m: Vec<f64>,
    /// ADMM auxiliary variable, the projected reduced coordinates.
    pub z: Array2<f64>,
    /// Scaled dual variable.
    pub u: Array2<f64>,
    /// `M x̄ / h²`.
    pub m_xbar: Array2<f64>,
    /// `D x`.
    pub dx: Array2<f64>,
    /// Right-hand side of the global step.
    pub b: Array2<f64>,
    /// Reduction matrix.
    pub d: CsMat<f64>,
    /// `DᵗW²`.
    pub dtw2: CsMat<f64>,
    /// `M/h² + DᵗW²D`.
    pub a: CsMat<f64>,
    pub constraints: ConstraintSet,
    /// Constraint stiffness before the `mult_k` multiplier.
    pub spring_k: f64,
    pub energies: EnergyTerms,
    pub params: ElasticityParameters,
    /// Rest positions, kept to restore the ADMM state.
    pub x_rest: Array2<f64>,
}

impl SolverData {
    /// Assembles all matrices for the given mesh.
    ///
    /// Every tet receives one energy of the model selected in `options`. The ADMM variables are
    /// initialized to the rest state with `z = D x_rest` and `u = 0`.
    pub fn new<M: SimMesh + ?Sized>(mesh: &M, options: &Options) -> Result<Self, Error> {
        options.validate()?;
        mesh.validate()?;

        let n = mesh.num_vertices();
        let x_rest = Array2::from_shape_fn((n, 3), |(i, k)| mesh.rest_positions()[i][k]);
        let params = ElasticityParameters::from_young_poisson(options.youngs, options.poisson);

        let mut energies = EnergyTerms::default();
        let mut d = Triplets::new(0, n);
        energies.append_tets(mesh, options.energy_model, &params, &mut d)?;
        d.set_rows(energies.num_rows());
        let d = d.to_csr();

        let m = compute_masses(mesh, options.density);
        let dtw2 = weighted_transpose(&d, &energies);
        let a = system_matrix(&m, options.timestep, &d, &energies);
        let spring_k = diagonal(&a).into_iter().fold(0.0, f64::max);

        let num_rows = energies.num_rows();
        let mut data = SolverData {
            tets: mesh.tets().to_vec(),
            x: x_rest.clone(),
            v: Array2::zeros((n, 3)),
            x_start: x_rest.clone(),
            m,
            z: Array2::zeros((num_rows, 3)),
            u: Array2::zeros((num_rows, 3)),
            m_xbar: Array2::zeros((n, 3)),
            dx: Array2::zeros((num_rows, 3)),
            b: Array2::zeros((n, 3)),
            d,
            dtw2,
            a,
            constraints: ConstraintSet::empty(n),
            spring_k,
            energies,
            params,
            x_rest,
        };
        data.reset_dual_variables();
        Ok(data)
    }

    pub fn num_vertices(&self) -> usize {
        self.x.nrows()
    }

    /// Resets the ADMM variables to `z = D x` and `u = 0` for the current positions.
    pub fn reset_dual_variables(&mut self) {
        self.dx = mul_dense(&self.d, self.x.view());
        self.z.assign(&self.dx);
        self.u.fill(0.0);
    }

    /// Restores rest positions, zero velocities and fresh ADMM variables.
    pub fn reset_to_rest(&mut self) {
        self.x.assign(&self.x_rest);
        self.x_start.assign(&self.x_rest);
        self.v.fill(0.0);
        self.reset_dual_variables();
    }

    /// Changes the material, rebuilding weights and the system matrix. `D` is unchanged so the
    /// ADMM variables remain valid.
    pub fn set_material(
        &mut self,
        params: ElasticityParameters,
        time_step: f64,
    ) -> Result<(), Error> {
        if !(params.lambda.is_finite() && params.mu > 0.0 && params.mu.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "material".to_string(),
            });
        }
        self.params = params;
        self.energies.reweight(&self.params);
        self.dtw2 = weighted_transpose(&self.d, &self.energies);
        self.a = system_matrix(&self.m, time_step, &self.d, &self.energies);
        Ok(())
    }

    /// Replaces the active constraints.
    pub fn set_constraints(&mut self, constraints: ConstraintSet) -> Result<(), Error> {
        if constraints.num_vertices() != self.num_vertices() {
            return Err(Error::SizeMismatch);
        }
        self.constraints = constraints;
        Ok(())
    }

    /// Constraint terms `k KᵗK` and `k Kᵗl` with `k = spring_k * mult_k`, or `None` when no
    /// constraints are active.
    pub fn constraint_terms(&self, mult_k: f64) -> Option<(CsMat<f64>, Array2<f64>)> {
        if self.constraints.is_empty() {
            return None;
        }
        let k = self.spring_k * mult_k;
        Some((self.constraints.normal_matrix(k), self.constraints.rhs(k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    #[test]
    fn initial_state_is_at_rest() {
        let mesh = make_box(1, TetSplit::Five);
        let data = SolverData::new(&mesh, &soft_options()).unwrap();
        assert_eq!(data.num_vertices(), 8);
        assert_eq!(data.d.rows(), 3 * 5);
        assert_eq!(data.z.dim(), (15, 3));
        // Every 3x3 block of z is the identity at rest.
        for block in 0..5 {
            for r in 0..3 {
                for c in 0..3 {
                    let expected = if r == c { 1.0 } else { 0.0 };
                    assert_relative_eq!(data.z[[3 * block + r, c]], expected, epsilon = 1e-12);
                }
            }
        }
        assert!(data.u.iter().all(|&u| u == 0.0));
        assert!(data.spring_k > 0.0);
    }

    #[test]
    fn material_change_keeps_reduction_matrix() {
        let mesh = make_two_tet_mesh();
        let options = soft_options();
        let mut data = SolverData::new(&mesh, &options).unwrap();
        let d = data.d.clone();
        let w0 = data.energies.weights.clone();
        let stiffer = ElasticityParameters::from_young_poisson(4.0 * options.youngs, options.poisson);
        data.set_material(stiffer, options.timestep).unwrap();
        assert_eq!(data.d, d);
        for (w, w0) in data.energies.weights.iter().zip(w0) {
            assert_relative_eq!(*w, 2.0 * w0, max_relative = 1e-12);
        }
    }

    #[test]
    fn constraint_size_mismatch() {
        let mut data = SolverData::new(&make_one_tet_mesh(), &soft_options()).unwrap();
        let set = ConstraintSet::builder(5).pin(4, [0.0; 3]).build().unwrap();
        assert!(matches!(
            data.set_constraints(set),
            Err(Error::SizeMismatch)
        ));
        assert!(data.constraint_terms(1.0).is_none());
    }
}
