use serde::{Deserialize, Serialize};

use crate::energy_models::EnergyModel;
use crate::Error;

/// Strategy used to solve the global linear system at every ADMM iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    /// Sparse LDLᵀ factorization, cached between solves.
    Direct,
    /// Jacobi preconditioned conjugate gradient.
    ConjugateGradient,
    /// Graph-colored Gauss-Seidel relaxation.
    GaussSeidel,
}

impl Default for LinearSolverKind {
    fn default() -> Self {
        LinearSolverKind::ConjugateGradient
    }
}

/// Simulation parameters.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Time step in seconds.
    pub timestep: f64,
    pub max_admm_iters: u32,
    pub max_cg_iters: u32,
    pub max_gs_iters: u32,
    /// Stiffness multiplier applied to the constraint stiffness.
    pub mult_k: f64,
    /// Residual threshold used by the ADMM loop and the iterative linear solvers.
    pub min_res: f64,
    /// Young's modulus. Measured in Pa = N/m² = kg/(ms²).
    pub youngs: f64,
    /// Poisson ratio.
    pub poisson: f64,
    /// Mass density in kg/m³.
    pub density: f64,
    pub grav: [f64; 3],
    pub linear_solver: LinearSolverKind,
    pub energy_model: EnergyModel,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            timestep: 1.0 / 24.0,
            max_admm_iters: 50,
            max_cg_iters: 10,
            max_gs_iters: 30,
            mult_k: 1.0,
            min_res: 1e-6,
            youngs: 1e6,
            poisson: 0.299,
            density: 1100.0,
            grav: [0.0, 0.0, -9.8],
            linear_solver: LinearSolverKind::default(),
            energy_model: EnergyModel::default(),
        }
    }
}

impl Options {
    /// Checks that all parameters are in their admissible ranges.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |name: &str| {
            Err(Error::InvalidParameter {
                name: name.to_string(),
            })
        };

        if !(self.timestep > 0.0 && self.timestep.is_finite()) {
            return invalid("timestep");
        }
        if !(self.mult_k >= 0.0 && self.mult_k.is_finite()) {
            return invalid("mult_k");
        }
        if !(self.min_res > 0.0) {
            return invalid("min_res");
        }
        if !(self.youngs > 0.0 && self.youngs.is_finite()) {
            return invalid("youngs");
        }
        if !(0.0..0.5).contains(&self.poisson) {
            return invalid("poisson");
        }
        if !(self.density > 0.0 && self.density.is_finite()) {
            return invalid("density");
        }
        if self.grav.iter().any(|g| !g.is_finite()) {
            return invalid("grav");
        }
        self.energy_model.validate()
    }

    pub fn with_linear_solver(self, linear_solver: LinearSolverKind) -> Options {
        Options {
            linear_solver,
            ..self
        }
    }

    pub fn with_energy_model(self, energy_model: EnergyModel) -> Options {
        Options {
            energy_model,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn invalid_parameters() {
        let check = |opts: Options, expected: &str| match opts.validate() {
            Err(Error::InvalidParameter { name }) => assert_eq!(name, expected),
            other => panic!("expected invalid {}, got {:?}", expected, other),
        };

        let opts = Options::default();
        check(Options { timestep: 0.0, ..opts }, "timestep");
        check(Options { youngs: -1.0, ..opts }, "youngs");
        check(Options { poisson: 0.5, ..opts }, "poisson");
        check(Options { min_res: 0.0, ..opts }, "min_res");
        check(Options { mult_k: -1.0, ..opts }, "mult_k");
        check(Options { density: 0.0, ..opts }, "density");
        check(
            Options {
                energy_model: EnergyModel::StrainLimit { min: 1.2, max: 0.8 },
                ..opts
            },
            "energy_model",
        );
    }

    #[test]
    fn partial_config_uses_defaults() {
        let opts: Options =
            ron::from_str("(timestep: 0.01, max_admm_iters: 5, linear_solver: Direct)").unwrap();
        assert_eq!(opts.timestep, 0.01);
        assert_eq!(opts.max_admm_iters, 5);
        assert_eq!(opts.linear_solver, LinearSolverKind::Direct);
        assert_eq!(opts.max_cg_iters, Options::default().max_cg_iters);
        assert_eq!(opts.grav, [0.0, 0.0, -9.8]);
        assert!(opts.validate().is_ok());
    }
}
