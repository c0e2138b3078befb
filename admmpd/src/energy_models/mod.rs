//! Closed form proximal projections for per-element energies.
//!
//! Each model maps the reduced coordinates of one element (a 3x3 block of `Dx + u`, which is the
//! transposed deformation gradient) onto the nearest point of its admissible set. All models
//! here are functions of the singular values only, so they commute with the transpose.

mod arap;
mod strain_limit;
mod volume;

pub use arap::*;
pub use strain_limit::*;
pub use volume::*;

use na::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{ElasticityParameters, Error};

/// Result of projecting a single element.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Projection {
    pub z: Matrix3<f64>,
    /// The projected quantity had a negative determinant.
    pub inverted: bool,
}

/// A per-element energy with a closed form projection.
pub trait ElementEnergy {
    /// Stiffness used to weigh this energy. The element weight is `sqrt(stiffness * volume)`.
    fn stiffness(&self, params: &ElasticityParameters) -> f64 {
        params.bulk_modulus()
    }

    /// Projects `f` onto the admissible set of this energy.
    fn project(&self, f: &Matrix3<f64>) -> Projection;
}

/// Energy model selection.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EnergyModel {
    /// As-rigid-as-possible: the nearest rotation.
    Arap,
    /// Singular values clamped to `[min, max]`.
    StrainLimit { min: f64, max: f64 },
    /// Nearest deformation with unit volume ratio.
    VolumePreserving,
}

impl Default for EnergyModel {
    fn default() -> Self {
        EnergyModel::Arap
    }
}

impl EnergyModel {
    pub fn validate(&self) -> Result<(), Error> {
        match *self {
            EnergyModel::StrainLimit { min, max }
                if !(min >= 0.0 && min <= 1.0 && max >= 1.0 && max.is_finite()) =>
            {
                Err(Error::InvalidParameter {
                    name: "energy_model".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl ElementEnergy for EnergyModel {
    fn stiffness(&self, params: &ElasticityParameters) -> f64 {
        match *self {
            EnergyModel::Arap => Arap.stiffness(params),
            EnergyModel::StrainLimit { min, max } => StrainLimit { min, max }.stiffness(params),
            EnergyModel::VolumePreserving => VolumePreserving.stiffness(params),
        }
    }

    fn project(&self, f: &Matrix3<f64>) -> Projection {
        match *self {
            EnergyModel::Arap => Arap.project(f),
            EnergyModel::StrainLimit { min, max } => StrainLimit { min, max }.project(f),
            EnergyModel::VolumePreserving => VolumePreserving.project(f),
        }
    }
}

/// Singular value decomposition with the reflection moved into the smallest singular value.
///
/// `u * diag(sigma) * v_t` reproduces the input and `u * v_t` is a proper rotation.
pub(crate) struct SignedSvd {
    pub u: Matrix3<f64>,
    pub sigma: Vector3<f64>,
    pub v_t: Matrix3<f64>,
}

impl SignedSvd {
    pub fn new(f: &Matrix3<f64>) -> Self {
        let svd = f.svd(true, true);
        let (mut u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => (Matrix3::identity(), Matrix3::identity()),
        };
        let mut sigma = svd.singular_values;
        if u.determinant() * v_t.determinant() < 0.0 {
            let i = sigma.imin();
            u.column_mut(i).neg_mut();
            sigma[i] = -sigma[i];
        }
        SignedSvd { u, sigma, v_t }
    }

    pub fn compose(&self, sigma: &Vector3<f64>) -> Matrix3<f64> {
        self.u * Matrix3::from_diagonal(sigma) * self.v_t
    }
}
