use na::{Matrix3, Vector3};

use super::{ElementEnergy, Projection, SignedSvd};

/// Volume preserving energy: stretches are rescaled uniformly to a unit volume ratio.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VolumePreserving;

impl ElementEnergy for VolumePreserving {
    fn project(&self, f: &Matrix3<f64>) -> Projection {
        let svd = SignedSvd::new(f);
        let abs_sigma = svd.sigma.abs();
        let volume_ratio = abs_sigma.product();
        let sigma = if volume_ratio > f64::EPSILON {
            abs_sigma / volume_ratio.cbrt()
        } else {
            Vector3::repeat(1.0)
        };
        Projection {
            z: svd.compose(&sigma),
            inverted: f.determinant() < 0.0,
        }
    }
}
