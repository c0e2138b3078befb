use na::Matrix3;

use super::{ElementEnergy, Projection, SignedSvd};

/// Strain limiting energy: principal stretches are kept within `[min, max]`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StrainLimit {
    pub min: f64,
    pub max: f64,
}

impl ElementEnergy for StrainLimit {
    fn project(&self, f: &Matrix3<f64>) -> Projection {
        let svd = SignedSvd::new(f);
        let sigma = svd.sigma.map(|s| s.clamp(self.min, self.max));
        Projection {
            z: svd.compose(&sigma),
            inverted: f.determinant() < 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::rotation;
    use super::*;
    use approx::assert_relative_eq;
    use na::Vector3;

    #[test]
    fn admissible_stretch_is_kept() {
        let limit = StrainLimit { min: 0.9, max: 1.2 };
        let f = rotation() * Matrix3::from_diagonal(&Vector3::new(1.1, 0.95, 1.0));
        assert_relative_eq!(limit.project(&f).z, f, epsilon = 1e-10);
    }

    #[test]
    fn stretch_is_clamped() {
        let limit = StrainLimit { min: 0.9, max: 1.2 };
        let r = rotation();
        let f = r * Matrix3::from_diagonal(&Vector3::new(2.0, 0.5, 1.0));
        let expected = r * Matrix3::from_diagonal(&Vector3::new(1.2, 0.9, 1.0));
        assert_relative_eq!(limit.project(&f).z, expected, epsilon = 1e-10);
    }
}
