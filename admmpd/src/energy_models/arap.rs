use na::Matrix3;

use super::{ElementEnergy, Projection, SignedSvd};

/// As-rigid-as-possible energy. Projects onto the closest rotation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Arap;

impl ElementEnergy for Arap {
    fn project(&self, f: &Matrix3<f64>) -> Projection {
        let svd = SignedSvd::new(f);
        Projection {
            z: svd.u * svd.v_t,
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
    fn rotation_is_a_fixed_point() {
        let r = rotation();
        let p = Arap.project(&r);
        assert_relative_eq!(p.z, r, epsilon = 1e-12);
        assert!(!p.inverted);
    }

    #[test]
    fn stretch_is_removed() {
        let r = rotation();
        let f = r * Matrix3::from_diagonal(&Vector3::new(2.0, 0.5, 1.3));
        let p = Arap.project(&f);
        assert_relative_eq!(p.z, r, epsilon = 1e-10);
    }

    #[test]
    fn inverted_element_is_flagged() {
        let f = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -0.5));
        let p = Arap.project(&f);
        assert!(p.inverted);
        assert_relative_eq!(p.z.determinant(), 1.0, epsilon = 1e-12);
    }
}
