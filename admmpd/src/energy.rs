//! Registry of per-element energies.
//!
//! Every registered energy owns a contiguous block of rows in the reduction matrix `D`. For a
//! tetrahedron the block has three rows which, multiplied with the vertex positions, produce the
//! transposed deformation gradient of that tet.

use crate::energy_models::{ElementEnergy, EnergyModel};
use crate::matrix::Triplets;
use crate::mesh::{edge_matrix, tet_positions, SimMesh};
use crate::{ElasticityParameters, Error};

/// Number of rows in `D` contributed by one tetrahedron.
pub const TET_ROWS: usize = 3;

/// Append-only registry of energies.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnergyTerms {
    /// First row and number of rows in `D` for each energy.
    pub indices: Vec<[usize; 2]>,
    /// Rest volume of each energy.
    pub rest_volumes: Vec<f64>,
    /// Weight of each energy, `sqrt(stiffness * rest_volume)`.
    pub weights: Vec<f64>,
    /// Projection model of each energy.
    pub models: Vec<EnergyModel>,
}

impl EnergyTerms {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Total number of rows in `D`.
    pub fn num_rows(&self) -> usize {
        self.indices.last().map(|&[row, n]| row + n).unwrap_or(0)
    }

    /// Appends one energy per tet of the given mesh and the corresponding rows of `D`.
    ///
    /// Fails without modifying the registry if any tet is degenerate or inverted in the rest
    /// configuration.
    pub fn append_tets<M: SimMesh + ?Sized>(
        &mut self,
        mesh: &M,
        model: EnergyModel,
        params: &ElasticityParameters,
        d: &mut Triplets,
    ) -> Result<(), Error> {
        let x = mesh.rest_positions();
        let mut degens = Vec::new();
        let mut inverted = Vec::new();
        let mut blocks = Vec::with_capacity(mesh.num_tets());

        for (i, tet) in mesh.tets().iter().enumerate() {
            let verts = tet_positions(x, tet);
            let edges = edge_matrix(&verts);
            let volume = edges.determinant() / 6.0;
            let scale = edges.column_iter().map(|e| e.norm()).fold(0.0, f64::max);
            if volume.abs() <= f64::EPSILON * scale * scale * scale {
                degens.push(i);
                continue;
            }
            if volume < 0.0 {
                inverted.push(i);
                continue;
            }
            match edges.try_inverse() {
                Some(edges_inv) => blocks.push((volume, edges_inv)),
                None => degens.push(i),
            }
        }

        if !degens.is_empty() {
            return Err(Error::DegenerateReferenceElement { degens });
        }
        if !inverted.is_empty() {
            return Err(Error::InvertedReferenceElement { inverted });
        }

        let stiffness = model.stiffness(params);
        for (tet, (volume, edges_inv)) in mesh.tets().iter().zip(blocks) {
            let row = self.num_rows();
            for r in 0..TET_ROWS {
                let col_sum = edges_inv[(0, r)] + edges_inv[(1, r)] + edges_inv[(2, r)];
                d.push(row + r, tet[0], -col_sum);
                for k in 0..3 {
                    d.push(row + r, tet[k + 1], edges_inv[(k, r)]);
                }
            }
            self.indices.push([row, TET_ROWS]);
            self.rest_volumes.push(volume);
            self.weights.push((stiffness * volume).sqrt());
            self.models.push(model);
        }
        Ok(())
    }

    /// Recomputes weights after a material change.
    pub fn reweight(&mut self, params: &ElasticityParameters) {
        for ((w, &volume), model) in self
            .weights
            .iter_mut()
            .zip(self.rest_volumes.iter())
            .zip(self.models.iter())
        {
            *w = (model.stiffness(params) * volume).sqrt();
        }
    }

    /// Squared weight of every row of `D`.
    pub fn row_weights_squared(&self) -> Vec<f64> {
        let mut w2 = vec![0.0; self.num_rows()];
        for (&[row, n], &w) in self.indices.iter().zip(self.weights.iter()) {
            w2[row..row + n].iter_mut().for_each(|x| *x = w * w);
        }
        w2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    #[test]
    fn one_tet_reduction_rows() {
        let mesh = make_one_tet_mesh();
        let params = ElasticityParameters::from_young_poisson(1e3, 0.25);
        let mut terms = EnergyTerms::default();
        let mut d = Triplets::new(0, 4);
        terms
            .append_tets(&mesh, EnergyModel::Arap, &params, &mut d)
            .unwrap();

        assert_eq!(terms.len(), 1);
        assert_eq!(terms.indices[0], [0, 3]);
        assert_eq!(terms.num_rows(), 3);
        assert_relative_eq!(terms.rest_volumes[0], 1.0 / 6.0);
        assert_relative_eq!(
            terms.weights[0],
            (params.bulk_modulus() / 6.0).sqrt(),
            max_relative = 1e-12
        );

        // For the unit tet at rest the reduced coordinates are the identity.
        d.set_rows(terms.num_rows());
        let d = d.to_csr();
        let x = ndarray::arr2(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]);
        let dx = crate::matrix::mul_dense(&d, x.view());
        for r in 0..3 {
            for c in 0..3 {
                let expected = if r == c { 1.0 } else { 0.0 };
                assert_relative_eq!(dx[[r, c]], expected, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn inverted_and_degenerate_tets() {
        let mut mesh = make_two_tet_mesh();
        mesh.tets[1].swap(0, 1);
        let params = ElasticityParameters::from_young_poisson(1e3, 0.25);
        let mut terms = EnergyTerms::default();
        let mut d = Triplets::new(0, mesh.x_rest.len());
        match terms.append_tets(&mesh, EnergyModel::Arap, &params, &mut d) {
            Err(Error::InvertedReferenceElement { inverted }) => assert_eq!(inverted, vec![1]),
            other => panic!("expected an inverted element, got {:?}", other),
        }
        assert!(terms.is_empty());

        let mut flat = make_one_tet_mesh();
        flat.x_rest[3] = [0.5, 0.5, 0.0];
        match terms.append_tets(&flat, EnergyModel::Arap, &params, &mut d) {
            Err(Error::DegenerateReferenceElement { degens }) => assert_eq!(degens, vec![0]),
            other => panic!("expected a degenerate element, got {:?}", other),
        }
    }
}
