//! Rest state mesh representations consumed by the solver.
//!
//! Both plain tetrahedral meshes and lattices with an embedded high resolution mesh expose the
//! same capabilities through the [`SimMesh`] trait, which is all the matrix assembly needs.

use std::collections::HashMap;

use ndarray::ArrayView2;

use crate::Error;

/// Tolerance on barycentric coordinates of embedded vertices lying close to a lattice face.
pub const BARY_TOLERANCE: f64 = 1e-8;

/// Capabilities of a mesh that can be simulated.
pub trait SimMesh {
    /// Rest positions of the simulated vertices.
    fn rest_positions(&self) -> &[[f64; 3]];
    /// Tetrahedra indexing into `rest_positions`.
    fn tets(&self) -> &[[usize; 4]];
    /// Barycentric embedding of a finer mesh, if any.
    fn embedding(&self) -> Option<Embedding<'_>> {
        None
    }

    fn num_vertices(&self) -> usize {
        self.rest_positions().len()
    }

    fn num_tets(&self) -> usize {
        self.tets().len()
    }

    /// Checks that all indices are in bounds and that the embedding is well formed.
    ///
    /// Degenerate geometry is detected later during assembly where element volumes are
    /// computed anyway.
    fn validate(&self) -> Result<(), Error> {
        let num_verts = self.num_vertices();
        if num_verts == 0 || self.num_tets() == 0 {
            return Err(Error::EmptyMesh);
        }
        let mut referenced = vec![false; num_verts];
        for (element, tet) in self.tets().iter().enumerate() {
            if let Some(&index) = tet.iter().find(|&&vtx| vtx >= num_verts) {
                return Err(Error::InvalidIndex { element, index });
            }
            for &vtx in tet {
                referenced[vtx] = true;
            }
        }
        // Unreferenced vertices have no mass and make the system matrix singular.
        if let Some(vertex) = referenced.iter().position(|&r| !r) {
            return Err(Error::UnreferencedVertex { vertex });
        }
        if let Some(embedding) = self.embedding() {
            embedding.validate(self.num_tets())?;
        }
        Ok(())
    }
}

/// Borrowed view of a barycentric embedding.
#[derive(Copy, Clone, Debug)]
pub struct Embedding<'a> {
    /// Rest positions of the embedded vertices.
    pub x_rest: &'a [[f64; 3]],
    /// Lattice tet containing each embedded vertex.
    pub vtx_to_tet: &'a [usize],
    /// Barycentric coordinates of each embedded vertex inside its tet.
    pub barys: &'a [[f64; 4]],
}

impl<'a> Embedding<'a> {
    pub fn num_vertices(&self) -> usize {
        self.vtx_to_tet.len()
    }

    pub fn validate(&self, num_tets: usize) -> Result<(), Error> {
        if self.x_rest.len() != self.vtx_to_tet.len() || self.barys.len() != self.vtx_to_tet.len()
        {
            return Err(Error::SizeMismatch);
        }
        for (vertex, (&tet, bary)) in self.vtx_to_tet.iter().zip(self.barys.iter()).enumerate() {
            let sum: f64 = bary.iter().sum();
            let valid = tet < num_tets
                && bary.iter().all(|&b| b >= -BARY_TOLERANCE && b.is_finite())
                && approx::relative_eq!(sum, 1.0, epsilon = BARY_TOLERANCE);
            if !valid {
                return Err(Error::InvalidEmbedding { vertex });
            }
        }
        Ok(())
    }

    /// Reconstructs embedded vertex positions from the given lattice vertex positions.
    pub fn positions(&self, tets: &[[usize; 4]], lattice_x: ArrayView2<f64>) -> Vec<[f64; 3]> {
        self.vtx_to_tet
            .iter()
            .zip(self.barys.iter())
            .map(|(&tet_idx, bary)| {
                let tet = &tets[tet_idx];
                let mut pos = [0.0; 3];
                for (&vtx, &w) in tet.iter().zip(bary.iter()) {
                    for (p, &x) in pos.iter_mut().zip(lattice_x.row(vtx).iter()) {
                        *p += w * x;
                    }
                }
                pos
            })
            .collect()
    }
}

/// A plain tetrahedral mesh at rest.
#[derive(Clone, Debug, PartialEq)]
pub struct TetMeshData {
    pub x_rest: Vec<[f64; 3]>,
    /// Surface triangles.
    pub faces: Vec<[usize; 3]>,
    pub tets: Vec<[usize; 4]>,
}

impl TetMeshData {
    pub fn new(x_rest: Vec<[f64; 3]>, faces: Vec<[usize; 3]>, tets: Vec<[usize; 4]>) -> Self {
        TetMeshData {
            x_rest,
            faces,
            tets,
        }
    }

    /// Builds a tet mesh whose surface triangles are extracted from the tets.
    pub fn from_tets(x_rest: Vec<[f64; 3]>, tets: Vec<[usize; 4]>) -> Self {
        let faces = surface_faces(&tets);
        TetMeshData::new(x_rest, faces, tets)
    }

    pub fn total_rest_volume(&self) -> f64 {
        self.tets
            .iter()
            .map(|tet| tet_volume(&tet_positions(&self.x_rest, tet)))
            .sum()
    }
}

impl SimMesh for TetMeshData {
    fn rest_positions(&self) -> &[[f64; 3]] {
        &self.x_rest
    }
    fn tets(&self) -> &[[usize; 4]] {
        &self.tets
    }
}

/// A fine mesh embedded in a coarse tetrahedral lattice.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddedMeshData {
    /// Embedded vertex positions at rest.
    pub x_rest: Vec<[f64; 3]>,
    /// Embedded faces.
    pub faces: Vec<[usize; 3]>,
    /// Lattice vertex positions at rest. These are the simulated vertices.
    pub lattice_x_rest: Vec<[f64; 3]>,
    /// Lattice elements.
    pub tets: Vec<[usize; 4]>,
    /// Lattice tet containing each embedded vertex.
    pub vtx_to_tet: Vec<usize>,
    /// Barycentric coordinates of each embedded vertex inside its lattice tet.
    pub barys: Vec<[f64; 4]>,
}

impl EmbeddedMeshData {
    /// Embedded vertex positions given the current lattice vertex positions.
    pub fn embedded_positions(&self, lattice_x: ArrayView2<f64>) -> Vec<[f64; 3]> {
        self.embedding_view().positions(&self.tets, lattice_x)
    }

    fn embedding_view(&self) -> Embedding<'_> {
        Embedding {
            x_rest: &self.x_rest,
            vtx_to_tet: &self.vtx_to_tet,
            barys: &self.barys,
        }
    }
}

impl SimMesh for EmbeddedMeshData {
    fn rest_positions(&self) -> &[[f64; 3]] {
        &self.lattice_x_rest
    }
    fn tets(&self) -> &[[usize; 4]] {
        &self.tets
    }
    fn embedding(&self) -> Option<Embedding<'_>> {
        Some(self.embedding_view())
    }
}

pub(crate) fn tet_positions(x: &[[f64; 3]], tet: &[usize; 4]) -> [[f64; 3]; 4] {
    [x[tet[0]], x[tet[1]], x[tet[2]], x[tet[3]]]
}

/// Columns are the edges emanating from the first vertex.
pub(crate) fn edge_matrix(verts: &[[f64; 3]; 4]) -> na::Matrix3<f64> {
    let x0 = na::Vector3::from(verts[0]);
    na::Matrix3::from_columns(&[
        na::Vector3::from(verts[1]) - x0,
        na::Vector3::from(verts[2]) - x0,
        na::Vector3::from(verts[3]) - x0,
    ])
}

/// Signed volume of a tetrahedron. Positive when the fourth vertex lies on the side of the
/// first three towards which their right handed normal points.
pub fn tet_volume(verts: &[[f64; 3]; 4]) -> f64 {
    edge_matrix(verts).determinant() / 6.0
}

/// Boundary triangles of a tet mesh, oriented outwards for positively oriented tets.
pub fn surface_faces(tets: &[[usize; 4]]) -> Vec<[usize; 3]> {
    let mut face_count: HashMap<[usize; 3], (usize, [usize; 3])> = HashMap::new();
    for &[a, b, c, d] in tets {
        for face in [[a, c, b], [a, b, d], [a, d, c], [b, c, d]] {
            let mut key = face;
            key.sort_unstable();
            face_count.entry(key).or_insert((0, face)).0 += 1;
        }
    }
    let mut faces: Vec<_> = face_count
        .into_values()
        .filter_map(|(count, face)| if count == 1 { Some(face) } else { None })
        .collect();
    faces.sort_unstable();
    faces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn unit_tet_volume() {
        let verts = [[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        approx::assert_relative_eq!(tet_volume(&verts), 1.0 / 6.0);
        let flipped = [verts[0], verts[2], verts[1], verts[3]];
        approx::assert_relative_eq!(tet_volume(&flipped), -1.0 / 6.0);
    }

    #[test]
    fn one_tet_surface() {
        let mesh = make_one_tet_mesh();
        assert_eq!(mesh.faces.len(), 4);
        let mut referenced: Vec<_> = mesh.faces.iter().flatten().cloned().collect();
        referenced.sort_unstable();
        referenced.dedup();
        assert_eq!(referenced, vec![0, 1, 2, 3]);
    }

    #[test]
    fn shared_faces_are_interior() {
        let mesh = make_two_tet_mesh();
        // Two tets sharing one face have 6 boundary triangles.
        assert_eq!(mesh.faces.len(), 6);
    }

    #[test]
    fn invalid_tet_index() {
        let mut mesh = make_one_tet_mesh();
        mesh.tets[0][2] = 7;
        match mesh.validate() {
            Err(Error::InvalidIndex { element, index }) => {
                assert_eq!(element, 0);
                assert_eq!(index, 7);
            }
            other => panic!("unexpected validation result: {:?}", other),
        }
    }

    #[test]
    fn isolated_vertex_is_rejected() {
        let mut mesh = make_one_tet_mesh();
        mesh.x_rest.push([5.0, 5.0, 5.0]);
        assert!(matches!(
            mesh.validate(),
            Err(Error::UnreferencedVertex { vertex: 4 })
        ));
    }

    #[test]
    fn invalid_barycentric_weights() {
        let mesh = make_one_tet_mesh();
        let mut embedded = EmbeddedMeshData {
            x_rest: vec![[0.25; 3]],
            faces: Vec::new(),
            lattice_x_rest: mesh.x_rest.clone(),
            tets: mesh.tets.clone(),
            vtx_to_tet: vec![0],
            barys: vec![[0.25; 4]],
        };
        assert!(embedded.validate().is_ok());

        embedded.barys[0] = [0.5, 0.5, 0.5, -0.5];
        assert!(matches!(
            embedded.validate(),
            Err(Error::InvalidEmbedding { vertex: 0 })
        ));

        embedded.barys[0] = [0.25; 4];
        embedded.vtx_to_tet[0] = 1;
        assert!(matches!(
            embedded.validate(),
            Err(Error::InvalidEmbedding { vertex: 0 })
        ));
    }
}
