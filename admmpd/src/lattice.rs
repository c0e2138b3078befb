//! Generation of a coarse tetrahedral lattice around a high resolution mesh.
//!
//! The lattice is a regular grid of cubes covering the embedded vertices, where each occupied
//! cube is split into tetrahedra. Every embedded vertex is then bound to the lattice tet that
//! contains it through barycentric coordinates.

use std::collections::HashMap;

use crate::mesh::{edge_matrix, tet_positions, tet_volume, EmbeddedMeshData, BARY_TOLERANCE};
use crate::Error;

/// How a cube is split into tetrahedra.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TetSplit {
    /// Five tets per cube with orientation alternating between neighbouring cubes.
    Five,
    /// Six tets per cube sharing the main diagonal.
    Six,
}

impl Default for TetSplit {
    fn default() -> Self {
        TetSplit::Five
    }
}

/// Parameters controlling lattice generation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LatticeOptions {
    /// Number of cells along the longest side of the bounding box.
    pub cells_per_axis: usize,
    /// Bounding box padding as a fraction of its longest side.
    pub padding: f64,
    pub split: TetSplit,
}

impl Default for LatticeOptions {
    fn default() -> Self {
        LatticeOptions {
            cells_per_axis: 8,
            padding: 0.01,
            split: TetSplit::default(),
        }
    }
}

/// A tetrahedralized subset of a regular grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Lattice {
    pub x: Vec<[f64; 3]>,
    pub tets: Vec<[usize; 4]>,
    /// Tets generated for each kept cell, indexed by linear cell index.
    cell_tets: HashMap<usize, std::ops::Range<usize>>,
    origin: [f64; 3],
    cell_size: f64,
    res: [usize; 3],
}

impl Lattice {
    /// Tetrahedralizes the cells of the grid for which `keep` returns `true`.
    ///
    /// Only vertices referenced by kept cells are emitted.
    pub fn grid(
        origin: [f64; 3],
        cell_size: f64,
        res: [usize; 3],
        split: TetSplit,
        mut keep: impl FnMut([usize; 3]) -> bool,
    ) -> Lattice {
        let mut x = Vec::new();
        let mut tets = Vec::new();
        let mut cell_tets = HashMap::new();
        let mut vertex_map: HashMap<[usize; 3], usize> = HashMap::new();

        for k in 0..res[2] {
            for j in 0..res[1] {
                for i in 0..res[0] {
                    if !keep([i, j, k]) {
                        continue;
                    }
                    let mut corners = [0; 8];
                    for (c, corner) in corners.iter_mut().enumerate() {
                        let grid_vtx = [i + (c & 1), j + ((c >> 1) & 1), k + ((c >> 2) & 1)];
                        *corner = *vertex_map.entry(grid_vtx).or_insert_with(|| {
                            x.push([
                                origin[0] + grid_vtx[0] as f64 * cell_size,
                                origin[1] + grid_vtx[1] as f64 * cell_size,
                                origin[2] + grid_vtx[2] as f64 * cell_size,
                            ]);
                            x.len() - 1
                        });
                    }
                    let start = tets.len();
                    for tet in cube_tets(&corners, (i + j + k) % 2 == 1, split) {
                        tets.push(oriented(&x, tet));
                    }
                    cell_tets.insert(i + res[0] * (j + res[1] * k), start..tets.len());
                }
            }
        }

        Lattice {
            x,
            tets,
            cell_tets,
            origin,
            cell_size,
            res,
        }
    }

    /// Generates a lattice around the given vertices and embeds them into it.
    pub fn generate(
        embedded_x: &[[f64; 3]],
        faces: &[[usize; 3]],
        options: LatticeOptions,
    ) -> Result<EmbeddedMeshData, Error> {
        if embedded_x.is_empty() {
            return Err(Error::EmptyMesh);
        }
        if options.cells_per_axis == 0 || !(options.padding >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "lattice options".to_string(),
            });
        }
        if let Some(&index) = faces.iter().flatten().find(|&&v| v >= embedded_x.len()) {
            let element = faces.iter().position(|f| f.contains(&index)).unwrap_or(0);
            return Err(Error::InvalidIndex { element, index });
        }

        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for p in embedded_x {
            for k in 0..3 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }
        let extent = (0..3).map(|k| max[k] - min[k]).fold(0.0, f64::max);
        if !(extent > 0.0 && extent.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "x_rest".to_string(),
            });
        }

        let pad = options.padding * extent;
        let origin = [min[0] - pad, min[1] - pad, min[2] - pad];
        let cell_size = (extent + 2.0 * pad) / options.cells_per_axis as f64;
        let mut res = [1; 3];
        for k in 0..3 {
            res[k] = (((max[k] + pad - origin[k]) / cell_size).ceil() as usize).max(1);
        }

        let cell_of = |p: &[f64; 3]| {
            let mut cell = [0; 3];
            for k in 0..3 {
                let c = ((p[k] - origin[k]) / cell_size).floor().max(0.0) as usize;
                cell[k] = c.min(res[k] - 1);
            }
            cell
        };

        let occupied: std::collections::HashSet<[usize; 3]> =
            embedded_x.iter().map(|p| cell_of(p)).collect();
        let lattice = Lattice::grid(origin, cell_size, res, options.split, |cell| {
            occupied.contains(&cell)
        });

        let mut vtx_to_tet = Vec::with_capacity(embedded_x.len());
        let mut barys = Vec::with_capacity(embedded_x.len());
        for (vertex, p) in embedded_x.iter().enumerate() {
            let (tet, bary) = lattice
                .locate(p)
                .ok_or(Error::InvalidEmbedding { vertex })?;
            vtx_to_tet.push(tet);
            barys.push(bary);
        }

        log::debug!(
            "Generated lattice with {} vertices and {} tets for {} embedded vertices",
            lattice.x.len(),
            lattice.tets.len(),
            embedded_x.len()
        );

        Ok(EmbeddedMeshData {
            x_rest: embedded_x.to_vec(),
            faces: faces.to_vec(),
            lattice_x_rest: lattice.x,
            tets: lattice.tets,
            vtx_to_tet,
            barys,
        })
    }

    /// Finds the tet containing `p` along with its barycentric coordinates.
    ///
    /// Only the tets of the cell containing `p` are searched. Small negative coordinates from
    /// points on cell boundaries are clamped and the remaining coordinates renormalized.
    pub fn locate(&self, p: &[f64; 3]) -> Option<(usize, [f64; 4])> {
        let mut cell = [0; 3];
        for k in 0..3 {
            let c = ((p[k] - self.origin[k]) / self.cell_size).floor().max(0.0) as usize;
            cell[k] = c.min(self.res[k].saturating_sub(1));
        }
        let range = self
            .cell_tets
            .get(&(cell[0] + self.res[0] * (cell[1] + self.res[1] * cell[2])))?
            .clone();

        let (tet, mut bary) = range
            .filter_map(|t| barycentric(&tet_positions(&self.x, &self.tets[t]), p).map(|b| (t, b)))
            .max_by(|(_, a), (_, b)| {
                let min_a = a.iter().cloned().fold(f64::INFINITY, f64::min);
                let min_b = b.iter().cloned().fold(f64::INFINITY, f64::min);
                min_a
                    .partial_cmp(&min_b)
                    .unwrap_or(std::cmp::Ordering::Less)
            })?;

        let tolerance = 1e-6;
        if bary.iter().any(|&b| b < -tolerance) {
            return None;
        }
        for b in bary.iter_mut() {
            *b = b.max(0.0);
        }
        let sum: f64 = bary.iter().sum();
        for b in bary.iter_mut() {
            *b /= sum;
        }
        debug_assert!(bary.iter().all(|&b| b >= -BARY_TOLERANCE));
        Some((tet, bary))
    }
}

/// Barycentric coordinates of `p` with respect to the given tet.
pub fn barycentric(verts: &[[f64; 3]; 4], p: &[f64; 3]) -> Option<[f64; 4]> {
    let edges_inv = edge_matrix(verts).try_inverse()?;
    let local = edges_inv * (na::Vector3::from(*p) - na::Vector3::from(verts[0]));
    Some([1.0 - local.sum(), local[0], local[1], local[2]])
}

/// Makes the tet positively oriented by swapping two vertices if necessary.
fn oriented(x: &[[f64; 3]], mut tet: [usize; 4]) -> [usize; 4] {
    if tet_volume(&tet_positions(x, &tet)) < 0.0 {
        tet.swap(2, 3);
    }
    tet
}

/// Splits a cube into tets. Corner `c` is at offset `(c & 1, (c >> 1) & 1, (c >> 2) & 1)`.
pub(crate) fn cube_tets(c: &[usize; 8], odd: bool, split: TetSplit) -> Vec<[usize; 4]> {
    match split {
        TetSplit::Five if !odd => vec![
            [c[1], c[2], c[4], c[7]],
            [c[0], c[1], c[2], c[4]],
            [c[3], c[1], c[2], c[7]],
            [c[5], c[1], c[4], c[7]],
            [c[6], c[2], c[4], c[7]],
        ],
        TetSplit::Five => vec![
            [c[0], c[3], c[5], c[6]],
            [c[1], c[0], c[3], c[5]],
            [c[2], c[0], c[3], c[6]],
            [c[4], c[0], c[5], c[6]],
            [c[7], c[3], c[5], c[6]],
        ],
        TetSplit::Six => vec![
            [c[0], c[1], c[3], c[7]],
            [c[0], c[1], c[5], c[7]],
            [c[0], c[2], c[3], c[7]],
            [c[0], c[2], c[6], c[7]],
            [c[0], c[4], c[5], c[7]],
            [c[0], c[4], c[6], c[7]],
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{surface_faces, SimMesh};
    use approx::assert_relative_eq;

    #[test]
    fn grid_tets_are_positive_and_fill_the_box() {
        for split in [TetSplit::Five, TetSplit::Six] {
            let lattice = Lattice::grid([0.0; 3], 0.5, [2, 3, 1], split, |_| true);
            assert_eq!(lattice.x.len(), 3 * 4 * 2);
            let volume: f64 = lattice
                .tets
                .iter()
                .map(|t| {
                    let v = tet_volume(&tet_positions(&lattice.x, t));
                    assert!(v > 0.0);
                    v
                })
                .sum();
            assert_relative_eq!(volume, 1.0 * 1.5 * 0.5, max_relative = 1e-12);
        }
    }

    #[test]
    fn five_tet_split_is_conforming() {
        // In a conforming tessellation every interior face is shared by exactly two tets, so
        // the boundary consists of two triangles per grid face.
        let lattice = Lattice::grid([0.0; 3], 1.0, [2, 2, 2], TetSplit::Five, |_| true);
        assert_eq!(surface_faces(&lattice.tets).len(), 6 * 4 * 2);
    }

    #[test]
    fn generated_embedding_is_valid() {
        let embedded = vec![
            [0.1, 0.2, 0.3],
            [0.9, 0.1, 0.5],
            [0.4, 0.8, 0.2],
            [0.7, 0.7, 0.9],
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
        ];
        let faces = vec![[0, 1, 2], [1, 3, 2]];
        let options = LatticeOptions {
            cells_per_axis: 3,
            ..Default::default()
        };
        let mesh = Lattice::generate(&embedded, &faces, options).unwrap();
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.vtx_to_tet.len(), embedded.len());
        assert!(mesh.tets.len() <= 27 * 5);
        for tet in mesh.tets() {
            assert!(tet_volume(&tet_positions(&mesh.lattice_x_rest, tet)) > 0.0);
        }
    }

    #[test]
    fn invalid_face_index() {
        let result = Lattice::generate(&[[0.0; 3], [1.0; 3]], &[[0, 1, 2]], Default::default());
        assert!(matches!(
            result,
            Err(Error::InvalidIndex {
                element: 0,
                index: 2
            })
        ));
    }
}
