mod assembly;
mod coloring;
pub mod constraint;
pub mod energy;
pub mod energy_models;
pub mod lattice;
pub mod linsolve;
mod material;
mod matrix;
pub mod mesh;
mod options;
pub mod solver;
mod state;

// Mesh builders shared by unit tests, integration tests and benches.
pub mod test_utils;

pub use self::assembly::*;
pub use self::coloring::*;
pub use self::constraint::ConstraintSet;
pub use self::energy_models::EnergyModel;
pub use self::lattice::{Lattice, LatticeOptions, TetSplit};
pub use self::material::*;
pub use self::matrix::{SparsityPattern, Triplets};
pub use self::mesh::{EmbeddedMeshData, Embedding, SimMesh, TetMeshData};
pub use self::options::*;
pub use self::solver::{SolveResult, Solver};
pub use self::state::SolverData;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Size mismatch error")]
    SizeMismatch,
    #[error("The simulation mesh has no vertices or no tetrahedra")]
    EmptyMesh,
    #[error("Element {element} refers to vertex {index} which does not exist")]
    InvalidIndex { element: usize, index: usize },
    #[error("Vertex {vertex} is not referenced by any tetrahedron")]
    UnreferencedVertex { vertex: usize },
    #[error("Degenerate reference element detected: {:?}", .degens[0])]
    DegenerateReferenceElement { degens: Vec<usize> },
    #[error("Inverted reference element detected: {:?}", .inverted[0])]
    InvertedReferenceElement { inverted: Vec<usize> },
    #[error("Invalid barycentric embedding for vertex {vertex}")]
    InvalidEmbedding { vertex: usize },
    #[error("Invalid parameter: {name:?}")]
    InvalidParameter { name: String },
    #[error("Matrix is not positive definite (pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },
    #[error("Sparse factorization failed: {reason}")]
    FactorizationFailed { reason: String },
}

impl From<sprs::errors::LinalgError> for Error {
    fn from(err: sprs::errors::LinalgError) -> Self {
        match err {
            sprs::errors::LinalgError::SingularMatrix(info) => {
                Error::NotPositiveDefinite { pivot: info.index }
            }
            err => Error::FactorizationFailed {
                reason: format!("{:?}", err),
            },
        }
    }
}

pub(crate) fn inf_norm<I, T: num_traits::Float>(iter: I) -> T
where
    I: IntoIterator<Item = T>,
{
    iter.into_iter()
        .map(|x| x.abs())
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Less))
        .unwrap_or(T::zero())
}
