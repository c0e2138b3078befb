//! Small meshes and parameter sets used throughout the tests and benchmarks.

use crate::lattice::Lattice;
pub use crate::lattice::TetSplit;
use crate::{LinearSolverKind, Options, TetMeshData};

/// Moderately stiff material with a short timestep. All three linear solvers converge quickly
/// on small meshes with these settings.
pub fn soft_options() -> Options {
    Options {
        timestep: 1.0 / 24.0,
        max_admm_iters: 30,
        max_cg_iters: 200,
        max_gs_iters: 500,
        min_res: 1e-9,
        youngs: 1e4,
        poisson: 0.3,
        density: 1000.0,
        ..Default::default()
    }
}

pub fn static_options(linear_solver: LinearSolverKind) -> Options {
    Options {
        grav: [0.0; 3],
        ..soft_options().with_linear_solver(linear_solver)
    }
}

/// The unit tet at the origin.
pub fn make_one_tet_mesh() -> TetMeshData {
    let verts = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];
    TetMeshData::from_tets(verts, vec![[0, 1, 2, 3]])
}

/// Two tets sharing the face `(1, 2, 3)`.
pub fn make_two_tet_mesh() -> TetMeshData {
    let verts = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
    ];
    TetMeshData::from_tets(verts, vec![[0, 1, 2, 3], [1, 2, 3, 4]])
}

/// Three tets fanned around the edge `(0, 1)`.
pub fn make_three_tet_mesh() -> TetMeshData {
    let verts = vec![
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [-1.0, 0.0, 0.0],
        [0.0, -1.0, 0.0],
    ];
    TetMeshData::from_tets(verts, vec![[0, 2, 3, 1], [0, 3, 4, 1], [0, 4, 5, 1]])
}

/// A unit cube subdivided into `res` cells per side.
pub fn make_box(res: usize, split: TetSplit) -> TetMeshData {
    let res = res.max(1);
    let lattice = Lattice::grid([0.0; 3], 1.0 / res as f64, [res; 3], split, |_| true);
    TetMeshData::from_tets(lattice.x, lattice.tets)
}
