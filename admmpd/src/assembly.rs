//! Assembly of the matrices used by the global step.
//!
//! The global step minimizes `1/(2h²)‖x - x̄‖²_M + Σᵢ wᵢ²/2 ‖Dᵢx - zᵢ + uᵢ‖²`, whose normal
//! equations are `(M/h² + DᵗW²D) x = M x̄/h² + DᵗW²(z - u)`. Here `A = M/h² + DᵗW²D` and
//! `DtW2 = DᵗW²`.

use ndarray::{Array2, ArrayView2};
use sprs::CsMat;

use crate::energy::EnergyTerms;
use crate::matrix::Triplets;
use crate::mesh::{tet_positions, tet_volume, SimMesh};

/// Lumped vertex masses. Each tet distributes a quarter of its mass to each of its vertices.
pub fn compute_masses<M: SimMesh + ?Sized>(mesh: &M, density: f64) -> Vec<f64> {
    let x = mesh.rest_positions();
    let mut masses = vec![0.0; mesh.num_vertices()];
    for tet in mesh.tets() {
        let volume = tet_volume(&tet_positions(x, tet)).abs();
        for &vtx in tet {
            masses[vtx] += 0.25 * volume * density;
        }
    }
    masses
}

/// Builds `DᵗW²` where `W` holds the weight of each energy on its rows.
pub fn weighted_transpose(d: &CsMat<f64>, energies: &EnergyTerms) -> CsMat<f64> {
    let w2 = energies.row_weights_squared();
    let mut dtw2 = Triplets::new(d.cols(), d.rows());
    for (r, row) in d.outer_iterator().enumerate() {
        for (c, &v) in row.iter() {
            dtw2.push(c, r, v * w2[r]);
        }
    }
    dtw2.to_csr()
}

/// Assembles `A = M/h² + DᵗW²D` one energy at a time.
pub fn system_matrix(
    masses: &[f64],
    time_step: f64,
    d: &CsMat<f64>,
    energies: &EnergyTerms,
) -> CsMat<f64> {
    let n = masses.len();
    let mut a = Triplets::new(n, n);
    let inv_dt2 = 1.0 / (time_step * time_step);
    for (i, &m) in masses.iter().enumerate() {
        a.push(i, i, m * inv_dt2);
    }

    for (&[first_row, num_rows], &w) in energies.indices.iter().zip(energies.weights.iter()) {
        let w2 = w * w;
        for r in first_row..first_row + num_rows {
            if let Some(row) = d.outer_view(r) {
                for (p, &vp) in row.iter() {
                    for (q, &vq) in row.iter() {
                        a.push(p, q, w2 * vp * vq);
                    }
                }
            }
        }
    }
    a.to_csr()
}

/// Computes `M x̄ / h²` with the inertial prediction `x̄ = x + h v + h² g`.
pub fn inertial_rhs(
    masses: &[f64],
    time_step: f64,
    x: ArrayView2<f64>,
    v: ArrayView2<f64>,
    gravity: [f64; 3],
) -> Array2<f64> {
    let dt = time_step;
    let mut m_xbar = Array2::zeros(x.raw_dim());
    for (i, mut row) in m_xbar.outer_iter_mut().enumerate() {
        let scale = masses[i] / (dt * dt);
        for k in 0..3 {
            row[k] = scale * (x[[i, k]] + dt * v[[i, k]] + dt * dt * gravity[k]);
        }
    }
    m_xbar
}
