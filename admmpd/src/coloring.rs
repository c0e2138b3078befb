//! Vertex coloring for parallel Gauss-Seidel sweeps.
//!
//! Two vertices conflict when the system matrix has a nonzero entry coupling them. Vertices of
//! the same color form an independent set and can be relaxed simultaneously.

use sprs::CsMat;

/// Partition of vertices into independent sets, one list of vertices per color.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Coloring {
    pub colors: Vec<Vec<usize>>,
}

impl Coloring {
    /// Greedy coloring visiting vertices in order of decreasing degree.
    pub fn greedy(adjacency: &[Vec<usize>]) -> Self {
        let n = adjacency.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&v| std::cmp::Reverse(adjacency[v].len()));

        let mut color_of = vec![usize::MAX; n];
        // Marks colors used by neighbours of the current vertex. Stamped with the vertex index
        // to avoid clearing between vertices.
        let mut forbidden: Vec<usize> = Vec::new();
        let mut colors: Vec<Vec<usize>> = Vec::new();

        for &v in &order {
            for &nbr in &adjacency[v] {
                let c = color_of[nbr];
                if c != usize::MAX {
                    forbidden[c] = v;
                }
            }
            let color = (0..colors.len())
                .find(|&c| forbidden[c] != v)
                .unwrap_or_else(|| {
                    colors.push(Vec::new());
                    forbidden.push(usize::MAX);
                    colors.len() - 1
                });
            color_of[v] = color;
            colors[color].push(v);
        }

        for group in colors.iter_mut() {
            group.sort_unstable();
        }

        Coloring { colors }
    }

    /// Colors the vertex graph of `a` (an `n x n` vertex matrix) and optionally the coupling
    /// introduced by `ktk` (a `3n x 3n` interleaved matrix).
    pub fn of_system(a: &CsMat<f64>, ktk: Option<&CsMat<f64>>) -> Self {
        Coloring::greedy(&vertex_adjacency(a, ktk))
    }

    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    /// Checks that every vertex has exactly one color and no two neighbours share a color.
    pub fn is_valid(&self, adjacency: &[Vec<usize>]) -> bool {
        let mut color_of = vec![usize::MAX; adjacency.len()];
        for (c, group) in self.colors.iter().enumerate() {
            for &v in group {
                if v >= color_of.len() || color_of[v] != usize::MAX {
                    return false;
                }
                color_of[v] = c;
            }
        }
        color_of.iter().all(|&c| c != usize::MAX)
            && adjacency
                .iter()
                .enumerate()
                .all(|(v, nbrs)| nbrs.iter().all(|&u| color_of[u] != color_of[v]))
    }
}

/// Off-diagonal vertex adjacency of the system `a ⊗ I₃ + ktk`.
pub fn vertex_adjacency(a: &CsMat<f64>, ktk: Option<&CsMat<f64>>) -> Vec<Vec<usize>> {
    let n = a.rows();
    let mut adjacency = vec![Vec::new(); n];
    for (i, row) in a.outer_iterator().enumerate() {
        adjacency[i].extend(
            row.iter()
                .filter(|&(j, &v)| j != i && v != 0.0)
                .map(|(j, _)| j),
        );
    }
    if let Some(ktk) = ktk {
        for (p, row) in ktk.outer_iterator().enumerate() {
            let i = p / 3;
            adjacency[i].extend(
                row.iter()
                    .filter(|&(q, &v)| q / 3 != i && v != 0.0)
                    .map(|(q, _)| q / 3),
            );
        }
    }
    for nbrs in adjacency.iter_mut() {
        nbrs.sort_unstable();
        nbrs.dedup();
    }
    adjacency
}
