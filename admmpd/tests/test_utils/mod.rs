use admmpd::Solver;
use ndarray::ArrayView2;

pub use admmpd::test_utils::*;

/// Utility function to compare vertex positions of two solvers.
#[allow(dead_code)]
pub fn compare_positions(solution: ArrayView2<f64>, expected: ArrayView2<f64>, tol: f64) {
    use approx::*;
    assert_eq!(solution.dim(), expected.dim());
    for (pos, expected_pos) in solution.outer_iter().zip(expected.outer_iter()) {
        for k in 0..3 {
            assert_relative_eq!(pos[k], expected_pos[k], max_relative = tol, epsilon = tol);
        }
    }
}

/// Steps the solver `num_steps` times, failing the test on error.
#[allow(dead_code)]
pub fn run_steps(solver: &mut Solver, num_steps: usize) -> Vec<admmpd::SolveResult> {
    (0..num_steps)
        .map(|i| {
            let result = solver.step().expect("step failed");
            log::debug!("step {}:\n{}", i, result);
            result
        })
        .collect()
}

pub fn init_logger() {
    let _ = env_logger::Builder::from_env("ADMMPD_LOG")
        .is_test(true)
        .try_init();
}
