use admmpd::{test_utils::*, *};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn stretch_options(kind: LinearSolverKind) -> Options {
    Options {
        max_admm_iters: 10,
        ..static_options(kind)
    }
}

/// Pins the faces of the unit box at `x = 0` and `x = 1` and pulls them apart.
fn stretch_constraints(mesh: &TetMeshData) -> Result<ConstraintSet, Error> {
    mesh.x_rest
        .iter()
        .enumerate()
        .fold(ConstraintSet::builder(mesh.x_rest.len()), |builder, (v, p)| {
            if p[0] == 0.0 {
                builder.pin(v, [-0.5, p[1], p[2]])
            } else if p[0] == 1.0 {
                builder.pin(v, [1.5, p[1], p[2]])
            } else {
                builder
            }
        })
        .build()
}

fn box_stretch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Box Stretch");

    for i in (2..11).step_by(4) {
        let box_mesh = make_box(i, TetSplit::Five);
        let constraints = stretch_constraints(&box_mesh).unwrap();

        for kind in [
            LinearSolverKind::Direct,
            LinearSolverKind::ConjugateGradient,
            LinearSolverKind::GaussSeidel,
        ] {
            group.bench_function(BenchmarkId::new(format!("{:?}", kind), i), |b| {
                let mut solver = Solver::new(&box_mesh, stretch_options(kind)).unwrap();
                solver.set_constraints(constraints.clone()).unwrap();
                b.iter(|| solver.step().is_ok())
            });
        }

        group.bench_function(BenchmarkId::new("Volume Preserving", i), |b| {
            let options = stretch_options(LinearSolverKind::Direct)
                .with_energy_model(EnergyModel::VolumePreserving);
            let mut solver = Solver::new(&box_mesh, options).unwrap();
            solver.set_constraints(constraints.clone()).unwrap();
            b.iter(|| solver.step().is_ok())
        });
    }

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(15);
    targets = box_stretch
);
criterion_main!(benches);
