use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use mesh_overlap::prelude::*;

fn unit_square(n: usize) -> (NativeMesh2d, Vec<BoundingBox<2, f32>>) {
    let mesh =
        NativeMesh::subdivided_hyper_rectangle(&NoComm, [n, n], [0.0, 0.0], [1.0, 1.0]).unwrap();
    let boxes = mesh
        .active_cells()
        .iter()
        .map(|&c| mesh.bounding_box(c).unwrap().to_f32())
        .collect();
    (mesh, boxes)
}

fn bench_overlap_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("overlap-mesh");
    for &n in &[16usize, 64, 128] {
        let (mesh, boxes) = unit_square(n);
        // a quarter of the domain
        let region = vec![BoundingBox::new([0.0, 0.0], [0.5, 0.5])];
        let predicate = BoxIntersectionPredicate::new(&mesh, boxes, region).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| OverlapMesh::new(&mesh, &predicate, 1e-12).unwrap())
        });
    }
    group.finish();
}

fn bench_scatter_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("scatter-round-trip");
    for &n in &[16usize, 64] {
        let (mesh, boxes) = unit_square(n);
        let mesh = Arc::new(mesh);
        let hierarchy = Arc::new(CartesianPatchHierarchy::slabs(
            &NoComm,
            [0.0, 0.0],
            [1.0, 1.0],
            [2 * n, 2 * n],
        ));
        let mut base = InteractionBase::new(
            &NoComm,
            mesh.clone(),
            boxes,
            hierarchy,
            0,
            InteractionConfig::default(),
        )
        .unwrap();
        let handler = Arc::new(FieldHandler::new(&mesh, FiniteElement::q1(2)).unwrap());
        base.add_field_handler(handler.clone()).unwrap();
        let scatter = base.get_scatter(&handler).unwrap();
        let mut native = handler.create_vector();
        native.fill_with(|g| g as f64);
        let mut overlap = vec![0.0; scatter.n_overlap()];

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let p = scatter
                    .global_to_overlap_start(&NoComm, 0, &native, &mut overlap)
                    .unwrap();
                scatter.global_to_overlap_finish(p, &mut overlap).unwrap();
                native.zero();
                let p = scatter
                    .overlap_to_global_start::<AddDelta, _>(&NoComm, 0, &overlap, &mut native)
                    .unwrap();
                scatter
                    .overlap_to_global_finish::<AddDelta, _>(p, &mut native)
                    .unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_overlap_construction, bench_scatter_round_trip);
criterion_main!(benches);
