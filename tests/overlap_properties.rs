mod util;

use std::sync::Arc;

use mesh_overlap::algs::collective::all_reduce_sum;
use mesh_overlap::prelude::*;
use util::*;

const SUM: CommTag = CommTag::new(0x0200);

struct World {
    mesh: Arc<NativeMesh2d>,
    base: InteractionBase<LocalComm, 2, 2>,
    handler: Arc<FieldHandler<2, 2>>,
}

/// `n × n` unit square, every third cell refined once, random owners, one
/// slab patch per rank over a `2n × 2n` grid.
fn world(comm: &LocalComm, n: usize, seed: u64, fe: FiniteElement) -> World {
    let mut mesh = unit_square(comm, n);
    let flags: Vec<bool> = (0..mesh.n_active_cells()).map(|a| a % 3 == 0).collect();
    mesh.refine_active(&flags).unwrap();
    shuffle_owners(&mut mesh, seed);
    let bboxes = vertex_bboxes(&mesh);
    let mesh = Arc::new(mesh);
    let hierarchy = Arc::new(CartesianPatchHierarchy::slabs(
        comm,
        [0.0, 0.0],
        [1.0, 1.0],
        [2 * n, 2 * n],
    ));
    let mut base = InteractionBase::new(
        comm,
        mesh.clone(),
        bboxes,
        hierarchy,
        0,
        InteractionConfig::default(),
    )
    .unwrap();
    let handler = Arc::new(FieldHandler::new(&mesh, fe).unwrap());
    base.add_field_handler(handler.clone()).unwrap();
    World {
        mesh,
        base,
        handler,
    }
}

#[test]
fn overlap_cells_coincide_with_their_native_origin() {
    run_ranks(3, |c| {
        let w = world(&c, 6, 11, FiniteElement::q1(1));
        let overlap = w.base.overlap_mesh();
        assert!(!overlap.is_empty());
        for &cell in overlap.ordered_cells() {
            let origin = overlap.native_cell(&w.mesh, cell).unwrap();
            let (a, b) = (
                overlap.barycenter(cell).unwrap(),
                w.mesh.barycenter(origin).unwrap(),
            );
            for d in 0..2 {
                assert_close(a[d], b[d], 1e-14);
            }
        }
        // ordering follows the native active index
        let natives = overlap.ordered_native_active();
        assert!(natives.windows(2).all(|p| p[0] < p[1]));
    });
}

#[test]
fn owned_and_touching_cells_are_all_present() {
    run_ranks(3, |c| {
        let w = world(&c, 6, 23, FiniteElement::q1(1));
        let overlap = w.base.overlap_mesh();
        for a in w.mesh.locally_owned_active() {
            assert!(overlap.ordered_position(a).is_some(), "owned cell {a} missing");
        }
        let boxes = w.base.global_bboxes();
        for a in 0..w.mesh.n_active_cells() {
            let touches = w
                .base
                .patch_bboxes()
                .iter()
                .any(|patch| boxes[a].intersects(patch));
            let owned = w.mesh.owner(a) == c.rank();
            assert_eq!(
                overlap.ordered_position(a).is_some(),
                touches || owned,
                "active cell {a}"
            );
        }
        // patch map entries are ordered overlap positions that touch the patch
        for (p, cells) in w.base.patch_map().iter() {
            let patch = &w.base.patch_bboxes()[p];
            for &k in cells {
                let a = overlap.ordered_native_active()[k];
                assert!(boxes[a].intersects(patch));
            }
        }
    });
}

#[test]
fn single_process_translation_is_the_identity() {
    run_ranks(1, |c| {
        let w = world(&c, 3, 5, FiniteElement::q1(1));
        let n = w.handler.n_dofs();
        let identity: Vec<usize> = (0..n).collect();
        assert_eq!(w.base.get_translation(&w.handler).unwrap(), identity.as_slice());

        let scatter = w.base.get_scatter(&w.handler).unwrap();
        let comm = w.base.communicator();
        let mut native = w.handler.create_vector();
        native.fill_with(|g| g as f64);
        let mut overlap = vec![0.0; scatter.n_overlap()];
        let p = scatter
            .global_to_overlap_start(comm, 0, &native, &mut overlap)
            .unwrap();
        scatter.global_to_overlap_finish(p, &mut overlap).unwrap();

        let mut back = w.handler.create_vector();
        let p = scatter
            .overlap_to_global_start::<AddDelta, _>(comm, 0, &overlap, &mut back)
            .unwrap();
        scatter
            .overlap_to_global_finish::<AddDelta, _>(p, &mut back)
            .unwrap();
        assert_eq!(back.owned(), native.owned());
    });
}

#[test]
fn scattered_values_match_support_points() {
    let f = |x: &[f64; 2]| 1.0 + x[0] - 3.0 * x[1];
    run_ranks(3, |c| {
        // vertex and interior dofs
        let fe = FiniteElement {
            n_components: 1,
            dofs_per_vertex: 1,
            dofs_per_cell_interior: 1,
        };
        let w = world(&c, 5, 7, fe);
        let scatter = w.base.get_scatter(&w.handler).unwrap();
        let overlap_handler = w.base.get_overlap_field_handler(&w.handler).unwrap();
        let mut native = w.handler.create_vector();
        native.fill_with(|g| f(w.handler.support_point(g)));
        let mut overlap = vec![0.0; scatter.n_overlap()];
        let p = scatter
            .global_to_overlap_start(w.base.communicator(), 3, &native, &mut overlap)
            .unwrap();
        scatter.global_to_overlap_finish(p, &mut overlap).unwrap();
        assert_eq!(overlap.len(), overlap_handler.n_dofs());
        for (i, v) in overlap.iter().enumerate() {
            assert_close(*v, f(overlap_handler.support_point(i)), 1e-12);
        }
    });
}

#[test]
fn accumulation_counts_every_reference() {
    run_ranks(3, |c| {
        let w = world(&c, 6, 31, FiniteElement::q1(1));
        let translation = w.base.get_translation(&w.handler).unwrap();
        let mut counts = vec![0.0f64; w.handler.n_dofs()];
        for &g in translation {
            counts[g] += 1.0;
        }
        all_reduce_sum(&c, SUM, &mut counts).unwrap();

        let scatter = w.base.get_scatter(&w.handler).unwrap();
        let ones = vec![1.0; scatter.n_overlap()];
        let mut native = w.handler.create_vector();
        let p = scatter
            .overlap_to_global_start::<AddDelta, _>(w.base.communicator(), 0, &ones, &mut native)
            .unwrap();
        scatter
            .overlap_to_global_finish::<AddDelta, _>(p, &mut native)
            .unwrap();
        for g in w.handler.locally_owned_range() {
            assert_eq!(native.get(g).unwrap(), counts[g], "dof {g}");
        }
    });
}

#[test]
fn ghost_width_controls_the_overlap() {
    let sizes = |ghost_cell_width: f64| {
        run_ranks(2, move |c| {
            let mesh = Arc::new(unit_square(&c, 4));
            let hierarchy = Arc::new(CartesianPatchHierarchy::slabs(
                &c,
                [0.0, 0.0],
                [1.0, 1.0],
                [8, 8],
            ));
            let config = InteractionConfig {
                ghost_cell_width,
                ..InteractionConfig::default()
            };
            let base =
                InteractionBase::new(&c, mesh.clone(), vertex_bboxes(&mesh), hierarchy, 0, config)
                    .unwrap();
            base.overlap_mesh().n_active_cells()
        })
    };
    // rank 0: slab x in [0, 0.5], owns the bottom two rows
    assert_eq!(sizes(0.0)[0], 14);
    assert_eq!(sizes(3.0)[0], 16);
}
