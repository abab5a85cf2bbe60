#![allow(dead_code)]
use std::panic::{self, AssertUnwindSafe};

use mesh_overlap::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Run `f` on every rank of a fresh in-process group, one thread per rank.
/// Results are returned in rank order.
///
/// A panicking rank aborts the group, so its peers stop waiting for messages
/// it will never send and the test fails instead of hanging. The first
/// panic (by rank) is re-raised.
pub fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalComm) -> R + Sync,
{
    let comms = LocalComm::universe(size);
    let outcomes: Vec<_> = std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                s.spawn(move || {
                    let group = c.clone();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(c)));
                    if outcome.is_err() {
                        group.abort();
                    }
                    outcome
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(Err))
            .collect()
    });
    let mut results = Vec::with_capacity(size);
    for outcome in outcomes {
        match outcome {
            Ok(r) => results.push(r),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
    results
}

/// `[0, 1]^2` split into `n × n` cells, active cells cut into contiguous
/// chunks per rank.
pub fn unit_square<C: Communicator>(comm: &C, n: usize) -> NativeMesh2d {
    let mut mesh =
        NativeMesh::subdivided_hyper_rectangle(comm, [n, n], [0.0, 0.0], [1.0, 1.0]).unwrap();
    mesh.partition_contiguous();
    mesh
}

/// Random owners drawn from a fixed seed, identical on every rank.
pub fn shuffle_owners(mesh: &mut NativeMesh2d, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let owners = (0..mesh.n_active_cells())
        .map(|_| rng.gen_range(0..mesh.n_ranks()))
        .collect();
    mesh.set_owners(owners).unwrap();
}

/// Vertex bounding box of every active cell.
pub fn vertex_bboxes(mesh: &NativeMesh2d) -> Vec<BoundingBox<2, f32>> {
    mesh.active_cells()
        .iter()
        .map(|&c| mesh.bounding_box(c).unwrap().to_f32())
        .collect()
}

/// Bilinear shape function `corner` at reference point `xi`; corners are in
/// lexicographic order.
pub fn q1_shape(corner: usize, xi: &[f64; 2]) -> f64 {
    (0..2)
        .map(|d| if (corner >> d) & 1 == 1 { xi[d] } else { 1.0 - xi[d] })
        .product()
}

/// Map a reference point into an axis-aligned cell.
pub fn map_point(bbox: &BoundingBox<2>, xi: &[f64; 2]) -> [f64; 2] {
    std::array::from_fn(|d| bbox.lower[d] + xi[d] * (bbox.upper[d] - bbox.lower[d]))
}

pub fn assert_close(a: f64, b: f64, tol: f64) {
    assert!((a - b).abs() <= tol, "{a} vs {b} (tol {tol})");
}
