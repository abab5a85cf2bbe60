//! Global per-cell bounding boxes from a finite-element position field.

use crate::algs::collective::all_reduce_sum;
use crate::algs::communicator::{Communicator, setup_tags};
use crate::algs::exchange::ExchangePlan;
use crate::data::vector::DistributedVector;
use crate::dofs::field_handler::FieldHandler;
use crate::geometry::bbox::BoundingBox;
use crate::mesh_error::MeshOverlapError;
use crate::topology::native_mesh::NativeMesh;

/// Collective: box of every active cell, spanned by the values of `position`
/// at the cell's support points.
///
/// Each rank evaluates the boxes of its own cells (fetching ghost dofs from
/// their owners) and zero elsewhere; a summing all-reduce then gives every
/// rank the full list. Boxes are rounded outward to `f32`. A box with no
/// volume is rejected.
pub fn compute_cell_bboxes<C: Communicator, const DIM: usize, const SPACEDIM: usize>(
    comm: &C,
    mesh: &NativeMesh<DIM, SPACEDIM>,
    handler: &FieldHandler<DIM, SPACEDIM>,
    position: &DistributedVector,
) -> Result<Vec<BoundingBox<SPACEDIM, f32>>, MeshOverlapError> {
    if handler.mesh_id() != mesh.id() {
        return Err(MeshOverlapError::ForeignFieldHandler);
    }
    if !comm.is_congruent(position.group()) {
        return Err(MeshOverlapError::CommunicatorMismatch(
            "position vector and communicator span different process groups",
        ));
    }
    if handler.fe().n_components != SPACEDIM {
        return Err(MeshOverlapError::VectorLengthMismatch {
            expected: SPACEDIM,
            found: handler.fe().n_components,
        });
    }
    let owned_range = handler.locally_owned_range();
    if position.owned().len() != owned_range.len() {
        return Err(MeshOverlapError::VectorLengthMismatch {
            expected: owned_range.len(),
            found: position.owned().len(),
        });
    }

    let owned: Vec<usize> = mesh.locally_owned_active().collect();
    let mut sources = Vec::new();
    for &a in &owned {
        for &g in handler.cell_dofs(a) {
            let src = handler.partitioning().locate(g).ok_or_else(|| {
                MeshOverlapError::InternalError(format!("dof {g} outside the numbering"))
            })?;
            sources.push(src);
        }
    }
    let plan = ExchangePlan::build(comm, setup_tags::GHOST_FETCH, owned_range.len(), &sources)?;
    let mut values = vec![0.0f64; sources.len()];
    let pending = plan.forward_start(
        comm,
        setup_tags::GHOST_FETCH.offset(2),
        position.owned(),
        &mut values,
    )?;
    plan.forward_finish(pending, &mut values)?;

    let width = 2 * SPACEDIM;
    let mut flat = vec![0.0f32; mesh.n_active_cells() * width];
    let fe = handler.fe();
    let mut cursor = 0;
    for &a in &owned {
        let n_vertices = mesh.cell_vertices(mesh.active_cells()[a])?.len();
        let n_dofs = handler.cell_dofs(a).len();
        let n_support = n_vertices + usize::from(fe.dofs_per_cell_interior > 0);
        let mut points: Vec<Option<[f64; SPACEDIM]>> = vec![None; n_support];
        for (i, &value) in values[cursor..cursor + n_dofs].iter().enumerate() {
            let (s, c) = fe.support_and_component(i, n_vertices);
            points[s].get_or_insert([0.0; SPACEDIM])[c] = value;
        }
        cursor += n_dofs;
        // only support points carrying dofs span the box
        let Some(bbox) = BoundingBox::from_points(points.iter().flatten()) else {
            continue;
        };
        let bbox = bbox.to_f32();
        flat[a * width..a * width + SPACEDIM].copy_from_slice(&bbox.lower);
        flat[a * width + SPACEDIM..(a + 1) * width].copy_from_slice(&bbox.upper);
    }

    all_reduce_sum(comm, setup_tags::ALL_REDUCE, &mut flat)?;

    flat.chunks_exact(width)
        .enumerate()
        .map(|(a, chunk)| {
            let bbox = BoundingBox::new(
                std::array::from_fn(|d| chunk[d]),
                std::array::from_fn(|d| chunk[SPACEDIM + d]),
            );
            if bbox.volume() > 0.0 {
                Ok(bbox)
            } else {
                Err(MeshOverlapError::DegenerateBoundingBox(a))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::dofs::fe::FiniteElement;
    use crate::topology::native_mesh::{NativeMesh1d2, NativeMesh2d};

    fn interpolate_identity<const D: usize, const S: usize>(
        handler: &FieldHandler<D, S>,
    ) -> DistributedVector {
        let mut x = handler.create_vector();
        x.fill_with(|g| {
            let comps = handler.fe().n_components;
            // component of dof g: q1 numbers the components of a vertex consecutively
            handler.support_point(g)[g % comps]
        });
        x
    }

    #[test]
    fn serial_boxes_match_geometry() {
        let mesh: NativeMesh2d =
            NativeMesh::subdivided_hyper_rectangle(&NoComm, [2, 2], [0.0, 0.0], [2.0, 1.0]).unwrap();
        let h = FieldHandler::new(&mesh, FiniteElement::q1(2)).unwrap();
        let x = interpolate_identity(&h);
        let boxes = compute_cell_bboxes(&NoComm, &mesh, &h, &x).unwrap();
        assert_eq!(boxes.len(), 4);
        assert_eq!(boxes[3].lower, [1.0, 0.5]);
        assert_eq!(boxes[3].upper, [2.0, 1.0]);
    }

    #[test]
    fn boxes_are_reduced_across_ranks() {
        let comms = LocalComm::universe(2);
        let results: Vec<Vec<BoundingBox<2, f32>>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let mut mesh: NativeMesh2d = NativeMesh::subdivided_hyper_rectangle(
                            c,
                            [4, 1],
                            [0.0, 0.0],
                            [4.0, 1.0],
                        )
                        .unwrap();
                        mesh.partition_contiguous();
                        let h = FieldHandler::new(&mesh, FiniteElement::q1(2)).unwrap();
                        let x = interpolate_identity(&h);
                        compute_cell_bboxes(c, &mesh, &h, &x).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], results[1]);
        for (a, b) in results[0].iter().enumerate() {
            assert_eq!(b.lower, [a as f32, 0.0]);
            assert_eq!(b.upper, [a as f32 + 1.0, 1.0]);
        }
    }

    #[test]
    fn cell_constant_positions_give_point_boxes() {
        let mesh: NativeMesh2d =
            NativeMesh::subdivided_hyper_rectangle(&NoComm, [2, 2], [10.0, 10.0], [11.0, 11.0])
                .unwrap();
        let h = FieldHandler::new(&mesh, FiniteElement::dgq0(2)).unwrap();
        let x = interpolate_identity(&h);
        let err = compute_cell_bboxes(&NoComm, &mesh, &h, &x).unwrap_err();
        assert_eq!(err, MeshOverlapError::DegenerateBoundingBox(0));
    }

    #[test]
    fn flat_cells_are_rejected() {
        let mesh: NativeMesh1d2 =
            NativeMesh::subdivided_hyper_rectangle(&NoComm, [2], [0.0], [1.0]).unwrap();
        let h = FieldHandler::new(&mesh, FiniteElement::q1(2)).unwrap();
        let x = interpolate_identity(&h);
        let err = compute_cell_bboxes(&NoComm, &mesh, &h, &x).unwrap_err();
        assert_eq!(err, MeshOverlapError::DegenerateBoundingBox(0));
    }
}
