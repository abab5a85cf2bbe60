//! Overlap-local dof → native global dof.

use itertools::Itertools;

use crate::dofs::field_handler::FieldHandler;
use crate::dofs::overlap_handler::OverlapFieldHandler;
use crate::grid::overlap_mesh::OverlapMesh;
use crate::mesh_error::MeshOverlapError;
use crate::topology::native_mesh::NativeMesh;

/// Build the translation table `table[overlap dof] = native dof`.
///
/// Overlap cells are visited in native active order and their local dofs
/// matched positionally with the dofs of the native origin. Every origin is
/// checked for geometric agreement; a dof reached from two cells must map to
/// the same native dof both times.
pub fn compute_translation<const DIM: usize, const SPACEDIM: usize>(
    native_mesh: &NativeMesh<DIM, SPACEDIM>,
    overlap: &OverlapMesh<DIM, SPACEDIM>,
    native: &FieldHandler<DIM, SPACEDIM>,
    overlap_handler: &OverlapFieldHandler<DIM, SPACEDIM>,
) -> Result<Vec<usize>, MeshOverlapError> {
    if native.fe() != overlap_handler.fe() {
        return Err(MeshOverlapError::InternalError(
            "overlap handler uses a different element than its native handler".into(),
        ));
    }
    let mut table: Vec<Option<usize>> = vec![None; overlap_handler.n_dofs()];
    for (k, &cell) in overlap.ordered_cells().iter().enumerate() {
        let origin = overlap.native_cell(native_mesh, cell)?;
        let a = native_mesh
            .active_index(origin)?
            .ok_or(MeshOverlapError::MissingCell(origin))?;
        let pairs = overlap_handler
            .cell_dofs(k)
            .iter()
            .zip_eq(native.cell_dofs(a));
        for (&o, &g) in pairs {
            match table[o] {
                None => table[o] = Some(g),
                Some(prev) if prev == g => {}
                Some(prev) => {
                    return Err(MeshOverlapError::InconsistentTranslation {
                        overlap: o,
                        first: prev,
                        second: g,
                    });
                }
            }
        }
    }
    table
        .into_iter()
        .enumerate()
        .map(|(o, g)| {
            g.ok_or_else(|| MeshOverlapError::InternalError(format!("overlap dof {o} not reached")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::dofs::fe::FiniteElement;
    use crate::geometry::bbox::BoundingBox;
    use crate::grid::intersection_predicate::TriaIntersectionPredicate;
    use crate::topology::native_mesh::NativeMesh2d;

    #[test]
    fn serial_translation_is_identity() {
        let mut mesh: NativeMesh2d =
            NativeMesh::subdivided_hyper_rectangle(&NoComm, [3, 2], [0.0, 0.0], [3.0, 2.0]).unwrap();
        mesh.refine_active(&[true, false, false, false, false, true]).unwrap();
        let overlap = OverlapMesh::new(&mesh, &TriaIntersectionPredicate::new(vec![]), 1e-12).unwrap();
        for fe in [FiniteElement::q1(2), FiniteElement::dgq0(1)] {
            let native = FieldHandler::new(&mesh, fe).unwrap();
            let local = OverlapFieldHandler::new(&overlap, fe).unwrap();
            let table = compute_translation(&mesh, &overlap, &native, &local).unwrap();
            assert_eq!(table, (0..native.n_dofs()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn shared_vertices_translate_once() {
        let comms = LocalComm::universe(2);
        let mut mesh: NativeMesh2d =
            NativeMesh::subdivided_hyper_rectangle(&comms[1], [3, 1], [0.0, 0.0], [3.0, 1.0])
                .unwrap();
        mesh.set_owners(vec![0, 0, 1]).unwrap();
        let region = TriaIntersectionPredicate::new(vec![BoundingBox::new([0.2, 0.2], [0.4, 0.4])]);
        let overlap = OverlapMesh::new(&mesh, &region, 1e-12).unwrap();
        assert_eq!(overlap.ordered_native_active(), &[0, 2]);
        let native = FieldHandler::new(&mesh, FiniteElement::q1(1)).unwrap();
        let local = OverlapFieldHandler::new(&overlap, FiniteElement::q1(1)).unwrap();
        let table = compute_translation(&mesh, &overlap, &native, &local).unwrap();
        assert_eq!(table.len(), 8);
        for (k, &a) in overlap.ordered_native_active().iter().enumerate() {
            let mapped: Vec<usize> = local.cell_dofs(k).iter().map(|&o| table[o]).collect();
            assert_eq!(mapped, native.cell_dofs(a));
        }
    }
}
