//! Global dof numbering on the native mesh.
//!
//! Owned dofs are numbered first by rank (ascending), then in active-cell
//! order within each rank, so each rank owns one contiguous range. A vertex
//! dof belongs to the lowest-ranked owner among the active cells touching the
//! vertex; interior dofs belong to the cell owner. The mesh is replicated, so
//! every rank computes the same numbering without communication.

use std::sync::Arc;

use crate::algs::communicator::GroupId;
use crate::data::partitioning::Partitioning;
use crate::data::vector::DistributedVector;
use crate::dofs::fe::FiniteElement;
use crate::mesh_error::MeshOverlapError;
use crate::topology::cell::MeshId;
use crate::topology::native_mesh::NativeMesh;

#[derive(Debug)]
pub struct FieldHandler<const DIM: usize, const SPACEDIM: usize> {
    fe: FiniteElement,
    mesh_id: MeshId,
    group: GroupId,
    rank: usize,
    cell_dofs: Vec<Vec<usize>>,
    support_points: Vec<[f64; SPACEDIM]>,
    partitioning: Arc<Partitioning>,
}

impl<const DIM: usize, const SPACEDIM: usize> FieldHandler<DIM, SPACEDIM> {
    pub fn new(
        mesh: &NativeMesh<DIM, SPACEDIM>,
        fe: FiniteElement,
    ) -> Result<Self, MeshOverlapError> {
        let n_active = mesh.n_active_cells();
        let active_vertices = mesh
            .active_cells()
            .iter()
            .map(|&cell| mesh.cell_vertices(cell))
            .collect::<Result<Vec<_>, _>>()?;
        let mut vertex_owner = vec![usize::MAX; mesh.n_vertices()];
        for (a, vs) in active_vertices.iter().enumerate() {
            for &v in *vs {
                vertex_owner[v] = vertex_owner[v].min(mesh.owner(a));
            }
        }

        let mut vertex_start = vec![None; mesh.n_vertices()];
        let mut interior_start = vec![0; n_active];
        let mut sizes = vec![0; mesh.n_ranks()];
        let mut next = 0;
        for (r, size) in sizes.iter_mut().enumerate() {
            let begin = next;
            for (a, vs) in active_vertices.iter().enumerate() {
                if mesh.owner(a) != r {
                    continue;
                }
                for &v in *vs {
                    if vertex_owner[v] == r && vertex_start[v].is_none() {
                        vertex_start[v] = Some(next);
                        next += fe.dofs_per_vertex;
                    }
                }
                interior_start[a] = next;
                next += fe.dofs_per_cell_interior;
            }
            *size = next - begin;
        }

        let mut support_points = vec![[0.0; SPACEDIM]; next];
        let mut cell_dofs = Vec::with_capacity(n_active);
        for (a, (&cell, vs)) in mesh.active_cells().iter().zip(&active_vertices).enumerate() {
            let mut dofs = Vec::with_capacity(fe.dofs_per_cell(vs.len()));
            for &v in *vs {
                let Some(start) = vertex_start[v] else {
                    if fe.dofs_per_vertex == 0 {
                        continue;
                    }
                    return Err(MeshOverlapError::InternalError(format!(
                        "vertex {v} of active cell {a} was never numbered"
                    )));
                };
                for k in 0..fe.dofs_per_vertex {
                    dofs.push(start + k);
                    support_points[start + k] = *mesh.vertex(v);
                }
            }
            if fe.dofs_per_cell_interior > 0 {
                let center = mesh.barycenter(cell)?;
                for k in 0..fe.dofs_per_cell_interior {
                    dofs.push(interior_start[a] + k);
                    support_points[interior_start[a] + k] = center;
                }
            }
            cell_dofs.push(dofs);
        }

        log::debug!(
            "rank {}: field handler with {next} dofs ({} owned)",
            mesh.rank(),
            sizes.get(mesh.rank()).copied().unwrap_or(0)
        );
        Ok(Self {
            fe,
            mesh_id: mesh.id(),
            group: mesh.group(),
            rank: mesh.rank(),
            cell_dofs,
            support_points,
            partitioning: Arc::new(Partitioning::from_sizes(&sizes)),
        })
    }

    pub fn fe(&self) -> &FiniteElement {
        &self.fe
    }

    /// Native mesh state the numbering was computed on.
    pub fn mesh_id(&self) -> MeshId {
        self.mesh_id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn n_dofs(&self) -> usize {
        self.partitioning.n_global()
    }

    /// Global dofs of native active cell `a`, in local dof order.
    pub fn cell_dofs(&self, a: usize) -> &[usize] {
        &self.cell_dofs[a]
    }

    pub fn support_point(&self, g: usize) -> &[f64; SPACEDIM] {
        &self.support_points[g]
    }

    pub fn partitioning(&self) -> &Arc<Partitioning> {
        &self.partitioning
    }

    pub fn locally_owned_range(&self) -> std::ops::Range<usize> {
        self.partitioning.range(self.rank)
    }

    /// Zero vector laid out like this handler's dofs.
    pub fn create_vector(&self) -> DistributedVector {
        DistributedVector::new(Arc::clone(&self.partitioning), self.rank, self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::topology::native_mesh::NativeMesh2d;

    fn strip(rank: usize) -> NativeMesh2d {
        let comms = LocalComm::universe(2);
        let mut mesh =
            NativeMesh::subdivided_hyper_rectangle(&comms[rank], [3, 1], [0.0, 0.0], [3.0, 1.0])
                .unwrap();
        mesh.set_owners(vec![1, 0, 1]).unwrap();
        mesh
    }

    #[test]
    fn owned_ranges_are_contiguous_by_rank() {
        let mesh = strip(0);
        let h = FieldHandler::new(&mesh, FiniteElement::q1(1)).unwrap();
        assert_eq!(h.n_dofs(), 8);
        // rank 0 owns the middle cell: all four of its vertices
        assert_eq!(h.locally_owned_range(), 0..4);
        assert_eq!(h.partitioning().range(1), 4..8);
        assert_eq!(h.cell_dofs(1), &[0, 1, 2, 3]);
        // shared vertices of the outer cells carry rank 0 dofs
        assert_eq!(h.cell_dofs(0), &[4, 0, 5, 2]);
        assert_eq!(h.support_point(1), &[2.0, 0.0]);
    }

    #[test]
    fn numbering_agrees_across_ranks() {
        let a = FieldHandler::new(&strip(0), FiniteElement::q1(2)).unwrap();
        let b = FieldHandler::new(&strip(1), FiniteElement::q1(2)).unwrap();
        for cell in 0..3 {
            assert_eq!(a.cell_dofs(cell), b.cell_dofs(cell));
        }
        assert_eq!(b.locally_owned_range(), 8..16);
    }

    #[test]
    fn refined_cells_carry_their_own_geometry() {
        let mut mesh = strip(0);
        mesh.refine_active(&[true, false, false]).unwrap();
        let h = FieldHandler::new(&mesh, FiniteElement::dgq0(1)).unwrap();
        assert_eq!(h.n_dofs(), 6);
        for (a, &cell) in mesh.active_cells().iter().enumerate() {
            let center = mesh.barycenter(cell).unwrap();
            assert_eq!(h.support_point(h.cell_dofs(a)[0]), &center);
        }
    }

    #[test]
    fn interior_dofs_follow_cell_owner() {
        let h = FieldHandler::new(&strip(1), FiniteElement::dgq0(1)).unwrap();
        assert_eq!(h.cell_dofs(1), &[0]);
        assert_eq!(h.cell_dofs(0), &[1]);
        assert_eq!(h.cell_dofs(2), &[2]);
        assert_eq!(h.support_point(2), &[2.5, 0.5]);
        assert_eq!(h.create_vector().owned().len(), 2);
    }
}
