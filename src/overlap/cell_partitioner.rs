//! Ghost exchange of one small value per active cell, from native ownership
//! to the overlap partitioning.
//!
//! The owned array holds one entry per locally owned active cell (ascending
//! active index). The ghosted array holds one entry per ordered overlap cell.
//! The plan is computed once; callers own scratch and request storage, sized
//! with [`ActiveCellPartitioner::temporary_storage_size`] and
//! [`ActiveCellPartitioner::n_targets`], so repeated exchanges do not
//! allocate inside the partitioner.

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, setup_tags};
use crate::algs::exchange::{CommRequest, ExchangePlan};
use crate::grid::overlap_mesh::OverlapMesh;
use crate::mesh_error::MeshOverlapError;
use crate::topology::native_mesh::NativeMesh;

#[derive(Clone, Debug)]
pub struct ActiveCellPartitioner {
    plan: ExchangePlan,
}

impl ActiveCellPartitioner {
    /// Collective.
    pub fn new<C: Communicator, const DIM: usize, const SPACEDIM: usize>(
        comm: &C,
        native: &NativeMesh<DIM, SPACEDIM>,
        overlap: &OverlapMesh<DIM, SPACEDIM>,
    ) -> Result<Self, MeshOverlapError> {
        // offset of every active cell inside its owner's owned list
        let mut seen = vec![0usize; native.n_ranks()];
        let owner_offset: Vec<usize> = native
            .owners()
            .iter()
            .map(|&r| {
                seen[r] += 1;
                seen[r] - 1
            })
            .collect();
        let sources: Vec<(usize, usize)> = overlap
            .ordered_native_active()
            .iter()
            .map(|&a| (native.owner(a), owner_offset[a]))
            .collect();
        let n_owned = native.n_locally_owned_active_cells();
        let plan = ExchangePlan::build(comm, setup_tags::PLAN.offset(4), n_owned, &sources)?;
        Ok(Self { plan })
    }

    /// Locally owned active cells.
    pub fn n_owned(&self) -> usize {
        self.plan.n_owned()
    }

    /// Ordered overlap cells (owned and ghost).
    pub fn n_ghosted(&self) -> usize {
        self.plan.n_targets()
    }

    pub fn temporary_storage_size(&self) -> usize {
        self.plan.temporary_storage_size()
    }

    /// Number of peer messages (request slots) of one exchange.
    pub fn n_targets(&self) -> usize {
        self.plan.n_requests()
    }

    pub fn export_to_ghosted_array_start<T: Pod, C: Communicator>(
        &self,
        comm: &C,
        channel: u16,
        locally_owned: &[T],
        temporary_storage: &mut [T],
        requests: &mut Vec<CommRequest<C>>,
    ) -> Result<(), MeshOverlapError> {
        let tag = CommTag::channel(channel)?;
        self.plan
            .export_start(comm, tag, locally_owned, temporary_storage, requests)
    }

    pub fn export_to_ghosted_array_finish<T: Pod, C: Communicator>(
        &self,
        temporary_storage: &[T],
        ghost_array: &mut [T],
        requests: &mut Vec<CommRequest<C>>,
    ) -> Result<(), MeshOverlapError> {
        self.plan
            .export_finish(temporary_storage, ghost_array, requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::geometry::bbox::BoundingBox;
    use crate::grid::intersection_predicate::TriaIntersectionPredicate;
    use crate::topology::native_mesh::NativeMesh2d;

    #[test]
    fn quadrature_indices_follow_overlap_cells() {
        let comms = LocalComm::universe(2);
        let results: Vec<Vec<u8>> = std::thread::scope(|s| {
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
                        mesh.set_owners(vec![0, 1, 0, 1]).unwrap();
                        // every rank looks at the whole strip
                        let all = TriaIntersectionPredicate::new(vec![BoundingBox::new(
                            [0.0, 0.0],
                            [4.0, 1.0],
                        )]);
                        let overlap = OverlapMesh::new(&mesh, &all, 1e-12).unwrap();
                        let part = ActiveCellPartitioner::new(c, &mesh, &overlap).unwrap();
                        assert_eq!(part.n_owned(), 2);
                        assert_eq!(part.n_ghosted(), 4);

                        // value of a cell: 10 * owner + active index
                        let owned: Vec<u8> = mesh
                            .locally_owned_active()
                            .map(|a| (10 * c.rank() + a) as u8)
                            .collect();
                        let mut work = vec![0u8; part.temporary_storage_size()];
                        let mut requests = Vec::with_capacity(part.n_targets());
                        part.export_to_ghosted_array_start(c, 1, &owned, &mut work, &mut requests)
                            .unwrap();
                        let mut ghosted = vec![0u8; part.n_ghosted()];
                        part.export_to_ghosted_array_finish(&work, &mut ghosted, &mut requests)
                            .unwrap();
                        ghosted
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for ghosted in results {
            assert_eq!(ghosted, vec![0, 11, 2, 13]);
        }
    }
}
