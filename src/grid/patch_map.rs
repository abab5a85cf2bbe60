//! For every local patch, the overlap cells whose (global) bounding box
//! touches the ghost-grown patch box. Integration collaborators loop over
//! these pairs.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::geometry::bbox::BoundingBox;
use crate::mesh_error::MeshOverlapError;
use crate::grid::overlap_mesh::OverlapMesh;

#[derive(Clone, Debug, Default)]
pub struct PatchMap {
    /// ordered overlap cell positions per patch, ascending
    cells: Vec<Vec<usize>>,
}

impl PatchMap {
    /// `cell_bboxes[a]` is the global box of native active cell `a`;
    /// `patch_bboxes` are the grown local patch boxes.
    pub fn new<const DIM: usize, const SPACEDIM: usize>(
        overlap: &OverlapMesh<DIM, SPACEDIM>,
        cell_bboxes: &[BoundingBox<SPACEDIM, f32>],
        patch_bboxes: &[BoundingBox<SPACEDIM>],
    ) -> Result<Self, MeshOverlapError> {
        if let Some(&a) = overlap
            .ordered_native_active()
            .iter()
            .find(|&&a| a >= cell_bboxes.len())
        {
            return Err(MeshOverlapError::BoundingBoxCount {
                expected: a + 1,
                found: cell_bboxes.len(),
            });
        }
        let for_patch = |patch: &BoundingBox<SPACEDIM>| -> Vec<usize> {
            overlap
                .ordered_native_active()
                .iter()
                .enumerate()
                .filter(|&(_, &a)| cell_bboxes[a].intersects(patch))
                .map(|(k, _)| k)
                .collect()
        };
        #[cfg(feature = "rayon")]
        let cells = patch_bboxes.par_iter().map(for_patch).collect();
        #[cfg(not(feature = "rayon"))]
        let cells = patch_bboxes.iter().map(for_patch).collect();
        Ok(Self { cells })
    }

    pub fn n_patches(&self) -> usize {
        self.cells.len()
    }

    /// Ordered overlap cell positions touching patch `p`.
    pub fn cells(&self, p: usize) -> &[usize] {
        &self.cells[p]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.cells.iter().map(Vec::as_slice).enumerate()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::grid::intersection_predicate::TriaIntersectionPredicate;
    use crate::topology::native_mesh::{NativeMesh, NativeMesh2d};

    #[test]
    fn cells_are_sorted_per_patch() {
        let mesh: NativeMesh2d =
            NativeMesh::subdivided_hyper_rectangle(&NoComm, [4, 1], [0.0, 0.0], [4.0, 1.0]).unwrap();
        let overlap = OverlapMesh::new(&mesh, &TriaIntersectionPredicate::new(vec![]), 1e-12).unwrap();
        let boxes: Vec<_> = mesh
            .active_cells()
            .iter()
            .map(|&c| mesh.bounding_box(c).unwrap().to_f32())
            .collect();
        let patches = [
            BoundingBox::new([0.5, 0.2], [1.5, 0.8]),
            BoundingBox::new([10.0, 0.0], [11.0, 1.0]),
        ];
        let map = PatchMap::new(&overlap, &boxes, &patches).unwrap();
        assert_eq!(map.n_patches(), 2);
        assert_eq!(map.cells(0), &[0, 1]);
        assert!(map.cells(1).is_empty());
        assert!(!map.is_empty());
    }
}
