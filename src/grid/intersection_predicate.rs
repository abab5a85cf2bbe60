//! Predicates deciding whether a native cell lies in the region of interest.
//!
//! A cell intersects the region iff its bounding box intersects at least one
//! region box. Refined cells without a box of their own ask their children.

use crate::algs::communicator::Communicator;
use crate::data::vector::DistributedVector;
use crate::dofs::cell_bboxes::compute_cell_bboxes;
use crate::dofs::field_handler::FieldHandler;
use crate::geometry::bbox::BoundingBox;
use crate::mesh_error::MeshOverlapError;
use crate::topology::cell::CellId;
use crate::topology::native_mesh::NativeMesh;

pub trait IntersectionPredicate<const DIM: usize, const SPACEDIM: usize> {
    fn intersects(
        &self,
        mesh: &NativeMesh<DIM, SPACEDIM>,
        cell: CellId,
    ) -> Result<bool, MeshOverlapError>;
}

/// Test the cell geometry (vertex bounding box) against region boxes.
#[derive(Clone, Debug)]
pub struct TriaIntersectionPredicate<const S: usize> {
    bboxes: Vec<BoundingBox<S>>,
}

impl<const S: usize> TriaIntersectionPredicate<S> {
    pub fn new(bboxes: Vec<BoundingBox<S>>) -> Self {
        Self { bboxes }
    }
}

impl<const DIM: usize, const SPACEDIM: usize> IntersectionPredicate<DIM, SPACEDIM>
    for TriaIntersectionPredicate<SPACEDIM>
{
    fn intersects(
        &self,
        mesh: &NativeMesh<DIM, SPACEDIM>,
        cell: CellId,
    ) -> Result<bool, MeshOverlapError> {
        let cell_box = mesh.bounding_box(cell)?;
        Ok(self.bboxes.iter().any(|b| cell_box.intersects(b)))
    }
}

/// Test precomputed global per-active-cell boxes against region boxes.
#[derive(Clone, Debug)]
pub struct BoxIntersectionPredicate<const S: usize> {
    cell_bboxes: Vec<BoundingBox<S, f32>>,
    region: Vec<BoundingBox<S>>,
}

impl<const S: usize> BoxIntersectionPredicate<S> {
    /// `cell_bboxes[a]` is the box of active cell `a`.
    pub fn new<const DIM: usize>(
        mesh: &NativeMesh<DIM, S>,
        cell_bboxes: Vec<BoundingBox<S, f32>>,
        region: Vec<BoundingBox<S>>,
    ) -> Result<Self, MeshOverlapError> {
        if cell_bboxes.len() != mesh.n_active_cells() {
            return Err(MeshOverlapError::BoundingBoxCount {
                expected: mesh.n_active_cells(),
                found: cell_bboxes.len(),
            });
        }
        Ok(Self {
            cell_bboxes,
            region,
        })
    }

    pub fn cell_bboxes(&self) -> &[BoundingBox<S, f32>] {
        &self.cell_bboxes
    }

    pub fn region(&self) -> &[BoundingBox<S>] {
        &self.region
    }
}

impl<const DIM: usize, const SPACEDIM: usize> IntersectionPredicate<DIM, SPACEDIM>
    for BoxIntersectionPredicate<SPACEDIM>
{
    fn intersects(
        &self,
        mesh: &NativeMesh<DIM, SPACEDIM>,
        cell: CellId,
    ) -> Result<bool, MeshOverlapError> {
        if let Some(a) = mesh.active_index(cell)? {
            let cell_box = &self.cell_bboxes[a];
            return Ok(self.region.iter().any(|b| cell_box.intersects(b)));
        }
        let children = mesh.children(cell)?;
        if children.is_empty() {
            return Err(MeshOverlapError::InternalError(format!(
                "cell {cell} is neither active nor refined"
            )));
        }
        for child in children {
            if self.intersects(mesh, child)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Like [`BoxIntersectionPredicate`], with cell boxes taken from a
/// finite-element position field instead of the mesh vertices.
#[derive(Clone, Debug)]
pub struct FeIntersectionPredicate<const S: usize> {
    inner: BoxIntersectionPredicate<S>,
}

impl<const S: usize> FeIntersectionPredicate<S> {
    /// Collective: evaluates and reduces the boxes over all ranks of `comm`.
    pub fn new<C: Communicator, const DIM: usize>(
        comm: &C,
        mesh: &NativeMesh<DIM, S>,
        handler: &FieldHandler<DIM, S>,
        position: &DistributedVector,
        region: Vec<BoundingBox<S>>,
    ) -> Result<Self, MeshOverlapError> {
        let boxes = compute_cell_bboxes(comm, mesh, handler, position)?;
        Ok(Self {
            inner: BoxIntersectionPredicate::new(mesh, boxes, region)?,
        })
    }

    pub fn cell_bboxes(&self) -> &[BoundingBox<S, f32>] {
        self.inner.cell_bboxes()
    }
}

impl<const DIM: usize, const SPACEDIM: usize> IntersectionPredicate<DIM, SPACEDIM>
    for FeIntersectionPredicate<SPACEDIM>
{
    fn intersects(
        &self,
        mesh: &NativeMesh<DIM, SPACEDIM>,
        cell: CellId,
    ) -> Result<bool, MeshOverlapError> {
        self.inner.intersects(mesh, cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::native_mesh::NativeMesh3d;

    fn unit_cube_mesh() -> NativeMesh3d {
        NativeMesh::subdivided_hyper_rectangle(&NoComm, [1, 1, 1], [0.0; 3], [1.0; 3]).unwrap()
    }

    fn cube_at(dx: f64) -> BoundingBox<3> {
        BoundingBox::new([dx, 0.0, 0.0], [1.0 + dx, 1.0, 1.0])
    }

    #[test]
    fn tria_predicate_on_unit_cube() {
        let mesh = unit_cube_mesh();
        let cell = CellId::new(0, 0);
        assert!(!TriaIntersectionPredicate::new(vec![cube_at(2.0)]).intersects(&mesh, cell).unwrap());
        assert!(TriaIntersectionPredicate::new(vec![cube_at(0.5)]).intersects(&mesh, cell).unwrap());
        let nested = BoundingBox::new([0.25; 3], [0.5; 3]);
        assert!(TriaIntersectionPredicate::new(vec![nested]).intersects(&mesh, cell).unwrap());
        // any of several boxes suffices
        let p = TriaIntersectionPredicate::new(vec![cube_at(2.0), cube_at(-0.9)]);
        assert!(p.intersects(&mesh, cell).unwrap());
    }

    #[test]
    fn box_predicate_recurses_into_children() {
        let mut mesh = unit_cube_mesh();
        mesh.refine_global().unwrap();
        let boxes = mesh
            .active_cells()
            .iter()
            .map(|&c| mesh.bounding_box(c).unwrap().to_f32())
            .collect();
        let region = vec![BoundingBox::new([0.9; 3], [1.5; 3])];
        let p = BoxIntersectionPredicate::new(&mesh, boxes, region).unwrap();
        assert!(p.intersects(&mesh, CellId::new(0, 0)).unwrap());
        let hits = mesh
            .active_cells()
            .iter()
            .filter(|&&c| p.intersects(&mesh, c).unwrap())
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn box_predicate_needs_one_box_per_active_cell() {
        let mesh = unit_cube_mesh();
        let err = BoxIntersectionPredicate::new(&mesh, vec![], vec![cube_at(0.0)]).unwrap_err();
        assert_eq!(err, MeshOverlapError::BoundingBoxCount { expected: 1, found: 0 });
    }
}
