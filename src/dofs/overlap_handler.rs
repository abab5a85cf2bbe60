//! Local dof numbering on the overlap mesh.
//!
//! Cells are visited in native active order (see
//! [`OverlapMesh::ordered_cells`]), vertex dofs numbered on first sight and
//! interior dofs per cell. For a single rank this reproduces the native
//! numbering exactly.

use hashbrown::HashMap;

use crate::dofs::fe::FiniteElement;
use crate::grid::overlap_mesh::OverlapMesh;
use crate::mesh_error::MeshOverlapError;

#[derive(Clone, Debug)]
pub struct OverlapFieldHandler<const DIM: usize, const SPACEDIM: usize> {
    fe: FiniteElement,
    n_dofs: usize,
    /// per ordered overlap cell
    cell_dofs: Vec<Vec<usize>>,
    support_points: Vec<[f64; SPACEDIM]>,
}

impl<const DIM: usize, const SPACEDIM: usize> OverlapFieldHandler<DIM, SPACEDIM> {
    pub fn new(
        overlap: &OverlapMesh<DIM, SPACEDIM>,
        fe: FiniteElement,
    ) -> Result<Self, MeshOverlapError> {
        let mut vertex_start: HashMap<usize, usize> = HashMap::new();
        let mut support_points = Vec::new();
        let mut cell_dofs = Vec::with_capacity(overlap.n_active_cells());
        for &cell in overlap.ordered_cells() {
            let vs = overlap.cell_vertices(cell)?;
            let mut dofs = Vec::with_capacity(fe.dofs_per_cell(vs.len()));
            for &v in vs {
                let start = *vertex_start.entry(v).or_insert_with(|| {
                    let start = support_points.len();
                    support_points.extend(std::iter::repeat_n(*overlap.vertex(v), fe.dofs_per_vertex));
                    start
                });
                dofs.extend(start..start + fe.dofs_per_vertex);
            }
            let center = overlap.barycenter(cell)?;
            let start = support_points.len();
            support_points.extend(std::iter::repeat_n(center, fe.dofs_per_cell_interior));
            dofs.extend(start..start + fe.dofs_per_cell_interior);
            cell_dofs.push(dofs);
        }
        Ok(Self {
            fe,
            n_dofs: support_points.len(),
            cell_dofs,
            support_points,
        })
    }

    pub fn fe(&self) -> &FiniteElement {
        &self.fe
    }

    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    /// Dofs of the `k`-th ordered overlap cell, in local dof order.
    pub fn cell_dofs(&self, k: usize) -> &[usize] {
        &self.cell_dofs[k]
    }

    pub fn n_cells(&self) -> usize {
        self.cell_dofs.len()
    }

    pub fn support_point(&self, i: usize) -> &[f64; SPACEDIM] {
        &self.support_points[i]
    }
}
