//! Finite elements described by where their degrees of freedom live.
//!
//! Local dof order within a cell: all vertex dofs (vertex by vertex, in the
//! cell's vertex order), then the interior dofs. Within one support point
//! the components cycle fastest.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiniteElement {
    pub n_components: usize,
    pub dofs_per_vertex: usize,
    pub dofs_per_cell_interior: usize,
}

impl FiniteElement {
    /// Continuous multilinear element with `n_components` components.
    pub const fn q1(n_components: usize) -> Self {
        Self {
            n_components,
            dofs_per_vertex: n_components,
            dofs_per_cell_interior: 0,
        }
    }

    /// Discontinuous piecewise-constant element.
    pub const fn dgq0(n_components: usize) -> Self {
        Self {
            n_components,
            dofs_per_vertex: 0,
            dofs_per_cell_interior: n_components,
        }
    }

    pub fn dofs_per_cell(&self, n_vertices: usize) -> usize {
        n_vertices * self.dofs_per_vertex + self.dofs_per_cell_interior
    }

    /// (support point, component) of local dof `i`. Support points are the
    /// cell vertices followed by the barycenter (index `n_vertices`).
    pub fn support_and_component(&self, i: usize, n_vertices: usize) -> (usize, usize) {
        let n_vertex_dofs = n_vertices * self.dofs_per_vertex;
        let comps = self.n_components.max(1);
        if i < n_vertex_dofs {
            (i / self.dofs_per_vertex, (i % self.dofs_per_vertex) % comps)
        } else {
            (n_vertices, (i - n_vertex_dofs) % comps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_dof_layout() {
        let q1 = FiniteElement::q1(2);
        assert_eq!(q1.dofs_per_cell(4), 8);
        assert_eq!(q1.support_and_component(5, 4), (2, 1));
        let dg = FiniteElement::dgq0(3);
        assert_eq!(dg.dofs_per_cell(8), 3);
        assert_eq!(dg.support_and_component(2, 8), (8, 2));
    }
}
