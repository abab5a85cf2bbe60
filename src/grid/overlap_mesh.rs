//! The overlap mesh: the per-rank copy of every native cell that is either
//! locally owned or relevant to the local structured-grid region.
//!
//! Each overlap cell records the [`CellId`] of its native origin. The pair is
//! resolved lazily and checked on every lookup: barycenters must coincide,
//! otherwise the native mesh changed without a matching rebuild.
//!
//! Overlap cells are stored level by level in construction order. Transfer
//! code must not rely on that order; it iterates [`OverlapMesh::ordered_cells`]
//! instead, which lists the active overlap cells sorted by the active index
//! of their native counterparts. Everything indexed "per overlap cell"
//! downstream (quadrature indices, cell dofs, patch map entries) uses the
//! position in that ordering.

use hashbrown::HashMap;
use itertools::Itertools;

use crate::debug_invariants::DebugInvariants;
use crate::geometry::bbox::BoundingBox;
use crate::grid::intersection_predicate::IntersectionPredicate;
use crate::mesh_error::MeshOverlapError;
use crate::topology::cell::{CellId, MeshId};
use crate::topology::native_mesh::{NativeMesh, barycenter_of};

#[derive(Clone, Debug)]
struct OverlapCellData {
    vertices: Vec<usize>,
    parent: Option<usize>,
    children: Vec<usize>,
    native: CellId,
}

#[derive(Clone, Debug)]
pub struct OverlapMesh<const DIM: usize, const SPACEDIM: usize> {
    native_mesh_id: MeshId,
    tolerance: f64,
    vertices: Vec<[f64; SPACEDIM]>,
    levels: Vec<Vec<OverlapCellData>>,
    /// active overlap cells sorted by native active index
    ordered: Vec<CellId>,
    ordered_native_active: Vec<usize>,
    native_to_ordered: HashMap<usize, usize>,
}

impl<const DIM: usize, const SPACEDIM: usize> OverlapMesh<DIM, SPACEDIM> {
    /// Copy every native cell that matches `predicate` or contains a locally
    /// owned active cell, together with its ancestors.
    ///
    /// `tolerance` bounds the barycenter distance accepted by
    /// [`Self::native_cell`], relative to the native cell diameter.
    pub fn new<P>(
        native: &NativeMesh<DIM, SPACEDIM>,
        predicate: &P,
        tolerance: f64,
    ) -> Result<Self, MeshOverlapError>
    where
        P: IntersectionPredicate<DIM, SPACEDIM> + ?Sized,
    {
        let mut builder = Builder {
            native,
            predicate,
            vertex_map: HashMap::new(),
            vertices: Vec::new(),
            levels: Vec::new(),
        };
        for coarse in native.coarse_cells() {
            builder.visit(coarse, None)?;
        }
        let Builder {
            vertices, levels, ..
        } = builder;

        let mut active = Vec::new();
        for (level, cells) in levels.iter().enumerate() {
            for (index, cell) in cells.iter().enumerate() {
                if cell.children.is_empty() {
                    let a = native.active_index(cell.native)?.ok_or_else(|| {
                        MeshOverlapError::InternalError(format!(
                            "overlap leaf {level}.{index} maps to refined native cell {}",
                            cell.native
                        ))
                    })?;
                    active.push((a, CellId::new(level, index)));
                }
            }
        }
        let (ordered_native_active, ordered): (Vec<usize>, Vec<CellId>) =
            active.into_iter().sorted_by_key(|&(a, _)| a).unzip();
        let native_to_ordered = ordered_native_active
            .iter()
            .enumerate()
            .map(|(k, &a)| (a, k))
            .collect();

        let mesh = Self {
            native_mesh_id: native.id(),
            tolerance,
            vertices,
            levels,
            ordered,
            ordered_native_active,
            native_to_ordered,
        };
        log::debug!(
            "rank {}: overlap mesh with {} active cells ({} native active), {} levels",
            native.rank(),
            mesh.n_active_cells(),
            native.n_active_cells(),
            mesh.n_levels()
        );
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        mesh.debug_assert_invariants();
        Ok(mesh)
    }

    /// Identity of the native mesh state this overlap was built from.
    pub fn native_mesh_id(&self) -> MeshId {
        self.native_mesh_id
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn n_cells(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, Vec::len)
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, v: usize) -> &[f64; SPACEDIM] {
        &self.vertices[v]
    }

    pub fn n_active_cells(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Active overlap cells sorted by native active index.
    pub fn ordered_cells(&self) -> &[CellId] {
        &self.ordered
    }

    /// Native active index of the `k`-th ordered cell.
    pub fn ordered_native_active(&self) -> &[usize] {
        &self.ordered_native_active
    }

    /// Position in [`Self::ordered_cells`] of the overlap copy of native
    /// active cell `native_active`, if there is one.
    pub fn ordered_position(&self, native_active: usize) -> Option<usize> {
        self.native_to_ordered.get(&native_active).copied()
    }

    fn data(&self, cell: CellId) -> Result<&OverlapCellData, MeshOverlapError> {
        self.levels
            .get(cell.level)
            .and_then(|l| l.get(cell.index))
            .ok_or(MeshOverlapError::MissingCell(cell))
    }

    pub fn cell_vertices(&self, cell: CellId) -> Result<&[usize], MeshOverlapError> {
        Ok(&self.data(cell)?.vertices)
    }

    pub fn parent(&self, cell: CellId) -> Result<Option<CellId>, MeshOverlapError> {
        Ok(self.data(cell)?.parent.map(|p| CellId::new(cell.level - 1, p)))
    }

    pub fn children(&self, cell: CellId) -> Result<Vec<CellId>, MeshOverlapError> {
        Ok(self
            .data(cell)?
            .children
            .iter()
            .map(|&c| CellId::new(cell.level + 1, c))
            .collect())
    }

    pub fn barycenter(&self, cell: CellId) -> Result<[f64; SPACEDIM], MeshOverlapError> {
        Ok(barycenter_of(self.cell_vertices(cell)?, &self.vertices))
    }

    pub fn bounding_box(&self, cell: CellId) -> Result<BoundingBox<SPACEDIM>, MeshOverlapError> {
        let vs = self.cell_vertices(cell)?;
        BoundingBox::from_points(vs.iter().map(|&v| &self.vertices[v]))
            .ok_or(MeshOverlapError::MissingCell(cell))
    }

    /// The recorded native origin of `cell`, without any check.
    pub fn recorded_native_cell(&self, cell: CellId) -> Result<CellId, MeshOverlapError> {
        Ok(self.data(cell)?.native)
    }

    /// The native origin of `cell`, checked against `native`: the cell must
    /// exist there and the barycenters must agree.
    pub fn native_cell(
        &self,
        native: &NativeMesh<DIM, SPACEDIM>,
        cell: CellId,
    ) -> Result<CellId, MeshOverlapError> {
        let origin = self.recorded_native_cell(cell)?;
        let ours = self.barycenter(cell)?;
        let theirs = native.barycenter(origin)?;
        let distance = dist(&ours, &theirs);
        let bbox = native.bounding_box(origin)?;
        let diameter = dist(&bbox.lower, &bbox.upper);
        if distance > self.tolerance * diameter.max(f64::MIN_POSITIVE) {
            return Err(MeshOverlapError::CorrespondenceMismatch {
                overlap: cell,
                native: origin,
                distance,
            });
        }
        Ok(origin)
    }
}

fn dist<const S: usize>(a: &[f64; S], b: &[f64; S]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

struct Builder<'m, const DIM: usize, const SPACEDIM: usize, P: ?Sized> {
    native: &'m NativeMesh<DIM, SPACEDIM>,
    predicate: &'m P,
    vertex_map: HashMap<usize, usize>,
    vertices: Vec<[f64; SPACEDIM]>,
    levels: Vec<Vec<OverlapCellData>>,
}

impl<const DIM: usize, const SPACEDIM: usize, P> Builder<'_, DIM, SPACEDIM, P>
where
    P: IntersectionPredicate<DIM, SPACEDIM> + ?Sized,
{
    // whether the subtree rooted at `cell` contributes anything
    fn wanted(&self, cell: CellId) -> Result<bool, MeshOverlapError> {
        Ok(self.predicate.intersects(self.native, cell)?
            || self.native.has_locally_owned_descendant(cell)?)
    }

    // Copy `cell` if wanted, then its wanted children. Returns the overlap
    // index on `cell.level` when copied.
    fn visit(
        &mut self,
        cell: CellId,
        parent: Option<usize>,
    ) -> Result<Option<usize>, MeshOverlapError> {
        if !self.wanted(cell)? {
            return Ok(None);
        }
        let native = self.native;
        let vertices = native
            .cell_vertices(cell)?
            .iter()
            .map(|&v| self.local_vertex(v))
            .collect();
        if self.levels.len() <= cell.level {
            self.levels.resize_with(cell.level + 1, Vec::new);
        }
        let level = &mut self.levels[cell.level];
        level.push(OverlapCellData {
            vertices,
            parent,
            children: Vec::new(),
            native: cell,
        });
        let me = level.len() - 1;

        let native_children = native.children(cell)?;
        let mut children = Vec::new();
        for child in native_children.iter().copied() {
            if let Some(c) = self.visit(child, Some(me))? {
                children.push(c);
            }
        }
        if !native_children.is_empty() && children.is_empty() {
            // a refined cell whose box touches the region while none of its
            // children do: drop it again, it has no leaf to stand for
            self.levels[cell.level].pop();
            return Ok(None);
        }
        self.levels[cell.level][me].children = children;
        Ok(Some(me))
    }

    fn local_vertex(&mut self, v: usize) -> usize {
        if let Some(&local) = self.vertex_map.get(&v) {
            return local;
        }
        self.vertices.push(*self.native.vertex(v));
        let local = self.vertices.len() - 1;
        self.vertex_map.insert(v, local);
        local
    }
}

impl<const DIM: usize, const SPACEDIM: usize> DebugInvariants for OverlapMesh<DIM, SPACEDIM> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "OverlapMesh invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshOverlapError> {
        // 1) ordering strictly increasing in native active index
        if let Some((a, b)) = self
            .ordered_native_active
            .iter()
            .tuple_windows()
            .find(|(a, b)| a >= b)
        {
            return Err(MeshOverlapError::InternalError(format!(
                "overlap ordering not increasing: {a} before {b}"
            )));
        }
        // 2) parent/child links agree
        for (level, cells) in self.levels.iter().enumerate() {
            for (index, cell) in cells.iter().enumerate() {
                for &c in &cell.children {
                    let child = self
                        .levels
                        .get(level + 1)
                        .and_then(|l| l.get(c))
                        .ok_or(MeshOverlapError::MissingCell(CellId::new(level + 1, c)))?;
                    if child.parent != Some(index) {
                        return Err(MeshOverlapError::InternalError(format!(
                            "child {}.{c} does not point back to {level}.{index}",
                            level + 1
                        )));
                    }
                }
            }
        }
        // 3) every ordered cell is a leaf
        for &cell in &self.ordered {
            if !self.data(cell)?.children.is_empty() {
                return Err(MeshOverlapError::InternalError(format!(
                    "ordered cell {cell} has children"
                )));
            }
        }
        Ok(())
    }
}
