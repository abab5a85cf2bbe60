//! The native mesh: a hierarchical tensor-product mesh shared by all ranks,
//! with per-active-cell ownership.
//!
//! Cells live in a per-level arena and are addressed by [`CellId`]. Vertices
//! of a cell are stored in lexicographic order (first axis fastest), so for
//! `DIM = 2` the order is `(0,0), (1,0), (0,1), (1,1)`.
//!
//! Active cells (cells without children) are numbered level-major: all
//! active cells of level 0 by index, then those of level 1, and so on. This
//! *active index* is the stable global identity downstream code keys on.

use hashbrown::HashMap;

use crate::algs::communicator::{Communicator, GroupId};
use crate::geometry::bbox::BoundingBox;
use crate::mesh_error::MeshOverlapError;
use crate::topology::cell::{CellId, CellStatus, Dims, MeshId, SupportedDims};

#[derive(Clone, Debug)]
struct CellData {
    vertices: Vec<usize>,
    parent: Option<CellId>,
    /// indices on `level + 1`
    children: Vec<usize>,
    active_index: Option<usize>,
}

/// A mesh every rank holds in full; ownership decides who computes on what.
#[derive(Clone, Debug)]
pub struct NativeMesh<const DIM: usize, const SPACEDIM: usize> {
    id: MeshId,
    rank: usize,
    n_ranks: usize,
    group: GroupId,
    vertices: Vec<[f64; SPACEDIM]>,
    levels: Vec<Vec<CellData>>,
    active: Vec<CellId>,
    owners: Vec<usize>,
    status: Vec<CellStatus>,
    /// sorted support vertices -> vertex created during refinement
    refined_vertices: HashMap<Vec<usize>, usize>,
}

pub type NativeMesh1d2 = NativeMesh<1, 2>;
pub type NativeMesh2d = NativeMesh<2, 2>;
pub type NativeMesh2d3 = NativeMesh<2, 3>;
pub type NativeMesh3d = NativeMesh<3, 3>;

impl<const DIM: usize, const SPACEDIM: usize> NativeMesh<DIM, SPACEDIM>
where
    Dims<DIM, SPACEDIM>: SupportedDims,
{
    /// Build a single-level mesh from vertices and coarse cells.
    ///
    /// Every cell lists `2^DIM` vertex ids in lexicographic order. All cells
    /// start out owned by rank 0; see [`Self::partition_contiguous`] and
    /// [`Self::set_owners`].
    pub fn from_cells<C: Communicator>(
        comm: &C,
        vertices: Vec<[f64; SPACEDIM]>,
        cells: Vec<Vec<usize>>,
    ) -> Result<Self, MeshOverlapError> {
        let per_cell = <Dims<DIM, SPACEDIM> as SupportedDims>::VERTICES_PER_CELL;
        for (i, cell) in cells.iter().enumerate() {
            if cell.len() != per_cell {
                return Err(MeshOverlapError::InvalidMesh(format!(
                    "cell {i} has {} vertices, expected {per_cell}",
                    cell.len()
                )));
            }
            if let Some(&v) = cell.iter().find(|&&v| v >= vertices.len()) {
                return Err(MeshOverlapError::InvalidMesh(format!(
                    "cell {i} references vertex {v}, but only {} exist",
                    vertices.len()
                )));
            }
        }
        let level0 = cells
            .into_iter()
            .map(|vertices| CellData {
                vertices,
                parent: None,
                children: Vec::new(),
                active_index: None,
            })
            .collect();
        let mut mesh = Self {
            id: MeshId::fresh(),
            rank: comm.rank(),
            n_ranks: comm.size(),
            group: comm.group(),
            vertices,
            levels: vec![level0],
            active: Vec::new(),
            owners: Vec::new(),
            status: Vec::new(),
            refined_vertices: HashMap::new(),
        };
        mesh.rebuild_active(|_| 0);
        Ok(mesh)
    }

    /// Axis-aligned box `[lower, upper]` split into `repetitions[d]` cells
    /// along axis `d`. Coordinates beyond `DIM` are zero.
    pub fn subdivided_hyper_rectangle<C: Communicator>(
        comm: &C,
        repetitions: [usize; DIM],
        lower: [f64; DIM],
        upper: [f64; DIM],
    ) -> Result<Self, MeshOverlapError> {
        if repetitions.iter().any(|&r| r == 0) {
            return Err(MeshOverlapError::InvalidMesh(
                "every axis needs at least one cell".into(),
            ));
        }
        let n_points: [usize; DIM] = std::array::from_fn(|d| repetitions[d] + 1);
        let n_vertices: usize = n_points.iter().product();
        let mut vertices = Vec::with_capacity(n_vertices);
        for flat in 0..n_vertices {
            let ijk = unflatten(flat, &n_points);
            let mut x = [0.0; SPACEDIM];
            for d in 0..DIM {
                let t = ijk[d] as f64 / repetitions[d] as f64;
                x[d] = lower[d] + t * (upper[d] - lower[d]);
            }
            vertices.push(x);
        }
        let n_cells: usize = repetitions.iter().product();
        let per_cell = 1usize << DIM;
        let cells = (0..n_cells)
            .map(|flat| {
                let base = unflatten(flat, &repetitions);
                (0..per_cell)
                    .map(|corner| {
                        let mut ijk = base;
                        for (d, i) in ijk.iter_mut().enumerate() {
                            *i += (corner >> d) & 1;
                        }
                        flatten(&ijk, &n_points)
                    })
                    .collect()
            })
            .collect();
        Self::from_cells(comm, vertices, cells)
    }

    /// Refine every active cell once.
    pub fn refine_global(&mut self) -> Result<(), MeshOverlapError> {
        let flags = vec![true; self.n_active_cells()];
        self.refine_active(&flags)
    }

    /// Refine the active cells whose flag is set. Children inherit the owner
    /// of their parent.
    pub fn refine_active(&mut self, flags: &[bool]) -> Result<(), MeshOverlapError> {
        if flags.len() != self.n_active_cells() {
            return Err(MeshOverlapError::VectorLengthMismatch {
                expected: self.n_active_cells(),
                found: flags.len(),
            });
        }
        let previous: HashMap<CellId, usize> = self
            .active
            .iter()
            .copied()
            .zip(self.owners.iter().copied())
            .collect();
        let to_refine: Vec<CellId> = self
            .active
            .iter()
            .zip(flags)
            .filter(|&(_, &f)| f)
            .map(|(&c, _)| c)
            .collect();
        for cell in &to_refine {
            self.split(*cell);
        }
        log::debug!(
            "refined {} of {} active cells; {} levels",
            to_refine.len(),
            previous.len(),
            self.levels.len()
        );
        let inherited = |mesh: &Self, mut cell: CellId| loop {
            if let Some(&owner) = previous.get(&cell) {
                break owner;
            }
            match mesh.levels[cell.level][cell.index].parent {
                Some(p) => cell = p,
                None => break 0,
            }
        };
        let owners: Vec<usize> = self
            .collect_active()
            .into_iter()
            .map(|c| inherited(self, c))
            .collect();
        self.rebuild_active_with(owners);
        Ok(())
    }

    fn split(&mut self, cell: CellId) {
        let parent_vertices = self.levels[cell.level][cell.index].vertices.clone();
        if self.levels.len() == cell.level + 1 {
            self.levels.push(Vec::new());
        }
        let per_cell = 1usize << DIM;
        let mut children = Vec::with_capacity(per_cell);
        for child in 0..per_cell {
            let vertices = (0..per_cell)
                .map(|corner| {
                    // per axis, position in halves of the parent: 0, 1 or 2
                    let support: Vec<usize> = (0..per_cell)
                        .filter(|&pv| {
                            (0..DIM).all(|d| {
                                let half = ((child >> d) & 1) + ((corner >> d) & 1);
                                let bit = (pv >> d) & 1;
                                half == 1 || half == 2 * bit
                            })
                        })
                        .map(|pv| parent_vertices[pv])
                        .collect();
                    self.support_vertex(support)
                })
                .collect();
            let next = &mut self.levels[cell.level + 1];
            next.push(CellData {
                vertices,
                parent: Some(cell),
                children: Vec::new(),
                active_index: None,
            });
            children.push(next.len() - 1);
        }
        self.levels[cell.level][cell.index].children = children;
    }

    // vertex at the average of `support`, shared by every cell that asks for
    // the same support set
    fn support_vertex(&mut self, mut support: Vec<usize>) -> usize {
        if support.len() == 1 {
            return support[0];
        }
        support.sort_unstable();
        if let Some(&v) = self.refined_vertices.get(&support) {
            return v;
        }
        let mut x = [0.0; SPACEDIM];
        for &v in &support {
            for (d, xd) in x.iter_mut().enumerate() {
                *xd += self.vertices[v][d];
            }
        }
        let n = support.len() as f64;
        x.iter_mut().for_each(|xd| *xd /= n);
        self.vertices.push(x);
        let id = self.vertices.len() - 1;
        self.refined_vertices.insert(support, id);
        id
    }
}

impl<const DIM: usize, const SPACEDIM: usize> NativeMesh<DIM, SPACEDIM> {
    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    /// Process group the mesh is distributed over.
    pub fn group(&self) -> GroupId {
        self.group
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

    pub fn vertices(&self) -> &[[f64; SPACEDIM]] {
        &self.vertices
    }

    fn data(&self, cell: CellId) -> Result<&CellData, MeshOverlapError> {
        self.levels
            .get(cell.level)
            .and_then(|l| l.get(cell.index))
            .ok_or(MeshOverlapError::MissingCell(cell))
    }

    pub fn contains_cell(&self, cell: CellId) -> bool {
        self.data(cell).is_ok()
    }

    /// Level-0 cells.
    pub fn coarse_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        (0..self.n_cells(0)).map(|i| CellId::new(0, i))
    }

    pub fn cell_vertices(&self, cell: CellId) -> Result<&[usize], MeshOverlapError> {
        Ok(&self.data(cell)?.vertices)
    }

    pub fn parent(&self, cell: CellId) -> Result<Option<CellId>, MeshOverlapError> {
        Ok(self.data(cell)?.parent)
    }

    pub fn children(&self, cell: CellId) -> Result<Vec<CellId>, MeshOverlapError> {
        Ok(self
            .data(cell)?
            .children
            .iter()
            .map(|&i| CellId::new(cell.level + 1, i))
            .collect())
    }

    pub fn is_active(&self, cell: CellId) -> Result<bool, MeshOverlapError> {
        Ok(self.data(cell)?.active_index.is_some())
    }

    /// Active index of `cell`, `None` for refined cells.
    pub fn active_index(&self, cell: CellId) -> Result<Option<usize>, MeshOverlapError> {
        Ok(self.data(cell)?.active_index)
    }

    pub fn n_active_cells(&self) -> usize {
        self.active.len()
    }

    /// Active cells in active-index order.
    pub fn active_cells(&self) -> &[CellId] {
        &self.active
    }

    pub fn owner(&self, active_index: usize) -> usize {
        self.owners[active_index]
    }

    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    pub fn status(&self, active_index: usize) -> CellStatus {
        self.status[active_index]
    }

    /// Active indices owned by this rank, ascending.
    pub fn locally_owned_active(&self) -> impl Iterator<Item = usize> + '_ {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == CellStatus::Owned)
            .map(|(i, _)| i)
    }

    pub fn n_locally_owned_active_cells(&self) -> usize {
        self.locally_owned_active().count()
    }

    /// True if `cell` is active and owned here.
    pub fn is_locally_owned(&self, cell: CellId) -> Result<bool, MeshOverlapError> {
        Ok(self
            .active_index(cell)?
            .is_some_and(|a| self.status[a] == CellStatus::Owned))
    }

    /// True if `cell` is or has an active descendant owned here.
    pub fn has_locally_owned_descendant(&self, cell: CellId) -> Result<bool, MeshOverlapError> {
        if self.is_locally_owned(cell)? {
            return Ok(true);
        }
        for child in self.children(cell)? {
            if self.has_locally_owned_descendant(child)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn barycenter(&self, cell: CellId) -> Result<[f64; SPACEDIM], MeshOverlapError> {
        Ok(barycenter_of(self.cell_vertices(cell)?, &self.vertices))
    }

    pub fn bounding_box(&self, cell: CellId) -> Result<BoundingBox<SPACEDIM>, MeshOverlapError> {
        let vs = self.cell_vertices(cell)?;
        BoundingBox::from_points(vs.iter().map(|&v| &self.vertices[v]))
            .ok_or(MeshOverlapError::MissingCell(cell))
    }

    /// Split the active cells into `n_ranks` contiguous chunks of active
    /// indices.
    pub fn partition_contiguous(&mut self) {
        let (n, p) = (self.n_active_cells(), self.n_ranks);
        let owners = (0..n).map(|i| i * p / n.max(1)).collect();
        self.rebuild_active_with(owners);
    }

    /// Assign an owner to every active cell.
    pub fn set_owners(&mut self, owners: Vec<usize>) -> Result<(), MeshOverlapError> {
        if owners.len() != self.n_active_cells() {
            return Err(MeshOverlapError::VectorLengthMismatch {
                expected: self.n_active_cells(),
                found: owners.len(),
            });
        }
        if let Some(&bad) = owners.iter().find(|&&o| o >= self.n_ranks) {
            return Err(MeshOverlapError::InvalidMesh(format!(
                "owner rank {bad} outside a group of {}",
                self.n_ranks
            )));
        }
        self.rebuild_active_with(owners);
        Ok(())
    }

    fn collect_active(&self) -> Vec<CellId> {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, cells)| {
                cells
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.children.is_empty())
                    .map(move |(index, _)| CellId::new(level, index))
            })
            .collect()
    }

    fn rebuild_active(&mut self, owner: impl Fn(CellId) -> usize) {
        let owners = self.collect_active().into_iter().map(owner).collect();
        self.rebuild_active_with(owners);
    }

    // renumber active cells, take `owners` in the new order, refresh status
    // and identity
    fn rebuild_active_with(&mut self, owners: Vec<usize>) {
        for level in &mut self.levels {
            level.iter_mut().for_each(|c| c.active_index = None);
        }
        self.active = self.collect_active();
        for (a, cell) in self.active.iter().enumerate() {
            self.levels[cell.level][cell.index].active_index = Some(a);
        }
        self.owners = owners;

        let mut touches_owned = vec![false; self.vertices.len()];
        for (a, cell) in self.active.iter().enumerate() {
            if self.owners[a] == self.rank {
                for &v in &self.levels[cell.level][cell.index].vertices {
                    touches_owned[v] = true;
                }
            }
        }
        self.status = self
            .active
            .iter()
            .enumerate()
            .map(|(a, cell)| {
                if self.owners[a] == self.rank {
                    CellStatus::Owned
                } else if self.levels[cell.level][cell.index]
                    .vertices
                    .iter()
                    .any(|&v| touches_owned[v])
                {
                    CellStatus::Ghost
                } else {
                    CellStatus::Artificial
                }
            })
            .collect();
        self.id = MeshId::fresh();
    }
}

pub(crate) fn barycenter_of<const S: usize>(cell: &[usize], vertices: &[[f64; S]]) -> [f64; S] {
    let mut x = [0.0; S];
    for &v in cell {
        for d in 0..S {
            x[d] += vertices[v][d];
        }
    }
    let n = cell.len().max(1) as f64;
    x.map(|xd| xd / n)
}

fn unflatten<const D: usize>(mut flat: usize, extent: &[usize; D]) -> [usize; D] {
    let mut out = [0; D];
    for d in 0..D {
        out[d] = flat % extent[d];
        flat /= extent[d];
    }
    out
}

fn flatten<const D: usize>(ijk: &[usize; D], extent: &[usize; D]) -> usize {
    (0..D).rev().fold(0, |acc, d| acc * extent[d] + ijk[d])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    fn square(n: usize) -> NativeMesh2d {
        NativeMesh::subdivided_hyper_rectangle(&NoComm, [n, n], [0.0, 0.0], [1.0, 1.0]).unwrap()
    }

    #[test]
    fn hyper_rectangle_layout() {
        let mesh = square(2);
        assert_eq!(mesh.n_vertices(), 9);
        assert_eq!(mesh.n_active_cells(), 4);
        assert_eq!(mesh.cell_vertices(CellId::new(0, 3)).unwrap(), &[4, 5, 7, 8]);
        assert_eq!(mesh.barycenter(CellId::new(0, 0)).unwrap(), [0.25, 0.25]);
    }

    #[test]
    fn global_refinement_shares_new_vertices() {
        let mut mesh = square(2);
        let before = mesh.id();
        mesh.refine_global().unwrap();
        assert_ne!(mesh.id(), before);
        assert_eq!(mesh.n_levels(), 2);
        assert_eq!(mesh.n_active_cells(), 16);
        // a 4x4 grid has 25 vertices; nothing duplicated along shared edges
        assert_eq!(mesh.n_vertices(), 25);
        let parent = CellId::new(0, 0);
        let kids = mesh.children(parent).unwrap();
        assert_eq!(kids.len(), 4);
        assert_eq!(mesh.barycenter(kids[0]).unwrap(), [0.125, 0.125]);
        assert_eq!(mesh.parent(kids[3]).unwrap(), Some(parent));
        assert!(!mesh.is_active(parent).unwrap());
    }

    #[test]
    fn active_numbering_is_level_major() {
        let mut mesh = square(2);
        mesh.refine_active(&[false, true, false, false]).unwrap();
        let active = mesh.active_cells();
        assert_eq!(active.len(), 7);
        assert_eq!(&active[..3], &[CellId::new(0, 0), CellId::new(0, 2), CellId::new(0, 3)]);
        assert!(active[3..].iter().all(|c| c.level == 1));
    }

    #[test]
    fn children_inherit_owner() {
        let comms = crate::algs::communicator::LocalComm::universe(2);
        let mut mesh: NativeMesh2d =
            NativeMesh::subdivided_hyper_rectangle(&comms[1], [2, 1], [0.0, 0.0], [2.0, 1.0])
                .unwrap();
        mesh.set_owners(vec![0, 1]).unwrap();
        assert_eq!(mesh.status(0), CellStatus::Ghost);
        assert_eq!(mesh.status(1), CellStatus::Owned);
        mesh.refine_active(&[false, true]).unwrap();
        assert_eq!(mesh.owners(), &[0, 1, 1, 1, 1]);
        assert_eq!(mesh.n_locally_owned_active_cells(), 4);
    }

    #[test]
    fn artificial_cells_do_not_touch_owned_ones() {
        let comms = crate::algs::communicator::LocalComm::universe(3);
        let mut mesh: NativeMesh2d =
            NativeMesh::subdivided_hyper_rectangle(&comms[0], [3, 1], [0.0, 0.0], [3.0, 1.0])
                .unwrap();
        mesh.partition_contiguous();
        assert_eq!(mesh.owners(), &[0, 1, 2]);
        assert_eq!(
            (0..3).map(|a| mesh.status(a)).collect::<Vec<_>>(),
            vec![CellStatus::Owned, CellStatus::Ghost, CellStatus::Artificial]
        );
    }

    #[test]
    fn invalid_cells_are_rejected() {
        let err = NativeMesh::<1, 2>::from_cells(&NoComm, vec![[0.0, 0.0]], vec![vec![0, 1]])
            .unwrap_err();
        assert!(matches!(err, MeshOverlapError::InvalidMesh(_)));
    }

    #[test]
    fn codimension_one_mesh_lives_in_the_plane() {
        let mesh = NativeMesh::<1, 2>::subdivided_hyper_rectangle(&NoComm, [4], [0.0], [2.0])
            .unwrap();
        assert_eq!(mesh.vertex(4), &[2.0, 0.0]);
        assert_eq!(mesh.bounding_box(CellId::new(0, 1)).unwrap().upper, [1.0, 0.0]);
    }
}
