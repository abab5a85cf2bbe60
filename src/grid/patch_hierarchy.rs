//! The structured-grid side: patches, the hierarchy interface the transfer
//! layer queries, and a small in-memory Cartesian implementation.

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::algs::communicator::{Communicator, GroupId};
use crate::geometry::bbox::BoundingBox;
use crate::mesh_error::MeshOverlapError;

/// One logically rectangular patch of uniform cells.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch<const S: usize> {
    pub lower: [f64; S],
    pub upper: [f64; S],
    pub n_cells: [usize; S],
}

impl<const S: usize> Patch<S> {
    pub fn new(lower: [f64; S], upper: [f64; S], n_cells: [usize; S]) -> Self {
        Self {
            lower,
            upper,
            n_cells,
        }
    }

    /// Cell width along every axis.
    pub fn dx(&self) -> [f64; S] {
        std::array::from_fn(|d| (self.upper[d] - self.lower[d]) / self.n_cells[d].max(1) as f64)
    }

    pub fn bounding_box(&self) -> BoundingBox<S> {
        BoundingBox::new(self.lower, self.upper)
    }

    pub fn n_total_cells(&self) -> usize {
        self.n_cells.iter().product()
    }

    /// Flat index (first axis fastest) of the cell containing `x`; points on
    /// the upper boundary belong to the last cell.
    pub fn cell_containing(&self, x: &[f64; S]) -> Option<usize> {
        if !self.bounding_box().contains_point(x) {
            return None;
        }
        let dx = self.dx();
        let mut flat = 0;
        for d in (0..S).rev() {
            let i = (((x[d] - self.lower[d]) / dx[d]) as usize).min(self.n_cells[d] - 1);
            flat = flat * self.n_cells[d] + i;
        }
        Some(flat)
    }

    /// Center of the cell with flat index `cell`.
    pub fn cell_center(&self, mut cell: usize) -> [f64; S] {
        let dx = self.dx();
        let mut x = [0.0; S];
        for d in 0..S {
            let i = cell % self.n_cells[d];
            cell /= self.n_cells[d];
            x[d] = self.lower[d] + (i as f64 + 0.5) * dx[d];
        }
        x
    }
}

/// Patch boxes grown by `ghost_cell_width` cell widths on every side.
pub fn compute_patch_bboxes<const S: usize>(
    patches: &[Patch<S>],
    ghost_cell_width: f64,
) -> Vec<BoundingBox<S>> {
    patches
        .iter()
        .map(|patch| {
            let dx = patch.dx();
            let mut bbox = patch.bounding_box();
            bbox.extend(&dx.map(|h| ghost_cell_width * h));
            bbox
        })
        .collect()
}

/// What the transfer layer needs from a structured patch hierarchy.
pub trait PatchHierarchy<const S: usize>: Send + Sync {
    /// Process group the hierarchy is distributed over.
    fn group(&self) -> GroupId;

    fn n_levels(&self) -> usize;

    /// Patches assigned to this rank on `level`.
    fn local_patches(&self, level: usize) -> Vec<Patch<S>>;

    /// True if `data_idx` names storage allocated on `level`.
    fn is_allocated(&self, level: usize, data_idx: i32) -> bool;
}

/// In-memory hierarchy with cell-centred scalar data slots.
pub struct CartesianPatchHierarchy<const S: usize> {
    group: GroupId,
    levels: Vec<Vec<Patch<S>>>,
    /// (level, data index) -> one value array per local patch
    data: Mutex<HashMap<(usize, i32), Vec<Vec<f64>>>>,
}

impl<const S: usize> CartesianPatchHierarchy<S> {
    /// `levels[l]` lists the patches of level `l` owned by this rank.
    pub fn new<C: Communicator>(comm: &C, levels: Vec<Vec<Patch<S>>>) -> Self {
        Self {
            group: comm.group(),
            levels,
            data: Mutex::new(HashMap::new()),
        }
    }

    /// A single level covering `[lower, upper]` with `n_cells` cells, cut
    /// into one slab per rank along the first axis. Ranks beyond the number
    /// of cells along that axis get no patch.
    pub fn slabs<C: Communicator>(
        comm: &C,
        lower: [f64; S],
        upper: [f64; S],
        n_cells: [usize; S],
    ) -> Self {
        let (rank, size) = (comm.rank(), comm.size());
        let nx = n_cells[0];
        let begin = rank * nx / size;
        let end = (rank + 1) * nx / size;
        let mut patches = Vec::new();
        if end > begin {
            let h = (upper[0] - lower[0]) / nx as f64;
            let mut lo = lower;
            let mut hi = upper;
            let mut n = n_cells;
            lo[0] = lower[0] + begin as f64 * h;
            hi[0] = lower[0] + end as f64 * h;
            n[0] = end - begin;
            patches.push(Patch::new(lo, hi, n));
        }
        Self::new(comm, vec![patches])
    }

    fn check_level(&self, level: usize) -> Result<&[Patch<S>], MeshOverlapError> {
        self.levels
            .get(level)
            .map(Vec::as_slice)
            .ok_or(MeshOverlapError::InvalidLevel {
                level,
                n_levels: self.levels.len(),
            })
    }

    /// Allocate (or reset to zero) data slot `data_idx` on `level`.
    pub fn allocate(&self, level: usize, data_idx: i32) -> Result<(), MeshOverlapError> {
        let patches = self.check_level(level)?;
        let storage = patches.iter().map(|p| vec![0.0; p.n_total_cells()]).collect();
        self.data.lock().insert((level, data_idx), storage);
        Ok(())
    }

    fn with_slot<R>(
        &self,
        level: usize,
        data_idx: i32,
        f: impl FnOnce(&[Patch<S>], &mut Vec<Vec<f64>>) -> R,
    ) -> Result<R, MeshOverlapError> {
        let patches = self.check_level(level)?;
        let mut data = self.data.lock();
        let slot = data
            .get_mut(&(level, data_idx))
            .ok_or(MeshOverlapError::UnallocatedDataIndex { data_idx, level })?;
        Ok(f(patches, slot))
    }

    /// Set every cell of every local patch to `value(cell center)`.
    pub fn fill(
        &self,
        level: usize,
        data_idx: i32,
        value: impl Fn(&[f64; S]) -> f64,
    ) -> Result<(), MeshOverlapError> {
        self.with_slot(level, data_idx, |patches, slot| {
            for (patch, values) in patches.iter().zip(slot.iter_mut()) {
                for (cell, v) in values.iter_mut().enumerate() {
                    *v = value(&patch.cell_center(cell));
                }
            }
        })
    }

    /// Value of the local cell containing `x`, if any local patch contains it.
    pub fn value_at(
        &self,
        level: usize,
        data_idx: i32,
        x: &[f64; S],
    ) -> Result<Option<f64>, MeshOverlapError> {
        self.with_slot(level, data_idx, |patches, slot| {
            patches
                .iter()
                .zip(slot.iter())
                .find_map(|(p, values)| p.cell_containing(x).map(|c| values[c]))
        })
    }

    /// Add `value` to the local cell containing `x`. Returns false when no
    /// local patch contains `x`.
    pub fn add_at(
        &self,
        level: usize,
        data_idx: i32,
        x: &[f64; S],
        value: f64,
    ) -> Result<bool, MeshOverlapError> {
        self.with_slot(level, data_idx, |patches, slot| {
            for (p, values) in patches.iter().zip(slot.iter_mut()) {
                if let Some(c) = p.cell_containing(x) {
                    values[c] += value;
                    return true;
                }
            }
            false
        })
    }

    /// Sum over all local cells of the slot.
    pub fn local_sum(&self, level: usize, data_idx: i32) -> Result<f64, MeshOverlapError> {
        self.with_slot(level, data_idx, |_, slot| {
            slot.iter().flat_map(|v| v.iter()).sum()
        })
    }
}

impl<const S: usize> PatchHierarchy<S> for CartesianPatchHierarchy<S> {
    fn group(&self) -> GroupId {
        self.group
    }

    fn n_levels(&self) -> usize {
        self.levels.len()
    }

    fn local_patches(&self, level: usize) -> Vec<Patch<S>> {
        self.levels.get(level).cloned().unwrap_or_default()
    }

    fn is_allocated(&self, level: usize, data_idx: i32) -> bool {
        self.data.lock().contains_key(&(level, data_idx))
    }
}
