//! A vector distributed by contiguous ownership ranges: each rank stores the
//! entries it owns and nothing else.

use std::sync::Arc;

use crate::algs::communicator::GroupId;
use crate::data::partitioning::Partitioning;
use crate::mesh_error::MeshOverlapError;

#[derive(Clone, Debug)]
pub struct DistributedVector {
    partitioning: Arc<Partitioning>,
    rank: usize,
    group: GroupId,
    values: Vec<f64>,
}

impl DistributedVector {
    /// Zero vector with the owned range of `rank`.
    pub fn new(partitioning: Arc<Partitioning>, rank: usize, group: GroupId) -> Self {
        let n = partitioning.range(rank).len();
        Self {
            partitioning,
            rank,
            group,
            values: vec![0.0; n],
        }
    }

    pub fn partitioning(&self) -> &Arc<Partitioning> {
        &self.partitioning
    }

    /// Process group the vector is distributed over.
    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_global(&self) -> usize {
        self.partitioning.n_global()
    }

    pub fn local_range(&self) -> std::ops::Range<usize> {
        self.partitioning.range(self.rank)
    }

    pub fn owned(&self) -> &[f64] {
        &self.values
    }

    pub fn owned_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    fn local(&self, g: usize) -> Result<usize, MeshOverlapError> {
        let range = self.local_range();
        if !range.contains(&g) {
            return Err(MeshOverlapError::InternalError(format!(
                "global index {g} is not owned by rank {} (owns {range:?})",
                self.rank
            )));
        }
        Ok(g - range.start)
    }

    /// Value at owned global index `g`.
    pub fn get(&self, g: usize) -> Result<f64, MeshOverlapError> {
        Ok(self.values[self.local(g)?])
    }

    pub fn set(&mut self, g: usize, v: f64) -> Result<(), MeshOverlapError> {
        let i = self.local(g)?;
        self.values[i] = v;
        Ok(())
    }

    pub fn add(&mut self, g: usize, v: f64) -> Result<(), MeshOverlapError> {
        let i = self.local(g)?;
        self.values[i] += v;
        Ok(())
    }

    /// Set every owned entry to `f(global index)`.
    pub fn fill_with(&mut self, f: impl Fn(usize) -> f64) {
        let start = self.local_range().start;
        for (i, v) in self.values.iter_mut().enumerate() {
            *v = f(start + i);
        }
    }

    pub fn zero(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }
}
