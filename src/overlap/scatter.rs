//! Two-sided redistribution of vector entries between the native
//! partitioning and overlap space.
//!
//! * native → overlap copies; several overlap entries may read one native
//!   entry.
//! * overlap → native fuses with a [`Delta`] (usually [`AddDelta`]) since
//!   several overlap entries, on one or more ranks, may alias one native
//!   entry.
//!
//! Both directions are split into `start` / `finish`. Starting the same
//! direction twice on one channel before finishing is not supported; distinct
//! channels may be in flight together.
//!
//! [`AddDelta`]: crate::overlap::delta::AddDelta

use crate::algs::communicator::{CommTag, Communicator, setup_tags};
use crate::algs::exchange::{ExchangePlan, PendingExchange};
use crate::data::vector::DistributedVector;
use crate::mesh_error::MeshOverlapError;
use crate::overlap::delta::Delta;
use crate::data::partitioning::Partitioning;

#[derive(Clone, Debug)]
pub struct Scatter {
    plan: ExchangePlan,
    partitioning: Partitioning,
}

impl Scatter {
    /// Collective: derive the communication plan from a translation table
    /// (`translation[overlap dof] = native dof`) and the native ownership.
    pub fn new<C: Communicator>(
        comm: &C,
        translation: &[usize],
        partitioning: &Partitioning,
    ) -> Result<Self, MeshOverlapError> {
        let sources = translation
            .iter()
            .map(|&g| {
                partitioning.locate(g).ok_or_else(|| {
                    MeshOverlapError::InternalError(format!(
                        "native dof {g} outside a numbering of {}",
                        partitioning.n_global()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let n_owned = partitioning.range(comm.rank()).len();
        let plan = ExchangePlan::build(comm, setup_tags::PLAN, n_owned, &sources)?;
        log::debug!(
            "rank {}: scatter over {} overlap entries, {} local, peers {:?}",
            comm.rank(),
            translation.len(),
            plan.n_local(),
            plan.n_peers()
        );
        Ok(Self {
            plan,
            partitioning: partitioning.clone(),
        })
    }

    /// Length of overlap-space vectors.
    pub fn n_overlap(&self) -> usize {
        self.plan.n_targets()
    }

    pub fn plan(&self) -> &ExchangePlan {
        &self.plan
    }

    fn check_native<C: Communicator>(
        &self,
        comm: &C,
        native: &DistributedVector,
    ) -> Result<(), MeshOverlapError> {
        if !comm.is_congruent(native.group()) {
            return Err(MeshOverlapError::CommunicatorMismatch(
                "native vector and scatter span different process groups",
            ));
        }
        if **native.partitioning() != self.partitioning {
            return Err(MeshOverlapError::VectorLengthMismatch {
                expected: self.partitioning.n_global(),
                found: native.n_global(),
            });
        }
        Ok(())
    }

    /// Begin copying `native` into `overlap`. Entries resolved on this rank
    /// are written immediately.
    pub fn global_to_overlap_start<C: Communicator>(
        &self,
        comm: &C,
        channel: u16,
        native: &DistributedVector,
        overlap: &mut [f64],
    ) -> Result<PendingExchange<C>, MeshOverlapError> {
        let tag = CommTag::channel(channel)?;
        self.check_native(comm, native)?;
        log::trace!("rank {}: global→overlap start on channel {channel}", comm.rank());
        self.plan.forward_start(comm, tag, native.owned(), overlap)
    }

    /// Block until the copy started by [`Self::global_to_overlap_start`] has
    /// arrived.
    pub fn global_to_overlap_finish<C: Communicator>(
        &self,
        pending: PendingExchange<C>,
        overlap: &mut [f64],
    ) -> Result<(), MeshOverlapError> {
        self.plan.forward_finish(pending, overlap)
    }

    /// Begin fusing `overlap` into `native` with `D`. Contributions to
    /// entries owned here are fused immediately.
    pub fn overlap_to_global_start<D, C>(
        &self,
        comm: &C,
        channel: u16,
        overlap: &[f64],
        native: &mut DistributedVector,
    ) -> Result<PendingExchange<C>, MeshOverlapError>
    where
        D: Delta<f64, Part = f64>,
        C: Communicator,
    {
        let tag = CommTag::channel(channel)?;
        self.check_native(comm, native)?;
        log::trace!("rank {}: overlap→global start on channel {channel}", comm.rank());
        self.plan
            .reverse_start::<f64, D, C>(comm, tag, overlap, native.owned_mut())
    }

    pub fn overlap_to_global_finish<D, C>(
        &self,
        pending: PendingExchange<C>,
        native: &mut DistributedVector,
    ) -> Result<(), MeshOverlapError>
    where
        D: Delta<f64, Part = f64>,
        C: Communicator,
    {
        self.plan
            .reverse_finish::<f64, D, C>(pending, native.owned_mut())
    }
}
