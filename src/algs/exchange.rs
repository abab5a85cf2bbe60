//! Precomputed point-to-point plans moving values between an *owned* array
//! (indexed by owned offset on the owning rank) and a *target* array whose
//! positions may read from any rank.
//!
//! A plan is built once (collectively) from the list of sources each target
//! position reads from and then reused for every transfer, in both directions:
//!
//! * forward: owned → target, a plain copy; several target positions may read
//!   the same source.
//! * reverse: target → owned, fused with a [`Delta`]; aliased positions are
//!   combined on the sender first, so `AddDelta` yields a true sum.
//!
//! Each direction is split into a non-blocking `start` and a blocking
//! `finish`. Local entries are moved during `start`.

use std::collections::BTreeMap;

use bytemuck::Pod;
use hashbrown::HashMap;

use crate::algs::collective::all_to_all_v;
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireIndex, cast_slice, recv_exact};
use crate::mesh_error::MeshOverlapError;
use crate::overlap::delta::Delta;

/// Which way a pending exchange moves data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn name(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

#[derive(Clone, Debug)]
struct ImportBlock {
    peer: usize,
    n_slots: usize,
    /// (slot in the message, target position)
    targets: Vec<(usize, usize)>,
}

#[derive(Clone, Debug)]
struct ExportBlock {
    peer: usize,
    /// owned offsets in message order
    offsets: Vec<usize>,
}

/// Communication plan between an owned array and a target array.
#[derive(Clone, Debug, Default)]
pub struct ExchangePlan {
    imports: Vec<ImportBlock>,
    exports: Vec<ExportBlock>,
    /// (owned offset, target position) resolved without communication
    local: Vec<(usize, usize)>,
    n_owned: usize,
    n_targets: usize,
}

/// In-flight transfer returned by a `start` call. Must be handed back to the
/// matching `finish` of the same plan.
#[must_use = "a started exchange must be finished"]
pub struct PendingExchange<C: Communicator> {
    direction: Direction,
    sends: Vec<C::SendHandle>,
    recvs: Vec<(usize, C::RecvHandle)>,
}

impl<C: Communicator> PendingExchange<C> {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn expect(&self, direction: Direction) -> Result<(), MeshOverlapError> {
        if self.direction != direction {
            return Err(MeshOverlapError::ExchangeDirection {
                started: self.direction.name(),
                finished: direction.name(),
            });
        }
        Ok(())
    }
}

/// A request slot for the caller-buffer interface.
pub enum CommRequest<C: Communicator> {
    Send(C::SendHandle),
    Recv { block: usize, handle: C::RecvHandle },
}

impl ExchangePlan {
    /// Collective: build the plan from `sources[pos] = (owner rank, owned offset)`.
    ///
    /// `n_owned` is the length of this rank's owned array. Every rank must
    /// call this, even with no sources.
    pub fn build<C: Communicator>(
        comm: &C,
        tag: CommTag,
        n_owned: usize,
        sources: &[(usize, usize)],
    ) -> Result<Self, MeshOverlapError> {
        let me = comm.rank();
        let mut local = Vec::new();
        let mut slots: BTreeMap<usize, (HashMap<usize, usize>, Vec<usize>, Vec<(usize, usize)>)> =
            BTreeMap::new();
        for (pos, &(owner, offset)) in sources.iter().enumerate() {
            if owner >= comm.size() {
                return Err(MeshOverlapError::InternalError(format!(
                    "source of target {pos} names rank {owner} outside a group of {}",
                    comm.size()
                )));
            }
            if owner == me {
                if offset >= n_owned {
                    return Err(MeshOverlapError::InternalError(format!(
                        "owned offset {offset} out of range ({n_owned} owned entries)"
                    )));
                }
                local.push((offset, pos));
                continue;
            }
            let (by_offset, requested, targets) = slots.entry(owner).or_default();
            let slot = *by_offset.entry(offset).or_insert_with(|| {
                requested.push(offset);
                requested.len() - 1
            });
            targets.push((slot, pos));
        }

        let mut outgoing: Vec<Vec<WireIndex>> = vec![Vec::new(); comm.size()];
        let mut imports = Vec::with_capacity(slots.len());
        for (peer, (_, requested, targets)) in slots {
            outgoing[peer] = requested.iter().map(|&o| WireIndex::of(o)).collect();
            imports.push(ImportBlock {
                peer,
                n_slots: requested.len(),
                targets,
            });
        }

        let incoming = all_to_all_v(comm, tag, &outgoing)?;
        let mut exports = Vec::new();
        for (peer, wanted) in incoming.into_iter().enumerate() {
            if peer == me || wanted.is_empty() {
                continue;
            }
            let offsets: Vec<usize> = wanted.iter().map(WireIndex::get).collect();
            if let Some(&bad) = offsets.iter().find(|&&o| o >= n_owned) {
                return Err(MeshOverlapError::InternalError(format!(
                    "rank {peer} requested owned offset {bad} but only {n_owned} are owned"
                )));
            }
            exports.push(ExportBlock { peer, offsets });
        }

        log::trace!(
            "rank {me}: exchange plan with {} local, {} import peers, {} export peers",
            local.len(),
            imports.len(),
            exports.len()
        );
        Ok(Self {
            imports,
            exports,
            local,
            n_owned,
            n_targets: sources.len(),
        })
    }

    pub fn n_owned(&self) -> usize {
        self.n_owned
    }

    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    /// Number of peers (imported from, exported to).
    pub fn n_peers(&self) -> (usize, usize) {
        (self.imports.len(), self.exports.len())
    }

    /// Number of entries resolved on this rank.
    pub fn n_local(&self) -> usize {
        self.local.len()
    }

    /// Number of values this rank sends in a forward transfer.
    pub fn n_export_values(&self) -> usize {
        self.exports.iter().map(|b| b.offsets.len()).sum()
    }

    /// Peers this rank reads from, ascending.
    pub fn import_peers(&self) -> impl Iterator<Item = usize> + '_ {
        self.imports.iter().map(|b| b.peer)
    }

    fn check_len(found: usize, expected: usize) -> Result<(), MeshOverlapError> {
        if found != expected {
            return Err(MeshOverlapError::VectorLengthMismatch { expected, found });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // forward: owned -> target
    // ---------------------------------------------------------------------

    /// Post receives and sends for a forward copy; local entries are copied
    /// into `targets` immediately.
    pub fn forward_start<T: Pod, C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        owned: &[T],
        targets: &mut [T],
    ) -> Result<PendingExchange<C>, MeshOverlapError> {
        Self::check_len(owned.len(), self.n_owned)?;
        Self::check_len(targets.len(), self.n_targets)?;
        let recvs = self.post_import_receives::<T, C>(comm, tag);
        let sends = self
            .exports
            .iter()
            .map(|block| {
                let packed: Vec<T> = block.offsets.iter().map(|&o| owned[o]).collect();
                comm.isend(block.peer, tag.as_u16(), cast_slice(&packed))
            })
            .collect();
        for &(offset, pos) in &self.local {
            targets[pos] = owned[offset];
        }
        Ok(PendingExchange {
            direction: Direction::Forward,
            sends,
            recvs,
        })
    }

    /// Wait for a forward copy and scatter the received values into `targets`.
    pub fn forward_finish<T: Pod, C: Communicator>(
        &self,
        pending: PendingExchange<C>,
        targets: &mut [T],
    ) -> Result<(), MeshOverlapError> {
        pending.expect(Direction::Forward)?;
        Self::check_len(targets.len(), self.n_targets)?;
        let PendingExchange { sends, recvs, .. } = pending;
        let mut maybe_err = None;
        for (block, handle) in recvs {
            if let Err(e) = self.unpack_import(block, handle.wait(), targets) {
                maybe_err.get_or_insert(e);
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        maybe_err.map_or(Ok(()), Err)
    }

    // ---------------------------------------------------------------------
    // reverse: target -> owned
    // ---------------------------------------------------------------------

    /// Combine target contributions per remote source, send them to their
    /// owners, and fuse local contributions into `owned` immediately.
    pub fn reverse_start<T, D, C>(
        &self,
        comm: &C,
        tag: CommTag,
        targets: &[T],
        owned: &mut [T],
    ) -> Result<PendingExchange<C>, MeshOverlapError>
    where
        T: Pod,
        D: Delta<T>,
        D::Part: Pod,
        C: Communicator,
    {
        Self::check_len(targets.len(), self.n_targets)?;
        Self::check_len(owned.len(), self.n_owned)?;
        let recvs = self
            .exports
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let len = block.offsets.len() * std::mem::size_of::<D::Part>();
                (i, comm.irecv(block.peer, tag.as_u16(), len))
            })
            .collect();
        let sends = self
            .imports
            .iter()
            .map(|block| {
                let mut combined = vec![T::zeroed(); block.n_slots];
                for &(slot, pos) in &block.targets {
                    D::fuse(&mut combined[slot], D::restrict(&targets[pos]));
                }
                let parts: Vec<D::Part> = combined.iter().map(D::restrict).collect();
                comm.isend(block.peer, tag.as_u16(), cast_slice(&parts))
            })
            .collect();
        for &(offset, pos) in &self.local {
            D::fuse(&mut owned[offset], D::restrict(&targets[pos]));
        }
        Ok(PendingExchange {
            direction: Direction::Reverse,
            sends,
            recvs,
        })
    }

    /// Wait for a reverse transfer and fuse the received parts into `owned`.
    pub fn reverse_finish<T, D, C>(
        &self,
        pending: PendingExchange<C>,
        owned: &mut [T],
    ) -> Result<(), MeshOverlapError>
    where
        T: Pod,
        D: Delta<T>,
        D::Part: Pod,
        C: Communicator,
    {
        pending.expect(Direction::Reverse)?;
        Self::check_len(owned.len(), self.n_owned)?;
        let PendingExchange { sends, recvs, .. } = pending;
        let mut maybe_err = None;
        for (block, handle) in recvs {
            let export = &self.exports[block];
            match recv_exact::<D::Part>(handle.wait(), export.offsets.len(), export.peer) {
                Ok(parts) => {
                    for (&offset, part) in export.offsets.iter().zip(parts) {
                        D::fuse(&mut owned[offset], part);
                    }
                }
                Err(e) => {
                    maybe_err.get_or_insert(e);
                }
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        maybe_err.map_or(Ok(()), Err)
    }

    // ---------------------------------------------------------------------
    // caller-buffer interface (forward only)
    // ---------------------------------------------------------------------

    /// Scratch entries needed by [`Self::export_start`].
    pub fn temporary_storage_size(&self) -> usize {
        self.n_local() + self.n_export_values()
    }

    /// Request slots needed by [`Self::export_start`].
    pub fn n_requests(&self) -> usize {
        self.imports.len() + self.exports.len()
    }

    /// Forward copy using caller-provided scratch and request storage.
    ///
    /// Local values and outgoing messages are packed into `temporary_storage`;
    /// `requests` must be empty and receives one entry per peer.
    pub fn export_start<T: Pod, C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        owned: &[T],
        temporary_storage: &mut [T],
        requests: &mut Vec<CommRequest<C>>,
    ) -> Result<(), MeshOverlapError> {
        Self::check_len(owned.len(), self.n_owned)?;
        Self::check_len(temporary_storage.len(), self.temporary_storage_size())?;
        if !requests.is_empty() {
            return Err(MeshOverlapError::InternalError(
                "request storage still holds an unfinished exchange".into(),
            ));
        }
        for (block, handle) in self.post_import_receives::<T, C>(comm, tag) {
            requests.push(CommRequest::Recv { block, handle });
        }
        let (local_part, export_part) = temporary_storage.split_at_mut(self.local.len());
        for (slot, &(offset, _)) in local_part.iter_mut().zip(&self.local) {
            *slot = owned[offset];
        }
        let mut cursor = 0;
        for block in &self.exports {
            let chunk = &mut export_part[cursor..cursor + block.offsets.len()];
            for (slot, &offset) in chunk.iter_mut().zip(&block.offsets) {
                *slot = owned[offset];
            }
            requests.push(CommRequest::Send(comm.isend(
                block.peer,
                tag.as_u16(),
                cast_slice(chunk),
            )));
            cursor += block.offsets.len();
        }
        Ok(())
    }

    /// Complete [`Self::export_start`], filling `targets`.
    pub fn export_finish<T: Pod, C: Communicator>(
        &self,
        temporary_storage: &[T],
        targets: &mut [T],
        requests: &mut Vec<CommRequest<C>>,
    ) -> Result<(), MeshOverlapError> {
        Self::check_len(temporary_storage.len(), self.temporary_storage_size())?;
        Self::check_len(targets.len(), self.n_targets)?;
        for (value, &(_, pos)) in temporary_storage.iter().zip(&self.local) {
            targets[pos] = *value;
        }
        let mut maybe_err = None;
        for request in requests.drain(..) {
            match request {
                CommRequest::Recv { block, handle } => {
                    if let Err(e) = self.unpack_import(block, handle.wait(), targets) {
                        maybe_err.get_or_insert(e);
                    }
                }
                CommRequest::Send(handle) => {
                    let _ = handle.wait();
                }
            }
        }
        maybe_err.map_or(Ok(()), Err)
    }

    fn post_import_receives<T: Pod, C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
    ) -> Vec<(usize, C::RecvHandle)> {
        self.imports
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let len = block.n_slots * std::mem::size_of::<T>();
                (i, comm.irecv(block.peer, tag.as_u16(), len))
            })
            .collect()
    }

    fn unpack_import<T: Pod>(
        &self,
        block: usize,
        data: Option<Vec<u8>>,
        targets: &mut [T],
    ) -> Result<(), MeshOverlapError> {
        let import = &self.imports[block];
        let values = recv_exact::<T>(data, import.n_slots, import.peer)?;
        for &(slot, pos) in &import.targets {
            targets[pos] = values[slot];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::overlap::delta::{AddDelta, CopyDelta};

    #[test]
    fn serial_plan_is_local_only() {
        let plan = ExchangePlan::build(&NoComm, CommTag::new(0xF300), 3, &[(0, 2), (0, 0), (0, 2)])
            .unwrap();
        assert_eq!(plan.n_local(), 3);
        assert_eq!(plan.n_peers(), (0, 0));

        let owned = [1.0, 2.0, 3.0];
        let mut targets = [0.0; 3];
        let p = plan
            .forward_start(&NoComm, CommTag::new(0), &owned, &mut targets)
            .unwrap();
        plan.forward_finish(p, &mut targets).unwrap();
        assert_eq!(targets, [3.0, 1.0, 3.0]);

        let mut back = [0.0; 3];
        let p = plan
            .reverse_start::<f64, AddDelta, _>(&NoComm, CommTag::new(0), &targets, &mut back)
            .unwrap();
        plan.reverse_finish::<f64, AddDelta, _>(p, &mut back).unwrap();
        assert_eq!(back, [1.0, 0.0, 6.0]);
    }

    #[test]
    fn finishing_in_the_wrong_direction_fails() {
        let plan = ExchangePlan::build(&NoComm, CommTag::new(0xF300), 1, &[(0, 0)]).unwrap();
        let mut targets = [0.0f64];
        let p = plan
            .forward_start(&NoComm, CommTag::new(0), &[4.0], &mut targets)
            .unwrap();
        let err = plan
            .reverse_finish::<f64, CopyDelta, _>(p, &mut [0.0])
            .unwrap_err();
        assert!(matches!(err, MeshOverlapError::ExchangeDirection { .. }));
    }

    #[test]
    fn two_rank_forward_and_summing_reverse() {
        // rank r owns two values; every rank reads both values of the other
        // rank twice plus its own first value
        let comms = LocalComm::universe(2);
        let results: Vec<(Vec<f64>, Vec<f64>)> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let me = c.rank();
                        let other = 1 - me;
                        let sources = [(other, 0), (other, 1), (other, 0), (me, 0)];
                        let plan = ExchangePlan::build(c, CommTag::new(0xF300), 2, &sources).unwrap();
                        let owned = [10.0 * me as f64 + 1.0, 10.0 * me as f64 + 2.0];
                        let mut targets = [0.0; 4];
                        let p = plan.forward_start(c, CommTag::new(5), &owned, &mut targets).unwrap();
                        plan.forward_finish(p, &mut targets).unwrap();

                        let ones = [1.0; 4];
                        let mut counts = [0.0; 2];
                        let p = plan
                            .reverse_start::<f64, AddDelta, _>(c, CommTag::new(6), &ones, &mut counts)
                            .unwrap();
                        plan.reverse_finish::<f64, AddDelta, _>(p, &mut counts).unwrap();
                        (targets.to_vec(), counts.to_vec())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0].0, vec![11.0, 12.0, 11.0, 1.0]);
        assert_eq!(results[1].0, vec![1.0, 2.0, 1.0, 11.0]);
        // offset 0 is read twice by the peer and once locally
        assert_eq!(results[0].1, vec![3.0, 1.0]);
        assert_eq!(results[1].1, vec![3.0, 1.0]);
    }

    #[test]
    fn caller_buffer_interface_matches_token_interface() {
        let comms = LocalComm::universe(2);
        let results: Vec<Vec<u8>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let me = c.rank();
                        let sources = [(1 - me, 1), (me, 0)];
                        let plan = ExchangePlan::build(c, CommTag::new(0xF300), 2, &sources).unwrap();
                        let owned = [me as u8 * 10, me as u8 * 10 + 1];
                        let mut work = vec![0u8; plan.temporary_storage_size()];
                        let mut requests = Vec::with_capacity(plan.n_requests());
                        plan.export_start(c, CommTag::new(1), &owned, &mut work, &mut requests)
                            .unwrap();
                        let mut ghosts = vec![0u8; 2];
                        plan.export_finish(&work, &mut ghosts, &mut requests).unwrap();
                        assert!(requests.is_empty());
                        ghosts
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], vec![11, 0]);
        assert_eq!(results[1], vec![1, 10]);
    }
}
