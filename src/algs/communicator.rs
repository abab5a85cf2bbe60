//! Thin façade over intra-process (threads as ranks) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange code calls
//! `.wait()` before it trusts that a buffer is ready. Messages between the same
//! pair of ranks on the same tag are delivered in the order they were sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use once_cell::sync::Lazy;

use crate::mesh_error::MeshOverlapError;

/// Identifies a process group. Two communicators are congruent when they
/// span the same group, even if their contexts differ.
pub type GroupId = u64;

/// Group of the serial [`NoComm`] backend.
pub const SERIAL_GROUP: GroupId = 0;

/// A typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    /// Tags at or above this value carry setup traffic (plan construction,
    /// collectives) and are never handed out as transfer channels.
    pub const RESERVED_BASE: u16 = 0xF000;

    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `self + k`, used for the stages of a multi-message protocol.
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }

    /// Convert a caller-supplied channel into a tag, rejecting reserved ones.
    pub fn channel(channel: u16) -> Result<Self, MeshOverlapError> {
        if channel >= Self::RESERVED_BASE {
            return Err(MeshOverlapError::ReservedChannel(channel));
        }
        Ok(Self(channel))
    }
}

/// Reserved tags, one pair per setup protocol.
pub mod setup_tags {
    use super::CommTag;

    /// Scatter/partitioner plan construction (count + index stages).
    pub const PLAN: CommTag = CommTag(CommTag::RESERVED_BASE);
    /// Ghost fetch used while evaluating field bounding boxes.
    pub const GHOST_FETCH: CommTag = CommTag(CommTag::RESERVED_BASE + 0x10);
    /// Summing all-reduce.
    pub const ALL_REDUCE: CommTag = CommTag(CommTag::RESERVED_BASE + 0x20);
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Process group spanned by this communicator.
    fn group(&self) -> GroupId;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive for a `len`-byte message from `peer`. A message of any
    /// other size is a protocol error the caller detects on completion.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    /// Collective: create a congruent communicator with a private context.
    fn duplicate(&self) -> Self
    where
        Self: Sized;

    /// Release the communicator. Failures are reported, never raised.
    fn free(&mut self) -> Result<(), MeshOverlapError> {
        Ok(())
    }

    /// True if `group` is the process group of this communicator.
    fn is_congruent(&self, group: GroupId) -> bool {
        self.group() == group
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Compile-time no-op comm for pure serial runs: one rank, no peers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn group(&self) -> GroupId {
        SERIAL_GROUP
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}
    fn duplicate(&self) -> Self {
        NoComm
    }
}

// --- LocalComm: ranks are threads of one process ---
type Key = (u64, usize, usize, u16); // (context, src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
/// (parent context, duplicate sequence number) -> child context.
static DUPLICATES: Lazy<DashMap<(u64, u64), u64>> = Lazy::new(DashMap::new);
/// Groups on which some rank called [`LocalComm::abort`].
static ABORTED: Lazy<DashSet<GroupId>> = Lazy::new(DashSet::new);

/// Receive handle polling the shared mailbox. The message is returned
/// whole; callers check its length against what they posted.
pub struct LocalHandle {
    key: Key,
    group: GroupId,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            let popped = MAILBOX
                .get_mut(&self.key)
                .and_then(|mut queue| queue.pop_front());
            if let Some(bytes) = popped {
                return Some(bytes.to_vec());
            }
            if ABORTED.contains(&self.group) {
                return None;
            }
            std::thread::yield_now();
        }
    }
}

/// In-process multi-rank communicator. Create all ranks with
/// [`LocalComm::universe`] and move each handle into its own thread.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    group: GroupId,
    context: u64,
    dup_seq: Arc<AtomicU64>,
}

impl LocalComm {
    /// Handles for ranks `0..size` of a fresh process group.
    pub fn universe(size: usize) -> Vec<LocalComm> {
        let id = NEXT_ID.fetch_add(1, Relaxed);
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                group: id,
                context: id,
                dup_seq: Arc::new(AtomicU64::new(0)),
            })
            .collect()
    }

    /// Message context; distinct for every duplicate.
    pub fn context(&self) -> u64 {
        self.context
    }

    /// Abort the whole process group: every receive still waiting on any of
    /// its ranks, or posted later, completes empty.
    pub fn abort(&self) {
        log::warn!("rank {}: aborting process group {}", self.rank, self.group);
        ABORTED.insert(self.group);
    }

    pub fn is_aborted(&self) -> bool {
        ABORTED.contains(&self.group)
    }

    /// Number of messages addressed to this rank that nobody received yet.
    pub fn pending_messages(&self) -> usize {
        MAILBOX
            .iter()
            .filter(|entry| {
                let (ctx, _, dst, _) = *entry.key();
                ctx == self.context && dst == self.rank
            })
            .map(|entry| entry.value().len())
            .sum()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn group(&self) -> GroupId {
        self.group
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.context, self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _len: usize) -> Self::RecvHandle {
        LocalHandle {
            key: (self.context, peer, self.rank, tag),
            group: self.group,
        }
    }

    fn duplicate(&self) -> Self {
        // every rank duplicates in the same collective order, so the n-th
        // duplicate of a context resolves to the same child on all ranks
        let seq = self.dup_seq.fetch_add(1, Relaxed);
        let context = *DUPLICATES
            .entry((self.context, seq))
            .or_insert_with(|| NEXT_ID.fetch_add(1, Relaxed));
        LocalComm {
            rank: self.rank,
            size: self.size,
            group: self.group,
            context,
            dup_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn free(&mut self) -> Result<(), MeshOverlapError> {
        let (ctx, me) = (self.context, self.rank);
        let mut stale = 0usize;
        MAILBOX.retain(|key, queue| {
            if key.0 == ctx && key.2 == me {
                stale += queue.len();
                false
            } else {
                true
            }
        });
        if stale > 0 {
            return Err(MeshOverlapError::CommFreeFailed(format!(
                "{stale} undelivered message(s) addressed to rank {me}"
            )));
        }
        Ok(())
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, GroupId, Wait};
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, Destination as _, Group as _, Source as _};
    use std::hash::{Hash, Hasher};

    pub struct MpiComm {
        comm: SimpleCommunicator,
        group: GroupId,
    }

    /// Completes one posted request and releases its buffer.
    pub struct MpiHandle(Box<dyn FnOnce() -> Option<Vec<u8>>>);

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            (self.0)()
        }
    }

    impl MpiComm {
        pub fn new(comm: SimpleCommunicator) -> Self {
            let group = group_fingerprint(&comm);
            Self { comm, group }
        }

        pub fn raw(&self) -> &SimpleCommunicator {
            &self.comm
        }
    }

    // hash of the world ranks making up the group
    fn group_fingerprint(comm: &SimpleCommunicator) -> GroupId {
        let world = SimpleCommunicator::world();
        let world_group = world.group();
        let group = comm.group();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for r in 0..comm.size() {
            group.translate_rank(r, &world_group).hash(&mut hasher);
        }
        hasher.finish()
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.comm.rank() as usize
        }
        fn size(&self) -> usize {
            self.comm.size() as usize
        }
        fn group(&self) -> GroupId {
            self.group
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let ptr: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the allocation is reclaimed only after the request completes.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self
                .comm
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiHandle(Box::new(move || {
                req.wait();
                // SAFETY: `ptr` came from `Box::into_raw` above and is freed once.
                drop(unsafe { Box::from_raw(ptr) });
                None
            }))
        }

        fn irecv(&self, peer: usize, tag: u16, len: usize) -> MpiHandle {
            let ptr: *mut [u8] = Box::into_raw(vec![0u8; len].into_boxed_slice());
            // SAFETY: the buffer is not touched until the request completes.
            let data: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .comm
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, data, tag as i32);
            MpiHandle(Box::new(move || {
                req.wait();
                // SAFETY: `ptr` came from `Box::into_raw` above and is freed once.
                let owned = unsafe { Box::from_raw(ptr) };
                Some(owned.into_vec())
            }))
        }

        fn duplicate(&self) -> Self {
            Self {
                comm: self.comm.duplicate(),
                group: self.group,
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let comms = LocalComm::universe(2);
        let (c0, c1) = (&comms[0], &comms[1]);

        let recv = c1.irecv(0, 7, 4);
        let send = c0.isend(1, 7, &[1, 2, 3, 4]);
        send.wait();

        let data = recv.wait().expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn oversized_messages_are_not_truncated() {
        let comms = LocalComm::universe(2);
        comms[0].isend(1, 2, &[0u8; 16]);
        let data = comms[1].irecv(0, 2, 8).wait();
        assert_eq!(data.as_ref().map(Vec::len), Some(16));
        let err = crate::algs::wire::recv_exact::<u64>(data, 1, 0).unwrap_err();
        assert!(matches!(err, MeshOverlapError::CommError { neighbor: 0, .. }));
    }

    #[test]
    fn abort_releases_blocked_receives() {
        let comms = LocalComm::universe(2);
        let dup1 = comms[1].duplicate();
        std::thread::scope(|s| {
            let waiting = s.spawn(|| dup1.irecv(0, 4, 8).wait());
            comms[0].abort();
            assert_eq!(waiting.join().unwrap(), None);
        });
        assert!(comms[1].is_aborted());
        let err = crate::algs::wire::recv_exact::<u64>(comms[1].irecv(0, 5, 8).wait(), 1, 0)
            .unwrap_err();
        assert!(matches!(err, MeshOverlapError::CommError { neighbor: 0, .. }));
        assert!(!LocalComm::universe(2)[0].is_aborted());
    }

    #[test]
    fn duplicate_isolates_traffic() {
        let comms = LocalComm::universe(2);
        let dup0 = comms[0].duplicate();
        let dup1 = comms[1].duplicate();
        assert_eq!(dup0.context(), dup1.context());
        assert_ne!(dup0.context(), comms[0].context());
        assert_eq!(dup0.group(), comms[0].group());

        comms[0].isend(1, 3, &[9]);
        dup0.isend(1, 3, &[5]);
        assert_eq!(dup1.irecv(0, 3, 1).wait(), Some(vec![5]));
        assert_eq!(comms[1].irecv(0, 3, 1).wait(), Some(vec![9]));
    }

    #[test]
    fn free_reports_undelivered_messages() {
        let mut comms = LocalComm::universe(2);
        comms[0].isend(1, 1, &[1, 2]);
        assert_eq!(comms[1].pending_messages(), 1);
        let err = comms[1].free().unwrap_err();
        assert!(matches!(err, MeshOverlapError::CommFreeFailed(_)));
        assert_eq!(comms[1].pending_messages(), 0);
        assert!(comms[0].free().is_ok());
    }

    #[test]
    fn reserved_channels_are_rejected() {
        assert!(CommTag::channel(1).is_ok());
        assert_eq!(
            CommTag::channel(CommTag::RESERVED_BASE),
            Err(MeshOverlapError::ReservedChannel(CommTag::RESERVED_BASE))
        );
    }
}
