//! Collectives built on the point-to-point [`Communicator`] interface.
//!
//! Every rank must call these in the same order. All send handles are drained
//! before returning, even when a receive fails.

use bytemuck::Pod;
use num_traits::Zero;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, recv_exact};
use crate::mesh_error::MeshOverlapError;

/// In-place summing all-reduce.
///
/// Contributions are added in rank order on every rank, so the result is
/// bitwise identical everywhere.
pub fn all_reduce_sum<T, C>(comm: &C, tag: CommTag, values: &mut [T]) -> Result<(), MeshOverlapError>
where
    T: Pod + Zero + std::ops::AddAssign,
    C: Communicator,
{
    let (me, size) = (comm.rank(), comm.size());
    if size == 1 {
        return Ok(());
    }
    let n = values.len();
    let recvs: Vec<(usize, C::RecvHandle)> = (0..size)
        .filter(|&p| p != me)
        .map(|p| (p, comm.irecv(p, tag.as_u16(), n * std::mem::size_of::<T>())))
        .collect();
    let sends: Vec<C::SendHandle> = (0..size)
        .filter(|&p| p != me)
        .map(|p| comm.isend(p, tag.as_u16(), cast_slice(values)))
        .collect();

    let mut contributions: Vec<Option<Vec<T>>> = vec![None; size];
    let mut maybe_err = None;
    for (peer, h) in recvs {
        match recv_exact::<T>(h.wait(), n, peer) {
            Ok(v) => contributions[peer] = Some(v),
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            Err(_) => {}
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }

    contributions[me] = Some(values.to_vec());
    values.iter_mut().for_each(|v| *v = T::zero());
    for contribution in contributions.into_iter().flatten() {
        for (acc, x) in values.iter_mut().zip(contribution) {
            *acc += x;
        }
    }
    Ok(())
}

/// Send `outgoing[p]` to every rank `p` and return what every rank sent to us.
///
/// Two stages (counts, then payloads) as in the symmetric size exchange:
/// empty lists cost one count message and no payload message.
pub fn all_to_all_v<T, C>(
    comm: &C,
    tag: CommTag,
    outgoing: &[Vec<T>],
) -> Result<Vec<Vec<T>>, MeshOverlapError>
where
    T: Pod,
    C: Communicator,
{
    let (me, size) = (comm.rank(), comm.size());
    debug_assert_eq!(outgoing.len(), size);
    let mut incoming: Vec<Vec<T>> = vec![Vec::new(); size];
    incoming[me] = outgoing[me].clone();
    if size == 1 {
        return Ok(incoming);
    }
    let peers: Vec<usize> = (0..size).filter(|&p| p != me).collect();

    // 1) counts
    let count_tag = tag.as_u16();
    let recvs: Vec<(usize, C::RecvHandle)> = peers
        .iter()
        .map(|&p| (p, comm.irecv(p, count_tag, std::mem::size_of::<WireCount>())))
        .collect();
    let mut sends: Vec<C::SendHandle> = peers
        .iter()
        .map(|&p| {
            let count = WireCount::new(outgoing[p].len());
            comm.isend(p, count_tag, cast_slice(std::slice::from_ref(&count)))
        })
        .collect();
    let mut counts = vec![0usize; size];
    let mut maybe_err = None;
    for (peer, h) in recvs {
        match recv_exact::<WireCount>(h.wait(), 1, peer) {
            Ok(c) => counts[peer] = c[0].get(),
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            Err(_) => {}
        }
    }
    if let Some(err) = maybe_err {
        for s in sends {
            let _ = s.wait();
        }
        return Err(err);
    }

    // 2) payloads
    let data_tag = tag.offset(1).as_u16();
    let recvs: Vec<(usize, C::RecvHandle)> = peers
        .iter()
        .filter(|&&p| counts[p] > 0)
        .map(|&p| (p, comm.irecv(p, data_tag, counts[p] * std::mem::size_of::<T>())))
        .collect();
    sends.extend(
        peers
            .iter()
            .filter(|&&p| !outgoing[p].is_empty())
            .map(|&p| comm.isend(p, data_tag, cast_slice(&outgoing[p]))),
    );
    for (peer, h) in recvs {
        match recv_exact::<T>(h.wait(), counts[peer], peer) {
            Ok(v) => incoming[peer] = v,
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            Err(_) => {}
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}
