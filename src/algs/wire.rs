//! Fixed, little-endian wire types for exchange plans and payloads.

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;

use crate::mesh_error::{CommFailure, MeshOverlapError};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a received byte buffer into owned values. The buffer coming out of
/// a receive has no alignment guarantee, so this copies.
pub fn decode_vec<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let n = bytes.len() / std::mem::size_of::<T>();
    let mut out = vec![T::zeroed(); n];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes[..n * std::mem::size_of::<T>()]);
    out
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Wait for a receive and check it carries exactly `n` values of `T`.
pub fn recv_exact<T: Pod>(
    data: Option<Vec<u8>>,
    n: usize,
    peer: usize,
) -> Result<Vec<T>, MeshOverlapError> {
    let data = data.ok_or_else(|| MeshOverlapError::CommError {
        neighbor: peer,
        source: CommFailure::from(format!("failed to receive from rank {peer}")),
    })?;
    expect_exact_len(data.len(), n * std::mem::size_of::<T>()).map_err(|e| {
        MeshOverlapError::CommError {
            neighbor: peer,
            source: e.into(),
        }
    })?;
    Ok(decode_vec(&data))
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// An index (dof, active cell, owned offset) carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireIndex {
    pub id_le: u64,
}

impl WireIndex {
    pub fn of(id: usize) -> Self {
        Self {
            id_le: (id as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.id_le) as usize
    }
}

assert_eq_size!(WireCount, u32);
assert_eq_size!(WireIndex, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_handles_unaligned_input() {
        let values = [1.5f64, -2.0, 3.25];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(cast_slice(&values));
        let decoded: Vec<f64> = decode_vec(&bytes[1..]);
        assert_eq!(decoded, values);
    }

    #[test]
    fn recv_exact_rejects_short_messages() {
        let err = recv_exact::<u64>(Some(vec![0u8; 12]), 2, 3).unwrap_err();
        assert!(matches!(err, MeshOverlapError::CommError { neighbor: 3, .. }));
        let err = recv_exact::<u64>(None, 1, 1).unwrap_err();
        assert!(matches!(err, MeshOverlapError::CommError { neighbor: 1, .. }));
    }

    #[test]
    fn wire_index_round_trips() {
        assert_eq!(WireIndex::of(123_456_789).get(), 123_456_789);
        assert_eq!(WireCount::new(17).get(), 17);
    }
}
