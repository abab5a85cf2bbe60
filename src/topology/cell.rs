//! Cell handles, ownership status and the closed set of supported
//! (dimension, embedding dimension) pairs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Arena handle of a cell: refinement level plus index within the level.
///
/// Overlap cells remember the `CellId` of their native origin instead of a
/// live reference; the pair is resolved against the native mesh on demand.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellId {
    pub level: usize,
    pub index: usize,
}

impl CellId {
    #[inline]
    pub const fn new(level: usize, index: usize) -> Self {
        Self { level, index }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.level, self.index)
    }
}

/// Status of an active cell relative to the local rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellStatus {
    /// Owned by this rank.
    Owned,
    /// Owned elsewhere but touching an owned cell.
    Ghost,
    /// Neither owned nor adjacent.
    Artificial,
}

/// Identity of one topological state of a native mesh. Refinement and
/// repartitioning produce a fresh id, so objects built on an older state can
/// be told apart.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(u64);

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

impl MeshId {
    pub(crate) fn fresh() -> Self {
        MeshId(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Marker for a (dimension, embedding dimension) pair.
#[derive(Copy, Clone, Debug, Default)]
pub struct Dims<const DIM: usize, const SPACEDIM: usize>;

mod sealed {
    pub trait Sealed {}
}

/// The pairs the crate is instantiated for. Sealed: codimension-one and
/// full-dimensional meshes in two and three space dimensions.
pub trait SupportedDims: sealed::Sealed {
    const DIM: usize;
    const SPACEDIM: usize;
    /// Vertices of one tensor-product cell.
    const VERTICES_PER_CELL: usize = 1 << Self::DIM;
}

macro_rules! supported_dims {
    ($($dim:literal, $spacedim:literal);* $(;)?) => {$(
        impl sealed::Sealed for Dims<$dim, $spacedim> {}
        impl SupportedDims for Dims<$dim, $spacedim> {
            const DIM: usize = $dim;
            const SPACEDIM: usize = $spacedim;
        }
    )*};
}

supported_dims! {
    1, 2;
    2, 2;
    2, 3;
    3, 3;
}
