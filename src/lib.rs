#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-overlap
//!
//! mesh-overlap moves field data between a distributed, hierarchically
//! refined unstructured mesh (the *native* mesh) and one level of a
//! structured patch hierarchy distributed over the same processes.
//!
//! Every rank holds the full native mesh; ownership of active cells is
//! distributed. For the patches a rank owns, it builds an *overlap mesh*: a
//! local copy of every native cell whose bounding box touches a ghost-grown
//! patch box, plus all cells it owns. Field values are scattered from the
//! native partitioning into overlap space, integrated against the structured
//! data there, and accumulated back.
//!
//! ## Features
//! - Overlap mesh construction from per-cell bounding boxes, with a checked
//!   correspondence back to the native cells
//! - Overlap dof numbering and native ↔ overlap translation tables
//! - Asynchronous scatters in both directions, with summing accumulation
//! - A per-cell ghost exchange with caller-owned scratch storage
//! - Three-phase interpolation and spreading transactions
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-overlap = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ## Ordering
//!
//! Per-cell arrays on the overlap side (quadrature indices, overlap cell
//! dofs, patch map entries) are indexed by position in
//! [`grid::OverlapMesh::ordered_cells`]: active overlap cells sorted by the
//! native active index of the cell they copy.

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod dofs;
pub mod geometry;
pub mod grid;
pub mod interaction;
pub mod mesh_error;
pub mod overlap;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use mesh_error::MeshOverlapError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::data::{DistributedVector, Partitioning};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::dofs::{FieldHandler, FiniteElement, OverlapFieldHandler, compute_cell_bboxes};
    pub use crate::geometry::BoundingBox;
    pub use crate::grid::{
        BoxIntersectionPredicate, CartesianPatchHierarchy, FeIntersectionPredicate,
        IntersectionPredicate, OverlapMesh, Patch, PatchHierarchy, PatchMap,
        TriaIntersectionPredicate,
    };
    pub use crate::interaction::{
        InteractionBase, InteractionConfig, OverlapData, QuadratureFamily, Transaction,
        TransactionState,
    };
    pub use crate::mesh_error::MeshOverlapError;
    pub use crate::overlap::{ActiveCellPartitioner, AddDelta, CopyDelta, Delta, Scatter};
    pub use crate::topology::{CellId, CellStatus, NativeMesh, NativeMesh2d, NativeMesh3d};
}
