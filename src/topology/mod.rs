//! Native mesh topology: cell identifiers, the refinement hierarchy and
//! cell ownership.

pub mod cell;
pub mod native_mesh;

pub use cell::{CellId, CellStatus, Dims, MeshId, SupportedDims};
pub use native_mesh::{NativeMesh, NativeMesh1d2, NativeMesh2d, NativeMesh2d3, NativeMesh3d};
