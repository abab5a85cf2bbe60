//! Moving values between the native partitioning and overlap space.
//!
//! [`scatter`] redistributes vector entries through a translation table,
//! [`cell_partitioner`] ghosts one small value per active cell, and [`delta`]
//! decides how incoming contributions are fused.

pub mod cell_partitioner;
pub mod delta;
pub mod scatter;

pub use cell_partitioner::ActiveCellPartitioner;
pub use delta::{AddDelta, CopyDelta, Delta};
pub use scatter::Scatter;
