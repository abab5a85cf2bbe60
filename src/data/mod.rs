//! Distributed vectors and their contiguous partitioning.

pub mod partitioning;
pub mod vector;

pub use partitioning::Partitioning;
pub use vector::DistributedVector;
