//! Axis-aligned bounding boxes.

pub mod bbox;

pub use bbox::BoundingBox;
