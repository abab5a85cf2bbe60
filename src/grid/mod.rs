//! The structured side and the overlap mesh that faces it.

pub mod intersection_predicate;
pub mod overlap_mesh;
pub mod patch_hierarchy;
pub mod patch_map;

pub use intersection_predicate::{
    BoxIntersectionPredicate, FeIntersectionPredicate, IntersectionPredicate,
    TriaIntersectionPredicate,
};
pub use overlap_mesh::OverlapMesh;
pub use patch_hierarchy::{CartesianPatchHierarchy, Patch, PatchHierarchy, compute_patch_bboxes};
pub use patch_map::PatchMap;
