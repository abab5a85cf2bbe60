//! Degrees of freedom on the native mesh and on the overlap mesh, and the
//! table linking the two numberings.

pub mod cell_bboxes;
pub mod fe;
pub mod field_handler;
pub mod overlap_handler;
pub mod translation;

pub use cell_bboxes::compute_cell_bboxes;
pub use fe::FiniteElement;
pub use field_handler::FieldHandler;
pub use overlap_handler::OverlapFieldHandler;
pub use translation::compute_translation;
