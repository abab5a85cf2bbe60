//! MeshOverlapError: Unified error type for mesh-overlap public APIs
//!
//! Every violation reported here is a programming error upstream (bad inputs,
//! API misuse) or a defect in this crate (broken internal invariant). None of
//! them are meant to be retried; the object that triggered the error is
//! consumed or must be rebuilt.

use thiserror::Error;

use crate::topology::cell::CellId;

/// Unified error type for mesh-overlap operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshOverlapError {
    /// Two objects that must share a process group do not.
    #[error("Communicator mismatch: {0}")]
    CommunicatorMismatch(&'static str),
    /// One quadrature index is required per locally owned active cell.
    #[error("expected {expected} quadrature indices (one per locally owned active cell), got {found}")]
    QuadratureIndexCount { expected: usize, found: usize },
    /// A quadrature index does not address a rule of the family.
    #[error("quadrature index {index} is out of range for a family of {n_rules} rules")]
    InvalidQuadratureIndex { index: u8, n_rules: usize },
    /// The field handler was never registered with the pipeline.
    #[error("The provided field handler must already be registered with this object")]
    UnregisteredFieldHandler,
    /// The field handler was built on a different native mesh.
    #[error("The field handler must use the underlying native mesh")]
    ForeignFieldHandler,
    /// The requested patch level does not exist.
    #[error("level {level} is out of range for a hierarchy with {n_levels} levels")]
    InvalidLevel { level: usize, n_levels: usize },
    /// The structured-grid data slot is not allocated on the level.
    #[error("data index {data_idx} is not allocated on level {level}")]
    UnallocatedDataIndex { data_idx: i32, level: usize },
    /// One bounding box is required per active cell of the native mesh.
    #[error("There should be a bounding box for each active cell: expected {expected}, got {found}")]
    BoundingBoxCount { expected: usize, found: usize },
    /// A vector does not match the layout it is used with.
    #[error("vector length mismatch: expected {expected}, got {found}")]
    VectorLengthMismatch { expected: usize, found: usize },
    /// Channels at or above the reserved base are used for setup traffic.
    #[error("channel {0} collides with tags reserved for setup traffic")]
    ReservedChannel(u16),
    /// A transaction phase was invoked on the wrong state.
    #[error("Transaction state should be {expected}, found {found}")]
    TransactionState {
        expected: &'static str,
        found: &'static str,
    },
    /// A transaction phase was invoked for the wrong operation kind.
    #[error("Transaction operation should be {expected}, found {found}")]
    TransactionOperation {
        expected: &'static str,
        found: &'static str,
    },
    /// A pending exchange was finished through the wrong direction.
    #[error("pending exchange was started as {started}, cannot finish as {finished}")]
    ExchangeDirection {
        started: &'static str,
        finished: &'static str,
    },
    /// An overlap cell and its recorded native origin have drifted apart.
    #[error(
        "overlap cell {overlap} and native cell {native} do not coincide (barycenter distance {distance:e}); the overlap mesh is stale"
    )]
    CorrespondenceMismatch {
        overlap: CellId,
        native: CellId,
        distance: f64,
    },
    /// A cell or vertex lookup referred to nothing.
    #[error("cell {0} does not exist")]
    MissingCell(CellId),
    /// A cell bounding box with no volume.
    #[error("bounding box of active cell {0} should not be empty")]
    DegenerateBoundingBox(usize),
    /// Two overlap cells disagree on the native index of a shared entity.
    #[error("overlap dof {overlap} maps to native dofs {first} and {second}")]
    InconsistentTranslation {
        overlap: usize,
        first: usize,
        second: usize,
    },
    /// Invalid mesh input (cell arity, vertex ids, owners).
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
    /// Broken internal invariant.
    #[error("Internal error: {0}")]
    InternalError(String),
    /// A point-to-point exchange failed.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: CommFailure,
    },
    /// The dedicated communicator could not be released.
    #[error("Unable to free the communicator: {0}")]
    CommFreeFailed(String),
}

/// Low-level description of a failed message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommFailure(pub String);

impl From<String> for CommFailure {
    fn from(s: String) -> Self {
        CommFailure(s)
    }
}

impl From<&str> for CommFailure {
    fn from(s: &str) -> Self {
        CommFailure(s.to_owned())
    }
}
