//! The record of one in-flight interpolation or spreading operation.
//!
//! A transaction is created by a `*_start` call, advanced by the matching
//! `*_intermediate` call and consumed by `*_finish`. Each phase checks the
//! operation kind and the state before touching any data; a mismatch is an
//! error and the transaction is dropped.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{CommRequest, PendingExchange};
use crate::data::vector::DistributedVector;
use crate::dofs::overlap_handler::OverlapFieldHandler;
use crate::grid::overlap_mesh::OverlapMesh;
use crate::grid::patch_hierarchy::PatchHierarchy;
use crate::grid::patch_map::PatchMap;
use crate::interaction::interaction_base::HandlerEntry;
use crate::interaction::quadrature::QuadratureFamily;
use crate::mesh_error::MeshOverlapError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Interpolation,
    Spreading,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Interpolation => "Interpolation",
            Operation::Spreading => "Spreading",
        }
    }
}

/// The phase a transaction expects next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Intermediate,
    Finish,
    Done,
}

impl TransactionState {
    pub fn name(self) -> &'static str {
        match self {
            TransactionState::Intermediate => "Intermediate",
            TransactionState::Finish => "Finish",
            TransactionState::Done => "Done",
        }
    }
}

/// The native-space F vector: read when spreading, accumulated into when
/// interpolating.
pub(crate) enum NativeF<'a> {
    Input(&'a DistributedVector),
    Output(&'a mut DistributedVector),
}

pub struct Transaction<'a, C: Communicator, const DIM: usize, const SPACEDIM: usize> {
    pub(crate) operation: Operation,
    pub(crate) next_state: TransactionState,
    pub(crate) f_data_idx: i32,
    pub(crate) quad_family: &'a QuadratureFamily<DIM>,

    pub(crate) native_quad_indices: Vec<u8>,
    pub(crate) overlap_quad_indices: Vec<u8>,
    pub(crate) quad_work: Vec<u8>,
    pub(crate) quad_requests: Vec<CommRequest<C>>,

    pub(crate) x: &'a HandlerEntry<DIM, SPACEDIM>,
    pub(crate) native_x: &'a DistributedVector,
    pub(crate) overlap_x: Vec<f64>,
    pub(crate) x_pending: Option<PendingExchange<C>>,

    pub(crate) f: &'a HandlerEntry<DIM, SPACEDIM>,
    pub(crate) native_f: NativeF<'a>,
    pub(crate) overlap_f: Vec<f64>,
    pub(crate) f_pending: Option<PendingExchange<C>>,
}

impl<C: Communicator, const DIM: usize, const SPACEDIM: usize> Transaction<'_, C, DIM, SPACEDIM> {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn state(&self) -> TransactionState {
        self.next_state
    }

    /// Structured-grid data slot read or written by this operation.
    pub fn f_data_idx(&self) -> i32 {
        self.f_data_idx
    }

    /// Quadrature indices of the locally owned cells, as supplied.
    pub fn native_quad_indices(&self) -> &[u8] {
        &self.native_quad_indices
    }

    pub fn native_x(&self) -> &DistributedVector {
        self.native_x
    }

    pub(crate) fn expect(
        &self,
        operation: Operation,
        state: TransactionState,
    ) -> Result<(), MeshOverlapError> {
        if self.operation != operation {
            return Err(MeshOverlapError::TransactionOperation {
                expected: operation.name(),
                found: self.operation.name(),
            });
        }
        if self.next_state != state {
            return Err(MeshOverlapError::TransactionState {
                expected: state.name(),
                found: self.next_state.name(),
            });
        }
        Ok(())
    }
}

/// Everything an integration collaborator sees at the intermediate phase.
///
/// Per-cell arrays (`quad_indices`, handler cell dofs, patch map entries) are
/// indexed by position in [`OverlapMesh::ordered_cells`].
pub struct OverlapData<'t, const DIM: usize, const SPACEDIM: usize> {
    pub overlap_mesh: &'t OverlapMesh<DIM, SPACEDIM>,
    pub patch_map: &'t PatchMap,
    pub hierarchy: &'t dyn PatchHierarchy<SPACEDIM>,
    pub level: usize,
    pub data_idx: i32,
    pub quad_family: &'t QuadratureFamily<DIM>,
    pub quad_indices: &'t [u8],
    pub x_handler: &'t OverlapFieldHandler<DIM, SPACEDIM>,
    /// X in overlap space.
    pub x: &'t [f64],
    pub f_handler: &'t OverlapFieldHandler<DIM, SPACEDIM>,
}
