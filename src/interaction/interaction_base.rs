//! The transfer pipeline between a distributed native mesh and a patch level
//! of a structured hierarchy.
//!
//! Construction (and [`InteractionBase::reinit`]) selects the native cells
//! whose boxes touch the ghost-grown local patches, copies them into an
//! [`OverlapMesh`], and prepares the patch map and the per-cell partitioner.
//! Field handlers are registered afterwards; each registration derives an
//! overlap handler, a translation table and a [`Scatter`].
//!
//! Interpolation and spreading run as three-phase transactions so that
//! communication can be overlapped with unrelated work:
//!
//! ```text
//! start ──► intermediate(collaborator) ──► finish
//! ```
//!
//! All methods taking a communicator, and every transaction phase, are
//! collective over the process group of the native mesh.

use std::sync::Arc;

use crate::algs::communicator::Communicator;
use crate::data::vector::DistributedVector;
use crate::dofs::field_handler::FieldHandler;
use crate::dofs::overlap_handler::OverlapFieldHandler;
use crate::dofs::translation::compute_translation;
use crate::geometry::bbox::BoundingBox;
use crate::grid::intersection_predicate::BoxIntersectionPredicate;
use crate::grid::overlap_mesh::OverlapMesh;
use crate::grid::patch_hierarchy::{PatchHierarchy, compute_patch_bboxes};
use crate::grid::patch_map::PatchMap;
use crate::interaction::config::InteractionConfig;
use crate::interaction::quadrature::QuadratureFamily;
use crate::interaction::transaction::{
    NativeF, Operation, OverlapData, Transaction, TransactionState,
};
use crate::mesh_error::MeshOverlapError;
use crate::overlap::cell_partitioner::ActiveCellPartitioner;
use crate::overlap::delta::AddDelta;
use crate::overlap::scatter::Scatter;
use crate::topology::cell::{Dims, SupportedDims};
use crate::topology::native_mesh::NativeMesh;

/// Channel of the X copy in both operations, and of the F accumulation.
const X_CHANNEL: u16 = 0;
/// Second inbound stream of a phase (quadrature indices, or F when spreading).
const SECOND_CHANNEL: u16 = 1;
const SPREAD_QUAD_CHANNEL: u16 = 2;

/// A registered native field handler and everything derived from it.
#[derive(Debug)]
pub struct HandlerEntry<const DIM: usize, const SPACEDIM: usize> {
    native: Arc<FieldHandler<DIM, SPACEDIM>>,
    overlap: OverlapFieldHandler<DIM, SPACEDIM>,
    translation: Vec<usize>,
    scatter: Scatter,
}

impl<const DIM: usize, const SPACEDIM: usize> HandlerEntry<DIM, SPACEDIM> {
    pub fn native(&self) -> &Arc<FieldHandler<DIM, SPACEDIM>> {
        &self.native
    }

    pub fn overlap(&self) -> &OverlapFieldHandler<DIM, SPACEDIM> {
        &self.overlap
    }

    /// `translation()[overlap dof] = native dof`.
    pub fn translation(&self) -> &[usize] {
        &self.translation
    }

    pub fn scatter(&self) -> &Scatter {
        &self.scatter
    }
}

// state rebuilt by `new` and `reinit`
struct Prepared<const DIM: usize, const SPACEDIM: usize> {
    predicate: BoxIntersectionPredicate<SPACEDIM>,
    overlap: OverlapMesh<DIM, SPACEDIM>,
    patch_map: PatchMap,
    cell_partitioner: ActiveCellPartitioner,
}

pub struct InteractionBase<C: Communicator, const DIM: usize, const SPACEDIM: usize> {
    /// Private duplicate of the caller's communicator.
    comm: C,
    config: InteractionConfig,
    native_mesh: Arc<NativeMesh<DIM, SPACEDIM>>,
    hierarchy: Arc<dyn PatchHierarchy<SPACEDIM>>,
    level: usize,
    predicate: BoxIntersectionPredicate<SPACEDIM>,
    overlap: OverlapMesh<DIM, SPACEDIM>,
    patch_map: PatchMap,
    cell_partitioner: ActiveCellPartitioner,
    handlers: Vec<HandlerEntry<DIM, SPACEDIM>>,
}

impl<C, const DIM: usize, const SPACEDIM: usize> InteractionBase<C, DIM, SPACEDIM>
where
    C: Communicator,
    Dims<DIM, SPACEDIM>: SupportedDims,
{
    /// Collective. `global_bboxes[a]` is the box of native active cell `a`,
    /// identical on every rank.
    pub fn new(
        comm: &C,
        native_mesh: Arc<NativeMesh<DIM, SPACEDIM>>,
        global_bboxes: Vec<BoundingBox<SPACEDIM, f32>>,
        hierarchy: Arc<dyn PatchHierarchy<SPACEDIM>>,
        level: usize,
        config: InteractionConfig,
    ) -> Result<Self, MeshOverlapError> {
        Self::validate(comm, &native_mesh, &global_bboxes, hierarchy.as_ref(), level)?;
        let dedicated = comm.duplicate();
        let prepared = match Self::prepare(
            &dedicated,
            &native_mesh,
            global_bboxes,
            hierarchy.as_ref(),
            level,
            &config,
        ) {
            Ok(p) => p,
            Err(e) => {
                release(dedicated);
                return Err(e);
            }
        };
        log::info!(
            "rank {}: interaction on level {level} with {} overlap cells over {} patches",
            dedicated.rank(),
            prepared.overlap.n_active_cells(),
            prepared.patch_map.n_patches()
        );
        Ok(Self {
            comm: dedicated,
            config,
            native_mesh,
            hierarchy,
            level,
            predicate: prepared.predicate,
            overlap: prepared.overlap,
            patch_map: prepared.patch_map,
            cell_partitioner: prepared.cell_partitioner,
            handlers: Vec::new(),
        })
    }

    /// Collective. Rebuild everything for a new mesh state, hierarchy or
    /// level. The dedicated communicator is kept when `comm` spans the same
    /// group. Registered field handlers are forgotten and must be added
    /// again.
    pub fn reinit(
        &mut self,
        comm: &C,
        native_mesh: Arc<NativeMesh<DIM, SPACEDIM>>,
        global_bboxes: Vec<BoundingBox<SPACEDIM, f32>>,
        hierarchy: Arc<dyn PatchHierarchy<SPACEDIM>>,
        level: usize,
    ) -> Result<(), MeshOverlapError> {
        Self::validate(comm, &native_mesh, &global_bboxes, hierarchy.as_ref(), level)?;
        if !self.comm.is_congruent(comm.group()) {
            log::debug!("rank {}: process group changed, duplicating", comm.rank());
            let stale = std::mem::replace(&mut self.comm, comm.duplicate());
            release(stale);
        }
        let prepared = Self::prepare(
            &self.comm,
            &native_mesh,
            global_bboxes,
            hierarchy.as_ref(),
            level,
            &self.config,
        )?;
        self.native_mesh = native_mesh;
        self.hierarchy = hierarchy;
        self.level = level;
        self.predicate = prepared.predicate;
        self.overlap = prepared.overlap;
        self.patch_map = prepared.patch_map;
        self.cell_partitioner = prepared.cell_partitioner;
        self.handlers.clear();
        Ok(())
    }

    fn validate(
        comm: &C,
        native_mesh: &NativeMesh<DIM, SPACEDIM>,
        global_bboxes: &[BoundingBox<SPACEDIM, f32>],
        hierarchy: &dyn PatchHierarchy<SPACEDIM>,
        level: usize,
    ) -> Result<(), MeshOverlapError> {
        if !comm.is_congruent(native_mesh.group()) {
            return Err(MeshOverlapError::CommunicatorMismatch(
                "communicator and native mesh span different process groups",
            ));
        }
        if !comm.is_congruent(hierarchy.group()) {
            return Err(MeshOverlapError::CommunicatorMismatch(
                "communicator and patch hierarchy span different process groups",
            ));
        }
        if level >= hierarchy.n_levels() {
            return Err(MeshOverlapError::InvalidLevel {
                level,
                n_levels: hierarchy.n_levels(),
            });
        }
        if global_bboxes.len() != native_mesh.n_active_cells() {
            return Err(MeshOverlapError::BoundingBoxCount {
                expected: native_mesh.n_active_cells(),
                found: global_bboxes.len(),
            });
        }
        Ok(())
    }

    fn prepare(
        comm: &C,
        native_mesh: &NativeMesh<DIM, SPACEDIM>,
        global_bboxes: Vec<BoundingBox<SPACEDIM, f32>>,
        hierarchy: &dyn PatchHierarchy<SPACEDIM>,
        level: usize,
        config: &InteractionConfig,
    ) -> Result<Prepared<DIM, SPACEDIM>, MeshOverlapError> {
        let patches = hierarchy.local_patches(level);
        let patch_bboxes = compute_patch_bboxes(&patches, config.ghost_cell_width);
        let predicate = BoxIntersectionPredicate::new(native_mesh, global_bboxes, patch_bboxes)?;
        let overlap = OverlapMesh::new(native_mesh, &predicate, config.correspondence_tolerance)?;
        let patch_map = PatchMap::new(&overlap, predicate.cell_bboxes(), predicate.region())?;
        let cell_partitioner = ActiveCellPartitioner::new(comm, native_mesh, &overlap)?;
        Ok(Prepared {
            predicate,
            overlap,
            patch_map,
            cell_partitioner,
        })
    }

    /// Collective. Register `handler`; registering the same handler twice is
    /// a no-op.
    pub fn add_field_handler(
        &mut self,
        handler: Arc<FieldHandler<DIM, SPACEDIM>>,
    ) -> Result<(), MeshOverlapError> {
        if self.handlers.iter().any(|e| Arc::ptr_eq(&e.native, &handler)) {
            return Ok(());
        }
        if handler.mesh_id() != self.native_mesh.id() {
            return Err(MeshOverlapError::ForeignFieldHandler);
        }
        let overlap = OverlapFieldHandler::new(&self.overlap, *handler.fe())?;
        let translation =
            compute_translation(&self.native_mesh, &self.overlap, &handler, &overlap)?;
        let scatter = Scatter::new(&self.comm, &translation, handler.partitioning())?;
        log::debug!(
            "rank {}: registered field handler with {} native / {} overlap dofs",
            self.comm.rank(),
            handler.n_dofs(),
            overlap.n_dofs()
        );
        self.handlers.push(HandlerEntry {
            native: handler,
            overlap,
            translation,
            scatter,
        });
        Ok(())
    }

    fn entry(
        &self,
        handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
    ) -> Result<&HandlerEntry<DIM, SPACEDIM>, MeshOverlapError> {
        self.handlers
            .iter()
            .find(|e| Arc::ptr_eq(&e.native, handler))
            .ok_or(MeshOverlapError::UnregisteredFieldHandler)
    }

    pub fn get_overlap_field_handler(
        &self,
        handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
    ) -> Result<&OverlapFieldHandler<DIM, SPACEDIM>, MeshOverlapError> {
        self.entry(handler).map(HandlerEntry::overlap)
    }

    pub fn get_scatter(
        &self,
        handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
    ) -> Result<&Scatter, MeshOverlapError> {
        self.entry(handler).map(HandlerEntry::scatter)
    }

    pub fn get_translation(
        &self,
        handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
    ) -> Result<&[usize], MeshOverlapError> {
        self.entry(handler).map(HandlerEntry::translation)
    }

    pub fn n_field_handlers(&self) -> usize {
        self.handlers.len()
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn native_mesh(&self) -> &Arc<NativeMesh<DIM, SPACEDIM>> {
        &self.native_mesh
    }

    pub fn hierarchy(&self) -> &Arc<dyn PatchHierarchy<SPACEDIM>> {
        &self.hierarchy
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn overlap_mesh(&self) -> &OverlapMesh<DIM, SPACEDIM> {
        &self.overlap
    }

    pub fn patch_map(&self) -> &PatchMap {
        &self.patch_map
    }

    pub fn cell_partitioner(&self) -> &ActiveCellPartitioner {
        &self.cell_partitioner
    }

    /// Per-active-cell boxes supplied at construction.
    pub fn global_bboxes(&self) -> &[BoundingBox<SPACEDIM, f32>] {
        self.predicate.cell_bboxes()
    }

    /// Local patch boxes after ghost growth.
    pub fn patch_bboxes(&self) -> &[BoundingBox<SPACEDIM>] {
        self.predicate.region()
    }

    fn check_vector(
        &self,
        entry: &HandlerEntry<DIM, SPACEDIM>,
        v: &DistributedVector,
    ) -> Result<(), MeshOverlapError> {
        if !self.comm.is_congruent(v.group()) {
            return Err(MeshOverlapError::CommunicatorMismatch(
                "vector and native mesh span different process groups",
            ));
        }
        if v.partitioning() != entry.native.partitioning() {
            return Err(MeshOverlapError::VectorLengthMismatch {
                expected: entry.native.n_dofs(),
                found: v.n_global(),
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn begin<'a>(
        &'a self,
        operation: Operation,
        f_data_idx: i32,
        quad_family: &'a QuadratureFamily<DIM>,
        quad_indices: &[u8],
        x_handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
        x: &'a DistributedVector,
        f_handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
        native_f: NativeF<'a>,
    ) -> Result<Transaction<'a, C, DIM, SPACEDIM>, MeshOverlapError> {
        if !self.hierarchy.is_allocated(self.level, f_data_idx) {
            return Err(MeshOverlapError::UnallocatedDataIndex {
                data_idx: f_data_idx,
                level: self.level,
            });
        }
        if quad_indices.len() != self.cell_partitioner.n_owned() {
            return Err(MeshOverlapError::QuadratureIndexCount {
                expected: self.cell_partitioner.n_owned(),
                found: quad_indices.len(),
            });
        }
        quad_family.validate(quad_indices)?;
        let x_entry = self.entry(x_handler)?;
        let f_entry = self.entry(f_handler)?;
        self.check_vector(x_entry, x)?;
        match &native_f {
            NativeF::Input(f) => self.check_vector(f_entry, f)?,
            NativeF::Output(f) => self.check_vector(f_entry, f)?,
        }

        let mut t = Transaction {
            operation,
            next_state: TransactionState::Intermediate,
            f_data_idx,
            quad_family,
            native_quad_indices: quad_indices.to_vec(),
            overlap_quad_indices: vec![0; self.cell_partitioner.n_ghosted()],
            quad_work: vec![0; self.cell_partitioner.temporary_storage_size()],
            quad_requests: Vec::with_capacity(self.cell_partitioner.n_targets()),
            x: x_entry,
            native_x: x,
            overlap_x: vec![0.0; x_entry.overlap.n_dofs()],
            x_pending: None,
            f: f_entry,
            native_f,
            overlap_f: Vec::new(),
            f_pending: None,
        };
        t.x_pending = Some(x_entry.scatter.global_to_overlap_start(
            &self.comm,
            X_CHANNEL,
            x,
            &mut t.overlap_x,
        )?);
        let quad_channel = match operation {
            Operation::Interpolation => SECOND_CHANNEL,
            Operation::Spreading => {
                if let NativeF::Input(f) = t.native_f {
                    t.overlap_f = vec![0.0; f_entry.overlap.n_dofs()];
                    t.f_pending = Some(f_entry.scatter.global_to_overlap_start(
                        &self.comm,
                        SECOND_CHANNEL,
                        f,
                        &mut t.overlap_f,
                    )?);
                }
                SPREAD_QUAD_CHANNEL
            }
        };
        self.cell_partitioner.export_to_ghosted_array_start(
            &self.comm,
            quad_channel,
            &t.native_quad_indices,
            &mut t.quad_work,
            &mut t.quad_requests,
        )?;
        log::trace!(
            "rank {}: {} started on data index {f_data_idx}",
            self.comm.rank(),
            operation.name()
        );
        Ok(t)
    }

    // complete every exchange posted by `begin`
    fn finish_inbound(
        &self,
        t: &mut Transaction<'_, C, DIM, SPACEDIM>,
    ) -> Result<(), MeshOverlapError> {
        if let Some(pending) = t.x_pending.take() {
            t.x.scatter.global_to_overlap_finish(pending, &mut t.overlap_x)?;
        }
        if let Some(pending) = t.f_pending.take() {
            t.f.scatter.global_to_overlap_finish(pending, &mut t.overlap_f)?;
        }
        self.cell_partitioner.export_to_ghosted_array_finish(
            &t.quad_work,
            &mut t.overlap_quad_indices,
            &mut t.quad_requests,
        )
    }

    fn overlap_data<'t>(
        &'t self,
        t: &'t Transaction<'_, C, DIM, SPACEDIM>,
    ) -> OverlapData<'t, DIM, SPACEDIM> {
        OverlapData {
            overlap_mesh: &self.overlap,
            patch_map: &self.patch_map,
            hierarchy: self.hierarchy.as_ref(),
            level: self.level,
            data_idx: t.f_data_idx,
            quad_family: t.quad_family,
            quad_indices: &t.overlap_quad_indices,
            x_handler: &t.x.overlap,
            x: &t.overlap_x,
            f_handler: &t.f.overlap,
        }
    }

    /// Begin interpolating structured data slot `f_data_idx` onto the right
    /// hand side `f_rhs` of an L2 projection. `quad_indices` holds one entry
    /// per locally owned active cell in ascending active order.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_projection_rhs_start<'a>(
        &'a self,
        f_data_idx: i32,
        quad_family: &'a QuadratureFamily<DIM>,
        quad_indices: &[u8],
        x_handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
        x: &'a DistributedVector,
        f_handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
        f_rhs: &'a mut DistributedVector,
    ) -> Result<Transaction<'a, C, DIM, SPACEDIM>, MeshOverlapError> {
        self.begin(
            Operation::Interpolation,
            f_data_idx,
            quad_family,
            quad_indices,
            x_handler,
            x,
            f_handler,
            NativeF::Output(f_rhs),
        )
    }

    /// Complete the inbound copies, run `integrator` on the overlap and start
    /// accumulating its result into the native right hand side.
    ///
    /// The integrator receives a zeroed overlap-space right hand side.
    pub fn compute_projection_rhs_intermediate<'a, I>(
        &'a self,
        mut t: Transaction<'a, C, DIM, SPACEDIM>,
        integrator: I,
    ) -> Result<Transaction<'a, C, DIM, SPACEDIM>, MeshOverlapError>
    where
        I: FnOnce(&OverlapData<'_, DIM, SPACEDIM>, &mut [f64]) -> Result<(), MeshOverlapError>,
    {
        t.expect(Operation::Interpolation, TransactionState::Intermediate)?;
        self.finish_inbound(&mut t)?;

        let mut rhs = vec![0.0; t.f.overlap.n_dofs()];
        integrator(&self.overlap_data(&t), &mut rhs)?;
        t.overlap_f = rhs;

        let NativeF::Output(native_f) = &mut t.native_f else {
            return Err(MeshOverlapError::InternalError(
                "interpolation transaction without an output vector".into(),
            ));
        };
        let pending = t.f.scatter.overlap_to_global_start::<AddDelta, C>(
            &self.comm,
            X_CHANNEL,
            &t.overlap_f,
            native_f,
        )?;
        t.f_pending = Some(pending);
        t.next_state = TransactionState::Finish;
        Ok(t)
    }

    /// Wait for the accumulation into the native right hand side.
    pub fn compute_projection_rhs_finish(
        &self,
        mut t: Transaction<'_, C, DIM, SPACEDIM>,
    ) -> Result<(), MeshOverlapError> {
        t.expect(Operation::Interpolation, TransactionState::Finish)?;
        let pending = t.f_pending.take().ok_or_else(|| {
            MeshOverlapError::InternalError("no accumulation in flight".into())
        })?;
        let NativeF::Output(native_f) = &mut t.native_f else {
            return Err(MeshOverlapError::InternalError(
                "interpolation transaction without an output vector".into(),
            ));
        };
        t.f.scatter
            .overlap_to_global_finish::<AddDelta, C>(pending, native_f)?;
        t.next_state = TransactionState::Done;
        log::trace!("rank {}: interpolation done", self.comm.rank());
        Ok(())
    }

    /// Begin spreading the native field `f` onto structured data slot
    /// `f_data_idx`.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_spread_start<'a>(
        &'a self,
        f_data_idx: i32,
        quad_family: &'a QuadratureFamily<DIM>,
        quad_indices: &[u8],
        x_handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
        x: &'a DistributedVector,
        f_handler: &Arc<FieldHandler<DIM, SPACEDIM>>,
        f: &'a DistributedVector,
    ) -> Result<Transaction<'a, C, DIM, SPACEDIM>, MeshOverlapError> {
        self.begin(
            Operation::Spreading,
            f_data_idx,
            quad_family,
            quad_indices,
            x_handler,
            x,
            f_handler,
            NativeF::Input(f),
        )
    }

    /// Complete the inbound copies and run `spreader`, which writes into the
    /// hierarchy.
    pub fn compute_spread_intermediate<'a, S>(
        &'a self,
        mut t: Transaction<'a, C, DIM, SPACEDIM>,
        spreader: S,
    ) -> Result<Transaction<'a, C, DIM, SPACEDIM>, MeshOverlapError>
    where
        S: FnOnce(&OverlapData<'_, DIM, SPACEDIM>, &[f64]) -> Result<(), MeshOverlapError>,
    {
        t.expect(Operation::Spreading, TransactionState::Intermediate)?;
        self.finish_inbound(&mut t)?;
        spreader(&self.overlap_data(&t), &t.overlap_f)?;
        t.next_state = TransactionState::Finish;
        Ok(t)
    }

    pub fn compute_spread_finish(
        &self,
        mut t: Transaction<'_, C, DIM, SPACEDIM>,
    ) -> Result<(), MeshOverlapError> {
        t.expect(Operation::Spreading, TransactionState::Finish)?;
        t.next_state = TransactionState::Done;
        log::trace!("rank {}: spreading done", self.comm.rank());
        Ok(())
    }
}

impl<C: Communicator, const DIM: usize, const SPACEDIM: usize> Drop
    for InteractionBase<C, DIM, SPACEDIM>
{
    fn drop(&mut self) {
        if let Err(e) = self.comm.free() {
            log::warn!("rank {}: {e}", self.comm.rank());
        }
    }
}

fn release<C: Communicator>(mut comm: C) {
    if let Err(e) = comm.free() {
        log::warn!("rank {}: {e}", comm.rank());
    }
}
