// ============================================================================
// calculator/groups.rs - Gravifields
// Group positions: resolves every group's absolute centre from its polar
// anchor and its parent's rotation.
// ============================================================================

use super::{build_kernel, dispatch, required, storage, BufferKind, Calculator, CalculatorError, FieldSurface, Stage};
use crate::gpu::GpuContext;
use crate::pipeline::{bg_buffer, bgl_storage_rw, bgl_uniform, ComputeKernel};
use crate::world_buffers::WorldBuffers;

pub struct GroupsCalculator {
    kernel: ComputeKernel,
}

impl GroupsCalculator {
    pub fn new(gpu: &GpuContext) -> Result<Self, CalculatorError> {
        let kernel = build_kernel(
            gpu,
            Stage::GroupPositions,
            include_str!("../shaders/group_positions.wgsl"),
            &[bgl_storage_rw(0), bgl_uniform(1)],
        )?;
        Ok(Self { kernel })
    }
}

impl Calculator for GroupsCalculator {
    fn stage(&self) -> Stage {
        Stage::GroupPositions
    }

    /// A single thread walks the groups in index order, so every parent is
    /// resolved before its children read it.
    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &mut WorldBuffers,
        _surface: Option<&FieldSurface>,
    ) -> Result<(), CalculatorError> {
        let groups = storage(buffers.gpu(), buffers.groups().buffer(), BufferKind::Groups)?;
        let settings = required(buffers.settings_buffer(), BufferKind::Settings)?;

        let bind_group = self
            .kernel
            .bind_group(&buffers.gpu().device, &[bg_buffer(0, groups), bg_buffer(1, settings)]);
        dispatch(encoder, &self.kernel, &bind_group, [1, 1, 1]);
        Ok(())
    }
}
