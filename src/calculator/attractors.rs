// ============================================================================
// calculator/attractors.rs - Gravifields
// Attractor positions: places every attractor around its group's centre.
// ============================================================================

use super::{build_kernel, dispatch, required, storage, BufferKind, Calculator, CalculatorError, FieldSurface, Stage};
use crate::gpu::GpuContext;
use crate::pipeline::{bg_buffer, bgl_storage_ro, bgl_storage_rw, bgl_uniform, ComputeKernel};
use crate::world_buffers::WorldBuffers;

pub struct AttractorsCalculator {
    kernel: ComputeKernel,
}

impl AttractorsCalculator {
    pub fn new(gpu: &GpuContext) -> Result<Self, CalculatorError> {
        let kernel = build_kernel(
            gpu,
            Stage::AttractorPositions,
            include_str!("../shaders/attractor_positions.wgsl"),
            &[bgl_storage_rw(0), bgl_storage_ro(1), bgl_uniform(2)],
        )?;
        Ok(Self { kernel })
    }
}

impl Calculator for AttractorsCalculator {
    fn stage(&self) -> Stage {
        Stage::AttractorPositions
    }

    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &mut WorldBuffers,
        _surface: Option<&FieldSurface>,
    ) -> Result<(), CalculatorError> {
        let attractors = storage(buffers.gpu(), buffers.attractors().buffer(), BufferKind::Attractors)?;
        let groups = storage(buffers.gpu(), buffers.groups().buffer(), BufferKind::Groups)?;
        let settings = required(buffers.settings_buffer(), BufferKind::Settings)?;

        let bind_group = self.kernel.bind_group(
            &buffers.gpu().device,
            &[bg_buffer(0, attractors), bg_buffer(1, groups), bg_buffer(2, settings)],
        );
        // Single thread: positions depend on groups resolved by the previous stage
        dispatch(encoder, &self.kernel, &bind_group, [1, 1, 1]);
        Ok(())
    }
}
