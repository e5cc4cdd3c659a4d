// ============================================================================
// calculator/particles.rs - Gravifields
// Particle forces: gravity from every attractor, spring back to the anchor,
// optional grid lock.
// ============================================================================

use super::{
    build_kernel, check_dispatch, dispatch, particle_partition, required, storage, BufferKind, Calculator,
    CalculatorError, FieldSurface, Stage,
};
use crate::gpu::GpuContext;
use crate::pipeline::{bg_buffer, bgl_storage_ro, bgl_storage_rw, bgl_uniform, ComputeKernel};
use crate::world_buffers::WorldBuffers;

pub struct ParticlesCalculator {
    kernel: ComputeKernel,
}

impl ParticlesCalculator {
    pub fn new(gpu: &GpuContext) -> Result<Self, CalculatorError> {
        let kernel = build_kernel(
            gpu,
            Stage::ParticleForces,
            include_str!("../shaders/particle_forces.wgsl"),
            &[bgl_storage_rw(0), bgl_storage_ro(1), bgl_uniform(2)],
        )?;
        Ok(Self { kernel })
    }
}

impl Calculator for ParticlesCalculator {
    fn stage(&self) -> Stage {
        Stage::ParticleForces
    }

    /// Dispatches `particles_per_group × number_of_groups` workgroups. The last
    /// row may be under-full; the kernel bounds-checks its flat index.
    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &mut WorldBuffers,
        _surface: Option<&FieldSurface>,
    ) -> Result<(), CalculatorError> {
        let count = buffers.number_of_particles() as u32;
        let (per_group, groups) = particle_partition(count, buffers.particle_threads_per_group())
            .ok_or(CalculatorError::RequiredBufferEmpty(BufferKind::Particles))?;
        check_dispatch(buffers.gpu(), Stage::ParticleForces, [per_group, groups, 1])?;

        let bind_group = {
            let particles = storage(buffers.gpu(), buffers.particles().buffer(), BufferKind::Particles)?;
            let attractors = storage(buffers.gpu(), buffers.attractors().buffer(), BufferKind::Attractors)?;
            let settings = required(buffers.settings_buffer(), BufferKind::Settings)?;
            self.kernel.bind_group(
                &buffers.gpu().device,
                &[bg_buffer(0, particles), bg_buffer(1, attractors), bg_buffer(2, settings)],
            )
        };

        // The kernel rebuilds its flat index from this value
        buffers.set_particles_per_group(per_group);

        dispatch(encoder, &self.kernel, &bind_group, [per_group, groups, 1]);
        log::trace!("particle_forces: {} particles, {}x{} groups", count, per_group, groups);
        Ok(())
    }
}
