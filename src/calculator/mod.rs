// ============================================================================
// calculator/mod.rs - Gravifields
// Compute stages: one kernel invocation each, with its bindings, its
// thread-group sizing rule and its failure modes.
// ============================================================================

mod aggregate;
mod attractors;
mod fields;
mod groups;
mod particles;

pub use aggregate::{AggregateCalculator, FrameError, FrameReport, FrameStatus, StageStatus};
pub use attractors::AttractorsCalculator;
pub use fields::{FieldSurface, FieldsCalculator};
pub use groups::GroupsCalculator;
pub use particles::ParticlesCalculator;

use crate::gpu::GpuContext;
use crate::pipeline::ComputeKernel;
use crate::world_buffers::WorldBuffers;

/// Tile edge of the field-texture dispatch.
pub const FIELD_TILE: u32 = 16;

const COMMON_WGSL: &str = include_str!("../shaders/common.wgsl");

// ======================== Stages ========================

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    GroupPositions,
    AttractorPositions,
    ParticleForces,
    FieldTexture,
}

impl Stage {
    /// Encoding order within a frame.
    pub const ORDER: [Stage; 4] = [
        Stage::GroupPositions,
        Stage::AttractorPositions,
        Stage::ParticleForces,
        Stage::FieldTexture,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::GroupPositions => "group_positions",
            Stage::AttractorPositions => "attractor_positions",
            Stage::ParticleForces => "particle_forces",
            Stage::FieldTexture => "field_texture",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Settings,
    Groups,
    Attractors,
    Particles,
    Surface,
}

// ======================== Errors ========================

#[derive(Debug, Clone, PartialEq)]
pub enum CalculatorError {
    /// A buffer the stage binds is absent (empty collection or no surface).
    RequiredBufferEmpty(BufferKind),
    /// The kernel could not be built.
    PipelineCreation { stage: Stage, message: String },
    /// The partition exceeds the device's per-dimension workgroup limit.
    DispatchTooLarge { stage: Stage, groups: [u32; 3], limit: u32 },
    /// A storage buffer is larger than the device can bind.
    BindingTooLarge { kind: BufferKind, size: u64, limit: u64 },
    /// The device rejected the stage's commands.
    Validation { stage: Stage, message: String },
}

impl std::fmt::Display for CalculatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalculatorError::RequiredBufferEmpty(kind) => write!(f, "required buffer empty: {kind:?}"),
            CalculatorError::PipelineCreation { stage, message } => {
                write!(f, "failed to build {} pipeline: {}", stage.name(), message)
            }
            CalculatorError::DispatchTooLarge { stage, groups, limit } => write!(
                f,
                "{} dispatch {:?} exceeds per-dimension limit {}",
                stage.name(),
                groups,
                limit
            ),
            CalculatorError::BindingTooLarge { kind, size, limit } => {
                write!(f, "{kind:?} buffer of {size} bytes exceeds storage binding limit {limit}")
            }
            CalculatorError::Validation { stage, message } => {
                write!(f, "{} commands rejected: {}", stage.name(), message)
            }
        }
    }
}

impl std::error::Error for CalculatorError {}

// ======================== Calculator ========================

/// One compute stage of the frame pipeline.
pub trait Calculator {
    fn stage(&self) -> Stage;

    /// Records the stage's pass into `encoder`, which holds nothing else.
    /// Fails before touching the encoder when a required buffer is missing
    /// or cannot be bound.
    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &mut WorldBuffers,
        surface: Option<&FieldSurface>,
    ) -> Result<(), CalculatorError>;
}

/// Builds a stage kernel, turning validation errors into a stage failure.
fn build_kernel(
    gpu: &GpuContext,
    stage: Stage,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> Result<ComputeKernel, CalculatorError> {
    let source = format!("{COMMON_WGSL}\n{source}");
    let (kernel, error) = gpu.scoped(wgpu::ErrorFilter::Validation, || {
        ComputeKernel::new(&gpu.device, stage.name(), &source, entries)
    });
    match error {
        None => Ok(kernel),
        Some(e) => Err(CalculatorError::PipelineCreation {
            stage,
            message: e.to_string(),
        }),
    }
}

fn required<'a>(buffer: Option<&'a wgpu::Buffer>, kind: BufferKind) -> Result<&'a wgpu::Buffer, CalculatorError> {
    buffer.ok_or(CalculatorError::RequiredBufferEmpty(kind))
}

/// Like [`required`], also rejecting buffers over the storage binding limit.
fn storage<'a>(
    gpu: &GpuContext,
    buffer: Option<&'a wgpu::Buffer>,
    kind: BufferKind,
) -> Result<&'a wgpu::Buffer, CalculatorError> {
    let buffer = required(buffer, kind)?;
    let limit = u64::from(gpu.device.limits().max_storage_buffer_binding_size);
    if buffer.size() > limit {
        return Err(CalculatorError::BindingTooLarge {
            kind,
            size: buffer.size(),
            limit,
        });
    }
    Ok(buffer)
}

fn check_dispatch(gpu: &GpuContext, stage: Stage, groups: [u32; 3]) -> Result<(), CalculatorError> {
    let limit = gpu.device.limits().max_compute_workgroups_per_dimension;
    if groups.iter().any(|&g| g > limit) {
        return Err(CalculatorError::DispatchTooLarge { stage, groups, limit });
    }
    Ok(())
}

fn dispatch(encoder: &mut wgpu::CommandEncoder, kernel: &ComputeKernel, bind_group: &wgpu::BindGroup, groups: [u32; 3]) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(kernel.name),
        timestamp_writes: None,
    });
    pass.set_pipeline(&kernel.pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
}

// ======================== Sizing ========================

/// Particle partition for `count` particles and thread width `threads`:
/// `(particles_per_group, number_of_groups)`, or `None` when there is nothing to do.
pub fn particle_partition(count: u32, threads: u32) -> Option<(u32, u32)> {
    if count == 0 {
        return None;
    }
    let per_group = count.div_ceil(threads.max(1));
    let groups = count.div_ceil(per_group);
    Some((per_group, groups))
}

/// Number of `tile`×`tile` workgroups covering a `width`×`height` surface.
pub fn tile_partition(width: u32, height: u32, tile: u32) -> (u32, u32) {
    (width.div_ceil(tile), height.div_ceil(tile))
}
