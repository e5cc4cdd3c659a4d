// ============================================================================
// calculator/aggregate.rs - Gravifields
// AggregateCalculator: runs the compute stages in dependency order once per
// frame and reports what happened to each of them.
// ============================================================================

use super::{
    AttractorsCalculator, BufferKind, Calculator, CalculatorError, FieldSurface, FieldsCalculator,
    GroupsCalculator, ParticlesCalculator, Stage,
};
use crate::gpu::GpuContext;
use crate::model::Viewport;
use crate::world::World;
use crate::world_buffers::WorldBuffers;

// ======================== Reports ========================

#[derive(Clone, Debug, PartialEq)]
pub enum StageStatus {
    Encoded,
    /// A buffer the stage needs is absent this frame.
    Skipped(BufferKind),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameError {
    DeviceLost,
    OutOfMemory(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::DeviceLost => write!(f, "GPU device lost"),
            FrameError::OutOfMemory(message) => write!(f, "out of GPU memory: {message}"),
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameStatus {
    Submitted,
    /// No render size was known; nothing was reconciled or dispatched.
    NoRenderSize,
    Dropped(FrameError),
}

/// Outcome of one `compute_frame` call.
#[derive(Clone, Debug)]
pub struct FrameReport {
    /// Frame index the stages ran with.
    pub frame: u32,
    pub status: FrameStatus,
    pub buffers_recreated: bool,
    pub stages: Vec<(Stage, StageStatus)>,
}

impl FrameReport {
    fn idle(frame: u32, status: FrameStatus) -> Self {
        Self {
            frame,
            status,
            buffers_recreated: false,
            stages: Vec::new(),
        }
    }

    pub fn submitted(&self) -> bool {
        self.status == FrameStatus::Submitted
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, status)| status)
    }

    pub fn encoded_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|(_, status)| *status == StageStatus::Encoded)
            .count()
    }
}

// ======================== AggregateCalculator ========================

/// Owns the stage kernels. Stages are built on first use; the field stage is
/// dropped whenever a frame arrives without a surface.
#[derive(Default)]
pub struct AggregateCalculator {
    groups: Option<GroupsCalculator>,
    attractors: Option<AttractorsCalculator>,
    particles: Option<ParticlesCalculator>,
    fields: Option<FieldsCalculator>,
}

impl AggregateCalculator {
    pub fn has_field_stage(&self) -> bool {
        self.fields.is_some()
    }

    /// Reconciles `buffers` with `world`, encodes every available stage into
    /// its own command buffer and submits the ones that encoded cleanly, in
    /// order, without waiting for completion.
    ///
    /// The surface size wins over `render_size` when both are given.
    pub fn compute_frame(
        &mut self,
        buffers: &mut WorldBuffers,
        world: &mut World,
        surface: Option<&FieldSurface>,
        render_size: Option<Viewport>,
    ) -> FrameReport {
        let frame = buffers.frame_index();

        let Some(viewport) = surface
            .map(FieldSurface::viewport)
            .or(render_size)
            .filter(|v| !v.is_empty())
        else {
            log::debug!("Frame {}: no render size, skipping", frame);
            return FrameReport::idle(frame, FrameStatus::NoRenderSize);
        };

        if buffers.gpu().is_lost() {
            return FrameReport::idle(frame, FrameStatus::Dropped(FrameError::DeviceLost));
        }

        self.ensure_stages(buffers.gpu(), surface.is_some());

        // Reconcile before anything is dispatched
        buffers.gpu().device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let reconciled = buffers.reconcile_flags(world);
        let oom = pollster::block_on(buffers.gpu().device.pop_error_scope());
        if let Some(error) = oom {
            log::error!("Frame {}: buffer reallocation failed: {}", frame, error);
            world.mark_dirty(reconciled.consumed);
            return FrameReport::idle(frame, FrameStatus::Dropped(FrameError::OutOfMemory(error.to_string())));
        }
        buffers.set_viewport(viewport);

        let mut stages = Vec::with_capacity(Stage::ORDER.len());
        let mut command_buffers = Vec::with_capacity(Stage::ORDER.len());
        for stage in Stage::ORDER {
            let status = match self.calculator(stage) {
                Some(calculator) => match encode_stage(calculator, buffers, surface) {
                    Ok(command_buffer) => {
                        command_buffers.push(command_buffer);
                        StageStatus::Encoded
                    }
                    Err(CalculatorError::RequiredBufferEmpty(kind)) => {
                        log::debug!(
                            "Frame {}: {} skipped, {:?} buffer empty",
                            frame,
                            calculator.stage().name(),
                            kind
                        );
                        StageStatus::Skipped(kind)
                    }
                    Err(e) => {
                        log::warn!("Frame {}: {} failed: {}", frame, calculator.stage().name(), e);
                        StageStatus::Failed(e.to_string())
                    }
                },
                None if stage == Stage::FieldTexture && surface.is_none() => {
                    StageStatus::Skipped(BufferKind::Surface)
                }
                None => StageStatus::Failed(format!("{} pipeline unavailable", stage.name())),
            };
            stages.push((stage, status));
        }

        buffers.submit(command_buffers);
        world.clear_update_flags();
        buffers.advance_frame();

        FrameReport {
            frame,
            status: FrameStatus::Submitted,
            buffers_recreated: reconciled.recreated,
            stages,
        }
    }

    fn calculator(&self, stage: Stage) -> Option<&dyn Calculator> {
        match stage {
            Stage::GroupPositions => self.groups.as_ref().map(|c| c as &dyn Calculator),
            Stage::AttractorPositions => self.attractors.as_ref().map(|c| c as &dyn Calculator),
            Stage::ParticleForces => self.particles.as_ref().map(|c| c as &dyn Calculator),
            Stage::FieldTexture => self.fields.as_ref().map(|c| c as &dyn Calculator),
        }
    }

    /// Builds missing kernels. A kernel that fails to build is retried next frame.
    fn ensure_stages(&mut self, gpu: &GpuContext, with_surface: bool) {
        if self.groups.is_none() {
            self.groups = log_failure(GroupsCalculator::new(gpu));
        }
        if self.attractors.is_none() {
            self.attractors = log_failure(AttractorsCalculator::new(gpu));
        }
        if self.particles.is_none() {
            self.particles = log_failure(ParticlesCalculator::new(gpu));
        }

        if !with_surface {
            if self.fields.take().is_some() {
                log::debug!("Field stage disposed: no output surface");
            }
        } else if self.fields.is_none() {
            self.fields = log_failure(FieldsCalculator::new(gpu));
        }
    }
}

/// Encodes one stage into a command buffer of its own. A validation error
/// raised while recording fails this stage only.
fn encode_stage(
    calculator: &dyn Calculator,
    buffers: &mut WorldBuffers,
    surface: Option<&FieldSurface>,
) -> Result<wgpu::CommandBuffer, CalculatorError> {
    let stage = calculator.stage();
    buffers.gpu().device.push_error_scope(wgpu::ErrorFilter::Validation);

    let mut encoder = buffers
        .gpu()
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(stage.name()),
        });
    let encoded = calculator.encode(&mut encoder, buffers, surface);
    let command_buffer = encoder.finish();

    let error = pollster::block_on(buffers.gpu().device.pop_error_scope());
    encoded?;
    match error {
        None => Ok(command_buffer),
        Some(e) => Err(CalculatorError::Validation {
            stage,
            message: e.to_string(),
        }),
    }
}

fn log_failure<T>(result: Result<T, CalculatorError>) -> Option<T> {
    result.map_err(|e| log::error!("{}", e)).ok()
}
