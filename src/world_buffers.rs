// ============================================================================
// world_buffers.rs - Gravifields
// WorldBuffers: GPU mirror of the World. Recreates only the regions flagged
// dirty, keeps the settings block in sync with frame/viewport metadata, and
// owns the aggregate calculator that runs the compute stages.
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use crate::calculator::{AggregateCalculator, FieldSurface, FrameReport};
use crate::gpu::GpuContext;
use crate::model::{Environment, UpdateFlag, Viewport};
use crate::readback::{ReadbackError, SnapshotReadback, WorldSnapshot};
use crate::world::World;

// ======================== Buffer Slot ========================

/// One reallocatable storage region. `None` stands for an empty collection.
#[derive(Default)]
pub struct BufferSlot {
    buffer: Option<wgpu::Buffer>,
    count: usize,
    generation: u64,
}

impl BufferSlot {
    fn replace<T: Pod>(&mut self, device: &wgpu::Device, label: &str, items: &[T]) {
        self.buffer = if items.is_empty() {
            None
        } else {
            Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(items),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            }))
        };
        self.count = items.len();
        self.generation += 1;
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Bumped every time the region is reallocated.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Reallocation counters for every region, used to check buffer identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferGenerations {
    pub settings: u64,
    pub groups: u64,
    pub attractors: u64,
    pub particles: u64,
}

/// Outcome of one reconciliation pass.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Reconciliation {
    /// Flags taken from the world.
    pub consumed: UpdateFlag,
    /// Whether any buffer, the settings block included, was created.
    pub recreated: bool,
}

// ======================== Frame Tracking ========================

/// Counts submitted and GPU-completed frames.
#[derive(Default)]
struct FrameTracker {
    submitted: u64,
    completed: Arc<AtomicU64>,
}

impl FrameTracker {
    fn submit(&mut self, queue: &wgpu::Queue, command_buffers: Vec<wgpu::CommandBuffer>) {
        queue.submit(command_buffers);
        self.submitted += 1;

        let completed = self.completed.clone();
        queue.on_submitted_work_done(move || {
            completed.fetch_add(1, Ordering::Release);
        });
    }

    fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

// ======================== WorldBuffers ========================

pub struct WorldBuffers {
    gpu: GpuContext,

    settings_buffer: Option<wgpu::Buffer>,
    settings_generation: u64,
    groups: BufferSlot,
    attractors: BufferSlot,
    particles: BufferSlot,

    environment: Environment,
    frame_index: u32,
    viewport: Viewport,
    particle_threads_per_group: u32,

    calculator: AggregateCalculator,
    frames: FrameTracker,
    readback: SnapshotReadback,
}

impl WorldBuffers {
    pub fn new(gpu: GpuContext, particle_threads_per_group: u32) -> Self {
        Self {
            gpu,
            settings_buffer: None,
            settings_generation: 0,
            groups: BufferSlot::default(),
            attractors: BufferSlot::default(),
            particles: BufferSlot::default(),
            environment: Environment::default(),
            frame_index: 0,
            viewport: Viewport::default(),
            particle_threads_per_group: particle_threads_per_group.max(1),
            calculator: AggregateCalculator::default(),
            frames: FrameTracker::default(),
            readback: SnapshotReadback::default(),
        }
    }

    // ---- Reconciliation ----

    /// Brings the GPU regions in line with `world`, recreating only what the
    /// world's update flags mark as stale. Returns whether any region was
    /// recreated.
    pub fn reconcile(&mut self, world: &mut World) -> bool {
        self.reconcile_flags(world).recreated
    }

    /// Same as [`reconcile`](Self::reconcile), also returning the flags it consumed.
    pub(crate) fn reconcile_flags(&mut self, world: &mut World) -> Reconciliation {
        // Fixed size, created once
        let created_settings = self.settings_buffer.is_none();
        if created_settings {
            self.settings_buffer = Some(self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("settings"),
                size: std::mem::size_of::<Environment>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.settings_generation += 1;
        }

        let flags = world.take_update_flags();

        if flags.contains(UpdateFlag::ATTRACTORS) {
            self.groups.replace(&self.gpu.device, "groups", world.groups());
            self.attractors.replace(&self.gpu.device, "attractors", world.attractors());
            log::debug!(
                "Reconciled groups ({}) and attractors ({})",
                self.groups.count(),
                self.attractors.count()
            );
        }

        if flags.contains(UpdateFlag::PARTICLES) {
            self.particles.replace(&self.gpu.device, "particles", world.particles());
            log::debug!("Reconciled particles ({})", self.particles.count());
        }

        // Counts follow the allocated regions, not the live collections
        self.environment.apply_settings(world.settings());
        self.environment.number_of_groups = self.groups.count() as u32;
        self.environment.number_of_attractors = self.attractors.count() as u32;
        self.environment.number_of_particles = self.particles.count() as u32;
        self.environment.frame = self.frame_index;
        self.environment.apply_viewport(self.viewport);
        self.write_environment();

        Reconciliation {
            consumed: flags,
            recreated: created_settings || flags.intersects(UpdateFlag::ATTRACTORS | UpdateFlag::PARTICLES),
        }
    }

    // ---- Frame / viewport metadata ----

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.environment.apply_viewport(viewport);
        self.write_environment();
    }

    pub fn advance_frame(&mut self) {
        self.frame_index = self.frame_index.wrapping_add(1);
        self.environment.frame = self.frame_index;
        self.write_environment();
    }

    pub(crate) fn set_particles_per_group(&mut self, particles_per_group: u32) {
        self.environment.particles_per_group = particles_per_group;
        self.write_environment();
    }

    fn write_environment(&self) {
        if let Some(buffer) = &self.settings_buffer {
            self.gpu
                .queue
                .write_buffer(buffer, 0, bytemuck::bytes_of(&self.environment));
        }
    }

    // ---- Frame computation ----

    /// Runs one frame of the compute pipeline. The calculator borrows these
    /// buffers for the duration of the call only.
    pub fn compute_frame(
        &mut self,
        world: &mut World,
        surface: Option<&FieldSurface>,
        render_size: Option<Viewport>,
    ) -> FrameReport {
        let mut calculator = std::mem::take(&mut self.calculator);
        let report = calculator.compute_frame(self, world, surface, render_size);
        self.calculator = calculator;
        report
    }

    /// Submits the frame's stage command buffers in order, followed by the
    /// snapshot copies if one was requested.
    pub(crate) fn submit(&mut self, mut command_buffers: Vec<wgpu::CommandBuffer>) {
        if self.readback.is_requested() {
            let mut encoder = self
                .gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("snapshot_copies"),
                });
            self.readback.encode_copies(
                &self.gpu.device,
                &mut encoder,
                self.frame_index,
                self.viewport,
                [&self.groups, &self.attractors, &self.particles],
            );
            command_buffers.push(encoder.finish());
        }
        self.frames.submit(&self.gpu.queue, command_buffers);
        self.readback.start_mapping();
    }

    // ---- Snapshot readback ----

    /// Asks for a CPU copy of the buffers at the end of the next submitted
    /// frame. Returns false if an earlier snapshot is still being mapped; that
    /// one has to be taken first.
    pub fn request_snapshot(&mut self) -> bool {
        let accepted = self.readback.request();
        if !accepted {
            log::debug!("Snapshot request at frame {} ignored: previous one in flight", self.frame_index);
        }
        accepted
    }

    pub fn snapshot_pending(&self) -> bool {
        self.readback.is_pending()
    }

    /// Returns the requested snapshot once the GPU has finished with it.
    pub fn try_take_snapshot(&mut self) -> Option<Result<WorldSnapshot, ReadbackError>> {
        self.readback.try_take(&self.gpu.device)
    }

    /// Waits for the in-flight snapshot.
    pub fn read_snapshot_blocking(&mut self) -> Option<Result<WorldSnapshot, ReadbackError>> {
        let _ = self.gpu.device.poll(wgpu::Maintain::Wait);
        self.readback.try_take(&self.gpu.device)
    }

    // ---- Accessors ----

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn settings_buffer(&self) -> Option<&wgpu::Buffer> {
        self.settings_buffer.as_ref()
    }

    pub fn groups(&self) -> &BufferSlot {
        &self.groups
    }

    pub fn attractors(&self) -> &BufferSlot {
        &self.attractors
    }

    pub fn particles(&self) -> &BufferSlot {
        &self.particles
    }

    pub fn number_of_groups(&self) -> usize {
        self.groups.count()
    }

    pub fn number_of_attractors(&self) -> usize {
        self.attractors.count()
    }

    pub fn number_of_particles(&self) -> usize {
        self.particles.count()
    }

    /// Whether the field stage is currently built. It is dropped by any frame
    /// computed without a surface.
    pub fn has_field_stage(&self) -> bool {
        self.calculator.has_field_stage()
    }

    pub fn generations(&self) -> BufferGenerations {
        BufferGenerations {
            settings: self.settings_generation,
            groups: self.groups.generation(),
            attractors: self.attractors.generation(),
            particles: self.particles.generation(),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn particle_threads_per_group(&self) -> u32 {
        self.particle_threads_per_group
    }

    pub fn submitted_frames(&self) -> u64 {
        self.frames.submitted
    }

    pub fn completed_frames(&self) -> u64 {
        self.frames.completed()
    }

    /// Advisory: true while submitted work has not reported completion.
    pub fn is_updating(&self) -> bool {
        self.frames.completed() < self.frames.submitted
    }
}
