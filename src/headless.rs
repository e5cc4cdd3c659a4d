// ============================================================================
// headless.rs - Gravifields
// Headless runner: drives the compute pipeline without a window, logs
// progress and diagnostics, and checks GPU positions against the CPU path.
// ============================================================================

use std::time::Instant;

use crate::config::SimulationConfig;
use crate::diagnostics::FrameDiagnostics;
use crate::gpu::GpuContext;
use crate::model::{Attractor, Viewport};
use crate::readback::WorldSnapshot;
use crate::world::World;
use crate::world_buffers::WorldBuffers;

/// Largest tolerated gap between GPU and CPU attractor positions, in pixels.
pub const POSITION_TOLERANCE_PX: f32 = 0.5;

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub frames: u32,
    pub viewport: Viewport,
    pub simulation: SimulationConfig,
    pub progress_interval: u32,
    pub diag_interval: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            viewport: Viewport::new(1280, 720),
            simulation: SimulationConfig::default(),
            progress_interval: 200,
            diag_interval: 100,
        }
    }
}

/// What a completed headless run verified.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadlessSummary {
    pub frames: u32,
    /// Frame the final snapshot was taken at; `None` when no frame ran.
    pub final_frame: Option<u32>,
    /// Largest GPU-vs-CPU attractor distance in the final snapshot, in pixels.
    pub max_position_error: f32,
}

pub fn run_headless(config: &HeadlessConfig) -> Result<HeadlessSummary, String> {
    if config.viewport.is_empty() {
        return Err(format!(
            "Headless viewport must be non-empty, got {}x{}",
            config.viewport.width, config.viewport.height
        ));
    }

    let gpu = GpuContext::headless().map_err(|e| format!("Failed to initialise GPU for headless mode: {e}"))?;
    let mut buffers = WorldBuffers::new(gpu, config.simulation.particle_threads_per_group);
    let mut world = World::new(&config.simulation);

    log::info!(
        "Headless run started: {} frames on {}x{} | {} groups, {} attractors, {} particles",
        config.frames,
        config.viewport.width,
        config.viewport.height,
        world.groups().len(),
        world.attractors().len(),
        world.particles().len(),
    );

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_report_frame = 0u32;
    let mut last_diag: Option<FrameDiagnostics> = None;

    for step in 0..config.frames {
        let last = step + 1 == config.frames;
        if last {
            // A diagnostics snapshot still mapping would swallow the final request
            if buffers.snapshot_pending() {
                if let Some(result) = buffers.read_snapshot_blocking() {
                    log_diagnostics(result.map_err(|e| e.to_string())?, &mut last_diag);
                }
            }
            buffers.request_snapshot();
        } else if config.diag_interval > 0 && (step + 1) % config.diag_interval == 0 {
            buffers.request_snapshot();
        }

        let report = buffers.compute_frame(&mut world, None, Some(config.viewport));
        if !report.submitted() {
            return Err(format!("Frame {} was not submitted: {:?}", report.frame, report.status));
        }

        // The final snapshot is read after the loop
        if let Some(result) = (!last).then(|| buffers.try_take_snapshot()).flatten() {
            log_diagnostics(result.map_err(|e| e.to_string())?, &mut last_diag);
        }

        if config.progress_interval > 0 && (step + 1) % config.progress_interval == 0 {
            let done = step + 1;
            let total_elapsed = started.elapsed().as_secs_f64().max(1e-6);
            let total_fps = done as f64 / total_elapsed;

            let window_elapsed = last_report.elapsed().as_secs_f64().max(1e-6);
            let window_fps = (done - last_report_frame) as f64 / window_elapsed;

            let remaining = config.frames.saturating_sub(done);
            let eta_secs = if total_fps > 1e-6 { remaining as f64 / total_fps } else { 0.0 };

            log::info!(
                "Headless progress: {}/{} | fps={:.0} (window {:.0}) | in flight={} | ETA={:.1} s",
                done,
                config.frames,
                total_fps,
                window_fps,
                buffers.submitted_frames() - buffers.completed_frames(),
                eta_secs,
            );

            last_report = Instant::now();
            last_report_frame = done;
        }
    }

    if config.frames == 0 {
        return Ok(HeadlessSummary {
            frames: 0,
            final_frame: None,
            max_position_error: 0.0,
        });
    }

    let snapshot = match buffers.read_snapshot_blocking() {
        Some(result) => result.map_err(|e| format!("Final snapshot failed: {e}"))?,
        None => return Err(String::from("Final snapshot was never taken")),
    };
    if snapshot.frame != config.frames - 1 {
        return Err(format!(
            "Final snapshot came from frame {}, expected {}",
            snapshot.frame,
            config.frames - 1
        ));
    }
    let worst = max_position_error(&snapshot)?;
    let final_frame = snapshot.frame;
    log_diagnostics(snapshot, &mut last_diag);

    log::info!(
        "Attractor positions match CPU reference at frame {} (max error {:.4}px)",
        final_frame,
        worst
    );
    Ok(HeadlessSummary {
        frames: config.frames,
        final_frame: Some(final_frame),
        max_position_error: worst,
    })
}

fn log_diagnostics(snapshot: WorldSnapshot, last_diag: &mut Option<FrameDiagnostics>) {
    let diag = FrameDiagnostics::from_snapshot(&snapshot);
    diag.log(last_diag.as_ref());
    *last_diag = Some(diag);
}

/// Largest distance between the GPU attractor positions in `snapshot` and
/// [`Attractor::positioned`] for the same frame.
pub fn max_position_error(snapshot: &WorldSnapshot) -> Result<f32, String> {
    let mut worst = 0.0f32;
    for (i, attractor) in snapshot.attractors.iter().enumerate() {
        let expected = attractor
            .positioned(snapshot.frame, snapshot.viewport, &snapshot.groups)
            .ok_or_else(|| format!("Attractor {} has a broken group chain", i))?;
        let error = distance(attractor, expected);
        if !(error <= POSITION_TOLERANCE_PX) {
            return Err(format!(
                "Attractor {} at {:?}, expected {:?} (error {:.3}px)",
                i, attractor.location, expected, error
            ));
        }
        worst = worst.max(error);
    }
    Ok(worst)
}

fn distance(attractor: &Attractor, expected: [f32; 2]) -> f32 {
    let dx = attractor.location[0] - expected[0];
    let dy = attractor.location[1] - expected[1];
    (dx * dx + dy * dy).sqrt()
}
