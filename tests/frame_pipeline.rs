//! GPU reconciliation and frame-pipeline tests. Each test acquires its own
//! device and skips when no adapter is available.

use gravifields::calculator::{BufferKind, FrameStatus, Stage, StageStatus, FieldSurface};
use gravifields::config::SimulationConfig;
use gravifields::gpu::GpuContext;
use gravifields::headless::{max_position_error, run_headless, HeadlessConfig};
use gravifields::model::{UpdateFlag, Viewport};
use gravifields::world::World;
use gravifields::world_buffers::WorldBuffers;

const VIEWPORT: Viewport = Viewport { width: 320, height: 200 };

fn init_buffers(threads: u32) -> Option<WorldBuffers> {
    init_buffers_with_limits(threads, wgpu::Limits::default())
}

fn init_buffers_with_limits(threads: u32, limits: wgpu::Limits) -> Option<WorldBuffers> {
    let _ = env_logger::builder().is_test(true).try_init();
    match GpuContext::headless_with_limits(limits) {
        Ok(gpu) => Some(WorldBuffers::new(gpu, threads)),
        Err(e) => {
            eprintln!("No GPU adapter ({e}); skipping test.");
            None
        }
    }
}

fn seeded_world(complexity: usize, grid: usize, seed: u64) -> World {
    World::new(&SimulationConfig {
        complexity,
        particles_grid_size: grid,
        seed: Some(seed),
        ..SimulationConfig::default()
    })
}

#[test]
fn second_reconcile_is_a_no_op() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(5, 6, 1);

    assert!(buffers.reconcile(&mut world));
    let first = buffers.generations();
    assert!(world.update_flag().is_empty());

    assert!(!buffers.reconcile(&mut world));
    assert_eq!(buffers.generations(), first);
    assert_eq!(buffers.number_of_groups(), world.groups().len());
    assert_eq!(buffers.number_of_attractors(), world.attractors().len());
    assert_eq!(buffers.number_of_particles(), 36);
}

#[test]
fn first_reconcile_reports_settings_creation() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(2, 2, 11);
    world.clear_update_flags();

    assert!(buffers.reconcile(&mut world));
    assert_eq!(buffers.generations().settings, 1);
    assert_eq!(buffers.number_of_attractors(), 0);

    assert!(!buffers.reconcile(&mut world));
    assert_eq!(buffers.generations().settings, 1);
}

#[test]
fn particle_change_leaves_scene_buffers_alone() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(5, 4, 2);
    buffers.reconcile(&mut world);
    let before = buffers.generations();

    world.set_particles_grid_size(7);
    assert_eq!(world.update_flag(), UpdateFlag::PARTICLES);
    assert!(buffers.reconcile(&mut world));

    let after = buffers.generations();
    assert_eq!(after.groups, before.groups);
    assert_eq!(after.attractors, before.attractors);
    assert_eq!(after.settings, before.settings);
    assert_eq!(after.particles, before.particles + 1);
    assert_eq!(buffers.number_of_particles(), 49);
    assert_eq!(buffers.environment().number_of_particles, 49);
}

#[test]
fn settings_change_rewrites_block_without_reallocating() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(3, 3, 3);
    buffers.reconcile(&mut world);
    let before = buffers.generations();

    world.set_gravity_factor(7.5);
    world.set_lock_particles(true);
    assert!(!buffers.reconcile(&mut world));

    assert_eq!(buffers.generations(), before);
    assert_eq!(buffers.environment().gravity_factor, 7.5);
    assert_eq!(buffers.environment().lock_particles, 1);
}

#[test]
fn viewport_and_frame_metadata_are_mirrored() {
    let Some(mut buffers) = init_buffers(64) else { return };
    buffers.set_viewport(Viewport::new(300, 400));
    assert_eq!(buffers.environment().width, 300);
    assert_eq!(buffers.environment().height, 400);
    assert!((buffers.environment().radius - 500.0).abs() < 1e-3);

    buffers.advance_frame();
    buffers.advance_frame();
    assert_eq!(buffers.frame_index(), 2);
    assert_eq!(buffers.environment().frame, 2);
}

#[test]
fn frame_without_render_size_does_nothing() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(5, 4, 4);
    let flags = world.update_flag();

    let report = buffers.compute_frame(&mut world, None, None);
    assert_eq!(report.status, FrameStatus::NoRenderSize);
    assert!(report.stages.is_empty());
    assert_eq!(world.update_flag(), flags);
    assert_eq!(buffers.frame_index(), 0);
    assert_eq!(buffers.submitted_frames(), 0);
    assert_eq!(buffers.number_of_particles(), 0);

    let report = buffers.compute_frame(&mut world, None, Some(Viewport::new(0, 200)));
    assert_eq!(report.status, FrameStatus::NoRenderSize);
}

#[test]
fn frame_runs_stages_clears_flags_and_advances_once() {
    let Some(mut buffers) = init_buffers(16) else { return };
    let mut world = seeded_world(5, 10, 5);
    assert_eq!(world.update_flag(), UpdateFlag::ALL);

    let report = buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    assert!(report.submitted(), "{:?}", report.status);
    assert!(report.buffers_recreated);
    assert_eq!(report.frame, 0);
    assert_eq!(buffers.frame_index(), 1);
    assert!(world.update_flag().is_empty());

    let order: Vec<Stage> = report.stages.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(order, Stage::ORDER.to_vec());
    assert_eq!(report.stage(Stage::GroupPositions), Some(&StageStatus::Encoded));
    assert_eq!(report.stage(Stage::AttractorPositions), Some(&StageStatus::Encoded));
    assert_eq!(report.stage(Stage::ParticleForces), Some(&StageStatus::Encoded));
    assert_eq!(
        report.stage(Stage::FieldTexture),
        Some(&StageStatus::Skipped(BufferKind::Surface))
    );

    // 100 particles over 16 threads: ceil(100/16) = 7 per group
    assert_eq!(buffers.environment().particles_per_group, 7);

    let report = buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    assert!(report.submitted());
    assert!(!report.buffers_recreated);
    assert_eq!(report.frame, 1);
    assert_eq!(buffers.frame_index(), 2);
}

#[test]
fn empty_particle_grid_skips_only_the_particle_stage() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(3, 0, 6);

    let report = buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    assert!(report.submitted());
    assert_eq!(
        report.stage(Stage::ParticleForces),
        Some(&StageStatus::Skipped(BufferKind::Particles))
    );
    assert_eq!(report.stage(Stage::GroupPositions), Some(&StageStatus::Encoded));
    assert_eq!(report.stage(Stage::AttractorPositions), Some(&StageStatus::Encoded));
    assert!(buffers.particles().buffer().is_none());
    assert_eq!(buffers.frame_index(), 1);
}

#[test]
fn field_stage_runs_with_a_surface_and_is_dropped_without_one() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(4, 5, 7);
    let surface = FieldSurface::new(&buffers.gpu().device, VIEWPORT);
    assert!(!buffers.has_field_stage());

    let report = buffers.compute_frame(&mut world, Some(&surface), None);
    assert!(report.submitted(), "{:?}", report.status);
    assert_eq!(report.encoded_stages(), 4);
    assert_eq!(buffers.viewport(), VIEWPORT);
    assert!(buffers.has_field_stage());

    let report = buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    assert_eq!(
        report.stage(Stage::FieldTexture),
        Some(&StageStatus::Skipped(BufferKind::Surface))
    );
    assert!(!buffers.has_field_stage());

    let report = buffers.compute_frame(&mut world, Some(&surface), None);
    assert_eq!(report.stage(Stage::FieldTexture), Some(&StageStatus::Encoded));
    assert!(buffers.has_field_stage());
}

#[test]
fn surface_size_wins_over_render_size() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(3, 3, 12);
    let surface = FieldSurface::new(&buffers.gpu().device, VIEWPORT);

    let report = buffers.compute_frame(&mut world, Some(&surface), Some(Viewport::new(100, 100)));
    assert!(report.submitted());
    assert_eq!(buffers.viewport(), VIEWPORT);
    assert_eq!(buffers.environment().width, VIEWPORT.width);
    assert_eq!(buffers.environment().height, VIEWPORT.height);
}

#[test]
fn inverted_empty_field_is_opaque_white() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(3, 2, 13);
    world.set_invert_colors(true);
    world.set_fields_sensitivity(0.0);

    // 64 px * 4 bytes keeps rows at the 256-byte copy alignment
    let size = Viewport::new(64, 64);
    let surface = FieldSurface::new(&buffers.gpu().device, size);
    let report = buffers.compute_frame(&mut world, Some(&surface), None);
    assert_eq!(report.stage(Stage::FieldTexture), Some(&StageStatus::Encoded));

    let gpu = buffers.gpu();
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("field_readback"),
        size: u64::from(size.width * size.height * 4),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("field_readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: surface.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width * 4),
                rows_per_image: Some(size.height),
            },
        },
        wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| result.expect("field readback map"));
    let _ = gpu.device.poll(wgpu::Maintain::Wait);
    let pixels = slice.get_mapped_range().to_vec();

    assert_eq!(pixels.len(), 64 * 64 * 4);
    assert!(pixels.chunks(4).all(|px| px == [255, 255, 255, 255]));
}

#[test]
fn oversized_particle_buffer_fails_only_its_stage() {
    // 20x20 particles at 64 bytes each need 25600 bytes
    let limits = wgpu::Limits {
        max_storage_buffer_binding_size: 8192,
        ..wgpu::Limits::default()
    };
    let Some(mut buffers) = init_buffers_with_limits(64, limits) else { return };
    let mut world = seeded_world(3, 20, 14);

    for _ in 0..3 {
        buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    }
    buffers.request_snapshot();
    let report = buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    assert!(report.submitted());
    assert_eq!(report.stage(Stage::GroupPositions), Some(&StageStatus::Encoded));
    assert_eq!(report.stage(Stage::AttractorPositions), Some(&StageStatus::Encoded));
    assert!(
        matches!(report.stage(Stage::ParticleForces), Some(StageStatus::Failed(_))),
        "{:?}",
        report.stages
    );

    let snapshot = buffers.read_snapshot_blocking().unwrap().unwrap();
    assert_eq!(snapshot.frame, 3);
    max_position_error(&snapshot).unwrap();
}

#[test]
fn snapshot_request_is_refused_while_one_is_in_flight() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(3, 3, 15);

    assert!(buffers.request_snapshot());
    buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    assert!(!buffers.request_snapshot());

    let first = buffers.read_snapshot_blocking().unwrap().unwrap();
    assert_eq!(first.frame, 0);

    assert!(buffers.request_snapshot());
    buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    let second = buffers.read_snapshot_blocking().unwrap().unwrap();
    assert_eq!(second.frame, 1);
}

#[test]
fn headless_final_snapshot_is_the_last_frame() {
    if GpuContext::headless().is_err() {
        eprintln!("No GPU adapter; skipping test.");
        return;
    }
    let mut config = HeadlessConfig {
        frames: 6,
        viewport: VIEWPORT,
        progress_interval: 0,
        diag_interval: 1,
        ..HeadlessConfig::default()
    };
    config.simulation.complexity = 3;
    config.simulation.particles_grid_size = 4;
    config.simulation.seed = Some(16);

    let summary = run_headless(&config).unwrap();
    assert_eq!(summary.frames, 6);
    assert_eq!(summary.final_frame, Some(5));
    assert!(summary.max_position_error <= gravifields::headless::POSITION_TOLERANCE_PX);
}

#[test]
fn snapshot_matches_cpu_reference() {
    let Some(mut buffers) = init_buffers(8) else { return };
    let mut world = seeded_world(6, 9, 8);

    for frame in 0..5u32 {
        if frame == 4 {
            buffers.request_snapshot();
        }
        assert!(buffers.compute_frame(&mut world, None, Some(VIEWPORT)).submitted());
    }
    assert!(buffers.snapshot_pending());

    let snapshot = buffers
        .read_snapshot_blocking()
        .expect("snapshot requested")
        .expect("snapshot mapped");
    assert!(!buffers.snapshot_pending());
    assert!(!buffers.is_updating());
    assert_eq!(buffers.completed_frames(), buffers.submitted_frames());

    assert_eq!(snapshot.frame, 4);
    assert_eq!(snapshot.viewport, VIEWPORT);
    assert_eq!(snapshot.groups.len(), world.groups().len());
    assert_eq!(snapshot.attractors.len(), world.attractors().len());
    assert_eq!(snapshot.particles.len(), 81);

    max_position_error(&snapshot).unwrap();
    for (gpu, cpu) in snapshot.particles.iter().zip(world.particles()) {
        assert_eq!(gpu.anchor, cpu.anchor);
        assert!(gpu.distance_to_anchor.is_finite());
        assert!(gpu.gravity_magnitude().is_finite());
    }
}

#[test]
fn locked_particles_stay_on_their_anchors() {
    let Some(mut buffers) = init_buffers(64) else { return };
    let mut world = seeded_world(5, 6, 9);
    world.set_lock_particles(true);

    for _ in 0..3 {
        buffers.compute_frame(&mut world, None, Some(VIEWPORT));
    }
    buffers.request_snapshot();
    buffers.compute_frame(&mut world, None, Some(VIEWPORT));

    let snapshot = buffers.read_snapshot_blocking().unwrap().unwrap();
    for particle in &snapshot.particles {
        assert_eq!(particle.location, particle.anchor);
        assert_eq!(particle.distance_to_anchor, 0.0);
    }
}

#[test]
fn complexity_one_end_to_end() {
    let Some(mut buffers) = init_buffers(4) else { return };
    let mut world = seeded_world(1, 2, 10);
    // One root group plus one top-level group with one subgroup, one attractor each
    assert_eq!(world.groups().len(), 3);
    assert_eq!(world.attractors().len(), 3);

    assert!(buffers.reconcile(&mut world));
    assert!(world.update_flag().is_empty());

    buffers.request_snapshot();
    let report = buffers.compute_frame(&mut world, None, Some(Viewport::new(100, 100)));
    assert!(report.submitted());
    assert_eq!(buffers.environment().particles_per_group, 1);

    let snapshot = buffers.read_snapshot_blocking().unwrap().unwrap();
    assert_eq!(snapshot.frame, 0);
    assert_eq!(snapshot.groups[0].location, [50.0, 50.0]);
    max_position_error(&snapshot).unwrap();

    let anchors: Vec<[f32; 2]> = snapshot.particles.iter().map(|p| p.anchor).collect();
    assert_eq!(anchors, vec![[0.25, 0.25], [0.25, 0.75], [0.75, 0.25], [0.75, 0.75]]);
}
