// ============================================================================
// app.rs - Gravifields
// Application state and winit event-loop handler. Each redraw is a render
// tick: run one compute frame into the field surface, then present it.
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    keyboard::{Key, NamedKey},
    window::{Window, WindowAttributes},
};

use crate::calculator::{FieldSurface, FrameStatus};
use crate::config::{next_spring_preset, SimulationConfig, MAX_COMPLEXITY, MAX_PARTICLES_GRID_SIZE};
use crate::diagnostics::FrameDiagnostics;
use crate::gpu::{request_device, GpuContext};
use crate::model::Viewport;
use crate::present::Presenter;
use crate::world::World;
use crate::world_buffers::WorldBuffers;

// ======================== Application ========================

pub struct App {
    state: Option<AppState>,
    config: AppConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub window_size: Viewport,
    /// Frames between diagnostic snapshots; 0 disables them.
    pub diag_interval: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            window_size: Viewport::new(1280, 800),
            diag_interval: 300,
        }
    }
}

struct AppState {
    // GPU
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    buffers: WorldBuffers,
    field: FieldSurface,
    presenter: Presenter,

    // Simulation
    world: World,
    paused: bool,

    // Window
    window: Arc<Window>,

    // Timing
    last_redraw: Instant,
    fps: f32,

    // Diagnostics
    last_diag: Option<FrameDiagnostics>,
    diag_interval: u32,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self { state: None, config }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match init_state(event_loop, &self.config) {
            Ok(state) => {
                // Initial redraw, required on macOS with winit 0.30
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => {
                log::error!("{}", e);
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::KeyboardInput { event, .. } => {
                handle_keyboard(state, event_loop, &event);
            }

            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    state.surface_config.width = new_size.width;
                    state.surface_config.height = new_size.height;
                    state.surface.configure(&state.buffers.gpu().device, &state.surface_config);
                    resize_field(state, Viewport::new(new_size.width, new_size.height));
                }
            }

            WindowEvent::RedrawRequested => {
                redraw(state, event_loop);
            }

            _ => {}
        }
    }
}

// ======================== GPU Initialization ========================

fn init_state(event_loop: &winit::event_loop::ActiveEventLoop, config: &AppConfig) -> Result<AppState, String> {
    let window_attrs = WindowAttributes::default()
        .with_title("Gravifields")
        .with_inner_size(winit::dpi::LogicalSize::new(
            config.window_size.width.max(1),
            config.window_size.height.max(1),
        ));
    let window = Arc::new(
        event_loop
            .create_window(window_attrs)
            .map_err(|e| format!("Failed to create window: {e}"))?,
    );

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let surface = instance
        .create_surface(window.clone())
        .map_err(|e| format!("Failed to create surface: {e}"))?;

    let (gpu, surface_config) = pollster::block_on(init_gpu(&instance, &surface, &window))?;
    surface.configure(&gpu.device, &surface_config);

    let viewport = Viewport::new(surface_config.width, surface_config.height);
    let field = FieldSurface::new(&gpu.device, viewport);
    let mut presenter = Presenter::new(&gpu.device, surface_config.format);
    presenter.bind_surface(&gpu.device, &field);

    let world = World::new(&config.simulation);
    let buffers = WorldBuffers::new(gpu, config.simulation.particle_threads_per_group);

    log::info!(
        "Scene: {} groups, {} attractors, {} particles on {}x{}",
        world.groups().len(),
        world.attractors().len(),
        world.particles().len(),
        viewport.width,
        viewport.height
    );

    Ok(AppState {
        surface,
        surface_config,
        buffers,
        field,
        presenter,
        world,
        paused: false,
        window,
        last_redraw: Instant::now(),
        fps: 0.0,
        last_diag: None,
        diag_interval: config.diag_interval,
    })
}

async fn init_gpu(
    instance: &wgpu::Instance,
    surface: &wgpu::Surface<'_>,
    window: &Window,
) -> Result<(GpuContext, wgpu::SurfaceConfiguration), String> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(surface),
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| {
            String::from(
                "Failed to find a suitable GPU adapter.\n\
                 Gravifields requires a GPU with Vulkan, Metal, or DX12 support.",
            )
        })?;

    log::info!("GPU: {}", adapter.get_info().name);

    let (device, queue) = request_device(&adapter, "gravifields_device", wgpu::Limits::default())
        .await
        .map_err(|e| e.to_string())?;

    let size = window.inner_size();
    let surface_caps = surface.get_capabilities(&adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .find(|f| f.is_srgb())
        .copied()
        .or_else(|| surface_caps.formats.first().copied())
        .ok_or_else(|| String::from("Surface reports no supported formats"))?;

    let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
        log::info!("Present mode: Mailbox");
        wgpu::PresentMode::Mailbox
    } else {
        log::info!("Present mode: Fifo (VSync ON)");
        wgpu::PresentMode::Fifo
    };

    let surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode,
        alpha_mode: surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };

    Ok((GpuContext::new(device, queue), surface_config))
}

fn resize_field(state: &mut AppState, viewport: Viewport) {
    let device = &state.buffers.gpu().device;
    state.field = FieldSurface::new(device, viewport);
    state.presenter.bind_surface(device, &state.field);
    log::debug!("Field surface resized to {}x{}", viewport.width, viewport.height);
}

// ======================== Keyboard Handling ========================

fn handle_keyboard(
    state: &mut AppState,
    event_loop: &winit::event_loop::ActiveEventLoop,
    event: &winit::event::KeyEvent,
) {
    if !event.state.is_pressed() {
        return;
    }
    let world = &mut state.world;

    match &event.logical_key {
        Key::Named(NamedKey::Escape) => event_loop.exit(),
        Key::Named(NamedKey::Space) => {
            state.paused = !state.paused;
            log::info!("{}", if state.paused { "Paused" } else { "Resumed" });
        }

        Key::Character(c) => match c.as_str() {
            "r" | "R" => world.regenerate_scene(),
            "+" | "=" => {
                let size = (world.particles_grid_size() + 2).min(MAX_PARTICLES_GRID_SIZE);
                world.set_particles_grid_size(size);
                log::info!("Particle grid: {}x{}", size, size);
            }
            "-" => {
                let size = world.particles_grid_size().saturating_sub(2);
                world.set_particles_grid_size(size);
                log::info!("Particle grid: {}x{}", size, size);
            }
            "]" => {
                let complexity = (world.complexity() + 1).min(MAX_COMPLEXITY);
                world.set_complexity(complexity);
            }
            "[" => {
                let complexity = world.complexity().saturating_sub(1).max(1);
                world.set_complexity(complexity);
            }
            "g" | "G" => {
                let factor = world.gravity_factor() * 1.25;
                world.set_gravity_factor(factor);
                log::info!("Gravity factor: {:.3}", factor);
            }
            "f" | "F" => {
                let factor = world.gravity_factor() / 1.25;
                world.set_gravity_factor(factor);
                log::info!("Gravity factor: {:.3}", factor);
            }
            "l" | "L" => {
                let lock = !world.lock_particles();
                world.set_lock_particles(lock);
                log::info!("Lock particles: {}", if lock { "ON" } else { "OFF" });
            }
            "i" | "I" => {
                let invert = !world.invert_colors();
                world.set_invert_colors(invert);
            }
            "s" | "S" => {
                let spring = next_spring_preset(world.spring_force());
                world.set_spring_force(spring);
                log::info!("Spring force: {}", spring);
            }
            _ => {}
        },

        _ => {}
    }
}

// ======================== Frame Rendering ========================

fn redraw(state: &mut AppState, event_loop: &winit::event_loop::ActiveEventLoop) {
    // FPS (exponential moving average)
    let now = Instant::now();
    let dt = now.duration_since(state.last_redraw).as_secs_f32().max(0.0001);
    state.last_redraw = now;
    state.fps = state.fps * 0.95 + (1.0 / dt) * 0.05;

    if !state.paused {
        let frame = state.buffers.frame_index();
        if state.diag_interval > 0 && frame > 0 && frame % state.diag_interval == 0 {
            state.buffers.request_snapshot();
        }

        let report = state
            .buffers
            .compute_frame(&mut state.world, Some(&state.field), None);
        if let FrameStatus::Dropped(e) = &report.status {
            log::error!("Frame {} dropped: {}", report.frame, e);
            if state.buffers.gpu().is_lost() {
                event_loop.exit();
                return;
            }
        }
    }

    let output = match state.surface.get_current_texture() {
        Ok(t) => t,
        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
            state.surface.configure(&state.buffers.gpu().device, &state.surface_config);
            return;
        }
        Err(e) => {
            log::error!("Surface error: {:?}", e);
            return;
        }
    };

    let view = output
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let gpu = state.buffers.gpu();
    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("present_encoder"),
    });
    state.presenter.encode(&mut encoder, &view);
    gpu.queue.submit(std::iter::once(encoder.finish()));
    output.present();

    // ---- Periodic diagnostics ----
    if let Some(result) = state.buffers.try_take_snapshot() {
        match result {
            Ok(snapshot) => {
                let diag = FrameDiagnostics::from_snapshot(&snapshot);
                log::info!("FPS: {:.0}", state.fps);
                diag.log(state.last_diag.as_ref());
                state.last_diag = Some(diag);
            }
            Err(e) => log::warn!("Diagnostics snapshot failed: {}", e),
        }
    }
}
