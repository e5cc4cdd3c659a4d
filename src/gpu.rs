// ============================================================================
// gpu.rs - Gravifields
// Device/queue acquisition, device-lost tracking and error-scope helpers.
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ======================== Errors ========================

#[derive(Debug)]
pub enum GpuInitError {
    NoAdapter,
    RequestDevice(wgpu::RequestDeviceError),
}

impl std::fmt::Display for GpuInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuInitError::NoAdapter => write!(f, "no suitable GPU adapter found"),
            GpuInitError::RequestDevice(e) => write!(f, "failed to create device: {e}"),
        }
    }
}

impl std::error::Error for GpuInitError {}

// ======================== GpuContext ========================

/// Device and queue shared by the buffers and every compute stage.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({:?}): {}", reason, message);
            flag.store(true, Ordering::SeqCst);
        });
        // Errors outside a pushed scope are logged instead of aborting the process
        device.on_uncaptured_error(Box::new(|error| {
            log::error!("Uncaptured GPU error: {}", error);
        }));
        Self { device, queue, lost }
    }

    /// Requests an adapter and device without a presentation surface.
    pub fn headless() -> Result<Self, GpuInitError> {
        Self::headless_with_limits(wgpu::Limits::default())
    }

    /// Same as [`headless`](Self::headless) with explicit device limits.
    pub fn headless_with_limits(limits: wgpu::Limits) -> Result<Self, GpuInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuInitError::NoAdapter)?;

        log::info!("GPU: {}", adapter.get_info().name);
        let (device, queue) = pollster::block_on(request_device(&adapter, "gravifields_headless_device", limits))?;
        Ok(Self::new(device, queue))
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Runs `f` inside an error scope and reports the first captured error.
    pub fn scoped<T>(&self, filter: wgpu::ErrorFilter, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(filter);
        let value = f();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }
}

pub async fn request_device(
    adapter: &wgpu::Adapter,
    label: &str,
    limits: wgpu::Limits,
) -> Result<(wgpu::Device, wgpu::Queue), GpuInitError> {
    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .map_err(GpuInitError::RequestDevice)
}
