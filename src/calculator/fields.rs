// ============================================================================
// calculator/fields.rs - Gravifields
// Field texture: per-pixel gravity field from every attractor, written to a
// storage texture the presentation pass samples.
// ============================================================================

use super::{
    build_kernel, check_dispatch, dispatch, required, storage, tile_partition, BufferKind, Calculator,
    CalculatorError, Stage, FIELD_TILE,
};
use crate::gpu::GpuContext;
use crate::model::Viewport;
use crate::pipeline::{bg_buffer, bg_texture, bgl_storage_ro, bgl_storage_texture_wo, bgl_uniform, ComputeKernel};
use crate::world_buffers::WorldBuffers;

// ======================== Surface ========================

/// Render target of the field stage.
pub struct FieldSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    viewport: Viewport,
}

impl FieldSurface {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub fn new(device: &wgpu::Device, viewport: Viewport) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("field_surface"),
            size: wgpu::Extent3d {
                width: viewport.width.max(1),
                height: viewport.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, viewport }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

// ======================== Calculator ========================

pub struct FieldsCalculator {
    kernel: ComputeKernel,
}

impl FieldsCalculator {
    pub fn new(gpu: &GpuContext) -> Result<Self, CalculatorError> {
        let kernel = build_kernel(
            gpu,
            Stage::FieldTexture,
            include_str!("../shaders/gravity_fields.wgsl"),
            &[
                bgl_storage_texture_wo(0, FieldSurface::FORMAT),
                bgl_storage_ro(1),
                bgl_uniform(2),
            ],
        )?;
        Ok(Self { kernel })
    }
}

impl Calculator for FieldsCalculator {
    fn stage(&self) -> Stage {
        Stage::FieldTexture
    }

    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &mut WorldBuffers,
        surface: Option<&FieldSurface>,
    ) -> Result<(), CalculatorError> {
        let surface = surface.ok_or(CalculatorError::RequiredBufferEmpty(BufferKind::Surface))?;
        let attractors = storage(buffers.gpu(), buffers.attractors().buffer(), BufferKind::Attractors)?;
        let settings = required(buffers.settings_buffer(), BufferKind::Settings)?;

        let size = surface.viewport();
        let (tiles_x, tiles_y) = tile_partition(size.width.max(1), size.height.max(1), FIELD_TILE);
        check_dispatch(buffers.gpu(), Stage::FieldTexture, [tiles_x, tiles_y, 1])?;

        let bind_group = self.kernel.bind_group(
            &buffers.gpu().device,
            &[bg_texture(0, surface.view()), bg_buffer(1, attractors), bg_buffer(2, settings)],
        );
        dispatch(encoder, &self.kernel, &bind_group, [tiles_x, tiles_y, 1]);
        Ok(())
    }
}
