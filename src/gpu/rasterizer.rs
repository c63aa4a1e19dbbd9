use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::pipeline::{self, EnergyUniforms, EnergyVertex, DEPTH_FORMAT, MAP_FORMAT};
use crate::energy::{EnergyShading, RasterSetup, Rasterizer};
use crate::error::{Result, SimError};
use crate::grid::{Grid, Texel};
use crate::params::IntensityTable;
use crate::scene::Scene;

const TEXEL_BYTES: u32 = std::mem::size_of::<Texel>() as u32;

/// Render target, depth buffer and readback buffer for one map size.
struct MapTargets {
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    readback: wgpu::Buffer,
}

impl MapTargets {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Energy Map Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: MAP_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Energy Map Depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let unpadded_bytes_per_row = TEXEL_BYTES * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row_padding = (align - unpadded_bytes_per_row % align) % align;
        let padded_bytes_per_row = unpadded_bytes_per_row + padded_bytes_per_row_padding;
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Energy Map Readback"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            width,
            height,
            padded_bytes_per_row,
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            texture,
            readback,
        }
    }
}

/// Hardware rasterizer: same contract as the CPU reference, rendered into an
/// `Rgba32Float` target and read back.
pub struct GpuRasterizer {
    ctx: GpuContext,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    targets: Option<MapTargets>,
}

impl GpuRasterizer {
    pub fn new(ctx: GpuContext) -> Self {
        let device = &ctx.device;
        let bind_group_layout = pipeline::create_bind_group_layout(device);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Energy Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = pipeline::create_energy_pipeline(device, &layout);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Energy Uniform Buffer"),
            size: std::mem::size_of::<EnergyUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            ctx,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            targets: None,
        }
    }

    /// Create a headless device and the rasterizer on top of it.
    pub fn headless() -> Result<Self> {
        Ok(Self::new(GpuContext::headless()?))
    }

    pub fn adapter(&self) -> &str {
        &self.ctx.adapter
    }

    fn ensure_targets(&mut self, width: u32, height: u32) {
        let stale = self
            .targets
            .as_ref()
            .map_or(true, |t| t.width != width || t.height != height);
        if stale {
            log::debug!("allocating {}x{} GPU energy map", width, height);
            self.targets = Some(MapTargets::new(&self.ctx.device, width, height));
        }
    }
}

impl Rasterizer for GpuRasterizer {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn rasterize(
        &mut self,
        scene: &Scene,
        setup: &RasterSetup,
        shading: &EnergyShading,
        table: Option<&IntensityTable>,
        target: &mut Grid<Texel>,
    ) -> Result<()> {
        let (width, height) = (setup.width as u32, setup.height as u32);
        let uniforms = EnergyUniforms {
            projection: setup.projection().to_cols_array_2d(),
            shading: *shading,
        };
        self.ctx
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let vertices: Vec<EnergyVertex> = scene
            .triangles()
            .iter()
            .flat_map(|tri| {
                (0..3).map(move |i| EnergyVertex {
                    position: tri.positions[i].to_array(),
                    normal: tri.normals[i].to_array(),
                })
            })
            .collect();

        let device = &self.ctx.device;
        // storage bindings must not be empty
        let table_values: &[f32] = match table {
            Some(t) if shading.uses_table() && !t.values.is_empty() => &t.values,
            _ => &[0.0],
        };
        let table_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Intensity Table Buffer"),
            contents: bytemuck::cast_slice(table_values),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let vertex_buffer = (!vertices.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Energy Vertex Buffer"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            })
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: table_buffer.as_entire_binding(),
                },
            ],
            label: Some("energy_bind_group"),
        });

        self.ensure_targets(width, height);
        let (device, queue) = (&self.ctx.device, &self.ctx.queue);
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| SimError::Gpu("render targets missing".into()))?;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Energy Map Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Energy Map Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some(vertex_buffer) = &vertex_buffer {
                render_pass.set_pipeline(&self.pipeline);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                render_pass.draw(0..vertices.len() as u32, 0..1);
            }
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &targets.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &targets.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let buffer_slice = targets.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| SimError::Gpu(e.to_string()))?
            .map_err(|e| SimError::Gpu(e.to_string()))?;

        if target.width() != setup.width || target.height() != setup.height {
            target.resize(setup.width, setup.height);
        }
        {
            let data = buffer_slice.get_mapped_range();
            let row_bytes = (TEXEL_BYTES * width) as usize;
            let out = target.as_mut_slice();
            // Unpad rows; row 0 of the texture is the top of the image.
            for y in 0..height as usize {
                let start = y * targets.padded_bytes_per_row as usize;
                let row: &[Texel] = bytemuck::cast_slice(&data[start..start + row_bytes]);
                out[y * setup.width..(y + 1) * setup.width].copy_from_slice(row);
            }
        }
        targets.readback.unmap();
        Ok(())
    }
}
